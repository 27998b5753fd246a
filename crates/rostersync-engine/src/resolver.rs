//! Section/course resolver
//!
//! Expands one claimed course record into its full course / section /
//! enrollment / cross-list closure. Traversal runs off an explicit work-list
//! with a visited set keyed by section natural key, so joint and linked
//! references can never recurse unboundedly.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{info, warn};

use rostersync_core::directory::{Person, SectionDescriptor, StudentDirectory};
use rostersync_core::model::CourseRecord;
use rostersync_core::payload::{
    CourseRow, EnrollmentRow, Row, SectionRow, TermRow, XlistRow, STATUS_ACTIVE, STATUS_DELETED,
};
use rostersync_core::{policy, Collector, Result, SyncConfig, SyncError};
use rostersync_store::Ledger;

use crate::roster::UserRoster;

/// Pending traversal step
enum WorkItem {
    /// A primary (or joint) section to expand in full
    Primary(String),
    /// A linked section under an already-expanded primary; carries the
    /// primary's instructors as co-teachers
    Linked {
        section_key: String,
        co_teachers: Vec<Person>,
    },
}

/// Expands claimed course records into payload rows
///
/// One resolver serves one batch pass: the visited set and section cache
/// persist across records, so a joint section shared by two claimed courses
/// is fetched and emitted once.
pub struct CourseResolver<'a> {
    directory: &'a dyn StudentDirectory,
    config: &'a SyncConfig,
    visited: HashSet<String>,
    sections: HashMap<String, SectionDescriptor>,
    roster: UserRoster,
}

impl<'a> CourseResolver<'a> {
    pub fn new(directory: &'a dyn StudentDirectory, config: &'a SyncConfig) -> Self {
        Self {
            directory,
            config,
            visited: HashSet::new(),
            sections: HashMap::new(),
            roster: UserRoster::new(),
        }
    }

    /// Expand one claimed course record into the collector
    ///
    /// Lookup failures are absorbed per the record failure policy; only
    /// infrastructure failures (ledger, collector) propagate.
    pub fn resolve(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        record: &CourseRecord,
        batch_id: i64,
    ) -> Result<()> {
        let mut worklist = VecDeque::new();
        worklist.push_back(WorkItem::Primary(record.resolve_key().to_string()));

        while let Some(item) = worklist.pop_front() {
            match item {
                WorkItem::Primary(key) => {
                    self.expand_primary(ledger, collector, &key, batch_id, &mut worklist)?;
                }
                WorkItem::Linked {
                    section_key,
                    co_teachers,
                } => {
                    self.expand_linked(ledger, collector, &section_key, &co_teachers, batch_id)?;
                }
            }
        }
        Ok(())
    }

    fn expand_primary(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        section_key: &str,
        batch_id: i64,
        worklist: &mut VecDeque<WorkItem>,
    ) -> Result<()> {
        if !self.visited.insert(section_key.to_string()) {
            return Ok(());
        }

        // Independent-study records created from enrollment events carry the
        // instructor suffix; the directory knows only the base section
        let (base_key, forced_instructor) = split_instructor_suffix(section_key);
        let mut section = match self.fetch(base_key) {
            Ok(section) => section,
            Err(err) => return lookup_failed(ledger, section_key, err),
        };
        if let Some(subject) = forced_instructor {
            section.independent_study_instructor = Some(subject.to_string());
        }
        ledger.update_course_status(&section)?;

        if section.is_independent_study {
            return self.expand_independent_study(ledger, collector, &section, batch_id);
        }

        // First add wins; a repeat sighting of the course key means another
        // traversal already expanded this container
        if !collector.add(Row::Course(CourseRow::from_section(&section))) {
            return Ok(());
        }
        collector.add(Row::Term(TermRow::from_term(&section.term)));

        let linked = self.linked_keys(ledger, &section)?;
        if linked.is_empty() {
            self.emit_section_roster(ledger, collector, &section, &[], batch_id)?;
        } else {
            // The container was provisioned with the primary enrolling
            // directly; retire that section before the linked ones take over
            if ledger
                .get_course(&section.course_key)?
                .is_some_and(|c| c.is_provisioned())
                && ledger.linked_course_keys(&section.course_key)?.is_empty()
            {
                collector.add(Row::Section(SectionRow::new(
                    &section.course_key,
                    &section.course_key,
                    &section.title,
                    STATUS_DELETED,
                )));
            }
            for key in linked {
                worklist.push_back(WorkItem::Linked {
                    section_key: key,
                    co_teachers: section.instructors.clone(),
                });
            }
        }

        self.recompute_crosslist(ledger, collector, &section, worklist)
    }

    fn expand_linked(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        section_key: &str,
        co_teachers: &[Person],
        batch_id: i64,
    ) -> Result<()> {
        if !self.visited.insert(section_key.to_string()) {
            return Ok(());
        }
        let section = match self.fetch(section_key) {
            Ok(section) => section,
            Err(err) => return lookup_failed(ledger, section_key, err),
        };

        // Late-added linked sections enter the ledger here, claimed under
        // the running batch so completion releases them with everything else
        ledger.claim_course_for_section(&section, batch_id)?;
        ledger.update_course_status(&section)?;

        self.emit_section_roster(ledger, collector, &section, co_teachers, batch_id)
    }

    /// Emit the section row plus its instructor and registrant enrollments
    fn emit_section_roster(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        section: &SectionDescriptor,
        co_teachers: &[Person],
        batch_id: i64,
    ) -> Result<()> {
        collector.add(Row::Section(SectionRow::from_section(section)));

        let mut teachers: Vec<&Person> = section.instructors.iter().collect();
        for co in co_teachers {
            if !teachers.iter().any(|t| t.subject_id == co.subject_id) {
                teachers.push(co);
            }
        }
        for person in teachers {
            if self.roster.ensure_user(ledger, collector, person, batch_id)? {
                collector.add(Row::Enrollment(EnrollmentRow::for_instructor(
                    &section.section_key,
                    person,
                    section.status_str(),
                )?));
            }
        }

        if self.config.include_registrations && section.is_active {
            let registrations = match self.directory.registrations(section) {
                Ok(regs) => regs,
                Err(err) => return lookup_failed(ledger, &section.section_key, err),
            };
            for registration in &registrations {
                if self
                    .roster
                    .ensure_user(ledger, collector, &registration.person, batch_id)?
                {
                    collector.add(Row::Enrollment(EnrollmentRow::for_registration(
                        &section.section_key,
                        registration,
                    )?));
                }
            }
        }
        Ok(())
    }

    /// One downstream container per matching instructor
    fn expand_independent_study(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        section: &SectionDescriptor,
        batch_id: i64,
    ) -> Result<()> {
        let instructors: Vec<&Person> = section
            .instructors
            .iter()
            .filter(|person| {
                section
                    .independent_study_instructor
                    .as_deref()
                    .map_or(true, |subject| subject == person.subject_id)
            })
            .collect();
        if instructors.is_empty() {
            warn!(
                section_key = %section.section_key,
                "independent study with no matching instructor"
            );
        }

        let registrations = if self.config.include_registrations && section.is_active {
            match self.directory.registrations(section) {
                Ok(regs) => regs,
                Err(err) => return lookup_failed(ledger, &section.section_key, err),
            }
        } else {
            Vec::new()
        };

        for instructor in instructors {
            // Distinct key per instructor; a repeated key was already emitted
            if !collector.add(Row::Course(CourseRow::independent_study(
                section, instructor,
            ))) {
                continue;
            }
            if !section.is_active {
                continue;
            }
            collector.add(Row::Term(TermRow::from_term(&section.term)));
            collector.add(Row::Section(SectionRow::independent_study(
                section, instructor,
            )));

            let section_key = format!("{}-{}", section.section_key, instructor.subject_id);
            if self
                .roster
                .ensure_user(ledger, collector, instructor, batch_id)?
            {
                collector.add(Row::Enrollment(EnrollmentRow::for_instructor(
                    &section_key,
                    instructor,
                    STATUS_ACTIVE,
                )?));
            }
            for registration in registrations.iter().filter(|reg| {
                reg.instructor_subject_id.as_deref() == Some(instructor.subject_id.as_str())
            }) {
                if self
                    .roster
                    .ensure_user(ledger, collector, &registration.person, batch_id)?
                {
                    collector.add(Row::Enrollment(EnrollmentRow::for_registration(
                        &section_key,
                        registration,
                    )?));
                }
            }
        }
        Ok(())
    }

    /// Recompute the canonical cross-list id and emit the move when it changed
    fn recompute_crosslist(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        section: &SectionDescriptor,
        worklist: &mut VecDeque<WorkItem>,
    ) -> Result<()> {
        let stored = ledger
            .get_course(&section.course_key)?
            .and_then(|record| record.xlist_key);

        let mut joint_keys: BTreeSet<String> =
            section.joint_section_keys.iter().cloned().collect();
        for key in ledger.joint_course_keys(&section.course_key)? {
            joint_keys.insert(key);
        }
        joint_keys.remove(&section.course_key);

        if joint_keys.is_empty() && stored.is_none() {
            return Ok(());
        }

        // Joint sections are containers of their own; expand them too
        for key in &joint_keys {
            worklist.push_back(WorkItem::Primary(key.clone()));
        }

        let mut candidates = vec![section.clone()];
        for key in &joint_keys {
            match self.fetch(key) {
                Ok(joint) => candidates.push(joint),
                // The joint section fails on its own expansion turn;
                // canonical selection just skips it this pass
                Err(err) => {
                    warn!(section_key = %key, error = %err, "joint section lookup failed");
                }
            }
        }

        // The course's own key never stores as its canonical id, so a course
        // that wins its own cross-list carries no cross-list rows
        let canonical =
            canonical_crosslist_id(&candidates).filter(|id| *id != section.course_key);
        if canonical == stored {
            return Ok(());
        }

        let mut members = ledger.linked_course_keys(&section.course_key)?;
        if members.is_empty() {
            // No linked sections; the course's own key stands in
            members.push(section.course_key.clone());
        }

        if let Some(old) = &stored {
            for member in &members {
                collector.add(Row::Xlist(XlistRow::new(old, member, STATUS_DELETED)));
            }
        }
        if let Some(new) = &canonical {
            for member in &members {
                collector.add(Row::Xlist(XlistRow::new(new, member, STATUS_ACTIVE)));
            }
        }

        info!(
            course_key = %section.course_key,
            old = stored.as_deref().unwrap_or("-"),
            new = canonical.as_deref().unwrap_or("-"),
            "cross-list id recomputed"
        );
        ledger.set_course_xlist_key(&section.course_key, canonical.as_deref())
    }

    /// Linked keys from the directory merged with linked ledger rows, so
    /// sections added after the course first provisioned are caught
    fn linked_keys(&self, ledger: &Ledger, section: &SectionDescriptor) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = section.linked_section_keys.iter().cloned().collect();
        for key in ledger.linked_course_keys(&section.course_key)? {
            keys.insert(key);
        }
        keys.remove(&section.course_key);
        Ok(keys.into_iter().collect())
    }

    fn fetch(&mut self, section_key: &str) -> Result<SectionDescriptor> {
        if let Some(section) = self.sections.get(section_key) {
            return Ok(section.clone());
        }
        let section = self.directory.get_section(section_key)?;
        self.sections
            .insert(section_key.to_string(), section.clone());
        Ok(section)
    }
}

/// Select the canonical cross-list container from the active joint sections:
/// downstream-owned sections first, natural key order second
fn canonical_crosslist_id(candidates: &[SectionDescriptor]) -> Option<String> {
    let mut active: Vec<&SectionDescriptor> = candidates
        .iter()
        .filter(|s| s.is_active && !s.is_withdrawn)
        .collect();
    active.sort_by(|a, b| {
        b.lms_owned
            .cmp(&a.lms_owned)
            .then_with(|| a.course_key.cmp(&b.course_key))
    });
    active.first().map(|s| s.course_key.clone())
}

/// Split a trailing instructor subject id off an independent-study course key
fn split_instructor_suffix(key: &str) -> (&str, Option<&str>) {
    if let Some((base, tail)) = key.rsplit_once('-') {
        if policy::valid_subject_id(tail).is_ok() {
            return (base, Some(tail));
        }
    }
    (key, None)
}

/// Apply the per-record failure policy to a failed lookup
///
/// A vanished section clears the claim and is done; anything else records
/// the failure on the ledger row and keeps the claim, so completing the
/// batch releases and requeues it.
fn lookup_failed(ledger: &mut Ledger, section_key: &str, err: SyncError) -> Result<()> {
    if err.is_not_found() {
        info!(section_key, "section vanished upstream, claim released");
        ledger.release_course_claim(section_key)?;
    } else {
        warn!(section_key, error = %err, "section lookup failed");
        ledger.mark_course_errored(section_key, &err.to_string())?;
    }
    Ok(())
}
