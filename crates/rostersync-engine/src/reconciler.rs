//! Group membership reconciler
//!
//! Computes the set difference between the cached downstream membership of a
//! course's synthetic group section and the flattened external group
//! membership, emitting the enrollment changes that bring the two in line.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use rostersync_core::directory::{
    DirectoryMember, DirectoryMemberKind, Downstream, GroupDirectory, Person, StudentDirectory,
};
use rostersync_core::model::{LoginKind, SectionMemberRecord};
use rostersync_core::payload::{EnrollmentRow, Row, SectionRow, STATUS_ACTIVE, STATUS_DELETED};
use rostersync_core::{policy, Collector, Result, SyncConfig};
use rostersync_store::Ledger;

use crate::roster::UserRoster;

/// Reconciles group-sourced enrollment for the courses of one batch pass
///
/// Direct membership lookups are cached per pass keyed by (group, acting
/// identity), so a group referenced by several courses is fetched once.
pub struct GroupReconciler<'a> {
    groups: &'a dyn GroupDirectory,
    directory: &'a dyn StudentDirectory,
    downstream: &'a dyn Downstream,
    config: &'a SyncConfig,
    member_cache: HashMap<(String, String), Vec<DirectoryMember>>,
    roster: UserRoster,
}

impl<'a> GroupReconciler<'a> {
    pub fn new(
        groups: &'a dyn GroupDirectory,
        directory: &'a dyn StudentDirectory,
        downstream: &'a dyn Downstream,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            groups,
            directory,
            downstream,
            config,
            member_cache: HashMap::new(),
            roster: UserRoster::new(),
        }
    }

    /// Diff one course's group membership into the collector
    ///
    /// Per-group and per-member failures are absorbed per the failure
    /// policy; a transient directory failure requeues the whole course and
    /// emits nothing for it this pass.
    pub fn reconcile(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        course_key: &str,
        batch_id: i64,
    ) -> Result<()> {
        let bindings = ledger.active_groups_by_course(course_key)?;

        let academic_logins = match self.academic_logins(course_key) {
            Ok(logins) => logins,
            Err(err) if err.is_not_found() => {
                info!(course_key, "course gone downstream, group sync suspended");
                ledger.deprioritize_group_course(course_key)?;
                return Ok(());
            }
            Err(err) if err.is_transient() => {
                warn!(course_key, error = %err, "enrollment lookup failed, course requeued");
                ledger.dequeue_group_course(course_key)?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        // Flatten every binding into the desired membership set
        let mut desired: Vec<SectionMemberRecord> = Vec::new();
        for binding in &bindings {
            if let Err(err) = policy::valid_group_key(
                &binding.group_key,
                &self.config.disallowed_group_prefixes,
            ) {
                warn!(group_key = %binding.group_key, error = %err, "group skipped by policy");
                continue;
            }

            let mut seen_groups = HashSet::new();
            let mut nested = Vec::new();
            let members = match self.flatten(
                &binding.group_key,
                &binding.added_by,
                &mut seen_groups,
                &mut nested,
            ) {
                Ok(members) => members,
                Err(err) if err.is_not_found() => {
                    info!(group_key = %binding.group_key, "group gone from directory, tombstoned");
                    ledger.tombstone_group_not_found(&binding.group_key)?;
                    continue;
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        course_key,
                        group_key = %binding.group_key,
                        error = %err,
                        "group lookup failed, course requeued"
                    );
                    ledger.dequeue_group_course(course_key)?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(group_key = %binding.group_key, error = %err, "group skipped");
                    continue;
                }
            };
            ledger.reconcile_member_groups(&binding.group_key, &nested)?;

            for (login, kind) in members {
                let login = login.to_lowercase();
                if academic_logins.contains(&login) {
                    debug!(course_key, login = %login, "member enrolled academically, skipped");
                    continue;
                }
                desired.push(SectionMemberRecord::current(
                    course_key,
                    login,
                    kind,
                    binding.role.to_lowercase(),
                ));
            }
        }

        // One entry per member identity; bindings can overlap
        let mut seen = HashSet::new();
        desired.retain(|m| seen.insert((m.login.clone(), m.login_kind, m.role.clone())));

        let current: Vec<SectionMemberRecord> = ledger
            .section_members(course_key)?
            .into_iter()
            .filter(|m| !m.is_deleted)
            .collect();

        let to_add: Vec<&SectionMemberRecord> = desired
            .iter()
            .filter(|d| !current.iter().any(|c| c.same_member(d)))
            .collect();
        let to_remove: Vec<&SectionMemberRecord> = current
            .iter()
            .filter(|c| !desired.iter().any(|d| d.same_member(c)))
            .collect();

        if bindings.is_empty() && to_remove.is_empty() {
            return Ok(());
        }

        // Resolve everyone before mutating anything, so a transient
        // directory failure requeues the course without a half-applied diff
        let mut additions: Vec<(&SectionMemberRecord, Person)> = Vec::new();
        for member in &to_add {
            match self.resolve_member(member) {
                Ok(person) => additions.push((*member, person)),
                Err(err) if err.is_transient() => {
                    warn!(course_key, login = %member.login, error = %err,
                          "member lookup failed, course requeued");
                    ledger.dequeue_group_course(course_key)?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(course_key, login = %member.login, error = %err, "member skipped");
                }
            }
        }
        let mut removals: Vec<(&SectionMemberRecord, Option<Person>)> = Vec::new();
        for member in &to_remove {
            match self.resolve_member(member) {
                Ok(person) => removals.push((*member, Some(person))),
                Err(err) if err.is_transient() => {
                    warn!(course_key, login = %member.login, error = %err,
                          "member lookup failed, course requeued");
                    ledger.dequeue_group_course(course_key)?;
                    return Ok(());
                }
                Err(err) => {
                    // The cache row still tombstones; there is no person
                    // left to emit a deletion for
                    warn!(course_key, login = %member.login, error = %err,
                          "removal without a directory record");
                    removals.push((*member, None));
                }
            }
        }

        let section_key = policy::group_section_key(course_key);
        collector.add(Row::Section(SectionRow::new(
            &section_key,
            course_key,
            policy::group_section_name(),
            STATUS_ACTIVE,
        )));

        for (member, person) in &additions {
            if self.roster.ensure_user(ledger, collector, person, batch_id)? {
                collector.add(Row::Enrollment(EnrollmentRow::for_member(
                    &section_key,
                    person,
                    &member.role,
                    STATUS_ACTIVE,
                )?));
                ledger.activate_section_member(member)?;
            }
        }
        for (member, person) in &removals {
            if let Some(person) = person {
                collector.add(Row::Enrollment(EnrollmentRow::for_member(
                    &section_key,
                    person,
                    &member.role,
                    STATUS_DELETED,
                )?));
            }
            ledger.tombstone_section_member(member)?;
        }

        info!(
            course_key,
            added = additions.len(),
            removed = removals.len(),
            "group membership reconciled"
        );
        Ok(())
    }

    /// Flatten a group's effective membership, recursing through nested
    /// groups
    ///
    /// `seen` guards against cyclic group graphs: a revisited group is
    /// skipped with a warning instead of recursing forever. Nested group
    /// keys encountered anywhere below the root accumulate into `nested`.
    fn flatten(
        &mut self,
        group_key: &str,
        act_as: &str,
        seen: &mut HashSet<String>,
        nested: &mut Vec<String>,
    ) -> Result<Vec<(String, LoginKind)>> {
        if !seen.insert(group_key.to_string()) {
            warn!(group_key, "group membership cycle, repeated group skipped");
            return Ok(Vec::new());
        }

        let members = self.members(group_key, act_as)?;
        let mut flattened = Vec::new();
        for member in members {
            match member.kind {
                DirectoryMemberKind::Login => flattened.push((member.name, LoginKind::Login)),
                DirectoryMemberKind::External => {
                    flattened.push((member.name, LoginKind::External));
                }
                DirectoryMemberKind::Group => {
                    nested.push(member.name.clone());
                    match self.flatten(&member.name, act_as, seen, nested) {
                        Ok(sub) => flattened.extend(sub),
                        // A nested group that vanished is a skip, not a
                        // failure of the whole root
                        Err(err) if err.is_not_found() => {
                            warn!(group_key = %member.name, "nested group not found, skipped");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Ok(flattened)
    }

    fn members(&mut self, group_key: &str, act_as: &str) -> Result<Vec<DirectoryMember>> {
        let cache_key = (group_key.to_string(), act_as.to_string());
        if let Some(members) = self.member_cache.get(&cache_key) {
            return Ok(members.clone());
        }
        let members = self.groups.members(group_key, Some(act_as))?;
        self.member_cache.insert(cache_key, members.clone());
        Ok(members)
    }

    fn resolve_member(&self, member: &SectionMemberRecord) -> Result<Person> {
        match member.login_kind {
            LoginKind::Login => self.directory.person_by_login(&member.login),
            LoginKind::External => self.directory.person_by_external(&member.login),
        }
    }

    /// Logins already enrolled through an academic section of the course
    fn academic_logins(&self, course_key: &str) -> Result<HashSet<String>> {
        let group_section = policy::group_section_key(course_key);
        Ok(self
            .downstream
            .section_enrollments(course_key)?
            .into_iter()
            .filter(|e| e.section_key != group_section)
            .map(|e| e.login.to_lowercase())
            .collect())
    }
}
