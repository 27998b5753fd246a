//! Batch lifecycle controller
//!
//! Drives one full export pass: claim a batch, build its payload through the
//! per-kind driver, write, submit, and (on a later invocation) poll the
//! downstream import to a terminal outcome.

use tracing::{debug, info, warn};

use rostersync_core::directory::{Downstream, GroupDirectory, ImportStatus, StudentDirectory};
use rostersync_core::model::{Batch, BatchOutcome, Priority, RecordKind};
use rostersync_core::{Collector, Result, SyncConfig};
use rostersync_store::Ledger;

use crate::builders;
use crate::reconciler::GroupReconciler;
use crate::resolver::CourseResolver;

pub struct BatchController<'a> {
    ledger: &'a mut Ledger,
    directory: &'a dyn StudentDirectory,
    groups: &'a dyn GroupDirectory,
    downstream: &'a dyn Downstream,
    config: &'a SyncConfig,
}

impl<'a> BatchController<'a> {
    pub fn new(
        ledger: &'a mut Ledger,
        directory: &'a dyn StudentDirectory,
        groups: &'a dyn GroupDirectory,
        downstream: &'a dyn Downstream,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            ledger,
            directory,
            groups,
            downstream,
            config,
        }
    }

    /// Run one export pass for a kind at a priority tier
    ///
    /// Returns the submitted batch, or None when the queue was empty or the
    /// pass produced no payload. Submission is attempted exactly once; a
    /// failed post stays recorded on the batch for operator attention
    /// rather than blocking the pass.
    pub fn run(&mut self, kind: RecordKind, priority: Priority) -> Result<Option<Batch>> {
        let limit = self.config.limit_for(kind, priority);
        let batch = match self.ledger.claim_batch(kind, priority, limit) {
            Ok(batch) => batch,
            Err(err) if err.is_empty_queue() => {
                debug!(kind = kind.as_str(), priority = priority.label(), "queue empty");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let mut collector = Collector::new();
        self.build(&batch, &mut collector)?;

        match collector.write(&self.config.payload_root, self.config.dir_collision_bound) {
            Ok(Some(path)) => {
                self.ledger.set_batch_payload_path(batch.id, &path)?;
                match self.downstream.submit(&path) {
                    Ok(submission) => {
                        info!(
                            batch_id = batch.id,
                            submission_id = %submission.id,
                            path = %path.display(),
                            "payload submitted"
                        );
                        self.ledger.record_submission(batch.id, &submission)?;
                    }
                    Err(err) => {
                        warn!(batch_id = batch.id, error = %err, "submission failed");
                        self.ledger.record_post_failure(batch.id, &err.to_string())?;
                    }
                }
                self.ledger.get_batch(batch.id)
            }
            Ok(None) => {
                debug!(batch_id = batch.id, "empty payload, batch deleted");
                self.ledger.delete_empty_batch(&batch)?;
                Ok(None)
            }
            Err(err) => {
                self.ledger.record_batch_error(batch.id, &err.to_string())?;
                Err(err)
            }
        }
    }

    fn build(&mut self, batch: &Batch, collector: &mut Collector) -> Result<()> {
        match batch.kind {
            RecordKind::Course => {
                let records = self.ledger.queued_courses(batch.id)?;
                let mut resolver = CourseResolver::new(self.directory, self.config);
                for record in &records {
                    resolver.resolve(self.ledger, collector, record, batch.id)?;
                }
            }
            RecordKind::Group => {
                let course_keys = self.ledger.queued_group_course_keys(batch.id)?;
                let mut reconciler =
                    GroupReconciler::new(self.groups, self.directory, self.downstream, self.config);
                for course_key in &course_keys {
                    reconciler.reconcile(self.ledger, collector, course_key, batch.id)?;
                }
            }
            RecordKind::User => {
                builders::build_users(self.ledger, self.directory, collector, batch.id)?;
            }
            RecordKind::Admin => {
                builders::build_admins(self.ledger, collector, batch.id)?;
            }
            RecordKind::Enrollment => {
                builders::build_enrollments(self.ledger, collector, batch.id)?;
            }
        }
        Ok(())
    }

    /// Poll every submitted batch once, completing those that reached a
    /// terminal downstream state
    ///
    /// Returns how many batches completed. Transient poll failures and
    /// still-running imports leave the batch untouched for the next poll.
    pub fn poll(&mut self) -> Result<usize> {
        let mut terminal = 0;
        for batch in self.ledger.batches_awaiting_status()? {
            let Some(submission_id) = batch.submission_id.clone() else {
                continue;
            };
            let status = match self.downstream.status(&submission_id) {
                Ok(status) => status,
                Err(err) => {
                    warn!(batch_id = batch.id, error = %err, "status poll failed");
                    continue;
                }
            };
            self.ledger.record_poll(batch.id, &status)?;

            if status.is_clean() {
                self.ledger.complete_batch(&batch, BatchOutcome::Clean)?;
                if batch.kind == RecordKind::Enrollment {
                    self.ledger
                        .purge_expired_events(self.config.retention_days)?;
                }
                terminal += 1;
            } else if status.is_imported() {
                self.ledger
                    .complete_batch(&batch, BatchOutcome::Warnings(issue_text(&status)))?;
                terminal += 1;
            } else if status.is_failed() {
                self.ledger
                    .complete_batch(&batch, BatchOutcome::Failed(issue_text(&status)))?;
                terminal += 1;
            } else {
                debug!(
                    batch_id = batch.id,
                    state = %status.state,
                    progress = status.progress,
                    "import still running"
                );
            }
        }
        Ok(terminal)
    }
}

/// Downstream errors and warnings flattened into record error text
fn issue_text(status: &ImportStatus) -> String {
    let mut issues: Vec<&str> = status.errors.iter().map(String::as_str).collect();
    issues.extend(status.warnings.iter().map(String::as_str));
    issues.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_text_orders_errors_first() {
        let status = ImportStatus {
            state: "imported_with_messages".to_string(),
            progress: 100,
            warnings: vec!["row 3: unknown role".to_string()],
            errors: vec!["bad account".to_string()],
        };
        assert_eq!(issue_text(&status), "bad account; row 3: unknown role");
    }
}
