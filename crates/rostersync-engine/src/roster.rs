//! User ride-along
//!
//! Every enrollment row is preceded by a person check: identifiers are
//! validated once per pass, and an unprovisioned person gets a user row in
//! the current payload plus a claim on their ledger record, so completing
//! the batch stamps them provisioned alongside the courses they appear in.

use std::collections::HashSet;

use tracing::warn;

use rostersync_core::directory::Person;
use rostersync_core::payload::{Row, UserRow, STATUS_ACTIVE};
use rostersync_core::{policy, Collector, Result};
use rostersync_store::Ledger;

/// Per-pass cache of persons rejected by identifier policy
#[derive(Debug, Default)]
pub struct UserRoster {
    invalid: HashSet<String>,
}

impl UserRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a person and stage their user row if not yet provisioned
    ///
    /// Returns whether the person may appear in enrollment rows. Policy
    /// rejections are logged once per pass and never retried.
    pub fn ensure_user(
        &mut self,
        ledger: &mut Ledger,
        collector: &mut Collector,
        person: &Person,
        batch_id: i64,
    ) -> Result<bool> {
        if self.invalid.contains(&person.subject_id) {
            return Ok(false);
        }
        if let Err(err) = validate(person) {
            warn!(login = %person.login_id, error = %err, "person failed identifier policy");
            self.invalid.insert(person.subject_id.clone());
            return Ok(false);
        }

        let user = ledger.get_or_create_user(person)?;
        if !user.is_provisioned()
            && !user.is_claimed()
            && collector.add(Row::User(UserRow::from_person(person, STATUS_ACTIVE)))
        {
            ledger.claim_user(&person.subject_id, batch_id)?;
        }
        Ok(true)
    }
}

fn validate(person: &Person) -> Result<()> {
    policy::valid_subject_id(&person.subject_id)?;
    if person.login_id.contains('@') {
        policy::valid_external_id(&person.login_id)
    } else {
        policy::valid_login_id(&person.login_id)
    }
}
