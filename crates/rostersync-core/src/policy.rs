//! Identifier policy
//!
//! Validation rules for the identifiers that cross system boundaries.
//! Violations are `SyncError::PolicyViolation`: skip-and-log, never retried.

use crate::errors::{Result, SyncError};

/// Maximum institutional login length
const MAX_LOGIN_LEN: usize = 32;

/// Subject ids are 32-character uppercase hex strings
const SUBJECT_ID_LEN: usize = 32;

/// Validate an institutional login id
///
/// Lower-case, starts with a letter, then letters/digits/`-`/`_`/`.`,
/// at most 32 characters.
pub fn valid_login_id(login: &str) -> Result<()> {
    let mut chars = login.chars();
    let ok = match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            login.len() <= MAX_LOGIN_LEN
                && chars.all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
                })
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(SyncError::policy(format!("invalid login id: {}", login)))
    }
}

/// Validate a federated external identity (eppn-style: local@domain)
pub fn valid_external_id(login: &str) -> Result<()> {
    let mut parts = login.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None)
            if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') =>
        {
            Ok(())
        }
        _ => Err(SyncError::policy(format!(
            "invalid external id: {}",
            login
        ))),
    }
}

/// Validate a directory subject id
pub fn valid_subject_id(subject_id: &str) -> Result<()> {
    let ok = subject_id.len() == SUBJECT_ID_LEN
        && subject_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c));

    if ok {
        Ok(())
    } else {
        Err(SyncError::policy(format!(
            "invalid subject id: {}",
            subject_id
        )))
    }
}

/// Validate a group key against syntax rules and the disallowed-prefix list
pub fn valid_group_key(group_key: &str, disallowed_prefixes: &[String]) -> Result<()> {
    let syntax_ok = !group_key.is_empty()
        && group_key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));

    if !syntax_ok {
        return Err(SyncError::policy(format!(
            "invalid group key: {}",
            group_key
        )));
    }

    if disallowed_prefixes
        .iter()
        .any(|prefix| group_key.starts_with(prefix.as_str()))
    {
        return Err(SyncError::policy(format!(
            "group not permitted for export: {}",
            group_key
        )));
    }

    Ok(())
}

/// Validate an academic course key: `<year>-<quarter>-<curric>-<number>-<section>`
///
/// Independent-study keys carry a trailing instructor subject id and still
/// validate through the first five segments.
pub fn valid_academic_course_key(course_key: &str) -> Result<()> {
    let parts: Vec<&str> = course_key.split('-').collect();
    let ok = parts.len() >= 5
        && parts[0].len() == 4
        && parts[0].chars().all(|c| c.is_ascii_digit())
        && !parts[1].is_empty()
        && !parts[2].is_empty()
        && parts[3].chars().all(|c| c.is_ascii_digit())
        && !parts[3].is_empty()
        && !parts[4].is_empty();

    if ok {
        Ok(())
    } else {
        Err(SyncError::policy(format!(
            "not an academic course key: {}",
            course_key
        )))
    }
}

/// Validate an ad-hoc course key: `course_<downstream id>`
pub fn valid_adhoc_course_key(course_key: &str) -> Result<()> {
    let ok = course_key
        .strip_prefix("course_")
        .is_some_and(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()));

    if ok {
        Ok(())
    } else {
        Err(SyncError::policy(format!(
            "not an ad-hoc course key: {}",
            course_key
        )))
    }
}

/// Key of the synthetic section holding a course's group-sourced enrollments
pub fn group_section_key(course_key: &str) -> String {
    format!("{}-groups", course_key)
}

/// Display name of the synthetic group section
pub fn group_section_name() -> &'static str {
    "Group members"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_login_ids() {
        assert!(valid_login_id("jdoe").is_ok());
        assert!(valid_login_id("j.doe-2_x").is_ok());
        assert!(valid_login_id("JDoe").is_err());
        assert!(valid_login_id("2doe").is_err());
        assert!(valid_login_id("").is_err());
        assert!(valid_login_id(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_valid_external_ids() {
        assert!(valid_external_id("jdoe@example.edu").is_ok());
        assert!(valid_external_id("jdoe").is_err());
        assert!(valid_external_id("jdoe@").is_err());
        assert!(valid_external_id("@example.edu").is_err());
        assert!(valid_external_id("a@b@c.edu").is_err());
    }

    #[test]
    fn test_valid_subject_ids() {
        assert!(valid_subject_id("9136CCB8F66711D5BE060004AC494FFE").is_ok());
        assert!(valid_subject_id("9136ccb8f66711d5be060004ac494ffe").is_err());
        assert!(valid_subject_id("SHORT").is_err());
    }

    #[test]
    fn test_group_key_policy() {
        let disallowed = vec!["uw_student".to_string()];
        assert!(valid_group_key("u_course_train101", &disallowed).is_ok());
        assert!(valid_group_key("uw_student_all", &disallowed).is_err());
        assert!(valid_group_key("Bad Group", &disallowed).is_err());
        assert!(valid_group_key("", &disallowed).is_err());
    }

    #[test]
    fn test_academic_course_keys() {
        assert!(valid_academic_course_key("2026-spring-TRAIN-101-A").is_ok());
        assert!(valid_academic_course_key(
            "2026-spring-TRAIN-600-A-9136CCB8F66711D5BE060004AC494FFE"
        )
        .is_ok());
        assert!(valid_academic_course_key("course_12345").is_err());
        assert!(valid_academic_course_key("2026-spring-TRAIN").is_err());
    }

    #[test]
    fn test_adhoc_course_keys() {
        assert!(valid_adhoc_course_key("course_12345").is_ok());
        assert!(valid_adhoc_course_key("course_").is_err());
        assert!(valid_adhoc_course_key("2026-spring-TRAIN-101-A").is_err());
    }

    #[test]
    fn test_group_section_key() {
        assert_eq!(
            group_section_key("2026-spring-TRAIN-101-A"),
            "2026-spring-TRAIN-101-A-groups"
        );
    }
}
