//! Scope grants and the name-matching rules shared by the store and the
//! authentication query. Scope names match by exact string equality.

use crate::expiry;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

impl Grant {
    /// Expirations are stored with whole-second precision; sub-seconds are
    /// dropped here so a grant reads back exactly as it was written.
    pub fn new(scope: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            scope: scope.into(),
            expires_at: expires_at.trunc_subsecs(0),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        expiry::is_valid(self.expires_at, now)
    }
}

/// Collapse a list of scope names into a set.
pub fn scope_set<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().map(|s| s.as_ref().to_string()).collect()
}

/// Keep one grant per scope name. When a name repeats, the last occurrence
/// wins and takes the position of that last occurrence.
pub fn dedupe_grants(grants: &[Grant]) -> Vec<Grant> {
    let mut seen = HashSet::new();
    let mut out: Vec<Grant> = grants
        .iter()
        .rev()
        .filter(|g| seen.insert(g.scope.as_str()))
        .cloned()
        .collect();
    out.reverse();
    out
}

pub fn find_grant<'a>(grants: &'a [Grant], scope: &str) -> Option<&'a Grant> {
    grants.iter().find(|g| g.scope == scope)
}

/// All-of matching: every name needs a grant, and when `valid_at` is given,
/// that grant must still be valid at that instant.
pub fn holds_all(grants: &[Grant], names: &BTreeSet<String>, valid_at: Option<DateTime<Utc>>) -> bool {
    names.iter().all(|name| {
        grants
            .iter()
            .filter(|g| &g.scope == name)
            .any(|g| valid_at.map_or(true, |now| g.is_valid_at(now)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn grant(scope: &str, offset_secs: i64) -> Grant {
        Grant::new(scope, Utc::now() + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_new_drops_subseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 490_271_185).unwrap();
        let grant = Grant::new("door-lock", at);
        assert_eq!(grant.expires_at.timestamp(), 1_700_000_000);
        assert_eq!(grant.expires_at.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_scope_set_deduplicates() {
        let set = scope_set(["door-lock", "vending", "door-lock"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("door-lock"));
    }

    #[test]
    fn test_dedupe_grants_last_wins() {
        let first = grant("a", 60);
        let other = grant("b", 60);
        let last = grant("a", 3600);
        let out = dedupe_grants(&[first, other.clone(), last.clone()]);
        assert_eq!(out, vec![other, last]);
    }

    #[test]
    fn test_find_grant_exact_match() {
        let grants = vec![grant("door-lock", 60)];
        assert!(find_grant(&grants, "door-lock").is_some());
        assert!(find_grant(&grants, "door").is_none());
        assert!(find_grant(&grants, "Door-Lock").is_none());
    }

    #[test]
    fn test_holds_all_requires_every_name() {
        let grants = vec![grant("door-lock", 60)];
        let now = Some(Utc::now());
        assert!(holds_all(&grants, &scope_set(["door-lock"]), now));
        assert!(!holds_all(
            &grants,
            &scope_set(["door-lock", "vending"]),
            now
        ));
    }

    #[test]
    fn test_holds_all_expiry_check_is_optional() {
        let grants = vec![grant("door-lock", -60)];
        let names = scope_set(["door-lock"]);
        assert!(!holds_all(&grants, &names, Some(Utc::now())));
        assert!(holds_all(&grants, &names, None));
    }

    #[test]
    fn test_holds_all_empty_set_is_vacuous() {
        assert!(holds_all(&[], &BTreeSet::new(), Some(Utc::now())));
    }
}
