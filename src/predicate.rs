//! The comparator: "does `desired` describe `actual`?" (spec §4.1).
//!
//! `Predicate` is the tagged union the validator produces and the matchers
//! consume; `Actual` is the parsed-request-shaped value it's compared
//! against. Both are recursive so that a single `compare` function handles
//! leaves (method, pathname, a header value) and structured bodies (JSON)
//! alike, per the spec's design note: "Model this in a statically typed
//! implementation as a tagged union... The comparator and resolver branch on
//! the tag."

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use regex::Regex;

use crate::diag::matcher_trace;

/// A value actually observed on the wire (or decoded from JSON), compared
/// against a [`Predicate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Actual {
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Number(f64),
    Map(BTreeMap<String, Actual>),
    Seq(Vec<Actual>),
    Null,
    /// Sentinel used when recursing into a map/sequence whose key or index
    /// the actual value doesn't have — distinct from `Null`, which is an
    /// explicit JSON null.
    Missing,
}

impl Actual {
    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Actual::Null,
            serde_json::Value::Bool(b) => Actual::Bool(b),
            serde_json::Value::Number(n) => Actual::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Actual::Str(s),
            serde_json::Value::Array(items) => {
                Actual::Seq(items.into_iter().map(Actual::from_json).collect())
            }
            serde_json::Value::Object(map) => Actual::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Actual::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn as_utf8(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Actual::Str(s) => Some(std::borrow::Cow::Borrowed(s)),
            Actual::Bytes(b) => std::str::from_utf8(b).ok().map(std::borrow::Cow::Borrowed),
            _ => None,
        }
    }
}

impl From<&str> for Actual {
    fn from(s: &str) -> Self {
        Actual::Str(s.to_owned())
    }
}

impl From<String> for Actual {
    fn from(s: String) -> Self {
        Actual::Str(s)
    }
}

impl From<Vec<u8>> for Actual {
    fn from(b: Vec<u8>) -> Self {
        Actual::Bytes(b)
    }
}

impl From<&[u8]> for Actual {
    fn from(b: &[u8]) -> Self {
        Actual::Bytes(b.to_vec())
    }
}

/// A boxed, fault-swallowing predicate callable: `(actual) -> bool`.
pub type PredicateFn = Arc<dyn Fn(&Actual) -> bool + Send + Sync>;

/// The polymorphic shape every matchable field can take (spec §3 "Request
/// predicate (HTTP)", §9 "Polymorphic predicates and descriptors").
#[derive(Clone)]
pub enum Predicate {
    /// Absence: matches anything (the wildcard case).
    Absent,
    Str(String),
    Bytes(Vec<u8>),
    Regex(Regex),
    Callable(PredicateFn),
    Map(BTreeMap<String, Predicate>),
    Seq(Vec<Predicate>),
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::Absent
    }
}

impl Predicate {
    pub fn str(s: impl Into<String>) -> Self {
        Predicate::Str(s.into())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Predicate::Bytes(b.into())
    }

    pub fn regex(re: Regex) -> Self {
        Predicate::Regex(re)
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&Actual) -> bool + Send + Sync + 'static,
    {
        Predicate::Callable(Arc::new(f))
    }

    /// Build a structural predicate tree from a JSON value, for body/JSON
    /// matching (spec §8 scenario 2, `jsonMatch(...)`).
    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Predicate::Absent,
            serde_json::Value::Bool(b) => Predicate::Str(b.to_string()),
            serde_json::Value::Number(n) => Predicate::Str(n.to_string()),
            serde_json::Value::String(s) => Predicate::Str(s),
            serde_json::Value::Array(items) => {
                Predicate::Seq(items.into_iter().map(Predicate::from_json).collect())
            }
            serde_json::Value::Object(map) => Predicate::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Predicate::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Predicate::Absent)
    }
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Absent => write!(f, "Absent"),
            Predicate::Str(s) => write!(f, "Str({s:?})"),
            Predicate::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Predicate::Regex(re) => write!(f, "Regex({re})"),
            Predicate::Callable(_) => write!(f, "Callable(..)"),
            Predicate::Map(m) => f.debug_map().entries(m.iter()).finish(),
            Predicate::Seq(s) => f.debug_list().entries(s.iter()).finish(),
        }
    }
}

/// For JSON structural matching, a JSON value that is itself a string/number
/// should still compare equal against an equivalent JSON-derived `Actual`.
/// This helper normalizes the "both strings" fallback used when comparing
/// the stringly-typed leaves `from_json` produces above (booleans/numbers
/// become their canonical string form) against an `Actual::Bool`/`Number`.
fn leaf_eq_actual_scalar(desired: &str, actual: &Actual) -> bool {
    match actual {
        Actual::Bool(b) => desired == b.to_string(),
        Actual::Number(n) => {
            desired == serde_json::Number::from_f64(*n).map(|n| n.to_string()).as_deref().unwrap_or_default()
                || desired.parse::<f64>().map(|d| d == *n).unwrap_or(false)
        }
        Actual::Null => desired == "null",
        _ => false,
    }
}

/// The pure, total comparator. Never panics outward: a panicking callable
/// predicate is caught and treated as a non-match (spec §4.1 rule 2, §7 "user
/// callable faults").
pub fn compare(desired: &Predicate, actual: &Actual) -> bool {
    match desired {
        Predicate::Absent => true,
        Predicate::Callable(f) => {
            let f = f.clone();
            let actual = actual.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| f(&actual))) {
                Ok(result) => result,
                Err(_) => {
                    matcher_trace!("predicate callable panicked; treating as non-match");
                    false
                }
            }
        }
        Predicate::Map(desired_map) => match actual {
            Actual::Map(actual_map) => desired_map.iter().all(|(k, dv)| {
                let av = actual_map.get(k).unwrap_or(&Actual::Missing);
                compare(dv, av)
            }),
            _ => desired_map
                .iter()
                .all(|(_, dv)| compare(dv, &Actual::Missing)),
        },
        Predicate::Seq(desired_seq) => match actual {
            Actual::Seq(actual_seq) => desired_seq.iter().enumerate().all(|(i, dv)| {
                let av = actual_seq.get(i).unwrap_or(&Actual::Missing);
                compare(dv, av)
            }),
            _ => desired_seq
                .iter()
                .all(|dv| compare(dv, &Actual::Missing)),
        },
        Predicate::Bytes(desired_bytes) => match actual {
            Actual::Bytes(actual_bytes) => desired_bytes == actual_bytes,
            Actual::Str(s) => desired_bytes.as_slice() == s.as_bytes(),
            _ => false,
        },
        Predicate::Str(desired_str) => match actual {
            Actual::Str(s) => desired_str == s,
            Actual::Bytes(b) => std::str::from_utf8(b)
                .map(|s| s == desired_str)
                .unwrap_or(false),
            other => leaf_eq_actual_scalar(desired_str, other),
        },
        Predicate::Regex(re) => match actual.as_utf8() {
            Some(text) => re.is_match(&text),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_matches_anything() {
        assert!(compare(&Predicate::Absent, &Actual::Missing));
        assert!(compare(&Predicate::Absent, &Actual::Str("x".into())));
    }

    #[test]
    fn string_vs_bytes_compares_by_utf8() {
        assert!(compare(&Predicate::str("bloop"), &Actual::Bytes(b"bloop".to_vec())));
        assert!(!compare(&Predicate::str("bloop"), &Actual::Bytes(b"nope".to_vec())));
    }

    #[test]
    fn bytes_are_exact() {
        assert!(compare(&Predicate::bytes(b"abcd".to_vec()), &Actual::Bytes(b"abcd".to_vec())));
        assert!(!compare(&Predicate::bytes(b"abcd".to_vec()), &Actual::Bytes(b"abce".to_vec())));
    }

    #[test]
    fn regex_matches_against_utf8() {
        let re = Regex::new("^b.+p$").unwrap();
        assert!(compare(&Predicate::regex(re.clone()), &Actual::Str("bloop".into())));
        assert!(!compare(&Predicate::regex(re), &Actual::Str("nope".into())));
    }

    #[test]
    fn map_recurses_and_ignores_extra_actual_keys() {
        let mut desired = BTreeMap::new();
        desired.insert("a".to_string(), Predicate::str("1"));
        let mut actual = BTreeMap::new();
        actual.insert("a".to_string(), Actual::Str("1".into()));
        actual.insert("b".to_string(), Actual::Str("ignored".into()));
        assert!(compare(&Predicate::Map(desired), &Actual::Map(actual)));
    }

    #[test]
    fn map_missing_key_is_treated_as_missing() {
        let mut desired = BTreeMap::new();
        desired.insert("a".to_string(), Predicate::str("1"));
        let actual = BTreeMap::new();
        assert!(!compare(&Predicate::Map(desired), &Actual::Map(actual)));
    }

    #[test]
    fn seq_desired_may_be_a_prefix() {
        let desired = Predicate::Seq(vec![Predicate::str("c"), Predicate::str("2")]);
        let actual = Actual::Seq(vec![
            Actual::Str("c".into()),
            Actual::Str("2".into()),
            Actual::Str("trailing".into()),
        ]);
        assert!(compare(&desired, &actual));
    }

    #[test]
    fn callable_panic_is_swallowed_as_non_match() {
        let desired = Predicate::callable(|_: &Actual| -> bool { panic!("boom") });
        let prev = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let result = compare(&desired, &Actual::Str("x".into()));
        panic::set_hook(prev);
        assert!(!result);
    }

    #[test]
    fn compare_is_pure_and_idempotent() {
        let desired = Predicate::str("bloop");
        let actual = Actual::Str("bloop".into());
        assert_eq!(compare(&desired, &actual), compare(&desired, &actual));
    }
}
