//! The compositional validator (spec §4.3): a family of pure functions
//! `(value, path) -> (conformed, errors)`, aggregating every issue found
//! rather than stopping at the first one, each message path-prefixed in the
//! form `` `<dot-joined-path>` <message> (got <inspected-value>)``.
//!
//! In a dynamically-typed host language, `Shape` is what arrives at the
//! door of a `mock(...)` call — the caller could have passed anything.
//! Rust's builders already rule out most of that at compile time, so this
//! module earns its keep on the slices of the API that are still genuinely
//! dynamic: regex patterns supplied as strings (may fail to compile),
//! numeric ranges (`statusCode` bounds), and the few places spec §3
//! describes an "exactly one of" / "first matching branch" shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;

use crate::predicate::Predicate;
use crate::request::CanonicalRequest;
use crate::resolver::FieldValue;

/// The result of a single validating step: either a conformed value, or one
/// or more path-prefixed issues. Never both, never neither.
pub type FieldResult<T> = Result<T, Vec<String>>;

/// A dynamically-shaped raw input, mirroring the handful of primitive kinds
/// every predicate/response field can take (spec §9 "tagged union").
#[derive(Debug, Clone)]
pub enum Shape {
    Absent,
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i64),
    /// An uncompiled regex pattern — compiling it is itself a validation
    /// step, since the pattern may not parse.
    RegexPattern(String),
    /// Marker for "a callable occupied this slot"; what it returns is
    /// validated lazily, at call time, not here (see
    /// [`late_bound`]).
    Callable,
    Object(BTreeMap<String, Shape>),
    Array(Vec<Shape>),
}

fn describe_shape(v: &Shape) -> String {
    match v {
        Shape::Absent => "<absent>".to_string(),
        Shape::Str(s) => format!("{s:?}"),
        Shape::Bytes(b) => format!("<{} bytes>", b.len()),
        Shape::Bool(b) => b.to_string(),
        Shape::Int(i) => i.to_string(),
        Shape::RegexPattern(p) => format!("/{p}/"),
        Shape::Callable => "<callable>".to_string(),
        Shape::Object(_) => "<object>".to_string(),
        Shape::Array(_) => "<array>".to_string(),
    }
}

pub fn join_path(base: &str, field: &str) -> String {
    if base.is_empty() {
        field.to_string()
    } else {
        format!("{base}.{field}")
    }
}

fn issue(path: &str, message: &str, got: &Shape) -> Vec<String> {
    vec![format!("`{path}` {message} (got {})", describe_shape(got))]
}

// ---------------------------------------------------------------------
// Leaf predicates
// ---------------------------------------------------------------------

pub fn is_string(path: &str, v: &Shape) -> FieldResult<String> {
    match v {
        Shape::Str(s) => Ok(s.clone()),
        other => Err(issue(path, "must be a string", other)),
    }
}

pub fn is_bytes(path: &str, v: &Shape) -> FieldResult<Vec<u8>> {
    match v {
        Shape::Bytes(b) => Ok(b.clone()),
        Shape::Str(s) => Ok(s.as_bytes().to_vec()),
        other => Err(issue(path, "must be a byte buffer or string", other)),
    }
}

pub fn is_bool(path: &str, v: &Shape) -> FieldResult<bool> {
    match v {
        Shape::Bool(b) => Ok(*b),
        other => Err(issue(path, "must be a boolean", other)),
    }
}

pub fn is_int(path: &str, v: &Shape) -> FieldResult<i64> {
    match v {
        Shape::Int(i) => Ok(*i),
        other => Err(issue(path, "must be an integer", other)),
    }
}

pub fn is_regex(path: &str, v: &Shape) -> FieldResult<Regex> {
    match v {
        Shape::RegexPattern(pattern) => Regex::new(pattern)
            .map_err(|e| vec![format!("`{path}` is not a valid regular expression: {e}")]),
        other => Err(issue(path, "must be a regular expression", other)),
    }
}

pub fn is_absent(path: &str, v: &Shape) -> FieldResult<()> {
    match v {
        Shape::Absent => Ok(()),
        other => Err(issue(path, "must be absent", other)),
    }
}

// ---------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------

/// `or(p...)`: the first branch that succeeds wins; if none do, every
/// branch's issues are aggregated.
pub fn or<T>(
    path: &str,
    v: &Shape,
    checks: &[&dyn Fn(&str, &Shape) -> FieldResult<T>],
) -> FieldResult<T> {
    let mut all = Vec::new();
    for check in checks {
        match check(path, v) {
            Ok(t) => return Ok(t),
            Err(mut e) => all.append(&mut e),
        }
    }
    Err(all)
}

/// `and(p...)`: every check must succeed; all failures are aggregated.
pub fn and(path: &str, v: &Shape, checks: &[&dyn Fn(&str, &Shape) -> FieldResult<()>]) -> FieldResult<()> {
    let mut all = Vec::new();
    for check in checks {
        if let Err(mut e) = check(path, v) {
            all.append(&mut e);
        }
    }
    if all.is_empty() {
        Ok(())
    } else {
        Err(all)
    }
}

/// `branch(branchPreds, nextPreds, msg)`: pick the first branch whose gate
/// matches `v`, then apply its refinement. If no gate matches, a single
/// `msg`-carrying issue is returned.
pub fn branch<T>(
    path: &str,
    v: &Shape,
    branches: &[(&dyn Fn(&Shape) -> bool, &dyn Fn(&str, &Shape) -> FieldResult<T>)],
    none_msg: &str,
) -> FieldResult<T> {
    for (gate, refine) in branches {
        if gate(v) {
            return refine(path, v);
        }
    }
    Err(issue(path, none_msg, v))
}

/// `exclusive(groupA, groupB)`: no attribute from `a_path` and `b_path` may
/// be present simultaneously.
pub fn exclusive(a_path: &str, a_present: bool, b_path: &str, b_present: bool) -> FieldResult<()> {
    if a_present && b_present {
        Err(vec![format!(
            "`{a_path}` and `{b_path}` are mutually exclusive; exactly one may be set"
        )])
    } else {
        Ok(())
    }
}

/// `alias(p, message)`: replace a failing check's messages with a single
/// human-readable one, keeping the path.
pub fn alias<T>(path: &str, result: FieldResult<T>, message: &str) -> FieldResult<T> {
    result.map_err(|_| vec![format!("`{path}` {message}")])
}

/// Aggregate a batch of independent field results into one `Result`,
/// collecting every issue found across all of them (spec §4.3
/// "Aggregation concatenates errors across fields").
pub fn aggregate(results: Vec<Vec<String>>) -> Result<(), Vec<String>> {
    let errors: Vec<String> = results.into_iter().flatten().collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------
// Predicate-leaf conformance: Shape -> Predicate
// ---------------------------------------------------------------------

/// Conform a raw leaf `Shape` into a matcher [`Predicate`] (method,
/// pathname, query, a single header value, or a body leaf). Callables are
/// represented upstream by the builder directly as `Predicate::Callable`
/// and never reach this function as a `Shape` (see §9's static-typing
/// note) — `Shape::Callable` only appears when validating a response
/// descriptor slot, not a predicate slot.
///
/// A scalar leaf may be a string, a byte buffer, or a regular expression
/// (spec §3); `or` tries each refinement in turn and, if every one fails,
/// aggregates all three sets of issues (spec §4.3 "or(p...)").
pub fn conform_predicate_leaf(path: &str, v: &Shape) -> FieldResult<Predicate> {
    match v {
        Shape::Absent => Ok(Predicate::Absent),
        Shape::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match conform_predicate_leaf(&join_path(path, &i.to_string()), item) {
                    Ok(p) => out.push(p),
                    Err(mut e) => errors.append(&mut e),
                }
            }
            if errors.is_empty() {
                Ok(Predicate::Seq(out))
            } else {
                Err(errors)
            }
        }
        _ => or(
            path,
            v,
            &[
                &(|p: &str, v: &Shape| is_string(p, v).map(Predicate::Str))
                    as &dyn Fn(&str, &Shape) -> FieldResult<Predicate>,
                &(|p: &str, v: &Shape| is_bytes(p, v).map(Predicate::Bytes))
                    as &dyn Fn(&str, &Shape) -> FieldResult<Predicate>,
                &(|p: &str, v: &Shape| is_regex(p, v).map(Predicate::Regex))
                    as &dyn Fn(&str, &Shape) -> FieldResult<Predicate>,
            ],
        ),
    }
}

/// Classify a raw pattern string the way a caller who just has `&str` in
/// hand (no pre-compiled [`Regex`]) would expect: a `/pattern/`-delimited
/// string compiles as a regular expression, anything else is a literal.
/// This is the one predicate slot where a single Rust parameter is still
/// genuinely polymorphic the way spec §3 describes (string or regular
/// expression), so it is conformed dynamically via [`conform_pattern`]
/// rather than split across separate typed builder methods.
pub(crate) fn classify_pattern(raw: &str) -> Shape {
    if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
        Shape::RegexPattern(raw[1..raw.len() - 1].to_string())
    } else {
        Shape::Str(raw.to_string())
    }
}

/// Conform a raw pattern string into a [`Predicate`]: `and` first rejects
/// the empty-regex footgun (`//` silently matches everything), then
/// `branch` picks the regex-or-literal refinement by gate, with `alias`
/// turning a raw regex-compiler error into a message that names the field
/// (spec §4.3 "and(p...)", "branch(...)", "alias(p, message)").
pub fn conform_pattern(path: &str, raw: &str) -> FieldResult<Predicate> {
    let shape = classify_pattern(raw);

    and(
        path,
        &shape,
        &[&(|p: &str, v: &Shape| match v {
            Shape::RegexPattern(pattern) if pattern.is_empty() => Err(vec![format!(
                "`{p}` a `/.../ ` pattern must not be empty (an empty pattern matches everything)"
            )]),
            _ => Ok(()),
        }) as &dyn Fn(&str, &Shape) -> FieldResult<()>],
    )?;

    branch(
        path,
        &shape,
        &[
            (
                &|v: &Shape| matches!(v, Shape::RegexPattern(_)),
                &(|p: &str, v: &Shape| {
                    alias(p, is_regex(p, v), "must be a valid `/.../ ` regular expression")
                        .map(Predicate::Regex)
                }) as &dyn Fn(&str, &Shape) -> FieldResult<Predicate>,
            ),
            (
                &|v: &Shape| matches!(v, Shape::Str(_)),
                &(|p: &str, v: &Shape| is_string(p, v).map(Predicate::Str))
                    as &dyn Fn(&str, &Shape) -> FieldResult<Predicate>,
            ),
        ],
        "must be a string or a `/.../ ` regular expression",
    )
}

/// `statusCode` must fall within the valid HTTP range — declaration-time
/// when given as a literal.
pub fn validate_status_code(path: &str, code: i64) -> FieldResult<i64> {
    if (100..=599).contains(&code) {
        Ok(code)
    } else {
        Err(vec![format!(
            "`{path}` must be between 100 and 599 (got {code})"
        )])
    }
}

/// A delay, in milliseconds, must be non-negative.
pub fn validate_delay_ms(path: &str, ms: i64) -> FieldResult<i64> {
    if ms >= 0 {
        Ok(ms)
    } else {
        Err(vec![format!("`{path}` must not be negative (got {ms}ms)")])
    }
}

/// Late-bind validation onto a callable `statusCode` field: at *declaration*
/// time we cannot know what the callable will return, so we wrap it to
/// re-validate its result at *call* time. A failing call-time result is a
/// user-callable fault (spec §7.2), not a declaration-time error — it is
/// logged on the general diagnostics channel with a path ending in `()` to
/// identify the callsite, and a safe default is substituted, exactly like
/// every other resolver coercion.
pub fn late_bound_status_code(
    path: String,
    f: Arc<dyn Fn(&CanonicalRequest, &[u8]) -> i64 + Send + Sync>,
) -> FieldValue<i64> {
    FieldValue::callable(move |req, body| {
        let value = f(req, body);
        match validate_status_code(&format!("{path}()"), value) {
            Ok(v) => v,
            Err(errors) => {
                for e in &errors {
                    crate::diag::server_warn!("{e}");
                }
                200
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Headers;

    fn req() -> CanonicalRequest {
        CanonicalRequest {
            method: "GET".to_string(),
            pathname: "/".to_string(),
            query: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            http_version: (1, 1),
            raw_target: "/".to_string(),
        }
    }

    #[test]
    fn status_code_bounds() {
        assert!(validate_status_code("p", 200).is_ok());
        assert!(validate_status_code("p", 99).is_err());
        assert!(validate_status_code("p", 600).is_err());
    }

    #[test]
    fn delay_must_be_non_negative() {
        assert!(validate_delay_ms("p", 0).is_ok());
        assert!(validate_delay_ms("p", -1).is_err());
    }

    #[test]
    fn exclusive_rejects_both_present() {
        assert!(exclusive("a", true, "b", false).is_ok());
        assert!(exclusive("a", false, "b", true).is_ok());
        assert!(exclusive("a", false, "b", false).is_ok());
        assert!(exclusive("a", true, "b", true).is_err());
    }

    #[test]
    fn aggregate_concatenates_every_field_error() {
        let result = aggregate(vec![
            vec!["err1".to_string()],
            vec![],
            vec!["err2".to_string(), "err3".to_string()],
        ]);
        assert_eq!(result.unwrap_err(), vec!["err1", "err2", "err3"]);
    }

    #[test]
    fn conform_predicate_leaf_recurses_into_arrays() {
        let shape = Shape::Array(vec![Shape::Str("a".to_string()), Shape::Str("b".to_string())]);
        let predicate = conform_predicate_leaf("path", &shape).unwrap();
        assert!(matches!(predicate, Predicate::Seq(items) if items.len() == 2));
    }

    #[test]
    fn error_message_is_path_prefixed_with_inspected_value() {
        let err = is_string("options.req.method", &Shape::Int(5)).unwrap_err();
        assert_eq!(err, vec!["`options.req.method` must be a string (got 5)"]);
    }

    #[test]
    fn late_bound_status_code_revalidates_at_call_time() {
        let field = late_bound_status_code(
            "options.res.statusCode".to_string(),
            Arc::new(|_req: &CanonicalRequest, _body: &[u8]| 9000),
        );
        // Out-of-range call-time result falls back to the resolver default
        // rather than panicking or propagating a declaration-time error.
        assert_eq!(crate::resolver::to_int(&field, &req(), b"", 200), 200);
    }

    #[test]
    fn conform_predicate_leaf_rejects_unsupported_shapes_with_every_branchs_issue() {
        let err = conform_predicate_leaf("options.req.body", &Shape::Bool(true)).unwrap_err();
        assert_eq!(err.len(), 3, "or() aggregates all three branches' issues: {err:?}");
    }

    #[test]
    fn conform_pattern_compiles_slash_delimited_strings_as_regex() {
        let predicate = conform_pattern("options.req.pathname", "/^bloop$/").unwrap();
        assert!(matches!(predicate, Predicate::Regex(_)));
    }

    #[test]
    fn conform_pattern_treats_plain_strings_as_literals() {
        let predicate = conform_pattern("options.req.pathname", "/bloop").unwrap();
        assert!(matches!(predicate, Predicate::Str(s) if s == "/bloop"));
    }

    #[test]
    fn conform_pattern_rejects_empty_regex_as_a_likely_mistake() {
        let err = conform_pattern("options.req.pathname", "//").unwrap_err();
        assert!(err[0].contains("must not be empty"));
    }

    #[test]
    fn conform_pattern_gives_a_friendly_message_for_bad_regex_syntax() {
        let err = conform_pattern("options.req.pathname", "/(unterminated/").unwrap_err();
        assert_eq!(
            err,
            vec!["`options.req.pathname` must be a valid `/.../ ` regular expression".to_string()]
        );
    }
}
