//! Header matching edge cases and the "does this request satisfy this
//! mock's predicate" decision (spec §4.4 "Header matching edge cases").

use crate::mock::{HttpFieldPredicates, HttpRequestPredicate};
use crate::predicate::{compare, Actual, Predicate};
use crate::request::{CanonicalRequest, HeaderValue};

/// A repeated-header predicate is a sequence; unlike the generic comparator's
/// sequence rule (where `desired` may be a prefix), a repeated header's
/// predicate must match the *exact* number of occurrences (spec §8 Boundary
/// behaviors: "A repeated-header predicate fails if the number of
/// occurrences differs").
fn header_matches(desired: &Predicate, actual: Option<&HeaderValue>) -> bool {
    match desired {
        Predicate::Absent => true,
        Predicate::Seq(items) => {
            let values = actual.map(HeaderValue::values).unwrap_or_default();
            if items.len() != values.len() {
                return false;
            }
            items
                .iter()
                .zip(values.iter())
                .all(|(item, v)| compare(item, &Actual::Str((*v).to_string())))
        }
        other => {
            let value = match actual {
                Some(HeaderValue::Single(v)) => Actual::Str(v.clone()),
                Some(HeaderValue::Repeated(vs)) if vs.len() == 1 => Actual::Str(vs[0].clone()),
                Some(HeaderValue::Repeated(_)) => Actual::Missing,
                None => Actual::Missing,
            };
            compare(other, &value)
        }
    }
}

/// The body may be matched structurally (predicates built by `from_json`
/// are `Map`/`Seq`, spec §8 scenario 2) or as raw bytes/string. Try a JSON
/// parse only when the predicate shape calls for it.
fn body_actual(desired: &Predicate, raw: &[u8]) -> Actual {
    match desired {
        Predicate::Map(_) | Predicate::Seq(_) => match serde_json::from_slice(raw) {
            Ok(v) => Actual::from_json(v),
            Err(_) => Actual::Bytes(raw.to_vec()),
        },
        _ => Actual::Bytes(raw.to_vec()),
    }
}

fn fields_satisfy(p: &HttpFieldPredicates, req: &CanonicalRequest) -> bool {
    compare(&p.method, &Actual::Str(req.method.clone()))
        && compare(&p.pathname, &Actual::Str(req.pathname.clone()))
        && compare(&p.query, &Actual::Str(req.query.clone()))
        && p.headers
            .iter()
            .all(|(name, pred)| header_matches(pred, req.headers.get(name)))
        && compare(&p.body, &body_actual(&p.body, &req.body))
}

/// Does `req` satisfy this mock's request predicate (spec §4.4 step 3)?
pub fn request_satisfies(predicate: &HttpRequestPredicate, req: &CanonicalRequest) -> bool {
    match predicate {
        HttpRequestPredicate::Whole(f) => {
            let f = f.clone();
            let req = req.clone();
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&req))) {
                Ok(result) => result,
                Err(_) => {
                    crate::diag::matcher_trace!(
                        "whole-request predicate callable panicked; treating as non-match"
                    );
                    false
                }
            }
        }
        HttpRequestPredicate::Fields(p) => fields_satisfy(p, req),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Headers;

    fn req(method: &str, pathname: &str) -> CanonicalRequest {
        CanonicalRequest {
            method: method.to_string(),
            pathname: pathname.to_string(),
            query: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            http_version: (1, 1),
            raw_target: pathname.to_string(),
        }
    }

    #[test]
    fn repeated_header_requires_exact_count() {
        let mut headers = Headers::new();
        headers.push("X-Tag".to_string(), "a".to_string());
        headers.push("X-Tag".to_string(), "b".to_string());
        let mut r = req("GET", "/");
        r.headers = headers;

        let desired = Predicate::Seq(vec![Predicate::str("a"), Predicate::str("b")]);
        assert!(header_matches(&desired, r.headers.get("X-Tag")));

        let too_few = Predicate::Seq(vec![Predicate::str("a")]);
        assert!(!header_matches(&too_few, r.headers.get("X-Tag")));
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let mut headers = Headers::new();
        headers.push("X-Bloop".to_string(), "true".to_string());
        let mut r = req("GET", "/");
        r.headers = headers;

        let mut p = HttpFieldPredicates::default();
        p.headers
            .insert("x-bloop".to_string(), Predicate::str("true"));
        assert!(!fields_satisfy(&p, &r));

        let mut p2 = HttpFieldPredicates::default();
        p2.headers
            .insert("X-Bloop".to_string(), Predicate::str("true"));
        assert!(fields_satisfy(&p2, &r));
    }

    #[test]
    fn absent_field_matches_anything() {
        let r = req("POST", "/bloop");
        let p = HttpFieldPredicates::default();
        assert!(fields_satisfy(&p, &r));
    }
}
