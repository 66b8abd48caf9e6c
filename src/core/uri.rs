use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // scheme ":" hier-part (RFC 3986 section 3.1), or a rooted path which is
    // an implicit file URI
    static ref ABSOLUTE_URI: Regex = Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.\-]*:[^\s]+|/[^\s]*)$")
        .expect("absolute URI pattern is valid");
}

/// True when `candidate` has a scheme and a non-empty hierarchical part,
/// e.g. `fabric:/app/service`, or is a rooted path such as `/app/service`.
pub fn is_absolute_uri(candidate: &str) -> bool {
    ABSOLUTE_URI.is_match(candidate)
}
