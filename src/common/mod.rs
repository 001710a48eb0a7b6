//! Common utilities shared across the qualifier

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Characters that must not appear in a version token or OVN
const URL_UNSAFE_CHARS: &str = "\0\t\r\n#%/:?@[\\]";

/// Whether a DSS-issued version token can be embedded in a URL path segment
pub fn is_url_safe_token(token: &str) -> bool {
    token.chars().all(|c| !URL_UNSAFE_CHARS.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_safe_tokens() {
        assert!(is_url_safe_token("v0000000000000012"));
        assert!(is_url_safe_token("AbC-_.~"));
        assert!(is_url_safe_token(""));
        assert!(!is_url_safe_token("a/b"));
        assert!(!is_url_safe_token("100%"));
        assert!(!is_url_safe_token("ovn:1"));
        assert!(!is_url_safe_token("x\ny"));
        assert!(!is_url_safe_token("[1]"));
    }
}
