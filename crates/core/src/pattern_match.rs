//! SQL LIKE pattern matching.
//!
//! Two wildcards are recognised:
//! - `%` matches zero or more characters
//! - `_` matches exactly one character
//!
//! Matching is **case-sensitive** and operates on Unicode scalar values.

use alloc::string::String;
use alloc::vec::Vec;

/// SQL LIKE pattern matching.
///
/// ```
/// use tern_core::pattern_match::like;
/// assert!(like("Wireless Mouse", "%Mouse"));
/// assert!(like("TECH-LAP-001", "TECH-___-001"));
/// assert!(!like("Budget Mouse", "Wireless%"));
/// ```
pub fn like(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();

    // Greedy matcher with single-point backtracking to the last `%`.
    let (mut vi, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '_' || (p[pi] != '%' && p[pi] == v[vi])) {
            vi += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, vi));
            pi += 1;
        } else if let Some((star_pi, star_vi)) = star {
            pi = star_pi + 1;
            vi = star_vi + 1;
            star = Some((star_pi, star_vi + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

/// Returns the literal prefix of a LIKE pattern (everything before the first
/// wildcard), or `None` when the pattern starts with a wildcard.
///
/// ```
/// use tern_core::pattern_match::literal_prefix;
/// assert_eq!(literal_prefix("TECH-%").as_deref(), Some("TECH-"));
/// assert_eq!(literal_prefix("%Mouse"), None);
/// ```
pub fn literal_prefix(pattern: &str) -> Option<String> {
    let prefix: String = pattern.chars().take_while(|c| *c != '%' && *c != '_').collect();
    if prefix.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_exact() {
        assert!(like("hello", "hello"));
        assert!(!like("hello", "hell"));
        assert!(!like("hello", "Hello"));
    }

    #[test]
    fn like_percent() {
        assert!(like("hello", "%"));
        assert!(like("hello", "h%"));
        assert!(like("hello", "%o"));
        assert!(like("hello", "%ll%"));
        assert!(like("hello", "h%l%o"));
        assert!(!like("hello", "h%x"));
    }

    #[test]
    fn like_underscore() {
        assert!(like("hello", "_ello"));
        assert!(like("hello", "h___o"));
        assert!(!like("hello", "h__o"));
    }

    #[test]
    fn like_backtracking() {
        assert!(like("aaab", "%a%b"));
        assert!(like("mississippi", "%iss%ppi"));
        assert!(!like("mississippi", "%iss%ppx"));
        assert!(like("abcabc", "%bc"));
    }

    #[test]
    fn like_empty() {
        assert!(like("", ""));
        assert!(like("", "%"));
        assert!(!like("", "_"));
        assert!(!like("a", ""));
    }

    #[test]
    fn prefix_extraction() {
        assert_eq!(literal_prefix("abc").as_deref(), Some("abc"));
        assert_eq!(literal_prefix("ab_c").as_deref(), Some("ab"));
        assert_eq!(literal_prefix("_bc"), None);
    }
}
