//! Wildcard string matching
//!
//! `*` matches any run of characters and `%` exactly one. Patterns without
//! either compare by plain equality.

use regex::Regex;

/// Whole-string wildcard match of `value` against `pattern`
#[must_use]
pub fn match_string(pattern: &str, value: &str) -> bool {
    if !pattern.contains(['*', '%']) {
        return pattern == value;
    }
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '%' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    expr.push('$');
    Regex::new(&expr).is_ok_and(|re| re.is_match(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wildcards() {
        assert!(match_string("a*b", "axxxb"));
        assert!(match_string("a*b", "ab"));
        assert!(match_string("a%b", "axb"));
        assert!(!match_string("a%b", "axxb"));
        assert!(!match_string("a%b", "ab"));
        assert!(match_string("*", ""));
        assert!(!match_string("lin*", "xlinux"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(match_string("v1.*", "v1.2"));
        assert!(!match_string("v1.*", "v1x2"));
        assert!(match_string("(a)*", "(a)bc"));
        assert!(match_string("a+b", "a+b"));
        assert!(!match_string("a+b", "aab"));
    }

    proptest! {
        #[test]
        fn no_wildcard_means_equality(s in "[a-z0-9.+?()|^$ -]{0,12}", t in "[a-z0-9.+?()|^$ -]{0,12}") {
            prop_assert_eq!(match_string(&s, &t), s == t);
            prop_assert!(match_string(&s, &s));
        }

        #[test]
        fn star_suffix_matches_prefix(s in "[a-z]{0,8}", rest in "[a-z%*.]{0,8}") {
            let pattern = format!("{s}*");
            let value = format!("{s}{rest}");
            prop_assert!(match_string(&pattern, &value));
        }
    }
}
