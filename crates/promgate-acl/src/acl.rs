//! ACL rule parsing.
//!
//! A rule is a comma-separated list of namespace tokens, e.g. `minio` or
//! `min.*, stolon`. Parsing normalizes the rule into a single label filter on
//! the `namespace` label plus a canonical raw form that reproduces the ACL.
//!
//! The special token `.*` grants access to every namespace and subsumes any
//! other token in the same rule.

use promql_parser::label::{MatchOp, Matcher};
use regex::Regex;

use crate::error::{Error, Result};

/// Characters that mark a rule token (or an existing filter value) as a
/// regular expression.
pub const REGEX_SYMBOLS: &str = r".+*?^$()[]{}|\";

/// The label every ACL constrains.
pub const ACL_LABEL: &str = "namespace";

/// A single constraint on a metric label.
///
/// Values are never anchored; the backend anchors regex matchers implicitly,
/// so a value like `min.*` already means `^(min.*)$` to Prometheus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    /// Label name the filter applies to.
    pub label: String,
    /// Literal label value or regex source.
    pub value: String,
    /// Whether `value` is a regular expression.
    pub is_regexp: bool,
    /// Whether the filter excludes matching series.
    pub is_negative: bool,
}

impl LabelFilter {
    /// Convert into the query AST's matcher representation.
    pub fn to_matcher(&self) -> Result<Matcher> {
        let op = match (self.is_regexp, self.is_negative) {
            (false, false) => MatchOp::Equal,
            (false, true) => MatchOp::NotEqual,
            (true, false) => MatchOp::Re(compile(&self.value)?),
            (true, true) => MatchOp::NotRe(compile(&self.value)?),
        };
        Ok(Matcher {
            op,
            name: self.label.clone(),
            value: self.value.clone(),
        })
    }
}

/// Compile a filter value, mapping failures onto the internal-invariant error.
pub(crate) fn compile(value: &str) -> Result<Regex> {
    Regex::new(value).map_err(|source| Error::FilterCompile {
        value: value.to_string(),
        source,
    })
}

/// A parsed access policy: one namespace label filter plus the canonical raw
/// form it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    /// Grants access to every namespace.
    pub fullaccess: bool,
    /// The filter applied to metric selectors.
    pub label_filter: LabelFilter,
    /// Canonical comma-space-separated form reproducing this ACL. Anchors are
    /// stripped; a fullaccess ACL collapses to `.*`.
    pub raw_acl: String,
}

impl Acl {
    /// Parse a raw rule definition into an ACL.
    ///
    /// A single token without regex metacharacters becomes a literal filter;
    /// anything else becomes a regex filter. Multiple tokens are joined with
    /// `|`. A regex token may carry a single pair of anchors/parens
    /// (`^(...)$`), which are stripped since the backend anchors matchers
    /// itself.
    pub fn new(raw: &str) -> Result<Self> {
        let mut tokens = tokenize(raw)?;

        // .* subsumes every other token in the rule.
        if tokens.iter().any(|t| t == ".*") {
            return Ok(Self::fullaccess());
        }

        let mut filter = LabelFilter {
            label: ACL_LABEL.to_string(),
            value: String::new(),
            is_regexp: false,
            is_negative: false,
        };

        if tokens.len() == 1 {
            let token = &mut tokens[0];
            if token.chars().any(|c| REGEX_SYMBOLS.contains(c)) {
                filter.is_regexp = true;
                strip_anchors(token);
                // An anchored wildcard (`^(.*)$` and friends) reduces to the
                // fullaccess ACL once the anchors are gone.
                if token == ".*" {
                    return Ok(Self::fullaccess());
                }
            }
            filter.value = token.clone();
        } else {
            filter.value = tokens.join("|");
            filter.is_regexp = true;
        }

        if filter.is_regexp {
            Regex::new(&filter.value).map_err(|source| Error::InvalidRegex {
                value: filter.value.clone(),
                raw: raw.to_string(),
                source,
            })?;
        }

        Ok(Acl {
            fullaccess: false,
            label_filter: filter,
            raw_acl: tokens.join(", "),
        })
    }

    /// The canonical fullaccess ACL (`.*`).
    pub fn fullaccess() -> Self {
        Acl {
            fullaccess: true,
            label_filter: LabelFilter {
                label: ACL_LABEL.to_string(),
                value: ".*".to_string(),
                is_regexp: true,
                is_negative: false,
            },
            raw_acl: ".*".to_string(),
        }
    }
}

/// Split a raw rule on commas, trimming each token and dropping empty ones.
///
/// Interior whitespace in a token is rejected rather than split on.
fn tokenize(raw: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();

    for piece in raw.split(',') {
        let piece = piece.trim();

        if piece.chars().any(char::is_whitespace) {
            return Err(Error::RuleWithSpaces(raw.to_string()));
        }

        if !piece.is_empty() {
            tokens.push(piece.to_string());
        }
    }

    if tokens.is_empty() {
        return Err(Error::EmptyRule(raw.to_string()));
    }

    Ok(tokens)
}

/// Strip at most one leading `^`, one leading `(`, one trailing `$` and one
/// trailing `)`, in that order. The sequence is intentionally single-pass:
/// `^^foo$$` keeps one anchor on each side.
fn strip_anchors(token: &mut String) {
    if let Some(rest) = token.strip_prefix('^') {
        *token = rest.to_string();
    }
    if let Some(rest) = token.strip_prefix('(') {
        *token = rest.to_string();
    }
    if let Some(rest) = token.strip_suffix('$') {
        *token = rest.to_string();
    }
    if let Some(rest) = token.strip_suffix(')') {
        *token = rest.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(value: &str, is_regexp: bool) -> LabelFilter {
        LabelFilter {
            label: ACL_LABEL.to_string(),
            value: value.to_string(),
            is_regexp,
            is_negative: false,
        }
    }

    #[test]
    fn test_fullaccess_rule() {
        let acl = Acl::new(".*").unwrap();
        assert!(acl.fullaccess);
        assert_eq!(acl.label_filter, filter(".*", true));
        assert_eq!(acl.raw_acl, ".*");
    }

    #[test]
    fn test_fullaccess_subsumes_other_tokens() {
        let acl = Acl::new("min.*, .*, stolon").unwrap();
        assert!(acl.fullaccess);
        assert_eq!(acl.raw_acl, ".*");
    }

    #[test]
    fn test_single_literal() {
        let acl = Acl::new("minio").unwrap();
        assert!(!acl.fullaccess);
        assert_eq!(acl.label_filter, filter("minio", false));
        assert_eq!(acl.raw_acl, "minio");
    }

    #[test]
    fn test_single_regexp() {
        let acl = Acl::new("min.*").unwrap();
        assert_eq!(acl.label_filter, filter("min.*", true));
        assert_eq!(acl.raw_acl, "min.*");
    }

    #[test]
    fn test_anchored_regexp_is_stripped() {
        let acl = Acl::new("^(min.*)$").unwrap();
        assert_eq!(acl.label_filter, filter("min.*", true));
        assert_eq!(acl.raw_acl, "min.*");
    }

    #[test]
    fn test_double_anchors_keep_one_pair() {
        let acl = Acl::new("^^min.*$$").unwrap();
        assert_eq!(acl.label_filter.value, "^min.*$");
        assert!(acl.label_filter.is_regexp);
    }

    #[test]
    fn test_two_literals_become_alternation() {
        let acl = Acl::new("minio, stolon").unwrap();
        assert_eq!(acl.label_filter, filter("minio|stolon", true));
        assert_eq!(acl.raw_acl, "minio, stolon");
    }

    #[test]
    fn test_mixed_regexp_and_literal() {
        let acl = Acl::new("min.*, stolon").unwrap();
        assert_eq!(acl.label_filter, filter("min.*|stolon", true));
        assert_eq!(acl.raw_acl, "min.*, stolon");
    }

    #[test]
    fn test_dot_plus_is_a_regexp_not_fullaccess() {
        let acl = Acl::new(".+").unwrap();
        assert!(!acl.fullaccess);
        assert_eq!(acl.label_filter, filter(".+", true));
    }

    #[test]
    fn test_no_space_after_comma() {
        let acl = Acl::new("a,b").unwrap();
        assert_eq!(acl.label_filter, filter("a|b", true));
        assert_eq!(acl.raw_acl, "a, b");
    }

    #[test]
    fn test_empty_tokens_are_dropped() {
        let acl = Acl::new("minio, , stolon,").unwrap();
        assert_eq!(acl.label_filter, filter("minio|stolon", true));
        assert_eq!(acl.raw_acl, "minio, stolon");
    }

    #[test]
    fn test_interior_whitespace_is_rejected() {
        assert!(matches!(
            Acl::new("min io"),
            Err(Error::RuleWithSpaces(_))
        ));
        assert!(matches!(
            Acl::new("minio, sto lon"),
            Err(Error::RuleWithSpaces(_))
        ));
    }

    #[test]
    fn test_empty_rule_is_rejected() {
        assert!(matches!(Acl::new(""), Err(Error::EmptyRule(_))));
        assert!(matches!(Acl::new(", ,"), Err(Error::EmptyRule(_))));
    }

    #[test]
    fn test_invalid_regexp_is_rejected() {
        let err = Acl::new("min.*, (unclosed").unwrap_err();
        match err {
            Error::InvalidRegex { value, raw, .. } => {
                assert_eq!(value, "min.*|(unclosed");
                assert_eq!(raw, "min.*, (unclosed");
            }
            other => panic!("expected InvalidRegex, got {other:?}"),
        }
    }

    #[test]
    fn test_anchored_wildcard_is_fullaccess() {
        for rule in ["^(.*)$", "^.*$", "(.*)"] {
            let acl = Acl::new(rule).unwrap();
            assert!(acl.fullaccess, "{rule:?} should grant fullaccess");
            assert_eq!(acl.raw_acl, ".*");
        }
    }

    #[test]
    fn test_parser_invariants_hold_over_generated_rules() {
        // Deterministic sweep over every rule of up to three characters from
        // an alphabet chosen to hit the interesting paths: separators,
        // whitespace, anchors, metacharacters and plain letters.
        let alphabet = [
            'a', 'b', ',', ' ', '.', '*', '+', '^', '$', '(', ')', '|', '\\',
        ];

        let mut inputs: Vec<String> = vec![String::new()];
        let mut frontier: Vec<String> = vec![String::new()];
        for _ in 0..3 {
            let mut next = Vec::new();
            for prefix in &frontier {
                for c in alphabet {
                    let mut s = prefix.clone();
                    s.push(c);
                    next.push(s);
                }
            }
            inputs.extend(next.iter().cloned());
            frontier = next;
        }

        for raw in &inputs {
            let Ok(acl) = Acl::new(raw) else {
                continue;
            };

            assert_eq!(acl.label_filter.label, ACL_LABEL, "label drifted for {raw:?}");
            assert_eq!(
                acl.fullaccess,
                acl.label_filter.value == ".*" && acl.raw_acl == ".*",
                "fullaccess invariant violated for {raw:?}: {acl:?}"
            );
            if acl.fullaccess {
                assert!(acl.label_filter.is_regexp);
                assert!(!acl.label_filter.is_negative);
            }
            if acl.label_filter.is_regexp {
                assert!(
                    regex::Regex::new(&acl.label_filter.value).is_ok(),
                    "stored regex does not compile for {raw:?}: {:?}",
                    acl.label_filter.value
                );
            }
            assert!(!acl.label_filter.is_negative);
        }
    }

    #[test]
    fn test_canonical_form_reparses_to_equal_acl() {
        for rule in [".*", "minio", "min.*", "minio, stolon", "min.*, stolon"] {
            let acl = Acl::new(rule).unwrap();
            let reparsed = Acl::new(&acl.raw_acl).unwrap();
            assert_eq!(acl, reparsed, "canonical form of {rule:?} drifted");
        }
    }

    #[test]
    fn test_to_matcher_kinds() {
        let literal = filter("minio", false).to_matcher().unwrap();
        assert!(matches!(literal.op, MatchOp::Equal));
        assert_eq!(literal.name, "namespace");
        assert_eq!(literal.value, "minio");

        let positive = filter("min.*", true).to_matcher().unwrap();
        assert!(matches!(positive.op, MatchOp::Re(_)));

        let negative = LabelFilter {
            is_negative: true,
            ..filter("min.*", true)
        }
        .to_matcher()
        .unwrap();
        assert!(matches!(negative.op, MatchOp::NotRe(_)));
    }
}
