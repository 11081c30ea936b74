//! Deduplication: deciding when a selector is already constrained.
//!
//! Rewriting every selector unconditionally can over-constrain queries that
//! were already narrower than the ACL, e.g. `namespace="minio"` under the ACL
//! `min.*, stolon`. The predicate here answers "would applying the ACL filter
//! restrict this selector any further?", and only a provable "no" counts.
//!
//! Coverage is purely syntactic: a literal (or a regex-flagged value without
//! metacharacters) is covered when the anchored ACL regex matches it; a
//! positive regex is covered only when it equals one of the ACL's original
//! subrules verbatim. Regex containment in general is undecidable, so a
//! value like `mini.*` is *not* considered covered by `min.*`.

use promql_parser::label::Matcher;
use regex::Regex;

use crate::acl::{Acl, REGEX_SYMBOLS};
use crate::rewrite::{matcher_is_negative, matcher_is_regexp};

/// Returns true when every existing filter on the ACL's label is provably no
/// broader than the ACL itself, i.e. the rewrite may be skipped.
///
/// Only positive-regex ACLs qualify (a fullaccess ACL trivially does); any
/// filter on the target label that fails both sufficiency criteria
/// disqualifies the whole selector.
pub fn is_already_constrained(filters: &[Matcher], acl: &Acl) -> bool {
    if acl.fullaccess {
        return true;
    }

    let lf = &acl.label_filter;
    if !lf.is_regexp || lf.is_negative {
        return false;
    }

    // The backend anchors regex matchers, so the raw ACL value has to be
    // anchored before matching existing literal values against it.
    let anchored = Regex::new(&format!("^(?:{})$", lf.value));
    let subrules: Vec<&str> = acl.raw_acl.split(", ").collect();

    let mut seen = 0;
    let mut seen_unmodified = 0;

    for filter in filters {
        if filter.name != lf.label {
            continue;
        }
        seen += 1;

        // Literals and fake regexps: covered when the anchored ACL regex
        // matches their value as a plain string.
        if !matcher_is_regexp(filter) || is_fake_positive_regexp(filter) {
            // A compile failure here cannot happen for a validated ACL;
            // skipping deduplication is the safe reaction if it ever does.
            if let Ok(re) = &anchored {
                if re.is_match(&filter.value) {
                    seen_unmodified += 1;
                    continue;
                }
            }
        }

        // Positive regexps: covered only when the value is one of the
        // original subrules, verbatim.
        if matcher_is_regexp(filter)
            && !matcher_is_negative(filter)
            && subrules.iter().any(|subrule| filter.value == *subrule)
        {
            seen_unmodified += 1;
        }
    }

    seen > 0 && seen == seen_unmodified
}

/// A regex-flagged positive filter whose value contains no regex
/// metacharacter behaves exactly like a literal.
fn is_fake_positive_regexp(matcher: &Matcher) -> bool {
    matcher_is_regexp(matcher)
        && !matcher_is_negative(matcher)
        && !matcher.value.chars().any(|c| REGEX_SYMBOLS.contains(c))
}

#[cfg(test)]
mod tests {
    use promql_parser::parser::{self, Expr};

    use super::*;

    fn matchers_of(query: &str) -> Vec<Matcher> {
        match parser::parse(query).unwrap() {
            Expr::VectorSelector(selector) => selector.matchers.matchers,
            other => panic!("expected a vector selector, got {other:?}"),
        }
    }

    fn acl(rule: &str) -> Acl {
        Acl::new(rule).unwrap()
    }

    #[test]
    fn test_fullaccess_is_always_constrained() {
        let filters = matchers_of(r#"up{job="demo"}"#);
        assert!(is_already_constrained(&filters, &acl(".*")));
        assert!(is_already_constrained(&[], &acl(".*")));
    }

    #[test]
    fn test_literal_acl_never_dedups() {
        let filters = matchers_of(r#"up{namespace="minio"}"#);
        assert!(!is_already_constrained(&filters, &acl("minio")));
    }

    #[test]
    fn test_no_filter_on_target_label_does_not_dedup() {
        let filters = matchers_of(r#"up{job="demo"}"#);
        assert!(!is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_literal_matched_by_anchored_acl_regex() {
        let filters = matchers_of(r#"up{namespace="minio"}"#);
        assert!(is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_literal_not_matched_by_anchored_acl_regex() {
        // Anchoring matters: `min` is a prefix of the rule but not a match.
        let filters = matchers_of(r#"up{namespace="min"}"#);
        assert!(!is_already_constrained(&filters, &acl("mini.*, stolon")));
    }

    #[test]
    fn test_fake_positive_regexp_counts_as_literal() {
        let filters = matchers_of(r#"up{namespace=~"minio"}"#);
        assert!(is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_verbatim_subrule_is_covered() {
        let filters = matchers_of(r#"up{namespace=~"min.*"}"#);
        assert!(is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_logical_subset_is_not_covered() {
        // `mini.*` is logically contained in `min.*`, but containment is not
        // decided syntactically, so the selector must be rewritten.
        let filters = matchers_of(r#"up{namespace=~"mini.*"}"#);
        assert!(!is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_negative_filter_on_label_disqualifies() {
        let filters = matchers_of(r#"up{namespace!~"min.*"}"#);
        assert!(!is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_one_uncovered_filter_disqualifies_the_rest() {
        let filters = matchers_of(r#"up{namespace="minio", namespace=~"other.*"}"#);
        assert!(!is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_all_covered_filters_qualify() {
        let filters = matchers_of(r#"up{namespace="minio", namespace=~"min.*", job="demo"}"#);
        assert!(is_already_constrained(&filters, &acl("min.*, stolon")));
    }

    #[test]
    fn test_negative_acl_never_dedups() {
        use crate::acl::{LabelFilter, ACL_LABEL};

        let negative = Acl {
            fullaccess: false,
            label_filter: LabelFilter {
                label: ACL_LABEL.to_string(),
                value: "min.*".to_string(),
                is_regexp: true,
                is_negative: true,
            },
            raw_acl: "min.*".to_string(),
        };
        let filters = matchers_of(r#"up{namespace=~"min.*"}"#);
        assert!(!is_already_constrained(&filters, &negative));
    }
}
