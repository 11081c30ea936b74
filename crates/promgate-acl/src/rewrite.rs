//! Query AST rewriting.
//!
//! The rewriter walks a parsed metric expression and mutates the matcher list
//! of every vector selector according to the effective ACL:
//!
//! - a literal ACL filter *replaces* any existing filter on the same label;
//! - a regex ACL filter is *merged* into existing regex filters of the same
//!   polarity (negative values are widened with `|`, positive values are
//!   overwritten) or appended when there is nothing to merge with.
//!
//! Merging two positive regexes with `|` would widen access instead of
//! narrowing it, which is why positive values are overwritten. Widening a
//! negative regex only grows the excluded set, so that merge is safe.

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::{Expr, VectorSelector};

use crate::acl::{compile, Acl, LabelFilter};
use crate::dedup::is_already_constrained;
use crate::error::Result;

/// Options controlling how queries are rewritten.
#[derive(Debug, Clone)]
pub struct QueryModifier {
    /// Effective ACL applied to every metric selector.
    pub acl: Acl,
    /// Leave selectors untouched when they are already at least as
    /// restrictive as the ACL.
    pub enable_deduplication: bool,
    /// Run the duplicate-filter elimination pass after rewriting.
    pub optimize_expressions: bool,
}

impl QueryModifier {
    /// Rewrite a parsed metric expression according to the ACL.
    ///
    /// The input is cloned before mutation; the returned expression shares no
    /// structure with it.
    pub fn rewrite_expr(&self, expr: &Expr) -> Result<Expr> {
        let mut rewritten = expr.clone();
        let mut failure = None;

        for_each_selector(&mut rewritten, &mut |selector| {
            if failure.is_some() {
                return;
            }
            if let Err(e) = self.apply(selector) {
                failure = Some(e);
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(rewritten),
        }
    }

    /// Apply the ACL filter to a single selector's matcher list.
    fn apply(&self, selector: &mut VectorSelector) -> Result<()> {
        let filters = &mut selector.matchers.matchers;
        let lf = &self.acl.label_filter;

        if lf.is_regexp {
            if self.enable_deduplication && is_already_constrained(filters, &self.acl) {
                return Ok(());
            }
            append_or_merge(filters, lf)
        } else {
            replace_by_name(filters, lf)
        }
    }
}

/// Merge the regex filter into existing regex matchers on the same label with
/// the same polarity, or append it when no merge happened.
fn append_or_merge(filters: &mut Vec<Matcher>, lf: &LabelFilter) -> Result<()> {
    let mut merged = false;

    for matcher in filters.iter_mut() {
        if matcher.name != lf.label {
            continue;
        }
        if !matcher_is_regexp(matcher) || matcher_is_negative(matcher) != lf.is_negative {
            continue;
        }

        merged = true;
        let value = if !matcher.value.is_empty() && lf.is_negative {
            format!("{}|{}", matcher.value, lf.value)
        } else {
            lf.value.clone()
        };
        matcher.op = if lf.is_negative {
            MatchOp::NotRe(compile(&value)?)
        } else {
            MatchOp::Re(compile(&value)?)
        };
        matcher.value = value;
    }

    if !merged {
        filters.push(lf.to_matcher()?);
    }

    Ok(())
}

/// Drop every matcher on the filter's label, then append the filter.
fn replace_by_name(filters: &mut Vec<Matcher>, lf: &LabelFilter) -> Result<()> {
    filters.retain(|matcher| matcher.name != lf.label);
    filters.push(lf.to_matcher()?);
    Ok(())
}

/// Whether the matcher is a regex matcher (`=~` or `!~`).
pub(crate) fn matcher_is_regexp(matcher: &Matcher) -> bool {
    matches!(matcher.op, MatchOp::Re(_) | MatchOp::NotRe(_))
}

/// Whether the matcher excludes matching series (`!=` or `!~`).
pub(crate) fn matcher_is_negative(matcher: &Matcher) -> bool {
    matches!(matcher.op, MatchOp::NotEqual | MatchOp::NotRe(_))
}

/// Visit every vector selector in the expression tree, including the one
/// behind each matrix selector. Only selector nodes carry matcher lists;
/// every other node kind is just traversed.
pub(crate) fn for_each_selector(expr: &mut Expr, visit: &mut dyn FnMut(&mut VectorSelector)) {
    match expr {
        Expr::Aggregate(aggregate) => {
            if let Some(param) = aggregate.param.as_deref_mut() {
                for_each_selector(param, visit);
            }
            for_each_selector(&mut aggregate.expr, visit);
        }
        Expr::Unary(unary) => for_each_selector(&mut unary.expr, visit),
        Expr::Binary(binary) => {
            for_each_selector(&mut binary.lhs, visit);
            for_each_selector(&mut binary.rhs, visit);
        }
        Expr::Paren(paren) => for_each_selector(&mut paren.expr, visit),
        Expr::Subquery(subquery) => for_each_selector(&mut subquery.expr, visit),
        Expr::NumberLiteral(_) | Expr::StringLiteral(_) => {}
        Expr::VectorSelector(selector) => visit(selector),
        Expr::MatrixSelector(matrix) => visit(&mut matrix.vs),
        Expr::Call(call) => {
            for arg in call.args.args.iter_mut() {
                for_each_selector(arg, visit);
            }
        }
        Expr::Extension(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use promql_parser::parser;

    use super::*;
    use crate::acl::ACL_LABEL;

    /// Canonicalize a query through the same parse/serialize path the
    /// rewriter uses, so assertions pin semantics rather than whitespace.
    fn canon(query: &str) -> String {
        parser::parse(query).unwrap().to_string()
    }

    fn modifier(rule: &str, dedup: bool) -> QueryModifier {
        QueryModifier {
            acl: Acl::new(rule).unwrap(),
            enable_deduplication: dedup,
            optimize_expressions: false,
        }
    }

    fn rewrite(qm: &QueryModifier, query: &str) -> String {
        let expr = parser::parse(query).unwrap();
        qm.rewrite_expr(&expr).unwrap().to_string()
    }

    #[test]
    fn test_fullaccess_with_dedup_leaves_query_unchanged() {
        let qm = modifier(".*", true);
        assert_eq!(rewrite(&qm, "up"), canon("up"));
    }

    #[test]
    fn test_fullaccess_without_dedup_appends_harmless_filter() {
        // A fullaccess ACL reaching the rewriter with deduplication disabled
        // still appends its namespace=~".*" filter, which matches everything.
        let qm = modifier(".*", false);
        assert_eq!(rewrite(&qm, "up"), canon(r#"up{namespace=~".*"}"#));
    }

    #[test]
    fn test_literal_appends_when_label_absent() {
        let qm = modifier("default", false);
        assert_eq!(
            rewrite(&qm, r#"request_duration{job="demo"}"#),
            canon(r#"request_duration{job="demo", namespace="default"}"#)
        );
    }

    #[test]
    fn test_literal_replaces_existing_filters() {
        let qm = modifier("default", false);
        assert_eq!(
            rewrite(
                &qm,
                r#"request_duration{namespace="other", job="demo", namespace=~"min.*"}"#
            ),
            canon(r#"request_duration{job="demo", namespace="default"}"#)
        );
    }

    #[test]
    fn test_regexp_appends_next_to_literal() {
        let qm = modifier("min.*, stolon", false);
        assert_eq!(
            rewrite(&qm, r#"request_duration{job="demo", namespace="other"}"#),
            canon(r#"request_duration{job="demo", namespace="other", namespace=~"min.*|stolon"}"#)
        );
    }

    #[test]
    fn test_regexp_overwrites_positive_regexp() {
        // Union-ing two positive regexes would widen access, so the existing
        // value is replaced outright.
        let qm = modifier("min.*, stolon", false);
        assert_eq!(
            rewrite(&qm, r#"request_duration{namespace=~"other.*"}"#),
            canon(r#"request_duration{namespace=~"min.*|stolon"}"#)
        );
    }

    #[test]
    fn test_regexp_leaves_negative_filters_alone_and_appends() {
        let qm = modifier("min.*", false);
        assert_eq!(
            rewrite(&qm, r#"x{namespace!="other"}"#),
            canon(r#"x{namespace!="other", namespace=~"min.*"}"#)
        );
    }

    #[test]
    fn test_dedup_skips_literal_covered_by_acl() {
        let qm = modifier("min.*, stolon", true);
        let query = r#"request_duration{namespace="minio"}"#;
        assert_eq!(rewrite(&qm, query), canon(query));
    }

    #[test]
    fn test_dedup_skips_original_subfilter() {
        let qm = modifier("min.*, stolon", true);
        let query = r#"request_duration{namespace=~"min.*"}"#;
        assert_eq!(rewrite(&qm, query), canon(query));
    }

    #[test]
    fn test_dedup_does_not_protect_broader_regexp() {
        let qm = modifier("min.*, stolon", true);
        assert_eq!(
            rewrite(&qm, r#"request_duration{namespace=~"other.*"}"#),
            canon(r#"request_duration{namespace=~"min.*|stolon"}"#)
        );
    }

    #[test]
    fn test_disabled_dedup_rewrites_subfilter() {
        let qm = modifier("min.*", false);
        assert_eq!(
            rewrite(&qm, r#"request_duration{job="demo", namespace=~"minio"}"#),
            canon(r#"request_duration{job="demo", namespace=~"min.*"}"#)
        );
    }

    #[test]
    fn test_negative_regexp_acl_merges_by_widening() {
        let acl = Acl {
            fullaccess: false,
            label_filter: LabelFilter {
                label: ACL_LABEL.to_string(),
                value: "min.*".to_string(),
                is_regexp: true,
                is_negative: true,
            },
            raw_acl: "min.*".to_string(),
        };
        let qm = QueryModifier {
            acl,
            enable_deduplication: false,
            optimize_expressions: false,
        };
        assert_eq!(
            rewrite(&qm, r#"x{namespace!~"other.*"}"#),
            canon(r#"x{namespace!~"other.*|min.*"}"#)
        );
    }

    #[test]
    fn test_complex_expression_touches_every_selector() {
        let qm = modifier("default", false);
        let query = r#"(histogram_quantile(0.9, rate(request_duration{job="demo"}[5m])) > 0.05 and rate(demo_api_request_duration_seconds_count{job="demo"}[5m]) > 1)"#;
        let want = r#"(histogram_quantile(0.9, rate(request_duration{job="demo", namespace="default"}[5m])) > 0.05 and rate(demo_api_request_duration_seconds_count{job="demo", namespace="default"}[5m]) > 1)"#;
        assert_eq!(rewrite(&qm, query), canon(want));
    }

    #[test]
    fn test_subquery_and_aggregation_selectors_are_rewritten() {
        let qm = modifier("minio", false);
        let query = r#"max_over_time(sum(rate(up{job="demo"}[5m]))[1h:5m])"#;
        let want =
            r#"max_over_time(sum(rate(up{job="demo", namespace="minio"}[5m]))[1h:5m])"#;
        assert_eq!(rewrite(&qm, query), canon(want));
    }

    #[test]
    fn test_input_expression_is_not_mutated() {
        let qm = modifier("default", false);
        let expr = parser::parse(r#"up{job="demo"}"#).unwrap();
        let before = expr.to_string();
        let _ = qm.rewrite_expr(&expr).unwrap();
        assert_eq!(expr.to_string(), before);
    }

    #[test]
    fn test_rewrite_is_idempotent_for_literal_acls() {
        let qm = modifier("default", false);
        let once = rewrite(&qm, r#"up{job="demo"}"#);
        let twice = rewrite(&qm, &once);
        assert_eq!(once, twice);
    }
}
