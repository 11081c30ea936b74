//! Post-rewrite expression optimization.
//!
//! The rewrite stage can leave a selector with matchers that say the same
//! thing twice, e.g. when a query already carried the exact filter the ACL
//! inserts. This pass drops exact duplicates (same label, same operator kind,
//! same value) within each selector, keeping the first occurrence.

use std::collections::HashSet;

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::Expr;

use crate::rewrite::for_each_selector;

/// Remove exactly-duplicate matchers within each selector of the expression.
pub fn optimize_expr(expr: &mut Expr) {
    for_each_selector(expr, &mut |selector| {
        dedupe_matchers(&mut selector.matchers.matchers);
    });
}

/// Keep only the first occurrence of each (operator kind, label, value)
/// triple, preserving matcher order otherwise.
fn dedupe_matchers(matchers: &mut Vec<Matcher>) {
    let mut seen: HashSet<(u8, String, String)> = HashSet::new();
    matchers.retain(|matcher| seen.insert(matcher_key(matcher)));
}

fn matcher_key(matcher: &Matcher) -> (u8, String, String) {
    let kind = match &matcher.op {
        MatchOp::Equal => 0,
        MatchOp::NotEqual => 1,
        MatchOp::Re(_) => 2,
        MatchOp::NotRe(_) => 3,
    };
    (kind, matcher.name.clone(), matcher.value.clone())
}
