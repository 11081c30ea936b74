//! HTTP form-parameter rewriting.
//!
//! Prometheus-compatible APIs carry metric expressions in the `query` and
//! `match[]` form values (GET query strings and url-encoded POST bodies
//! alike). This stage decodes the pair list, pipes the metric expressions
//! through the rewriter, and re-encodes everything else untouched, preserving
//! pair order and multiplicity.

use promql_parser::parser;

use crate::error::{Error, Result};
use crate::optimize::optimize_expr;
use crate::rewrite::QueryModifier;

/// Form keys that carry metric expressions.
const EXPRESSION_KEYS: [&str; 2] = ["query", "match[]"];

impl QueryModifier {
    /// Rewrite the metric expressions inside a url-encoded parameter list.
    ///
    /// Pairs whose key is `query` or `match[]` are parsed, rewritten,
    /// optionally optimized and re-serialized; every other pair is copied
    /// through. Returns the re-encoded form.
    pub fn rewrite_form(&self, raw: &str) -> Result<String> {
        let mut encoded = form_urlencoded::Serializer::new(String::new());

        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            if EXPRESSION_KEYS.contains(&key.as_ref()) {
                encoded.append_pair(&key, &self.rewrite_query(&value)?);
            } else {
                encoded.append_pair(&key, &value);
            }
        }

        Ok(encoded.finish())
    }

    /// Rewrite a single metric expression to its constrained canonical form.
    pub fn rewrite_query(&self, query: &str) -> Result<String> {
        let expr = parser::parse(query).map_err(|e| Error::BadQuery {
            query: query.to_string(),
            reason: e.to_string(),
        })?;

        let mut rewritten = self.rewrite_expr(&expr)?;
        if self.optimize_expressions {
            optimize_expr(&mut rewritten);
        }

        Ok(rewritten.to_string())
    }
}
