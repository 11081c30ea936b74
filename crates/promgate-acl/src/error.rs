//! Error types for ACL parsing, role resolution and query rewriting.

use thiserror::Error;

/// Result type for ACL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing ACL rules, loading the role registry,
/// resolving role claims or rewriting queries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A rule token contains interior whitespace.
    #[error("rule should not contain spaces within individual elements ({0:?})")]
    RuleWithSpaces(String),

    /// A rule has no usable tokens.
    #[error("rule has to contain at least one valid element ({0:?})")]
    EmptyRule(String),

    /// A rule compiled to an invalid regular expression.
    #[error("{source} in {value:?} (converted from {raw:?})")]
    InvalidRegex {
        /// The value that failed to compile.
        value: String,
        /// The raw rule it was converted from.
        raw: String,
        /// The underlying regex engine failure.
        source: regex::Error,
    },

    /// The ACL file could not be read.
    #[error("failed to read ACL file {path:?}: {source}")]
    RegistryRead {
        /// Path to the ACL file.
        path: String,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The ACL file is not a flat `role -> rule` mapping.
    #[error("failed to parse ACL file {path:?}: {source}")]
    RegistryParse {
        /// Path to the ACL file.
        path: String,
        /// The underlying YAML failure.
        source: serde_yaml::Error,
    },

    /// A role definition inside the ACL file failed to parse.
    #[error("invalid rule for role {role:?}: {source}")]
    RegistryRule {
        /// The role whose rule failed to parse.
        role: String,
        /// The underlying rule failure.
        source: Box<Error>,
    },

    /// The resolver was left with no usable roles.
    #[error("no matching roles found")]
    NoMatchingRoles,

    /// A `query` or `match[]` value does not parse as a metric expression.
    #[error("failed to parse query {query:?}: {reason}")]
    BadQuery {
        /// The offending query text.
        query: String,
        /// The parser's diagnostic.
        reason: String,
    },

    /// A label filter could not be turned into a selector matcher.
    ///
    /// ACL regexes are validated at parse time, so hitting this during a
    /// rewrite indicates an internal invariant violation.
    #[error("failed to compile label filter regex {value:?}: {source}")]
    FilterCompile {
        /// The filter value that failed to compile.
        value: String,
        /// The underlying regex engine failure.
        source: regex::Error,
    },
}
