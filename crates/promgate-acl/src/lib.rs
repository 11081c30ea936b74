//! Namespace ACL policies and PromQL query rewriting.
//!
//! This crate is the policy core of promgate: it parses textual ACL rules
//! into namespace label filters, resolves OIDC role claims against a role
//! registry, and rewrites metric queries so that every selector is
//! constrained to the namespaces the caller may see.
//!
//! # Pipeline
//!
//! ```text
//! role claims ──► AclRegistry::resolve ──► effective Acl
//!                                              │
//! query / match[] ──► parse ──► QueryModifier::rewrite ──► serialize
//! ```
//!
//! Everything here is pure and stateless per request: the registry is built
//! once at startup and only ever read afterwards, and the rewriter clones
//! each expression before touching it.

#![deny(missing_docs)]

pub mod acl;
pub mod dedup;
pub mod error;
pub mod optimize;
pub mod params;
pub mod registry;
pub mod rewrite;

pub use acl::{Acl, LabelFilter, ACL_LABEL, REGEX_SYMBOLS};
pub use error::{Error, Result};
pub use registry::AclRegistry;
pub use rewrite::QueryModifier;
