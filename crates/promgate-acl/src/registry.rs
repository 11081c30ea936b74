//! Role registry and effective-ACL resolution.
//!
//! The registry maps role names (as they appear in OIDC token claims) to
//! parsed ACLs. It is built once at startup from a YAML file and consulted
//! read-only for the lifetime of the process; request handlers share it
//! behind an `Arc`.

use std::collections::HashMap;

use tracing::debug;

use crate::acl::Acl;
use crate::error::{Error, Result};

/// Immutable mapping from role name to parsed ACL.
#[derive(Debug, Clone, Default)]
pub struct AclRegistry {
    roles: HashMap<String, Acl>,
}

impl AclRegistry {
    /// An empty registry with no predefined roles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load role definitions from a YAML file.
    ///
    /// An empty (or blank) path yields an empty registry. The file must be a
    /// flat mapping of role name to rule string; any rule that fails to parse
    /// aborts the whole load.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let path = path.trim();
        if path.is_empty() {
            return Ok(Self::new());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| Error::RegistryRead {
            path: path.to_string(),
            source,
        })?;

        let raw: HashMap<String, String> =
            serde_yaml::from_str(&contents).map_err(|source| Error::RegistryParse {
                path: path.to_string(),
                source,
            })?;

        let mut registry = Self::new();
        for (role, rule) in raw {
            let acl = Acl::new(&rule).map_err(|e| Error::RegistryRule {
                role: role.clone(),
                source: Box::new(e),
            })?;
            debug!(role = %role, rule = %rule, filter = %acl.raw_acl, "loaded role definition");
            registry.roles.insert(role, acl);
        }

        Ok(registry)
    }

    /// Register a role definition. Registries are assembled before the server
    /// starts accepting requests and never mutated afterwards.
    pub fn insert(&mut self, role: impl Into<String>, acl: Acl) {
        self.roles.insert(role.into(), acl);
    }

    /// Look up the ACL configured for a role.
    pub fn get(&self, role: &str) -> Option<&Acl> {
        self.roles.get(role)
    }

    /// Number of configured roles.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the registry has no configured roles.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Iterate over the configured roles and their ACLs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Acl)> {
        self.roles.iter().map(|(role, acl)| (role.as_str(), acl))
    }

    /// Collapse a list of role claims into a single effective ACL.
    ///
    /// A known fullaccess role short-circuits immediately, regardless of any
    /// other claim. When `assumed_roles_enabled` is set, unknown role names
    /// are kept and treated as literal rule fragments; otherwise they are
    /// dropped. A single surviving known role returns its stored ACL as-is;
    /// any other combination is folded into one composite raw rule and fed
    /// back through the rule parser, so composite ACLs obey exactly the same
    /// tokenization and fullaccess-subsumption semantics as configured ones.
    ///
    /// Note: role names are not linted, so with assumed roles enabled a role
    /// literally named `.*` grants fullaccess through the composite path.
    pub fn resolve(&self, role_claims: &[String], assumed_roles_enabled: bool) -> Result<Acl> {
        let mut known: Vec<&str> = Vec::new();
        let mut assumed: Vec<&str> = Vec::new();

        for role in role_claims {
            match self.roles.get(role) {
                Some(acl) if acl.fullaccess => return Ok(acl.clone()),
                Some(_) => known.push(role),
                None => assumed.push(role),
            }
        }

        if assumed_roles_enabled {
            known.append(&mut assumed);
        }

        if known.is_empty() {
            return Err(Error::NoMatchingRoles);
        }

        if known.len() == 1 {
            if let Some(acl) = self.roles.get(known[0]) {
                return Ok(acl.clone());
            }
        }

        Acl::new(&self.roles_to_raw_acl(&known))
    }

    /// Join each role's contribution into one composite raw rule: known roles
    /// contribute their canonical raw ACL, assumed roles contribute their
    /// name verbatim.
    fn roles_to_raw_acl(&self, roles: &[&str]) -> String {
        roles
            .iter()
            .map(|role| match self.roles.get(*role) {
                Some(acl) => acl.raw_acl.as_str(),
                None => role,
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
