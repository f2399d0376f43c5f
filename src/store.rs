use std::collections::HashMap;
use std::path::Path;

use crate::errors::PalisadeError;
use crate::policy::parse_policy_document;
use crate::types::ResourcePolicy;

/// Fully compiled policy state: resource kind -> ordered rule list.
/// Immutable after construction — policy changes require a new store
/// (and a service reload when serving).
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: HashMap<String, ResourcePolicy>,
}

impl PolicyStore {
    /// Load all `.kdl` policy files from the given directory and compile
    /// them into a single immutable store. Files are read in path order so
    /// that diagnostics are stable.
    pub fn load(dir: &Path) -> Result<Self, PalisadeError> {
        if !dir.is_dir() {
            return Err(PalisadeError::InvalidPolicy(format!(
                "policies directory `{}` does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "kdl")
                    .unwrap_or(false)
            })
            .collect();
        entries.sort_by_key(|e| e.path());

        let mut documents = Vec::new();
        for entry in entries {
            let path = entry.path();
            let contents =
                std::fs::read_to_string(&path).map_err(|source| PalisadeError::PolicyLoad {
                    path: path.display().to_string(),
                    source,
                })?;
            let policy = parse_policy_document(&contents).map_err(|e| match e {
                PalisadeError::InvalidPolicy(msg) => PalisadeError::InvalidPolicy(format!(
                    "{msg} (in `{}`)",
                    path.display()
                )),
                PalisadeError::InvalidCondition(msg) => PalisadeError::InvalidCondition(format!(
                    "{msg} (in `{}`)",
                    path.display()
                )),
                other => other,
            })?;
            documents.push(policy);
        }

        let store = Self::from_policies(documents)?;

        tracing::info!(
            kinds = store.policies.len(),
            rules = store.rule_count(),
            "Loaded authorization policies"
        );

        Ok(store)
    }

    /// Build a store from already-parsed policies, rejecting duplicate
    /// resource kinds.
    pub fn from_policies(policies: Vec<ResourcePolicy>) -> Result<Self, PalisadeError> {
        let mut map = HashMap::new();
        for policy in policies {
            let kind = policy.kind.clone();
            if map.insert(kind.clone(), policy).is_some() {
                return Err(PalisadeError::DuplicatePolicy(kind));
            }
        }
        Ok(Self { policies: map })
    }

    /// The ordered rule list governing a resource kind, if any.
    pub fn lookup(&self, resource_kind: &str) -> Option<&ResourcePolicy> {
        self.policies.get(resource_kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(|k| k.as_str())
    }

    pub fn rule_count(&self) -> usize {
        self.policies.values().map(|p| p.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
