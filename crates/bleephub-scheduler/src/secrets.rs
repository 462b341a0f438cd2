//! Repository-scoped Actions secrets.
//!
//! Values are write-only through the API; they only leave the registry
//! inside a job request's secrets context and mask list.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretWrite {
    Created,
    Updated,
}

/// Secrets keyed by `owner/repo`, then by upper-cased name.
#[derive(Debug, Default)]
pub struct SecretRegistry {
    repos: HashMap<String, BTreeMap<String, Secret>>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, repo: &str, name: &str, value: impl Into<String>) -> SecretWrite {
        let name = name.to_ascii_uppercase();
        let now = Utc::now();
        let secrets = self.repos.entry(repo.to_string()).or_default();
        let write = match secrets.get_mut(&name) {
            Some(existing) => {
                existing.value = value.into();
                existing.updated_at = now;
                SecretWrite::Updated
            }
            None => {
                secrets.insert(
                    name.clone(),
                    Secret {
                        name: name.clone(),
                        value: value.into(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                SecretWrite::Created
            }
        };
        debug!(repo, name = %name, ?write, "secret stored");
        write
    }

    pub fn get(&self, repo: &str, name: &str) -> Option<&Secret> {
        self.repos.get(repo)?.get(&name.to_ascii_uppercase())
    }

    /// Secrets of one repository in name order.
    pub fn list(&self, repo: &str) -> Vec<&Secret> {
        self.repos
            .get(repo)
            .map(|secrets| secrets.values().collect())
            .unwrap_or_default()
    }

    pub fn delete(&mut self, repo: &str, name: &str) -> bool {
        self.repos
            .get_mut(repo)
            .is_some_and(|secrets| secrets.remove(&name.to_ascii_uppercase()).is_some())
    }

    /// `(name, value)` pairs handed to a job of this repository.
    pub fn values_for(&self, repo: &str) -> Vec<(String, String)> {
        self.list(repo)
            .into_iter()
            .map(|secret| (secret.name.clone(), secret.value.clone()))
            .collect()
    }
}
