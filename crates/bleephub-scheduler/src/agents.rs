//! Registered runner agents and the single agent pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of the only agent pool.
pub const DEFAULT_POOL_ID: u64 = 1;
pub const DEFAULT_POOL_NAME: &str = "Default";

/// A runner agent as the runner's configuration step describes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub os_description: String,
    #[serde(default)]
    pub labels: Vec<AgentLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AgentAuthorization>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_parallelism: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provisioning_state: String,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLabel {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthorization {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authorization_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<AgentPublicKey>,
}

/// RSA public key the runner generated during configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPublicKey {
    #[serde(default)]
    pub exponent: String,
    #[serde(default)]
    pub modulus: String,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<u64, Agent>,
    next_id: u64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next id and mark the agent enabled and online.
    pub fn register(&mut self, mut agent: Agent) -> Agent {
        self.next_id += 1;
        agent.id = self.next_id;
        agent.enabled = true;
        agent.status = "online".to_string();
        agent.created_on = Some(Utc::now());
        self.agents.insert(agent.id, agent.clone());
        agent
    }

    pub fn get(&self, id: u64) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Agents in id order, optionally filtered by case-insensitive name.
    pub fn list(&self, name: Option<&str>) -> Vec<Agent> {
        self.agents
            .values()
            .filter(|agent| name.is_none_or(|n| agent.name.eq_ignore_ascii_case(n)))
            .cloned()
            .collect()
    }

    /// Replace an agent, keeping its id, creation time and (when the
    /// update omits it) authorization.
    pub fn replace(&mut self, id: u64, mut update: Agent) -> Option<Agent> {
        let existing = self.agents.get_mut(&id)?;
        update.id = existing.id;
        update.created_on = existing.created_on;
        if update.authorization.is_none() {
            update.authorization = existing.authorization.clone();
        }
        *existing = update.clone();
        Some(update)
    }

    pub fn remove(&mut self, id: u64) -> Option<Agent> {
        self.agents.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn agent(name: &str) -> Agent {
        Agent {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn register_assigns_increasing_ids() {
        let mut registry = AgentRegistry::new();
        let a = registry.register(agent("a"));
        let b = registry.register(agent("b"));
        assert_eq!((a.id, b.id), (1, 2));
        assert!(a.enabled);
        assert_eq!(a.status, "online");
        assert!(a.created_on.is_some());
    }

    #[test]
    fn list_filters_by_name_ignoring_case() {
        let mut registry = AgentRegistry::new();
        registry.register(agent("Runner-1"));
        registry.register(agent("runner-2"));
        assert_eq!(registry.list(None).len(), 2);
        let found = registry.list(Some("runner-1"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Runner-1");
    }

    #[test]
    fn replace_keeps_identity_and_authorization() {
        let mut registry = AgentRegistry::new();
        let mut original = agent("r");
        original.authorization = Some(AgentAuthorization {
            client_id: "abc".into(),
            ..Default::default()
        });
        let registered = registry.register(original);

        let updated = registry
            .replace(registered.id, agent("renamed"))
            .unwrap();
        assert_eq!(updated.id, registered.id);
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.created_on, registered.created_on);
        assert_eq!(updated.authorization.unwrap().client_id, "abc");
        assert!(registry.replace(99, agent("x")).is_none());
    }

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let json = serde_json::to_value(agent("r")).unwrap();
        assert!(json.get("authorization").is_none());
        assert!(json.get("ephemeral").is_none());
        assert!(json.get("maxParallelism").is_none());
        assert_eq!(json["osDescription"], "");
    }
}
