//! Connected sessions and registered agents.

use std::{collections::HashMap, sync::Arc};

use dockwatch_core::Session;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("This name is already taken. Please use another unique name for your agent")]
    NameTaken(String),
    #[error("Agent name cannot be empty")]
    EmptyName,
}

/// Every client connection of this node, by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn Session>>>,
}

impl SessionRegistry {
    pub async fn insert(&self, session: Arc<dyn Session>) {
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), session);
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<dyn Session>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<dyn Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

struct Agent {
    name: String,
    session: Arc<dyn Session>,
}

/// Agents registered with this master, in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Agent>>,
}

impl AgentRegistry {
    /// Register `session` under `name`.
    ///
    /// # Errors
    /// Returns error if the name is empty or already registered.
    pub async fn register(&self, name: &str, session: Arc<dyn Session>) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut agents = self.agents.write().await;
        if agents.iter().any(|a| a.name == name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        agents.push(Agent {
            name: name.to_string(),
            session,
        });
        Ok(())
    }

    /// Remove an agent. Returns whether it was registered.
    pub async fn remove(&self, name: &str) -> bool {
        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|a| a.name != name);
        agents.len() != before
    }

    pub async fn find(&self, name: &str) -> Option<Arc<dyn Session>> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.session.clone())
    }

    pub async fn names(&self) -> Vec<String> {
        self.agents
            .read()
            .await
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }
}
