use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A Teamspeak3 server group mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsGroup {
    pub id: i64,
    pub name: String,
}

/// Storage for the local mirror of Teamspeak3 server groups.
#[async_trait]
pub trait TsGroupStore: Send + Sync {
    async fn all(&self) -> Result<Vec<TsGroup>>;

    /// Insert the group or update its name if the id already exists.
    async fn upsert(&self, group: TsGroup) -> Result<()>;

    async fn remove(&self, id: i64) -> Result<()>;
}

/// In-memory [`TsGroupStore`].
#[derive(Debug, Default)]
pub struct InMemoryTsGroupStore {
    groups: RwLock<HashMap<i64, String>>,
}

impl InMemoryTsGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TsGroupStore for InMemoryTsGroupStore {
    async fn all(&self) -> Result<Vec<TsGroup>> {
        let guard = self.groups.read().await;
        let mut groups: Vec<TsGroup> = guard
            .iter()
            .map(|(&id, name)| TsGroup {
                id,
                name: name.clone(),
            })
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn upsert(&self, group: TsGroup) -> Result<()> {
        let mut guard = self.groups.write().await;
        guard.insert(group.id, group.name);
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        let mut guard = self.groups.write().await;
        guard.remove(&id);
        Ok(())
    }
}
