//! Discourse adapter.
//!
//! Group names on Discourse are display keys truncated to 20 characters, so
//! all comparisons happen on the truncated form. The group catalog is the
//! one piece of cached state (30-minute snapshot); per-user membership is
//! fetched fresh on every reconciliation.

use crate::adapters::{generate_password, GroupSync};
use crate::cache::{Clock, SnapshotCache, SystemClock};
use crate::clients::discourse::DiscourseClient;
use crate::clients::RemoteGroup;
use crate::config::DiscourseConfig;
use crate::reconcile::{self, GroupDelta};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const SERVICE: &str = "discourse";

/// Display-name limit; two names sharing a 20-character prefix collide into
/// one remote group.
const GROUP_NAME_MAX_LEN: usize = 20;

/// Suspension length used for disablement, effectively permanent.
const SUSPEND_DAYS: u32 = 99_999;
const SUSPEND_REASON: &str = "Disabled by auth.";

/// Catalog snapshots older than this are refreshed on the next lookup.
pub const GROUP_CACHE_MAX_AGE: Duration = Duration::from_secs(30 * 60);

pub struct DiscourseAdapter {
    client: DiscourseClient,
    catalog: SnapshotCache<Vec<RemoteGroup>>,
}

impl DiscourseAdapter {
    pub fn new(config: &DiscourseConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build with an explicit clock; tests use this to age the catalog
    /// cache without waiting.
    pub fn with_clock(config: &DiscourseConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            client: DiscourseClient::new(config)?,
            catalog: SnapshotCache::new(GROUP_CACHE_MAX_AGE, clock),
        })
    }

    fn truncate_name(name: &str) -> String {
        name.chars().take(GROUP_NAME_MAX_LEN).collect()
    }

    /// Discourse usernames cannot contain spaces or apostrophes.
    fn sanitize_username(username: &str) -> String {
        username.replace(' ', "_").replace('\'', "")
    }

    async fn group_catalog(&self) -> Result<Vec<RemoteGroup>> {
        if let Some(groups) = self.catalog.get().await {
            return Ok(groups);
        }
        self.refresh_group_catalog().await
    }

    /// Fetch the full catalog and replace the snapshot wholesale.
    async fn refresh_group_catalog(&self) -> Result<Vec<RemoteGroup>> {
        let groups = self.client.list_groups().await?;
        self.catalog.store(groups.clone()).await;
        Ok(groups)
    }

    /// Resolve a (truncated) group name to its remote id, creating the group
    /// on a miss. Creation invalidates the snapshot, so the catalog is
    /// re-fetched unconditionally afterwards; one retry bounds the lookup.
    async fn resolve_group_id(&self, name: &str) -> Result<i64> {
        let truncated = Self::truncate_name(name);
        if let Some(group) = self
            .group_catalog()
            .await?
            .iter()
            .find(|g| g.name == truncated)
        {
            return Ok(group.id);
        }

        debug!("Group {} not found on Discourse. Creating", name);
        self.client.create_group(&truncated).await?;
        let refreshed = self.refresh_group_catalog().await?;
        refreshed
            .iter()
            .find(|g| g.name == truncated)
            .map(|g| g.id)
            .ok_or_else(|| {
                Error::remote(
                    SERVICE,
                    format!("group {truncated} missing from catalog after creation"),
                )
            })
    }

    /// Ids of the user's current non-automatic groups, fetched fresh.
    async fn user_group_ids(&self, username: &str) -> Result<HashSet<i64>> {
        let user = self.client.get_user(username).await?;
        Ok(user
            .groups
            .iter()
            .filter(|g| !g.automatic)
            .map(|g| g.id)
            .collect())
    }

    /// Create the account, or reactivate it when the username already exists
    /// in suspended form.
    ///
    /// Returns `(resolved_username, generated_password)`; the two-empty-string
    /// tuple is the documented failure sentinel of this adapter (unlike
    /// phpBB3, which returns its attempt best-effort).
    pub async fn add_user(&self, username: &str, email: &str) -> (String, String) {
        debug!("Adding new discourse user {}", username);
        let password = generate_password();
        let safe_username = Self::sanitize_username(username);
        match self
            .create_or_reactivate(&safe_username, email, &password)
            .await
        {
            Ok(()) => {
                info!("Added new discourse user {}", username);
                (safe_username, password)
            }
            Err(e) => {
                error!("Failed to add new discourse user {}: {}", username, e);
                (String::new(), String::new())
            }
        }
    }

    async fn create_or_reactivate(
        &self,
        safe_username: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        match self.client.get_user(safe_username).await {
            Ok(user) => {
                debug!(
                    "Discourse user {} already exists. Reactivating",
                    safe_username
                );
                self.client.unsuspend_user(user.id).await
            }
            Err(e) if e.is_not_found() => {
                debug!("Creating new user account for {}", safe_username);
                self.client.create_user(safe_username, email, password).await
            }
            Err(e) => Err(e),
        }
    }

    /// Disable by suspending for [`SUSPEND_DAYS`]; the remote record stays.
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        debug!("Deleting discourse user {}", username);
        let user = self.client.get_user(username).await?;
        self.client
            .suspend_user(user.id, SUSPEND_DAYS, SUSPEND_REASON)
            .await?;
        info!("Deleted discourse user {}", username);
        Ok(())
    }

    /// Converge the user's groups to `raw_groups` (names are truncated
    /// before comparison). Absence of the user is a hard error.
    pub async fn update_groups(&self, username: &str, raw_groups: &[String]) -> Result<()> {
        let groups: Vec<String> = raw_groups.iter().map(|g| Self::truncate_name(g)).collect();
        debug!("Updating discourse user {} groups to {:?}", username, groups);

        let mut name_to_id: HashMap<String, i64> = HashMap::new();
        for name in &groups {
            if !name_to_id.contains_key(name) {
                let id = self.resolve_group_id(name).await?;
                name_to_id.insert(name.clone(), id);
            }
        }

        let desired: HashSet<i64> = name_to_id.values().copied().collect();
        let actual = self.user_group_ids(username).await?;
        let delta: GroupDelta<i64> = reconcile::diff(&desired, &actual);

        if !delta.is_empty() {
            info!(
                "Updating discourse user {} groups: adding {:?}, removing {:?}",
                username, delta.to_add, delta.to_remove
            );
            for group_id in &delta.to_add {
                self.client.add_group_member(*group_id, username).await?;
            }
            for group_id in &delta.to_remove {
                self.client.remove_group_member(*group_id, username).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GroupSync for DiscourseAdapter {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn update_groups(&self, user: &str, desired: &[String]) -> Result<()> {
        DiscourseAdapter::update_groups(self, user, desired).await
    }

    async fn disable_user(&self, user: &str) -> Result<()> {
        self.delete_user(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_char_based() {
        assert_eq!(
            DiscourseAdapter::truncate_name("Pilots-Extended-Name-That-Is-Too-Long"),
            "Pilots-Extended-Name"
        );
        assert_eq!(DiscourseAdapter::truncate_name("Pilots"), "Pilots");
    }

    #[test]
    fn same_prefix_names_collide_after_truncation() {
        let a = DiscourseAdapter::truncate_name("Pilots-Extended-NameAlpha");
        let b = DiscourseAdapter::truncate_name("Pilots-Extended-NameBravo");
        assert_eq!(a, b);
    }

    #[test]
    fn usernames_are_sanitized() {
        assert_eq!(
            DiscourseAdapter::sanitize_username("Gallente O'Riley"),
            "Gallente_ORiley"
        );
    }
}
