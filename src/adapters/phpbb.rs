//! phpBB3 adapter.
//!
//! phpBB3 keys accounts on `username_clean` (lowercased) while displaying
//! the character name in `username`; group names use hyphens in place of
//! spaces. A user id lookup returning no row means "skip the operation",
//! never an error, because accounts are provisioned lazily and the authority
//! may reference users that never touched the forum.

use crate::adapters::{generate_password, GroupSync};
use crate::clients::phpbb::Phpbb3Client;
use crate::config::Phpbb3Config;
use crate::reconcile::{self, GroupDelta};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

const SERVICE: &str = "phpbb3";

/// phpBB's built-in REGISTERED group, assigned to every new account.
const DEFAULT_GROUP_ID: u32 = 2;

const BCRYPT_COST: u32 = 10;

pub struct Phpbb3Adapter {
    client: Phpbb3Client,
    domain: String,
    portrait_url: String,
}

impl Phpbb3Adapter {
    pub async fn connect(config: &Phpbb3Config) -> Result<Self> {
        Ok(Self::with_client(Phpbb3Client::connect(config).await?, config))
    }

    pub fn with_client(client: Phpbb3Client, config: &Phpbb3Config) -> Self {
        Self {
            client,
            domain: config.domain.clone(),
            portrait_url: config.portrait_url.clone(),
        }
    }

    fn clean_username(username: &str) -> String {
        username.to_lowercase()
    }

    fn normalize_group_name(name: &str) -> String {
        name.replace(' ', "-")
    }

    fn revoked_email(&self) -> String {
        format!("revoked@{}", self.domain)
    }

    /// phpBB 3.1+ verifies `$2y$` bcrypt hashes.
    fn hash_password(password: &str) -> Result<String> {
        let hash = bcrypt::hash(password, BCRYPT_COST)?;
        Ok(hash.replacen("$2b$", "$2y$", 1))
    }

    pub async fn check_user(&self, username_clean: &str) -> Result<bool> {
        Ok(self.client.user_id(username_clean).await?.is_some())
    }

    pub async fn check_character(&self, character: &str) -> Result<bool> {
        Ok(self
            .client
            .username_by_character(character)
            .await?
            .is_some())
    }

    async fn set_avatar(&self, username_clean: &str, character_id: &str) -> Result<()> {
        debug!(
            "Adding character id {} portrait as phpbb avatar for user {}",
            character_id, username_clean
        );
        let avatar_url = self.portrait_url.replace("{id}", character_id);
        if let Some(user_id) = self.client.user_id(username_clean).await? {
            self.client.set_avatar(&avatar_url, user_id).await?;
        }
        Ok(())
    }

    /// Create or repair the forum account for an identity.
    ///
    /// Branches on whether the character row and the username row already
    /// exist: matching pair is updated in place, a stale pair is disabled
    /// and rebound, and only a fully absent identity inserts a new row.
    ///
    /// Returns the `(username_clean, password)` it attempted even when a
    /// SQL step failed; this best-effort signaling is a documented quirk of
    /// this adapter (Discourse uses an empty-string sentinel instead).
    pub async fn add_user(
        &self,
        username: &str,
        character_name: &str,
        email: &str,
        groups: &[String],
        character_id: &str,
    ) -> (String, String) {
        let username_clean = Self::clean_username(username);
        let password = generate_password();
        debug!(
            "Adding phpbb user with username {}, main character {}, email {}, groups {:?}",
            username_clean, character_name, email, groups
        );
        if let Err(e) = self
            .register(&username_clean, character_name, email, &password, groups, character_id)
            .await
        {
            error!("Unable to add phpbb user {}: {}", username_clean, e);
        }
        (username_clean, password)
    }

    async fn register(
        &self,
        username_clean: &str,
        character_name: &str,
        email: &str,
        password: &str,
        groups: &[String],
        character_id: &str,
    ) -> Result<()> {
        let pwhash = Self::hash_password(password)?;

        if self.check_character(character_name).await? {
            if self.check_user(username_clean).await? {
                let bound_user = self.client.username_by_character(character_name).await?;
                if bound_user.as_deref() == Some(username_clean) {
                    warn!(
                        "The same pair username:character {}:{} already exists. Updating instead.",
                        username_clean, character_name
                    );
                    self.client
                        .update_user_info(email, &pwhash, character_name, username_clean)
                        .await?;
                } else {
                    // Character row belongs to someone else; retire the
                    // conflicting account and rebind the character.
                    self.disable(username_clean, true).await?;
                    self.client
                        .update_user_by_character(email, &pwhash, username_clean, character_name)
                        .await?;
                }
            } else {
                self.client
                    .update_user_by_character(email, &pwhash, username_clean, character_name)
                    .await?;
            }
        } else if self.check_user(username_clean).await? {
            warn!(
                "Unable to add phpbb user {} - already exists. Updating user instead.",
                username_clean
            );
            self.client
                .update_user_info(email, &pwhash, character_name, username_clean)
                .await?;
        } else {
            self.client
                .insert_user(
                    character_name,
                    username_clean,
                    &pwhash,
                    email,
                    DEFAULT_GROUP_ID,
                    Utc::now().timestamp(),
                )
                .await?;
            self.update_groups(username_clean, groups).await?;
            self.set_avatar(username_clean, character_id).await?;
            info!("Added phpbb user {}", username_clean);
        }
        Ok(())
    }

    /// Disable by scrambling the row: random password, revoked email,
    /// optionally a random username, and all sessions/autologin keys
    /// purged. The row itself stays.
    pub async fn disable(&self, username: &str, scramble_username: bool) -> Result<()> {
        let username_clean = Self::clean_username(username);
        debug!("Disabling phpbb user {}", username_clean);

        let Some(user_id) = self.client.user_id(&username_clean).await? else {
            warn!("User {} not found while disabling.", username_clean);
            return Ok(());
        };

        self.update_groups(&username_clean, &[]).await?;

        let new_username = if scramble_username {
            generate_password()
        } else {
            username_clean.clone()
        };
        let pwhash = Self::hash_password(&generate_password())?;
        self.client
            .scramble_user_row(&new_username, &self.revoked_email(), &pwhash, &username_clean)
            .await?;
        self.client.delete_autologin_keys(user_id).await?;
        self.client.delete_sessions(user_id).await?;
        info!("Disabled phpbb user {}", username_clean);
        Ok(())
    }

    /// Converge the user's groups to `groups` (space→hyphen normalized).
    /// Unknown user is a skip, not an error.
    pub async fn update_groups(&self, username: &str, groups: &[String]) -> Result<()> {
        let username_clean = Self::clean_username(username);
        let Some(user_id) = self.client.user_id(&username_clean).await? else {
            warn!(
                "Username {} not found on phpbb. Unable to update groups.",
                username_clean
            );
            return Ok(());
        };
        debug!(
            "Updating phpbb user {} with id {} groups {:?}",
            username_clean, user_id, groups
        );

        let mut forum_groups = self.client.all_groups().await?;
        let actual: HashSet<String> = self
            .client
            .user_group_names(user_id)
            .await?
            .into_iter()
            .collect();
        let desired: HashSet<String> = groups
            .iter()
            .map(|g| Self::normalize_group_name(g))
            .collect();
        let delta: GroupDelta<String> = reconcile::diff(&desired, &actual);

        info!(
            "Updating phpbb user {} groups - adding {:?}, removing {:?}",
            username_clean, delta.to_add, delta.to_remove
        );
        for name in &delta.to_add {
            let group_id = match forum_groups.get(name) {
                Some(&id) => id,
                None => {
                    let id = self.client.create_group(name).await?;
                    forum_groups.insert(name.clone(), id);
                    id
                }
            };
            // Membership changes are independent remote calls; one failing
            // does not roll back the others.
            if let Err(e) = self.add_to_group(user_id, group_id).await {
                warn!(
                    "Unable to add phpbb user id {} to group id {}: {}",
                    user_id, group_id, e
                );
            }
        }
        for name in &delta.to_remove {
            let Some(&group_id) = forum_groups.get(name) else {
                continue;
            };
            if let Err(e) = self.remove_from_group(user_id, group_id).await {
                warn!(
                    "Unable to remove phpbb user id {} from group id {}: {}",
                    user_id, group_id, e
                );
            }
        }
        Ok(())
    }

    async fn add_to_group(&self, user_id: u32, group_id: u32) -> Result<()> {
        self.client.add_user_to_group(user_id, group_id).await?;
        self.client.clear_user_permissions(user_id).await?;
        info!("Added phpbb user id {} to group id {}", user_id, group_id);
        Ok(())
    }

    async fn remove_from_group(&self, user_id: u32, group_id: u32) -> Result<()> {
        self.client.remove_user_from_group(user_id, group_id).await?;
        self.client.clear_user_permissions(user_id).await?;
        info!(
            "Removed phpbb user id {} from group id {}",
            user_id, group_id
        );
        Ok(())
    }

    /// Remove a single group without touching the rest of the membership.
    pub async fn remove_group(&self, username: &str, group: &str) -> Result<()> {
        debug!("Removing phpbb user {} from group {}", username, group);
        let username_clean = Self::clean_username(username);
        let Some(user_id) = self.client.user_id(&username_clean).await? else {
            return Ok(());
        };
        let Some(group_id) = self.client.group_id(group).await? else {
            return Ok(());
        };
        self.client.remove_user_from_group(user_id, group_id).await?;
        info!("Removed phpbb user {} from group {}", username_clean, group);
        Ok(())
    }

    /// Rebind the display character of an account, retiring any account the
    /// character was previously bound to.
    pub async fn update_user_main_char(
        &self,
        username: &str,
        character_name: &str,
        character_id: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        let username_clean = Self::clean_username(username);
        let pwhash = Self::hash_password(password)?;

        if self.check_character(character_name).await? {
            let old_username = self.client.username_by_character(character_name).await?;
            if old_username.as_deref() != Some(username_clean.as_str()) {
                if self.check_user(&username_clean).await? {
                    self.disable(&username_clean, true).await?;
                }
                if let Some(old) = old_username {
                    self.disable(&old, true).await?;
                }
                self.client
                    .update_user_by_character(email, &pwhash, &username_clean, character_name)
                    .await?;
                self.set_avatar(&username_clean, character_id).await?;
            }
        } else {
            self.client
                .update_character(character_name, &username_clean)
                .await?;
            info!(
                "Updated phpbb user {} main character to {}",
                username_clean, character_name
            );
            self.set_avatar(&username_clean, character_id).await?;
        }
        Ok(())
    }

    /// Rotate the account password; `None` generates a fresh one. Returns
    /// the plaintext that was set, or `None` when the user does not exist.
    pub async fn update_user_password(
        &self,
        username: &str,
        character_id: &str,
        password: Option<String>,
    ) -> Result<Option<String>> {
        let username_clean = Self::clean_username(username);
        debug!("Updating phpbb user {} password", username_clean);
        let password = password.unwrap_or_else(generate_password);

        if !self.check_user(&username_clean).await? {
            warn!(
                "Unable to update phpbb user {} password - user not found.",
                username_clean
            );
            return Ok(None);
        }
        let pwhash = Self::hash_password(&password)?;
        self.client.update_password(&pwhash, &username_clean).await?;
        self.set_avatar(&username_clean, character_id).await?;
        info!("Updated phpbb user {} password.", username_clean);
        Ok(Some(password))
    }
}

#[async_trait]
impl GroupSync for Phpbb3Adapter {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn update_groups(&self, user: &str, desired: &[String]) -> Result<()> {
        Phpbb3Adapter::update_groups(self, user, desired).await
    }

    async fn disable_user(&self, user: &str) -> Result<()> {
        self.disable(user, false).await
    }
}
