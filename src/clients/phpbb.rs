//! phpBB3 database client.
//!
//! The forum has no usable management API, so accounts and memberships are
//! manipulated directly in its schema (`phpbb_users`, `phpbb_groups`,
//! `phpbb_user_group`, `phpbb_sessions`, `phpbb_sessions_keys`) through a
//! pooled MySQL connection. Statements are parameterized; nothing here
//! normalizes names or decides policy, that is the adapter's job.

use crate::config::Phpbb3Config;
use crate::Result;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::collections::HashMap;
use tracing::{debug, info};

const SQL_ADD_USER: &str = "INSERT INTO phpbb_users (username, username_clean, \
     user_password, user_email, group_id, user_regdate, user_permissions, user_sig) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const SQL_UPD_USER: &str =
    "UPDATE phpbb_users SET user_email = ?, user_password = ?, username = ? WHERE username_clean = ?";

const SQL_UPD_CHAR: &str = "UPDATE phpbb_users SET username = ? WHERE username_clean = ?";

const SQL_UPD_USER_BY_CHAR: &str =
    "UPDATE phpbb_users SET user_email = ?, user_password = ?, username_clean = ? WHERE username = ?";

const SQL_DIS_USER: &str =
    "UPDATE phpbb_users SET username_clean = ?, user_email = ?, user_password = ? WHERE username_clean = ?";

const SQL_USER_ID_FROM_USERNAME: &str =
    "SELECT user_id FROM phpbb_users WHERE username_clean = ?";

const SQL_USER_FROM_CHARACTER: &str =
    "SELECT username_clean FROM phpbb_users WHERE username = ?";

const SQL_ADD_USER_GROUP: &str =
    "INSERT INTO phpbb_user_group (group_id, user_id, user_pending) VALUES (?, ?, ?)";

const SQL_GET_GROUP_ID: &str = "SELECT group_id FROM phpbb_groups WHERE group_name = ?";

const SQL_ADD_GROUP: &str =
    "INSERT INTO phpbb_groups (group_name, group_desc, group_legend) VALUES (?, ?, 0)";

const SQL_UPDATE_USER_PASSWORD: &str =
    "UPDATE phpbb_users SET user_password = ? WHERE username_clean = ?";

const SQL_REMOVE_USER_GROUP: &str =
    "DELETE FROM phpbb_user_group WHERE user_id = ? AND group_id = ?";

const SQL_GET_ALL_GROUPS: &str = "SELECT group_id, group_name FROM phpbb_groups";

const SQL_GET_USER_GROUPS: &str = "SELECT phpbb_groups.group_name FROM phpbb_groups, \
     phpbb_user_group WHERE phpbb_user_group.group_id = phpbb_groups.group_id AND user_id = ?";

const SQL_ADD_USER_AVATAR: &str = "UPDATE phpbb_users SET user_avatar_type = 2, \
     user_avatar_width = 128, user_avatar_height = 128, user_avatar = ? WHERE user_id = ?";

const SQL_CLEAR_USER_PERMISSIONS: &str =
    "UPDATE phpbb_users SET user_permissions = '' WHERE user_id = ?";

const SQL_DEL_SESSION: &str = "DELETE FROM phpbb_sessions WHERE session_user_id = ?";

const SQL_DEL_AUTOLOGIN: &str = "DELETE FROM phpbb_sessions_keys WHERE user_id = ?";

pub struct Phpbb3Client {
    pool: MySqlPool,
}

impl Phpbb3Client {
    pub async fn connect(config: &Phpbb3Config) -> Result<Self> {
        debug!("Creating phpbb3 database connection pool");
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.database_url)
            .await?;
        info!("phpbb3 database connection pool established");
        Ok(Self { pool })
    }

    /// Wrap an existing pool; used by tests and callers that manage pooling
    /// themselves.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn user_id(&self, username_clean: &str) -> Result<Option<u32>> {
        let id = sqlx::query_scalar::<_, u32>(SQL_USER_ID_FROM_USERNAME)
            .bind(username_clean)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn username_by_character(&self, character: &str) -> Result<Option<String>> {
        let username = sqlx::query_scalar::<_, String>(SQL_USER_FROM_CHARACTER)
            .bind(character)
            .fetch_optional(&self.pool)
            .await?;
        Ok(username)
    }

    /// The full group catalog, fetched live; phpBB3 membership is cheap
    /// enough to recompute on every reconciliation cycle.
    pub async fn all_groups(&self) -> Result<HashMap<String, u32>> {
        let rows: Vec<(u32, String)> = sqlx::query_as(SQL_GET_ALL_GROUPS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id, name)| (name, id)).collect())
    }

    pub async fn user_group_names(&self, user_id: u32) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(SQL_GET_USER_GROUPS)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    pub async fn create_group(&self, name: &str) -> Result<u32> {
        debug!("Creating phpbb3 group {}", name);
        let result = sqlx::query(SQL_ADD_GROUP)
            .bind(name)
            .bind(name)
            .execute(&self.pool)
            .await?;
        info!("Created phpbb group {}", name);
        Ok(result.last_insert_id() as u32)
    }

    pub async fn group_id(&self, name: &str) -> Result<Option<u32>> {
        let id = sqlx::query_scalar::<_, u32>(SQL_GET_GROUP_ID)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn add_user_to_group(&self, user_id: u32, group_id: u32) -> Result<()> {
        sqlx::query(SQL_ADD_USER_GROUP)
            .bind(group_id)
            .bind(user_id)
            .bind(0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_user_from_group(&self, user_id: u32, group_id: u32) -> Result<()> {
        sqlx::query(SQL_REMOVE_USER_GROUP)
            .bind(user_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Invalidate phpBB's per-user permission cache; required after every
    /// membership change or the forum keeps serving stale ACLs.
    pub async fn clear_user_permissions(&self, user_id: u32) -> Result<()> {
        sqlx::query(SQL_CLEAR_USER_PERMISSIONS)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_user(
        &self,
        username: &str,
        username_clean: &str,
        password_hash: &str,
        email: &str,
        group_id: u32,
        regdate: i64,
    ) -> Result<()> {
        sqlx::query(SQL_ADD_USER)
            .bind(username)
            .bind(username_clean)
            .bind(password_hash)
            .bind(email)
            .bind(group_id)
            .bind(regdate)
            .bind("")
            .bind("")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_user_info(
        &self,
        email: &str,
        password_hash: &str,
        username: &str,
        username_clean: &str,
    ) -> Result<()> {
        sqlx::query(SQL_UPD_USER)
            .bind(email)
            .bind(password_hash)
            .bind(username)
            .bind(username_clean)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_character(&self, username: &str, username_clean: &str) -> Result<()> {
        sqlx::query(SQL_UPD_CHAR)
            .bind(username)
            .bind(username_clean)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_user_by_character(
        &self,
        email: &str,
        password_hash: &str,
        username_clean: &str,
        character: &str,
    ) -> Result<()> {
        sqlx::query(SQL_UPD_USER_BY_CHAR)
            .bind(email)
            .bind(password_hash)
            .bind(username_clean)
            .bind(character)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewrite the identity columns of a row being disabled.
    pub async fn scramble_user_row(
        &self,
        new_username_clean: &str,
        email: &str,
        password_hash: &str,
        username_clean: &str,
    ) -> Result<()> {
        sqlx::query(SQL_DIS_USER)
            .bind(new_username_clean)
            .bind(email)
            .bind(password_hash)
            .bind(username_clean)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_password(&self, password_hash: &str, username_clean: &str) -> Result<()> {
        sqlx::query(SQL_UPDATE_USER_PASSWORD)
            .bind(password_hash)
            .bind(username_clean)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_avatar(&self, avatar_url: &str, user_id: u32) -> Result<()> {
        sqlx::query(SQL_ADD_USER_AVATAR)
            .bind(avatar_url)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_sessions(&self, user_id: u32) -> Result<()> {
        sqlx::query(SQL_DEL_SESSION)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_autologin_keys(&self, user_id: u32) -> Result<()> {
        sqlx::query(SQL_DEL_AUTOLOGIN)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
