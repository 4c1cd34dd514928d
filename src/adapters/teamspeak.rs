//! Teamspeak3 adapter.
//!
//! Accounts are never created here: a client registers by connecting to the
//! voice server first, and registration binds their unique identifier.
//! Every operation opens its own serverquery session, mirroring the
//! stateless call pattern of the forums; the group catalog is re-fetched
//! live on each reconciliation rather than cached.

use crate::adapters::GroupSync;
use crate::clients::teamspeak::Ts3Connection;
use crate::config::Teamspeak3Config;
use crate::reconcile::{self, GroupDelta};
use crate::repositories::{TsGroup, TsGroupStore};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SERVICE: &str = "teamspeak3";

/// Serverquery kick-from-server reason id.
const KICK_FROM_SERVER: &str = "5";

/// Permissions granted to every group this adapter creates, so forum staff
/// can manage membership without serveradmin rights.
const GROUP_BOOTSTRAP_PERMS: &[(&str, &str)] = &[
    ("i_group_needed_modify_power", "75"),
    ("i_group_needed_member_add_power", "100"),
    ("i_group_needed_member_remove_power", "100"),
];

/// A successful registration: the nickname that was matched and the unique
/// client identifier now bound to the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ts3Registration {
    pub username: String,
    pub uid: String,
}

pub struct Teamspeak3Adapter {
    config: Teamspeak3Config,
    mirror: Arc<dyn TsGroupStore>,
}

impl Teamspeak3Adapter {
    pub fn new(config: Teamspeak3Config, mirror: Arc<dyn TsGroupStore>) -> Self {
        Self { config, mirror }
    }

    async fn connect(&self) -> Result<Ts3Connection> {
        Ts3Connection::open(&self.config).await
    }

    /// Expand the configured nickname pattern for an identity.
    pub fn generate_nickname(&self, username: &str, corp_ticker: &str) -> String {
        self.config
            .nickname_pattern
            .replace("{corp}", corp_ticker)
            .replace("{name}", username)
    }

    /// Database id for a unique client identifier; `None` when the client
    /// has never connected, which turns group operations into no-ops.
    async fn client_db_id(&self, conn: &mut Ts3Connection, uid: &str) -> Result<Option<String>> {
        debug!("Looking for uid {} on TS3 server.", uid);
        match conn
            .send_command("clientdbfind", &[("pattern", uid)], &["uid"])
            .await
        {
            Ok(records) => Ok(records
                .into_iter()
                .find_map(|r| r.get("cldbid").cloned())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Full server group catalog, name → sgid, fetched live.
    async fn group_list(conn: &mut Ts3Connection) -> Result<HashMap<String, i64>> {
        let records = conn.send_command("servergrouplist", &[], &[]).await?;
        let mut out = HashMap::new();
        for record in records {
            if let (Some(name), Some(sgid)) = (record.get("name"), record.get("sgid")) {
                if let Ok(id) = sgid.parse::<i64>() {
                    out.insert(name.clone(), id);
                }
            }
        }
        Ok(out)
    }

    /// Groups the client currently holds, name → sgid. The server answers
    /// with a single record or a list; the client layer already normalized
    /// that away.
    async fn user_group_list(
        conn: &mut Ts3Connection,
        cldbid: &str,
    ) -> Result<HashMap<String, i64>> {
        let records = conn
            .send_command("servergroupsbyclientid", &[("cldbid", cldbid)], &[])
            .await?;
        let mut out = HashMap::new();
        for record in records {
            if let (Some(name), Some(sgid)) = (record.get("name"), record.get("sgid")) {
                if let Ok(id) = sgid.parse::<i64>() {
                    out.insert(name.clone(), id);
                }
            }
        }
        Ok(out)
    }

    /// Resolve a group name to its sgid, creating the group (with its
    /// bootstrap permissions) when absent. Creation returns the new sgid
    /// directly, so no second catalog fetch is needed.
    async fn resolve_group_id(&self, conn: &mut Ts3Connection, name: &str) -> Result<i64> {
        debug!("Looking for group {} on TS3 server.", name);
        if let Some(&sgid) = Self::group_list(conn).await?.get(name) {
            return Ok(sgid);
        }

        debug!("Group {} does not yet exist. Proceeding with creation.", name);
        let records = conn
            .send_command("servergroupadd", &[("name", name)], &[])
            .await?;
        let sgid_raw = records
            .into_iter()
            .find_map(|r| r.get("sgid").cloned())
            .ok_or_else(|| Error::remote(SERVICE, "servergroupadd returned no sgid"))?;
        let sgid: i64 = sgid_raw
            .parse()
            .map_err(|_| Error::remote(SERVICE, format!("non-numeric sgid {sgid_raw}")))?;

        for (permsid, permvalue) in GROUP_BOOTSTRAP_PERMS {
            conn.send_command(
                "servergroupaddperm",
                &[
                    ("sgid", sgid_raw.as_str()),
                    ("permsid", permsid),
                    ("permvalue", permvalue),
                    ("permnegated", "0"),
                    ("permskip", "0"),
                ],
                &[],
            )
            .await?;
        }
        info!("Created group on TS3 server with name {} and id {}", name, sgid);
        Ok(sgid)
    }

    /// Register a connected client by nickname.
    ///
    /// The client must already be online under the expected nickname;
    /// otherwise the error carries the user-facing message telling them to
    /// join the server first.
    pub async fn add_user(&self, username: &str, corp_ticker: &str) -> Result<Ts3Registration> {
        let nickname = self.generate_nickname(username, corp_ticker);
        let mut conn = self.connect().await?;
        debug!("Search for user on TS3 server with username {}", nickname);
        let clients = conn.send_command("clientlist", &[], &["uid"]).await?;

        match clients
            .iter()
            .find(|c| c.get("client_nickname").map(String::as_str) == Some(nickname.as_str()))
        {
            Some(client) => {
                let uid = client
                    .get("client_unique_identifier")
                    .cloned()
                    .ok_or_else(|| Error::remote(SERVICE, "clientlist record without uid"))?;
                debug!("User {} found on TS3 server", nickname);
                Ok(Ts3Registration {
                    username: nickname,
                    uid,
                })
            }
            None => Err(Error::remote(
                SERVICE,
                format!("User {nickname} not found on TS3 server! Join the server before activate."),
            )),
        }
    }

    /// Re-register a nickname, deactivating the previously bound unique id
    /// if it changed.
    pub async fn reactivate(
        &self,
        username: &str,
        corp_ticker: &str,
        old_uid: &str,
    ) -> Result<Ts3Registration> {
        let registration = self.add_user(username, corp_ticker).await.map_err(|e| {
            if let Error::Remote { message, .. } = &e {
                if message.contains("Join the server") {
                    return Error::remote(
                        SERVICE,
                        format!(
                            "User {} not found on TS3 server! Join the server before reactivate.",
                            self.generate_nickname(username, corp_ticker)
                        ),
                    );
                }
            }
            e
        })?;

        if registration.uid != old_uid && !old_uid.is_empty() {
            info!("Deactivating old UID {}", old_uid);
            self.delete_user(old_uid).await?;
        }
        Ok(registration)
    }

    /// Kick any connected session of the client and strip every group.
    /// An unknown uid counts as already deleted.
    pub async fn delete_user(&self, uid: &str) -> Result<()> {
        let mut conn = self.connect().await?;
        let Some(cldbid) = self.client_db_id(&mut conn, uid).await? else {
            warn!(
                "User with id {} not found on TS3 server. Assuming successful deletion.",
                uid
            );
            return Ok(());
        };
        debug!("Deleting user with database id {} from TS3 server.", cldbid);

        let clients = conn.send_command("clientlist", &[], &[]).await?;
        for client in clients {
            if client.get("client_database_id") == Some(&cldbid) {
                if let Some(clid) = client.get("clid") {
                    debug!("Found user {} on TS3 server - issuing kick.", cldbid);
                    conn.send_command(
                        "clientkick",
                        &[
                            ("clid", clid),
                            ("reasonid", KICK_FROM_SERVER),
                            ("reasonmsg", "Auth service deleted"),
                        ],
                        &[],
                    )
                    .await?;
                }
            }
        }
        self.update_groups(uid, &[]).await
    }

    /// Kick a connected client by nickname. Returns the user-facing outcome
    /// message.
    pub async fn kick_username(&self, username: &str) -> Result<String> {
        let mut conn = self.connect().await?;
        debug!("Trying to kick user {} from TS3 server.", username);
        let clients = conn.send_command("clientlist", &[], &[]).await?;

        let Some(client) = clients
            .iter()
            .find(|c| c.get("client_nickname").map(String::as_str) == Some(username))
        else {
            return Err(Error::remote(
                SERVICE,
                format!("User {username} not found on server."),
            ));
        };
        let clid = client
            .get("clid")
            .ok_or_else(|| Error::remote(SERVICE, "clientlist record without clid"))?;
        conn.send_command(
            "clientkick",
            &[
                ("clid", clid),
                ("reasonid", KICK_FROM_SERVER),
                ("reasonmsg", "Auth service kick request"),
            ],
            &[],
        )
        .await?;
        Ok(format!("User {username} successfully kicked."))
    }

    /// Converge the client's server groups to `desired_names`, creating
    /// missing groups on the way. An unknown uid is a no-op.
    pub async fn update_groups(&self, uid: &str, desired_names: &[String]) -> Result<()> {
        debug!("Updating uid {} TS3 groups {:?}", uid, desired_names);
        let mut conn = self.connect().await?;
        let Some(cldbid) = self.client_db_id(&mut conn, uid).await? else {
            warn!("Uid {} not found on TS3 server. Skipping group update.", uid);
            return Ok(());
        };

        let user_groups = Self::user_group_list(&mut conn, &cldbid).await?;
        let mut desired: HashSet<i64> = HashSet::new();
        for name in desired_names {
            desired.insert(self.resolve_group_id(&mut conn, name).await?);
        }
        let actual: HashSet<i64> = user_groups.values().copied().collect();
        let delta: GroupDelta<i64> = reconcile::diff(&desired, &actual);

        for sgid in &delta.to_add {
            info!("Adding Teamspeak user {} into group {}", cldbid, sgid);
            conn.send_command(
                "servergroupaddclient",
                &[("sgid", &sgid.to_string()), ("cldbid", &cldbid)],
                &[],
            )
            .await?;
        }
        for sgid in &delta.to_remove {
            info!("Removing Teamspeak user {} from group {}", cldbid, sgid);
            conn.send_command(
                "servergroupdelclient",
                &[("sgid", &sgid.to_string()), ("cldbid", &cldbid)],
                &[],
            )
            .await?;
        }
        Ok(())
    }

    /// Bring the local group mirror in line with the server: groups gone
    /// from the server are dropped locally, new ones are inserted.
    pub async fn sync_group_mirror(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        let remote = Self::group_list(&mut conn).await?;
        let remote_ids: HashSet<i64> = remote.values().copied().collect();

        for local in self.mirror.all().await? {
            if !remote_ids.contains(&local.id) {
                debug!(
                    "Local group id {} not found on server. Removing {}.",
                    local.id, local.name
                );
                self.mirror.remove(local.id).await?;
            }
        }
        for (name, id) in remote {
            self.mirror.upsert(TsGroup { id, name }).await?;
        }
        Ok(())
    }

    /// Kick connected clients whose nickname does not match their
    /// registration, or who squat a nickname registered to a different
    /// unique id. The registration list comes from the caller; the
    /// authority that owns it is outside this crate.
    pub async fn enforce_nicknames(&self, registered: &[Ts3Registration]) -> Result<()> {
        let mut conn = self.connect().await?;
        let clients = conn.send_command("clientlist", &[], &["uid"]).await?;

        for client in &clients {
            let (Some(clid), Some(uid), Some(nickname)) = (
                client.get("clid"),
                client.get("client_unique_identifier"),
                client.get("client_nickname"),
            ) else {
                continue;
            };

            let reason = if let Some(reg) = registered.iter().find(|r| &r.uid == uid) {
                (&reg.username != nickname)
                    .then(|| format!("Wrong username. Expecting: {}", reg.username))
            } else {
                registered
                    .iter()
                    .any(|r| &r.username == nickname)
                    .then(|| "Username registered for another unique identifier".to_string())
            };

            if let Some(reasonmsg) = reason {
                info!("Kicking TS3 client {}: {}", nickname, reasonmsg);
                conn.send_command(
                    "clientkick",
                    &[
                        ("clid", clid),
                        ("reasonid", KICK_FROM_SERVER),
                        ("reasonmsg", &reasonmsg),
                    ],
                    &[],
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GroupSync for Teamspeak3Adapter {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn update_groups(&self, user: &str, desired: &[String]) -> Result<()> {
        Teamspeak3Adapter::update_groups(self, user, desired).await
    }

    async fn disable_user(&self, user: &str) -> Result<()> {
        self.delete_user(user).await
    }
}
