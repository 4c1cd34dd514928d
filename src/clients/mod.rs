//! Remote directory clients.
//!
//! Thin wrappers around each service's own protocol: authenticated REST for
//! Discourse, direct SQL for phpBB3, the serverquery protocol for
//! Teamspeak3. Everything above this layer works with names, ids and typed
//! errors; nothing above it sees raw responses.

pub mod discourse;
pub mod phpbb;
pub mod teamspeak;

pub use discourse::{DiscourseClient, DiscourseUser};
pub use phpbb::Phpbb3Client;
pub use teamspeak::{QueryRecord, Ts3Connection};

use serde::{Deserialize, Serialize};

/// A group as a remote service reports it. Identity is the remote id; the
/// name is a display key that services truncate or normalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: i64,
    pub name: String,
}
