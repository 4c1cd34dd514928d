//! Per-service adapters.
//!
//! Each adapter owns a remote directory client, a name/id resolver and the
//! shared reconciler, and exposes the account lifecycle for one service.
//! The shared contract is [`GroupSync`]; operations whose signatures are
//! inherently service-specific (`add_user` and friends) stay inherent on
//! the concrete adapter.

pub mod discourse;
pub mod phpbb;
pub mod teamspeak;

pub use discourse::DiscourseAdapter;
pub use phpbb::Phpbb3Adapter;
pub use teamspeak::{Teamspeak3Adapter, Ts3Registration};

use crate::Result;
use async_trait::async_trait;

/// The contract every service adapter implements: converge remote group
/// membership to a desired set of names, and revoke access without deleting
/// the remote record.
///
/// Implementations never panic across this boundary; every failure comes
/// back as a typed error. Adapters are `Send + Sync` and tolerate concurrent
/// invocation, but make no atomicity promises between calls.
#[async_trait]
pub trait GroupSync: Send + Sync {
    /// Service identifier used in logs.
    fn service(&self) -> &'static str;

    /// Converge the user's remote groups to `desired`, creating missing
    /// remote groups on the way. An empty `desired` strips every group.
    ///
    /// The user reference is service-specific: a username for the forums, a
    /// unique client identifier for Teamspeak3.
    async fn update_groups(&self, user: &str, desired: &[String]) -> Result<()>;

    /// Revoke access by scrambling credentials/identity and clearing group
    /// membership. No adapter hard-deletes the remote record.
    async fn disable_user(&self, user: &str) -> Result<()>;
}

/// Generated credential: 8 random bytes, hex-encoded to a 16-character
/// password.
pub(crate) fn generate_password() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_sixteen_hex_chars() {
        let password = generate_password();
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_passwords_differ() {
        assert_ne!(generate_password(), generate_password());
    }
}
