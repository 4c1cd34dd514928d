pub mod adapters;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod repositories;

pub use adapters::{DiscourseAdapter, GroupSync, Phpbb3Adapter, Teamspeak3Adapter, Ts3Registration};
pub use cache::{Clock, SnapshotCache, SystemClock};
pub use clients::{DiscourseClient, Phpbb3Client, RemoteGroup, Ts3Connection};
pub use config::{Config, DiscourseConfig, Phpbb3Config, Teamspeak3Config};
pub use error::{Error, Result};
pub use reconcile::{diff, GroupDelta};
pub use repositories::{InMemoryTsGroupStore, TsGroup, TsGroupStore};
