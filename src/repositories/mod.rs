//! Local persisted state.
//!
//! The only record kept on our side of the wire is the Teamspeak3 group
//! mirror, refreshed by a periodic sync job. The trait is the seam for a
//! real persistence layer; the in-memory implementation backs tests and
//! single-process deployments.

pub mod ts_groups;

pub use ts_groups::{InMemoryTsGroupStore, TsGroup, TsGroupStore};
