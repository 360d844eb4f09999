use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Kinds of resources the catalog can lock.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Object,
    Medium,
    Device,
}

/// Identity of a lock holder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub hostname: String,
    pub pid: u32,
}

/// A held lock, as returned by catalog queries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub owner: LockOwner,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Last time a locate pass considered this lock, if any.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub last_locate: Option<OffsetDateTime>,
}
