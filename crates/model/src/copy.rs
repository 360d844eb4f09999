use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Name given to the copy created by a plain PUT.
pub const DEFAULT_COPY_NAME: &str = "source";

/// Completeness of a copy, ordered from least to most usable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    /// Extents do not cover the object; the copy cannot serve reads.
    Incomplete,
    /// Extents tile the whole object but replication is short.
    Readable,
    /// Every extent of every replica was persisted.
    Complete,
}

/// One named realization of an object's bytes via a specific layout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CopyInfo {
    pub object_uuid: Uuid,
    pub version: u32,
    pub copy_name: String,
    pub status: CopyStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub access_time: OffsetDateTime,
}

impl CopyInfo {
    /// A copy row as inserted before any IO happened.
    pub fn incomplete(object_uuid: Uuid, version: u32, copy_name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            object_uuid,
            version,
            copy_name: copy_name.into(),
            status: CopyStatus::Incomplete,
            creation_time: now,
            access_time: now,
        }
    }
}

#[cfg(test)]
mod test {
    use super::CopyStatus;

    #[test]
    fn test_status_ordering() {
        assert!(CopyStatus::Incomplete < CopyStatus::Readable);
        assert!(CopyStatus::Readable < CopyStatus::Complete);
    }
}
