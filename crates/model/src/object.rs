use crate::AttrSet;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One generation of a stored object.
///
/// The same shape serves both catalog tables: the alive table holds at most
/// one row per oid, while the deprecated table may hold any number of prior
/// generations keyed by (uuid, version). `deprec_time` is set on rows living
/// in the deprecated table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub oid: String,
    pub uuid: Uuid,
    pub version: u32,
    #[serde(default)]
    pub user_md: AttrSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub access_time: OffsetDateTime,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub deprec_time: Option<OffsetDateTime>,
}

impl ObjectInfo {
    /// A fresh first-generation object.
    pub fn new(oid: impl Into<String>, user_md: AttrSet, grouping: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            oid: oid.into(),
            uuid: Uuid::new_v4(),
            version: 1,
            user_md,
            grouping,
            creation_time: now,
            access_time: now,
            deprec_time: None,
        }
    }
}

/// Which catalog tables a lookup or listing spans.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectScope {
    #[default]
    Alive,
    Deprecated,
    All,
}
