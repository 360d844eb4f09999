use crate::{AttrSet, ExtentInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The codec-specific plan mapping an object copy's bytes to extents.
///
/// `mod_attrs` carries codec modifiers (replica count, object size); the
/// extent list is ordered by `layout_index`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LayoutInfo {
    pub object_uuid: Uuid,
    pub version: u32,
    pub copy_name: String,
    /// Name of the codec that wrote this layout (e.g. "raid1").
    pub name: String,
    #[serde(default)]
    pub mod_attrs: AttrSet,
    #[serde(default)]
    pub extents: Vec<ExtentInfo>,
}

/// Key of the authoritative object size within `mod_attrs`.
pub const ATTR_OBJECT_SIZE: &str = "object_size";

impl LayoutInfo {
    pub fn ext_count(&self) -> usize {
        self.extents.len()
    }

    /// The authoritative object size recorded at write time, if present.
    pub fn object_size(&self) -> Option<u64> {
        self.mod_attrs.get(ATTR_OBJECT_SIZE)?.parse().ok()
    }
}
