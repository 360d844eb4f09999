use crate::MediumId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an extent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtentState {
    /// Written but not yet committed with its layout.
    Pending,
    /// Committed and referenced by a layout.
    Sync,
    /// Unreferenced; awaits garbage collection (tape is append-only, so
    /// tape-resident extents are orphaned rather than deleted).
    Orphan,
}

/// A contiguous byte range of an object persisted on a single medium.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExtentInfo {
    pub uuid: Uuid,
    pub state: ExtentState,
    /// Size in bytes of this extent.
    pub size: u64,
    pub medium: MediumId,
    /// Opaque medium-specific path or key, chosen by the IO adapter.
    /// Round-trips byte-for-byte from write to read.
    pub address: String,
    /// Position of this extent within the layout's extent list.
    pub layout_index: u32,
    /// Offset of this extent within the conceptual object.
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_hex")]
    pub md5: Option<[u8; 16]>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_hex")]
    pub xxh128: Option<[u8; 16]>,
}

impl ExtentInfo {
    /// A pending extent about to be written at `offset` on `medium`.
    pub fn pending(medium: MediumId, layout_index: u32, offset: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            state: ExtentState::Pending,
            size: 0,
            medium,
            address: String::new(),
            layout_index,
            offset,
            md5: None,
            xxh128: None,
        }
    }
}

/// 16-byte digests serialize as lowercase hex strings.
mod opt_hex {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<[u8; 16]>, ser: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => ser.serialize_some(&hex::encode(bytes)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<[u8; 16]>, D::Error> {
        let s = Option::<String>::deserialize(de)?;
        match s {
            None => Ok(None),
            Some(s) => {
                let raw = hex::decode(&s).map_err(D::Error::custom)?;
                let arr: [u8; 16] = raw
                    .try_into()
                    .map_err(|_| D::Error::custom("digest must be 16 bytes"))?;
                Ok(Some(arr))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Family;

    #[test]
    fn test_hash_hex_round_trip() {
        let mut extent = ExtentInfo::pending(MediumId::new(Family::Dir, "d1", "legacy"), 0, 0);
        extent.md5 = Some([0xab; 16]);

        let json = serde_json::to_string(&extent).unwrap();
        assert!(json.contains(&"ab".repeat(16)));

        let back: ExtentInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.md5, Some([0xab; 16]));
        assert_eq!(back.xxh128, None);
    }
}
