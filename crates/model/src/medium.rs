use serde::{Deserialize, Serialize};

/// Families of storage media.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Dir,
    Tape,
    Rados,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Dir => write!(f, "dir"),
            Family::Tape => write!(f, "tape"),
            Family::Rados => write!(f, "rados"),
        }
    }
}

impl std::str::FromStr for Family {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "dir" => Ok(Family::Dir),
            "tape" => Ok(Family::Tape),
            "rados" => Ok(Family::Rados),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown media family '{other}'"
            ))),
        }
    }
}

/// A medium is uniquely identified by its family, name and owning library.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediumId {
    pub family: Family,
    pub name: String,
    pub library: String,
}

impl MediumId {
    pub fn new(family: Family, name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
            library: library.into(),
        }
    }

    /// The flat key under which this medium is locked and located.
    pub fn lock_key(&self) -> String {
        format!("{}:{}:{}", self.family, self.library, self.name)
    }
}

impl std::fmt::Display for MediumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.family, self.library, self.name)
    }
}

/// Filesystem status of a medium.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FsStatus {
    Blank,
    Empty,
    Used,
    Full,
}

/// Administrative status of a medium or device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    Unlocked,
    Locked,
    Failed,
}

/// Per-operation permissions of a medium.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediumFlags {
    pub put: bool,
    pub get: bool,
    pub delete: bool,
}

impl Default for MediumFlags {
    fn default() -> Self {
        Self {
            put: true,
            get: true,
            delete: true,
        }
    }
}

/// Space accounting of a medium.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub used: u64,
    pub free: u64,
    pub nb_obj: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediumInfo {
    pub id: MediumId,
    /// Cartridge model, for tapes (e.g. "LTO8"). None for other families.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub admin_status: AdminStatus,
    pub fs_status: FsStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stats: MediumStats,
    #[serde(default)]
    pub flags: MediumFlags,
}

/// Which operation a medium is asked to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediumOperation {
    Get,
    Put,
    Delete,
}

impl MediumInfo {
    /// A medium is usable iff it is not administratively locked and its
    /// permission flags allow the requested operation.
    pub fn is_usable(&self, op: MediumOperation) -> bool {
        if self.admin_status != AdminStatus::Unlocked {
            return false;
        }
        match op {
            MediumOperation::Get => self.flags.get,
            MediumOperation::Put => self.flags.put,
            MediumOperation::Delete => self.flags.delete,
        }
    }

    /// Whether the medium carries every tag of `wanted`.
    pub fn has_tags(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|t| self.tags.contains(t))
    }
}

/// A drive or mount point through which a host reaches media of a family.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub family: Family,
    pub host: String,
    pub serial: String,
    /// Drive model, for tape drives. Governs cartridge compatibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub admin_status: AdminStatus,
}

impl DeviceInfo {
    /// Whether this drive can load a cartridge of the given model.
    ///
    /// Compatibility is by model-name match; generation cross-compatibility
    /// tables belong to the TLC and are not consulted here.
    pub fn compatible_with(&self, tape_model: &str) -> bool {
        self.model.as_deref() == Some(tape_model)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_usable_respects_admin_lock_and_flags() {
        let mut medium = MediumInfo {
            id: MediumId::new(Family::Dir, "d1", "legacy"),
            model: None,
            admin_status: AdminStatus::Unlocked,
            fs_status: FsStatus::Used,
            tags: vec![],
            stats: MediumStats::default(),
            flags: MediumFlags::default(),
        };
        assert!(medium.is_usable(MediumOperation::Get));

        medium.flags.get = false;
        assert!(!medium.is_usable(MediumOperation::Get));
        assert!(medium.is_usable(MediumOperation::Put));

        medium.admin_status = AdminStatus::Locked;
        assert!(!medium.is_usable(MediumOperation::Put));
    }

    #[test]
    fn test_family_parse() {
        assert_eq!("tape".parse::<Family>().unwrap(), Family::Tape);
        assert!("floppy".parse::<Family>().is_err());
    }
}
