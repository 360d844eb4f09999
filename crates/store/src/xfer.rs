use crate::StoreConfig;
use model::{AttrSet, Error, Family, ObjectScope, Result};
use uuid::Uuid;

/// Operation of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferOp {
    Put,
    Get,
    GetMd,
    Del,
    Undel,
    Copy,
}

impl std::fmt::Display for XferOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            XferOp::Put => "put",
            XferOp::Get => "get",
            XferOp::GetMd => "getmd",
            XferOp::Del => "delete",
            XferOp::Undel => "undelete",
            XferOp::Copy => "copy",
        };
        write!(f, "{name}")
    }
}

/// PUT parameters as provided by the caller; `resolve` folds in the
/// profile and configuration defaults.
#[derive(Debug, Clone, Default)]
pub struct PutParams {
    pub family: Option<Family>,
    pub layout_name: Option<String>,
    /// Per-transfer layout parameters (e.g. "repl_count").
    pub layout_params: AttrSet,
    pub tags: Vec<String>,
    pub profile: Option<String>,
    pub grouping: Option<String>,
    pub library: Option<String>,
    pub copy_name: Option<String>,
    pub overwrite: bool,
    pub no_split: bool,
}

/// PUT parameters after profile and default application.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPut {
    pub family: Family,
    pub layout_name: String,
    pub layout_params: AttrSet,
    pub tags: Vec<String>,
    pub grouping: Option<String>,
    pub library: Option<String>,
    pub copy_name: String,
    pub overwrite: bool,
    pub no_split: bool,
}

impl PutParams {
    pub(crate) fn resolve(&self, cfg: &StoreConfig) -> Result<ResolvedPut> {
        let profile = match &self.profile {
            None => None,
            Some(name) => Some(cfg.profiles.get(name).ok_or_else(|| {
                Error::InvalidInput(format!("unknown profile '{name}'"))
            })?),
        };

        let mut tags = self.tags.clone();
        if let Some(profile) = profile {
            // Profile tags concatenate with explicit ones.
            for tag in &profile.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        Ok(ResolvedPut {
            family: self
                .family
                .or(profile.and_then(|p| p.family))
                .unwrap_or(cfg.default_family),
            layout_name: self
                .layout_name
                .clone()
                .or_else(|| profile.and_then(|p| p.layout.clone()))
                .unwrap_or_else(|| cfg.default_layout.clone()),
            layout_params: self.layout_params.clone(),
            tags,
            grouping: self.grouping.clone(),
            library: self
                .library
                .clone()
                .or_else(|| profile.and_then(|p| p.library.clone())),
            copy_name: self
                .copy_name
                .clone()
                .unwrap_or_else(|| cfg.default_copy_name.clone()),
            overwrite: self.overwrite,
            no_split: self.no_split,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetParams {
    pub copy_name: Option<String>,
    pub scope: ObjectScope,
    /// Redirect to the object's best host, returning `-EREMOTE` when it is
    /// not the local one.
    pub best_host: bool,
    /// Override of the codec's hash verification setting.
    pub check_hash: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DelParams {
    /// Remove catalog rows and extents instead of deprecating.
    pub hard: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CopyParams {
    pub get: GetParams,
    pub put: PutParams,
}

#[derive(Debug, Clone)]
pub enum XferParams {
    Put(PutParams),
    Get(GetParams),
    Del(DelParams),
    Copy(CopyParams),
    None,
}

/// One object within a transfer.
pub struct XferTarget {
    pub oid: String,
    pub uuid: Option<Uuid>,
    pub version: Option<u32>,
    /// Byte source for PUT.
    pub input: Option<Box<dyn std::io::Read + Send>>,
    /// Byte sink for GET.
    pub output: Option<Box<dyn std::io::Write + Send>>,
    pub size: u64,
    /// User metadata: provided on PUT, filled by GETMD.
    pub attrs: AttrSet,
    /// Final result code of this target, as a negated errno (0 = success).
    pub rc: Option<i32>,
}

impl XferTarget {
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            uuid: None,
            version: None,
            input: None,
            output: None,
            size: 0,
            attrs: AttrSet::new(),
            rc: None,
        }
    }

    pub fn with_input(
        mut self,
        input: Box<dyn std::io::Read + Send>,
        size: u64,
    ) -> Self {
        self.input = Some(input);
        self.size = size;
        self
    }

    pub fn with_output(mut self, output: Box<dyn std::io::Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_attrs(mut self, attrs: AttrSet) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }
}

/// A batch element: one operation applied to one or more targets.
pub struct Xfer {
    pub op: XferOp,
    pub params: XferParams,
    pub targets: Vec<XferTarget>,
}

impl Xfer {
    pub fn put(params: PutParams, targets: Vec<XferTarget>) -> Self {
        Self {
            op: XferOp::Put,
            params: XferParams::Put(params),
            targets,
        }
    }

    pub fn get(params: GetParams, targets: Vec<XferTarget>) -> Self {
        Self {
            op: XferOp::Get,
            params: XferParams::Get(params),
            targets,
        }
    }

    pub fn getmd(targets: Vec<XferTarget>) -> Self {
        Self {
            op: XferOp::GetMd,
            params: XferParams::None,
            targets,
        }
    }

    pub fn del(params: DelParams, targets: Vec<XferTarget>) -> Self {
        Self {
            op: XferOp::Del,
            params: XferParams::Del(params),
            targets,
        }
    }

    pub fn undel(targets: Vec<XferTarget>) -> Self {
        Self {
            op: XferOp::Undel,
            params: XferParams::None,
            targets,
        }
    }

    pub fn copy(params: CopyParams, targets: Vec<XferTarget>) -> Self {
        Self {
            op: XferOp::Copy,
            params: XferParams::Copy(params),
            targets,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_profile_resolution() {
        let mut cfg = StoreConfig::new("/run/cellar/lrs.sock");
        cfg.profiles.insert(
            "archive".to_string(),
            crate::Profile {
                family: Some(Family::Tape),
                layout: None,
                library: Some("lib0".to_string()),
                tags: vec!["offsite".to_string()],
            },
        );

        let params = PutParams {
            profile: Some("archive".to_string()),
            tags: vec!["fast".to_string()],
            ..Default::default()
        };
        let resolved = params.resolve(&cfg).unwrap();

        // Explicit fields win; profile fills the rest; tags concatenate.
        assert_eq!(resolved.family, Family::Tape);
        assert_eq!(resolved.layout_name, "raid1");
        assert_eq!(resolved.library.as_deref(), Some("lib0"));
        assert_eq!(resolved.tags, vec!["fast", "offsite"]);
        assert_eq!(resolved.copy_name, "source");

        let explicit = PutParams {
            profile: Some("archive".to_string()),
            family: Some(Family::Dir),
            ..Default::default()
        };
        assert_eq!(explicit.resolve(&cfg).unwrap().family, Family::Dir);

        let unknown = PutParams {
            profile: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(unknown.resolve(&cfg).is_err());
    }
}
