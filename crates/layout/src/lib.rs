//! The layout codec plane: the polymorphic contract mapping an object to
//! extents on media, the streaming hasher set, and the RAID1 replication
//! codec with its replica-aware object locator.

use catalog::Dss;
use model::{AttrSet, CopyStatus, ExtentInfo, Family, LayoutInfo, Result};
use std::sync::Arc;
use uuid::Uuid;

mod hash;
pub mod raid1;

pub use hash::{Digests, HashAlgs, HasherSet};
pub use raid1::Raid1Codec;

/// Default IO chunk size when no adapter states a preference.
pub const DEFAULT_BLOCK_SIZE: usize = 64 << 10;

/// One advance of a data processor: scheduler requests to send, and
/// whether the processor reached its terminal condition.
///
/// A processor that emits no requests and is not done is runnable again;
/// one with requests in flight is stepped next when a response arrives.
#[derive(Debug, Default)]
pub struct Step {
    pub requests: Vec<lrs::Request>,
    pub done: bool,
}

impl Step {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn request(req: lrs::Request) -> Self {
        Self {
            requests: vec![req],
            done: false,
        }
    }

    pub fn requests(requests: Vec<lrs::Request>) -> Self {
        Self {
            requests,
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            requests: Vec::new(),
            done: true,
        }
    }
}

/// A cooperative data processor: encoder, decoder or eraser. Each step does
/// a bounded amount of work; suspension points are exactly the step
/// boundaries. The driver serializes steps of one processor.
pub trait Processor: Send {
    /// Advance. `resp` carries a scheduler response dispatched to this
    /// processor, or None for a plain resumption.
    fn step(&mut self, resp: Option<lrs::Response>) -> Result<Step>;

    /// Tear down early: returns the release requests for any held
    /// allocation. The processor is unusable afterwards.
    fn abort(&mut self) -> Vec<lrs::Request>;

    /// The layout a completed encoder produced. Consumed once.
    fn take_layout(&mut self) -> Option<LayoutInfo> {
        None
    }
}

/// What an encoder needs to write one object copy.
pub struct EncodeSpec {
    pub object_uuid: Uuid,
    pub version: u32,
    pub copy_name: String,
    pub size: u64,
    pub family: Family,
    pub library: Option<String>,
    pub grouping: Option<String>,
    pub tags: Vec<String>,
    /// Per-transfer layout parameters, overriding codec defaults.
    pub params: AttrSet,
    /// Refuse allocations that would split the object across media.
    pub no_split: bool,
    pub source: Box<dyn std::io::Read + Send>,
}

/// What a decoder needs to read one object copy back.
pub struct DecodeSpec {
    pub layout: LayoutInfo,
    pub sink: Box<dyn std::io::Write + Send>,
    /// Override of the codec's hash verification setting.
    pub check_hash: Option<bool>,
}

pub struct EraseSpec {
    pub layout: LayoutInfo,
}

/// Outcome of an object location pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateResult {
    /// The host best positioned to serve the object.
    pub hostname: String,
    /// Media locks newly taken on that host's behalf.
    pub nb_new_locks: u32,
}

/// The capability set of a layout codec.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encoder(&self, spec: EncodeSpec) -> Result<Box<dyn Processor>>;

    fn decoder(&self, spec: DecodeSpec) -> Result<Box<dyn Processor>>;

    fn eraser(&self, spec: EraseSpec) -> Result<Box<dyn Processor>>;

    /// Choose the host best positioned to serve `layout` and reserve the
    /// media it needs via catalog locks.
    fn locate(&self, dss: &Dss, layout: &LayoutInfo, focus_host: Option<&str>)
        -> Result<LocateResult>;

    /// Populate an extent's layout placement from the attributes read back
    /// in a metadata-only open, mirroring codec modifiers into `mod_attrs`.
    fn get_specific_attrs(
        &self,
        md: &AttrSet,
        extent: &mut ExtentInfo,
        mod_attrs: &mut AttrSet,
    ) -> Result<()>;

    /// Classify the completeness of a persisted layout.
    fn reconstruct(&self, layout: &LayoutInfo) -> Result<CopyStatus>;
}

lazy_static::lazy_static! {
    static ref CODECS: Vec<Arc<dyn Codec>> = vec![Arc::new(Raid1Codec::default())];
}

/// Look up a codec by its layout name.
pub fn codec(name: &str) -> Result<Arc<dyn Codec>> {
    CODECS
        .iter()
        .find(|c| c.name() == name)
        .cloned()
        .ok_or_else(|| model::Error::InvalidInput(format!("unknown layout '{name}'")))
}

#[cfg(test)]
mod test {
    #[test]
    fn test_codec_registry() {
        assert_eq!(super::codec("raid1").unwrap().name(), "raid1");
        assert!(super::codec("raid6").is_err());
    }
}
