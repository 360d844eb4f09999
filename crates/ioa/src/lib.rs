//! IO adapters: abstract byte-stream endpoints over a medium.
//!
//! An adapter knows how to open, read, write and delete extents on media of
//! one family, and exposes a per-extent key/value attribute channel used by
//! layout codecs. Addresses are opaque strings chosen by the adapter at
//! write time and round-trip byte-for-byte.

use model::{AttrSet, ExtentInfo, Family, Result};
use std::sync::Arc;

mod dir;
pub use dir::DirAdapter;

/// Capability set of one media family's IO path.
pub trait IoAdapter: Send + Sync {
    fn family(&self) -> Family;

    /// Open an extent for writing under the medium rooted at `root`.
    /// The writer chooses the extent address, readable via
    /// [`ExtentWriter::address`] and persisted by [`ExtentWriter::commit`].
    fn open_put(&self, root: &str, extent: &ExtentInfo) -> Result<Box<dyn ExtentWriter>>;

    /// Open an existing extent for reading.
    fn open_get(&self, root: &str, extent: &ExtentInfo) -> Result<Box<dyn ExtentReader>>;

    /// Metadata-only open: fetch the extent's attributes without data IO.
    fn open_md(&self, root: &str, extent: &ExtentInfo) -> Result<AttrSet>;

    /// Remove an extent and its attributes from the medium.
    fn delete(&self, root: &str, extent: &ExtentInfo) -> Result<()>;
}

/// An extent being written.
pub trait ExtentWriter: Send {
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Stage a key/value attribute; persisted by `commit`.
    fn set_md(&mut self, key: &str, value: &str);

    /// The medium-specific block size this writer prefers, 0 for no
    /// preference.
    fn preferred_block_size(&self) -> usize;

    fn address(&self) -> &str;

    /// Flush data, persist attributes and close durably.
    fn commit(&mut self) -> Result<()>;
}

/// An extent being read.
pub trait ExtentReader: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn size(&self) -> u64;
}

/// Look up the adapter serving a media family.
pub fn adapter_for(family: Family) -> Result<Arc<dyn IoAdapter>> {
    match family {
        Family::Dir => Ok(Arc::new(DirAdapter)),
        Family::Tape | Family::Rados => Err(model::Error::NoDevice(format!(
            "no IO adapter for family '{family}'"
        ))),
    }
}
