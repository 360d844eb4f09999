//! The Distributed State Service (DSS) façade: a typed catalog over the
//! store's persistent entities, with filtered queries, ordered listings and
//! an all-or-nothing lock primitive.
//!
//! The catalog is in-process; handles are cheap to clone and share one
//! interior state. Callers own the entity values returned by queries.

use model::{
    CopyInfo, DeviceInfo, ExtentInfo, LayoutInfo, LockInfo, MediumInfo, ObjectInfo, ResourceType,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

mod copies;
mod filter;
mod layouts;
mod lock;
mod media;
mod objects;

pub use filter::{fields, Filter, Sort};

/// A handle on the catalog.
#[derive(Clone, Default)]
pub struct Dss {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Alive objects, at most one per oid.
    alive: BTreeMap<String, ObjectInfo>,
    /// Prior generations and soft-deleted objects, keyed by (uuid, version).
    deprecated: Vec<ObjectInfo>,
    copies: Vec<CopyInfo>,
    layouts: Vec<LayoutInfo>,
    /// Extents no layout references anymore, awaiting garbage collection.
    orphans: Vec<ExtentInfo>,
    media: BTreeMap<String, MediumInfo>,
    devices: Vec<DeviceInfo>,
    locks: BTreeMap<(ResourceType, String), LockInfo>,
}

impl Dss {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("catalog state is never poisoned")
    }
}
