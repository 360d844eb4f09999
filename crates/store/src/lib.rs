//! The object store's client-facing surface: transfer descriptors, the
//! per-batch driver coordinating data processors against the resource
//! scheduler, and the catalog-backed object lifecycle (put, get, getmd,
//! delete, undelete, copy, locate, rename, listings).

use catalog::{Dss, Filter, Sort};
use model::{CopyInfo, Error, ObjectInfo, ObjectScope, Result};
use uuid::Uuid;

mod config;
mod copier;
mod driver;
mod object;
mod xfer;

pub use config::{Profile, StoreConfig};
pub use layout::LocateResult;
pub use xfer::{
    CopyParams, DelParams, GetParams, PutParams, Xfer, XferOp, XferParams, XferTarget,
};

/// Per-target completion handler: the xfer, the target index, and the
/// target's final code as a negated errno (0 = success).
pub type CompletionHandler<'a> = &'a mut dyn FnMut(&Xfer, usize, i32);

/// A handle on the store. Batches run one at a time per handle; distinct
/// handles (or processes) may run concurrently, serialized by catalog
/// locks and the resource scheduler.
pub struct Store {
    cfg: StoreConfig,
    dss: Dss,
}

impl Store {
    pub fn new(cfg: StoreConfig, dss: Dss) -> Self {
        Self { cfg, dss }
    }

    pub fn dss(&self) -> &Dss {
        &self.dss
    }

    /// Bulk object insertion. Each target's input stream provides exactly
    /// `size` bytes (0 is allowed).
    pub async fn put(
        &self,
        xfers: &mut [Xfer],
        handler: Option<CompletionHandler<'_>>,
    ) -> Result<()> {
        self.run_batch(XferOp::Put, xfers, handler).await
    }

    /// Bulk read. With `best_host` set, targets whose best host is not the
    /// local one fail with `-EREMOTE` and only local ones run.
    pub async fn get(
        &self,
        xfers: &mut [Xfer],
        handler: Option<CompletionHandler<'_>>,
    ) -> Result<()> {
        self.run_batch(XferOp::Get, xfers, handler).await
    }

    /// Fetch user metadata without any data IO.
    pub async fn getmd(
        &self,
        xfers: &mut [Xfer],
        handler: Option<CompletionHandler<'_>>,
    ) -> Result<()> {
        self.run_batch(XferOp::GetMd, xfers, handler).await
    }

    /// Soft delete by default; the `hard` flag removes catalog rows and
    /// extents (tape extents are orphaned instead).
    pub async fn delete(&self, xfers: &mut [Xfer]) -> Result<()> {
        self.run_batch(XferOp::Del, xfers, None).await
    }

    /// Promote the most recent deprecated generation back to alive.
    pub async fn undelete(&self, xfers: &mut [Xfer]) -> Result<()> {
        self.run_batch(XferOp::Undel, xfers, None).await
    }

    /// Create another copy of an existing object under a new copy name.
    pub async fn copy(
        &self,
        xfers: &mut [Xfer],
        handler: Option<CompletionHandler<'_>>,
    ) -> Result<()> {
        self.run_batch(XferOp::Copy, xfers, handler).await
    }

    async fn run_batch(
        &self,
        expected: XferOp,
        xfers: &mut [Xfer],
        handler: Option<CompletionHandler<'_>>,
    ) -> Result<()> {
        for xfer in xfers.iter() {
            if xfer.op != expected {
                return Err(Error::InvalidInput(format!(
                    "'{}' transfer in a {expected} batch",
                    xfer.op
                )));
            }
        }

        let driver = driver::Driver {
            dss: &self.dss,
            cfg: &self.cfg,
        };
        let result = driver.run(xfers).await;

        if let Some(handler) = handler {
            for xfer in xfers.iter() {
                for (idx, target) in xfer.targets.iter().enumerate() {
                    handler(xfer, idx, target.rc.unwrap_or(0));
                }
            }
        }
        result
    }

    /// Choose the host best positioned to serve an object and reserve the
    /// media it needs. Exactly one of `oid` / `uuid` selects the object;
    /// `focus_host` defaults to the local hostname.
    pub fn locate(
        &self,
        oid: Option<&str>,
        uuid: Option<Uuid>,
        version: Option<u32>,
        focus_host: Option<&str>,
        copy_name: Option<&str>,
    ) -> Result<LocateResult> {
        let object = match (oid, uuid) {
            (None, None) => {
                return Err(Error::InvalidInput(
                    "locate needs an oid or a uuid".to_string(),
                ))
            }
            (Some(oid), maybe_uuid) => {
                object::resolve_object(&self.dss, oid, maybe_uuid, version, ObjectScope::All)?
            }
            (None, Some(uuid)) => object::resolve_object_uuid(&self.dss, uuid, version)?,
        };

        let copy = object::pick_copy(&self.dss, &object, copy_name)?;
        let layout = self
            .dss
            .get_layout(object.uuid, object.version, &copy.copy_name)?;
        layout::codec(&layout.name)?.locate(&self.dss, &layout, focus_host)
    }

    /// Atomic oid rename across the alive and every deprecated generation
    /// of one uuid.
    pub fn rename(&self, oid: Option<&str>, uuid: Option<Uuid>, new_oid: &str) -> Result<()> {
        object::rename(&self.dss, oid, uuid, new_oid)
    }

    pub fn list_objects(
        &self,
        filter: Option<&Filter>,
        scope: ObjectScope,
        sort: Option<&Sort>,
    ) -> Result<Vec<ObjectInfo>> {
        self.dss.list_objects(filter, scope, sort)
    }

    pub fn list_copies(
        &self,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
    ) -> Result<Vec<CopyInfo>> {
        self.dss.list_copies(filter, sort)
    }
}
