//! The RAID1 replication codec: each split of the object is written as
//! `repl_count` byte-identical extents on distinct media, with per-split
//! content digests verified on read.

use crate::{Codec, DecodeSpec, EncodeSpec, EraseSpec, HashAlgs, LocateResult, Processor};
use catalog::Dss;
use model::{AttrSet, CopyStatus, Error, ExtentInfo, LayoutInfo, Result};

mod decode;
mod encode;
mod erase;
mod locate;

/// Layout name under which this codec registers.
pub const LAYOUT_NAME: &str = "raid1";

/// Per-extent attribute keys stamped through the IO adapter's channel.
pub const ATTR_EXTENT_INDEX: &str = "raid1.extent_index";
pub const ATTR_REPL_COUNT: &str = "raid1.repl_count";
/// Layouts written before the codec prefix carried a bare key.
pub const ATTR_REPL_COUNT_LEGACY: &str = "repl_count";

/// Codec configuration, resolved from build defaults and per-transfer
/// layout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raid1Config {
    pub repl_count: u32,
    pub extent_md5: bool,
    pub extent_xxh128: bool,
    pub check_hash: bool,
}

impl Default for Raid1Config {
    fn default() -> Self {
        Self {
            repl_count: 2,
            extent_md5: true,
            extent_xxh128: true,
            check_hash: true,
        }
    }
}

impl Raid1Config {
    /// Apply per-transfer parameter overrides. An empty set keeps the
    /// defaults.
    pub fn with_params(mut self, params: &AttrSet) -> Result<Self> {
        if let Some(raw) = params.get(ATTR_REPL_COUNT_LEGACY) {
            self.repl_count = parse_repl_count(raw)?;
        }
        if let Some(raw) = params.get("extent_md5") {
            self.extent_md5 = parse_bool("extent_md5", raw)?;
        }
        if let Some(raw) = params.get("extent_xxh128") {
            self.extent_xxh128 = parse_bool("extent_xxh128", raw)?;
        }
        if let Some(raw) = params.get("check_hash") {
            self.check_hash = parse_bool("check_hash", raw)?;
        }
        Ok(self)
    }

    pub fn hash_algs(&self) -> HashAlgs {
        HashAlgs {
            md5: self.extent_md5,
            xxh128: self.extent_xxh128,
        }
    }
}

fn parse_repl_count(raw: &str) -> Result<u32> {
    match raw.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(Error::InvalidInput(format!(
            "invalid replica count '{raw}'"
        ))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(Error::InvalidInput(format!(
            "'{key}' must be 'yes' or 'no', got '{other}'"
        ))),
    }
}

/// The replica count a persisted layout was written with.
pub fn repl_count_of(layout: &LayoutInfo) -> Result<u32> {
    let raw = layout
        .mod_attrs
        .get(ATTR_REPL_COUNT)
        .or_else(|| layout.mod_attrs.get(ATTR_REPL_COUNT_LEGACY))
        .ok_or_else(|| {
            Error::Integrity(format!(
                "layout of object {} lacks a replica count",
                layout.object_uuid
            ))
        })?;
    parse_repl_count(raw)
}

#[derive(Default)]
pub struct Raid1Codec {
    pub defaults: Raid1Config,
}

impl Codec for Raid1Codec {
    fn name(&self) -> &'static str {
        LAYOUT_NAME
    }

    fn encoder(&self, spec: EncodeSpec) -> Result<Box<dyn Processor>> {
        let cfg = self.defaults.with_params(&spec.params)?;
        Ok(Box::new(encode::Raid1Encoder::new(cfg, spec)))
    }

    fn decoder(&self, spec: DecodeSpec) -> Result<Box<dyn Processor>> {
        let check_hash = spec.check_hash.unwrap_or(self.defaults.check_hash);
        Ok(Box::new(decode::Raid1Decoder::new(spec, check_hash)?))
    }

    fn eraser(&self, spec: EraseSpec) -> Result<Box<dyn Processor>> {
        Ok(Box::new(erase::Raid1Eraser::new(spec.layout)))
    }

    fn locate(
        &self,
        dss: &Dss,
        layout: &LayoutInfo,
        focus_host: Option<&str>,
    ) -> Result<LocateResult> {
        let repl_count = repl_count_of(layout)?;
        locate::locate(dss, layout, repl_count, focus_host)
    }

    fn get_specific_attrs(
        &self,
        md: &AttrSet,
        extent: &mut ExtentInfo,
        mod_attrs: &mut AttrSet,
    ) -> Result<()> {
        let index = md.get(ATTR_EXTENT_INDEX).ok_or_else(|| {
            Error::Integrity(format!("extent {} lacks its layout index", extent.uuid))
        })?;
        let repl_count = md.get(ATTR_REPL_COUNT).ok_or_else(|| {
            Error::Integrity(format!("extent {} lacks its replica count", extent.uuid))
        })?;

        extent.layout_index = index.parse().map_err(|_| {
            Error::Integrity(format!(
                "extent {} has a malformed layout index '{index}'",
                extent.uuid
            ))
        })?;
        parse_repl_count(repl_count)?;
        mod_attrs.set(ATTR_REPL_COUNT, repl_count);
        Ok(())
    }

    fn reconstruct(&self, layout: &LayoutInfo) -> Result<CopyStatus> {
        let repl_count = repl_count_of(layout)?;
        let object_size = layout.object_size().ok_or_else(|| {
            Error::Integrity(format!(
                "layout of object {} lacks an object size",
                layout.object_uuid
            ))
        })?;

        let total: u64 = layout.extents.iter().map(|e| e.size).sum();
        if total == repl_count as u64 * object_size {
            return Ok(CopyStatus::Complete);
        }

        // Walk from offset zero, following extents that tile the object
        // without gaps; reaching object_size means one full replica chain
        // exists.
        let mut covered = 0u64;
        while covered < object_size {
            match layout
                .extents
                .iter()
                .find(|e| e.offset == covered && e.size > 0)
            {
                Some(extent) => covered += extent.size,
                None => return Ok(CopyStatus::Incomplete),
            }
        }
        Ok(CopyStatus::Readable)
    }
}

/// Build the mod_attrs persisted with a freshly encoded layout.
pub(crate) fn layout_mod_attrs(repl_count: u32, object_size: u64) -> AttrSet {
    let mut attrs = AttrSet::new();
    attrs.set(ATTR_REPL_COUNT, repl_count.to_string());
    attrs.set(model::ATTR_OBJECT_SIZE, object_size.to_string());
    attrs
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{Family, MediumId};
    use uuid::Uuid;

    fn layout_with(repl_count: u32, object_size: u64, extents: Vec<ExtentInfo>) -> LayoutInfo {
        LayoutInfo {
            object_uuid: Uuid::new_v4(),
            version: 1,
            copy_name: "source".to_string(),
            name: LAYOUT_NAME.to_string(),
            mod_attrs: layout_mod_attrs(repl_count, object_size),
            extents,
        }
    }

    fn extent(index: u32, offset: u64, size: u64) -> ExtentInfo {
        let mut e = ExtentInfo::pending(MediumId::new(Family::Dir, "d1", "legacy"), index, offset);
        e.size = size;
        e
    }

    #[test]
    fn test_config_overrides() {
        let mut params = AttrSet::new();
        params.set("repl_count", "3");
        params.set("check_hash", "no");

        let cfg = Raid1Config::default().with_params(&params).unwrap();
        assert_eq!(cfg.repl_count, 3);
        assert!(!cfg.check_hash);
        assert!(cfg.extent_md5);

        let mut bad = AttrSet::new();
        bad.set("repl_count", "0");
        assert!(Raid1Config::default().with_params(&bad).is_err());

        let mut bad = AttrSet::new();
        bad.set("check_hash", "maybe");
        assert!(Raid1Config::default().with_params(&bad).is_err());
    }

    #[test]
    fn test_repl_count_legacy_key() {
        let mut layout = layout_with(2, 10, vec![]);
        layout.mod_attrs.remove(ATTR_REPL_COUNT);
        layout.mod_attrs.set(ATTR_REPL_COUNT_LEGACY, "2");
        assert_eq!(repl_count_of(&layout).unwrap(), 2);

        layout.mod_attrs.remove(ATTR_REPL_COUNT_LEGACY);
        assert!(repl_count_of(&layout).is_err());
    }

    #[test]
    fn test_reconstruct_complete() {
        let layout = layout_with(
            2,
            10,
            vec![extent(0, 0, 10), extent(1, 0, 10)],
        );
        assert_eq!(
            Raid1Codec::default().reconstruct(&layout).unwrap(),
            CopyStatus::Complete
        );
    }

    #[test]
    fn test_reconstruct_readable_with_one_replica_chain() {
        // Two splits; the second split lost one replica.
        let layout = layout_with(
            2,
            10,
            vec![
                extent(0, 0, 6),
                extent(1, 0, 6),
                extent(2, 6, 4),
            ],
        );
        assert_eq!(
            Raid1Codec::default().reconstruct(&layout).unwrap(),
            CopyStatus::Readable
        );
    }

    #[test]
    fn test_reconstruct_incomplete_on_gap() {
        let layout = layout_with(2, 10, vec![extent(0, 0, 6)]);
        assert_eq!(
            Raid1Codec::default().reconstruct(&layout).unwrap(),
            CopyStatus::Incomplete
        );
    }

    #[test]
    fn test_specific_attrs_round_trip() {
        let codec = Raid1Codec::default();
        let mut md = AttrSet::new();
        md.set(ATTR_EXTENT_INDEX, "5");
        md.set(ATTR_REPL_COUNT, "3");

        let mut ext = extent(0, 0, 4);
        let mut mod_attrs = AttrSet::new();
        codec
            .get_specific_attrs(&md, &mut ext, &mut mod_attrs)
            .unwrap();
        assert_eq!(ext.layout_index, 5);
        assert_eq!(mod_attrs.get(ATTR_REPL_COUNT), Some("3"));

        md.remove(ATTR_REPL_COUNT);
        assert!(matches!(
            codec.get_specific_attrs(&md, &mut ext, &mut mod_attrs),
            Err(Error::Integrity(_))
        ));
    }
}
