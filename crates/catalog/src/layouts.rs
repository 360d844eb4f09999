use crate::Dss;
use model::{Error, ExtentInfo, ExtentState, LayoutInfo, Result};
use uuid::Uuid;

impl Dss {
    /// Commit a layout with its extents. Extents flip from pending to sync
    /// as part of the commit.
    pub fn insert_layout(&self, mut layout: LayoutInfo) -> Result<()> {
        let mut inner = self.inner();
        let clash = inner.layouts.iter().any(|l| {
            l.object_uuid == layout.object_uuid
                && l.version == layout.version
                && l.copy_name == layout.copy_name
        });
        if clash {
            return Err(Error::AlreadyExists(format!(
                "layout {}:v{}:{}",
                layout.object_uuid, layout.version, layout.copy_name
            )));
        }
        for extent in layout.extents.iter_mut() {
            extent.state = ExtentState::Sync;
        }
        inner.layouts.push(layout);
        Ok(())
    }

    pub fn get_layout(&self, uuid: Uuid, version: u32, copy_name: &str) -> Result<LayoutInfo> {
        self.inner()
            .layouts
            .iter()
            .find(|l| l.object_uuid == uuid && l.version == version && l.copy_name == copy_name)
            .cloned()
            .ok_or(Error::NoSuchLayout(uuid))
    }

    pub fn layouts_of(&self, uuid: Uuid, version: u32) -> Vec<LayoutInfo> {
        self.inner()
            .layouts
            .iter()
            .filter(|l| l.object_uuid == uuid && l.version == version)
            .cloned()
            .collect()
    }

    /// Every layout of every generation and copy of `uuid`.
    pub fn layouts_for_uuid(&self, uuid: Uuid) -> Vec<LayoutInfo> {
        self.inner()
            .layouts
            .iter()
            .filter(|l| l.object_uuid == uuid)
            .cloned()
            .collect()
    }

    pub fn delete_layout(&self, uuid: Uuid, version: u32, copy_name: &str) -> Result<LayoutInfo> {
        let mut inner = self.inner();
        let idx = inner
            .layouts
            .iter()
            .position(|l| l.object_uuid == uuid && l.version == version && l.copy_name == copy_name)
            .ok_or(Error::NoSuchLayout(uuid))?;
        Ok(inner.layouts.swap_remove(idx))
    }

    /// Record extents as orphans: unreferenced but still physically present
    /// (tape hard-deletes, rollback of partially-written transfers).
    pub fn orphan_extents(&self, extents: impl IntoIterator<Item = ExtentInfo>) {
        let mut inner = self.inner();
        for mut extent in extents {
            extent.state = ExtentState::Orphan;
            inner.orphans.push(extent);
        }
    }

    pub fn orphaned_extents(&self) -> Vec<ExtentInfo> {
        self.inner().orphans.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{AttrSet, Family, MediumId};

    fn layout(uuid: Uuid) -> LayoutInfo {
        let mut extent = ExtentInfo::pending(MediumId::new(Family::Dir, "d1", "legacy"), 0, 0);
        extent.size = 4;
        LayoutInfo {
            object_uuid: uuid,
            version: 1,
            copy_name: "source".to_string(),
            name: "raid1".to_string(),
            mod_attrs: AttrSet::new(),
            extents: vec![extent],
        }
    }

    #[test]
    fn test_commit_flips_extents_to_sync() {
        let dss = Dss::new();
        let uuid = Uuid::new_v4();
        dss.insert_layout(layout(uuid)).unwrap();

        let stored = dss.get_layout(uuid, 1, "source").unwrap();
        assert!(stored
            .extents
            .iter()
            .all(|e| e.state == ExtentState::Sync));
    }

    #[test]
    fn test_orphaning() {
        let dss = Dss::new();
        let uuid = Uuid::new_v4();
        dss.insert_layout(layout(uuid)).unwrap();

        let removed = dss.delete_layout(uuid, 1, "source").unwrap();
        dss.orphan_extents(removed.extents);

        let orphans = dss.orphaned_extents();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].state, ExtentState::Orphan);
    }
}
