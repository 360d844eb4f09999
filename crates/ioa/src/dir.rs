use crate::{ExtentReader, ExtentWriter, IoAdapter};
use model::{AttrSet, Error, ExtentInfo, Family, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// IO adapter for directory media: one file per extent, attributes in a
/// JSON sidecar next to it.
pub struct DirAdapter;

fn extent_path(root: &str, address: &str) -> PathBuf {
    Path::new(root).join(address)
}

fn sidecar_path(root: &str, address: &str) -> PathBuf {
    Path::new(root).join(format!("{address}.md"))
}

impl IoAdapter for DirAdapter {
    fn family(&self) -> Family {
        Family::Dir
    }

    fn open_put(&self, root: &str, extent: &ExtentInfo) -> Result<Box<dyn ExtentWriter>> {
        let address = format!("{}.{}", extent.uuid, extent.layout_index);
        let path = extent_path(root, &address);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        tracing::trace!(root, address, "opened dir extent for write");

        Ok(Box::new(DirWriter {
            file,
            root: root.to_string(),
            address,
            attrs: AttrSet::new(),
            committed: false,
        }))
    }

    fn open_get(&self, root: &str, extent: &ExtentInfo) -> Result<Box<dyn ExtentReader>> {
        let path = extent_path(root, &extent.address);
        let file = File::open(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::NoSuchExtent(extent.uuid),
            _ => Error::Io(err),
        })?;
        let size = file.metadata()?.len();

        Ok(Box::new(DirReader { file, size }))
    }

    fn open_md(&self, root: &str, extent: &ExtentInfo) -> Result<AttrSet> {
        let path = sidecar_path(root, &extent.address);
        let raw = std::fs::read_to_string(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::NoSuchExtent(extent.uuid),
            _ => Error::Io(err),
        })?;
        AttrSet::from_json(&raw)
            .map_err(|_| Error::Integrity(format!("corrupted extent metadata at {path:?}")))
    }

    fn delete(&self, root: &str, extent: &ExtentInfo) -> Result<()> {
        let path = extent_path(root, &extent.address);
        match std::fs::remove_file(&path) {
            Ok(()) => (),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NoSuchExtent(extent.uuid))
            }
            Err(err) => return Err(Error::Io(err)),
        }
        // Sidecar removal is part of the same delete.
        match std::fs::remove_file(sidecar_path(root, &extent.address)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

struct DirWriter {
    file: File,
    root: String,
    address: String,
    attrs: AttrSet,
    committed: bool,
}

impl ExtentWriter for DirWriter {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn set_md(&mut self, key: &str, value: &str) {
        self.attrs.set(key, value);
    }

    fn preferred_block_size(&self) -> usize {
        0 // No preference; the codec default applies.
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn commit(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;

        let sidecar = sidecar_path(&self.root, &self.address);
        let mut md = File::create(&sidecar)?;
        md.write_all(self.attrs.to_json().as_bytes())?;
        md.sync_all()?;

        self.committed = true;
        Ok(())
    }
}

impl Drop for DirWriter {
    fn drop(&mut self) {
        if !self.committed {
            // Uncommitted data files are garbage; best-effort removal.
            let path = extent_path(&self.root, &self.address);
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(?path, %err, "failed to clean uncommitted extent");
            }
        }
    }
}

struct DirReader {
    file: File,
    size: u64,
}

impl ExtentReader for DirReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scratch_extent() -> ExtentInfo {
        ExtentInfo::pending(
            model::MediumId::new(Family::Dir, "d1", "legacy"),
            3,
            0,
        )
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let mut extent = scratch_extent();

        let mut writer = DirAdapter.open_put(root, &extent).unwrap();
        writer.write(b"hello ").unwrap();
        writer.write(b"extent").unwrap();
        writer.set_md("raid1.extent_index", "3");
        writer.commit().unwrap();
        extent.address = writer.address().to_string();
        drop(writer);

        let mut reader = DirAdapter.open_get(root, &extent).unwrap();
        assert_eq!(reader.size(), 12);
        let mut content = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            content.extend_from_slice(&buf[..n]);
        }
        assert_eq!(content, b"hello extent");

        let md = DirAdapter.open_md(root, &extent).unwrap();
        assert_eq!(md.get("raid1.extent_index"), Some("3"));
    }

    #[test]
    fn test_uncommitted_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let extent = scratch_extent();

        let address;
        {
            let mut writer = DirAdapter.open_put(root, &extent).unwrap();
            writer.write(b"partial").unwrap();
            address = writer.address().to_string();
            // Dropped without commit.
        }
        assert!(!extent_path(root, &address).exists());
    }

    #[test]
    fn test_delete_removes_data_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let mut extent = scratch_extent();

        let mut writer = DirAdapter.open_put(root, &extent).unwrap();
        writer.write(b"x").unwrap();
        writer.commit().unwrap();
        extent.address = writer.address().to_string();
        drop(writer);

        DirAdapter.delete(root, &extent).unwrap();
        assert!(!extent_path(root, &extent.address).exists());
        assert!(!sidecar_path(root, &extent.address).exists());
        assert!(matches!(
            DirAdapter.open_get(root, &extent),
            Err(Error::NoSuchExtent(_))
        ));
    }
}
