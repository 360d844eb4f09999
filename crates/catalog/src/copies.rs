use crate::{Dss, Filter, Sort};
use model::{CopyInfo, CopyStatus, Error, Result};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

impl Dss {
    pub fn insert_copy(&self, copy: CopyInfo) -> Result<()> {
        let mut inner = self.inner();
        let clash = inner.copies.iter().any(|c| {
            c.object_uuid == copy.object_uuid
                && c.version == copy.version
                && c.copy_name == copy.copy_name
        });
        if clash {
            return Err(Error::AlreadyExists(format!(
                "copy {}:v{}:{}",
                copy.object_uuid, copy.version, copy.copy_name
            )));
        }
        inner.copies.push(copy);
        Ok(())
    }

    pub fn get_copy(&self, uuid: Uuid, version: u32, copy_name: &str) -> Result<CopyInfo> {
        self.inner()
            .copies
            .iter()
            .find(|c| c.object_uuid == uuid && c.version == version && c.copy_name == copy_name)
            .cloned()
            .ok_or_else(|| Error::NoSuchCopy {
                uuid,
                version,
                copy_name: copy_name.to_string(),
            })
    }

    /// Every copy of one object generation.
    pub fn copies_of(&self, uuid: Uuid, version: u32) -> Vec<CopyInfo> {
        self.inner()
            .copies
            .iter()
            .filter(|c| c.object_uuid == uuid && c.version == version)
            .cloned()
            .collect()
    }

    /// The most usable copy of a generation. Incomplete copies cannot serve
    /// reads and are never chosen.
    pub fn best_copy(&self, uuid: Uuid, version: u32) -> Result<CopyInfo> {
        self.copies_of(uuid, version)
            .into_iter()
            .filter(|c| c.status > CopyStatus::Incomplete)
            .max_by_key(|c| c.status)
            .ok_or_else(|| Error::NoSuchCopy {
                uuid,
                version,
                copy_name: "<any readable>".to_string(),
            })
    }

    pub fn set_copy_status(
        &self,
        uuid: Uuid,
        version: u32,
        copy_name: &str,
        status: CopyStatus,
    ) -> Result<()> {
        let mut inner = self.inner();
        let copy = inner
            .copies
            .iter_mut()
            .find(|c| c.object_uuid == uuid && c.version == version && c.copy_name == copy_name)
            .ok_or_else(|| Error::NoSuchCopy {
                uuid,
                version,
                copy_name: copy_name.to_string(),
            })?;
        copy.status = status;
        Ok(())
    }

    pub fn touch_copy(&self, uuid: Uuid, version: u32, copy_name: &str) -> Result<()> {
        let mut inner = self.inner();
        let copy = inner
            .copies
            .iter_mut()
            .find(|c| c.object_uuid == uuid && c.version == version && c.copy_name == copy_name)
            .ok_or_else(|| Error::NoSuchCopy {
                uuid,
                version,
                copy_name: copy_name.to_string(),
            })?;
        copy.access_time = OffsetDateTime::now_utc();
        Ok(())
    }

    pub fn delete_copy(&self, uuid: Uuid, version: u32, copy_name: &str) -> Result<CopyInfo> {
        let mut inner = self.inner();
        let idx = inner
            .copies
            .iter()
            .position(|c| c.object_uuid == uuid && c.version == version && c.copy_name == copy_name)
            .ok_or_else(|| Error::NoSuchCopy {
                uuid,
                version,
                copy_name: copy_name.to_string(),
            })?;
        Ok(inner.copies.swap_remove(idx))
    }

    /// Drop every copy row of `uuid`, across all generations. Returns the
    /// number removed.
    pub fn delete_copies_of_uuid(&self, uuid: Uuid) -> usize {
        let mut inner = self.inner();
        let before = inner.copies.len();
        inner.copies.retain(|c| c.object_uuid != uuid);
        before - inner.copies.len()
    }

    pub fn list_copies(
        &self,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
    ) -> Result<Vec<CopyInfo>> {
        let inner = self.inner();
        let mut out = Vec::new();
        for copy in inner.copies.iter() {
            let projected = project_copy(copy);
            if let Some(filter) = filter {
                if !filter.matches(&projected)? {
                    continue;
                }
            }
            out.push((copy.clone(), projected));
        }
        drop(inner);

        if let Some(sort) = sort {
            out.sort_by(|(_, a), (_, b)| sort.compare(a, b));
        }
        Ok(out.into_iter().map(|(copy, _)| copy).collect())
    }
}

pub(crate) fn project_copy(copy: &CopyInfo) -> Value {
    json!({
        "uuid": copy.object_uuid.to_string(),
        "version": copy.version,
        "copy_name": copy.copy_name,
        "status": serde_json::to_value(copy.status).expect("status serializes"),
        "creation_time": copy.creation_time.unix_timestamp(),
        "access_time": copy.access_time.unix_timestamp(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fields;

    #[test]
    fn test_best_copy_ignores_incomplete() {
        let dss = Dss::new();
        let uuid = Uuid::new_v4();

        dss.insert_copy(CopyInfo::incomplete(uuid, 1, "source"))
            .unwrap();
        assert!(dss.best_copy(uuid, 1).is_err());

        let mut cache = CopyInfo::incomplete(uuid, 1, "cache");
        cache.status = CopyStatus::Readable;
        dss.insert_copy(cache).unwrap();
        assert_eq!(dss.best_copy(uuid, 1).unwrap().copy_name, "cache");

        dss.set_copy_status(uuid, 1, "source", CopyStatus::Complete)
            .unwrap();
        assert_eq!(dss.best_copy(uuid, 1).unwrap().copy_name, "source");
    }

    #[test]
    fn test_duplicate_copy_rejected() {
        let dss = Dss::new();
        let uuid = Uuid::new_v4();
        dss.insert_copy(CopyInfo::incomplete(uuid, 1, "source"))
            .unwrap();
        assert!(dss
            .insert_copy(CopyInfo::incomplete(uuid, 1, "source"))
            .is_err());
    }

    #[test]
    fn test_list_by_status() {
        let dss = Dss::new();
        let uuid = Uuid::new_v4();
        dss.insert_copy(CopyInfo::incomplete(uuid, 1, "source"))
            .unwrap();
        dss.set_copy_status(uuid, 1, "source", CopyStatus::Complete)
            .unwrap();
        dss.insert_copy(CopyInfo::incomplete(uuid, 2, "source"))
            .unwrap();

        let complete = dss
            .list_copies(Some(&Filter::eq(fields::COPY_STATUS, "complete")), None)
            .unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].version, 1);
    }
}
