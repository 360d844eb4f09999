use crate::{Dss, Filter, Sort};
use model::{Error, ObjectInfo, ObjectScope, Result};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

impl Dss {
    /// Insert a fresh alive object. Fails with `-EEXIST` when an alive row
    /// already carries the oid.
    pub fn insert_object(&self, object: ObjectInfo) -> Result<()> {
        let mut inner = self.inner();
        if inner.alive.contains_key(&object.oid) {
            return Err(Error::AlreadyExists(object.oid));
        }
        inner.alive.insert(object.oid.clone(), object);
        Ok(())
    }

    /// Insert an alive row whose uuid and version are chosen by the caller
    /// (overwrite path). (uuid, version) must be unique across alive and
    /// deprecated tables.
    pub fn full_insert_object(&self, object: ObjectInfo) -> Result<()> {
        let mut inner = self.inner();
        if inner.alive.contains_key(&object.oid) {
            return Err(Error::AlreadyExists(object.oid));
        }
        let clash = inner
            .alive
            .values()
            .chain(inner.deprecated.iter())
            .any(|o| o.uuid == object.uuid && o.version == object.version);
        if clash {
            return Err(Error::AlreadyExists(format!(
                "{}:v{}",
                object.uuid, object.version
            )));
        }
        inner.alive.insert(object.oid.clone(), object);
        Ok(())
    }

    pub fn get_object(&self, oid: &str) -> Result<ObjectInfo> {
        self.try_get_object(oid)
            .ok_or_else(|| Error::NoSuchObject(oid.to_string()))
    }

    pub fn try_get_object(&self, oid: &str) -> Option<ObjectInfo> {
        self.inner().alive.get(oid).cloned()
    }

    /// Fetch one generation by (uuid, version) within the given scope.
    pub fn object_by_uuid_version(
        &self,
        uuid: Uuid,
        version: u32,
        scope: ObjectScope,
    ) -> Option<ObjectInfo> {
        let inner = self.inner();
        let alive = || {
            inner
                .alive
                .values()
                .find(|o| o.uuid == uuid && o.version == version)
        };
        let deprecated = || {
            inner
                .deprecated
                .iter()
                .find(|o| o.uuid == uuid && o.version == version)
        };
        match scope {
            ObjectScope::Alive => alive().cloned(),
            ObjectScope::Deprecated => deprecated().cloned(),
            ObjectScope::All => alive().or_else(deprecated).cloned(),
        }
    }

    /// Move the alive row of `oid` into the deprecated table, stamping its
    /// deprecation time. Returns the deprecated row.
    pub fn move_to_deprecated(&self, oid: &str) -> Result<ObjectInfo> {
        let mut inner = self.inner();
        let mut object = inner
            .alive
            .remove(oid)
            .ok_or_else(|| Error::NoSuchObject(oid.to_string()))?;
        object.deprec_time = Some(OffsetDateTime::now_utc());
        inner.deprecated.push(object.clone());
        Ok(object)
    }

    /// Promote the deprecated (uuid, version) row back into the alive table.
    pub fn promote_deprecated(&self, uuid: Uuid, version: u32) -> Result<ObjectInfo> {
        let mut inner = self.inner();
        let idx = inner
            .deprecated
            .iter()
            .position(|o| o.uuid == uuid && o.version == version)
            .ok_or_else(|| Error::NoSuchObject(uuid.to_string()))?;

        let oid = inner.deprecated[idx].oid.clone();
        if inner.alive.contains_key(&oid) {
            return Err(Error::AlreadyExists(oid));
        }

        let mut object = inner.deprecated.swap_remove(idx);
        object.deprec_time = None;
        inner.alive.insert(object.oid.clone(), object.clone());
        Ok(object)
    }

    pub fn delete_object(&self, oid: &str) -> Result<ObjectInfo> {
        self.inner()
            .alive
            .remove(oid)
            .ok_or_else(|| Error::NoSuchObject(oid.to_string()))
    }

    pub fn delete_deprecated(&self, uuid: Uuid, version: u32) -> Result<ObjectInfo> {
        let mut inner = self.inner();
        let idx = inner
            .deprecated
            .iter()
            .position(|o| o.uuid == uuid && o.version == version)
            .ok_or_else(|| Error::NoSuchObject(uuid.to_string()))?;
        Ok(inner.deprecated.swap_remove(idx))
    }

    /// The alive row carrying `uuid`, if any.
    pub fn alive_by_uuid(&self, uuid: Uuid) -> Option<ObjectInfo> {
        self.inner()
            .alive
            .values()
            .find(|o| o.uuid == uuid)
            .cloned()
    }

    /// Every deprecated generation of `uuid`, most recent version first.
    pub fn deprecated_generations(&self, uuid: Uuid) -> Vec<ObjectInfo> {
        let mut rows: Vec<_> = self
            .inner()
            .deprecated
            .iter()
            .filter(|o| o.uuid == uuid)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        rows
    }

    /// Resolve the uuid behind an oid. When the oid is not alive, every
    /// deprecated generation must agree on one uuid; otherwise the oid is
    /// ambiguous and the caller must pass the uuid explicitly.
    pub fn resolve_uuid(&self, oid: &str, scope: ObjectScope) -> Result<Uuid> {
        let inner = self.inner();

        if scope != ObjectScope::Deprecated {
            if let Some(object) = inner.alive.get(oid) {
                return Ok(object.uuid);
            }
        }
        if scope == ObjectScope::Alive {
            return Err(Error::NoSuchObject(oid.to_string()));
        }

        let mut uuids: Vec<Uuid> = inner
            .deprecated
            .iter()
            .filter(|o| o.oid == oid)
            .map(|o| o.uuid)
            .collect();
        uuids.sort();
        uuids.dedup();

        match uuids.len() {
            0 => Err(Error::NoSuchObject(oid.to_string())),
            1 => Ok(uuids[0]),
            _ => Err(Error::AmbiguousOid(oid.to_string())),
        }
    }

    /// Rename every generation of `uuid` (alive and deprecated) to
    /// `new_oid`, atomically.
    pub fn rename_object(&self, uuid: Uuid, new_oid: &str) -> Result<()> {
        let mut inner = self.inner();

        if let Some(existing) = inner.alive.get(new_oid) {
            if existing.uuid != uuid {
                return Err(Error::AlreadyExists(new_oid.to_string()));
            }
        }

        let alive_key = inner
            .alive
            .iter()
            .find(|(_, o)| o.uuid == uuid)
            .map(|(oid, _)| oid.clone());
        let in_deprecated = inner.deprecated.iter().any(|o| o.uuid == uuid);
        if alive_key.is_none() && !in_deprecated {
            return Err(Error::NoSuchObject(uuid.to_string()));
        }

        if let Some(old_oid) = alive_key {
            let mut object = inner.alive.remove(&old_oid).expect("row was just found");
            object.oid = new_oid.to_string();
            inner.alive.insert(object.oid.clone(), object);
        }
        for object in inner.deprecated.iter_mut().filter(|o| o.uuid == uuid) {
            object.oid = new_oid.to_string();
        }
        Ok(())
    }

    /// Filtered, ordered object listing over the requested scope.
    pub fn list_objects(
        &self,
        filter: Option<&Filter>,
        scope: ObjectScope,
        sort: Option<&Sort>,
    ) -> Result<Vec<ObjectInfo>> {
        let inner = self.inner();
        let rows: Vec<&ObjectInfo> = match scope {
            ObjectScope::Alive => inner.alive.values().collect(),
            ObjectScope::Deprecated => inner.deprecated.iter().collect(),
            ObjectScope::All => inner.alive.values().chain(inner.deprecated.iter()).collect(),
        };

        let mut out = Vec::new();
        for row in rows {
            let projected = project_object(row);
            if let Some(filter) = filter {
                if !filter.matches(&projected)? {
                    continue;
                }
            }
            out.push((row.clone(), projected));
        }
        if let Some(sort) = sort {
            out.sort_by(|(_, a), (_, b)| sort.compare(a, b));
        }
        Ok(out.into_iter().map(|(row, _)| row).collect())
    }
}

pub(crate) fn project_object(object: &ObjectInfo) -> Value {
    json!({
        "oid": object.oid,
        "uuid": object.uuid.to_string(),
        "version": object.version,
        "grouping": object.grouping,
        "user_md": serde_json::to_value(&object.user_md).expect("attr set serializes"),
        "creation_time": object.creation_time.unix_timestamp(),
        "access_time": object.access_time.unix_timestamp(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fields;
    use model::AttrSet;

    fn obj(oid: &str) -> ObjectInfo {
        ObjectInfo::new(oid, AttrSet::new(), None)
    }

    #[test]
    fn test_insert_conflict() {
        let dss = Dss::new();
        dss.insert_object(obj("a")).unwrap();
        assert!(matches!(
            dss.insert_object(obj("a")),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_move_and_promote() {
        let dss = Dss::new();
        let original = obj("a");
        let uuid = original.uuid;
        dss.insert_object(original).unwrap();

        let deprecated = dss.move_to_deprecated("a").unwrap();
        assert!(deprecated.deprec_time.is_some());
        assert!(dss.try_get_object("a").is_none());

        let promoted = dss.promote_deprecated(uuid, 1).unwrap();
        assert_eq!(promoted.uuid, uuid);
        assert!(promoted.deprec_time.is_none());
        assert!(dss.try_get_object("a").is_some());
    }

    #[test]
    fn test_resolve_uuid_ambiguity() {
        let dss = Dss::new();

        // Two distinct uuids both carried "a" at some point in the past.
        dss.insert_object(obj("a")).unwrap();
        dss.move_to_deprecated("a").unwrap();
        dss.insert_object(obj("a")).unwrap();
        dss.move_to_deprecated("a").unwrap();

        assert!(matches!(
            dss.resolve_uuid("a", ObjectScope::All),
            Err(Error::AmbiguousOid(_))
        ));
    }

    #[test]
    fn test_rename_spans_generations() {
        let dss = Dss::new();
        let first = obj("old");
        let uuid = first.uuid;
        dss.insert_object(first).unwrap();
        dss.move_to_deprecated("old").unwrap();

        let mut second = obj("old");
        second.uuid = uuid;
        second.version = 2;
        dss.full_insert_object(second).unwrap();

        dss.rename_object(uuid, "new").unwrap();

        assert!(dss.try_get_object("old").is_none());
        assert_eq!(dss.get_object("new").unwrap().version, 2);
        let generations = dss.deprecated_generations(uuid);
        assert!(generations.iter().all(|o| o.oid == "new"));
    }

    #[test]
    fn test_list_with_filter() {
        let dss = Dss::new();
        let mut md = AttrSet::new();
        md.set("tier", "cold");
        dss.insert_object(ObjectInfo::new("a", md, None)).unwrap();
        dss.insert_object(obj("b")).unwrap();

        let cold = dss
            .list_objects(
                Some(&Filter::kv_in_json(fields::OBJ_USER_MD, "tier", "cold")),
                ObjectScope::Alive,
                None,
            )
            .unwrap();
        assert_eq!(cold.len(), 1);
        assert_eq!(cold[0].oid, "a");
    }
}
