//! Catalog-side halves of the transfer operations: reservation before IO,
//! commit and rollback after it, and the pure-catalog operations (getmd,
//! soft delete, undelete, rename).

use crate::xfer::ResolvedPut;
use catalog::Dss;
use model::{
    AttrSet, CopyInfo, Error, ExtentInfo, Family, LayoutInfo, ObjectInfo, ObjectScope, Result,
};
use uuid::Uuid;

/// Catalog state created for a PUT before any IO, kept for rollback.
pub(crate) struct PutReservation {
    pub object: ObjectInfo,
    pub copy_name: String,
    /// Generation moved to deprecated by an overwrite, to be promoted back
    /// if the transfer fails.
    pub overwritten_prior: Option<(Uuid, u32)>,
}

/// Insert the object and copy rows a PUT needs. The caller holds the oid
/// lock.
pub(crate) fn reserve_put(
    dss: &Dss,
    oid: &str,
    attrs: &AttrSet,
    params: &ResolvedPut,
) -> Result<PutReservation> {
    let prior = dss.try_get_object(oid);

    let (object, overwritten_prior) = match prior {
        Some(prior) if params.overwrite => {
            // Empty incoming attrs preserve the prior generation's
            // metadata; non-empty attrs replace wholesale.
            let user_md = if attrs.is_empty() {
                prior.user_md.clone()
            } else {
                attrs.clone()
            };
            let now = time::OffsetDateTime::now_utc();
            let object = ObjectInfo {
                oid: oid.to_string(),
                uuid: prior.uuid,
                version: prior.version + 1,
                user_md,
                grouping: params.grouping.clone().or_else(|| prior.grouping.clone()),
                creation_time: now,
                access_time: now,
                deprec_time: None,
            };

            dss.move_to_deprecated(oid)?;
            if let Err(err) = dss.full_insert_object(object.clone()) {
                undo_deprecation(dss, prior.uuid, prior.version);
                return Err(err);
            }
            (object, Some((prior.uuid, prior.version)))
        }
        Some(prior) => return Err(Error::AlreadyExists(prior.oid)),
        None => {
            let object = ObjectInfo::new(oid, attrs.clone(), params.grouping.clone());
            dss.insert_object(object.clone())?;
            (object, None)
        }
    };

    let copy = CopyInfo::incomplete(object.uuid, object.version, params.copy_name.clone());
    if let Err(err) = dss.insert_copy(copy) {
        rollback_put_object(dss, &object, overwritten_prior);
        return Err(err);
    }

    Ok(PutReservation {
        object,
        copy_name: params.copy_name.clone(),
        overwritten_prior,
    })
}

/// Best-effort removal of the catalog rows a failed PUT created, undoing
/// overwrite bookkeeping.
pub(crate) fn rollback_put(dss: &Dss, reservation: &PutReservation) {
    if let Err(err) = dss.delete_copy(
        reservation.object.uuid,
        reservation.object.version,
        &reservation.copy_name,
    ) {
        tracing::warn!(oid = %reservation.object.oid, %err, "rollback: copy row removal failed");
    }
    rollback_put_object(dss, &reservation.object, reservation.overwritten_prior);
}

fn rollback_put_object(dss: &Dss, object: &ObjectInfo, prior: Option<(Uuid, u32)>) {
    if let Err(err) = dss.delete_object(&object.oid) {
        tracing::warn!(oid = %object.oid, %err, "rollback: object row removal failed");
    }
    if let Some((uuid, version)) = prior {
        undo_deprecation(dss, uuid, version);
    }
}

fn undo_deprecation(dss: &Dss, uuid: Uuid, version: u32) {
    if let Err(err) = dss.promote_deprecated(uuid, version) {
        tracing::warn!(%uuid, version, %err, "rollback: prior generation not restored");
    }
}

/// Find the generation a GET or GETMD target names.
///
/// An explicitly requested version may live in the deprecated table even
/// under the default scope; the alive row only answers when it matches.
pub(crate) fn resolve_object(
    dss: &Dss,
    oid: &str,
    uuid: Option<Uuid>,
    version: Option<u32>,
    scope: ObjectScope,
) -> Result<ObjectInfo> {
    if scope != ObjectScope::Deprecated {
        if let Some(object) = dss.try_get_object(oid) {
            let uuid_ok = uuid.map(|u| u == object.uuid).unwrap_or(true);
            let version_ok = version.map(|v| v == object.version).unwrap_or(true);
            if uuid_ok && version_ok {
                return Ok(object);
            }
        }
        if scope == ObjectScope::Alive && version.is_none() && uuid.is_none() {
            return Err(Error::NoSuchObject(oid.to_string()));
        }
    }

    let uuid = match uuid {
        Some(uuid) => uuid,
        None => dss.resolve_uuid(oid, ObjectScope::All)?,
    };
    let generations = dss.deprecated_generations(uuid);
    let found = match version {
        Some(version) => generations.into_iter().find(|o| o.version == version),
        None => generations.into_iter().next(),
    };
    found.ok_or_else(|| Error::NoSuchObject(oid.to_string()))
}

/// Find a generation by uuid alone (locate, rename paths).
pub(crate) fn resolve_object_uuid(
    dss: &Dss,
    uuid: Uuid,
    version: Option<u32>,
) -> Result<ObjectInfo> {
    if let Some(alive) = dss.alive_by_uuid(uuid) {
        if version.map(|v| v == alive.version).unwrap_or(true) {
            return Ok(alive);
        }
    }
    let generations = dss.deprecated_generations(uuid);
    let found = match version {
        Some(version) => generations.into_iter().find(|o| o.version == version),
        None => generations.into_iter().next(),
    };
    found.ok_or_else(|| Error::NoSuchObject(uuid.to_string()))
}

/// The copy a read serves: the named one, or the most usable.
pub(crate) fn pick_copy(
    dss: &Dss,
    object: &ObjectInfo,
    copy_name: Option<&str>,
) -> Result<CopyInfo> {
    match copy_name {
        Some(name) => dss.get_copy(object.uuid, object.version, name),
        None => dss.best_copy(object.uuid, object.version),
    }
}

/// Soft delete: deprecate the alive generation. A uuid living only in the
/// deprecated table cannot be soft-deleted again.
pub(crate) fn soft_delete(dss: &Dss, oid: &str) -> Result<ObjectInfo> {
    dss.get_object(oid)?;
    dss.move_to_deprecated(oid)
}

/// Promote the most recent deprecated generation back to alive.
pub(crate) fn undelete(dss: &Dss, oid: &str, uuid: Option<Uuid>) -> Result<ObjectInfo> {
    let uuid = match uuid {
        Some(uuid) => uuid,
        None => dss.resolve_uuid(oid, ObjectScope::Deprecated)?,
    };
    let generations = dss.deprecated_generations(uuid);
    let latest = generations
        .first()
        .ok_or_else(|| Error::NoSuchObject(uuid.to_string()))?;

    if dss.try_get_object(&latest.oid).is_some() {
        return Err(Error::AlreadyExists(latest.oid.clone()));
    }
    dss.promote_deprecated(uuid, latest.version)
}

/// Everything a hard delete has to take down for one uuid.
pub(crate) struct HardDelPlan {
    pub uuid: Uuid,
    pub layouts: Vec<LayoutInfo>,
}

impl HardDelPlan {
    /// A synthetic layout concatenating every extent of the uuid, fed to
    /// the eraser processor.
    pub(crate) fn erasure_layout(&self) -> LayoutInfo {
        LayoutInfo {
            object_uuid: self.uuid,
            version: 0,
            copy_name: String::new(),
            name: self
                .layouts
                .first()
                .map(|l| l.name.clone())
                .unwrap_or_else(|| "raid1".to_string()),
            mod_attrs: AttrSet::new(),
            extents: self
                .layouts
                .iter()
                .flat_map(|l| l.extents.iter().cloned())
                .collect(),
        }
    }
}

pub(crate) fn prepare_hard_del(dss: &Dss, oid: &str, uuid: Option<Uuid>) -> Result<HardDelPlan> {
    let uuid = match uuid {
        Some(uuid) => uuid,
        None => dss.resolve_uuid(oid, ObjectScope::All)?,
    };
    if dss.alive_by_uuid(uuid).is_none() && dss.deprecated_generations(uuid).is_empty() {
        return Err(Error::NoSuchObject(oid.to_string()));
    }
    Ok(HardDelPlan {
        uuid,
        layouts: dss.layouts_for_uuid(uuid),
    })
}

/// Remove every catalog row of the uuid once its extents were processed.
/// Tape-resident extents outlive their rows as orphans.
pub(crate) fn commit_hard_del(dss: &Dss, plan: &HardDelPlan) {
    for layout in &plan.layouts {
        match dss.delete_layout(layout.object_uuid, layout.version, &layout.copy_name) {
            Ok(removed) => {
                let tape: Vec<ExtentInfo> = removed
                    .extents
                    .into_iter()
                    .filter(|e| e.medium.family == Family::Tape)
                    .collect();
                dss.orphan_extents(tape);
            }
            Err(err) => {
                tracing::warn!(uuid = %plan.uuid, %err, "hard delete: layout row already gone")
            }
        }
    }

    dss.delete_copies_of_uuid(plan.uuid);

    if let Some(alive) = dss.alive_by_uuid(plan.uuid) {
        if let Err(err) = dss.delete_object(&alive.oid) {
            tracing::warn!(uuid = %plan.uuid, %err, "hard delete: alive row already gone");
        }
    }
    for generation in dss.deprecated_generations(plan.uuid) {
        if let Err(err) = dss.delete_deprecated(plan.uuid, generation.version) {
            tracing::warn!(uuid = %plan.uuid, %err, "hard delete: deprecated row already gone");
        }
    }
}

/// Atomic oid rename across the alive and every deprecated generation of
/// one uuid. Exactly one of `oid` / `uuid` selects the object.
pub(crate) fn rename(
    dss: &Dss,
    old_oid: Option<&str>,
    uuid: Option<Uuid>,
    new_oid: &str,
) -> Result<()> {
    let uuid = match (old_oid, uuid) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(Error::InvalidInput(
                "rename needs exactly one of oid and uuid".to_string(),
            ))
        }
        (None, Some(uuid)) => uuid,
        (Some(oid), None) => dss.resolve_uuid(oid, ObjectScope::All)?,
    };
    dss.rename_object(uuid, new_oid)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::StoreConfig;
    use crate::xfer::PutParams;

    fn resolved(cfg: &StoreConfig, overwrite: bool) -> ResolvedPut {
        PutParams {
            overwrite,
            ..Default::default()
        }
        .resolve(cfg)
        .unwrap()
    }

    fn md(entries: &[(&str, &str)]) -> AttrSet {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_put_reservation_and_overwrite() {
        let dss = Dss::new();
        let cfg = StoreConfig::new("/tmp/lrs.sock");

        let first = reserve_put(&dss, "x", &md(&[("k", "v1")]), &resolved(&cfg, false)).unwrap();
        assert_eq!(first.object.version, 1);
        assert!(dss.get_copy(first.object.uuid, 1, "source").is_ok());

        // Plain re-PUT conflicts.
        assert!(matches!(
            reserve_put(&dss, "x", &AttrSet::new(), &resolved(&cfg, false)),
            Err(Error::AlreadyExists(_))
        ));

        // Overwrite bumps the version, keeps the uuid, deprecates v1.
        let second = reserve_put(&dss, "x", &md(&[("k", "v2")]), &resolved(&cfg, true)).unwrap();
        assert_eq!(second.object.uuid, first.object.uuid);
        assert_eq!(second.object.version, 2);
        assert_eq!(second.overwritten_prior, Some((first.object.uuid, 1)));
        assert_eq!(dss.deprecated_generations(first.object.uuid).len(), 1);
    }

    #[test]
    fn test_overwrite_with_empty_attrs_preserves_user_md() {
        let dss = Dss::new();
        let cfg = StoreConfig::new("/tmp/lrs.sock");

        reserve_put(&dss, "x", &md(&[("k", "v1")]), &resolved(&cfg, false)).unwrap();
        let second = reserve_put(&dss, "x", &AttrSet::new(), &resolved(&cfg, true)).unwrap();
        assert_eq!(second.object.user_md.get("k"), Some("v1"));
    }

    #[test]
    fn test_rollback_restores_prior_generation() {
        let dss = Dss::new();
        let cfg = StoreConfig::new("/tmp/lrs.sock");

        let first = reserve_put(&dss, "x", &md(&[("k", "v1")]), &resolved(&cfg, false)).unwrap();
        let second = reserve_put(&dss, "x", &AttrSet::new(), &resolved(&cfg, true)).unwrap();

        rollback_put(&dss, &second);

        let alive = dss.get_object("x").unwrap();
        assert_eq!(alive.version, 1);
        assert_eq!(alive.uuid, first.object.uuid);
        assert!(dss.deprecated_generations(first.object.uuid).is_empty());
        assert!(dss.get_copy(first.object.uuid, 2, "source").is_err());
    }

    #[test]
    fn test_soft_delete_and_undelete() {
        let dss = Dss::new();
        let cfg = StoreConfig::new("/tmp/lrs.sock");

        let put = reserve_put(&dss, "x", &AttrSet::new(), &resolved(&cfg, false)).unwrap();
        soft_delete(&dss, "x").unwrap();
        assert!(dss.try_get_object("x").is_none());

        // Deprecated-only objects cannot be soft-deleted again.
        assert!(matches!(
            soft_delete(&dss, "x"),
            Err(Error::NoSuchObject(_))
        ));

        let restored = undelete(&dss, "x", None).unwrap();
        assert_eq!(restored.uuid, put.object.uuid);
        assert!(dss.try_get_object("x").is_some());

        // A second undelete has nothing left to promote.
        assert!(undelete(&dss, "x", None).is_err());
    }

    #[test]
    fn test_resolve_versioned_get_reaches_deprecated() {
        let dss = Dss::new();
        let cfg = StoreConfig::new("/tmp/lrs.sock");

        let first = reserve_put(&dss, "x", &md(&[("k", "v1")]), &resolved(&cfg, false)).unwrap();
        reserve_put(&dss, "x", &AttrSet::new(), &resolved(&cfg, true)).unwrap();

        let v1 = resolve_object(&dss, "x", None, Some(1), ObjectScope::Alive).unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.uuid, first.object.uuid);

        let latest = resolve_object(&dss, "x", None, None, ObjectScope::Alive).unwrap();
        assert_eq!(latest.version, 2);
    }

    #[test]
    fn test_rename_input_validation() {
        let dss = Dss::new();
        assert!(matches!(
            rename(&dss, None, None, "y"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            rename(&dss, Some("x"), Some(Uuid::new_v4()), "y"),
            Err(Error::InvalidInput(_))
        ));
    }
}
