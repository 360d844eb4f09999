use crate::LocateResult;
use catalog::Dss;
use model::{
    Error, Family, LayoutInfo, LockOwner, MediumId, MediumOperation, ResourceType, Result,
};

/// What one replica of a split offers to a locate pass.
struct ReplicaAccess {
    medium: MediumId,
    usable: bool,
    /// Hostname holding a concurrency lock on the medium, if any.
    locked_by: Option<String>,
    /// Cartridge model, for tape media.
    tape_model: Option<String>,
}

struct SplitAccess {
    replicas: Vec<ReplicaAccess>,
}

/// What one candidate host offers towards serving the object.
struct HostAccess {
    hostname: String,
    /// Models of the administratively unlocked drives this host owns.
    models: Vec<String>,
    nb_locked_splits: u32,
    nb_unreachable_splits: u32,
}

impl HostAccess {
    fn reaches(&self, replica: &ReplicaAccess) -> bool {
        if !replica.usable || replica.locked_by.is_some() {
            return false;
        }
        match &replica.tape_model {
            // A host owning a compatible drive can inherit an unlocked tape.
            Some(model) => self.models.iter().any(|m| m == model),
            // Unlocked dir/rados media are reachable only through an
            // existing lock, by current convention.
            None => false,
        }
    }
}

/// Choose the host best positioned to serve `layout` and early-lock one
/// medium of every split it does not already hold, all-or-nothing.
pub(super) fn locate(
    dss: &Dss,
    layout: &LayoutInfo,
    repl_count: u32,
    focus_host: Option<&str>,
) -> Result<LocateResult> {
    let repl_count = repl_count as usize;
    if layout.extents.is_empty() {
        return Err(Error::NoDevice(format!(
            "object {} has no extents to locate",
            layout.object_uuid
        )));
    }
    if layout.extents.len() % repl_count != 0 {
        return Err(Error::Integrity(format!(
            "layout of object {} has {} extents, not a multiple of {} replicas",
            layout.object_uuid,
            layout.extents.len(),
            repl_count
        )));
    }
    let family = layout.extents[0].medium.family;

    let focus = match focus_host {
        Some(host) => host.to_string(),
        None => model::local_hostname()?,
    };

    // Candidate hosts with their drive-model inventories. The focus host
    // goes first so ties break in its favor.
    let mut hosts = vec![HostAccess {
        hostname: focus,
        models: Vec::new(),
        nb_locked_splits: 0,
        nb_unreachable_splits: 0,
    }];
    for device in dss.list_unlocked_devices(family) {
        match hosts.iter_mut().find(|h| h.hostname == device.host) {
            Some(host) => host.models.extend(device.model),
            None => hosts.push(HostAccess {
                hostname: device.host,
                models: device.model.into_iter().collect(),
                nb_locked_splits: 0,
                nb_unreachable_splits: 0,
            }),
        }
    }

    // Per-split, per-replica access information.
    let split_count = layout.extents.len() / repl_count;
    let mut splits = Vec::with_capacity(split_count);
    for s in 0..split_count {
        let mut replicas = Vec::with_capacity(repl_count);
        let mut locate_errors = 0;
        for extent in &layout.extents[s * repl_count..(s + 1) * repl_count] {
            match dss.get_medium(&extent.medium) {
                Err(err) => {
                    // One lost replica does not fail the pass.
                    tracing::warn!(medium = %extent.medium, %err, "replica cannot be located");
                    locate_errors += 1;
                    replicas.push(ReplicaAccess {
                        medium: extent.medium.clone(),
                        usable: false,
                        locked_by: None,
                        tape_model: None,
                    });
                }
                Ok(info) => replicas.push(ReplicaAccess {
                    medium: extent.medium.clone(),
                    usable: info.is_usable(MediumOperation::Get),
                    locked_by: dss
                        .locate_lock_owner(ResourceType::Medium, &extent.medium.lock_key()),
                    tape_model: (family == Family::Tape).then(|| info.model).flatten(),
                }),
            }
        }
        if locate_errors == repl_count {
            return Err(Error::NoDevice(format!(
                "no replica of split {s} of object {} can be located",
                layout.object_uuid
            )));
        }
        splits.push(SplitAccess { replicas });
    }

    // Count, per host, the splits it already holds and those it cannot
    // reach at all.
    for host in hosts.iter_mut() {
        for split in &splits {
            let locked_here = split
                .replicas
                .iter()
                .any(|r| r.locked_by.as_deref() == Some(host.hostname.as_str()));
            if locked_here {
                host.nb_locked_splits += 1;
                continue;
            }
            if !split.replicas.iter().any(|r| host.reaches(r)) {
                host.nb_unreachable_splits += 1;
            }
        }
    }

    // Greedy two-key choice: fewest unreachable splits, then most splits
    // already locked. Iteration order makes ties favor the focus host.
    let mut best_idx = 0;
    for (idx, host) in hosts.iter().enumerate().skip(1) {
        let best = &hosts[best_idx];
        let better = host.nb_unreachable_splits < best.nb_unreachable_splits
            || (host.nb_unreachable_splits == best.nb_unreachable_splits
                && host.nb_locked_splits > best.nb_locked_splits);
        if better {
            best_idx = idx;
        }
    }
    let best = &hosts[best_idx];
    if best.nb_unreachable_splits > 0 {
        return Err(Error::RetryLater(format!(
            "no host reaches every split of object {} (best '{}' misses {})",
            layout.object_uuid, best.hostname, best.nb_unreachable_splits
        )));
    }

    // Early-lock one medium of every split the chosen host does not
    // already hold. A raced medium falls through to the next replica; a
    // split with nothing lockable rolls the whole pass back.
    let owner = LockOwner {
        hostname: best.hostname.clone(),
        pid: std::process::id(),
    };
    let mut taken: Vec<String> = Vec::new();
    for (s, split) in splits.iter().enumerate() {
        let locked_here = split
            .replicas
            .iter()
            .any(|r| r.locked_by.as_deref() == Some(best.hostname.as_str()));
        if locked_here {
            continue;
        }

        let mut locked = false;
        for replica in split.replicas.iter().filter(|r| best.reaches(r)) {
            let key = replica.medium.lock_key();
            match dss.lock(ResourceType::Medium, std::slice::from_ref(&key), &owner) {
                Ok(()) => {
                    taken.push(key);
                    locked = true;
                    break;
                }
                Err(Error::AlreadyExists(_)) => continue,
                Err(err) => {
                    rollback(dss, &taken, &owner);
                    return Err(err);
                }
            }
        }
        if !locked {
            rollback(dss, &taken, &owner);
            return Err(Error::RetryLater(format!(
                "no medium of split {s} of object {} could be reserved",
                layout.object_uuid
            )));
        }
    }

    tracing::debug!(
        object = %layout.object_uuid,
        hostname = %best.hostname,
        nb_new_locks = taken.len(),
        "object located"
    );
    Ok(LocateResult {
        hostname: best.hostname.clone(),
        nb_new_locks: taken.len() as u32,
    })
}

fn rollback(dss: &Dss, taken: &[String], owner: &LockOwner) {
    for key in taken {
        if let Err(err) = dss.unlock(ResourceType::Medium, std::slice::from_ref(key), Some(owner)) {
            tracing::warn!(key, %err, "failed to roll back an early lock");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{
        AdminStatus, AttrSet, DeviceInfo, ExtentInfo, FsStatus, MediumFlags, MediumInfo,
        MediumStats,
    };
    use uuid::Uuid;

    fn tape_medium(dss: &Dss, name: &str, model: &str) -> MediumId {
        let id = MediumId::new(Family::Tape, name, "legacy");
        dss.add_medium(MediumInfo {
            id: id.clone(),
            model: Some(model.to_string()),
            admin_status: AdminStatus::Unlocked,
            fs_status: FsStatus::Used,
            tags: vec![],
            stats: MediumStats::default(),
            flags: MediumFlags::default(),
        })
        .unwrap();
        id
    }

    fn drive(dss: &Dss, host: &str, serial: &str, model: &str) {
        dss.add_device(DeviceInfo {
            family: Family::Tape,
            host: host.to_string(),
            serial: serial.to_string(),
            model: Some(model.to_string()),
            admin_status: AdminStatus::Unlocked,
        })
        .unwrap();
    }

    fn tape_layout(media: &[MediumId], repl_count: u32) -> LayoutInfo {
        let extents = media
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut e = ExtentInfo::pending(id.clone(), i as u32, 0);
                e.size = 100;
                e
            })
            .collect();
        LayoutInfo {
            object_uuid: Uuid::new_v4(),
            version: 1,
            copy_name: "source".to_string(),
            name: "raid1".to_string(),
            mod_attrs: {
                let mut attrs = AttrSet::new();
                attrs.set(super::super::ATTR_REPL_COUNT, repl_count.to_string());
                attrs.set(model::ATTR_OBJECT_SIZE, "100");
                attrs
            },
            extents,
        }
    }

    #[test]
    fn test_drive_model_compatibility_picks_the_right_host() {
        let dss = Dss::new();
        let t1 = tape_medium(&dss, "t1", "LTO8");
        let t2 = tape_medium(&dss, "t2", "LTO8");
        drive(&dss, "hostA", "drvA", "LTO8");
        drive(&dss, "hostB", "drvB", "LTO7");

        let layout = tape_layout(&[t1, t2], 2);

        // Focus on hostB, which owns no compatible drive: hostA wins and
        // one early lock is taken for it.
        let located = locate(&dss, &layout, 2, Some("hostB")).unwrap();
        assert_eq!(located.hostname, "hostA");
        assert_eq!(located.nb_new_locks, 1);

        // Idempotence: the early lock now counts as held, nothing new.
        let again = locate(&dss, &layout, 2, Some("hostB")).unwrap();
        assert_eq!(again.hostname, "hostA");
        assert_eq!(again.nb_new_locks, 0);
    }

    #[test]
    fn test_focus_host_wins_ties() {
        let dss = Dss::new();
        let t1 = tape_medium(&dss, "t1", "LTO8");
        let t2 = tape_medium(&dss, "t2", "LTO8");
        drive(&dss, "hostA", "drvA", "LTO8");
        drive(&dss, "hostB", "drvB", "LTO8");

        let layout = tape_layout(&[t1, t2], 2);

        let located = locate(&dss, &layout, 2, Some("hostB")).unwrap();
        assert_eq!(located.hostname, "hostB");
    }

    #[test]
    fn test_no_reachable_host_is_retry_later() {
        let dss = Dss::new();
        let t1 = tape_medium(&dss, "t1", "LTO8");
        let t2 = tape_medium(&dss, "t2", "LTO8");
        drive(&dss, "hostA", "drvA", "LTO7");

        let layout = tape_layout(&[t1, t2], 2);
        assert!(matches!(
            locate(&dss, &layout, 2, Some("hostA")),
            Err(Error::RetryLater(_))
        ));
    }

    #[test]
    fn test_unlocatable_split_is_no_device(){
        let dss = Dss::new();
        // Media never registered in the catalog.
        let ghost1 = MediumId::new(Family::Tape, "ghost1", "legacy");
        let ghost2 = MediumId::new(Family::Tape, "ghost2", "legacy");
        drive(&dss, "hostA", "drvA", "LTO8");

        let layout = tape_layout(&[ghost1, ghost2], 2);
        assert!(matches!(
            locate(&dss, &layout, 2, Some("hostA")),
            Err(Error::NoDevice(_))
        ));
    }

    #[test]
    fn test_failed_locate_leaves_no_locks() {
        let dss = Dss::new();
        // Split 0 on t1, split 1 on t2; both single-replica.
        let t1 = tape_medium(&dss, "t1", "LTO8");
        let t2 = tape_medium(&dss, "t2", "LTO8");
        drive(&dss, "hostA", "drvA", "LTO8");

        // Someone else holds split 1's only medium, so no host can reach
        // every split.
        let other = LockOwner {
            hostname: "hostZ".to_string(),
            pid: 1,
        };
        dss.lock(
            ResourceType::Medium,
            std::slice::from_ref(&t2.lock_key()),
            &other,
        )
        .unwrap();

        let mut layout = tape_layout(&[t1.clone(), t2.clone()], 1);
        layout.extents[1].offset = 100;

        assert!(matches!(
            locate(&dss, &layout, 1, Some("hostA")),
            Err(Error::RetryLater(_))
        ));
        // The failed pass must not leave any lock of its own behind.
        assert!(dss
            .lock_info(ResourceType::Medium, &t1.lock_key())
            .is_none());
        assert_eq!(
            dss.lock_info(ResourceType::Medium, &t2.lock_key())
                .unwrap()
                .owner,
            other
        );
    }
}
