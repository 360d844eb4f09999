use crate::Dss;
use model::{AdminStatus, DeviceInfo, Error, Family, MediumId, MediumInfo, Result};

impl Dss {
    pub fn add_medium(&self, medium: MediumInfo) -> Result<()> {
        let mut inner = self.inner();
        let key = medium.id.lock_key();
        if inner.media.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }
        inner.media.insert(key, medium);
        Ok(())
    }

    pub fn get_medium(&self, id: &MediumId) -> Result<MediumInfo> {
        self.inner()
            .media
            .get(&id.lock_key())
            .cloned()
            .ok_or_else(|| Error::NoSuchMedium(id.clone()))
    }

    pub fn list_media(&self, family: Family) -> Vec<MediumInfo> {
        self.inner()
            .media
            .values()
            .filter(|m| m.id.family == family)
            .cloned()
            .collect()
    }

    /// Account bytes written to or erased from a medium, and objects added
    /// or removed.
    pub fn update_medium_stats(&self, id: &MediumId, bytes: i64, nb_obj: i64) -> Result<()> {
        let mut inner = self.inner();
        let medium = inner
            .media
            .get_mut(&id.lock_key())
            .ok_or_else(|| Error::NoSuchMedium(id.clone()))?;
        if bytes >= 0 {
            medium.stats.used = medium.stats.used.saturating_add(bytes as u64);
            medium.stats.free = medium.stats.free.saturating_sub(bytes as u64);
        } else {
            medium.stats.used = medium.stats.used.saturating_sub(bytes.unsigned_abs());
            medium.stats.free = medium.stats.free.saturating_add(bytes.unsigned_abs());
        }
        medium.stats.nb_obj = if nb_obj >= 0 {
            medium.stats.nb_obj.saturating_add(nb_obj as u64)
        } else {
            medium.stats.nb_obj.saturating_sub(nb_obj.unsigned_abs())
        };
        Ok(())
    }

    pub fn add_device(&self, device: DeviceInfo) -> Result<()> {
        let mut inner = self.inner();
        let clash = inner
            .devices
            .iter()
            .any(|d| d.family == device.family && d.serial == device.serial);
        if clash {
            return Err(Error::AlreadyExists(device.serial));
        }
        inner.devices.push(device);
        Ok(())
    }

    /// Administratively unlocked devices of a family.
    pub fn list_unlocked_devices(&self, family: Family) -> Vec<DeviceInfo> {
        self.inner()
            .devices
            .iter()
            .filter(|d| d.family == family && d.admin_status == AdminStatus::Unlocked)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{FsStatus, MediumFlags, MediumStats};

    #[test]
    fn test_stats_accounting() {
        let dss = Dss::new();
        let id = MediumId::new(Family::Dir, "d1", "legacy");
        dss.add_medium(MediumInfo {
            id: id.clone(),
            model: None,
            admin_status: AdminStatus::Unlocked,
            fs_status: FsStatus::Empty,
            tags: vec![],
            stats: MediumStats {
                used: 0,
                free: 100,
                nb_obj: 0,
            },
            flags: MediumFlags::default(),
        })
        .unwrap();

        dss.update_medium_stats(&id, 40, 1).unwrap();
        let medium = dss.get_medium(&id).unwrap();
        assert_eq!(medium.stats.used, 40);
        assert_eq!(medium.stats.free, 60);
        assert_eq!(medium.stats.nb_obj, 1);
    }
}
