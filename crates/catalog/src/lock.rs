use crate::Dss;
use model::{Error, LockInfo, LockOwner, ResourceType, Result};
use time::OffsetDateTime;

impl Dss {
    /// Acquire locks on every key, all-or-nothing. If any key is already
    /// locked by a different owner, nothing is acquired and the call fails
    /// with `-EEXIST`. Re-locking a key already held by `owner` is a no-op.
    pub fn lock(&self, rtype: ResourceType, keys: &[String], owner: &LockOwner) -> Result<()> {
        let mut inner = self.inner();

        for key in keys {
            if let Some(held) = inner.locks.get(&(rtype, key.clone())) {
                if held.owner != *owner {
                    return Err(Error::AlreadyExists(key.clone()));
                }
            }
        }
        let now = OffsetDateTime::now_utc();
        for key in keys {
            inner.locks.entry((rtype, key.clone())).or_insert(LockInfo {
                owner: owner.clone(),
                timestamp: now,
                last_locate: None,
            });
        }
        Ok(())
    }

    /// Release locks. When `owner` is given, ownership is verified:
    /// a missing lock fails with `-ENOLCK`, a lock held by someone else
    /// with `-EACCES`. Passing no owner force-clears (host reconciliation).
    pub fn unlock(
        &self,
        rtype: ResourceType,
        keys: &[String],
        owner: Option<&LockOwner>,
    ) -> Result<()> {
        let mut inner = self.inner();

        if let Some(owner) = owner {
            for key in keys {
                match inner.locks.get(&(rtype, key.clone())) {
                    None => return Err(Error::NoSuchLock(key.clone())),
                    Some(held) if held.owner != *owner => {
                        return Err(Error::LockOwnerMismatch(key.clone()))
                    }
                    Some(_) => (),
                }
            }
        }
        for key in keys {
            inner.locks.remove(&(rtype, key.clone()));
        }
        Ok(())
    }

    /// Refresh lock timestamps with as-much-as-possible semantics: every
    /// lock is attempted, and the first error is returned at the end.
    pub fn refresh_locks(
        &self,
        rtype: ResourceType,
        keys: &[String],
        owner: &LockOwner,
    ) -> Result<()> {
        let mut inner = self.inner();
        let now = OffsetDateTime::now_utc();
        let mut first_err = None;

        for key in keys {
            match inner.locks.get_mut(&(rtype, key.clone())) {
                None => {
                    first_err.get_or_insert(Error::NoSuchLock(key.clone()));
                }
                Some(held) if held.owner != *owner => {
                    first_err.get_or_insert(Error::LockOwnerMismatch(key.clone()));
                }
                Some(held) => held.timestamp = now,
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The hostname holding a lock on (rtype, key), if any. Stamps the
    /// lock's last_locate time as a liveness hint for reconciliation.
    pub fn locate_lock_owner(&self, rtype: ResourceType, key: &str) -> Option<String> {
        let mut inner = self.inner();
        inner.locks.get_mut(&(rtype, key.to_string())).map(|held| {
            held.last_locate = Some(OffsetDateTime::now_utc());
            held.owner.hostname.clone()
        })
    }

    pub fn lock_info(&self, rtype: ResourceType, key: &str) -> Option<LockInfo> {
        self.inner().locks.get(&(rtype, key.to_string())).cloned()
    }

    /// Drop every lock held from `hostname` (owning-host reconciliation
    /// after a crash).
    pub fn clear_host_locks(&self, hostname: &str) -> usize {
        let mut inner = self.inner();
        let before = inner.locks.len();
        inner.locks.retain(|_, held| held.owner.hostname != hostname);
        before - inner.locks.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn owner(host: &str, pid: u32) -> LockOwner {
        LockOwner {
            hostname: host.to_string(),
            pid,
        }
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_or_nothing() {
        let dss = Dss::new();
        let alice = owner("hostA", 1);
        let bob = owner("hostB", 2);

        dss.lock(ResourceType::Medium, &keys(&["m2"]), &bob).unwrap();

        // m1 is free but m2 is bob's: nothing must be acquired.
        let err = dss
            .lock(ResourceType::Medium, &keys(&["m1", "m2"]), &alice)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(dss.lock_info(ResourceType::Medium, "m1").is_none());
    }

    #[test]
    fn test_relock_same_owner_is_noop() {
        let dss = Dss::new();
        let alice = owner("hostA", 1);
        dss.lock(ResourceType::Object, &keys(&["o1"]), &alice)
            .unwrap();
        dss.lock(ResourceType::Object, &keys(&["o1"]), &alice)
            .unwrap();
    }

    #[test]
    fn test_unlock_ownership() {
        let dss = Dss::new();
        let alice = owner("hostA", 1);
        let bob = owner("hostB", 2);
        dss.lock(ResourceType::Medium, &keys(&["m1"]), &alice)
            .unwrap();

        assert!(matches!(
            dss.unlock(ResourceType::Medium, &keys(&["m1"]), Some(&bob)),
            Err(Error::LockOwnerMismatch(_))
        ));
        assert!(matches!(
            dss.unlock(ResourceType::Medium, &keys(&["gone"]), Some(&alice)),
            Err(Error::NoSuchLock(_))
        ));
        dss.unlock(ResourceType::Medium, &keys(&["m1"]), Some(&alice))
            .unwrap();
    }

    #[test]
    fn test_refresh_reports_first_error_but_tries_all() {
        let dss = Dss::new();
        let alice = owner("hostA", 1);
        dss.lock(ResourceType::Medium, &keys(&["m1", "m3"]), &alice)
            .unwrap();

        let before = dss.lock_info(ResourceType::Medium, "m3").unwrap().timestamp;
        let err = dss
            .refresh_locks(ResourceType::Medium, &keys(&["m1", "m2", "m3"]), &alice)
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchLock(_)));

        // m3 was still refreshed despite the earlier miss on m2.
        let after = dss.lock_info(ResourceType::Medium, "m3").unwrap().timestamp;
        assert!(after >= before);
    }

    #[test]
    fn test_locate_stamps_last_locate() {
        let dss = Dss::new();
        let alice = owner("hostA", 1);
        dss.lock(ResourceType::Medium, &keys(&["m1"]), &alice)
            .unwrap();

        assert_eq!(
            dss.locate_lock_owner(ResourceType::Medium, "m1").as_deref(),
            Some("hostA")
        );
        assert!(dss
            .lock_info(ResourceType::Medium, "m1")
            .unwrap()
            .last_locate
            .is_some());
        assert_eq!(dss.locate_lock_owner(ResourceType::Medium, "m2"), None);
    }
}
