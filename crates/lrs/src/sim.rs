//! A single-node in-process scheduler serving the wire contract.
//!
//! It arbitrates directory media only: no drive lifecycle, no mount or
//! format paths. Tests and dev deployments point a transfer driver's socket
//! at it; production deployments replace it with the real daemon.

use crate::{
    frame, MediumGrant, ReleaseKind, Request, RequestBody, Response, ResponseBody, SchedError,
    SplitGrant,
};
use catalog::Dss;
use model::{ExtentInfo, Family, MediumId, MediumOperation, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::UnixListener;

struct SimMedium {
    root: String,
    capacity: u64,
    used: u64,
    reserved: bool,
}

pub struct Scheduler {
    dss: Dss,
    media: Mutex<HashMap<String, (MediumId, SimMedium)>>,
}

impl Scheduler {
    pub fn new(dss: Dss) -> Arc<Self> {
        Arc::new(Self {
            dss,
            media: Mutex::new(HashMap::new()),
        })
    }

    /// Register a directory medium backed by `root`, with a byte capacity
    /// the scheduler enforces on write grants.
    pub fn add_dir_medium(&self, id: MediumId, root: impl Into<String>, capacity: u64) {
        let mut media = self.media.lock().expect("sim state is never poisoned");
        media.insert(
            id.lock_key(),
            (
                id,
                SimMedium {
                    root: root.into(),
                    capacity,
                    used: 0,
                    reserved: false,
                },
            ),
        );
    }

    /// Accept loop. Runs until the listener errors or the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) -> Result<()> {
        loop {
            let (stream, _addr) = listener
                .accept()
                .await
                .map_err(|err| model::Error::Transport(format!("accepting: {err}")))?;
            let sched = self.clone();
            tokio::spawn(async move {
                if let Err(err) = sched.handle_conn(stream).await {
                    tracing::debug!(%err, "scheduler connection ended");
                }
            });
        }
    }

    async fn handle_conn(&self, stream: tokio::net::UnixStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        while let Some(req) = frame::recv_msg::<Request, _>(&mut reader).await? {
            tracing::trace!(req.id, "scheduler request");
            let resp = self.handle(req);
            frame::send_msg(&mut writer, &resp).await?;
        }
        Ok(())
    }

    fn handle(&self, req: Request) -> Response {
        let body = match req.body {
            RequestBody::WriteAlloc(alloc) => self.write_alloc(alloc),
            RequestBody::ReadAlloc(alloc) => self.read_alloc(alloc),
            RequestBody::Release(release) => self.release(release),
            RequestBody::Erase(erase) => self.erase(erase),
            RequestBody::Ping => ResponseBody::Pong,
        };
        Response { id: req.id, body }
    }

    fn write_alloc(&self, alloc: crate::WriteAlloc) -> ResponseBody {
        if alloc.family != Family::Dir {
            return sched_error(
                -libc::ENODEV,
                false,
                format!("family '{}' is not served by this scheduler", alloc.family),
            );
        }

        let mut media = self.media.lock().expect("sim state is never poisoned");
        let mut any_of_family = false;
        let mut busy = 0usize;

        // Candidates with the requested tags and put permission, most free
        // space first.
        let mut keys: Vec<(String, u64)> = Vec::new();
        for (key, (id, medium)) in media.iter() {
            if let Some(library) = &alloc.library {
                if id.library != *library {
                    continue;
                }
            }
            any_of_family = true;
            if medium.reserved {
                busy += 1;
                continue;
            }
            let free = medium.capacity.saturating_sub(medium.used);
            if free == 0 {
                continue;
            }
            match self.dss.get_medium(id) {
                Ok(info) if info.is_usable(MediumOperation::Put) && info.has_tags(&alloc.tags) => {}
                _ => continue,
            }
            keys.push((key.clone(), free));
        }
        keys.sort_by(|a, b| b.1.cmp(&a.1));

        if keys.len() < alloc.n_media as usize {
            if !any_of_family {
                return sched_error(-libc::ENODEV, false, "no medium of the family".to_string());
            }
            if busy > 0 {
                return sched_error(
                    -libc::EAGAIN,
                    true,
                    "eligible media are allocated elsewhere".to_string(),
                );
            }
            return sched_error(
                -libc::ENOSPC,
                false,
                "not enough media with free space".to_string(),
            );
        }

        let mut grants = Vec::with_capacity(alloc.n_media as usize);
        for (key, free) in keys.into_iter().take(alloc.n_media as usize) {
            let (id, medium) = media.get_mut(&key).expect("key was just listed");
            medium.reserved = true;
            grants.push(MediumGrant {
                medium: id.clone(),
                root: medium.root.clone(),
                block_size: 0,
                avail: free.min(alloc.size_hint.max(1)),
            });
        }
        ResponseBody::WriteAlloc { media: grants }
    }

    fn read_alloc(&self, alloc: crate::ReadAlloc) -> ResponseBody {
        let media = self.media.lock().expect("sim state is never poisoned");

        let mut splits = Vec::with_capacity(alloc.splits.len());
        for (split_idx, split) in alloc.splits.iter().enumerate() {
            let grant = split.candidates.iter().enumerate().find_map(|(idx, id)| {
                let (_, medium) = media.get(&id.lock_key())?;
                match self.dss.get_medium(id) {
                    Ok(info) if info.is_usable(MediumOperation::Get) => Some(SplitGrant {
                        replica_index: idx as u32,
                        root: medium.root.clone(),
                    }),
                    _ => None,
                }
            });
            match grant {
                Some(grant) => splits.push(grant),
                None => {
                    return sched_error(
                        -libc::ENODEV,
                        false,
                        format!("no usable replica for split {split_idx}"),
                    )
                }
            }
        }
        ResponseBody::ReadAlloc { splits }
    }

    fn release(&self, release: crate::Release) -> ResponseBody {
        if release.release_kind == ReleaseKind::Write {
            let mut media = self.media.lock().expect("sim state is never poisoned");
            for rel in &release.media {
                if let Some((id, medium)) = media.get_mut(&rel.medium.lock_key()) {
                    medium.used = medium.used.saturating_add(rel.bytes_written);
                    medium.reserved = false;
                    if let Err(err) = self.dss.update_medium_stats(
                        id,
                        rel.bytes_written as i64,
                        rel.nb_obj as i64,
                    ) {
                        tracing::warn!(medium = %id, %err, "failed to settle medium stats");
                    }
                }
            }
        }
        ResponseBody::Release { release_kind: release.release_kind }
    }

    fn erase(&self, erase: crate::Erase) -> ResponseBody {
        let root = {
            let media = self.media.lock().expect("sim state is never poisoned");
            match media.get(&erase.medium.lock_key()) {
                Some((_, medium)) => medium.root.clone(),
                None => {
                    return sched_error(
                        -libc::ENODEV,
                        false,
                        format!("unknown medium {}", erase.medium),
                    )
                }
            }
        };

        let adapter = match ioa::adapter_for(erase.medium.family) {
            Ok(adapter) => adapter,
            Err(err) => return sched_error(err.errno(), false, err.to_string()),
        };
        let mut extent = ExtentInfo::pending(erase.medium.clone(), 0, 0);
        extent.uuid = erase.extent_uuid;
        extent.address = erase.address.clone();

        if let Err(err) = adapter.delete(&root, &extent) {
            return sched_error(err.errno(), false, err.to_string());
        }

        let mut media = self.media.lock().expect("sim state is never poisoned");
        if let Some((id, medium)) = media.get_mut(&erase.medium.lock_key()) {
            medium.used = medium.used.saturating_sub(erase.size);
            if let Err(err) = self.dss.update_medium_stats(id, -(erase.size as i64), -1) {
                tracing::warn!(medium = %id, %err, "failed to settle medium stats");
            }
        }
        ResponseBody::Erase
    }
}

fn sched_error(errno: i32, retry_later: bool, message: String) -> ResponseBody {
    ResponseBody::Error(SchedError {
        errno,
        retry_later,
        message,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{MediumRelease, Release, WriteAlloc};
    use model::{AdminStatus, FsStatus, MediumFlags, MediumInfo, MediumStats};

    fn dir_medium(dss: &Dss, name: &str, free: u64) -> MediumId {
        let id = MediumId::new(Family::Dir, name, "legacy");
        dss.add_medium(MediumInfo {
            id: id.clone(),
            model: None,
            admin_status: AdminStatus::Unlocked,
            fs_status: FsStatus::Empty,
            tags: vec![],
            stats: MediumStats {
                used: 0,
                free,
                nb_obj: 0,
            },
            flags: MediumFlags::default(),
        })
        .unwrap();
        id
    }

    fn write_alloc(n_media: u32, size_hint: u64) -> Request {
        Request {
            id: 1,
            body: RequestBody::WriteAlloc(WriteAlloc {
                family: Family::Dir,
                library: None,
                grouping: None,
                tags: vec![],
                n_media,
                size_hint,
            }),
        }
    }

    #[test]
    fn test_write_alloc_grants_distinct_media() {
        let dss = Dss::new();
        let sched = Scheduler::new(dss.clone());
        sched.add_dir_medium(dir_medium(&dss, "m1", 100), "/tmp/m1", 100);
        sched.add_dir_medium(dir_medium(&dss, "m2", 100), "/tmp/m2", 100);

        let resp = sched.handle(write_alloc(2, 50));
        let media = match resp.body {
            ResponseBody::WriteAlloc { media } => media,
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(media.len(), 2);
        assert_ne!(media[0].medium, media[1].medium);
        assert!(media.iter().all(|g| g.avail == 50));
    }

    #[test]
    fn test_write_alloc_caps_to_free_space() {
        let dss = Dss::new();
        let sched = Scheduler::new(dss.clone());
        sched.add_dir_medium(dir_medium(&dss, "m1", 30), "/tmp/m1", 30);

        let resp = sched.handle(write_alloc(1, 100));
        match resp.body {
            ResponseBody::WriteAlloc { media } => assert_eq!(media[0].avail, 30),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_reserved_media_yield_retry_later() {
        let dss = Dss::new();
        let sched = Scheduler::new(dss.clone());
        sched.add_dir_medium(dir_medium(&dss, "m1", 100), "/tmp/m1", 100);

        let first = sched.handle(write_alloc(1, 10));
        assert!(matches!(first.body, ResponseBody::WriteAlloc { .. }));

        let second = sched.handle(write_alloc(1, 10));
        match second.body {
            ResponseBody::Error(err) => {
                assert_eq!(err.errno, -libc::EAGAIN);
                assert!(err.retry_later);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        // Releasing the allocation frees the medium again.
        let release = Request {
            id: 3,
            body: RequestBody::Release(Release {
                release_kind: ReleaseKind::Write,
                media: vec![MediumRelease {
                    medium: MediumId::new(Family::Dir, "m1", "legacy"),
                    bytes_written: 10,
                    nb_obj: 1,
                }],
                partial: false,
            }),
        };
        sched.handle(release);

        let third = sched.handle(write_alloc(1, 10));
        assert!(matches!(third.body, ResponseBody::WriteAlloc { .. }));
    }

    #[test]
    fn test_no_media_at_all_is_nodev() {
        let sched = Scheduler::new(Dss::new());
        let resp = sched.handle(write_alloc(1, 10));
        match resp.body {
            ResponseBody::Error(err) => assert_eq!(err.errno, -libc::ENODEV),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
