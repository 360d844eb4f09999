//! The per-batch transfer driver: catalog reservation, the cooperative IO
//! loop against the resource scheduler, and commit or rollback.

use crate::copier::{Copier, SharedBuf};
use crate::object::{self, HardDelPlan, PutReservation};
use crate::xfer::{Xfer, XferOp, XferParams};
use crate::StoreConfig;
use catalog::Dss;
use layout::{DecodeSpec, EncodeSpec, EraseSpec, Processor};
use lrs::{Request, ResponseBody};
use model::{Error, LockOwner, ResourceType, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub(crate) struct Driver<'a> {
    pub dss: &'a Dss,
    pub cfg: &'a StoreConfig,
}

/// One (xfer, target) unit of work.
struct Job {
    xfer_idx: usize,
    target_idx: usize,
    proc: Option<Box<dyn Processor>>,
    /// Requests in flight for this job.
    outstanding: usize,
    ended: bool,
    rc: Option<Error>,
    locked_oid: Option<String>,
    ctx: JobCtx,
}

enum JobCtx {
    Put(PutReservation),
    Get {
        uuid: Uuid,
        version: u32,
        copy_name: String,
    },
    Copy {
        uuid: Uuid,
        version: u32,
        copy_name: String,
    },
    HardDel(HardDelPlan),
    CatalogOnly,
}

impl Job {
    fn new(xfer_idx: usize, target_idx: usize, ctx: JobCtx) -> Self {
        Self {
            xfer_idx,
            target_idx,
            proc: None,
            outstanding: 0,
            ended: false,
            rc: None,
            locked_oid: None,
            ctx,
        }
    }

    fn catalog_done(xfer_idx: usize, target_idx: usize) -> Self {
        let mut job = Self::new(xfer_idx, target_idx, JobCtx::CatalogOnly);
        job.ended = true;
        job
    }

    fn failed(xfer_idx: usize, target_idx: usize, err: Error) -> Self {
        let mut job = Self::catalog_done(xfer_idx, target_idx);
        job.rc = Some(err);
        job
    }
}

impl Driver<'_> {
    /// Run one batch to completion and return its representative code:
    /// any medium-global error wins, else the first non-zero per-target
    /// code, else success. Per-target codes land in the xfer records.
    pub(crate) async fn run(&self, xfers: &mut [Xfer]) -> Result<()> {
        let owner = model::local_lock_owner()?;

        // Phase 1: catalog reservations; processors for the IO-bound ops.
        let mut jobs = Vec::new();
        for xfer_idx in 0..xfers.len() {
            for target_idx in 0..xfers[xfer_idx].targets.len() {
                let job = match self.prepare(&mut xfers[xfer_idx], xfer_idx, target_idx, &owner) {
                    Ok(job) => job,
                    Err(err) => {
                        tracing::debug!(
                            oid = %xfers[xfer_idx].targets[target_idx].oid,
                            %err,
                            "transfer target rejected in reservation"
                        );
                        Job::failed(xfer_idx, target_idx, err)
                    }
                };
                jobs.push(job);
            }
        }

        // Phase 2: the IO loop, if anything needs the scheduler.
        if jobs.iter().any(|j| !j.ended && j.proc.is_some()) {
            if let Err(err) = self.io_loop(&mut jobs).await {
                // A transport failure aborts the whole batch.
                let msg = err.to_string();
                for job in jobs.iter_mut().filter(|j| !j.ended) {
                    job.rc = Some(Error::Transport(msg.clone()));
                    job.ended = true;
                }
            }
        }

        // Phase 3: commit or roll back, then drop the oid locks.
        for job in jobs.iter_mut() {
            self.finish(job);
        }
        for job in jobs.iter() {
            if let Some(oid) = &job.locked_oid {
                if let Err(err) = self.dss.unlock(
                    ResourceType::Object,
                    std::slice::from_ref(oid),
                    Some(&owner),
                ) {
                    tracing::warn!(oid, %err, "failed to drop the object lock");
                }
            }
        }

        // Record per-target codes and log completions.
        for job in jobs.iter() {
            let target = &mut xfers[job.xfer_idx].targets[job.target_idx];
            let errno = job.rc.as_ref().map(|e| e.errno()).unwrap_or(0);
            target.rc = Some(errno);

            let op = xfers[job.xfer_idx].op;
            match &job.rc {
                None => tracing::info!(%op, oid = %xfers[job.xfer_idx].targets[job.target_idx].oid, "transfer succeeded"),
                Some(err) => tracing::info!(%op, oid = %xfers[job.xfer_idx].targets[job.target_idx].oid, %err, "transfer failed"),
            }
        }

        // Representative code.
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.rc.as_ref().map(Error::is_medium_global).unwrap_or(false))
        {
            return Err(job.rc.take().expect("medium-global rc was just seen"));
        }
        if let Some(job) = jobs.iter_mut().find(|j| j.rc.is_some()) {
            return Err(job.rc.take().expect("rc was just seen"));
        }
        Ok(())
    }

    fn prepare(
        &self,
        xfer: &mut Xfer,
        xfer_idx: usize,
        target_idx: usize,
        owner: &LockOwner,
    ) -> Result<Job> {
        let op = xfer.op;
        let params = xfer.params.clone();
        let target = &mut xfer.targets[target_idx];

        match (op, params) {
            (XferOp::Put, XferParams::Put(params)) => {
                let params = params.resolve(self.cfg)?;
                let source = target
                    .input
                    .take()
                    .ok_or_else(|| Error::InvalidInput("put needs an input stream".into()))?;

                let mut job = Job::new(xfer_idx, target_idx, JobCtx::CatalogOnly);
                self.lock_oid(&target.oid, owner, &mut job)?;

                let reservation =
                    match object::reserve_put(self.dss, &target.oid, &target.attrs, &params) {
                        Ok(reservation) => reservation,
                        Err(err) => return self.fail_locked(job, err),
                    };

                let codec = match layout::codec(&params.layout_name) {
                    Ok(codec) => codec,
                    Err(err) => {
                        object::rollback_put(self.dss, &reservation);
                        return self.fail_locked(job, err);
                    }
                };
                let encoder = codec.encoder(EncodeSpec {
                    object_uuid: reservation.object.uuid,
                    version: reservation.object.version,
                    copy_name: params.copy_name.clone(),
                    size: target.size,
                    family: params.family,
                    library: params.library.clone(),
                    grouping: params.grouping.clone(),
                    tags: params.tags.clone(),
                    params: params.layout_params.clone(),
                    no_split: params.no_split,
                    source,
                });
                let encoder = match encoder {
                    Ok(encoder) => encoder,
                    Err(err) => {
                        object::rollback_put(self.dss, &reservation);
                        return self.fail_locked(job, err);
                    }
                };

                job.proc = Some(encoder);
                job.ctx = JobCtx::Put(reservation);
                Ok(job)
            }

            (XferOp::Get, XferParams::Get(params)) => {
                let object = object::resolve_object(
                    self.dss,
                    &target.oid,
                    target.uuid,
                    target.version,
                    params.scope,
                )?;
                let copy = object::pick_copy(self.dss, &object, params.copy_name.as_deref())?;
                let layout =
                    self.dss
                        .get_layout(object.uuid, object.version, &copy.copy_name)?;
                let codec = layout::codec(&layout.name)?;

                if params.best_host {
                    let located = codec.locate(self.dss, &layout, None)?;
                    let local = model::local_hostname()?;
                    if located.hostname != local {
                        return Err(Error::Remote(located.hostname));
                    }
                }

                let sink = target
                    .output
                    .take()
                    .ok_or_else(|| Error::InvalidInput("get needs an output stream".into()))?;
                let decoder = codec.decoder(DecodeSpec {
                    layout,
                    sink,
                    check_hash: params.check_hash,
                })?;

                let mut job = Job::new(
                    xfer_idx,
                    target_idx,
                    JobCtx::Get {
                        uuid: object.uuid,
                        version: object.version,
                        copy_name: copy.copy_name,
                    },
                );
                job.proc = Some(decoder);
                Ok(job)
            }

            (XferOp::GetMd, XferParams::None) => {
                let object = object::resolve_object(
                    self.dss,
                    &target.oid,
                    target.uuid,
                    target.version,
                    model::ObjectScope::All,
                )?;
                target.attrs = object.user_md;
                Ok(Job::catalog_done(xfer_idx, target_idx))
            }

            (XferOp::Del, XferParams::Del(params)) => {
                let mut job = Job::new(xfer_idx, target_idx, JobCtx::CatalogOnly);
                self.lock_oid(&target.oid, owner, &mut job)?;

                if !params.hard {
                    return match object::soft_delete(self.dss, &target.oid) {
                        Ok(_) => {
                            job.ended = true;
                            Ok(job)
                        }
                        Err(err) => self.fail_locked(job, err),
                    };
                }

                let plan = match object::prepare_hard_del(self.dss, &target.oid, target.uuid) {
                    Ok(plan) => plan,
                    Err(err) => return self.fail_locked(job, err),
                };
                let erasure = plan.erasure_layout();
                if erasure.extents.is_empty() {
                    // Nothing on media; the catalog alone is cleaned in
                    // the commit phase.
                    job.ctx = JobCtx::HardDel(plan);
                    job.ended = true;
                    return Ok(job);
                }
                let eraser = layout::codec(&erasure.name)
                    .and_then(|codec| codec.eraser(EraseSpec { layout: erasure }));
                let eraser = match eraser {
                    Ok(eraser) => eraser,
                    Err(err) => return self.fail_locked(job, err),
                };

                job.proc = Some(eraser);
                job.ctx = JobCtx::HardDel(plan);
                Ok(job)
            }

            (XferOp::Undel, XferParams::None) => {
                object::undelete(self.dss, &target.oid, target.uuid)?;
                Ok(Job::catalog_done(xfer_idx, target_idx))
            }

            (XferOp::Copy, XferParams::Copy(params)) => {
                let object = object::resolve_object(
                    self.dss,
                    &target.oid,
                    target.uuid,
                    target.version,
                    params.get.scope,
                )?;
                let src_copy =
                    object::pick_copy(self.dss, &object, params.get.copy_name.as_deref())?;
                let src_layout =
                    self.dss
                        .get_layout(object.uuid, object.version, &src_copy.copy_name)?;
                let size = src_layout.object_size().ok_or_else(|| {
                    Error::Integrity(format!(
                        "layout of object {} lacks an object size",
                        object.uuid
                    ))
                })?;

                let put = params.put.resolve(self.cfg)?;
                let mut job = Job::new(xfer_idx, target_idx, JobCtx::CatalogOnly);
                self.lock_oid(&target.oid, owner, &mut job)?;

                let dest_copy =
                    model::CopyInfo::incomplete(object.uuid, object.version, put.copy_name.clone());
                if let Err(err) = self.dss.insert_copy(dest_copy) {
                    return self.fail_locked(job, err);
                }

                let buf = SharedBuf::new();
                let build = || -> Result<Box<dyn Processor>> {
                    let src_codec = layout::codec(&src_layout.name)?;
                    let decoder = src_codec.decoder(DecodeSpec {
                        layout: src_layout.clone(),
                        sink: Box::new(buf.clone()),
                        check_hash: params.get.check_hash,
                    })?;
                    let dest_codec = layout::codec(&put.layout_name)?;
                    let encoder = dest_codec.encoder(EncodeSpec {
                        object_uuid: object.uuid,
                        version: object.version,
                        copy_name: put.copy_name.clone(),
                        size,
                        family: put.family,
                        library: put.library.clone(),
                        grouping: put.grouping.clone(),
                        tags: put.tags.clone(),
                        params: put.layout_params.clone(),
                        no_split: put.no_split,
                        source: Box::new(buf.clone()),
                    })?;
                    Ok(Box::new(Copier::new(decoder, encoder, buf.clone())))
                };
                let copier = match build() {
                    Ok(copier) => copier,
                    Err(err) => {
                        if let Err(del_err) =
                            self.dss
                                .delete_copy(object.uuid, object.version, &put.copy_name)
                        {
                            tracing::warn!(%del_err, "rollback: copy row removal failed");
                        }
                        return self.fail_locked(job, err);
                    }
                };

                job.proc = Some(copier);
                job.ctx = JobCtx::Copy {
                    uuid: object.uuid,
                    version: object.version,
                    copy_name: put.copy_name,
                };
                Ok(job)
            }

            (op, _) => Err(Error::InvalidInput(format!(
                "mismatched parameters for operation '{op}'"
            ))),
        }
    }

    fn lock_oid(&self, oid: &str, owner: &LockOwner, job: &mut Job) -> Result<()> {
        self.dss.lock(
            ResourceType::Object,
            std::slice::from_ref(&oid.to_string()),
            owner,
        )?;
        job.locked_oid = Some(oid.to_string());
        Ok(())
    }

    /// A preparation failure after the oid lock was taken: the error rides
    /// in the job record so the phase-3 unlock pass still runs.
    fn fail_locked(&self, mut job: Job, err: Error) -> Result<Job> {
        job.rc = Some(err);
        job.ended = true;
        Ok(job)
    }

    async fn io_loop(&self, jobs: &mut [Job]) -> Result<()> {
        let mut client = lrs::Client::connect(&self.cfg.lrs_socket).await?;
        let mut route: HashMap<u64, (usize, Request)> = HashMap::new();
        let mut next_id: u64 = 1;

        // Jitter PRNG, seeded per process so concurrent drivers do not
        // poll in lock-step.
        let seed = (std::process::id() as u64)
            ^ std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
        let mut rng = SmallRng::seed_from_u64(seed);

        for idx in 0..jobs.len() {
            pump(&mut client, &mut route, &mut next_id, idx, &mut jobs[idx]).await?;
        }

        while jobs.iter().any(|j| !j.ended) {
            let resps = client.recv_batch(Duration::from_millis(100)).await?;
            if resps.is_empty() {
                let ms = rng.gen_range(10..=1000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                continue;
            }

            // "No resource now" responses re-issue their request after a
            // backoff rather than failing the transfer.
            let mut retries: Vec<(usize, Request)> = Vec::new();

            for resp in resps {
                let Some((idx, sent)) = route.remove(&resp.id) else {
                    tracing::trace!(resp.id, "response for a torn-down request");
                    continue;
                };
                let job = &mut jobs[idx];
                job.outstanding -= 1;
                if job.ended {
                    continue;
                }

                if let ResponseBody::Error(sched_err) = &resp.body {
                    let err = sched_err.to_error();
                    if matches!(err, Error::RetryLater(_)) {
                        tracing::debug!(resp.id, "resources busy, queueing a retry");
                        retries.push((idx, sent));
                    } else {
                        fail_job(&mut client, &mut next_id, job, err).await?;
                    }
                    continue;
                }

                let proc = job.proc.as_mut().expect("IO jobs keep their processor");
                match proc.step(Some(resp)) {
                    Err(err) => fail_job(&mut client, &mut next_id, job, err).await?,
                    Ok(step) => {
                        let done = step.done;
                        send_requests(&mut client, &mut route, &mut next_id, idx, job, step.requests)
                            .await?;
                        if done {
                            job.ended = true;
                        }
                    }
                }
                pump(&mut client, &mut route, &mut next_id, idx, &mut jobs[idx]).await?;
            }

            if !retries.is_empty() {
                let ms = rng.gen_range(10..=1000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                for (idx, req) in retries {
                    if jobs[idx].ended {
                        continue;
                    }
                    send_requests(&mut client, &mut route, &mut next_id, idx, &mut jobs[idx], vec![req])
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Phase 3 for one job: persist the results of a successful transfer,
    /// or undo its reservations.
    fn finish(&self, job: &mut Job) {
        match &job.ctx {
            JobCtx::Put(reservation) => {
                if job.rc.is_none() {
                    let uuid = reservation.object.uuid;
                    let version = reservation.object.version;
                    let copy_name = reservation.copy_name.clone();
                    job.rc = self.commit_encoded(job.proc.as_mut(), uuid, version, &copy_name);
                }
                if job.rc.is_some() {
                    object::rollback_put(self.dss, reservation);
                }
            }
            JobCtx::Copy {
                uuid,
                version,
                copy_name,
            } => {
                let (uuid, version, copy_name) = (*uuid, *version, copy_name.clone());
                if job.rc.is_none() {
                    job.rc = self.commit_encoded(job.proc.as_mut(), uuid, version, &copy_name);
                }
                if job.rc.is_some() {
                    if let Err(err) = self.dss.delete_copy(uuid, version, &copy_name) {
                        tracing::warn!(%uuid, %err, "rollback: copy row removal failed");
                    }
                }
            }
            JobCtx::Get {
                uuid,
                version,
                copy_name,
            } => {
                if job.rc.is_none() {
                    // Access-time refresh is best-effort.
                    if let Err(err) = self.dss.touch_copy(*uuid, *version, copy_name) {
                        tracing::warn!(%uuid, %err, "access time not refreshed");
                    }
                }
            }
            JobCtx::HardDel(plan) => {
                if job.rc.is_none() {
                    object::commit_hard_del(self.dss, plan);
                }
            }
            JobCtx::CatalogOnly => (),
        }
    }

    /// Persist the layout an encoder or copier produced and flip its copy
    /// to complete. Any failure orphans the written extents.
    fn commit_encoded(
        &self,
        proc: Option<&mut Box<dyn Processor>>,
        uuid: Uuid,
        version: u32,
        copy_name: &str,
    ) -> Option<Error> {
        let layout = match proc.and_then(|p| p.take_layout()) {
            Some(layout) => layout,
            None => {
                return Some(Error::Transport(
                    "encoder completed without producing a layout".into(),
                ))
            }
        };

        let extents = layout.extents.clone();
        if let Err(err) = self.dss.insert_layout(layout) {
            self.dss.orphan_extents(extents);
            return Some(err);
        }
        if let Err(err) = self
            .dss
            .set_copy_status(uuid, version, copy_name, model::CopyStatus::Complete)
        {
            if let Err(del_err) = self.dss.delete_layout(uuid, version, copy_name) {
                tracing::warn!(%uuid, %del_err, "layout row not removed after failed status flip");
            }
            self.dss.orphan_extents(extents);
            return Some(err);
        }
        None
    }
}

async fn send_requests(
    client: &mut lrs::Client,
    route: &mut HashMap<u64, (usize, Request)>,
    next_id: &mut u64,
    job_idx: usize,
    job: &mut Job,
    requests: Vec<Request>,
) -> Result<()> {
    for mut req in requests {
        req.id = *next_id;
        *next_id += 1;
        route.insert(req.id, (job_idx, req.clone()));
        job.outstanding += 1;
        client.send(&req).await?;
    }
    Ok(())
}

/// Step a runnable job until it emits requests, completes, or fails.
async fn pump(
    client: &mut lrs::Client,
    route: &mut HashMap<u64, (usize, Request)>,
    next_id: &mut u64,
    job_idx: usize,
    job: &mut Job,
) -> Result<()> {
    while !job.ended && job.outstanding == 0 && job.proc.is_some() {
        let proc = job.proc.as_mut().expect("checked above");
        match proc.step(None) {
            Err(err) => {
                fail_job(client, next_id, job, err).await?;
                break;
            }
            Ok(step) => {
                let done = step.done;
                send_requests(client, route, next_id, job_idx, job, step.requests).await?;
                if done {
                    job.ended = true;
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Record the first error of a job and tear its processor down, releasing
/// any held allocation. Responses to the release are ignored on arrival.
async fn fail_job(
    client: &mut lrs::Client,
    next_id: &mut u64,
    job: &mut Job,
    err: Error,
) -> Result<()> {
    tracing::debug!(%err, "transfer target failed");
    if job.rc.is_none() {
        job.rc = Some(err);
    }
    if let Some(proc) = job.proc.as_mut() {
        for mut req in proc.abort() {
            req.id = *next_id;
            *next_id += 1;
            client.send(&req).await?;
        }
    }
    job.ended = true;
    Ok(())
}
