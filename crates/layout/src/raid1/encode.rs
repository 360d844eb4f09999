use super::{layout_mod_attrs, Raid1Config, ATTR_EXTENT_INDEX, ATTR_REPL_COUNT, LAYOUT_NAME};
use crate::{EncodeSpec, HasherSet, Processor, Step, DEFAULT_BLOCK_SIZE};
use ioa::ExtentWriter;
use lrs::{
    MediumGrant, MediumRelease, Release, ReleaseKind, Request, RequestBody, Response,
    ResponseBody, WriteAlloc,
};
use model::{Error, ExtentInfo, LayoutInfo, Result};

/// Writes `repl_count` byte-identical replicas of each split. One canonical
/// hasher runs per split; its digests are copied into every replica's
/// extent record, since all replicas carry the same bytes.
pub(super) struct Raid1Encoder {
    cfg: Raid1Config,
    spec: EncodeSpec,
    /// Bytes of the object fully committed into prior splits.
    written_total: u64,
    split_index: u32,
    extents: Vec<ExtentInfo>,
    buffer: Vec<u8>,
    /// Media of the current allocation, until their release is emitted.
    held: Vec<MediumGrant>,
    state: State,
    layout: Option<LayoutInfo>,
}

enum State {
    Init,
    AwaitAlloc,
    Writing(SplitWrite),
    AwaitRelease { last: bool },
    Done,
    Failed,
}

struct SplitWrite {
    writers: Vec<Box<dyn ExtentWriter>>,
    extents: Vec<ExtentInfo>,
    hasher: Option<HasherSet>,
    split_size: u64,
    written: u64,
    chunk_size: usize,
}

impl Raid1Encoder {
    pub(super) fn new(cfg: Raid1Config, spec: EncodeSpec) -> Self {
        Self {
            cfg,
            spec,
            written_total: 0,
            split_index: 0,
            extents: Vec::new(),
            buffer: Vec::new(),
            held: Vec::new(),
            state: State::Init,
            layout: None,
        }
    }

    fn remaining(&self) -> u64 {
        self.spec.size - self.written_total
    }

    fn alloc_request(&self) -> Request {
        Request {
            id: 0, // Assigned by the driver on send.
            body: RequestBody::WriteAlloc(WriteAlloc {
                family: self.spec.family,
                library: self.spec.library.clone(),
                grouping: self.spec.grouping.clone(),
                tags: self.spec.tags.clone(),
                n_media: self.cfg.repl_count,
                size_hint: self.remaining(),
            }),
        }
    }

    fn release_request(&mut self, bytes_per_medium: u64, nb_obj: u64) -> Request {
        Request {
            id: 0,
            body: RequestBody::Release(Release {
                release_kind: ReleaseKind::Write,
                media: self
                    .held
                    .drain(..)
                    .map(|g| MediumRelease {
                        medium: g.medium,
                        bytes_written: bytes_per_medium,
                        nb_obj,
                    })
                    .collect(),
                partial: false,
            }),
        }
    }

    /// Set up the next split from a write allocation.
    fn begin_split(&mut self, grants: Vec<MediumGrant>) -> Result<()> {
        if grants.len() != self.cfg.repl_count as usize {
            return Err(Error::Transport(format!(
                "allocation granted {} media, wanted {}",
                grants.len(),
                self.cfg.repl_count
            )));
        }

        let split_size = grants
            .iter()
            .map(|g| g.avail)
            .min()
            .unwrap_or(0)
            .min(self.remaining());
        if split_size == 0 && self.remaining() > 0 {
            return Err(Error::NoSpace);
        }
        if self.spec.no_split && split_size < self.remaining() {
            return Err(Error::NoSpace);
        }

        // The chunk is the smallest non-zero adapter preference.
        let chunk_size = grants
            .iter()
            .map(|g| g.block_size)
            .filter(|&s| s > 0)
            .min()
            .unwrap_or(DEFAULT_BLOCK_SIZE);

        // Track the grant before opening writers, so an abort after a
        // failed open still releases the allocation.
        self.held = grants;

        let mut writers = Vec::with_capacity(self.held.len());
        let mut extents = Vec::with_capacity(self.held.len());
        for (replica, grant) in self.held.iter().enumerate() {
            let layout_index = self.split_index * self.cfg.repl_count + replica as u32;
            let extent =
                ExtentInfo::pending(grant.medium.clone(), layout_index, self.written_total);

            let adapter = ioa::adapter_for(grant.medium.family)?;
            writers.push(adapter.open_put(&grant.root, &extent)?);
            extents.push(extent);
        }

        tracing::debug!(
            object = %self.spec.object_uuid,
            split = self.split_index,
            split_size,
            "starting split write"
        );

        self.state = State::Writing(SplitWrite {
            writers,
            extents,
            hasher: Some(HasherSet::new(self.cfg.hash_algs())),
            split_size,
            written: 0,
            chunk_size,
        });
        Ok(())
    }

    /// Pump one chunk of the current split; finalize the split when the
    /// last chunk lands.
    fn write_chunk(&mut self, mut split: SplitWrite) -> Result<Step> {
        let n = (split.split_size - split.written).min(split.chunk_size as u64) as usize;
        if n > 0 {
            if self.buffer.len() < split.chunk_size {
                self.buffer.resize(split.chunk_size, 0);
            }
            read_exact(&mut self.spec.source, &mut self.buffer[..n])?;

            for writer in split.writers.iter_mut() {
                writer.write(&self.buffer[..n])?;
            }
            if let Some(hasher) = split.hasher.as_mut() {
                hasher.update(&self.buffer[..n]);
            }
            split.written += n as u64;
            for extent in split.extents.iter_mut() {
                extent.size += n as u64;
            }
        }

        if split.written < split.split_size {
            self.state = State::Writing(split);
            return Ok(Step::none());
        }

        // Split complete: copy the canonical digests into every replica,
        // stamp attributes and commit.
        let digests = split
            .hasher
            .take()
            .expect("hasher lives until finalization")
            .finish();
        for (extent, writer) in split.extents.iter_mut().zip(split.writers.iter_mut()) {
            digests.store_into(extent);
            writer.set_md(ATTR_EXTENT_INDEX, &extent.layout_index.to_string());
            writer.set_md(ATTR_REPL_COUNT, &self.cfg.repl_count.to_string());
            writer.commit()?;
            extent.address = writer.address().to_string();
        }

        self.written_total += split.split_size;
        self.split_index += 1;
        self.extents.append(&mut split.extents);

        let release = self.release_request(split.split_size, 1);
        let last = self.written_total == self.spec.size;
        self.state = State::AwaitRelease { last };
        Ok(Step::request(release))
    }
}

impl Processor for Raid1Encoder {
    fn step(&mut self, resp: Option<Response>) -> Result<Step> {
        let state = std::mem::replace(&mut self.state, State::Failed);
        match (state, resp) {
            (State::Init, None) => {
                let req = self.alloc_request();
                self.state = State::AwaitAlloc;
                Ok(Step::request(req))
            }
            (State::AwaitAlloc, Some(resp)) => match resp.body {
                ResponseBody::WriteAlloc { media } => {
                    self.begin_split(media)?;
                    Ok(Step::none())
                }
                other => Err(Error::Transport(format!(
                    "expected a write allocation, got {other:?}"
                ))),
            },
            (State::Writing(split), None) => self.write_chunk(split),
            (State::AwaitRelease { last }, Some(resp)) => match resp.body {
                ResponseBody::Release { .. } => {
                    if last {
                        self.layout = Some(LayoutInfo {
                            object_uuid: self.spec.object_uuid,
                            version: self.spec.version,
                            copy_name: self.spec.copy_name.clone(),
                            name: LAYOUT_NAME.to_string(),
                            mod_attrs: layout_mod_attrs(self.cfg.repl_count, self.spec.size),
                            extents: std::mem::take(&mut self.extents),
                        });
                        self.state = State::Done;
                        Ok(Step::done())
                    } else {
                        let req = self.alloc_request();
                        self.state = State::AwaitAlloc;
                        Ok(Step::request(req))
                    }
                }
                other => Err(Error::Transport(format!(
                    "expected a release acknowledgment, got {other:?}"
                ))),
            },
            (State::Done, _) => {
                self.state = State::Done;
                Ok(Step::done())
            }
            (State::Failed, _) => Err(Error::Transport("encoder already failed".into())),
            (state, None) => {
                self.state = state;
                Ok(Step::none())
            }
            (_, Some(_)) => Err(Error::Transport("encoder stepped out of order".into())),
        }
    }

    fn abort(&mut self) -> Vec<Request> {
        // Writers of an unfinished split drop uncommitted state; the held
        // media still have to be handed back.
        self.state = State::Failed;
        if self.held.is_empty() {
            Vec::new()
        } else {
            vec![self.release_request(0, 0)]
        }
    }

    fn take_layout(&mut self) -> Option<LayoutInfo> {
        self.layout.take()
    }
}

/// Fill `buf` from the source, failing on premature end-of-input.
fn read_exact(source: &mut (dyn std::io::Read + Send), buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::InvalidInput(
                "source ended before the declared object size".into(),
            ));
        }
        filled += n;
    }
    Ok(())
}
