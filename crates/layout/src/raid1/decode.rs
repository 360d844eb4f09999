use super::repl_count_of;
use crate::{DecodeSpec, HashAlgs, HasherSet, Processor, Step, DEFAULT_BLOCK_SIZE};
use ioa::ExtentReader;
use lrs::{
    MediumRelease, ReadAlloc, Release, ReleaseKind, Request, RequestBody, Response, ResponseBody,
    SplitCandidates, SplitGrant,
};
use model::{Error, ExtentInfo, LayoutInfo, Result};

/// Reads an object back split by split, through the replica the scheduler
/// nominates. With hash checking enabled, each split is verified against
/// its stored digests in a first pass before any byte reaches the sink.
pub(super) struct Raid1Decoder {
    layout: LayoutInfo,
    repl_count: u32,
    split_count: usize,
    sink: Box<dyn std::io::Write + Send>,
    check_hash: bool,
    to_read: u64,
    /// Bytes delivered to the sink so far.
    read_total: u64,
    grants: Vec<SplitGrant>,
    split_idx: usize,
    buffer: Vec<u8>,
    state: State,
}

enum State {
    Init,
    AwaitAlloc,
    /// Hashing pass over the split, before any output.
    Verify(SplitRead),
    /// Output pass, pumping the split to the sink.
    Stream(SplitRead),
    AwaitRelease,
    Done,
    Failed,
}

struct SplitRead {
    reader: Box<dyn ExtentReader>,
    hasher: Option<HasherSet>,
    remaining: u64,
}

impl Raid1Decoder {
    pub(super) fn new(spec: DecodeSpec, check_hash: bool) -> Result<Self> {
        let DecodeSpec {
            mut layout, sink, ..
        } = spec;

        let repl_count = repl_count_of(&layout)?;
        if layout.extents.len() % repl_count as usize != 0 {
            return Err(Error::Integrity(format!(
                "layout of object {} has {} extents, not a multiple of {} replicas",
                layout.object_uuid,
                layout.extents.len(),
                repl_count
            )));
        }
        layout.extents.sort_by_key(|e| e.layout_index);

        let split_count = layout.extents.len() / repl_count as usize;
        let to_read: u64 = (0..split_count)
            .map(|s| layout.extents[s * repl_count as usize].size)
            .sum();

        Ok(Self {
            layout,
            repl_count,
            split_count,
            sink,
            check_hash,
            to_read,
            read_total: 0,
            grants: Vec::new(),
            split_idx: 0,
            buffer: Vec::new(),
            state: State::Init,
        })
    }

    fn chosen_extent(&self, split_idx: usize) -> Result<&ExtentInfo> {
        let grant = &self.grants[split_idx];
        let idx = split_idx * self.repl_count as usize + grant.replica_index as usize;
        self.layout.extents.get(idx).ok_or_else(|| {
            Error::Transport(format!(
                "scheduler nominated replica {} of split {split_idx}, which does not exist",
                grant.replica_index
            ))
        })
    }

    /// Open the nominated replica of a split and choose the first pass.
    fn start_split(&mut self, split_idx: usize) -> Result<()> {
        let extent = self.chosen_extent(split_idx)?.clone();
        let root = self.grants[split_idx].root.clone();
        let adapter = ioa::adapter_for(extent.medium.family)?;
        let reader = adapter.open_get(&root, &extent)?;

        let algs = HashAlgs {
            md5: extent.md5.is_some(),
            xxh128: extent.xxh128.is_some(),
        };
        let verify = self.check_hash && (algs.md5 || algs.xxh128);

        tracing::debug!(
            object = %self.layout.object_uuid,
            split = split_idx,
            size = extent.size,
            verify,
            "starting split read"
        );

        let split = SplitRead {
            reader,
            hasher: verify.then(|| HasherSet::new(algs)),
            remaining: extent.size,
        };
        self.state = if verify {
            State::Verify(split)
        } else {
            State::Stream(split)
        };
        Ok(())
    }

    fn read_chunk(&mut self, split: &mut SplitRead) -> Result<usize> {
        if self.buffer.is_empty() {
            self.buffer.resize(DEFAULT_BLOCK_SIZE, 0);
        }
        let want = (split.remaining).min(self.buffer.len() as u64) as usize;
        let n = split.reader.read(&mut self.buffer[..want])?;
        if n == 0 && split.remaining > 0 {
            return Err(Error::Integrity(format!(
                "extent of object {} is shorter than its recorded size",
                self.layout.object_uuid
            )));
        }
        split.remaining -= n as u64;
        Ok(n)
    }

    /// One chunk of the verification pass. The split's digests must match
    /// before anything is written out.
    fn verify_chunk(&mut self, mut split: SplitRead) -> Result<Step> {
        let n = self.read_chunk(&mut split)?;
        if let Some(hasher) = split.hasher.as_mut() {
            hasher.update(&self.buffer[..n]);
        }

        if split.remaining > 0 {
            self.state = State::Verify(split);
            return Ok(Step::none());
        }

        let digests = split
            .hasher
            .take()
            .expect("verify pass always hashes")
            .finish();
        digests.verify(self.chosen_extent(self.split_idx)?)?;

        // Verified: restart the split as a plain output pass.
        let extent = self.chosen_extent(self.split_idx)?.clone();
        let root = self.grants[self.split_idx].root.clone();
        let adapter = ioa::adapter_for(extent.medium.family)?;
        self.state = State::Stream(SplitRead {
            reader: adapter.open_get(&root, &extent)?,
            hasher: None,
            remaining: extent.size,
        });
        Ok(Step::none())
    }

    fn stream_chunk(&mut self, mut split: SplitRead) -> Result<Step> {
        let n = self.read_chunk(&mut split)?;
        self.sink.write_all(&self.buffer[..n])?;
        self.read_total += n as u64;
        debug_assert!(self.read_total <= self.to_read);

        if split.remaining > 0 {
            self.state = State::Stream(split);
            return Ok(Step::none());
        }

        self.split_idx += 1;
        if self.split_idx < self.split_count {
            self.start_split(self.split_idx)?;
            return Ok(Step::none());
        }

        self.sink.flush()?;
        self.state = State::AwaitRelease;
        Ok(Step::request(self.release_request()))
    }

    fn release_request(&self) -> Request {
        let media = (0..self.grants.len())
            .filter_map(|s| self.chosen_extent(s).ok())
            .map(|e| MediumRelease {
                medium: e.medium.clone(),
                bytes_written: 0,
                nb_obj: 0,
            })
            .collect();
        Request {
            id: 0,
            body: RequestBody::Release(Release {
                release_kind: ReleaseKind::Read,
                media,
                partial: false,
            }),
        }
    }
}

impl Processor for Raid1Decoder {
    fn step(&mut self, resp: Option<Response>) -> Result<Step> {
        let state = std::mem::replace(&mut self.state, State::Failed);
        match (state, resp) {
            (State::Init, None) => {
                if self.to_read == 0 {
                    // Nothing to pump; the copy is trivially delivered.
                    self.state = State::Done;
                    return Ok(Step::done());
                }
                let splits = (0..self.split_count)
                    .map(|s| SplitCandidates {
                        candidates: self.layout.extents
                            [s * self.repl_count as usize..(s + 1) * self.repl_count as usize]
                            .iter()
                            .map(|e| e.medium.clone())
                            .collect(),
                    })
                    .collect();
                self.state = State::AwaitAlloc;
                Ok(Step::request(Request {
                    id: 0,
                    body: RequestBody::ReadAlloc(ReadAlloc { splits }),
                }))
            }
            (State::AwaitAlloc, Some(resp)) => match resp.body {
                ResponseBody::ReadAlloc { splits } => {
                    if splits.len() != self.split_count {
                        return Err(Error::Transport(format!(
                            "read allocation covered {} splits, wanted {}",
                            splits.len(),
                            self.split_count
                        )));
                    }
                    self.grants = splits;
                    self.start_split(0)?;
                    Ok(Step::none())
                }
                other => Err(Error::Transport(format!(
                    "expected a read allocation, got {other:?}"
                ))),
            },
            (State::Verify(split), None) => self.verify_chunk(split),
            (State::Stream(split), None) => self.stream_chunk(split),
            (State::AwaitRelease, Some(resp)) => match resp.body {
                ResponseBody::Release { .. } => {
                    self.state = State::Done;
                    Ok(Step::done())
                }
                other => Err(Error::Transport(format!(
                    "expected a release acknowledgment, got {other:?}"
                ))),
            },
            (State::Done, _) => {
                self.state = State::Done;
                Ok(Step::done())
            }
            (State::Failed, _) => Err(Error::Transport("decoder already failed".into())),
            (state, None) => {
                self.state = state;
                Ok(Step::none())
            }
            (_, Some(_)) => Err(Error::Transport("decoder stepped out of order".into())),
        }
    }

    fn abort(&mut self) -> Vec<Request> {
        let had_alloc = !self.grants.is_empty()
            && !matches!(self.state, State::Done | State::Failed);
        let release = had_alloc.then(|| self.release_request());
        self.state = State::Failed;
        release.into_iter().collect()
    }
}
