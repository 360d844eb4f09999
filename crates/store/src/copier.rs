//! The copier: a decoder feeding an encoder through a shared in-memory
//! buffer, both driven cooperatively inside one processor.

use layout::{Processor, Step, DEFAULT_BLOCK_SIZE};
use lrs::{ReleaseKind, Request, Response, ResponseBody};
use model::{Error, LayoutInfo, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Keep roughly this much decoded data buffered ahead of the encoder.
const HIGH_WATER: usize = 4 * DEFAULT_BLOCK_SIZE;

/// The buffer coupling the decoder's sink to the encoder's source.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(Arc<Mutex<BufInner>>);

#[derive(Default)]
struct BufInner {
    data: VecDeque<u8>,
    closed: bool,
}

impl SharedBuf {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn len(&self) -> usize {
        self.0.lock().expect("buffer is never poisoned").data.len()
    }

    fn close(&self) {
        self.0.lock().expect("buffer is never poisoned").closed = true;
    }
}

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.0.lock().expect("buffer is never poisoned");
        inner.data.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::io::Read for SharedBuf {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let mut inner = self.0.lock().expect("buffer is never poisoned");
        let (head, tail) = inner.data.as_slices();

        let mut copied = head.len().min(out.len());
        out[..copied].copy_from_slice(&head[..copied]);
        if copied < out.len() {
            let extra = tail.len().min(out.len() - copied);
            out[copied..copied + extra].copy_from_slice(&tail[..extra]);
            copied += extra;
        }
        inner.data.drain(..copied);
        Ok(copied)
    }
}

/// Runs both a decoder and an encoder, routing scheduler responses to the
/// right half by message kind and pacing the encoder behind the buffer.
pub(crate) struct Copier {
    dec: Box<dyn Processor>,
    enc: Box<dyn Processor>,
    buf: SharedBuf,
    dec_outstanding: usize,
    enc_outstanding: usize,
    dec_done: bool,
    enc_done: bool,
}

enum Half {
    Dec,
    Enc,
}

fn half_of(body: &ResponseBody) -> Result<Half> {
    match body {
        ResponseBody::ReadAlloc { .. } => Ok(Half::Dec),
        ResponseBody::WriteAlloc { .. } => Ok(Half::Enc),
        ResponseBody::Release {
            release_kind: ReleaseKind::Read,
        } => Ok(Half::Dec),
        ResponseBody::Release {
            release_kind: ReleaseKind::Write,
        } => Ok(Half::Enc),
        other => Err(Error::Transport(format!(
            "copier cannot route response {other:?}"
        ))),
    }
}

impl Copier {
    pub(crate) fn new(dec: Box<dyn Processor>, enc: Box<dyn Processor>, buf: SharedBuf) -> Self {
        Self {
            dec,
            enc,
            buf,
            dec_outstanding: 0,
            enc_outstanding: 0,
            dec_done: false,
            enc_done: false,
        }
    }

    fn step_dec(&mut self, resp: Option<Response>) -> Result<Vec<Request>> {
        let step = self.dec.step(resp)?;
        if step.done {
            self.dec_done = true;
            // End-of-input for the encoder once the buffer drains.
            self.buf.close();
        }
        self.dec_outstanding += step.requests.len();
        Ok(step.requests)
    }

    fn step_enc(&mut self, resp: Option<Response>) -> Result<Vec<Request>> {
        let step = self.enc.step(resp)?;
        if step.done {
            self.enc_done = true;
        }
        self.enc_outstanding += step.requests.len();
        Ok(step.requests)
    }

    /// The encoder may only pump data when a full chunk is buffered, or
    /// when the decoder delivered everything it will.
    fn enc_may_run(&self) -> bool {
        self.dec_done || self.buf.len() >= DEFAULT_BLOCK_SIZE
    }
}

impl Processor for Copier {
    fn step(&mut self, resp: Option<Response>) -> Result<Step> {
        let requests = match resp {
            Some(resp) => match half_of(&resp.body)? {
                Half::Dec => {
                    self.dec_outstanding -= 1;
                    self.step_dec(Some(resp))?
                }
                Half::Enc => {
                    self.enc_outstanding -= 1;
                    self.step_enc(Some(resp))?
                }
            },
            None => {
                if !self.dec_done && self.dec_outstanding == 0 && self.buf.len() < HIGH_WATER {
                    self.step_dec(None)?
                } else if !self.enc_done && self.enc_outstanding == 0 && self.enc_may_run() {
                    self.step_enc(None)?
                } else if !self.dec_done && self.dec_outstanding == 0 {
                    // Buffer above high water but the encoder cannot run:
                    // keep the decoder moving rather than stall.
                    self.step_dec(None)?
                } else {
                    Vec::new()
                }
            }
        };

        Ok(Step {
            requests,
            done: self.dec_done && self.enc_done,
        })
    }

    fn abort(&mut self) -> Vec<Request> {
        let mut requests = self.dec.abort();
        requests.extend(self.enc.abort());
        requests
    }

    fn take_layout(&mut self) -> Option<LayoutInfo> {
        self.enc.take_layout()
    }
}

#[cfg(test)]
mod test {
    use super::SharedBuf;
    use std::io::{Read, Write};

    #[test]
    fn test_shared_buf_order_and_drain() {
        let mut buf = SharedBuf::new();
        let mut reader = buf.clone();

        buf.write_all(b"abcdef").unwrap();
        assert_eq!(buf.len(), 6);

        let mut out = [0u8; 4];
        assert_eq!(reader.read(&mut out).unwrap(), 4);
        assert_eq!(&out, b"abcd");

        buf.write_all(b"gh").unwrap();
        let mut rest = Vec::new();
        let mut chunk = [0u8; 8];
        let n = reader.read(&mut chunk).unwrap();
        rest.extend_from_slice(&chunk[..n]);
        assert_eq!(rest, b"efgh");

        // Empty buffer reads zero bytes.
        assert_eq!(reader.read(&mut chunk).unwrap(), 0);
    }
}
