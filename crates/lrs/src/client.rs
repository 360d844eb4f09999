use crate::{frame, Request, Response};
use model::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Async client side of the scheduler socket. One client is exclusive to
/// one transfer driver instance.
pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|err| Error::Transport(format!("connecting to scheduler: {err}")))?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    pub async fn send(&mut self, req: &Request) -> Result<()> {
        tracing::trace!(req.id, "sending scheduler request");
        frame::send_msg(&mut self.writer, req).await
    }

    /// Drain whatever responses are available, waiting up to `wait` for the
    /// first one. An empty batch means the wait elapsed; the caller backs
    /// off and retries. A closed socket is a transport error.
    pub async fn recv_batch(&mut self, wait: Duration) -> Result<Vec<Response>> {
        let mut batch = Vec::new();

        match tokio::time::timeout(wait, frame::recv_msg(&mut self.reader)).await {
            Err(_elapsed) => return Ok(batch),
            Ok(Ok(Some(resp))) => batch.push(resp),
            Ok(Ok(None)) => {
                return Err(Error::Transport(
                    "scheduler closed the connection".to_string(),
                ))
            }
            Ok(Err(err)) => return Err(err),
        }

        // More responses may already be queued; drain without blocking.
        loop {
            match tokio::time::timeout(
                Duration::from_millis(1),
                frame::recv_msg(&mut self.reader),
            )
            .await
            {
                Err(_elapsed) => return Ok(batch),
                Ok(Ok(Some(resp))) => batch.push(resp),
                Ok(Ok(None)) => return Ok(batch),
                Ok(Err(err)) => return Err(err),
            }
        }
    }
}
