use model::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one frame, guarding against a corrupt length prefix.
pub const MAX_FRAME: usize = 16 << 20;

/// Send one message as a u32-BE length prefix followed by its JSON body.
pub async fn send_msg<M, W>(writer: &mut W, msg: &M) -> Result<()>
where
    M: Serialize,
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(msg)
        .map_err(|err| Error::Transport(format!("encoding message: {err}")))?;
    if body.len() > MAX_FRAME {
        return Err(Error::Transport(format!(
            "message of {} bytes exceeds the frame limit",
            body.len()
        )));
    }
    writer
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .map_err(|err| Error::Transport(format!("writing frame: {err}")))?;
    writer
        .write_all(&body)
        .await
        .map_err(|err| Error::Transport(format!("writing frame: {err}")))?;
    writer
        .flush()
        .await
        .map_err(|err| Error::Transport(format!("flushing frame: {err}")))?;
    Ok(())
}

/// Receive one message. Returns None on a clean end-of-stream at a frame
/// boundary; a stream cut mid-frame is a transport error.
pub async fn recv_msg<M, R>(reader: &mut R) -> Result<Option<M>>
where
    M: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => (),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(Error::Transport(format!("reading frame length: {err}"))),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME {
        return Err(Error::Transport(format!(
            "frame length {len} exceeds the frame limit"
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| Error::Transport(format!("reading frame body: {err}")))?;

    let msg = serde_json::from_slice(&body)
        .map_err(|err| Error::Transport(format!("decoding message: {err}")))?;
    Ok(Some(msg))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Request, RequestBody};

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let req = Request {
            id: 9,
            body: RequestBody::Ping,
        };
        send_msg(&mut a, &req).await.unwrap();
        send_msg(&mut a, &req).await.unwrap();
        drop(a);

        let first: Option<Request> = recv_msg(&mut b).await.unwrap();
        assert_eq!(first, Some(req.clone()));
        let second: Option<Request> = recv_msg(&mut b).await.unwrap();
        assert_eq!(second, Some(req));
        let eof: Option<Request> = recv_msg(&mut b).await.unwrap();
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn test_cut_mid_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        use tokio::io::AsyncWriteExt;
        a.write_all(&100u32.to_be_bytes()).await.unwrap();
        a.write_all(b"short").await.unwrap();
        drop(a);

        let got: Result<Option<Request>> = recv_msg(&mut b).await;
        assert!(matches!(got, Err(Error::Transport(_))));
    }
}
