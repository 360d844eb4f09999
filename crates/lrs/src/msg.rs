use model::{Family, MediumId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to the resource scheduler. The `id` is opaque to the
/// scheduler and chosen by the sender; responses echo it, which is how a
/// driver demultiplexes responses across its transfers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestBody {
    WriteAlloc(WriteAlloc),
    ReadAlloc(ReadAlloc),
    Release(Release),
    Erase(Erase),
    Ping,
}

/// Ask for write access to `n_media` distinct media of a family.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WriteAlloc {
    pub family: Family,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub n_media: u32,
    /// Bytes the caller still has to write. The grant may cover less; the
    /// caller then allocates again for the next split.
    pub size_hint: u64,
}

/// Ask for read access to one replica per split. Candidates are listed in
/// layout order; the scheduler nominates the replica to read.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadAlloc {
    pub splits: Vec<SplitCandidates>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SplitCandidates {
    pub candidates: Vec<MediumId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    Read,
    Write,
}

/// Hand back an allocation. Write releases carry the bytes and objects
/// landed on each medium so the scheduler can settle its accounting.
/// `partial` releases an exhausted medium mid-transfer while keeping the
/// rest of the allocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Release {
    pub release_kind: ReleaseKind,
    pub media: Vec<MediumRelease>,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MediumRelease {
    pub medium: MediumId,
    #[serde(default)]
    pub bytes_written: u64,
    #[serde(default)]
    pub nb_obj: u64,
}

/// Ask the scheduler to physically remove one extent from a medium.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Erase {
    pub medium: MediumId,
    pub extent_uuid: Uuid,
    pub address: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    WriteAlloc { media: Vec<MediumGrant> },
    ReadAlloc { splits: Vec<SplitGrant> },
    Release { release_kind: ReleaseKind },
    Erase,
    Pong,
    Error(SchedError),
}

/// Write access granted on one medium.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MediumGrant {
    pub medium: MediumId,
    /// Endpoint handed to the IO adapter (directory root for dir media).
    pub root: String,
    /// Preferred IO block size, 0 for no preference.
    pub block_size: usize,
    /// Bytes the caller may write on this medium under this grant.
    pub avail: u64,
}

/// The replica nominated for one split of a read allocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SplitGrant {
    pub replica_index: u32,
    pub root: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedError {
    /// Negated POSIX errno.
    pub errno: i32,
    /// True for transient conditions worth a backoff-and-retry.
    pub retry_later: bool,
    pub message: String,
}

impl SchedError {
    pub fn to_error(&self) -> model::Error {
        if self.retry_later || self.errno == -libc::EAGAIN {
            model::Error::RetryLater(self.message.clone())
        } else if self.errno == -libc::ENODEV {
            model::Error::NoDevice(self.message.clone())
        } else if self.errno == -libc::ENOSPC {
            model::Error::NoSpace
        } else {
            model::Error::Transport(format!(
                "scheduler error {}: {}",
                self.errno, self.message
            ))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_json_round_trip() {
        let req = Request {
            id: 42,
            body: RequestBody::WriteAlloc(WriteAlloc {
                family: Family::Dir,
                library: None,
                grouping: Some("archive".to_string()),
                tags: vec!["fast".to_string()],
                n_media: 2,
                size_hint: 1 << 20,
            }),
        };
        let raw = serde_json::to_string(&req).unwrap();
        assert!(raw.contains(r#""kind":"write_alloc""#));
        assert_eq!(serde_json::from_str::<Request>(&raw).unwrap(), req);
    }

    #[test]
    fn test_response_echoes_id() {
        let resp = Response {
            id: 7,
            body: ResponseBody::Error(SchedError {
                errno: -libc::EAGAIN,
                retry_later: true,
                message: "all drives busy".to_string(),
            }),
        };
        let raw = serde_json::to_vec(&resp).unwrap();
        let back: Response = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.id, 7);
        match back.body {
            ResponseBody::Error(err) => {
                assert!(matches!(err.to_error(), model::Error::RetryLater(_)))
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
