//! The Local Resource Scheduler (LRS) contract: typed request/response
//! messages exchanged as length-prefixed JSON frames over a UNIX stream
//! socket, the async client used by transfer drivers, and a lightweight
//! in-process scheduler serving the same wire contract for tests and
//! single-node deployments.

mod client;
mod frame;
mod msg;
pub mod sim;

pub use client::Client;
pub use frame::{recv_msg, send_msg, MAX_FRAME};
pub use msg::{
    Erase, MediumGrant, MediumRelease, ReadAlloc, Release, ReleaseKind, Request, RequestBody,
    Response, ResponseBody, SchedError, SplitCandidates, SplitGrant, WriteAlloc,
};
