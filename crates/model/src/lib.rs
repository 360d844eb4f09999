//! Shared data model of the Cellar object store: attribute sets, catalog
//! entities (objects, copies, layouts, extents, media, devices, locks) and
//! the result-code taxonomy used across every layer.

mod attrs;
mod copy;
mod error;
mod extent;
mod layout;
mod lock;
mod medium;
mod object;

pub use attrs::AttrSet;
pub use copy::{CopyInfo, CopyStatus, DEFAULT_COPY_NAME};
pub use error::{Error, Result};
pub use extent::{ExtentInfo, ExtentState};
pub use layout::{LayoutInfo, ATTR_OBJECT_SIZE};
pub use lock::{LockInfo, LockOwner, ResourceType};
pub use medium::{
    AdminStatus, DeviceInfo, Family, FsStatus, MediumFlags, MediumId, MediumInfo, MediumOperation,
    MediumStats,
};
pub use object::{ObjectInfo, ObjectScope};

/// Resolve the hostname of the running process.
pub fn local_hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // Safety: buf outlives the call and its length is passed alongside.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(Error::NoHostname);
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match std::str::from_utf8(&buf[..end]) {
        Ok(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::NoHostname),
    }
}

/// The lock owner identifying this process.
pub fn local_lock_owner() -> Result<LockOwner> {
    Ok(LockOwner {
        hostname: local_hostname()?,
        pid: std::process::id(),
    })
}
