use crate::MediumId;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy shared by every layer of the store.
///
/// Each variant maps onto a negated POSIX errno through [`Error::errno`],
/// which is the code surfaced at the API boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Input errors.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("object '{0}' maps to more than one uuid")]
    AmbiguousOid(String),

    // Not-found errors.
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("no copy '{copy_name}' of object {uuid} v{version}")]
    NoSuchCopy {
        uuid: uuid::Uuid,
        version: u32,
        copy_name: String,
    },
    #[error("no such extent: {0}")]
    NoSuchExtent(uuid::Uuid),
    #[error("no such medium: {0}")]
    NoSuchMedium(MediumId),
    #[error("no layout for object {0}")]
    NoSuchLayout(uuid::Uuid),
    #[error("no lock on resource '{0}'")]
    NoSuchLock(String),

    // Concurrency errors.
    #[error("resource '{0}' already exists or is locked")]
    AlreadyExists(String),
    #[error("lock on '{0}' is owned by another process")]
    LockOwnerMismatch(String),

    // Resource errors.
    #[error("no host can currently reach the object: {0}")]
    RetryLater(String),
    #[error("no usable medium: {0}")]
    NoDevice(String),
    #[error("no space left on eligible media")]
    NoSpace,
    #[error("cannot resolve the local hostname")]
    NoHostname,
    #[error("object is served by host '{0}'")]
    Remote(String),

    // Integrity errors.
    #[error("data integrity: {0}")]
    Integrity(String),

    // Transport errors.
    #[error("resource scheduler transport: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The negated POSIX errno representing this error at the API boundary.
    pub fn errno(&self) -> i32 {
        let errno = match self {
            Error::InvalidInput(_) | Error::AmbiguousOid(_) => libc::EINVAL,
            Error::NoSuchObject(_)
            | Error::NoSuchCopy { .. }
            | Error::NoSuchExtent(_)
            | Error::NoSuchLayout(_)
            | Error::NoSuchMedium(_) => libc::ENOENT,
            Error::NoSuchLock(_) => libc::ENOLCK,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::LockOwnerMismatch(_) => libc::EACCES,
            Error::RetryLater(_) => libc::EAGAIN,
            Error::NoDevice(_) => libc::ENODEV,
            Error::NoSpace => libc::ENOSPC,
            Error::NoHostname => libc::EADDRNOTAVAIL,
            Error::Remote(_) => libc::EREMOTE,
            Error::Integrity(_) => libc::EIO,
            Error::Transport(_) => libc::EPIPE,
            Error::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        };
        -errno
    }

    /// Whether this error concerns media availability at large, rather than
    /// one transfer. Such errors become the batch-level representative code.
    pub fn is_medium_global(&self) -> bool {
        matches!(
            self,
            Error::RetryLater(_) | Error::NoDevice(_) | Error::NoSpace
        )
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NoSuchObject("x".into()).errno(), -libc::ENOENT);
        assert_eq!(Error::AmbiguousOid("x".into()).errno(), -libc::EINVAL);
        assert_eq!(Error::RetryLater("busy".into()).errno(), -libc::EAGAIN);
        assert_eq!(Error::NoDevice("none".into()).errno(), -libc::ENODEV);
        assert_eq!(Error::Remote("other".into()).errno(), -libc::EREMOTE);
        assert_eq!(Error::AlreadyExists("oid".into()).errno(), -libc::EEXIST);
        assert_eq!(Error::NoHostname.errno(), -libc::EADDRNOTAVAIL);
        assert_eq!(Error::Integrity("md5".into()).errno(), -libc::EIO);
    }

    #[test]
    fn test_medium_global_classification() {
        assert!(Error::RetryLater("busy".into()).is_medium_global());
        assert!(Error::NoSpace.is_medium_global());
        assert!(!Error::NoSuchObject("x".into()).is_medium_global());
        assert!(!Error::Integrity("md5".into()).is_medium_global());
    }
}
