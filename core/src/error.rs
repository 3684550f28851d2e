//! Maps the `std::io::Error`/errno vocabulary the core actually raises onto
//! the five named error kinds §7 of the design exposes to the control
//! surface. Kept as a thin `From<io::Error>` impl rather than threading a
//! dedicated error type through every internal call site: nothing else in
//! the teacher's lineage (`rufs`, `fuse-ufs`) reaches for one either, and
//! `io::Error` already carries the errno the FUSE/CLI boundary needs.

use std::io;

/// Error kinds surfaced to the administrative control surface (§6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Out-of-range id, path too long, self-delete of the live snapshot.
    InvalidArgument,
    /// Snapshot id absent, directory entry missing.
    NotFound,
    /// Any of the three bitmaps exhausted.
    NoSpace,
    /// Block read/write failure; already-taken refcount increments are a
    /// declared capacity loss, not corruption.
    IoError,
    /// File-size or directory-subfile limit exceeded.
    TooBig,
    /// Snapshot operation attempted while a freeze could not be taken, or
    /// was attempted against the live slot.
    Busy,
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FsError::InvalidArgument => "invalid argument",
            FsError::NotFound => "not found",
            FsError::NoSpace => "no space",
            FsError::IoError => "I/O error",
            FsError::TooBig => "too big",
            FsError::Busy => "permission / frozen",
        };
        f.write_str(s)
    }
}

impl std::error::Error for FsError {}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ENOENT) => FsError::NotFound,
            Some(libc::ENOSPC) => FsError::NoSpace,
            Some(libc::EINVAL) | Some(libc::ENAMETOOLONG) | Some(libc::ENOTEMPTY) => {
                FsError::InvalidArgument
            }
            Some(libc::EFBIG) => FsError::TooBig,
            Some(libc::EBUSY) | Some(libc::EAGAIN) => FsError::Busy,
            _ => FsError::IoError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_errnos() {
        assert_eq!(FsError::from(crate::err!(ENOENT)), FsError::NotFound);
        assert_eq!(FsError::from(crate::err!(ENOSPC)), FsError::NoSpace);
        assert_eq!(FsError::from(crate::err!(EBUSY)), FsError::Busy);
    }

    #[test]
    fn unknown_errno_is_io_error() {
        let e = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(FsError::from(e), FsError::IoError);
    }
}
