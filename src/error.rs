use std::{
    io,
    os::raw::c_int,
    path::PathBuf,
};

use thiserror::Error;


/// Result type used throughout this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by an inotify channel
///
/// Registration errors are returned from [`Watches::add`] and
/// [`Watches::remove`] directly. [`Error::Decode`] and [`Error::Read`] are
/// asynchronous: they are delivered to the event consumer exactly once, after
/// which the channel is closed and no further events follow.
///
/// [`Watches::add`]: crate::Watches::add
/// [`Watches::remove`]: crate::Watches::remove
#[derive(Debug, Error)]
pub enum Error {
    /// The kernel refused to allocate an inotify instance
    ///
    /// Usually means the per-user instance limit or the process file
    /// descriptor limit has been reached.
    #[error("failed to initialize inotify: {0}")]
    ChannelInit(#[source] io::Error),

    /// The path to watch does not exist
    #[error("path not found: {}", path.display())]
    PathNotFound {
        /// The path passed to the failed registration
        path: PathBuf,
        /// Error returned by the kernel
        #[source]
        source: io::Error,
    },

    /// The path to watch is not readable by this process
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        /// The path passed to the failed registration
        path: PathBuf,
        /// Error returned by the kernel
        #[source]
        source: io::Error,
    },

    /// The kernel rejected the watch for any other reason
    ///
    /// This covers the per-user watch limit, `ONLYDIR` on a non-directory and
    /// masks without any event bits.
    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        /// The path passed to the failed registration
        path: PathBuf,
        /// Error returned by the kernel
        #[source]
        source: io::Error,
    },

    /// A raw mask contained bits that are not valid for registration
    #[error("invalid watch mask {0:#010x}")]
    InvalidMask(u32),

    /// The watch descriptor is not tracked by this channel
    ///
    /// It was already removed (explicitly, by the kernel, or after a one-shot
    /// event), or it was issued by a different channel.
    #[error("unknown watch descriptor {0}")]
    UnknownHandle(c_int),

    /// The channel was closed, or terminated after a fatal error
    #[error("inotify channel is closed")]
    ChannelClosed,

    /// An event consumer was already attached to this channel
    #[error("an event consumer is already attached")]
    ConsumerAttached,

    /// The kernel returned a buffer that could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Reading from the inotify descriptor failed
    #[error("failed to read inotify events: {0}")]
    Read(#[source] io::Error),
}

impl Error {
    /// Maps a failed `inotify_add_watch` to the matching variant
    pub(crate) fn from_add_watch(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound         =>
                Error::PathNotFound { path, source },
            io::ErrorKind::PermissionDenied =>
                Error::PermissionDenied { path, source },
            _ =>
                Error::Watch { path, source },
        }
    }

    /// Returns `true` for errors that end the read loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::Read(_))
    }
}


/// A read buffer violated the inotify record format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes remained than a record header needs
    #[error("truncated event record at offset {offset}: {remaining} bytes left, header needs {needed}")]
    TruncatedHeader {
        /// Offset of the record within the buffer
        offset: usize,
        /// Bytes left in the buffer at that offset
        remaining: usize,
        /// Size of a record header
        needed: usize,
    },

    /// A record declared a name longer than the rest of the buffer
    #[error("event record at offset {offset} declares a {len} byte name, but only {remaining} bytes follow")]
    NameOverrun {
        /// Offset of the record within the buffer
        offset: usize,
        /// Name length declared by the record
        len: usize,
        /// Bytes left after the header
        remaining: usize,
    },
}


#[cfg(test)]
mod tests {
    use std::{
        io,
        path::PathBuf,
    };

    use super::Error;

    fn add_watch_error(errno: i32) -> Error {
        Error::from_add_watch(
            PathBuf::from("/watched"),
            io::Error::from_raw_os_error(errno),
        )
    }

    #[test]
    fn add_watch_errors_should_map_to_matching_variants() {
        match add_watch_error(libc::EACCES) {
            Error::PermissionDenied { path, source } => {
                assert_eq!(path, PathBuf::from("/watched"));
                assert_eq!(source.raw_os_error(), Some(libc::EACCES));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        match add_watch_error(libc::ENOENT) {
            Error::PathNotFound { path, source } => {
                assert_eq!(path, PathBuf::from("/watched"));
                assert_eq!(source.raw_os_error(), Some(libc::ENOENT));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        match add_watch_error(libc::ENOSPC) {
            Error::Watch { path, source } => {
                assert_eq!(path, PathBuf::from("/watched"));
                assert_eq!(source.raw_os_error(), Some(libc::ENOSPC));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn only_read_and_decode_errors_should_be_fatal() {
        assert!(Error::Read(io::Error::from_raw_os_error(libc::EIO)).is_fatal());
        assert!(!add_watch_error(libc::EACCES).is_fatal());
        assert!(!Error::ChannelClosed.is_fatal());
    }
}
