use std::{
    io,
    os::unix::io::{
        AsRawFd,
        RawFd,
    },
    sync::atomic::{
        AtomicI32,
        Ordering,
    },
};


/// Owns the inotify file descriptor
///
/// The descriptor is released exactly once, either through an explicit call
/// to [`FdGuard::close`] or when the guard is dropped. After release, the
/// guard reports `-1`, which makes any later syscall fail with `EBADF` instead
/// of hitting a descriptor number the process may have reused.
#[derive(Debug)]
pub(crate) struct FdGuard {
    fd: AtomicI32,
}

impl FdGuard {
    pub(crate) fn new(fd: RawFd) -> Self {
        FdGuard {
            fd: AtomicI32::new(fd),
        }
    }

    /// Returns `true`, if the descriptor has not been released yet
    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.fd.load(Ordering::Acquire) != -1
    }

    /// Releases the descriptor
    ///
    /// Calling this more than once is a no-op.
    pub(crate) fn close(&self) -> io::Result<()> {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd == -1 {
            return Ok(());
        }

        match unsafe { libc::close(fd) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl AsRawFd for FdGuard {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        let fd = *self.fd.get_mut();
        if fd != -1 {
            unsafe { libc::close(fd); }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        os::unix::io::{
            AsRawFd,
            IntoRawFd,
        },
    };

    use super::FdGuard;

    #[test]
    fn close_should_be_idempotent() {
        let fd = File::open("/dev/null").unwrap().into_raw_fd();

        let guard = FdGuard::new(fd);
        assert!(guard.is_open());

        guard.close().unwrap();
        assert!(!guard.is_open());
        assert_eq!(guard.as_raw_fd(), -1);

        guard.close().unwrap();
    }
}
