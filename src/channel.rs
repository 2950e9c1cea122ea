use std::{
    ffi::CString,
    io,
    os::unix::{
        ffi::OsStrExt,
        io::AsRawFd,
    },
    path::Path,
    sync::Arc,
};

use inotify_sys as ffi;
use mio::{
    unix::SourceFd,
    Interest,
    Poll,
    Token,
    Waker,
};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{
    Error,
    Result,
};
use crate::events::{
    Event,
    RawRecord,
};
use crate::fd_guard::FdGuard;
use crate::watches::{
    WatchDescriptor,
    WatchMask,
    WatchTable,
};


/// Readiness token of the inotify descriptor
pub(crate) const INOTIFY: Token = Token(0);

/// Readiness token of the shutdown waker
pub(crate) const SHUTDOWN: Token = Token(1);


/// Lifecycle of a channel
///
/// `Open` to `Closed` is the only transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Open,
    Closed,
}

/// Owns the inotify descriptor and every syscall made against it
///
/// Registration takes the state lock for reading, so any number of threads
/// can add and remove watches at once. [`NotificationChannel::shut_down`]
/// takes it for writing, so no kernel call can be in flight while the channel
/// closes.
#[derive(Debug)]
pub(crate) struct NotificationChannel {
    fd: FdGuard,
    table: WatchTable,
    state: RwLock<ChannelState>,
    waker: Waker,
}

impl NotificationChannel {
    /// Creates the inotify instance, and the poll the read loop waits on
    pub(crate) fn open() -> Result<(Arc<Self>, Poll)> {
        // `IN_NONBLOCK`, because the read loop waits for readiness through
        // `poll` and then drains the descriptor until it would block.
        let fd = unsafe { ffi::inotify_init1(ffi::IN_CLOEXEC | ffi::IN_NONBLOCK) };
        if fd == -1 {
            return Err(Error::ChannelInit(io::Error::last_os_error()));
        }
        let fd = FdGuard::new(fd);

        let poll = Poll::new().map_err(Error::ChannelInit)?;
        poll.registry()
            .register(
                &mut SourceFd(&fd.as_raw_fd()),
                INOTIFY,
                Interest::READABLE,
            )
            .map_err(Error::ChannelInit)?;
        let waker = Waker::new(poll.registry(), SHUTDOWN)
            .map_err(Error::ChannelInit)?;

        debug!(fd = fd.as_raw_fd(), "opened inotify channel");

        let channel = NotificationChannel {
            fd,
            table: WatchTable::new(),
            state: RwLock::new(ChannelState::Open),
            waker,
        };

        Ok((Arc::new(channel), poll))
    }

    pub(crate) fn register(self: &Arc<Self>, path: &Path, mask: WatchMask)
        -> Result<WatchDescriptor>
    {
        let state = self.state.read();
        if *state == ChannelState::Closed {
            return Err(Error::ChannelClosed);
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|error| Error::Watch {
                path  : path.to_path_buf(),
                source: error.into(),
            })?;

        let (id, generation) = self.table
            .insert_with(path, mask, || {
                let wd = unsafe {
                    ffi::inotify_add_watch(
                        self.fd.as_raw_fd(),
                        c_path.as_ptr() as *const _,
                        mask.bits(),
                    )
                };
                match wd {
                    -1 => Err(io::Error::last_os_error()),
                    _  => Ok(wd),
                }
            })
            .map_err(|error| Error::from_add_watch(path.to_path_buf(), error))?;

        debug!(wd = id, path = %path.display(), mask = ?mask, "added watch");

        Ok(WatchDescriptor::new(id, generation, Arc::downgrade(self)))
    }

    pub(crate) fn deregister(self: &Arc<Self>, wd: &WatchDescriptor) -> Result<()> {
        let state = self.state.read();
        if *state == ChannelState::Closed {
            return Err(Error::ChannelClosed);
        }

        if !wd.belongs_to(self) {
            return Err(Error::UnknownHandle(wd.id));
        }

        self.table.retire_with(wd.id, wd.generation, || {
            let result = unsafe { ffi::inotify_rm_watch(self.fd.as_raw_fd(), wd.id) };
            match result {
                0  => Ok(()),
                -1 => Err(io::Error::last_os_error()),
                _  => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("unexpected return code from inotify_rm_watch ({})", result),
                )),
            }
        })?;

        debug!(wd = wd.id, "removed watch");
        Ok(())
    }

    /// Resolves a decoded record into the event handed to the consumer
    pub(crate) fn resolve(self: &Arc<Self>, record: &RawRecord<'_>) -> Event {
        let resolved = self.table.resolve(record);
        let wd = WatchDescriptor::new(
            record.wd,
            resolved.generation,
            Arc::downgrade(self),
        );

        Event::new(wd, resolved.path, record)
    }

    /// The event reported when the kernel dropped events
    ///
    /// Looks exactly like what [`NotificationChannel::resolve`] makes of a
    /// kernel `Q_OVERFLOW` record: id `-1`, no generation, no path.
    pub(crate) fn overflow(self: &Arc<Self>) -> Event {
        Event::overflow(WatchDescriptor::new(-1, 0, Arc::downgrade(self)))
    }

    /// Moves the channel to `Closed`
    ///
    /// Forgets all watches and wakes the read loop, so it notices. The
    /// descriptor stays open until [`NotificationChannel::release`], since the
    /// read loop may still be about to use it.
    ///
    /// Returns `true`, if this call made the transition.
    pub(crate) fn shut_down(&self) -> bool {
        let mut state = self.state.write();
        if *state == ChannelState::Closed {
            return false;
        }
        *state = ChannelState::Closed;

        self.table.clear();

        // If this fails, the read loop can't be woken. There is nothing left
        // to do about it at this point.
        if let Err(error) = self.waker.wake() {
            debug!(%error, "failed to wake read loop");
        }

        true
    }

    /// Releases the descriptor
    ///
    /// Must only be called after the read loop has terminated.
    pub(crate) fn release(&self) -> io::Result<()> {
        self.fd.close()
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.state.read() == ChannelState::Closed
    }

    pub(crate) fn table(&self) -> &WatchTable {
        &self.table
    }
}

impl AsRawFd for NotificationChannel {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.fd.as_raw_fd()
    }
}


#[cfg(test)]
mod tests {
    use std::fs::File;

    use tempdir::TempDir;

    use crate::error::Error;
    use crate::watches::WatchMask;

    use super::NotificationChannel;

    #[test]
    fn register_after_shut_down_should_fail() {
        let dir = TempDir::new("inotify-channel-test").unwrap();
        let (channel, _poll) = NotificationChannel::open().unwrap();

        assert!(channel.shut_down());
        assert!(!channel.shut_down());

        match channel.register(dir.path(), WatchMask::ALL_EVENTS) {
            Err(Error::ChannelClosed) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        channel.release().unwrap();
        channel.release().unwrap();
    }

    #[test]
    fn shut_down_should_forget_watches() {
        let dir = TempDir::new("inotify-channel-test").unwrap();
        File::create(dir.path().join("file")).unwrap();
        let (channel, _poll) = NotificationChannel::open().unwrap();

        let wd = channel.register(&dir.path().join("file"), WatchMask::MODIFY).unwrap();
        assert_eq!(channel.table().len(), 1);

        channel.shut_down();
        assert_eq!(channel.table().len(), 0);
        assert!(matches!(channel.deregister(&wd), Err(Error::ChannelClosed)));
    }

    #[test]
    fn deregister_should_reject_descriptor_of_other_channel() {
        let dir = TempDir::new("inotify-channel-test").unwrap();
        let (first, _first_poll)   = NotificationChannel::open().unwrap();
        let (second, _second_poll) = NotificationChannel::open().unwrap();

        let wd = first.register(dir.path(), WatchMask::CREATE).unwrap();

        match second.deregister(&wd) {
            Err(Error::UnknownHandle(id)) => assert_eq!(id, wd.id()),
            other => panic!("unexpected result: {:?}", other),
        }
        first.deregister(&wd).unwrap();
    }
}
