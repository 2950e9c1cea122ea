use std::{
    cmp::Ordering,
    collections::HashMap,
    hash::{
        Hash,
        Hasher,
    },
    io,
    os::raw::c_int,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        atomic::{
            self,
            AtomicU64,
        },
        Arc,
        Weak,
    },
};

use inotify_sys as ffi;
use parking_lot::RwLock;

use crate::channel::NotificationChannel;
use crate::error::{
    Error,
    Result,
};
use crate::events::{
    EventMask,
    RawRecord,
};

bitflags! {
    /// Describes a file system watch
    ///
    /// Passed to [`Watches::add`], to describe what file system events
    /// to watch for, and how to do that. Bit values are those of the kernel
    /// ABI, so a raw mask received from elsewhere can be converted with
    /// [`WatchMask::try_from`].
    ///
    /// # Examples
    ///
    /// Here we add a watch that is triggered both when files are created or
    /// deleted in a directory:
    ///
    /// ``` rust
    /// # use inotify_channel::{
    /// #     Inotify,
    /// #     WatchMask,
    /// # };
    /// #
    /// let inotify = Inotify::init().unwrap();
    /// inotify.watch("/tmp/", WatchMask::CREATE | WatchMask::DELETE)
    ///    .expect("Error adding watch");
    /// ```
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct WatchMask: u32 {
        /// File was accessed
        ///
        /// When watching a directory, this event is only triggered for objects
        /// inside the directory, not the directory itself.
        const ACCESS = ffi::IN_ACCESS;

        /// Metadata (permissions, timestamps, ...) changed
        const ATTRIB = ffi::IN_ATTRIB;

        /// File opened for writing was closed
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// File or directory not opened for writing was closed
        const CLOSE_NOWRITE = ffi::IN_CLOSE_NOWRITE;

        /// Entry created in watched directory
        const CREATE = ffi::IN_CREATE;

        /// Entry deleted from watched directory
        const DELETE = ffi::IN_DELETE;

        /// Watched file/directory was deleted
        const DELETE_SELF = ffi::IN_DELETE_SELF;

        /// File was modified
        const MODIFY = ffi::IN_MODIFY;

        /// Watched file/directory was moved
        const MOVE_SELF = ffi::IN_MOVE_SELF;

        /// Entry moved out of watched directory
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// Entry moved into watched directory
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// File or directory was opened
        const OPEN = ffi::IN_OPEN;

        /// Watch for all events
        const ALL_EVENTS = ffi::IN_ALL_EVENTS;

        /// Watch for both `MOVED_FROM` and `MOVED_TO`
        const MOVE = ffi::IN_MOVE;

        /// Watch for both `CLOSE_WRITE` and `CLOSE_NOWRITE`
        const CLOSE = ffi::IN_CLOSE;

        /// Don't dereference the path if it is a symbolic link
        const DONT_FOLLOW = ffi::IN_DONT_FOLLOW;

        /// Filter events for directory entries that have been unlinked
        const EXCL_UNLINK = ffi::IN_EXCL_UNLINK;

        /// If a watch for the inode exists, amend it instead of replacing it
        const MASK_ADD = ffi::IN_MASK_ADD;

        /// Only receive one event, then remove the watch
        const ONESHOT = ffi::IN_ONESHOT;

        /// Only watch path, if it is a directory
        const ONLYDIR = ffi::IN_ONLYDIR;
    }
}

impl TryFrom<u32> for WatchMask {
    type Error = Error;

    /// Rejects result-only bits (`ISDIR`, `UNMOUNT`, `Q_OVERFLOW`,
    /// `IGNORED`) and bits the kernel doesn't define
    fn try_from(bits: u32) -> Result<Self> {
        WatchMask::from_bits(bits).ok_or(Error::InvalidMask(bits))
    }
}


/// Cloneable handle for adding and removing watches
///
/// Obtained from [`Inotify::watches`]. All clones refer to the same channel,
/// and can be used from any thread while the channel's read loop is running.
///
/// [`Inotify::watches`]: crate::Inotify::watches
#[derive(Clone, Debug)]
pub struct Watches {
    pub(crate) channel: Arc<NotificationChannel>,
}

impl Watches {
    pub(crate) fn new(channel: Arc<NotificationChannel>) -> Self {
        Watches {
            channel,
        }
    }

    /// Adds or updates a watch for the given path
    ///
    /// Returns a watch descriptor that can be used to remove the watch later.
    /// If the path refers to an inode that is already watched, the existing
    /// watch is updated and an equal descriptor is returned. Its mask is
    /// replaced, or extended if `mask` contains [`WatchMask::MASK_ADD`].
    ///
    /// # Errors
    ///
    /// - [`Error::PathNotFound`], if `path` does not exist
    /// - [`Error::PermissionDenied`], if `path` can't be read
    /// - [`Error::Watch`], for any other refusal by the kernel
    /// - [`Error::ChannelClosed`], after [`Inotify::close`]
    ///
    /// [`Inotify::close`]: crate::Inotify::close
    pub fn add<P>(&self, path: P, mask: WatchMask) -> Result<WatchDescriptor>
        where P: AsRef<Path>
    {
        self.channel.register(path.as_ref(), mask)
    }

    /// Stops watching a file
    ///
    /// The kernel confirms the removal asynchronously, with an event carrying
    /// [`EventMask::IGNORED`]. The descriptor is invalid as soon as this
    /// method returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHandle`], if the watch is not active anymore,
    /// or if the descriptor was issued by another channel.
    /// Returns [`Error::ChannelClosed`] after [`Inotify::close`].
    ///
    /// [`Inotify::close`]: crate::Inotify::close
    pub fn remove(&self, wd: &WatchDescriptor) -> Result<()> {
        self.channel.deregister(wd)
    }

    /// Number of active watches
    pub fn len(&self) -> usize {
        self.channel.table().len()
    }

    /// Returns `true`, if no watch is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


/// Represents a watch on an inode
///
/// Can be obtained from [`Watches::add`] or from an [`Event`]. A watch
/// descriptor can be used to stop watching an inode by passing it to
/// [`Watches::remove`].
///
/// [`Event`]: crate::Event
#[derive(Clone, Debug)]
pub struct WatchDescriptor {
    pub(crate) id: c_int,
    pub(crate) generation: u64,
    pub(crate) channel: Weak<NotificationChannel>,
}

impl WatchDescriptor {
    pub(crate) fn new(
        id        : c_int,
        generation: u64,
        channel   : Weak<NotificationChannel>,
    )
        -> Self
    {
        WatchDescriptor {
            id,
            generation,
            channel,
        }
    }

    /// A descriptor that belongs to no channel
    #[cfg(test)]
    pub(crate) fn detached(id: c_int) -> Self {
        WatchDescriptor::new(id, 0, Weak::new())
    }

    /// The kernel's id for this watch
    ///
    /// Can be used to distinguish events for files with the same name.
    pub fn id(&self) -> c_int {
        self.id
    }

    pub(crate) fn belongs_to(&self, channel: &Arc<NotificationChannel>) -> bool {
        Weak::as_ptr(&self.channel) == Arc::as_ptr(channel)
    }
}

impl Eq for WatchDescriptor {}

impl PartialEq for WatchDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.channel.strong_count() > 0
            && Weak::ptr_eq(&self.channel, &other.channel)
    }
}

impl Ord for WatchDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for WatchDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for WatchDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only the id. The channel is a weak pointer that may be gone, and the
        // hash must not change when that happens.
        self.id.hash(state);
    }
}


/// A registered watch
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WatchEntry {
    pub(crate) path: PathBuf,
    pub(crate) mask: WatchMask,
    pub(crate) generation: u64,

    /// `false` once the watch was removed explicitly or fired as one-shot
    ///
    /// A retired entry only waits for the kernel's `IGNORED` record, so that
    /// record can still be resolved to a path.
    pub(crate) active: bool,
}

/// What the table knows about the watch a record belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub(crate) path: Option<PathBuf>,
    pub(crate) generation: u64,
}

/// Maps kernel watch descriptors to registered watches
///
/// Shared between the registration API and the read loop. Slots are keyed by
/// the kernel id and stamped with a generation, so a stale descriptor for a
/// reused id never matches the watch that now owns the slot.
#[derive(Debug)]
pub(crate) struct WatchTable {
    entries: RwLock<HashMap<c_int, WatchEntry>>,
    next_generation: AtomicU64,
}

impl WatchTable {
    pub(crate) fn new() -> Self {
        WatchTable {
            entries        : RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Runs `add_watch` and records its result
    ///
    /// The table stays locked during the kernel call, so the read loop can't
    /// resolve a record for the new watch before it is recorded.
    ///
    /// Returns the kernel id and the generation of the entry.
    pub(crate) fn insert_with<F>(&self, path: &Path, mask: WatchMask, add_watch: F)
        -> io::Result<(c_int, u64)>
        where F: FnOnce() -> io::Result<c_int>
    {
        let mut entries = self.entries.write();

        let id = add_watch()?;

        if let Some(entry) = entries.get_mut(&id) {
            if entry.active {
                if mask.contains(WatchMask::MASK_ADD) {
                    entry.mask |= mask - WatchMask::MASK_ADD;
                }
                else {
                    entry.mask = mask;
                }
                return Ok((id, entry.generation));
            }
        }

        let generation = self.next_generation.fetch_add(1, atomic::Ordering::Relaxed);
        entries.insert(id, WatchEntry {
            path  : path.to_path_buf(),
            mask  : mask - WatchMask::MASK_ADD,
            generation,
            active: true,
        });

        Ok((id, generation))
    }

    /// Retires the watch for `id`, then runs `rm_watch`
    ///
    /// Fails with [`Error::UnknownHandle`] if there is no active watch for
    /// `id` of the given generation. If `rm_watch` fails, the entry stays
    /// active.
    pub(crate) fn retire_with<F>(&self, id: c_int, generation: u64, rm_watch: F)
        -> Result<()>
        where F: FnOnce() -> io::Result<()>
    {
        let mut entries = self.entries.write();

        let entry = match entries.get_mut(&id) {
            Some(entry) if entry.active && entry.generation == generation =>
                entry,
            _ =>
                return Err(Error::UnknownHandle(id)),
        };

        match rm_watch() {
            Ok(()) => {}
            // The kernel dropped the watch on its own (deletion, unmount,
            // one-shot), and its `IGNORED` record hasn't been read yet.
            Err(ref error) if error.raw_os_error() == Some(libc::EINVAL) => {}
            Err(ref error) if error.raw_os_error() == Some(libc::EBADF) =>
                return Err(Error::ChannelClosed),
            Err(source) =>
                return Err(Error::Watch { path: entry.path.clone(), source }),
        }

        entry.active = false;
        Ok(())
    }

    /// Looks up the watch a record belongs to, and applies the record's
    /// effect on the watch's lifecycle
    ///
    /// An `IGNORED` record frees the slot. The first other record for a
    /// one-shot watch retires it.
    pub(crate) fn resolve(&self, record: &RawRecord<'_>) -> Resolved {
        let mut entries = self.entries.write();

        if record.mask.contains(EventMask::IGNORED) {
            return match entries.remove(&record.wd) {
                Some(entry) => Resolved {
                    path      : Some(entry.path),
                    generation: entry.generation,
                },
                None => Resolved {
                    path      : None,
                    generation: 0,
                },
            };
        }

        match entries.get_mut(&record.wd) {
            Some(entry) => {
                if entry.mask.contains(WatchMask::ONESHOT) {
                    entry.active = false;
                }
                Resolved {
                    path      : Some(entry.path.clone()),
                    generation: entry.generation,
                }
            }
            None => Resolved {
                path      : None,
                generation: 0,
            },
        }
    }

    /// Number of active watches
    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.active)
            .count()
    }

    /// The entry for `id`, active or retired
    #[cfg(test)]
    pub(crate) fn get(&self, id: c_int) -> Option<WatchEntry> {
        self.entries.read().get(&id).cloned()
    }

    /// Forgets all watches
    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }
}
