use std::{
    ffi::{
        OsStr,
        OsString,
    },
    os::{
        raw::c_int,
        unix::ffi::OsStrExt,
    },
    path::PathBuf,
};

use inotify_sys as ffi;

use crate::error::DecodeError;
use crate::util::EVENT_HEADER_SIZE;
use crate::watches::WatchDescriptor;


/// Iterator over the raw records in one read buffer
///
/// Yields records in the order the kernel wrote them. After the first
/// [`DecodeError`], the iterator is exhausted: nothing behind a corrupt
/// record can be trusted.
#[derive(Debug)]
pub struct Records<'a> {
    buffer: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Records<'a> {
    /// Decodes `buffer`, which must hold exactly the bytes returned by a
    /// single read from the inotify descriptor
    pub fn new(buffer: &'a [u8]) -> Self {
        Records {
            buffer,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<RawRecord<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buffer.len() {
            return None;
        }

        match RawRecord::from_buffer(self.buffer, self.pos) {
            Ok((step, record)) => {
                self.pos += step;
                Some(Ok(record))
            }
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

/// Decodes all records in `buffer`
///
/// Either every record is valid and returned in order, or the whole buffer is
/// rejected.
pub fn decode(buffer: &[u8]) -> Result<Vec<RawRecord<'_>>, DecodeError> {
    Records::new(buffer).collect()
}


/// One event record, as laid out by the kernel
///
/// Borrows its name from the read buffer, so it only lives as long as the
/// decode step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawRecord<'a> {
    /// Kernel watch descriptor, `-1` for queue overflow records
    pub wd: c_int,

    /// Event bits, including result-only flags
    pub mask: EventMask,

    /// Correlates `MOVED_FROM` with `MOVED_TO`, `0` otherwise
    pub cookie: u32,

    /// Entry name inside a watched directory
    ///
    /// `None` if the event concerns the watched path itself.
    pub name: Option<&'a OsStr>,
}

impl<'a> RawRecord<'a> {
    /// Decodes the record that starts at `offset`
    ///
    /// Returns the number of bytes the record occupies, including the padding
    /// of its name, along with the record.
    pub(crate) fn from_buffer(buffer: &'a [u8], offset: usize)
        -> Result<(usize, Self), DecodeError>
    {
        let record = &buffer[offset..];

        if record.len() < EVENT_HEADER_SIZE {
            return Err(DecodeError::TruncatedHeader {
                offset,
                remaining: record.len(),
                needed   : EVENT_HEADER_SIZE,
            });
        }

        // The buffer has alignment 1, `inotify_event` has alignment 4, so the
        // header has to be copied out rather than dereferenced in place.
        let header = unsafe {
            (record.as_ptr() as *const ffi::inotify_event).read_unaligned()
        };

        let len       = header.len as usize;
        let remaining = record.len() - EVENT_HEADER_SIZE;
        if len > remaining {
            return Err(DecodeError::NameOverrun {
                offset,
                len,
                remaining,
            });
        }

        let consumed = EVENT_HEADER_SIZE + len;

        // The name is padded with '\0' up to the next alignment boundary.
        let name = &record[EVENT_HEADER_SIZE..consumed];
        let name = match name.iter().position(|b| *b == 0) {
            Some(end) => &name[..end],
            None      => name,
        };
        let name = if name.is_empty() {
            None
        }
        else {
            Some(OsStr::from_bytes(name))
        };

        let record = RawRecord {
            wd    : header.wd,
            mask  : EventMask::from_bits_retain(header.mask),
            cookie: header.cookie,
            name,
        };

        Ok((consumed, record))
    }
}


/// A resolved filesystem event
///
/// Produced by the read loop for every decoded record and handed to the
/// consumer as is.
#[derive(Clone, Debug)]
pub struct Event {
    /// The watch this event originates from
    ///
    /// Equal to the [`WatchDescriptor`] returned when the watch was added.
    /// For overflow events, the descriptor's id is `-1`.
    pub wd: WatchDescriptor,

    /// The path the watch was registered for
    ///
    /// `None` if the watch was no longer tracked when the event was resolved,
    /// and for overflow events.
    pub path: Option<PathBuf>,

    /// Name of the entry inside a watched directory
    ///
    /// `None` if the event concerns the watched path itself.
    pub name: Option<OsString>,

    /// Indicates what kind of event this is
    pub mask: EventMask,

    /// Connects a [`MOVED_FROM`] event with its [`MOVED_TO`] counterpart
    ///
    /// `0` for all other events.
    ///
    /// [`MOVED_FROM`]: EventMask::MOVED_FROM
    /// [`MOVED_TO`]: EventMask::MOVED_TO
    pub cookie: u32,
}

impl Event {
    pub(crate) fn new(
        wd    : WatchDescriptor,
        path  : Option<PathBuf>,
        record: &RawRecord<'_>,
    )
        -> Self
    {
        Event {
            wd,
            path,
            name  : record.name.map(OsStr::to_os_string),
            mask  : record.mask,
            cookie: record.cookie,
        }
    }

    /// Events were dropped by the kernel
    pub(crate) fn overflow(wd: WatchDescriptor) -> Self {
        Event {
            wd,
            path  : None,
            name  : None,
            mask  : EventMask::Q_OVERFLOW,
            cookie: 0,
        }
    }

    /// The path of the entry the event concerns
    ///
    /// Joins [`path`](Self::path) and [`name`](Self::name). Returns `None`
    /// if the watched path is unknown.
    pub fn full_path(&self) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        Some(match &self.name {
            Some(name) => path.join(name),
            None       => path.clone(),
        })
    }

    /// The kernel's event queue overflowed and events were lost
    ///
    /// Existing watches stay valid.
    pub fn is_overflow(&self) -> bool {
        self.mask.contains(EventMask::Q_OVERFLOW)
    }

    /// The watch was removed, and its descriptor is no longer valid
    pub fn is_watch_removed(&self) -> bool {
        self.mask.contains(EventMask::IGNORED)
    }

    /// The subject of the event is a directory
    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }
}


bitflags! {
    /// Indicates the type of an event
    ///
    /// Bit values are those of the kernel ABI. Besides the event types that can
    /// be watched for (see [`WatchMask`]), an event mask may carry the
    /// result-only flags `IGNORED`, `ISDIR`, `Q_OVERFLOW` and `UNMOUNT`.
    ///
    /// [`WatchMask`]: crate::WatchMask
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct EventMask: u32 {
        /// File was accessed
        const ACCESS = ffi::IN_ACCESS;

        /// Metadata (permissions, timestamps, link count, ...) changed
        const ATTRIB = ffi::IN_ATTRIB;

        /// File opened for writing was closed
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// File or directory not opened for writing was closed
        const CLOSE_NOWRITE = ffi::IN_CLOSE_NOWRITE;

        /// Entry created in watched directory
        const CREATE = ffi::IN_CREATE;

        /// Entry deleted from watched directory
        const DELETE = ffi::IN_DELETE;

        /// Watched file/directory was itself deleted
        const DELETE_SELF = ffi::IN_DELETE_SELF;

        /// File was modified
        const MODIFY = ffi::IN_MODIFY;

        /// Watched file/directory was itself moved
        const MOVE_SELF = ffi::IN_MOVE_SELF;

        /// Entry moved out of watched directory
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// Entry moved into watched directory
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// File or directory was opened
        const OPEN = ffi::IN_OPEN;

        /// Watch was removed
        ///
        /// Generated when the watch is removed explicitly, after a one-shot
        /// watch fired, or because the watched object was deleted or its file
        /// system unmounted. The watch descriptor is invalid afterwards.
        const IGNORED = ffi::IN_IGNORED;

        /// The subject of the event is a directory
        const ISDIR = ffi::IN_ISDIR;

        /// Event queue overflowed, events have been lost
        const Q_OVERFLOW = ffi::IN_Q_OVERFLOW;

        /// File system containing the watched object was unmounted
        ///
        /// An `IGNORED` event for the same watch follows.
        const UNMOUNT = ffi::IN_UNMOUNT;
    }
}

impl EventMask {
    /// The event type encoded in this mask
    ///
    /// The kernel sets at most one event type bit per record. Returns `None`
    /// for records that only carry result-only flags, like `IGNORED` or
    /// `Q_OVERFLOW`.
    pub fn kind(self) -> Option<EventKind> {
        EventKind::BITFLAG_ENUM_MAP
            .iter()
            .find(|(bit, _)| self.contains(*bit))
            .map(|(_, kind)| *kind)
    }
}


/// The type of an inotify event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File was accessed
    Access,
    /// Metadata changed
    Attrib,
    /// File opened for writing was closed
    CloseWrite,
    /// File or directory not opened for writing was closed
    CloseNowrite,
    /// Entry created in watched directory
    Create,
    /// Entry deleted from watched directory
    Delete,
    /// Watched file/directory was itself deleted
    DeleteSelf,
    /// File was modified
    Modify,
    /// Watched file/directory was itself moved
    MoveSelf,
    /// Entry moved out of watched directory
    MovedFrom,
    /// Entry moved into watched directory
    MovedTo,
    /// File or directory was opened
    Open,
}

impl EventKind {
    const BITFLAG_ENUM_MAP: &'static [(EventMask, EventKind)] = &[
        (EventMask::ACCESS,        EventKind::Access),
        (EventMask::ATTRIB,        EventKind::Attrib),
        (EventMask::CLOSE_WRITE,   EventKind::CloseWrite),
        (EventMask::CLOSE_NOWRITE, EventKind::CloseNowrite),
        (EventMask::CREATE,        EventKind::Create),
        (EventMask::DELETE,        EventKind::Delete),
        (EventMask::DELETE_SELF,   EventKind::DeleteSelf),
        (EventMask::MODIFY,        EventKind::Modify),
        (EventMask::MOVE_SELF,     EventKind::MoveSelf),
        (EventMask::MOVED_FROM,    EventKind::MovedFrom),
        (EventMask::MOVED_TO,      EventKind::MovedTo),
        (EventMask::OPEN,          EventKind::Open),
    ];
}
