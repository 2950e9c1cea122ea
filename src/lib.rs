#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! Filesystem change notifications over an owned inotify channel
//!
//! [Inotify][wiki] is a linux kernel mechanism for monitoring
//! changes to filesystems' contents.
//!
//! > The inotify API provides a mechanism for monitoring filesystem
//! > events. Inotify can be used to monitor individual files, or to
//! > monitor directories. When a directory is monitored, inotify will
//! > return events for the directory itself, and for files inside the
//! > directory.
//!
//! An [`Inotify`] owns one inotify instance and one background thread that
//! reads from it. Callers add and remove watches from any thread, and receive
//! a single ordered stream of [`Event`]s, each resolved to the path its watch
//! was registered for. Events can be consumed through a callback
//! ([`Inotify::on_event`]), a blocking receiver ([`Inotify::events`]), or an
//! asynchronous stream ([`Inotify::event_stream`], with the `stream` feature).
//!
//! Watches are not recursive: only the paths passed to [`Watches::add`] are
//! watched.
//!
//! See the [man page][inotify7] for usage information
//! of the C version, which this package follows closely.
//!
//! [wiki]: https://en.wikipedia.org/wiki/Inotify
//! [inotify7]: http://man7.org/linux/man-pages/man7/inotify.7.html


#[macro_use]
extern crate bitflags;

mod channel;
mod config;
mod dispatch;
mod error;
mod events;
mod fd_guard;
mod inotify;
mod read_loop;
mod util;
mod watches;

#[cfg(feature = "stream")]
mod stream;


pub use crate::config::{
    Config,
    DEFAULT_BUFFER_SIZE,
};
pub use crate::dispatch::EventReceiver;
pub use crate::error::{
    DecodeError,
    Error,
    Result,
};
pub use crate::events::{
    decode,
    Event,
    EventKind,
    EventMask,
    RawRecord,
    Records,
};
pub use crate::inotify::Inotify;
pub use crate::watches::{
    WatchDescriptor,
    WatchMask,
    Watches,
};

#[cfg(feature = "stream")]
pub use crate::stream::EventStream;
