use std::{
    io,
    mem,
    os::unix::io::RawFd,
};

use inotify_sys as ffi;
use libc::{
    c_void,
    size_t,
};


/// Size of an event record header, without the name that may follow it
pub(crate) const EVENT_HEADER_SIZE: usize = mem::size_of::<ffi::inotify_event>();

/// Smallest read buffer that is guaranteed to fit one event
///
/// A read into a buffer that can't hold the next event fails with `EINVAL`,
/// so buffers passed to [`read_into_buffer`] should never be smaller than
/// this.
pub(crate) const MIN_BUFFER_SIZE: usize =
    EVENT_HEADER_SIZE + libc::NAME_MAX as usize + 1;

/// Reads raw event records from `fd`
///
/// The kernel only ever places complete records into the buffer.
pub(crate) fn read_into_buffer(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let result = unsafe {
        libc::read(
            fd,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len() as size_t,
        )
    };

    match result {
        -1 => Err(io::Error::last_os_error()),
        n  => Ok(n as usize),
    }
}
