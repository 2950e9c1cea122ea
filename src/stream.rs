use std::{
    io,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
    thread,
};

use crossbeam_channel::Receiver;
use futures_core::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::dispatch::Notification;
use crate::error::Result;
use crate::events::Event;


/// Stream of inotify events
///
/// Allows for streaming events returned by [`Inotify::event_stream`]. The
/// stream ends after a fatal error, or after the channel was closed and all
/// buffered events were yielded.
///
/// [`Inotify::event_stream`]: crate::Inotify::event_stream
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl EventStream {
    /// Forwards the event queue into a stream from a dedicated thread
    ///
    /// The thread is detached. It ends with the queue, or when the stream is
    /// dropped.
    pub(crate) fn spawn(queue: Receiver<Notification>, name: String)
        -> io::Result<Self>
    {
        let (tx, rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                for notification in queue {
                    if tx.send(notification).is_err() {
                        trace!("event stream dropped, stopping dispatch thread");
                        return;
                    }
                }
            })?;

        Ok(EventStream { rx })
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<Self::Item>>
    {
        self.rx.poll_recv(cx)
    }
}
