use std::{
    io,
    thread::{
        self,
        JoinHandle,
    },
    time::Duration,
};

use crossbeam_channel::{
    Receiver,
    RecvTimeoutError,
    Sender,
    TryRecvError,
};
use tracing::trace;

use crate::error::{
    Error,
    Result,
};
use crate::events::Event;


/// What the read loop hands to the consumer
pub(crate) type Notification = Result<Event>;

/// Creates the queue between the read loop and the consumer
///
/// The queue is unbounded: the read loop must never wait for a slow consumer,
/// or the kernel's own queue would overflow instead.
pub(crate) fn queue() -> (Dispatcher, Receiver<Notification>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Dispatcher { tx, consumer_gone: false }, rx)
}


/// Sending half of the event queue, owned by the read loop
#[derive(Debug)]
pub(crate) struct Dispatcher {
    tx: Sender<Notification>,
    consumer_gone: bool,
}

impl Dispatcher {
    /// Forwards an event, never blocking
    pub(crate) fn emit(&mut self, event: Event) {
        if self.tx.send(Ok(event)).is_err() && !self.consumer_gone {
            // The consumer dropped its end. Keep reading anyway, so the
            // watch table keeps tracking the kernel.
            trace!("event consumer is gone, discarding events");
            self.consumer_gone = true;
        }
    }

    /// Forwards a terminal error
    ///
    /// Consumes the dispatcher, so nothing can follow the error.
    pub(crate) fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}


/// Receiving end of an inotify channel's events
///
/// Obtained from [`Inotify::events`]. Yields events in the order the kernel
/// produced them. After a fatal error has been received, or after the channel
/// was closed and all buffered events were taken, the receiver is finished
/// and every method returns `None`.
///
/// [`Inotify::events`]: crate::Inotify::events
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<Notification>,
}

impl EventReceiver {
    pub(crate) fn new(rx: Receiver<Notification>) -> Self {
        EventReceiver {
            rx,
        }
    }

    /// Blocks until the next event is available
    ///
    /// Returns `None` once the receiver is finished.
    pub fn recv(&self) -> Option<Result<Event>> {
        self.rx.recv().ok()
    }

    /// Blocks until the next event is available, or `timeout` elapsed
    ///
    /// Returns `None` on timeout, or if the receiver is finished.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<Event>> {
        match self.rx.recv_timeout(timeout) {
            Ok(notification)                   => Some(notification),
            Err(RecvTimeoutError::Timeout)      => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns the next event, if one is available right now
    pub fn try_recv(&self) -> Option<Result<Event>> {
        match self.rx.try_recv() {
            Ok(notification)                => Some(notification),
            Err(TryRecvError::Empty)        => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking iterator over all remaining events
    pub fn iter(&self) -> impl Iterator<Item = Result<Event>> + '_ {
        self.rx.iter()
    }

    /// Number of events waiting to be taken
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true`, if no event is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl IntoIterator for EventReceiver {
    type Item     = Result<Event>;
    type IntoIter = crossbeam_channel::IntoIter<Notification>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}


/// Runs `callback` for every event on a dedicated thread
///
/// The thread ends after the queue is finished.
pub(crate) fn spawn_callback<F>(rx: Receiver<Notification>, name: String, mut callback: F)
    -> io::Result<JoinHandle<()>>
    where F: FnMut(Result<Event>) + Send + 'static
{
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            for notification in rx {
                callback(notification);
            }
            trace!("event queue finished, stopping dispatch thread");
        })
}


#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::mpsc,
        time::Duration,
    };

    use crate::error::Error;
    use crate::events::Event;
    use crate::watches::WatchDescriptor;

    use super::{
        queue,
        spawn_callback,
        EventReceiver,
    };

    #[test]
    fn receiver_should_see_events_in_order_then_the_error_then_nothing() {
        let (mut dispatcher, rx) = queue();
        let receiver = EventReceiver::new(rx);

        let mut first = Event::overflow(WatchDescriptor::detached(-1));
        first.path = Some(PathBuf::from("/first"));
        dispatcher.emit(first);
        dispatcher.emit(Event::overflow(WatchDescriptor::detached(-1)));
        dispatcher.fail(Error::ChannelClosed);

        let first = receiver.recv().unwrap().unwrap();
        assert_eq!(first.path, Some(PathBuf::from("/first")));
        assert!(receiver.recv().unwrap().unwrap().path.is_none());
        assert!(matches!(receiver.recv(), Some(Err(Error::ChannelClosed))));
        assert!(receiver.recv().is_none());
        assert!(receiver.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn emit_should_not_block_without_consumer() {
        let (mut dispatcher, rx) = queue();
        drop(rx);

        for _ in 0..1000 {
            dispatcher.emit(Event::overflow(WatchDescriptor::detached(-1)));
        }
    }

    #[test]
    fn callback_should_run_for_each_event_until_the_queue_ends() {
        let (mut dispatcher, rx) = queue();
        let (tx, seen) = mpsc::channel();

        let handle = spawn_callback(rx, "test-dispatch".into(), move |notification| {
            tx.send(notification.is_ok()).unwrap();
        })
        .unwrap();

        dispatcher.emit(Event::overflow(WatchDescriptor::detached(-1)));
        dispatcher.fail(Error::ChannelClosed);
        handle.join().unwrap();

        let seen: Vec<_> = seen.iter().collect();
        assert_eq!(seen, vec![true, false]);
    }
}
