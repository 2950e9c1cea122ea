use std::{
    path::Path,
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{
    debug,
    warn,
};

use crate::channel::NotificationChannel;
use crate::config::Config;
use crate::dispatch::{
    self,
    EventReceiver,
    Notification,
};
use crate::error::{
    Error,
    Result,
};
use crate::events::Event;
use crate::read_loop::{
    PollSource,
    ReadLoop,
};
use crate::watches::{
    WatchDescriptor,
    WatchMask,
    Watches,
};

#[cfg(feature = "stream")]
use crate::stream::EventStream;


/// Filesystem change notifications over one inotify instance
///
/// `Inotify` owns an inotify descriptor and the background thread that reads
/// from it. Events are decoded, resolved to the path of their watch, and
/// queued for a single consumer, in the exact order the kernel produced them.
/// Attach the consumer with [`Inotify::on_event`], [`Inotify::events`] or
/// [`Inotify::event_stream`]. Events that arrive before then are buffered.
///
/// All methods take `&self`, so an `Inotify` can be shared between threads.
/// Dropping it closes the channel.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use inotify_channel::{
///     Inotify,
///     WatchMask,
/// };
///
/// let inotify = Inotify::init()
///     .expect("Error while initializing inotify instance");
///
/// // Watch for modify and close events.
/// inotify
///     .watch("/tmp", WatchMask::MODIFY | WatchMask::CLOSE)
///     .expect("Failed to add watch");
///
/// let events = inotify.events().expect("Consumer already attached");
/// if let Some(event) = events.recv_timeout(Duration::from_millis(10)) {
///     // Handle event
/// }
///
/// inotify.close();
/// ```
#[derive(Debug)]
pub struct Inotify {
    channel: Arc<NotificationChannel>,
    config: Config,
    worker: Mutex<Option<JoinHandle<()>>>,
    consumer: Mutex<Consumer>,
}

#[derive(Debug)]
enum Consumer {
    /// Nobody took the queue yet
    Waiting(Receiver<Notification>),

    /// The queue was handed out
    Attached,
}

impl Inotify {
    /// Opens an inotify channel with the default [`Config`]
    ///
    /// Initializes an inotify instance with `IN_CLOEXEC` and `IN_NONBLOCK`,
    /// and starts the thread that reads from it.
    ///
    /// Reading starts right away. Until a consumer is attached, events are
    /// kept in an unbounded queue, so attach one soon after adding watches.
    /// Events are never dropped to bound that queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelInit`], if the kernel refuses to create the
    /// instance (usually because a limit was reached), or if the read loop
    /// can't be started.
    pub fn init() -> Result<Inotify> {
        Inotify::with_config(Config::default())
    }

    /// Opens an inotify channel
    pub fn with_config(config: Config) -> Result<Inotify> {
        let (channel, poll) = NotificationChannel::open()?;
        let (dispatcher, queue) = dispatch::queue();

        let read_loop = ReadLoop::new(
            PollSource::new(poll, channel.clone()),
            channel.clone(),
            dispatcher,
            config.buffer_size(),
        );

        let worker = thread::Builder::new()
            .name(config.read_loop_thread_name())
            .spawn(move || {
                read_loop.run();
            });
        let worker = match worker {
            Ok(worker) => worker,
            Err(error) => {
                channel.shut_down();
                let _ = channel.release();
                return Err(Error::ChannelInit(error));
            }
        };

        Ok(Inotify {
            channel,
            config,
            worker  : Mutex::new(Some(worker)),
            consumer: Mutex::new(Consumer::Waiting(queue)),
        })
    }

    /// Returns a handle for adding and removing watches
    ///
    /// The handle can be cloned and moved to other threads.
    pub fn watches(&self) -> Watches {
        Watches::new(self.channel.clone())
    }

    /// Watches the given path
    ///
    /// Shorthand for [`Watches::add`].
    pub fn watch<P>(&self, path: P, mask: WatchMask) -> Result<WatchDescriptor>
        where P: AsRef<Path>
    {
        self.channel.register(path.as_ref(), mask)
    }

    /// Stops watching
    ///
    /// Shorthand for [`Watches::remove`].
    pub fn unwatch(&self, wd: &WatchDescriptor) -> Result<()> {
        self.channel.deregister(wd)
    }

    /// Delivers every event to `callback`
    ///
    /// The callback runs on a dedicated thread, one event at a time. A fatal
    /// error is passed as `Err`, and is the last call the callback receives.
    /// [`Inotify::close`] doesn't wait for the callback. The thread keeps
    /// delivering what was queued before the close, then ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsumerAttached`], if a consumer was attached before.
    pub fn on_event<F>(&self, callback: F) -> Result<()>
        where F: FnMut(Result<Event>) + Send + 'static
    {
        let mut consumer = self.consumer.lock();
        let queue = take_queue(&mut consumer)?;

        dispatch::spawn_callback(
            queue,
            self.config.dispatch_thread_name(),
            callback,
        )
        .map_err(Error::ChannelInit)?;

        *consumer = Consumer::Attached;
        Ok(())
    }

    /// Hands out the receiving end of the event queue
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsumerAttached`], if a consumer was attached before.
    pub fn events(&self) -> Result<EventReceiver> {
        let mut consumer = self.consumer.lock();
        let queue = take_queue(&mut consumer)?;

        *consumer = Consumer::Attached;
        Ok(EventReceiver::new(queue))
    }

    /// Returns a [`Stream`] of events
    ///
    /// The stream is fed from a dedicated thread, so it works with any
    /// executor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsumerAttached`], if a consumer was attached before.
    ///
    /// [`Stream`]: futures_core::Stream
    #[cfg(feature = "stream")]
    pub fn event_stream(&self) -> Result<EventStream> {
        let mut consumer = self.consumer.lock();
        let queue = take_queue(&mut consumer)?;

        let stream = EventStream::spawn(
            queue,
            self.config.dispatch_thread_name(),
        )
        .map_err(Error::ChannelInit)?;

        *consumer = Consumer::Attached;
        Ok(stream)
    }

    /// Closes the channel
    ///
    /// Stops the read loop, invalidates all watch descriptors and releases
    /// the inotify descriptor. Afterwards, adding or removing watches fails
    /// with [`Error::ChannelClosed`]. Events that were read before are still
    /// delivered, then the consumer's queue ends.
    ///
    /// Only the read loop is waited for, which the close wakes up right away.
    /// The consumer is never waited for, so a slow or stuck callback can't
    /// hold up the close.
    ///
    /// Closing an already closed channel does nothing.
    pub fn close(&self) {
        let transitioned = self.channel.shut_down();

        if let Some(worker) = self.worker.lock().take() {
            join(worker, "read loop");
        }

        if let Err(error) = self.channel.release() {
            warn!(%error, "failed to close inotify descriptor");
        }

        if transitioned {
            debug!("closed inotify channel");
        }
    }

    /// Returns `true`, once the channel was closed, or terminated after a
    /// fatal error
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl Drop for Inotify {
    fn drop(&mut self) {
        self.close();
    }
}

fn take_queue(consumer: &mut Consumer) -> Result<Receiver<Notification>> {
    match std::mem::replace(consumer, Consumer::Attached) {
        Consumer::Waiting(queue) => Ok(queue),
        attached => {
            *consumer = attached;
            Err(Error::ConsumerAttached)
        }
    }
}

fn join(handle: JoinHandle<()>, name: &str) {
    if handle.join().is_err() {
        warn!(thread = name, "inotify thread panicked");
    }
}
