use std::{
    io,
    os::unix::io::AsRawFd,
    sync::Arc,
};

use mio::{
    Events,
    Poll,
};
use tracing::{
    debug,
    error,
    trace,
    warn,
};

use crate::channel::NotificationChannel;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::events::{
    self,
    Event,
};
use crate::util::read_into_buffer;


/// Where the read loop gets its bytes from
pub(crate) trait EventSource {
    /// Blocks until there may be something to read, or until woken
    fn wait(&mut self) -> io::Result<()>;

    /// Reads without blocking
    ///
    /// Fails with `WouldBlock` once the source is drained.
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// The inotify descriptor, waited on through `mio`
pub(crate) struct PollSource {
    poll: Poll,
    events: Events,
    channel: Arc<NotificationChannel>,
}

impl PollSource {
    pub(crate) fn new(poll: Poll, channel: Arc<NotificationChannel>) -> Self {
        PollSource {
            poll,
            events: Events::with_capacity(2),
            channel,
        }
    }
}

impl EventSource for PollSource {
    fn wait(&mut self) -> io::Result<()> {
        self.poll.poll(&mut self.events, None)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        read_into_buffer(self.channel.as_raw_fd(), buffer)
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadLoopState {
    Idle,
    /// Waiting for the descriptor to become readable
    Reading,
    /// Reading until the descriptor would block
    Draining,
    Terminated,
}

/// Decodes, resolves and dispatches everything the kernel reports
///
/// Runs on the channel's only worker thread. It owns the dispatcher, so when
/// the loop ends, the consumer's queue ends with it.
pub(crate) struct ReadLoop<S> {
    source: S,
    channel: Arc<NotificationChannel>,
    dispatcher: Option<Dispatcher>,
    buffer: Vec<u8>,
    state: ReadLoopState,
}

impl<S> ReadLoop<S>
    where S: EventSource
{
    pub(crate) fn new(
        source     : S,
        channel    : Arc<NotificationChannel>,
        dispatcher : Dispatcher,
        buffer_size: usize,
    )
        -> Self
    {
        ReadLoop {
            source,
            channel,
            dispatcher: Some(dispatcher),
            buffer    : vec![0; buffer_size],
            state     : ReadLoopState::Idle,
        }
    }

    /// Runs until the channel closes or a fatal error occurs
    pub(crate) fn run(mut self) -> ReadLoopState {
        debug!("read loop started");
        self.state = ReadLoopState::Reading;

        while self.state != ReadLoopState::Terminated {
            if self.channel.is_closed() {
                self.terminate(None);
                break;
            }

            match self.source.wait() {
                Ok(()) => {}
                Err(ref error) if error.kind() == io::ErrorKind::Interrupted =>
                    continue,
                Err(error) => {
                    self.terminate(Some(Error::Read(error)));
                    break;
                }
            }

            self.drain();
        }

        debug!("read loop terminated");
        self.state
    }

    // Readiness is edge-triggered, so read until there's nothing left.
    fn drain(&mut self) {
        self.state = ReadLoopState::Draining;

        loop {
            if self.channel.is_closed() {
                return self.terminate(None);
            }

            match self.source.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(len) => {
                    if let Err(error) = self.dispatch(len) {
                        return self.terminate(Some(error));
                    }
                }
                Err(error) => match error.kind() {
                    io::ErrorKind::WouldBlock  => break,
                    io::ErrorKind::Interrupted => continue,
                    _ if error.raw_os_error() == Some(libc::ENOBUFS) => {
                        warn!("inotify queue overflowed, events were lost");
                        let overflow = self.channel.overflow();
                        self.emit(overflow);
                    }
                    _ => return self.terminate(Some(Error::Read(error))),
                },
            }
        }

        self.state = ReadLoopState::Reading;
    }

    /// Dispatches the records in the first `len` bytes of the buffer
    ///
    /// The whole buffer is decoded first: if it is corrupt, none of it is
    /// delivered.
    fn dispatch(&mut self, len: usize) -> Result<(), Error> {
        let records = events::decode(&self.buffer[..len])?;

        for record in &records {
            trace!(
                wd     = record.wd,
                mask   = ?record.mask,
                cookie = record.cookie,
                name   = ?record.name,
                "decoded event",
            );

            let event = self.channel.resolve(record);
            if event.is_overflow() {
                warn!("inotify queue overflowed, events were lost");
            }

            if let Some(dispatcher) = self.dispatcher.as_mut() {
                dispatcher.emit(event);
            }
        }

        Ok(())
    }

    fn emit(&mut self, event: Event) {
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.emit(event);
        }
    }

    /// Ends the loop
    ///
    /// A fatal error closes the channel, and is the last thing the consumer
    /// receives.
    fn terminate(&mut self, error: Option<Error>) {
        if let Some(error) = error {
            error!(%error, "read loop failed, closing channel");
            self.channel.shut_down();
            if let Some(dispatcher) = self.dispatcher.take() {
                dispatcher.fail(error);
            }
        }

        self.dispatcher = None;
        self.state      = ReadLoopState::Terminated;
    }
}


#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        path::{
            Path,
            PathBuf,
        },
        sync::Arc,
    };

    use inotify_sys as ffi;

    use crate::channel::NotificationChannel;
    use crate::dispatch::{
        self,
        EventReceiver,
    };
    use crate::error::{
        DecodeError,
        Error,
    };
    use crate::events::{
        tests::push_record,
        EventMask,
    };
    use crate::util::MIN_BUFFER_SIZE;
    use crate::watches::WatchMask;

    use super::{
        EventSource,
        ReadLoop,
        ReadLoopState,
    };

    /// Replays scripted read results, then closes the channel
    struct ScriptedSource {
        reads: VecDeque<io::Result<Vec<u8>>>,
        channel: Arc<NotificationChannel>,
    }

    impl EventSource for ScriptedSource {
        fn wait(&mut self) -> io::Result<()> {
            if self.reads.is_empty() {
                self.channel.shut_down();
            }
            Ok(())
        }

        fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buffer[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(error)) => Err(error),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    fn run(reads: Vec<io::Result<Vec<u8>>>, channel: &Arc<NotificationChannel>)
        -> (ReadLoopState, EventReceiver)
    {
        let (dispatcher, rx) = dispatch::queue();
        let source = ScriptedSource {
            reads  : reads.into(),
            channel: channel.clone(),
        };

        let state = ReadLoop::new(source, channel.clone(), dispatcher, MIN_BUFFER_SIZE)
            .run();

        (state, EventReceiver::new(rx))
    }

    fn watch(channel: &NotificationChannel, id: i32, path: &str, mask: WatchMask) {
        channel.table()
            .insert_with(Path::new(path), mask, || Ok(id))
            .unwrap();
    }

    fn records(list: &[(i32, u32, &str)]) -> Vec<u8> {
        let mut buffer = Vec::new();
        for (wd, mask, name) in list {
            let padded = if name.is_empty() { 0 } else { 16 };
            push_record(&mut buffer, *wd, *mask, 0, name, padded);
        }
        buffer
    }

    #[test]
    fn events_should_be_dispatched_in_kernel_order_across_watches() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        watch(&channel, 1, "/a", WatchMask::ALL_EVENTS);
        watch(&channel, 2, "/b", WatchMask::ALL_EVENTS);

        let (state, receiver) = run(
            vec![
                Ok(records(&[(1, ffi::IN_OPEN, "x"), (2, ffi::IN_MODIFY, "")])),
                Err(io::ErrorKind::WouldBlock.into()),
                Ok(records(&[(1, ffi::IN_CLOSE_WRITE, "x")])),
            ],
            &channel,
        );
        assert_eq!(state, ReadLoopState::Terminated);

        let events: Vec<_> = receiver.into_iter().map(Result::unwrap).collect();
        let summary: Vec<_> = events
            .iter()
            .map(|event| (event.path.clone(), event.mask))
            .collect();
        assert_eq!(summary, vec![
            (Some(PathBuf::from("/a")), EventMask::OPEN),
            (Some(PathBuf::from("/b")), EventMask::MODIFY),
            (Some(PathBuf::from("/a")), EventMask::CLOSE_WRITE),
        ]);
        assert_eq!(events[0].full_path(), Some(PathBuf::from("/a/x")));
    }

    #[test]
    fn overflow_should_be_reported_and_loop_should_continue() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        watch(&channel, 1, "/a", WatchMask::ALL_EVENTS);

        let (state, receiver) = run(
            vec![
                Ok(records(&[(1, ffi::IN_ACCESS, "")])),
                Err(io::Error::from_raw_os_error(libc::ENOBUFS)),
                Ok(records(&[(1, ffi::IN_MODIFY, "")])),
            ],
            &channel,
        );
        assert_eq!(state, ReadLoopState::Terminated);

        let masks: Vec<_> = receiver
            .into_iter()
            .map(|event| event.unwrap().mask)
            .collect();
        assert_eq!(masks, vec![
            EventMask::ACCESS,
            EventMask::Q_OVERFLOW,
            EventMask::MODIFY,
        ]);
    }

    #[test]
    fn both_kinds_of_overflow_should_look_the_same() {
        let (channel, _poll) = NotificationChannel::open().unwrap();

        let (_, receiver) = run(
            vec![
                Ok(records(&[(-1, ffi::IN_Q_OVERFLOW, "")])),
                Err(io::Error::from_raw_os_error(libc::ENOBUFS)),
            ],
            &channel,
        );

        let from_record = receiver.recv().unwrap().unwrap();
        let from_read   = receiver.recv().unwrap().unwrap();

        for event in &[&from_record, &from_read] {
            assert!(event.is_overflow());
            assert_eq!(event.mask, EventMask::Q_OVERFLOW);
            assert_eq!(event.wd.id(), -1);
            assert_eq!(event.wd.generation, 0);
            assert!(event.wd.belongs_to(&channel));
            assert_eq!(event.path, None);
            assert_eq!(event.name, None);
        }
        assert_eq!(from_record.wd, from_read.wd);
    }

    #[test]
    fn records_for_untracked_watches_should_be_delivered_without_path() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        watch(&channel, 1, "/a", WatchMask::ALL_EVENTS);

        let (_, receiver) = run(
            vec![Ok(records(&[
                (7, ffi::IN_MODIFY, "x"),
                (1, ffi::IN_IGNORED, ""),
                (1, ffi::IN_ATTRIB | ffi::IN_ISDIR, ""),
            ]))],
            &channel,
        );

        let events: Vec<_> = receiver.into_iter().map(Result::unwrap).collect();
        let summary: Vec<_> = events
            .iter()
            .map(|event| (event.wd.id(), event.path.clone(), event.mask))
            .collect();
        assert_eq!(summary, vec![
            (7, None, EventMask::MODIFY),
            (1, Some(PathBuf::from("/a")), EventMask::IGNORED),
            (1, None, EventMask::ATTRIB | EventMask::ISDIR),
        ]);
        assert_eq!(events[0].name.as_deref(), Some(std::ffi::OsStr::new("x")));
        assert_eq!(events[0].full_path(), None);
    }

    #[test]
    fn interrupted_reads_should_be_retried() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        watch(&channel, 1, "/a", WatchMask::ALL_EVENTS);

        let (_, receiver) = run(
            vec![
                Err(io::ErrorKind::Interrupted.into()),
                Ok(records(&[(1, ffi::IN_ATTRIB, "")])),
            ],
            &channel,
        );

        let events: Vec<_> = receiver.into_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().mask, EventMask::ATTRIB);
    }

    #[test]
    fn read_failure_should_be_reported_once_and_close_the_channel() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        watch(&channel, 1, "/a", WatchMask::ALL_EVENTS);

        let (state, receiver) = run(
            vec![
                Ok(records(&[(1, ffi::IN_ACCESS, "")])),
                Err(io::Error::from_raw_os_error(libc::EIO)),
                Ok(records(&[(1, ffi::IN_MODIFY, "")])),
            ],
            &channel,
        );
        assert_eq!(state, ReadLoopState::Terminated);

        let notifications: Vec<_> = receiver.into_iter().collect();
        assert_eq!(notifications.len(), 2);
        assert!(notifications[0].is_ok());
        match &notifications[1] {
            Err(Error::Read(error)) => assert_eq!(error.raw_os_error(), Some(libc::EIO)),
            other => panic!("unexpected notification: {:?}", other),
        }

        assert!(channel.is_closed());
        assert_eq!(channel.table().len(), 0);
        assert!(matches!(
            channel.register(Path::new("/"), WatchMask::ACCESS),
            Err(Error::ChannelClosed),
        ));
    }

    #[test]
    fn corrupt_buffer_should_be_fatal_and_deliver_nothing_of_it() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        watch(&channel, 1, "/a", WatchMask::ALL_EVENTS);

        let mut corrupt = records(&[(1, ffi::IN_ACCESS, "")]);
        corrupt.extend_from_slice(&[0; 4]);

        let (_, receiver) = run(vec![Ok(corrupt)], &channel);

        let notifications: Vec<_> = receiver.into_iter().collect();
        assert_eq!(notifications.len(), 1);
        assert!(matches!(
            notifications[0],
            Err(Error::Decode(DecodeError::TruncatedHeader { .. })),
        ));
        assert!(channel.is_closed());
    }

    #[test]
    fn loop_should_not_start_reading_on_closed_channel() {
        let (channel, _poll) = NotificationChannel::open().unwrap();
        channel.shut_down();

        let (state, receiver) = run(
            vec![Ok(records(&[(1, ffi::IN_ACCESS, "")]))],
            &channel,
        );

        assert_eq!(state, ReadLoopState::Terminated);
        assert!(receiver.recv().is_none());
    }
}
