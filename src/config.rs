use crate::util::MIN_BUFFER_SIZE;


/// Default size of the read loop's buffer
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Settings for an [`Inotify`] channel
///
/// ```
/// # use inotify_channel::{Config, Inotify};
/// let inotify = Inotify::with_config(
///     Config::new()
///         .with_buffer_size(16 * 1024)
///         .with_thread_name("my-watcher"),
/// )
/// .expect("Failed to initialize inotify");
/// ```
///
/// [`Inotify`]: crate::Inotify
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    buffer_size: usize,
    thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_size: DEFAULT_BUFFER_SIZE,
            thread_name: "inotify".to_string(),
        }
    }
}

impl Config {
    /// Same as [`Config::default`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the buffer each read from the kernel goes into
    ///
    /// Larger buffers take more events per read. Sizes too small to hold a
    /// single event with the longest possible name are raised to that
    /// minimum.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Prefix for the names of the threads the channel spawns
    ///
    /// The read loop runs on `<name>-read-loop`, a callback or stream
    /// consumer on `<name>-dispatch`.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// The buffer size that will be used
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    pub(crate) fn read_loop_thread_name(&self) -> String {
        format!("{}-read-loop", self.thread_name)
    }

    pub(crate) fn dispatch_thread_name(&self) -> String {
        format!("{}-dispatch", self.thread_name)
    }
}


#[cfg(test)]
mod tests {
    use crate::util::MIN_BUFFER_SIZE;

    use super::{
        Config,
        DEFAULT_BUFFER_SIZE,
    };

    #[test]
    fn buffer_size_should_never_be_below_one_full_event() {
        assert_eq!(Config::new().buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(Config::new().with_buffer_size(1).buffer_size(), MIN_BUFFER_SIZE);
        assert_eq!(Config::new().with_buffer_size(65536).buffer_size(), 65536);
    }

    #[test]
    fn thread_names_should_share_the_prefix() {
        let config = Config::new().with_thread_name("watcher");
        assert_eq!(config.read_loop_thread_name(), "watcher-read-loop");
        assert_eq!(config.dispatch_thread_name(), "watcher-dispatch");
    }
}
