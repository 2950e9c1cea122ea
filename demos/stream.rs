use std::{
    fs::File,
    io,
    thread,
    time::Duration,
};

use futures_util::StreamExt;
use inotify_channel::{
    Inotify,
    WatchMask,
};
use tempdir::TempDir;


#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let inotify = Inotify::init()
        .expect("Failed to initialize inotify");

    let dir = TempDir::new("inotify-channel-demo")?;

    inotify
        .watch(dir.path(), WatchMask::CREATE | WatchMask::MODIFY)
        .expect("Failed to add inotify watch");

    let path = dir.path().join("file");
    thread::spawn(move || -> Result<(), io::Error> {
        loop {
            File::create(&path)?;
            thread::sleep(Duration::from_millis(500));
        }
    });

    let mut stream = inotify.event_stream()
        .expect("Failed to take event queue");

    while let Some(event) = stream.next().await {
        println!("event: {:?}", event);
    }

    Ok(())
}
