use std::env;

use inotify_channel::{
    EventKind,
    Inotify,
    WatchMask,
};


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let inotify = Inotify::init()
        .expect("Failed to initialize inotify");

    let current_dir = env::current_dir()
        .expect("Failed to determine current directory");

    inotify
        .watch(
            current_dir,
            WatchMask::MODIFY | WatchMask::CREATE | WatchMask::DELETE,
        )
        .expect("Failed to add inotify watch");

    println!("Watching current directory for activity...");

    let events = inotify.events()
        .expect("Failed to take event queue");

    for event in events {
        let event = event.expect("Failed to read inotify events");

        let what = if event.is_dir() { "Directory" } else { "File" };
        match event.mask.kind() {
            Some(EventKind::Create) => println!("{} created: {:?}", what, event.name),
            Some(EventKind::Delete) => println!("{} deleted: {:?}", what, event.name),
            Some(EventKind::Modify) => println!("{} modified: {:?}", what, event.name),
            _ => {}
        }
    }
}
