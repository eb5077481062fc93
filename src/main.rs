#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

fn main() {
    if let Err(err) = respawn_watch::run() {
        eprintln!("respawn-watch failed to start: {}", err);
        std::process::exit(1);
    }
}
