//! Events emitted by the playback session.
//!
//! The session reports significant state changes on an optional channel.
//! Front ends can use them to refresh a display, and tests use them to wait
//! for automatic advancement without polling.
//!
//! # Example
//!
//! ```rust
//! use audictl::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::TrackChanged(track) => println!("now playing {track}"),
//!         Event::QueueEmpty => println!("nothing left to play"),
//!         _ => {}
//!     }
//! }
//! ```

use crate::track::Track;

/// State changes of the playback session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A new player process started for this track.
    TrackChanged(Track),

    /// The current player process exited on its own.
    Finished(Track),

    /// Playback was stopped on request.
    Stopped,

    /// Advancement was requested with nothing queued.
    QueueEmpty,

    /// A track could not be started; the session moved past it.
    Failed {
        /// The track that failed to start.
        track: Track,
        /// Rendered error.
        reason: String,
    },
}
