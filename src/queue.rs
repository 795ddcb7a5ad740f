//! The playback queue.
//!
//! A plain FIFO of [`Track`]s: tracks are appended at the tail and the head
//! is popped when it starts playing. The track that is playing is therefore
//! never part of the queue, and nothing "behind" the current track is kept.
//!
//! The queue does no locking of its own; the session keeps it inside its
//! state mutex and hands out [`snapshot`](Queue::snapshot)s for reporting.

use std::collections::VecDeque;

use crate::track::Track;

#[derive(Clone, Debug, Default)]
pub struct Queue {
    tracks: VecDeque<Track>,
}

impl Queue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `track` to the tail. Duplicates are allowed.
    pub fn enqueue(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    /// Appends all `tracks` in order.
    pub fn extend<I>(&mut self, tracks: I)
    where
        I: IntoIterator<Item = Track>,
    {
        self.tracks.extend(tracks);
    }

    /// The track that [`advance`](Self::advance) would return.
    #[must_use]
    pub fn peek_next(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// Removes and returns the head, or `None` when empty.
    pub fn advance(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Moves the track at `index` to the head so that it plays next.
    ///
    /// Returns a reference to the promoted track, or `None` when `index` is
    /// out of range. The relative order of the other tracks is kept.
    pub fn promote(&mut self, index: usize) -> Option<&Track> {
        let track = self.tracks.remove(index)?;
        self.tracks.push_front(track);
        self.tracks.front()
    }

    /// Removes the track at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        self.tracks.remove(index)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Independent copy of the queue in playing order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str) -> Track {
        Track {
            id: format!("test:{title}"),
            provider: "test".to_owned(),
            title: title.to_owned(),
            ..Track::default()
        }
    }

    fn titles(queue: &Queue) -> Vec<String> {
        queue.snapshot().into_iter().map(|t| t.title).collect()
    }

    #[test]
    fn advances_in_insertion_order() {
        let mut queue = Queue::new();
        queue.enqueue(track("A"));
        queue.enqueue(track("B"));
        queue.enqueue(track("A"));

        assert_eq!(queue.peek_next().map(|t| t.title.as_str()), Some("A"));
        assert_eq!(queue.advance().unwrap().title, "A");
        assert_eq!(queue.advance().unwrap().title, "B");
        assert_eq!(queue.advance().unwrap().title, "A");
        assert!(queue.advance().is_none());
        assert!(queue.peek_next().is_none());
    }

    #[test]
    fn snapshot_is_independent() {
        let mut queue = Queue::new();
        queue.enqueue(track("A"));
        let snapshot = queue.snapshot();
        queue.enqueue(track("B"));
        queue.advance();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "A");
        assert_eq!(titles(&queue), ["B"]);
    }

    #[test]
    fn promote_moves_track_to_head() {
        let mut queue = Queue::new();
        queue.extend(["A", "B", "C"].map(track));

        assert_eq!(queue.promote(2).map(|t| t.title.as_str()), Some("C"));
        assert_eq!(titles(&queue), ["C", "A", "B"]);
        assert!(queue.promote(3).is_none());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn remove_and_clear() {
        let mut queue = Queue::new();
        queue.extend(["A", "B", "C"].map(track));

        assert_eq!(queue.remove(1).unwrap().title, "B");
        assert!(queue.remove(5).is_none());
        assert_eq!(titles(&queue), ["A", "C"]);

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.advance().is_none());
    }
}
