//! Playback session orchestration.
//!
//! The [`Orchestrator`] owns the [`Queue`] and the one player process that
//! may be running at any time. Remote requests, natural process exits and
//! shutdown signals all mutate the same session state, so every transition
//! follows the same rules:
//!
//! * Session state sits behind a synchronous mutex that is never held
//!   across an `.await`. The current track and its process are recorded
//!   and cleared together.
//! * Transitions that start or stop a process ([`next`](Orchestrator::next),
//!   [`stop`](Orchestrator::stop), auto-advance) are serialized by an async
//!   transition lock. Each of them stops the current process before doing
//!   anything else, so at most one player is alive.
//! * A stop abandons any track still being started. Resolving a stream may
//!   take arbitrarily long, so the transition holding the lock gives up on
//!   it as soon as a stop is requested, and the stop never waits for it.
//! * Every spawned process gets a watcher task carrying a generation
//!   number. When the process exits the watcher reports the exit status and
//!   advances the queue, but only if its generation is still the current
//!   one. A watcher whose process was stopped or replaced does nothing.
//!
//! ```text
//! Idle ──next──> Starting ──spawned──> Playing ──stop──> Idle
//!                   ^                     │
//!                   └──exit / next────────┘
//! ```

use std::{
    future::Future,
    pin::Pin,
    process::ExitStatus,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    error::{Error, ErrorKind, Result},
    events::Event,
    player::{Control, Launcher, Process, Signaller},
    provider::Resolver,
    queue::Queue,
    track::Track,
    util::wait_bounded,
};

/// Outcome of advancing the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// A player process was started for this track.
    Playing(Track),
    /// Nothing was queued; the session is idle.
    EmptyQueue,
}

/// Consistent view of the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub current: Option<Track>,
    pub paused: bool,
    pub queue: Vec<Track>,
}

/// Result of adding a query to the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Queued {
    /// Tracks the query resolved to, in queue order.
    pub tracks: Vec<Track>,
    /// The track that started playing as a consequence, if any.
    pub playing: Option<Track>,
}

/// Drives playback of a queue through one external player at a time.
///
/// Cloning is cheap and yields a handle to the same session.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<Session>,
    transition: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    closed: AtomicBool,
    /// Counts stop requests. Transitions subscribe before taking the
    /// transition lock and give up when it changes.
    stops: watch::Sender<u64>,

    resolver: Resolver,
    launcher: Arc<dyn Launcher>,
    stop_timeout: Duration,

    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
}

#[derive(Default)]
struct Session {
    queue: Queue,
    current: Option<Current>,
}

/// The playing track and the means to stop its process.
struct Current {
    track: Track,
    generation: u64,
    signaller: Signaller,
    control: Option<Control>,
    paused: bool,
    exit: oneshot::Receiver<Result<ExitStatus>>,
}

type Transition<'a> = Pin<Box<dyn Future<Output = Result<Advance>> + Send + 'a>>;

impl Orchestrator {
    #[must_use]
    pub fn new(resolver: Resolver, launcher: Arc<dyn Launcher>, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Session::default()),
                transition: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                stops: watch::Sender::new(0),
                resolver,
                launcher,
                stop_timeout,
                events: Mutex::new(None),
            }),
        }
    }

    /// Returns a receiver for session events.
    ///
    /// Only the latest subscriber receives events.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Resolves `query`, queues the result and starts playback if idle.
    ///
    /// # Errors
    ///
    /// Returns resolution and provider errors without touching the queue.
    /// When starting playback fails, the tracks stay queued except for the
    /// one that failed.
    pub async fn play(&self, query: &str) -> Result<Queued> {
        let tracks = self.inner.resolver.resolve(query).await?;

        let stops = self.inner.stops.subscribe();
        let _transition = self.inner.transition.lock().await;
        let idle = {
            let mut session = self.session();
            session.queue.extend(tracks.iter().cloned());
            session.current.is_none()
        };

        let playing = if idle {
            match self.advance(stops).await? {
                Advance::Playing(track) => Some(track),
                Advance::EmptyQueue => None,
            }
        } else {
            debug!("queued {} track(s) behind current track", tracks.len());
            None
        };

        Ok(Queued { tracks, playing })
    }

    /// Resolves `query` and appends the result. Never starts playback.
    ///
    /// # Errors
    ///
    /// Returns resolution and provider errors without touching the queue.
    pub async fn enqueue(&self, query: &str) -> Result<Queued> {
        let tracks = self.inner.resolver.resolve(query).await?;
        self.session().queue.extend(tracks.iter().cloned());
        debug!("queued {} track(s)", tracks.len());

        Ok(Queued {
            tracks,
            playing: None,
        })
    }

    /// Stops the current track and starts the head of the queue.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream cannot be resolved or the player
    /// cannot be spawned. The session is idle afterwards and the failed
    /// track is not queued again. Returns a cancelled error when a stop was
    /// requested before the track started.
    pub async fn next(&self) -> Result<Advance> {
        let stops = self.inner.stops.subscribe();
        let _transition = self.inner.transition.lock().await;
        self.advance(stops).await
    }

    /// Moves queue entry `index` to the head and starts it.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error when `index` is out of range, and
    /// otherwise the same errors as [`next`](Self::next).
    pub async fn skip_to(&self, index: usize) -> Result<Advance> {
        let stops = self.inner.stops.subscribe();
        let _transition = self.inner.transition.lock().await;
        if self.session().queue.promote(index).is_none() {
            return Err(Error::invalid_argument(format!(
                "no queue entry at index {index}"
            )));
        }
        self.advance(stops).await
    }

    /// Stops the current track, if any, and waits for its process to exit.
    ///
    /// A track that is still being started is abandoned. Idempotent:
    /// stopping an idle session returns immediately.
    ///
    /// # Errors
    ///
    /// Returns a shutdown timeout when the process did not exit in time.
    /// The session is idle regardless.
    pub async fn stop(&self) -> Result<()> {
        self.cancel_starts();
        let _transition = self.inner.transition.lock().await;
        match self.take_current() {
            Some(current) => self.halt(current).await,
            None => Ok(()),
        }
    }

    /// Consistent snapshot of the current track and the queue.
    #[must_use]
    pub fn status(&self) -> Status {
        let session = self.session();
        Status {
            current: session.current.as_ref().map(|current| current.track.clone()),
            paused: session.current.as_ref().is_some_and(|current| current.paused),
            queue: session.queue.snapshot(),
        }
    }

    /// Empties the queue without affecting the current track.
    pub fn clear(&self) {
        self.session().queue.clear();
    }

    /// Removes queue entry `index`.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error when `index` is out of range.
    pub fn remove(&self, index: usize) -> Result<Track> {
        self.session()
            .queue
            .remove(index)
            .ok_or_else(|| Error::invalid_argument(format!("no queue entry at index {index}")))
    }

    /// Pauses the current track.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error when nothing is playing or the
    /// player cannot be controlled, and a provider error when the player
    /// does not accept the command.
    pub async fn pause(&self) -> Result<()> {
        let (generation, control) = self.control()?;
        control.pause().await?;
        self.set_paused(generation, true);
        Ok(())
    }

    /// Resumes the current track.
    ///
    /// # Errors
    ///
    /// See [`pause`](Self::pause).
    pub async fn resume(&self) -> Result<()> {
        let (generation, control) = self.control()?;
        control.resume().await?;
        self.set_paused(generation, false);
        Ok(())
    }

    /// Seeks the current track by `seconds`, backward when negative.
    ///
    /// # Errors
    ///
    /// See [`pause`](Self::pause). `seconds` must be finite.
    pub async fn seek(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() {
            return Err(Error::invalid_argument("seek offset must be finite"));
        }
        let (_, control) = self.control()?;
        control.seek(seconds).await
    }

    /// Stops playback and empties the queue. Nothing starts afterwards.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Err(e) = self.stop().await {
            warn!("{e}");
        }
        self.clear();
    }

    /// Kills the current process group without waiting. Nothing starts
    /// afterwards.
    pub fn kill(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.cancel_starts();
        if let Some(current) = self.take_current() {
            warn!("killing player of {}", current.track);
            current.signaller.kill();
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_current(&self) -> Option<Current> {
        self.session().current.take()
    }

    fn cancel_starts(&self) {
        self.inner.stops.send_modify(|stops| *stops = stops.wrapping_add(1));
    }

    fn control(&self) -> Result<(u64, Control)> {
        let session = self.session();
        let Some(current) = session.current.as_ref() else {
            return Err(Error::invalid_argument("nothing is playing"));
        };
        match &current.control {
            Some(control) => Ok((current.generation, control.clone())),
            None => Err(Error::invalid_argument(format!(
                "player of {} cannot be controlled",
                current.track
            ))),
        }
    }

    fn set_paused(&self, generation: u64, paused: bool) {
        let mut session = self.session();
        if let Some(current) = session
            .current
            .as_mut()
            .filter(|current| current.generation == generation)
        {
            current.paused = paused;
        }
    }

    fn emit(&self, event: Event) {
        let events = self
            .inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            // The subscriber may have gone away.
            let _ = tx.send(event);
        }
    }

    /// Terminates the process of `current` and waits for it to exit.
    async fn halt(&self, current: Current) -> Result<()> {
        let Current {
            track,
            generation,
            signaller,
            exit,
            ..
        } = current;
        let timeout = self.inner.stop_timeout;

        info!("stopping {track}");
        if let Err(e) = signaller.terminate() {
            warn!("failed to terminate player of {track}: {e}");
        }

        let waited = match wait_bounded(exit, timeout).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => {
                debug!("watcher {generation} is gone, waiting for process directly");
                wait_bounded(signaller.exited(), timeout).await
            }
            Err(e) => Err(e),
        };

        self.emit(Event::Stopped);
        waited.map_err(|e| {
            warn!("player of {track} did not exit within {timeout:?}");
            Error::new(
                e.kind,
                format!("player of {track} did not exit within {timeout:?}"),
            )
        })
    }

    /// The body of [`next`](Self::next). Callers hold the transition lock
    /// and subscribed to `stops` before taking it.
    ///
    /// Boxed, because watchers spawned from here advance through here again.
    fn advance(&self, mut stops: watch::Receiver<u64>) -> Transition<'_> {
        Box::pin(async move {
            Self::check_stops(&stops)?;

            if let Some(current) = self.take_current() {
                let signaller = current.signaller.clone();
                if let Err(e) = self.halt(current).await {
                    warn!("{e}; killing process group");
                    signaller.kill();
                }
            }

            if self.inner.closed.load(Ordering::Acquire) {
                return Err(Error::internal("session is shut down"));
            }
            Self::check_stops(&stops)?;

            let head = self.session().queue.advance();
            let Some(track) = head else {
                debug!("queue is empty");
                self.emit(Event::QueueEmpty);
                return Ok(Advance::EmptyQueue);
            };

            let process = match self.start(&track, &mut stops).await {
                Ok(process) => process,
                Err(e) if e.kind == ErrorKind::Cancelled => {
                    info!("abandoned {track}: playback was stopped");
                    return Err(e);
                }
                Err(e) => {
                    error!("could not play {track}: {e}");
                    self.emit(Event::Failed {
                        track,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            };

            let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let (exit_tx, exit_rx) = oneshot::channel();
            {
                let mut session = self.session();
                if self.inner.closed.load(Ordering::Acquire) {
                    process.kill();
                    return Err(Error::internal("session is shut down"));
                }
                session.current = Some(Current {
                    track: track.clone(),
                    generation,
                    signaller: process.signaller(),
                    control: process.control(),
                    paused: false,
                    exit: exit_rx,
                });
            }

            info!("playing {track}");
            debug!("player pid {} is generation {generation}", process.pid());
            tokio::spawn(self.clone().watch(process, exit_tx, generation));

            self.emit(Event::TrackChanged(track.clone()));
            Ok(Advance::Playing(track))
        })
    }

    fn check_stops(stops: &watch::Receiver<u64>) -> Result<()> {
        if stops.has_changed().unwrap_or(true) {
            return Err(Error::cancelled("playback was stopped"));
        }
        Ok(())
    }

    /// Resolves a stream for `track` and launches it, unless a stop comes
    /// first.
    async fn start(&self, track: &Track, stops: &mut watch::Receiver<u64>) -> Result<Process> {
        let stream = tokio::select! {
            biased;
            _ = stops.changed() => {
                return Err(Error::cancelled(format!("stopped while starting {track}")));
            }
            stream = self.inner.resolver.resolve_stream(track) => stream?,
        };
        self.inner.launcher.launch(&stream, track)
    }

    /// Owns `process` until it exits, then advances if still current.
    async fn watch(
        self,
        mut process: Process,
        exit: oneshot::Sender<Result<ExitStatus>>,
        generation: u64,
    ) {
        let status = process.wait().await;
        match &status {
            Ok(status) => debug!("player {} exited with {status}", process.pid()),
            Err(e) => warn!("failed to wait for player {}: {e}", process.pid()),
        }

        // A stop in progress holds the transition lock and waits for this.
        let _ = exit.send(status);

        let stops = self.inner.stops.subscribe();
        let _transition = self.inner.transition.lock().await;
        let finished = {
            let mut session = self.session();
            let is_current = session
                .current
                .as_ref()
                .is_some_and(|current| current.generation == generation);
            if is_current {
                session.current.take()
            } else {
                None
            }
        };

        let Some(finished) = finished else {
            trace!("watcher {generation} was superseded");
            return;
        };

        info!("finished {}", finished.track);
        self.emit(Event::Finished(finished.track));

        match self.advance(stops).await {
            Ok(Advance::Playing(_)) => {}
            Ok(Advance::EmptyQueue) => info!("end of queue"),
            Err(e) => debug!("auto-advance stopped: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::process::Command;

    use super::*;
    use crate::{
        player::tests::fake_mpv,
        provider::{
            tests::{track, Fake},
            Provider,
        },
        track::{Quality, SearchKind, Stream},
    };

    /// Launches `sleep` for as long as a track is configured to last.
    #[derive(Default)]
    struct SleepLauncher {
        durations: HashMap<String, f64>,
        launched: Mutex<Vec<Signaller>>,
    }

    impl SleepLauncher {
        const DEFAULT_SECS: f64 = 30.0;

        fn with(durations: &[(&str, f64)]) -> Self {
            Self {
                durations: durations
                    .iter()
                    .map(|(title, secs)| ((*title).to_owned(), *secs))
                    .collect(),
                ..Self::default()
            }
        }

        /// All but the latest process have exited.
        fn at_most_one_alive(&self) -> bool {
            let launched = self.launched.lock().unwrap();
            launched
                .iter()
                .rev()
                .skip(1)
                .all(Signaller::has_exited)
        }

        fn kill_all(&self) {
            for signaller in self.launched.lock().unwrap().iter() {
                signaller.kill();
            }
        }
    }

    impl Launcher for SleepLauncher {
        fn launch(&self, _stream: &Stream, track: &Track) -> Result<Process> {
            if track.title == "unlaunchable" {
                return Err(Error::spawn("no such player"));
            }

            let secs = self
                .durations
                .get(&track.title)
                .copied()
                .unwrap_or(Self::DEFAULT_SECS);
            let mut command = Command::new("sleep");
            command.arg(secs.to_string());

            let process = Process::spawn(command)?;
            self.launched.lock().unwrap().push(process.signaller());
            Ok(process)
        }
    }

    fn orchestrator(launcher: &Arc<SleepLauncher>) -> Orchestrator {
        let resolver = Resolver::new(Quality::Any).with_provider(Fake::default());
        Orchestrator::new(resolver, launcher.clone(), Duration::from_secs(3))
    }

    fn titles(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|track| track.title.as_str()).collect()
    }

    fn current_title(status: &Status) -> Option<&str> {
        status.current.as_ref().map(|track| track.title.as_str())
    }

    async fn wait_for_track(events: &mut mpsc::UnboundedReceiver<Event>, title: &str) {
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events.recv().await {
                if matches!(&event, Event::TrackChanged(track) if track.title == title) {
                    return;
                }
            }
            panic!("event channel closed");
        })
        .await;
        assert!(found.is_ok(), "{title} never started");
    }

    #[tokio::test]
    async fn queue_plays_through_in_order() {
        let launcher = Arc::new(SleepLauncher::with(&[("A", 0.2)]));
        let session = orchestrator(&launcher);
        let mut events = session.subscribe();

        for title in ["A", "B", "C"] {
            session.enqueue(title).await.unwrap();
        }
        assert_eq!(session.status().current, None);

        let advance = session.next().await.unwrap();
        assert!(matches!(advance, Advance::Playing(ref track) if track.title == "A"));
        assert_eq!(titles(&session.status().queue), ["B", "C"]);

        // A exits on its own.
        wait_for_track(&mut events, "B").await;
        let status = session.status();
        assert_eq!(current_title(&status), Some("B"));
        assert_eq!(titles(&status.queue), ["C"]);

        session.stop().await.unwrap();
        let status = session.status();
        assert_eq!(status.current, None);
        assert_eq!(titles(&status.queue), ["C"]);

        let advance = session.next().await.unwrap();
        assert!(matches!(advance, Advance::Playing(ref track) if track.title == "C"));
        assert!(session.status().queue.is_empty());

        assert_eq!(session.next().await.unwrap(), Advance::EmptyQueue);
        assert_eq!(session.status(), Status::default());
        assert!(launcher.at_most_one_alive());
        assert!(launcher.launched.lock().unwrap().iter().all(Signaller::has_exited));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);

        session.stop().await.unwrap();
        session.play("A").await.unwrap();
        session.stop().await.unwrap();
        session.stop().await.unwrap();

        assert_eq!(session.status(), Status::default());
        assert!(launcher.launched.lock().unwrap()[0].has_exited());
    }

    #[tokio::test]
    async fn enqueue_does_not_start_playback() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);

        let queued = session.enqueue("A").await.unwrap();
        assert_eq!(queued.playing, None);
        assert_eq!(session.status().current, None);
        assert!(launcher.launched.lock().unwrap().is_empty());

        // Playing on an idle session starts the queue head.
        let queued = session.play("B").await.unwrap();
        assert_eq!(queued.playing.map(|track| track.title), Some("A".to_owned()));
        assert_eq!(titles(&session.status().queue), ["B"]);

        // Playing while busy only queues.
        let queued = session.play("C").await.unwrap();
        assert_eq!(queued.playing, None);
        let status = session.status();
        assert_eq!(current_title(&status), Some("A"));
        assert_eq!(titles(&status.queue), ["B", "C"]);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn superseded_watcher_does_not_advance() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);

        for title in ["A", "B", "C"] {
            session.enqueue(title).await.unwrap();
        }
        session.next().await.unwrap();
        session.next().await.unwrap();

        // Give the watcher of A every chance to misbehave.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = session.status();
        assert_eq!(current_title(&status), Some("B"));
        assert_eq!(titles(&status.queue), ["C"]);
        assert!(launcher.at_most_one_alive());

        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_skips_keep_one_process() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);
        for title in ["A", "B", "C", "D", "E", "F"] {
            session.enqueue(title).await.unwrap();
        }

        let skips: Vec<_> = (0..5)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.next().await })
            })
            .collect();
        for skip in skips {
            assert!(matches!(skip.await.unwrap(), Ok(Advance::Playing(_))));
        }

        assert!(launcher.at_most_one_alive());
        assert_eq!(launcher.launched.lock().unwrap().len(), 5);
        assert_eq!(session.status().queue.len(), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn snapshots_are_isolated() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);
        session.enqueue("A").await.unwrap();

        let before = session.status();
        session.enqueue("B").await.unwrap();
        session.clear();

        assert_eq!(titles(&before.queue), ["A"]);
        assert!(session.status().queue.is_empty());
    }

    #[tokio::test]
    async fn failures_leave_session_idle() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);

        let err = session.play("missing song").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert_eq!(session.status(), Status::default());

        session.enqueue("unlaunchable").await.unwrap();
        session.enqueue("B").await.unwrap();
        let err = session.next().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Spawn);

        let status = session.status();
        assert_eq!(status.current, None);
        assert_eq!(titles(&status.queue), ["B"]);
    }

    #[tokio::test]
    async fn skip_to_plays_selected_entry() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);
        for title in ["A", "B", "C"] {
            session.enqueue(title).await.unwrap();
        }

        let advance = session.skip_to(2).await.unwrap();
        assert!(matches!(advance, Advance::Playing(ref track) if track.title == "C"));
        assert_eq!(titles(&session.status().queue), ["A", "B"]);

        let err = session.skip_to(5).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        assert_eq!(session.remove(0).unwrap().title, "A");
        assert!(session.remove(3).is_err());

        session.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_times_out_on_stubborn_player() {
        struct Stubborn(Mutex<Vec<Signaller>>);

        impl Launcher for Stubborn {
            fn launch(&self, _: &Stream, _: &Track) -> Result<Process> {
                let mut command = Command::new("sh");
                command.args(["-c", "trap '' TERM; sleep 30"]);
                let process = Process::spawn(command)?;
                self.0.lock().unwrap().push(process.signaller());
                Ok(process)
            }
        }

        let launcher = Arc::new(Stubborn(Mutex::new(Vec::new())));
        let resolver = Resolver::new(Quality::Any).with_provider(Fake::default());
        let session = Orchestrator::new(resolver, launcher.clone(), Duration::from_millis(300));

        session.play("A").await.unwrap();
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = session.stop().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(session.status().current, None);

        for signaller in launcher.0.lock().unwrap().iter() {
            signaller.kill();
        }
    }

    #[tokio::test]
    async fn shutdown_clears_and_refuses_new_tracks() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);
        session.play("A").await.unwrap();
        session.enqueue("B").await.unwrap();

        session.shutdown().await;
        assert_eq!(session.status(), Status::default());

        session.enqueue("C").await.unwrap();
        let err = session.next().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(launcher.launched.lock().unwrap().iter().all(Signaller::has_exited));
    }

    #[tokio::test]
    async fn kill_does_not_wait() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);
        session.play("A").await.unwrap();

        session.kill();
        assert_eq!(session.status().current, None);

        let signaller = launcher.launched.lock().unwrap()[0].clone();
        tokio::time::timeout(Duration::from_secs(5), signaller.exited())
            .await
            .unwrap();
        launcher.kill_all();
    }

    /// Playable provider whose streams never resolve.
    struct Stalled;

    #[async_trait]
    impl Provider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn is_playable(&self) -> bool {
            true
        }

        fn recognizes(&self, _: &str) -> bool {
            false
        }

        async fn search(&self, query: &str, _: SearchKind, _: usize) -> Result<Vec<Track>> {
            self.get_track(query).await.map(|track| vec![track])
        }

        async fn get_track(&self, id: &str) -> Result<Track> {
            Ok(Track {
                provider: "stalled".to_owned(),
                ..track(id)
            })
        }

        async fn resolve_stream(&self, _: &Track, _: Quality) -> Result<Stream> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stop_abandons_track_being_started() {
        let launcher = Arc::new(SleepLauncher::default());
        let resolver = Resolver::new(Quality::Any).with_provider(Stalled);
        let session = Orchestrator::new(resolver, launcher.clone(), Duration::from_secs(3));
        for title in ["A", "B"] {
            session.enqueue(title).await.unwrap();
        }

        let starting = {
            let session = session.clone();
            tokio::spawn(async move { session.next().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(1), session.stop())
            .await
            .expect("stop waited for stream resolution")
            .unwrap();
        let err = starting.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);

        let status = session.status();
        assert_eq!(status.current, None);
        assert_eq!(titles(&status.queue), ["B"]);

        // Shutting down does not wait either.
        let starting = {
            let session = session.clone();
            tokio::spawn(async move { session.next().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::timeout(Duration::from_secs(1), session.shutdown())
            .await
            .expect("shutdown waited for stream resolution");
        assert!(starting.await.unwrap().is_err());

        assert_eq!(session.status(), Status::default());
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    /// Records `process` as current, with an exit channel whose sender is
    /// already gone.
    fn adopt(session: &Orchestrator, process: &Process) {
        let (exit_tx, exit) = oneshot::channel();
        drop(exit_tx);
        session.session().current = Some(Current {
            track: track("A"),
            generation: 1,
            signaller: process.signaller(),
            control: None,
            paused: false,
            exit,
        });
    }

    fn sleep(secs: &str) -> Process {
        let mut command = Command::new("sleep");
        command.arg(secs);
        Process::spawn(command).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_without_exit_report_waits_for_reaping() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);

        let mut process = sleep("30");
        let signaller = process.signaller();
        adopt(&session, &process);
        let reaper = tokio::spawn(async move { process.wait().await });

        session.stop().await.unwrap();
        assert!(signaller.has_exited());
        assert_eq!(session.status().current, None);
        assert!(!reaper.await.unwrap().unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_without_exit_report_times_out_unreaped() {
        let resolver = Resolver::new(Quality::Any).with_provider(Fake::default());
        let session = Orchestrator::new(
            resolver,
            Arc::new(SleepLauncher::default()),
            Duration::from_millis(300),
        );

        let mut process = sleep("30");
        adopt(&session, &process);

        let err = session.stop().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(session.status().current, None);

        process.kill();
        process.wait().await.unwrap();
    }

    /// Launches `sleep` controlled through a fake `mpv` socket.
    struct Controlled {
        socket: std::path::PathBuf,
    }

    impl Launcher for Controlled {
        fn launch(&self, _: &Stream, _: &Track) -> Result<Process> {
            let mut command = Command::new("sleep");
            command.arg("30");
            Ok(Process::spawn(command)?.with_control(Control::new(&self.socket)))
        }
    }

    #[tokio::test]
    async fn pause_resume_and_seek_reach_the_player() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("mpv.sock");
        let player = fake_mpv(&socket, "{\"request_id\":1,\"error\":\"success\"}\n");

        let resolver = Resolver::new(Quality::Any).with_provider(Fake::default());
        let launcher = Arc::new(Controlled { socket });
        let session = Orchestrator::new(resolver, launcher, Duration::from_secs(3));

        let err = session.pause().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        session.play("A").await.unwrap();
        session.pause().await.unwrap();
        assert!(session.status().paused);
        session.seek(10.0).await.unwrap();
        session.resume().await.unwrap();
        assert!(!session.status().paused);

        let err = session.seek(f64::NAN).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let requests = player.await.unwrap();
        assert_eq!(requests[1]["command"], serde_json::json!(["seek", 10.0, "relative"]));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn uncontrollable_players_refuse_pause() {
        let launcher = Arc::new(SleepLauncher::default());
        let session = orchestrator(&launcher);
        session.play("A").await.unwrap();

        let err = session.pause().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(!session.status().paused);

        session.shutdown().await;
    }
}
