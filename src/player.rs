//! External media player processes.
//!
//! Audio is never decoded in this process. Instead every track is handed to
//! a freshly spawned media player (`mpv` by default) which runs headless in
//! its own process group:
//!
//! * no video output and no terminal I/O, so it cannot corrupt the caller's
//!   terminal
//! * stdin, stdout and stderr connected to the null device
//! * a dedicated process group, so helper processes it forks (e.g. `yt-dlp`
//!   when handed a page URL) are signalled together with it
//!
//! A [`Process`] is owned by exactly one task, which is the only one to
//! [`wait`](Process::wait) on it. Other tasks signal it through a cloned
//! [`Signaller`], and pause or seek it through its [`Control`] socket.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    process::{Child, Command},
    signal::unix::{signal, SignalKind},
};

use crate::{
    error::{Error, Result},
    track::{Stream, Track},
};

/// Launches one media player process per track.
///
/// The session only ever talks to this trait, which keeps the actual media
/// player replaceable.
pub trait Launcher: Send + Sync {
    /// Spawns a player for `stream`, labelled with `track` where supported.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Spawn`](crate::error::ErrorKind::Spawn) error
    /// when the process could not be started.
    fn launch(&self, stream: &Stream, track: &Track) -> Result<Process>;
}

/// A running media player process.
#[derive(Debug)]
pub struct Process {
    child: Child,
    signaller: Signaller,
    control: Option<Control>,
}

impl Process {
    /// Upper bound between two checks for exit, in case a `SIGCHLD` was
    /// coalesced with another.
    const REAP_INTERVAL: Duration = Duration::from_millis(250);

    /// Spawns `command` as a headless process in a new process group.
    ///
    /// # Errors
    ///
    /// Returns a spawn error when the binary cannot be executed.
    pub fn spawn(mut command: Command) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        command.process_group(0);

        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let child = command
            .spawn()
            .map_err(|e| Error::spawn(format!("{program}: {e}")))?;

        let pid = child.id().ok_or_else(|| Error::spawn("process exited on spawn"))?;
        debug!("spawned {program} with pid {pid}");

        Ok(Self {
            child,
            signaller: Signaller {
                pid,
                reaped: Arc::new(Mutex::new(false)),
            },
            control: None,
        })
    }

    /// Attaches the IPC socket the process was told to listen on.
    #[must_use]
    pub fn with_control(mut self, control: Control) -> Self {
        self.control = Some(control);
        self
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.signaller.pid
    }

    /// A handle to signal this process from another task.
    #[must_use]
    pub fn signaller(&self) -> Signaller {
        self.signaller.clone()
    }

    #[must_use]
    pub fn control(&self) -> Option<Control> {
        self.control.clone()
    }

    /// Sends a graceful termination request to the process group.
    ///
    /// # Errors
    ///
    /// See [`Signaller::terminate`].
    pub fn terminate(&self) -> Result<()> {
        self.signaller.terminate()
    }

    /// Kills the process group without waiting.
    pub fn kill(&self) {
        self.signaller.kill();
    }

    /// Waits until the process exits and reaps it.
    ///
    /// Returns immediately when it was already reaped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the exit status cannot be collected.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let mut children = signal(SignalKind::child())?;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            let _ = tokio::time::timeout(Self::REAP_INTERVAL, children.recv()).await;
        }
    }

    /// Reaps the process if it has exited.
    ///
    /// Reaping and signalling exclude each other, so a signal never reaches
    /// a recycled process group.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the exit status cannot be collected.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = {
            let mut reaped = self.signaller.lock();
            let status = self.child.try_wait()?;
            if status.is_some() {
                *reaped = true;
            }
            status
        };

        if status.is_some() {
            if let Some(control) = &self.control {
                control.remove_socket();
            }
        }
        Ok(status)
    }
}

/// Signals the process group of a [`Process`] without owning it.
///
/// Once the owning task has reaped the process, signalling becomes a no-op
/// so that a recycled pid is never hit.
#[derive(Clone, Debug)]
pub struct Signaller {
    pid: u32,
    reaped: Arc<Mutex<bool>>,
}

impl Signaller {
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        *self.lock()
    }

    /// Resolves once the owning task has reaped the process.
    pub async fn exited(&self) {
        while !self.has_exited() {
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
    }

    /// Sends `SIGTERM` to the whole process group. Does not block.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the signal could not be delivered for any
    /// other reason than the group being gone already.
    pub fn terminate(&self) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal(libc::SIGTERM)
        }

        #[cfg(not(unix))]
        Err(Error::internal("process groups are unsupported on this platform"))
    }

    /// Sends `SIGKILL` to the whole process group, ignoring failures.
    pub fn kill(&self) {
        #[cfg(unix)]
        {
            if let Err(e) = self.signal(libc::SIGKILL) {
                warn!("failed to kill process group {}: {e}", self.pid);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.reaped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) -> Result<()> {
        // Held until the signal is sent, which keeps the owner from reaping.
        let reaped = self.lock();
        if *reaped {
            return Ok(());
        }

        let pgid = libc::pid_t::try_from(self.pid)
            .map_err(|_| Error::internal(format!("pid {} out of range", self.pid)))?;

        // SAFETY: `killpg` has no memory safety requirements.
        let result = unsafe { libc::killpg(pgid, signal) };
        if result == 0 {
            trace!("sent signal {signal} to process group {pgid}");
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Exited, but not reaped yet.
            return Ok(());
        }
        Err(err.into())
    }
}

/// Controls a running `mpv` through its JSON IPC socket.
///
/// Every command opens a short-lived connection, sends one request and
/// waits for the matching reply. Unsolicited event lines are skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Control {
    path: PathBuf,
}

impl Control {
    /// How long a command may take, connecting included.
    const TIMEOUT: Duration = Duration::from_millis(500);

    const REQUEST_ID: u64 = 1;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Returns an error when the player cannot be reached or rejects the
    /// command.
    pub async fn pause(&self) -> Result<()> {
        self.command(json!(["set_property", "pause", true])).await
    }

    /// # Errors
    ///
    /// See [`pause`](Self::pause).
    pub async fn resume(&self) -> Result<()> {
        self.command(json!(["set_property", "pause", false])).await
    }

    /// Seeks `seconds` forward, or backward when negative.
    ///
    /// # Errors
    ///
    /// See [`pause`](Self::pause).
    pub async fn seek(&self, seconds: f64) -> Result<()> {
        self.command(json!(["seek", seconds, "relative"])).await
    }

    async fn command(&self, command: Value) -> Result<()> {
        trace!("sending {command} to {}", self.path.display());
        match tokio::time::timeout(Self::TIMEOUT, self.exchange(command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::provider(format!(
                "player did not answer within {:?}",
                Self::TIMEOUT
            ))),
        }
    }

    async fn exchange(&self, command: Value) -> Result<()> {
        let stream = UnixStream::connect(&self.path).await?;
        let (reader, mut writer) = stream.into_split();

        let mut request =
            serde_json::to_vec(&json!({ "command": command, "request_id": Self::REQUEST_ID }))?;
        request.push(b'\n');
        writer.write_all(&request).await?;

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let reply: Value = serde_json::from_str(&line)?;
            if reply.get("request_id").and_then(Value::as_u64) != Some(Self::REQUEST_ID) {
                continue;
            }
            return match reply.get("error").and_then(Value::as_str) {
                Some("success") => Ok(()),
                Some(error) => Err(Error::provider(format!("player rejected command: {error}"))),
                None => Err(Error::invalid_data("player reply carries no status")),
            };
        }

        Err(Error::invalid_data("player closed the control connection"))
    }

    /// Removes a socket left behind by a player that did not exit cleanly.
    fn remove_socket(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("could not remove {}: {e}", self.path.display());
            }
        }
    }
}

/// Launches `mpv` in audio-only mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mpv {
    /// Path or name of the `mpv` binary.
    pub binary: PathBuf,

    /// Output device, passed as `--audio-device`.
    pub device: Option<String>,

    /// Whether to force resampling to [`Self::RESAMPLE_RATE`].
    pub resample: bool,
}

impl Default for Mpv {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mpv"),
            device: None,
            resample: false,
        }
    }
}

impl Mpv {
    /// Output sample rate when resampling is enabled.
    pub const RESAMPLE_RATE: u32 = 48_000;

    /// Arguments for long-running, headless playback of `url`, controllable
    /// through `control` when given.
    #[must_use]
    pub fn args(&self, url: &str, title: &str, control: Option<&Control>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-video".into(),
            "--no-terminal".into(),
            "--really-quiet".into(),
        ];
        if !title.is_empty() {
            args.push(format!("--force-media-title={title}").into());
        }
        if let Some(control) = control {
            let mut server = OsString::from("--input-ipc-server=");
            server.push(control.path());
            args.push(server);
        }
        self.push_output_args(&mut args);
        args.push(url.into());
        args
    }

    /// A socket path unique to this process and launch.
    fn control_path() -> PathBuf {
        static LAUNCHES: AtomicU64 = AtomicU64::new(0);
        let launch = LAUNCHES.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("audictl-mpv-{}-{launch}.sock", std::process::id()))
    }

    fn push_output_args(&self, args: &mut Vec<OsString>) {
        if let Some(device) = self.device.as_deref().filter(|d| !d.is_empty()) {
            args.push(format!("--audio-device={device}").into());
        }
        if self.resample {
            args.push(format!("--audio-samplerate={}", Self::RESAMPLE_RATE).into());
        }
    }

    /// Plays `url` to completion, capturing all output.
    ///
    /// Meant for one-shot diagnostic runs: the player uses no configuration
    /// file and its combined stdout and stderr are returned so that errors
    /// can be shown to the user.
    ///
    /// # Errors
    ///
    /// Returns a spawn error when `mpv` cannot be started, or a provider
    /// error carrying the captured output when it exits unsuccessfully.
    pub async fn run_capture(&self, url: &str) -> Result<String> {
        let mut args: Vec<OsString> = vec!["--no-config".into(), "--no-video".into()];
        self.push_output_args(&mut args);
        args.push(url.into());

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::spawn(format!("{}: {e}", self.binary.display())))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(Error::provider(format!(
                "{} exited with {}:\n{combined}",
                self.binary.display(),
                output.status
            )))
        }
    }
}

impl Launcher for Mpv {
    fn launch(&self, stream: &Stream, track: &Track) -> Result<Process> {
        if stream.url.is_empty() {
            return Err(Error::spawn("no playable stream URL"));
        }

        let control = Control::new(Self::control_path());
        let mut command = Command::new(&self.binary);
        command.args(self.args(&stream.url, &track.title, Some(&control)));
        Ok(Process::spawn(command)?.with_control(control))
    }
}
