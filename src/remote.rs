//! Remote control over a Unix domain socket.
//!
//! The protocol is newline-delimited JSON. Every request line is answered
//! with exactly one response line:
//!
//! ```text
//! -> {"cmd":"play","args":{"query":"daft punk one more time"}}
//! <- {"ok":true,"result":{"tracks":[...],"playing":{...}}}
//! -> {"cmd":"queue.skip","args":{"index":2}}
//! <- {"ok":false,"error":"invalid argument: no queue entry at index 2"}
//! ```
//!
//! Commands: `play`, `queue.add`, `queue.list`, `queue.clear`,
//! `queue.skip`, `queue.remove`, `stop`, `next`, `status`, `pause`,
//! `resume` and `seek` (with `seconds`, negative to rewind).

use std::{
    collections::BTreeMap,
    io,
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};

use crate::{
    error::{Error, Result},
    session::{Advance, Orchestrator},
};

/// Connections sending longer request lines, not counting the line
/// terminator, are closed.
const MAX_REQUEST_SIZE: usize = 8192;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Request {
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    fn query(&self) -> Option<&str> {
        self.args
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|query| !query.is_empty())
    }

    /// The `index` argument, as a number or a numeric string.
    fn index(&self) -> Result<usize> {
        let index = match self.args.get("index") {
            Some(Value::Number(number)) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => return Err(Error::invalid_argument("missing index")),
        };
        index.ok_or_else(|| Error::invalid_argument("index must be a non-negative integer"))
    }

    /// The `seconds` argument, as a number or a numeric string.
    fn seconds(&self) -> Result<f64> {
        let seconds = match self.args.get("seconds") {
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => return Err(Error::invalid_argument("missing seconds")),
        };
        seconds
            .filter(|seconds: &f64| seconds.is_finite())
            .ok_or_else(|| Error::invalid_argument("seconds must be a number"))
    }
}

impl Response {
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

impl From<Result<Value>> for Response {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

fn advance_json(advance: Advance) -> Value {
    match advance {
        Advance::Playing(track) => json!({ "playing": track }),
        Advance::EmptyQueue => json!({ "playing": null, "queue": "empty" }),
    }
}

/// Runs one request against `orchestrator`.
pub async fn dispatch(orchestrator: &Orchestrator, request: &Request) -> Response {
    trace!("dispatching {request:?}");

    let result = match request.cmd.as_str() {
        cmd @ ("play" | "queue.add") => {
            let Some(query) = request.query() else {
                return Response::failure("missing query");
            };
            let queued = if cmd == "play" {
                orchestrator.play(query).await
            } else {
                orchestrator.enqueue(query).await
            };
            queued.and_then(|queued| serde_json::to_value(queued).map_err(Into::into))
        }
        "queue.list" => serde_json::to_value(orchestrator.status().queue).map_err(Into::into),
        "queue.clear" => {
            orchestrator.clear();
            Ok(json!({ "cleared": true }))
        }
        "queue.skip" => match request.index() {
            Ok(index) => orchestrator.skip_to(index).await.map(advance_json),
            Err(e) => Err(e),
        },
        "queue.remove" => request
            .index()
            .and_then(|index| orchestrator.remove(index))
            .map(|track| json!({ "removed": track })),
        "stop" => orchestrator
            .stop()
            .await
            .map(|()| json!({ "stopped": true })),
        "next" => orchestrator.next().await.map(advance_json),
        "status" => serde_json::to_value(orchestrator.status()).map_err(Into::into),
        "pause" => orchestrator
            .pause()
            .await
            .map(|()| json!({ "paused": true })),
        "resume" => orchestrator
            .resume()
            .await
            .map(|()| json!({ "paused": false })),
        "seek" => match request.seconds() {
            Ok(seconds) => orchestrator
                .seek(seconds)
                .await
                .map(|()| json!({ "seeked": seconds })),
            Err(e) => Err(e),
        },
        _ => return Response::failure("unknown command"),
    };

    if let Err(e) = &result {
        debug!("{} failed: {e}", request.cmd);
    }
    result.into()
}

/// Accepts remote control connections for one orchestrator.
pub struct Server {
    listener: UnixListener,
    path: PathBuf,
    orchestrator: Orchestrator,
}

impl Server {
    /// Binds to `path`, replacing a stale socket file left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error when another daemon is listening on `path` or the
    /// socket cannot be created.
    pub fn bind(path: impl Into<PathBuf>, orchestrator: Orchestrator) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if path.exists() {
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(Error::invalid_argument(format!(
                    "another instance is listening on {}",
                    path.display()
                )));
            }
            debug!("removing stale socket {}", path.display());
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        info!("listening on {}", path.display());

        Ok(Self {
            listener,
            path,
            orchestrator,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serves connections until accepting fails. Each connection is handled
    /// on its own task.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the listener fails.
    pub async fn serve(&self) -> Result<()> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                trace!("client connected");
                if let Err(e) = handle(stream, &orchestrator).await {
                    debug!("client connection failed: {e}");
                }
                trace!("client disconnected");
            });
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not remove {}: {e}", self.path.display());
            }
        }
    }
}

async fn handle(stream: UnixStream, orchestrator: &Orchestrator) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let response = match read_line(&mut reader).await? {
            ControlFlow::Break(()) => return Ok(()),
            ControlFlow::Continue(None) => continue,
            ControlFlow::Continue(Some(line)) => match serde_json::from_str::<Request>(&line) {
                Ok(request) => dispatch(orchestrator, &request).await,
                Err(e) => Response::failure(format!("invalid request: {e}")),
            },
        };
        write_line(&mut writer, &response).await?;
    }
}

/// Reads one line. Breaks on end of stream and yields `None` for blank
/// lines.
async fn read_line<R>(reader: &mut BufReader<R>) -> Result<ControlFlow<(), Option<String>>>
where
    R: AsyncRead + Unpin,
{
    // Do not buffer exceedingly large requests to prevent out of memory
    // conditions. One more byte than allowed, plus the terminator.
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_REQUEST_SIZE as u64 + 2)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(ControlFlow::Break(()));
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.len() > MAX_REQUEST_SIZE {
        return Err(Error::invalid_data(format!(
            "request exceeds {MAX_REQUEST_SIZE} bytes"
        )));
    }

    let line = String::from_utf8(line)
        .map_err(|e| Error::invalid_data(format!("request is not utf-8: {e}")))?;
    let line = line.trim();
    if line.is_empty() {
        Ok(ControlFlow::Continue(None))
    } else {
        Ok(ControlFlow::Continue(Some(line.to_owned())))
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Sends one request to the daemon listening on `path`.
///
/// # Errors
///
/// Returns an I/O error when the daemon cannot be reached, and an invalid
/// data error when it answers with something else than a response.
pub async fn send(path: impl AsRef<Path>, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(path.as_ref()).await?;
    let (reader, mut writer) = stream.into_split();

    write_line(&mut writer, request).await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::invalid_data("connection closed without response"));
    }
    Ok(serde_json::from_str(&line)?)
}
