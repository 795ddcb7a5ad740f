//! Line-oriented interactive shell.
//!
//! Searches locally and shows numbered results, which `play` and `add`
//! accept in place of a query. Everything else is sent to the daemon. When
//! no daemon is running, `play` plays directly and returns once the tracks
//! have finished.
//!
//! ```text
//! audictl> search daft punk
//! 1) Daft Punk - One More Time [5:20]
//! 2) Daft Punk - Around the World [7:09]
//! audictl> play 2
//! ```

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    config::Config,
    error::{Error, Result},
    provider::Resolver,
    remote::{self, Request},
    track::Track,
};

const PROMPT: &str = "audictl> ";

const HELP: &str = "\
commands:
  search <query>        search and number the results
  play <n|query|link>   play result n, a query or a link
  add <n|query|link>    queue result n, a query or a link
  queue                 list the queue
  clear                 empty the queue
  next                  skip to the next track
  stop                  stop playback
  status                show the current track and the queue
  pause, resume         pause or resume the current track
  seek <seconds>        seek forward, or backward when negative
  device [device]       show or set the device for direct playback
  help                  show this help
  exit, quit            leave the shell
";

/// What a search result number or free text refers to.
#[derive(Clone, Debug, PartialEq)]
enum Target {
    /// One-based index into the latest search results.
    Result(usize),
    Query(String),
}

#[derive(Clone, Debug, PartialEq)]
enum Line {
    Help,
    Exit,
    Search(String),
    Play(Target),
    Add(Target),
    Queue,
    Clear,
    Next,
    Stop,
    Status,
    Pause,
    Resume,
    Seek(f64),
    Device(Option<String>),
}

fn usage(usage: &str) -> Error {
    Error::invalid_argument(format!("usage: {usage}"))
}

impl Target {
    fn parse(text: &str, help: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(usage(help));
        }
        Ok(text
            .parse()
            .map_or_else(|_| Self::Query(text.to_owned()), Self::Result))
    }
}

impl Line {
    /// Parses one input line. Blank lines yield `None`.
    fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let (cmd, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(cmd, rest)| (cmd, rest.trim()));

        let parsed = match cmd {
            "" => return Ok(None),
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            "search" if rest.is_empty() => return Err(usage("search <query>")),
            "search" => Self::Search(rest.to_owned()),
            "play" => Self::Play(Target::parse(rest, "play <n|query|link>")?),
            "add" | "enqueue" | "queue.add" => Self::Add(Target::parse(rest, "add <n|query|link>")?),
            "queue" | "queue.list" => Self::Queue,
            "clear" | "queue.clear" => Self::Clear,
            "next" => Self::Next,
            "stop" => Self::Stop,
            "status" => Self::Status,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "seek" => {
                let seconds = rest
                    .parse::<f64>()
                    .ok()
                    .filter(|seconds| seconds.is_finite())
                    .ok_or_else(|| usage("seek <seconds>"))?;
                Self::Seek(seconds)
            }
            "device" => Self::Device((!rest.is_empty()).then(|| rest.to_owned())),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "unknown command '{cmd}'; try 'help'"
                )))
            }
        };
        Ok(Some(parsed))
    }
}

/// An interactive session on top of the daemon.
pub struct Shell {
    config: Config,
    resolver: Resolver,
    results: Vec<Track>,
}

impl Shell {
    /// Number of results a search shows.
    pub const RESULTS: usize = 5;

    #[must_use]
    pub fn new(config: Config, resolver: Resolver) -> Self {
        Self {
            config,
            resolver,
            results: Vec::new(),
        }
    }

    /// Reads commands from `input` until it ends or `exit` is entered.
    ///
    /// Failing commands are reported on `output` and do not end the shell.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when reading `input` or writing `output` fails.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output
            .write_all(b"audictl shell; type 'help' for commands\n")
            .await?;

        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };

            let reply = match Line::parse(&line) {
                Ok(None) => continue,
                Ok(Some(Line::Exit)) => break,
                Ok(Some(line)) => self.execute(line).await,
                Err(e) => Err(e),
            };
            let text = reply.unwrap_or_else(|e| format!("error: {e}\n"));
            output.write_all(text.as_bytes()).await?;
        }

        output.flush().await?;
        Ok(())
    }

    async fn execute(&mut self, line: Line) -> Result<String> {
        match line {
            Line::Help => Ok(HELP.to_owned()),
            Line::Exit => Ok(String::new()),
            Line::Search(query) => self.search(&query).await,
            Line::Play(target) => {
                let query = self.query(target)?;
                if self.config.socket_path.exists() {
                    self.rpc(Request::new("play").with_arg("query", query)).await
                } else {
                    self.play_directly(&query).await
                }
            }
            Line::Add(target) => {
                let query = self.query(target)?;
                self.rpc(Request::new("queue.add").with_arg("query", query))
                    .await
            }
            Line::Queue => self.rpc(Request::new("queue.list")).await,
            Line::Clear => self.rpc(Request::new("queue.clear")).await,
            Line::Next => self.rpc(Request::new("next")).await,
            Line::Stop => self.rpc(Request::new("stop")).await,
            Line::Status => self.rpc(Request::new("status")).await,
            Line::Pause => self.rpc(Request::new("pause")).await,
            Line::Resume => self.rpc(Request::new("resume")).await,
            Line::Seek(seconds) => {
                self.rpc(Request::new("seek").with_arg("seconds", seconds))
                    .await
            }
            Line::Device(device) => {
                if device.is_some() {
                    self.config.device = device;
                }
                Ok(match &self.config.device {
                    Some(device) => format!("device for direct playback: {device}\n"),
                    None => "device for direct playback: player default\n".to_owned(),
                })
            }
        }
    }

    async fn search(&mut self, query: &str) -> Result<String> {
        self.results = self.resolver.search(query, Self::RESULTS).await?;
        if self.results.is_empty() {
            return Ok("no results\n".to_owned());
        }

        Ok(self
            .results
            .iter()
            .enumerate()
            .map(|(i, track)| format!("{}) {track}\n", i + 1))
            .collect())
    }

    fn query(&self, target: Target) -> Result<String> {
        match target {
            Target::Query(query) => Ok(query),
            Target::Result(n) => n
                .checked_sub(1)
                .and_then(|i| self.results.get(i))
                .map(|track| track.id.clone())
                .ok_or_else(|| Error::invalid_argument(format!("no search result {n}"))),
        }
    }

    async fn rpc(&self, request: Request) -> Result<String> {
        let response = remote::send(&self.config.socket_path, &request)
            .await
            .map_err(|e| {
                Error::new(
                    e.kind,
                    format!(
                        "cannot reach daemon at {}: {e}",
                        self.config.socket_path.display()
                    ),
                )
            })?;

        if !response.ok {
            let error = response.error.as_deref().unwrap_or("request failed");
            return Ok(format!("error: {error}\n"));
        }
        let result = response.result.unwrap_or(Value::Null);
        Ok(format!("{}\n", serde_json::to_string_pretty(&result)?))
    }

    async fn play_directly(&self, query: &str) -> Result<String> {
        let mpv = self.config.mpv();
        let mut played = String::new();
        for track in self.resolver.resolve(query).await? {
            let stream = self.resolver.resolve_stream(&track).await?;
            info!("playing {track}");
            mpv.run_capture(&stream.url).await?;
            played.push_str(&format!("played {track}\n"));
        }
        Ok(played)
    }
}
