//! YouTube through `yt-dlp`.
//!
//! All lookups shell out to `yt-dlp` and read its JSON output, one object
//! per line. Stream resolution prefers a direct audio URL but falls back to
//! the watch page URL, which `mpv` resolves by itself through its own
//! `yt-dlp` hook. The fallback is used when:
//! * `yt-dlp` cannot extract formats at all
//! * no audio format carries a direct URL
//! * the direct URL points at `googlevideo.com`, whose URLs are short-lived
//!   and need headers `mpv` would not send

use std::{ffi::OsString, path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::Provider;
use crate::{
    error::{Error, Result},
    track::{Quality, SearchKind, Stream, Track},
};

pub struct YouTube {
    binary: PathBuf,
    /// Upper bound for one `yt-dlp` run. The process is killed after that.
    timeout: Duration,
}

/// The subset of `yt-dlp` info JSON that is used.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Info {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    album: Option<String>,
    duration: Option<f64>,
    is_live: Option<bool>,
    formats: Vec<Format>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Format {
    url: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    asr: Option<u32>,
    audio_channels: Option<u32>,
}

impl Format {
    fn is_lossless(&self) -> bool {
        matches!(
            self.acodec.as_deref(),
            Some("flac" | "alac" | "pcm_s16le" | "pcm_s24le")
        )
    }
}

impl Default for YouTube {
    fn default() -> Self {
        Self::new()
    }
}

impl YouTube {
    pub const NAME: &'static str = "youtube";

    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 20;

    const FORMAT_SELECTOR: &'static str = "bestaudio[ext=webm+opus]/bestaudio/best";

    const TIMEOUT: Duration = Duration::from_secs(60);

    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            timeout: Self::TIMEOUT,
        }
    }

    #[must_use]
    pub fn watch_url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={id}")
    }

    /// Runs `yt-dlp` with `args` and returns its standard output.
    async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        trace!("running {} {args:?}", self.binary.display());

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // yt-dlp needs a JavaScript runtime for some extractors; deno is
        // commonly installed per user.
        if let Some(home) = dirs::home_dir() {
            let deno = home.join(".deno").join("bin");
            let mut paths = vec![deno];
            if let Some(path) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&path));
            }
            if let Ok(path) = std::env::join_paths(paths) {
                command.env("PATH", path);
            }
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                Error::provider(format!(
                    "{} did not finish within {:?}",
                    self.binary.display(),
                    self.timeout
                ))
            })?
            .map_err(|e| Error::provider(format!("{}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::provider(format!(
                "yt-dlp failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_lines(output: &str) -> Vec<Info> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Info>(line) {
                Ok(info) => Some(info),
                Err(e) => {
                    trace!("skipping unparseable yt-dlp line: {e}");
                    None
                }
            })
            .collect()
    }

    fn track_from(info: Info) -> Option<Track> {
        let id = info.id.or(info.url).filter(|id| !id.is_empty())?;
        let artist = info.uploader.or(info.channel).unwrap_or_default();
        let link = Self::watch_url(&id);

        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let duration_secs = info.duration.unwrap_or_default().max(0.0) as u64;

        Some(Track {
            id: format!("{}:{id}", Self::NAME),
            provider: Self::NAME.to_owned(),
            title: info.title.unwrap_or_default(),
            artist,
            album: info.album.unwrap_or_default(),
            duration_secs,
            links: [(Self::NAME.to_owned(), link)].into(),
            is_stream: info.is_live.unwrap_or_default(),
            ..Track::default()
        })
    }

    fn tracks_from(output: &str) -> Vec<Track> {
        Self::parse_lines(output)
            .into_iter()
            .filter_map(Self::track_from)
            .collect()
    }

    /// Picks the best audio format with a direct URL.
    fn choose_format(formats: &[Format], quality: Quality) -> Option<&Format> {
        formats
            .iter()
            .filter(|f| f.url.as_deref().is_some_and(|url| !url.is_empty()))
            .filter(|f| f.acodec.as_deref() != Some("none"))
            .max_by(|a, b| {
                let lossless = match quality {
                    Quality::LosslessFirst => a.is_lossless().cmp(&b.is_lossless()),
                    Quality::Any => std::cmp::Ordering::Equal,
                };
                lossless.then_with(|| {
                    a.abr
                        .unwrap_or_default()
                        .total_cmp(&b.abr.unwrap_or_default())
                })
            })
    }

    /// Builds a stream from `yt-dlp -j` output for `target`.
    fn stream_from(output: &str, target: &str, quality: Quality) -> Result<Stream> {
        let info: Info = serde_json::from_str(output.trim())?;

        let Some(format) = Self::choose_format(&info.formats, quality) else {
            return Ok(Self::fallback(target, "fallback to page URL"));
        };

        let url = format.url.clone().unwrap_or_default();
        if url.contains("googlevideo.com") {
            return Ok(Self::fallback(
                target,
                "fallback to page URL (direct googlevideo URL skipped)",
            ));
        }

        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bitrate_kbps = format.abr.unwrap_or_default().max(0.0) as u32;

        let mut stream = Stream {
            url,
            container: format.ext.clone().unwrap_or_default(),
            codec: format.acodec.clone().unwrap_or_default(),
            bitrate_kbps,
            sample_rate: format.asr.unwrap_or_default(),
            channels: format.audio_channels.unwrap_or_default(),
            lossless: format.is_lossless(),
            ..Stream::default()
        };
        stream.meta.insert("orig".to_owned(), target.to_owned());
        Ok(stream)
    }

    /// Lets the media player resolve `target` through its own `yt-dlp`
    /// hook. Search expressions need the `ytdl://` scheme for that.
    fn fallback(target: &str, note: &str) -> Stream {
        if target.starts_with("ytsearch") {
            Stream::fallback(format!("ytdl://{target}"), note)
        } else {
            Stream::fallback(target, note)
        }
    }

    /// The URL or search expression `yt-dlp` should resolve for `track`.
    fn target(track: &Track) -> String {
        if let Some(link) = track.link(Self::NAME).filter(|link| !link.is_empty()) {
            return link.to_owned();
        }
        match track.id.strip_prefix("youtube:") {
            Some(id) => Self::watch_url(id),
            None => format!("ytsearch1:{}", track.search_query()),
        }
    }
}

#[async_trait]
impl Provider for YouTube {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_playable(&self) -> bool {
        true
    }

    fn recognizes(&self, query: &str) -> bool {
        query.starts_with("youtube:") || query.contains("youtube.com") || query.contains("youtu.be")
    }

    async fn search(&self, query: &str, kind: SearchKind, limit: usize) -> Result<Vec<Track>> {
        if kind != SearchKind::Track {
            return Err(Error::invalid_argument(format!(
                "{kind:?} search is not supported by {}",
                Self::NAME
            )));
        }

        let limit = match limit {
            0 => Self::DEFAULT_LIMIT,
            n => n.min(Self::MAX_LIMIT),
        };
        let expression = format!("ytsearch{limit}:{query}");
        let output = self
            .run(["-j", "--flat-playlist", expression.as_str()])
            .await?;

        let tracks = Self::tracks_from(&output);
        if tracks.is_empty() {
            return Err(Error::resolution(format!("no results for \"{query}\"")));
        }
        Ok(tracks)
    }

    async fn get_track(&self, id: &str) -> Result<Track> {
        let url = if id.contains("://") {
            id.to_owned()
        } else {
            Self::watch_url(id.strip_prefix("youtube:").unwrap_or(id))
        };

        let output = self.run(["-j", url.as_str()]).await?;
        Self::tracks_from(&output)
            .into_iter()
            .next()
            .ok_or_else(|| Error::resolution(format!("no video found at {url}")))
    }

    async fn resolve_stream(&self, track: &Track, quality: Quality) -> Result<Stream> {
        let target = Self::target(track);
        let extracted = self
            .run(["-f", Self::FORMAT_SELECTOR, "-j", target.as_str()])
            .await;
        match extracted {
            Ok(output) => Self::stream_from(&output, &target, quality),
            Err(e) => {
                // Without a JS runtime or for SABR-only formats extraction
                // fails, but mpv may still manage with the page URL.
                debug!("yt-dlp extraction failed, falling back to page URL: {e}");
                Ok(Self::fallback(&target, "fallback to page URL"))
            }
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<Track>> {
        if url.starts_with("youtube:") {
            return Ok(vec![self.get_track(url).await?]);
        }

        let output = match self.run(["-j", "--flat-playlist", url]).await {
            Ok(output) => output,
            Err(e) => {
                debug!("flat playlist extraction failed, retrying as video: {e}");
                self.run(["-j", url]).await?
            }
        };

        let tracks = Self::tracks_from(&output);
        if tracks.is_empty() {
            return Err(Error::resolution(format!("no tracks found for {url}")));
        }
        Ok(tracks)
    }
}
