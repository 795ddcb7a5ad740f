//! Tracks and streams as handed around between providers and the session.
//!
//! A [`Track`] is resolved metadata for one audio item. It says nothing about
//! how to play it; that is the job of a [`Stream`], which a provider resolves
//! fresh every time a track is about to start. Stream URLs are often
//! short-lived, so streams are never stored in the queue.

use std::{collections::BTreeMap, fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Resolved metadata identifying a playable or DRM-restricted audio item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    /// Provider-qualified identifier, e.g. `youtube:dQw4w9WgXcQ`.
    pub id: String,

    /// Tag of the provider that produced this track.
    pub provider: String,

    pub title: String,
    pub artist: String,
    pub album: String,

    /// Duration in seconds; 0 when unknown.
    #[serde(rename = "duration")]
    pub duration_secs: u64,

    /// Resolvable URLs keyed by provider name.
    pub links: BTreeMap<String, String>,

    /// Whether this is a live stream without a fixed duration.
    pub is_stream: bool,

    /// Whether this track is restricted and must be re-resolved through a
    /// playable provider before a stream can be requested.
    pub drm: bool,

    pub tags: BTreeMap<String, String>,
}

impl Track {
    /// Returns the link for `provider`, if any.
    #[must_use]
    pub fn link(&self, provider: &str) -> Option<&str> {
        self.links.get(provider).map(String::as_str)
    }

    /// Query used to find this track on another provider.
    #[must_use]
    pub fn search_query(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

/// Formats as `artist - title [m:ss]`, leaving out what is unknown.
impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.search_query())?;
        if self.duration_secs > 0 {
            write!(
                f,
                " [{}:{:02}]",
                self.duration_secs / 60,
                self.duration_secs % 60
            )?;
        }
        Ok(())
    }
}

/// A resolved, possibly short-lived, playable source for one [`Track`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub url: String,
    pub container: String,
    pub codec: String,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub channels: u32,
    pub lossless: bool,

    /// When the URL stops working; `None` when unknown.
    pub expires_at: Option<SystemTime>,

    /// Free-form annotations, e.g. which fallback was used.
    pub meta: BTreeMap<String, String>,
}

impl Stream {
    /// A stream that lets the media player resolve `url` by itself.
    #[must_use]
    pub fn fallback(url: impl Into<String>, note: &str) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert("note".to_owned(), note.to_owned());
        Self {
            url: url.into(),
            meta,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| SystemTime::now() >= expires_at)
    }
}

/// What to look for when searching.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SearchKind {
    #[default]
    Track,
    Album,
    Playlist,
}

/// Audio quality preference passed to stream resolution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    /// Whatever the provider considers best (default)
    #[default]
    Any,

    /// Prefer lossless formats when the provider offers them
    LosslessFirst,
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "lossless-first" | "lossless" => Ok(Self::LosslessFirst),
            other => Err(Error::invalid_argument(format!(
                "unknown quality \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::LosslessFirst => write!(f, "lossless-first"),
        }
    }
}
