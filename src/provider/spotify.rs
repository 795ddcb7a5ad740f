//! Spotify links, resolved to metadata only.
//!
//! Spotify audio cannot be streamed without an account, so every track this
//! provider returns is flagged [`drm`](Track::drm) and carries just enough
//! metadata to be found elsewhere. Titles come from the public oEmbed
//! endpoint, which needs no authentication.
//!
//! Accepted forms:
//! * `spotify:track:<id>` (also `album` and `playlist`)
//! * `https://open.spotify.com/track/<id>` (also `album` and `playlist`,
//!   with or without a locale segment or query string)

use std::{collections::BTreeMap, sync::LazyLock};

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use url::Url;

use super::Provider;
use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    track::{Quality, SearchKind, Stream, Track},
};

pub struct Spotify {
    http_client: HttpClient,
}

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"open\.spotify\.com/(?:[a-z-]+/)?(track|album|playlist)/([A-Za-z0-9]+)")
        .expect("invalid link pattern")
});

static URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^spotify:(track|album|playlist):([A-Za-z0-9]+)$").expect("invalid uri pattern")
});

/// The kind of item a Spotify link points at.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Track,
    Album,
    Playlist,
}

impl Kind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
        }
    }
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
}

impl Spotify {
    pub const NAME: &'static str = "spotify";

    const OEMBED_URL: &'static str = "https://open.spotify.com/oembed";

    /// oEmbed responses are tiny; anything larger is not what we asked for.
    const OEMBED_MAX_SIZE: usize = 16 * 1024;

    /// Creates a new provider.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
        })
    }

    /// Extracts the kind and id from a Spotify link or URI.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error for anything else.
    pub fn parse(query: &str) -> Result<(Kind, String)> {
        let captures = URI_PATTERN
            .captures(query)
            .or_else(|| LINK_PATTERN.captures(query))
            .ok_or_else(|| Error::invalid_argument(format!("invalid spotify link: {query}")))?;

        let kind = Kind::from_segment(&captures[1])
            .ok_or_else(|| Error::invalid_argument(format!("invalid spotify link: {query}")))?;
        Ok((kind, captures[2].to_owned()))
    }

    #[must_use]
    pub fn page_url(kind: Kind, id: &str) -> String {
        format!("https://open.spotify.com/{}/{id}", kind.as_str())
    }

    /// Fetches the display title of a Spotify page.
    async fn title(&self, page_url: &str) -> Result<String> {
        let url = Url::parse_with_params(Self::OEMBED_URL, &[("url", page_url)])?;
        let request = self.http_client.get(url);
        let response = self.http_client.execute(request).await?;
        let body = HttpClient::read_limited(response, Self::OEMBED_MAX_SIZE).await?;

        let oembed: OEmbed = serde_json::from_slice(&body)?;
        oembed
            .title
            .filter(|title| !title.trim().is_empty())
            .map(|title| title.trim().to_owned())
            .ok_or_else(|| Error::resolution(format!("no title for {page_url}")))
    }

    #[must_use]
    pub fn is_link(query: &str) -> bool {
        query.starts_with("spotify:") || query.contains("open.spotify.com/")
    }

    fn metadata_track(kind: Kind, id: &str, title: String) -> Track {
        let page_url = Self::page_url(kind, id);
        Track {
            id: format!("{}:{}:{id}", Self::NAME, kind.as_str()),
            provider: Self::NAME.to_owned(),
            title,
            links: BTreeMap::from([(Self::NAME.to_owned(), page_url)]),
            drm: true,
            tags: BTreeMap::from([("kind".to_owned(), kind.as_str().to_owned())]),
            ..Track::default()
        }
    }
}

#[async_trait]
impl Provider for Spotify {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_playable(&self) -> bool {
        false
    }

    fn recognizes(&self, query: &str) -> bool {
        Self::is_link(query)
    }

    async fn search(&self, _query: &str, _kind: SearchKind, _limit: usize) -> Result<Vec<Track>> {
        Err(Error::provider("spotify search requires authentication"))
    }

    async fn get_track(&self, id: &str) -> Result<Track> {
        let (kind, id) = match Self::parse(id) {
            Ok(parsed) => parsed,
            // A bare id.
            Err(_) if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) => {
                (Kind::Track, id.to_owned())
            }
            Err(e) => return Err(e),
        };

        let page_url = Self::page_url(kind, &id);
        let title = self
            .title(&page_url)
            .await
            .map_err(|e| Error::new(e.kind, format!("could not get spotify info: {e}")))?;

        debug!("spotify {} {id} is \"{title}\"", kind.as_str());
        Ok(Self::metadata_track(kind, &id, title))
    }

    async fn resolve_stream(&self, track: &Track, _quality: Quality) -> Result<Stream> {
        Err(Error::provider(format!(
            "{track} is a spotify track and cannot be streamed directly"
        )))
    }
}
