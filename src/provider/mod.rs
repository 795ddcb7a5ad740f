//! Track providers and the resolution pipeline.
//!
//! A [`Provider`] knows one source ecosystem: how to search it, how to look
//! up a single item and, if it can, how to turn a track into a playable
//! [`Stream`]. Providers are told apart by their [`name`](Provider::name),
//! which is also the [`Track::provider`] tag of every track they return.
//!
//! The [`Resolver`] turns a user query into playable tracks in two steps:
//!
//! 1. The query is handed to the provider that recognizes it (a link or a
//!    provider-qualified id), or searched on the default playable provider.
//! 2. Tracks flagged [`drm`](Track::drm) only carry metadata. They are
//!    re-resolved by searching the playable provider for `artist - title`.
//!
//! Stream resolution dispatches on the track's provider tag and refuses
//! restricted tracks outright.

pub mod spotify;
pub mod youtube;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    track::{Quality, SearchKind, Stream, Track},
};

pub use spotify::Spotify;
pub use youtube::YouTube;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Tag identifying this provider, e.g. `youtube`.
    fn name(&self) -> &str;

    /// Whether [`resolve_stream`](Self::resolve_stream) can produce audio.
    fn is_playable(&self) -> bool;

    /// Whether `query` is a link or an id that belongs to this provider.
    fn recognizes(&self, query: &str) -> bool;

    /// Searches for up to `limit` items.
    async fn search(&self, query: &str, kind: SearchKind, limit: usize) -> Result<Vec<Track>>;

    /// Looks up a single item by id or link.
    async fn get_track(&self, id: &str) -> Result<Track>;

    /// Resolves a playable stream for `track`.
    ///
    /// Never called with a [`drm`](Track::drm) track.
    async fn resolve_stream(&self, track: &Track, quality: Quality) -> Result<Stream>;

    /// Expands a link that may point at a playlist or album.
    ///
    /// Defaults to a single [`get_track`](Self::get_track) lookup.
    async fn fetch_url(&self, url: &str) -> Result<Vec<Track>> {
        Ok(vec![self.get_track(url).await?])
    }
}

/// Turns queries into playable tracks, and tracks into streams.
#[derive(Clone, Default)]
pub struct Resolver {
    providers: Vec<Arc<dyn Provider>>,
    quality: Quality,
}

impl Resolver {
    /// Search results considered when re-resolving a restricted album or
    /// playlist.
    const COLLECTION_LIMIT: usize = 10;

    #[must_use]
    pub fn new(quality: Quality) -> Self {
        Self {
            providers: Vec::new(),
            quality,
        }
    }

    /// Registers a provider. The first playable provider registered is the
    /// one plain text queries are searched on.
    #[must_use]
    pub fn with_provider<P>(mut self, provider: P) -> Self
    where
        P: Provider + 'static,
    {
        self.providers.push(Arc::new(provider));
        self
    }

    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// The provider plain text queries and restricted tracks go to.
    ///
    /// # Errors
    ///
    /// Returns a resolution error when no playable provider is registered.
    pub fn playable(&self) -> Result<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.is_playable())
            .ok_or_else(|| Error::resolution("no playable provider available"))
    }

    /// Searches the playable provider.
    ///
    /// # Errors
    ///
    /// Returns an error when the search itself fails.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>> {
        self.playable()?
            .search(query, SearchKind::Track, limit)
            .await
    }

    /// Resolves `query` into one or more playable tracks.
    ///
    /// Links to playlists and albums yield several tracks; everything else
    /// yields exactly one.
    ///
    /// # Errors
    ///
    /// Returns a resolution error when nothing matched, and passes provider
    /// errors through unchanged.
    pub async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_argument("missing query"));
        }

        let tracks = match self.providers.iter().find(|p| p.recognizes(query)) {
            Some(provider) => {
                debug!("resolving {query} through {}", provider.name());
                provider.fetch_url(query).await?
            }
            None => self.first_match(query).await.map(|track| vec![track])?,
        };

        let mut playable = Vec::with_capacity(tracks.len());
        for track in tracks {
            if track.drm {
                playable.extend(self.rehome(&track).await?);
            } else {
                playable.push(track);
            }
        }

        if playable.is_empty() {
            return Err(Error::resolution(format!("no tracks found for {query}")));
        }
        Ok(playable)
    }

    /// Resolves a fresh stream for `track`.
    ///
    /// # Errors
    ///
    /// Returns a resolution error for restricted tracks and unknown
    /// providers, and passes provider errors through unchanged.
    pub async fn resolve_stream(&self, track: &Track) -> Result<Stream> {
        if track.drm {
            return Err(Error::resolution(format!(
                "{track} is restricted and must be re-resolved first"
            )));
        }

        let provider = self.provider(&track.provider).ok_or_else(|| {
            Error::resolution(format!("no provider named \"{}\"", track.provider))
        })?;

        let stream = provider.resolve_stream(track, self.quality).await?;
        if stream.url.is_empty() {
            return Err(Error::provider(format!("no playable stream for {track}")));
        }
        if stream.is_expired() {
            return Err(Error::provider(format!("stream for {track} has expired")));
        }
        if let Some(note) = stream.meta.get("note") {
            debug!("stream for {track}: {note}");
        }
        Ok(stream)
    }

    async fn first_match(&self, query: &str) -> Result<Track> {
        self.search(query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::resolution(format!("no results for \"{query}\"")))
    }

    /// Finds playable counterparts of a restricted track.
    async fn rehome(&self, track: &Track) -> Result<Vec<Track>> {
        let query = track.search_query();
        let is_collection = matches!(
            track.tags.get("kind").map(String::as_str),
            Some("album" | "playlist")
        );

        if is_collection {
            debug!("re-resolving collection \"{query}\"");
            self.search(&query, Self::COLLECTION_LIMIT).await
        } else {
            debug!("re-resolving restricted track \"{query}\"");
            self.first_match(&query).await.map(|track| vec![track])
        }
    }
}
