use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;

use audictl::{
    error::{Error, Result},
    events::Event,
    player::{Launcher, Process, Signaller},
    provider::{Provider, Resolver},
    remote::{self, Request},
    session::{Advance, Orchestrator},
    track::{Quality, SearchKind, Stream, Track},
};

/// Playable catalog: every search finds one track titled after the query.
struct Catalog;

/// Metadata-only links, like Spotify's.
struct Links;

#[async_trait]
impl Provider for Catalog {
    fn name(&self) -> &str {
        "catalog"
    }

    fn is_playable(&self) -> bool {
        true
    }

    fn recognizes(&self, _query: &str) -> bool {
        false
    }

    async fn search(&self, query: &str, _kind: SearchKind, _limit: usize) -> Result<Vec<Track>> {
        Ok(vec![Track {
            id: format!("catalog:{query}"),
            provider: "catalog".to_owned(),
            title: query.to_owned(),
            ..Track::default()
        }])
    }

    async fn get_track(&self, id: &str) -> Result<Track> {
        Err(Error::provider(format!("{id} is not a catalog id")))
    }

    async fn resolve_stream(&self, track: &Track, _quality: Quality) -> Result<Stream> {
        Ok(Stream {
            url: format!("catalog://{}", track.title),
            ..Stream::default()
        })
    }
}

#[async_trait]
impl Provider for Links {
    fn name(&self) -> &str {
        "links"
    }

    fn is_playable(&self) -> bool {
        false
    }

    fn recognizes(&self, query: &str) -> bool {
        query.starts_with("links:")
    }

    async fn search(&self, _: &str, _: SearchKind, _: usize) -> Result<Vec<Track>> {
        Err(Error::provider("unsupported"))
    }

    async fn get_track(&self, id: &str) -> Result<Track> {
        Ok(Track {
            id: id.to_owned(),
            provider: "links".to_owned(),
            title: id.trim_start_matches("links:").to_owned(),
            artist: "Band".to_owned(),
            drm: true,
            tags: BTreeMap::from([("kind".to_owned(), "track".to_owned())]),
            ..Track::default()
        })
    }

    async fn resolve_stream(&self, _: &Track, _: Quality) -> Result<Stream> {
        Err(Error::provider("restricted"))
    }
}

/// Stands in for the media player with `sleep`.
#[derive(Default)]
struct Sleeper {
    seconds: HashMap<String, &'static str>,
    launched: Mutex<Vec<Signaller>>,
}

impl Launcher for Sleeper {
    fn launch(&self, _stream: &Stream, track: &Track) -> Result<Process> {
        let seconds = self.seconds.get(&track.title).copied().unwrap_or("30");
        let mut command = Command::new("sleep");
        command.arg(seconds);

        let process = Process::spawn(command)?;
        self.launched.lock().unwrap().push(process.signaller());
        Ok(process)
    }
}

fn orchestrator(sleeper: &Arc<Sleeper>) -> Orchestrator {
    let resolver = Resolver::new(Quality::Any)
        .with_provider(Links)
        .with_provider(Catalog);
    Orchestrator::new(resolver, sleeper.clone(), Duration::from_secs(3))
}

fn titles(tracks: &[Track]) -> Vec<&str> {
    tracks.iter().map(|track| track.title.as_str()).collect()
}

#[tokio::test]
async fn restricted_links_play_from_catalog() {
    let sleeper = Arc::new(Sleeper::default());
    let session = orchestrator(&sleeper);

    let queued = session.play("links:Song").await.unwrap();
    let playing = queued.playing.unwrap();
    assert_eq!(playing.title, "Band - Song");
    assert_eq!(playing.provider, "catalog");
    assert!(!playing.drm);

    session.shutdown().await;
    assert!(sleeper.launched.lock().unwrap().iter().all(Signaller::has_exited));
}

#[tokio::test]
async fn natural_exits_advance_until_empty() {
    let sleeper = Arc::new(Sleeper {
        seconds: HashMap::from([("A".to_owned(), "0.1"), ("B".to_owned(), "0.1")]),
        ..Sleeper::default()
    });
    let session = orchestrator(&sleeper);
    let mut events = session.subscribe();

    session.enqueue("A").await.unwrap();
    session.enqueue("B").await.unwrap();
    assert!(matches!(session.next().await.unwrap(), Advance::Playing(_)));

    let mut finished = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            match event {
                Event::Finished(track) => finished.push(track.title),
                Event::QueueEmpty => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(finished, ["A", "B"]);
    assert_eq!(session.status().current, None);
    assert_eq!(sleeper.launched.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn daemon_round_trip() {
    let sleeper = Arc::new(Sleeper::default());
    let session = orchestrator(&sleeper);

    let path = std::env::temp_dir().join(format!("audictl-it-{}.sock", std::process::id()));
    let server = Arc::new(remote::Server::bind(&path, session.clone()).unwrap());
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };

    let play = Request::new("play").with_arg("query", "A");
    let response = remote::send(&path, &play).await.unwrap();
    assert!(response.ok, "{response:?}");
    assert_eq!(response.result.unwrap()["playing"]["title"], "A");

    let add = Request::new("queue.add").with_arg("query", "B");
    assert!(remote::send(&path, &add).await.unwrap().ok);

    let response = remote::send(&path, &Request::new("status")).await.unwrap();
    let status = response.result.unwrap();
    assert_eq!(status["current"]["title"], "A");
    assert_eq!(status["queue"][0]["title"], "B");

    let response = remote::send(&path, &Request::new("stop")).await.unwrap();
    assert!(response.ok);
    let status = session.status();
    assert_eq!(status.current, None);
    assert_eq!(titles(&status.queue), ["B"]);

    let response = remote::send(&path, &Request::new("bogus")).await.unwrap();
    assert_eq!(response.error.as_deref(), Some("unknown command"));

    serving.abort();
    session.shutdown().await;
}
