use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::cache::LastTrackCache;
use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::estimator::ClockOffsetEstimator;
use crate::media::MediaElement;
use crate::messages::{Presence, RoomEvent};
use crate::room::{ClientId, RoomCode, RoomLink};
use crate::synchronizer::{ListenerState, PlaybackSynchronizer, SyncOutcome};
use crate::track::{TrackFetcher, TrackInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerStatus {
    Connecting,
    WaitingForAdmin,
    Downloading { title: String },
    Ready { title: String },
    FetchFailed { reason: String },
    /// Local output refused to start; the next admin action retries.
    PlaybackRejected,
    Left,
}

/// What a front end shows for one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSnapshot {
    pub status: ListenerStatus,
    pub state: ListenerState,
    pub offset_ms: f64,
    /// Clock-sync replies behind `offset_ms`.
    pub offset_samples: u64,
    pub average_delay_ms: Option<f64>,
    pub playing: bool,
    pub position: Option<f64>,
    pub rate: Option<f64>,
}

impl Default for ListenerSnapshot {
    fn default() -> Self {
        Self {
            status: ListenerStatus::Connecting,
            state: ListenerState::Uninitialized,
            offset_ms: 0.0,
            offset_samples: 0,
            average_delay_ms: None,
            playing: false,
            position: None,
            rate: None,
        }
    }
}

struct Fetched {
    generation: u64,
    track: TrackInfo,
    result: Result<Bytes>,
}

/// One listener's participation in a room, from join to leave.
pub struct ListenerSession {
    client_id: ClientId,
    room: RoomCode,
    config: SyncConfig,
    clock: SharedClock,
    fetcher: Arc<dyn TrackFetcher>,
    cache: Option<LastTrackCache>,
}

impl ListenerSession {
    pub fn new(room: RoomCode, config: SyncConfig, clock: SharedClock, fetcher: Arc<dyn TrackFetcher>) -> Self {
        Self {
            client_id: ClientId::generate(),
            room,
            config,
            clock,
            fetcher,
            cache: None,
        }
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_cache(mut self, cache: LastTrackCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Runs the session on its own task. `load_media` turns a downloaded
    /// track into the media element the synchronizer will steer.
    pub fn spawn<M, F>(self, link: RoomLink, load_media: F) -> ListenerHandle
    where
        M: MediaElement + 'static,
        F: FnMut(&TrackInfo, Bytes) -> Result<M> + Send + 'static,
    {
        let (snapshot_tx, snapshot_rx) = watch::channel(ListenerSnapshot::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let client_id = self.client_id.clone();
        let task = tokio::spawn(self.run(link, load_media, shutdown_rx, snapshot_tx));
        ListenerHandle {
            client_id,
            snapshot: snapshot_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run<M, F>(
        self,
        mut link: RoomLink,
        mut load_media: F,
        mut shutdown: oneshot::Receiver<()>,
        snapshot: watch::Sender<ListenerSnapshot>,
    ) -> Result<()>
    where
        M: MediaElement + 'static,
        F: FnMut(&TrackInfo, Bytes) -> Result<M> + Send + 'static,
    {
        let ListenerSession {
            client_id,
            room,
            config,
            clock,
            fetcher,
            cache,
        } = self;

        let mut estimator = ClockOffsetEstimator::new(client_id.clone(), config.offset_filter);
        let mut sync = PlaybackSynchronizer::<M>::new(client_id.clone(), &config);
        let (fetched_tx, mut fetched_rx) = mpsc::channel::<Fetched>(1);
        let mut generation = 0u64;
        let mut title = String::new();

        let presence = Presence {
            client_id: client_id.clone(),
        };
        link.publish(RoomEvent::Join(presence.clone())).await?;
        sync.mark_joined();
        let mut status = ListenerStatus::WaitingForAdmin;
        tracing::info!(%room, client = %client_id, "joined room as listener");

        // First tick fires immediately.
        let mut probes = time::interval(config.probe_interval());
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let rate_reset = time::sleep(Duration::ZERO);
        tokio::pin!(rate_reset);
        let mut rate_reset_armed = false;

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),

                _ = probes.tick() => {
                    let probe = estimator.probe(clock.now_ms());
                    if let Err(e) = link.publish(RoomEvent::Ping(probe)).await {
                        break Err(e);
                    }
                }

                incoming = link.recv() => {
                    let Some(event) = incoming else {
                        break Err(SyncError::ChannelClosed);
                    };
                    match event {
                        RoomEvent::Pong(reply) => {
                            estimator.observe(&reply, clock.now_ms());
                        }
                        RoomEvent::Sync(intent) => {
                            match sync.apply(&intent, clock.now_ms(), estimator.offset_ms()) {
                                SyncOutcome::FetchTrack(track) => {
                                    generation += 1;
                                    title = track.title.clone();
                                    status = ListenerStatus::Downloading { title: title.clone() };
                                    tracing::info!(title = %track.title, "downloading track");

                                    let fetcher = Arc::clone(&fetcher);
                                    let tx = fetched_tx.clone();
                                    let fetch_generation = generation;
                                    tokio::spawn(async move {
                                        let result = fetcher.fetch(&track).await;
                                        let _ = tx
                                            .send(Fetched { generation: fetch_generation, track, result })
                                            .await;
                                    });
                                }
                                SyncOutcome::Applied(r) => {
                                    if let Some(after) = r.rate_reset_after {
                                        rate_reset.as_mut().reset(Instant::now() + after);
                                        rate_reset_armed = true;
                                    }
                                    if r.playback_rejected {
                                        status = ListenerStatus::PlaybackRejected;
                                    } else if status == ListenerStatus::PlaybackRejected {
                                        status = ListenerStatus::Ready { title: title.clone() };
                                    }
                                }
                                SyncOutcome::Ignored(reason) => {
                                    tracing::trace!(?reason, kind = ?intent.kind, "intent ignored");
                                }
                            }
                        }
                        RoomEvent::Ping(_) | RoomEvent::Join(_) | RoomEvent::Leave(_) => {}
                    }
                }

                Some(fetched) = fetched_rx.recv() => {
                    if fetched.generation != generation {
                        continue;
                    }
                    let loaded = fetched
                        .result
                        .and_then(|bytes| load_media(&fetched.track, bytes));
                    match loaded {
                        Ok(media) => {
                            sync.attach_media(media);
                            status = ListenerStatus::Ready { title: fetched.track.title.clone() };
                            tracing::info!(title = %fetched.track.title, "track ready");
                            if let Some(cache) = &cache {
                                if let Err(e) = cache.store(&fetched.track).await {
                                    tracing::warn!(error = %e, "could not cache track");
                                }
                            }
                        }
                        Err(e) => {
                            sync.fetch_failed();
                            tracing::warn!(error = %e, title = %fetched.track.title, "track download failed");
                            status = ListenerStatus::FetchFailed { reason: e.to_string() };
                        }
                    }
                }

                () = &mut rate_reset, if rate_reset_armed => {
                    rate_reset_armed = false;
                    sync.reset_rate();
                }
            }

            snapshot.send_replace(capture(&status, &sync, &estimator));
        };

        // Best effort: peers may never see this.
        let _ = link.publish(RoomEvent::Leave(presence)).await;
        link.close();
        tracing::info!(%room, client = %client_id, "left room");

        let mut last = capture(&status, &sync, &estimator);
        last.status = ListenerStatus::Left;
        snapshot.send_replace(last);
        result
    }
}

fn capture<M: MediaElement>(
    status: &ListenerStatus,
    sync: &PlaybackSynchronizer<M>,
    estimator: &ClockOffsetEstimator,
) -> ListenerSnapshot {
    let media = sync.media();
    ListenerSnapshot {
        status: status.clone(),
        state: sync.state(),
        offset_ms: estimator.offset_ms(),
        offset_samples: estimator.samples(),
        average_delay_ms: estimator.average_delay_ms(),
        playing: media.map(|m| m.is_playing()).unwrap_or(false),
        position: media.map(|m| m.position()),
        rate: media.map(|m| m.playback_rate()),
    }
}

pub struct ListenerHandle {
    client_id: ClientId,
    snapshot: watch::Receiver<ListenerSnapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ListenerHandle {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn snapshot(&self) -> watch::Receiver<ListenerSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops timers, sends a best-effort `leave` and waits for the task.
    pub async fn leave(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task
            .await
            .map_err(|e| SyncError::Transport(format!("listener task failed: {e}")))?
    }
}
