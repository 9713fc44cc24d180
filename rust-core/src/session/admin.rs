use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::media::MediaElement;
use crate::messages::{ControlCommand, RoomEvent};
use crate::publisher::PlaybackPublisher;
use crate::room::{RoomCode, RoomLink};
use crate::track::TrackInfo;

const COMMAND_QUEUE: usize = 16;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdminSnapshot {
    pub listeners: usize,
    pub playing: bool,
    pub position: f64,
    /// Latest non-fatal problem, e.g. local playback refused.
    pub notice: Option<String>,
}

/// The admin's side of a room: owns the track, the local media and the
/// listener registry.
pub struct AdminSession<M> {
    room: RoomCode,
    config: SyncConfig,
    clock: SharedClock,
    publisher: PlaybackPublisher,
    media: M,
}

impl<M: MediaElement + 'static> AdminSession<M> {
    pub fn new(room: RoomCode, track: TrackInfo, media: M, clock: SharedClock, config: SyncConfig) -> Self {
        let publisher = PlaybackPublisher::new(track).with_idle_timeout(config.registry_idle_timeout());
        Self {
            room,
            config,
            clock,
            publisher,
            media,
        }
    }

    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    pub fn spawn(self, link: RoomLink) -> AdminHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(AdminSnapshot::default());
        let room = self.room.clone();
        let listeners = self.publisher.subscribe_listener_count();
        let task = tokio::spawn(self.run(link, commands_rx, shutdown_rx, snapshot_tx));
        AdminHandle {
            room,
            commands: commands_tx,
            listeners,
            snapshot: snapshot_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    fn handle_control(&mut self, cmd: ControlCommand) -> Result<RoomEvent> {
        let now = self.clock.now_ms();
        match cmd {
            ControlCommand::Play => self.publisher.play(&mut self.media, now),
            ControlCommand::Pause => Ok(self.publisher.pause(&mut self.media, now)),
            ControlCommand::Seek { delta_secs } => Ok(self.publisher.seek(&mut self.media, delta_secs, now)),
            ControlCommand::Reload => Ok(self.publisher.reload(&self.media, now)),
        }
    }

    /// Events to publish in response to one room event.
    fn handle_event(&mut self, event: RoomEvent) -> Vec<RoomEvent> {
        let now = self.clock.now_ms();
        match event {
            RoomEvent::Ping(probe) => self.publisher.on_probe(&probe, &self.media, now),
            RoomEvent::Join(presence) => self.publisher.on_join(&presence, &self.media, now).into_iter().collect(),
            RoomEvent::Leave(presence) => {
                self.publisher.on_leave(&presence);
                Vec::new()
            }
            // Our own broadcasts when self-delivery is on.
            RoomEvent::Pong(_) | RoomEvent::Sync(_) => Vec::new(),
        }
    }

    async fn run(
        mut self,
        mut link: RoomLink,
        mut commands: mpsc::Receiver<ControlCommand>,
        mut shutdown: oneshot::Receiver<()>,
        snapshot: watch::Sender<AdminSnapshot>,
    ) -> Result<()> {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut notice: Option<String> = None;

        tracing::info!(room = %self.room, title = %self.publisher.track().title, "hosting room");

        let result = loop {
            let outgoing = tokio::select! {
                _ = &mut shutdown => break Ok(()),

                _ = heartbeat.tick() => {
                    let (event, evicted) = self.publisher.heartbeat(&self.media, self.clock.now_ms());
                    for client in evicted {
                        tracing::info!(%client, "evicted idle listener");
                    }
                    vec![event]
                }

                cmd = commands.recv() => match cmd {
                    Some(cmd) => match self.handle_control(cmd) {
                        Ok(event) => {
                            notice = None;
                            vec![event]
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, ?cmd, "control action failed");
                            notice = Some(e.to_string());
                            Vec::new()
                        }
                    },
                    None => break Ok(()),
                },

                incoming = link.recv() => match incoming {
                    Some(event) => self.handle_event(event),
                    None => break Err(SyncError::ChannelClosed),
                },
            };

            let mut failed = None;
            for event in outgoing {
                if let Err(e) = link.publish(event).await {
                    failed = Some(e);
                    break;
                }
            }
            if let Some(e) = failed {
                break Err(e);
            }

            snapshot.send_replace(AdminSnapshot {
                listeners: self.publisher.listener_count(),
                playing: self.media.is_playing(),
                position: self.media.position(),
                notice: notice.clone(),
            });
        };

        link.close();
        tracing::info!(room = %self.room, "room closed");
        result
    }
}

pub struct AdminHandle {
    room: RoomCode,
    commands: mpsc::Sender<ControlCommand>,
    listeners: watch::Receiver<usize>,
    snapshot: watch::Receiver<AdminSnapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl AdminHandle {
    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    pub async fn send(&self, cmd: ControlCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Observable listener count.
    pub fn listeners(&self) -> watch::Receiver<usize> {
        self.listeners.clone()
    }

    pub fn snapshot(&self) -> watch::Receiver<AdminSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn close(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task
            .await
            .map_err(|e| SyncError::Transport(format!("admin task failed: {e}")))?
    }
}
