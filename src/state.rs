//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - The live station (scheduler, PCM and MP3 buffers)
//! - Connected listener sessions
//! - Server configuration

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::station::Station;

/// Which live stream a listener is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Mp3,
    Wav,
}

/// One connected listener
#[derive(Debug, Serialize)]
pub struct ListenerSession {
    pub id: Uuid,
    pub kind: StreamKind,
    pub connected_at: DateTime<Utc>,
    /// How far behind the live edge this listener asked to be, in milliseconds
    pub delay_ms: i64,
    #[serde(serialize_with = "serialize_counter")]
    pub bytes_sent: AtomicU64,
}

fn serialize_counter<S: serde::Serializer>(value: &AtomicU64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(value.load(Ordering::Relaxed))
}

impl ListenerSession {
    pub fn new(kind: StreamKind, delay: TimeDelta) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            connected_at: Utc::now(),
            delay_ms: delay.num_milliseconds(),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Main application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    pub station: Station,

    /// Connected listeners by session id
    pub sessions: DashMap<Uuid, Arc<ListenerSession>>,
}

impl AppState {
    pub fn new(config: ServerConfig, station: Station) -> Self {
        Self {
            config,
            station,
            sessions: DashMap::new(),
        }
    }

    pub fn register_session(&self, kind: StreamKind, delay: TimeDelta) -> Arc<ListenerSession> {
        let session = Arc::new(ListenerSession::new(kind, delay));
        self.sessions.insert(session.id, session.clone());
        tracing::info!(session = %session.id, ?kind, "Listener connected");
        session
    }

    pub fn remove_session(&self, id: &Uuid) {
        if let Some((_, session)) = self.sessions.remove(id) {
            tracing::info!(
                session = %id,
                bytes = session.bytes_sent.load(Ordering::Relaxed),
                "Listener disconnected"
            );
        }
    }

    /// Signal shutdown: listeners are let go and the scheduler stops after
    /// the current performance.
    pub fn shutdown(&self) {
        self.station.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.station.is_shut_down()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::station::Tag;
    use radio_core::{
        ChunkStore, DirectoryLibrary, ManualClock, Scheduler, SchedulerConfig, ToolsConfig, CD,
    };

    /// State over a library in `dir` whose buffers are filled by hand
    pub(crate) fn test_state(dir: &std::path::Path, clock: Arc<ManualClock>) -> Arc<AppState> {
        let library = DirectoryLibrary::new(dir, ToolsConfig::default()).unwrap();
        let scheduler = Arc::new(Scheduler::with_seed(
            Arc::new(library),
            SchedulerConfig::default(),
            1,
        ));
        let pcm: Arc<ChunkStore<Tag>> = Arc::new(ChunkStore::new(64, clock.clone()));
        let mp3: Arc<ChunkStore<Tag>> = Arc::new(ChunkStore::new(64, clock));
        let station = Station::from_parts(
            scheduler,
            pcm,
            mp3,
            CD,
            radio_core::CancellationToken::new(),
        );
        Arc::new(AppState::new(ServerConfig::default(), station))
    }

    #[test]
    fn test_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(ManualClock::new(Utc::now())));
        assert!(state.sessions.is_empty());

        let session = state.register_session(StreamKind::Mp3, TimeDelta::seconds(5));
        session.record_sent(100);
        session.record_sent(20);
        assert_eq!(state.sessions.len(), 1);

        let json = serde_json::to_value(&*session).unwrap();
        assert_eq!(json["kind"], "mp3");
        assert_eq!(json["delay_ms"], 5000);
        assert_eq!(json["bytes_sent"], 120);

        state.remove_session(&session.id);
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(ManualClock::new(Utc::now())));
        assert!(!state.is_shutdown());
        state.shutdown();
        assert!(state.is_shutdown());
    }
}
