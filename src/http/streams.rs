//! Live audio stream handlers
//!
//! Every listener gets its own `ChunkReader`. Readers block, so each one runs
//! on the blocking pool and hands chunks to the response body through a
//! bounded channel.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::TimeDelta;
use radio_core::{wav::encode_header, AudioError, ChunkReader};
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Result, ServerError};
use crate::state::{AppState, ListenerSession, StreamKind};
use crate::station::Tag;

/// Chunks queued per listener before its reader waits for the client
const LISTENER_QUEUE: usize = 16;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Seconds behind the live edge
    pub delay: Option<f64>,
}

impl StreamQuery {
    fn delay(&self) -> Result<TimeDelta> {
        match self.delay {
            None => Ok(TimeDelta::zero()),
            Some(secs) if secs.is_finite() && secs >= 0.0 && secs <= 86_400.0 => {
                Ok(TimeDelta::milliseconds((secs * 1000.0).round() as i64))
            }
            Some(secs) => Err(ServerError::BadRequest(format!("invalid delay {}", secs))),
        }
    }
}

/// Live MP3 stream
/// GET /stream.mp3?delay=<secs>
pub async fn mp3_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response> {
    let delay = query.delay()?;
    let reader = state.station.mp3().new_stream_with_offset(-delay)?;
    let session = state.register_session(StreamKind::Mp3, delay);

    let body = listen(state, reader, session, None);
    Ok((stream_headers("audio/mpeg"), body).into_response())
}

/// Live PCM stream with a WAV header of unknown length
/// GET /stream.wav?delay=<secs>
pub async fn wav_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response> {
    let delay = query.delay()?;
    let reader = state.station.pcm().new_stream_with_offset(-delay)?;
    let session = state.register_session(StreamKind::Wav, delay);

    let header = encode_header(&state.station.format(), None);
    let body = listen(state, reader, session, Some(Bytes::copy_from_slice(&header)));
    Ok((stream_headers("audio/wav"), body).into_response())
}

fn stream_headers(content_type: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

/// Feed `reader` into a response body until the stream ends, the client
/// goes away or the server shuts down.
fn listen(
    state: Arc<AppState>,
    mut reader: ChunkReader<Tag>,
    session: Arc<ListenerSession>,
    prelude: Option<Bytes>,
) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(LISTENER_QUEUE);

    tokio::task::spawn_blocking(move || {
        let mut connected = match prelude {
            Some(bytes) => tx.blocking_send(Ok(bytes)).is_ok(),
            None => true,
        };
        while connected && !state.is_shutdown() {
            match reader.next_chunk() {
                Ok(Some(chunk)) => {
                    let len = chunk.len();
                    connected = tx.blocking_send(Ok(chunk)).is_ok();
                    if connected {
                        session.record_sent(len);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    match &e {
                        AudioError::Desynchronized { .. } => {
                            tracing::warn!(session = %session.id, "Listener fell behind: {}", e)
                        }
                        _ => tracing::debug!(session = %session.id, "Stream ended: {}", e),
                    }
                    let _ = tx.blocking_send(Err(e.into_io()));
                    break;
                }
            }
        }
        state.remove_session(&session.id);
    });

    Body::from_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}
