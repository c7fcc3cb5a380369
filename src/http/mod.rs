//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the stream and API endpoints
//! - Live MP3 and WAV streams, one blocking reader per listener
//! - JSON handlers for buffers, queue, library and listeners
//! - CORS middleware

pub mod handlers;
pub mod routes;
pub mod streams;

pub use routes::create_router;
