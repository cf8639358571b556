//! callsync: incremental sync of ElevenLabs conversational-AI calls into SQLite.
//!
//! The poll loop (`poller`) runs a cheap change check against the remote
//! source and only then hands off to the synchronizer (`sync`), which fetches,
//! normalizes (`normalize`) and upserts each call as its own unit of work.

pub mod config;
pub mod db;
pub mod elevenlabs;
pub mod error;
mod migrations;
pub mod normalize;
pub mod poller;
pub mod source;
pub mod sync;
pub mod types;
