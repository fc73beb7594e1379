//! Generation pipeline for the chirp responder: agent registry, serialized
//! streaming generation over the context store, wake-word routing, and
//! live-edit reconciliation against a rate-limited message sink.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod live_edit;
pub mod registry;
pub mod router;
pub mod surface;

pub use engine::ChatEngine;
pub use error::EngineError;
