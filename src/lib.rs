//! Layerdeck - Multi-layer Audio Timeline Engine
//!
//! Layerdeck arranges decoded audio clips on a shared timeline and plays
//! them back sample-accurately, or renders them offline to WAV:
//! 1. Live playback - voices scheduled ahead of time on an output device
//! 2. Offline export - a deterministic mixdown of the same timeline
//!
//! # Architecture
//!
//! - `layers`: clip model, loop phase, fade envelopes, timeline length
//! - `engine`: device abstraction, transport, scheduler, session facade
//! - `export`: mixdown and WAV encoding
//! - `state`: project documents and persistence ports

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod layers;
pub mod state;

pub use error::{LayerdeckError, Result};
