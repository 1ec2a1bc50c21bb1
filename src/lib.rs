//! AI beat and lyrics pipeline.
//!
//! An uploaded track is separated into stems, each stem is reshaped by a
//! style preset's spectral transform, reduced to note events, resynthesised
//! and mixed into a new beat. Lyrics are generated independently through a
//! pluggable text backend, and both branches meet in an export bundle.
//!
//! [`pipeline::PipelineOrchestrator`] is the entry point.

pub mod audio;
pub mod config;
pub mod lyrics;
pub mod pipeline;
pub mod reconstruct;
pub mod retry;
pub mod separation;
pub mod store;
pub mod transform;
