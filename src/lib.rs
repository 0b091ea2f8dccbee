//! Live analysis assistant for five-in-a-row.
//!
//! Observed boards go to an external analysis process. The GTP
//! [`engine::Coordinator`] keeps the process's game record in step with the
//! board; [`engine::JsonAnalysisEngine`] sends the whole board as one JSON
//! request instead. Both cache converged results by board hash, and
//! [`engine::Engine`] picks one from the configuration.

pub mod core;
pub mod display;
pub mod engine;
pub mod logic;
