//! Instruction routing, structured generation and threat-model rendering.
//!
//! A request names a task category and an instruction. The router picks a
//! generation track, the generation service answers with a typed result, and
//! threat-model results are compiled and rendered into artifacts inside an
//! isolated per-run workspace.

pub mod cli;
pub mod diagram;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod model;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod storage;
pub mod workspace;

mod orchestrator;
mod text_summary;
