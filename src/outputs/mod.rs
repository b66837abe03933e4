//! Output files written at the end of a run.
//!
//! # Submodules
//!
//! - [`json`]: Writes the final [`Briefing`](crate::models::Briefing) as JSON
//!
//! The text summary goes to stdout (see
//! [`RunReport::summary`](crate::orchestrator::RunReport::summary)); asset
//! files themselves are written by the providers.

pub mod json;
