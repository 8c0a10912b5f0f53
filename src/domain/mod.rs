//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - run configuration (`RunConfig`, `FitterCommand`, `FigureConfig`)
//! - column name constants for the observation table
//! - small vocabularies (`Sex`, `Stratum`, `PhaseEncoding`, `Separator`)

pub mod types;

pub use types::*;
