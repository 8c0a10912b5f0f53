//! Fitting orchestration.
//!
//! Responsibilities:
//!
//! - turn partitions into external fitter jobs (`jobs`)
//! - run them on a bounded worker pool and collect their outcomes (`dispatcher`)

pub mod dispatcher;
pub mod jobs;

pub use dispatcher::*;
pub use jobs::*;
