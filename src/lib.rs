//! `gamlss-centiles` library crate.
//!
//! The binary (`gamlss`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable with a stand-in fitter instead of R
//! - partitioning, aggregation and plotting can be reused on their own

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod partition;
pub mod plot;
pub mod report;
pub mod volume;
