#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

//! Host side of the `fmha` binary: builds random inputs for a [`RunConfig`],
//! launches the matching kernel instantiation, checks the output against the
//! f64 reference and times repeated launches.
//!
//! [`RunConfig`]: fmha_config::RunConfig

mod dispatch;
pub mod error;
pub mod report;
pub mod runner;

pub use dispatch::{SUPPORTED_HDIMS, run_config};
pub use error::CliError;
pub use report::{KernelLaunch, RunReport, Verification};
