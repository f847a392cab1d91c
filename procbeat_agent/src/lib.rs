//! procbeat agent library: `/proc` sampling, batching and report delivery.

pub mod batch;
pub mod config;
pub mod error;
pub mod process;
pub mod procfs;
pub mod report;
pub mod sample;
pub mod scheduler;
pub mod sink;
pub mod stats;
