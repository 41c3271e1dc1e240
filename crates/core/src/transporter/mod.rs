//! Transfer abstraction: direct URL to local file.
//!
//! This module provides a `Transporter` trait for download backends (aria2)
//! and a `TransferMonitor` that samples progress and detects stalls.

mod aria2;
mod monitor;
mod types;

pub use aria2::Aria2Transporter;
pub(crate) use aria2::output_filename;
pub use monitor::{MonitorStep, TransferMonitor};
pub use types::{TransferError, TransferHandle, TransferPhase, TransferStatus, Transporter};
