//! Boundary peak caller
//!
//! Calls transcription start and end sites from 5' and 3' tag signal.

pub mod core;
pub mod filter;

pub use crate::core::{find_peaks, Peak};
pub use filter::{call_tes_peaks, call_tss_peaks, filter_background, filter_polya_peaks};
