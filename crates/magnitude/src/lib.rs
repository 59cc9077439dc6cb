//! Broadband body-wave magnitude (mBc) from streaming vertical-component records.
//!
//! Records are fed per channel into an [`Engine`], which detects the P arrival and the end of
//! the event on every channel, agrees on a network-wide duration and averages the per-channel
//! cumulative magnitudes into a trimmed network value.

mod accumulator;
pub mod aggregate;
pub mod calibration;
pub mod channel;
pub mod config;
pub mod consensus;
mod engine;
mod error;
pub mod filter;
pub mod geo;
pub mod peak;
pub mod registry;
pub mod types;

pub use aggregate::{AggregateResult, ChannelEvaluation, ChannelMagnitude, MagnitudeAggregator};
pub use calibration::{CalibrationTable, DistanceCorrection};
pub use channel::{ChannelState, Exclusion, Stage, Trace};
pub use config::ProcessingConfig;
pub use consensus::DurationConsensus;
pub use engine::{Engine, FeedOutcome, REVISION_DEPTH_KM, REVISION_DISTANCE_DEG, UpdateReport};
pub use error::{MagnitudeError, Result};
pub use filter::{BandFilter, BandpassSpec, FilterFactory};
pub use peak::{Peak, PeakTracker};
pub use registry::{ChannelRegistry, Rejection};
pub use types::{ChannelId, ChannelWindow, Event, Record, Seconds, StationLocation};
