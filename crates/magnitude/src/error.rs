use std::path::PathBuf;

use crate::types::ChannelId;

pub type Result<T> = std::result::Result<T, MagnitudeError>;

#[derive(Debug, thiserror::Error)]
pub enum MagnitudeError {
	/// The quiet period expired on a channel that never recorded a band-limited peak.
	#[error("quiet period expired on {channel} without any band-limited peak (t = {relative_time:.2}s)")]
	NoFilteredPeak { channel: ChannelId, relative_time: f64 },

	#[error("invalid record for {channel}: {reason}")]
	InvalidRecord { channel: ChannelId, reason: String },

	#[error("failed to read calibration table {path}: {source}")]
	CalibrationIo { path: PathBuf, source: std::io::Error },

	#[error("failed to parse calibration table: {0}")]
	CalibrationParse(#[from] toml::de::Error),

	#[error("invalid calibration table: {0}")]
	CalibrationTable(String),
}
