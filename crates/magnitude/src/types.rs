use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds, either since the Unix epoch or relative to a channel's first sample.
pub type Seconds = f64;

/// Stream identifier in `NET.STA.LOC.CHA` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Splits the identifier into network, station, location and channel codes.
	pub fn parts(&self) -> Option<(&str, &str, &str, &str)> {
		let mut parts = self.0.split('.');
		let network = parts.next()?;
		let station = parts.next()?;
		let location = parts.next()?;
		let channel = parts.next()?;

		if parts.next().is_some() {
			return None;
		}

		Some((network, station, location, channel))
	}

	/// Identifier without dots, used for dump file names (`GEAPEBHZ` for `GE.APE..BHZ`).
	pub fn compact(&self) -> String {
		self.0.replace('.', "")
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ChannelId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// A batch of consecutive samples for one channel.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
	pub channel: ChannelId,
	pub start_time: DateTime<Utc>,
	pub end_time: DateTime<Utc>,
	pub sampling_rate: f64,
	pub gain: f64,
	pub samples: Vec<f64>,
}

impl Record {
	pub fn start_seconds(&self) -> Seconds {
		to_epoch_seconds(&self.start_time)
	}

	pub fn end_seconds(&self) -> Seconds {
		to_epoch_seconds(&self.end_time)
	}

	/// Gain used to normalize samples; a zero gain is treated as unity.
	pub fn effective_gain(&self) -> f64 {
		if self.gain == 0.0 { 1.0 } else { self.gain }
	}
}

/// The active hypocenter estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub origin_time: DateTime<Utc>,
	pub latitude: f64,
	pub longitude: f64,
	pub depth_km: f64,
}

impl Event {
	pub fn origin_seconds(&self) -> Seconds {
		to_epoch_seconds(&self.origin_time)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationLocation {
	pub latitude: f64,
	pub longitude: f64,
}

/// Request window for one channel as produced by the travel-time stage.
///
/// `start` already includes the pre-arrival margin and the mean estimation window, so the
/// theoretical P arrival lies at `start + margin_begin + peep_avg`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWindow {
	pub start: Seconds,
	pub end: Seconds,
	pub location: StationLocation,
}

impl ChannelWindow {
	pub fn new(start: &DateTime<Utc>, end: &DateTime<Utc>, location: StationLocation) -> Self {
		Self { start: to_epoch_seconds(start), end: to_epoch_seconds(end), location }
	}

	/// True when `[start, end]` overlaps the window.
	pub fn overlaps(&self, start: Seconds, end: Seconds) -> bool {
		!(start > self.end || end < self.start)
	}
}

pub fn to_epoch_seconds(time: &DateTime<Utc>) -> Seconds {
	time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) * 1e-9
}
