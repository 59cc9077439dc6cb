use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use magnitude::{ChannelId, ChannelWindow, Event, ProcessingConfig, StationLocation};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub processing: ProcessingConfig,
	pub event: EventConfig,
	#[serde(default)]
	pub channels: Vec<ChannelConfig>,
	pub calibration: CalibrationConfig,
	pub input: InputConfig,
	#[serde(default)]
	pub output: OutputConfig,
	#[serde(default)]
	pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
	pub origin_time: DateTime<Utc>,
	pub latitude: f64,
	pub longitude: f64,
	pub depth_km: f64,
}

/// Request window of one channel, as produced by the travel-time stage.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
	pub id: ChannelId,
	pub latitude: f64,
	pub longitude: f64,
	pub window_start: DateTime<Utc>,
	pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
	pub table_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
	/// JSON-lines file with records and origin revisions; `-` reads stdin.
	pub records_path: String,
	#[serde(default = "default_true")]
	pub stop_when_complete: bool,
	#[serde(default = "default_channel_size")]
	pub channel_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
	pub report_path: PathBuf,
	pub dump_waveforms: bool,
	pub dump_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
	/// Glob patterns over channel ids, e.g. `GE.*..BH?`.
	pub blacklist: Vec<String>,
	pub blacklist_path: Option<PathBuf>,
}

const fn default_true() -> bool {
	true
}

const fn default_channel_size() -> usize {
	1024
}

impl Default for OutputConfig {
	fn default() -> Self {
		Self { report_path: PathBuf::from("mBc.json"), dump_waveforms: false, dump_dir: PathBuf::from("dumps") }
	}
}

impl EventConfig {
	pub fn to_event(&self) -> Event {
		Event {
			origin_time: self.origin_time,
			latitude: self.latitude,
			longitude: self.longitude,
			depth_km: self.depth_km,
		}
	}
}

impl ChannelConfig {
	pub fn window(&self) -> ChannelWindow {
		ChannelWindow::new(
			&self.window_start,
			&self.window_end,
			StationLocation { latitude: self.latitude, longitude: self.longitude },
		)
	}
}

impl Config {
	pub fn load(path: &str) -> Result<Self> {
		let content = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {path}"))?;

		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self> {
		let config: Self = toml::from_str(content).context("Failed to parse config file")?;

		config.validate()?;

		Ok(config)
	}

	fn validate(&self) -> Result<()> {
		let processing = &self.processing;

		for (name, value) in [
			("peep_avg_secs", processing.peep_avg_secs),
			("quiet_period_secs", processing.quiet_period_secs),
			("rms_threshold_factor", processing.rms_threshold_factor),
		] {
			if !(value.is_finite() && value > 0.0) {
				anyhow::bail!("processing.{name} must be positive, got {value}");
			}
		}

		for (name, value) in [
			("margin_begin_secs", processing.margin_begin_secs),
			("filter_transient_secs", processing.filter_transient_secs),
			("max_gap_secs", processing.max_gap_secs),
		] {
			if !(value.is_finite() && value >= 0.0) {
				anyhow::bail!("processing.{name} must not be negative, got {value}");
			}
		}

		if processing.update_interval_secs == 0 {
			anyhow::bail!("processing.update_interval_secs must be at least 1");
		}

		let filter = &processing.filter;
		if filter.order == 0 {
			anyhow::bail!("processing.filter.order must be at least 1");
		}
		if !(filter.low_hz > 0.0 && filter.low_hz < filter.high_hz) {
			anyhow::bail!("processing.filter needs 0 < low_hz < high_hz, got {} and {}", filter.low_hz, filter.high_hz);
		}

		if !self.event.depth_km.is_finite() {
			anyhow::bail!("event.depth_km must be finite, got {}", self.event.depth_km);
		}

		for channel in &self.channels {
			if channel.id.parts().is_none() {
				anyhow::bail!("Channel id {} is not of the form NET.STA.LOC.CHA", channel.id);
			}
			if channel.window_start >= channel.window_end {
				anyhow::bail!("Channel {} has an empty time window", channel.id);
			}
		}

		if self.input.channel_size == 0 {
			anyhow::bail!("input.channel_size must be at least 1");
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const CONFIG: &str = r#"
		[processing]
		quiet_period_secs = 45.0

		[processing.filter]
		order = 2

		[event]
		origin_time = "2024-01-01T00:00:00Z"
		latitude = 10.0
		longitude = 20.0
		depth_km = 33.0

		[[channels]]
		id = "GE.APE..BHZ"
		latitude = 37.07
		longitude = 25.53
		window_start = "2024-01-01T00:05:00Z"
		window_end = "2024-01-01T00:20:00Z"

		[calibration]
		table_path = "calibration.toml"

		[input]
		records_path = "-"

		[control]
		blacklist = ["GE.*"]
	"#;

	#[test]
	fn parses_with_defaults() {
		let config = Config::parse(CONFIG).unwrap();

		assert!((config.processing.quiet_period_secs - 45.0).abs() < f64::EPSILON);
		assert!((config.processing.peep_avg_secs - 20.0).abs() < f64::EPSILON);
		assert_eq!(config.processing.filter.order, 2);
		assert!((config.processing.filter.high_hz - 3.0).abs() < f64::EPSILON);
		assert!(config.input.stop_when_complete);
		assert_eq!(config.output.report_path, PathBuf::from("mBc.json"));
		assert_eq!(config.control.blacklist, vec!["GE.*".to_string()]);

		let window = config.channels[0].window();
		assert!((window.end - window.start - 900.0).abs() < 1e-6);
		assert!((config.event.to_event().depth_km - 33.0).abs() < f64::EPSILON);
	}

	#[test]
	fn rejects_inverted_band() {
		let content = CONFIG.replace("order = 2", "order = 2\nlow_hz = 4.0");
		let err = Config::parse(&content).unwrap_err();
		assert!(err.to_string().contains("low_hz"));
	}

	#[test]
	fn rejects_empty_window() {
		let content = CONFIG.replace("2024-01-01T00:20:00Z", "2024-01-01T00:05:00Z");
		assert!(Config::parse(&content).is_err());
	}

	#[test]
	fn rejects_malformed_channel_id() {
		let content = CONFIG.replace("GE.APE..BHZ", "APE");
		assert!(Config::parse(&content).is_err());
	}

	#[test]
	fn example_config_is_valid() {
		let config = Config::parse(include_str!("../../../config.example.toml")).unwrap();
		assert_eq!(config.channels.len(), 1);
		assert!(config.control.blacklist_path.is_none());
	}

	#[test]
	fn depth_outside_calibration_is_accepted() {
		let content = CONFIG.replace("depth_km = 33.0", "depth_km = -1.5");
		let config = Config::parse(&content).unwrap();
		assert!((config.event.depth_km + 1.5).abs() < f64::EPSILON);
	}

	#[test]
	fn missing_file_is_reported() {
		let err = Config::load("/nonexistent/config.toml").unwrap_err();
		assert!(err.to_string().contains("Failed to read config file"));
	}
}
