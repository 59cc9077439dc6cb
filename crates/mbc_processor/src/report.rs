use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use magnitude::{AggregateResult, ChannelMagnitude, ChannelState, Engine, Event, Peak};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const DUMP_PREFIX: &str = "mBc-";
const DUMP_SUFFIXES: [&str; 5] = [".dat", "-f.dat", "-p.dat", "-p2.dat", "-m.dat"];

#[derive(Debug, Serialize)]
pub struct Report<'a> {
	pub generated_at: DateTime<Utc>,
	pub event: &'a Event,
	/// Latest record end relative to the origin time.
	pub elapsed_secs: Option<f64>,
	#[serde(rename = "final")]
	pub is_final: bool,
	pub network_magnitude: Option<f64>,
	pub duration_secs: f64,
	pub candidates: usize,
	pub channels: &'a [ChannelMagnitude],
}

impl<'a> Report<'a> {
	pub fn new(engine: &'a Engine, result: &'a AggregateResult, is_final: bool) -> Self {
		Self {
			generated_at: Utc::now(),
			event: engine.event(),
			elapsed_secs: engine.elapsed(),
			is_final,
			network_magnitude: result.network_magnitude,
			duration_secs: result.duration,
			candidates: result.candidates,
			channels: &result.entries,
		}
	}

	pub fn write(&self, path: &Path) -> Result<()> {
		let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
		fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;

		debug!(path = %path.display(), final_report = self.is_final, "Report written");
		Ok(())
	}
}

fn pairs(values: impl IntoIterator<Item = (f64, f64)>) -> String {
	values.into_iter().fold(String::new(), |mut out, (time, value)| {
		let _ = writeln!(out, "{time} {value}");
		out
	})
}

fn peaks(values: &[Peak]) -> String {
	pairs(values.iter().map(|peak| (peak.time, peak.value)))
}

fn remove_stale_dumps(dir: &Path) -> Result<usize> {
	let pattern = dir.join(format!("{DUMP_PREFIX}*.dat"));
	let pattern = pattern.to_str().context("Dump directory is not valid UTF-8")?;

	let mut removed = 0;
	for path in glob::glob(pattern).context("Invalid dump directory pattern")?.flatten() {
		if fs::remove_file(&path).is_ok() {
			removed += 1;
		}
	}
	Ok(removed)
}

/// Writes the debug files of every active channel, replacing earlier dumps.
pub fn dump_channels(engine: &Engine, dir: &Path) -> Result<()> {
	fs::create_dir_all(dir).with_context(|| format!("Failed to create dump directory: {}", dir.display()))?;
	let removed = remove_stale_dumps(dir)?;
	debug!(removed, "Removed stale dumps");

	let mut written = 0;
	for channel in engine.channels().filter(|channel| !channel.is_excluded()) {
		dump_channel(engine, channel, dir)?;
		written += 1;
	}

	info!(channels = written, dir = %dir.display(), "Debug dumps written");
	Ok(())
}

fn dump_channel(engine: &Engine, channel: &ChannelState, dir: &Path) -> Result<()> {
	let name = format!("{DUMP_PREFIX}{}", channel.id().compact());
	let magnitude = engine
		.evaluation(channel.id())
		.and_then(|evaluation| evaluation.magnitude)
		.map_or_else(|| "nan".to_string(), |m| m.to_string());

	let (raw, filtered) = channel.trace().map_or_else(
		|| (String::new(), String::new()),
		|trace| (pairs(trace.raw.iter().copied()), pairs(trace.filtered.iter().copied())),
	);

	let contents = [raw, filtered, peaks(channel.raw_peaks()), peaks(channel.filtered_peaks()), magnitude];
	for (suffix, content) in DUMP_SUFFIXES.iter().zip(contents) {
		let path = dir.join(format!("{name}{suffix}"));
		fs::write(&path, content).with_context(|| format!("Failed to write dump: {}", path.display()))?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use magnitude::ChannelId;

	#[test]
	fn pairs_are_one_per_line() {
		assert_eq!(pairs([(0.5, 1.0), (1.0, -2.5)]), "0.5 1\n1 -2.5\n");
		assert_eq!(peaks(&[Peak::new(2.0, 3.0)]), "2 3\n");
	}

	#[test]
	fn report_serializes_final_flag_and_null_magnitude() {
		let event = Event {
			origin_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
			latitude: 1.0,
			longitude: 2.0,
			depth_km: 10.0,
		};
		let entries = vec![ChannelMagnitude { magnitude: 6.1, duration: 42.0, channel: ChannelId::from("GE.APE..BHZ") }];
		let report = Report {
			generated_at: Utc::now(),
			event: &event,
			elapsed_secs: Some(300.0),
			is_final: true,
			network_magnitude: None,
			duration_secs: 42.0,
			candidates: 1,
			channels: &entries,
		};

		let json: serde_json::Value = serde_json::to_value(&report).unwrap();
		assert_eq!(json["final"], true);
		assert!(json["network_magnitude"].is_null());
		assert_eq!(json["channels"][0]["channel"], "GE.APE..BHZ");
		assert_eq!(json["event"]["depth_km"], 10.0);
	}

	#[test]
	fn dumps_one_file_set_per_channel() {
		use magnitude::{ChannelWindow, ProcessingConfig, Record, StationLocation};

		let origin = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
		let event = Event { origin_time: origin, latitude: 0.0, longitude: 0.0, depth_km: 10.0 };
		let mut engine =
			Engine::new(ProcessingConfig::default(), event, |_: f64, _: f64| Some(0.0)).with_trace_capture(true);

		let id = ChannelId::from("GE.APE..BHZ");
		let location = StationLocation { latitude: 0.0, longitude: 30.0 };
		let window = ChannelWindow::new(&origin, &(origin + chrono::Duration::seconds(600)), location);
		engine.register_channel(id.clone(), window);

		let record = Record {
			channel: id,
			start_time: origin,
			end_time: origin + chrono::Duration::milliseconds(29_900),
			sampling_rate: 10.0,
			gain: 1.0,
			samples: vec![0.0; 300],
		};
		engine.feed(&record).unwrap();
		engine.update();

		let dir = std::env::temp_dir().join(format!("mbc-dumps-{}", std::process::id()));
		fs::create_dir_all(&dir).unwrap();
		fs::write(dir.join("mBc-XXGONEBHZ.dat"), "old").unwrap();
		fs::write(dir.join("notes.dat"), "keep").unwrap();

		dump_channels(&engine, &dir).unwrap();

		assert!(!dir.join("mBc-XXGONEBHZ.dat").exists());
		assert_eq!(fs::read_to_string(dir.join("notes.dat")).unwrap(), "keep");
		for suffix in DUMP_SUFFIXES {
			assert!(dir.join(format!("mBc-GEAPEBHZ{suffix}")).exists(), "missing {suffix}");
		}
		let raw = fs::read_to_string(dir.join("mBc-GEAPEBHZ.dat")).unwrap();
		assert_eq!(raw.lines().count(), 99);

		fs::remove_dir_all(&dir).unwrap();
	}
}
