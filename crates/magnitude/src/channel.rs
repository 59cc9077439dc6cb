use serde::Serialize;
use std::fmt;

use crate::accumulator::Accumulator;
use crate::config::ProcessingConfig;
use crate::error::{MagnitudeError, Result};
use crate::filter::BandFilter;
use crate::peak::{Peak, PeakTracker};
use crate::types::{ChannelId, ChannelWindow, Record, Seconds, StationLocation};

/// Per-channel progress. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
	/// Waiting for the P arrival or still inside the event.
	Searching = 1,
	/// Arrival seen, counting down the quiet period.
	Quiet = 2,
	/// Quiet period expired, duration is settled.
	Done = 3,
}

/// Why a channel stopped being processed for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Exclusion {
	OutOfOrder { end: Seconds, previous_end: Seconds },
	Gap { previous_end: Seconds, start: Seconds },
}

impl fmt::Display for Exclusion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::OutOfOrder { end, previous_end } => {
				write!(f, "record out of order (ends at {end:.3}, previous ended at {previous_end:.3})")
			},
			Self::Gap { previous_end, start } => {
				write!(f, "gap of {:.3}s between records ({previous_end:.3} till {start:.3})", start - previous_end)
			},
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
	Continue,
	Completed,
}

/// Processed samples kept for debug dumps, as `(relative time, value)`.
#[derive(Debug, Clone, Default)]
pub struct Trace {
	pub raw: Vec<(Seconds, f64)>,
	pub filtered: Vec<(Seconds, f64)>,
}

pub struct ChannelState {
	id: ChannelId,
	stage: Stage,
	raw: PeakTracker,
	filtered: PeakTracker,
	sampling_rate: f64,
	sample_offset: u64,
	/// Absolute start of the first accepted record. Relative times count from here.
	start_time: Seconds,
	last_end: Seconds,
	mean: Accumulator,
	rms: Accumulator,
	theoretical_p: Seconds,
	p_arrival: Option<Seconds>,
	raw_peaks: Vec<Peak>,
	filtered_peaks: Vec<Peak>,
	duration: Option<Seconds>,
	last_filtered_peak_time: Seconds,
	location: StationLocation,
	exclusion: Option<Exclusion>,
	filter: Box<dyn BandFilter>,
	trace: Option<Trace>,
}

impl fmt::Debug for ChannelState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChannelState")
			.field("id", &self.id)
			.field("stage", &self.stage)
			.field("sample_offset", &self.sample_offset)
			.field("p_arrival", &self.p_arrival)
			.field("duration", &self.duration)
			.field("raw_peaks", &self.raw_peaks.len())
			.field("filtered_peaks", &self.filtered_peaks.len())
			.field("exclusion", &self.exclusion)
			.finish_non_exhaustive()
	}
}

impl ChannelState {
	pub fn new(
		record: &Record,
		window: &ChannelWindow,
		config: &ProcessingConfig,
		filter: Box<dyn BandFilter>,
		capture_trace: bool,
	) -> Self {
		let start_time = record.start_seconds();

		Self {
			id: record.channel.clone(),
			stage: Stage::Searching,
			raw: PeakTracker::new(),
			filtered: PeakTracker::new(),
			sampling_rate: record.sampling_rate,
			sample_offset: 0,
			start_time,
			last_end: record.end_seconds(),
			mean: Accumulator::default(),
			rms: Accumulator::default(),
			theoretical_p: window.start + config.p_offset() - start_time,
			p_arrival: None,
			raw_peaks: Vec::new(),
			filtered_peaks: Vec::new(),
			duration: None,
			last_filtered_peak_time: 0.0,
			location: window.location,
			exclusion: None,
			filter,
			trace: capture_trace.then(Trace::default),
		}
	}

	pub const fn id(&self) -> &ChannelId {
		&self.id
	}

	pub const fn stage(&self) -> Stage {
		self.stage
	}

	pub const fn sample_offset(&self) -> u64 {
		self.sample_offset
	}

	pub const fn sampling_rate(&self) -> f64 {
		self.sampling_rate
	}

	pub const fn start_time(&self) -> Seconds {
		self.start_time
	}

	pub const fn last_end(&self) -> Seconds {
		self.last_end
	}

	/// Theoretical P arrival relative to the first sample.
	pub const fn theoretical_p(&self) -> Seconds {
		self.theoretical_p
	}

	/// Observed P arrival (first admitted band-limited peak) relative to the first sample.
	pub const fn p_arrival(&self) -> Option<Seconds> {
		self.p_arrival
	}

	/// Observed arrival when available, theoretical otherwise.
	pub fn arrival(&self) -> Seconds {
		self.p_arrival.unwrap_or(self.theoretical_p)
	}

	pub fn raw_peaks(&self) -> &[Peak] {
		&self.raw_peaks
	}

	pub fn filtered_peaks(&self) -> &[Peak] {
		&self.filtered_peaks
	}

	pub const fn raw_global(&self) -> Peak {
		self.raw.global()
	}

	pub const fn filtered_global(&self) -> Peak {
		self.filtered.global()
	}

	pub const fn duration(&self) -> Option<Seconds> {
		self.duration
	}

	pub const fn noise_floor(&self) -> Option<f64> {
		self.rms.value()
	}

	pub const fn mean_offset(&self) -> Option<f64> {
		self.mean.value()
	}

	pub const fn location(&self) -> StationLocation {
		self.location
	}

	pub const fn exclusion(&self) -> Option<Exclusion> {
		self.exclusion
	}

	pub const fn is_excluded(&self) -> bool {
		self.exclusion.is_some()
	}

	pub const fn trace(&self) -> Option<&Trace> {
		self.trace.as_ref()
	}

	/// Delay of the raw global extremum after the theoretical arrival, if it lies after it.
	pub fn peak_delay(&self) -> Option<Seconds> {
		let delay = self.raw.global().time - self.theoretical_p;
		(delay > 0.0).then_some(delay)
	}

	pub(crate) fn revise_window(&mut self, window: &ChannelWindow, config: &ProcessingConfig) {
		self.theoretical_p = window.start + config.p_offset() - self.start_time;
		self.location = window.location;
	}

	pub(crate) fn exclude(&mut self, exclusion: Exclusion) {
		self.exclusion = Some(exclusion);
	}

	/// Checks that a record continues the stream and moves the stream end forward.
	pub(crate) fn advance(&mut self, start: Seconds, end: Seconds, max_gap: Seconds) -> std::result::Result<(), Exclusion> {
		if end < self.last_end {
			return Err(Exclusion::OutOfOrder { end, previous_end: self.last_end });
		}

		if start > self.last_end + max_gap {
			return Err(Exclusion::Gap { previous_end: self.last_end, start });
		}

		self.last_end = end;
		Ok(())
	}

	/// Runs one accepted record through both trackers and the arrival/duration state machine.
	pub fn process(&mut self, record: &Record, config: &ProcessingConfig) -> Result<Progress> {
		let gain = record.effective_gain();
		let sps = self.sampling_rate;

		self.accumulate_mean(record, gain, config.peep_avg_secs);
		let mean = self.mean.value_or_zero();

		for (pos, &sample) in record.samples.iter().enumerate() {
			let position = self.sample_offset + pos as u64;
			let relative_time = position as f64 / sps;

			let normalized = sample / gain;
			let centered = normalized - mean;
			// the filter sees the uncentered signal so that freezing the mean causes no step
			let band_limited = self.filter.apply(normalized);

			if let Some(trace) = &mut self.trace
				&& relative_time > config.peep_avg_secs
			{
				trace.raw.push((relative_time, centered));
			}

			if relative_time < config.peep_avg_secs {
				if relative_time > config.filter_transient_secs {
					self.rms.add(band_limited * band_limited);
				} else {
					self.rms.reset();
				}
				continue;
			}
			let noise_floor = self.rms.finalize_rms();

			let raw_peak = self.raw.check(centered, position, sps, 0.0);
			let filtered_peak = if relative_time < self.theoretical_p {
				None
			} else {
				self.filtered.check(band_limited, position, sps, config.rms_threshold_factor * noise_floor)
			};

			if let Some(peak) = raw_peak
				&& self.p_arrival.is_some()
			{
				self.raw_peaks.push(peak);
			}

			if let Some(peak) = filtered_peak {
				self.record_filtered_peak(peak);
			} else if self.p_arrival.is_some() {
				self.stage = self.stage.max(Stage::Quiet);

				if relative_time - self.last_filtered_peak_time >= config.quiet_period_secs {
					self.complete(relative_time)?;
					self.sample_offset = position + 1;
					return Ok(Progress::Completed);
				}
			}

			if let Some(trace) = &mut self.trace {
				trace.filtered.push((relative_time, band_limited));
			}
		}

		self.sample_offset += record.samples.len() as u64;
		Ok(Progress::Continue)
	}

	/// Mean offset over the first `peep_avg` seconds, frozen once the window is covered.
	fn accumulate_mean(&mut self, record: &Record, gain: f64, peep_avg: Seconds) {
		if self.mean.is_finalized() {
			return;
		}

		let limit_pos = (self.start_time + peep_avg - record.start_seconds()) * record.sampling_rate;
		for (pos, &sample) in record.samples.iter().enumerate() {
			self.mean.add(sample / gain);
			if pos as f64 > limit_pos {
				self.mean.finalize_mean();
				break;
			}
		}
	}

	fn record_filtered_peak(&mut self, peak: Peak) {
		let first = *self.filtered_peaks.first().unwrap_or(&peak);

		self.p_arrival.get_or_insert(peak.time);
		self.filtered_peaks.push(peak);
		self.last_filtered_peak_time = peak.time;
		// a new peak restarts the quiet period; the stage itself never moves back
		self.duration = Some(peak.time - first.time);
	}

	fn complete(&mut self, relative_time: Seconds) -> Result<()> {
		let (Some(first), Some(last)) = (self.filtered_peaks.first(), self.filtered_peaks.last()) else {
			return Err(MagnitudeError::NoFilteredPeak { channel: self.id.clone(), relative_time });
		};

		self.duration = Some(last.time - first.time);
		self.stage = Stage::Done;
		Ok(())
	}

	/// Keeps only the raw peaks strictly before `limit`.
	pub(crate) fn prune_raw_peaks(&mut self, limit: Seconds) {
		self.raw_peaks.retain(|peak| peak.is_before(limit));
	}
}
