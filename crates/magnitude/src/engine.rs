use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregateResult, ChannelEvaluation, MagnitudeAggregator};
use crate::calibration::DistanceCorrection;
use crate::channel::{ChannelState, Progress, Stage};
use crate::config::ProcessingConfig;
use crate::consensus::{ConsensusEstimate, DurationConsensus, DurationSample};
use crate::error::{MagnitudeError, Result};
use crate::filter::FilterFactory;
use crate::geo;
use crate::registry::{ChannelRegistry, Rejection};
use crate::types::{ChannelId, ChannelWindow, Event, Record, Seconds};

/// Epicentre shift (degrees) above which a revised origin triggers a recomputation.
pub const REVISION_DISTANCE_DEG: f64 = 0.05;
/// Depth change (km) above which a revised origin triggers a recomputation.
pub const REVISION_DEPTH_KM: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedOutcome {
	Accepted,
	/// The record was processed and ended the event on its channel.
	Completed,
	Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
	pub result: AggregateResult,
	/// True while some active channel has not reached [`Stage::Done`].
	pub pending: bool,
}

/// Streaming mBc computation for one event.
pub struct Engine {
	config: ProcessingConfig,
	event: Event,
	registry: ChannelRegistry,
	consensus: DurationConsensus,
	aggregator: MagnitudeAggregator,
	correction: Box<dyn DistanceCorrection>,
	filters: Box<dyn FilterFactory>,
	capture_traces: bool,
	evaluations: BTreeMap<ChannelId, ChannelEvaluation>,
	last_result: Option<AggregateResult>,
}

impl Engine {
	pub fn new(config: ProcessingConfig, event: Event, correction: impl DistanceCorrection + 'static) -> Self {
		let filters = Box::new(config.filter);

		Self {
			config,
			event,
			registry: ChannelRegistry::new(),
			consensus: DurationConsensus::new(),
			aggregator: MagnitudeAggregator::new(),
			correction: Box::new(correction),
			filters,
			capture_traces: false,
			evaluations: BTreeMap::new(),
			last_result: None,
		}
	}

	/// Replaces the band-pass filter used for channels created from now on.
	#[must_use]
	pub fn with_filters(mut self, filters: impl FilterFactory + 'static) -> Self {
		self.filters = Box::new(filters);
		self
	}

	/// Keeps processed samples of every channel for debug dumps.
	#[must_use]
	pub fn with_trace_capture(mut self, enabled: bool) -> Self {
		self.capture_traces = enabled;
		self
	}

	pub fn register_channel(&mut self, id: ChannelId, window: ChannelWindow) {
		self.registry.set_window(id, window, &self.config);
	}

	/// Admits and processes one record.
	pub fn feed(&mut self, record: &Record) -> Result<FeedOutcome> {
		if !(record.sampling_rate.is_finite() && record.sampling_rate > 0.0) {
			return Err(MagnitudeError::InvalidRecord {
				channel: record.channel.clone(),
				reason: format!("sampling rate {} is not positive", record.sampling_rate),
			});
		}

		let channel =
			match self.registry.admit(record, &self.config, self.filters.as_ref(), self.capture_traces) {
				Ok(channel) => channel,
				Err(rejection) => return Ok(FeedOutcome::Rejected(rejection)),
			};

		match channel.process(record, &self.config)? {
			Progress::Continue => Ok(FeedOutcome::Accepted),
			Progress::Completed => {
				info!(
					channel = %channel.id(),
					duration = channel.duration().unwrap_or(0.0),
					arrival = channel.arrival(),
					"End of event detected"
				);
				Ok(FeedOutcome::Completed)
			},
		}
	}

	/// Re-estimates the consensus duration and the network magnitude.
	pub fn update(&mut self) -> UpdateReport {
		let channels: Vec<&ChannelState> = self.registry.active().collect();
		let samples: Vec<DurationSample> = channels.iter().map(|channel| DurationSample::from(*channel)).collect();

		let estimate = self.consensus.update(&samples);
		if estimate.bootstrapped {
			debug!(duration = estimate.duration, "No qualified duration yet, using peak delays");
		}

		for channel in channels.iter().filter(|channel| channel.stage() == Stage::Searching) {
			debug!(channel = %channel.id(), "End of event not found");
		}

		let pending = channels.iter().any(|channel| channel.stage() < Stage::Done);
		let evaluations = self.aggregator.evaluate(&channels, &self.event, self.correction.as_ref(), &estimate);
		let result = self.aggregator.aggregate(&evaluations, estimate.duration);

		info!(
			elapsed = ?self.elapsed(),
			magnitude = ?result.network_magnitude,
			duration = result.duration,
			stations = result.channel_count(),
			pending,
			"Provisional magnitude"
		);

		self.store(evaluations, &result);
		UpdateReport { result, pending }
	}

	/// Settles the duration, prunes peaks past the integration window and computes the final result.
	pub fn finalize(&mut self) -> AggregateResult {
		let estimate = self.final_estimate();

		for channel in self.registry.active_mut() {
			let limit = channel.arrival() + estimate.duration;
			channel.prune_raw_peaks(limit);

			if channel.stage() == Stage::Searching {
				warn!(channel = %channel.id(), "End of event not found");
			}
		}

		let channels: Vec<&ChannelState> = self.registry.active().collect();
		let evaluations = self.aggregator.evaluate(&channels, &self.event, self.correction.as_ref(), &estimate);
		let result = self.aggregator.aggregate(&evaluations, estimate.duration);

		info!(
			magnitude = ?result.network_magnitude,
			duration = result.duration,
			stations = result.channel_count(),
			candidates = result.candidates,
			"Final magnitude"
		);

		self.store(evaluations, &result);
		result
	}

	fn final_estimate(&mut self) -> ConsensusEstimate {
		let samples: Vec<DurationSample> = self.registry.active().map(DurationSample::from).collect();
		self.consensus.finalize(&samples)
	}

	/// Installs a revised origin. Returns a fresh report when the change is material.
	pub fn set_event(&mut self, event: Event) -> Option<UpdateReport> {
		let shift = geo::distance_degrees(self.event.latitude, self.event.longitude, event.latitude, event.longitude);
		let depth_change = (event.depth_km - self.event.depth_km).abs();
		let material = shift > REVISION_DISTANCE_DEG || depth_change > REVISION_DEPTH_KM;

		debug!(shift, depth_change, material, "Origin revised");
		self.event = event;

		material.then(|| self.update())
	}

	fn store(&mut self, evaluations: Vec<ChannelEvaluation>, result: &AggregateResult) {
		self.evaluations = evaluations.into_iter().map(|evaluation| (evaluation.channel.clone(), evaluation)).collect();
		self.last_result = Some(result.clone());
	}

	pub const fn config(&self) -> &ProcessingConfig {
		&self.config
	}

	pub const fn event(&self) -> &Event {
		&self.event
	}

	pub fn channel(&self, id: &ChannelId) -> Option<&ChannelState> {
		self.registry.get(id)
	}

	pub fn channels(&self) -> impl Iterator<Item = &ChannelState> {
		self.registry.channels()
	}

	pub fn active_channel_count(&self) -> usize {
		self.registry.active().count()
	}

	pub const fn consensus_duration(&self) -> Seconds {
		self.consensus.duration()
	}

	pub const fn last_result(&self) -> Option<&AggregateResult> {
		self.last_result.as_ref()
	}

	/// Evaluation of `id` from the latest update or finalize.
	pub fn evaluation(&self, id: &ChannelId) -> Option<&ChannelEvaluation> {
		self.evaluations.get(id)
	}

	/// Latest record end over all channels, relative to the origin time.
	pub fn elapsed(&self) -> Option<Seconds> {
		self.registry
			.channels()
			.map(ChannelState::last_end)
			.max_by(f64::total_cmp)
			.map(|end| end - self.event.origin_seconds())
	}

	/// True once every active channel is done. False when no channel was seen yet.
	pub fn is_complete(&self) -> bool {
		let mut active = self.registry.active().peekable();
		active.peek().is_some() && active.all(|channel| channel.stage() == Stage::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::Exclusion;
	use crate::filter::BandFilter;
	use crate::types::StationLocation;
	use chrono::DateTime;
	use std::f64::consts::PI;

	struct Passthrough;

	impl BandFilter for Passthrough {
		fn apply(&mut self, sample: f64) -> f64 {
			sample
		}
	}

	impl FilterFactory for Passthrough {
		fn create(&self, _sampling_rate: f64) -> Box<dyn BandFilter> {
			Box::new(Self)
		}
	}

	const T0: i64 = 1_700_000_000;
	const RECORD_LEN: usize = 100;
	/// Records needed until the quiet period expires at sample 1400.
	const RECORDS_TO_DONE: usize = 15;

	/// Zeros with an alternating +/-amplitude burst on samples 500..=800 (50 s to 80 s at 10 Hz).
	fn burst(amplitude: f64) -> Vec<f64> {
		(0..RECORDS_TO_DONE * RECORD_LEN + 500)
			.map(|i| if (500..=800).contains(&i) { if (i - 500) % 2 == 0 { amplitude } else { -amplitude } } else { 0.0 })
			.collect()
	}

	fn record(id: &str, signal: &[f64], index: usize) -> Record {
		let offset = (index * RECORD_LEN / 10) as i64;
		Record {
			channel: ChannelId::from(id),
			start_time: DateTime::from_timestamp(T0 + offset, 0).unwrap(),
			end_time: DateTime::from_timestamp_micros((T0 + offset) * 1_000_000 + 9_900_000).unwrap(),
			sampling_rate: 10.0,
			gain: 1.0,
			samples: signal[index * RECORD_LEN..(index + 1) * RECORD_LEN].to_vec(),
		}
	}

	fn event(longitude: f64) -> Event {
		Event { origin_time: DateTime::from_timestamp(T0 - 300, 0).unwrap(), latitude: 0.0, longitude, depth_km: 10.0 }
	}

	fn window(longitude: f64) -> ChannelWindow {
		ChannelWindow {
			start: T0 as f64,
			end: T0 as f64 + 3600.0,
			location: StationLocation { latitude: 0.0, longitude },
		}
	}

	fn correction(distance_deg: f64, _depth_km: f64) -> Option<f64> {
		Some(distance_deg / 100.0)
	}

	fn engine(stations: &[(&str, f64)]) -> Engine {
		let mut engine = Engine::new(ProcessingConfig::default(), event(0.0), correction).with_filters(Passthrough);
		for (id, longitude) in stations {
			engine.register_channel(ChannelId::from(*id), window(*longitude));
		}
		engine
	}

	/// 299 raw peaks of half-amplitude lie inside the 30 s integration window.
	fn expected_magnitude(amplitude: f64, longitude: f64) -> f64 {
		(299.0 * amplitude / 2.0 / (2.0 * PI)).log10() + geo::distance_degrees(0.0, 0.0, 0.0, longitude) / 100.0
	}

	#[test]
	fn single_channel_runs_to_completion() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0)]);
		let signal = burst(1000.0);
		let id = ChannelId::from("XX.A..BHZ");

		for index in 0..RECORDS_TO_DONE - 1 {
			assert_eq!(engine.feed(&record("XX.A..BHZ", &signal, index)).unwrap(), FeedOutcome::Accepted);
		}
		assert_eq!(engine.feed(&record("XX.A..BHZ", &signal, RECORDS_TO_DONE - 1)).unwrap(), FeedOutcome::Completed);
		assert_eq!(
			engine.feed(&record("XX.A..BHZ", &signal, RECORDS_TO_DONE)).unwrap(),
			FeedOutcome::Rejected(Rejection::Completed)
		);

		let channel = engine.channel(&id).unwrap();
		assert_eq!(channel.stage(), Stage::Done);
		assert_eq!(channel.p_arrival(), Some(50.0));
		assert_eq!(channel.duration(), Some(30.0));
		assert_eq!(channel.filtered_peaks().len(), 301);
		assert!((channel.theoretical_p() - 50.0).abs() < f64::EPSILON);
		assert!(engine.is_complete());

		let report = engine.update();
		assert!(!report.pending);
		assert!((report.result.duration - 30.0).abs() < f64::EPSILON);
		assert_eq!(report.result.entries.len(), 1);
		assert!((report.result.network_magnitude.unwrap() - expected_magnitude(1000.0, 30.0)).abs() < 1e-9);

		let evaluation = engine.evaluation(&id).unwrap();
		assert!((evaluation.distance_deg - 30.0).abs() < 1e-9);
	}

	#[test]
	fn stage_never_moves_back() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0)]);
		let signal = burst(1000.0);
		let id = ChannelId::from("XX.A..BHZ");
		let mut stages = Vec::new();

		for index in 0..RECORDS_TO_DONE {
			engine.feed(&record("XX.A..BHZ", &signal, index)).unwrap();
			stages.push(engine.channel(&id).unwrap().stage());
		}

		assert!(stages.windows(2).all(|pair| pair[0] <= pair[1]));
		assert_eq!(stages[7], Stage::Searching);
		assert_eq!(stages[8], Stage::Quiet);
		assert_eq!(stages[RECORDS_TO_DONE - 1], Stage::Done);
	}

	#[test]
	fn pending_while_channels_are_open() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0)]);
		let signal = burst(1000.0);

		for index in 0..10 {
			engine.feed(&record("XX.A..BHZ", &signal, index)).unwrap();
		}

		let report = engine.update();
		assert!(report.pending);
		assert!(!engine.is_complete());
		assert!((engine.elapsed().unwrap() - 399.9).abs() < 1e-6);
	}

	#[test]
	fn network_of_three_stations() {
		let stations = [("XX.A..BHZ", 1000.0), ("XX.B..BHZ", 2000.0), ("XX.C..BHZ", 4000.0)];
		let mut engine = engine(&stations.map(|(id, _)| (id, 30.0)));
		let signals: Vec<Vec<f64>> = stations.iter().map(|(_, amplitude)| burst(*amplitude)).collect();

		for index in 0..RECORDS_TO_DONE {
			for ((id, _), signal) in stations.iter().zip(&signals) {
				engine.feed(&record(id, signal, index)).unwrap();
			}
		}

		let report = engine.update();
		let expected: f64 = stations.iter().map(|(_, amplitude)| expected_magnitude(*amplitude, 30.0)).sum::<f64>() / 3.0;

		assert!(!report.pending);
		assert_eq!(report.result.entries.len(), 3);
		assert!((report.result.network_magnitude.unwrap() - expected).abs() < 1e-9);

		let result = engine.finalize();
		assert!((result.duration - 30.0).abs() < f64::EPSILON);
		assert!((result.network_magnitude.unwrap() - expected).abs() < 1e-9);
		for (id, _) in stations {
			assert_eq!(engine.channel(&ChannelId::from(id)).unwrap().raw_peaks().len(), 299);
		}
	}

	#[test]
	fn gap_leaves_other_channels_untouched() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0), ("XX.B..BHZ", 30.0)]);
		let signal = burst(1000.0);
		let b = ChannelId::from("XX.B..BHZ");

		engine.feed(&record("XX.A..BHZ", &signal, 0)).unwrap();
		engine.feed(&record("XX.B..BHZ", &signal, 0)).unwrap();
		let before = format!("{:?}", engine.channel(&b).unwrap());

		// starts 6 s after the previous record ended
		let mut gapped = record("XX.A..BHZ", &signal, 1);
		gapped.start_time = DateTime::from_timestamp_micros(T0 * 1_000_000 + 15_900_000).unwrap();
		gapped.end_time = DateTime::from_timestamp_micros(T0 * 1_000_000 + 25_800_000).unwrap();
		let outcome = engine.feed(&gapped).unwrap();
		assert!(matches!(outcome, FeedOutcome::Rejected(Rejection::Excluded(Exclusion::Gap { .. }))));

		assert_eq!(format!("{:?}", engine.channel(&b).unwrap()), before);
		assert_eq!(engine.active_channel_count(), 1);
		assert_eq!(engine.channels().count(), 2);
	}

	#[test]
	fn invalid_sampling_rate_is_an_error() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0)]);
		let mut bad = record("XX.A..BHZ", &burst(1.0), 0);
		bad.sampling_rate = 0.0;

		assert!(matches!(engine.feed(&bad), Err(MagnitudeError::InvalidRecord { .. })));
		assert!(engine.channel(&ChannelId::from("XX.A..BHZ")).is_none());
	}

	#[test]
	fn uncalibrated_distance_gives_no_magnitude() {
		let mut engine = engine(&[("XX.A..BHZ", 2.0)]);
		let signal = burst(1000.0);

		for index in 0..RECORDS_TO_DONE {
			engine.feed(&record("XX.A..BHZ", &signal, index)).unwrap();
		}

		let report = engine.update();
		assert!(report.result.entries.is_empty());
		assert_eq!(report.result.network_magnitude, None);
		assert_eq!(engine.evaluation(&ChannelId::from("XX.A..BHZ")).unwrap().magnitude, None);

		// moving the epicentre brings the station into range
		let report = engine.set_event(event(-28.0)).unwrap();
		assert_eq!(report.result.entries.len(), 1);
		assert!(report.result.network_magnitude.is_some());
	}

	#[test]
	fn minor_origin_revisions_are_ignored() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0)]);

		assert!(engine.set_event(event(0.01)).is_none());
		assert!((engine.event().longitude - 0.01).abs() < f64::EPSILON);

		let deeper = Event { depth_km: 20.0, ..event(0.01) };
		assert!(engine.set_event(deeper).is_some());
	}

	#[test]
	fn finalize_without_data() {
		let mut engine = engine(&[("XX.A..BHZ", 30.0)]);
		let result = engine.finalize();

		assert!(result.entries.is_empty());
		assert_eq!(result.network_magnitude, None);
		assert!((result.duration - 1.0).abs() < f64::EPSILON);
		assert!(engine.elapsed().is_none());
		assert!(!engine.is_complete());
	}
}
