use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::channel::{ChannelState, Exclusion, Stage};
use crate::config::ProcessingConfig;
use crate::filter::FilterFactory;
use crate::types::{ChannelId, ChannelWindow, Record};

/// Why a record was not processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
	/// The channel has no request window.
	NoTimeWindow,
	/// The record does not overlap the channel's request window.
	OutsideWindow,
	/// The channel was excluded by this or an earlier record.
	Excluded(Exclusion),
	/// The channel already reached [`Stage::Done`].
	Completed,
}

/// Channel states keyed by stream id, created lazily from the first admitted record.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
	windows: HashMap<ChannelId, ChannelWindow>,
	channels: BTreeMap<ChannelId, ChannelState>,
	unknown: HashSet<ChannelId>,
}

impl ChannelRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers or replaces the request window of a channel.
	pub fn set_window(&mut self, id: ChannelId, window: ChannelWindow, config: &ProcessingConfig) {
		if let Some(channel) = self.channels.get_mut(&id) {
			channel.revise_window(&window, config);
		}
		self.unknown.remove(&id);
		self.windows.insert(id, window);
	}

	pub fn window(&self, id: &ChannelId) -> Option<&ChannelWindow> {
		self.windows.get(id)
	}

	/// Applies the admission rules to `record` and returns the channel that should process it.
	///
	/// Stream anomalies (out-of-order or gapped records) exclude the channel permanently. Any
	/// other rejection leaves the channel untouched.
	pub fn admit(
		&mut self,
		record: &Record,
		config: &ProcessingConfig,
		filters: &dyn FilterFactory,
		capture_trace: bool,
	) -> Result<&mut ChannelState, Rejection> {
		let id = &record.channel;

		if let Some(exclusion) = self.channels.get(id).and_then(ChannelState::exclusion) {
			return Err(Rejection::Excluded(exclusion));
		}

		let Some(window) = self.windows.get(id) else {
			if self.unknown.insert(id.clone()) {
				warn!(channel = %id, "No time window for channel, ignoring its records");
			}
			return Err(Rejection::NoTimeWindow);
		};

		let (start, end) = (record.start_seconds(), record.end_seconds());
		if !window.overlaps(start, end) {
			debug!(channel = %id, start, end, "Record outside of the requested window");
			return Err(Rejection::OutsideWindow);
		}

		match self.channels.entry(id.clone()) {
			Entry::Occupied(entry) => {
				let channel = entry.into_mut();

				if let Err(exclusion) = channel.advance(start, end, config.max_gap_secs) {
					warn!(channel = %id, reason = %exclusion, "Excluding channel");
					channel.exclude(exclusion);
					return Err(Rejection::Excluded(exclusion));
				}

				if channel.stage() == Stage::Done {
					return Err(Rejection::Completed);
				}

				Ok(channel)
			},
			Entry::Vacant(entry) => {
				info!(channel = %id, sampling_rate = record.sampling_rate, "Processing new channel");
				let filter = filters.create(record.sampling_rate);
				Ok(entry.insert(ChannelState::new(record, window, config, filter, capture_trace)))
			},
		}
	}

	pub fn get(&self, id: &ChannelId) -> Option<&ChannelState> {
		self.channels.get(id)
	}

	/// All channels that received at least one record, including excluded ones.
	pub fn channels(&self) -> impl Iterator<Item = &ChannelState> {
		self.channels.values()
	}

	/// Channels still taking part in the computation.
	pub fn active(&self) -> impl Iterator<Item = &ChannelState> {
		self.channels.values().filter(|channel| !channel.is_excluded())
	}

	pub fn active_mut(&mut self) -> impl Iterator<Item = &mut ChannelState> {
		self.channels.values_mut().filter(|channel| !channel.is_excluded())
	}

	pub fn len(&self) -> usize {
		self.channels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.channels.is_empty()
	}

	pub fn window_count(&self) -> usize {
		self.windows.len()
	}
}
