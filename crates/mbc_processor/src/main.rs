mod blacklist;
mod config;
mod input;
mod report;

use anyhow::{Context, Result};
use blacklist::Blacklist;
use config::Config;
use input::StreamMessage;
use magnitude::{CalibrationTable, Engine, FeedOutcome};
use report::Report;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
	let config = Config::load(&config_path).context("Failed to load configuration")?;
	info!(path = %config_path, channels = config.channels.len(), "Configuration loaded");

	let blacklist = Blacklist::load(&config.control.blacklist, config.control.blacklist_path.as_deref())?;
	let calibration = CalibrationTable::load(&config.calibration.table_path).with_context(|| {
		format!("Failed to load calibration table: {}", config.calibration.table_path.display())
	})?;

	let mut engine = Engine::new(config.processing.clone(), config.event.to_event(), calibration)
		.with_trace_capture(config.output.dump_waveforms);

	let mut registered = 0;
	for channel in &config.channels {
		if blacklist.contains(&channel.id) {
			warn!(channel = %channel.id, "Channel is blacklisted, skipping");
			continue;
		}
		engine.register_channel(channel.id.clone(), channel.window());
		registered += 1;
	}
	info!(registered, blacklist_patterns = blacklist.len(), "Channels registered");

	let (record_tx, record_rx) = mpsc::channel(config.input.channel_size);
	let reader = tokio::spawn(input::reader_task(config.input.records_path.clone(), record_tx));

	run(&mut engine, record_rx, &config).await?;

	let result = engine.finalize();
	Report::new(&engine, &result, true).write(&config.output.report_path)?;

	if config.output.dump_waveforms {
		report::dump_channels(&engine, &config.output.dump_dir)?;
	}

	match result.network_magnitude {
		Some(magnitude) => {
			info!(magnitude, duration = result.duration, stations = result.channel_count(), "mBc computed");
		},
		None => warn!(duration = result.duration, "No channel contributed to the magnitude"),
	}

	reader.abort();
	match reader.await {
		Ok(Err(e)) => error!(error = %e, "Record reader failed"),
		Err(e) if e.is_panic() => error!("Record reader panicked"),
		_ => {},
	}

	Ok(())
}

/// Feeds records and origin revisions into the engine, refreshing the report on every tick.
async fn run(engine: &mut Engine, mut record_rx: mpsc::Receiver<StreamMessage>, config: &Config) -> Result<()> {
	let mut update_timer = interval(Duration::from_secs(config.processing.update_interval_secs));
	update_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let mut changed = false;

	loop {
		tokio::select! {
			message = record_rx.recv() => {
				let Some(message) = message else {
					info!("Input exhausted");
					break;
				};

				match message {
					StreamMessage::Record(record) => match engine.feed(&record) {
						Ok(FeedOutcome::Rejected(rejection)) => {
							debug!(channel = %record.channel, ?rejection, "Record rejected");
						},
						Ok(_) => changed = true,
						Err(e) => warn!(channel = %record.channel, error = %e, "Failed to process record"),
					},
					StreamMessage::Origin(event) => {
						info!(latitude = event.latitude, longitude = event.longitude, depth_km = event.depth_km, "Origin received");
						if let Some(update) = engine.set_event(event) {
							Report::new(engine, &update.result, false).write(&config.output.report_path)?;
						}
					},
				}
			}

			_ = update_timer.tick() => {
				if changed {
					changed = false;

					let update = engine.update();
					Report::new(engine, &update.result, false).write(&config.output.report_path)?;

					if config.input.stop_when_complete && engine.is_complete() {
						info!("All channels completed");
						break;
					}
				}
			}

			_ = tokio::signal::ctrl_c() => {
				warn!("Interrupted, finalizing with the data received so far");
				break;
			}
		}
	}

	Ok(())
}
