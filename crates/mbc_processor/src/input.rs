use anyhow::{Context, Result};
use magnitude::{Event, Record};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One line of the input stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
	Record(Record),
	/// Revised hypocenter for the event being processed.
	Origin(Event),
}

pub fn parse_line(line: &str) -> Option<serde_json::Result<StreamMessage>> {
	let line = line.trim();
	if line.is_empty() || line.starts_with('#') {
		return None;
	}
	Some(serde_json::from_str(line))
}

/// Reads JSON lines from `path` (`-` for stdin) and forwards them until the input ends or the
/// receiver goes away.
pub async fn reader_task(path: String, tx: mpsc::Sender<StreamMessage>) -> Result<()> {
	info!(path = %path, "Starting record reader");

	if path == "-" {
		forward_lines(BufReader::new(tokio::io::stdin()), &tx).await
	} else {
		let file = File::open(&path).await.with_context(|| format!("Failed to open records file: {path}"))?;
		forward_lines(BufReader::new(file), &tx).await
	}
}

async fn forward_lines<R>(reader: R, tx: &mpsc::Sender<StreamMessage>) -> Result<()>
where
	R: AsyncBufRead + Unpin,
{
	let mut lines = reader.lines();
	let mut line_number = 0usize;
	let mut forwarded = 0usize;

	while let Some(line) = lines.next_line().await.context("Failed to read input line")? {
		line_number += 1;

		let message = match parse_line(&line) {
			None => continue,
			Some(Ok(message)) => message,
			Some(Err(e)) => {
				warn!(line = line_number, error = %e, "Skipping malformed input line");
				continue;
			},
		};

		if tx.send(message).await.is_err() {
			debug!("Receiver closed, stopping record reader");
			break;
		}
		forwarded += 1;
	}

	info!(lines = line_number, forwarded, "Input exhausted");
	Ok(())
}
