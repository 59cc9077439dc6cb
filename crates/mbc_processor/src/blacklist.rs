use anyhow::{Context, Result};
use glob::Pattern;
use magnitude::ChannelId;
use std::fs;
use std::path::Path;

/// Channels excluded from processing, matched with shell-style wildcards.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
	patterns: Vec<Pattern>,
}

impl Blacklist {
	pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
		let patterns = patterns
			.iter()
			.map(|p| p.as_ref().trim())
			.filter(|p| !p.is_empty() && !p.starts_with('#'))
			.map(|p| Pattern::new(p).with_context(|| format!("Invalid blacklist pattern: {p}")))
			.collect::<Result<Vec<_>>>()?;

		Ok(Self { patterns })
	}

	/// Inline patterns plus one pattern per line of `path`, if given.
	pub fn load(inline: &[String], path: Option<&Path>) -> Result<Self> {
		let mut blacklist = Self::new(inline)?;

		if let Some(path) = path {
			let content = fs::read_to_string(path)
				.with_context(|| format!("Failed to read blacklist file: {}", path.display()))?;
			let lines: Vec<&str> = content.lines().collect();
			blacklist.patterns.extend(Self::new(lines.as_slice())?.patterns);
		}

		Ok(blacklist)
	}

	pub fn contains(&self, id: &ChannelId) -> bool {
		self.patterns.iter().any(|pattern| pattern.matches(id.as_str()))
	}

	pub fn len(&self) -> usize {
		self.patterns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}
}
