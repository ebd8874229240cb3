use std::time::Duration;

use log::Level;
use serde::Deserialize;
use thiserror::Error;

use crate::workloadmeta::StoreSettings;

/// Runtime configuration for Huginn.
///
/// Values are loaded from (in order): the `/etc/vanopticon/huginn.json` file,
/// the user config folders (optional), and environment variables prefixed
/// with `HGN_` (e.g. `HGN_LOG_LEVEL`). `HGN_SOURCE_PRIORITY` takes a
/// comma-separated list of collector names.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub log_level: Level,
	// Collector names that win merge conflicts, highest priority first
	pub source_priority: Vec<String>,
	// Batches queued per subscriber before notify waits on it
	pub subscriber_backlog: usize,
	// Ack deadline per bundle; 0 waits forever
	pub delivery_timeout_ms: u64,
}

impl Default for Settings {
	fn default() -> Self {
		let store = StoreSettings::default();

		Self {
			log_level: Level::Info,
			source_priority: store.source_priority,
			subscriber_backlog: store.subscriber_backlog,
			delivery_timeout_ms: 0,
		}
	}
}

impl Settings {
	/// The subset of settings the store consumes.
	pub fn store_settings(&self) -> StoreSettings {
		StoreSettings {
			source_priority: self.source_priority.clone(),
			subscriber_backlog: self.subscriber_backlog.max(1),
			delivery_timeout: match self.delivery_timeout_ms {
				0 => None,
				ms => Some(Duration::from_millis(ms)),
			},
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

fn parse_list(raw: &str) -> Vec<String> {
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect()
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/vanopticon/huginn.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("vanopticon").join("huginn.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("vanopticon").join("huginn.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("HGN")
			.separator("__")
			.try_parsing(true)
			.list_separator(",")
			.with_list_parse_key("source_priority"),
	);

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct environment variables take precedence over anything the
	// `config` crate mapped.
	if let Ok(l) = std::env::var("HGN_LOG_LEVEL") {
		if !l.is_empty() {
			if let Ok(parsed) = l.parse::<Level>() {
				s.log_level = parsed;
			}
		}
	}
	if let Ok(p) = std::env::var("HGN_SOURCE_PRIORITY") {
		s.source_priority = parse_list(&p);
	}
	if let Ok(b) = std::env::var("HGN_SUBSCRIBER_BACKLOG") {
		if let Ok(parsed) = b.parse::<usize>() {
			s.subscriber_backlog = parsed;
		}
	}
	if let Ok(t) = std::env::var("HGN_DELIVERY_TIMEOUT_MS") {
		if let Ok(parsed) = t.parse::<u64>() {
			s.delivery_timeout_ms = parsed;
		}
	}

	Ok(s)
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use std::env;
	use std::time::Duration;

	use log::Level;

	use crate::config::{Settings, load, parse_list};

	const VARS: [&str; 4] = [
		"HGN_LOG_LEVEL",
		"HGN_SOURCE_PRIORITY",
		"HGN_SUBSCRIBER_BACKLOG",
		"HGN_DELIVERY_TIMEOUT_MS",
	];

	#[test]
	fn test_load_defaults_and_env_overlay() {
		// Save original values so we can restore them
		let originals: Vec<_> = VARS.iter().map(|v| env::var_os(v)).collect();

		for v in VARS {
			unsafe { env::remove_var(v) };
		}

		let s = load().expect("load should succeed with defaults");
		let d = Settings::default();
		assert_eq!(s.log_level, d.log_level);
		assert_eq!(s.subscriber_backlog, d.subscriber_backlog);
		assert_eq!(s.store_settings().delivery_timeout, None);

		unsafe { env::set_var("HGN_LOG_LEVEL", "debug") };
		unsafe { env::set_var("HGN_SOURCE_PRIORITY", "runtime, kubelet") };
		unsafe { env::set_var("HGN_SUBSCRIBER_BACKLOG", "8") };
		unsafe { env::set_var("HGN_DELIVERY_TIMEOUT_MS", "250") };

		let s2 = load().expect("load should succeed with env");
		assert_eq!(s2.log_level, Level::Debug);
		assert_eq!(
			s2.source_priority,
			vec!["runtime".to_string(), "kubelet".to_string()]
		);
		let store = s2.store_settings();
		assert_eq!(store.subscriber_backlog, 8);
		assert_eq!(store.delivery_timeout, Some(Duration::from_millis(250)));

		// restore originals
		for (v, orig) in VARS.iter().zip(originals) {
			match orig {
				Some(val) => unsafe { env::set_var(v, val) },
				None => unsafe { env::remove_var(v) },
			}
		}
	}

	#[test]
	fn zero_backlog_is_clamped() {
		let s = Settings {
			subscriber_backlog: 0,
			..Settings::default()
		};
		assert_eq!(s.store_settings().subscriber_backlog, 1);
	}

	#[test]
	fn list_parsing_drops_blanks() {
		assert_eq!(parse_list(" a,,b , "), vec!["a".to_string(), "b".to_string()]);
		assert!(parse_list("").is_empty());
	}
}
