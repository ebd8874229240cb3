use anyhow::Context;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize logging to stderr with colored levels and timestamps.
///
/// Only one logger can be installed per process; a second call returns an
/// error.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		.chain(std::io::stderr())
		.apply()
		.context("failed to initialize logging")?;

	Ok(())
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn logging_initialization() {
		// Only the first logger per process wins, so just exercise the call.
		let _ = super::init_logging(log::LevelFilter::Debug);
		assert!(super::init_logging(log::LevelFilter::Debug).is_err());
	}
}
