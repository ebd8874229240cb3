pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{StoreMetrics, init_metrics};

use std::sync::Arc;

use log::LevelFilter;

/// Observability handles shared with the store
pub struct ObservabilityState {
	pub metrics: Arc<StoreMetrics>,
}

impl ObservabilityState {
	pub fn new() -> Self {
		Self {
			metrics: init_metrics(),
		}
	}
}

impl Default for ObservabilityState {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize logging and the metrics registry
pub fn init_observability(level: LevelFilter) -> anyhow::Result<ObservabilityState> {
	init_logging(level)?;

	let state = ObservabilityState::new();

	log::info!("Observability initialized: logging at {} and store metrics enabled", level);

	Ok(state)
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn observability_state_creation() {
		let state = super::ObservabilityState::new();
		assert!(!state.metrics.encode().is_empty());
	}
}
