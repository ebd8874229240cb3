pub mod config;
pub mod observability;
pub mod replay;
pub mod workloadmeta;

use std::sync::Arc;

use anyhow::Context;

use crate::config::Settings;
use crate::observability::StoreMetrics;
use crate::workloadmeta::Store;

/// Build and start the store for `settings`. The returned instance is the one
/// every collector and consumer in the process should share.
pub fn start_store(settings: &Settings, metrics: Arc<StoreMetrics>) -> anyhow::Result<Arc<Store>> {
	let store = Arc::new(Store::new(settings.store_settings(), metrics));
	store.start().context("failed to start workload metadata store")?;
	Ok(store)
}

/// Run the store until ctrl-c, then close every subscriber.
pub async fn run(settings: Settings, metrics: Arc<StoreMetrics>) -> anyhow::Result<()> {
	let store = start_store(&settings, metrics)?;

	log::info!("Huginn is ready; waiting for collectors (ctrl-c to stop)");

	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for shutdown signal")?;

	store.shutdown().await;
	Ok(())
}
