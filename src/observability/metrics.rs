use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for the workload metadata store
pub struct StoreMetrics {
	registry: Registry,

	// Mutation metrics
	pub notify_batches: IntCounter,
	pub collector_events: IntCounter,
	pub notify_duration_seconds: Histogram,
	pub entities: IntGauge,

	// Fan-out metrics
	pub events_emitted: IntCounter,
	pub bundles_delivered: IntCounter,
	pub delivery_timeouts: IntCounter,
	pub backlog_overflows: IntCounter,
	pub subscribers: IntGauge,

	// Dump/query degradation
	pub skipped_entities: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
	IntCounter::with_opts(Opts::new(name, help).namespace("huginn"))
		.expect("static counter options are valid")
}

fn gauge(name: &str, help: &str) -> IntGauge {
	IntGauge::with_opts(Opts::new(name, help).namespace("huginn"))
		.expect("static gauge options are valid")
}

impl StoreMetrics {
	pub fn new() -> Self {
		let registry = Registry::new();

		let notify_batches = counter(
			"store_notify_batches_total",
			"Total number of collector batches applied",
		);
		let collector_events = counter(
			"store_collector_events_total",
			"Total number of collector events received",
		);
		let notify_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"store_notify_duration_seconds",
				"Time spent applying a collector batch under the store lock",
			)
			.namespace("huginn")
			.buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
		)
		.expect("static histogram options are valid");
		let entities = gauge("store_entities", "Number of entities currently tracked");

		let events_emitted = counter(
			"store_events_emitted_total",
			"Total number of change events produced for subscribers",
		);
		let bundles_delivered = counter(
			"store_bundles_delivered_total",
			"Total number of event bundles acknowledged by subscribers",
		);
		let delivery_timeouts = counter(
			"store_delivery_timeouts_total",
			"Subscribers dropped for not acknowledging a bundle in time",
		);
		let backlog_overflows = counter(
			"store_backlog_overflows_total",
			"Subscribers dropped because their backlog was full",
		);
		let subscribers = gauge("store_subscribers", "Number of registered subscribers");

		let skipped_entities = counter(
			"store_skipped_entities_total",
			"Entities skipped while rendering or listing because they failed to merge",
		);

		for collector in [
			Box::new(notify_batches.clone()) as Box<dyn prometheus::core::Collector>,
			Box::new(collector_events.clone()),
			Box::new(notify_duration_seconds.clone()),
			Box::new(entities.clone()),
			Box::new(events_emitted.clone()),
			Box::new(bundles_delivered.clone()),
			Box::new(delivery_timeouts.clone()),
			Box::new(backlog_overflows.clone()),
			Box::new(subscribers.clone()),
			Box::new(skipped_entities.clone()),
		] {
			registry
				.register(collector)
				.expect("metric names are unique");
		}

		Self {
			registry,
			notify_batches,
			collector_events,
			notify_duration_seconds,
			entities,
			events_emitted,
			bundles_delivered,
			delivery_timeouts,
			backlog_overflows,
			subscribers,
			skipped_entities,
		}
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for StoreMetrics {
	fn default() -> Self {
		Self::new()
	}
}

/// Build the metrics shared by the store and its subscribers
pub fn init_metrics() -> Arc<StoreMetrics> {
	Arc::new(StoreMetrics::new())
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let metrics = super::StoreMetrics::new();
		let output = metrics.encode();
		assert!(output.contains("huginn_store_notify_batches_total 0"));
		assert!(output.contains("huginn_store_subscribers 0"));
		assert!(output.contains("huginn_store_backlog_overflows_total 0"));
	}

	#[test]
	fn metrics_increment() {
		let metrics = super::StoreMetrics::new();
		metrics.notify_batches.inc();
		metrics.collector_events.inc_by(10);
		metrics.subscribers.set(3);

		let output = metrics.encode();
		assert!(output.contains("huginn_store_notify_batches_total 1"));
		assert!(output.contains("huginn_store_collector_events_total 10"));
		assert!(output.contains("huginn_store_subscribers 3"));
	}
}
