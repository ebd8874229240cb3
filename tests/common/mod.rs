//! Shared helpers for the store integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vanopticon_huginn::observability::StoreMetrics;
use vanopticon_huginn::workloadmeta::{
	Container, EventBundle, KubernetesPod, OrchestratorContainer, Store, StoreSettings,
	Subscription,
};

/// A started store with default settings.
pub fn started_store() -> Arc<Store> {
	started_store_with(StoreSettings::default())
}

pub fn started_store_with(settings: StoreSettings) -> Arc<Store> {
	let store = Arc::new(Store::new(settings, Arc::new(StoreMetrics::new())));
	store.start().expect("fresh store should start");
	store
}

pub fn container(id: &str, name: &str) -> Container {
	let mut c = Container::new(id);
	c.meta.name = name.to_string();
	c
}

pub fn pod(id: &str, containers: &[&str]) -> KubernetesPod {
	let mut p = KubernetesPod::new(id);
	p.containers = containers
		.iter()
		.map(|c| OrchestratorContainer {
			id: c.to_string(),
			..Default::default()
		})
		.collect();
	p
}

/// Wait up to `ms` for the next bundle.
pub async fn recv_within(sub: &mut Subscription, ms: u64) -> Option<EventBundle> {
	tokio::time::timeout(Duration::from_millis(ms), sub.recv())
		.await
		.ok()
		.flatten()
}

/// Ids carried by a bundle, in delivery order.
pub fn bundle_ids(bundle: &EventBundle) -> Vec<String> {
	bundle.events.iter().map(|e| e.id().id.clone()).collect()
}
