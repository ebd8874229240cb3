use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, warn};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, RwLock};

use super::container::Container;
use super::ecs::EcsTask;
use super::entity::{Entity, EntityId, Kind};
use super::error::StoreError;
use super::event::{CollectorEvent, Event, EventType};
use super::ledger::SourceEntities;
use super::pod::KubernetesPod;
use super::subscription::{DeliveryOptions, Filter, SubscriberRegistry, Subscription};
use crate::observability::StoreMetrics;

/// Store tuning, usually projected from `config::Settings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
	/// Sources that win field conflicts, highest priority first. Sources not
	/// listed follow in first-writer order.
	pub source_priority: Vec<String>,
	/// Batches queued per subscriber before `notify` waits on it.
	pub subscriber_backlog: usize,
	/// How long a subscriber may hold a bundle before it is dropped.
	pub delivery_timeout: Option<Duration>,
}

impl Default for StoreSettings {
	fn default() -> Self {
		Self {
			source_priority: Vec::new(),
			subscriber_backlog: 64,
			delivery_timeout: None,
		}
	}
}

/// Entity ledgers plus the pod reverse index. Only touched under the store
/// lock.
#[derive(Default)]
pub(super) struct StoreState {
	pub(super) entities: BTreeMap<Kind, BTreeMap<String, SourceEntities>>,
	pods_by_container: HashMap<String, BTreeSet<String>>,
	containers_by_pod: HashMap<String, Vec<String>>,
}

impl StoreState {
	fn ledger(&self, id: &EntityId) -> Option<&SourceEntities> {
		self.entities.get(&id.kind)?.get(&id.id)
	}

	fn entity_count(&self) -> usize {
		self.entities.values().map(BTreeMap::len).sum()
	}

	/// Apply a validated batch and return one event per touched entity, in
	/// first-touch order.
	fn apply(
		&mut self,
		batch: Vec<CollectorEvent>,
		priority: Option<&[String]>,
		metrics: &StoreMetrics,
	) -> Vec<Event> {
		let touched = self.record(batch);
		self.changes(touched, priority, metrics)
	}

	/// Update the ledgers. Returns the touched entities mapped to the sources
	/// whose view was removed in this batch.
	fn record(&mut self, batch: Vec<CollectorEvent>) -> IndexMap<EntityId, Vec<String>> {
		let mut touched: IndexMap<EntityId, Vec<String>> = IndexMap::new();

		for ev in batch {
			let id = ev.entity.id().clone();

			match ev.event_type {
				EventType::Set => {
					let by_id = self.entities.entry(id.kind).or_default();
					let ledger = by_id
						.entry(id.id.clone())
						.or_insert_with(|| SourceEntities::new(id.clone()));

					if let Err(e) = ledger.set(&ev.source, ev.entity) {
						warn!("Ignoring {} from source {}: {}", id, ev.source, e);
						if ledger.is_empty() {
							by_id.remove(&id.id);
						}
						if by_id.is_empty() {
							self.entities.remove(&id.kind);
						}
						continue;
					}
					touched.entry(id).or_default();
				}
				EventType::Unset => {
					let Some(by_id) = self.entities.get_mut(&id.kind) else {
						debug!("Unset of unknown entity {} from source {}", id, ev.source);
						continue;
					};
					let Some(ledger) = by_id.get_mut(&id.id) else {
						debug!("Unset of unknown entity {} from source {}", id, ev.source);
						continue;
					};

					if !ledger.unset(&ev.source) {
						debug!("Source {} had no view of {}", ev.source, id);
						continue;
					}
					if ledger.is_empty() {
						by_id.remove(&id.id);
					}
					if by_id.is_empty() {
						self.entities.remove(&id.kind);
					}
					touched.entry(id).or_default().push(ev.source);
				}
			}
		}

		touched
	}

	/// Merge every touched entity and keep the pod index in step.
	fn changes(
		&mut self,
		touched: IndexMap<EntityId, Vec<String>>,
		priority: Option<&[String]>,
		metrics: &StoreMetrics,
	) -> Vec<Event> {
		let mut events = Vec::with_capacity(touched.len());
		for (id, removed) in touched {
			let merged = self
				.ledger(&id)
				.map(|ledger| (ledger.sources(), ledger.merge(priority)));

			match merged {
				Some((sources, Ok(entity))) => {
					if let Entity::KubernetesPod(pod) = &entity {
						let containers = pod.container_ids().map(str::to_string).collect();
						self.index_pod(&id.id, containers);
					}
					events.push(Event {
						event_type: EventType::Set,
						sources,
						entity,
					});
				}
				Some((_, Err(e))) => {
					warn!("Skipping event for {}: {}", id, e);
					metrics.skipped_entities.inc();
					if id.kind == Kind::KubernetesPod {
						self.unindex_pod(&id.id);
					}
				}
				None => {
					if id.kind == Kind::KubernetesPod {
						self.unindex_pod(&id.id);
					}
					events.push(Event {
						event_type: EventType::Unset,
						sources: removed,
						entity: Entity::Id(id),
					});
				}
			}
		}

		events
	}

	fn index_pod(&mut self, pod_id: &str, containers: Vec<String>) {
		self.unindex_pod(pod_id);
		for c in &containers {
			self.pods_by_container
				.entry(c.clone())
				.or_default()
				.insert(pod_id.to_string());
		}
		if !containers.is_empty() {
			self.containers_by_pod.insert(pod_id.to_string(), containers);
		}
	}

	fn unindex_pod(&mut self, pod_id: &str) {
		let Some(previous) = self.containers_by_pod.remove(pod_id) else {
			return;
		};
		for c in previous {
			if let Some(pods) = self.pods_by_container.get_mut(&c) {
				pods.remove(pod_id);
				if pods.is_empty() {
					self.pods_by_container.remove(&c);
				}
			}
		}
	}
}

/// Central, in-memory store of workload metadata.
///
/// Collectors push observations through `notify`; consumers either query the
/// merged view directly or subscribe to change bundles. One instance is built
/// by the composition root and shared behind an `Arc`.
pub struct Store {
	settings: StoreSettings,
	metrics: Arc<StoreMetrics>,
	pub(super) state: RwLock<StoreState>,
	// Never held across an await.
	subscribers: SyncMutex<SubscriberRegistry>,
	// Serializes notify calls so batches reach every subscriber in apply order.
	fanout: Mutex<()>,
	started: AtomicBool,
	shut_down: AtomicBool,
}

impl Store {
	pub fn new(settings: StoreSettings, metrics: Arc<StoreMetrics>) -> Self {
		Self {
			settings,
			metrics,
			state: RwLock::new(StoreState::default()),
			subscribers: SyncMutex::new(SubscriberRegistry::default()),
			fanout: Mutex::new(()),
			started: AtomicBool::new(false),
			shut_down: AtomicBool::new(false),
		}
	}

	pub fn settings(&self) -> &StoreSettings {
		&self.settings
	}

	pub fn metrics(&self) -> Arc<StoreMetrics> {
		Arc::clone(&self.metrics)
	}

	/// Mark the store live. Must be called exactly once, before `notify` or
	/// `subscribe`.
	pub fn start(&self) -> Result<(), StoreError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(StoreError::AlreadyStarted);
		}

		info!(
			"Workload metadata store started (source priority: {:?}, backlog: {}, delivery timeout: {:?})",
			self.settings.source_priority,
			self.settings.subscriber_backlog,
			self.settings.delivery_timeout
		);
		Ok(())
	}

	/// Close every subscriber queue and reject further notifications.
	pub async fn shutdown(&self) {
		if self.shut_down.swap(true, Ordering::SeqCst) {
			return;
		}

		let mut registry = self.subscribers.lock();
		let count = registry.len();
		registry.clear();
		self.metrics.subscribers.set(0);
		info!("Workload metadata store shut down ({} subscribers closed)", count);
	}

	fn ensure_running(&self) -> Result<(), StoreError> {
		if !self.started.load(Ordering::SeqCst) {
			return Err(StoreError::NotStarted);
		}
		if self.shut_down.load(Ordering::SeqCst) {
			return Err(StoreError::ShutDown);
		}
		Ok(())
	}

	pub(super) fn priority(&self) -> Option<&[String]> {
		if self.settings.source_priority.is_empty() {
			None
		} else {
			Some(self.settings.source_priority.as_slice())
		}
	}

	/// Apply a batch of collector observations and fan the resulting changes
	/// out to subscribers.
	///
	/// The batch is validated up front: an inconsistent entry rejects the
	/// whole batch and nothing is applied. Once the batch is applied nothing
	/// awaits, so dropping the returned future cannot lose its events.
	pub async fn notify(&self, batch: Vec<CollectorEvent>) -> Result<(), StoreError> {
		self.ensure_running()?;
		if batch.is_empty() {
			return Ok(());
		}
		for ev in &batch {
			validate(ev)?;
		}

		let _sequence = self.fanout.lock().await;

		let timer = Instant::now();
		let received = batch.len();
		let events = {
			let mut state = self.state.write().await;
			let events = state.apply(batch, self.priority(), &self.metrics);
			self.metrics.entities.set(state.entity_count() as i64);
			events
		};

		self.metrics.notify_batches.inc();
		self.metrics.collector_events.inc_by(received as u64);
		self.metrics.events_emitted.inc_by(events.len() as u64);
		self.metrics
			.notify_duration_seconds
			.observe(timer.elapsed().as_secs_f64());
		debug!(
			"Applied {} collector events, {} entities changed",
			received,
			events.len()
		);

		self.fan_out(&events);
		Ok(())
	}

	fn fan_out(&self, events: &[Event]) {
		if events.is_empty() {
			return;
		}

		let mut registry = self.subscribers.lock();
		if registry.dispatch(events, &self.metrics) > 0 {
			self.metrics.subscribers.set(registry.len() as i64);
		}
	}

	/// Register a consumer. Only events accepted by `filter` are delivered.
	pub async fn subscribe(&self, name: &str, filter: Filter) -> Result<Subscription, StoreError> {
		self.ensure_running()?;

		let options = DeliveryOptions {
			backlog: self.settings.subscriber_backlog,
			ack_timeout: self.settings.delivery_timeout,
		};

		let mut registry = self.subscribers.lock();
		let sub = registry.register(name, filter, options, Arc::clone(&self.metrics));
		self.metrics.subscribers.set(registry.len() as i64);
		debug!("Subscriber {} {} registered", name, sub.id());

		Ok(sub)
	}

	/// Deregister a consumer. Safe while a bundle is in flight; the pending
	/// bundle is discarded.
	pub async fn unsubscribe(&self, sub: Subscription) {
		let mut registry = self.subscribers.lock();
		if registry.remove(sub.id()) {
			debug!("Subscriber {} {} unregistered", sub.name(), sub.id());
		}
		self.metrics.subscribers.set(registry.len() as i64);
	}

	async fn get_merged(&self, kind: Kind, id: &str) -> Result<Entity, StoreError> {
		let state = self.state.read().await;
		let ledger = state
			.entities
			.get(&kind)
			.and_then(|by_id| by_id.get(id))
			.ok_or_else(|| StoreError::not_found(kind, id))?;

		ledger.merge(self.priority())
	}

	pub async fn get_container(&self, id: &str) -> Result<Container, StoreError> {
		self.get_merged(Kind::Container, id)
			.await?
			.into_container()
			.ok_or_else(|| StoreError::not_found(Kind::Container, id))
	}

	pub async fn get_kubernetes_pod(&self, id: &str) -> Result<KubernetesPod, StoreError> {
		self.get_merged(Kind::KubernetesPod, id)
			.await?
			.into_kubernetes_pod()
			.ok_or_else(|| StoreError::not_found(Kind::KubernetesPod, id))
	}

	/// Find the pod running `container_id`. When several pods reference the
	/// container, the lowest pod id wins.
	pub async fn get_kubernetes_pod_for_container(
		&self,
		container_id: &str,
	) -> Result<KubernetesPod, StoreError> {
		let not_found = || StoreError::not_found(Kind::KubernetesPod, format!("for container {}", container_id));

		let state = self.state.read().await;
		let pod_id = state
			.pods_by_container
			.get(container_id)
			.and_then(|pods| pods.iter().next())
			.ok_or_else(not_found)?;
		let ledger = state
			.ledger(&EntityId::new(Kind::KubernetesPod, pod_id.as_str()))
			.ok_or_else(not_found)?;

		ledger
			.merge(self.priority())?
			.into_kubernetes_pod()
			.ok_or_else(not_found)
	}

	pub async fn get_ecs_task(&self, id: &str) -> Result<EcsTask, StoreError> {
		self.get_merged(Kind::EcsTask, id)
			.await?
			.into_ecs_task()
			.ok_or_else(|| StoreError::not_found(Kind::EcsTask, id))
	}

	async fn list_merged(&self, kind: Kind) -> Vec<Entity> {
		let state = self.state.read().await;
		let Some(by_id) = state.entities.get(&kind) else {
			return Vec::new();
		};

		by_id
			.values()
			.filter_map(|ledger| match ledger.merge(self.priority()) {
				Ok(e) => Some(e),
				Err(e) => {
					debug!("Ignoring entity {}: {}", ledger.id(), e);
					self.metrics.skipped_entities.inc();
					None
				}
			})
			.collect()
	}

	/// Every container, sorted by id.
	pub async fn list_containers(&self) -> Vec<Container> {
		self.list_merged(Kind::Container)
			.await
			.into_iter()
			.filter_map(Entity::into_container)
			.collect()
	}

	pub async fn list_kubernetes_pods(&self) -> Vec<KubernetesPod> {
		self.list_merged(Kind::KubernetesPod)
			.await
			.into_iter()
			.filter_map(Entity::into_kubernetes_pod)
			.collect()
	}

	pub async fn list_ecs_tasks(&self) -> Vec<EcsTask> {
		self.list_merged(Kind::EcsTask)
			.await
			.into_iter()
			.filter_map(Entity::into_ecs_task)
			.collect()
	}

	/// Sources currently contributing to `id`, in first-writer order.
	pub async fn sources_of(&self, id: &EntityId) -> Option<Vec<String>> {
		self.state.read().await.ledger(id).map(SourceEntities::sources)
	}
}

fn validate(ev: &CollectorEvent) -> Result<(), StoreError> {
	if ev.source.is_empty() {
		return Err(StoreError::ProgrammingError(format!(
			"collector event for {} has no source",
			ev.entity.id()
		)));
	}
	if ev.event_type == EventType::Set && ev.entity.is_bare_id() {
		return Err(StoreError::ProgrammingError(format!(
			"source {} sent a set event without an entity for {}",
			ev.source,
			ev.entity.id()
		)));
	}
	ev.entity.validate()
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::workloadmeta::pod::OrchestratorContainer;

	fn store() -> Store {
		let s = Store::new(StoreSettings::default(), Arc::new(StoreMetrics::new()));
		s.start().unwrap();
		s
	}

	fn pod(id: &str, containers: &[&str]) -> KubernetesPod {
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

	#[tokio::test]
	async fn lifecycle_is_enforced() {
		let s = Store::new(StoreSettings::default(), Arc::new(StoreMetrics::new()));
		assert_eq!(
			s.notify(vec![CollectorEvent::set("runtime", Container::new("c1"))])
				.await,
			Err(StoreError::NotStarted)
		);
		assert!(s.subscribe("early", Filter::new()).await.is_err());

		s.start().unwrap();
		assert_eq!(s.start(), Err(StoreError::AlreadyStarted));

		s.shutdown().await;
		assert_eq!(
			s.notify(vec![CollectorEvent::set("runtime", Container::new("c1"))])
				.await,
			Err(StoreError::ShutDown)
		);
	}

	#[tokio::test]
	async fn invalid_batch_is_not_partially_applied() {
		let s = store();
		let mut bad = Container::new("c2");
		bad.id.kind = Kind::EcsTask;

		let err = s
			.notify(vec![
				CollectorEvent::set("runtime", Container::new("c1")),
				CollectorEvent::set("runtime", bad),
			])
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::ProgrammingError(_)));
		assert!(s.get_container("c1").await.unwrap_err().is_not_found());

		let bare = CollectorEvent {
			event_type: EventType::Set,
			source: "runtime".into(),
			entity: EntityId::new(Kind::Container, "c1").into(),
		};
		assert!(s.notify(vec![bare]).await.is_err());
	}

	#[tokio::test]
	async fn pod_reverse_index_follows_updates() {
		let s = store();
		s.notify(vec![CollectorEvent::set("kubelet", pod("p1", &["c1", "c2"]))])
			.await
			.unwrap();
		assert_eq!(
			s.get_kubernetes_pod_for_container("c2").await.unwrap().id.id,
			"p1"
		);

		s.notify(vec![CollectorEvent::set("kubelet", pod("p1", &["c3"]))])
			.await
			.unwrap();
		assert!(s
			.get_kubernetes_pod_for_container("c2")
			.await
			.unwrap_err()
			.is_not_found());
		assert_eq!(
			s.get_kubernetes_pod_for_container("c3").await.unwrap().id.id,
			"p1"
		);

		s.notify(vec![CollectorEvent::unset(
			"kubelet",
			EntityId::new(Kind::KubernetesPod, "p1"),
		)])
		.await
		.unwrap();
		assert!(s.get_kubernetes_pod_for_container("c3").await.is_err());
	}

	#[tokio::test]
	async fn unset_of_unknown_entity_is_a_no_op() {
		let s = store();
		s.notify(vec![CollectorEvent::unset(
			"runtime",
			EntityId::new(Kind::Container, "ghost"),
		)])
		.await
		.unwrap();
		assert_eq!(s.metrics().events_emitted.get(), 0);
	}

	#[tokio::test]
	async fn lists_are_sorted_and_counted() {
		let s = store();
		s.notify(vec![
			CollectorEvent::set("runtime", Container::new("b")),
			CollectorEvent::set("runtime", Container::new("a")),
			CollectorEvent::set("ecs", EcsTask::new("t1")),
		])
		.await
		.unwrap();

		let ids: Vec<String> = s
			.list_containers()
			.await
			.into_iter()
			.map(|c| c.id.id)
			.collect();
		assert_eq!(ids, vec!["a", "b"]);
		assert_eq!(s.list_ecs_tasks().await.len(), 1);
		assert!(s.list_kubernetes_pods().await.is_empty());
		assert_eq!(s.metrics().entities.get(), 3);
		assert_eq!(
			s.sources_of(&EntityId::new(Kind::EcsTask, "t1")).await,
			Some(vec!["ecs".to_string()])
		);
	}

	#[test]
	fn unmergeable_entity_is_counted_and_unindexed() {
		let metrics = StoreMetrics::new();
		let mut state = StoreState::default();
		let id = EntityId::new(Kind::KubernetesPod, "p1");

		state.index_pod("p1", vec!["c1".to_string()]);
		state
			.entities
			.entry(Kind::KubernetesPod)
			.or_default()
			.insert("p1".to_string(), SourceEntities::new(id.clone()));

		let events = state.changes(IndexMap::from([(id, Vec::new())]), None, &metrics);
		assert!(events.is_empty());
		assert_eq!(metrics.skipped_entities.get(), 1);
		assert!(state.pods_by_container.is_empty());
		assert!(state.containers_by_pod.is_empty());
	}

	#[tokio::test]
	async fn removing_the_last_entity_of_a_kind_prunes_it() {
		let s = store();
		s.notify(vec![CollectorEvent::set("ecs", EcsTask::new("t1"))])
			.await
			.unwrap();
		s.notify(vec![CollectorEvent::unset(
			"ecs",
			EntityId::new(Kind::EcsTask, "t1"),
		)])
		.await
		.unwrap();

		assert!(!s.state.read().await.entities.contains_key(&Kind::EcsTask));
	}
}
