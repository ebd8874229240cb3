use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::entity::Kind;
use super::event::{Event, EventType};
use crate::observability::StoreMetrics;

/// Restricts which events a subscriber receives. Every unset criterion
/// matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
	kinds: Option<HashSet<Kind>>,
	sources: Option<HashSet<String>>,
	event_type: Option<EventType>,
}

impl Filter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
		self.kinds = Some(kinds.into_iter().collect());
		self
	}

	pub fn with_sources<S: Into<String>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
		self.sources = Some(sources.into_iter().map(Into::into).collect());
		self
	}

	pub fn with_event_type(mut self, event_type: EventType) -> Self {
		self.event_type = Some(event_type);
		self
	}

	pub fn matches_kind(&self, kind: Kind) -> bool {
		self.kinds.as_ref().is_none_or(|k| k.contains(&kind))
	}

	pub fn matches(&self, event: &Event) -> bool {
		if !self.matches_kind(event.kind()) {
			return false;
		}
		if self.event_type.is_some_and(|t| t != event.event_type) {
			return false;
		}
		match &self.sources {
			Some(allowed) => event.sources.iter().any(|s| allowed.contains(s)),
			None => true,
		}
	}
}

/// Events produced by one `notify` call for one subscriber.
///
/// The store holds back this subscriber's next bundle until this one is
/// acknowledged. Dropping the bundle acknowledges it as well.
#[derive(Debug)]
pub struct EventBundle {
	pub events: Vec<Event>,
	ack: Option<oneshot::Sender<()>>,
}

impl EventBundle {
	fn new(events: Vec<Event>) -> (Self, oneshot::Receiver<()>) {
		let (tx, rx) = oneshot::channel();
		(
			Self {
				events,
				ack: Some(tx),
			},
			rx,
		)
	}

	/// Signal that every event in the bundle has been consumed.
	pub fn acknowledge(mut self) {
		if let Some(tx) = self.ack.take() {
			let _ = tx.send(());
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Receiving end of a subscription. Hand it back to `Store::unsubscribe`
/// on shutdown.
#[derive(Debug)]
pub struct Subscription {
	id: SubscriptionId,
	name: String,
	rx: mpsc::Receiver<EventBundle>,
}

impl Subscription {
	pub fn id(&self) -> SubscriptionId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Wait for the next bundle. Returns `None` once the store stopped
	/// delivering to this subscriber.
	pub async fn recv(&mut self) -> Option<EventBundle> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Result<EventBundle, TryRecvError> {
		self.rx.try_recv()
	}
}

/// Delivery tuning for each subscriber.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeliveryOptions {
	pub backlog: usize,
	pub ack_timeout: Option<Duration>,
}

struct Subscriber {
	name: String,
	filter: Filter,
	backlog: mpsc::Sender<Vec<Event>>,
	task: JoinHandle<()>,
}

/// Registered subscribers, kept apart from the entity maps so registering
/// never waits on a mutation and the other way around.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
	next_id: u64,
	subscribers: BTreeMap<SubscriptionId, Subscriber>,
}

impl SubscriberRegistry {
	pub fn register(
		&mut self,
		name: &str,
		filter: Filter,
		options: DeliveryOptions,
		metrics: Arc<StoreMetrics>,
	) -> Subscription {
		self.next_id += 1;
		let id = SubscriptionId(self.next_id);

		let (backlog_tx, backlog_rx) = mpsc::channel(options.backlog.max(1));
		let (out_tx, out_rx) = mpsc::channel(1);

		let task = tokio::spawn(deliver(
			format!("{} {}", name, id),
			backlog_rx,
			out_tx,
			options.ack_timeout,
			metrics,
		));

		self.subscribers.insert(
			id,
			Subscriber {
				name: name.to_string(),
				filter,
				backlog: backlog_tx,
				task,
			},
		);

		Subscription {
			id,
			name: name.to_string(),
			rx: out_rx,
		}
	}

	pub fn remove(&mut self, id: SubscriptionId) -> bool {
		match self.subscribers.remove(&id) {
			Some(sub) => {
				sub.task.abort();
				true
			}
			None => false,
		}
	}

	pub fn clear(&mut self) {
		for (_, sub) in std::mem::take(&mut self.subscribers) {
			sub.task.abort();
		}
	}

	pub fn len(&self) -> usize {
		self.subscribers.len()
	}

	/// Queue the matching part of a batch on every subscriber, keeping event
	/// order. Never waits: a subscriber whose backlog is full, or whose
	/// delivery already stopped, is removed. Returns how many were removed.
	pub fn dispatch(&mut self, events: &[Event], metrics: &StoreMetrics) -> usize {
		let mut gone = Vec::new();

		for (id, sub) in &self.subscribers {
			let matching: Vec<Event> = events
				.iter()
				.filter(|e| sub.filter.matches(e))
				.cloned()
				.collect();
			if matching.is_empty() {
				continue;
			}

			match sub.backlog.try_send(matching) {
				Ok(()) => {}
				Err(TrySendError::Full(_)) => {
					warn!(
						"Subscriber {} {} has {} unacknowledged batches queued, dropping it",
						sub.name,
						id,
						sub.backlog.max_capacity()
					);
					metrics.backlog_overflows.inc();
					gone.push(*id);
				}
				Err(TrySendError::Closed(_)) => {
					debug!("Removing subscriber {} {} whose delivery stopped", sub.name, id);
					gone.push(*id);
				}
			}
		}

		for id in &gone {
			self.remove(*id);
		}
		gone.len()
	}
}

/// Per-subscriber delivery loop: hand over one bundle, wait for its ack,
/// then move on to the next queued batch.
async fn deliver(
	label: String,
	mut backlog: mpsc::Receiver<Vec<Event>>,
	out: mpsc::Sender<EventBundle>,
	ack_timeout: Option<Duration>,
	metrics: Arc<StoreMetrics>,
) {
	while let Some(events) = backlog.recv().await {
		let count = events.len();
		let (bundle, ack) = EventBundle::new(events);

		if out.send(bundle).await.is_err() {
			debug!("Subscriber {} closed its queue, stopping delivery", label);
			return;
		}

		// A dropped bundle resolves the ack with an error, which counts as
		// consumed.
		match ack_timeout {
			Some(limit) => {
				if tokio::time::timeout(limit, ack).await.is_err() {
					warn!(
						"Subscriber {} did not acknowledge {} events within {:?}, dropping it",
						label, count, limit
					);
					metrics.delivery_timeouts.inc();
					return;
				}
			}
			None => {
				let _ = ack.await;
			}
		}

		metrics.bundles_delivered.inc();
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::workloadmeta::container::Container;
	use crate::workloadmeta::entity::{Entity, EntityId};
	use crate::workloadmeta::pod::KubernetesPod;

	fn set_event(entity: Entity, sources: &[&str]) -> Event {
		Event {
			event_type: EventType::Set,
			sources: sources.iter().map(|s| s.to_string()).collect(),
			entity,
		}
	}

	#[test]
	fn empty_filter_matches_everything() {
		let f = Filter::new();
		assert!(f.matches(&set_event(Container::new("c1").into(), &["runtime"])));
		assert!(f.matches(&Event {
			event_type: EventType::Unset,
			sources: Vec::new(),
			entity: EntityId::new(Kind::EcsTask, "t1").into(),
		}));
	}

	#[test]
	fn filters_by_kind_source_and_type() {
		let f = Filter::new()
			.with_kinds([Kind::KubernetesPod])
			.with_sources(["kubelet"])
			.with_event_type(EventType::Set);

		assert!(f.matches(&set_event(KubernetesPod::new("p1").into(), &["runtime", "kubelet"])));
		assert!(!f.matches(&set_event(KubernetesPod::new("p1").into(), &["runtime"])));
		assert!(!f.matches(&set_event(Container::new("c1").into(), &["kubelet"])));
		assert!(!f.matches(&Event {
			event_type: EventType::Unset,
			sources: vec!["kubelet".into()],
			entity: EntityId::new(Kind::KubernetesPod, "p1").into(),
		}));
	}

	#[tokio::test]
	async fn dispatch_keeps_only_matching_events_in_order() {
		let mut registry = SubscriberRegistry::default();
		let options = DeliveryOptions {
			backlog: 4,
			ack_timeout: None,
		};
		let metrics = Arc::new(StoreMetrics::new());
		let mut pods = registry.register(
			"pods",
			Filter::new().with_kinds([Kind::KubernetesPod]),
			options,
			metrics.clone(),
		);
		let mut all = registry.register("all", Filter::new(), options, metrics.clone());

		let events = vec![
			set_event(Container::new("c1").into(), &["runtime"]),
			set_event(KubernetesPod::new("p1").into(), &["kubelet"]),
			set_event(Container::new("c2").into(), &["runtime"]),
		];

		assert_eq!(registry.dispatch(&events, &metrics), 0);

		let bundle = pods.recv().await.unwrap();
		assert_eq!(bundle.events, vec![events[1].clone()]);
		let bundle = all.recv().await.unwrap();
		assert_eq!(bundle.events, events);

		assert!(registry.remove(pods.id()));
		assert!(!registry.remove(pods.id()));
		assert_eq!(registry.len(), 1);
		registry.clear();
		assert_eq!(registry.len(), 0);
	}

	#[tokio::test]
	async fn full_backlog_drops_the_subscriber_without_waiting() {
		let mut registry = SubscriberRegistry::default();
		let options = DeliveryOptions {
			backlog: 1,
			ack_timeout: None,
		};
		let metrics = Arc::new(StoreMetrics::new());
		let _stalled = registry.register("stalled", Filter::new(), options, metrics.clone());

		let events = vec![set_event(Container::new("c1").into(), &["runtime"])];

		// The delivery task cannot run between these calls, so the second
		// batch finds the single backlog slot taken.
		assert_eq!(registry.dispatch(&events, &metrics), 0);
		assert_eq!(registry.dispatch(&events, &metrics), 1);
		assert_eq!(registry.len(), 0);
		assert_eq!(metrics.backlog_overflows.get(), 1);
	}
}
