mod common;

use std::time::Duration;

use vanopticon_huginn::workloadmeta::{
	CollectorEvent, EntityId, EventType, Filter, Kind, StoreSettings,
};

use common::{bundle_ids, container, pod, recv_within, started_store, started_store_with};

#[cfg(feature = "integration-tests")]
mod integration_tests {
	use super::*;
	use tokio::sync::mpsc::error::TryRecvError;

	/// Bundle k+1 is only handed over once bundle k is acknowledged, and
	/// bundles arrive in notify order.
	#[tokio::test]
	async fn test_bundles_are_delivered_in_order_one_at_a_time() {
		let store = started_store();
		let mut sub = store.subscribe("consumer", Filter::new()).await.unwrap();

		for i in 0..5 {
			store
				.notify(vec![CollectorEvent::set(
					"runtime",
					container(&format!("c{}", i), "web"),
				)])
				.await
				.unwrap();
		}

		for i in 0..5 {
			let bundle = recv_within(&mut sub, 1000)
				.await
				.expect("bundle should arrive");
			assert_eq!(bundle_ids(&bundle), vec![format!("c{}", i)]);

			// Give the delivery task a chance to push ahead if it wrongly
			// ignored the ack.
			tokio::time::sleep(Duration::from_millis(20)).await;
			assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));

			bundle.acknowledge();
		}
	}

	/// Events within a batch keep first-touch order, one event per entity.
	#[tokio::test]
	async fn test_batch_events_follow_first_touch_order() {
		let store = started_store();
		let mut sub = store.subscribe("consumer", Filter::new()).await.unwrap();

		store
			.notify(vec![
				CollectorEvent::set("runtime", container("b", "")),
				CollectorEvent::set("runtime", container("a", "")),
				CollectorEvent::set("orchestrator", container("b", "web")),
			])
			.await
			.unwrap();

		let bundle = recv_within(&mut sub, 1000).await.unwrap();
		assert_eq!(bundle_ids(&bundle), vec!["b".to_string(), "a".to_string()]);
		assert_eq!(
			bundle.events[0].sources,
			vec!["runtime".to_string(), "orchestrator".to_string()]
		);
	}

	/// Removing the only source emits an Unset carrying the bare id.
	#[tokio::test]
	async fn test_unset_of_only_source_is_broadcast() {
		let store = started_store();
		let mut sub = store.subscribe("consumer", Filter::new()).await.unwrap();
		let id = EntityId::new(Kind::Container, "c1");

		store
			.notify(vec![CollectorEvent::set("runtime", container("c1", "web"))])
			.await
			.unwrap();
		store
			.notify(vec![CollectorEvent::unset("runtime", id.clone())])
			.await
			.unwrap();

		let created = recv_within(&mut sub, 1000).await.unwrap();
		assert_eq!(created.events[0].event_type, EventType::Set);
		created.acknowledge();

		let removed = recv_within(&mut sub, 1000).await.unwrap();
		assert_eq!(removed.events.len(), 1);
		assert_eq!(removed.events[0].event_type, EventType::Unset);
		assert_eq!(removed.events[0].id(), &id);
		removed.acknowledge();

		assert!(store.get_container("c1").await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn test_filters_select_kind_source_and_type() {
		let store = started_store();
		let mut pods = store
			.subscribe("pods", Filter::new().with_kinds([Kind::KubernetesPod]))
			.await
			.unwrap();
		let mut runtime_unsets = store
			.subscribe(
				"runtime-unsets",
				Filter::new()
					.with_sources(["runtime"])
					.with_event_type(EventType::Unset),
			)
			.await
			.unwrap();

		store
			.notify(vec![
				CollectorEvent::set("runtime", container("c1", "web")),
				CollectorEvent::set("kubelet", pod("p1", &["c1"])),
			])
			.await
			.unwrap();
		store
			.notify(vec![CollectorEvent::unset(
				"runtime",
				EntityId::new(Kind::Container, "c1"),
			)])
			.await
			.unwrap();

		let bundle = recv_within(&mut pods, 1000).await.unwrap();
		assert_eq!(bundle_ids(&bundle), vec!["p1".to_string()]);
		bundle.acknowledge();
		assert!(recv_within(&mut pods, 50).await.is_none());

		let bundle = recv_within(&mut runtime_unsets, 1000).await.unwrap();
		assert_eq!(bundle.events.len(), 1);
		let removal = &bundle.events[0];
		assert_eq!(removal.event_type, EventType::Unset);
		assert_eq!(removal.sources, vec!["runtime".to_string()]);
		assert!(removal.entity.is_bare_id());
	}

	/// A subscriber that never acknowledges does not hold back the others.
	#[tokio::test]
	async fn test_slow_subscriber_does_not_block_others() {
		let store = started_store();
		let mut slow = store.subscribe("slow", Filter::new()).await.unwrap();
		let mut fast = store.subscribe("fast", Filter::new()).await.unwrap();

		for i in 0..3 {
			store
				.notify(vec![CollectorEvent::set(
					"runtime",
					container(&format!("c{}", i), ""),
				)])
				.await
				.unwrap();
		}

		let held = recv_within(&mut slow, 1000).await.unwrap();
		for i in 0..3 {
			let bundle = recv_within(&mut fast, 1000).await.unwrap();
			assert_eq!(bundle_ids(&bundle), vec![format!("c{}", i)]);
			bundle.acknowledge();
		}
		assert!(matches!(slow.try_recv(), Err(TryRecvError::Empty)));
		drop(held);
	}

	/// A subscriber that stops reading is dropped once its backlog is full;
	/// notify keeps completing and the other subscriber sees every batch.
	#[tokio::test]
	async fn test_stalled_subscriber_is_dropped_when_backlog_fills() {
		let store = started_store_with(StoreSettings {
			subscriber_backlog: 4,
			..StoreSettings::default()
		});
		let mut stalled = store.subscribe("stalled", Filter::new()).await.unwrap();
		let mut fast = store.subscribe("fast", Filter::new()).await.unwrap();

		for i in 0..20 {
			tokio::time::timeout(
				Duration::from_millis(500),
				store.notify(vec![CollectorEvent::set(
					"runtime",
					container(&format!("c{}", i), ""),
				)]),
			)
			.await
			.expect("notify must not wait on a stalled subscriber")
			.unwrap();

			let bundle = recv_within(&mut fast, 1000)
				.await
				.expect("fast subscriber should get every batch");
			assert_eq!(bundle_ids(&bundle), vec![format!("c{}", i)]);
			bundle.acknowledge();
		}

		let metrics = store.metrics();
		assert_eq!(metrics.backlog_overflows.get(), 1);
		assert_eq!(metrics.subscribers.get(), 1);
		assert_eq!(store.list_containers().await.len(), 20);

		// The stalled consumer finds its queue closed once it catches up.
		let mut drained = 0;
		while recv_within(&mut stalled, 200).await.is_some() {
			drained += 1;
		}
		assert!(drained <= 1);
	}

	/// Set then unset of a fresh id in one batch still reports the removal.
	#[tokio::test]
	async fn test_set_and_unset_in_one_batch() {
		let store = started_store();
		let mut sub = store.subscribe("consumer", Filter::new()).await.unwrap();

		store
			.notify(vec![
				CollectorEvent::set("runtime", container("c9", "web")),
				CollectorEvent::unset("runtime", EntityId::new(Kind::Container, "c9")),
			])
			.await
			.unwrap();

		let bundle = recv_within(&mut sub, 1000).await.unwrap();
		assert_eq!(bundle.events.len(), 1);
		assert_eq!(bundle.events[0].event_type, EventType::Unset);
		assert_eq!(bundle.events[0].sources, vec!["runtime".to_string()]);
		assert!(bundle.events[0].entity.is_bare_id());
		bundle.acknowledge();
		assert!(store.get_container("c9").await.unwrap_err().is_not_found());

		// Another source taking over while the first leaves keeps the entity.
		store
			.notify(vec![CollectorEvent::set("runtime", container("c1", "web"))])
			.await
			.unwrap();
		recv_within(&mut sub, 1000).await.unwrap().acknowledge();

		store
			.notify(vec![
				CollectorEvent::set("orchestrator", container("c1", "api")),
				CollectorEvent::unset("runtime", EntityId::new(Kind::Container, "c1")),
			])
			.await
			.unwrap();

		let bundle = recv_within(&mut sub, 1000).await.unwrap();
		assert_eq!(bundle.events.len(), 1);
		assert_eq!(bundle.events[0].event_type, EventType::Set);
		assert_eq!(bundle.events[0].sources, vec!["orchestrator".to_string()]);
		bundle.acknowledge();
		assert_eq!(store.get_container("c1").await.unwrap().meta.name, "api");
	}

	/// Dropping a bundle counts as acknowledging it.
	#[tokio::test]
	async fn test_dropped_bundle_releases_the_next() {
		let store = started_store();
		let mut sub = store.subscribe("consumer", Filter::new()).await.unwrap();

		store
			.notify(vec![CollectorEvent::set("runtime", container("c1", ""))])
			.await
			.unwrap();
		store
			.notify(vec![CollectorEvent::set("runtime", container("c2", ""))])
			.await
			.unwrap();

		drop(recv_within(&mut sub, 1000).await.unwrap());
		let next = recv_within(&mut sub, 1000).await.unwrap();
		assert_eq!(bundle_ids(&next), vec!["c2".to_string()]);
	}

	/// Unsubscribing while a bundle is in flight neither blocks the store
	/// nor the other subscribers.
	#[tokio::test]
	async fn test_unsubscribe_with_bundle_in_flight() {
		let store = started_store();
		let mut leaving = store.subscribe("leaving", Filter::new()).await.unwrap();
		let mut staying = store.subscribe("staying", Filter::new()).await.unwrap();

		store
			.notify(vec![CollectorEvent::set("runtime", container("c1", ""))])
			.await
			.unwrap();
		let in_flight = recv_within(&mut leaving, 1000).await.unwrap();

		store.unsubscribe(leaving).await;
		assert_eq!(store.metrics().subscribers.get(), 1);

		store
			.notify(vec![CollectorEvent::set("runtime", container("c2", ""))])
			.await
			.unwrap();
		in_flight.acknowledge();

		let first = recv_within(&mut staying, 1000).await.unwrap();
		first.acknowledge();
		let second = recv_within(&mut staying, 1000).await.unwrap();
		assert_eq!(bundle_ids(&second), vec!["c2".to_string()]);
	}

	/// A subscriber sitting on a bundle past the deadline is dropped and its
	/// queue closes.
	#[tokio::test]
	async fn test_delivery_timeout_drops_subscriber() {
		let store = started_store_with(StoreSettings {
			delivery_timeout: Some(Duration::from_millis(50)),
			..StoreSettings::default()
		});
		let mut sub = store.subscribe("stuck", Filter::new()).await.unwrap();

		store
			.notify(vec![CollectorEvent::set("runtime", container("c1", ""))])
			.await
			.unwrap();
		let held = recv_within(&mut sub, 1000).await.unwrap();

		tokio::time::sleep(Duration::from_millis(200)).await;
		assert_eq!(store.metrics().delivery_timeouts.get(), 1);
		assert!(recv_within(&mut sub, 200).await.is_none());

		// The next notify notices the closed queue and forgets the subscriber.
		store
			.notify(vec![CollectorEvent::set("runtime", container("c2", ""))])
			.await
			.unwrap();
		assert_eq!(store.metrics().subscribers.get(), 0);
		drop(held);
	}

	#[tokio::test]
	async fn test_shutdown_closes_subscriptions() {
		let store = started_store();
		let mut sub = store.subscribe("consumer", Filter::new()).await.unwrap();

		store.shutdown().await;
		assert!(sub.recv().await.is_none());
		assert!(store.subscribe("late", Filter::new()).await.is_err());
	}
}
