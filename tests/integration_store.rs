mod common;

use std::collections::BTreeMap;

use vanopticon_huginn::workloadmeta::{
	CollectorEvent, EcsTask, EntityId, Kind, StoreError, StoreSettings,
};

use common::{container, pod, started_store, started_store_with};

#[cfg(feature = "integration-tests")]
mod integration_tests {
	use super::*;

	/// The runtime reports first, so its fields win; the orchestrator only
	/// fills what the runtime left empty.
	#[tokio::test]
	async fn test_runtime_and_orchestrator_views_merge() {
		let store = started_store();

		let mut runtime = container("c1", "web");
		runtime.state.running = Some(false);
		runtime.pid = Some(42);

		let mut orchestrator = container("c1", "");
		orchestrator.state.running = Some(true);
		orchestrator.meta.namespace = "prod".into();
		orchestrator.meta.labels = BTreeMap::from([("app".to_string(), "web".to_string())]);

		store
			.notify(vec![CollectorEvent::set("runtime", runtime)])
			.await
			.unwrap();
		store
			.notify(vec![CollectorEvent::set("orchestrator", orchestrator)])
			.await
			.unwrap();

		let merged = store.get_container("c1").await.unwrap();
		assert_eq!(merged.meta.name, "web");
		assert_eq!(merged.meta.namespace, "prod");
		assert_eq!(merged.state.running, Some(false));
		assert_eq!(merged.pid, Some(42));
		assert_eq!(merged.meta.labels["app"], "web");

		assert_eq!(
			store
				.sources_of(&EntityId::new(Kind::Container, "c1"))
				.await
				.unwrap(),
			vec!["runtime".to_string(), "orchestrator".to_string()]
		);
	}

	/// A configured priority list overrides first-writer order.
	#[tokio::test]
	async fn test_source_priority_overrides_arrival_order() {
		let store = started_store_with(StoreSettings {
			source_priority: vec!["orchestrator".into()],
			..StoreSettings::default()
		});

		let mut runtime = container("c1", "from-runtime");
		runtime.state.running = Some(false);
		let mut orchestrator = container("c1", "from-orchestrator");
		orchestrator.state.running = Some(true);

		store
			.notify(vec![
				CollectorEvent::set("runtime", runtime),
				CollectorEvent::set("orchestrator", orchestrator),
			])
			.await
			.unwrap();

		let merged = store.get_container("c1").await.unwrap();
		assert_eq!(merged.meta.name, "from-orchestrator");
		assert_eq!(merged.state.running, Some(true));
	}

	/// The entity disappears only once every source has unset it.
	#[tokio::test]
	async fn test_unset_from_every_source_removes_entity() {
		let store = started_store();
		let id = EntityId::new(Kind::Container, "c1");

		store
			.notify(vec![
				CollectorEvent::set("runtime", container("c1", "web")),
				CollectorEvent::set("orchestrator", container("c1", "")),
			])
			.await
			.unwrap();

		store
			.notify(vec![CollectorEvent::unset("runtime", id.clone())])
			.await
			.unwrap();
		let remaining = store.get_container("c1").await.unwrap();
		assert_eq!(remaining.meta.name, "");

		store
			.notify(vec![CollectorEvent::unset("orchestrator", id.clone())])
			.await
			.unwrap();
		let err = store.get_container("c1").await.unwrap_err();
		assert!(err.is_not_found());
		assert_eq!(
			err,
			StoreError::NotFound {
				kind: Kind::Container,
				id: "c1".into()
			}
		);
		assert!(store.sources_of(&id).await.is_none());
	}

	/// Same id, different kind: the entities never collide.
	#[tokio::test]
	async fn test_lookups_are_kind_safe() {
		let store = started_store();
		store
			.notify(vec![
				CollectorEvent::set("runtime", container("shared", "web")),
				CollectorEvent::set("ecs", EcsTask::new("shared")),
			])
			.await
			.unwrap();

		assert!(store.get_container("shared").await.is_ok());
		assert!(store.get_ecs_task("shared").await.is_ok());
		assert!(store
			.get_kubernetes_pod("shared")
			.await
			.unwrap_err()
			.is_not_found());

		let mut mislabelled = pod("p1", &[]);
		mislabelled.id.kind = Kind::Container;
		let err = store
			.notify(vec![CollectorEvent::set("kubelet", mislabelled)])
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::ProgrammingError(_)));
	}

	/// Callers get their own copy; mutating it leaves the store untouched.
	#[tokio::test]
	async fn test_get_returns_an_independent_copy() {
		let store = started_store();
		let mut c = container("c1", "web");
		c.meta.labels.insert("tier".into(), "front".into());
		store
			.notify(vec![CollectorEvent::set("runtime", c)])
			.await
			.unwrap();

		let mut copy = store.get_container("c1").await.unwrap();
		copy.meta.name = "tampered".into();
		copy.meta.labels.clear();

		let fresh = store.get_container("c1").await.unwrap();
		assert_eq!(fresh.meta.name, "web");
		assert_eq!(fresh.meta.labels["tier"], "front");
	}

	/// When two pods claim a container, the lowest pod id answers.
	#[tokio::test]
	async fn test_pod_for_container_prefers_lowest_pod_id() {
		let store = started_store();
		store
			.notify(vec![
				CollectorEvent::set("kubelet", pod("pod-b", &["c1"])),
				CollectorEvent::set("kubelet", pod("pod-a", &["c1", "c2"])),
			])
			.await
			.unwrap();

		let owner = store.get_kubernetes_pod_for_container("c1").await.unwrap();
		assert_eq!(owner.id.id, "pod-a");

		store
			.notify(vec![CollectorEvent::unset(
				"kubelet",
				EntityId::new(Kind::KubernetesPod, "pod-a"),
			)])
			.await
			.unwrap();
		let owner = store.get_kubernetes_pod_for_container("c1").await.unwrap();
		assert_eq!(owner.id.id, "pod-b");
		assert!(store.get_kubernetes_pod_for_container("c2").await.is_err());
	}

	#[tokio::test]
	async fn test_metrics_track_batches_and_entities() {
		let store = started_store();
		store
			.notify(vec![
				CollectorEvent::set("runtime", container("c1", "a")),
				CollectorEvent::set("runtime", container("c2", "b")),
				CollectorEvent::set("kubelet", pod("p1", &["c1"])),
			])
			.await
			.unwrap();

		let metrics = store.metrics();
		assert_eq!(metrics.notify_batches.get(), 1);
		assert_eq!(metrics.collector_events.get(), 3);
		assert_eq!(metrics.events_emitted.get(), 3);
		assert_eq!(metrics.entities.get(), 3);
		assert!(metrics.encode().contains("huginn_store_entities 3"));
	}
}
