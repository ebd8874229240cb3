mod common;

use std::io::Write;

use vanopticon_huginn::replay;
use vanopticon_huginn::workloadmeta::{CollectorEvent, EcsTask, EntityId, Kind};

use common::{container, started_store};

#[cfg(feature = "integration-tests")]
mod integration_tests {
	use super::*;

	const EVENTS: &str = r#"
# recorded on a kubernetes node
{"type":"set","source":"runtime","entity":{"container":{"id":{"kind":"container","id":"c1"},"meta":{"name":"web"},"image":{"name":"nginx","tag":"1.25"},"state":{"running":false}}}}
{"type":"set","source":"kubelet","entity":{"container":{"id":{"kind":"container","id":"c1"},"meta":{"namespace":"prod"},"state":{"running":true}}}}
{"type":"set","source":"kubelet","entity":{"kubernetes_pod":{"id":{"kind":"kubernetes_pod","id":"p1"},"meta":{"name":"web-0"},"containers":[{"id":"c1","name":"web"}],"phase":"Running"}}}
"#;

	/// Replaying a recorded capture rebuilds the same store content.
	#[tokio::test]
	async fn test_replay_file_then_dump() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(EVENTS.as_bytes()).unwrap();

		let batch = replay::read_file(file.path()).unwrap();
		assert_eq!(batch.len(), 3);

		let store = started_store();
		store.notify(batch).await.unwrap();

		let c1 = store.get_container("c1").await.unwrap();
		assert_eq!(c1.meta.name, "web");
		assert_eq!(c1.meta.namespace, "prod");
		assert_eq!(c1.state.running, Some(false));

		let owner = store.get_kubernetes_pod_for_container("c1").await.unwrap();
		assert_eq!(owner.meta.name, "web-0");

		let dump = store.dump(false).await;
		let containers = &dump.entities["container"];
		assert_eq!(containers.infos.len(), 1);
		let info = &containers.infos["sources(merged):[runtime kubelet] id: c1"];
		assert!(info.contains("Name: web"));
		assert!(info.contains("Running: false"));

		let text = dump.to_text();
		assert!(text.contains("=== Entity container sources(merged):[runtime kubelet] id: c1 ==="));
		assert!(text.contains("=== Entity kubernetes_pod sources(merged):[kubelet] id: p1 ==="));
	}

	/// Verbose dumps list each source next to the merged entry, but only for
	/// entities with more than one source.
	#[tokio::test]
	async fn test_verbose_dump_lists_each_source() {
		let store = started_store();
		store
			.notify(vec![
				CollectorEvent::set("runtime", container("c1", "web")),
				CollectorEvent::set("orchestrator", container("c1", "")),
				CollectorEvent::set("runtime", container("c2", "db")),
			])
			.await
			.unwrap();

		let dump = store.dump(true).await;
		let infos = &dump.entities["container"].infos;
		let keys: Vec<&str> = infos.keys().map(String::as_str).collect();
		assert_eq!(
			keys,
			vec![
				"source:orchestrator id: c1",
				"source:runtime id: c1",
				"sources(merged):[runtime orchestrator] id: c1",
				"sources(merged):[runtime] id: c2",
			]
		);
		assert!(!infos["source:orchestrator id: c1"].contains("Name: web"));
		assert!(infos["sources(merged):[runtime orchestrator] id: c1"].contains("Name: web"));

		let json = serde_json::to_value(&dump).unwrap();
		assert!(json["entities"]["container"]["infos"]["source:runtime id: c1"].is_string());
	}

	/// Kinds whose last entity was removed do not show up in the dump.
	#[tokio::test]
	async fn test_dump_skips_emptied_kinds() {
		let store = started_store();
		store
			.notify(vec![
				CollectorEvent::set("runtime", container("c1", "web")),
				CollectorEvent::set("ecs", EcsTask::new("t1")),
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

		let dump = store.dump(true).await;
		assert!(!dump.entities.contains_key("container"));
		assert_eq!(dump.entities["ecs_task"].infos.len(), 1);
	}

	#[test]
	fn test_malformed_line_reports_its_number() {
		let err = replay::decode_ndjson("\n{\"type\":\"set\"}\n").unwrap_err();
		assert!(err.to_string().contains("line 2"));
	}
}
