use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::container::ContainerImage;
use super::entity::{
	EntityId, EntityMeta, Kind, map_to_string, opt_to_string, section, slice_to_string,
};
use super::merge::GapFill;

/// Reference to a container with orchestrator-specific data attached to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorContainer {
	pub id: String,
	pub name: String,
	pub image: ContainerImage,
}

impl OrchestratorContainer {
	pub fn render(&self, _verbose: bool) -> String {
		format!("Name: {} ID: {}\n", self.name, self.id)
	}
}

/// Owner extracted from a pod's owner references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesPodOwner {
	pub kind: String,
	pub name: String,
	pub id: String,
}

impl KubernetesPodOwner {
	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();
		let _ = writeln!(sb, "Kind: {} Name: {}", self.kind, self.name);

		if verbose {
			let _ = writeln!(sb, "ID: {}", self.id);
		}

		sb
	}
}

/// A Kubernetes pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesPod {
	pub id: EntityId,
	pub meta: EntityMeta,
	pub owners: Vec<KubernetesPodOwner>,
	pub persistent_volume_claim_names: Vec<String>,
	pub containers: Vec<OrchestratorContainer>,
	pub ready: Option<bool>,
	pub phase: String,
	pub ip: String,
	pub priority_class: String,
	pub kube_services: Vec<String>,
	pub namespace_labels: BTreeMap<String, String>,
}

impl Default for KubernetesPod {
	fn default() -> Self {
		Self::new("")
	}
}

impl KubernetesPod {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: EntityId::new(Kind::KubernetesPod, id),
			meta: EntityMeta::default(),
			owners: Vec::new(),
			persistent_volume_claim_names: Vec::new(),
			containers: Vec::new(),
			ready: None,
			phase: String::new(),
			ip: String::new(),
			priority_class: String::new(),
			kube_services: Vec::new(),
			namespace_labels: BTreeMap::new(),
		}
	}

	/// Ids of the containers this pod references, skipping blank ones.
	pub fn container_ids(&self) -> impl Iterator<Item = &str> {
		self.containers
			.iter()
			.map(|c| c.id.as_str())
			.filter(|id| !id.is_empty())
	}

	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();

		section(&mut sb, "Entity ID");
		sb.push_str(&self.id.render(verbose));

		section(&mut sb, "Entity Meta");
		sb.push_str(&self.meta.render(verbose));

		if !self.owners.is_empty() {
			section(&mut sb, "Owners");
			for o in &self.owners {
				sb.push_str(&o.render(verbose));
			}
		}

		if !self.containers.is_empty() {
			section(&mut sb, "Containers");
			for c in &self.containers {
				sb.push_str(&c.render(verbose));
			}
		}

		section(&mut sb, "Pod Info");
		let _ = writeln!(sb, "Ready: {}", opt_to_string(&self.ready));
		let _ = writeln!(sb, "Phase: {}", self.phase);
		let _ = writeln!(sb, "IP: {}", self.ip);

		if verbose {
			let _ = writeln!(sb, "Priority Class: {}", self.priority_class);
			let _ = writeln!(
				sb,
				"PVCs: {}",
				slice_to_string(&self.persistent_volume_claim_names)
			);
			let _ = writeln!(sb, "Kube Services: {}", slice_to_string(&self.kube_services));
			let _ = writeln!(
				sb,
				"Namespace Labels: {}",
				map_to_string(&self.namespace_labels)
			);
		}

		sb
	}
}

impl GapFill for KubernetesPod {
	fn gap_fill(&mut self, other: &Self) {
		self.meta.gap_fill(&other.meta);
		self.owners.gap_fill(&other.owners);
		self.persistent_volume_claim_names
			.gap_fill(&other.persistent_volume_claim_names);
		self.containers.gap_fill(&other.containers);
		self.ready.gap_fill(&other.ready);
		self.phase.gap_fill(&other.phase);
		self.ip.gap_fill(&other.ip);
		self.priority_class.gap_fill(&other.priority_class);
		self.kube_services.gap_fill(&other.kube_services);
		self.namespace_labels.gap_fill(&other.namespace_labels);
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	fn pod_with_containers(id: &str, containers: &[&str]) -> KubernetesPod {
		let mut pod = KubernetesPod::new(id);
		pod.containers = containers
			.iter()
			.map(|c| OrchestratorContainer {
				id: c.to_string(),
				name: format!("{}-name", c),
				..Default::default()
			})
			.collect();
		pod
	}

	#[test]
	fn container_ids_skip_blanks() {
		let pod = pod_with_containers("p1", &["c1", "", "c2"]);
		assert_eq!(pod.container_ids().collect::<Vec<_>>(), vec!["c1", "c2"]);
	}

	#[test]
	fn gap_fill_takes_lists_only_when_empty() {
		let mut a = pod_with_containers("p1", &["c1"]);
		a.ready = Some(false);
		let mut b = pod_with_containers("p1", &["c9"]);
		b.ready = Some(true);
		b.phase = "Running".into();
		b.kube_services = vec!["frontend".into()];

		a.gap_fill(&b);
		assert_eq!(a.containers.len(), 1);
		assert_eq!(a.containers[0].id, "c1");
		assert_eq!(a.ready, Some(false));
		assert_eq!(a.phase, "Running");
		assert_eq!(a.kube_services, vec!["frontend".to_string()]);
	}

	#[test]
	fn render_sections() {
		let mut pod = pod_with_containers("p1", &["c1"]);
		pod.owners.push(KubernetesPodOwner {
			kind: "ReplicaSet".into(),
			name: "web-5d8".into(),
			id: "uid-1".into(),
		});
		pod.priority_class = "high".into();

		let short = pod.render(false);
		assert!(short.contains("----------- Owners -----------"));
		assert!(short.contains("Kind: ReplicaSet Name: web-5d8"));
		assert!(short.contains("Name: c1-name ID: c1"));
		assert!(!short.contains("uid-1"));
		assert!(!short.contains("Priority Class"));

		let long = pod.render(true);
		assert!(long.contains("ID: uid-1"));
		assert!(long.contains("Priority Class: high"));
	}
}
