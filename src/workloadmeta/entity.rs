use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use super::container::Container;
use super::ecs::EcsTask;
use super::error::StoreError;
use super::merge::GapFill;
use super::pod::KubernetesPod;

/// Kind of a workload tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
	Container,
	KubernetesPod,
	EcsTask,
}

impl Kind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Kind::Container => "container",
			Kind::KubernetesPod => "kubernetes_pod",
			Kind::EcsTask => "ecs_task",
		}
	}

	/// Parse a kind name as written by `as_str`.
	pub fn from_name(name: &str) -> Option<Self> {
		match name.to_lowercase().as_str() {
			"container" => Some(Kind::Container),
			"kubernetes_pod" | "pod" => Some(Kind::KubernetesPod),
			"ecs_task" | "task" => Some(Kind::EcsTask),
			_ => None,
		}
	}
}

impl fmt::Display for Kind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Identity of an entity. Unique per logical workload and used as the map
/// key inside the store. A bare `EntityId` also stands in for an entity in
/// removal events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
	pub kind: Kind,
	pub id: String,
}

impl EntityId {
	pub fn new(kind: Kind, id: impl Into<String>) -> Self {
		Self {
			kind,
			id: id.into(),
		}
	}

	pub fn render(&self, _verbose: bool) -> String {
		format!("Kind: {} ID: {}\n", self.kind, self.id)
	}
}

impl fmt::Display for EntityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.kind, self.id)
	}
}

/// Generic metadata shared by every entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMeta {
	pub name: String,
	pub namespace: String,
	pub annotations: BTreeMap<String, String>,
	pub labels: BTreeMap<String, String>,
}

impl EntityMeta {
	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();
		let _ = writeln!(sb, "Name: {}", self.name);
		let _ = writeln!(sb, "Namespace: {}", self.namespace);

		if verbose {
			let _ = writeln!(sb, "Annotations: {}", map_to_string(&self.annotations));
			let _ = writeln!(sb, "Labels: {}", map_to_string(&self.labels));
		}

		sb
	}
}

impl GapFill for EntityMeta {
	fn gap_fill(&mut self, other: &Self) {
		self.name.gap_fill(&other.name);
		self.namespace.gap_fill(&other.namespace);
		self.annotations.gap_fill(&other.annotations);
		self.labels.gap_fill(&other.labels);
	}
}

/// An item in the metadata store.
///
/// `Id` is the bare identity carried by `Unset` collector events and by
/// removal events; it never lives inside the store and cannot be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
	Container(Container),
	KubernetesPod(KubernetesPod),
	EcsTask(EcsTask),
	Id(EntityId),
}

impl Entity {
	pub fn id(&self) -> &EntityId {
		match self {
			Entity::Container(c) => &c.id,
			Entity::KubernetesPod(p) => &p.id,
			Entity::EcsTask(t) => &t.id,
			Entity::Id(id) => id,
		}
	}

	/// Kind implied by the variant. For a bare id this is the id's kind.
	pub fn kind(&self) -> Kind {
		match self {
			Entity::Container(_) => Kind::Container,
			Entity::KubernetesPod(_) => Kind::KubernetesPod,
			Entity::EcsTask(_) => Kind::EcsTask,
			Entity::Id(id) => id.kind,
		}
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			Entity::Container(_) => "Container",
			Entity::KubernetesPod(_) => "KubernetesPod",
			Entity::EcsTask(_) => "EcsTask",
			Entity::Id(_) => "EntityId",
		}
	}

	pub fn is_bare_id(&self) -> bool {
		matches!(self, Entity::Id(_))
	}

	/// Fill the zero-valued fields of `self` from `other`. Both sides must be
	/// the same concrete kind; on a mismatch neither side is touched.
	pub fn merge(&mut self, other: &Entity) -> Result<(), StoreError> {
		match (self, other) {
			(Entity::Container(a), Entity::Container(b)) => a.gap_fill(b),
			(Entity::KubernetesPod(a), Entity::KubernetesPod(b)) => a.gap_fill(b),
			(Entity::EcsTask(a), Entity::EcsTask(b)) => a.gap_fill(b),
			(this, other) => {
				return Err(StoreError::KindMismatch {
					expected: this.type_name().to_string(),
					found: other.type_name().to_string(),
				});
			}
		}

		Ok(())
	}

	/// Every variant owns its data outright, so a clone shares nothing with
	/// the original.
	pub fn deep_copy(&self) -> Entity {
		self.clone()
	}

	pub fn render(&self, verbose: bool) -> String {
		match self {
			Entity::Container(c) => c.render(verbose),
			Entity::KubernetesPod(p) => p.render(verbose),
			Entity::EcsTask(t) => t.render(verbose),
			Entity::Id(id) => id.render(verbose),
		}
	}

	/// Check that the embedded id agrees with the variant and is not empty.
	pub fn validate(&self) -> Result<(), StoreError> {
		let id = self.id();
		if id.kind != self.kind() {
			return Err(StoreError::ProgrammingError(format!(
				"{} carries an id of kind {} ({})",
				self.type_name(),
				id.kind,
				id.id
			)));
		}
		if id.id.is_empty() {
			return Err(StoreError::ProgrammingError(format!(
				"{} has an empty id",
				self.type_name()
			)));
		}
		Ok(())
	}

	pub fn into_container(self) -> Option<Container> {
		match self {
			Entity::Container(c) => Some(c),
			_ => None,
		}
	}

	pub fn into_kubernetes_pod(self) -> Option<KubernetesPod> {
		match self {
			Entity::KubernetesPod(p) => Some(p),
			_ => None,
		}
	}

	pub fn into_ecs_task(self) -> Option<EcsTask> {
		match self {
			Entity::EcsTask(t) => Some(t),
			_ => None,
		}
	}
}

impl From<Container> for Entity {
	fn from(c: Container) -> Self {
		Entity::Container(c)
	}
}

impl From<KubernetesPod> for Entity {
	fn from(p: KubernetesPod) -> Self {
		Entity::KubernetesPod(p)
	}
}

impl From<EcsTask> for Entity {
	fn from(t: EcsTask) -> Self {
		Entity::EcsTask(t)
	}
}

impl From<EntityId> for Entity {
	fn from(id: EntityId) -> Self {
		Entity::Id(id)
	}
}

pub(crate) fn section(sb: &mut String, title: &str) {
	let _ = writeln!(sb, "----------- {} -----------", title);
}

pub(crate) fn map_to_string(m: &BTreeMap<String, String>) -> String {
	m.iter()
		.map(|(k, v)| format!("{}:{}", k, v))
		.collect::<Vec<_>>()
		.join(" ")
}

pub(crate) fn slice_to_string(s: &[String]) -> String {
	s.join(" ")
}

pub(crate) fn opt_to_string<T: fmt::Display>(v: &Option<T>) -> String {
	v.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::workloadmeta::container::ContainerState;

	fn container(id: &str) -> Entity {
		Entity::Container(Container::new(id))
	}

	#[test]
	fn merge_across_kinds_fails_without_mutation() {
		let mut a = container("c1");
		let b = Entity::KubernetesPod(KubernetesPod::new("p1"));
		let before = a.clone();

		let err = a.merge(&b).unwrap_err();
		assert!(matches!(err, StoreError::KindMismatch { .. }));
		assert!(err.to_string().contains("Container"));
		assert_eq!(a, before);
	}

	#[test]
	fn bare_id_cannot_merge() {
		let mut id: Entity = EntityId::new(Kind::Container, "c1").into();
		assert!(id.merge(&container("c1")).is_err());

		let mut c = container("c1");
		assert!(c.merge(&EntityId::new(Kind::Container, "c1").into()).is_err());
	}

	#[test]
	fn deep_copy_is_isolated() {
		let mut original = Container::new("c1");
		original.meta.labels.insert("app".into(), "web".into());
		let original = Entity::Container(original);

		let mut copy = original.deep_copy();
		if let Entity::Container(c) = &mut copy {
			c.meta.labels.insert("app".into(), "db".into());
			c.state = ContainerState {
				running: Some(true),
				..Default::default()
			};
		}

		let Entity::Container(c) = &original else {
			panic!("variant changed");
		};
		assert_eq!(c.meta.labels.get("app").map(String::as_str), Some("web"));
		assert_eq!(c.state.running, None);
	}

	#[test]
	fn validate_rejects_kind_disagreement() {
		let mut c = Container::new("c1");
		c.id.kind = Kind::EcsTask;
		let err = Entity::Container(c).validate().unwrap_err();
		assert!(matches!(err, StoreError::ProgrammingError(_)));

		assert!(container("").validate().is_err());
		assert!(container("c1").validate().is_ok());
	}

	#[test]
	fn kind_names_round_trip() {
		for kind in [Kind::Container, Kind::KubernetesPod, Kind::EcsTask] {
			assert_eq!(Kind::from_name(kind.as_str()), Some(kind));
		}
		assert_eq!(Kind::from_name("vm"), None);
	}

	#[test]
	fn meta_render_hides_labels_unless_verbose() {
		let mut meta = EntityMeta {
			name: "web".into(),
			namespace: "prod".into(),
			..Default::default()
		};
		meta.labels.insert("app".into(), "web".into());

		assert!(!meta.render(false).contains("Labels"));
		assert!(meta.render(true).contains("Labels: app:web"));
	}
}
