use indexmap::IndexMap;

use super::entity::{Entity, EntityId};
use super::error::StoreError;

/// Every source's current view of one logical entity.
///
/// Entries keep first-writer order: a source that re-reports keeps its slot,
/// a source that is unset loses it. That order, optionally overridden by an
/// explicit priority list, decides which source wins a field when two
/// sources disagree.
#[derive(Debug, Clone)]
pub struct SourceEntities {
	id: EntityId,
	entries: IndexMap<String, Entity>,
}

impl SourceEntities {
	pub fn new(id: EntityId) -> Self {
		Self {
			id,
			entries: IndexMap::new(),
		}
	}

	pub fn id(&self) -> &EntityId {
		&self.id
	}

	/// Insert or replace the view reported by `source`.
	pub fn set(&mut self, source: &str, entity: Entity) -> Result<(), StoreError> {
		if entity.is_bare_id() {
			return Err(StoreError::ProgrammingError(format!(
				"source {} tried to set a bare id for {}",
				source, self.id
			)));
		}
		if entity.kind() != self.id.kind {
			return Err(StoreError::KindMismatch {
				expected: self.id.kind.to_string(),
				found: entity.type_name().to_string(),
			});
		}
		if entity.id() != &self.id {
			return Err(StoreError::ProgrammingError(format!(
				"source {} reported {} into the ledger of {}",
				source,
				entity.id(),
				self.id
			)));
		}

		self.entries.insert(source.to_string(), entity);
		Ok(())
	}

	/// Remove the view reported by `source`. Returns whether it was present.
	pub fn unset(&mut self, source: &str) -> bool {
		self.entries.shift_remove(source).is_some()
	}

	pub fn get(&self, source: &str) -> Option<&Entity> {
		self.entries.get(source)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Contributing sources in first-writer order.
	pub fn sources(&self) -> Vec<String> {
		self.entries.keys().cloned().collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Entity)> {
		self.entries.iter().map(|(s, e)| (s.as_str(), e))
	}

	/// Sources in merge order: prioritized sources first, in list order, then
	/// everything else in first-writer order.
	pub fn merge_order(&self, priority: Option<&[String]>) -> Vec<&str> {
		let mut order: Vec<&str> = Vec::with_capacity(self.entries.len());

		if let Some(priority) = priority {
			for source in priority {
				if let Some((key, _)) = self.entries.get_key_value(source.as_str()) {
					if !order.contains(&key.as_str()) {
						order.push(key.as_str());
					}
				}
			}
		}

		for key in self.entries.keys() {
			if !order.contains(&key.as_str()) {
				order.push(key.as_str());
			}
		}

		order
	}

	/// Fold every source's view into one freshly owned composite. The first
	/// source in merge order wins any field it sets.
	pub fn merge(&self, priority: Option<&[String]>) -> Result<Entity, StoreError> {
		let order = self.merge_order(priority);
		let mut sources = order.into_iter().filter_map(|s| self.entries.get(s));

		let Some(first) = sources.next() else {
			return Err(StoreError::ProgrammingError(format!(
				"ledger of {} is empty",
				self.id
			)));
		};

		let mut merged = first.deep_copy();
		for entity in sources {
			merged.merge(entity)?;
		}

		Ok(merged)
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::workloadmeta::container::Container;
	use crate::workloadmeta::entity::Kind;
	use crate::workloadmeta::pod::KubernetesPod;

	fn ledger() -> SourceEntities {
		SourceEntities::new(EntityId::new(Kind::Container, "c1"))
	}

	fn container(f: impl FnOnce(&mut Container)) -> Entity {
		let mut c = Container::new("c1");
		f(&mut c);
		Entity::Container(c)
	}

	#[test]
	fn single_source_passes_through() {
		let mut l = ledger();
		let c = container(|c| {
			c.hostname = "web-1".into();
			c.pid = Some(12);
		});
		l.set("runtime", c.clone()).unwrap();

		assert_eq!(l.merge(None).unwrap(), c);
	}

	#[test]
	fn first_writer_wins_conflicts() {
		let mut l = ledger();
		l.set("runtime", container(|c| c.state.running = Some(false)))
			.unwrap();
		l.set(
			"orchestrator",
			container(|c| {
				c.state.running = Some(true);
				c.meta.namespace = "ns".into();
			}),
		)
		.unwrap();

		let Entity::Container(merged) = l.merge(None).unwrap() else {
			panic!("expected a container");
		};
		assert_eq!(merged.state.running, Some(false));
		assert_eq!(merged.meta.namespace, "ns");
	}

	#[test]
	fn priority_overrides_first_writer() {
		let mut l = ledger();
		l.set("runtime", container(|c| c.hostname = "from-runtime".into()))
			.unwrap();
		l.set("kubelet", container(|c| c.hostname = "from-kubelet".into()))
			.unwrap();

		let priority = vec!["kubelet".to_string(), "unknown".to_string()];
		assert_eq!(l.merge_order(Some(priority.as_slice())), vec!["kubelet", "runtime"]);

		let Entity::Container(merged) = l.merge(Some(priority.as_slice())).unwrap() else {
			panic!("expected a container");
		};
		assert_eq!(merged.hostname, "from-kubelet");
	}

	#[test]
	fn merge_is_idempotent_and_detached() {
		let mut l = ledger();
		l.set("runtime", container(|c| c.hostname = "a".into()))
			.unwrap();
		l.set("kubelet", container(|c| c.pid = Some(3))).unwrap();

		let mut first = l.merge(None).unwrap();
		let second = l.merge(None).unwrap();
		assert_eq!(first, second);

		if let Entity::Container(c) = &mut first {
			c.hostname = "mutated".into();
		}
		let Some(Entity::Container(stored)) = l.get("runtime") else {
			panic!("runtime view missing");
		};
		assert_eq!(stored.hostname, "a");
	}

	#[test]
	fn reset_keeps_slot_and_unset_drops_it() {
		let mut l = ledger();
		l.set("a", container(|_| {})).unwrap();
		l.set("b", container(|_| {})).unwrap();
		l.set("a", container(|c| c.hostname = "again".into()))
			.unwrap();
		assert_eq!(l.sources(), vec!["a".to_string(), "b".to_string()]);

		assert!(l.unset("a"));
		assert!(!l.unset("a"));
		assert_eq!(l.sources(), vec!["b".to_string()]);
		assert!(l.unset("b"));
		assert!(l.is_empty());
		assert!(l.merge(None).is_err());
	}

	#[test]
	fn set_rejects_foreign_entities() {
		let mut l = ledger();
		let err = l
			.set("kubelet", Entity::KubernetesPod(KubernetesPod::new("c1")))
			.unwrap_err();
		assert!(matches!(err, StoreError::KindMismatch { .. }));

		let err = l
			.set("runtime", Entity::Container(Container::new("c2")))
			.unwrap_err();
		assert!(matches!(err, StoreError::ProgrammingError(_)));

		let err = l
			.set("runtime", Entity::Id(EntityId::new(Kind::Container, "c1")))
			.unwrap_err();
		assert!(matches!(err, StoreError::ProgrammingError(_)));
		assert!(l.is_empty());
	}
}
