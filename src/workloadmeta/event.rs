use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityId, Kind};

/// Whether an event creates/updates an entity or removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
	Set,
	Unset,
}

/// A single observation reported by one collector.
///
/// `Set` carries the collector's full view of the entity. `Unset` removes the
/// collector's view and usually carries a bare `Entity::Id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorEvent {
	#[serde(rename = "type")]
	pub event_type: EventType,
	pub source: String,
	pub entity: Entity,
}

impl CollectorEvent {
	pub fn set(source: impl Into<String>, entity: impl Into<Entity>) -> Self {
		Self {
			event_type: EventType::Set,
			source: source.into(),
			entity: entity.into(),
		}
	}

	pub fn unset(source: impl Into<String>, id: EntityId) -> Self {
		Self {
			event_type: EventType::Unset,
			source: source.into(),
			entity: Entity::Id(id),
		}
	}
}

/// A change produced by the store for its subscribers.
///
/// For `Set`, `entity` is the merged composite and `sources` lists every
/// contributing source. For `Unset`, `entity` is the bare id of the removed
/// entity and `sources` names the sources whose removal emptied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
	pub event_type: EventType,
	pub sources: Vec<String>,
	pub entity: Entity,
}

impl Event {
	pub fn kind(&self) -> Kind {
		self.entity.kind()
	}

	pub fn id(&self) -> &EntityId {
		self.entity.id()
	}
}
