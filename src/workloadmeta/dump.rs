use std::collections::BTreeMap;
use std::io;

use log::debug;
use serde::{Deserialize, Serialize};

use super::entity::{Entity, Kind};
use super::error::StoreError;
use super::ledger::SourceEntities;
use super::store::Store;

/// Snapshot of the store content for the CLI and debug bundles. Meant to be
/// read by humans; the descriptors are not a stable schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDumpResponse {
	pub entities: BTreeMap<String, WorkloadEntity>,
}

/// Rendered entities of one kind, keyed by descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadEntity {
	pub infos: BTreeMap<String, String>,
}

impl WorkloadDumpResponse {
	/// Write one block per entity.
	pub fn write<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
		for (kind, entities) in &self.entities {
			for (descriptor, info) in &entities.infos {
				write!(writer, "\n=== Entity {} {} ===\n", kind, descriptor)?;
				write!(writer, "{}", info)?;
				writeln!(writer, "===")?;
			}
		}
		Ok(())
	}

	pub fn to_text(&self) -> String {
		let mut buf = Vec::new();
		// Writing into a Vec cannot fail.
		let _ = self.write(&mut buf);
		String::from_utf8_lossy(&buf).into_owned()
	}
}

fn render(entity: &Entity, verbose: bool) -> Result<String, StoreError> {
	if entity.is_bare_id() {
		return Err(StoreError::KindMismatch {
			expected: "a concrete entity".to_string(),
			found: entity.type_name().to_string(),
		});
	}
	Ok(entity.render(verbose))
}

impl Store {
	/// Render the whole store. In verbose mode an entity with several sources
	/// also gets one entry per source next to the merged entry.
	pub async fn dump(&self, verbose: bool) -> WorkloadDumpResponse {
		let mut response = WorkloadDumpResponse::default();

		// Copy the ledgers so rendering happens outside the lock.
		let snapshot: Vec<(Kind, Vec<SourceEntities>)> = {
			let state = self.state.read().await;
			state
				.entities
				.iter()
				.filter(|(_, by_id)| !by_id.is_empty())
				.map(|(kind, by_id)| (*kind, by_id.values().cloned().collect()))
				.collect()
		};

		for (kind, ledgers) in &snapshot {
			let mut entities = WorkloadEntity::default();

			for ledger in ledgers {
				let id = &ledger.id().id;
				if verbose && ledger.len() > 1 {
					for (source, entity) in ledger.iter() {
						match render(entity, verbose) {
							Ok(info) => {
								entities
									.infos
									.insert(format!("source:{} id: {}", source, id), info);
							}
							Err(e) => {
								debug!("Ignoring entity {}: {}", id, e);
								self.metrics().skipped_entities.inc();
							}
						}
					}
				}

				match ledger
					.merge(self.priority())
					.and_then(|merged| render(&merged, verbose))
				{
					Ok(info) => {
						let descriptor = format!(
							"sources(merged):[{}] id: {}",
							ledger.sources().join(" "),
							id
						);
						entities.infos.insert(descriptor, info);
					}
					Err(e) => {
						debug!("Ignoring entity {}: {}", id, e);
						self.metrics().skipped_entities.inc();
					}
				}
			}

			response.entities.insert(kind.to_string(), entities);
		}

		response
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn write_emits_one_block_per_entity() {
		let mut response = WorkloadDumpResponse::default();
		response.entities.insert(
			"container".into(),
			WorkloadEntity {
				infos: BTreeMap::from([(
					"sources(merged):[runtime] id: c1".to_string(),
					"Name: web\n".to_string(),
				)]),
			},
		);

		assert_eq!(
			response.to_text(),
			"\n=== Entity container sources(merged):[runtime] id: c1 ===\nName: web\n===\n"
		);
	}

	#[test]
	fn bare_ids_do_not_render() {
		let id = Entity::Id(crate::workloadmeta::EntityId::new(
			crate::workloadmeta::Kind::Container,
			"c1",
		));
		assert!(render(&id, true).is_err());
	}
}
