use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use super::entity::{EntityId, EntityMeta, Kind, map_to_string, opt_to_string, section};
use super::merge::GapFill;
use super::pod::OrchestratorContainer;

/// Launch type of an ECS task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcsLaunchType {
	Ec2,
	Fargate,
}

impl fmt::Display for EcsLaunchType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EcsLaunchType::Ec2 => f.write_str("ec2"),
			EcsLaunchType::Fargate => f.write_str("fargate"),
		}
	}
}

/// An ECS task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsTask {
	pub id: EntityId,
	pub meta: EntityMeta,
	pub tags: BTreeMap<String, String>,
	pub container_instance_tags: BTreeMap<String, String>,
	pub cluster_name: String,
	pub region: String,
	pub availability_zone: String,
	pub family: String,
	pub version: String,
	pub launch_type: Option<EcsLaunchType>,
	pub containers: Vec<OrchestratorContainer>,
}

impl Default for EcsTask {
	fn default() -> Self {
		Self::new("")
	}
}

impl EcsTask {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: EntityId::new(Kind::EcsTask, id),
			meta: EntityMeta::default(),
			tags: BTreeMap::new(),
			container_instance_tags: BTreeMap::new(),
			cluster_name: String::new(),
			region: String::new(),
			availability_zone: String::new(),
			family: String::new(),
			version: String::new(),
			launch_type: None,
			containers: Vec::new(),
		}
	}

	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();

		section(&mut sb, "Entity ID");
		sb.push_str(&self.id.render(verbose));

		section(&mut sb, "Entity Meta");
		sb.push_str(&self.meta.render(verbose));

		section(&mut sb, "Containers");
		for c in &self.containers {
			sb.push_str(&c.render(verbose));
		}

		if verbose {
			section(&mut sb, "Task Info");
			let _ = writeln!(sb, "Tags: {}", map_to_string(&self.tags));
			let _ = writeln!(
				sb,
				"Container Instance Tags: {}",
				map_to_string(&self.container_instance_tags)
			);
			let _ = writeln!(sb, "Cluster Name: {}", self.cluster_name);
			let _ = writeln!(sb, "Region: {}", self.region);
			let _ = writeln!(sb, "Availability Zone: {}", self.availability_zone);
			let _ = writeln!(sb, "Family: {}", self.family);
			let _ = writeln!(sb, "Version: {}", self.version);
			let _ = writeln!(sb, "Launch Type: {}", opt_to_string(&self.launch_type));
		}

		sb
	}
}

impl GapFill for EcsTask {
	fn gap_fill(&mut self, other: &Self) {
		self.meta.gap_fill(&other.meta);
		self.tags.gap_fill(&other.tags);
		self.container_instance_tags
			.gap_fill(&other.container_instance_tags);
		self.cluster_name.gap_fill(&other.cluster_name);
		self.region.gap_fill(&other.region);
		self.availability_zone.gap_fill(&other.availability_zone);
		self.family.gap_fill(&other.family);
		self.version.gap_fill(&other.version);
		self.launch_type.gap_fill(&other.launch_type);
		self.containers.gap_fill(&other.containers);
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn gap_fill_merges_scheduler_and_metadata_views() {
		let mut api = EcsTask::new("arn:task/1");
		api.cluster_name = "prod".into();
		api.launch_type = Some(EcsLaunchType::Fargate);

		let mut metadata = EcsTask::new("arn:task/1");
		metadata.cluster_name = "staging".into();
		metadata.region = "us-east-1".into();
		metadata.launch_type = Some(EcsLaunchType::Ec2);

		api.gap_fill(&metadata);
		assert_eq!(api.cluster_name, "prod");
		assert_eq!(api.region, "us-east-1");
		assert_eq!(api.launch_type, Some(EcsLaunchType::Fargate));
	}

	#[test]
	fn task_info_is_verbose_only() {
		let mut task = EcsTask::new("arn:task/1");
		task.region = "eu-west-1".into();

		assert!(!task.render(false).contains("Region"));
		assert!(task.render(true).contains("Region: eu-west-1"));
		assert!(task.render(false).contains("----------- Containers -----------"));
	}
}
