use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::entity::{
	EntityId, EntityMeta, Kind, map_to_string, opt_to_string, section,
};
use super::error::ImageParseError;
use super::merge::{GapFill, Timestamp};

static NAME_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-/:]*$").expect("static regex"));
static TAG_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("static regex"));

/// Container runtime used by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRuntime {
	Docker,
	Containerd,
}

impl fmt::Display for ContainerRuntime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ContainerRuntime::Docker => f.write_str("docker"),
			ContainerRuntime::Containerd => f.write_str("containerd"),
		}
	}
}

/// Image used by a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerImage {
	pub id: String,
	pub raw_name: String,
	pub name: String,
	pub short_name: String,
	pub tag: String,
}

impl ContainerImage {
	/// Build an image from a raw reference such as
	/// `registry:5000/team/app:1.2@sha256:...`. The tag defaults to `latest`.
	pub fn parse(raw: &str) -> Result<Self, ImageParseError> {
		let (name, short_name, tag) = split_image_name(raw)?;

		Ok(Self {
			id: String::new(),
			raw_name: raw.to_string(),
			name,
			short_name,
			tag: tag.unwrap_or_else(|| "latest".to_string()),
		})
	}

	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();
		let _ = writeln!(sb, "Name: {}", self.name);
		let _ = writeln!(sb, "Tag: {}", self.tag);

		if verbose {
			let _ = writeln!(sb, "ID: {}", self.id);
			let _ = writeln!(sb, "Raw Name: {}", self.raw_name);
			let _ = writeln!(sb, "Short Name: {}", self.short_name);
		}

		sb
	}
}

impl GapFill for ContainerImage {
	fn gap_fill(&mut self, other: &Self) {
		self.id.gap_fill(&other.id);
		self.raw_name.gap_fill(&other.raw_name);
		self.name.gap_fill(&other.name);
		self.short_name.gap_fill(&other.short_name);
		self.tag.gap_fill(&other.tag);
	}
}

/// Split an image reference into (full name, short name, tag). The digest,
/// when present, is validated and dropped.
fn split_image_name(raw: &str) -> Result<(String, String, Option<String>), ImageParseError> {
	if raw.is_empty() {
		return Err(ImageParseError::Empty);
	}
	if raw.chars().any(char::is_whitespace) {
		return Err(ImageParseError::Whitespace(raw.to_string()));
	}

	let reference = match raw.split_once('@') {
		Some((_, digest)) if digest.is_empty() => {
			return Err(ImageParseError::EmptyDigest(raw.to_string()));
		}
		Some((reference, _)) => reference,
		None => raw,
	};

	// A colon after the last slash starts the tag; earlier colons belong to a
	// registry port.
	let last_slash = reference.rfind('/');
	let (name, tag) = match reference.rfind(':') {
		Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
			let tag = &reference[colon + 1..];
			if tag.is_empty() {
				return Err(ImageParseError::EmptyTag(raw.to_string()));
			}
			(&reference[..colon], Some(tag))
		}
		_ => (reference, None),
	};

	if name.split('/').any(str::is_empty) {
		return Err(ImageParseError::EmptyComponent(raw.to_string()));
	}
	if !NAME_RE.is_match(name) {
		return Err(ImageParseError::InvalidCharacter(raw.to_string()));
	}
	if let Some(tag) = tag {
		if !TAG_RE.is_match(tag) {
			return Err(ImageParseError::InvalidCharacter(raw.to_string()));
		}
	}

	let short_name = name.rsplit('/').next().unwrap_or(name);

	Ok((
		name.to_string(),
		short_name.to_string(),
		tag.map(str::to_string),
	))
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerState {
	pub running: Option<bool>,
	pub started_at: Timestamp,
	pub finished_at: Timestamp,
}

impl ContainerState {
	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();
		let _ = writeln!(sb, "Running: {}", opt_to_string(&self.running));

		if verbose {
			let _ = writeln!(
				sb,
				"Started At: {}",
				self.started_at.map(|t| t.to_rfc3339()).unwrap_or_default()
			);
			let _ = writeln!(
				sb,
				"Finished At: {}",
				self.finished_at.map(|t| t.to_rfc3339()).unwrap_or_default()
			);
		}

		sb
	}
}

impl GapFill for ContainerState {
	fn gap_fill(&mut self, other: &Self) {
		self.running.gap_fill(&other.running);
		self.started_at.gap_fill(&other.started_at);
		self.finished_at.gap_fill(&other.finished_at);
	}
}

/// A port exposed by a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerPort {
	pub name: String,
	pub port: u16,
	pub protocol: String,
}

impl ContainerPort {
	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();
		let _ = writeln!(sb, "Port: {}", self.port);

		if verbose {
			let _ = writeln!(sb, "Name: {}", self.name);
			let _ = writeln!(sb, "Protocol: {}", self.protocol);
		}

		sb
	}
}

/// A containerized workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
	pub id: EntityId,
	pub meta: EntityMeta,
	pub env_vars: BTreeMap<String, String>,
	pub hostname: String,
	pub image: ContainerImage,
	pub network_ips: BTreeMap<String, String>,
	pub pid: Option<u32>,
	pub ports: Vec<ContainerPort>,
	pub runtime: Option<ContainerRuntime>,
	pub state: ContainerState,
}

impl Default for Container {
	fn default() -> Self {
		Self::new("")
	}
}

impl Container {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: EntityId::new(Kind::Container, id),
			meta: EntityMeta::default(),
			env_vars: BTreeMap::new(),
			hostname: String::new(),
			image: ContainerImage::default(),
			network_ips: BTreeMap::new(),
			pid: None,
			ports: Vec::new(),
			runtime: None,
			state: ContainerState::default(),
		}
	}

	pub fn render(&self, verbose: bool) -> String {
		let mut sb = String::new();

		section(&mut sb, "Entity ID");
		sb.push_str(&self.id.render(verbose));

		section(&mut sb, "Entity Meta");
		sb.push_str(&self.meta.render(verbose));

		section(&mut sb, "Image");
		sb.push_str(&self.image.render(verbose));

		section(&mut sb, "Container Info");
		let _ = writeln!(sb, "Runtime: {}", opt_to_string(&self.runtime));
		sb.push_str(&self.state.render(verbose));

		if verbose {
			let _ = writeln!(sb, "Env Variables: {}", map_to_string(&self.env_vars));
			let _ = writeln!(sb, "Hostname: {}", self.hostname);
			let _ = writeln!(sb, "Network IPs: {}", map_to_string(&self.network_ips));
			let _ = writeln!(sb, "PID: {}", opt_to_string(&self.pid));

			if !self.ports.is_empty() {
				section(&mut sb, "Ports");
				for p in &self.ports {
					sb.push_str(&p.render(verbose));
				}
			}
		}

		sb
	}
}

impl GapFill for Container {
	fn gap_fill(&mut self, other: &Self) {
		self.meta.gap_fill(&other.meta);
		self.env_vars.gap_fill(&other.env_vars);
		self.hostname.gap_fill(&other.hostname);
		self.image.gap_fill(&other.image);
		self.network_ips.gap_fill(&other.network_ips);
		self.pid.gap_fill(&other.pid);
		self.ports.gap_fill(&other.ports);
		self.runtime.gap_fill(&other.runtime);
		self.state.gap_fill(&other.state);
	}
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_name_with_default_tag() {
		let img = ContainerImage::parse("redis").unwrap();
		assert_eq!(img.name, "redis");
		assert_eq!(img.short_name, "redis");
		assert_eq!(img.tag, "latest");
		assert_eq!(img.raw_name, "redis");
	}

	#[test]
	fn parses_registry_path_and_tag() {
		let img = ContainerImage::parse("docker.io/library/redis:7.2").unwrap();
		assert_eq!(img.name, "docker.io/library/redis");
		assert_eq!(img.short_name, "redis");
		assert_eq!(img.tag, "7.2");
	}

	#[test]
	fn registry_port_is_not_a_tag() {
		let img = ContainerImage::parse("localhost:5000/team/app").unwrap();
		assert_eq!(img.name, "localhost:5000/team/app");
		assert_eq!(img.short_name, "app");
		assert_eq!(img.tag, "latest");
	}

	#[test]
	fn digest_is_dropped() {
		let img = ContainerImage::parse("gcr.io/proj/app:v1@sha256:abcd").unwrap();
		assert_eq!(img.name, "gcr.io/proj/app");
		assert_eq!(img.tag, "v1");

		let untagged = ContainerImage::parse("gcr.io/proj/app@sha256:abcd").unwrap();
		assert_eq!(untagged.tag, "latest");
	}

	#[test]
	fn rejects_malformed_references() {
		assert_eq!(ContainerImage::parse(""), Err(ImageParseError::Empty));
		assert!(matches!(
			ContainerImage::parse("redis:"),
			Err(ImageParseError::EmptyTag(_))
		));
		assert!(matches!(
			ContainerImage::parse("docker.io//redis"),
			Err(ImageParseError::EmptyComponent(_))
		));
		assert!(matches!(
			ContainerImage::parse("redis@"),
			Err(ImageParseError::EmptyDigest(_))
		));
		assert!(matches!(
			ContainerImage::parse("my redis"),
			Err(ImageParseError::Whitespace(_))
		));
		assert!(matches!(
			ContainerImage::parse("redis:7$"),
			Err(ImageParseError::InvalidCharacter(_))
		));
	}

	#[test]
	fn gap_fill_keeps_set_fields_and_fills_the_rest() {
		let mut a = Container::new("c1");
		a.state.running = Some(false);
		a.image.name = "redis".into();

		let mut b = Container::new("c1");
		b.state.running = Some(true);
		b.meta.namespace = "ns".into();
		b.image.name = "nginx".into();
		b.image.tag = "1.25".into();
		b.pid = Some(7);

		a.gap_fill(&b);
		assert_eq!(a.state.running, Some(false));
		assert_eq!(a.image.name, "redis");
		assert_eq!(a.image.tag, "1.25");
		assert_eq!(a.meta.namespace, "ns");
		assert_eq!(a.pid, Some(7));
	}

	#[test]
	fn render_hides_high_cardinality_fields() {
		let mut c = Container::new("c1");
		c.env_vars.insert("SECRET".into(), "x".into());
		c.pid = Some(1);
		c.ports.push(ContainerPort {
			name: "http".into(),
			port: 80,
			protocol: "TCP".into(),
		});

		let short = c.render(false);
		assert!(short.starts_with("----------- Entity ID -----------\n"));
		assert!(short.contains("Kind: container ID: c1"));
		assert!(!short.contains("SECRET"));
		assert!(!short.contains("Ports"));

		let long = c.render(true);
		assert!(long.contains("Env Variables: SECRET:x"));
		assert!(long.contains("PID: 1"));
		assert!(long.contains("Port: 80"));
	}
}
