use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Fill-only merge: a field that is already set on `self` is kept, a field
/// that is still at its zero value takes the value from `other`.
///
/// Zero values are: `None`, the empty string, and empty lists. Maps fill per
/// key: keys missing on `self` are copied over, existing keys are kept.
/// Structs implement this field by field so nested values fill in
/// independently of each other.
pub trait GapFill {
	fn gap_fill(&mut self, other: &Self);
}

impl GapFill for String {
	fn gap_fill(&mut self, other: &Self) {
		if self.is_empty() {
			self.clone_from(other);
		}
	}
}

impl<T: Clone> GapFill for Option<T> {
	fn gap_fill(&mut self, other: &Self) {
		if self.is_none() {
			self.clone_from(other);
		}
	}
}

impl<T: Clone> GapFill for Vec<T> {
	fn gap_fill(&mut self, other: &Self) {
		if self.is_empty() {
			self.clone_from(other);
		}
	}
}

impl<K: Clone + Ord, V: Clone> GapFill for BTreeMap<K, V> {
	fn gap_fill(&mut self, other: &Self) {
		for (k, v) in other {
			if !self.contains_key(k) {
				self.insert(k.clone(), v.clone());
			}
		}
	}
}

/// Timestamps are a leaf value, an unset timestamp is `None`.
pub type Timestamp = Option<DateTime<Utc>>;

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn keeps_set_values() {
		let mut name = "redis".to_string();
		name.gap_fill(&"nginx".to_string());
		assert_eq!(name, "redis");

		let mut running = Some(false);
		running.gap_fill(&Some(true));
		assert_eq!(running, Some(false));
	}

	#[test]
	fn fills_zero_values() {
		let mut name = String::new();
		name.gap_fill(&"nginx".to_string());
		assert_eq!(name, "nginx");

		let mut pid: Option<u32> = None;
		pid.gap_fill(&Some(42));
		assert_eq!(pid, Some(42));

		let mut ports: Vec<u16> = Vec::new();
		ports.gap_fill(&vec![80, 443]);
		assert_eq!(ports, vec![80, 443]);
	}

	#[test]
	fn maps_fill_missing_keys() {
		let mut labels = BTreeMap::from([("app".to_string(), "web".to_string())]);
		let other = BTreeMap::from([
			("app".to_string(), "db".to_string()),
			("tier".to_string(), "front".to_string()),
		]);
		labels.gap_fill(&other);
		assert_eq!(labels.len(), 2);
		assert_eq!(labels.get("app").map(String::as_str), Some("web"));
		assert_eq!(labels.get("tier").map(String::as_str), Some("front"));

		let mut empty: BTreeMap<String, String> = BTreeMap::new();
		empty.gap_fill(&other);
		assert_eq!(empty, other);
	}
}
