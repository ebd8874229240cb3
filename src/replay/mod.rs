use std::path::Path;

use thiserror::Error;

use crate::workloadmeta::CollectorEvent;

/// Errors raised while decoding recorded collector events.
#[derive(Debug, Error)]
pub enum ReplayError {
	#[error("line {line}: {source}")]
	Decode {
		line: usize,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to read {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
}

/// Decode a NDJSON (newline-delimited JSON) payload where each line is one
/// serialized `CollectorEvent`. Blank lines and lines starting with `#` are
/// skipped. Decoding stops at the first malformed line.
pub fn decode_ndjson(input: &str) -> Result<Vec<CollectorEvent>, ReplayError> {
	let mut out = Vec::new();

	for (idx, line) in input.lines().enumerate() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}

		let event: CollectorEvent = serde_json::from_str(line)
			.map_err(|source| ReplayError::Decode {
				line: idx + 1,
				source,
			})?;
		out.push(event);
	}

	Ok(out)
}

/// Read and decode a NDJSON file of collector events.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<CollectorEvent>, ReplayError> {
	let path = path.as_ref();
	let input = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
		path: path.display().to_string(),
		source,
	})?;

	decode_ndjson(&input)
}

#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::workloadmeta::{Entity, EventType, Kind};

	#[test]
	fn decodes_set_and_unset_lines() {
		let ndjson = r#"# recorded on node-1
{"type":"set","source":"runtime","entity":{"container":{"id":{"kind":"container","id":"c1"},"state":{"running":false}}}}

{"type":"unset","source":"runtime","entity":{"id":{"kind":"container","id":"c1"}}}
"#;

		let got = decode_ndjson(ndjson).expect("decode");
		assert_eq!(got.len(), 2);
		assert_eq!(got[0].event_type, EventType::Set);
		let Entity::Container(c) = &got[0].entity else {
			panic!("expected a container");
		};
		assert_eq!(c.state.running, Some(false));
		assert_eq!(got[1].event_type, EventType::Unset);
		assert!(got[1].entity.is_bare_id());
		assert_eq!(got[1].entity.kind(), Kind::Container);
	}

	#[test]
	fn reports_the_failing_line() {
		let ndjson = "{\"type\":\"set\",\"source\":\"runtime\",\"entity\":{\"id\":{\"kind\":\"container\",\"id\":\"c1\"}}}\nnot json\n";
		let err = decode_ndjson(ndjson).unwrap_err();
		assert!(matches!(err, ReplayError::Decode { line: 2, .. }));
	}

	#[test]
	fn missing_file_is_an_io_error() {
		let err = read_file("/nonexistent/huginn-events.ndjson").unwrap_err();
		assert!(matches!(err, ReplayError::Io { .. }));
	}
}
