use thiserror::Error;

use super::entity::Kind;

/// Errors returned by the workload metadata store and its entity model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
	#[error("{kind} entity not found: {id}")]
	NotFound { kind: Kind, id: String },

	#[error("cannot merge {expected} with different kind {found}")]
	KindMismatch { expected: String, found: String },

	#[error("malformed input: {0}")]
	MalformedInput(#[from] ImageParseError),

	#[error("programming error: {0}")]
	ProgrammingError(String),

	#[error("store has not been started")]
	NotStarted,

	#[error("store has already been started")]
	AlreadyStarted,

	#[error("store is shut down")]
	ShutDown,
}

impl StoreError {
	pub(crate) fn not_found(kind: Kind, id: impl Into<String>) -> Self {
		StoreError::NotFound {
			kind,
			id: id.into(),
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, StoreError::NotFound { .. })
	}
}

/// Errors raised while splitting a raw image reference.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ImageParseError {
	#[error("empty image reference")]
	Empty,

	#[error("image reference contains whitespace: {0:?}")]
	Whitespace(String),

	#[error("image reference has an empty path component: {0:?}")]
	EmptyComponent(String),

	#[error("image reference has an empty tag: {0:?}")]
	EmptyTag(String),

	#[error("image reference has an empty digest: {0:?}")]
	EmptyDigest(String),

	#[error("invalid character in image reference: {0:?}")]
	InvalidCharacter(String),
}
