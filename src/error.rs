//! The error taxonomy used throughout the manager and entity registry.
//!
//! `DdsManager` and friends never panic on bad input; every fallible
//! operation returns a [`DdsResult`] carrying a [`DdsErrorCategory`] and a
//! human-readable message, mirroring the `DdsResult(ok, category, reason)`
//! convention of the original gateway.

use std::fmt;

/// Coarse classification of a failure, used by the IPC adapter to pick a
/// response `category` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdsErrorCategory {
  /// Bad argument, duplicate create, unknown type, topic/type conflict.
  Logic,
  /// The underlying pub/sub runtime failed to construct an entity.
  Resource,
}

impl fmt::Display for DdsErrorCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DdsErrorCategory::Logic => write!(f, "logic"),
      DdsErrorCategory::Resource => write!(f, "resource"),
    }
  }
}

/// An error returned by a manager or registry operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DdsError {
  pub category: DdsErrorCategory,
  pub message: String,
  /// Set for a request missing a required tag (e.g. `target.topic`),
  /// which spec.md §7 gives its own wire `err` code (6) distinct from
  /// every other `Logic` failure (4).
  pub missing_tag: bool,
}

impl DdsError {
  pub fn logic(message: impl Into<String>) -> Self {
    DdsError { category: DdsErrorCategory::Logic, message: message.into(), missing_tag: false }
  }

  /// A request is missing a required field (spec.md §7's "missing topic
  /// tag" case).
  pub fn missing_tag(message: impl Into<String>) -> Self {
    DdsError { category: DdsErrorCategory::Logic, message: message.into(), missing_tag: true }
  }

  pub fn resource(message: impl Into<String>) -> Self {
    DdsError { category: DdsErrorCategory::Resource, message: message.into(), missing_tag: false }
  }

  /// Numeric category code used on the wire (spec.md §7).
  pub fn category_code(&self) -> i32 {
    match self.category {
      DdsErrorCategory::Logic => 1,
      DdsErrorCategory::Resource => 2,
    }
  }

  /// Numeric `err` code used on the wire (spec.md §7): 4 for every
  /// `Logic`/`Resource` failure, except a missing required tag, which is
  /// 6.
  pub fn wire_err_code(&self) -> i32 {
    if self.missing_tag {
      6
    } else {
      4
    }
  }
}

/// Result alias used by manager and registry operations.
pub type DdsResult<T> = Result<T, DdsError>;

/// Errors that occur at the IPC boundary, before or outside of any manager
/// call — malformed request bytes, or an unexpected panic-worthy condition
/// caught and reported instead of propagated.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BoundaryError {
  #[error("failed to parse request: {0}")]
  Parse(String),
  #[error("internal error: {0}")]
  Internal(String),
}

impl BoundaryError {
  pub fn err_kind(&self) -> &'static str {
    match self {
      BoundaryError::Parse(_) => "parse",
      BoundaryError::Internal(_) => "internal",
    }
  }

  pub fn detail(&self) -> &str {
    match self {
      BoundaryError::Parse(d) | BoundaryError::Internal(d) => d,
    }
  }
}
