//! Error types shared by the cache, the remote client and the normalizer.
//!
//! Transport and contract failures are kept apart so a view can tell
//! "service down" from "service returned something we don't understand".

use thiserror::Error;

use crate::normalize::SchemaKind;

/// A payload was received but could not be turned into canonical entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} payload rejected: {reason}")]
pub struct ContractError {
  pub kind: SchemaKind,
  pub reason: String,
}

impl ContractError {
  pub fn new(kind: SchemaKind, reason: impl Into<String>) -> Self {
    Self {
      kind,
      reason: reason.into(),
    }
  }
}

/// Failure of a remote fetch, as seen by the requesting consumer.
///
/// `Clone` because one outstanding fetch may be shared by several awaiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The request failed before a usable response was obtained.
  #[error("request to {endpoint} failed: {message}")]
  Transport {
    endpoint: String,
    message: String,
    status: Option<u16>,
  },
  /// The response arrived but failed required-field validation.
  #[error(transparent)]
  Contract(#[from] ContractError),
  /// Interest in the key ended before the fetch completed.
  #[error("fetch cancelled")]
  Cancelled,
  /// The payload cached under a key is not of the requested type.
  #[error("payload cached under {0} has a different type")]
  TypeMismatch(String),
}

impl FetchError {
  pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
    FetchError::Transport {
      endpoint: endpoint.into(),
      message: message.into(),
      status: None,
    }
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, FetchError::Transport { .. })
  }

  pub fn is_contract(&self) -> bool {
    matches!(self, FetchError::Contract(_))
  }

  /// Human-readable text for the retry affordance of a failed view.
  pub fn user_message(&self) -> String {
    match self {
      FetchError::Transport {
        status: Some(status),
        ..
      } => format!("The analytics service answered with HTTP {status}. Try again."),
      FetchError::Transport { .. } => {
        "The analytics service is unreachable. Try again.".to_string()
      }
      FetchError::Contract(e) => format!(
        "The analytics service returned {} data this dashboard does not understand.",
        e.kind
      ),
      FetchError::Cancelled => "The request was cancelled.".to_string(),
      FetchError::TypeMismatch(_) => "Something went wrong loading this view.".to_string(),
    }
  }
}

/// Errors from the local preference store.
#[derive(Debug, Error)]
pub enum PreferenceError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("could not create preference directory: {0}")]
  Io(#[from] std::io::Error),
}
