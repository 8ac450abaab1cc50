//! Error taxonomy for Tubes.
//!
//! Every failure is a [`TubeError`] value tagged with an [`ErrorKind`].
//! Operations that fan out over several channel templates report partial
//! failure as an [`ErrorKind::Aggregate`] error holding one child per failing
//! template.

use std::fmt;
use thiserror::Error;
use tubes_protocol::ProtocolError;

/// Boxed error used as the wrapped cause of a [`TubeError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No registered channel template matches a path.
    UnknownChannel,
    /// The operation requires a subscription that does not hold.
    ClientNotSubscribed,
    /// An envelope or payload failed to parse.
    InvalidMessage,
    /// The envelope type is not recognized.
    UnknownType,
    /// A channel pattern could not be registered.
    InvalidChannel,
    /// The client's send capability refused a payload.
    DeliveryFailed,
    /// Wraps one or more child errors from a single operation.
    Aggregate,
}

impl ErrorKind {
    /// Stable name of this kind, used as a log field and metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownChannel => "unknown_channel",
            ErrorKind::ClientNotSubscribed => "client_not_subscribed",
            ErrorKind::InvalidMessage => "invalid_message",
            ErrorKind::UnknownType => "unknown_type",
            ErrorKind::InvalidChannel => "invalid_channel",
            ErrorKind::DeliveryFailed => "delivery_failed",
            ErrorKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Tubes error.
#[derive(Debug, Error)]
#[error("{description}")]
pub struct TubeError {
    kind: ErrorKind,
    description: String,
    #[source]
    source: Option<BoxError>,
    children: Vec<TubeError>,
}

impl TubeError {
    /// Create a new error.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            source: None,
            children: Vec::new(),
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Create an aggregate error wrapping `children`.
    #[must_use]
    pub fn aggregate(description: impl Into<String>, children: Vec<TubeError>) -> Self {
        Self {
            kind: ErrorKind::Aggregate,
            description: description.into(),
            source: None,
            children,
        }
    }

    /// No template matches `path`.
    #[must_use]
    pub fn unknown_channel(path: &str) -> Self {
        Self::new(
            ErrorKind::UnknownChannel,
            format!("channel does not exist: '{path}'"),
        )
    }

    /// `client_id` is not subscribed to `path`.
    #[must_use]
    pub fn not_subscribed(client_id: &str, path: &str) -> Self {
        Self::new(
            ErrorKind::ClientNotSubscribed,
            format!("client '{client_id}' not subscribed to channel '{path}'"),
        )
    }

    /// Get the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the nested child errors of an aggregate.
    #[must_use]
    pub fn children(&self) -> &[TubeError] {
        &self.children
    }

    /// Check whether this error or any nested child has the given kind.
    #[must_use]
    pub fn contains_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind || self.children.iter().any(|c| c.contains_kind(kind))
    }
}

impl From<ProtocolError> for TubeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownType(ref t) => Self::new(
                ErrorKind::UnknownType,
                format!("unknown request type: '{t}'"),
            ),
            _ => Self::new(
                ErrorKind::InvalidMessage,
                format!("invalid message received: {err}"),
            ),
        }
        .with_source(err)
    }
}

/// Callback receiving protocol errors caused by client traffic.
pub type ErrorHandler = std::sync::Arc<dyn Fn(&TubeError) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_and_source() {
        let err = TubeError::new(ErrorKind::DeliveryFailed, "send failed")
            .with_source(std::io::Error::other("broken pipe"));
        assert_eq!(err.to_string(), "send failed");
        assert_eq!(err.kind(), ErrorKind::DeliveryFailed);
        assert_eq!(err.source().unwrap().to_string(), "broken pipe");
    }

    #[test]
    fn test_aggregate_children() {
        let err = TubeError::aggregate(
            "failed to send over at least one channel",
            vec![
                TubeError::not_subscribed("c1", "room/42"),
                TubeError::new(ErrorKind::DeliveryFailed, "closed"),
            ],
        );
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert_eq!(err.children().len(), 2);
        assert!(err.contains_kind(ErrorKind::DeliveryFailed));
        assert!(!err.contains_kind(ErrorKind::UnknownChannel));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_from_protocol_error() {
        let err: TubeError = ProtocolError::UnknownType("ping".into()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownType);
        assert!(err.description().contains("ping"));

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TubeError = ProtocolError::Json(parse).into();
        assert_eq!(err.kind(), ErrorKind::InvalidMessage);
        assert!(err.source().is_some());
    }
}
