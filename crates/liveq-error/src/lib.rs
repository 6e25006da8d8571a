//! Error types for the liveq reactive query store.
//!
//! Two families live in one enum. The *recoverable* variants describe
//! request-level conditions the gateway handles by dropping or
//! buffering (a session that already went away, a socket that is not
//! attached yet, a transport write that failed). The *fatal* variants
//! are store invariant violations: a transaction that trips one aborts
//! with state unchanged, and the error indicates a programming error in
//! the store itself.

use liveq_types::{EntityId, SessionId};
use thiserror::Error;

/// Primary error type for store operations.
#[derive(Error, Debug)]
pub enum LiveqError {
    // === Session errors (recoverable) ===
    /// A lookup keyed by session id found no session entity.
    #[error("session missing: {session_id}")]
    SessionMissing { session_id: SessionId },

    /// The session exists but has no socket bound.
    #[error("no socket attached to session {session_id}")]
    SocketMissing { session_id: SessionId },

    /// Transport write failed.
    #[error("socket write failed for session {session_id}")]
    SocketError {
        session_id: SessionId,
        #[source]
        source: std::io::Error,
    },

    // === Store invariant errors (fatal) ===
    /// An `EntityId` that does not resolve to a live entity.
    #[error("no entity {entity}")]
    MissingEntity { entity: EntityId },

    /// A lookup ref on a unique attribute that resolved to nothing.
    #[error("no entity with {attr} = {value}")]
    MissingIdentity { attr: &'static str, value: String },

    /// Two live entities claimed the same unique attribute value.
    #[error("unique conflict on {attr}: {value}")]
    UniqueViolation { attr: &'static str, value: String },

    /// A reference attribute pointing at a retracted entity, or a
    /// retraction that would leave such a reference behind.
    #[error("dangling reference via {attr} to {entity}")]
    DanglingReference { attr: &'static str, entity: EntityId },

    /// A value whose type does not satisfy the attribute schema.
    #[error("type mismatch on {attr}: expected {expected}, got {actual}")]
    TypeMismatch {
        attr: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
}

impl LiveqError {
    /// Whether the caller can recover (drop the request, buffer the
    /// event). Fatal variants mean the store itself is in the wrong.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SessionMissing { .. } | Self::SocketMissing { .. } | Self::SocketError { .. }
        )
    }

    /// The session this error is about, when it is session-scoped.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::SessionMissing { session_id }
            | Self::SocketMissing { session_id }
            | Self::SocketError { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}

/// Result type alias using `LiveqError`.
pub type Result<T> = std::result::Result<T, LiveqError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sid() -> SessionId {
        SessionId::new(Uuid::from_u128(0x1234))
    }

    #[test]
    fn display_forms() {
        let err = LiveqError::SessionMissing { session_id: sid() };
        assert_eq!(
            err.to_string(),
            format!("session missing: {}", sid())
        );

        let err = LiveqError::UniqueViolation {
            attr: "session/id",
            value: sid().to_string(),
        };
        assert!(err.to_string().starts_with("unique conflict on session/id"));
    }

    #[test]
    fn recoverability_split() {
        assert!(LiveqError::SessionMissing { session_id: sid() }.is_recoverable());
        assert!(LiveqError::SocketMissing { session_id: sid() }.is_recoverable());
        assert!(
            LiveqError::SocketError {
                session_id: sid(),
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"),
            }
            .is_recoverable()
        );
        assert!(
            !LiveqError::MissingIdentity {
                attr: "app/id",
                value: "7".to_owned(),
            }
            .is_recoverable()
        );
        assert!(
            !LiveqError::MissingEntity {
                entity: EntityId::new(3).unwrap(),
            }
            .is_recoverable()
        );
    }

    #[test]
    fn session_scoping() {
        assert_eq!(
            LiveqError::SocketMissing { session_id: sid() }.session_id(),
            Some(sid())
        );
        assert_eq!(
            LiveqError::MissingEntity { entity: EntityId::new(1).unwrap() }.session_id(),
            None
        );
    }

    #[test]
    fn socket_error_carries_source() {
        let err = LiveqError::SocketError {
            session_id: sid(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
