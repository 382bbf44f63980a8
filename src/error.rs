//! Error types for the VXLAN engine's control plane and lifecycle APIs.
//!
//! Packet-path code never returns these: a dropped or not-mine packet is
//! expressed as an enum variant or a counter increment, not an `Err` (see
//! [`crate::wire::DecodeOutcome`] and [`crate::counters::Counters`]).

/// Result type for control-plane and lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by control-plane and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A supplied attribute or argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced endpoint, FDB entry, or listener does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The thing being created already exists (duplicate VNI/port, EXCL hit).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The FDB (or a bounded resource) is at its configured limit.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// The requested operation is not supported for this kind of entry.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The lower device referenced by `LINK` could not be resolved.
    #[error("address unavailable: {0}")]
    AddressUnavailable(String),

    /// Binding the underlying UDP socket failed.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// A non-blocking allocation failed.
    #[error("no memory")]
    NoMemory,

    /// The socket/listener is owned by another receiver.
    #[error("busy: {0}")]
    Busy(String),

    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that mean "the thing you asked about doesn't exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for errors that mean "that already exists".
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_found() {
        let err = Error::NotFound("mac aa:bb:cc:dd:ee:ff".into());
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::Capacity("fdb full (256/256)".into()).to_string(),
            "capacity exceeded: fdb full (256/256)"
        );
        assert_eq!(Error::NoMemory.to_string(), "no memory");
    }
}
