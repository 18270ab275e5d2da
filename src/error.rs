//
// error.rs
//

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the runtime. Every failure mode the protocol can
/// produce, on either the inbound or outbound side, is one of these.
#[derive(Debug)]
pub enum Error {
    /// No registry entry for an id/target referenced by a message.
    NotRegistered { id: String },

    /// Property or method absent on the resolved host target.
    MemberNotFound { id: String, member: String },

    /// A descriptor does not cover an interface member a proxy class needs.
    SpecMismatch { class_id: String, member: String },

    /// Argument count mismatch, value/null violation, or bad conversion.
    MarshalError(String),

    /// The peer replied with `success = false`; `message` is its payload.
    RemoteCallError { message: String },

    /// The channel lacks a capability a call required (e.g. no send-sync
    /// and no send-async for a call that needed one of the two).
    ChannelUnavailable { needed: &'static str },

    /// Malformed or unrecognized message (unknown `action`; a missing
    /// `srpc` marker is dropped silently and never becomes this error).
    ProtocolError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotRegistered { id } => write!(f, "no registry entry for id '{}'", id),
            Error::MemberNotFound { id, member } => {
                write!(f, "'{}' has no member '{}'", id, member)
            }
            Error::SpecMismatch { class_id, member } => write!(
                f,
                "descriptor for class '{}' does not cover member '{}'",
                class_id, member
            ),
            Error::MarshalError(msg) => write!(f, "marshalling error: {}", msg),
            Error::RemoteCallError { message } => write!(f, "remote call failed: {}", message),
            Error::ChannelUnavailable { needed } => {
                write!(f, "channel does not support required capability: {}", needed)
            }
            Error::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
