//! Error types for the DCE RPC client engine

use crate::pdu::{ContextResult, PacketType};
use thiserror::Error;

/// Broad failure category, used by callers to decide what to do with an error.
///
/// Nothing in this crate retries; the class only tells the caller whether the
/// request ever reached the wire and whether the peer misbehaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected locally before any I/O was attempted
    Local,
    /// The transport failed to move bytes
    Transport,
    /// The peer answered with something that violates the protocol
    Protocol,
}

/// Errors reported by a [`Transport`](crate::transport::Transport) implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("fragment too large: {size} bytes exceeds maximum {max}")]
    FragmentTooLarge { size: usize, max: usize },

    #[error("transport error: {0}")]
    Other(String),
}

/// Errors reported by a [`ParamCodec`](crate::codec::ParamCodec)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// RPC error types
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid service descriptor: {0}")]
    ServiceInvalid(String),

    #[error("no free binding slots: session already holds {max} bindings")]
    NoFreeSlots { max: usize },

    #[error("operation unavailable: {0}")]
    OpnumInvalid(u16),

    #[error("binding with presentation id {0} does not belong to this session")]
    UnknownBinding(u16),

    #[error("request too large: {size} bytes exceeds maximum {max}")]
    RequestTooLarge { size: usize, max: usize },

    #[error("PDU too large: {size} bytes exceeds maximum fragment length {max}")]
    PduTooLarge { size: usize, max: usize },

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to marshal parameters: {0}")]
    Marshal(#[source] CodecError),

    #[error("transport fault: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unexpected packet type: expected {expected:?}, got {got:?}")]
    UnexpectedPacketType {
        expected: PacketType,
        got: PacketType,
    },

    #[error("DCE RPC version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("bind rejected: {result:?}, reason {reason}")]
    BindRejected { result: ContextResult, reason: u16 },

    #[error("bind ack carried {0} results, expected exactly one")]
    BindResultCount(usize),

    #[error("call ID mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("fault: status 0x{status:08x}")]
    Fault { status: u32 },

    #[error("response too large: {size} bytes exceeds maximum {max}")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("too many response fragments: limit is {max}")]
    TooManyFragments { max: usize },

    #[error("failed to unmarshal results: {0}")]
    Unmarshal(#[source] CodecError),
}

impl RpcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::ServiceInvalid(_)
            | RpcError::NoFreeSlots { .. }
            | RpcError::OpnumInvalid(_)
            | RpcError::UnknownBinding(_)
            | RpcError::RequestTooLarge { .. }
            | RpcError::PduTooLarge { .. }
            | RpcError::InvalidConfig(_)
            | RpcError::Marshal(_) => ErrorClass::Local,
            RpcError::Transport(_) => ErrorClass::Transport,
            RpcError::MalformedResponse(_)
            | RpcError::UnexpectedPacketType { .. }
            | RpcError::VersionMismatch { .. }
            | RpcError::BindRejected { .. }
            | RpcError::BindResultCount(_)
            | RpcError::CallIdMismatch { .. }
            | RpcError::Fault { .. }
            | RpcError::ResponseTooLarge { .. }
            | RpcError::TooManyFragments { .. }
            | RpcError::Unmarshal(_) => ErrorClass::Protocol,
        }
    }

    /// True for faults caused by the peer violating the protocol
    pub fn is_protocol_fault(&self) -> bool {
        self.class() == ErrorClass::Protocol
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        RpcError::MalformedResponse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
