//! Blocking DCE RPC client engine
//!
//! This crate drives the client side of connection-oriented DCE RPC
//! (DCE 1.1 / MS-RPCE): it negotiates presentation contexts with `bind`,
//! marshals and sends requests with `call`, and reassembles multi-fragment
//! responses in place before handing the stub data to a parameter codec.
//!
//! # Features
//!
//! - Bind / bind-ack / bind-nak handling with strict result validation
//! - Request fragmentation against the negotiated `max_xmit_frag`
//! - In-place response reassembly with bounded buffer growth
//! - Pluggable transports through the [`Transport`] trait, with a TCP transport included
//! - Pluggable stub marshalling through the [`ParamCodec`] trait
//!
//! # Example
//!
//! ```no_run
//! use ndr_client::{ServiceDescriptor, Session};
//!
//! fn main() -> ndr_client::Result<()> {
//!     let service = ServiceDescriptor::parse("12345678-1234-1234-1234-123456789012", 1, 0)?
//!         .operations([0, 1]);
//!
//!     let mut session = Session::connect("127.0.0.1:12345".parse().unwrap())?;
//!     let binding = session.bind(&service)?;
//!
//!     // Operation 1 with raw stub data
//!     let result = session.call_raw(&binding, 1, b"hello")?;
//!     println!("{} bytes", result.len());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod fragmentation;
pub mod pdu;
pub mod reassembly;
pub mod service;
pub mod session;
pub mod transaction;
pub mod transport;

#[cfg(test)]
mod test_util;

pub use codec::{ParamCodec, RawCodec};
pub use error::{CodecError, ErrorClass, Result, RpcError, TransportError};
pub use pdu::{
    BindAckPdu, BindNakPdu, BindPdu, BindResult, CharRep, ContextElement, ContextResult,
    DataRepresentation, FaultPdu, FloatRep, IntRep, PacketFlags, PacketType, PduHeader,
    RequestHeader, ResponseHeader, ResponsePdu, SyntaxId, Uuid, DCE_RPC_VERSION,
    DCE_RPC_VERSION_MINOR, DEFAULT_MAX_FRAG, FRAGMENT_HEADER_SIZE, NDR_SYNTAX_UUID,
    NDR_SYNTAX_VERSION,
};
pub use reassembly::{FragmentReassembler, ReassemblyLimits, ReassemblyState};
pub use service::{Binding, OpnumPolicy, ServiceDescriptor, Side};
pub use session::{Reply, Session, SessionBuilder, SessionConfig, SharedSession};
pub use transaction::{HeapRef, InboundBuffer, Transaction, TransactionKind};
pub use transport::{StreamTransport, TcpTransport, TcpTransportConfig, Transport};
