//! Parameter codec capability
//!
//! Turning call arguments into NDR stub data (and results back out of it) is
//! the job of generated stub code. The session only needs two hooks: append
//! the marshalled request body, and decode an assembled response payload.

use crate::error::CodecError;
use crate::pdu::DataRepresentation;
use bytes::{Bytes, BytesMut};

pub trait ParamCodec {
    type In: ?Sized;
    type Out;

    /// Append the marshalled request body for `params` to `body`.
    ///
    /// `body` already contains the reserved request header; implementations
    /// must only append.
    fn encode(
        &self,
        params: &Self::In,
        body: &mut BytesMut,
        data_rep: DataRepresentation,
    ) -> Result<(), CodecError>;

    /// Decode the reassembled response stub data
    fn decode(&self, payload: Bytes, data_rep: DataRepresentation) -> Result<Self::Out, CodecError>;
}

/// Pass-through codec: stub data in, stub data out
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl ParamCodec for RawCodec {
    type In = [u8];
    type Out = Bytes;

    fn encode(
        &self,
        params: &[u8],
        body: &mut BytesMut,
        _data_rep: DataRepresentation,
    ) -> Result<(), CodecError> {
        body.extend_from_slice(params);
        Ok(())
    }

    fn decode(&self, payload: Bytes, _data_rep: DataRepresentation) -> Result<Bytes, CodecError> {
        Ok(payload)
    }
}
