//! Request fragmentation
//!
//! When the marshalled request does not fit in the `max_xmit_frag` the
//! server announced in its bind-ack, the request is sent as several request
//! PDUs. Each carries the same call id, opnum and context id, the
//! FIRST_FRAG / LAST_FRAG flags, and `alloc_hint` set to the total stub size.
//!
//! ```text
//! max_xmit_frag
//! ├── PDU header (16 bytes)
//! ├── Request body header (8 bytes)
//! └── Stub data fragment (variable)
//! ```

use crate::error::{Result, RpcError};
use crate::pdu::{PacketFlags, RequestHeader};
use bytes::{BufMut, BytesMut};

pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Maximum stub bytes that fit in one request fragment of `max_frag` bytes
    pub fn max_stub_size(max_frag: u16) -> usize {
        (max_frag as usize).saturating_sub(RequestHeader::SIZE)
    }

    /// Finish an outbound request buffer laid out as
    /// `[reserved header][stub data]`.
    ///
    /// If the whole PDU fits in `max_frag` the reserved header is back-patched
    /// in place. Larger requests are rewritten as consecutive fragments.
    pub fn finish_request(
        mut header: RequestHeader,
        mut buf: BytesMut,
        max_frag: u16,
    ) -> Result<BytesMut> {
        let stub_len = buf.len() - RequestHeader::SIZE;
        let alloc_hint = u32::try_from(stub_len).map_err(|_| RpcError::RequestTooLarge {
            size: stub_len,
            max: u32::MAX as usize,
        })?;
        header.alloc_hint = alloc_hint;

        if buf.len() <= max_frag as usize {
            header.header.packet_flags = PacketFlags::complete();
            header.header.frag_length = buf.len() as u16;
            header.write_to(&mut buf);
            return Ok(buf);
        }

        let max_stub = Self::max_stub_size(max_frag);
        if max_stub == 0 {
            return Err(RpcError::RequestTooLarge {
                size: buf.len(),
                max: max_frag as usize,
            });
        }

        let stub = &buf[RequestHeader::SIZE..];
        let count = stub_len.div_ceil(max_stub);
        let mut out = BytesMut::with_capacity(stub_len + count * RequestHeader::SIZE);

        for (i, chunk) in stub.chunks(max_stub).enumerate() {
            let mut frag = header.clone();
            frag.header.packet_flags = PacketFlags::for_fragment(i, count);
            frag.header.frag_length = (RequestHeader::SIZE + chunk.len()) as u16;
            frag.encode(&mut out);
            out.put_slice(chunk);
        }

        Ok(out)
    }
}
