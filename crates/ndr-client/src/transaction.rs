//! Per-exchange state: one bind or one call
//!
//! A [`Transaction`] owns the outbound PDU bytes and the inbound buffer the
//! transport fills. It lives for exactly one exchange and is never shared.

use crate::error::TransportError;
use crate::pdu::DataRepresentation;
use bytes::{Bytes, BytesMut};

/// Which PDU layout a transaction carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Bind,
    Request,
}

/// Handle for the results of one call, passed to the transport's
/// `init`/`preserve`/`release` hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(u32);

impl HeapRef {
    pub(crate) fn new(call_id: u32) -> Self {
        Self(call_id)
    }

    /// Call ID of the exchange that produced the results
    pub fn call_id(&self) -> u32 {
        self.0
    }
}

/// Growable receive buffer with index-based bookkeeping.
///
/// The backing storage is always initialized: `capacity()` bytes are
/// allocated and zero-filled, of which the first `len()` hold received data.
/// Transports write into [`spare_mut`](Self::spare_mut) and then
/// [`commit`](Self::commit) the number of bytes written.
#[derive(Debug)]
pub struct InboundBuffer {
    buf: BytesMut,
    filled: usize,
    scan_offset: usize,
}

impl InboundBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(capacity),
            filled: 0,
            scan_offset: 0,
        }
    }

    /// Bytes received and kept so far (the high-water mark)
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn headroom(&self) -> usize {
        self.buf.len() - self.filled
    }

    /// Index where bytes not yet consumed by reassembly begin
    pub fn scan_offset(&self) -> usize {
        self.scan_offset
    }

    pub(crate) fn set_scan_offset(&mut self, offset: usize) {
        debug_assert!(offset <= self.filled);
        self.scan_offset = offset;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Grow the allocation by `additional` bytes, keeping everything written so far
    pub fn grow(&mut self, additional: usize) {
        let new_len = self.buf.len() + additional;
        self.buf.resize(new_len, 0);
    }

    /// Grow by `step` if fewer than `low_water` bytes of headroom remain.
    /// At least one byte of headroom is always left, even with a zero
    /// low-water mark or step.
    ///
    /// Returns true when the buffer grew.
    pub fn ensure_headroom(&mut self, low_water: usize, step: usize) -> bool {
        let low_water = low_water.max(1);
        if self.headroom() < low_water {
            self.grow(step.max(low_water - self.headroom()));
            true
        } else {
            false
        }
    }

    /// Unfilled region a transport may write into
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Mark `n` bytes of the spare region as received
    pub fn commit(&mut self, n: usize) -> Result<(), TransportError> {
        if n > self.headroom() {
            return Err(TransportError::Other(format!(
                "commit of {} bytes exceeds {} bytes of headroom",
                n,
                self.headroom()
            )));
        }
        self.filled += n;
        Ok(())
    }

    /// Append `data`, growing the allocation as needed
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if self.headroom() < data.len() {
            self.grow(data.len() - self.headroom());
        }
        self.buf[self.filled..self.filled + data.len()].copy_from_slice(data);
        self.filled += data.len();
    }

    /// Remove `n` bytes starting at `at`, shifting the rest of the filled
    /// region left. This is the in-place header strip.
    pub(crate) fn remove_range(&mut self, at: usize, n: usize) {
        debug_assert!(at + n <= self.filled);
        self.buf.copy_within(at + n..self.filled, at);
        self.filled -= n;
    }

    pub fn clear(&mut self) {
        self.filled = 0;
        self.scan_offset = 0;
    }

    /// Freeze the filled region
    pub fn into_bytes(mut self) -> Bytes {
        self.buf.truncate(self.filled);
        self.buf.freeze()
    }
}

/// A single logical exchange
#[derive(Debug)]
pub struct Transaction {
    kind: TransactionKind,
    call_id: u32,
    presentation_id: u16,
    opnum: Option<u16>,
    data_rep: DataRepresentation,
    outbound: BytesMut,
    inbound: InboundBuffer,
}

impl Transaction {
    pub(crate) fn new_bind(
        call_id: u32,
        presentation_id: u16,
        data_rep: DataRepresentation,
        inbound_capacity: usize,
    ) -> Self {
        Self {
            kind: TransactionKind::Bind,
            call_id,
            presentation_id,
            opnum: None,
            data_rep,
            outbound: BytesMut::with_capacity(128),
            inbound: InboundBuffer::with_capacity(inbound_capacity),
        }
    }

    pub(crate) fn new_request(
        call_id: u32,
        presentation_id: u16,
        opnum: u16,
        data_rep: DataRepresentation,
        inbound_capacity: usize,
    ) -> Self {
        Self {
            kind: TransactionKind::Request,
            call_id,
            presentation_id,
            opnum: Some(opnum),
            data_rep,
            outbound: BytesMut::new(),
            inbound: InboundBuffer::with_capacity(inbound_capacity),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    pub fn presentation_id(&self) -> u16 {
        self.presentation_id
    }

    /// Operation number, `None` for binds
    pub fn opnum(&self) -> Option<u16> {
        self.opnum
    }

    pub fn data_rep(&self) -> DataRepresentation {
        self.data_rep
    }

    /// Encoded PDU bytes to send
    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    pub(crate) fn outbound_mut(&mut self) -> &mut BytesMut {
        &mut self.outbound
    }

    pub(crate) fn set_outbound(&mut self, outbound: BytesMut) {
        self.outbound = outbound;
    }

    pub fn inbound(&self) -> &InboundBuffer {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut InboundBuffer {
        &mut self.inbound
    }

    pub(crate) fn take_inbound(&mut self) -> InboundBuffer {
        std::mem::replace(&mut self.inbound, InboundBuffer::with_capacity(0))
    }
}
