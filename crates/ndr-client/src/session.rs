//! Client session: bind and call
//!
//! A [`Session`] owns one transport connection, the presentation-id and
//! call-id counters, and every binding negotiated on the connection. Each
//! `bind` or `call` runs one [`Transaction`] from encode to decode; the
//! transaction is always handed to [`Transport::destruct`], whether the
//! exchange succeeded or not.

use crate::codec::{ParamCodec, RawCodec};
use crate::error::{Result, RpcError};
use crate::fragmentation::FragmentGenerator;
use crate::pdu::{
    BindAckPdu, BindNakPdu, BindPdu, ContextElement, ContextResult, DataRepresentation, FaultPdu,
    PacketType, PduHeader, RequestHeader, ResponseHeader, DEFAULT_MAX_FRAG,
};
use crate::reassembly::{FragmentReassembler, ReassemblyLimits};
use crate::service::{Binding, ServiceDescriptor, Side};
use crate::transaction::{HeapRef, Transaction};
use crate::transport::{TcpTransport, TcpTransportConfig, Transport};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Byte order and character set used for every PDU this session sends
    pub data_rep: DataRepresentation,
    pub max_bindings: usize,
    /// Fragment sizes offered in the bind
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub initial_inbound_capacity: usize,
    /// Inbound growth step, also the headroom low-water mark
    pub growth_step: usize,
    /// Largest reassembled response stub accepted
    pub max_response_size: usize,
    pub max_fragments: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_rep: DataRepresentation::ndr(),
            max_bindings: 16,
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            initial_inbound_capacity: 4096,
            growth_step: 4096,
            max_response_size: 16 * 1024 * 1024,
            max_fragments: 4096,
        }
    }
}

impl SessionConfig {
    /// Reject settings that cannot carry a call
    pub fn validate(&self) -> Result<()> {
        if self.max_xmit_frag as usize <= RequestHeader::SIZE {
            return Err(RpcError::InvalidConfig(format!(
                "max_xmit_frag {} leaves no room for stub data after the {}-byte request header",
                self.max_xmit_frag,
                RequestHeader::SIZE
            )));
        }
        if self.max_recv_frag as usize <= ResponseHeader::SIZE {
            return Err(RpcError::InvalidConfig(format!(
                "max_recv_frag {} leaves no room for stub data after the {}-byte response header",
                self.max_recv_frag,
                ResponseHeader::SIZE
            )));
        }
        if self.growth_step == 0 {
            return Err(RpcError::InvalidConfig("growth_step must be nonzero".into()));
        }
        if self.max_fragments == 0 {
            return Err(RpcError::InvalidConfig("max_fragments must be nonzero".into()));
        }
        Ok(())
    }

    fn reassembly_limits(&self) -> ReassemblyLimits {
        ReassemblyLimits {
            max_response_size: self.max_response_size,
            max_fragments: self.max_fragments,
            low_water: self.growth_step,
            growth_step: self.growth_step,
        }
    }
}

/// Decoded results of one call
#[derive(Debug)]
pub struct Reply<T> {
    value: T,
    heap: HeapRef,
    fragments: usize,
}

impl<T> Reply<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// Handle to pass to [`Session::release`] once the results are no longer needed
    pub fn heap(&self) -> HeapRef {
        self.heap
    }

    /// Number of response fragments the results arrived in
    pub fn fragments(&self) -> usize {
        self.fragments
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// DCE RPC client session over one transport connection
pub struct Session<T> {
    transport: T,
    config: SessionConfig,
    /// Stamped into every binding so bindings from other sessions are refused
    session_id: u64,
    next_presentation_id: u16,
    next_call_id: u32,
    bindings: Vec<Binding>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self::from_parts(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(transport, config))
    }

    fn from_parts(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            next_presentation_id: 0,
            next_call_id: 1,
            bindings: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Presentation id the next bind will request
    pub fn next_presentation_id(&self) -> u16 {
        self.next_presentation_id
    }

    /// Call id the next transaction will use
    pub fn next_call_id(&self) -> u32 {
        self.next_call_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn alloc_presentation_id(&mut self) -> u16 {
        let id = self.next_presentation_id;
        self.next_presentation_id = id.wrapping_add(1);
        id
    }

    fn alloc_call_id(&mut self) -> u32 {
        let id = self.next_call_id;
        self.next_call_id = id.wrapping_add(1);
        id
    }

    /// Negotiate a presentation context for `service`.
    ///
    /// Local validation failures consume nothing. Once the exchange starts,
    /// the presentation id stays consumed even if the bind fails.
    pub fn bind(&mut self, service: &ServiceDescriptor) -> Result<Binding> {
        service.validate()?;
        if self.bindings.len() >= self.config.max_bindings {
            return Err(RpcError::NoFreeSlots {
                max: self.config.max_bindings,
            });
        }

        let presentation_id = self.alloc_presentation_id();
        let call_id = self.alloc_call_id();
        let mut txn = Transaction::new_bind(
            call_id,
            presentation_id,
            self.config.data_rep,
            self.config.initial_inbound_capacity,
        );

        debug!(
            "Sending bind request: call_id={}, context_id={}, interface={}",
            call_id, presentation_id, service.interface
        );

        let result = self.run_bind(&mut txn, service);
        self.transport.destruct(&mut txn);
        let binding = result?;

        debug!(
            "Bind successful: context_id={}, max_xmit={}, max_recv={}",
            binding.presentation_id, binding.max_xmit_frag, binding.max_recv_frag
        );
        self.bindings.push(binding.clone());
        Ok(binding)
    }

    fn run_bind(&mut self, txn: &mut Transaction, service: &ServiceDescriptor) -> Result<Binding> {
        let call_id = txn.call_id();
        let presentation_id = txn.presentation_id();
        self.transport.init(txn, HeapRef::new(call_id))?;

        let context = ContextElement::new(presentation_id, service.interface, service.transfer_syntax);
        let mut bind = BindPdu::new(call_id, context);
        bind.header = bind.header.with_data_rep(self.config.data_rep);
        bind.max_xmit_frag = self.config.max_xmit_frag;
        bind.max_recv_frag = self.config.max_recv_frag;
        bind.encode_into(txn.outbound_mut())?;

        self.transport.exchange(txn)?;

        let data = txn.inbound().as_slice();
        let header = PduHeader::decode(data)?;
        if header.call_id != call_id {
            return Err(RpcError::CallIdMismatch {
                expected: call_id,
                got: header.call_id,
            });
        }

        match header.packet_type {
            PacketType::BindAck => {}
            PacketType::BindNak => {
                let nak = BindNakPdu::decode(data)?;
                return Err(RpcError::BindRejected {
                    result: ContextResult::ProviderRejection,
                    reason: nak.reject_reason,
                });
            }
            other => {
                return Err(RpcError::UnexpectedPacketType {
                    expected: PacketType::BindAck,
                    got: other,
                })
            }
        }

        let ack = BindAckPdu::decode(data)?;
        let result = match ack.results.as_slice() {
            [only] => *only,
            results => return Err(RpcError::BindResultCount(results.len())),
        };
        if result.result != ContextResult::Acceptance {
            return Err(RpcError::BindRejected {
                result: result.result,
                reason: result.reason,
            });
        }
        if result.transfer_syntax != service.transfer_syntax {
            return Err(RpcError::malformed(format!(
                "server accepted transfer syntax {}, offered {}",
                result.transfer_syntax, service.transfer_syntax
            )));
        }

        // Our transmit size is bounded by what the server can receive and vice versa
        let negotiate = |ours: u16, theirs: u16| if theirs == 0 { ours } else { ours.min(theirs) };

        Ok(Binding {
            session_id: self.session_id,
            presentation_id,
            service: service.clone(),
            side: Side::Client,
            max_xmit_frag: negotiate(self.config.max_xmit_frag, ack.max_recv_frag),
            max_recv_frag: negotiate(self.config.max_recv_frag, ack.max_xmit_frag),
            assoc_group_id: ack.assoc_group_id,
            data_rep: ack.header.data_rep,
        })
    }

    /// Make an RPC call
    ///
    /// # Arguments
    /// * `binding` - A binding negotiated on this session
    /// * `opnum` - The operation number to call
    /// * `codec` - Marshals `params` and unmarshals the response stub data
    ///
    /// # Fragmentation
    /// Requests larger than the negotiated `max_xmit_frag` are split into
    /// several request fragments. Fragmented responses are reassembled before
    /// the codec sees them.
    pub fn call<C: ParamCodec>(
        &mut self,
        binding: &Binding,
        opnum: u16,
        codec: &C,
        params: &C::In,
    ) -> Result<Reply<C::Out>> {
        if !self.bindings.iter().any(|b| b == binding) {
            return Err(RpcError::UnknownBinding(binding.presentation_id));
        }
        binding.service.check_opnum(opnum)?;

        let call_id = self.alloc_call_id();
        let mut txn = Transaction::new_request(
            call_id,
            binding.presentation_id,
            opnum,
            self.config.data_rep,
            self.config.initial_inbound_capacity,
        );

        let result = self.run_call(&mut txn, binding, codec, params);
        self.transport.destruct(&mut txn);
        result
    }

    fn run_call<C: ParamCodec>(
        &mut self,
        txn: &mut Transaction,
        binding: &Binding,
        codec: &C,
        params: &C::In,
    ) -> Result<Reply<C::Out>> {
        let call_id = txn.call_id();
        let opnum = txn.opnum().unwrap_or_default();
        let heap = HeapRef::new(call_id);
        self.transport.init(txn, heap)?;

        let mut buf = BytesMut::with_capacity(RequestHeader::SIZE + 256);
        buf.put_bytes(0, RequestHeader::SIZE);
        codec
            .encode(params, &mut buf, self.config.data_rep)
            .map_err(RpcError::Marshal)?;

        let mut header = RequestHeader::new(call_id, binding.presentation_id, opnum);
        header.header = header.header.with_data_rep(self.config.data_rep);
        let stub_len = buf.len() - RequestHeader::SIZE;
        txn.set_outbound(FragmentGenerator::finish_request(
            header,
            buf,
            binding.max_xmit_frag,
        )?);

        debug!(
            "Sending request: call_id={}, opnum={}, stub_len={}",
            call_id, opnum, stub_len
        );

        self.transport.exchange(txn)?;
        let first =
            decode_first_response(txn.inbound().as_slice(), call_id, binding.presentation_id)?;
        if first.stub_length() > self.config.max_response_size {
            return Err(RpcError::ResponseTooLarge {
                size: first.stub_length(),
                max: self.config.max_response_size,
            });
        }

        let frag_length = first.header.frag_length as usize;
        let received = txn.inbound().len();
        let fragments = if first.header.packet_flags.is_last_frag() && received >= frag_length {
            if received > frag_length {
                return Err(RpcError::malformed(format!(
                    "{} bytes after the last fragment",
                    received - frag_length
                )));
            }
            1
        } else {
            let mut reassembler =
                FragmentReassembler::new(&first, self.config.reassembly_limits());
            reassembler.run(&mut self.transport, txn)?;
            reassembler.fragments()
        };

        let payload = txn.take_inbound().into_bytes().slice(ResponseHeader::SIZE..);
        trace!(
            "Call succeeded: {} bytes result in {} fragments",
            payload.len(),
            fragments
        );

        let value = codec
            .decode(payload, first.header.data_rep)
            .map_err(RpcError::Unmarshal)?;
        self.transport.preserve(txn, heap)?;

        Ok(Reply {
            value,
            heap,
            fragments,
        })
    }

    /// Call with raw stub data in and out
    pub fn call_raw(&mut self, binding: &Binding, opnum: u16, stub_data: &[u8]) -> Result<Bytes> {
        let reply = self.call(binding, opnum, &RawCodec, stub_data)?;
        self.release(reply.heap());
        Ok(reply.into_inner())
    }

    /// Free results preserved by a previous call
    pub fn release(&mut self, heap: HeapRef) {
        self.transport.release(heap);
    }
}

fn decode_first_response(data: &[u8], call_id: u32, context_id: u16) -> Result<ResponseHeader> {
    let header = PduHeader::decode(data)?;
    if header.call_id != call_id {
        return Err(RpcError::CallIdMismatch {
            expected: call_id,
            got: header.call_id,
        });
    }

    match header.packet_type {
        PacketType::Response => {
            let response = ResponseHeader::decode(data)?;
            if response.context_id != context_id {
                return Err(RpcError::malformed(format!(
                    "response on presentation context {}, expected {}",
                    response.context_id, context_id
                )));
            }
            Ok(response)
        }
        PacketType::Fault => {
            let fault = FaultPdu::decode(data)?;
            Err(RpcError::Fault {
                status: fault.status,
            })
        }
        other => Err(RpcError::UnexpectedPacketType {
            expected: PacketType::Response,
            got: other,
        }),
    }
}

impl Session<TcpTransport> {
    /// Connect over TCP with default settings
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        SessionBuilder::new().connect(addr)
    }
}

/// Builder for client sessions
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    tcp: TcpTransportConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_rep(mut self, data_rep: DataRepresentation) -> Self {
        self.config.data_rep = data_rep;
        self
    }

    pub fn max_bindings(mut self, max: usize) -> Self {
        self.config.max_bindings = max;
        self
    }

    pub fn max_frag(mut self, max_xmit_frag: u16, max_recv_frag: u16) -> Self {
        self.config.max_xmit_frag = max_xmit_frag;
        self.config.max_recv_frag = max_recv_frag;
        self
    }

    pub fn initial_inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_inbound_capacity = capacity;
        self
    }

    pub fn growth_step(mut self, step: usize) -> Self {
        self.config.growth_step = step;
        self
    }

    pub fn max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    pub fn max_fragments(mut self, count: usize) -> Self {
        self.config.max_fragments = count;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.tcp.connect_timeout = Some(timeout);
        self
    }

    /// Set read/write timeout
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.tcp.io_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn build<T: Transport>(self, transport: T) -> Result<Session<T>> {
        Session::with_config(transport, self.config)
    }

    /// Connect to the server over TCP
    pub fn connect(self, addr: SocketAddr) -> Result<Session<TcpTransport>> {
        self.config.validate()?;
        let transport = TcpTransport::connect(addr, &self.tcp)?;
        self.build(transport)
    }
}

/// A session shared between threads.
///
/// Every operation holds the lock for the whole exchange, so counter
/// updates, binding registration and the wire traffic of one transaction
/// are never interleaved with another.
pub struct SharedSession<T> {
    inner: Arc<Mutex<Session<T>>>,
}

impl<T> Clone for SharedSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SharedSession<T> {
    pub fn new(session: Session<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn bind(&self, service: &ServiceDescriptor) -> Result<Binding> {
        self.inner.lock().bind(service)
    }

    pub fn call<C: ParamCodec>(
        &self,
        binding: &Binding,
        opnum: u16,
        codec: &C,
        params: &C::In,
    ) -> Result<Reply<C::Out>> {
        self.inner.lock().call(binding, opnum, codec, params)
    }

    pub fn call_raw(&self, binding: &Binding, opnum: u16, stub_data: &[u8]) -> Result<Bytes> {
        self.inner.lock().call_raw(binding, opnum, stub_data)
    }

    pub fn release(&self, heap: HeapRef) {
        self.inner.lock().release(heap)
    }

    /// Run `f` with exclusive access to the session
    pub fn with<R>(&self, f: impl FnOnce(&mut Session<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
