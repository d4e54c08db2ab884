//! Scripted transport for unit tests

use crate::error::TransportError;
use crate::pdu::{BindAckPdu, BindPdu, PacketFlags, ResponsePdu};
use crate::transaction::{HeapRef, Transaction};
use crate::transport::Transport;
use bytes::Bytes;
use std::collections::VecDeque;

/// One scripted server answer: `first` is delivered by `exchange`, `rest`
/// trickles out of `read_more` in `chunk`-sized pieces.
pub(crate) struct Scripted {
    first: Vec<u8>,
    rest: VecDeque<u8>,
    chunk: usize,
}

impl Scripted {
    pub(crate) fn new(first: Vec<u8>, rest: Vec<u8>, chunk: usize) -> Self {
        Self {
            first,
            rest: rest.into(),
            chunk,
        }
    }
}

type Responder = Box<dyn FnOnce(&Transaction) -> Result<Scripted, TransportError>>;

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responders: VecDeque<Responder>,
    current: Option<Scripted>,
    pub sent: Vec<Vec<u8>>,
    pub call_ids: Vec<u32>,
    pub inits: usize,
    pub read_more_calls: usize,
    pub preserved: Vec<HeapRef>,
    pub released: Vec<HeapRef>,
    pub destructed: usize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, scripted: Scripted) {
        self.responders.push_back(Box::new(move |_| Ok(scripted)));
    }

    pub(crate) fn push_with(
        &mut self,
        f: impl FnOnce(&Transaction) -> Result<Scripted, TransportError> + 'static,
    ) {
        self.responders.push_back(Box::new(f));
    }

    /// First fragment through `exchange`, the rest through `read_more`
    pub(crate) fn push_fragments(&mut self, frags: Vec<Bytes>, chunk: usize) {
        let first = frags.first().map(|f| f.to_vec()).unwrap_or_default();
        let rest = frags.iter().skip(1).flat_map(|f| f.iter().copied()).collect();
        self.push(Scripted::new(first, rest, chunk));
    }

    /// Accept whatever bind arrives
    pub(crate) fn push_bind_ack(&mut self) {
        self.push_with(|txn| {
            let bind = BindPdu::decode(txn.outbound()).map_err(|e| TransportError::Other(e.to_string()))?;
            let syntax = bind.context_list[0].transfer_syntaxes[0];
            let ack = BindAckPdu::new(bind.header.call_id, 1, syntax);
            let ack = ack.encode().map_err(|e| TransportError::Other(e.to_string()))?;
            Ok(Scripted::new(ack.to_vec(), Vec::new(), usize::MAX))
        });
    }

    /// Answer a request with `stubs`, one fragment per entry, echoing its call and context ids
    pub(crate) fn push_response(&mut self, stubs: Vec<Vec<u8>>, chunk: usize) {
        self.push_with(move |txn| {
            let frags = response_fragments_on(txn.call_id(), txn.presentation_id(), &stubs);
            let first = frags[0].to_vec();
            let rest = frags[1..].iter().flat_map(|f| f.iter().copied()).collect();
            Ok(Scripted::new(first, rest, chunk))
        });
    }

    pub(crate) fn push_error(&mut self, err: impl FnOnce() -> TransportError + 'static) {
        self.push_with(move |_| Err(err()));
    }
}

impl Transport for ScriptedTransport {
    fn init(&mut self, _txn: &mut Transaction, _heap: HeapRef) -> Result<(), TransportError> {
        self.inits += 1;
        Ok(())
    }

    fn exchange(&mut self, txn: &mut Transaction) -> Result<(), TransportError> {
        self.sent.push(txn.outbound().to_vec());
        self.call_ids.push(txn.call_id());
        let responder = self
            .responders
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)?;
        let scripted = responder(txn)?;
        txn.inbound_mut().extend_from_slice(&scripted.first);
        self.current = Some(scripted);
        Ok(())
    }

    fn read_more(&mut self, txn: &mut Transaction) -> Result<usize, TransportError> {
        self.read_more_calls += 1;
        let scripted = self
            .current
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;
        if scripted.rest.is_empty() {
            return Err(TransportError::ConnectionClosed);
        }
        let inbound = txn.inbound_mut();
        let n = scripted.chunk.min(scripted.rest.len()).min(inbound.headroom());
        for (dst, byte) in inbound.spare_mut()[..n]
            .iter_mut()
            .zip(scripted.rest.drain(..n))
        {
            *dst = byte;
        }
        inbound.commit(n)?;
        Ok(n)
    }

    fn preserve(&mut self, _txn: &Transaction, heap: HeapRef) -> Result<(), TransportError> {
        self.preserved.push(heap);
        Ok(())
    }

    fn release(&mut self, heap: HeapRef) {
        self.released.push(heap);
    }

    fn destruct(&mut self, _txn: &mut Transaction) {
        self.destructed += 1;
        self.current = None;
    }
}

/// Encode one response fragment per stub with FIRST/LAST flags set positionally
pub(crate) fn response_fragments(call_id: u32, stubs: &[Vec<u8>]) -> Vec<Bytes> {
    response_fragments_on(call_id, 0, stubs)
}

pub(crate) fn response_fragments_on(call_id: u32, context_id: u16, stubs: &[Vec<u8>]) -> Vec<Bytes> {
    let total: usize = stubs.iter().map(Vec::len).sum();
    stubs
        .iter()
        .enumerate()
        .map(|(i, stub)| {
            let mut pdu = ResponsePdu::new(call_id, Bytes::from(stub.clone()))
                .with_context(context_id)
                .with_flags(PacketFlags::for_fragment(i, stubs.len()));
            pdu.header.alloc_hint = total as u32;
            pdu.encode().unwrap()
        })
        .collect()
}
