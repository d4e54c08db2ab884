//! Response fragment reassembly
//!
//! A response larger than the negotiated `max_recv_frag` arrives as several
//! fragments, each starting with its own response header. The reassembler
//! pulls bytes through [`Transport::read_more`], strips every continuation
//! header in place and leaves one contiguous stub payload behind the first
//! fragment's header:
//!
//! ```text
//! before: [hdr1][stub1][hdr2][stub2][hdr3][stub3]
//! after:  [hdr1][stub1][stub2][stub3]
//! ```
//!
//! All bookkeeping is index based, so growing the buffer never invalidates
//! an offset.

use crate::error::{Result, RpcError};
use crate::pdu::{ResponseHeader, FRAGMENT_HEADER_SIZE};
use crate::transaction::Transaction;
use crate::transport::Transport;
use tracing::trace;

/// Reassembly bounds and buffer growth policy
#[derive(Debug, Clone, Copy)]
pub struct ReassemblyLimits {
    /// Largest assembled stub payload accepted
    pub max_response_size: usize,
    /// Largest number of fragments accepted, first fragment included
    pub max_fragments: usize,
    /// Grow the inbound buffer before a read when headroom drops below this
    pub low_water: usize,
    /// Bytes added per growth
    pub growth_step: usize,
}

impl Default for ReassemblyLimits {
    fn default() -> Self {
        Self {
            max_response_size: 16 * 1024 * 1024,
            max_fragments: 4096,
            low_water: 4096,
            growth_step: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    AwaitFragment,
    HaveFragment,
    Done,
    Error,
}

/// Drives the read loop for one fragmented response
#[derive(Debug)]
pub struct FragmentReassembler {
    limits: ReassemblyLimits,
    call_id: u32,
    context_id: u16,
    state: ReassemblyState,
    /// Index of the current fragment's payload in the inbound buffer
    frag_start: usize,
    frag_size: usize,
    frag_rcvd: usize,
    is_last: bool,
    header_parsed: bool,
    fragments: usize,
    reads: usize,
}

impl FragmentReassembler {
    /// Resume after the first fragment, whose header has already been decoded
    /// and which occupies the front of the transaction's inbound buffer.
    pub fn new(first: &ResponseHeader, limits: ReassemblyLimits) -> Self {
        Self {
            limits,
            call_id: first.header.call_id,
            context_id: first.context_id,
            state: ReassemblyState::AwaitFragment,
            frag_start: ResponseHeader::SIZE,
            frag_size: first.stub_length(),
            frag_rcvd: 0,
            is_last: first.header.packet_flags.is_last_frag(),
            header_parsed: true,
            fragments: 1,
            reads: 0,
        }
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Fragments seen so far, first fragment included
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Number of `read_more` calls issued
    pub fn reads(&self) -> usize {
        self.reads
    }

    fn fail(&mut self, err: RpcError) -> RpcError {
        self.state = ReassemblyState::Error;
        err
    }

    fn check_size(&mut self) -> Result<()> {
        let total = self.frag_start - ResponseHeader::SIZE + self.frag_size;
        if total > self.limits.max_response_size {
            return Err(self.fail(RpcError::ResponseTooLarge {
                size: total,
                max: self.limits.max_response_size,
            }));
        }
        Ok(())
    }

    /// Parse and strip the continuation header sitting at `frag_start`
    fn take_fragment_header(&mut self, txn: &mut Transaction) -> Result<()> {
        let inbound = txn.inbound();
        let raw = &inbound.as_slice()[self.frag_start..self.frag_start + FRAGMENT_HEADER_SIZE];
        let header = match ResponseHeader::decode(raw) {
            Ok(h) => h,
            Err(e) => return Err(self.fail(e)),
        };

        if header.header.call_id != self.call_id {
            return Err(self.fail(RpcError::CallIdMismatch {
                expected: self.call_id,
                got: header.header.call_id,
            }));
        }
        if header.context_id != self.context_id {
            return Err(self.fail(RpcError::malformed(format!(
                "fragment on presentation context {}, expected {}",
                header.context_id, self.context_id
            ))));
        }
        if header.header.packet_flags.is_first_frag() {
            return Err(self.fail(RpcError::malformed(
                "FIRST_FRAG set on a continuation fragment",
            )));
        }

        self.fragments += 1;
        if self.fragments > self.limits.max_fragments {
            return Err(self.fail(RpcError::TooManyFragments {
                max: self.limits.max_fragments,
            }));
        }

        self.frag_size = header.stub_length();
        self.is_last = header.header.packet_flags.is_last_frag();
        self.check_size()?;

        txn.inbound_mut()
            .remove_range(self.frag_start, FRAGMENT_HEADER_SIZE);
        self.header_parsed = true;

        trace!(
            "fragment {}: {} stub bytes, last={}",
            self.fragments,
            self.frag_size,
            self.is_last
        );
        Ok(())
    }

    fn read_more<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        txn: &mut Transaction,
    ) -> Result<()> {
        let inbound = txn.inbound_mut();
        if inbound.ensure_headroom(self.limits.low_water, self.limits.growth_step) {
            trace!("inbound buffer grown to {} bytes", inbound.capacity());
        }

        self.reads += 1;
        match transport.read_more(txn) {
            Ok(n) => {
                trace!("read_more appended {} bytes", n);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Run until the last fragment is complete or an error occurs.
    ///
    /// On success the inbound buffer holds the first response header followed
    /// by the concatenated stub data of every fragment.
    pub fn run<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        txn: &mut Transaction,
    ) -> Result<()> {
        self.check_size()?;

        loop {
            match self.state {
                ReassemblyState::AwaitFragment => {
                    let available = txn.inbound().len() - self.frag_start;
                    if !self.header_parsed {
                        if available >= FRAGMENT_HEADER_SIZE {
                            self.take_fragment_header(txn)?;
                            self.state = ReassemblyState::HaveFragment;
                            continue;
                        }
                    } else if available >= self.frag_size {
                        self.state = ReassemblyState::HaveFragment;
                        continue;
                    }
                    self.read_more(transport, txn)?;
                    if self.header_parsed {
                        self.state = ReassemblyState::HaveFragment;
                    }
                }
                ReassemblyState::HaveFragment => {
                    let available = txn.inbound().len() - self.frag_start;
                    self.frag_rcvd = available.min(self.frag_size);
                    if self.frag_rcvd < self.frag_size {
                        self.state = ReassemblyState::AwaitFragment;
                        continue;
                    }

                    let frag_end = self.frag_start + self.frag_size;
                    if self.is_last {
                        if txn.inbound().len() > frag_end {
                            let extra = txn.inbound().len() - frag_end;
                            return Err(self.fail(RpcError::malformed(format!(
                                "{} bytes after the last fragment",
                                extra
                            ))));
                        }
                        txn.inbound_mut().set_scan_offset(frag_end);
                        self.state = ReassemblyState::Done;
                        continue;
                    }

                    self.frag_start = frag_end;
                    self.frag_rcvd = 0;
                    self.header_parsed = false;
                    txn.inbound_mut().set_scan_offset(frag_end);
                    self.state = ReassemblyState::AwaitFragment;
                }
                ReassemblyState::Done => {
                    trace!(
                        "reassembled {} fragments, {} stub bytes",
                        self.fragments,
                        self.frag_start + self.frag_size - ResponseHeader::SIZE
                    );
                    return Ok(());
                }
                ReassemblyState::Error => {
                    return Err(RpcError::malformed("reassembly already failed"));
                }
            }
        }
    }
}
