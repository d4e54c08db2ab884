//! Transport capability
//!
//! The session never touches sockets itself. It drives a [`Transport`],
//! which moves the outbound PDU to the server and appends whatever the
//! server answers to the transaction's inbound buffer.
//!
//! [`StreamTransport`] implements the capability for any blocking
//! `Read + Write` byte stream; [`TcpTransport`] is the TCP flavour.
//! Connection-oriented PDUs are self-delimiting via the `frag_length`
//! field, so `exchange` reads exactly the first fragment and leaves the
//! rest of a fragmented response to `read_more`.

use crate::error::TransportError;
use crate::pdu::PduHeader;
use crate::transaction::{HeapRef, Transaction};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::trace;

/// Maximum fragment size accepted by default (the `frag_length` field is 16 bits)
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = u16::MAX as usize;

/// Minimum read window offered to the stream by `read_more`
const READ_CHUNK: usize = 4096;

/// Byte transport used by a [`Session`](crate::session::Session).
///
/// All operations block. Timeouts and cancellation belong to the
/// implementation and surface as errors.
pub trait Transport {
    /// Prepare per-call state before the outbound PDU is encoded
    fn init(&mut self, _txn: &mut Transaction, _heap: HeapRef) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send the outbound PDU and receive at least the first inbound fragment
    fn exchange(&mut self, txn: &mut Transaction) -> Result<(), TransportError>;

    /// Append the next chunk of the current response at the inbound high-water
    /// mark and return how many bytes were appended
    fn read_more(&mut self, txn: &mut Transaction) -> Result<usize, TransportError>;

    /// Make the decoded results of `txn` outlive the transaction
    fn preserve(&mut self, _txn: &Transaction, _heap: HeapRef) -> Result<(), TransportError> {
        Ok(())
    }

    /// Free results previously preserved under `heap`
    fn release(&mut self, _heap: HeapRef) {}

    /// Release transaction-scoped resources. Called on every exit path.
    fn destruct(&mut self, _txn: &mut Transaction) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn init(&mut self, txn: &mut Transaction, heap: HeapRef) -> Result<(), TransportError> {
        (**self).init(txn, heap)
    }

    fn exchange(&mut self, txn: &mut Transaction) -> Result<(), TransportError> {
        (**self).exchange(txn)
    }

    fn read_more(&mut self, txn: &mut Transaction) -> Result<usize, TransportError> {
        (**self).read_more(txn)
    }

    fn preserve(&mut self, txn: &Transaction, heap: HeapRef) -> Result<(), TransportError> {
        (**self).preserve(txn, heap)
    }

    fn release(&mut self, heap: HeapRef) {
        (**self).release(heap)
    }

    fn destruct(&mut self, txn: &mut Transaction) {
        (**self).destruct(txn)
    }
}

fn map_io(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
        ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
        _ => TransportError::Io(err),
    }
}

/// TCP transport settings
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    pub connect_timeout: Option<Duration>,
    /// Applied to both reads and writes
    pub io_timeout: Option<Duration>,
    pub max_fragment_size: usize,
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            io_timeout: Some(Duration::from_secs(30)),
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            nodelay: true,
        }
    }
}

/// DCE RPC transport over a blocking byte stream
pub struct StreamTransport<S> {
    stream: S,
    max_fragment_size: usize,
}

/// DCE RPC over TCP (ncacn_ip_tcp)
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
        }
    }

    pub fn with_max_fragment_size(mut self, max_size: usize) -> Self {
        self.max_fragment_size = max_size;
        self
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl StreamTransport<TcpStream> {
    /// Open a TCP connection with the given settings
    pub fn connect(addr: SocketAddr, config: &TcpTransportConfig) -> Result<Self, TransportError> {
        let stream = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(map_io)?;

        stream.set_read_timeout(config.io_timeout)?;
        stream.set_write_timeout(config.io_timeout)?;
        stream.set_nodelay(config.nodelay)?;

        Ok(Self::new(stream).with_max_fragment_size(config.max_fragment_size))
    }
}

impl<S: Read + Write> StreamTransport<S> {
    /// Read exactly `n` bytes onto the end of the inbound buffer
    fn read_exact_into(&mut self, txn: &mut Transaction, n: usize) -> Result<(), TransportError> {
        let inbound = txn.inbound_mut();
        if inbound.headroom() < n {
            inbound.grow(n - inbound.headroom());
        }
        self.stream
            .read_exact(&mut inbound.spare_mut()[..n])
            .map_err(map_io)?;
        inbound.commit(n)
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn exchange(&mut self, txn: &mut Transaction) -> Result<(), TransportError> {
        self.stream.write_all(txn.outbound()).map_err(map_io)?;
        self.stream.flush().map_err(map_io)?;

        let start = txn.inbound().len();
        self.read_exact_into(txn, PduHeader::SIZE)?;

        let frag_length = PduHeader::peek_frag_length(&txn.inbound().as_slice()[start..])
            .unwrap_or_default();
        if frag_length < PduHeader::SIZE {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("invalid fragment length: {} < header size", frag_length),
            )));
        }
        if frag_length > self.max_fragment_size {
            return Err(TransportError::FragmentTooLarge {
                size: frag_length,
                max: self.max_fragment_size,
            });
        }

        self.read_exact_into(txn, frag_length - PduHeader::SIZE)?;
        trace!(
            "exchange: sent {} bytes, received first fragment of {} bytes",
            txn.outbound().len(),
            frag_length
        );
        Ok(())
    }

    fn read_more(&mut self, txn: &mut Transaction) -> Result<usize, TransportError> {
        let inbound = txn.inbound_mut();
        if inbound.headroom() == 0 {
            inbound.grow(READ_CHUNK);
        }
        let n = loop {
            match self.stream.read(inbound.spare_mut()) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(e)),
            }
        };
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        inbound.commit(n)?;
        Ok(n)
    }
}
