//! DCE RPC PDU (Protocol Data Unit) headers
//!
//! Connection-oriented wire format as defined in DCE 1.1: Remote Procedure
//! Call (C706), chapter 12. Only the PDUs a client needs are modelled here:
//! bind, bind-ack, bind-nak, request, response and fault.
//!
//! Common PDU header:
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  |vers_min| ptype  | pflags |
//! +--------+--------+--------+--------+
//! |        data representation        |
//! +--------+--------+--------+--------+
//! |   frag_len      |   auth_len      |
//! +--------+--------+--------+--------+
//! |             call_id               |
//! +--------+--------+--------+--------+
//! ```
//!
//! Multi-byte integers after the data representation label use the byte
//! order the label names.

use crate::error::{Result, RpcError};
use bytes::{BufMut, Bytes, BytesMut};

/// DCE RPC protocol version
pub const DCE_RPC_VERSION: u8 = 5;
/// DCE RPC protocol minor version
pub const DCE_RPC_VERSION_MINOR: u8 = 0;

/// NDR Transfer Syntax UUID
pub const NDR_SYNTAX_UUID: &str = "8a885d04-1ceb-11c9-9fe8-08002b104860";
pub const NDR_SYNTAX_VERSION: u16 = 2;

/// Default fragment size limit offered in bind PDUs
pub const DEFAULT_MAX_FRAG: u16 = 4280;

/// Header carried by every response fragment after the first one.
///
/// On the connection-oriented wire every fragment repeats the complete
/// response header, so this equals [`ResponseHeader::SIZE`].
pub const FRAGMENT_HEADER_SIZE: usize = ResponseHeader::SIZE;

/// DCE RPC packet types used by a connection-oriented client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResp = 15,
    Shutdown = 17,
    CoCancel = 18,
    Orphaned = 19,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            11 => Some(Self::Bind),
            12 => Some(Self::BindAck),
            13 => Some(Self::BindNak),
            14 => Some(Self::AlterContext),
            15 => Some(Self::AlterContextResp),
            17 => Some(Self::Shutdown),
            18 => Some(Self::CoCancel),
            19 => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// Packet flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// First fragment
    pub const FIRST_FRAG: u8 = 0x01;
    /// Last fragment
    pub const LAST_FRAG: u8 = 0x02;
    /// Cancel pending
    pub const PENDING_CANCEL: u8 = 0x04;
    /// Did not execute
    pub const DID_NOT_EXECUTE: u8 = 0x20;

    pub fn new() -> Self {
        Self(0)
    }

    /// Flags for a PDU that fits in a single fragment
    pub fn complete() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    /// Flags for fragment `index` of a PDU split into `count` fragments
    pub fn for_fragment(index: usize, count: usize) -> Self {
        let mut flags = Self::new();
        if index == 0 {
            flags.set_first_frag();
        }
        if index + 1 == count {
            flags.set_last_frag();
        }
        flags
    }

    pub fn set_first_frag(&mut self) -> &mut Self {
        self.0 |= Self::FIRST_FRAG;
        self
    }

    pub fn set_last_frag(&mut self) -> &mut Self {
        self.0 |= Self::LAST_FRAG;
        self
    }

    pub fn is_first_frag(&self) -> bool {
        (self.0 & Self::FIRST_FRAG) != 0
    }

    pub fn is_last_frag(&self) -> bool {
        (self.0 & Self::LAST_FRAG) != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Integer representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntRep {
    BigEndian = 0,
    LittleEndian = 1,
}

/// Character representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharRep {
    Ascii = 0,
    Ebcdic = 1,
}

/// Floating point representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRep {
    Ieee = 0,
    Vax = 1,
    Cray = 2,
    Ibm = 3,
}

/// Data Representation Format Label (`packed_drep`)
///
/// - Byte 0: character set in bits 0-3, integer byte order in bits 4-7
/// - Byte 1: floating point representation
/// - Bytes 2-3: reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepresentation {
    pub int_rep: IntRep,
    pub char_rep: CharRep,
    pub float_rep: FloatRep,
}

impl DataRepresentation {
    /// NDR default: little-endian, ASCII, IEEE
    pub fn ndr() -> Self {
        Self {
            int_rep: IntRep::LittleEndian,
            char_rep: CharRep::Ascii,
            float_rep: FloatRep::Ieee,
        }
    }

    pub fn big_endian() -> Self {
        Self {
            int_rep: IntRep::BigEndian,
            ..Self::ndr()
        }
    }

    pub fn encode(&self) -> [u8; 4] {
        let byte0 = (self.char_rep as u8) | ((self.int_rep as u8) << 4);
        [byte0, self.float_rep as u8, 0, 0]
    }

    pub fn decode(data: [u8; 4]) -> Self {
        let int_rep = if (data[0] & 0xF0) == 0 {
            IntRep::BigEndian
        } else {
            IntRep::LittleEndian
        };
        let char_rep = if (data[0] & 0x0F) == 0 {
            CharRep::Ascii
        } else {
            CharRep::Ebcdic
        };
        let float_rep = match data[1] {
            0 => FloatRep::Ieee,
            1 => FloatRep::Vax,
            2 => FloatRep::Cray,
            _ => FloatRep::Ibm,
        };
        Self {
            int_rep,
            char_rep,
            float_rep,
        }
    }

    pub fn is_little_endian(&self) -> bool {
        self.int_rep == IntRep::LittleEndian
    }
}

impl Default for DataRepresentation {
    fn default() -> Self {
        Self::ndr()
    }
}

fn put_u16(buf: &mut BytesMut, value: u16, little_endian: bool) {
    if little_endian {
        buf.put_u16_le(value);
    } else {
        buf.put_u16(value);
    }
}

fn put_u32(buf: &mut BytesMut, value: u32, little_endian: bool) {
    if little_endian {
        buf.put_u32_le(value);
    } else {
        buf.put_u32(value);
    }
}

/// Bounds-checked reader over a received PDU.
///
/// Every read that would run past the end of the data fails with
/// [`RpcError::MalformedResponse`] instead of panicking.
pub(crate) struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize, little_endian: bool) -> Self {
        Self {
            data,
            pos,
            little_endian,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(RpcError::malformed(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.bytes(1, what)?[0])
    }

    pub(crate) fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.bytes(2, what)?;
        let raw = [b[0], b[1]];
        Ok(if self.little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.bytes(4, what)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    /// Skip padding so the position becomes a multiple of `align`
    pub(crate) fn align(&mut self, align: usize, what: &str) -> Result<()> {
        let pad = (align - (self.pos % align)) % align;
        self.bytes(pad, what).map(|_| ())
    }
}

/// UUID structure (128 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Uuid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq_hi_and_reserved: u8,
    pub clock_seq_low: u8,
    pub node: [u8; 6],
}

impl Uuid {
    /// Nil UUID (all zeros)
    pub const NIL: Self = Self {
        time_low: 0,
        time_mid: 0,
        time_hi_and_version: 0,
        clock_seq_hi_and_reserved: 0,
        clock_seq_low: 0,
        node: [0; 6],
    };

    /// Parse from string format "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 36 {
            return None;
        }
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5 || parts[4].len() != 12 {
            return None;
        }

        let time_low = u32::from_str_radix(parts[0], 16).ok()?;
        let time_mid = u16::from_str_radix(parts[1], 16).ok()?;
        let time_hi_and_version = u16::from_str_radix(parts[2], 16).ok()?;
        let clock = u16::from_str_radix(parts[3], 16).ok()?;

        let mut node = [0u8; 6];
        for (i, byte) in node.iter_mut().enumerate() {
            *byte = u8::from_str_radix(parts[4].get(i * 2..i * 2 + 2)?, 16).ok()?;
        }

        Some(Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_hi_and_reserved: (clock >> 8) as u8,
            clock_seq_low: clock as u8,
            node,
        })
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    pub fn encode(&self, buf: &mut BytesMut, little_endian: bool) {
        put_u32(buf, self.time_low, little_endian);
        put_u16(buf, self.time_mid, little_endian);
        put_u16(buf, self.time_hi_and_version, little_endian);
        buf.put_u8(self.clock_seq_hi_and_reserved);
        buf.put_u8(self.clock_seq_low);
        buf.put_slice(&self.node);
    }

    pub(crate) fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let time_low = reader.u32("uuid")?;
        let time_mid = reader.u16("uuid")?;
        let time_hi_and_version = reader.u16("uuid")?;
        let clock_seq_hi_and_reserved = reader.u8("uuid")?;
        let clock_seq_low = reader.u8("uuid")?;
        let mut node = [0u8; 6];
        node.copy_from_slice(reader.bytes(6, "uuid")?);
        Ok(Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_hi_and_reserved,
            clock_seq_low,
            node,
        })
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.time_low,
            self.time_mid,
            self.time_hi_and_version,
            self.clock_seq_hi_and_reserved,
            self.clock_seq_low,
        )?;
        for b in &self.node {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Syntax ID - interface UUID with version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntaxId {
    pub uuid: Uuid,
    pub version: u32, // major in lower 16 bits, minor in upper 16 bits
}

impl SyntaxId {
    pub const SIZE: usize = 20;

    pub fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            version: (major as u32) | ((minor as u32) << 16),
        }
    }

    /// The NDR transfer syntax, version 2.0
    pub fn ndr() -> Self {
        let uuid = Uuid::parse(NDR_SYNTAX_UUID).unwrap_or(Uuid::NIL);
        Self::new(uuid, NDR_SYNTAX_VERSION, 0)
    }

    pub fn major_version(&self) -> u16 {
        self.version as u16
    }

    pub fn minor_version(&self) -> u16 {
        (self.version >> 16) as u16
    }

    pub fn encode(&self, buf: &mut BytesMut, little_endian: bool) {
        self.uuid.encode(buf, little_endian);
        put_u32(buf, self.version, little_endian);
    }

    pub(crate) fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let uuid = Uuid::decode(reader)?;
        let version = reader.u32("syntax version")?;
        Ok(Self { uuid, version })
    }
}

impl std::fmt::Display for SyntaxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} v{}.{}",
            self.uuid,
            self.major_version(),
            self.minor_version()
        )
    }
}

/// Common PDU header (16 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_rep: DataRepresentation,
    /// Total length of this fragment, header included
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    /// PDU header size in bytes
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version: DCE_RPC_VERSION,
            version_minor: DCE_RPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::complete(),
            data_rep: DataRepresentation::ndr(),
            frag_length: 0,
            auth_length: 0,
            call_id,
        }
    }

    pub fn with_data_rep(mut self, data_rep: DataRepresentation) -> Self {
        self.data_rep = data_rep;
        self
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let le = self.data_rep.is_little_endian();
        buf.put_u8(self.version);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.packet_flags.as_u8());
        buf.put_slice(&self.data_rep.encode());
        put_u16(buf, self.frag_length, le);
        put_u16(buf, self.auth_length, le);
        put_u32(buf, self.call_id, le);
    }

    /// Peek the `frag_length` field without validating the rest of the header
    pub fn peek_frag_length(data: &[u8]) -> Option<usize> {
        if data.len() < Self::SIZE {
            return None;
        }
        let raw = [data[8], data[9]];
        let len = if (data[4] & 0xF0) == 0 {
            u16::from_be_bytes(raw)
        } else {
            u16::from_le_bytes(raw)
        };
        Some(len as usize)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::malformed(format!(
                "PDU header too short: {} bytes",
                data.len()
            )));
        }

        let version = data[0];
        if version != DCE_RPC_VERSION {
            return Err(RpcError::VersionMismatch {
                expected: DCE_RPC_VERSION,
                got: version,
            });
        }

        let packet_type = PacketType::from_u8(data[2])
            .ok_or_else(|| RpcError::malformed(format!("unknown packet type {}", data[2])))?;
        let data_rep = DataRepresentation::decode([data[4], data[5], data[6], data[7]]);

        let mut reader = WireReader::new(data, 8, data_rep.is_little_endian());
        let frag_length = reader.u16("frag_length")?;
        let auth_length = reader.u16("auth_length")?;
        let call_id = reader.u32("call_id")?;

        if (frag_length as usize) < Self::SIZE {
            return Err(RpcError::malformed(format!(
                "fragment length {} shorter than header",
                frag_length
            )));
        }

        Ok(Self {
            version,
            version_minor: data[1],
            packet_type,
            packet_flags: PacketFlags::from_u8(data[3]),
            data_rep,
            frag_length,
            auth_length,
            call_id,
        })
    }

    /// Decode and require a specific packet type
    pub fn decode_expecting(data: &[u8], expected: PacketType) -> Result<Self> {
        let header = Self::decode(data)?;
        if header.packet_type != expected {
            return Err(RpcError::UnexpectedPacketType {
                expected,
                got: header.packet_type,
            });
        }
        Ok(header)
    }
}

/// `frag_length` for an encoded PDU of `len` bytes
fn frag_length(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| RpcError::PduTooLarge {
        size: len,
        max: u16::MAX as usize,
    })
}

/// Writes `header` over the first [`PduHeader::SIZE`] bytes of `buf`
fn patch_header(buf: &mut [u8], header: &PduHeader) {
    let mut header_buf = BytesMut::with_capacity(PduHeader::SIZE);
    header.encode(&mut header_buf);
    buf[..PduHeader::SIZE].copy_from_slice(&header_buf);
}

/// Presentation context element offered in a bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextElement {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl ContextElement {
    pub fn new(context_id: u16, abstract_syntax: SyntaxId, transfer_syntax: SyntaxId) -> Self {
        Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes: vec![transfer_syntax],
        }
    }

    pub fn encode(&self, buf: &mut BytesMut, little_endian: bool) {
        put_u16(buf, self.context_id, little_endian);
        buf.put_u8(self.transfer_syntaxes.len() as u8);
        buf.put_u8(0); // reserved
        self.abstract_syntax.encode(buf, little_endian);
        for ts in &self.transfer_syntaxes {
            ts.encode(buf, little_endian);
        }
    }

    pub(crate) fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let context_id = reader.u16("context element")?;
        let count = reader.u8("context element")?;
        let _reserved = reader.u8("context element")?;
        let abstract_syntax = SyntaxId::decode(reader)?;
        let mut transfer_syntaxes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transfer_syntaxes.push(SyntaxId::decode(reader)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Bind PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_list: Vec<ContextElement>,
}

impl BindPdu {
    pub fn new(call_id: u32, context: ContextElement) -> Self {
        Self {
            header: PduHeader::new(PacketType::Bind, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            context_list: vec![context],
        }
    }

    /// Append the encoded PDU to `buf`, patching `frag_length` once the body is known
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let start = buf.len();
        let le = self.header.data_rep.is_little_endian();

        buf.put_slice(&[0u8; PduHeader::SIZE]);
        put_u16(buf, self.max_xmit_frag, le);
        put_u16(buf, self.max_recv_frag, le);
        put_u32(buf, self.assoc_group_id, le);

        // p_cont_list_t
        buf.put_u8(self.context_list.len() as u8);
        buf.put_u8(0);
        put_u16(buf, 0, le);
        for ctx in &self.context_list {
            ctx.encode(buf, le);
        }

        let mut header = self.header.clone();
        header.frag_length = match frag_length(buf.len() - start) {
            Ok(len) => len,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        };
        patch_header(&mut buf[start..], &header);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(128);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode_expecting(data, PacketType::Bind)?;
        let mut reader =
            WireReader::new(data, PduHeader::SIZE, header.data_rep.is_little_endian());

        let max_xmit_frag = reader.u16("bind")?;
        let max_recv_frag = reader.u16("bind")?;
        let assoc_group_id = reader.u32("bind")?;
        let count = reader.u8("context list")?;
        let _reserved = reader.bytes(3, "context list")?;

        let mut context_list = Vec::with_capacity(count as usize);
        for _ in 0..count {
            context_list.push(ContextElement::decode(&mut reader)?);
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_list,
        })
    }
}

/// Context result for bind acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContextResult {
    Acceptance = 0,
    UserRejection = 1,
    ProviderRejection = 2,
}

impl ContextResult {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Acceptance,
            1 => Self::UserRejection,
            _ => Self::ProviderRejection,
        }
    }
}

/// One entry of a bind-ack result list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindResult {
    pub result: ContextResult,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl BindResult {
    pub fn accepted(transfer_syntax: SyntaxId) -> Self {
        Self {
            result: ContextResult::Acceptance,
            reason: 0,
            transfer_syntax,
        }
    }
}

/// Bind acknowledgment PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAckPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<BindResult>,
}

impl BindAckPdu {
    pub fn new(call_id: u32, assoc_group_id: u32, accepted_syntax: SyntaxId) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindAck, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id,
            secondary_addr: String::new(),
            results: vec![BindResult::accepted(accepted_syntax)],
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(128);
        let le = self.header.data_rep.is_little_endian();

        buf.put_slice(&[0u8; PduHeader::SIZE]);
        put_u16(&mut buf, self.max_xmit_frag, le);
        put_u16(&mut buf, self.max_recv_frag, le);
        put_u32(&mut buf, self.assoc_group_id, le);

        // Secondary address, NUL terminated
        let sec_addr = self.secondary_addr.as_bytes();
        put_u16(&mut buf, sec_addr.len() as u16 + 1, le);
        buf.put_slice(sec_addr);
        buf.put_u8(0);

        let padding = (4 - (buf.len() % 4)) % 4;
        buf.put_bytes(0, padding);

        // p_result_list_t
        buf.put_u8(self.results.len() as u8);
        buf.put_u8(0);
        put_u16(&mut buf, 0, le);
        for entry in &self.results {
            put_u16(&mut buf, entry.result as u16, le);
            put_u16(&mut buf, entry.reason, le);
            entry.transfer_syntax.encode(&mut buf, le);
        }

        let mut header = self.header.clone();
        header.frag_length = frag_length(buf.len())?;
        patch_header(&mut buf, &header);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode_expecting(data, PacketType::BindAck)?;
        let end = (header.frag_length as usize).min(data.len());
        let mut reader = WireReader::new(
            &data[..end],
            PduHeader::SIZE,
            header.data_rep.is_little_endian(),
        );

        let max_xmit_frag = reader.u16("bind ack")?;
        let max_recv_frag = reader.u16("bind ack")?;
        let assoc_group_id = reader.u32("bind ack")?;

        let sec_addr_len = reader.u16("secondary address")? as usize;
        let mut sec_addr = reader.bytes(sec_addr_len, "secondary address")?;
        if let Some((&0, rest)) = sec_addr.split_last() {
            sec_addr = rest;
        }
        let secondary_addr = String::from_utf8_lossy(sec_addr).into_owned();

        // Result list is 4-byte aligned relative to the PDU start
        reader.align(4, "bind ack padding")?;

        let count = reader.u8("result list")?;
        let _reserved = reader.bytes(3, "result list")?;

        let mut results = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let result = ContextResult::from_u16(reader.u16("bind result")?);
            let reason = reader.u16("bind result")?;
            let transfer_syntax = SyntaxId::decode(&mut reader)?;
            results.push(BindResult {
                result,
                reason,
                transfer_syntax,
            });
        }

        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Bind rejection PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindNakPdu {
    pub header: PduHeader,
    pub reject_reason: u16,
}

impl BindNakPdu {
    pub fn new(call_id: u32, reject_reason: u16) -> Self {
        Self {
            header: PduHeader::new(PacketType::BindNak, call_id),
            reject_reason,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PduHeader::SIZE + 4);
        buf.put_slice(&[0u8; PduHeader::SIZE]);
        put_u16(&mut buf, self.reject_reason, self.header.data_rep.is_little_endian());
        // Empty protocol version list
        buf.put_u8(0);
        buf.put_u8(0);

        let mut header = self.header.clone();
        header.frag_length = buf.len() as u16;
        patch_header(&mut buf, &header);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode_expecting(data, PacketType::BindNak)?;
        let mut reader =
            WireReader::new(data, PduHeader::SIZE, header.data_rep.is_little_endian());
        let reject_reason = reader.u16("bind nak")?;
        Ok(Self {
            header,
            reject_reason,
        })
    }
}

/// Request PDU header: common header plus alloc_hint, context id and opnum (24 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
}

impl RequestHeader {
    pub const SIZE: usize = PduHeader::SIZE + 8;

    pub fn new(call_id: u32, context_id: u16, opnum: u16) -> Self {
        Self {
            header: PduHeader::new(PacketType::Request, call_id),
            alloc_hint: 0,
            context_id,
            opnum,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let le = self.header.data_rep.is_little_endian();
        self.header.encode(buf);
        put_u32(buf, self.alloc_hint, le);
        put_u16(buf, self.context_id, le);
        put_u16(buf, self.opnum, le);
    }

    /// Overwrite the reserved header region at the front of `dst`
    pub fn write_to(&self, dst: &mut [u8]) {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.encode(&mut buf);
        dst[..Self::SIZE].copy_from_slice(&buf);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode_expecting(data, PacketType::Request)?;
        let mut reader =
            WireReader::new(data, PduHeader::SIZE, header.data_rep.is_little_endian());
        let alloc_hint = reader.u32("request header")?;
        let context_id = reader.u16("request header")?;
        let opnum = reader.u16("request header")?;
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            opnum,
        })
    }
}

/// Response PDU header: common header plus alloc_hint, context id and cancel count (24 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
}

impl ResponseHeader {
    pub const SIZE: usize = PduHeader::SIZE + 8;

    pub fn new(call_id: u32, context_id: u16) -> Self {
        Self {
            header: PduHeader::new(PacketType::Response, call_id),
            alloc_hint: 0,
            context_id,
            cancel_count: 0,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let le = self.header.data_rep.is_little_endian();
        self.header.encode(buf);
        put_u32(buf, self.alloc_hint, le);
        put_u16(buf, self.context_id, le);
        buf.put_u8(self.cancel_count);
        buf.put_u8(0); // reserved
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode_expecting(data, PacketType::Response)?;
        if header.auth_length != 0 {
            return Err(RpcError::malformed(format!(
                "unexpected auth trailer of {} bytes on unauthenticated response",
                header.auth_length
            )));
        }
        let mut reader =
            WireReader::new(data, PduHeader::SIZE, header.data_rep.is_little_endian());
        let alloc_hint = reader.u32("response header")?;
        let context_id = reader.u16("response header")?;
        let cancel_count = reader.u8("response header")?;
        if (header.frag_length as usize) < Self::SIZE {
            return Err(RpcError::malformed(format!(
                "response fragment length {} shorter than response header",
                header.frag_length
            )));
        }
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
        })
    }

    /// Stub bytes carried by this fragment
    pub fn stub_length(&self) -> usize {
        self.header.frag_length as usize - Self::SIZE
    }
}

/// A complete response fragment, mostly useful for servers and test doubles
#[derive(Debug, Clone)]
pub struct ResponsePdu {
    pub header: ResponseHeader,
    pub stub_data: Bytes,
}

impl ResponsePdu {
    pub fn new(call_id: u32, stub_data: Bytes) -> Self {
        let mut header = ResponseHeader::new(call_id, 0);
        header.alloc_hint = stub_data.len() as u32;
        Self { header, stub_data }
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.header.header.packet_flags = flags;
        self
    }

    pub fn with_context(mut self, context_id: u16) -> Self {
        self.header.context_id = context_id;
        self
    }

    pub fn encode(&self) -> Result<Bytes> {
        let len = frag_length(ResponseHeader::SIZE + self.stub_data.len())?;
        Ok(self.encode_with_length(len))
    }

    fn encode_with_length(&self, frag_length: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(frag_length as usize);
        let mut header = self.header.clone();
        header.header.frag_length = frag_length;
        header.encode(&mut buf);
        buf.put_slice(&self.stub_data);
        buf.freeze()
    }

    /// Split `stub_data` into response fragments on `context_id` no larger than `max_frag` bytes
    pub fn fragment(call_id: u32, context_id: u16, stub_data: &Bytes, max_frag: u16) -> Vec<Bytes> {
        let max_stub = (max_frag as usize).saturating_sub(ResponseHeader::SIZE).max(1);
        let count = stub_data.len().div_ceil(max_stub).max(1);
        (0..count)
            .map(|i| {
                let start = i * max_stub;
                let end = (start + max_stub).min(stub_data.len());
                let mut pdu = Self::new(call_id, stub_data.slice(start..end))
                    .with_context(context_id)
                    .with_flags(PacketFlags::for_fragment(i, count));
                pdu.header.alloc_hint = stub_data.len() as u32;
                // end - start <= max_stub, so the fragment never exceeds max(max_frag, 25)
                pdu.encode_with_length((ResponseHeader::SIZE + end - start) as u16)
            })
            .collect()
    }
}

/// Fault PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl FaultPdu {
    /// Operation number out of range
    pub const NCA_S_OP_RNG_ERROR: u32 = 0x1c01_0002;
    /// Unknown interface
    pub const NCA_S_UNK_IF: u32 = 0x1c01_0003;

    pub fn new(call_id: u32, status: u32) -> Self {
        Self {
            header: PduHeader::new(PacketType::Fault, call_id),
            alloc_hint: 0,
            context_id: 0,
            cancel_count: 0,
            status,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        let le = self.header.data_rep.is_little_endian();

        buf.put_slice(&[0u8; PduHeader::SIZE]);
        put_u32(&mut buf, self.alloc_hint, le);
        put_u16(&mut buf, self.context_id, le);
        buf.put_u8(self.cancel_count);
        buf.put_u8(0);
        put_u32(&mut buf, self.status, le);
        put_u32(&mut buf, 0, le); // reserved

        let mut header = self.header.clone();
        header.frag_length = buf.len() as u16;
        patch_header(&mut buf, &header);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode_expecting(data, PacketType::Fault)?;
        let mut reader =
            WireReader::new(data, PduHeader::SIZE, header.data_rep.is_little_endian());
        let alloc_hint = reader.u32("fault")?;
        let context_id = reader.u16("fault")?;
        let cancel_count = reader.u8("fault")?;
        let _reserved = reader.u8("fault")?;
        let status = reader.u32("fault status")?;
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}
