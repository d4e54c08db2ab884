//! Service descriptors and bindings

use crate::error::{Result, RpcError};
use crate::pdu::{DataRepresentation, SyntaxId, Uuid};
use std::collections::BTreeSet;

/// How `call` validates operation numbers for a service.
///
/// Without a stub table there is nothing to check against, so the caller
/// has to opt out of validation explicitly with [`OpnumPolicy::Unchecked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpnumPolicy {
    /// Any opnum is sent to the server, which reports unknown ones as a fault
    Unchecked,
    /// Only the listed opnums may be called
    Registered(BTreeSet<u16>),
}

impl OpnumPolicy {
    pub fn allows(&self, opnum: u16) -> bool {
        match self {
            OpnumPolicy::Unchecked => true,
            OpnumPolicy::Registered(ops) => ops.contains(&opnum),
        }
    }
}

/// The interface a binding is negotiated for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub interface: SyntaxId,
    pub transfer_syntax: SyntaxId,
    pub opnums: OpnumPolicy,
}

impl ServiceDescriptor {
    /// Service over NDR that accepts any opnum
    pub fn unchecked(interface: SyntaxId) -> Self {
        Self {
            interface,
            transfer_syntax: SyntaxId::ndr(),
            opnums: OpnumPolicy::Unchecked,
        }
    }

    /// Service over NDR restricted to the given opnums
    pub fn with_operations(interface: SyntaxId, opnums: impl IntoIterator<Item = u16>) -> Self {
        Self {
            interface,
            transfer_syntax: SyntaxId::ndr(),
            opnums: OpnumPolicy::Registered(opnums.into_iter().collect()),
        }
    }

    /// Parse the interface UUID from its string form
    pub fn parse(uuid: &str, major: u16, minor: u16) -> Result<Self> {
        let uuid = Uuid::parse(uuid)
            .ok_or_else(|| RpcError::ServiceInvalid(format!("bad interface UUID {:?}", uuid)))?;
        Ok(Self::unchecked(SyntaxId::new(uuid, major, minor)))
    }

    pub fn transfer_syntax(mut self, transfer_syntax: SyntaxId) -> Self {
        self.transfer_syntax = transfer_syntax;
        self
    }

    pub fn operations(mut self, opnums: impl IntoIterator<Item = u16>) -> Self {
        self.opnums = OpnumPolicy::Registered(opnums.into_iter().collect());
        self
    }

    /// Local validation performed by `bind` before any I/O
    pub fn validate(&self) -> Result<()> {
        if self.interface.uuid.is_nil() {
            return Err(RpcError::ServiceInvalid("nil interface UUID".to_string()));
        }
        if self.transfer_syntax.uuid.is_nil() {
            return Err(RpcError::ServiceInvalid(
                "nil transfer syntax UUID".to_string(),
            ));
        }
        if let OpnumPolicy::Registered(ops) = &self.opnums {
            if ops.is_empty() {
                return Err(RpcError::ServiceInvalid(
                    "registered operation set is empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn check_opnum(&self, opnum: u16) -> Result<()> {
        if self.opnums.allows(opnum) {
            Ok(())
        } else {
            Err(RpcError::OpnumInvalid(opnum))
        }
    }
}

/// Which end of the association a binding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// An accepted presentation context. Immutable once created.
///
/// Equality includes the identity of the session that negotiated it, so a
/// binding is only ever equal to clones of itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub(crate) session_id: u64,
    pub(crate) presentation_id: u16,
    pub(crate) service: ServiceDescriptor,
    pub(crate) side: Side,
    pub(crate) max_xmit_frag: u16,
    pub(crate) max_recv_frag: u16,
    pub(crate) assoc_group_id: u32,
    pub(crate) data_rep: DataRepresentation,
}

impl Binding {
    pub fn presentation_id(&self) -> u16 {
        self.presentation_id
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Largest request fragment the server accepts
    pub fn max_xmit_frag(&self) -> u16 {
        self.max_xmit_frag
    }

    pub fn max_recv_frag(&self) -> u16 {
        self.max_recv_frag
    }

    pub fn assoc_group_id(&self) -> u32 {
        self.assoc_group_id
    }

    /// Data representation the server answered the bind with
    pub fn data_rep(&self) -> DataRepresentation {
        self.data_rep
    }
}
