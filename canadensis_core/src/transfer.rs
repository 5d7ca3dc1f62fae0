//!
//! Transfer metadata and the transfer types exchanged between the transport core and the
//! application
//!

use crate::{NodeId, Priority, ServiceId, SubjectId, TransferId};

/// The metadata that precedes a message transfer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageHeader<I> {
    /// The time this transfer was sent (TX) or received (RX)
    pub timestamp: I,
    pub transfer_id: TransferId,
    pub priority: Priority,
    pub subject: SubjectId,
    /// The sending node, or `None` for an anonymous transfer
    ///
    /// An anonymous message must fit into a single frame (see `make_can_id`).
    pub source: Option<NodeId>,
}

/// The metadata that precedes a service request or response transfer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceHeader<I> {
    pub timestamp: I,
    pub transfer_id: TransferId,
    pub priority: Priority,
    pub service: ServiceId,
    pub source: NodeId,
    pub destination: NodeId,
}

/// The metadata that precedes any kind of transfer
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Header<I> {
    Message(MessageHeader<I>),
    Request(ServiceHeader<I>),
    Response(ServiceHeader<I>),
}

impl<I: Clone> Header<I> {
    pub fn timestamp(&self) -> I {
        match self {
            Header::Message(header) => header.timestamp.clone(),
            Header::Request(header) | Header::Response(header) => header.timestamp.clone(),
        }
    }

    pub fn transfer_id(&self) -> TransferId {
        match self {
            Header::Message(header) => header.transfer_id,
            Header::Request(header) | Header::Response(header) => header.transfer_id,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Header::Message(header) => header.priority,
            Header::Request(header) | Header::Response(header) => header.priority,
        }
    }

    /// Returns the node that sent this transfer, or `None` if it is an anonymous message
    pub fn source(&self) -> Option<NodeId> {
        match self {
            Header::Message(header) => header.source,
            Header::Request(header) | Header::Response(header) => Some(header.source),
        }
    }
}

/// A transfer ready to be broken into frames, or reassembled from frames
///
/// `P` is the payload representation (a borrowed slice on the way into the transmit queue, an
/// owned buffer on the way out of the receive reassembler).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Transfer<P, I> {
    pub header: Header<I>,
    pub payload: P,
}

/// A received message transfer, with its payload already truncated to the subscription's extent
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageTransfer<P, I> {
    pub timestamp: I,
    pub transfer_id: TransferId,
    pub priority: Priority,
    pub subject: SubjectId,
    pub source: Option<NodeId>,
    pub payload: P,
}

/// A received service request or response transfer, with its payload already truncated to the
/// subscription's extent
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceTransfer<P, I> {
    pub timestamp: I,
    pub transfer_id: TransferId,
    pub priority: Priority,
    pub service: ServiceId,
    pub source: NodeId,
    pub destination: NodeId,
    pub payload: P,
}
