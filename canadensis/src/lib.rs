//!
//! Presentation and application layer on top of the Cyphal/CAN transport core
//!
//! [`CoreNode`] combines a [`Transmitter`] and a [`Receiver`] with local node-ID storage and
//! per-port transfer-ID counters, and exposes exactly the application contract of the transport
//! specification: `publish_message`, `request`/`respond` (the two faces of
//! `request_or_respond`), `subscribe`/`unsubscribe`, `tx_peek`/`tx_pop`, `rx_accept`
//! (here, `accept_frame`), and `cleanup_stale_transfers` (here, `run_periodic_tasks`).
//!
//! This crate adds no network-management behavior (no heartbeat, no plug-and-play node-ID
//! allocation) and no hardware I/O: driver crates drain the frame queue and feed received frames
//! back in.
//!

#![no_std]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use canadensis_can::data::Mtu;
use canadensis_can::{Frame, OrderKey, ReceivedTransfer, Receiver, Transmitter};
use canadensis_core::time::{Clock, Instant};
use canadensis_core::transfer::{Header, MessageHeader, ServiceHeader, ServiceTransfer, MessageTransfer, Transfer};
use canadensis_core::{CoreError, NodeId, Priority, ServiceId, SubjectId, TransferId};

/// Operations common to every node implementation, parameterized by the time type it uses
///
/// This is the seam driver crates and application handlers program against, instead of the
/// concrete [`CoreNode`] type, so that a node wrapping more behavior (heartbeat, node
/// information) can still be driven the same way.
pub trait Node {
    type Instant: Instant;

    fn local_node_id(&self) -> Option<NodeId>;
    fn set_local_node_id(&mut self, id: NodeId);

    /// Publishes a message transfer, automatically assigning and advancing its transfer ID
    fn publish_message(
        &mut self,
        subject: SubjectId,
        priority: Priority,
        payload: &[u8],
    ) -> Result<TransferId, CoreError>;

    /// Sends a service request, automatically assigning and advancing its transfer ID
    ///
    /// The returned transfer ID is also carried in the [`ResponseToken`] handed to
    /// [`TransferHandler::handle_request`] on the node that receives this request, so its
    /// eventual response can be matched back to this call if the caller wants to track that.
    fn send_request(
        &mut self,
        service: ServiceId,
        destination: NodeId,
        priority: Priority,
        payload: &[u8],
    ) -> Result<TransferId, CoreError>;

    /// Sends a service response, reusing the transfer ID and priority recorded in the token
    /// produced for the original request
    fn send_response(&mut self, token: ResponseToken, payload: &[u8]) -> Result<(), CoreError>;

    fn subscribe_message(
        &mut self,
        subject: SubjectId,
        extent: usize,
        timeout: <Self::Instant as Instant>::Duration,
    ) -> bool;
    fn subscribe_request(
        &mut self,
        service: ServiceId,
        extent: usize,
        timeout: <Self::Instant as Instant>::Duration,
    ) -> bool;
    fn subscribe_response(
        &mut self,
        service: ServiceId,
        extent: usize,
        timeout: <Self::Instant as Instant>::Duration,
    ) -> bool;
    fn unsubscribe_message(&mut self, subject: SubjectId) -> bool;
    fn unsubscribe_request(&mut self, service: ServiceId) -> bool;
    fn unsubscribe_response(&mut self, service: ServiceId) -> bool;

    /// Returns a reference to the highest-priority queued outgoing frame, without removing it
    fn tx_peek(&self) -> Option<(OrderKey, &Frame<Self::Instant>)>;
    /// Removes and returns the named outgoing frame
    fn tx_pop(&mut self, key: OrderKey) -> Option<Frame<Self::Instant>>;

    /// Releases every receive session that has gone stale, based on the current time
    fn run_periodic_tasks(&mut self, now: Self::Instant);
}

/// A placeholder recording the origin of a service request, enough to later send back a
/// matching response
///
/// Produced by [`CoreNode::accept_frame`] when a request transfer completes and passed to
/// [`TransferHandler::handle_request`]; the handler (or whoever it delegates to) eventually
/// passes it to [`Node::send_response`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResponseToken {
    pub service: ServiceId,
    pub destination: NodeId,
    pub transfer_id: TransferId,
    pub priority: Priority,
}

/// Dispatches transfers completed by [`CoreNode::accept_frame`] to application code
///
/// Each method returns `true` if it consumed the transfer meaningfully; the return value is not
/// interpreted by the node itself (there is no feedback loop into the transport), only offered to
/// callers that want to chain multiple handlers.
pub trait TransferHandler<I: Instant> {
    fn handle_message<N>(&mut self, node: &mut N, transfer: &MessageTransfer<Vec<u8>, I>) -> bool
    where
        N: Node<Instant = I>;

    fn handle_request<N>(
        &mut self,
        node: &mut N,
        token: ResponseToken,
        transfer: &ServiceTransfer<Vec<u8>, I>,
    ) -> bool
    where
        N: Node<Instant = I>;

    fn handle_response<N>(&mut self, node: &mut N, transfer: &ServiceTransfer<Vec<u8>, I>) -> bool
    where
        N: Node<Instant = I>;
}

/// A minimal node: local node-ID storage, a transmit queue, and a receive reassembler, with
/// nothing else
///
/// `C` is a [`Clock`] used to stamp outgoing transfers and to drive `run_periodic_tasks` when the
/// caller does not already have a timestamp on hand.
pub struct CoreNode<C: Clock> {
    clock: C,
    local_node_id: Option<NodeId>,
    transmitter: Transmitter<C::Instant>,
    receiver: Receiver<C::Instant>,
    next_message_transfer_id: BTreeMap<u16, TransferId>,
    next_request_transfer_id: BTreeMap<u16, TransferId>,
}

impl<C: Clock> CoreNode<C> {
    /// Creates a node with no local node ID (anonymous) and an empty transmit queue and receive
    /// subscription set
    pub fn new(clock: C, local_node_id: Option<NodeId>, mtu: Mtu, tx_capacity: usize) -> Self {
        CoreNode {
            clock,
            local_node_id,
            transmitter: Transmitter::new(tx_capacity, mtu),
            receiver: Receiver::new(local_node_id),
            next_message_transfer_id: BTreeMap::new(),
            next_request_transfer_id: BTreeMap::new(),
        }
    }

    /// Returns the configured MTU
    pub fn mtu(&self) -> Mtu {
        self.transmitter.mtu()
    }

    /// Sets the MTU used for frames generated by future transmissions
    pub fn set_mtu(&mut self, mtu: Mtu) {
        self.transmitter.set_mtu(mtu);
    }

    /// Returns the number of frames currently queued for transmission
    pub fn tx_queue_len(&self) -> usize {
        self.transmitter.queue_len()
    }

    /// Processes one incoming frame, dispatching a completed transfer (if any) to `handler`
    ///
    /// Returns `Ok(true)` if a transfer completed and was dispatched, `Ok(false)` if the frame
    /// was consumed without completing a transfer (including every malformed or irrelevant frame,
    /// silently dropped per the transport specification's error design), and `Err` only if the
    /// receive reassembler could not allocate memory for a new session.
    pub fn accept_frame<H>(
        &mut self,
        frame: Frame<C::Instant>,
        iface_index: u8,
        handler: &mut H,
    ) -> Result<bool, canadensis_core::OutOfMemoryError>
    where
        H: TransferHandler<C::Instant>,
        C::Instant: Clone,
    {
        let timestamp = frame.timestamp();
        let id = frame.id();
        let received = self
            .receiver
            .accept(timestamp, id, iface_index, frame.data())?;
        match received {
            None => Ok(false),
            Some(ReceivedTransfer::Message(transfer)) => {
                Ok(handler.handle_message(self, &transfer))
            }
            Some(ReceivedTransfer::Request(transfer)) => {
                let token = ResponseToken {
                    service: transfer.service,
                    destination: transfer.source,
                    transfer_id: transfer.transfer_id,
                    priority: transfer.priority,
                };
                Ok(handler.handle_request(self, token, &transfer))
            }
            Some(ReceivedTransfer::Response(transfer)) => {
                Ok(handler.handle_response(self, &transfer))
            }
        }
    }
}

impl<C: Clock> Node for CoreNode<C>
where
    C::Instant: Clone,
{
    type Instant = C::Instant;

    fn local_node_id(&self) -> Option<NodeId> {
        self.local_node_id
    }

    fn set_local_node_id(&mut self, id: NodeId) {
        self.local_node_id = Some(id);
        self.receiver.set_local_node_id(Some(id));
    }

    fn publish_message(
        &mut self,
        subject: SubjectId,
        priority: Priority,
        payload: &[u8],
    ) -> Result<TransferId, CoreError> {
        let transfer_id = next_id(&mut self.next_message_transfer_id, u16::from(subject));
        let header = Header::Message(MessageHeader {
            timestamp: self.clock.now(),
            transfer_id,
            priority,
            subject,
            source: self.local_node_id,
        });
        let transfer = Transfer { header, payload };
        self.transmitter.push(&transfer)?;
        Ok(transfer_id)
    }

    fn send_request(
        &mut self,
        service: ServiceId,
        destination: NodeId,
        priority: Priority,
        payload: &[u8],
    ) -> Result<TransferId, CoreError> {
        let local = self.local_node_id.ok_or(CoreError::InvalidArgument)?;
        let transfer_id = next_id(&mut self.next_request_transfer_id, u16::from(service));
        let header = Header::Request(ServiceHeader {
            timestamp: self.clock.now(),
            transfer_id,
            priority,
            service,
            source: local,
            destination,
        });
        let transfer = Transfer { header, payload };
        self.transmitter.push(&transfer)?;
        Ok(transfer_id)
    }

    fn send_response(&mut self, token: ResponseToken, payload: &[u8]) -> Result<(), CoreError> {
        let local = self.local_node_id.ok_or(CoreError::InvalidArgument)?;
        let header = Header::Response(ServiceHeader {
            timestamp: self.clock.now(),
            transfer_id: token.transfer_id,
            priority: token.priority,
            service: token.service,
            source: local,
            destination: token.destination,
        });
        let transfer = Transfer { header, payload };
        self.transmitter.push(&transfer)?;
        Ok(())
    }

    fn subscribe_message(
        &mut self,
        subject: SubjectId,
        extent: usize,
        timeout: <Self::Instant as Instant>::Duration,
    ) -> bool {
        self.receiver.subscribe_message(subject, extent, timeout)
    }

    fn subscribe_request(
        &mut self,
        service: ServiceId,
        extent: usize,
        timeout: <Self::Instant as Instant>::Duration,
    ) -> bool {
        self.receiver.subscribe_request(service, extent, timeout)
    }

    fn subscribe_response(
        &mut self,
        service: ServiceId,
        extent: usize,
        timeout: <Self::Instant as Instant>::Duration,
    ) -> bool {
        self.receiver.subscribe_response(service, extent, timeout)
    }

    fn unsubscribe_message(&mut self, subject: SubjectId) -> bool {
        self.receiver.unsubscribe_message(subject)
    }

    fn unsubscribe_request(&mut self, service: ServiceId) -> bool {
        self.receiver.unsubscribe_request(service)
    }

    fn unsubscribe_response(&mut self, service: ServiceId) -> bool {
        self.receiver.unsubscribe_response(service)
    }

    fn tx_peek(&self) -> Option<(OrderKey, &Frame<Self::Instant>)> {
        self.transmitter.peek()
    }

    fn tx_pop(&mut self, key: OrderKey) -> Option<Frame<Self::Instant>> {
        self.transmitter.pop(key)
    }

    fn run_periodic_tasks(&mut self, now: Self::Instant) {
        canadensis_can::cleanup_stale_transfers(&mut self.receiver, now);
    }
}

fn next_id(counters: &mut BTreeMap<u16, TransferId>, port: u16) -> TransferId {
    let entry = counters.entry(port).or_insert_with(TransferId::default);
    let current = *entry;
    *entry = current.increment();
    current
}
