//!
//! Reassembling received frames into transfers
//!
//! A [`Receiver`] owns three lists of subscriptions, one per transfer kind, each keyed by
//! port-ID. Each subscription owns 128 session slots indexed by source node-ID; a session tracks
//! the state of one in-progress (or most recently completed) transfer from one source.
//!

use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use core::cmp::Ordering;

use canadensis_core::time::Instant;
use canadensis_core::transfer::{MessageTransfer, ServiceTransfer};
use canadensis_core::{NodeId, OutOfMemoryError, ServiceId, SubjectId, TransferId};

use crate::crc::TransferCrc;
use crate::data::{parse_frame, CanId, FrameModel, IdKind};

/// One registered interest in messages of a subject, or requests/responses of a service
pub struct Subscription<I: Instant> {
    port_id: u16,
    extent: usize,
    tid_timeout: I::Duration,
    sessions: Vec<Option<Session<I>>>,
}

impl<I: Instant> Subscription<I> {
    fn new(port_id: u16, extent: usize, tid_timeout: I::Duration) -> Self {
        let mut sessions = Vec::new();
        sessions.resize_with(usize::from(NodeId::MAX) + 1, || None);
        Subscription {
            port_id,
            extent,
            tid_timeout,
            sessions,
        }
    }

    pub fn port_id(&self) -> u16 {
        self.port_id
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Applies one admitted, non-anonymous frame from `source` to this subscription's session
    /// state, returning the completed transfer payload if the frame finished one
    fn accept(
        &mut self,
        timestamp: I,
        iface_index: u8,
        source: NodeId,
        frame: &FrameModel,
    ) -> Result<Option<Vec<u8>>, OutOfMemoryError> {
        let slot = usize::from(u8::from(source));
        let single_frame = frame.start_of_transfer && frame.end_of_transfer;

        let is_new_transfer = match &self.sessions[slot] {
            None => true,
            Some(session) => {
                let timed_out = timestamp.duration_since(&session.last_timestamp) > self.tid_timeout;
                let switching_interface =
                    frame.transfer_id != session.transfer_id && iface_index != session.iface_index;
                let fresh_sof = frame.start_of_transfer && !timed_out && !switching_interface;

                if fresh_sof && session.completed {
                    // The previous transfer this session assembled completed successfully and
                    // retained its transfer-ID as a baseline; a genuinely new transfer from the
                    // same source on the same interface must have a transfer-ID strictly ahead
                    // of it, within a forward distance of 16 (half the 5-bit modulus). Anything
                    // else is a retransmitted duplicate of the transfer already delivered, or a
                    // transfer-ID so far out of sequence it cannot be trusted: drop it without
                    // disturbing the session.
                    let distance = session.transfer_id.forward_distance(frame.transfer_id);
                    if distance == 0 || distance > 16 {
                        return Ok(None);
                    }
                }

                frame.start_of_transfer || timed_out || switching_interface
            }
        };

        if is_new_transfer {
            match &mut self.sessions[slot] {
                Some(session) => session.restart(iface_index, frame.transfer_id, single_frame),
                None => {
                    self.sessions[slot] = Some(Session::try_fresh(
                        timestamp.clone(),
                        iface_index,
                        frame.transfer_id,
                        single_frame,
                        self.extent,
                    )?);
                }
            }
            if !frame.start_of_transfer {
                // The session was restarted because of a timeout or an interface switch, but
                // this particular frame is not itself a start-of-transfer frame: there is
                // nothing admissible until a fresh SOF arrives.
                return Ok(None);
            }
        }

        let session = self.sessions[slot]
            .as_mut()
            .expect("just allocated or restarted above");

        if frame.toggle != session.expected_toggle || frame.transfer_id != session.transfer_id {
            return Ok(None);
        }
        if !frame.start_of_transfer && !session.started {
            // An end-of-transfer or middle frame arrived for a session that has not observed a
            // start-of-transfer frame for its current transfer-ID. Reject without disturbing
            // the session; it keeps waiting for a fresh SOF.
            return Ok(None);
        }

        session.started = true;
        session.last_timestamp = timestamp;
        session.iface_index = iface_index;
        session.expected_toggle = !session.expected_toggle;

        if session.single_frame {
            for &byte in frame.payload {
                if session.buffer.len() < self.extent {
                    session.buffer.push(byte);
                }
            }
        } else {
            for &byte in frame.payload {
                session.feed_byte(byte, self.extent);
            }
        }

        if frame.end_of_transfer {
            if session.single_frame {
                session.completed = true;
                Ok(Some(session.finish()))
            } else if session.crc_tail_len == 2
                && session.body_crc.get() == u16::from_le_bytes(session.crc_tail)
            {
                session.completed = true;
                Ok(Some(session.finish()))
            } else {
                session.finish();
                Ok(None)
            }
        } else {
            Ok(None)
        }
    }

    /// Releases every session this subscription holds, without removing the subscription itself
    fn clear_sessions(&mut self) {
        for slot in &mut self.sessions {
            *slot = None;
        }
    }
}

/// Per-(subscription, source) reassembly state
struct Session<I: Instant> {
    last_timestamp: I,
    iface_index: u8,
    transfer_id: TransferId,
    expected_toggle: bool,
    /// Whether a start-of-transfer frame has been admitted for the transfer this session is
    /// currently assembling
    started: bool,
    single_frame: bool,
    buffer: Vec<u8>,
    body_crc: TransferCrc,
    /// The last (up to) two payload bytes that have not yet been folded into `body_crc`; at
    /// end-of-transfer these are the transfer's trailing CRC bytes
    crc_tail: [u8; 2],
    crc_tail_len: u8,
    /// Whether this session has ever delivered a complete transfer; gates the forward-distance
    /// duplicate check in `Subscription::accept`
    completed: bool,
}

impl<I: Instant> Session<I> {
    fn try_fresh(
        timestamp: I,
        iface_index: u8,
        transfer_id: TransferId,
        single_frame: bool,
        extent: usize,
    ) -> Result<Self, OutOfMemoryError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(extent)
            .map_err(|_: TryReserveError| OutOfMemoryError)?;
        Ok(Session {
            last_timestamp: timestamp,
            iface_index,
            transfer_id,
            expected_toggle: true,
            started: false,
            single_frame,
            buffer,
            body_crc: TransferCrc::new(),
            crc_tail: [0; 2],
            crc_tail_len: 0,
            completed: false,
        })
    }

    fn restart(&mut self, iface_index: u8, transfer_id: TransferId, single_frame: bool) {
        self.iface_index = iface_index;
        self.transfer_id = transfer_id;
        self.single_frame = single_frame;
        self.expected_toggle = true;
        self.started = false;
        self.buffer.clear();
        self.body_crc = TransferCrc::new();
        self.crc_tail = [0; 2];
        self.crc_tail_len = 0;
        self.completed = false;
    }

    fn feed_byte(&mut self, byte: u8, extent: usize) {
        if self.crc_tail_len == 2 {
            let committed = self.crc_tail[0];
            self.body_crc.add(committed);
            if self.buffer.len() < extent {
                self.buffer.push(committed);
            }
            self.crc_tail[0] = self.crc_tail[1];
            self.crc_tail[1] = byte;
        } else {
            self.crc_tail[self.crc_tail_len as usize] = byte;
            self.crc_tail_len += 1;
        }
    }

    /// Hands back the assembled payload and resets everything but the transfer-ID and interface
    /// index, which are retained so that the next transfer from this source is recognized as new
    fn finish(&mut self) -> Vec<u8> {
        self.started = false;
        self.expected_toggle = true;
        self.crc_tail_len = 0;
        self.body_crc = TransferCrc::new();
        core::mem::take(&mut self.buffer)
    }
}

/// A message transfer or a service request/response transfer produced by [`Receiver::accept`]
pub enum ReceivedTransfer<I> {
    Message(MessageTransfer<Vec<u8>, I>),
    Request(ServiceTransfer<Vec<u8>, I>),
    Response(ServiceTransfer<Vec<u8>, I>),
}

/// Reassembles received CAN frames into transfers
pub struct Receiver<I: Instant> {
    local_node_id: Option<NodeId>,
    messages: Vec<Subscription<I>>,
    requests: Vec<Subscription<I>>,
    responses: Vec<Subscription<I>>,
}

impl<I: Instant> Receiver<I> {
    pub fn new(local_node_id: Option<NodeId>) -> Self {
        Receiver {
            local_node_id,
            messages: Vec::new(),
            requests: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn local_node_id(&self) -> Option<NodeId> {
        self.local_node_id
    }

    pub fn set_local_node_id(&mut self, id: Option<NodeId>) {
        self.local_node_id = id;
    }

    /// Subscribes to messages on a subject, replacing any existing subscription for it
    ///
    /// Returns `true` if this added a new subscription, `false` if it replaced (and reset the
    /// sessions of) an existing one.
    pub fn subscribe_message(&mut self, subject: SubjectId, extent: usize, tid_timeout: I::Duration) -> bool {
        subscribe(&mut self.messages, u16::from(subject), extent, tid_timeout)
    }

    pub fn subscribe_request(&mut self, service: ServiceId, extent: usize, tid_timeout: I::Duration) -> bool {
        subscribe(&mut self.requests, u16::from(service), extent, tid_timeout)
    }

    pub fn subscribe_response(&mut self, service: ServiceId, extent: usize, tid_timeout: I::Duration) -> bool {
        subscribe(&mut self.responses, u16::from(service), extent, tid_timeout)
    }

    pub fn unsubscribe_message(&mut self, subject: SubjectId) -> bool {
        unsubscribe(&mut self.messages, u16::from(subject))
    }

    pub fn unsubscribe_request(&mut self, service: ServiceId) -> bool {
        unsubscribe(&mut self.requests, u16::from(service))
    }

    pub fn unsubscribe_response(&mut self, service: ServiceId) -> bool {
        unsubscribe(&mut self.responses, u16::from(service))
    }

    /// Processes one received frame
    ///
    /// Returns `Ok(None)` for a frame that was parsed but did not complete a transfer (including
    /// every frame silently dropped along the way); `Ok(Some(transfer))` when a transfer just
    /// completed; `Err` only on allocation failure.
    pub fn accept(
        &mut self,
        timestamp: I,
        id: CanId,
        iface_index: u8,
        payload: &[u8],
    ) -> Result<Option<ReceivedTransfer<I>>, OutOfMemoryError> {
        let model = match parse_frame(id, payload) {
            Some(model) => model,
            None => return Ok(None),
        };
        if !model.addressed_to(self.local_node_id) {
            return Ok(None);
        }

        match model.kind {
            IdKind::Message { subject, anonymous } => {
                let subscription = match find_mut(&mut self.messages, u16::from(subject)) {
                    Some(s) => s,
                    None => return Ok(None),
                };
                if anonymous {
                    // Single-frame fast path: no session, no CRC, straight truncation copy.
                    let take = model.payload.len().min(subscription.extent);
                    let payload = Vec::from(&model.payload[..take]);
                    return Ok(Some(ReceivedTransfer::Message(MessageTransfer {
                        timestamp,
                        transfer_id: model.transfer_id,
                        priority: model.priority,
                        subject,
                        source: None,
                        payload,
                    })));
                }
                let source = model.source.expect("non-anonymous message always has a source");
                let payload = subscription.accept(timestamp, iface_index, source, &model)?;
                Ok(payload.map(|payload| {
                    ReceivedTransfer::Message(MessageTransfer {
                        timestamp,
                        transfer_id: model.transfer_id,
                        priority: model.priority,
                        subject,
                        source: Some(source),
                        payload,
                    })
                }))
            }
            IdKind::Request { service } => self.accept_service(timestamp, iface_index, &model, service, true),
            IdKind::Response { service } => self.accept_service(timestamp, iface_index, &model, service, false),
        }
    }

    fn accept_service(
        &mut self,
        timestamp: I,
        iface_index: u8,
        model: &FrameModel,
        service: ServiceId,
        is_request: bool,
    ) -> Result<Option<ReceivedTransfer<I>>, OutOfMemoryError> {
        let list = if is_request {
            &mut self.requests
        } else {
            &mut self.responses
        };
        let subscription = match find_mut(list, u16::from(service)) {
            Some(s) => s,
            None => return Ok(None),
        };
        let source = model.source.expect("service transfers always carry a source");
        let destination = model
            .destination
            .expect("service transfers always carry a destination");
        let payload = subscription.accept(timestamp, iface_index, source, model)?;
        Ok(payload.map(|payload| {
            let transfer = ServiceTransfer {
                timestamp,
                transfer_id: model.transfer_id,
                priority: model.priority,
                service,
                source,
                destination,
                payload,
            };
            if is_request {
                ReceivedTransfer::Request(transfer)
            } else {
                ReceivedTransfer::Response(transfer)
            }
        }))
    }
}

fn subscribe<I: Instant>(
    list: &mut Vec<Subscription<I>>,
    port_id: u16,
    extent: usize,
    tid_timeout: I::Duration,
) -> bool {
    if let Some(existing) = list.iter_mut().find(|s| s.port_id == port_id) {
        existing.extent = extent;
        existing.tid_timeout = tid_timeout;
        existing.clear_sessions();
        false
    } else {
        list.push(Subscription::new(port_id, extent, tid_timeout));
        true
    }
}

fn unsubscribe<I: Instant>(list: &mut Vec<Subscription<I>>, port_id: u16) -> bool {
    let before = list.len();
    list.retain(|s| s.port_id != port_id);
    list.len() != before
}

fn find_mut<I: Instant>(list: &mut [Subscription<I>], port_id: u16) -> Option<&mut Subscription<I>> {
    list.iter_mut().find(|s| s.port_id == port_id)
}

/// Releases every session whose last activity is older than its subscription's transfer-ID
/// timeout
///
/// There is no background reaper; this must be called periodically (for example, from the
/// owning node's idle loop) for stale sessions to be reclaimed ahead of their next frame.
pub fn cleanup_stale_transfers<I: Instant>(receiver: &mut Receiver<I>, now: I) {
    for list in [
        &mut receiver.messages,
        &mut receiver.requests,
        &mut receiver.responses,
    ] {
        for subscription in list.iter_mut() {
            for slot in subscription.sessions.iter_mut() {
                let stale = match slot {
                    Some(session) => {
                        matches!(
                            now.overflow_safe_compare(&session.last_timestamp),
                            Ordering::Greater
                        ) && now.duration_since(&session.last_timestamp) > subscription.tid_timeout
                    }
                    None => false,
                };
                if stale {
                    *slot = None;
                }
            }
        }
    }
}
