//! A minimal SocketCAN-backed Cyphal/CAN node: subscribes to one subject, publishes an
//! incrementing counter on another, and prints every transfer it receives
//!
//! This exercises the application contract end to end (`subscribe`, `publish_message`,
//! `tx_peek`/`tx_pop`, `accept_frame`, `run_periodic_tasks`) without any node-management logic
//! (no heartbeat, no node-ID allocation): those are explicitly out of scope for the transport
//! core this demo drives.
//!
//! Usage: `canadensis_cli <interface> <node-id> <subscribe-subject> <publish-subject>`
//!
//! ```text
//! sudo modprobe vcan
//! sudo ip link add dev vcan0 type vcan
//! sudo ip link set up vcan0
//! canadensis_cli vcan0 42 7509 100
//! ```

use std::convert::TryFrom;
use std::env;
use std::time::{Duration, Instant};

use socketcan::CANSocket;

use canadensis::{CoreNode, Node, ResponseToken, TransferHandler};
use canadensis_can::data::Mtu;
use canadensis_core::time::{Instant as CyphalInstant, MicrosecondsDuration64};
use canadensis_core::transfer::{MessageTransfer, ServiceTransfer};
use canadensis_core::{NodeId, Priority, SubjectId};
use canadensis_linux::{LinuxCan, SystemClock};

struct PrintHandler;

impl<I: CyphalInstant> TransferHandler<I> for PrintHandler {
    fn handle_message<N>(&mut self, _node: &mut N, transfer: &MessageTransfer<Vec<u8>, I>) -> bool
    where
        N: Node<Instant = I>,
    {
        println!(
            "message: subject={} source={:?} payload={:?}",
            u16::from(transfer.subject),
            transfer.source,
            transfer.payload
        );
        true
    }

    fn handle_request<N>(
        &mut self,
        _node: &mut N,
        _token: ResponseToken,
        transfer: &ServiceTransfer<Vec<u8>, I>,
    ) -> bool
    where
        N: Node<Instant = I>,
    {
        println!("request: service={} payload={:?}", u16::from(transfer.service), transfer.payload);
        true
    }

    fn handle_response<N>(&mut self, _node: &mut N, transfer: &ServiceTransfer<Vec<u8>, I>) -> bool
    where
        N: Node<Instant = I>,
    {
        println!("response: service={} payload={:?}", u16::from(transfer.service), transfer.payload);
        true
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let interface = args.next().expect("usage: canadensis_cli <interface> <node-id> <subscribe-subject> <publish-subject>");
    let node_id = NodeId::try_from(args.next().expect("expected node ID").parse::<u8>()?)
        .expect("node ID must be in [0, 127]");
    let subscribe_subject = SubjectId::try_from(args.next().expect("expected subscribe subject").parse::<u16>()?)?;
    let publish_subject = SubjectId::try_from(args.next().expect("expected publish subject").parse::<u16>()?)?;

    let socket = CANSocket::open(&interface)?;
    socket.set_read_timeout(Duration::from_millis(200))?;
    socket.set_write_timeout(Duration::from_millis(200))?;
    let mut can = LinuxCan::new(socket);

    let mut node: CoreNode<SystemClock> =
        CoreNode::new(SystemClock::new(), Some(node_id), Mtu::Can8, 64);
    node.subscribe_message(subscribe_subject, 256, MicrosecondsDuration64::new(1_000_000));

    let mut handler = PrintHandler;
    let mut counter: u32 = 0;
    let mut last_publish = Instant::now();

    loop {
        if let Some(frame) = can.receive()? {
            node.accept_frame(frame, 0, &mut handler)?;
        }

        if last_publish.elapsed() >= Duration::from_millis(500) {
            let payload = counter.to_le_bytes();
            node.publish_message(publish_subject, Priority::Nominal, &payload)?;
            counter = counter.wrapping_add(1);
            last_publish = Instant::now();
        }

        while let Some((key, frame)) = node.tx_peek() {
            let frame = frame.clone();
            can.send(frame)?;
            node.tx_pop(key);
        }
    }
}
