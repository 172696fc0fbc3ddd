// Channel - Lock-free SPSC transport between timing and control contexts
//
// One ring per direction. Each context holds one Endpoint: the producer half of
// its outbound ring and the consumer half of its inbound ring. Neither half
// ever blocks.

use crate::messaging::message::{Direction, Message};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

pub type MessageProducer = HeapProd<Message>;
pub type MessageConsumer = HeapCons<Message>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Outbound queue has no free slot. The rejected message is handed back
    /// so the producer can apply its own drop/coalesce policy.
    #[error("channel full, {} not enqueued", .0.kind())]
    Full(Message),

    #[error("{kind} cannot be sent {direction:?}")]
    Misrouted {
        kind: &'static str,
        direction: Direction,
    },
}

/// One context's view of the channel
pub struct Endpoint {
    outbound: Direction,
    tx: MessageProducer,
    rx: MessageConsumer,
}

/// Endpoint held by the timing context
pub type TimingEndpoint = Endpoint;
/// Endpoint held by the control context
pub type ControlEndpoint = Endpoint;

/// Create both directions of the channel.
///
/// Capacities are fixed for the lifetime of the channel; zero is rounded up to one.
pub fn create_channel(
    timing_to_control_capacity: usize,
    control_to_timing_capacity: usize,
) -> (TimingEndpoint, ControlEndpoint) {
    let (up_tx, up_rx) = HeapRb::<Message>::new(timing_to_control_capacity.max(1)).split();
    let (down_tx, down_rx) = HeapRb::<Message>::new(control_to_timing_capacity.max(1)).split();

    let timing = Endpoint {
        outbound: Direction::TimingToControl,
        tx: up_tx,
        rx: down_rx,
    };
    let control = Endpoint {
        outbound: Direction::ControlToTiming,
        tx: down_tx,
        rx: up_rx,
    };
    (timing, control)
}

impl Endpoint {
    /// Enqueue a message without blocking
    pub fn send(&mut self, msg: Message) -> Result<(), ChannelError> {
        if msg.direction() != self.outbound {
            return Err(ChannelError::Misrouted {
                kind: msg.kind(),
                direction: self.outbound,
            });
        }
        self.tx.try_push(msg).map_err(ChannelError::Full)
    }

    /// Dequeue the oldest inbound message, if any
    pub fn try_receive(&mut self) -> Option<Message> {
        self.rx.try_pop()
    }

    /// Direction this endpoint sends in
    pub fn outbound(&self) -> Direction {
        self.outbound
    }

    /// Number of inbound messages waiting
    pub fn pending(&self) -> usize {
        self.rx.occupied_len()
    }

    /// Free slots in the outbound queue
    pub fn free_capacity(&self) -> usize {
        self.tx.vacant_len()
    }

    /// Total outbound capacity
    pub fn capacity(&self) -> usize {
        self.tx.capacity().get()
    }
}
