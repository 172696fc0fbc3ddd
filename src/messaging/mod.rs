// Messaging - Typed messages and the bounded inter-context channel

pub mod channels;
pub mod message;

pub use channels::{ChannelError, ControlEndpoint, Endpoint, TimingEndpoint, create_channel};
pub use message::{ClockSource, Direction, Message, TimingStatus};
