pub mod broker;
pub mod transport;

pub use broker::{
    CONSUMER_GROUP, DEAD_LETTER_STREAM, NOTIFICATIONS_STREAM, QueueError, StreamBroker,
};
pub use transport::{MemoryTransport, RedisTransport, StreamEntry, StreamTransport};
