//! The `client` module defines the participant-facing view of the bus.
//!
//! It provides the `Client` struct, which carries a stable identity,
//! queues operations issued before the bus is ready, and layers
//! correlated request/reply on top of plain publish and subscribe.

pub mod bus_client;
pub use bus_client::{Client, SubscriptionHandle};
