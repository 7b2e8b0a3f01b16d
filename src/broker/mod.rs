pub mod engine;
pub mod message;
pub mod ratelimit;
pub mod retained;
pub mod subscription;
pub mod topic;

pub use engine::{ANONYMOUS_IDENTITY, Broker, Bus, BusStats, ErrorListener};
pub use message::Message;
pub use subscription::{Handler, OwnerToken, SubscribeOptions, SubscriptionId};
pub use topic::TopicPattern;

#[cfg(test)]
mod tests;
