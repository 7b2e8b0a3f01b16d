use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::broker::message::Message;
use crate::broker::topic::TopicPattern;

pub type SubscriptionId = String;

/// Callback invoked with each delivered message.
///
/// Handlers run outside the broker lock, so they are free to publish,
/// subscribe or issue requests on the same bus. A returned `Err` is
/// counted as a delivery failure and reported to the error listener;
/// it never stops delivery to the remaining subscribers.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), String> + Send + Sync>;

/// Liveness token shared by everything one owner registers on the bus.
///
/// Cloning the token shares the same disposal flag. Once [`dispose`]
/// (OwnerToken::dispose) is called, subscriptions tagged with the token
/// stop receiving messages immediately and are removed by the next
/// cleanup pass.
#[derive(Debug, Clone, Default)]
pub struct OwnerToken {
    disposed: Arc<AtomicBool>,
}

impl OwnerToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks everything registered under this token as dead.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether two tokens share the same disposal flag.
    pub fn same_owner(&self, other: &OwnerToken) -> bool {
        Arc::ptr_eq(&self.disposed, &other.disposed)
    }
}

/// Options applied when registering a subscription.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Replay matching retained messages to the new subscriber before
    /// the subscribe call returns. On by default.
    pub replay_retained: bool,
    /// Ties the subscription's lifetime to an owner token.
    pub owner: Option<OwnerToken>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            replay_retained: true,
            owner: None,
        }
    }
}

impl SubscribeOptions {
    pub fn owned_by(owner: &OwnerToken) -> Self {
        Self {
            owner: Some(owner.clone()),
            ..Self::default()
        }
    }

    pub fn without_replay() -> Self {
        Self {
            replay_retained: false,
            ..Self::default()
        }
    }
}

/// One registered subscription: a compiled pattern plus its handler.
pub struct Subscription {
    pub id: SubscriptionId,
    pub pattern: TopicPattern,
    pub handler: Handler,
    pub owner: Option<OwnerToken>,
}

impl Subscription {
    /// A subscription is live until its owner token is disposed.
    /// Subscriptions without an owner live until unsubscribed.
    pub fn is_live(&self) -> bool {
        match &self.owner {
            Some(owner) => !owner.is_disposed(),
            None => true,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern.raw())
            .field("handler", &"<handler>")
            .field("owner", &self.owner)
            .finish()
    }
}
