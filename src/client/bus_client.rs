//! Client facade
//!
//! `Client` wraps a [`Bus`] handle with the conveniences callers expect:
//! a stable identity stamped onto everything it publishes, queueing of
//! operations issued before the bus is ready, subscription handles tied
//! to one disposable owner token, and correlated request/reply.
//!
//! Queueing notes:
//! - Operations against a not-yet-ready bus are buffered. On readiness
//!   the buffered subscribes run first, then the buffered publishes, so
//!   a client's early publish can reach its own early subscription.
//! - Queued publishes are stamped up front; the id handed back at call
//!   time is the id the message eventually travels with.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::broker::engine::Bus;
use crate::broker::message::Message;
use crate::broker::subscription::{Handler, OwnerToken, SubscribeOptions, SubscriptionId};
use crate::broker::topic::TopicPattern;
use crate::utils::BusError;

/// Prefix of the ephemeral reply topics created by [`Client::request`].
const REPLY_TOPIC_PREFIX: &str = "_reply";

#[derive(Debug)]
enum SubState {
    /// Queued; the bus was not ready when the subscribe was issued.
    Pending,
    /// Registered on the bus under this id.
    Active(SubscriptionId),
    /// Cancelled by the caller or rejected at flush time.
    Cancelled,
}

/// Handle to one subscription made through a client.
///
/// The handle works the same whether the subscription is already on the
/// bus or still queued: cancelling a queued subscription simply keeps it
/// from ever registering.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pattern: String,
    bus: Bus,
    state: Arc<Mutex<SubState>>,
}

impl SubscriptionHandle {
    fn new(pattern: &str, bus: Bus, state: SubState) -> Self {
        Self {
            pattern: pattern.to_string(),
            bus,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The bus-side subscription id, once registered.
    pub fn id(&self) -> Option<SubscriptionId> {
        match &*self.state.lock().unwrap() {
            SubState::Active(id) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock().unwrap(), SubState::Active(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock().unwrap(), SubState::Pending)
    }

    /// Ends the subscription in whatever state it is in. Returns `false`
    /// when it was already cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match &*state {
            SubState::Pending => {
                *state = SubState::Cancelled;
                true
            }
            SubState::Active(id) => {
                let id = id.clone();
                *state = SubState::Cancelled;
                drop(state);
                self.bus.unsubscribe(&id)
            }
            SubState::Cancelled => false,
        }
    }
}

struct PendingSubscribe {
    pattern: String,
    handler: Handler,
    options: SubscribeOptions,
    state: Arc<Mutex<SubState>>,
}

struct ClientInner {
    flushed: bool,
    pending_subscribes: Vec<PendingSubscribe>,
    pending_publishes: Vec<Message>,
}

/// A participant on the bus.
///
/// Cloning a client shares its identity, owner token and pending queue.
#[derive(Clone)]
pub struct Client {
    id: String,
    bus: Bus,
    owner: OwnerToken,
    inner: Arc<Mutex<ClientInner>>,
    default_timeout_ms: u64,
}

impl Client {
    /// Creates a client with a generated id.
    pub fn new(bus: &Bus) -> Self {
        Self::named(bus, format!("client-{}", Uuid::new_v4()))
    }

    /// Creates a client with a caller-chosen id. The id becomes the
    /// `source` of everything the client publishes and the identity its
    /// rate budget is accounted under.
    pub fn named(bus: &Bus, id: impl Into<String>) -> Self {
        let ready = bus.is_ready();
        let client = Self {
            id: id.into(),
            bus: bus.clone(),
            owner: OwnerToken::new(),
            inner: Arc::new(Mutex::new(ClientInner {
                flushed: ready,
                pending_subscribes: Vec::new(),
                pending_publishes: Vec::new(),
            })),
            default_timeout_ms: bus.settings().bus.default_request_timeout_ms,
        };

        if !ready {
            // flush in the background once the bus comes up, when a
            // runtime is available to do it on
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                let watcher = client.clone();
                rt.spawn(async move {
                    watcher.bus.ready().await;
                    watcher.flush_pending();
                });
            }
        }
        client
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    pub fn is_disposed(&self) -> bool {
        self.owner.is_disposed()
    }

    /// Completes once the bus is ready and this client's queue has been
    /// flushed to it.
    pub async fn ready(&self) {
        self.bus.ready().await;
        self.flush_pending();
    }

    /// `(queued subscribes, queued publishes)` still waiting on readiness.
    pub(crate) fn pending_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.pending_subscribes.len(), inner.pending_publishes.len())
    }

    /// Subscribes with default options (retained replay on).
    pub fn subscribe(&self, pattern: &str, handler: Handler) -> Result<SubscriptionHandle, BusError> {
        self.subscribe_with(pattern, handler, SubscribeOptions::default())
    }

    /// Subscribes with explicit options. The subscription is always tied
    /// to this client's owner token.
    ///
    /// Pattern syntax is checked immediately even when the subscribe is
    /// queued; the wildcard policy applies when it reaches the bus.
    pub fn subscribe_with(
        &self,
        pattern: &str,
        handler: Handler,
        mut options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        if self.owner.is_disposed() {
            return Err(BusError::SubscriptionInvalid {
                pattern: pattern.to_string(),
                reason: "client is disposed".to_string(),
            });
        }
        options.owner = Some(self.owner.clone());
        self.ensure_flushed();

        let mut inner = self.inner.lock().unwrap();
        if inner.flushed {
            drop(inner);
            let id = self.bus.subscribe_with(pattern, handler, options)?;
            return Ok(SubscriptionHandle::new(pattern, self.bus.clone(), SubState::Active(id)));
        }

        TopicPattern::parse(pattern)?;
        let handle = SubscriptionHandle::new(pattern, self.bus.clone(), SubState::Pending);
        inner.pending_subscribes.push(PendingSubscribe {
            pattern: pattern.to_string(),
            handler,
            options,
            state: Arc::clone(&handle.state),
        });
        Ok(handle)
    }

    /// Subscribes the same handler under several patterns at once.
    ///
    /// Every pattern is checked before any subscription is made, so a bad
    /// pattern in the list leaves nothing registered.
    pub fn subscribe_many(
        &self,
        patterns: &[&str],
        handler: Handler,
    ) -> Result<Vec<SubscriptionHandle>, BusError> {
        for pattern in patterns {
            TopicPattern::parse(pattern)?;
        }
        let mut handles = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            handles.push(self.subscribe(pattern, Arc::clone(&handler))?);
        }
        Ok(handles)
    }

    /// Drops every subscription this client holds under the exact pattern
    /// string, registered or still queued. Returns how many went away.
    pub fn unsubscribe(&self, pattern: &str) -> usize {
        let mut removed = self.bus.unsubscribe_matching(pattern, &self.owner);
        let mut inner = self.inner.lock().unwrap();
        for pending in &inner.pending_subscribes {
            if pending.pattern == pattern {
                let mut state = pending.state.lock().unwrap();
                if matches!(*state, SubState::Pending) {
                    *state = SubState::Cancelled;
                    removed += 1;
                }
            }
        }
        inner
            .pending_subscribes
            .retain(|p| !matches!(*p.state.lock().unwrap(), SubState::Cancelled));
        removed
    }

    /// Publishes a payload under this client's identity. Returns the
    /// message id, which is assigned up front even for queued publishes.
    pub fn publish(&self, topic: &str, data: Value) -> Result<String, BusError> {
        self.send(Message::new(topic, data))
    }

    /// Publishes a payload that the bus keeps as the topic's retained
    /// value. A `null` payload clears it.
    pub fn publish_retained(&self, topic: &str, data: Value) -> Result<String, BusError> {
        self.send(Message::retained(topic, data))
    }

    /// Publishes a full envelope. The client id becomes the source when
    /// the envelope has none.
    pub fn send(&self, mut msg: Message) -> Result<String, BusError> {
        if self.owner.is_disposed() {
            return Err(BusError::MessageInvalid("client is disposed".to_string()));
        }
        if msg.source.is_none() {
            msg.source = Some(self.id.clone());
        }
        self.ensure_flushed();

        let mut inner = self.inner.lock().unwrap();
        if inner.flushed {
            drop(inner);
            return self.bus.publish(msg);
        }

        // queued messages still get immediate validation and an id
        msg.stamp();
        msg.validate(&self.bus.settings().limits)?;
        let id = msg.id.clone();
        inner.pending_publishes.push(msg);
        Ok(id)
    }

    /// Sends a request and waits for its correlated reply, using the
    /// configured default timeout.
    pub async fn request(&self, topic: &str, data: Value) -> Result<Message, BusError> {
        self.request_with_timeout(topic, data, self.default_timeout_ms).await
    }

    /// Sends a request and waits up to `timeout_ms` for a reply.
    ///
    /// The request travels with a fresh correlation id and a `reply_to`
    /// pointing at an ephemeral reply topic. The reply subscription is
    /// removed when this returns, on success and on timeout alike; a
    /// reply that arrives later is simply a publish with no subscribers.
    pub async fn request_with_timeout(
        &self,
        topic: &str,
        data: Value,
        timeout_ms: u64,
    ) -> Result<Message, BusError> {
        if self.owner.is_disposed() {
            return Err(BusError::MessageInvalid("client is disposed".to_string()));
        }
        self.bus.ready().await;
        self.flush_pending();

        let correlation = Uuid::new_v4().to_string();
        let reply_topic = format!("{REPLY_TOPIC_PREFIX}.{correlation}");

        let (tx, rx) = oneshot::channel::<Message>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let expected = correlation.clone();
        let reply_handler: Handler = Arc::new(move |msg: &Message| {
            if msg.correlation_id.as_deref() == Some(expected.as_str()) {
                if let Some(tx) = slot.lock().unwrap().take() {
                    let _ = tx.send(msg.clone());
                }
            }
            Ok(())
        });

        let sub_id = self.bus.subscribe_with(
            &reply_topic,
            reply_handler,
            SubscribeOptions {
                replay_retained: false,
                owner: Some(self.owner.clone()),
            },
        )?;

        let mut msg = Message::new(topic, data);
        msg.source = Some(self.id.clone());
        msg.reply_to = Some(reply_topic);
        msg.correlation_id = Some(correlation);
        if let Err(err) = self.bus.publish(msg) {
            self.bus.unsubscribe(&sub_id);
            return Err(err);
        }

        let reply = tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), rx).await;
        self.bus.unsubscribe(&sub_id);
        match reply {
            Ok(Ok(message)) => Ok(message),
            _ => Err(BusError::RequestTimeout {
                topic: topic.to_string(),
                timeout_ms,
            }),
        }
    }

    /// Publishes a reply to a request, copying its correlation id to the
    /// request's `reply_to` topic. Errors when the message carries no
    /// `reply_to`.
    pub fn respond(&self, request: &Message, data: Value) -> Result<String, BusError> {
        let Some(reply_to) = &request.reply_to else {
            return Err(BusError::MessageInvalid(
                "message carries no reply_to topic".to_string(),
            ));
        };
        let mut reply = Message::new(reply_to.clone(), data);
        reply.correlation_id = request.correlation_id.clone();
        self.send(reply)
    }

    /// Tears the client down: every subscription it owns is removed and
    /// queued operations are discarded. Further operations error.
    pub fn dispose(&self) {
        self.bus.dispose_owner(&self.owner);
        let mut inner = self.inner.lock().unwrap();
        for pending in inner.pending_subscribes.drain(..) {
            *pending.state.lock().unwrap() = SubState::Cancelled;
        }
        inner.pending_publishes.clear();
    }

    fn ensure_flushed(&self) {
        if self.bus.is_ready() {
            self.flush_pending();
        }
    }

    /// Replays the queue onto the bus: subscribes first, publishes after.
    /// Runs at most once; later calls are no-ops.
    fn flush_pending(&self) {
        let (subs, pubs) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.flushed {
                return;
            }
            inner.flushed = true;
            (
                std::mem::take(&mut inner.pending_subscribes),
                std::mem::take(&mut inner.pending_publishes),
            )
        };

        for pending in subs {
            if matches!(*pending.state.lock().unwrap(), SubState::Cancelled) {
                continue;
            }
            match self
                .bus
                .subscribe_with(&pending.pattern, pending.handler, pending.options)
            {
                Ok(id) => *pending.state.lock().unwrap() = SubState::Active(id),
                Err(err) => {
                    tracing::warn!("queued subscribe to '{}' failed: {err}", pending.pattern);
                    *pending.state.lock().unwrap() = SubState::Cancelled;
                }
            }
        }

        for msg in pubs {
            let topic = msg.topic.clone();
            if let Err(err) = self.bus.publish(msg) {
                tracing::warn!("queued publish to '{topic}' failed: {err}");
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("disposed", &self.owner.is_disposed())
            .finish()
    }
}
