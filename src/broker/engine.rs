//! Bus engine
//!
//! This module contains the in-memory bus implementation responsible for:
//! - validating, rate-limiting and stamping published messages
//! - keeping retained messages and replaying them to new subscribers
//! - running routing rules and recursing on the messages they emit
//! - fanning messages out to matching subscriptions
//!
//! Concurrency and usage notes:
//! - [`Broker`] is the single-writer core and is always held behind a
//!   lock; [`Bus`] is the cloneable handle that owns the `Arc<Mutex<..>>`.
//! - Publishing is two-phase: the pipeline runs under the lock and fills
//!   an outbox, then the lock is released and handlers run from the
//!   outbox. A handler can therefore publish, subscribe or request on
//!   the same bus without deadlocking.
//! - Messages emitted by routing rules re-enter the pipeline depth-first
//!   while the lock is held, so their deliveries are queued before the
//!   triggering message reaches its own subscribers. The configured
//!   route depth caps this recursion.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::broker::message::Message;
use crate::broker::ratelimit::RateLimiter;
use crate::broker::retained::RetainedStore;
use crate::broker::subscription::{
    Handler, OwnerToken, SubscribeOptions, Subscription, SubscriptionId,
};
use crate::broker::topic::TopicPattern;
use crate::config::Settings;
use crate::router::{
    CallFn, ControlGuard, EffectKind, RouteEffect, RouteEvaluation, RouteSpec, Router, TransformFn,
};
use crate::tracer::{RouteSummary, TraceEntry, TraceFilter, Tracer};
use crate::utils::BusError;

/// Callback invoked with every error the caller cannot see directly:
/// failed deliveries, failed route actions and failed route emissions.
pub type ErrorListener = Arc<dyn Fn(&BusError) + Send + Sync>;

/// Identity used for rate accounting when a message carries no source.
/// All sourceless publishers share this one budget.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Monotonic counters shared between the broker and every bus handle.
#[derive(Debug, Default)]
pub struct BusCounters {
    pub published: AtomicU64,
    pub rejected: AtomicU64,
    pub rate_limited: AtomicU64,
    pub delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub dead_deliveries: AtomicU64,
    pub pruned_subscriptions: AtomicU64,
    pub pruned_rate_windows: AtomicU64,
}

/// Point-in-time snapshot of bus activity and store sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub rejected: u64,
    pub rate_limited: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    /// Matches against subscriptions whose owner was already disposed.
    pub dead_deliveries: u64,
    pub pruned_subscriptions: u64,
    pub pruned_rate_windows: u64,
    pub subscriptions: usize,
    pub retained: usize,
    pub retained_evictions: u64,
    pub routes: usize,
    pub traced: usize,
}

/// One pending handler invocation, queued while the lock is held and
/// executed after it is released.
pub(crate) struct Delivery {
    pub subscription_id: SubscriptionId,
    pub handler: Handler,
    pub message: Message,
}

/// A call route action, deferred like a delivery so the named function
/// runs outside the lock.
pub(crate) struct CallInvocation {
    pub route: String,
    pub name: String,
    pub handler: CallFn,
    pub message: Message,
}

/// Everything a locked pipeline run hands back for execution outside
/// the lock.
pub(crate) struct Outbox {
    pub deliveries: Vec<Delivery>,
    pub calls: Vec<CallInvocation>,
    pub errors: Vec<BusError>,
    pub listener: Option<ErrorListener>,
}

impl Outbox {
    fn new(listener: Option<ErrorListener>) -> Self {
        Self {
            deliveries: Vec::new(),
            calls: Vec::new(),
            errors: Vec::new(),
            listener,
        }
    }
}

/// Attaches a late failure to the trace summary of the route it came from.
fn note_route_error(summaries: &mut [RouteSummary], route: &str, error: String) {
    if let Some(summary) = summaries.iter_mut().find(|s| s.id == route) {
        summary.errors.push(error);
    }
}

/// The single-writer core of the bus.
///
/// Owns the subscription table, the retained store, the rate limiter and
/// the optional router and tracer. All methods take `&mut self`; the
/// [`Bus`] handle serializes access behind its lock.
pub struct Broker {
    settings: Settings,
    subscriptions: Vec<Subscription>,
    retained: RetainedStore,
    limiter: RateLimiter,
    router: Option<Router>,
    tracer: Option<Tracer>,
    counters: Arc<BusCounters>,
    error_listener: Option<ErrorListener>,
}

impl Broker {
    pub fn new(settings: Settings) -> Self {
        let retained = RetainedStore::new(settings.limits.max_retained);
        let limiter = RateLimiter::new(
            settings.limits.rate_limit_max,
            settings.limits.rate_limit_window_ms,
        );
        Self {
            settings,
            subscriptions: Vec::new(),
            retained,
            limiter,
            router: None,
            tracer: None,
            counters: Arc::new(BusCounters::default()),
            error_listener: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn install_router(&mut self, router: Router) {
        self.router = Some(router);
    }

    pub fn router_mut(&mut self) -> Option<&mut Router> {
        self.router.as_mut()
    }

    pub fn install_tracer(&mut self, tracer: Tracer) {
        self.tracer = Some(tracer);
    }

    pub fn tracer_mut(&mut self) -> Option<&mut Tracer> {
        self.tracer.as_mut()
    }

    pub fn set_error_listener(&mut self, listener: ErrorListener) {
        self.error_listener = Some(listener);
    }

    fn trace(&mut self, msg: &Message, routes: Vec<RouteSummary>, dropped: Option<String>) {
        if let Some(tracer) = &mut self.tracer {
            tracer.record(msg, routes, dropped);
        }
    }

    /// Runs the full pipeline for one externally published message and
    /// returns its assigned id plus the outbox to execute after unlock.
    pub(crate) fn accept(&mut self, msg: Message) -> Result<(String, Outbox), BusError> {
        let mut outbox = Outbox::new(self.error_listener.clone());
        let id = self.pipeline(msg, 0, &mut outbox)?;
        Ok((id, outbox))
    }

    /// validate -> rate-limit -> retain -> route -> match, in that order.
    ///
    /// `depth` is zero for external publishes and grows by one for each
    /// route-emitted hop.
    fn pipeline(
        &mut self,
        mut msg: Message,
        depth: usize,
        outbox: &mut Outbox,
    ) -> Result<String, BusError> {
        msg.stamp();

        if let Err(err) = msg.validate(&self.settings.limits) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            self.trace(&msg, Vec::new(), Some(err.code().to_string()));
            return Err(err);
        }

        let identity = msg
            .source
            .clone()
            .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());
        if !self.limiter.allow(&identity) {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            let err = BusError::RateLimitExceeded { identity };
            self.trace(&msg, Vec::new(), Some(err.code().to_string()));
            return Err(err);
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);

        if msg.retain {
            self.retained.store(&msg);
        }

        let routed = self.run_routes(&msg, depth, outbox);

        for sub in &self.subscriptions {
            if !sub.pattern.matches(&msg.topic) {
                continue;
            }
            // a match against a disposed owner is a counted no-op
            if !sub.is_live() {
                self.counters.dead_deliveries.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            outbox.deliveries.push(Delivery {
                subscription_id: sub.id.clone(),
                handler: Arc::clone(&sub.handler),
                message: msg.clone(),
            });
        }
        self.trace(&msg, routed, None);

        Ok(msg.id)
    }

    /// Evaluates routing rules for a message and folds their effects into
    /// the pipeline: emitted messages recurse, log lines go to the log,
    /// call actions are deferred into the outbox.
    ///
    /// Returns one summary per matched route, for the trace entry. A
    /// failing route never affects its siblings or the message itself.
    fn run_routes(&mut self, msg: &Message, depth: usize, outbox: &mut Outbox) -> Vec<RouteSummary> {
        let Some(router) = &self.router else {
            return Vec::new();
        };
        let RouteEvaluation {
            effects,
            errors,
            matched,
        } = router.evaluate(msg);
        let mut summaries: Vec<RouteSummary> = matched
            .into_iter()
            .map(|o| RouteSummary {
                id: o.id,
                name: o.name,
                actions: o.actions,
                errors: o.errors,
            })
            .collect();
        for err in errors {
            tracing::warn!("route evaluation failed: {err}");
            outbox.errors.push(err);
        }

        for effect in effects {
            let RouteEffect { route, kind } = effect;
            match kind {
                EffectKind::Emit(next) | EffectKind::Forward(next) => {
                    if depth + 1 > self.settings.bus.max_route_depth {
                        let err = BusError::RouteDepthExceeded {
                            topic: next.topic.clone(),
                            max_depth: self.settings.bus.max_route_depth,
                        };
                        tracing::warn!("route '{route}' stopped: {err}");
                        note_route_error(&mut summaries, &route, err.to_string());
                        outbox.errors.push(err);
                        continue;
                    }
                    if let Err(err) = self.pipeline(next, depth + 1, outbox) {
                        note_route_error(&mut summaries, &route, err.to_string());
                        outbox.errors.push(err);
                    }
                }
                EffectKind::Log { level, line } => match level.as_str() {
                    "error" => tracing::error!("{line}"),
                    "warn" => tracing::warn!("{line}"),
                    "debug" => tracing::debug!("{line}"),
                    "trace" => tracing::trace!("{line}"),
                    _ => tracing::info!("{line}"),
                },
                EffectKind::Call {
                    name,
                    handler,
                    message,
                } => outbox.calls.push(CallInvocation {
                    route,
                    name,
                    handler,
                    message,
                }),
            }
        }

        summaries
    }

    /// Registers a subscription and returns its id plus an outbox holding
    /// the retained messages to replay to it.
    pub(crate) fn register(
        &mut self,
        pattern: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<(SubscriptionId, Outbox), BusError> {
        let compiled = TopicPattern::parse(pattern)?;
        if compiled.is_global() && !self.settings.bus.allow_global_wildcard {
            return Err(BusError::SubscriptionInvalid {
                pattern: pattern.to_string(),
                reason: "global wildcard subscriptions are disabled".to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let mut outbox = Outbox::new(self.error_listener.clone());
        if options.replay_retained {
            for message in self.retained.matching(&compiled) {
                outbox.deliveries.push(Delivery {
                    subscription_id: id.clone(),
                    handler: Arc::clone(&handler),
                    message,
                });
            }
        }

        self.subscriptions.push(Subscription {
            id: id.clone(),
            pattern: compiled,
            handler,
            owner: options.owner,
        });
        tracing::debug!("subscribed {id} to '{pattern}'");
        Ok((id, outbox))
    }

    /// Removes a subscription by id. Idempotent.
    pub(crate) fn unregister(&mut self, id: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    /// Removes every subscription registered under the given owner token.
    pub(crate) fn unregister_owner(&mut self, owner: &OwnerToken) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| match &s.owner {
            Some(o) => !o.same_owner(owner),
            None => true,
        });
        before - self.subscriptions.len()
    }

    /// Removes the owner's subscriptions with this exact pattern string.
    pub(crate) fn unregister_matching(&mut self, pattern: &str, owner: &OwnerToken) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| {
            !(s.pattern.raw() == pattern
                && s.owner.as_ref().is_some_and(|o| o.same_owner(owner)))
        });
        before - self.subscriptions.len()
    }

    /// Prunes subscriptions whose owner has been disposed and rate
    /// windows that have gone idle. Returns `(pruned, swept)`.
    pub fn run_cleanup(&mut self, now_ms: i64) -> (usize, usize) {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.is_live());
        let pruned = before - self.subscriptions.len();
        let swept = self.limiter.sweep(now_ms);
        if pruned > 0 || swept > 0 {
            self.counters
                .pruned_subscriptions
                .fetch_add(pruned as u64, Ordering::Relaxed);
            self.counters
                .pruned_rate_windows
                .fetch_add(swept as u64, Ordering::Relaxed);
            tracing::debug!("cleanup removed {pruned} subscription(s) and {swept} rate window(s)");
        }
        (pruned, swept)
    }

    pub fn retained_get(&mut self, topic: &str) -> Option<Message> {
        self.retained.get(topic)
    }

    /// Clears retained messages, either all of them or only those whose
    /// topic matches a pattern. Returns how many were removed.
    pub fn clear_retained(&mut self, pattern: Option<&str>) -> Result<usize, BusError> {
        match pattern {
            Some(raw) => {
                let compiled = TopicPattern::parse(raw)?;
                Ok(self.retained.clear(Some(&compiled)))
            }
            None => Ok(self.retained.clear(None)),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_live()).count()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
            dead_deliveries: self.counters.dead_deliveries.load(Ordering::Relaxed),
            pruned_subscriptions: self.counters.pruned_subscriptions.load(Ordering::Relaxed),
            pruned_rate_windows: self.counters.pruned_rate_windows.load(Ordering::Relaxed),
            subscriptions: self.subscription_count(),
            retained: self.retained.len(),
            retained_evictions: self.retained.evictions(),
            routes: self.router.as_ref().map(Router::route_count).unwrap_or(0),
            traced: self.tracer.as_ref().map(Tracer::len).unwrap_or(0),
        }
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("subscriptions", &self.subscriptions.len())
            .field("retained", &self.retained.len())
            .field("router", &self.router.is_some())
            .field("tracer", &self.tracer.is_some())
            .finish()
    }
}

/// Cloneable handle to a shared [`Broker`].
///
/// Every clone talks to the same broker state. The handle also carries
/// the readiness flag: a bus built with [`Bus::new_deferred`] reports
/// not-ready until [`Bus::mark_ready`] is called, which is what the
/// client facade keys its queueing on.
#[derive(Clone)]
pub struct Bus {
    broker: Arc<Mutex<Broker>>,
    counters: Arc<BusCounters>,
    ready_tx: Arc<watch::Sender<bool>>,
    ready_rx: watch::Receiver<bool>,
}

impl Bus {
    /// Builds a bus that is ready immediately.
    pub fn new(settings: Settings) -> Self {
        Self::build(settings, true)
    }

    /// Builds a bus that starts not-ready. Publishes and subscribes work
    /// regardless; readiness only gates client-side queueing.
    pub fn new_deferred(settings: Settings) -> Self {
        Self::build(settings, false)
    }

    fn build(settings: Settings, ready: bool) -> Self {
        let broker = Broker::new(settings);
        let counters = Arc::clone(&broker.counters);
        let (ready_tx, ready_rx) = watch::channel(ready);
        Self {
            broker: Arc::new(Mutex::new(broker)),
            counters,
            ready_tx: Arc::new(ready_tx),
            ready_rx,
        }
    }

    fn with_broker<T>(&self, f: impl FnOnce(&mut Broker) -> T) -> T {
        let mut broker = self.broker.lock().unwrap();
        f(&mut broker)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Flips the bus to ready and wakes everything waiting on it.
    pub fn mark_ready(&self) {
        let _ = self.ready_tx.send(true);
    }

    /// A watch receiver that observes readiness transitions.
    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Completes once the bus is ready.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Publishes a message through the full pipeline and delivers it to
    /// matching subscribers before returning. Returns the message id.
    pub fn publish(&self, msg: Message) -> Result<String, BusError> {
        let (id, outbox) = self.with_broker(|b| b.accept(msg))?;
        self.execute(outbox);
        Ok(id)
    }

    /// Subscribes a handler to a topic pattern with default options.
    pub fn subscribe(&self, pattern: &str, handler: Handler) -> Result<SubscriptionId, BusError> {
        self.subscribe_with(pattern, handler, SubscribeOptions::default())
    }

    /// Subscribes a handler with explicit options. Matching retained
    /// messages are replayed to the handler before this returns.
    pub fn subscribe_with(
        &self,
        pattern: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, BusError> {
        let (id, outbox) = self.with_broker(|b| b.register(pattern, handler, options))?;
        self.execute(outbox);
        Ok(id)
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.with_broker(|b| b.unregister(id))
    }

    /// Removes the owner's subscriptions with this exact pattern string.
    /// Returns how many were removed.
    pub fn unsubscribe_matching(&self, pattern: &str, owner: &OwnerToken) -> usize {
        self.with_broker(|b| b.unregister_matching(pattern, owner))
    }

    /// Removes every subscription tied to the owner token and marks the
    /// token disposed. Returns how many subscriptions were removed.
    pub fn dispose_owner(&self, owner: &OwnerToken) -> usize {
        owner.dispose();
        self.with_broker(|b| b.unregister_owner(owner))
    }

    /// The retained message for an exact topic, if any.
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.with_broker(|b| b.retained_get(topic))
    }

    /// Clears retained messages, either all of them or only those whose
    /// topic matches a pattern. Returns how many were removed.
    pub fn clear_retained(&self, pattern: Option<&str>) -> Result<usize, BusError> {
        self.with_broker(|b| b.clear_retained(pattern))
    }

    pub fn stats(&self) -> BusStats {
        self.with_broker(|b| b.stats())
    }

    pub fn settings(&self) -> Settings {
        self.with_broker(|b| b.settings().clone())
    }

    pub fn set_error_listener(&self, listener: ErrorListener) {
        self.with_broker(|b| b.set_error_listener(listener));
    }

    pub fn install_router(&self, router: Router) {
        self.with_broker(|b| b.install_router(router));
    }

    pub fn install_tracer(&self, tracer: Tracer) {
        self.with_broker(|b| b.install_tracer(tracer));
    }

    fn with_router<T>(
        &self,
        f: impl FnOnce(&mut Router) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        self.with_broker(|b| match b.router_mut() {
            Some(router) => f(router),
            None => Err(BusError::RouteInvalid("no router attached".to_string())),
        })
    }

    /// Admits a routing rule. In-process callers are trusted; the
    /// control-plane guard only applies to routes managed via control
    /// messages.
    pub fn add_route(&self, spec: RouteSpec) -> Result<(), BusError> {
        self.with_router(|r| r.add_route(spec))
    }

    /// Replaces an existing route in place. The route keeps its position
    /// among rules with the same order value.
    pub fn update_route(&self, spec: RouteSpec) -> Result<(), BusError> {
        self.with_router(|r| r.update_route(spec))
    }

    pub fn remove_route(&self, id: &str) -> Result<RouteSpec, BusError> {
        self.with_router(|r| r.remove_route(id))
    }

    pub fn set_route_enabled(&self, id: &str, enabled: bool) -> Result<(), BusError> {
        self.with_router(|r| r.set_enabled(id, enabled))
    }

    pub fn list_routes(&self) -> Vec<RouteSpec> {
        self.with_broker(|b| match b.router_mut() {
            Some(router) => router.list(),
            None => Vec::new(),
        })
    }

    /// Drops every route. Returns how many were removed.
    pub fn clear_routes(&self) -> Result<usize, BusError> {
        self.with_router(|r| Ok(r.clear()))
    }

    pub fn register_transform(&self, name: &str, transform: TransformFn) -> Result<(), BusError> {
        self.with_router(|r| {
            r.register_transform(name, transform);
            Ok(())
        })
    }

    pub fn register_call(&self, name: &str, handler: CallFn) -> Result<(), BusError> {
        self.with_router(|r| {
            r.register_call(name, handler);
            Ok(())
        })
    }

    pub fn set_control_guard(&self, guard: ControlGuard) -> Result<(), BusError> {
        self.with_router(|r| {
            r.set_guard(guard);
            Ok(())
        })
    }

    pub(crate) fn control_guard(&self) -> Option<ControlGuard> {
        self.with_broker(|b| b.router_mut().and_then(|r| r.guard()))
    }

    /// Trace entries matching the filter, oldest first. Empty when no
    /// tracer is attached.
    pub fn trace_query(&self, filter: &TraceFilter) -> Vec<TraceEntry> {
        self.with_broker(|b| match b.tracer_mut() {
            Some(tracer) => tracer.query(filter),
            None => Vec::new(),
        })
    }

    fn with_tracer<T>(
        &self,
        f: impl FnOnce(&mut Tracer) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        self.with_broker(|b| match b.tracer_mut() {
            Some(tracer) => f(tracer),
            None => Err(BusError::TraceInvalid("no tracer attached".to_string())),
        })
    }

    /// Serializes the tracer's buffer to a JSON snapshot.
    pub fn trace_export(&self) -> Result<String, BusError> {
        self.with_tracer(|t| t.export_json())
    }

    /// Loads entries from a JSON snapshot into the tracer's buffer.
    /// Returns how many entries were imported.
    pub fn trace_import(&self, json: &str) -> Result<usize, BusError> {
        self.with_tracer(|t| t.import_json(json))
    }

    pub fn trace_clear(&self) {
        self.with_broker(|b| {
            if let Some(tracer) = b.tracer_mut() {
                tracer.clear();
            }
        });
    }

    /// One cleanup pass: prune disposed subscriptions and idle rate
    /// windows. Returns `(pruned, swept)`.
    pub fn run_cleanup(&self) -> (usize, usize) {
        let now = chrono::Utc::now().timestamp_millis();
        self.with_broker(|b| b.run_cleanup(now))
    }

    /// Periodic cleanup, intended to be spawned as a background task.
    pub async fn run_cleanup_loop(bus: Bus) {
        let interval = bus.settings().bus.cleanup_interval_ms;
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(interval)).await;
            bus.run_cleanup();
        }
    }

    /// Runs an outbox after the broker lock has been released: invokes
    /// each queued handler in order, then any deferred route calls, then
    /// hands every collected error to the listener.
    fn execute(&self, outbox: Outbox) {
        let Outbox {
            deliveries,
            calls,
            errors,
            listener,
        } = outbox;
        let mut failures = errors;

        for delivery in deliveries {
            match (delivery.handler)(&delivery.message) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(reason) => {
                    self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "delivery to {} on '{}' failed: {reason}",
                        delivery.subscription_id,
                        delivery.message.topic
                    );
                    failures.push(BusError::DeliveryFailed {
                        subscription_id: delivery.subscription_id,
                        reason,
                    });
                }
            }
        }

        for call in calls {
            if let Err(reason) = (call.handler)(&call.message) {
                tracing::warn!("route '{}' call '{}' failed: {reason}", call.route, call.name);
                failures.push(BusError::RouteActionFailed {
                    route: call.route,
                    action: format!("call '{}'", call.name),
                    reason,
                });
            }
        }

        if let Some(listener) = listener {
            for err in &failures {
                listener(err);
            }
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("ready", &self.is_ready())
            .finish()
    }
}
