//! The `error` module defines the error type shared across the bus.
//!
//! Every fallible operation on the bus returns [`BusError`] instead of
//! panicking: a rejected publish is an `Err` handed back to the caller,
//! never an aborted broker. Each variant carries a stable machine-readable
//! code so callers (and the error-listener hook) can branch without
//! string-matching display text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised by bus operations.
///
/// None of these are fatal to the broker: the worst outcome of any single
/// bad input is one dropped message and an incremented counter.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum BusError {
    /// The message failed validation before entering the pipeline.
    #[error("invalid message: {0}")]
    MessageInvalid(String),

    /// The publisher identity exceeded its fixed-window budget.
    #[error("rate limit exceeded for publisher '{identity}'")]
    RateLimitExceeded {
        /// Effective publisher identity that hit the limit.
        identity: String,
    },

    /// The subscription pattern is rejected by the wildcard policy or malformed.
    #[error("invalid subscription pattern '{pattern}': {reason}")]
    SubscriptionInvalid { pattern: String, reason: String },

    /// A subscriber handler reported a failure during delivery.
    #[error("delivery to subscription {subscription_id} failed: {reason}")]
    DeliveryFailed {
        subscription_id: String,
        reason: String,
    },

    /// A chain of route-emitted publishes exceeded the configured depth guard.
    #[error("route recursion exceeded depth {max_depth} at topic '{topic}'")]
    RouteDepthExceeded { topic: String, max_depth: usize },

    /// A route action failed; siblings were unaffected.
    #[error("route '{route}' action {action} failed: {reason}")]
    RouteActionFailed {
        route: String,
        action: String,
        reason: String,
    },

    /// A route spec was rejected at admission.
    #[error("invalid route: {0}")]
    RouteInvalid(String),

    /// A control-plane call referenced a route that does not exist.
    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// The control-plane guard rejected the call.
    #[error("control call denied: {0}")]
    ControlDenied(String),

    /// A request received no correlated reply within its timeout.
    #[error("request on '{topic}' timed out after {timeout_ms}ms")]
    RequestTimeout { topic: String, timeout_ms: u64 },

    /// A trace snapshot could not be encoded or decoded.
    #[error("invalid trace snapshot: {0}")]
    TraceInvalid(String),
}

impl BusError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MessageInvalid(_) => "MESSAGE_INVALID",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::SubscriptionInvalid { .. } => "SUBSCRIPTION_INVALID",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Self::RouteDepthExceeded { .. } => "ROUTE_DEPTH_EXCEEDED",
            Self::RouteActionFailed { .. } => "ROUTE_ACTION_FAILED",
            Self::RouteInvalid(_) => "ROUTE_INVALID",
            Self::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            Self::ControlDenied(_) => "CONTROL_DENIED",
            Self::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            Self::TraceInvalid(_) => "TRACE_INVALID",
        }
    }
}
