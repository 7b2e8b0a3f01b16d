//! The `router` module is the declarative rule engine the broker runs
//! per message: match criteria and predicate trees select messages,
//! transforms reshape their payloads, and actions emit, forward, log or
//! call into registered functions. A message-driven control plane
//! manages routes at runtime.

pub mod control;
pub mod engine;
pub mod path;
pub mod rule;

pub use control::{CONTROL_TOPIC, ControlCommand, ControlReply, attach_control};
pub use engine::{
    CallFn, ControlGuard, EffectKind, RouteEffect, RouteEvaluation, RouteOutcome, Router,
    TransformFn,
};
pub use rule::{ActionSpec, MatchSpec, Predicate, RouteSpec, TransformSpec};
