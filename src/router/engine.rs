//! Rule engine
//!
//! Routes are evaluated ascending by order rank against every message
//! the pipeline accepts. Evaluation itself is pure: it returns a list of
//! effects (messages to emit, lines to log, calls to run) and never
//! touches the bus directly. The broker folds those effects back into
//! its pipeline, so route recursion and depth limiting stay in one
//! place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::broker::message::Message;
use crate::router::rule::{
    ActionSpec, CompiledRoute, RouteSpec, apply_transform, compile_route,
};
use crate::utils::BusError;

/// Named payload transform: takes a value from the message envelope,
/// returns its replacement.
pub type TransformFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Named function a call action invokes. Runs outside the broker lock,
/// like a subscriber handler.
pub type CallFn = Arc<dyn Fn(&Message) -> Result<(), String> + Send + Sync>;

/// Authorization check applied to control-plane messages before their
/// command is executed.
pub type ControlGuard = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// One effect produced by a matching route.
pub struct RouteEffect {
    /// Id of the route that produced the effect.
    pub route: String,
    pub kind: EffectKind,
}

pub enum EffectKind {
    /// Publish this freshly built message through the pipeline.
    Emit(Message),
    /// Re-publish the triggering message under a new topic.
    Forward(Message),
    /// Write a rendered line to the log at the given level name.
    Log { level: String, line: String },
    /// Run a registered function with the transformed message.
    Call {
        name: String,
        handler: CallFn,
        message: Message,
    },
}

/// What one matched route did to a message: its identity, the action
/// kinds it carries and whatever went wrong while producing effects.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub id: String,
    pub name: Option<String>,
    pub actions: Vec<String>,
    pub errors: Vec<String>,
}

/// Everything one evaluation pass produced.
#[derive(Default)]
pub struct RouteEvaluation {
    pub effects: Vec<RouteEffect>,
    pub errors: Vec<BusError>,
    /// One outcome per matched route, in evaluation order.
    pub matched: Vec<RouteOutcome>,
}

/// Ordered collection of routing rules plus the registries their
/// transforms, calls and control guard live in.
#[derive(Default)]
pub struct Router {
    routes: Vec<CompiledRoute>,
    next_seq: u64,
    transforms: HashMap<String, TransformFn>,
    calls: HashMap<String, CallFn>,
    guard: Option<ControlGuard>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a route, compiling its pattern and predicates. Route ids
    /// are unique; admitting a taken id is an error.
    pub fn add_route(&mut self, spec: RouteSpec) -> Result<(), BusError> {
        if self.routes.iter().any(|r| r.spec.id == spec.id) {
            return Err(BusError::RouteInvalid(format!(
                "route id '{}' is already taken",
                spec.id
            )));
        }
        let compiled = compile_route(spec, self.next_seq)?;
        self.next_seq += 1;
        tracing::debug!("route '{}' admitted", compiled.spec.id);
        self.routes.push(compiled);
        self.resort();
        Ok(())
    }

    /// Replaces a route's spec in place, keeping its admission rank.
    pub fn update_route(&mut self, spec: RouteSpec) -> Result<(), BusError> {
        let Some(idx) = self.routes.iter().position(|r| r.spec.id == spec.id) else {
            return Err(BusError::RouteNotFound(spec.id));
        };
        let compiled = compile_route(spec, self.routes[idx].seq)?;
        self.routes[idx] = compiled;
        self.resort();
        Ok(())
    }

    /// Removes a route and returns its spec.
    pub fn remove_route(&mut self, id: &str) -> Result<RouteSpec, BusError> {
        match self.routes.iter().position(|r| r.spec.id == id) {
            Some(idx) => Ok(self.routes.remove(idx).spec),
            None => Err(BusError::RouteNotFound(id.to_string())),
        }
    }

    /// Enables or disables a route without removing it.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), BusError> {
        match self.routes.iter_mut().find(|r| r.spec.id == id) {
            Some(route) => {
                route.spec.enabled = enabled;
                Ok(())
            }
            None => Err(BusError::RouteNotFound(id.to_string())),
        }
    }

    /// Drops every route. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.routes.len();
        self.routes.clear();
        removed
    }

    /// The admitted routes, in evaluation order.
    pub fn list(&self) -> Vec<RouteSpec> {
        self.routes.iter().map(|r| r.spec.clone()).collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn register_transform(&mut self, name: &str, transform: TransformFn) {
        self.transforms.insert(name.to_string(), transform);
    }

    pub fn register_call(&mut self, name: &str, handler: CallFn) {
        self.calls.insert(name.to_string(), handler);
    }

    pub fn set_guard(&mut self, guard: ControlGuard) {
        self.guard = Some(guard);
    }

    pub fn guard(&self) -> Option<ControlGuard> {
        self.guard.clone()
    }

    fn resort(&mut self) {
        self.routes.sort_by_key(|r| (r.spec.order, r.seq));
    }

    /// Evaluates every enabled route against a message.
    ///
    /// A matched route's payload is transformed once, then each of its
    /// actions becomes an effect. Failures are collected per route; one
    /// bad route or action never hides another.
    pub fn evaluate(&self, msg: &Message) -> RouteEvaluation {
        let mut eval = RouteEvaluation::default();
        if self.routes.is_empty() {
            return eval;
        }

        let root = match serde_json::to_value(msg) {
            Ok(v) => v,
            Err(e) => {
                eval.errors.push(BusError::RouteInvalid(format!(
                    "message envelope not representable: {e}"
                )));
                return eval;
            }
        };

        for route in &self.routes {
            if !route.spec.enabled || !route.matches(msg, &root) {
                continue;
            }

            let mut outcome = RouteOutcome {
                id: route.spec.id.clone(),
                name: route.spec.name.clone(),
                actions: route.spec.actions.iter().map(|a| a.kind().to_string()).collect(),
                errors: Vec::new(),
            };

            let data = match apply_transform(&route.spec.transform, &root, &msg.data, &self.transforms)
            {
                Ok(d) => d,
                Err(reason) => {
                    outcome.errors.push(reason.clone());
                    eval.errors.push(BusError::RouteActionFailed {
                        route: route.spec.id.clone(),
                        action: "transform".to_string(),
                        reason,
                    });
                    eval.matched.push(outcome);
                    continue;
                }
            };

            for action in &route.spec.actions {
                match action {
                    ActionSpec::Emit { topic, inherit } => {
                        let mut next = Message::new(topic.clone(), data.clone());
                        for field in inherit {
                            match field.as_str() {
                                "source" => next.source = msg.source.clone(),
                                "headers" => next.headers = msg.headers.clone(),
                                "reply_to" => next.reply_to = msg.reply_to.clone(),
                                "correlation_id" => {
                                    next.correlation_id = msg.correlation_id.clone()
                                }
                                // unknown names are rejected at admission
                                _ => {}
                            }
                        }
                        eval.effects.push(RouteEffect {
                            route: route.spec.id.clone(),
                            kind: EffectKind::Emit(next),
                        });
                    }
                    ActionSpec::Forward { topic } => {
                        let mut next = Message::new(topic.clone(), data.clone());
                        next.source = msg.source.clone();
                        next.headers = msg.headers.clone();
                        next.reply_to = msg.reply_to.clone();
                        next.correlation_id = msg.correlation_id.clone();
                        eval.effects.push(RouteEffect {
                            route: route.spec.id.clone(),
                            kind: EffectKind::Forward(next),
                        });
                    }
                    ActionSpec::Log { level, template } => eval.effects.push(RouteEffect {
                        route: route.spec.id.clone(),
                        kind: EffectKind::Log {
                            level: level.clone().unwrap_or_else(|| "info".to_string()),
                            line: crate::router::path::render_template(template, &root),
                        },
                    }),
                    ActionSpec::Call { name } => match self.calls.get(name) {
                        Some(handler) => {
                            let mut message = msg.clone();
                            message.data = data.clone();
                            eval.effects.push(RouteEffect {
                                route: route.spec.id.clone(),
                                kind: EffectKind::Call {
                                    name: name.clone(),
                                    handler: Arc::clone(handler),
                                    message,
                                },
                            });
                        }
                        None => {
                            let reason = "no function registered under that name".to_string();
                            outcome.errors.push(format!("call '{name}': {reason}"));
                            eval.errors.push(BusError::RouteActionFailed {
                                route: route.spec.id.clone(),
                                action: format!("call '{name}'"),
                                reason,
                            });
                        }
                    },
                }
            }

            eval.matched.push(outcome);
        }

        eval
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("transforms", &self.transforms.len())
            .field("calls", &self.calls.len())
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}
