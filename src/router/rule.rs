use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::message::Message;
use crate::broker::topic::TopicPattern;
use crate::router::engine::TransformFn;
use crate::router::path;
use crate::utils::BusError;

/// Envelope fields an emit action may copy from the triggering message.
pub const INHERITABLE_FIELDS: [&str; 4] = ["source", "headers", "reply_to", "correlation_id"];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Declarative routing rule: when a message matches, transform its
/// payload once and run every action in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Evaluation rank. Routes run ascending by order, ties in admission
    /// order.
    #[serde(default)]
    pub order: i64,
    pub when: MatchSpec,
    #[serde(default)]
    pub transform: TransformSpec,
    pub actions: Vec<ActionSpec>,
}

fn default_enabled() -> bool {
    true
}

/// Match criteria. Every present criterion must hold; an empty spec
/// matches every message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Topic pattern in subscription syntax (`orders.*`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Exact-topic set membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_in: Option<Vec<String>>,
    /// Publisher identity equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// At least one of these tags appears in `headers.tags`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_any: Option<Vec<String>>,
    /// All of these tags appear in `headers.tags`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_all: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
}

/// Condition tree evaluated over the message envelope.
///
/// Leaves address the envelope by dotted path (`topic`, `data.user.id`,
/// `headers.kind`). A leaf whose path resolves to nothing is false, for
/// every operator: conditions never match on missing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Predicate {
    Eq { path: String, value: Value },
    Neq { path: String, value: Value },
    Gt { path: String, value: Value },
    Gte { path: String, value: Value },
    Lt { path: String, value: Value },
    Lte { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    Regex { path: String, pattern: String },
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { not: Box<Predicate> },
}

/// Payload transformation applied once per matched route, before its
/// actions run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Pass the payload through unchanged.
    #[default]
    Identity,
    /// Project the listed envelope paths into a new object, keeping
    /// their nesting. Missing paths are simply left out.
    Pick { paths: Vec<String> },
    /// Apply a registered unary function to the value at one payload
    /// path (`data` or below). The rest of the payload passes through.
    Map { path: String, name: String },
    /// Apply a registered function to the whole envelope; its result
    /// becomes the payload.
    Custom { name: String },
}

/// One thing a matching route does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Publish a fresh message with the transformed payload. `inherit`
    /// names envelope fields to copy from the trigger.
    Emit {
        topic: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        inherit: Vec<String>,
    },
    /// Re-publish the message on another topic, keeping its source,
    /// headers and correlation fields. The copy gets a fresh id and
    /// never keeps the retain flag.
    Forward { topic: String },
    /// Render a template against the envelope and write it to the log.
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        template: String,
    },
    /// Invoke a registered function with the transformed message.
    Call { name: String },
}

impl ActionSpec {
    /// Short action kind, the form used in trace summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Emit { .. } => "emit",
            Self::Forward { .. } => "forward",
            Self::Log { .. } => "log",
            Self::Call { .. } => "call",
        }
    }
}

/// A route admitted into the router: its spec plus the precompiled
/// topic pattern and predicate tree.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRoute {
    pub spec: RouteSpec,
    pub topic: Option<TopicPattern>,
    pub predicate: Option<CompiledPredicate>,
    /// Admission sequence, the tie-breaker for equal `order` ranks.
    pub seq: u64,
}

impl CompiledRoute {
    /// Whether every present criterion holds for this message.
    pub(crate) fn matches(&self, msg: &Message, root: &Value) -> bool {
        if let Some(pattern) = &self.topic {
            if !pattern.matches(&msg.topic) {
                return false;
            }
        }
        if let Some(topics) = &self.spec.when.topic_in {
            if !topics.iter().any(|t| t == &msg.topic) {
                return false;
            }
        }
        if let Some(source) = &self.spec.when.source {
            if msg.source.as_deref() != Some(source.as_str()) {
                return false;
            }
        }
        if let Some(any) = &self.spec.when.tags_any {
            if !any.iter().any(|t| has_tag(root, t)) {
                return false;
            }
        }
        if let Some(all) = &self.spec.when.tags_all {
            if !all.iter().all(|t| has_tag(root, t)) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate.eval(root) {
                return false;
            }
        }
        true
    }
}

/// Tags live in `headers.tags` as an array of strings. No headers, no
/// tags.
fn has_tag(root: &Value, tag: &str) -> bool {
    path::get(root, "headers.tags")
        .and_then(Value::as_array)
        .is_some_and(|tags| tags.iter().any(|v| v.as_str() == Some(tag)))
}

/// Predicate tree with regexes compiled at admission time.
#[derive(Debug, Clone)]
pub(crate) enum CompiledPredicate {
    Eq { path: String, value: Value },
    Neq { path: String, value: Value },
    Gt { path: String, value: Value },
    Gte { path: String, value: Value },
    Lt { path: String, value: Value },
    Lte { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    Regex { path: String, re: Regex },
    And(Vec<CompiledPredicate>),
    Or(Vec<CompiledPredicate>),
    Not(Box<CompiledPredicate>),
}

/// Validates a route spec and compiles its matchers.
pub(crate) fn compile_route(spec: RouteSpec, seq: u64) -> Result<CompiledRoute, BusError> {
    if spec.id.is_empty() {
        return Err(BusError::RouteInvalid("route id is empty".to_string()));
    }
    if spec.actions.is_empty() {
        return Err(BusError::RouteInvalid(format!(
            "route '{}': needs at least one action",
            spec.id
        )));
    }

    let topic = match &spec.when.topic {
        Some(raw) => Some(TopicPattern::parse(raw).map_err(|e| {
            BusError::RouteInvalid(format!("route '{}': bad topic pattern: {e}", spec.id))
        })?),
        None => None,
    };

    let predicate = match &spec.when.predicate {
        Some(p) => Some(compile_predicate(p).map_err(|reason| {
            BusError::RouteInvalid(format!("route '{}': {reason}", spec.id))
        })?),
        None => None,
    };

    if let TransformSpec::Map { path, .. } = &spec.transform {
        if path != "data" && !path.starts_with("data.") {
            return Err(BusError::RouteInvalid(format!(
                "route '{}': map path '{path}' must address the payload (data...)",
                spec.id
            )));
        }
    }

    for action in &spec.actions {
        match action {
            ActionSpec::Emit { inherit, .. } => {
                for field in inherit {
                    if !INHERITABLE_FIELDS.contains(&field.as_str()) {
                        return Err(BusError::RouteInvalid(format!(
                            "route '{}': '{field}' is not an inheritable field",
                            spec.id
                        )));
                    }
                }
            }
            ActionSpec::Log { level: Some(level), .. } => {
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(BusError::RouteInvalid(format!(
                        "route '{}': unknown log level '{level}'",
                        spec.id
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(CompiledRoute {
        spec,
        topic,
        predicate,
        seq,
    })
}

fn compile_predicate(p: &Predicate) -> Result<CompiledPredicate, String> {
    Ok(match p {
        Predicate::Eq { path, value } => CompiledPredicate::Eq {
            path: path.clone(),
            value: value.clone(),
        },
        Predicate::Neq { path, value } => CompiledPredicate::Neq {
            path: path.clone(),
            value: value.clone(),
        },
        Predicate::Gt { path, value } => CompiledPredicate::Gt {
            path: path.clone(),
            value: value.clone(),
        },
        Predicate::Gte { path, value } => CompiledPredicate::Gte {
            path: path.clone(),
            value: value.clone(),
        },
        Predicate::Lt { path, value } => CompiledPredicate::Lt {
            path: path.clone(),
            value: value.clone(),
        },
        Predicate::Lte { path, value } => CompiledPredicate::Lte {
            path: path.clone(),
            value: value.clone(),
        },
        Predicate::In { path, values } => CompiledPredicate::In {
            path: path.clone(),
            values: values.clone(),
        },
        Predicate::Regex { path, pattern } => CompiledPredicate::Regex {
            path: path.clone(),
            re: Regex::new(pattern).map_err(|e| format!("bad regex '{pattern}': {e}"))?,
        },
        Predicate::And { all } => CompiledPredicate::And(
            all.iter().map(compile_predicate).collect::<Result<_, _>>()?,
        ),
        Predicate::Or { any } => CompiledPredicate::Or(
            any.iter().map(compile_predicate).collect::<Result<_, _>>()?,
        ),
        Predicate::Not { not } => CompiledPredicate::Not(Box::new(compile_predicate(not)?)),
    })
}

impl CompiledPredicate {
    /// Evaluates the tree against the message envelope. Missing paths
    /// and type mismatches are false, never errors.
    pub(crate) fn eval(&self, root: &Value) -> bool {
        match self {
            Self::Eq { path, value } => path::get(root, path) == Some(value),
            Self::Neq { path, value } => {
                matches!(path::get(root, path), Some(v) if v != value)
            }
            Self::Gt { path, value } => {
                compare(root, path, value) == Some(Ordering::Greater)
            }
            Self::Gte { path, value } => matches!(
                compare(root, path, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt { path, value } => compare(root, path, value) == Some(Ordering::Less),
            Self::Lte { path, value } => matches!(
                compare(root, path, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::In { path, values } => {
                path::get(root, path).is_some_and(|v| values.contains(v))
            }
            Self::Regex { path, re } => path::get(root, path)
                .and_then(Value::as_str)
                .is_some_and(|s| re.is_match(s)),
            Self::And(all) => all.iter().all(|p| p.eval(root)),
            Self::Or(any) => any.iter().any(|p| p.eval(root)),
            Self::Not(inner) => !inner.eval(root),
        }
    }
}

/// Ordering comparison with numeric promotion: numbers compare as f64,
/// strings lexicographically, anything else does not compare.
fn compare(root: &Value, path: &str, rhs: &Value) -> Option<Ordering> {
    let lhs = path::get(root, path)?;
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Applies a transform to a message's payload, given the full envelope
/// for path lookups. Unknown function names pass the payload through
/// with a warning; a registered function that fails is an error for the
/// router to surface.
pub(crate) fn apply_transform(
    spec: &TransformSpec,
    root: &Value,
    data: &Value,
    transforms: &HashMap<String, TransformFn>,
) -> Result<Value, String> {
    match spec {
        TransformSpec::Identity => Ok(data.clone()),
        TransformSpec::Pick { paths } => {
            let mut out = Value::Object(serde_json::Map::new());
            for p in paths {
                if let Some(v) = path::get(root, p) {
                    path::set(&mut out, p, v.clone());
                }
            }
            Ok(out)
        }
        TransformSpec::Map { path, name } => {
            let Some(f) = transforms.get(name) else {
                tracing::warn!("no transform registered under '{name}', passing through");
                return Ok(data.clone());
            };
            let Some(current) = path::get(root, path) else {
                return Ok(data.clone());
            };
            let mapped = f(current)?;
            let mut out = root.clone();
            path::set(&mut out, path, mapped);
            Ok(out.get("data").cloned().unwrap_or(Value::Null))
        }
        TransformSpec::Custom { name } => match transforms.get(name) {
            Some(f) => f(root),
            None => {
                tracing::warn!("no transform registered under '{name}', passing through");
                Ok(data.clone())
            }
        },
    }
}
