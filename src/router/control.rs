use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::engine::Bus;
use crate::broker::message::Message;
use crate::broker::subscription::{Handler, SubscribeOptions, SubscriptionId};
use crate::router::rule::RouteSpec;
use crate::utils::BusError;

/// Topic the router's control plane listens on. The `$` prefix marks it
/// as infrastructure; ordinary traffic should stay off `$` topics.
pub const CONTROL_TOPIC: &str = "$control.router";

/// Route management command, sent as the payload of a message on
/// [`CONTROL_TOPIC`]. The `type` field uses `domain.action` names so a
/// payload reads like `{"type": "route.add", "route": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlCommand {
    #[serde(rename = "route.add")]
    AddRoute { route: RouteSpec },
    #[serde(rename = "route.update")]
    UpdateRoute { route: RouteSpec },
    #[serde(rename = "route.remove")]
    RemoveRoute { id: String },
    #[serde(rename = "route.enable")]
    EnableRoute { id: String },
    #[serde(rename = "route.disable")]
    DisableRoute { id: String },
    #[serde(rename = "route.list")]
    ListRoutes,
    #[serde(rename = "route.clear")]
    ClearRoutes,
}

/// Outcome of a control command, published to the command's `reply_to`
/// topic when it has one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<RouteSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
}

impl ControlReply {
    fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
            code: None,
            routes: None,
            removed: None,
        }
    }

    fn with_routes(routes: Vec<RouteSpec>) -> Self {
        Self {
            routes: Some(routes),
            ..Self::accepted()
        }
    }

    fn with_removed(removed: usize) -> Self {
        Self {
            removed: Some(removed),
            ..Self::accepted()
        }
    }

    fn denied(err: &BusError) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
            routes: None,
            removed: None,
        }
    }
}

/// Subscribes the route management handler on [`CONTROL_TOPIC`].
///
/// Commands arrive as ordinary messages, so anything that can publish
/// can manage routes, subject to the router's control guard. When a
/// command carries `reply_to`, the outcome is published back there with
/// the command's correlation id, which makes the control plane usable
/// through the client's request call.
pub fn attach_control(bus: &Bus) -> Result<SubscriptionId, BusError> {
    let control = bus.clone();
    let handler: Handler = Arc::new(move |msg: &Message| {
        let reply = handle_command(&control, msg);

        if let Some(reply_to) = &msg.reply_to {
            let payload =
                serde_json::to_value(&reply).map_err(|e| format!("encode reply: {e}"))?;
            let mut out = Message::new(reply_to.clone(), payload);
            out.correlation_id = msg.correlation_id.clone();
            out.source = Some("router-control".to_string());
            control
                .publish(out)
                .map(|_| ())
                .map_err(|e| format!("publish reply: {e}"))?;
        }

        if reply.ok {
            Ok(())
        } else {
            Err(reply.error.unwrap_or_else(|| "control command failed".to_string()))
        }
    });

    bus.subscribe_with(CONTROL_TOPIC, handler, SubscribeOptions::without_replay())
}

fn handle_command(bus: &Bus, msg: &Message) -> ControlReply {
    if let Some(guard) = bus.control_guard() {
        if !guard(msg) {
            return ControlReply::denied(&BusError::ControlDenied(
                "control guard rejected the message".to_string(),
            ));
        }
    }

    let command: ControlCommand = match serde_json::from_value(msg.data.clone()) {
        Ok(c) => c,
        Err(e) => {
            return ControlReply::denied(&BusError::RouteInvalid(format!(
                "unparseable control command: {e}"
            )));
        }
    };

    let result = match command {
        ControlCommand::AddRoute { route } => bus.add_route(route),
        ControlCommand::UpdateRoute { route } => bus.update_route(route),
        ControlCommand::RemoveRoute { id } => bus.remove_route(&id).map(|_| ()),
        ControlCommand::EnableRoute { id } => bus.set_route_enabled(&id, true),
        ControlCommand::DisableRoute { id } => bus.set_route_enabled(&id, false),
        ControlCommand::ListRoutes => return ControlReply::with_routes(bus.list_routes()),
        ControlCommand::ClearRoutes => {
            return match bus.clear_routes() {
                Ok(n) => ControlReply::with_removed(n),
                Err(err) => ControlReply::denied(&err),
            };
        }
    };

    match result {
        Ok(()) => ControlReply::accepted(),
        Err(err) => ControlReply::denied(&err),
    }
}
