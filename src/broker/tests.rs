use std::sync::{Arc, Mutex};

use serde_json::json;

use super::engine::Bus;
use super::message::Message;
use super::subscription::{Handler, OwnerToken, SubscribeOptions};
use crate::config::Settings;
use crate::tracer::{TraceFilter, Tracer};
use crate::utils::BusError;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    // generous enough that ordinary tests never trip the limiter
    settings.limits.rate_limit_max = 1_000;
    settings
}

fn collector() -> (Handler, Arc<Mutex<Vec<Message>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&seen);
    let handler: Handler = Arc::new(move |msg: &Message| {
        inner.lock().unwrap().push(msg.clone());
        Ok(())
    });
    (handler, seen)
}

#[test]
fn test_publish_delivers_to_matching_subscriber() {
    let bus = Bus::new(test_settings());
    let (handler, seen) = collector();
    bus.subscribe("sensor.kitchen.temp", handler).unwrap();

    let id = bus
        .publish(Message::new("sensor.kitchen.temp", json!({"celsius": 21})))
        .unwrap();

    assert!(!id.is_empty());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].topic, "sensor.kitchen.temp");
    assert_eq!(seen[0].id, id);
    assert!(seen[0].ts > 0);
}

#[test]
fn test_wildcard_subscriber_receives_matching_topics_only() {
    let bus = Bus::new(test_settings());
    let (handler, seen) = collector();
    bus.subscribe("sensor.*.temp", handler).unwrap();

    bus.publish(Message::new("sensor.kitchen.temp", json!(1))).unwrap();
    bus.publish(Message::new("sensor.garage.temp", json!(2))).unwrap();
    bus.publish(Message::new("sensor.kitchen.humidity", json!(3))).unwrap();

    let topics: Vec<String> = seen.lock().unwrap().iter().map(|m| m.topic.clone()).collect();
    assert_eq!(topics, vec!["sensor.kitchen.temp", "sensor.garage.temp"]);
}

#[test]
fn test_publish_without_subscribers_succeeds() {
    let bus = Bus::new(test_settings());
    let id = bus.publish(Message::new("nobody.listens", json!(null))).unwrap();
    assert!(!id.is_empty());
    assert_eq!(bus.stats().published, 1);
    assert_eq!(bus.stats().delivered, 0);
}

#[test]
fn test_publish_rejects_invalid_topic() {
    let bus = Bus::new(test_settings());
    let err = bus.publish(Message::new("a..b", json!(1))).unwrap_err();
    assert_eq!(err.code(), "MESSAGE_INVALID");
    assert_eq!(bus.stats().rejected, 1);
    assert_eq!(bus.stats().published, 0);
}

#[test]
fn test_subscribers_run_in_subscription_order() {
    let bus = Bus::new(test_settings());
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        let handler: Handler = Arc::new(move |_msg: &Message| {
            order.lock().unwrap().push(tag);
            Ok(())
        });
        bus.subscribe("jobs.created", handler).unwrap();
    }

    bus.publish(Message::new("jobs.created", json!(1))).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_rate_limit_rejects_over_budget_publisher() {
    let mut settings = Settings::default();
    settings.limits.rate_limit_max = 2;
    let bus = Bus::new(settings);

    let mut msg = Message::new("a.b", json!(1));
    msg.source = Some("sensor-1".to_string());
    bus.publish(msg.clone()).unwrap();
    bus.publish(msg.clone()).unwrap();
    let err = bus.publish(msg.clone()).unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");

    // a different publisher still has its own budget
    let mut other = Message::new("a.b", json!(1));
    other.source = Some("sensor-2".to_string());
    assert!(bus.publish(other).is_ok());
    assert_eq!(bus.stats().rate_limited, 1);
}

#[test]
fn test_sourceless_publishers_share_the_anonymous_budget() {
    let mut settings = Settings::default();
    settings.limits.rate_limit_max = 2;
    let bus = Bus::new(settings);

    bus.publish(Message::new("a.b", json!(1))).unwrap();
    bus.publish(Message::new("c.d", json!(2))).unwrap();
    let err = bus.publish(Message::new("e.f", json!(3))).unwrap_err();
    match err {
        BusError::RateLimitExceeded { identity } => {
            assert_eq!(identity, super::ANONYMOUS_IDENTITY);
        }
        other => panic!("expected rate limit error, got {other:?}"),
    }
}

#[test]
fn test_retained_message_replays_to_late_subscriber_before_subscribe_returns() {
    let bus = Bus::new(test_settings());
    bus.publish(Message::retained("device.42.state", json!({"online": true})))
        .unwrap();

    let (handler, seen) = collector();
    bus.subscribe("device.*.state", handler).unwrap();

    // replay is synchronous: the handler has already run
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].data, json!({"online": true}));
    assert!(seen[0].retain);
}

#[test]
fn test_retained_replay_can_be_opted_out() {
    let bus = Bus::new(test_settings());
    bus.publish(Message::retained("device.42.state", json!(1))).unwrap();

    let (handler, seen) = collector();
    bus.subscribe_with("device.42.state", handler, SubscribeOptions::without_replay())
        .unwrap();

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_retained_value_is_overwritten_and_cleared() {
    let bus = Bus::new(test_settings());
    bus.publish(Message::retained("a.b", json!(1))).unwrap();
    bus.publish(Message::retained("a.b", json!(2))).unwrap();
    assert_eq!(bus.retained("a.b").unwrap().data, json!(2));

    bus.publish(Message::retained("a.b", json!(null))).unwrap();
    assert!(bus.retained("a.b").is_none());
    assert_eq!(bus.stats().retained, 0);
}

#[test]
fn test_retained_store_evicts_oldest_topic_at_capacity() {
    let mut settings = test_settings();
    settings.limits.max_retained = 2;
    let bus = Bus::new(settings);

    bus.publish(Message::retained("cfg.a", json!(1))).unwrap();
    bus.publish(Message::retained("cfg.b", json!(2))).unwrap();
    bus.publish(Message::retained("cfg.c", json!(3))).unwrap();

    assert!(bus.retained("cfg.a").is_none());
    assert!(bus.retained("cfg.b").is_some());
    assert!(bus.retained("cfg.c").is_some());
    assert_eq!(bus.stats().retained, 2);
}

#[test]
fn test_unsubscribe_stops_delivery_and_is_idempotent() {
    let bus = Bus::new(test_settings());
    let (handler, seen) = collector();
    let id = bus.subscribe("a.b", handler).unwrap();

    bus.publish(Message::new("a.b", json!(1))).unwrap();
    assert!(bus.unsubscribe(&id));
    bus.publish(Message::new("a.b", json!(2))).unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(!bus.unsubscribe(&id));
}

#[test]
fn test_disposed_owner_stops_delivery_immediately() {
    let bus = Bus::new(test_settings());
    let owner = OwnerToken::new();
    let (handler, seen) = collector();
    bus.subscribe_with("a.b", handler, SubscribeOptions::owned_by(&owner))
        .unwrap();

    bus.publish(Message::new("a.b", json!(1))).unwrap();
    owner.dispose();
    bus.publish(Message::new("a.b", json!(2))).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(bus.stats().dead_deliveries, 1);

    // the dead subscription is gone after a cleanup pass
    let (pruned, _) = bus.run_cleanup();
    assert_eq!(pruned, 1);
    assert_eq!(bus.stats().subscriptions, 0);
    assert_eq!(bus.stats().pruned_subscriptions, 1);
}

#[tokio::test]
async fn test_cleanup_loop_prunes_in_the_background() {
    let mut settings = test_settings();
    settings.bus.cleanup_interval_ms = 10;
    let bus = Bus::new(settings);

    let owner = OwnerToken::new();
    let (handler, _) = collector();
    bus.subscribe_with("a.b", handler, SubscribeOptions::owned_by(&owner))
        .unwrap();
    owner.dispose();

    tokio::spawn(Bus::run_cleanup_loop(bus.clone()));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(bus.stats().subscriptions, 0);
    assert!(bus.stats().pruned_subscriptions >= 1);
}

#[test]
fn test_dispose_owner_removes_all_its_subscriptions() {
    let bus = Bus::new(test_settings());
    let owner = OwnerToken::new();
    let (handler_a, _) = collector();
    let (handler_b, _) = collector();
    bus.subscribe_with("a.*", handler_a, SubscribeOptions::owned_by(&owner))
        .unwrap();
    bus.subscribe_with("b.*", handler_b, SubscribeOptions::owned_by(&owner))
        .unwrap();
    let (handler_c, _) = collector();
    bus.subscribe("c.*", handler_c).unwrap();

    assert_eq!(bus.dispose_owner(&owner), 2);
    assert_eq!(bus.stats().subscriptions, 1);
}

#[test]
fn test_unsubscribe_matching_is_scoped_to_pattern_and_owner() {
    let bus = Bus::new(test_settings());
    let owner = OwnerToken::new();
    let other = OwnerToken::new();
    let (handler, seen) = collector();
    bus.subscribe_with("a.*", Arc::clone(&handler), SubscribeOptions::owned_by(&owner))
        .unwrap();
    bus.subscribe_with("a.*", Arc::clone(&handler), SubscribeOptions::owned_by(&owner))
        .unwrap();
    bus.subscribe_with("b.*", Arc::clone(&handler), SubscribeOptions::owned_by(&owner))
        .unwrap();
    bus.subscribe_with("a.*", handler, SubscribeOptions::owned_by(&other))
        .unwrap();

    assert_eq!(bus.unsubscribe_matching("a.*", &owner), 2);
    assert_eq!(bus.stats().subscriptions, 2);

    // the other owner's identical pattern is untouched
    bus.publish(Message::new("a.b", json!(1))).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_clear_retained_all_or_by_pattern() {
    let bus = Bus::new(test_settings());
    bus.publish(Message::retained("config.db", json!(1))).unwrap();
    bus.publish(Message::retained("config.cache", json!(2))).unwrap();
    bus.publish(Message::retained("status.web", json!(3))).unwrap();

    assert_eq!(bus.clear_retained(Some("config.*")).unwrap(), 2);
    assert!(bus.retained("config.db").is_none());
    assert!(bus.retained("status.web").is_some());

    assert!(bus.clear_retained(Some("a..b")).is_err());

    assert_eq!(bus.clear_retained(None).unwrap(), 1);
    assert_eq!(bus.stats().retained, 0);
}

#[test]
fn test_failing_handler_does_not_stop_other_subscribers() {
    let bus = Bus::new(test_settings());
    let failing: Handler = Arc::new(|_msg: &Message| Err("handler exploded".to_string()));
    bus.subscribe("a.b", failing).unwrap();
    let (handler, seen) = collector();
    bus.subscribe("a.b", handler).unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    bus.set_error_listener(Arc::new(move |err: &BusError| {
        sink.lock().unwrap().push(err.clone());
    }));

    bus.publish(Message::new("a.b", json!(1))).unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(bus.stats().delivery_failures, 1);
    assert_eq!(bus.stats().delivered, 1);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), "DELIVERY_FAILED");
}

#[test]
fn test_handler_may_publish_on_the_same_bus() {
    let bus = Bus::new(test_settings());

    let chained = bus.clone();
    let relay: Handler = Arc::new(move |msg: &Message| {
        let mut next = Message::new("stage.two", msg.data.clone());
        next.source = Some("relay".to_string());
        chained
            .publish(next)
            .map(|_| ())
            .map_err(|e| e.to_string())
    });
    bus.subscribe("stage.one", relay).unwrap();

    let (handler, seen) = collector();
    bus.subscribe("stage.two", handler).unwrap();

    bus.publish(Message::new("stage.one", json!({"hop": 1}))).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].topic, "stage.two");
    assert_eq!(seen[0].data, json!({"hop": 1}));
}

#[test]
fn test_global_wildcard_requires_policy_opt_in() {
    let bus = Bus::new(test_settings());
    let (handler, _) = collector();
    let err = bus.subscribe("*", handler).unwrap_err();
    assert_eq!(err.code(), "SUBSCRIPTION_INVALID");

    let mut settings = test_settings();
    settings.bus.allow_global_wildcard = true;
    let bus = Bus::new(settings);
    let (handler, seen) = collector();
    bus.subscribe("*", handler).unwrap();
    bus.publish(Message::new("any.topic.at.all", json!(1))).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_deferred_bus_reports_not_ready_until_marked() {
    let bus = Bus::new_deferred(test_settings());
    assert!(!bus.is_ready());
    bus.mark_ready();
    assert!(bus.is_ready());
}

#[test]
fn test_stats_snapshot_counts_all_outcomes() {
    let mut settings = Settings::default();
    settings.limits.rate_limit_max = 1;
    let bus = Bus::new(settings);

    let (handler, _) = collector();
    bus.subscribe("a.b", handler).unwrap();

    let mut msg = Message::new("a.b", json!(1));
    msg.source = Some("s".to_string());
    bus.publish(msg.clone()).unwrap();
    let _ = bus.publish(msg);
    let _ = bus.publish(Message::new("", json!(1)));

    let stats = bus.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.subscriptions, 1);
    assert_eq!(stats.routes, 0);
}

#[test]
fn test_tracer_records_accepted_and_dropped_messages() {
    let bus = Bus::new(test_settings());
    bus.install_tracer(Tracer::new(16));

    let ok_id = bus.publish(Message::new("orders.created", json!(1))).unwrap();
    let _ = bus.publish(Message::new("bad..topic", json!(1)));

    let entries = bus.trace_query(&TraceFilter::default());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message.id, ok_id);
    assert!(entries[0].dropped.is_none());
    assert_eq!(entries[1].dropped.as_deref(), Some("MESSAGE_INVALID"));

    let by_id = bus.trace_query(&TraceFilter {
        message_id: Some(ok_id),
        ..Default::default()
    });
    assert_eq!(by_id.len(), 1);

    // a snapshot survives clearing and re-importing
    let snapshot = bus.trace_export().unwrap();
    bus.trace_clear();
    assert!(bus.trace_query(&TraceFilter::default()).is_empty());
    assert_eq!(bus.trace_import(&snapshot).unwrap(), 2);
    assert_eq!(bus.trace_query(&TraceFilter::default()).len(), 2);
}

#[test]
fn test_trace_operations_without_a_tracer() {
    let bus = Bus::new(test_settings());
    assert!(bus.trace_query(&TraceFilter::default()).is_empty());
    let err = bus.trace_export().unwrap_err();
    assert_eq!(err.code(), "TRACE_INVALID");
}
