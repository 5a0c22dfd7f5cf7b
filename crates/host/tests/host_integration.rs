//! Integration tests for the host HTTP surface.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bridge::{BridgeConfig, BrokerBridge, InMemoryBroker, TopicAdmin};
use event_bus::{LocalEventBus, event_types};
use host::AppState;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn bridge_on(broker: &InMemoryBroker, bus: &LocalEventBus, config: BridgeConfig) -> BrokerBridge {
    BrokerBridge::new(
        config,
        bus.clone(),
        Arc::new(broker.clone()),
        Arc::new(broker.clone()),
    )
}

fn setup(bridge: Option<BrokerBridge>, bus: LocalEventBus) -> axum::Router {
    host::create_app(Arc::new(AppState::new(bus, bridge)), get_metrics_handle())
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_without_bridge() {
    let app = setup(None, LocalEventBus::for_service("sales"));

    let (status, json) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "sales");
    assert_eq!(json["bridge"], "disabled");
}

#[tokio::test]
async fn test_health_reports_connected_bridge() {
    let bus = LocalEventBus::for_service("sales");
    let bridge = bridge_on(&InMemoryBroker::new(), &bus, BridgeConfig::new("sales"));
    assert!(host::connect_or_degrade(&bridge).await);
    let app = setup(Some(bridge.clone()), bus);

    let (status, json) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bridge"], "ready");
    bridge.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_broker_degrades_to_local_only() {
    let bus = LocalEventBus::for_service("sales");
    let broker = InMemoryBroker::new();
    broker.set_fail_on_connect(true);
    let bridge = bridge_on(
        &broker,
        &bus,
        BridgeConfig::new("sales").publish([event_types::SALE_CREATED]),
    );

    assert!(!host::connect_or_degrade(&bridge).await);
    let app = setup(Some(bridge.clone()), bus.clone());

    let (status, json) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["bridge"], "degraded");

    // Local delivery keeps working.
    bus.emit(event_types::SALE_CREATED, json!({ "saleId": "S-1" }), None);
    let (_, json) = send(&app, "GET", "/events/history").await;
    assert_eq!(json["count"], 1);

    let (status, json) = send(&app, "POST", "/bridge/flush").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "Not connected");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(None, LocalEventBus::for_service("sales"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_bridge_stats_when_disabled() {
    let app = setup(None, LocalEventBus::for_service("sales"));

    let (status, json) = send(&app, "GET", "/bridge/stats").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "broker bridge is disabled");
}

#[tokio::test]
async fn test_bridge_stats_and_flush() {
    let bus = LocalEventBus::for_service("sales");
    let broker = InMemoryBroker::new();
    let bridge = bridge_on(
        &broker,
        &bus,
        BridgeConfig::new("sales")
            .with_topic_prefix("dev")
            .publish([event_types::SALE_CREATED])
            .with_batching(10, std::time::Duration::from_secs(60)),
    );
    bridge.connect().await.unwrap();
    let app = setup(Some(bridge.clone()), bus);

    bridge
        .publish(&event_bus::BusEvent::new(
            event_types::SALE_CREATED,
            event_bus::EventPayload::new(json!({ "saleId": "S-1" }), "sales", None),
        ))
        .await;

    let (status, json) = send(&app, "GET", "/bridge/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["service"], "sales");
    assert_eq!(json["ready"], true);
    assert_eq!(json["pending"], 1);
    assert_eq!(json["published"], 0);
    assert_eq!(json["topicPrefix"], "dev");
    assert_eq!(json["deadLetterTopic"], "dev.dead-letter-queue");

    let (status, _) = send(&app, "POST", "/bridge/flush").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&app, "GET", "/bridge/stats").await;
    assert_eq!(json["pending"], 0);
    assert_eq!(json["published"], 1);
    assert!(json["lastPublished"].is_string());
    assert_eq!(broker.messages("dev.order-events").len(), 1);

    bridge.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_event_history_filters_and_limits() {
    let bus = LocalEventBus::for_service("sales");
    let app = setup(None, bus.clone());

    bus.emit(event_types::SALE_CREATED, json!({ "saleId": "S-1" }), None);
    bus.emit(event_types::PAYMENT_RECEIVED, json!({ "amount": 10 }), None);
    bus.emit(event_types::SALE_CREATED, json!({ "saleId": "S-2" }), Some("op-2".into()));

    let (status, json) = send(&app, "GET", "/events/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 3);

    let (_, json) = send(&app, "GET", "/events/history?type=sale.created&limit=1").await;
    assert_eq!(json["count"], 1);
    let event = &json["events"][0];
    assert_eq!(event["eventType"], "sale.created");
    assert_eq!(event["payload"]["data"]["saleId"], "S-2");
    assert_eq!(event["payload"]["correlationId"], "op-2");
    assert_eq!(event["payload"]["source"], "sales");

    let (status, _) = send(&app, "GET", "/events/history?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provision_topics_is_idempotent() {
    let bus = LocalEventBus::for_service("sales");
    let broker = InMemoryBroker::new();
    let bridge = bridge_on(&broker, &bus, BridgeConfig::new("sales"));

    let created = host::provision_topics(&broker, &bridge).await.unwrap();
    assert!(created.contains(&"order-events".to_string()));
    assert!(created.contains(&"saga-events".to_string()));
    assert!(created.contains(&"dead-letter-queue".to_string()));

    let topics = broker.list_topics().await.unwrap();
    assert_eq!(topics.len(), created.len());

    let again = host::provision_topics(&broker, &bridge).await.unwrap();
    assert!(again.is_empty());
}
