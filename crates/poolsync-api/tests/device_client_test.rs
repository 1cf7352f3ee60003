#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceClient` using wiremock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use poolsync_api::{
    BasicCredentials, DeviceClient, Error, Priority, RateBudget, RetryConfig, TelemetryValue,
    TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Matches the raw query string byte-for-byte.
///
/// The firmware's query strings are positional (`PUMP,ON,0,2`), not
/// key/value pairs, so the stock `query_param` matcher cannot express
/// them.
struct RawQuery(&'static str);

impl Match for RawQuery {
    fn matches(&self, request: &Request) -> bool {
        request.url.query() == Some(self.0)
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

fn make_client(uri: &str, credentials: Option<BasicCredentials>, retry: RetryConfig) -> DeviceClient {
    let transport = TransportConfig {
        timeout: Duration::from_millis(100),
        ..TransportConfig::default()
    };
    // Generous budget so admission control never delays these tests.
    let budget = Arc::new(RateBudget::new(1000.0, 100));
    DeviceClient::new(uri.parse().unwrap(), credentials, budget, &transport, retry).unwrap()
}

async fn setup() -> (MockServer, DeviceClient) {
    let server = MockServer::start().await;
    let client = make_client(&server.uri(), None, fast_retry());
    (server, client)
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_readings_returns_typed_values() {
    let (server, client) = setup().await;

    let body = json!({
        "WATER_TEMP": 24.3,
        "PUMP": 3,
        "FW": "1.40.1",
        "OVERFLOW_REFILL_STATE": ["BLOCKED_BY_TRESHOLDS", "TRESHOLDS_REACHED"],
        "ERROR_LIST": []
    });
    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .and(RawQuery("ALL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let readings = client.get_readings(Priority::Normal).await.unwrap();

    assert_eq!(readings.len(), 5);
    assert_eq!(readings["WATER_TEMP"], TelemetryValue::Number(24.3));
    assert_eq!(readings["PUMP"].as_integer(), Some(3));
    assert_eq!(readings["FW"].as_text(), Some("1.40.1"));
    assert_eq!(
        readings["OVERFLOW_REFILL_STATE"].as_list().map(<[String]>::len),
        Some(2)
    );
    assert_eq!(readings["ERROR_LIST"].as_list().map(<[String]>::len), Some(0));
}

#[tokio::test]
async fn test_readings_request_includes_basic_auth() {
    let server = MockServer::start().await;
    let credentials = BasicCredentials {
        username: "admin".into(),
        password: SecretString::from("secret".to_string()),
    };
    let client = make_client(&server.uri(), Some(credentials), fast_retry());

    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"PUMP": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let readings = client.get_readings(Priority::Normal).await.unwrap();
    assert_eq!(readings["PUMP"].as_integer(), Some(1));
}

#[tokio::test]
async fn test_read_retries_transient_timeouts_until_success() {
    let (server, client) = setup().await;

    let body = json!({"WATER_TEMP": 21.0});
    // The first two attempts exceed the 100ms request deadline.
    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&body)
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let readings = client.get_readings(Priority::Normal).await.unwrap();

    assert_eq!(readings["WATER_TEMP"], TelemetryValue::Number(21.0));
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_read_gives_up_after_max_attempts() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let err = client.get_readings(Priority::Normal).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_malformed_readings_body_is_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"PUMP": 0})))
        .mount(&server)
        .await;

    let readings = client.get_readings(Priority::Normal).await.unwrap();

    assert_eq!(readings["PUMP"].as_integer(), Some(0));
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_http_unauthorized_maps_to_authentication() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/getReadings"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.get_readings(Priority::Normal).await.unwrap_err();

    assert!(err.is_auth_error(), "got {err:?}");
    assert_eq!(request_count(&server).await, 1);
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_command_payload_is_positional_and_unencoded() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setFunctionManually"))
        .and(RawQuery("PUMP,ON,0,2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client
        .set_function_manually("PUMP", "ON", 0, 2, Priority::High)
        .await
        .unwrap();
    assert_eq!(ack.detail, None);
}

#[tokio::test]
async fn test_target_write_uses_key_value_encoding() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setTargetValues"))
        .and(RawQuery("target=pH&value=7.2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK: pH target set"))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client
        .set_target_value("pH", "7.2", Priority::High)
        .await
        .unwrap();
    assert_eq!(ack.detail.as_deref(), Some("pH target set"));
}

#[tokio::test]
async fn test_write_timeout_is_not_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setFunctionManually"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("OK")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let err = client
        .set_function_manually("PUMP", "ON", 0, 2, Priority::High)
        .await
        .unwrap_err();

    // The relay may already have switched; the caller decides what to do.
    assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_write_retries_when_connection_is_refused() {
    // Reserve a port, then close it so every connect is refused.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(30),
        max_delay: Duration::from_millis(120),
    };
    let client = make_client(&format!("http://127.0.0.1:{port}"), None, retry);

    let start = Instant::now();
    let err = client
        .set_target_value("pH", "7.2", Priority::High)
        .await
        .unwrap_err();

    assert!(err.is_transient_for_write(), "got {err:?}");
    // Two backoff sleeps (30ms, 60ms) prove the two extra attempts ran.
    assert!(start.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn test_error_marker_body_fails_after_single_attempt() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setFunctionManually"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("ERROR: DOSING BLOCKED BY FLOW SENSOR"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .set_function_manually("DOS_1_CL", "MANUAL", 30, 0, Priority::Critical)
        .await
        .unwrap_err();

    assert_eq!(err.device_reason(), Some("DOSING BLOCKED BY FLOW SENSOR"));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_unauthorized_write_is_not_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/setTargetValues"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ERROR: NOT AUTHORIZED"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .set_target_value("pH", "7.2", Priority::High)
        .await
        .unwrap_err();

    assert!(err.is_auth_error(), "got {err:?}");
    assert_eq!(request_count(&server).await, 1);
}

// ── Configuration endpoints ─────────────────────────────────────────

#[tokio::test]
async fn test_get_config_joins_requested_keys() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/getConfig"))
        .and(RawQuery("DOS_1_CL_MAX,DOS_1_PHM_MAX"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"DOS_1_CL_MAX": 120, "DOS_1_PHM_MAX": 90})),
        )
        .mount(&server)
        .await;

    let values = client
        .get_config(&["DOS_1_CL_MAX", "DOS_1_PHM_MAX"], Priority::Low)
        .await
        .unwrap();

    assert_eq!(values["DOS_1_CL_MAX"], json!(120));
    assert_eq!(values["DOS_1_PHM_MAX"], json!(90));
}

#[tokio::test]
async fn test_set_config_posts_json_and_parses_echo() {
    let (server, client) = setup().await;

    let mut values = poolsync_api::ConfigValues::new();
    values.insert("DOS_1_CL_MAX".to_owned(), json!(150));

    Mock::given(method("POST"))
        .and(path("/setConfig"))
        .and(body_json(json!({"DOS_1_CL_MAX": 150})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"DOS_1_CL_MAX": 150})))
        .expect(1)
        .mount(&server)
        .await;

    let echo = client.set_config(&values, Priority::High).await.unwrap();
    assert_eq!(echo["DOS_1_CL_MAX"], json!(150));
}
