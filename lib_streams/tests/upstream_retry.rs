//! Retry behaviour of the upstream client against a fake HTTP server.

use std::time::Duration;

use lib_streams::retrieve::{RetrySettings, UpstreamClient, UpstreamError};
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retries(max_retries: u32) -> RetrySettings {
    RetrySettings {
        max_retries,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn rate_limited_request_is_retried_until_it_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/game/systems"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/game/systems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"systems": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&server.uri(), None, &fast_retries(10)).unwrap();
    let body: Value = client.get_json("game/systems").await.unwrap();
    assert_eq!(body, serde_json::json!({"systems": []}));
}

#[tokio::test]
async fn exhausted_rate_limit_surfaces_the_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/game/systems"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&server.uri(), None, &fast_retries(2)).unwrap();
    let err = client.get_json::<Value>("game/systems").await.unwrap_err();
    assert!(err.is_rate_limited(), "expected rate limit, got {err:?}");
}

#[tokio::test]
async fn other_statuses_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/game/locations/NOPE/marketplace"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&server.uri(), None, &fast_retries(10)).unwrap();
    let err = client
        .get_json::<Value>("game/locations/NOPE/marketplace")
        .await
        .unwrap_err();
    match err {
        UpstreamError::Status { status, body, .. } => {
            assert_eq!(status, 404);
            assert_eq!(body.as_deref(), Some("not found"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/game/systems"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&server.uri(), None, &fast_retries(1)).unwrap();
    let err = client.get_json::<Value>("game/systems").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/game/systems"))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"systems": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        UpstreamClient::new(&server.uri(), Some("t0ken".to_string()), &fast_retries(0)).unwrap();
    client.get_json::<Value>("game/systems").await.unwrap();
}
