//! wiremock-based ingestion endpoint for APM transport tests.

use std::time::Duration;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a mock ingestion endpoint answering `POST /v2/track` with `status`.
pub async fn setup_ingestion_mock(status: u16) -> MockServer {
    let server = MockServer::start().await;
    let accepted = u32::from(status == 200);
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "itemsReceived": 1,
            "itemsAccepted": accepted,
            "errors": []
        })))
        .mount(&server)
        .await;
    server
}

/// Wait until the server has received `count` requests, then return every
/// envelope posted so far.
pub async fn wait_for_envelopes(server: &MockServer, count: usize) -> Vec<Value> {
    for _ in 0..200 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count {
            return requests
                .iter()
                .flat_map(|r| {
                    let body: Value = serde_json::from_slice(&r.body).expect("JSON body");
                    body.as_array().cloned().unwrap_or_default()
                })
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("ingestion endpoint did not receive {count} request(s) in time");
}
