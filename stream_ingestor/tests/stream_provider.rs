mod common;

use std::sync::Arc;

use common::{TOKEN, config_for, provider_for, ts, window};
use mockito::{Matcher, Server};
use serde_json::json;
use stream_ingestor::{
    auth::StaticToken,
    providers::{
        FetchError, SeriesSource,
        stream_rest::{params::SeriesRequest, provider::StreamProvider},
    },
};

fn isone_request(products: &[&str]) -> SeriesRequest {
    SeriesRequest::new(
        "market-series",
        "ISONE",
        "NODE1",
        products,
        window(ts(2021, 1, 5, 0, 0), ts(2021, 1, 6, 0, 0)),
        false,
    )
}

#[tokio::test]
async fn fetch_sends_bearer_token_and_wire_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/series")
        .match_header("authorization", format!("Bearer {TOKEN}").as_str())
        .match_body(Matcher::Json(json!({
            "energy_da": {
                "dataType": "market-series",
                "params": {
                    "market": "ISONE",
                    "location": "NODE1",
                    "product": "energy_da",
                    "startDate": "01/05/2021",
                    "endDate": "01/06/2021",
                    "useCache": "false"
                }
            }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "energy_da": {
                    "columns": ["timestamp", "energy_da"],
                    "data": [["2021-01-05T00:00:00-05:00", 40.25], ["2021-01-05T01:00:00-05:00", null]]
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let batch = provider_for(&server.url())
        .fetch(&isone_request(&["energy_da"]))
        .await
        .unwrap();

    let points = &batch["energy_da"];
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp, ts(2021, 1, 5, 0, 0));
    assert_eq!(points[0].price, Some(40.25));
    assert_eq!(points[1].price, None);
    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_node_is_retried_five_times_then_fails() {
    let mut server = Server::new_async().await;
    let body = json!({"message": format!("Invalid node {}", "Z".repeat(200))}).to_string();
    let mock = server
        .mock("POST", "/series")
        .with_status(200)
        .with_body(&body)
        .expect(5)
        .create_async()
        .await;

    let err = provider_for(&server.url())
        .fetch(&isone_request(&["energy_da"]))
        .await
        .unwrap_err();

    match &err {
        FetchError::Upstream {
            attempts, snippet, ..
        } => {
            assert_eq!(*attempts, 5);
            let expected: String = body.chars().take(100).collect();
            assert_eq!(snippet.as_deref(), Some(expected.as_str()));
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn status_errors_are_upstream_and_client_is_reusable() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/series")
        .with_status(503)
        .with_body("busy")
        .create_async()
        .await;

    let provider = provider_for(&server.url());
    let err = provider
        .fetch(&isone_request(&["spin_rt"]))
        .await
        .unwrap_err();
    // every attempt hit the 503 mock
    assert!(matches!(err, FetchError::Upstream { .. }));
    failing.remove_async().await;

    let ok = server
        .mock("POST", "/series")
        .with_status(200)
        .with_body(r#"{"spin_rt": {"columns": [], "data": [["2021-01-05 00:05:00", 1.5]]}}"#)
        .create_async()
        .await;
    let batch = provider.fetch(&isone_request(&["spin_rt"])).await.unwrap();
    assert_eq!(batch["spin_rt"][0].price, Some(1.5));
    ok.assert_async().await;
}

#[tokio::test]
async fn undecodable_body_ends_as_decode_error() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("POST", "/series")
        .with_status(200)
        .with_body("<html>gateway timeout</html>")
        .create_async()
        .await;

    let err = provider_for(&server.url())
        .fetch(&isone_request(&["energy_da"]))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode { attempts: 5, .. }));
}

#[tokio::test]
async fn ping_parses_service_time() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/ping")
        .match_header("authorization", format!("Bearer {TOKEN}").as_str())
        .with_status(200)
        .with_body("\"01/05/2021 14:30:00 +0000\"")
        .create_async()
        .await;

    let status = provider_for(&server.url()).ping().await.unwrap();
    assert_eq!(status.service_time.naive_utc(), ts(2021, 1, 5, 14, 30));
    mock.assert_async().await;
}

#[tokio::test]
async fn ping_failure_is_unreachable() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/ping")
        .with_status(500)
        .expect(5)
        .create_async()
        .await;

    let err = provider_for(&server.url()).ping().await.unwrap_err();
    assert!(matches!(err, FetchError::Unreachable { attempts: 5, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn token_failures_never_reach_the_service() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/tenant-1/oauth2/token")
        .with_status(400)
        .with_body("invalid_client")
        .expect(5)
        .create_async()
        .await;
    let series = server
        .mock("POST", "/series")
        .expect(0)
        .create_async()
        .await;

    let cfg = config_for(
        &server.url(),
        &format!("authority_host = \"{}\"\nsecret = \"s3cret\"", server.url()),
    );
    let err = StreamProvider::from_config(&cfg)
        .unwrap()
        .fetch(&isone_request(&["energy_da"]))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Auth { attempts: 5, .. }));
    token.assert_async().await;
    series.assert_async().await;
}

#[tokio::test]
async fn rate_limited_client_still_fetches() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/series")
        .with_status(200)
        .with_body(r#"{"energy_da": {"columns": [], "data": []}}"#)
        .expect(3)
        .create_async()
        .await;

    let cfg = config_for(&server.url(), "requests_per_second = 50");
    let provider = StreamProvider::with_token_source(&cfg, Arc::new(StaticToken::new(TOKEN))).unwrap();
    for _ in 0..3 {
        provider.fetch(&isone_request(&["energy_da"])).await.unwrap();
    }
    mock.assert_async().await;
}
