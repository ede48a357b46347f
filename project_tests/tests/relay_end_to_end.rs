use std::time::Duration;

use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use project_tests::{MockSource, RelayHarness, connect, holyrics_body, next_payload, wait_until};

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(300);

fn amazing_grace() -> String {
    holyrics_body("<p>Amazing &amp; Grace</p>", "Hymn", "music")
}

#[tokio::test]
async fn subscriber_receives_normalized_update_once() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;

    let mut client = connect(&harness.ws_url()).await;
    let payload = next_payload(&mut client, WAIT).await.expect("first payload");
    assert_eq!(payload, json!({ "type": "MUSIC", "header": "Hymn", "content": ["Amazing & Grace"] }));

    // Many ticks over the same source text produce nothing new.
    assert!(next_payload(&mut client, QUIET).await.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn late_joiner_gets_current_slide_first() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;

    assert!(wait_until(WAIT, || !harness.relay.current().is_empty()).await);

    let mut late = connect(&harness.ws_url()).await;
    let replay = next_payload(&mut late, WAIT).await.expect("replay");
    assert_eq!(replay["content"], json!(["Amazing & Grace"]));
    assert!(next_payload(&mut late, QUIET).await.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn empty_relay_sends_nothing_on_connect() {
    let source = MockSource::start(None).await;
    let harness = RelayHarness::start(source.addr, None).await;

    let mut client = connect(&harness.ws_url()).await;
    assert!(next_payload(&mut client, QUIET).await.is_none());
    assert!(wait_until(WAIT, || harness.relay.subscriber_count() == 1).await);

    harness.stop().await;
}

#[tokio::test]
async fn changes_fan_out_to_every_subscriber() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;
    assert!(wait_until(WAIT, || !harness.relay.current().is_empty()).await);

    let mut first = connect(&harness.ws_url()).await;
    let mut second = connect(&harness.ws_url()).await;
    assert!(next_payload(&mut first, WAIT).await.is_some());
    assert!(next_payload(&mut second, WAIT).await.is_some());

    source.set_body(holyrics_body(
        "In the beginning God created the heaven and the earth. And the earth was without form.",
        "Genesis 1:1-2",
        "Bible",
    ));

    let expected = json!({
        "type": "BIBLE",
        "header": "Genesis 1:1-2",
        "content": [
            "In the beginning God created the heaven and the earth",
            "And the earth was without form"
        ]
    });
    assert_eq!(next_payload(&mut first, WAIT).await, Some(expected.clone()));
    assert_eq!(next_payload(&mut second, WAIT).await, Some(expected));

    harness.stop().await;
}

#[tokio::test]
async fn markup_only_changes_are_not_broadcast() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;

    let mut client = connect(&harness.ws_url()).await;
    assert!(next_payload(&mut client, WAIT).await.is_some());

    source.set_body(holyrics_body(
        "<p><b>Amazing</b> &amp; Grace</p><span id=\"text-force-update_7\">7</span>",
        "Hymn",
        "music",
    ));
    assert!(next_payload(&mut client, QUIET).await.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn outage_is_reported_and_recovers() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;
    let mut client = connect(&harness.ws_url()).await;
    assert!(next_payload(&mut client, WAIT).await.is_some());

    source.set_unavailable();
    assert!(wait_until(WAIT, || !harness.health.is_connected()).await);

    let status: serde_json::Value = reqwest::get(harness.http_url("/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["source"]["connected"], json!(false));
    assert_eq!(status["subscribers"], json!(1));
    assert_eq!(status["contentType"], json!("MUSIC"));

    // The last good slide stays; subscribers are not told about the outage.
    assert!(next_payload(&mut client, QUIET).await.is_none());
    assert_eq!(harness.relay.current().lines, vec!["Amazing & Grace"]);

    source.set_body(amazing_grace());
    assert!(wait_until(WAIT, || harness.health.is_connected()).await);
    assert_eq!(harness.health.snapshot().consecutive_errors, 0);
    assert!(next_payload(&mut client, QUIET).await.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn malformed_source_body_is_ignored() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;
    let mut client = connect(&harness.ws_url()).await;
    assert!(next_payload(&mut client, WAIT).await.is_some());

    source.set_body(r#"{"map":{"text":42}}"#);
    assert!(next_payload(&mut client, QUIET).await.is_none());
    assert!(harness.health.is_connected());

    source.set_body(holyrics_body("Next slide", "Hymn", "music"));
    let payload = next_payload(&mut client, WAIT).await.expect("update after bad body");
    assert_eq!(payload["content"], json!(["Next slide"]));

    harness.stop().await;
}

#[tokio::test]
async fn closed_clients_are_unregistered() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;

    let mut client = connect(&harness.ws_url()).await;
    let _stays = connect(&harness.ws_url()).await;
    assert!(wait_until(WAIT, || harness.relay.subscriber_count() == 2).await);

    client.send(Message::Text("hello".into())).await.unwrap();
    client.close(None).await.unwrap();
    assert!(wait_until(WAIT, || harness.relay.subscriber_count() == 1).await);

    harness.stop().await;
}

#[tokio::test]
async fn health_and_static_assets_are_served() {
    let public = tempfile::tempdir().unwrap();
    std::fs::write(public.path().join("index.html"), "<h1>lyrics</h1>").unwrap();

    let source = MockSource::start(None).await;
    let harness = RelayHarness::start(source.addr, Some(public.path())).await;

    let health = reqwest::get(harness.http_url("/health")).await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let index = reqwest::get(harness.http_url("/index.html")).await.unwrap();
    assert_eq!(index.status(), reqwest::StatusCode::OK);
    assert_eq!(index.text().await.unwrap(), "<h1>lyrics</h1>");

    let missing = reqwest::get(harness.http_url("/nope.js")).await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_closes_subscriber_connections() {
    let source = MockSource::start(Some(amazing_grace())).await;
    let harness = RelayHarness::start(source.addr, None).await;
    let relay = std::sync::Arc::clone(&harness.relay);

    let mut client = connect(&harness.ws_url()).await;
    assert!(next_payload(&mut client, WAIT).await.is_some());

    harness.stop().await;
    assert_eq!(relay.subscriber_count(), 0);
    // The connection ends instead of waiting for more payloads.
    assert!(next_payload(&mut client, WAIT).await.is_none());
}
