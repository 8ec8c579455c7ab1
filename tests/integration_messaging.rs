#![allow(clippy::unwrap_used, clippy::panic, clippy::cast_possible_truncation)]
mod common;

use common::{TestApp, message_body, now};

#[tokio::test]
async fn test_message_lifecycle() {
    let app = TestApp::spawn().await;

    // 1. Submit without an expiry
    let stored = app.store_message(&message_body("m1", "alice", now())).await;
    let expected_expiry = now() + 2_592_000;
    let expires_at = stored["expiresAt"].as_i64().unwrap();
    assert!((expires_at - expected_expiry).abs() <= 2, "expiresAt should be about 30 days out");
    assert!(stored["_rev"].is_string(), "stored message carries its revision");

    // 2. Poll for it
    let listing = app.list_messages("alice").await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["messages"][0]["id"], "m1");
    assert_eq!(listing["messages"][0]["encryptedPayload"], "3q2+7w==");

    // 3. Delete without a revision
    let resp = app.delete_message("m1", None).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Message deleted");

    // 4. Gone
    let listing = app.list_messages("alice").await;
    assert_eq!(listing["count"], 0);
    assert_eq!(listing["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_listing_is_sorted_by_timestamp() {
    let app = TestApp::spawn().await;

    for (id, ts) in [("t5", 5), ("t1", 1), ("t3", 3)] {
        app.store_message(&message_body(id, "alice", ts)).await;
    }

    let listing = app.list_messages("alice").await;
    let timestamps: Vec<i64> =
        listing["messages"].as_array().unwrap().iter().map(|m| m["timestamp"].as_i64().unwrap()).collect();

    // Ordering among equal timestamps is unspecified; these are distinct.
    assert_eq!(timestamps, vec![1, 3, 5]);
}

#[tokio::test]
async fn test_listing_only_returns_the_recipients_messages() {
    let app = TestApp::spawn().await;

    app.store_message(&message_body("a1", "alice", 1)).await;
    app.store_message(&message_body("c1", "carol", 2)).await;

    let listing = app.list_messages("carol").await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["messages"][0]["id"], "c1");

    let listing = app.list_messages("nobody").await;
    assert_eq!(listing["count"], 0);
}

#[tokio::test]
async fn test_expired_messages_are_hidden_and_reaped() {
    let app = TestApp::spawn().await;

    let mut expired = message_body("old", "alice", 1);
    expired["expiresAt"] = (now() - 60).into();
    app.store_message(&expired).await;
    app.store_message(&message_body("new", "alice", 2)).await;
    assert_eq!(app.store.len(), 2);

    let listing = app.list_messages("alice").await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["messages"][0]["id"], "new");
    for msg in listing["messages"].as_array().unwrap() {
        assert!(msg["expiresAt"].as_i64().unwrap() >= now());
    }

    // The detached deletion finishes on its own
    app.reaper.drain().await;
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn test_listing_since_filters_older_messages() {
    let app = TestApp::spawn().await;

    for (id, ts) in [("s1", 100), ("s2", 200), ("s3", 300)] {
        app.store_message(&message_body(id, "alice", ts)).await;
    }

    let resp = app.client.get(format!("{}/messages/alice?since=150", app.server_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let listing: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(listing["count"], 2);
    assert_eq!(listing["messages"][0]["id"], "s2");
    assert_eq!(listing["messages"][1]["id"], "s3");
}

#[tokio::test]
async fn test_store_assigns_id_when_missing() {
    let app = TestApp::spawn().await;

    let mut body = message_body("", "alice", 1);
    body.as_object_mut().unwrap().remove("id");
    let stored = app.store_message(&body).await;

    let id = stored["id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());

    let listing = app.list_messages("alice").await;
    assert_eq!(listing["messages"][0]["id"], id);
}

#[tokio::test]
async fn test_mark_delivered() {
    let app = TestApp::spawn().await;
    let stored = app.store_message(&message_body("d1", "alice", 1)).await;
    let rev = stored["_rev"].as_str().unwrap();

    let resp = app
        .client
        .post(format!("{}/messages/d1/delivered?rev={}", app.server_url, rev))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(updated["delivered"], true);
    assert!(updated["deliveredAt"].is_i64());
    assert_ne!(updated["_rev"], stored["_rev"]);

    // Reusing the old revision is a conflict
    let resp = app
        .client
        .post(format!("{}/messages/d1/delivered?rev={}", app.server_url, rev))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}
