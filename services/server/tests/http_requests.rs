//! Integration test: captured-request management API.
mod common;

use common::{spawn_app, TestApp, OTHER_TOKEN, OWNER, OWNER_TOKEN};
use serde_json::{json, Value};

async fn capture(app: &TestApp, channel: &str, body: Value) -> i64 {
    let ack: Value = app
        .client
        .post(app.url(&format!("/webhook/{OWNER}/{channel}")))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    ack["id"].as_i64().unwrap()
}

async fn get_json(app: &TestApp, path: &str, token: &str) -> Value {
    app.client
        .get(app.url(path))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn api_requires_a_token() {
    let app = spawn_app().await;
    let resp = app.client.get(app.url("/api/v1/channels")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    app.accounts.revoke_token(OWNER_TOKEN);
    let resp = app
        .client
        .get(app.url("/api/v1/channels"))
        .bearer_auth(OWNER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn channels_are_listed_most_recent_first() {
    let app = spawn_app().await;
    capture(&app, "alpha", json!({})).await;
    capture(&app, "beta", json!({})).await;
    capture(&app, "alpha", json!({})).await;

    let body = get_json(&app, "/api/v1/channels", OWNER_TOKEN).await;
    assert_eq!(body["ids"], json!(["alpha", "beta"]));

    let body = get_json(&app, "/api/v1/channels", OTHER_TOKEN).await;
    assert_eq!(body["ids"], json!([]));
}

#[tokio::test]
async fn search_matches_fields_and_reports_context() {
    let app = spawn_app().await;
    capture(&app, "orders", json!({ "customer": "Grace Hopper" })).await;
    capture(&app, "hopper-hooks", json!({ "n": 1 })).await;
    capture(&app, "misc", json!({ "n": 2 })).await;

    let body: Value = app
        .client
        .post(app.url("/api/v1/requests/search"))
        .bearer_auth(OWNER_TOKEN)
        .json(&json!({ "search_term": "HOPPER" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["webhook_id"], "hopper-hooks");
    assert_eq!(results[0]["match_context"], json!(["webhook_id"]));
    assert_eq!(results[1]["match_context"], json!(["body"]));

    let body: Value = app
        .client
        .post(app.url("/api/v1/requests/search"))
        .bearer_auth(OWNER_TOKEN)
        .json(&json!({ "start_date": "2000-01-01", "end_date": "2999-12-31" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 3);

    let resp = app
        .client
        .post(app.url("/api/v1/requests/search"))
        .bearer_auth(OWNER_TOKEN)
        .json(&json!({ "start_date": "last tuesday" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn notifications_track_read_state() {
    let app = spawn_app().await;
    let first = capture(&app, "a", json!({ "i": 1 })).await;
    capture(&app, "b", json!({ "i": 2 })).await;

    let body = get_json(&app, "/api/v1/notifications", OWNER_TOKEN).await;
    assert_eq!(body["unread_count"], 2);
    assert_eq!(body["notifications"].as_array().unwrap().len(), 2);

    let resp = app
        .client
        .post(app.url(&format!("/api/v1/requests/{first}/read")))
        .bearer_auth(OWNER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = get_json(&app, "/api/v1/notifications", OWNER_TOKEN).await;
    assert_eq!(body["unread_count"], 1);
    assert_eq!(body["notifications"][0]["webhook_id"], "b");

    // Another owner cannot mark it.
    let resp = app
        .client
        .post(app.url(&format!("/api/v1/requests/{first}/read")))
        .bearer_auth(OTHER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    app.client
        .post(app.url("/api/v1/notifications/read-all"))
        .bearer_auth(OWNER_TOKEN)
        .send()
        .await
        .unwrap();
    let body = get_json(&app, "/api/v1/notifications", OWNER_TOKEN).await;
    assert_eq!(body["unread_count"], 0);
    assert_eq!(body["notifications"], json!([]));
}

#[tokio::test]
async fn health_endpoints_answer() {
    let app = spawn_app().await;
    for path in ["/healthz", "/readyz"] {
        let resp = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
}
