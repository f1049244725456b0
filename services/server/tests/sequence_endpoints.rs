//! Integration test: sequence endpoint configuration and invocation.
mod common;

use common::{
    spawn_app, spawn_with_broken_sequences, TestApp, OTHER_TOKEN, OWNER, OWNER_TOKEN,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

async fn create(app: &TestApp, body: Value) -> reqwest::Response {
    app.client
        .post(app.url("/api/v1/sequence-endpoints"))
        .bearer_auth(OWNER_TOKEN)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn invoke(app: &TestApp, name: &str) -> reqwest::Response {
    app.client
        .post(app.url(&format!("/sequence-endpoint/{OWNER}/{name}")))
        .json(&json!({ "attempt": true }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn payload_step_then_envelope_step_then_back() {
    let app = spawn_app().await;
    let resp = create(
        &app,
        json!({
            "endpoint_name": "payments",
            "sequence_config": [
                { "http_code": 200, "delay_ms": 0, "payload": { "a": 1 } },
                { "http_code": 500, "delay_ms": 0, "payload": null },
            ],
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["current_index"], 0);
    assert_eq!(created["is_active"], true);

    let first = invoke(&app, "payments").await;
    assert_eq!(first.status(), 200);
    assert_eq!(first.json::<Value>().await.unwrap(), json!({ "a": 1 }));

    let second = invoke(&app, "payments").await;
    assert_eq!(second.status(), 500);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["status"], 500);
    assert_eq!(body["message"], "Internal Server Error");
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], format!("/sequence-endpoint/{OWNER}/payments"));
    assert_eq!(body["current_step"]["index"], 1);
    assert_eq!(body["next_step"]["index"], 0);
    assert_eq!(body["received_data"], json!({ "attempt": true }));

    let third = invoke(&app, "payments").await;
    assert_eq!(third.status(), 200);
    assert_eq!(third.json::<Value>().await.unwrap(), json!({ "a": 1 }));
}

#[tokio::test]
async fn sequential_calls_rotate_and_rest_at_n_mod_k() {
    let app = spawn_app().await;
    create(
        &app,
        json!({
            "endpoint_name": "rotate",
            "sequence_config": [
                { "http_code": 201 }, { "http_code": 202 }, { "http_code": 203 },
            ],
        }),
    )
    .await;

    let mut codes = Vec::new();
    for _ in 0..7 {
        codes.push(invoke(&app, "rotate").await.status().as_u16());
    }
    assert_eq!(codes, vec![201, 202, 203, 201, 202, 203, 201]);

    let list: Value = app
        .client
        .get(app.url("/api/v1/sequence-endpoints"))
        .bearer_auth(OWNER_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["endpoints"][0]["current_index"], 7 % 3);
}

#[tokio::test]
async fn concurrent_calls_never_share_an_index() {
    let app = spawn_app().await;
    create(
        &app,
        json!({
            "endpoint_name": "burst",
            "sequence_config": [
                { "http_code": 201 }, { "http_code": 202 }, { "http_code": 203 },
            ],
        }),
    )
    .await;

    let url = app.url(&format!("/sequence-endpoint/{OWNER}/burst"));
    let calls: Vec<_> = (0..9)
        .map(|_| {
            let client = app.client.clone();
            let url = url.clone();
            tokio::spawn(async move { client.get(url).send().await.unwrap().status().as_u16() })
        })
        .collect();
    let mut codes = Vec::new();
    for call in calls {
        codes.push(call.await.unwrap());
    }
    codes.sort_unstable();
    assert_eq!(codes, vec![201, 201, 201, 202, 202, 202, 203, 203, 203]);
}

#[tokio::test]
async fn calls_to_one_endpoint_do_not_overlap() {
    let app = spawn_app().await;
    create(
        &app,
        json!({
            "endpoint_name": "slow",
            "sequence_config": [{ "http_code": 202, "delay_ms": 300 }],
        }),
    )
    .await;

    let started = Instant::now();
    let url = app.url(&format!("/sequence-endpoint/{OWNER}/slow"));
    let a = tokio::spawn(app.client.get(url.clone()).send());
    let b = tokio::spawn(app.client.get(url).send());
    assert_eq!(a.await.unwrap().unwrap().status(), 202);
    assert_eq!(b.await.unwrap().unwrap().status(), 202);
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn status_specific_headers_and_empty_204() {
    let app = spawn_app().await;
    create(
        &app,
        json!({
            "endpoint_name": "statuses",
            "sequence_config": [
                { "http_code": 401 }, { "http_code": 302 }, { "http_code": 503 }, { "http_code": 204 },
            ],
        }),
    )
    .await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let url = app.url(&format!("/sequence-endpoint/{OWNER}/statuses"));

    let r = client.get(&url).send().await.unwrap();
    assert_eq!(r.status(), 401);
    assert_eq!(
        r.headers()["www-authenticate"],
        "Basic realm=\"Authentication Required\""
    );
    let r = client.get(&url).send().await.unwrap();
    assert_eq!(r.status(), 302);
    assert_eq!(r.headers()["location"], "/");
    let r = client.get(&url).send().await.unwrap();
    assert_eq!(r.status(), 503);
    assert_eq!(r.headers()["retry-after"], "120");
    let r = client.get(&url).send().await.unwrap();
    assert_eq!(r.status(), 204);
    assert!(r.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_inactive_and_foreign_endpoints_are_not_found() {
    let app = spawn_app().await;
    let created: Value = create(
        &app,
        json!({ "endpoint_name": "toggle", "sequence_config": [{ "http_code": 200 }] }),
    )
    .await
    .json()
    .await
    .unwrap();
    let id = created["id"].as_i64().unwrap();

    assert_eq!(invoke(&app, "missing").await.status(), 404);
    let resp = app
        .client
        .get(app.url(&format!("/sequence-endpoint/{}/toggle", common::OTHER_OWNER)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = app
        .client
        .put(app.url(&format!("/api/v1/sequence-endpoints/{id}")))
        .bearer_auth(OWNER_TOKEN)
        .json(&json!({ "is_active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(invoke(&app, "toggle").await.status(), 404);

    // Another owner cannot touch it.
    let resp = app
        .client
        .delete(app.url(&format!("/api/v1/sequence-endpoints/{id}")))
        .bearer_auth(OTHER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn validation_errors_name_the_step_and_field() {
    let app = spawn_app().await;

    let resp = create(
        &app,
        json!({
            "endpoint_name": "bad",
            "sequence_config": [{ "http_code": 200 }, { "http_code": 200, "delay_ms": 60001 }],
        }),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["details"], json!({ "step": 1, "field": "delay_ms" }));

    let resp = create(&app, json!({ "endpoint_name": "bad", "sequence_config": [] })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["details"]["field"], "sequence_config");

    let resp = create(
        &app,
        json!({ "endpoint_name": "bad", "sequence_config": [{ "http_code": 99 }] }),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = create(
        &app,
        json!({ "endpoint_name": "bad", "sequence_config": [{ "http_code": 200, "payload": "{oops" }] }),
    )
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["details"], json!({ "step": 0, "field": "payload" }));
}

#[tokio::test]
async fn duplicate_names_conflict_and_reset_rewinds() {
    let app = spawn_app().await;
    let body = json!({
        "endpoint_name": "dup",
        "sequence_config": [{ "http_code": 201 }, { "http_code": 202 }],
    });
    let created: Value = create(&app, body.clone()).await.json().await.unwrap();
    assert_eq!(create(&app, body).await.status(), 409);

    assert_eq!(invoke(&app, "dup").await.status(), 201);
    let id = created["id"].as_i64().unwrap();
    let reset: Value = app
        .client
        .post(app.url(&format!("/api/v1/sequence-endpoints/{id}/reset")))
        .bearer_auth(OWNER_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["current_index"], 0);
    assert_eq!(invoke(&app, "dup").await.status(), 201);

    // Replacing the steps also rewinds.
    assert_eq!(invoke(&app, "dup").await.status(), 202);
    invoke(&app, "dup").await;
    let updated: Value = app
        .client
        .put(app.url(&format!("/api/v1/sequence-endpoints/{id}")))
        .bearer_auth(OWNER_TOKEN)
        .json(&json!({ "sequence_config": [{ "http_code": 418 }, { "http_code": 200 }] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["current_index"], 0);
    assert_eq!(invoke(&app, "dup").await.status(), 418);
}

#[tokio::test]
async fn httpcode_tester_echoes_status() {
    let app = spawn_app().await;

    let resp = app
        .client
        .post(app.url("/httpcode/429"))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert_eq!(resp.headers()["retry-after"], "60");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Too Many Requests");
    assert_eq!(body["received_data"], "hello");

    let resp = app.client.get(app.url("/httpcode/600")).send().await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn store_failure_during_invocation_is_a_generic_500() {
    let app = spawn_with_broken_sequences().await;

    let resp = invoke(&app, "payments").await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert_eq!(body["message"], "internal server error");
    assert!(!body.to_string().contains("store offline"));
}

#[tokio::test]
async fn names_with_nul_are_rejected_and_never_resolve() {
    let app = spawn_app().await;
    let resp = create(
        &app,
        json!({ "endpoint_name": "pay\u{0}ments", "sequence_config": [{ "http_code": 200 }] }),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["details"]["field"], "endpoint_name");

    assert_eq!(invoke(&app, "pay%00ments").await.status(), 404);
}
