//! Admin API surface tests: auth, envelopes, CRUD, rate limiting.

use serde_json::Value;

mod common;
use common::*;

#[tokio::test]
async fn admin_requires_bearer_token() {
    let addr = start_mock_backend("a").await;
    let (proxy, _router, shutdown) =
        spawn_proxy(vec![service("127.0.0.1", vec![backend("a", addr)])]).await;

    let client = client();

    let res = client
        .get(format!("http://{proxy}/__lb_admin__/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");

    let res = client
        .get(format!("http://{proxy}/__lb_admin__/list"))
        .header("authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_admin__/list"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["hostname"], "127.0.0.1");

    shutdown.trigger();
}

#[tokio::test]
async fn admin_alias_prefix_works() {
    let addr = start_mock_backend("a").await;
    let (proxy, _router, shutdown) =
        spawn_proxy(vec![service("127.0.0.1", vec![backend("a", addr)])]).await;

    let client = client();
    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/admin/list"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn unknown_service_is_404_and_malformed_path_400() {
    let (proxy, _router, shutdown) = spawn_proxy(vec![]).await;

    let client = client();
    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_admin__/services/nope.example.com/config"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_admin__/definitely/not/a/route"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 400);

    shutdown.trigger();
}

#[tokio::test]
async fn put_creates_get_reads_delete_removes() {
    let addr = start_mock_backend("a").await;
    let (proxy, _router, shutdown) = spawn_proxy(vec![]).await;
    let client = client();

    let res = admin(
        &client,
        reqwest::Method::PUT,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/config"),
    )
    .json(&serde_json::json!({
        "backends": [{"id": "a", "url": format!("http://{addr}")}]
    }))
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);

    // Data plane picks it up immediately.
    let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "a");

    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/config"),
    )
    .send()
    .await
    .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["hostname"], "127.0.0.1");
    assert_eq!(body["data"]["pools"][0]["backends"][0]["id"], "a");

    let res = admin(
        &client,
        reqwest::Method::DELETE,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/config"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);

    let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    shutdown.trigger();
}

#[tokio::test]
async fn invalid_config_is_rejected_with_400() {
    let (proxy, _router, shutdown) = spawn_proxy(vec![]).await;
    let client = client();

    let res = admin(
        &client,
        reqwest::Method::PUT,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/config"),
    )
    .json(&serde_json::json!({
        "backends": [{"id": "a", "url": "ftp://bad-scheme:21"}]
    }))
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "bad_request");
    assert!(body["data"]["detail"].as_str().unwrap().contains("scheme"));

    shutdown.trigger();
}

#[tokio::test]
async fn disable_and_enable_toggle_traffic() {
    let addr_a = start_mock_backend("a").await;
    let addr_b = start_mock_backend("b").await;
    let (proxy, _router, shutdown) = spawn_proxy(vec![service(
        "127.0.0.1",
        vec![backend("a", addr_a), backend("b", addr_b)],
    )])
    .await;
    let client = client();

    let res = admin(
        &client,
        reqwest::Method::POST,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/backends/b/disable"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);

    for _ in 0..6 {
        let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "a");
    }

    let res = admin(
        &client,
        reqwest::Method::POST,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/backends/b/enable"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);

    let mut saw_b = false;
    for _ in 0..6 {
        let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
        if res.text().await.unwrap() == "b" {
            saw_b = true;
        }
    }
    assert!(saw_b);

    shutdown.trigger();
}

#[tokio::test]
async fn add_backend_joins_the_pool() {
    let addr_a = start_mock_backend("a").await;
    let addr_b = start_mock_backend("b").await;
    let (proxy, _router, shutdown) =
        spawn_proxy(vec![service("127.0.0.1", vec![backend("a", addr_a)])]).await;
    let client = client();

    let res = admin(
        &client,
        reqwest::Method::POST,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/backends"),
    )
    .json(&serde_json::json!({
        "pool": "default",
        "id": "b",
        "url": format!("http://{addr_b}")
    }))
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);

    let mut bodies = std::collections::HashSet::new();
    for _ in 0..6 {
        let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
        bodies.insert(res.text().await.unwrap());
    }
    assert!(bodies.contains("a") && bodies.contains("b"));

    shutdown.trigger();
}

#[tokio::test]
async fn sessions_endpoint_reports_and_clears_bindings() {
    let addr = start_mock_backend("a").await;
    let mut svc = service("127.0.0.1", vec![backend("a", addr)]);
    svc.session_affinity.kind = loadstar::config::schema::AffinityKind::Cookie;
    let (proxy, _router, shutdown) = spawn_proxy(vec![svc]).await;
    let client = client();

    let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().get("set-cookie").is_some());

    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/sessions"),
    )
    .send()
    .await
    .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["count"], 1);

    let res = admin(
        &client,
        reqwest::Method::DELETE,
        format!("http://{proxy}/__lb_admin__/services/127.0.0.1/sessions"),
    )
    .send()
    .await
    .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["cleared"], 1);

    shutdown.trigger();
}

#[tokio::test]
async fn rate_limit_exhaustion_returns_429() {
    let addr = start_mock_backend("a").await;
    let mut boot = loadstar::config::loader::BootConfig::default();
    boot.admin.api_secret = TEST_SECRET.to_string();
    boot.admin.rate_limit_per_minute = 60;
    boot.admin.rate_limit_burst = 3;
    let (proxy, _router, shutdown) =
        spawn_proxy_with_boot(vec![service("127.0.0.1", vec![backend("a", addr)])], boot).await;
    let client = client();

    let mut last_status = 0;
    for _ in 0..5 {
        let res = admin(
            &client,
            reqwest::Method::GET,
            format!("http://{proxy}/__lb_admin__/list"),
        )
        .send()
        .await
        .unwrap();
        last_status = res.status().as_u16();
    }
    assert_eq!(last_status, 429);

    // The data plane is not throttled.
    let res = client.get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn metrics_surface_negotiates_json_and_html() {
    let addr = start_mock_backend("a").await;
    let (proxy, _router, shutdown) =
        spawn_proxy(vec![service("127.0.0.1", vec![backend("a", addr)])]).await;
    let client = client();

    client.get(format!("http://{proxy}/")).send().await.unwrap();

    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_metrics__/127.0.0.1/json"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["service"], "127.0.0.1");
    assert_eq!(body["totals"]["requests"], 1);
    assert_eq!(body["backends"][0]["cb_state"], "closed");

    let res = admin(
        &client,
        reqwest::Method::GET,
        format!("http://{proxy}/__lb_metrics__/127.0.0.1/html"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.text().await.unwrap().contains("<table"));

    shutdown.trigger();
}
