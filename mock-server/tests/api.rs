use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, pattern, Echo};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(String::new())
        .unwrap()
}

// --- echo ---

#[tokio::test]
async fn get_echoes_method_and_path() {
    let resp = app().oneshot(empty_request("GET", "/get")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.path, "/get");
    assert_eq!(echo.length, 0);
    assert!(echo.json.is_none());
}

#[tokio::test]
async fn get_echoes_request_headers() {
    let req = Request::builder()
        .uri("/get")
        .header("x-courier-test", "yes")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.headers.get("x-courier-test").map(String::as_str), Some("yes"));
}

#[tokio::test]
async fn post_echoes_json_body() {
    let resp = app()
        .oneshot(json_request("POST", "/post", r#"{"title":"test","userId":1}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "POST");
    let json = echo.json.unwrap();
    assert_eq!(json["title"], "test");
    assert_eq!(json["userId"], 1);
}

#[tokio::test]
async fn put_and_patch_report_body_length() {
    for (method, uri) in [("PUT", "/put"), ("PATCH", "/patch")] {
        let resp = app()
            .oneshot(json_request(method, uri, r#"{"body":"x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{method}");
        let echo: Echo = body_json(resp).await;
        assert_eq!(echo.method, method);
        assert_eq!(echo.length, 12);
    }
}

#[tokio::test]
async fn bodies_past_the_default_limit_are_accepted() {
    let body = "a".repeat(3 * 1024 * 1024);
    let request = Request::builder()
        .method("PUT")
        .uri("/put")
        .body(body)
        .unwrap();

    let resp = app().oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.length, 3 * 1024 * 1024);
}

#[tokio::test]
async fn non_json_body_leaves_json_empty() {
    let resp = app()
        .oneshot(json_request("POST", "/post", "plain text"))
        .await
        .unwrap();

    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.length, 10);
    assert!(echo.json.is_none());
}

#[tokio::test]
async fn delete_route_accepts_delete() {
    let resp = app().oneshot(empty_request("DELETE", "/delete")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "DELETE");
}

#[tokio::test]
async fn wrong_method_returns_405() {
    let resp = app().oneshot(empty_request("POST", "/get")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// --- bytes ---

#[tokio::test]
async fn bytes_returns_requested_length() {
    let resp = app().oneshot(empty_request("GET", "/bytes/1000")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    let body = body_bytes(resp).await;
    assert_eq!(body.as_ref(), pattern(1000).as_slice());
}

#[tokio::test]
async fn bytes_rejects_oversized_payload() {
    let uri = format!("/bytes/{}", mock_server::MAX_BYTES + 1);
    let resp = app().oneshot(empty_request("GET", &uri)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn bytes_bad_length_returns_400() {
    let resp = app().oneshot(empty_request("GET", "/bytes/lots")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- delay / status ---

#[tokio::test]
async fn delay_responds_after_sleeping() {
    let started = std::time::Instant::now();
    let resp = app().oneshot(empty_request("GET", "/delay/50")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.path, "/delay/50");
}

#[tokio::test]
async fn status_returns_given_code() {
    let resp = app().oneshot(empty_request("GET", "/status/418")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert!(body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn status_out_of_range_returns_400() {
    let resp = app().oneshot(empty_request("GET", "/status/42")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
