//! 디스패치 평면 통합 테스트입니다. 실제 업스트림 소켓에 대해
//! 라우터 빌더가 만든 핸들러로 요청을 처리합니다.

mod common;

use std::sync::Arc;

use arc_swap::ArcSwap;
use http_body_util::BodyExt;
use hyper::StatusCode;

use rproxy::breaker::BreakerState;
use rproxy::proxy::ProxyClient;
use rproxy::retry::RetryPolicy;
use rproxy::router;

use common::*;

fn entry_points() -> Vec<String> {
    vec!["http".to_string()]
}

async fn body_string(response: hyper::Response<http_body_util::Full<bytes::Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

#[tokio::test]
async fn test_basic_host_routing() {
    let s1 = spawn_upstream(StatusCode::OK, "S1").await;
    let s2 = spawn_upstream(StatusCode::OK, "S2").await;

    let config = configuration(
        vec![
            ("b1", backend(&[("s1", s1, 1)])),
            ("b2", backend(&[("s2", s2, 1)])),
        ],
        vec![
            ("f1", frontend("b1", "Host:a.test", 0)),
            ("f2", frontend("b2", "Host:b.test", 0)),
        ],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "S1");

    let response = handler.handle(request("b.test", "/"), None).await;
    assert_eq!(body_string(response).await, "S2");

    // 매칭되지 않는 호스트는 404
    let response = handler.handle(request("c.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_explicit_priority_wins() {
    let b1 = spawn_upstream(StatusCode::OK, "B1").await;
    let b2 = spawn_upstream(StatusCode::OK, "B2").await;

    // f1은 호스트 규칙(priority=1), f2는 경로 규칙(priority=10)
    let config = configuration(
        vec![
            ("b1", backend(&[("s1", b1, 1)])),
            ("b2", backend(&[("s2", b2, 1)])),
        ],
        vec![
            ("f1", frontend("b2", "Host:test.localhost", 1)),
            ("f2", frontend("b1", "Path:/test", 10)),
        ],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    // 두 프론트엔드 모두 매칭되지만 우선순위가 높은 f2가 이긴다
    let response = handler.handle(request("test.localhost", "/test"), None).await;
    assert_eq!(body_string(response).await, "B1");

    // 경로가 다르면 f1만 매칭된다
    let response = handler.handle(request("test.localhost", "/other"), None).await;
    assert_eq!(body_string(response).await, "B2");
}

#[tokio::test]
async fn test_wrr_fairness_over_weight_sum() {
    let a = spawn_upstream(StatusCode::OK, "A").await;
    let b = spawn_upstream(StatusCode::OK, "B").await;

    let config = configuration(
        vec![("b1", backend(&[("a", a, 10), ("b", b, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let mut sequence = String::new();
    for _ in 0..11 {
        let response = handler.handle(request("a.test", "/"), None).await;
        sequence.push_str(&body_string(response).await);
    }

    // 평활 가중 라운드로빈의 정확한 순서
    assert_eq!(sequence, "AAAAABAAAAA");
}

#[tokio::test]
async fn test_no_healthy_server_returns_503_with_retry_after() {
    let s1 = spawn_upstream(StatusCode::OK, "S1").await;

    let config = configuration(
        vec![("b1", backend(&[("s1", s1, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    // 유일한 서버를 다운시킨다
    build.handlers["http"].frontends()[0]
        .handler
        .balancer()
        .servers()[0]
        .set_healthy(false);

    let response = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get("Retry-After").unwrap(), "1");
}

#[tokio::test]
async fn test_retry_moves_to_second_server() {
    // s1은 연결 거부, s2는 정상. 이름 정렬상 s1이 먼저 선택된다.
    let dead = refused_addr().await;
    let alive = spawn_upstream(StatusCode::OK, "ALIVE").await;

    let config = configuration(
        vec![("b1", backend(&[("s1", dead, 1), ("s2", alive, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::new(1),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ALIVE");
}

#[tokio::test]
async fn test_retry_disabled_returns_bad_gateway() {
    let dead = refused_addr().await;

    let config = configuration(
        vec![("b1", backend(&[("s1", dead, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_circuit_breaker_opens_after_failures() {
    let dead = refused_addr().await;

    let mut b1 = backend(&[("s1", dead, 1)]);
    b1.circuit_breaker = Some(rproxy::config::CircuitBreakerConfig {
        expression: "NetworkErrorRatio() > 0.5".to_string(),
    });

    let config = configuration(
        vec![("b1", b1)],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    // 연결 실패가 쌓이면 브레이커가 열린다
    let first = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(first.status(), StatusCode::BAD_GATEWAY);

    let second = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        handler.frontends()[0].handler.breaker_state(),
        Some(BreakerState::Open)
    );

    // 개방 상태에서는 업스트림을 호출하지 않고 바로 503
    let third = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(third.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_path_strip_and_host_rewrite() {
    let echo = spawn_echo_upstream().await;

    let mut f1 = frontend("b1", "PathPrefixStrip:/console", 0);
    f1.pass_host_header = false;

    let config = configuration(
        vec![("b1", backend(&[("s1", echo, 1)]))],
        vec![("f1", f1)],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/console/jobs"), None).await;
    let body = body_string(response).await;

    // Host는 업스트림 authority로 재작성되고 접두사는 제거된다
    assert_eq!(body, format!("{} /jobs", echo));
}

#[tokio::test]
async fn test_pass_host_header_preserved() {
    let echo = spawn_echo_upstream().await;

    let config = configuration(
        vec![("b1", backend(&[("s1", echo, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/x"), None).await;
    assert_eq!(body_string(response).await, "a.test /x");
}

#[tokio::test]
async fn test_handler_swap_affects_next_request_only() {
    let s1 = spawn_upstream(StatusCode::OK, "OLD").await;
    let s2 = spawn_upstream(StatusCode::OK, "NEW").await;

    let client = ProxyClient::new(4);

    let old_config = configuration(
        vec![("b1", backend(&[("s1", s1, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );
    let old_build = router::build(
        &old_config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );

    let swap = Arc::new(ArcSwap::new(old_build.handlers["http"].clone()));

    // 진행 중 요청이 잡아 둔 트리
    let captured = swap.load_full();

    // 새 설정 발행
    let new_config = configuration(
        vec![("b2", backend(&[("s2", s2, 1)]))],
        vec![("f1", frontend("b2", "Host:a.test", 0))],
    );
    let new_build = router::build(
        &new_config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    swap.store(new_build.handlers["http"].clone());

    // 잡아 둔 트리는 계속 이전 백엔드로 간다
    let response = captured.handle(request("a.test", "/"), None).await;
    assert_eq!(body_string(response).await, "OLD");

    // 다음 요청은 새 트리를 잡는다
    let response = swap.load_full().handle(request("a.test", "/"), None).await;
    assert_eq!(body_string(response).await, "NEW");
}

#[tokio::test]
async fn test_basic_auth_blocks_anonymous_requests() {
    let s1 = spawn_upstream(StatusCode::OK, "S1").await;

    let mut f1 = frontend("b1", "Host:a.test", 0);
    f1.basic_auth = vec!["admin:secret".to_string()];

    let config = configuration(
        vec![("b1", backend(&[("s1", s1, 1)]))],
        vec![("f1", f1)],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut authorized = request("a.test", "/");
    authorized.headers_mut().insert(
        hyper::header::AUTHORIZATION,
        "Basic YWRtaW46c2VjcmV0".parse().unwrap(),
    );
    let response = handler.handle(authorized, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upstream_5xx_passthrough_without_retry() {
    let failing = spawn_upstream(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;

    let config = configuration(
        vec![("b1", backend(&[("s1", failing, 1)]))],
        vec![("f1", frontend("b1", "Host:a.test", 0))],
    );

    let client = ProxyClient::new(4);
    let build = router::build(
        &config,
        &entry_points(),
        &entry_points(),
        RetryPolicy::disabled(),
        &client,
    );
    let handler = &build.handlers["http"];

    let response = handler.handle(request("a.test", "/"), None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
