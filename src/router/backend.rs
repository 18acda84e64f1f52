use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use hyper::http::request::Parts;
use hyper::{Response, StatusCode};
use tracing::{debug, warn};

use crate::balancer::Balancer;
use crate::breaker::CircuitBreaker;
use crate::proxy::{self, ProxyClient};
use crate::retry::RetryPolicy;

/// 프론트엔드 하나가 바라보는 백엔드 호출 파이프라인입니다.
/// 재시도 → 서킷 브레이커 → 로드밸런서 → 포워딩 순서로 동작합니다.
pub struct BackendHandler {
    pub backend_name: String,
    balancer: Balancer,
    breaker: Option<CircuitBreaker>,
    retry: RetryPolicy,
    max_conn: Option<u64>,
    in_flight: AtomicU64,
    client: ProxyClient,
}

impl BackendHandler {
    pub fn new(
        backend_name: String,
        balancer: Balancer,
        breaker: Option<CircuitBreaker>,
        retry: RetryPolicy,
        max_conn: Option<u64>,
        client: ProxyClient,
    ) -> Self {
        Self {
            backend_name,
            balancer,
            breaker,
            retry,
            max_conn,
            in_flight: AtomicU64::new(0),
            client,
        }
    }

    pub fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    /// 서킷 브레이커 상태. 브레이커가 없으면 None입니다.
    pub fn breaker_state(&self) -> Option<crate::breaker::BreakerState> {
        self.breaker.as_ref().map(|breaker| breaker.state())
    }

    pub async fn call(
        &self,
        parts: &Parts,
        body: Bytes,
        strip_prefix: Option<&str>,
        pass_host_header: bool,
        client_addr: Option<SocketAddr>,
    ) -> Response<Full<Bytes>> {
        let _guard = match self.acquire_slot() {
            Ok(guard) => guard,
            Err(response) => return response,
        };

        let mut retries_done: u32 = 0;
        let mut last_server: Option<String> = None;

        loop {
            if let Some(breaker) = &self.breaker {
                if !breaker.allow() {
                    debug!(backend = %self.backend_name, "서킷 개방 상태, 업스트림 호출 차단");
                    return circuit_open_response();
                }
            }

            let server = match self.balancer.next_excluding(last_server.as_deref()) {
                Ok(server) => server,
                Err(_) => {
                    warn!(backend = %self.backend_name, "건강한 서버 없음");
                    return no_healthy_server_response();
                }
            };

            let started = Instant::now();
            let result = self
                .client
                .forward(
                    &server.url,
                    parts,
                    body.clone(),
                    strip_prefix,
                    pass_host_header,
                    client_addr,
                )
                .await;
            let latency = started.elapsed();

            match result {
                Ok(response) => {
                    let server_error = response.status().is_server_error();

                    if let Some(breaker) = &self.breaker {
                        breaker.record(latency, false);
                    }
                    if server_error {
                        self.balancer.record_error(&server.name);
                    } else {
                        self.balancer.record_success(&server.name);
                    }

                    // 아직 클라이언트로 아무것도 내려가지 않았으므로
                    // 5xx는 다른 서버로 재시도할 수 있다
                    if server_error && self.retry.should_retry(retries_done) {
                        retries_done += 1;
                        debug!(
                            backend = %self.backend_name,
                            server = %server.name,
                            status = %response.status(),
                            retry = retries_done,
                            "5xx 응답, 다른 서버로 재시도"
                        );
                        last_server = Some(server.name.clone());
                        continue;
                    }

                    return response;
                }
                Err(error) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record(latency, true);
                    }
                    self.balancer.record_error(&server.name);

                    if error.is_connection_level() && self.retry.should_retry(retries_done) {
                        retries_done += 1;
                        warn!(
                            backend = %self.backend_name,
                            server = %server.name,
                            error = %error,
                            retry = retries_done,
                            "연결 실패, 다른 서버로 재시도"
                        );
                        last_server = Some(server.name.clone());
                        continue;
                    }

                    warn!(
                        backend = %self.backend_name,
                        server = %server.name,
                        error = %error,
                        "업스트림 호출 실패"
                    );
                    return proxy::error_response(&error);
                }
            }
        }
    }

    fn acquire_slot(&self) -> Result<ConnGuard<'_>, Response<Full<Bytes>>> {
        if let Some(limit) = self.max_conn {
            let current = self.in_flight.fetch_add(1, Ordering::AcqRel);
            if current >= limit {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                warn!(backend = %self.backend_name, limit, "백엔드 동시 연결 한도 초과");
                return Err(too_many_connections_response());
            }
            Ok(ConnGuard {
                counter: Some(&self.in_flight),
            })
        } else {
            Ok(ConnGuard { counter: None })
        }
    }
}

struct ConnGuard<'a> {
    counter: Option<&'a AtomicU64>,
}

impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        if let Some(counter) = self.counter {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

fn no_healthy_server_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header("Retry-After", "1")
        .body(Full::new(Bytes::from_static(b"Service Unavailable")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn circuit_open_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(Full::new(Bytes::from_static(b"Service Unavailable")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn too_many_connections_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .body(Full::new(Bytes::from_static(b"Too Many Requests")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
