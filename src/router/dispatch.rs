use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use tracing::debug;
use uuid::Uuid;

use crate::logging::{log_request, RequestLog};
use crate::middleware::{handle_middleware_error, ClientAddr, MiddlewareChain};
use crate::rules::FrontendMatcher;

use super::BackendHandler;

/// 매칭 준비가 끝난 프론트엔드 하나입니다.
pub struct CompiledFrontend {
    pub name: String,
    pub matcher: FrontendMatcher,
    pub priority: u32,
    pub rule_len: usize,
    pub chain: MiddlewareChain,
    pub pass_host_header: bool,
    pub handler: Arc<BackendHandler>,
}

impl CompiledFrontend {
    /// 명시적 priority가 있으면 그것을, 없으면 규칙 길이를 사용합니다.
    pub fn effective_priority(&self) -> u64 {
        if self.priority > 0 {
            self.priority as u64
        } else {
            self.rule_len as u64
        }
    }
}

/// 엔트리포인트 하나의 불변 디스패치 테이블입니다.
///
/// 빌더가 요청 경로 밖에서 완성한 뒤 원자 포인터 교체로 발행하며,
/// 진행 중 요청은 자신이 잡은 테이블을 끝까지 사용합니다.
pub struct EntryPointHandler {
    pub entry_point: String,
    frontends: Vec<Arc<CompiledFrontend>>,
}

impl EntryPointHandler {
    pub fn new(entry_point: String, mut frontends: Vec<Arc<CompiledFrontend>>) -> Self {
        // 우선순위 내림차순, 동률은 규칙 길이 내림차순, 그다음 이름 오름차순
        frontends.sort_by(|a, b| {
            b.effective_priority()
                .cmp(&a.effective_priority())
                .then(b.rule_len.cmp(&a.rule_len))
                .then(a.name.cmp(&b.name))
        });
        Self {
            entry_point,
            frontends,
        }
    }

    pub fn empty(entry_point: String) -> Self {
        Self {
            entry_point,
            frontends: Vec::new(),
        }
    }

    pub fn frontends(&self) -> &[Arc<CompiledFrontend>] {
        &self.frontends
    }

    /// 요청 하나를 디스패치합니다. 첫 매칭 프론트엔드가 이기고,
    /// 매칭이 없으면 404입니다.
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut log = RequestLog::new(request_id);
        log.with_request(&req);

        let matched = self
            .frontends
            .iter()
            .find_map(|frontend| {
                frontend
                    .matcher
                    .matches(&req)
                    .map(|outcome| (frontend, outcome))
            });

        let Some((frontend, outcome)) = matched else {
            debug!(entry_point = %self.entry_point, "매칭되는 프론트엔드 없음");
            let response = not_found_response();
            log.with_response(response.status());
            log.duration_ms = started.elapsed().as_millis() as u64;
            log_request(&log);
            return response;
        };

        log.with_route(&frontend.name, &frontend.handler.backend_name);

        // 재시도를 위해 요청 본문을 먼저 수집한다
        let (mut parts, body) = req.into_parts();
        if let Some(addr) = client_addr {
            parts.extensions.insert(ClientAddr(addr));
        }

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                log.with_error(&e);
                let response = bad_request_response();
                log.with_response(response.status());
                log.duration_ms = started.elapsed().as_millis() as u64;
                log_request(&log);
                return response;
            }
        };

        // 요청 미들웨어 체인
        let request = Request::from_parts(parts, body_bytes);
        let request = match frontend.chain.handle_request(request).await {
            Ok(request) => request,
            Err(e) => {
                let response = handle_middleware_error(e);
                log.with_response(response.status());
                log.duration_ms = started.elapsed().as_millis() as u64;
                log_request(&log);
                return response;
            }
        };

        // 백엔드 호출
        let (parts, body_bytes) = request.into_parts();
        let response = frontend
            .handler
            .call(
                &parts,
                body_bytes,
                outcome.strip_prefix.as_deref(),
                frontend.pass_host_header,
                client_addr,
            )
            .await;

        // 응답 미들웨어 체인
        let response = match frontend.chain.handle_response(response).await {
            Ok(response) => response,
            Err(e) => handle_middleware_error(e),
        };

        log.with_response(response.status());
        log.duration_ms = started.elapsed().as_millis() as u64;
        log_request(&log);
        response
    }
}

fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from_static(b"404 page not found")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn bad_request_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::from_static(b"Bad Request")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
