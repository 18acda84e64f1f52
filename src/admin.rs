//! 관리 API 엔트리포인트입니다.
//!
//! `GET /api/providers`는 현재 활성 병합 설정을 JSON으로 반환하고
//! (테스트가 리로드 여부를 확인하는 데 사용), `GET /health`는 라이브니스
//! 응답입니다. 관리 리스너는 서비스 엔트리포인트와 분리되어 있습니다.

use std::convert::Infallible;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::Configuration;

/// 관리 API가 노출하는 활성 설정 스냅샷입니다. 어그리게이터 적용
/// 시점마다 교체됩니다.
pub struct AdminState {
    active: ArcSwap<Configuration>,
}

impl AdminState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: ArcSwap::from_pointee(Configuration::default()),
        })
    }

    pub fn set_active(&self, configuration: Configuration) {
        self.active.store(Arc::new(configuration));
    }

    pub fn active(&self) -> Arc<Configuration> {
        self.active.load_full()
    }
}

pub async fn run(
    listener: TcpListener,
    state: Arc<AdminState>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(address = ?listener.local_addr().ok(), "관리 API 리스닝");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { Ok::<_, Infallible>(handle(&state, req)) }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!(error = %e, "관리 연결 처리 종료");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "관리 연결 수락 실패"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn handle<B>(state: &AdminState, req: Request<B>) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/providers") => {
            match serde_json::to_vec(state.active().as_ref()) {
                Ok(body) => json_response(StatusCode::OK, Bytes::from(body)),
                Err(e) => {
                    error!(error = %e, "활성 설정 직렬화 실패");
                    json_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Bytes::from_static(b"{\"error\":\"serialization\"}"),
                    )
                }
            }
        }
        (&Method::GET, "/health") => {
            json_response(StatusCode::OK, Bytes::from_static(b"{\"status\":\"UP\"}"))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"404 page not found")))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
    }
}

fn json_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    fn request(path: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(format!("http://127.0.0.1:7070{}", path))
            .body(Empty::new())
            .unwrap()
    }

    #[test]
    fn test_admin_state_swap() {
        let state = AdminState::new();
        assert!(state.active().backends.is_empty());

        let mut config = Configuration::default();
        config
            .backends
            .insert("b1".to_string(), crate::config::Backend::default());
        state.set_active(config);

        assert!(state.active().backends.contains_key("b1"));
    }

    #[test]
    fn test_providers_endpoint_serves_active_config() {
        let state = AdminState::new();
        let mut config = Configuration::default();
        config
            .backends
            .insert("b1".to_string(), crate::config::Backend::default());
        state.set_active(config);

        let response = handle(&state, request("/api/providers"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(hyper::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_health_and_unknown_paths() {
        let state = AdminState::new();
        assert_eq!(handle(&state, request("/health")).status(), StatusCode::OK);
        assert_eq!(
            handle(&state, request("/nope")).status(),
            StatusCode::NOT_FOUND
        );
    }
}
