//! 통합 테스트 공용 헬퍼입니다.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use rproxy::config::{Backend, Configuration, Frontend, Route, Server};

/// 고정 상태/본문을 돌려주는 업스트림 스텁을 띄웁니다.
pub async fn spawn_upstream(status: StatusCode, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |_req: Request<Incoming>| async move {
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Full::new(Bytes::from_static(body.as_bytes())))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

/// 수신한 Host 헤더와 경로를 본문으로 돌려주는 에코 업스트림입니다.
pub async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let host = req
                        .headers()
                        .get(hyper::header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-")
                        .to_string();
                    let body = format!("{} {}", host, req.uri().path());
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

/// 연결이 거부되는 주소를 만듭니다.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn backend(servers: &[(&str, SocketAddr, u32)]) -> Backend {
    let mut backend = Backend::default();
    for (name, addr, weight) in servers {
        backend.servers.insert(
            name.to_string(),
            Server {
                url: format!("http://{}", addr),
                weight: *weight,
            },
        );
    }
    backend
}

pub fn frontend(backend: &str, rule: &str, priority: u32) -> Frontend {
    let mut routes = HashMap::new();
    routes.insert(
        "main".to_string(),
        Route {
            rule: rule.to_string(),
        },
    );
    Frontend {
        backend: backend.to_string(),
        entry_points: vec!["http".to_string()],
        routes,
        priority,
        pass_host_header: true,
        basic_auth: vec![],
        whitelist_source_range: vec![],
        rate_limit: None,
    }
}

pub fn configuration(
    backends: Vec<(&str, Backend)>,
    frontends: Vec<(&str, Frontend)>,
) -> Configuration {
    Configuration {
        backends: backends
            .into_iter()
            .map(|(name, backend)| (name.to_string(), backend))
            .collect(),
        frontends: frontends
            .into_iter()
            .map(|(name, frontend)| (name.to_string(), frontend))
            .collect(),
        tls: vec![],
    }
}

pub fn request(host: &str, path: &str) -> Request<Empty<Bytes>> {
    Request::builder()
        .method(Method::GET)
        .uri(format!("http://{}{}", host, path))
        .header("Host", host)
        .body(Empty::new())
        .unwrap()
}
