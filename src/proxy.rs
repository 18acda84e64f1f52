//! 업스트림으로 요청을 중계하는 포워딩 클라이언트입니다.
//!
//! 백엔드별 재시도를 위해 요청 본문은 미리 수집된 `Bytes`로 받으며,
//! 응답 본문도 전부 수집한 뒤 반환합니다. 업스트림 커넥션 풀은
//! 호스트당 유휴 커넥션 수가 제한됩니다.

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::config::ServerUrl;

/// 업스트림으로 전달하지 않는 홉 단위 헤더 목록입니다.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

#[derive(Debug)]
pub enum ProxyError {
    /// 업스트림 연결 수립 실패. 재시도 대상입니다.
    Connect {
        server: String,
        error: String,
    },
    /// 연결 이후의 업스트림 요청 실패
    Upstream {
        server: String,
        error: String,
    },
    /// 응답 본문 수집 실패
    ResponseBody {
        server: String,
        error: String,
    },
    /// 중계 요청 빌드 실패
    RequestBuild {
        reason: String,
    },
}

impl ProxyError {
    /// 클라이언트로 아무것도 내려가지 않은 연결 단계 실패 여부
    pub fn is_connection_level(&self) -> bool {
        matches!(self, ProxyError::Connect { .. })
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::Connect { server, error } =>
                write!(f, "서버 {} 연결 실패: {}", server, error),
            ProxyError::Upstream { server, error } =>
                write!(f, "서버 {} 요청 실패: {}", server, error),
            ProxyError::ResponseBody { server, error } =>
                write!(f, "서버 {} 응답 본문 수집 실패: {}", server, error),
            ProxyError::RequestBuild { reason } =>
                write!(f, "중계 요청 빌드 실패: {}", reason),
        }
    }
}

impl std::error::Error for ProxyError {}

/// 에러 종류를 클라이언트 응답으로 사상합니다.
pub fn error_response(error: &ProxyError) -> Response<Full<Bytes>> {
    let status = match error {
        ProxyError::Connect { .. } => StatusCode::BAD_GATEWAY,
        ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        ProxyError::ResponseBody { .. } => StatusCode::BAD_GATEWAY,
        ProxyError::RequestBuild { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(format!("{}", error))))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"Bad Gateway"))))
}

/// 공유 업스트림 클라이언트입니다. 전 백엔드가 하나의 커넥션 풀을
/// 사용합니다.
#[derive(Clone)]
pub struct ProxyClient {
    client: legacy::Client<HttpConnector, Full<Bytes>>,
}

impl ProxyClient {
    pub fn new(max_idle_conns_per_host: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let client = legacy::Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_idle_conns_per_host)
            .build::<_, Full<Bytes>>(connector);

        Self { client }
    }

    /// 요청 하나를 지정된 서버로 중계하고 완전한 응답을 돌려줍니다.
    pub async fn forward(
        &self,
        server: &ServerUrl,
        parts: &Parts,
        body: Bytes,
        strip_prefix: Option<&str>,
        pass_host_header: bool,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Full<Bytes>>, ProxyError> {
        let request = build_proxied_request(
            server,
            parts,
            body,
            strip_prefix,
            pass_host_header,
            client_addr,
        )?;

        debug!(server = %server, uri = %request.uri(), "업스트림 중계");

        let response = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                ProxyError::Connect {
                    server: server.authority(),
                    error: e.to_string(),
                }
            } else {
                ProxyError::Upstream {
                    server: server.authority(),
                    error: e.to_string(),
                }
            }
        })?;

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::ResponseBody {
                server: server.authority(),
                error: e.to_string(),
            })?
            .to_bytes();

        Ok(Response::from_parts(parts, Full::new(bytes)))
    }
}

fn build_proxied_request(
    server: &ServerUrl,
    parts: &Parts,
    body: Bytes,
    strip_prefix: Option<&str>,
    pass_host_header: bool,
    client_addr: Option<SocketAddr>,
) -> Result<Request<Full<Bytes>>, ProxyError> {
    let path = strip_path(parts.uri.path(), strip_prefix);
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let uri: Uri = format!("{}://{}{}", server.scheme, server.authority(), path_and_query)
        .parse()
        .map_err(|e| ProxyError::RequestBuild {
            reason: format!("URI 조립 실패: {}", e),
        })?;

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);

    if let Some(headers) = builder.headers_mut() {
        copy_headers(&parts.headers, headers);

        if pass_host_header {
            if let Some(host) = parts.headers.get(header::HOST) {
                headers.insert(header::HOST, host.clone());
            }
        } else {
            let authority = HeaderValue::from_str(&server.authority()).map_err(|e| {
                ProxyError::RequestBuild {
                    reason: format!("Host 헤더 조립 실패: {}", e),
                }
            })?;
            headers.insert(header::HOST, authority);
        }

        if let Some(addr) = client_addr {
            append_forwarded_for(headers, addr);
        }
    }

    builder
        .body(Full::new(body))
        .map_err(|e| ProxyError::RequestBuild {
            reason: e.to_string(),
        })
}

/// 접두사를 제거한 경로를 반환합니다. 빈 결과는 "/"가 됩니다.
fn strip_path(path: &str, strip_prefix: Option<&str>) -> String {
    let Some(prefix) = strip_prefix else {
        return path.to_string();
    };

    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

fn copy_headers(source: &HeaderMap, target: &mut HeaderMap) {
    for (name, value) in source {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        target.append(name.clone(), value.clone());
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(HeaderName::from_static("x-forwarded-for")) {
        Some(existing) => match existing.to_str() {
            Ok(chain) => format!("{}, {}", chain, ip),
            Err(_) => ip,
        },
        None => ip,
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    fn parts(uri: &str, host: &str) -> Parts {
        let req = Request::builder()
            .uri(uri)
            .header("Host", host)
            .header("X-Custom", "yes")
            .header("Connection", "keep-alive")
            .body(Empty::<Bytes>::new())
            .unwrap();
        req.into_parts().0
    }

    fn server() -> ServerUrl {
        ServerUrl::parse("http://10.0.0.1:8080").unwrap()
    }

    #[test]
    fn test_strip_path() {
        assert_eq!(strip_path("/api/users", Some("/api")), "/users");
        assert_eq!(strip_path("/api", Some("/api")), "/");
        assert_eq!(strip_path("/other", Some("/api")), "/other");
        assert_eq!(strip_path("/api/users", None), "/api/users");
    }

    #[test]
    fn test_build_request_passes_host_header() {
        let parts = parts("http://a.test/api?x=1", "a.test");
        let req =
            build_proxied_request(&server(), &parts, Bytes::new(), None, true, None).unwrap();

        assert_eq!(req.uri().to_string(), "http://10.0.0.1:8080/api?x=1");
        assert_eq!(req.headers().get(header::HOST).unwrap(), "a.test");
        assert_eq!(req.headers().get("X-Custom").unwrap(), "yes");
        // 홉 단위 헤더는 전달되지 않는다
        assert!(req.headers().get(header::CONNECTION).is_none());
    }

    #[test]
    fn test_build_request_rewrites_host_when_disabled() {
        let parts = parts("http://a.test/", "a.test");
        let req =
            build_proxied_request(&server(), &parts, Bytes::new(), None, false, None).unwrap();
        assert_eq!(req.headers().get(header::HOST).unwrap(), "10.0.0.1:8080");
    }

    #[test]
    fn test_build_request_appends_forwarded_for() {
        let parts = parts("http://a.test/", "a.test");
        let addr: SocketAddr = "192.168.1.9:5555".parse().unwrap();
        let req =
            build_proxied_request(&server(), &parts, Bytes::new(), None, true, Some(addr)).unwrap();
        assert_eq!(
            req.headers().get("x-forwarded-for").unwrap(),
            "192.168.1.9"
        );
    }

    #[test]
    fn test_build_request_strips_prefix() {
        let parts = parts("http://a.test/console/jobs", "a.test");
        let req = build_proxied_request(&server(), &parts, Bytes::new(), Some("/console"), true, None)
            .unwrap();
        assert_eq!(req.uri().path(), "/jobs");
    }
}
