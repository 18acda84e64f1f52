use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;
use tracing::error;

use super::Response;

#[derive(Debug)]
pub enum MiddlewareError {
    /// 미들웨어 설정 오류
    Config {
        middleware: String,
        message: String,
    },
    /// 요청이 차단됨. 담긴 응답이 그대로 클라이언트로 내려갑니다.
    Blocked(Response),
}

impl fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { middleware, message } =>
                write!(f, "미들웨어 {} 설정 오류: {}", middleware, message),
            Self::Blocked(response) =>
                write!(f, "요청 차단됨 (status: {})", response.status()),
        }
    }
}

impl std::error::Error for MiddlewareError {}

/// 미들웨어 에러를 클라이언트 응답으로 사상합니다.
pub fn handle_middleware_error(error: MiddlewareError) -> Response {
    match error {
        MiddlewareError::Blocked(response) => response,
        MiddlewareError::Config { middleware, message } => {
            error!(middleware = %middleware, message = %message, "미들웨어 설정 오류");
            hyper::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(b"Internal Server Error")))
                .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
        }
    }
}
