use tracing::{error, info, span, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::settings::{LogFormat, LogSettings};

pub fn init_logging(settings: &LogSettings) {
    let filter = EnvFilter::from_default_env()
        .add_directive(settings.level.into())
        .add_directive("rproxy=debug".parse().unwrap_or_else(|_| settings.level.into()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match settings.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// 요청 하나의 액세스 로그입니다. 디스패치 시점에 프론트엔드/백엔드
/// 이름이 태깅됩니다.
#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub host: String,
    pub frontend: Option<String>,
    pub backend: Option<String>,
    pub status_code: u16,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RequestLog {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            method: String::new(),
            path: String::new(),
            host: String::new(),
            frontend: None,
            backend: None,
            status_code: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn with_request<B>(&mut self, req: &hyper::Request<B>) {
        self.method = req.method().to_string();
        self.path = req.uri().path().to_string();
        if let Some(host) = req.headers().get(hyper::header::HOST) {
            self.host = host.to_str().unwrap_or_default().to_string();
        }
    }

    /// 디스패치가 결정된 시점에 라우팅 정보를 기록합니다.
    pub fn with_route(&mut self, frontend: &str, backend: &str) {
        self.frontend = Some(frontend.to_string());
        self.backend = Some(backend.to_string());
    }

    pub fn with_response(&mut self, status: hyper::StatusCode) {
        self.status_code = status.as_u16();
    }

    pub fn with_error(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
    }
}

pub fn log_request(log: &RequestLog) {
    let level = if log.error.is_some() {
        Level::ERROR
    } else if log.status_code >= 400 {
        Level::WARN
    } else {
        Level::INFO
    };

    let span = span!(
        Level::INFO,
        "request",
        request_id = %log.request_id,
        method = %log.method,
        path = %log.path,
        host = %log.host,
        status = %log.status_code,
        duration_ms = %log.duration_ms
    );
    let _enter = span.enter();

    match level {
        Level::ERROR => error!(
            frontend = ?log.frontend,
            backend = ?log.backend,
            error = ?log.error,
            "Request failed"
        ),
        Level::WARN => warn!(
            frontend = ?log.frontend,
            backend = ?log.backend,
            "Request completed with warning"
        ),
        _ => info!(
            frontend = ?log.frontend,
            backend = ?log.backend,
            "Request completed successfully"
        ),
    }
}
