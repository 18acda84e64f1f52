use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::middleware::{client_ip, Middleware, MiddlewareError, Request, Response};
use super::store::{Decision, RateLimiterStore};

/// Rate Limit 미들웨어
pub struct RateLimitMiddleware {
    average: u64,
    store: RateLimiterStore,
}

impl RateLimitMiddleware {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            average: config.average.max(1),
            store: RateLimiterStore::new(config),
        }
    }

    /// 클라이언트 식별자를 추출합니다.
    fn get_client_id(req: &Request) -> String {
        client_ip(req)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Rate Limit 초과 응답을 생성합니다.
    fn limit_exceeded_response(&self, retry_after: Duration) -> Response {
        hyper::Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("X-RateLimit-Limit", self.average.to_string())
            .header("Retry-After", retry_after.as_secs().max(1).to_string())
            .body(Full::new(Bytes::from_static(b"Rate limit exceeded")))
            .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError> {
        let client_id = Self::get_client_id(&req);

        match self.store.admit(&client_id).await {
            Decision::Allowed => Ok(req),
            Decision::Limited { retry_after } => {
                debug!(
                    client = %client_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "속도 제한 초과"
                );
                Err(MiddlewareError::Blocked(
                    self.limit_exceeded_response(retry_after),
                ))
            }
        }
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "rate-limit"
    }
}
