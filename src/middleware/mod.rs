//! 프론트엔드별 요청/응답 미들웨어 체인입니다.
//!
//! 요청 체인은 등록 순서대로, 응답 체인은 역순으로 실행됩니다.
//! 미들웨어가 요청을 차단하면 체인이 중단되고 담긴 응답이 그대로
//! 클라이언트로 내려갑니다.

mod basic_auth;
mod chain;
mod error;
mod ip_whitelist;
pub mod rate_limit;
mod traits;

pub use basic_auth::BasicAuthMiddleware;
pub use chain::MiddlewareChain;
pub use error::{handle_middleware_error, MiddlewareError};
pub use ip_whitelist::IpWhitelistMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use traits::Middleware;

use std::net::SocketAddr;

// 재사용 가능한 타입 별칭. 요청 본문은 재시도를 위해 미리 수집된다.
pub type Request = hyper::Request<bytes::Bytes>;
pub type Response = hyper::Response<http_body_util::Full<bytes::Bytes>>;

/// 엔트리포인트가 요청 확장에 심어 주는 클라이언트 원격 주소입니다.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

/// 요청 확장 또는 X-Forwarded-For에서 클라이언트 IP를 찾습니다.
pub fn client_ip(req: &Request) -> Option<std::net::IpAddr> {
    if let Some(ClientAddr(addr)) = req.extensions().get::<ClientAddr>() {
        return Some(addr.ip());
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}
