//! 클라이언트별 속도 제한 미들웨어입니다.

mod middleware;
mod store;

pub use middleware::RateLimitMiddleware;
pub use store::{Decision, RateLimiterStore};
