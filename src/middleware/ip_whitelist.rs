//! 소스 IP 화이트리스트 미들웨어입니다.
//!
//! 프론트엔드의 `whitelistSourceRange`(CIDR 목록)에 포함되지 않은
//! 클라이언트는 403으로 차단됩니다.

use std::net::IpAddr;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;
use tracing::debug;

use super::{client_ip, Middleware, MiddlewareError, Request, Response};

/// "10.0.0.0/8" 형태의 CIDR 블록입니다. 접두사를 생략하면 단일 주소로
/// 취급합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct CidrRange {
    network: IpAddr,
    prefix: u8,
}

impl CidrRange {
    pub fn parse(range: &str) -> Result<Self, String> {
        let (addr_part, prefix_part) = match range.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (range, None),
        };

        let network: IpAddr = addr_part
            .trim()
            .parse()
            .map_err(|_| format!("IP 주소 파싱 실패: {}", addr_part))?;

        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix = match prefix_part {
            Some(p) => {
                let prefix: u8 = p
                    .trim()
                    .parse()
                    .map_err(|_| format!("접두사 길이 파싱 실패: {}", p))?;
                if prefix > max_prefix {
                    return Err(format!("접두사 길이 초과: /{}", prefix));
                }
                prefix
            }
            None => max_prefix,
        };

        Ok(Self { network, prefix })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(network), IpAddr::V4(addr)) => {
                let network = u32::from(network);
                let addr = u32::from(addr);
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                network & mask == addr & mask
            }
            (IpAddr::V6(network), IpAddr::V6(addr)) => {
                let network = u128::from(network);
                let addr = u128::from(addr);
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                network & mask == addr & mask
            }
            _ => false,
        }
    }
}

pub struct IpWhitelistMiddleware {
    ranges: Vec<CidrRange>,
}

impl IpWhitelistMiddleware {
    pub fn new(ranges: &[String]) -> Result<Self, MiddlewareError> {
        let parsed: Result<Vec<_>, String> = ranges.iter().map(|r| CidrRange::parse(r)).collect();
        let ranges = parsed.map_err(|reason| MiddlewareError::Config {
            middleware: "ip-whitelist".to_string(),
            message: reason,
        })?;

        if ranges.is_empty() {
            return Err(MiddlewareError::Config {
                middleware: "ip-whitelist".to_string(),
                message: "허용 범위 목록이 비어 있음".to_string(),
            });
        }

        Ok(Self { ranges })
    }

    fn forbidden_response() -> Response {
        hyper::Response::builder()
            .status(StatusCode::FORBIDDEN)
            .body(Full::new(Bytes::from_static(b"Forbidden")))
            .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
    }
}

#[async_trait]
impl Middleware for IpWhitelistMiddleware {
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError> {
        let Some(ip) = client_ip(&req) else {
            debug!("클라이언트 IP를 확인할 수 없어 차단");
            return Err(MiddlewareError::Blocked(Self::forbidden_response()));
        };

        if self.ranges.iter().any(|range| range.contains(ip)) {
            Ok(req)
        } else {
            debug!(ip = %ip, "화이트리스트 밖의 소스 IP 차단");
            Err(MiddlewareError::Blocked(Self::forbidden_response()))
        }
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "ip-whitelist"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::ClientAddr;

    #[test]
    fn test_cidr_contains() {
        let range = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(range.contains("10.1.2.3".parse().unwrap()));
        assert!(!range.contains("11.0.0.1".parse().unwrap()));

        let single = CidrRange::parse("192.168.1.1").unwrap();
        assert!(single.contains("192.168.1.1".parse().unwrap()));
        assert!(!single.contains("192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_rejects_garbage() {
        assert!(CidrRange::parse("not-an-ip").is_err());
        assert!(CidrRange::parse("10.0.0.0/40").is_err());
    }

    fn request(addr: Option<&str>) -> Request {
        let mut req = hyper::Request::builder()
            .uri("http://a.test/")
            .body(Bytes::new())
            .unwrap();
        if let Some(addr) = addr {
            req.extensions_mut()
                .insert(ClientAddr(addr.parse().unwrap()));
        }
        req
    }

    #[tokio::test]
    async fn test_whitelisted_ip_passes() {
        let middleware = IpWhitelistMiddleware::new(&["127.0.0.0/8".to_string()]).unwrap();
        assert!(middleware
            .handle_request(request(Some("127.0.0.1:9999")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_outside_ip_blocked() {
        let middleware = IpWhitelistMiddleware::new(&["10.0.0.0/8".to_string()]).unwrap();
        match middleware
            .handle_request(request(Some("203.0.113.7:1234")))
            .await
            .unwrap_err()
        {
            MiddlewareError::Blocked(response) => {
                assert_eq!(response.status(), StatusCode::FORBIDDEN)
            }
            other => panic!("Blocked를 기대했으나: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_source_blocked() {
        let middleware = IpWhitelistMiddleware::new(&["10.0.0.0/8".to_string()]).unwrap();
        assert!(middleware.handle_request(request(None)).await.is_err());
    }
}
