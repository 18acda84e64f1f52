//! 프로바이더가 발행하는 동적 설정 스냅샷 모델입니다.
//!
//! 프로바이더는 항상 완전한 스냅샷을 전송하며, 부분 업데이트는 계약에
//! 포함되지 않습니다. 스냅샷 간 비교(`PartialEq`)는 어그리게이터의
//! 재빌드 생략 판단에 사용됩니다.

mod error;
mod validate;

pub use error::ConfigError;
pub use validate::{check_snapshot, sanitize};

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// 하나의 완전한 동적 설정 스냅샷입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub backends: HashMap<String, Backend>,
    #[serde(default)]
    pub frontends: HashMap<String, Frontend>,
    #[serde(default)]
    pub tls: Vec<CertificatePair>,
}

/// 업스트림 서버 풀과 부가 정책을 담는 백엔드입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    #[serde(default)]
    pub servers: HashMap<String, Server>,
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub max_conn: Option<MaxConnConfig>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

impl Backend {
    pub fn lb_method(&self) -> LbMethod {
        self.load_balancer
            .as_ref()
            .map(|lb| lb.method)
            .unwrap_or(LbMethod::Wrr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LbMethod {
    Wrr,
    Drr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub method: LbMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxConnConfig {
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    pub path: String,
    /// 프로브 간격 (초)
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}

/// 단일 업스트림 서버입니다. 가중치 0인 서버는 없는 것으로 취급됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// 요청 매칭 규칙 집합과 백엔드 참조를 담는 프론트엔드입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    pub backend: String,
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub routes: HashMap<String, Route>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_pass_host_header")]
    pub pass_host_header: bool,
    /// "user:bcrypt해시" 또는 "user:평문" 항목 목록
    #[serde(default)]
    pub basic_auth: Vec<String>,
    #[serde(default)]
    pub whitelist_source_range: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_pass_host_header() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub average: u64,
    #[serde(default)]
    pub burst: u64,
}

/// 엔트리포인트에 바인딩되는 인증서 쌍입니다.
/// 파일 경로 또는 인라인 PEM 문자열을 모두 허용합니다.
/// `domains`가 비어 있으면 해당 엔트리포인트의 기본 인증서 후보가
/// 됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePair {
    pub cert_file: String,
    pub key_file: String,
    pub entry_point: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl CertificatePair {
    /// 인라인 PEM인지 파일 경로인지 판별합니다.
    pub fn is_inline(content: &str) -> bool {
        content.trim_start().starts_with("-----BEGIN")
    }
}

/// 파싱된 서버 URL입니다. 스킴은 http/https만 허용됩니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ServerUrl {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| ConfigError::InvalidServerUrl {
            backend: String::new(),
            server: String::new(),
            url: url.to_string(),
            reason: "스킴 구분자 누락".to_string(),
        })?;

        let default_port = match scheme {
            "http" => 80,
            "https" => 443,
            other => {
                return Err(ConfigError::UnsupportedScheme {
                    url: url.to_string(),
                    scheme: other.to_string(),
                })
            }
        };

        // 경로 부분은 버린다
        let authority = rest.split('/').next().unwrap_or(rest);
        if authority.is_empty() {
            return Err(ConfigError::InvalidServerUrl {
                backend: String::new(),
                server: String::new(),
                url: url.to_string(),
                reason: "호스트 누락".to_string(),
            });
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !h.is_empty() => {
                let port = p.parse::<u16>().map_err(|_| ConfigError::InvalidServerUrl {
                    backend: String::new(),
                    server: String::new(),
                    url: url.to_string(),
                    reason: format!("포트 {} 파싱 실패", p),
                })?;
                (h.to_string(), port)
            }
            _ => (authority.to_string(), default_port),
        };

        Ok(ServerUrl {
            scheme: scheme.to_string(),
            host,
            port,
        })
    }

    /// "host:port" 형식의 업스트림 authority를 반환합니다.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ServerUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_parse() {
        let url = ServerUrl::parse("http://172.17.0.2:8080").unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.host, "172.17.0.2");
        assert_eq!(url.port, 8080);
        assert_eq!(url.authority(), "172.17.0.2:8080");
    }

    #[test]
    fn test_server_url_default_ports() {
        assert_eq!(ServerUrl::parse("http://web").unwrap().port, 80);
        assert_eq!(ServerUrl::parse("https://web").unwrap().port, 443);
    }

    #[test]
    fn test_server_url_rejects_bad_input() {
        assert!(ServerUrl::parse("web:80").is_err());
        assert!(ServerUrl::parse("ftp://web").is_err());
        assert!(ServerUrl::parse("http://web:notaport").is_err());
    }

    #[test]
    fn test_configuration_toml_round_trip() {
        let toml_content = r#"
            [backends.api]
            [backends.api.loadBalancer]
            method = "drr"
            [backends.api.circuitBreaker]
            expression = "NetworkErrorRatio() > 0.5"
            [backends.api.healthCheck]
            path = "/ping"
            intervalSecs = 10
            [backends.api.servers.s1]
            url = "http://10.0.0.1:80"
            weight = 10

            [frontends.api]
            backend = "api"
            entryPoints = ["http"]
            priority = 5
            passHostHeader = false
            [frontends.api.routes.main]
            rule = "Host:api.test"
        "#;

        let config: Configuration = toml::from_str(toml_content).unwrap();
        let backend = &config.backends["api"];
        assert_eq!(backend.lb_method(), LbMethod::Drr);
        assert_eq!(backend.servers["s1"].weight, 10);
        assert_eq!(backend.health_check.as_ref().unwrap().interval_secs, 10);

        let frontend = &config.frontends["api"];
        assert_eq!(frontend.backend, "api");
        assert!(!frontend.pass_host_header);
        assert_eq!(frontend.routes["main"].rule, "Host:api.test");

        // 동일 스냅샷 재파싱은 구조적으로 같아야 한다
        let again: Configuration = toml::from_str(toml_content).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_default_weight_is_one() {
        let config: Configuration = toml::from_str(
            r#"
            [backends.b.servers.s1]
            url = "http://10.0.0.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.backends["b"].servers["s1"].weight, 1);
    }
}
