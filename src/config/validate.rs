use tracing::{error, warn};

use crate::config::{ConfigError, Configuration, ServerUrl};
use crate::rules;

/// 스냅샷 단위 구조 검증입니다. 여기서 실패하면 해당 프로바이더의
/// 스냅샷 전체가 거부되고 이전 스냅샷이 유지됩니다.
pub fn check_snapshot(config: &Configuration) -> Result<(), ConfigError> {
    for (backend_name, backend) in &config.backends {
        for (server_name, server) in &backend.servers {
            ServerUrl::parse(&server.url).map_err(|e| match e {
                ConfigError::UnsupportedScheme { .. } => e,
                _ => ConfigError::InvalidServerUrl {
                    backend: backend_name.clone(),
                    server: server_name.clone(),
                    url: server.url.clone(),
                    reason: e.to_string(),
                },
            })?;
        }
    }

    for pair in &config.tls {
        if pair.entry_point.is_empty() {
            return Err(ConfigError::MissingCertEntryPoint {
                cert: pair.cert_file.clone(),
            });
        }
    }

    Ok(())
}

/// 병합된 설정을 정리합니다. 개별 항목의 불변식 위반은 해당 항목만
/// 제거하며 나머지 설정은 그대로 적용됩니다.
///
/// - 가중치 0인 서버 제거
/// - 존재하지 않는 백엔드를 참조하는 프론트엔드 제거
/// - 파싱 불가능한 규칙을 가진 프론트엔드 제거
/// - 라우트가 하나도 없는 프론트엔드 제거
pub fn sanitize(mut config: Configuration) -> Configuration {
    for (backend_name, backend) in config.backends.iter_mut() {
        backend.servers.retain(|server_name, server| {
            if server.weight == 0 {
                warn!(
                    backend = %backend_name,
                    server = %server_name,
                    "가중치 0인 서버 제외"
                );
                false
            } else {
                true
            }
        });
    }

    let backends = config.backends.clone();
    config.frontends.retain(|frontend_name, frontend| {
        if !backends.contains_key(&frontend.backend) {
            error!(
                frontend = %frontend_name,
                backend = %frontend.backend,
                "정의되지 않은 백엔드를 참조하는 프론트엔드 제외"
            );
            return false;
        }

        if frontend.routes.is_empty() {
            warn!(frontend = %frontend_name, "라우트가 없는 프론트엔드 제외");
            return false;
        }

        for (route_name, route) in &frontend.routes {
            if let Err(e) = rules::parse_rule(&route.rule) {
                error!(
                    frontend = %frontend_name,
                    route = %route_name,
                    rule = %route.rule,
                    error = %e,
                    "규칙 파싱 실패로 프론트엔드 제외"
                );
                return false;
            }
        }

        true
    });

    config
}
