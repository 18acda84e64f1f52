use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Duration;
use tracing::{debug, error, warn};

use crate::balancer::{Balancer, ServerHandle};
use crate::breaker::CircuitBreaker;
use crate::config::{Configuration, ServerUrl};
use crate::health::BackendProbe;
use crate::middleware::{
    BasicAuthMiddleware, IpWhitelistMiddleware, MiddlewareChain, RateLimitMiddleware,
};
use crate::proxy::ProxyClient;
use crate::retry::RetryPolicy;
use crate::rules::{self, FrontendMatcher};

use super::{BackendHandler, CompiledFrontend, EntryPointHandler};

/// 한 번의 재빌드 산출물입니다. 엔트리포인트별 핸들러와 헬스체크
/// 프로브 명세를 담습니다.
pub struct RouterBuild {
    pub handlers: HashMap<String, Arc<EntryPointHandler>>,
    pub probes: Vec<BackendProbe>,
}

/// 검증된 설정에서 요청 경로 밖의 새 핸들러 트리를 만듭니다.
pub fn build(
    config: &Configuration,
    entry_point_names: &[String],
    default_entry_points: &[String],
    retry: RetryPolicy,
    client: &ProxyClient,
) -> RouterBuild {
    let mut probes = Vec::new();

    // 백엔드별 공유 서버 핸들. 헬스 플래그는 같은 백엔드를 바라보는
    // 모든 프론트엔드가 공유한다.
    let mut backend_servers: HashMap<String, Vec<Arc<ServerHandle>>> = HashMap::new();
    let mut backend_names: Vec<&String> = config.backends.keys().collect();
    backend_names.sort();

    for backend_name in &backend_names {
        let backend = &config.backends[*backend_name];

        let mut server_names: Vec<&String> = backend.servers.keys().collect();
        server_names.sort();

        let mut servers = Vec::new();
        for server_name in server_names {
            let server = &backend.servers[server_name];
            match ServerUrl::parse(&server.url) {
                Ok(url) => {
                    servers.push(ServerHandle::new(
                        server_name.clone(),
                        url,
                        server.weight,
                    ));
                }
                Err(e) => {
                    // 스냅샷 검증을 통과한 설정이므로 도달하지 않아야 한다
                    error!(
                        backend = %backend_name,
                        server = %server_name,
                        error = %e,
                        "서버 URL 파싱 실패, 서버 제외"
                    );
                }
            }
        }

        if let Some(health_check) = &backend.health_check {
            probes.push(BackendProbe {
                backend: (*backend_name).clone(),
                path: health_check.path.clone(),
                interval: Duration::from_secs(health_check.interval_secs.max(1)),
                servers: servers.clone(),
            });
        }

        backend_servers.insert((*backend_name).clone(), servers);
    }

    // 프론트엔드 컴파일 및 엔트리포인트 등록
    let mut per_entry_point: HashMap<String, Vec<Arc<CompiledFrontend>>> = entry_point_names
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();

    let mut frontend_names: Vec<&String> = config.frontends.keys().collect();
    frontend_names.sort();

    for frontend_name in frontend_names {
        let frontend = &config.frontends[frontend_name];

        let Some(servers) = backend_servers.get(&frontend.backend) else {
            // sanitize 단계에서 걸러졌어야 한다
            error!(
                frontend = %frontend_name,
                backend = %frontend.backend,
                "백엔드 미해결, 프론트엔드 제외"
            );
            continue;
        };

        let Some(compiled) = compile_frontend(
            frontend_name,
            frontend,
            &config.backends[&frontend.backend],
            servers.clone(),
            retry,
            client,
        ) else {
            continue;
        };
        let compiled = Arc::new(compiled);

        let targets: &[String] = if frontend.entry_points.is_empty() {
            default_entry_points
        } else {
            &frontend.entry_points
        };

        for entry_point in targets {
            match per_entry_point.get_mut(entry_point) {
                Some(list) => list.push(compiled.clone()),
                None => {
                    // 해당 엔트리포인트에 대해서만 건너뛴다
                    warn!(
                        frontend = %frontend_name,
                        entry_point = %entry_point,
                        "정의되지 않은 엔트리포인트 참조, 등록 생략"
                    );
                }
            }
        }
    }

    let handlers = per_entry_point
        .into_iter()
        .map(|(name, frontends)| {
            debug!(entry_point = %name, frontends = frontends.len(), "디스패치 테이블 구성");
            let handler = Arc::new(EntryPointHandler::new(name.clone(), frontends));
            (name, handler)
        })
        .collect();

    RouterBuild { handlers, probes }
}

fn compile_frontend(
    frontend_name: &str,
    frontend: &crate::config::Frontend,
    backend: &crate::config::Backend,
    servers: Vec<Arc<ServerHandle>>,
    retry: RetryPolicy,
    client: &ProxyClient,
) -> Option<CompiledFrontend> {
    let mut route_names: Vec<&String> = frontend.routes.keys().collect();
    route_names.sort();

    let mut routes = Vec::new();
    for route_name in route_names {
        match rules::parse_rule(&frontend.routes[route_name].rule) {
            Ok(matcher) => routes.push(matcher),
            Err(e) => {
                // sanitize 단계에서 걸러졌어야 한다
                error!(
                    frontend = %frontend_name,
                    route = %route_name,
                    error = %e,
                    "규칙 컴파일 실패, 프론트엔드 제외"
                );
                return None;
            }
        }
    }

    let matcher = FrontendMatcher::new(routes);
    let rule_len = matcher.rule_len();

    let mut chain = MiddlewareChain::new();
    if !frontend.whitelist_source_range.is_empty() {
        match IpWhitelistMiddleware::new(&frontend.whitelist_source_range) {
            Ok(middleware) => chain.add(middleware),
            Err(e) => {
                error!(frontend = %frontend_name, error = %e, "IP 화이트리스트 구성 실패, 프론트엔드 제외");
                return None;
            }
        }
    }
    if !frontend.basic_auth.is_empty() {
        match BasicAuthMiddleware::new(&frontend.basic_auth, "Restricted Area") {
            Ok(middleware) => chain.add(middleware),
            Err(e) => {
                error!(frontend = %frontend_name, error = %e, "Basic 인증 구성 실패, 프론트엔드 제외");
                return None;
            }
        }
    }
    if let Some(rate_limit) = &frontend.rate_limit {
        chain.add(RateLimitMiddleware::new(rate_limit));
    }

    let breaker = backend.circuit_breaker.as_ref().and_then(|cb| {
        match CircuitBreaker::new(&frontend.backend, &cb.expression) {
            Ok(breaker) => Some(breaker),
            Err(e) => {
                error!(
                    backend = %frontend.backend,
                    error = %e,
                    "서킷 브레이커 표현식 무시"
                );
                None
            }
        }
    });

    let handler = BackendHandler::new(
        frontend.backend.clone(),
        Balancer::new(backend.lb_method(), servers),
        breaker,
        retry,
        backend.max_conn.as_ref().map(|mc| mc.amount),
        client.clone(),
    );

    Some(CompiledFrontend {
        name: frontend_name.to_string(),
        matcher,
        priority: frontend.priority,
        rule_len,
        chain,
        pass_host_header: frontend.pass_host_header,
        handler: Arc::new(handler),
    })
}
