//! 프로바이더 → 어그리게이터 → 라우터 → 엔트리포인트를 잇는 배선입니다.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

use crate::admin::{self, AdminState};
use crate::aggregator::Aggregator;
use crate::config::Configuration;
use crate::daemon;
use crate::health::HealthChecker;
use crate::provider::{Constraint, FileProvider, Provider, TaskPool};
use crate::proxy::ProxyClient;
use crate::retry::RetryPolicy;
use crate::router::{self, EntryPointHandler};
use crate::settings::{parse_address, Settings};
use crate::tls::{CertStore, SniResolver};

use super::entry_point::EntryPoint;
use super::Result;

/// 프로바이더/어그리게이터 채널 용량
const CHANNEL_CAPACITY: usize = 100;

pub struct ServerManager {
    settings: Settings,
    providers: Vec<Box<dyn Provider>>,
}

/// 재설정 시 매니저가 건드리는 엔트리포인트별 교체 지점입니다.
struct EntryPointPorts {
    handler: Arc<ArcSwap<EntryPointHandler>>,
    resolver: Option<Arc<SniResolver>>,
}

impl ServerManager {
    pub fn new(settings: Settings, providers: Vec<Box<dyn Provider>>) -> Self {
        Self {
            settings,
            providers,
        }
    }

    /// 정적 설정에 선언된 프로바이더로 매니저를 구성합니다.
    pub fn with_defaults(settings: Settings) -> Self {
        let mut providers: Vec<Box<dyn Provider>> = Vec::new();
        if let Some(file_settings) = &settings.providers.file {
            providers.push(Box::new(FileProvider::new(file_settings)));
        }
        if providers.is_empty() {
            warn!("구성된 프로바이더가 없음, 동적 설정 없이 기동");
        }
        Self::new(settings, providers)
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            settings,
            providers,
        } = self;

        // 전역 제약 조건. 파싱 실패는 기동 실패다.
        let constraints = Constraint::parse_all(&settings.constraints)?;

        // 엔트리포인트 바인딩 (치명적)
        let mut entry_points = Vec::new();
        let mut ports: HashMap<String, EntryPointPorts> = HashMap::new();
        let mut names: Vec<&String> = settings.entry_points.keys().collect();
        names.sort();
        for name in names {
            let entry_point = EntryPoint::bind(name, &settings.entry_points[name]).await?;
            ports.insert(
                name.clone(),
                EntryPointPorts {
                    handler: entry_point.handler_swap(),
                    resolver: entry_point.sni_resolver(),
                },
            );
            entry_points.push(entry_point);
        }

        // 관리 API
        let admin_state = AdminState::new();
        if let Some(admin_settings) = &settings.admin {
            let address = parse_address(&admin_settings.address)?;
            let listener = TcpListener::bind(address).await.map_err(|e| {
                error!(address = %address, error = %e, "관리 API 바인딩 실패");
                e
            })?;
            tokio::spawn(admin::run(listener, admin_state.clone(), shutdown.clone()));
        }

        // 프로바이더 기동
        let pool = Arc::new(TaskPool::new());
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_CAPACITY);
        for provider in &providers {
            if let Err(e) = provider.provide(msg_tx.clone(), &pool, &constraints).await {
                // 프로바이더 하나의 실패가 나머지를 막지 않는다
                error!(provider = %provider.name(), error = %e, "프로바이더 기동 실패");
            }
        }
        drop(msg_tx);

        // 어그리게이터
        let (cfg_tx, mut cfg_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let throttle = Duration::from_secs(settings.providers_throttle_secs);
        tokio::spawn(Aggregator::new(msg_rx, throttle).run(cfg_tx, shutdown.clone()));

        // 엔트리포인트 수락 루프
        let grace = Duration::from_secs(settings.grace_timeout_secs);
        let mut entry_point_tasks: Vec<JoinHandle<()>> = Vec::new();
        for entry_point in entry_points {
            entry_point_tasks.push(tokio::spawn(entry_point.run(shutdown.clone(), grace)));
        }

        daemon::notify_ready();
        if let Some(interval_secs) = settings.watchdog_interval_secs {
            daemon::spawn_watchdog(interval_secs, shutdown.clone());
        }

        // 적용 루프
        let client = ProxyClient::new(settings.max_idle_conns_per_host);
        let retry = RetryPolicy::new(settings.retry_attempts());
        let mut health_checker: Option<HealthChecker> = None;
        let mut shutdown_rx = shutdown.clone();

        loop {
            tokio::select! {
                maybe_config = cfg_rx.recv() => match maybe_config {
                    Some(configuration) => {
                        apply(
                            &settings,
                            &configuration,
                            &ports,
                            retry,
                            &client,
                            &mut health_checker,
                        );
                        admin_state.set_active(configuration);
                    }
                    None => {
                        // 프로바이더가 없어도 종료 신호까지는 계속 서빙한다
                        warn!("어그리게이터 채널 닫힘, 마지막 설정으로 서빙 유지");
                        let _ = shutdown_rx.changed().await;
                        break;
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        // 종료: 프로바이더 풀 → 헬스체커 → 엔트리포인트 드레인
        info!("종료 시퀀스 시작");
        pool.stop(grace).await;
        if let Some(checker) = health_checker.take() {
            checker.stop();
        }

        for task in entry_point_tasks {
            if timeout(grace + Duration::from_secs(1), task).await.is_err() {
                warn!("엔트리포인트 드레인 대기 시간 초과");
            }
        }

        info!("종료 완료");
        Ok(())
    }
}

/// 병합된 설정 하나를 포워딩 평면에 적용합니다. 새 핸들러 트리를
/// 요청 경로 밖에서 만든 뒤 엔트리포인트별 원자 교체로 발행합니다.
fn apply(
    settings: &Settings,
    configuration: &Configuration,
    ports: &HashMap<String, EntryPointPorts>,
    retry: RetryPolicy,
    client: &ProxyClient,
    health_checker: &mut Option<HealthChecker>,
) {
    let entry_point_names: Vec<String> = ports.keys().cloned().collect();
    let build = router::build(
        configuration,
        &entry_point_names,
        &settings.default_entry_points,
        retry,
        client,
    );

    for (name, handler) in build.handlers {
        if let Some(port) = ports.get(&name) {
            port.handler.store(handler);
        }
    }

    // 엔트리포인트별 동적 인증서 병합
    for (name, port) in ports {
        let Some(resolver) = &port.resolver else {
            continue;
        };

        let static_certs = settings
            .entry_points
            .get(name)
            .and_then(|ep| ep.tls.as_ref())
            .map(|tls| tls.certificates.as_slice())
            .unwrap_or(&[]);

        let dynamic_certs: Vec<_> = configuration
            .tls
            .iter()
            .filter(|pair| &pair.entry_point == name)
            .collect();

        match CertStore::build(static_certs, &dynamic_certs) {
            Ok(store) => resolver.swap(store),
            Err(e) => {
                // 이전 인증서 저장소를 유지한다
                error!(entry_point = %name, error = %e, "인증서 저장소 재구성 실패");
            }
        }
    }

    // 헬스체커 재시작
    if let Some(previous) = health_checker.take() {
        previous.stop();
    }
    if !build.probes.is_empty() {
        *health_checker = Some(HealthChecker::start(build.probes));
    }

    info!(
        backends = configuration.backends.len(),
        frontends = configuration.frontends.len(),
        "새 설정 적용 완료"
    );
}
