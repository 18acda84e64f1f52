//! 백엔드 서버 주기 프로브입니다.
//!
//! 설정된 경로로 GET을 보내 2xx가 아니거나 네트워크 오류면 서버를
//! unhealthy로 내립니다. 복구는 성공 프로브 한 번이면 됩니다. 건강
//! 상태는 서버 핸들의 원자 플래그에 기록되어 요청 경로 밖에서
//! 유지됩니다.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::Uri;
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::balancer::ServerHandle;

/// 프로브 응답 대기 한도
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 재빌드마다 라우터 빌더가 만들어 주는 백엔드 프로브 명세입니다.
pub struct BackendProbe {
    pub backend: String,
    pub path: String,
    pub interval: Duration,
    pub servers: Vec<Arc<ServerHandle>>,
}

/// 활성 설정 하나에 대응하는 프로브 태스크 집합입니다.
/// 재설정 시 이전 체커를 멈추고 새 체커를 시작합니다.
pub struct HealthChecker {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl HealthChecker {
    pub fn start(probes: Vec<BackendProbe>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let client = legacy::Client::builder(TokioExecutor::new())
            .build::<_, Empty<Bytes>>(HttpConnector::new());

        let handles = probes
            .into_iter()
            .map(|probe| {
                let client = client.clone();
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(run_probe(probe, client, shutdown))
            })
            .collect();

        Self {
            shutdown_tx,
            handles,
        }
    }

    pub fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn run_probe(
    probe: BackendProbe,
    client: legacy::Client<HttpConnector, Empty<Bytes>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(probe.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for server in &probe.servers {
                    check_server(&client, &probe, server).await;
                }
            }
            _ = shutdown.changed() => {
                debug!(backend = %probe.backend, "헬스체크 태스크 종료");
                break;
            }
        }
    }
}

async fn check_server(
    client: &legacy::Client<HttpConnector, Empty<Bytes>>,
    probe: &BackendProbe,
    server: &Arc<ServerHandle>,
) {
    let uri: Uri = match format!(
        "{}://{}{}",
        server.url.scheme,
        server.url.authority(),
        probe.path
    )
    .parse()
    {
        Ok(uri) => uri,
        Err(e) => {
            warn!(backend = %probe.backend, server = %server.name, error = %e, "프로브 URI 조립 실패");
            return;
        }
    };

    let request = hyper::Request::builder()
        .method(hyper::Method::GET)
        .uri(uri)
        .body(Empty::<Bytes>::new());
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            warn!(backend = %probe.backend, server = %server.name, error = %e, "프로브 요청 조립 실패");
            return;
        }
    };

    let healthy = match timeout(PROBE_TIMEOUT, client.request(request)).await {
        Ok(Ok(response)) => response.status().is_success(),
        Ok(Err(_)) | Err(_) => false,
    };

    let was_healthy = server.is_healthy();
    if healthy != was_healthy {
        if healthy {
            info!(
                backend = %probe.backend,
                server = %server.name,
                "서버 복구, 로테이션에 재투입"
            );
        } else {
            warn!(
                backend = %probe.backend,
                server = %server.name,
                "프로브 실패, 서버를 로테이션에서 제외"
            );
        }
    }
    server.set_healthy(healthy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerUrl;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_marks_unreachable_server_down() {
        // 포트만 얻고 닫아서 연결 거부를 보장한다
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = ServerHandle::new(
            "s1".to_string(),
            ServerUrl::parse(&format!("http://{}", addr)).unwrap(),
            1,
        );
        assert!(server.is_healthy());

        let checker = HealthChecker::start(vec![BackendProbe {
            backend: "b1".to_string(),
            path: "/health".to_string(),
            interval: Duration::from_millis(50),
            servers: vec![server.clone()],
        }]);

        // 첫 프로브가 실패로 기록될 때까지 대기
        for _ in 0..50 {
            if !server.is_healthy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!server.is_healthy());

        checker.stop();
    }
}
