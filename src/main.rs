use std::process;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

use rproxy::logging::init_logging;
use rproxy::server::ServerManager;
use rproxy::settings::Settings;

#[tokio::main]
async fn main() {
    // 정적 설정 로드. 실패는 치명적이다.
    let settings = match Settings::load().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("정적 설정 로드 실패: {}", e);
            process::exit(1);
        }
    };

    init_logging(&settings.logging);
    info!(
        entry_points = settings.entry_points.len(),
        throttle_secs = settings.providers_throttle_secs,
        grace_secs = settings.grace_timeout_secs,
        "rproxy 기동"
    );

    // SIGTERM/SIGINT → 종료 신호 브로드캐스트
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "SIGTERM 핸들러 등록 실패");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM 수신"),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "SIGINT 핸들러 오류");
                }
                info!("SIGINT 수신");
            }
        }

        let _ = shutdown_tx.send(true);
    });

    let manager = ServerManager::with_defaults(settings);
    if let Err(e) = manager.run(shutdown_rx).await {
        error!(error = %e, "서버 실행 실패");
        process::exit(1);
    }

    info!("정상 종료");
}
