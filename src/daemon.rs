//! systemd 알림 프로토콜입니다.
//!
//! `$NOTIFY_SOCKET`이 설정된 환경에서 READY/WATCHDOG 상태를 전송합니다.
//! 소켓이 없으면 전부 무시됩니다.

use std::env;
use std::os::unix::net::UnixDatagram;

use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

fn notify(state: &str) -> bool {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        return false;
    };

    let socket = match UnixDatagram::unbound() {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "알림 소켓 생성 실패");
            return false;
        }
    };

    match socket.send_to(state.as_bytes(), &socket_path) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, socket = %socket_path, "워치독 알림 전송 실패");
            false
        }
    }
}

/// 모든 엔트리포인트가 리스닝을 시작한 뒤 한 번 호출합니다.
pub fn notify_ready() {
    if notify("READY=1") {
        info!("READY=1 전송");
    }
}

/// 설정된 주기로 라이브니스 핑을 보내는 태스크를 띄웁니다.
pub fn spawn_watchdog(interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !notify("WATCHDOG=1") {
                        debug!("워치독 핑 생략 (NOTIFY_SOCKET 없음)");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}
