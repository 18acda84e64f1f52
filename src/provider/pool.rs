use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// 프로바이더가 띄우는 백그라운드 태스크(감시 루프, 폴러)를 감독하는
/// 풀입니다. `stop()`은 협조적 취소를 신호하고 제한 시간 안에 종료를
/// 기다린 뒤, 남은 태스크를 강제로 중단합니다.
pub struct TaskPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 태스크가 종료 신호를 받을 수 있는 수신기를 반환합니다.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 태스크를 풀에 등록하고 실행합니다.
    pub fn go<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// 현재 등록된 태스크 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 모든 태스크에 취소를 신호하고 `grace` 안에 종료를 기다립니다.
    /// 제한 시간을 넘긴 태스크는 중단(abort)됩니다.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let deadline = Instant::now() + grace;

        for mut handle in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(_) => debug!("풀 태스크 정상 종료"),
                Err(_) => {
                    handle.abort();
                    warn!("풀 태스크가 제한 시간 안에 종료되지 않아 중단");
                }
            }
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}
