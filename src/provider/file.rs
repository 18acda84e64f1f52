//! 동적 설정 TOML 파일을 읽고 변경을 감시하는 파일 프로바이더입니다.
//!
//! 파일이 바뀔 때마다 전체 스냅샷을 다시 읽어 발행합니다. 읽기/파싱
//! 실패는 일시적 오류로 보고 로그만 남긴 채 다음 폴링 주기에 다시
//! 시도하며, 그동안 이전 스냅샷이 유지됩니다.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::provider::{ConfigMessage, Constraint, Provider, ProviderError, TaskPool};
use crate::settings::FileProviderSettings;

pub const PROVIDER_NAME: &str = "file";

pub struct FileProvider {
    path: PathBuf,
    watch: bool,
    poll_interval: Duration,
    /// 프로바이더 지역 제약 조건 (전역 집합에 더해 적용)
    constraints: Vec<String>,
}

impl FileProvider {
    pub fn new(settings: &FileProviderSettings) -> Self {
        Self {
            path: PathBuf::from(&settings.path),
            watch: settings.watch,
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            constraints: settings.constraints.clone(),
        }
    }

    /// 파일에서 스냅샷 하나를 읽습니다.
    pub fn load(path: &Path) -> Result<Configuration, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProviderError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ProviderError::Parse {
            path: path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })
    }

    async fn send_snapshot(
        tx: &mpsc::Sender<ConfigMessage>,
        configuration: Configuration,
    ) -> Result<(), ProviderError> {
        tx.send(ConfigMessage {
            provider_name: PROVIDER_NAME.to_string(),
            configuration,
        })
        .await
        .map_err(|_| ProviderError::ChannelClosed {
            provider: PROVIDER_NAME.to_string(),
        })
    }

    fn modified_time(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn provide(
        &self,
        tx: mpsc::Sender<ConfigMessage>,
        pool: &TaskPool,
        constraints: &[Constraint],
    ) -> Result<(), ProviderError> {
        // 지역 제약 조건은 여기서 검증된다. 파일 형식에는 서비스 태그가
        // 없으므로 유효 집합으로 걸러낼 대상이 없다.
        let local = Constraint::parse_all(&self.constraints)?;
        let effective = constraints.len() + local.len();
        if effective > 0 {
            debug!(constraints = effective, "파일 프로바이더에는 서비스 태그가 없음, 제약 조건 미적용");
        }

        // 초기 스냅샷. 감시가 꺼져 있으면 실패가 곧 프로바이더 실패다.
        match Self::load(&self.path) {
            Ok(configuration) => {
                info!(path = %self.path.display(), "동적 설정 파일 로드");
                Self::send_snapshot(&tx, configuration).await?;
            }
            Err(e) if self.watch => {
                error!(path = %self.path.display(), error = %e, "초기 로드 실패, 감시 계속");
            }
            Err(e) => return Err(e),
        }

        if !self.watch {
            return Ok(());
        }

        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        let mut shutdown = pool.shutdown_signal();

        pool.go(async move {
            let mut last_modified = FileProvider::modified_time(&path);
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let modified = FileProvider::modified_time(&path);
                        if modified == last_modified {
                            continue;
                        }
                        last_modified = modified;

                        match FileProvider::load(&path) {
                            Ok(configuration) => {
                                debug!(path = %path.display(), "설정 파일 변경 감지");
                                if FileProvider::send_snapshot(&tx, configuration).await.is_err() {
                                    warn!("어그리게이터 채널 닫힘, 파일 감시 종료");
                                    break;
                                }
                            }
                            Err(e) => {
                                // 이전 스냅샷 유지, 다음 틱에 재시도
                                error!(path = %path.display(), error = %e, "설정 파일 재로드 실패");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("파일 감시 태스크 종료");
                        break;
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_parses_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [backends.b1.servers.s1]
            url = "http://10.0.0.1:80"

            [frontends.f1]
            backend = "b1"
            [frontends.f1.routes.main]
            rule = "Host:a.test"
            "#
        )
        .unwrap();

        let config = FileProvider::load(file.path()).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.frontends["f1"].backend, "b1");
    }

    #[test]
    fn test_load_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not [valid toml").unwrap();

        match FileProvider::load(file.path()) {
            Err(ProviderError::Parse { .. }) => {}
            other => panic!("파싱 에러를 기대했으나: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_provide_sends_initial_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [backends.b1.servers.s1]
            url = "http://10.0.0.1:80"
            "#
        )
        .unwrap();

        let settings = crate::settings::FileProviderSettings {
            path: file.path().to_string_lossy().to_string(),
            watch: false,
            poll_interval_secs: 1,
            constraints: vec![],
        };

        let provider = FileProvider::new(&settings);
        let pool = TaskPool::new();
        let (tx, mut rx) = mpsc::channel(4);

        provider.provide(tx, &pool, &[]).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.provider_name, "file");
        assert!(msg.configuration.backends.contains_key("b1"));
    }
}
