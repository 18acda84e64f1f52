//! 여러 프로바이더의 스냅샷을 하나의 유효 설정으로 병합하는
//! 어그리게이터입니다.
//!
//! 프로바이더별 최신 스냅샷(last-writer-wins)을 유지하고, 수신 때마다
//! 디바운스 타이머를 초기화해 폭주를 흡수한 뒤, 발행 순서대로 병합
//! 합니다. 병합 결과가 현재 활성 설정과 구조적으로 같으면 재빌드를
//! 생략합니다.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{self, Configuration};
use crate::provider::ConfigMessage;

pub struct Aggregator {
    rx: mpsc::Receiver<ConfigMessage>,
    throttle: Duration,
    snapshots: HashMap<String, Configuration>,
    /// 최초 수신 순서. 중복 키 충돌 시 앞선 프로바이더가 이깁니다.
    provider_order: Vec<String>,
    active: Option<Configuration>,
}

impl Aggregator {
    pub fn new(rx: mpsc::Receiver<ConfigMessage>, throttle: Duration) -> Self {
        Self {
            rx,
            throttle,
            snapshots: HashMap::new(),
            provider_order: Vec::new(),
            active: None,
        }
    }

    /// 메시지/디바운스/종료 신호를 다중화하는 메인 루프입니다.
    /// 병합된 설정은 `out` 채널로 전달됩니다.
    pub async fn run(
        mut self,
        out: mpsc::Sender<Configuration>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                maybe_msg = self.rx.recv() => match maybe_msg {
                    Some(msg) => {
                        if self.accept(msg) {
                            deadline = Some(Instant::now() + self.throttle);
                        }
                    }
                    None => {
                        debug!("프로바이더 채널 닫힘, 어그리게이터 종료");
                        // 디바운스 중이던 마지막 스냅샷은 버리지 않는다
                        if deadline.is_some() {
                            if let Some(configuration) = self.rebuild() {
                                let _ = out.send(configuration).await;
                            }
                        }
                        break;
                    }
                },

                _ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    deadline = None;
                    if let Some(configuration) = self.rebuild() {
                        if out.send(configuration).await.is_err() {
                            warn!("설정 적용 채널 닫힘, 어그리게이터 종료");
                            break;
                        }
                    }
                }

                _ = shutdown.changed() => {
                    debug!("종료 신호 수신, 어그리게이터 종료");
                    break;
                }
            }
        }
    }

    /// 프로바이더 스냅샷 하나를 수용합니다. 구조적으로 깨진 스냅샷은
    /// 거부되고 해당 프로바이더의 이전 스냅샷이 유지됩니다.
    fn accept(&mut self, msg: ConfigMessage) -> bool {
        if let Err(e) = config::check_snapshot(&msg.configuration) {
            error!(
                provider = %msg.provider_name,
                error = %e,
                "스냅샷 거부, 이전 스냅샷 유지"
            );
            return false;
        }

        debug!(provider = %msg.provider_name, "스냅샷 수신");
        if !self.snapshots.contains_key(&msg.provider_name) {
            self.provider_order.push(msg.provider_name.clone());
        }
        self.snapshots.insert(msg.provider_name, msg.configuration);
        true
    }

    /// 병합 + 정리 후, 활성 설정과 다를 때만 새 설정을 반환합니다.
    fn rebuild(&mut self) -> Option<Configuration> {
        let merged = self.merge();
        let sanitized = config::sanitize(merged);

        if self.active.as_ref() == Some(&sanitized) {
            debug!("병합 결과가 활성 설정과 동일, 재빌드 생략");
            return None;
        }

        info!(
            backends = sanitized.backends.len(),
            frontends = sanitized.frontends.len(),
            "새 활성 설정 병합 완료"
        );
        self.active = Some(sanitized.clone());
        Some(sanitized)
    }

    /// 프로바이더 발행 순서대로 스냅샷을 연결합니다.
    /// 중복 백엔드/프론트엔드 이름은 앞선 프로바이더가 이깁니다.
    fn merge(&self) -> Configuration {
        let mut merged = Configuration::default();

        for provider in &self.provider_order {
            let Some(snapshot) = self.snapshots.get(provider) else {
                continue;
            };

            for (name, backend) in &snapshot.backends {
                if merged.backends.contains_key(name) {
                    warn!(
                        provider = %provider,
                        backend = %name,
                        "중복 백엔드 이름, 앞선 프로바이더 설정 유지"
                    );
                    continue;
                }
                merged.backends.insert(name.clone(), backend.clone());
            }

            for (name, frontend) in &snapshot.frontends {
                if merged.frontends.contains_key(name) {
                    warn!(
                        provider = %provider,
                        frontend = %name,
                        "중복 프론트엔드 이름, 앞선 프로바이더 설정 유지"
                    );
                    continue;
                }
                merged.frontends.insert(name.clone(), frontend.clone());
            }

            merged.tls.extend(snapshot.tls.iter().cloned());
        }

        merged
    }
}
