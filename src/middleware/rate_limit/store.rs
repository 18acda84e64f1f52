use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitConfig;

/// 클라이언트 하나에 대한 수락 판정입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// 한도 초과. 다음 요청이 수락될 때까지의 대기 시간을 담습니다.
    Limited { retry_after: Duration },
}

/// 프론트엔드 하나의 속도 제한 상태입니다.
///
/// 가상 스케줄링 방식으로 동작합니다. 클라이언트마다 이론적 도착
/// 시각(TAT) 하나만 기억하고, 요청이 평균 주기보다 빨리 도착하면
/// TAT가 현재 시각보다 버스트 허용폭 이상 앞서게 되어 거절됩니다.
/// 토큰 잔량 계산 없이 시각 비교만으로 같은 한도를 강제합니다.
pub struct RateLimiterStore {
    /// 평균 속도에서 요청 하나가 차지하는 주기
    emission_interval: Duration,
    /// 버스트로 미리 앞당겨 쓸 수 있는 폭
    burst_tolerance: Duration,
    /// 클라이언트 식별자 -> 이론적 도착 시각
    clients: RwLock<HashMap<String, Instant>>,
}

impl RateLimiterStore {
    pub fn new(config: &RateLimitConfig) -> Self {
        let average = config.average.max(1);
        // 버스트 미지정 시 평균치만큼 허용
        let burst = if config.burst == 0 {
            average
        } else {
            config.burst
        };

        let emission_interval = Duration::from_secs_f64(1.0 / average as f64);
        let burst_tolerance = emission_interval.saturating_mul(burst.saturating_sub(1) as u32);

        Self {
            emission_interval,
            burst_tolerance,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// 요청 하나를 판정하고 수락 시 상태를 전진시킵니다.
    pub async fn admit(&self, client: &str) -> Decision {
        let now = Instant::now();
        let mut clients = self.clients.write().await;

        let tat = clients
            .get(client)
            .copied()
            .map_or(now, |stored| stored.max(now));

        let lead = tat.duration_since(now);
        if lead > self.burst_tolerance {
            let retry_after = lead - self.burst_tolerance;
            trace!(client = %client, retry_after_ms = retry_after.as_millis() as u64, "속도 제한 거절");
            return Decision::Limited { retry_after };
        }

        clients.insert(client.to_string(), tat + self.emission_interval);
        Decision::Allowed
    }

    /// 한동안 요청이 없던 클라이언트 상태를 비웁니다. TAT가 과거로
    /// 밀려난 항목은 더 이상 제한에 영향을 주지 않습니다.
    pub async fn evict_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut clients = self.clients.write().await;
        clients.retain(|_, tat| now.saturating_duration_since(*tat) < max_idle);
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.clients.read().await.len()
    }
}
