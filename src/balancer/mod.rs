//! 건강한 서버 집합 위에서 동작하는 백엔드 로드밸런서입니다.
//!
//! wrr은 평활 가중 라운드로빈, drr은 관측 피드백으로 유효 가중치를
//! 조정하는 동적 라운드로빈입니다. 서버 건강 플래그는 헬스체커가
//! 쓰고 밸런서가 읽는 원자 불리언입니다.

mod drr;
mod wrr;

pub use drr::DrrBalancer;
pub use wrr::WrrBalancer;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{LbMethod, ServerUrl};

/// 밸런서와 헬스체커가 공유하는 서버 핸들입니다.
#[derive(Debug)]
pub struct ServerHandle {
    pub name: String,
    pub url: ServerUrl,
    pub weight: u32,
    healthy: AtomicBool,
}

impl ServerHandle {
    pub fn new(name: String, url: ServerUrl, weight: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            url,
            weight,
            healthy: AtomicBool::new(true),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }
}

#[derive(Debug, PartialEq)]
pub enum BalancerError {
    /// 건강한 서버가 하나도 없음
    NoHealthyServer,
}

impl fmt::Display for BalancerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancerError::NoHealthyServer => write!(f, "건강한 백엔드 서버가 없음"),
        }
    }
}

impl std::error::Error for BalancerError {}

pub enum Balancer {
    Wrr(WrrBalancer),
    Drr(DrrBalancer),
}

impl Balancer {
    pub fn new(method: LbMethod, servers: Vec<Arc<ServerHandle>>) -> Self {
        match method {
            LbMethod::Wrr => Balancer::Wrr(WrrBalancer::new(servers)),
            LbMethod::Drr => Balancer::Drr(DrrBalancer::new(servers)),
        }
    }

    pub fn servers(&self) -> &[Arc<ServerHandle>] {
        match self {
            Balancer::Wrr(b) => b.servers(),
            Balancer::Drr(b) => b.servers(),
        }
    }

    /// 건강한 서버 중 다음 서버를 고릅니다.
    pub fn next(&self) -> Result<Arc<ServerHandle>, BalancerError> {
        self.next_excluding(None)
    }

    /// 재시도 시 직전 서버를 피해서 고릅니다. 건강한 서버가 그 서버
    /// 하나뿐이면 같은 서버가 다시 선택됩니다.
    pub fn next_excluding(&self, skip: Option<&str>) -> Result<Arc<ServerHandle>, BalancerError> {
        match self {
            Balancer::Wrr(b) => b.next_excluding(skip),
            Balancer::Drr(b) => b.next_excluding(skip),
        }
    }

    /// 업스트림 시도 결과를 피드백합니다. wrr은 무시하고 drr은 유효
    /// 가중치를 조정합니다.
    pub fn record_success(&self, server_name: &str) {
        if let Balancer::Drr(b) = self {
            b.record_success(server_name);
        }
    }

    pub fn record_error(&self, server_name: &str) {
        if let Balancer::Drr(b) = self {
            b.record_error(server_name);
        }
    }
}

/// 평활 가중 선택 한 스텝입니다. 대상 인덱스 집합에 가중치를 더한 뒤
/// 최대 현재 가중치를 고르고, 선택자에서 대상 가중치 합을 뺍니다.
pub(crate) fn smooth_pick(current: &mut [i64], weights: &[i64], eligible: &[usize]) -> Option<usize> {
    if eligible.is_empty() {
        return None;
    }

    let total: i64 = eligible.iter().map(|&i| weights[i]).sum();
    for &i in eligible {
        current[i] += weights[i];
    }

    let winner = *eligible
        .iter()
        .max_by_key(|&&i| (current[i], std::cmp::Reverse(i)))?;
    current[winner] -= total;
    Some(winner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(specs: &[(&str, u32)]) -> Vec<Arc<ServerHandle>> {
        specs
            .iter()
            .map(|(name, weight)| {
                ServerHandle::new(
                    name.to_string(),
                    ServerUrl::parse(&format!("http://{}.internal:80", name)).unwrap(),
                    *weight,
                )
            })
            .collect()
    }

    #[test]
    fn test_no_healthy_server() {
        let pool = servers(&[("a", 1)]);
        pool[0].set_healthy(false);
        let balancer = Balancer::new(LbMethod::Wrr, pool);
        assert_eq!(balancer.next().unwrap_err(), BalancerError::NoHealthyServer);
    }

    #[test]
    fn test_excluding_falls_back_to_sole_survivor() {
        let pool = servers(&[("a", 1)]);
        let balancer = Balancer::new(LbMethod::Wrr, pool);
        // 제외 대상이 유일한 건강 서버면 그 서버가 다시 나온다
        let picked = balancer.next_excluding(Some("a")).unwrap();
        assert_eq!(picked.name, "a");
    }
}
