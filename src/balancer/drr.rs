use std::sync::{Arc, Mutex};

use super::{smooth_pick, BalancerError, ServerHandle};

/// 관측 피드백으로 유효 가중치를 조정하는 동적 라운드로빈입니다.
///
/// 에러를 반환한 서버는 유효 가중치가 절반으로 줄고(1 미만으로는
/// 내려가지 않음), 성공한 요청은 설정 가중치를 향해 1씩 복원합니다.
/// 건강한 서버는 유효 가중치가 최소 1이므로 기아가 발생하지 않습니다.
pub struct DrrBalancer {
    servers: Vec<Arc<ServerHandle>>,
    configured: Vec<i64>,
    state: Mutex<DrrState>,
}

struct DrrState {
    current: Vec<i64>,
    effective: Vec<i64>,
}

impl DrrBalancer {
    pub fn new(servers: Vec<Arc<ServerHandle>>) -> Self {
        let configured: Vec<i64> = servers.iter().map(|s| s.weight as i64).collect();
        let state = Mutex::new(DrrState {
            current: vec![0; servers.len()],
            effective: configured.clone(),
        });
        Self {
            servers,
            configured,
            state,
        }
    }

    pub fn servers(&self) -> &[Arc<ServerHandle>] {
        &self.servers
    }

    pub fn next_excluding(&self, skip: Option<&str>) -> Result<Arc<ServerHandle>, BalancerError> {
        let healthy: Vec<usize> = (0..self.servers.len())
            .filter(|&i| self.servers[i].is_healthy())
            .collect();

        let eligible: Vec<usize> = match skip {
            Some(name) => {
                let filtered: Vec<usize> = healthy
                    .iter()
                    .copied()
                    .filter(|&i| self.servers[i].name != name)
                    .collect();
                if filtered.is_empty() {
                    healthy
                } else {
                    filtered
                }
            }
            None => healthy,
        };

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let DrrState { current, effective } = &mut *state;

        smooth_pick(current, effective, &eligible)
            .map(|i| self.servers[i].clone())
            .ok_or(BalancerError::NoHealthyServer)
    }

    pub fn record_error(&self, server_name: &str) {
        if let Some(index) = self.index_of(server_name) {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.effective[index] = (state.effective[index] / 2).max(1);
        }
    }

    pub fn record_success(&self, server_name: &str) {
        if let Some(index) = self.index_of(server_name) {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.effective[index] = (state.effective[index] + 1).min(self.configured[index]);
        }
    }

    /// 현재 유효 가중치. 테스트와 진단용입니다.
    pub fn effective_weight(&self, server_name: &str) -> Option<i64> {
        let index = self.index_of(server_name)?;
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(state.effective[index])
    }

    fn index_of(&self, server_name: &str) -> Option<usize> {
        self.servers.iter().position(|s| s.name == server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerUrl;

    fn balancer(specs: &[(&str, u32)]) -> DrrBalancer {
        let servers = specs
            .iter()
            .map(|(name, weight)| {
                ServerHandle::new(
                    name.to_string(),
                    ServerUrl::parse(&format!("http://{}.internal:80", name)).unwrap(),
                    *weight,
                )
            })
            .collect();
        DrrBalancer::new(servers)
    }

    #[test]
    fn test_error_halves_effective_weight() {
        let balancer = balancer(&[("A", 8), ("B", 8)]);
        balancer.record_error("A");
        assert_eq!(balancer.effective_weight("A"), Some(4));
        balancer.record_error("A");
        assert_eq!(balancer.effective_weight("A"), Some(2));
    }

    #[test]
    fn test_effective_weight_floor_is_one() {
        let balancer = balancer(&[("A", 2)]);
        for _ in 0..5 {
            balancer.record_error("A");
        }
        assert_eq!(balancer.effective_weight("A"), Some(1));
    }

    #[test]
    fn test_success_restores_toward_configured() {
        let balancer = balancer(&[("A", 4)]);
        balancer.record_error("A");
        balancer.record_error("A");
        assert_eq!(balancer.effective_weight("A"), Some(1));

        for _ in 0..10 {
            balancer.record_success("A");
        }
        // 설정 가중치를 넘어 복원되지 않는다
        assert_eq!(balancer.effective_weight("A"), Some(4));
    }

    #[test]
    fn test_degraded_server_not_starved() {
        let balancer = balancer(&[("A", 10), ("B", 10)]);
        for _ in 0..6 {
            balancer.record_error("B");
        }
        assert_eq!(balancer.effective_weight("B"), Some(1));

        let mut saw_b = false;
        for _ in 0..22 {
            if balancer.next_excluding(None).unwrap().name == "B" {
                saw_b = true;
            }
        }
        assert!(saw_b, "저하된 서버도 선택 기회를 받아야 한다");
    }
}
