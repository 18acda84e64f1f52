use std::sync::{Arc, Mutex};

use super::{smooth_pick, BalancerError, ServerHandle};

/// 평활 가중 라운드로빈입니다.
///
/// 매 선택마다 각 서버의 현재 가중치에 설정 가중치를 더하고, 최대값을
/// 고른 뒤 선택된 서버에서 전체 가중치 합을 뺍니다. 정수 가중치에서
/// 결정적이고 평활한 순서를 만듭니다.
pub struct WrrBalancer {
    servers: Vec<Arc<ServerHandle>>,
    weights: Vec<i64>,
    current: Mutex<Vec<i64>>,
}

impl WrrBalancer {
    pub fn new(servers: Vec<Arc<ServerHandle>>) -> Self {
        let weights: Vec<i64> = servers.iter().map(|s| s.weight as i64).collect();
        let current = Mutex::new(vec![0; servers.len()]);
        Self {
            servers,
            weights,
            current,
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

        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        smooth_pick(&mut current, &self.weights, &eligible)
            .map(|i| self.servers[i].clone())
            .ok_or(BalancerError::NoHealthyServer)
    }
}
