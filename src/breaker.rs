//! 백엔드별 서킷 브레이커입니다.
//!
//! 설정 표현식(`NetworkErrorRatio() > 0.5`,
//! `LatencyAtQuantileMS(50.0) > 100`)을 관측식으로 파싱하고, 최근
//! 10초 롤링 윈도우의 지표로 평가합니다. 상태는
//! closed → open → half-open → closed로만 이동합니다.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// 기본 냉각 시간
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
/// 지표 롤링 윈도우 길이
const WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq)]
pub enum BreakerError {
    InvalidExpression {
        expression: String,
        reason: String,
    },
}

impl fmt::Display for BreakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::InvalidExpression { expression, reason } =>
                write!(f, "서킷 브레이커 표현식 {} 파싱 실패: {}", expression, reason),
        }
    }
}

impl std::error::Error for BreakerError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
        }
    }
}

/// 파싱된 관측식입니다.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// 윈도우 내 네트워크 에러 비율
    NetworkErrorRatio { op: CompareOp, threshold: f64 },
    /// 윈도우 내 지연시간 분위수 (밀리초)
    LatencyAtQuantile {
        quantile: f64,
        op: CompareOp,
        threshold_ms: f64,
    },
}

impl Expression {
    pub fn parse(expression: &str) -> Result<Self, BreakerError> {
        let invalid = |reason: &str| BreakerError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let (left, op, right) = split_comparison(expression).ok_or_else(|| invalid("비교 연산자 누락"))?;
        let threshold: f64 = right
            .trim()
            .parse()
            .map_err(|_| invalid("임계값이 숫자가 아님"))?;

        let left = left.trim();
        if left == "NetworkErrorRatio()" {
            return Ok(Expression::NetworkErrorRatio { op, threshold });
        }

        if let Some(args) = left
            .strip_prefix("LatencyAtQuantileMS(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let quantile: f64 = args
                .trim()
                .parse()
                .map_err(|_| invalid("분위수가 숫자가 아님"))?;
            if !(0.0..=100.0).contains(&quantile) {
                return Err(invalid("분위수는 0과 100 사이여야 함"));
            }
            return Ok(Expression::LatencyAtQuantile {
                quantile,
                op,
                threshold_ms: threshold,
            });
        }

        Err(invalid("알 수 없는 관측 함수"))
    }

    fn evaluate(&self, samples: &VecDeque<Sample>) -> bool {
        if samples.is_empty() {
            return false;
        }

        match self {
            Expression::NetworkErrorRatio { op, threshold } => {
                let errors = samples.iter().filter(|s| s.network_error).count() as f64;
                let ratio = errors / samples.len() as f64;
                op.apply(ratio, *threshold)
            }
            Expression::LatencyAtQuantile {
                quantile,
                op,
                threshold_ms,
            } => {
                let mut latencies: Vec<u64> =
                    samples.iter().map(|s| s.latency_ms).collect();
                latencies.sort_unstable();
                let rank =
                    ((quantile / 100.0) * (latencies.len() - 1) as f64).round() as usize;
                op.apply(latencies[rank] as f64, *threshold_ms)
            }
        }
    }
}

fn split_comparison(expression: &str) -> Option<(&str, CompareOp, &str)> {
    for (token, op) in [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some((left, right)) = expression.split_once(token) {
            return Some((left, op, right));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency_ms: u64,
    network_error: bool,
}

struct BreakerInner {
    state: State,
    samples: VecDeque<Sample>,
}

enum State {
    Closed,
    Open { until: Instant },
    /// 단일 프로브가 진행 중인 상태
    HalfOpen,
}

pub struct CircuitBreaker {
    backend: String,
    expression: Expression,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(backend: &str, expression: &str) -> Result<Self, BreakerError> {
        Ok(Self {
            backend: backend.to_string(),
            expression: Expression::parse(expression)?,
            cooldown: DEFAULT_COOLDOWN,
            inner: Mutex::new(BreakerInner {
                state: State::Closed,
                samples: VecDeque::new(),
            }),
        })
    }

    #[cfg(test)]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// 업스트림 호출 허용 여부입니다. open 상태에서 냉각 시간이 지나면
    /// 호출자 하나가 half-open 프로브가 됩니다.
    pub fn allow(&self) -> bool {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match inner.state {
            State::Closed => true,
            State::Open { until } => {
                if Instant::now() >= until {
                    info!(backend = %self.backend, "서킷 브레이커 half-open, 프로브 허용");
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => false,
        }
    }

    /// 업스트림 시도 결과를 기록하고 상태를 갱신합니다.
    pub fn record(&self, latency: Duration, network_error: bool) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        inner.samples.push_back(Sample {
            at: now,
            latency_ms: latency.as_millis() as u64,
            network_error,
        });
        while inner
            .samples
            .front()
            .map_or(false, |sample| now.duration_since(sample.at) > WINDOW)
        {
            inner.samples.pop_front();
        }

        match inner.state {
            State::HalfOpen => {
                if network_error {
                    warn!(backend = %self.backend, "프로브 실패, 서킷 브레이커 재개방");
                    inner.state = State::Open {
                        until: now + self.cooldown,
                    };
                } else {
                    info!(backend = %self.backend, "프로브 성공, 서킷 브레이커 닫힘");
                    inner.state = State::Closed;
                    inner.samples.clear();
                }
            }
            State::Closed => {
                if self.expression.evaluate(&inner.samples) {
                    warn!(backend = %self.backend, "관측식 충족, 서킷 브레이커 개방");
                    inner.state = State::Open {
                        until: now + self.cooldown,
                    };
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match inner.state {
            State::Closed => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK: Duration = Duration::from_millis(5);

    #[test]
    fn test_expression_parsing() {
        assert_eq!(
            Expression::parse("NetworkErrorRatio() > 0.5").unwrap(),
            Expression::NetworkErrorRatio {
                op: CompareOp::Gt,
                threshold: 0.5
            }
        );
        assert_eq!(
            Expression::parse("LatencyAtQuantileMS(50.0) > 100").unwrap(),
            Expression::LatencyAtQuantile {
                quantile: 50.0,
                op: CompareOp::Gt,
                threshold_ms: 100.0
            }
        );
    }

    #[test]
    fn test_expression_parse_errors() {
        assert!(Expression::parse("NetworkErrorRatio()").is_err());
        assert!(Expression::parse("Unknown() > 1").is_err());
        assert!(Expression::parse("LatencyAtQuantileMS(200) > 1").is_err());
        assert!(Expression::parse("NetworkErrorRatio() > abc").is_err());
    }

    #[test]
    fn test_opens_on_error_ratio() {
        let breaker = CircuitBreaker::new("b1", "NetworkErrorRatio() > 0.5").unwrap();

        breaker.record(OK, false);
        breaker.record(OK, true);
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record(OK, true);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_opens_on_latency_quantile() {
        let breaker = CircuitBreaker::new("b1", "LatencyAtQuantileMS(50.0) > 100").unwrap();
        for _ in 0..4 {
            breaker.record(Duration::from_millis(500), false);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("b1", "NetworkErrorRatio() > 0.5")
            .unwrap()
            .with_cooldown(Duration::from_millis(0));

        breaker.record(OK, true);
        assert_eq!(breaker.state(), BreakerState::Open);

        // 냉각 시간 경과 후 첫 호출만 프로브로 허용된다
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.allow());

        breaker.record(OK, false);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow());
    }

    #[test]
    fn test_half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new("b1", "NetworkErrorRatio() > 0.5")
            .unwrap()
            .with_cooldown(Duration::from_millis(0));

        breaker.record(OK, true);
        assert!(breaker.allow());
        breaker.record(OK, true);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_cooldown_gates_half_open() {
        let breaker = CircuitBreaker::new("b1", "NetworkErrorRatio() > 0.5")
            .unwrap()
            .with_cooldown(Duration::from_secs(60));

        breaker.record(OK, true);
        assert_eq!(breaker.state(), BreakerState::Open);
        // 냉각 시간 전에는 프로브도 허용되지 않는다
        assert!(!breaker.allow());
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
