//! 동적 설정 스냅샷을 발행하는 프로바이더 계약입니다.
//!
//! 프로바이더는 원본 소스가 변할 때마다 완전한 스냅샷을 채널로 전송
//! 합니다. 델타는 보내지 않으며, 동일한 스냅샷의 재전송은 허용됩니다
//! (중복 제거는 어그리게이터 몫입니다).

mod constraint;
mod error;
pub mod file;
mod pool;

pub use constraint::{matches_constraints, Constraint};
pub use error::ProviderError;
pub use file::FileProvider;
pub use pool::TaskPool;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Configuration;

/// 프로바이더가 어그리게이터로 보내는 메시지입니다.
#[derive(Debug, Clone)]
pub struct ConfigMessage {
    pub provider_name: String,
    pub configuration: Configuration,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// 어그리게이터의 스냅샷 맵 키로 쓰이는 프로바이더 이름
    fn name(&self) -> &str;

    /// 초기 스냅샷을 전송하고, 필요한 감시 태스크를 풀에 등록합니다.
    /// 소스 변경마다 새로운 완전한 스냅샷을 `tx`로 전송해야 합니다.
    async fn provide(
        &self,
        tx: mpsc::Sender<ConfigMessage>,
        pool: &TaskPool,
        constraints: &[Constraint],
    ) -> Result<(), ProviderError>;
}
