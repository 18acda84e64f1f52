//! rproxy는 동적 설정으로 구동되는 HTTP(S) 리버스 프록시 / 로드밸런서입니다.
//!
//! 프론트엔드(라우팅 규칙)와 백엔드(업스트림 풀)는 프로바이더가
//! 지속적으로 발행하는 스냅샷에서 만들어지며, 재시작 없이 실행 중인
//! 프록시에 적용됩니다.
//!
//! # 데이터 흐름
//!
//! ```text
//! 프로바이더들 → ConfigMessage 채널 → 어그리게이터(디바운스+검증)
//!     → 라우터 빌더 → 엔트리포인트별 핸들러 원자 교체
//! ```
//!
//! 변경이 있을 때만 재빌드되고, 진행 중 요청은 자신이 잡은 핸들러
//! 트리로 끝까지 처리됩니다.
//!
//! # 예제
//!
//! ```no_run
//! use rproxy::settings::Settings;
//! use rproxy::server::ServerManager;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::load().await.expect("설정 로드 실패");
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let manager = ServerManager::with_defaults(settings);
//!     manager.run(shutdown_rx).await.expect("서버 실행 실패");
//! }
//! ```

pub mod admin;
pub mod aggregator;
pub mod balancer;
pub mod breaker;
pub mod config;
pub mod daemon;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod provider;
pub mod proxy;
pub mod retry;
pub mod router;
pub mod rules;
pub mod server;
pub mod settings;
pub mod tls;
