//! 프록시 기동 시점에 고정되는 정적 설정입니다.
//!
//! 엔트리포인트, 프로바이더 연결, 디바운스/드레인 시간 등 동적 설정이
//! 아닌 모든 것이 여기에 속합니다. 검증 실패는 기동 단계의 치명적
//! 오류로 처리됩니다.

use std::collections::HashMap;
use std::{env, fs, path::Path};
use serde::Deserialize;

mod entry_point;
mod error;
pub mod logging;

pub use entry_point::{parse_address, EntryPointSettings, EntryPointTlsSettings, StaticCertificate};
pub use error::SettingsError;
pub use logging::{LogFormat, LogSettings};

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 이름 -> 엔트리포인트 설정
    #[serde(default)]
    pub entry_points: HashMap<String, EntryPointSettings>,

    /// 엔트리포인트를 명시하지 않은 프론트엔드가 붙는 기본 엔트리포인트
    #[serde(default)]
    pub default_entry_points: Vec<String>,

    #[serde(default)]
    pub providers: ProviderSettings,

    /// 프로바이더 폭주를 흡수하는 디바운스 윈도우 (초)
    #[serde(default = "default_throttle_secs")]
    pub providers_throttle_secs: u64,

    /// 재설정/종료 시 진행 중 요청을 기다리는 시간 (초)
    #[serde(default = "default_grace_secs")]
    pub grace_timeout_secs: u64,

    /// 업스트림 호스트당 유휴 커넥션 상한
    #[serde(default = "default_max_idle")]
    pub max_idle_conns_per_host: usize,

    /// 업스트림 재시도 정책 (attempts = 0이면 비활성)
    #[serde(default)]
    pub retry: Option<RetrySettings>,

    /// 전역 제약 조건 ("tag==value" / "tag!=value")
    #[serde(default)]
    pub constraints: Vec<String>,

    /// 관리 API 엔트리포인트
    #[serde(default)]
    pub admin: Option<AdminSettings>,

    #[serde(default)]
    pub logging: LogSettings,

    /// systemd 워치독 핑 주기 (초). 없으면 READY=1만 전송합니다.
    #[serde(default)]
    pub watchdog_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub file: Option<FileProviderSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileProviderSettings {
    /// 동적 설정 TOML 파일 경로
    pub path: String,

    /// 파일 변경 감시 여부
    #[serde(default = "default_true")]
    pub watch: bool,

    /// 변경 감시 폴링 주기 (초)
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,

    /// 프로바이더 지역 제약 조건. 전역 제약 조건에 더해 적용됩니다.
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminSettings {
    pub address: String,
}

fn default_throttle_secs() -> u64 { 2 }
fn default_grace_secs() -> u64 { 10 }
fn default_max_idle() -> usize { 200 }
fn default_poll_secs() -> u64 { 1 }
fn default_true() -> bool { true }

pub fn parse_env_var<T: std::str::FromStr, F: FnOnce() -> T>(name: &str, default: F) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val,
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default()),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

impl Settings {
    pub async fn load() -> Result<Self> {
        if let Ok(config_path) = env::var("PROXY_CONFIG_FILE") {
            Self::from_toml_file(&config_path).await
        } else {
            Self::from_env().await
        }
    }

    pub async fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| SettingsError::FileError {
            path: path.as_ref().to_string_lossy().to_string(),
            error: e,
        })?;

        let mut settings: Self = toml::from_str(&content)
            .map_err(|e| SettingsError::ParseError { source: e })?;

        settings.apply_defaults();
        settings.validate().await?;
        Ok(settings)
    }

    pub async fn from_env() -> Result<Self> {
        let mut entry_points = HashMap::new();
        entry_points.insert(
            "http".to_string(),
            EntryPointSettings {
                address: parse_env_var("PROXY_HTTP_ADDRESS", || ":80".to_string())?,
                tls: None,
            },
        );

        let mut settings = Self {
            entry_points,
            default_entry_points: vec![],
            providers: ProviderSettings::default(),
            providers_throttle_secs: parse_env_var("PROXY_THROTTLE_SECS", default_throttle_secs)?,
            grace_timeout_secs: parse_env_var("PROXY_GRACE_SECS", default_grace_secs)?,
            max_idle_conns_per_host: default_max_idle(),
            retry: None,
            constraints: vec![],
            admin: None,
            logging: LogSettings::from_env()?,
            watchdog_interval_secs: None,
        };

        settings.apply_defaults();
        settings.validate().await?;
        Ok(settings)
    }

    /// 엔트리포인트가 없으면 ":80" http를, 기본 엔트리포인트 목록이
    /// 비어 있으면 "http" 또는 정의된 전체 목록을 채웁니다.
    fn apply_defaults(&mut self) {
        if self.entry_points.is_empty() {
            self.entry_points.insert(
                "http".to_string(),
                EntryPointSettings {
                    address: ":80".to_string(),
                    tls: None,
                },
            );
        }

        if self.default_entry_points.is_empty() {
            if self.entry_points.contains_key("http") {
                self.default_entry_points = vec!["http".to_string()];
            } else {
                let mut names: Vec<String> = self.entry_points.keys().cloned().collect();
                names.sort();
                self.default_entry_points = names;
            }
        }
    }

    /// 설정 유효성 검증. 실패는 기동 단계에서 치명적입니다.
    pub async fn validate(&self) -> Result<()> {
        for (name, entry_point) in &self.entry_points {
            entry_point.validate(name).await?;
        }

        for name in &self.default_entry_points {
            if !self.entry_points.contains_key(name) {
                return Err(SettingsError::ValidationError {
                    field: "default_entry_points".to_string(),
                    message: format!("정의되지 않은 엔트리포인트: {}", name),
                });
            }
        }

        if let Some(admin) = &self.admin {
            parse_address(&admin.address).map_err(|_| SettingsError::ValidationError {
                field: "admin.address".to_string(),
                message: format!("바인드 주소 파싱 실패: {}", admin.address),
            })?;
        }

        if let Some(file) = &self.providers.file {
            if file.path.is_empty() {
                return Err(SettingsError::ValidationError {
                    field: "providers.file.path".to_string(),
                    message: "파일 프로바이더 경로가 비어 있습니다".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry.as_ref().map(|r| r.attempts).unwrap_or(0)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let mut settings = Self {
            entry_points: HashMap::new(),
            default_entry_points: vec![],
            providers: ProviderSettings::default(),
            providers_throttle_secs: default_throttle_secs(),
            grace_timeout_secs: default_grace_secs(),
            max_idle_conns_per_host: default_max_idle(),
            retry: None,
            constraints: vec![],
            admin: None,
            logging: LogSettings::default(),
            watchdog_interval_secs: None,
        };
        settings.apply_defaults();
        settings
    }
}
