use std::fmt;
use std::path::PathBuf;

use crate::provider::ProviderError;
use crate::settings::SettingsError;
use crate::tls::TlsError;

#[derive(Debug)]
pub enum Error {
    /// 설정 관련 오류
    Config {
        /// 오류 메시지
        message: String,
        /// 관련 파일 경로 (선택적)
        file_path: Option<PathBuf>,
        /// 원인 오류 (선택적)
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 파일 시스템/소켓 I/O 오류
    Io {
        /// 오류 메시지
        message: String,
        /// 원인 오류
        source: std::io::Error,
    },

    /// TLS 자료 오류
    Tls {
        /// 오류 메시지
        message: String,
        /// 원인 오류
        source: TlsError,
    },

    /// 프로바이더 오류
    Provider {
        /// 오류 메시지
        message: String,
        /// 원인 오류
        source: ProviderError,
    },

    /// 서버 실행 오류
    Server {
        /// 오류 메시지
        message: String,
        /// 원인 오류 (선택적)
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        Error::Config {
            message: err.to_string(),
            file_path: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<TlsError> for Error {
    fn from(err: TlsError) -> Self {
        Error::Tls {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::Provider {
            message: err.to_string(),
            source: err,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { message, file_path, .. } => {
                if let Some(path) = file_path {
                    write!(f, "설정 오류 (파일: {}): {}", path.display(), message)
                } else {
                    write!(f, "설정 오류: {}", message)
                }
            }
            Error::Io { message, .. } => write!(f, "I/O 오류: {}", message),
            Error::Tls { message, .. } => write!(f, "TLS 오류: {}", message),
            Error::Provider { message, .. } => write!(f, "프로바이더 오류: {}", message),
            Error::Server { message, .. } => write!(f, "서버 오류: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Tls { source, .. } => Some(source),
            Error::Provider { source, .. } => Some(source),
            Error::Config { source, .. } => source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Server { source, .. } => source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
        }
    }
}
