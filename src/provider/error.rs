use std::fmt;

#[derive(Debug)]
pub enum ProviderError {
    /// 소스 읽기 실패
    Io {
        path: String,
        source: std::io::Error,
    },
    /// 스냅샷 파싱 실패
    Parse {
        path: String,
        reason: String,
    },
    /// 제약 조건 문자열 파싱 실패
    InvalidConstraint {
        expression: String,
        reason: String,
    },
    /// 채널이 닫혀 스냅샷을 전달할 수 없음
    ChannelClosed {
        provider: String,
    },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } =>
                write!(f, "소스 {} 읽기 실패: {}", path, source),
            Self::Parse { path, reason } =>
                write!(f, "소스 {} 파싱 실패: {}", path, reason),
            Self::InvalidConstraint { expression, reason } =>
                write!(f, "제약 조건 {} 파싱 실패: {}", expression, reason),
            Self::ChannelClosed { provider } =>
                write!(f, "프로바이더 {} 채널 닫힘", provider),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
