use std::net::SocketAddr;
use std::path::PathBuf;
use serde::Deserialize;
use tokio::fs;
use super::SettingsError;

/// 리스닝 소켓 하나를 기술하는 정적 엔트리포인트 설정입니다.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointSettings {
    /// ":80" 또는 "0.0.0.0:80" 형식의 바인드 주소
    pub address: String,

    /// TLS 설정 (없으면 평문 HTTP)
    #[serde(default)]
    pub tls: Option<EntryPointTlsSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointTlsSettings {
    /// 정적으로 구성된 인증서 쌍 목록. 동적 설정의 인증서가 추가로 병합됩니다.
    #[serde(default)]
    pub certificates: Vec<StaticCertificate>,

    /// 클라이언트 인증서 검증에 사용할 CA 파일 목록
    #[serde(default)]
    pub client_ca_files: Vec<PathBuf>,

    /// 최소 TLS 버전 ("tls12" 또는 "tls13", 기본 tls12)
    #[serde(default)]
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCertificate {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// 이 인증서가 응답할 SNI 도메인 목록. 비어 있으면 기본 인증서
    /// 후보가 됩니다.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// ":80" 축약형을 허용하는 바인드 주소 파서입니다.
pub fn parse_address(address: &str) -> Result<SocketAddr, SettingsError> {
    let normalized = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    normalized.parse().map_err(|_| SettingsError::ValidationError {
        field: "address".to_string(),
        message: format!("바인드 주소 파싱 실패: {}", address),
    })
}

impl EntryPointSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, SettingsError> {
        parse_address(&self.address)
    }

    pub async fn validate(&self, name: &str) -> Result<(), SettingsError> {
        self.socket_addr().map_err(|_| SettingsError::ValidationError {
            field: format!("entry_points.{}.address", name),
            message: format!("바인드 주소 파싱 실패: {}", self.address),
        })?;

        if let Some(tls) = &self.tls {
            if let Some(version) = &tls.min_version {
                match version.as_str() {
                    "tls12" | "tls13" => {}
                    other => {
                        return Err(SettingsError::ValidationError {
                            field: format!("entry_points.{}.tls.min_version", name),
                            message: format!("지원하지 않는 TLS 버전: {}", other),
                        })
                    }
                }
            }

            for cert in &tls.certificates {
                for path in [&cert.cert_file, &cert.key_file] {
                    if !fs::try_exists(path).await.map_err(|e| SettingsError::FileError {
                        path: path.to_string_lossy().to_string(),
                        error: e,
                    })? {
                        return Err(SettingsError::ValidationError {
                            field: format!("entry_points.{}.tls", name),
                            message: format!("인증서 파일이 존재하지 않습니다: {}", path.to_string_lossy()),
                        });
                    }
                }
            }

            for path in &tls.client_ca_files {
                if !fs::try_exists(path).await.map_err(|e| SettingsError::FileError {
                    path: path.to_string_lossy().to_string(),
                    error: e,
                })? {
                    return Err(SettingsError::ValidationError {
                        field: format!("entry_points.{}.tls.client_ca_files", name),
                        message: format!("CA 파일이 존재하지 않습니다: {}", path.to_string_lossy()),
                    });
                }
            }
        }

        Ok(())
    }
}
