//! 엔트리포인트 TLS 설정과 SNI 인증서 선택입니다.
//!
//! 인증서 저장소는 DNS 이름을 키로 하며, 정확 일치 → 와일드카드
//! 접미사 일치 → 기본 인증서(첫 번째 구성) 순서로 선택합니다.
//! 동적 설정이 인증서를 바꾸면 저장소만 원자적으로 교체되고
//! 리스너와 억셉터는 그대로 유지됩니다.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio_rustls::rustls::{
    self,
    server::{ClientHello, ResolvesServerCert},
    sign::{any_supported_type, CertifiedKey},
    Certificate, PrivateKey, RootCertStore,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::config::CertificatePair;
use crate::settings::{EntryPointTlsSettings, StaticCertificate};

#[derive(Debug)]
pub enum TlsError {
    /// 인증서/키 읽기 실패
    ReadError {
        path: String,
        error: std::io::Error,
    },
    /// PEM 파싱 실패
    PemError {
        path: String,
        reason: String,
    },
    /// 키가 서명에 사용될 수 없음
    InvalidKey {
        path: String,
    },
    /// rustls 설정 구성 실패
    ConfigError {
        reason: String,
    },
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::ReadError { path, error } =>
                write!(f, "TLS 자료 {} 읽기 실패: {}", path, error),
            TlsError::PemError { path, reason } =>
                write!(f, "TLS 자료 {} 파싱 실패: {}", path, reason),
            TlsError::InvalidKey { path } =>
                write!(f, "개인키 {}를 서명에 사용할 수 없음", path),
            TlsError::ConfigError { reason } =>
                write!(f, "TLS 설정 구성 실패: {}", reason),
        }
    }
}

impl std::error::Error for TlsError {}

/// PEM 본문(인라인) 또는 파일 경로에서 바이트를 읽습니다.
fn read_pem(source: &str) -> Result<Vec<u8>, TlsError> {
    if CertificatePair::is_inline(source) {
        return Ok(source.as_bytes().to_vec());
    }

    let mut bytes = Vec::new();
    File::open(source)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| TlsError::ReadError {
            path: source.to_string(),
            error: e,
        })?;
    Ok(bytes)
}

fn load_certified_key(cert_source: &str, key_source: &str) -> Result<CertifiedKey, TlsError> {
    let cert_bytes = read_pem(cert_source)?;
    let mut cert_reader = BufReader::new(Cursor::new(cert_bytes));
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut cert_reader)
        .map_err(|e| TlsError::PemError {
            path: cert_source.to_string(),
            reason: e.to_string(),
        })?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(TlsError::PemError {
            path: cert_source.to_string(),
            reason: "인증서가 없음".to_string(),
        });
    }

    let key_bytes = read_pem(key_source)?;
    let key = first_private_key(&key_bytes).ok_or_else(|| TlsError::PemError {
        path: key_source.to_string(),
        reason: "개인키를 찾을 수 없음".to_string(),
    })?;

    let signing_key = any_supported_type(&key).map_err(|_| TlsError::InvalidKey {
        path: key_source.to_string(),
    })?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// PKCS#8, RSA, EC 순서로 개인키를 찾습니다.
fn first_private_key(pem: &[u8]) -> Option<PrivateKey> {
    let mut reader = BufReader::new(Cursor::new(pem));
    if let Ok(mut keys) = rustls_pemfile::pkcs8_private_keys(&mut reader) {
        if !keys.is_empty() {
            return Some(PrivateKey(keys.remove(0)));
        }
    }

    let mut reader = BufReader::new(Cursor::new(pem));
    if let Ok(mut keys) = rustls_pemfile::rsa_private_keys(&mut reader) {
        if !keys.is_empty() {
            return Some(PrivateKey(keys.remove(0)));
        }
    }

    let mut reader = BufReader::new(Cursor::new(pem));
    if let Ok(mut keys) = rustls_pemfile::ec_private_keys(&mut reader) {
        if !keys.is_empty() {
            return Some(PrivateKey(keys.remove(0)));
        }
    }

    None
}

/// DNS 이름으로 키 지어진 인증서 저장소입니다.
#[derive(Default)]
pub struct CertStore {
    by_name: HashMap<String, Arc<CertifiedKey>>,
    default_cert: Option<Arc<CertifiedKey>>,
}

impl CertStore {
    /// 정적 인증서와 동적 인증서를 합쳐 저장소를 만듭니다.
    /// 첫 번째로 구성된 인증서가 기본 인증서가 됩니다.
    pub fn build(
        static_certs: &[StaticCertificate],
        dynamic_certs: &[&CertificatePair],
    ) -> Result<Self, TlsError> {
        let mut store = CertStore::default();

        for cert in static_certs {
            let key = Arc::new(load_certified_key(
                &cert.cert_file.to_string_lossy(),
                &cert.key_file.to_string_lossy(),
            )?);
            store.insert(&cert.domains, key);
        }

        for pair in dynamic_certs {
            match load_certified_key(&pair.cert_file, &pair.key_file) {
                Ok(key) => store.insert(&pair.domains, Arc::new(key)),
                Err(e) => {
                    // 동적 인증서 하나가 깨져도 나머지는 적용한다
                    warn!(error = %e, "동적 인증서 로드 실패, 건너뜀");
                }
            }
        }

        Ok(store)
    }

    fn insert(&mut self, domains: &[String], key: Arc<CertifiedKey>) {
        if self.default_cert.is_none() {
            self.default_cert = Some(key.clone());
        }
        for domain in domains {
            self.by_name.insert(domain.to_lowercase(), key.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.default_cert.is_none()
    }

    /// SNI 이름으로 인증서를 고릅니다. 정확 일치 후 가장 긴 접미사의
    /// 와일드카드(`*.example.com`)로 대체하고, 실패하면 기본 인증서를
    /// 반환합니다.
    pub fn resolve(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        if let Some(name) = server_name {
            let name = name.to_lowercase();
            if let Some(key) = self.by_name.get(&name) {
                return Some(key.clone());
            }

            // api.example.com -> *.example.com -> *.com
            let mut labels: Vec<&str> = name.split('.').collect();
            while labels.len() > 1 {
                labels.remove(0);
                let wildcard = format!("*.{}", labels.join("."));
                if let Some(key) = self.by_name.get(&wildcard) {
                    return Some(key.clone());
                }
            }

            debug!(sni = %name, "SNI 일치 인증서 없음, 기본 인증서 사용");
        }

        self.default_cert.clone()
    }
}

/// 억셉터를 유지한 채 인증서 집합만 바꿀 수 있는 SNI 리졸버입니다.
pub struct SniResolver {
    store: ArcSwap<CertStore>,
}

impl SniResolver {
    pub fn new(store: CertStore) -> Arc<Self> {
        Arc::new(Self {
            store: ArcSwap::from_pointee(store),
        })
    }

    /// 재설정 시 저장소를 원자적으로 교체합니다.
    pub fn swap(&self, store: CertStore) {
        self.store.store(Arc::new(store));
    }

    pub fn resolve_name(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        self.store.load().resolve(server_name)
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.resolve_name(client_hello.server_name())
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SniResolver")
    }
}

/// 엔트리포인트 TLS 억셉터를 만듭니다. ALPN으로 HTTP/2와 HTTP/1.1을
/// 협상합니다.
pub fn build_acceptor(
    settings: &EntryPointTlsSettings,
    resolver: Arc<SniResolver>,
) -> Result<TlsAcceptor, TlsError> {
    let versions: &[&rustls::SupportedProtocolVersion] = match settings.min_version.as_deref() {
        Some("tls13") => &[&rustls::version::TLS13],
        _ => &[&rustls::version::TLS12, &rustls::version::TLS13],
    };

    let builder = rustls::ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(versions)
        .map_err(|e| TlsError::ConfigError {
            reason: e.to_string(),
        })?;

    let mut config = if settings.client_ca_files.is_empty() {
        builder.with_no_client_auth().with_cert_resolver(resolver)
    } else {
        let roots = load_client_roots(&settings.client_ca_files)?;
        let verifier = rustls::server::AllowAnyAuthenticatedClient::new(roots).boxed();
        builder
            .with_client_cert_verifier(verifier)
            .with_cert_resolver(resolver)
    };

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_client_roots(paths: &[std::path::PathBuf]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for path in paths {
        let certs = load_cert_file(path)?;
        for cert in certs {
            roots.add(&cert).map_err(|e| TlsError::PemError {
                path: path.to_string_lossy().to_string(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(roots)
}

fn load_cert_file(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::ReadError {
        path: path.to_string_lossy().to_string(),
        error: e,
    })?;
    let mut reader = BufReader::new(file);
    Ok(rustls_pemfile::certs(&mut reader)
        .map_err(|e| TlsError::PemError {
            path: path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })?
        .into_iter()
        .map(Certificate)
        .collect())
}
