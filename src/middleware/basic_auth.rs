//! Basic 인증 미들웨어입니다.
//!
//! 프론트엔드의 `basicAuth` 목록("user:해시" 항목)으로 구성됩니다.
//! bcrypt 해시(`$2a$`/`$2b$`/`$2y$`)와 평문 항목을 지원합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, StatusCode};
use tracing::debug;

use super::{Middleware, MiddlewareError, Request, Response};

pub struct BasicAuthMiddleware {
    users: HashMap<String, String>,
    realm: String,
}

impl BasicAuthMiddleware {
    pub fn new(entries: &[String], realm: &str) -> Result<Self, MiddlewareError> {
        let mut users = HashMap::new();
        for entry in entries {
            let (user, secret) = entry.split_once(':').ok_or_else(|| MiddlewareError::Config {
                middleware: "basic-auth".to_string(),
                message: format!("user:secret 형식이 아님: {}", entry),
            })?;
            users.insert(user.to_string(), secret.to_string());
        }

        if users.is_empty() {
            return Err(MiddlewareError::Config {
                middleware: "basic-auth".to_string(),
                message: "사용자 목록이 비어 있음".to_string(),
            });
        }

        Ok(Self {
            users,
            realm: realm.to_string(),
        })
    }

    /// Authorization 헤더에서 자격증명을 추출합니다.
    fn extract_credentials(req: &Request) -> Option<(String, String)> {
        let auth_str = req
            .headers()
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?;

        let encoded = auth_str.strip_prefix("Basic ")?.trim();
        let decoded = BASE64.decode(encoded).ok()?;
        let credentials = std::str::from_utf8(&decoded).ok()?;

        let (user, password) = credentials.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        let Some(secret) = self.users.get(username) else {
            return false;
        };

        if secret.starts_with("$2a$") || secret.starts_with("$2b$") || secret.starts_with("$2y$") {
            bcrypt::verify(password, secret).unwrap_or(false)
        } else {
            secret == password
        }
    }

    /// 401 Unauthorized 응답을 생성합니다.
    fn unauthorized_response(&self) -> Response {
        hyper::Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{}\"", self.realm),
            )
            .body(Full::new(Bytes::from_static(b"Unauthorized")))
            .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
    }
}

#[async_trait]
impl Middleware for BasicAuthMiddleware {
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError> {
        match Self::extract_credentials(&req) {
            Some((username, password)) if self.verify(&username, &password) => {
                debug!(user = %username, "Basic 인증 성공");
                Ok(req)
            }
            _ => Err(MiddlewareError::Blocked(self.unauthorized_response())),
        }
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "basic-auth"
    }
}
