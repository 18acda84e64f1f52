//! 엔트리포인트 하나의 리스너 수명주기입니다.
//!
//! 핸들러 교체는 원자 포인터 교체로만 이루어지고 리스너는 재시작하지
//! 않습니다. 종료 신호를 받으면 수락을 멈추고 드레인 신호를 보낸 뒤
//! grace 시간 안에 진행 중 요청이 끝나기를 기다리고, 남은 연결은
//! 강제로 닫습니다.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::middleware;
use crate::router::EntryPointHandler;
use crate::settings::EntryPointSettings;
use crate::tls::{self, CertStore, SniResolver};

pub struct EntryPoint {
    pub name: String,
    listener: TcpListener,
    tls: Option<TlsState>,
    /// 요청 태스크가 load하는 현재 디스패치 테이블
    handler: Arc<ArcSwap<EntryPointHandler>>,
}

struct TlsState {
    acceptor: TlsAcceptor,
    resolver: Arc<SniResolver>,
    handshake_failures: Arc<AtomicU64>,
}

impl EntryPoint {
    /// 리스너를 바인딩합니다. 실패는 기동 단계의 치명적 오류입니다.
    pub async fn bind(name: &str, settings: &EntryPointSettings) -> super::Result<Self> {
        let address = settings.socket_addr()?;
        let listener = TcpListener::bind(address).await.map_err(|e| {
            error!(entry_point = %name, address = %address, error = %e, "엔트리포인트 바인딩 실패");
            e
        })?;

        let tls = match &settings.tls {
            Some(tls_settings) => {
                let store = CertStore::build(&tls_settings.certificates, &[])?;
                let resolver = SniResolver::new(store);
                let acceptor = tls::build_acceptor(tls_settings, resolver.clone())?;
                Some(TlsState {
                    acceptor,
                    resolver,
                    handshake_failures: Arc::new(AtomicU64::new(0)),
                })
            }
            None => None,
        };

        info!(entry_point = %name, address = %address, tls = tls.is_some(), "엔트리포인트 리스닝");

        Ok(Self {
            name: name.to_string(),
            listener,
            tls,
            handler: Arc::new(ArcSwap::from_pointee(EntryPointHandler::empty(
                name.to_string(),
            ))),
        })
    }

    /// 빌더가 새 디스패치 테이블을 발행할 때 쓰는 교체 지점입니다.
    pub fn handler_swap(&self) -> Arc<ArcSwap<EntryPointHandler>> {
        self.handler.clone()
    }

    /// 동적 인증서 교체 지점. TLS가 없는 엔트리포인트면 None입니다.
    pub fn sni_resolver(&self) -> Option<Arc<SniResolver>> {
        self.tls.as_ref().map(|t| t.resolver.clone())
    }

    /// 수락 루프를 실행합니다. 종료 신호 후 드레인까지 끝나면
    /// 반환합니다.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>, grace: Duration) {
        let active = Arc::new(AtomicUsize::new(0));
        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let task = self.serve_connection(stream, peer_addr, active.clone());
                            let mut conns = connections
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                            conns.retain(|handle| !handle.is_finished());
                            conns.push(task);
                        }
                        Err(e) => {
                            error!(entry_point = %self.name, error = %e, "연결 수락 실패");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        // 수락 중단 후 드레인
        drop(self.listener);
        info!(entry_point = %self.name, in_flight = active.load(Ordering::Acquire), "드레인 시작");

        let deadline = Instant::now() + grace;
        while active.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(100)).await;
        }

        let remaining = active.load(Ordering::Acquire);
        if remaining > 0 {
            warn!(entry_point = %self.name, remaining, "드레인 시간 초과, 남은 연결 강제 종료");
            for handle in connections
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .drain(..)
            {
                handle.abort();
            }
        } else {
            info!(entry_point = %self.name, "드레인 완료");
        }
    }

    fn serve_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        active: Arc<AtomicUsize>,
    ) -> JoinHandle<()> {
        let handler = self.handler.clone();
        let entry_point = self.name.clone();
        let tls = self.tls.as_ref().map(|t| (t.acceptor.clone(), t.handshake_failures.clone()));

        tokio::spawn(async move {
            active.fetch_add(1, Ordering::AcqRel);
            let _guard = ActiveGuard(active);

            let service = service_fn(move |req| {
                // 디스패치 시점에 현재 핸들러 트리를 붙잡는다. 이후 교체가
                // 일어나도 이 요청은 잡은 트리로 끝까지 처리된다.
                let handler = handler.load_full();
                async move {
                    let result = std::panic::AssertUnwindSafe(handler.handle(req, Some(peer_addr)))
                        .catch_unwind()
                        .await;

                    Ok::<_, Infallible>(match result {
                        Ok(response) => response,
                        Err(_) => {
                            error!("요청 핸들러 패닉, 500 반환");
                            internal_error_response()
                        }
                    })
                }
            });

            match tls {
                Some((acceptor, handshake_failures)) => {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            let io = TokioIo::new(tls_stream);
                            // ALPN 결과에 따라 HTTP/1.1과 HTTP/2를 모두 처리한다
                            let builder =
                                hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                            if let Err(e) = builder.serve_connection(io, service).await {
                                debug!(entry_point = %entry_point, error = %e, "HTTPS 연결 처리 종료");
                            }
                        }
                        Err(e) => {
                            // 핸드셰이크 실패는 카운트만 하고 전파하지 않는다
                            let failures = handshake_failures.fetch_add(1, Ordering::AcqRel) + 1;
                            warn!(
                                entry_point = %entry_point,
                                peer = %peer_addr,
                                failures,
                                error = %e,
                                "TLS 핸드셰이크 실패"
                            );
                        }
                    }
                }
                None => {
                    let io = TokioIo::new(stream);
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(entry_point = %entry_point, error = %e, "HTTP 연결 처리 종료");
                    }
                }
            }
        })
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn internal_error_response() -> middleware::Response {
    hyper::Response::builder()
        .status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
        .body(http_body_util::Full::new(bytes::Bytes::from_static(
            b"Internal Server Error",
        )))
        .unwrap_or_else(|_| hyper::Response::new(http_body_util::Full::new(bytes::Bytes::new())))
}
