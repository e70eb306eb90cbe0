use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::{ProxyError, Result};
use crate::logger::log_request;

pub mod handlers;
pub mod response;
pub mod router;
pub mod store;

pub use handlers::{
    AssetHandler, MetricsHandler, PlaylistHandler, PlaylistSelector, SegmentHandler, StatusHandler, StatusProvider,
};
pub use router::{ProxyRequest, ProxyRouter, RouteHandler};
pub use store::{AuxiliaryAssetStore, AuxiliaryAssetType, PlaylistStore};

#[derive(Default)]
struct ServerState {
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// 本地 HTTP 代理服务
#[derive(Clone)]
pub struct ProxyServer {
    config: ServerConfig,
    router: Arc<ProxyRouter>,
    state: Arc<RwLock<ServerState>>,
}

impl ProxyServer {
    pub fn new(config: ServerConfig, router: ProxyRouter) -> Self {
        info!("Creating proxy server for {}:{}", config.host, config.port);
        Self {
            config,
            router: Arc::new(router),
            state: Arc::new(RwLock::new(ServerState::default())),
        }
    }

    /// Binds and starts serving. Calling it again while running returns the
    /// address already bound.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.write().await;
        if let Some(addr) = state.local_addr {
            debug!("Proxy server already running on {}", addr);
            return Ok(addr);
        }

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let router = self.router.clone();
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            debug!("New connection from: {}", remote_addr);
            let router = router.clone();

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let router = router.clone();
                    Self::handle_request(req, router)
                }))
            }
        });

        let (tx, rx) = oneshot::channel::<()>();
        let server = Server::from_tcp(listener)?
            .serve(make_svc)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            });

        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("Server error: {}", e);
            }
        });

        info!("Proxy server is ready on {}", addr);
        state.local_addr = Some(addr);
        state.shutdown = Some(tx);
        Ok(addr)
    }

    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if let Some(tx) = state.shutdown.take() {
            let _ = tx.send(());
            info!("Proxy server on {:?} stopped", state.local_addr);
        }
        state.local_addr = None;
    }

    pub async fn port(&self) -> Option<u16> {
        self.state.read().await.local_addr.map(|addr| addr.port())
    }

    /// `http://<host>:<port>`, available once the listener has a real port.
    pub async fn base_url(&self) -> Option<String> {
        let addr = self.state.read().await.local_addr?;
        if addr.port() == 0 {
            return None;
        }
        Some(format!("http://{}", addr))
    }

    /// 等待监听端口就绪
    pub async fn wait_for_base_url(&self) -> Result<String> {
        for _ in 0..50 {
            if let Some(url) = self.base_url().await {
                return Ok(url);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        Err(ProxyError::ServerNotReady)
    }

    async fn handle_request(req: Request<Body>, router: Arc<ProxyRouter>) -> std::result::Result<Response<Body>, Infallible> {
        let started = Instant::now();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());

        let request = ProxyRequest::new(req.method().clone(), &path_and_query);
        let path = request.path.clone();
        let response = router.handle(request).await;

        log_request(&path, response.status().as_u16(), started.elapsed());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::diagnostics::Diagnostics;
    use crate::network::HttpClient;
    use std::time::Duration;
    use tokio::test;

    fn server_with_playlist(store: PlaylistStore) -> ProxyServer {
        let mut router = ProxyRouter::new();
        router.register(
            "/playlist.m3u8",
            Arc::new(PlaylistHandler::new(
                store,
                PlaylistSelector::Fixed(store::MASTER_PLAYLIST.to_string()),
                Diagnostics::default(),
            )),
        );
        ProxyServer::new(ServerConfig::default(), router)
    }

    #[test]
    async fn test_serves_over_real_socket() {
        let store = PlaylistStore::new();
        store
            .update(store::MASTER_PLAYLIST, "#EXTM3U\n#EXT-X-VERSION:3\n".to_string())
            .await;
        let server = server_with_playlist(store);
        assert!(server.base_url().await.is_none());

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        let base = server.wait_for_base_url().await.unwrap();
        assert_eq!(server.start().await.unwrap(), addr);

        let client = HttpClient::new().unwrap();
        let timeout = Duration::from_secs(5);
        let response = client
            .get(&format!("{}/playlist.m3u8?_HLS_msn=3", base), None, timeout)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"#EXTM3U\n#EXT-X-VERSION:3\n");

        let response = client
            .get(&format!("{}/unknown", base), None, timeout)
            .await
            .unwrap();
        assert_eq!(response.status, 404);

        server.stop().await;
        assert!(server.base_url().await.is_none());
        assert!(server.port().await.is_none());
    }
}
