//! Shared utilities for integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use loadstar::clock::SystemClock;
use loadstar::config::loader::BootConfig;
use loadstar::config::schema::{BackendConfig, ServiceConfig};
use loadstar::config::store::MemoryStore;
use loadstar::lifecycle::Shutdown;
use loadstar::observability::NoopSink;
use loadstar::proxy::build_http_client;
use loadstar::proxy::server::ProxyServer;
use loadstar::routing::Router;

pub const TEST_SECRET: &str = "test-admin-secret";

/// Start a mock backend returning a fixed 200 response; returns its address.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a programmable mock backend; returns its address.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Drain the request head before answering.
                        let mut buf = [0u8; 4096];
                        use tokio::io::AsyncReadExt;
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

pub fn backend(id: &str, addr: SocketAddr) -> BackendConfig {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "url": format!("http://{addr}"),
    }))
    .unwrap()
}

pub fn service(hostname: &str, backends: Vec<BackendConfig>) -> ServiceConfig {
    ServiceConfig::single_pool(hostname, backends)
}

/// Spin up a full proxy over the given services; returns its address, the
/// routing table (for admin-free inspection) and the shutdown handle.
pub async fn spawn_proxy(services: Vec<ServiceConfig>) -> (SocketAddr, Arc<Router>, Shutdown) {
    let mut boot = BootConfig::default();
    boot.admin.api_secret = TEST_SECRET.to_string();
    spawn_proxy_with_boot(services, boot).await
}

#[allow(dead_code)]
pub async fn spawn_proxy_with_boot(
    services: Vec<ServiceConfig>,
    boot: BootConfig,
) -> (SocketAddr, Arc<Router>, Shutdown) {
    let router = Router::new(
        build_http_client(),
        Arc::new(SystemClock),
        Arc::new(MemoryStore::new()),
        Arc::new(NoopSink),
    );
    router.seed(services, true).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(Arc::clone(&router), &boot);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    // Give the listener task a beat to start serving.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, router, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Admin request helper carrying the bearer token.
pub fn admin(client: &reqwest::Client, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
    client
        .request(method, url)
        .header("authorization", format!("Bearer {TEST_SECRET}"))
}
