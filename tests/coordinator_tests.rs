//! End-to-end tests for the coordinator over loopback TCP.
//!
//! Tests verify:
//! - Cursor hand-out and wrap-around
//! - Upload validation (unknown package, unterminated body)
//! - Silent close on malformed commands and bad indexes
//! - Report pages served through the same port

use daca::client::{CoordinatorClient, RetryPolicy};
use daca::report;
use daca::types::now_local;
use daca::{server, PackageCatalog, ServerConfig, ServerContext};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A coordinator serving on an ephemeral loopback port.
struct TestServer {
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<daca::DacaResult<()>>,
}

impl TestServer {
    async fn start(dir: &Path, entries: &[&str]) -> Self {
        let config = ServerConfig {
            data_dir: dir.to_path_buf(),
            baseline: "2.14".to_string(),
            idle_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let catalog = PackageCatalog::from_entries(entries.iter().copied()).unwrap();
        let ctx = Arc::new(ServerContext::with_catalog(config, catalog).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server::serve_until(Arc::clone(&ctx), listener, async {
            let _ = rx.await;
        }));

        Self {
            ctx,
            addr,
            shutdown,
            task,
        }
    }

    fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(
            self.addr.to_string(),
            RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
            },
        )
    }

    /// Send raw bytes, half-close, and collect whatever comes back.
    async fn raw(&self, bytes: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_get_wraps_around_catalog() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA", "pkgB", "pkgC"]).await;
    let client = server.client();

    let mut served = Vec::new();
    for _ in 0..4 {
        served.push(client.get_package().await.unwrap());
    }
    assert_eq!(served, vec!["pkgA", "pkgB", "pkgC", "pkgA"]);
    assert_eq!(server.ctx.catalog.cursor(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_versions_and_count() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA", "pkgB"]).await;
    let client = server.client();

    let versions = client.get_versions().await.unwrap();
    assert_eq!(versions.baseline, "2.14");
    assert_eq!(client.get_packages_count().await.unwrap(), 2);
    assert_eq!(client.get_package_idx(1).await.unwrap().as_deref(), Some("pkgB"));

    server.stop().await;
}

#[tokio::test]
async fn test_upload_is_stored_and_reported() {
    let url = "ftp://ftp.de.debian.org/debian/pool/main/z/zlib/zlib_1.3.orig.tar.gz";
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &[url]).await;
    let client = server.client();

    let payload = "cppcheck-options: -j1\ncppcheck: 2.14 head\ncount: 2 2\nelapsed-time: 1.0 1.0\n";
    client.upload_result(url, payload).await.unwrap();

    let record = server.ctx.store.read_result("zlib").unwrap().unwrap();
    assert_eq!(record.url.as_deref(), Some(url));
    assert_eq!(record.versions, vec!["2.14", "head"]);
    assert_eq!(server.ctx.store.latest_names(), vec!["zlib"]);

    let reply = server.raw(b"GET /latest.html HTTP/1.1\r\n").await;
    assert!(String::from_utf8(reply).unwrap().contains("zlib"));

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_package_upload_rejected() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA", "pkgB", "pkgC"]).await;
    let client = server.client();

    // the coordinator closes without replying, so the upload itself looks fine
    client
        .upload_result("pkgZ", "cppcheck: 2.14 head\ncount: 1 1\n")
        .await
        .unwrap();

    assert!(server.ctx.store.read_result("pkgZ").unwrap().is_none());
    assert_eq!(client.get_packages_count().await.unwrap(), 3);
    assert!(server.ctx.store.package_names().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unterminated_upload_not_stored() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA"]).await;

    let reply = server
        .raw(b"write\npkgA\ncppcheck: 2.14 head\ncount: 1 1\n")
        .await;
    assert!(reply.is_empty());
    assert!(server.ctx.store.read_result("pkgA").unwrap().is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_disallowed_command_gets_no_reply() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA", "pkgB"]).await;

    assert!(server.raw(b"get;ls\n").await.is_empty());
    assert!(server.raw(b"getPackageIdx:1|2\n").await.is_empty());
    assert_eq!(server.ctx.catalog.cursor(), 0);

    // the server keeps serving after bad connections
    assert_eq!(server.raw(b"get\n").await, b"pkgA");

    server.stop().await;
}

#[tokio::test]
async fn test_out_of_range_index_closes_silently() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA"]).await;
    let client = server.client();

    assert_eq!(client.get_package_idx(99).await.unwrap(), None);

    server.stop().await;
}

#[tokio::test]
async fn test_nodata_withdraws_package() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA", "pkgB"]).await;
    let client = server.client();

    client.upload_nodata("pkgA").await.unwrap();
    assert_eq!(server.ctx.catalog.withdrawn_count(), 1);
    assert_eq!(client.get_package_idx(0).await.unwrap(), None);
    assert_eq!(client.get_packages_count().await.unwrap(), 2);

    server.stop().await;
}

#[tokio::test]
async fn test_http_get_overview() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgA"]).await;

    let reply = server.raw(b"GET /index.html HTTP/1.1\r\n").await;
    let text = String::from_utf8(reply).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-type: text/html"));

    let missing = server.raw(b"GET /no-such-page HTTP/1.1\r\n").await;
    assert!(String::from_utf8(missing).unwrap().starts_with("HTTP/1.1 404"));

    server.stop().await;
}

#[tokio::test]
async fn test_improved_timing_listed_in_time_lt_only() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgT"]).await;

    server
        .ctx
        .store
        .write_result(
            "pkgT",
            "pkgT\ncppcheck: 2.14 head\ncount: 4 4\nelapsed-time: 5.0 1.0\n",
            now_local(),
        )
        .unwrap();

    let improved = report::route(&server.ctx, "/time_lt.html?factor=2.0");
    let improved = String::from_utf8(improved.body).unwrap();
    assert!(improved.contains("pkgT"));
    assert!(improved.contains("0.20"));

    let regressed = report::route(&server.ctx, "/time_gt.html?factor=2.0");
    assert!(!String::from_utf8(regressed.body).unwrap().contains("pkgT"));

    server.stop().await;
}

#[tokio::test]
async fn test_stale_page_with_oversized_days() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(tmp_dir.path(), &["pkgS"]).await;

    server
        .ctx
        .store
        .write_result("pkgS", "pkgS\ncppcheck: 2.14 head\ncount: 1 1\n", now_local())
        .unwrap();

    let response = report::route(&server.ctx, "/stale.html?days=9223372036854775807");
    assert_eq!(response.status, 200);

    let reply = server
        .raw(b"GET /stale.html?days=9223372036854775807 HTTP/1.1\r\n")
        .await;
    assert!(String::from_utf8(reply).unwrap().starts_with("HTTP/1.1 200 OK"));

    server.stop().await;
}
