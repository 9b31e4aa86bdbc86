//! Package download, unpacking and source discovery.

use log::{debug, info, warn};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::connection::RetryPolicy;
use super::process::{run_checked, CommandSpec};
use crate::error::{DacaError, DacaResult};

/// Extensions of files the analyzer scans.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx", "h++", "ipp", "tpp", "txx",
];

const UNPACK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Mirror urls are listed as `ftp://`; the same tree is served over http.
pub fn mirror_url(url: &str) -> String {
    match url.strip_prefix("ftp://") {
        Some(rest) => format!("http://{}", rest),
        None => url.to_string(),
    }
}

/// Parse a bandwidth limit in bytes per second, with optional `k` or `m`
/// suffix (`500k`, `2m`).
pub fn parse_rate(text: &str) -> Option<u64> {
    let text = text.trim().to_ascii_lowercase();
    let (digits, factor) = match text.chars().last()? {
        'k' => (&text[..text.len() - 1], 1024),
        'm' => (&text[..text.len() - 1], 1024 * 1024),
        _ => (text.as_str(), 1),
    };
    let value: u64 = digits.parse().ok()?;
    value.checked_mul(factor).filter(|rate| *rate > 0)
}

/// How long to pause so that `bytes` in `elapsed` stays under `limit`
/// bytes per second.
pub fn throttle_delay(bytes: u64, elapsed: Duration, limit: u64) -> Option<Duration> {
    if limit == 0 {
        return None;
    }
    let expected = Duration::from_secs_f64(bytes as f64 / limit as f64);
    expected.checked_sub(elapsed).filter(|d| !d.is_zero())
}

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Number of analyzable files below `dir`.
pub fn count_source_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_source_file(entry.path()))
        .count()
}

pub struct Downloader {
    client: reqwest::Client,
    bandwidth_limit: Option<u64>,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(bandwidth_limit: Option<u64>) -> DacaResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(30 * 60))
            .build()?;
        Ok(Self {
            client,
            bandwidth_limit,
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::from_secs(5),
            },
        })
    }

    /// Download `url` to `dest`, returning its size.
    pub async fn download(&self, url: &str, dest: &Path) -> DacaResult<u64> {
        let url = mirror_url(url);
        self.retry
            .run(&format!("download {}", url), || self.download_once(&url, dest))
            .await
    }

    async fn download_once(&self, url: &str, dest: &Path) -> DacaResult<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = fs::File::create(dest).await?;
        let start = Instant::now();
        let mut bytes: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
            if let Some(limit) = self.bandwidth_limit {
                if let Some(pause) = throttle_delay(bytes, start.elapsed(), limit) {
                    tokio::time::sleep(pause).await;
                }
            }
        }
        file.flush().await?;

        if bytes == 0 {
            return Err(DacaError::Coordinator(format!("{} is empty", url)));
        }
        info!("Downloaded {} ({} bytes in {:.1}s)", url, bytes, start.elapsed().as_secs_f64());
        Ok(bytes)
    }
}

/// Unpack `archive` into a fresh `dest` and count its source files.
pub async fn unpack(archive: &Path, dest: &Path) -> DacaResult<usize> {
    if fs::metadata(dest).await.is_ok() {
        fs::remove_dir_all(dest).await?;
    }
    fs::create_dir_all(dest).await?;

    let spec = CommandSpec::new("tar")
        .arg("xf")
        .arg(archive.display().to_string())
        .arg("-C")
        .arg(dest.display().to_string())
        .timeout(UNPACK_TIMEOUT);
    if let Err(e) = run_checked(&spec).await {
        // partial archives are still worth scanning
        warn!("Unpacking {} incomplete: {}", archive.display(), e);
    }

    let dest = dest.to_path_buf();
    let files = tokio::task::spawn_blocking(move || count_source_files(&dest))
        .await
        .map_err(std::io::Error::from)?;
    debug!("{} source files in {}", files, archive.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_url() {
        assert_eq!(
            mirror_url("ftp://ftp.de.debian.org/debian/pool/main/z/zlib/zlib.tar.gz"),
            "http://ftp.de.debian.org/debian/pool/main/z/zlib/zlib.tar.gz"
        );
        assert_eq!(mirror_url("https://x/y.tar.gz"), "https://x/y.tar.gz");
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("100"), Some(100));
        assert_eq!(parse_rate("500k"), Some(500 * 1024));
        assert_eq!(parse_rate("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_rate("0"), None);
        assert_eq!(parse_rate("fast"), None);
        assert_eq!(parse_rate("99999999999999999m"), None);
    }

    #[test]
    fn test_throttle_delay() {
        assert_eq!(
            throttle_delay(1000, Duration::from_millis(500), 1000),
            Some(Duration::from_millis(500))
        );
        assert_eq!(throttle_delay(1000, Duration::from_secs(2), 1000), None);
        assert_eq!(throttle_delay(1000, Duration::ZERO, 0), None);
    }

    #[test]
    fn test_count_source_files() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let nested = tmp_dir.path().join("pkg/src");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["main.c", "util.CPP", "util.h", "README", "build.py"] {
            std::fs::write(nested.join(name), "").unwrap();
        }
        assert_eq!(count_source_files(tmp_dir.path()), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unpack_counts_sources() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let src = tmp_dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.c"), "int main(){}\n").unwrap();
        let archive = tmp_dir.path().join("pkg.tar");
        let status = std::process::Command::new("tar")
            .arg("cf")
            .arg(&archive)
            .arg("-C")
            .arg(&src)
            .arg("a.c")
            .status()
            .unwrap();
        assert!(status.success());

        let dest = tmp_dir.path().join("temp");
        assert_eq!(unpack(&archive, &dest).await.unwrap(), 1);
        assert!(dest.join("a.c").is_file());
    }
}
