//! Load generator for the forwarded prediction endpoint.
//!
//! Posts an image to `/predict` once per interval and swaps in a file the API
//! must reject every `error_every` requests, so both the latency and the
//! error-rate panels have something to show.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use crate::error::Result;

const DEFAULT_INVALID_NAME: &str = "invalid.txt";
const DEFAULT_INVALID_BODY: &[u8] = b"this file is not an image\n";

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficConfig {
    pub url: String,
    pub image: PathBuf,
    /// File sent for error requests; a small text payload when unset.
    pub invalid_file: Option<PathBuf>,
    pub interval: Duration,
    /// Send the invalid file on every request whose index is a multiple of this. 0 disables.
    pub error_every: u64,
    /// Stop after this many requests; run until interrupted when unset.
    pub count: Option<u64>,
    pub timeout: Duration,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001/predict".into(),
            image: PathBuf::from("images/bus.jpg"),
            invalid_file: None,
            interval: Duration::from_secs(1),
            error_every: 20,
            count: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// One request's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    /// 1-based request number.
    pub number: u64,
    pub intentional_error: bool,
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub sent: u64,
    /// 2xx responses.
    pub succeeded: u64,
    /// Non-2xx responses.
    pub rejected: u64,
    /// Transport failures (connection refused, timeouts).
    pub failed: u64,
}

struct Payload {
    name: String,
    bytes: Vec<u8>,
}

impl Payload {
    fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            name: path
                .file_name()
                .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned()),
            bytes: std::fs::read(path)?,
        })
    }
}

pub struct TrafficGenerator {
    client: reqwest::Client,
    config: TrafficConfig,
    image: Payload,
    invalid: Payload,
    stats: TrafficStats,
}

impl TrafficGenerator {
    /// Read the payload files and build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload file cannot be read or the client cannot be built.
    pub fn new(config: TrafficConfig) -> Result<Self> {
        let image = Payload::read(&config.image)?;
        let invalid = match &config.invalid_file {
            Some(path) => Payload::read(path)?,
            None => Payload {
                name: DEFAULT_INVALID_NAME.into(),
                bytes: DEFAULT_INVALID_BODY.to_vec(),
            },
        };
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            image,
            invalid,
            stats: TrafficStats::default(),
        })
    }

    /// Whether the request at `index` (0-based) carries the invalid file.
    #[must_use]
    pub fn is_error_request(&self, index: u64) -> bool {
        self.config.error_every > 0 && index % self.config.error_every == 0
    }

    #[must_use]
    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    async fn send(&mut self, index: u64) -> RequestResult {
        let intentional_error = self.is_error_request(index);
        let payload = if intentional_error { &self.invalid } else { &self.image };

        let start = Instant::now();
        let outcome = async {
            let part = Part::bytes(payload.bytes.clone())
                .file_name(payload.name.clone())
                .mime_str("image/jpeg")?;
            let response = self
                .client
                .post(&self.config.url)
                .multipart(Form::new().part("file", part))
                .send()
                .await?;
            Ok::<_, reqwest::Error>(response.status())
        }
        .await;
        let elapsed = start.elapsed();

        self.stats.sent += 1;
        let (status, error) = match outcome {
            Ok(status) => {
                if status.is_success() {
                    self.stats.succeeded += 1;
                } else {
                    self.stats.rejected += 1;
                }
                (Some(status.as_u16()), None)
            }
            Err(e) => {
                self.stats.failed += 1;
                (None, Some(e.to_string()))
            }
        };

        let result = RequestResult {
            number: index + 1,
            intentional_error,
            status,
            elapsed,
            error,
        };
        debug!(?result, "Request finished");
        result
    }

    /// Send requests until `count` is reached or `shutdown` resolves.
    pub async fn run<S, F>(&mut self, shutdown: S, mut on_result: F) -> TrafficStats
    where
        S: Future<Output = ()>,
        F: FnMut(&RequestResult),
    {
        info!(url = %self.config.url, image = %self.config.image.display(), "Starting traffic generator");
        tokio::pin!(shutdown);

        let mut index = 0;
        loop {
            if self.config.count.is_some_and(|max| index >= max) {
                break;
            }

            tokio::select! {
                () = &mut shutdown => break,
                result = self.send(index) => on_result(&result),
            }
            index += 1;

            if self.config.count.is_some_and(|max| index >= max) {
                break;
            }
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!(stats = ?self.stats, "Traffic generator stopped");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(dir: &Path, url: String) -> TrafficConfig {
        let image = dir.join("bus.jpg");
        std::fs::write(&image, b"\xff\xd8\xff\xe0fake-jpeg").unwrap();
        TrafficConfig {
            url,
            image,
            interval: Duration::from_millis(1),
            error_every: 2,
            count: Some(3),
            timeout: Duration::from_secs(2),
            ..TrafficConfig::default()
        }
    }

    #[test]
    fn test_error_request_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path(), "http://localhost/predict".into());
        config.error_every = 20;
        let generator = TrafficGenerator::new(config.clone()).unwrap();
        assert!(generator.is_error_request(0));
        assert!(!generator.is_error_request(1));
        assert!(generator.is_error_request(20));

        config.error_every = 0;
        let generator = TrafficGenerator::new(config).unwrap();
        assert!(!generator.is_error_request(0));
    }

    #[test]
    fn test_missing_image_is_error() {
        let config = TrafficConfig {
            image: PathBuf::from("/definitely/not/here.jpg"),
            ..TrafficConfig::default()
        };
        assert!(TrafficGenerator::new(config).is_err());
    }

    #[tokio::test]
    async fn test_run_posts_multipart_and_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path(), format!("{}/predict", server.uri()));
        let mut generator = TrafficGenerator::new(config).unwrap();

        let mut seen = Vec::new();
        let stats = generator
            .run(std::future::pending(), |r| seen.push(r.clone()))
            .await;

        assert_eq!(stats.sent, 3);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(seen.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(seen[0].intentional_error);
        assert!(!seen[1].intentional_error);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let first = String::from_utf8_lossy(&requests[0].body).to_string();
        assert!(first.contains("filename=\"invalid.txt\""));
        let second = String::from_utf8_lossy(&requests[1].body).to_string();
        assert!(second.contains("filename=\"bus.jpg\""));
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path(), format!("{}/predict", server.uri()));
        config.count = Some(2);
        let stats = TrafficGenerator::new(config)
            .unwrap()
            .run(std::future::pending(), |_| {})
            .await;

        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path(), "http://127.0.0.1:9/predict".into());
        config.count = Some(2);
        let stats = TrafficGenerator::new(config)
            .unwrap()
            .run(std::future::pending(), |_| {})
            .await;

        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_unbounded_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path(), "http://127.0.0.1:9/predict".into());
        config.count = None;
        config.interval = Duration::from_secs(60);
        let mut generator = TrafficGenerator::new(config).unwrap();

        let stats = generator
            .run(tokio::time::sleep(Duration::from_millis(200)), |_| {})
            .await;
        assert!(stats.sent <= 1);
    }
}
