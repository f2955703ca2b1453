//! Streaming artifact download with verification and bounded retries.
//!
//! Each attempt streams the body straight to the destination file. Once the
//! stream ends, the result has to pass two checks:
//!
//! 1. when the server declared a length, exactly that many bytes arrived;
//! 2. the file is at least the plausibility floor.
//!
//! Some failures truncate silently without a protocol error, which is why
//! both checks run. A failed attempt deletes the partial file and the next
//! one starts again from byte 0. Transport errors, 5xx/429 answers and failed
//! checks all draw on the same attempt budget. Redirects are followed by hand
//! and do not use any of it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderValue, LOCATION, USER_AGENT};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::config::{USER_AGENT_VALUE, UpdaterConfig};
use crate::error::DownloadError;
use crate::verify;

/// Minimum interval between progress events.
const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Speed samples kept for smoothing, about two seconds' worth.
const MAX_SPEED_SAMPLES: usize = 20;

/// Download progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes written in the current attempt.
    pub downloaded: u64,
    /// Declared total, 0 when the server sent no length.
    pub total: u64,
    /// Smoothed speed in bytes per second.
    pub speed: u64,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl DownloadProgress {
    /// Returns the progress as a fraction (0.0 to 1.0).
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total as f64) as f32
    }

    /// Returns the progress as a percentage (0 to 100).
    #[must_use]
    pub fn percentage(&self) -> u8 {
        (self.fraction() * 100.0).min(100.0) as u8
    }
}

struct ProgressTracker {
    downloaded: u64,
    total: u64,
    attempt: u32,
    samples: VecDeque<(Instant, u64)>,
    last_emit: Option<Instant>,
}

impl ProgressTracker {
    fn new(total: u64, attempt: u32) -> Self {
        Self {
            downloaded: 0,
            total,
            attempt,
            samples: VecDeque::with_capacity(MAX_SPEED_SAMPLES),
            last_emit: None,
        }
    }

    fn update(&mut self, downloaded: u64) {
        self.downloaded = downloaded;
        self.samples.push_back((Instant::now(), downloaded));
        if self.samples.len() > MAX_SPEED_SAMPLES {
            self.samples.pop_front();
        }
    }

    fn speed(&self) -> u64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0;
        };
        let elapsed = last.0.duration_since(first.0).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0;
        }
        (last.1.saturating_sub(first.1) as f64 / elapsed) as u64
    }

    fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        if self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= PROGRESS_UPDATE_INTERVAL)
        {
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }

    fn to_progress(&self) -> DownloadProgress {
        DownloadProgress {
            downloaded: self.downloaded,
            total: self.total,
            speed: self.speed(),
            attempt: self.attempt,
        }
    }
}

/// State of one download, owned by [`Downloader::download`].
///
/// `bytes_written` only grows within an attempt and is reset to 0 when a new
/// attempt begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    url: String,
    destination: PathBuf,
    expected_bytes: Option<u64>,
    bytes_written: u64,
    attempt: u32,
    max_attempts: u32,
}

impl DownloadSession {
    fn new(url: &str, destination: &Path, max_attempts: u32) -> Self {
        Self {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            expected_bytes: None,
            bytes_written: 0,
            attempt: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.bytes_written = 0;
        self.expected_bytes = None;
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination file.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Length declared by the server in the current attempt.
    #[must_use]
    pub fn expected_bytes(&self) -> Option<u64> {
        self.expected_bytes
    }

    /// Bytes written in the current attempt.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Current attempt, 1-based.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// A verified artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// File location.
    pub path: PathBuf,
    /// File size in bytes.
    pub bytes: u64,
    /// Attempts used, 1 when nothing was retried.
    pub attempts: u32,
    /// Lowercase hex SHA-256 of the file.
    pub sha256: String,
}

/// Why one attempt failed.
#[derive(Debug)]
enum AttemptFailure {
    Transport(String),
    RetryableStatus { status: u16, url: String },
    Integrity { observed: u64, expected: Option<u64> },
    Checksum(DownloadError),
    Fatal(DownloadError),
}

/// Streams artifacts to disk.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
    min_bytes: u64,
    max_redirects: usize,
    verify_digest: bool,
}

impl Downloader {
    /// Create a downloader from the update settings.
    pub fn new(config: &UpdaterConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.request_timeout())
            .build()
            .map_err(|e| DownloadError::Network {
                attempts: 0,
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
            min_bytes: config.min_artifact_bytes,
            max_redirects: config.max_redirects,
            verify_digest: config.verify_digest,
        })
    }

    /// Download `url` to `destination`, calling `on_progress` as bytes arrive.
    ///
    /// `expected_sha256`, when given, is checked after the size checks pass.
    pub async fn download<F>(
        &self,
        url: &str,
        destination: &Path,
        expected_sha256: Option<&str>,
        mut on_progress: F,
    ) -> Result<DownloadReport, DownloadError>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }

        let mut session = DownloadSession::new(url, destination, self.max_attempts);
        let mut last_failure = None;

        while session.attempt < session.max_attempts {
            session.begin_attempt();
            tracing::info!(
                url,
                attempt = session.attempt,
                max_attempts = session.max_attempts,
                "starting download"
            );

            let failure = match self.attempt(&mut session, &mut on_progress).await {
                Ok(digest) => match self.check(&session, &digest, expected_sha256).await {
                    Ok(bytes) => {
                        tracing::info!(
                            bytes,
                            attempts = session.attempt,
                            path = %destination.display(),
                            "download complete"
                        );
                        return Ok(DownloadReport {
                            path: destination.to_path_buf(),
                            bytes,
                            attempts: session.attempt,
                            sha256: digest,
                        });
                    }
                    Err(failure) => failure,
                },
                Err(failure) => failure,
            };

            remove_partial(destination).await;
            if let AttemptFailure::Fatal(error) = failure {
                return Err(error);
            }

            tracing::warn!(attempt = session.attempt, ?failure, "download attempt failed");
            last_failure = Some(failure);
            if session.attempt < session.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(self.exhausted(last_failure, session.attempt))
    }

    /// One pass over the body. Returns the hex SHA-256 of what was written.
    async fn attempt<F>(
        &self,
        session: &mut DownloadSession,
        on_progress: &mut F,
    ) -> Result<String, AttemptFailure>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let response = self.open(&session.url).await?;
        session.expected_bytes = response.content_length().filter(|&n| n > 0);

        let path = session.destination.clone();
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| AttemptFailure::Fatal(io_error(&path, &e)))?;
        let mut hasher = Sha256::new();
        let mut tracker = ProgressTracker::new(session.expected_bytes.unwrap_or(0), session.attempt);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    return Err(match session.expected_bytes {
                        Some(expected) if session.bytes_written < expected => {
                            tracing::debug!(%error, "body ended before declared length");
                            AttemptFailure::Integrity {
                                observed: session.bytes_written,
                                expected: Some(expected),
                            }
                        }
                        _ => AttemptFailure::Transport(error.to_string()),
                    });
                }
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptFailure::Fatal(io_error(&path, &e)))?;
            hasher.update(&chunk);
            session.bytes_written += chunk.len() as u64;
            tracker.update(session.bytes_written);
            if tracker.should_emit() {
                on_progress(&tracker.to_progress());
            }
        }

        file.flush()
            .await
            .map_err(|e| AttemptFailure::Fatal(io_error(&path, &e)))?;
        drop(file);
        on_progress(&tracker.to_progress());

        Ok(hex::encode(hasher.finalize()))
    }

    /// Send the request, following redirects without spending attempts.
    async fn open(&self, url: &str) -> Result<reqwest::Response, AttemptFailure> {
        let mut current = reqwest::Url::parse(url)
            .map_err(|e| AttemptFailure::Fatal(DownloadError::InvalidUrl(format!("{url}: {e}"))))?;

        for _ in 0..=self.max_redirects {
            let response = self
                .client
                .get(current.clone())
                .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE))
                .send()
                .await
                .map_err(|e| AttemptFailure::Transport(e.to_string()))?;
            let status = response.status();

            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Err(AttemptFailure::Fatal(DownloadError::Status {
                        status: status.as_u16(),
                        url: current.to_string(),
                    }));
                };
                let next = current.join(location).map_err(|e| {
                    AttemptFailure::Fatal(DownloadError::InvalidUrl(format!("{location}: {e}")))
                })?;
                tracing::debug!(from = %current, to = %next, "following redirect");
                current = next;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AttemptFailure::RetryableStatus {
                    status: status.as_u16(),
                    url: current.to_string(),
                });
            }
            return Err(AttemptFailure::Fatal(DownloadError::Status {
                status: status.as_u16(),
                url: current.to_string(),
            }));
        }

        Err(AttemptFailure::Fatal(DownloadError::TooManyRedirects {
            limit: self.max_redirects,
        }))
    }

    /// Byte count, plausibility floor, then digest. Returns the file size.
    async fn check(
        &self,
        session: &DownloadSession,
        digest: &str,
        expected_sha256: Option<&str>,
    ) -> Result<u64, AttemptFailure> {
        if let Some(expected) = session.expected_bytes
            && session.bytes_written != expected
        {
            return Err(AttemptFailure::Integrity {
                observed: session.bytes_written,
                expected: Some(expected),
            });
        }

        let size = tokio::fs::metadata(&session.destination)
            .await
            .map_err(|e| AttemptFailure::Fatal(io_error(&session.destination, &e)))?
            .len();
        if size < self.min_bytes {
            return Err(AttemptFailure::Integrity {
                observed: size,
                expected: session.expected_bytes,
            });
        }

        if self.verify_digest
            && let Some(published) = expected_sha256
        {
            verify::verify_digest(digest, published).map_err(AttemptFailure::Checksum)?;
        }
        Ok(size)
    }

    fn exhausted(&self, failure: Option<AttemptFailure>, attempts: u32) -> DownloadError {
        match failure {
            Some(AttemptFailure::Integrity { observed, expected }) => DownloadError::Integrity {
                observed,
                expected,
                minimum: self.min_bytes,
                attempts,
            },
            Some(AttemptFailure::RetryableStatus { status, url }) => {
                DownloadError::Status { status, url }
            }
            Some(AttemptFailure::Checksum(error) | AttemptFailure::Fatal(error)) => error,
            Some(AttemptFailure::Transport(reason)) => DownloadError::Network { attempts, reason },
            None => DownloadError::Network {
                attempts,
                reason: "no attempt was made".to_string(),
            },
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(%error, path = %path.display(), "could not remove partial download"),
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

/// Format bytes as a human-readable string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format speed as a human-readable string.
#[must_use]
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}
