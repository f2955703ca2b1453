//! Release index client and asset selection.
//!
//! The index is a GitHub "latest release" endpoint. Each call performs one
//! request; nothing is cached, so callers decide how often to poll.

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use sg_common::{Arch, Os, Platform};

use crate::config::{USER_AGENT_VALUE, UpdaterConfig};
use crate::error::ReleaseError;
use crate::version::Version;

/// How an artifact is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Packaging {
    /// Windows setup executable.
    Installer,
    /// Windows portable build; never chosen for self-update.
    Portable,
    /// macOS disk image holding an `.app` bundle.
    DiskImage,
    /// Linux single-file relocatable executable.
    AppImage,
}

/// A downloadable file of a release, classified by platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseAsset {
    /// Target OS.
    pub os: Os,
    /// Target architecture.
    pub arch: Arch,
    /// Install procedure the file needs.
    pub packaging: Packaging,
    /// File name as published.
    pub filename: String,
    /// Direct download URL.
    pub download_url: String,
    /// Size in bytes published by the index, 0 when unknown.
    pub size: u64,
    /// Lowercase hex SHA-256 published by the index.
    pub sha256: Option<String>,
}

/// Snapshot of the latest release. Valid for a single update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    /// Tag as published, e.g. `v1.4.0`.
    pub tag: String,
    /// Version without any leading `v`.
    pub version: String,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
    /// Release notes (markdown).
    pub notes: Option<String>,
    /// Release page for manual downloads.
    pub page_url: Option<String>,
    /// Assets whose file names identify a supported platform.
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseInfo {
    /// Parsed version.
    pub fn parsed_version(&self) -> Result<Version, ReleaseError> {
        Version::from_tag(&self.version)
    }
}

/// Pick the asset for `platform`, or `None` rather than a near miss.
#[must_use]
pub fn resolve_asset_for(release: &ReleaseInfo, platform: Platform) -> Option<&ReleaseAsset> {
    release.assets.iter().find(|asset| {
        asset.os == platform.os
            && asset.arch == platform.arch
            && asset.packaging != Packaging::Portable
    })
}

/// Identify OS, architecture and packaging from an asset file name.
///
/// - Windows: `.exe` naming `windows`; `portable` marks a portable build.
///   `.blockmap` sidecars are ignored.
/// - macOS: `.dmg`; `silicon`, `arm64`, `aarch64` or `apple` mean Apple
///   silicon, anything else Intel.
/// - Linux: `.AppImage`; `arm64`, `aarch64` or `-arm.` mean ARM64, names
///   without any `arm` mean x86_64, other ARM flavours are unsupported.
#[must_use]
pub fn classify(filename: &str) -> Option<(Os, Arch, Packaging)> {
    let name = filename.to_lowercase();
    let has_any = |markers: &[&str]| markers.iter().any(|m| name.contains(m));

    if name.ends_with(".blockmap") {
        return None;
    }

    if name.ends_with(".exe") {
        if !name.contains("windows") {
            return None;
        }
        let packaging = if name.contains("portable") {
            Packaging::Portable
        } else {
            Packaging::Installer
        };
        let arch = if has_any(&["arm64", "aarch64"]) {
            Arch::Aarch64
        } else {
            Arch::X86_64
        };
        return Some((Os::Windows, arch, packaging));
    }

    if name.ends_with(".dmg") {
        let arch = if has_any(&["silicon", "arm64", "aarch64", "apple"]) {
            Arch::Aarch64
        } else {
            Arch::X86_64
        };
        return Some((Os::MacOs, arch, Packaging::DiskImage));
    }

    if name.ends_with(".appimage") {
        let arch = if has_any(&["arm64", "aarch64", "-arm."]) {
            Arch::Aarch64
        } else if !name.contains("arm") {
            Arch::X86_64
        } else {
            return None;
        };
        return Some((Os::Linux, arch, Packaging::AppImage));
    }

    None
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    html_url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
    state: Option<String>,
    /// `sha256:<hex>` when GitHub computed one.
    digest: Option<String>,
}

impl GitHubRelease {
    fn into_release_info(self) -> Result<ReleaseInfo, ReleaseError> {
        let version = [Some(self.tag_name.as_str()), self.name.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|candidate| {
                Version::from_tag(candidate)
                    .ok()
                    .map(|_| strip_v(candidate.trim()).to_string())
            })
            .ok_or_else(|| ReleaseError::InvalidVersion(self.tag_name.clone()))?;

        let assets = self
            .assets
            .into_iter()
            .filter(|asset| asset.state.as_deref().is_none_or(|s| s == "uploaded"))
            .filter_map(|asset| {
                let Some((os, arch, packaging)) = classify(&asset.name) else {
                    tracing::debug!(asset = %asset.name, "ignoring unrecognised asset");
                    return None;
                };
                Some(ReleaseAsset {
                    os,
                    arch,
                    packaging,
                    sha256: asset
                        .digest
                        .as_deref()
                        .and_then(|d| d.strip_prefix("sha256:"))
                        .map(str::to_lowercase),
                    filename: asset.name,
                    download_url: asset.browser_download_url,
                    size: asset.size,
                })
            })
            .collect();

        Ok(ReleaseInfo {
            tag: self.tag_name,
            version,
            published_at: self.published_at,
            notes: self.body,
            page_url: self.html_url,
            assets,
        })
    }
}

fn strip_v(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

/// Client for the release index.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: reqwest::Client,
    index_url: String,
}

impl ReleaseClient {
    /// Create a client for `config.release_index_url`.
    pub fn new(config: &UpdaterConfig) -> Result<Self, ReleaseError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ReleaseError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            index_url: config.release_index_url.clone(),
        })
    }

    /// Fetch the latest release.
    pub async fn latest_release(&self) -> Result<ReleaseInfo, ReleaseError> {
        tracing::debug!(url = %self.index_url, "fetching latest release");
        let response = self.client.get(&self.index_url).send().await?;
        let release = Self::handle_response(response).await?;
        let info = release.into_release_info()?;
        tracing::info!(
            version = %info.version,
            assets = info.assets.len(),
            "fetched release index"
        );
        Ok(info)
    }

    async fn handle_response(response: reqwest::Response) -> Result<GitHubRelease, ReleaseError> {
        let status = response.status();

        if status == reqwest::StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .is_some_and(|remaining| remaining.to_str().unwrap_or("1") == "0")
        {
            let reset = response
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            return Err(ReleaseError::RateLimited {
                retry_after: retry_after(reset, Utc::now()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ReleaseError::Malformed(e.to_string()))
    }
}

/// Seconds until the rate-limit window resets; 60 when the header is absent.
fn retry_after(reset_epoch: Option<i64>, now: DateTime<Utc>) -> u64 {
    match reset_epoch {
        Some(reset) => u64::try_from(reset - now.timestamp()).unwrap_or(0),
        None => 60,
    }
}
