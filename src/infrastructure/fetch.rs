//! Fetch resilience layer
//!
//! Fetches a URL through ordered fallback tiers, each attempted only after the
//! previous one fails:
//!
//! 1. Direct requests with previously known-good identities, randomized order
//! 2. Direct requests with freshly generated identities, skipping known failures
//! 3. A challenge client configured to pass anti-bot challenge responses
//! 4. Full headless browser rendering - slowest, most reliable, final fallback
//!
//! Every direct attempt reports identity success or failure to the reputation
//! store. Exhausting all tiers yields a typed failure that callers treat as a
//! skip, never as fatal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::config::FetchSettings;
use super::identity::IdentityStore;

/// Errors from the fetch layer.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("all fetch tiers exhausted for {url}")]
    TiersExhausted { url: String },
    #[error("browser render failed: {0}")]
    Browser(String),
}

/// Which tier ended up serving the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTier {
    DirectKnown,
    DirectFresh,
    Challenge,
    Browser,
}

impl std::fmt::Display for FetchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FetchTier::DirectKnown => "direct-known",
            FetchTier::DirectFresh => "direct-fresh",
            FetchTier::Challenge => "challenge",
            FetchTier::Browser => "browser",
        };
        f.write_str(name)
    }
}

/// A successful fetch: the raw page body plus the tier that served it.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub body: String,
    pub tier: FetchTier,
}

/// Seam between jobs and the network. The engine only ever sees this trait, so
/// tests substitute canned pages without touching the tier machinery.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError>;
}

/// Byte/request counters kept per run, reported at shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStats {
    pub requests: u64,
    pub bytes: u64,
    pub browser_renders: u64,
}

/// The production fetcher implementing the four-tier fallback chain.
pub struct TieredFetcher {
    /// Bare client for the direct tiers; identity is set per request.
    direct: reqwest::Client,
    /// Separately configured client presenting a full browser-like header set
    /// with a cookie jar, used against challenge responses.
    challenge: reqwest::Client,
    identities: Arc<IdentityStore>,
    settings: FetchSettings,
    stats: Mutex<FetchStats>,
}

impl TieredFetcher {
    pub fn new(settings: FetchSettings, identities: Arc<IdentityStore>) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let direct = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(FetchError::ClientBuild)?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .parse()
                .expect("static header value"),
        );
        headers.insert("Accept-Language", "en-US,en;q=0.9".parse().expect("static header value"));
        headers.insert("Upgrade-Insecure-Requests", "1".parse().expect("static header value"));
        headers.insert(
            "Sec-Ch-Ua",
            "\"Chromium\";v=\"126\", \"Not.A/Brand\";v=\"8\""
                .parse()
                .expect("static header value"),
        );
        headers.insert("Sec-Ch-Ua-Mobile", "?0".parse().expect("static header value"));
        headers.insert("Sec-Fetch-Dest", "document".parse().expect("static header value"));
        headers.insert("Sec-Fetch-Mode", "navigate".parse().expect("static header value"));
        let challenge = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .default_headers(headers)
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
            )
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self {
            direct,
            challenge,
            identities,
            settings,
            stats: Mutex::new(FetchStats::default()),
        })
    }

    pub fn stats(&self) -> FetchStats {
        *self.stats.lock()
    }

    /// Tier 1: known-good identities in randomized order, bounded attempts.
    async fn try_known_identities(&self, url: &str) -> Option<String> {
        let mut identities = self.identities.valid_identities();
        fastrand::shuffle(&mut identities);
        for identity in identities
            .iter()
            .take(self.settings.known_identity_attempts)
        {
            if let Some(body) = self.try_identity(url, identity).await {
                return Some(body);
            }
        }
        None
    }

    /// Tier 2: freshly generated identities, skipping ones already known bad.
    async fn try_fresh_identities(&self, url: &str) -> Option<String> {
        let mut tried = Vec::new();
        for _ in 0..self.settings.fresh_identity_attempts {
            let identity = synthesize_identity();
            if tried.contains(&identity) || self.identities.is_failed(&identity) {
                continue;
            }
            tried.push(identity.clone());
            if let Some(body) = self.try_identity(url, &identity).await {
                return Some(body);
            }
        }
        None
    }

    /// One direct attempt with a specific identity, recording its outcome.
    async fn try_identity(&self, url: &str, identity: &str) -> Option<String> {
        self.jitter().await;
        let result = self
            .direct
            .get(url)
            .header(reqwest::header::USER_AGENT, identity)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                self.count_request(body.len());
                if status.is_success() && !body.trim().is_empty() && !looks_like_challenge(&body) {
                    self.identities.record_outcome(identity, true);
                    Some(body)
                } else {
                    debug!(%status, "direct attempt rejected");
                    self.identities.record_outcome(identity, false);
                    None
                }
            }
            Err(e) => {
                debug!("direct attempt failed: {e}");
                self.count_request(0);
                self.identities.record_outcome(identity, false);
                None
            }
        }
    }

    /// Tier 3: the challenge client, bounded attempts. Identity reputation does
    /// not apply here; the client presents one pinned browser profile.
    async fn try_challenge_client(&self, url: &str) -> Option<String> {
        for attempt in 1..=self.settings.challenge_attempts {
            self.jitter().await;
            match self.challenge.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await.unwrap_or_default();
                    self.count_request(body.len());
                    if !body.trim().is_empty() && !looks_like_challenge(&body) {
                        return Some(body);
                    }
                }
                Ok(resp) => {
                    self.count_request(0);
                    debug!(status = %resp.status(), attempt, "challenge client rejected");
                }
                Err(e) => {
                    self.count_request(0);
                    debug!(attempt, "challenge client failed: {e}");
                }
            }
        }
        None
    }

    /// Tier 4: render the page in an external headless chromium. No deadline
    /// beyond the browser's own; this is the last resort.
    async fn try_browser(&self, url: &str) -> Result<String, FetchError> {
        info!(%url, "falling back to headless browser render");
        let output = Command::new(&self.settings.chromium_binary)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--window-size=1920,1080")
            .arg("--dump-dom")
            .arg(url)
            .output()
            .await
            .map_err(|e| FetchError::Browser(format!("failed to launch chromium: {e}")))?;

        if !output.status.success() {
            return Err(FetchError::Browser(format!(
                "chromium exited with {}",
                output.status
            )));
        }
        let body = String::from_utf8_lossy(&output.stdout).into_owned();
        if body.trim().is_empty() {
            return Err(FetchError::Browser("empty DOM dump".to_string()));
        }
        {
            let mut stats = self.stats.lock();
            stats.requests += 1;
            stats.bytes += body.len() as u64;
            stats.browser_renders += 1;
        }
        Ok(body)
    }

    async fn jitter(&self) {
        let min = self.settings.jitter_min_ms;
        let max = self.settings.jitter_max_ms.max(min);
        sleep(Duration::from_millis(fastrand::u64(min..=max))).await;
    }

    fn count_request(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.requests += 1;
        stats.bytes += bytes as u64;
    }
}

#[async_trait]
impl Fetch for TieredFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        if let Some(body) = self.try_known_identities(url).await {
            return Ok(FetchOutcome { body, tier: FetchTier::DirectKnown });
        }
        if let Some(body) = self.try_fresh_identities(url).await {
            return Ok(FetchOutcome { body, tier: FetchTier::DirectFresh });
        }
        if let Some(body) = self.try_challenge_client(url).await {
            return Ok(FetchOutcome { body, tier: FetchTier::Challenge });
        }
        match self.try_browser(url).await {
            Ok(body) => Ok(FetchOutcome { body, tier: FetchTier::Browser }),
            Err(e) => {
                warn!(%url, "browser tier failed: {e}");
                Err(FetchError::TiersExhausted { url: url.to_string() })
            }
        }
    }
}

/// Heuristic for anti-bot interstitials served with a 200.
fn looks_like_challenge(body: &str) -> bool {
    body.contains("cf-chl") || body.contains("Just a moment") || body.contains("challenge-platform")
}

/// Compose a plausible fresh browser identity.
fn synthesize_identity() -> String {
    const PLATFORMS: &[&str] = &[
        "Windows NT 10.0; Win64; x64",
        "Macintosh; Intel Mac OS X 10_15_7",
        "X11; Linux x86_64",
    ];
    let platform = PLATFORMS[fastrand::usize(..PLATFORMS.len())];
    if fastrand::bool() {
        let major = fastrand::u32(118..=127);
        let build = fastrand::u32(5000..=6700);
        let patch = fastrand::u32(50..=220);
        format!(
            "Mozilla/5.0 ({platform}) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/{major}.0.{build}.{patch} Safari/537.36"
        )
    } else {
        let major = fastrand::u32(115..=128);
        format!("Mozilla/5.0 ({platform}; rv:{major}.0) Gecko/20100101 Firefox/{major}.0")
    }
}
