//! Browser-automation collaborator interface
//!
//! The portal is JavaScript-rendered, so all page access goes through a
//! driver capable of headless operation with configurable timeouts. The
//! engine only depends on this trait; the concrete WebDriver/CDP binding
//! lives outside this crate.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// How to look elements up on the live page.
///
/// Mirrors the locator fallback ladder used for the download affordance:
/// accessible name first, then structural CSS, then anchor text scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementQuery {
    Css(String),
    /// Matches `aria-label`/accessible-name, the most drift-resistant hook.
    AccessibleName(String),
    /// Case-insensitive substring match over visible text of links/buttons.
    TextContains(String),
}

impl std::fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css:{s}"),
            Self::AccessibleName(s) => write!(f, "name:{s}"),
            Self::TextContains(s) => write!(f, "text:{s}"),
        }
    }
}

/// Snapshot handle to a live element.
///
/// `text` and `href` are captured at query time so the caller can apply
/// heuristics without further driver round-trips; `id` stays valid for a
/// subsequent `click` until the next navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: u64,
    pub text: String,
    pub href: Option<String>,
}

/// Errors surfaced by the driver. Navigation, wait and download failures are
/// transient and retried by the caller; session errors are fatal to setup.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {waited_secs}s waiting for {condition}")]
    WaitTimeout { condition: String, waited_secs: u64 },

    #[error("element interaction failed: {0}")]
    Interaction(String),

    #[error("no download appeared within {waited_secs}s")]
    DownloadTimeout { waited_secs: u64 },

    #[error("browser session error: {0}")]
    Session(String),
}

/// Capability surface the engine requires from browser automation.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Block until the document body is present, bounded by `timeout`.
    /// A condition wait, not a fixed sleep.
    async fn wait_for_body(&self, timeout: Duration) -> Result<(), DriverError>;

    /// Serialized markup of the current page after rendering.
    async fn page_html(&self) -> Result<String, DriverError>;

    async fn find_all(&self, query: &ElementQuery) -> Result<Vec<ElementHandle>, DriverError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError>;

    /// Poll the driver's download location until a new file is fully written
    /// or `timeout` elapses. `Ok(None)` means the bounded wait expired with
    /// nothing to show, which callers treat as "no attachment", not failure.
    ///
    /// Two concurrent downloads into one profile directory can race; the
    /// engine serializes click-and-poll behind a mutex rather than assuming
    /// the platform does.
    async fn poll_download(&self, timeout: Duration) -> Result<Option<PathBuf>, DriverError>;

    /// Cheap liveness check used during session setup.
    async fn health_check(&self) -> Result<(), DriverError>;
}
