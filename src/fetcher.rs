//! Detail-page and attachment retrieval
//!
//! Navigation is paced by a rate limiter independent of worker count, waits
//! are condition-based and bounded, and the download affordance is located
//! with the same ordered-fallback discipline as field extraction: accessible
//! name, then icon class, then href heuristics, then any control labelled
//! with a download keyword. A missing attachment is an explicit non-fatal
//! result, never an error.
//!
//! The driver is one shared session with a single page cursor, so each
//! navigate-and-read unit runs under a page lock: concurrent workers overlap
//! on extraction, persistence and uploads while page access itself is
//! strictly sequential. Without that, one worker's `page_html` would read
//! whatever page another worker navigated to last.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::extraction::FieldExtractor;
use crate::domain::ThesisDetail;
use crate::infrastructure::browser::{BrowserDriver, DriverError, ElementQuery};
use crate::infrastructure::config::PortalConfig;

/// Labels that mark a control as a download affordance, lowest-priority
/// fallback in the ladder.
const DOWNLOAD_KEYWORDS: &[&str] = &["descargar", "download", "pdf"];

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The page rendered but the body fields could not be resolved.
    #[error("detail page {url} yielded no extractable body")]
    Unextractable { url: String },
}

/// Fetches detail pages and their binary attachments through the browser
/// collaborator.
pub struct DetailFetcher {
    driver: Arc<dyn BrowserDriver>,
    extractor: Arc<FieldExtractor>,
    body_wait: Duration,
    download_timeout: Duration,
    nav_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    /// The session has one page cursor and one download directory. Every
    /// navigate-and-read unit (and every click-and-poll pair) holds this
    /// lock for its full duration, otherwise a worker could read the page
    /// another worker just navigated to.
    page_lock: Mutex<()>,
}

impl DetailFetcher {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        extractor: Arc<FieldExtractor>,
        portal: &PortalConfig,
    ) -> Self {
        let per_second =
            NonZeroU32::new(portal.navigations_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            driver,
            extractor,
            body_wait: Duration::from_secs(portal.body_wait_secs),
            download_timeout: Duration::from_secs(portal.download_timeout_secs),
            nav_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            page_lock: Mutex::new(()),
        }
    }

    /// Navigate to a detail page, wait for the body and extract its fields.
    pub async fn fetch_detail(&self, url: &str) -> Result<ThesisDetail, FetchError> {
        self.nav_limiter.until_ready().await;
        debug!("fetching detail page {}", url);

        let html = {
            let _guard = self.page_lock.lock().await;
            self.driver.navigate(url).await?;
            self.driver.wait_for_body(self.body_wait).await?;
            self.driver.page_html().await?
        };

        self.extractor
            .extract_detail(&html, url)
            .ok_or_else(|| FetchError::Unextractable {
                url: url.to_string(),
            })
    }

    /// Re-open the detail page, locate and trigger its download affordance,
    /// then poll for the file. `Ok(None)` means no affordance or the bounded
    /// wait expired; the record is still persisted without a link.
    pub async fn fetch_attachment(
        &self,
        detail: &ThesisDetail,
    ) -> Result<Option<PathBuf>, DriverError> {
        self.nav_limiter.until_ready().await;

        // One critical section from navigation through the download poll,
        // see `page_lock`. Another worker may have moved the cursor since
        // this item's detail fetch, so the page is opened again here.
        let _guard = self.page_lock.lock().await;
        self.driver.navigate(&detail.detail_url).await?;
        self.driver.wait_for_body(self.body_wait).await?;

        let affordance = match self.find_download_affordance().await? {
            Some(handle) => handle,
            None => {
                info!("no download affordance on {}", detail.detail_url);
                return Ok(None);
            }
        };

        self.driver.click(&affordance).await?;

        match self.driver.poll_download(self.download_timeout).await? {
            Some(path) => {
                debug!("attachment for {} at {}", detail.detail_url, path.display());
                Ok(Some(path))
            }
            None => {
                warn!(
                    "download did not materialize within {:?} for {}",
                    self.download_timeout, detail.detail_url
                );
                Ok(None)
            }
        }
    }

    /// Ordered affordance ladder; the first query yielding any element wins.
    async fn find_download_affordance(&self) -> Result<Option<crate::infrastructure::browser::ElementHandle>, DriverError> {
        let ladder = [
            ElementQuery::AccessibleName("Descargar".to_string()),
            ElementQuery::Css("a.icono-descarga, button.icono-descarga".to_string()),
            ElementQuery::Css("a[href$='.pdf']".to_string()),
        ];

        for query in &ladder {
            let handles = self.driver.find_all(query).await?;
            if let Some(handle) = handles.into_iter().next() {
                debug!("download affordance via {}", query);
                return Ok(Some(handle));
            }
        }

        // Last resort: any link/button whose visible label mentions a
        // download-like keyword.
        for keyword in DOWNLOAD_KEYWORDS {
            let query = ElementQuery::TextContains(keyword.to_string());
            let handles = self.driver.find_all(&query).await?;
            if let Some(handle) = handles
                .into_iter()
                .find(|h| h.text.to_lowercase().contains(keyword))
            {
                debug!("download affordance via keyword '{}'", keyword);
                return Ok(Some(handle));
            }
        }

        Ok(None)
    }
}
