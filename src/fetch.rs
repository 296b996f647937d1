use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

/// Page acquisition capability.
///
/// An `Err` or an empty body means the page could not be acquired; callers
/// never look further into transport errors than that.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, ready_selector: Option<&str>) -> anyhow::Result<String>;

    /// Releases held transport resources.
    async fn shutdown(&self) {}
}

type SessionOpener<S> = Box<dyn Fn() -> anyhow::Result<S> + Send + Sync>;

/// Bounded pool of transport sessions.
///
/// Sessions are opened lazily, at most `capacity` exist at once, and each is
/// held by exactly one caller until its guard drops.
pub struct SessionPool<S> {
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<S>>>,
    open: SessionOpener<S>,
}

impl<S: Send + 'static> SessionPool<S> {
    pub fn new<F>(capacity: usize, open: F) -> Self
    where
        F: Fn() -> anyhow::Result<S> + Send + Sync + 'static,
    {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
            open: Box::new(open),
        }
    }

    pub async fn acquire(&self) -> anyhow::Result<PooledSession<S>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("session pool is closed")?;

        let reused = self
            .idle
            .lock()
            .map_err(|_| anyhow::anyhow!("session pool lock poisoned"))?
            .pop();
        let session = match reused {
            Some(session) => session,
            None => {
                tracing::debug!("opening transport session");
                (self.open)().context("open transport session")?
            }
        };

        Ok(PooledSession {
            session: Some(session),
            idle: Arc::clone(&self.idle),
            permits: Arc::clone(&self.permits),
            _permit: permit,
        })
    }

    /// Number of sessions waiting for reuse.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Refuses further acquisitions and drops idle sessions. Sessions still
    /// checked out are dropped when their guards are.
    pub fn close(&self) {
        self.permits.close();
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }
}

/// A checked-out session; returned to the pool on drop.
pub struct PooledSession<S> {
    session: Option<S>,
    idle: Arc<Mutex<Vec<S>>>,
    permits: Arc<Semaphore>,
    _permit: OwnedSemaphorePermit,
}

impl<S> Deref for PooledSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session
            .as_ref()
            .unwrap_or_else(|| unreachable!("session taken before drop"))
    }
}

impl<S> DerefMut for PooledSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session
            .as_mut()
            .unwrap_or_else(|| unreachable!("session taken before drop"))
    }
}

impl<S> Drop for PooledSession<S> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if self.permits.is_closed() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(session);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub page_timeout: Duration,
    /// Wait after the body arrives, while the session is still held.
    pub render_grace: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            page_timeout: Duration::from_secs(20),
            render_grace: Duration::from_secs(1),
        }
    }
}

impl HttpFetcherConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(user_agent) = std::env::var("BOOKFETCH_USER_AGENT")
            && !user_agent.trim().is_empty()
        {
            config.user_agent = user_agent.trim().to_owned();
        }
        config
    }
}

/// HTTP transport with one `reqwest::Client` per pooled session.
pub struct HttpFetcher {
    config: HttpFetcherConfig,
    pool: SessionPool<reqwest::Client>,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig, sessions: usize) -> Self {
        let client_config = config.clone();
        let pool = SessionPool::new(sessions, move || {
            reqwest::Client::builder()
                .timeout(client_config.page_timeout)
                .redirect(reqwest::redirect::Policy::limited(10))
                .user_agent(client_config.user_agent.clone())
                .build()
                .context("build http client")
        });
        Self { config, pool }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, ready_selector: Option<&str>) -> anyhow::Result<String> {
        let session = self.pool.acquire().await?;
        tracing::debug!(url, "fetch page");

        let response = session
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url}: {status}");
        }
        let html = response
            .text()
            .await
            .with_context(|| format!("read body: {url}"))?;

        if !self.config.render_grace.is_zero() {
            tokio::time::sleep(self.config.render_grace).await;
        }
        drop(session);

        if let Some(selector) = ready_selector {
            match contains_selector(&html, selector) {
                Ok(true) => tracing::debug!(url, selector, "ready element present"),
                Ok(false) => {
                    tracing::debug!(url, selector, "ready element missing; continuing")
                }
                Err(err) => tracing::debug!(url, ?err, "ready selector check skipped"),
            }
        }

        tracing::debug!(url, len = html.len(), "page fetched");
        Ok(html)
    }

    async fn shutdown(&self) {
        self.pool.close();
    }
}

fn contains_selector(html: &str, selector: &str) -> anyhow::Result<bool> {
    let parsed = scraper::Selector::parse(selector)
        .map_err(|err| anyhow::anyhow!("invalid selector {selector:?}: {err:?}"))?;
    let document = scraper::Html::parse_document(html);
    Ok(document.select(&parsed).next().is_some())
}
