//! Politeness policy for requests to the board.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Build the HTTP client shared by a crawl run.
///
/// The client keeps at most one idle connection per host so the board sees a
/// single logical connection.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .pool_max_idle_per_host(1)
        .build()
        .context("Failed to build HTTP client")
}

/// Fetches pages one at a time with a randomized delay before each request.
///
/// Clones share one permit, so every request a crawler makes to the board
/// (catalog, threads and images) waits for the previous one to finish.
#[derive(Debug, Clone)]
pub struct PoliteFetcher {
    client: reqwest::Client,
    permit: Arc<Semaphore>,
}

impl PoliteFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Wait for the permit, then sleep a random delay in `[0, max_delay]`.
    ///
    /// The returned permit must be held until the request has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the permit has been closed.
    pub async fn acquire(&self, url: &str, max_delay: Duration) -> Result<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .context("Politeness permit closed")?;

        let delay = random_delay(max_delay);
        if !delay.is_zero() {
            debug!(url = %url, delay_ms = delay.as_millis() as u64, "Waiting before request");
            tokio::time::sleep(delay).await;
        }

        Ok(permit)
    }

    /// GET `url` after a politeness delay and return the response body as text.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or an
    /// unreadable body.
    pub async fn fetch_html(&self, url: &str, max_delay: Duration) -> Result<String> {
        let _permit = self.acquire(url, max_delay).await?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Fetch of {url} failed with status {}", response.status());
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {url}"))
    }
}

fn random_delay(max_delay: Duration) -> Duration {
    let max_ms = max_delay.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_random_delay_bounded() {
        for _ in 0..100 {
            assert!(random_delay(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
        assert!(random_delay(Duration::ZERO).is_zero());
    }

    #[tokio::test]
    async fn test_clones_send_one_request_at_a_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("ok")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let fetcher = PoliteFetcher::new(reqwest::Client::new());
        let other = fetcher.clone();
        let url = format!("{}/slow", server.uri());

        let started = Instant::now();
        let (a, b) = tokio::join!(
            fetcher.fetch_html(&url, Duration::ZERO),
            other.fetch_html(&url, Duration::ZERO)
        );
        assert_eq!(a.unwrap(), "ok");
        assert_eq!(b.unwrap(), "ok");
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        let fetcher = PoliteFetcher::new(reqwest::Client::new());
        let err = fetcher
            .fetch_html(&format!("{}/missing", server.uri()), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
