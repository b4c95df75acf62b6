//! Policy-driven request layer for background lookups.
//!
//! One logical request may fan out into several attempts (retry with capped,
//! jittered exponential backoff on configured statuses). Successful GETs can
//! be cached, and concurrent identical GETs can share a single execution.

use futures::future::{BoxFuture, FutureExt, WeakShared};
use pipsync_core::HttpPolicy;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::error::HttpError;
use crate::executor::{HttpRequest, HttpResponse, RequestExecutor, ReqwestExecutor};
use crate::retry::{backoff_delay, should_retry_status};

type ResponseFuture = BoxFuture<'static, Result<HttpResponse, HttpError>>;

/// Source of jitter samples in `[0, 1)`.
pub type JitterSource = Arc<dyn Fn() -> f64 + Send + Sync>;

struct InFlight {
    token: u64,
    future: WeakShared<ResponseFuture>,
}

struct ClientInner {
    policy: HttpPolicy,
    executor: Arc<dyn RequestExecutor>,
    jitter: JitterSource,
    cache: Mutex<ResponseCache>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_token: Mutex<u64>,
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    /// Client backed by reqwest.
    pub fn new(policy: HttpPolicy) -> Self {
        let backstop = Duration::from_millis(policy.timeout_ms.saturating_mul(2).max(1_000));
        Self::with_executor(policy, Arc::new(ReqwestExecutor::new(backstop)))
    }

    pub fn with_executor(policy: HttpPolicy, executor: Arc<dyn RequestExecutor>) -> Self {
        Self::with_parts(policy, executor, Arc::new(rand::random::<f64>))
    }

    pub fn with_parts(
        policy: HttpPolicy,
        executor: Arc<dyn RequestExecutor>,
        jitter: JitterSource,
    ) -> Self {
        let cache = ResponseCache::new(policy.cache.max_entries);
        Self {
            inner: Arc::new(ClientInner {
                policy,
                executor,
                jitter,
                cache: Mutex::new(cache),
                in_flight: Mutex::new(HashMap::new()),
                next_token: Mutex::new(0),
            }),
        }
    }

    pub fn policy(&self) -> &HttpPolicy {
        &self.inner.policy
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.send(HttpRequest::get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        self.get(url).await?.json()
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let policy = self.inner.policy.clone();
        self.send_with(request, &policy).await
    }

    /// Send with a per-call policy override.
    pub async fn send_with(
        &self,
        request: HttpRequest,
        policy: &HttpPolicy,
    ) -> Result<HttpResponse, HttpError> {
        let key = request.key();
        let cacheable = request.is_idempotent_read() && policy.cache.enabled;

        if cacheable {
            if let Some(hit) = lock(&self.inner.cache).get(&key) {
                debug!(url = %request.url, "HTTP cache hit");
                return Ok(hit);
            }
        }

        let ttl = Duration::from_millis(policy.cache.default_ttl_ms);

        let result = if policy.dedupe && request.is_idempotent_read() {
            self.send_shared(key.clone(), request, policy.clone()).await
        } else {
            execute_with_retry(self.inner.clone(), request, policy.clone()).await
        };

        if cacheable {
            if let Ok(response) = &result {
                lock(&self.inner.cache).insert(key, response.clone(), ttl);
            }
        }
        result
    }

    async fn send_shared(
        &self,
        key: String,
        request: HttpRequest,
        policy: HttpPolicy,
    ) -> Result<HttpResponse, HttpError> {
        let future = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key).and_then(|f| f.future.upgrade()) {
                Some(existing) => {
                    debug!(key = %key, "Joining in-flight request");
                    existing
                }
                None => {
                    let token = {
                        let mut next = lock(&self.inner.next_token);
                        *next += 1;
                        *next
                    };
                    let future = run_and_release(self.inner.clone(), key.clone(), token, request, policy)
                        .boxed()
                        .shared();
                    // Only waiters keep the request alive; once they are all
                    // gone the entry can no longer be joined.
                    if let Some(weak) = future.downgrade() {
                        in_flight.insert(key, InFlight { token, future: weak });
                    }
                    future
                }
            }
        };
        future.await
    }

    /// Drop every cached response and forget in-flight requests. Callers
    /// already awaiting a shared request still receive its result.
    pub fn clear(&self) {
        lock(&self.inner.cache).clear();
        lock(&self.inner.in_flight).clear();
    }

    pub fn cached_entries(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    /// Requests that still have at least one waiter.
    pub fn in_flight(&self) -> usize {
        let mut in_flight = lock(&self.inner.in_flight);
        in_flight.retain(|_, f| f.future.upgrade().is_some());
        in_flight.len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Execute, then drop the in-flight entry registered under `token`. Runs
/// inside the shared future, so whichever waiter drives it to completion
/// releases the key.
async fn run_and_release(
    inner: Arc<ClientInner>,
    key: String,
    token: u64,
    request: HttpRequest,
    policy: HttpPolicy,
) -> Result<HttpResponse, HttpError> {
    let result = execute_with_retry(inner.clone(), request, policy).await;
    {
        let mut in_flight = lock(&inner.in_flight);
        if in_flight.get(&key).map(|f| f.token) == Some(token) {
            in_flight.remove(&key);
        }
    }
    result
}

async fn execute_with_retry(
    inner: Arc<ClientInner>,
    request: HttpRequest,
    policy: HttpPolicy,
) -> Result<HttpResponse, HttpError> {
    let max_attempts = policy.retry.max_attempts.max(1);
    let timeout = Duration::from_millis(policy.timeout_ms);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(timeout, inner.executor.execute(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout {
                after_ms: policy.timeout_ms,
            }),
        };

        match outcome {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) => {
                let retryable = should_retry_status(&policy.retry, response.status);
                if retryable && attempt < max_attempts {
                    let delay = backoff_delay(&policy.retry, attempt, (inner.jitter)());
                    warn!(
                        url = %request.url,
                        status = response.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable HTTP status, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(HttpError::Status {
                    status: response.status,
                    body: response.body,
                });
            }
            Err(e) => {
                warn!(url = %request.url, attempt, error = %e, "HTTP request failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with queued statuses, repeating the last one.
    struct ScriptedExecutor {
        statuses: Vec<u16>,
        calls: AtomicUsize,
        delay: Duration,
        seen_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedExecutor {
        fn new(statuses: Vec<u16>) -> Arc<Self> {
            Self::slow(statuses, Duration::ZERO)
        }

        fn slow(statuses: Vec<u16>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                statuses,
                calls: AtomicUsize::new(0),
                delay,
                seen_at: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestExecutor for ScriptedExecutor {
        async fn execute(&self, _request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_at.lock().unwrap().push(tokio::time::Instant::now());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let status = *self
                .statuses
                .get(n)
                .or(self.statuses.last())
                .unwrap_or(&200);
            Ok(HttpResponse {
                status,
                body: format!("{{\"n\":{}}}", n),
            })
        }
    }

    fn policy() -> HttpPolicy {
        let mut p = HttpPolicy::default();
        p.retry.max_attempts = 3;
        p.retry.base_delay_ms = 100;
        p.retry.max_delay_ms = 150;
        p.retry.jitter_ratio = 0.2;
        p.retry.retry_on_statuses = vec![503];
        p
    }

    fn client(policy: HttpPolicy, executor: Arc<ScriptedExecutor>) -> HttpClient {
        HttpClient::with_parts(policy, executor, Arc::new(|| 0.5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_at_max_attempts() {
        let exec = ScriptedExecutor::new(vec![503]);
        let http = client(policy(), exec.clone());

        let result = http.get("https://example.com/thumb").await;

        assert_eq!(
            result,
            Err(HttpError::Status {
                status: 503,
                body: "{\"n\":2}".into()
            })
        );
        assert_eq!(exec.calls(), 3);
        let seen = exec.seen_at.lock().unwrap().clone();
        for pair in seen.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap <= Duration::from_millis(150), "gap {:?}", gap);
            assert!(gap > Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_fails_fast() {
        let exec = ScriptedExecutor::new(vec![404]);
        let http = client(policy(), exec.clone());
        let result = http.get("https://example.com/missing").await;
        assert!(matches!(result, Err(HttpError::Status { status: 404, .. })));
        assert_eq!(exec.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_status() {
        let exec = ScriptedExecutor::new(vec![503, 200]);
        let http = client(policy(), exec.clone());
        let response = http.get("https://example.com/a").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_retried() {
        let exec = ScriptedExecutor::slow(vec![200], Duration::from_secs(10));
        let mut p = policy();
        p.timeout_ms = 50;
        let http = client(p, exec.clone());
        let result = http.get("https://example.com/slow").await;
        assert_eq!(result, Err(HttpError::Timeout { after_ms: 50 }));
        assert_eq!(exec.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_response_skips_network() {
        let exec = ScriptedExecutor::new(vec![200]);
        let http = client(policy(), exec.clone());
        http.get("https://example.com/a").await.unwrap();
        http.get("https://example.com/a").await.unwrap();
        assert_eq!(exec.calls(), 1);
        assert_eq!(http.cached_entries(), 1);

        http.clear();
        assert_eq!(http.cached_entries(), 0);
        http.get("https://example.com/a").await.unwrap();
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_override_disables_cache() {
        let exec = ScriptedExecutor::new(vec![200]);
        let http = client(policy(), exec.clone());
        let mut no_cache = policy();
        no_cache.cache.enabled = false;
        http.send_with(HttpRequest::get("https://example.com/a"), &no_cache)
            .await
            .unwrap();
        http.send_with(HttpRequest::get("https://example.com/a"), &no_cache)
            .await
            .unwrap();
        assert_eq!(exec.calls(), 2);
        assert_eq!(http.cached_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_call() {
        let exec = ScriptedExecutor::slow(vec![200], Duration::from_millis(20));
        let mut p = policy();
        p.cache.enabled = false;
        let http = client(p, exec.clone());

        let (a, b, c) = tokio::join!(
            http.get("https://example.com/a"),
            http.get("https://example.com/a"),
            http.get("https://example.com/a"),
        );
        assert_eq!(a.unwrap(), b.clone().unwrap());
        assert_eq!(b.unwrap(), c.unwrap());
        assert_eq!(exec.calls(), 1);
        assert_eq!(http.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_pin_the_key() {
        let exec = ScriptedExecutor::slow(vec![404, 200], Duration::from_millis(50));
        let mut p = policy();
        p.cache.enabled = false;
        let http = client(p, exec.clone());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), http.get("https://example.com/a")).await;
        assert!(cancelled.is_err());
        assert_eq!(http.in_flight(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        let response = http.get("https://example.com/a").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(exec.calls(), 2);
        assert_eq!(http.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_request_survives_first_caller_cancel() {
        let exec = ScriptedExecutor::slow(vec![200, 500], Duration::from_millis(50));
        let mut p = policy();
        p.cache.enabled = false;
        let http = client(p, exec.clone());

        let owner = tokio::spawn({
            let http = http.clone();
            async move { http.get("https://example.com/a").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let joiner = tokio::spawn({
            let http = http.clone();
            async move { http.get("https://example.com/a").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        owner.abort();

        let response = joiner.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(exec.calls(), 1);
        assert_eq!(http.in_flight(), 0);

        // Completion released the key, so the next call hits the network.
        let next = http.get("https://example.com/a").await;
        assert!(matches!(next, Err(HttpError::Status { status: 500, .. })));
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_is_neither_cached_nor_shared() {
        let exec = ScriptedExecutor::slow(vec![200], Duration::from_millis(20));
        let http = client(policy(), exec.clone());
        let body = serde_json::json!({ "page": "sm9" });
        let _ = tokio::join!(
            http.send(HttpRequest::post_json("https://example.com/a", &body)),
            http.send(HttpRequest::post_json("https://example.com/a", &body)),
        );
        assert_eq!(exec.calls(), 2);
        assert_eq!(http.cached_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedupe_off_runs_each_call() {
        let exec = ScriptedExecutor::slow(vec![200], Duration::from_millis(20));
        let mut p = policy();
        p.cache.enabled = false;
        p.dedupe = false;
        let http = client(p, exec.clone());
        let _ = tokio::join!(
            http.get("https://example.com/a"),
            http.get("https://example.com/a"),
        );
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_json_decodes() {
        let exec = ScriptedExecutor::new(vec![200]);
        let http = client(policy(), exec);
        let value: serde_json::Value = http.get_json("https://example.com/a").await.unwrap();
        assert_eq!(value["n"], 0);
    }
}
