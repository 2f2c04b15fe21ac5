use crate::{Config, Error};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use store::{AllData, DataKind, Item};
use url::Url;

const LATEST_ALL_PATH: &str = "/sdk/latest-all";

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, Arc<Error>>>>;

/// On-demand REST access to rule data: the full `latest-all` snapshot and
/// single items. Identical in-flight requests are coalesced onto one HTTP
/// round trip, and `ETag`-validated responses are replayed from a local
/// cache on 304.
pub struct Requestor {
    http: reqwest::Client,
    base_uri: Url,
    request_timeout: std::time::Duration,
    cache: Arc<Mutex<HashMap<String, CachedResponse>>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

#[derive(Clone)]
struct CachedResponse {
    etag: String,
    body: Bytes,
}

impl Requestor {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(Requestor {
            http: config.http_client()?,
            base_uri: config.base_uri.clone(),
            request_timeout: config.request_timeout,
            cache: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_base(http: reqwest::Client, base_uri: Url) -> Self {
        Requestor {
            http,
            base_uri,
            request_timeout: std::time::Duration::from_secs(10),
            cache: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// GET the full flag/segment snapshot.
    pub async fn request_all_data(&self) -> Result<AllData, Error> {
        let bytes = self.get(self.endpoint(LATEST_ALL_PATH)).await?;
        serde_json::from_slice(&bytes).map_err(|err| Error::parse_json("latest-all response", err))
    }

    /// GET a single item of the given kind.
    pub async fn request_object(&self, kind: DataKind, key: &str) -> Result<Item, Error> {
        let bytes = self
            .get(self.endpoint(&format!("{}{}", kind.stream_api_path(), key)))
            .await?;
        let data = serde_json::from_slice(&bytes)
            .map_err(|err| Error::parse_json("item response", err))?;
        Item::from_json(kind, data).map_err(|err| Error::parse_json("item response", err))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_uri.as_str().trim_end_matches('/'), path)
    }

    /// Coalescing GET: concurrent callers of the same URL share one fetch
    /// and all observe its result.
    async fn get(&self, url: String) -> Result<Bytes, Error> {
        let fetch = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&url) {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = fetch(
                        self.http.clone(),
                        self.cache.clone(),
                        url.clone(),
                        self.request_timeout,
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(url.clone(), fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.await;
        lock(&self.in_flight).remove(&url);
        result.map_err(Error::Shared)
    }
}

async fn fetch(
    http: reqwest::Client,
    cache: Arc<Mutex<HashMap<String, CachedResponse>>>,
    url: String,
    timeout: std::time::Duration,
) -> Result<Bytes, Arc<Error>> {
    let mut request = http.get(&url).timeout(timeout);
    let cached = lock(&cache).get(&url).cloned();
    if let Some(cached) = &cached {
        request = request.header(IF_NONE_MATCH, &cached.etag);
    }

    let response = request.send().await.map_err(|err| Arc::new(err.into()))?;
    let status = response.status();

    if status == StatusCode::NOT_MODIFIED {
        if let Some(cached) = cached {
            tracing::debug!(%url, "serving cached response for 304");
            return Ok(cached.body);
        }
        // A 304 without a cache entry shouldn't happen; treat as an error.
        return Err(Arc::new(Error::HttpStatus(status)));
    }
    if !status.is_success() {
        return Err(Arc::new(Error::HttpStatus(status)));
    }

    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await.map_err(|err| Arc::new(err.into()))?;

    if let Some(etag) = etag {
        lock(&cache).insert(
            url,
            CachedResponse {
                etag,
                body: body.clone(),
            },
        );
    }

    Ok(body)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
