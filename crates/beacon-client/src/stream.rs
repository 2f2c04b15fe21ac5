use crate::{
    diagnostics::DiagnosticsSink,
    processor::{InitSignal, UpdateProcessor},
    requestor::Requestor,
    sse::{SseDecoder, SseEvent},
    Config, Error,
};
use futures::StreamExt;
use rand::Rng;
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use store::{AllData, DataKind, Item, Store};
use tokio::task::JoinHandle;

/// A connection that stays up this long resets the backoff.
const RESET_INTERVAL: Duration = Duration::from_secs(60);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// The streaming update processor: owns one server-sent-events connection
/// to `${stream_uri}/all` and applies its `put`/`patch`/`delete` and
/// `indirect/*` events to the store.
///
/// Reconnects with jittered exponential backoff on recoverable errors;
/// shuts down (and reports failure, if init is still pending) on
/// permanent ones. A malformed event is dropped without disturbing the
/// connection.
pub struct StreamingProcessor {
    params: StreamParams,
    task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
struct StreamParams {
    http: reqwest::Client,
    url: String,
    initial_delay: Duration,
    store: Arc<dyn Store>,
    requestor: Arc<Requestor>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl StreamingProcessor {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        requestor: Arc<Requestor>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self, Error> {
        Ok(StreamingProcessor {
            params: StreamParams {
                http: config.http_client()?,
                url: format!("{}/all", config.stream_uri.as_str().trim_end_matches('/')),
                initial_delay: config.stream_initial_reconnect_delay,
                store,
                requestor,
                diagnostics,
            },
            task: None,
        })
    }
}

impl UpdateProcessor for StreamingProcessor {
    fn start(&mut self, init: InitSignal) {
        let params = self.params.clone();
        self.task = Some(tokio::spawn(run(params, init)));
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StreamingProcessor {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(params: StreamParams, init: InitSignal) {
    let mut init = Some(init);
    let mut attempt: u32 = 0;
    let mut base_delay = params.initial_delay;

    loop {
        let connected_at = Instant::now();
        let outcome = connect_once(&params, &mut init, &mut base_delay).await;
        let connection_lived = connected_at.elapsed();

        match outcome {
            Ok(()) => {
                tracing::info!("stream ended; reconnecting");
            }
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, attempt, "stream interrupted; will retry");
            }
            Err(err) => {
                tracing::error!(error = %err, "permanent streaming failure; shutting down");
                if let Some(init) = init.take() {
                    let _ = init.send(Err(err));
                }
                return;
            }
        }

        if connection_lived >= RESET_INTERVAL {
            attempt = 0;
        }
        let delay = backoff_delay(base_delay, attempt);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

/// Establishes the stream and consumes it until it errors or the server
/// closes it. `Ok` means a clean close.
async fn connect_once(
    params: &StreamParams,
    init: &mut Option<InitSignal>,
    base_delay: &mut Duration,
) -> Result<(), Error> {
    let started = SystemTime::now();
    let begun = Instant::now();

    let connect = async {
        let response = params
            .http
            .get(&params.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }
        Ok(response)
    };

    let response = match connect.await {
        Ok(response) => {
            params
                .diagnostics
                .record_stream_init(started, false, begun.elapsed());
            response
        }
        Err(err) => {
            params
                .diagnostics
                .record_stream_init(started, true, begun.elapsed());
            return Err(err);
        }
    };

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(Error::Http)?;

        for event in decoder.decode(&chunk) {
            match apply_event(params.store.as_ref(), &params.requestor, &event).await {
                Ok(true) => {
                    if let Some(init) = init.take() {
                        let _ = init.send(Ok(()));
                    }
                }
                Ok(false) => {}
                // Malformed payloads are dropped; the connection survives.
                Err(err @ Error::ParseJson { .. }) => {
                    tracing::error!(event = %event.name, error = %err, "dropping malformed event");
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(event = %event.name, error = %err, "event application failed");
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(retry) = decoder.take_retry() {
            tracing::debug!(?retry, "server adjusted the reconnect delay");
            *base_delay = retry;
        }
    }

    Ok(())
}

/// Applies one stream event to the store. Returns true when a full
/// snapshot was installed (`put` and `indirect/put`), which completes
/// initialization.
pub(crate) async fn apply_event(
    store: &dyn Store,
    requestor: &Requestor,
    event: &SseEvent,
) -> Result<bool, Error> {
    match event.name.as_str() {
        "put" => {
            let payload: PutPayload = parse(&event.data, "put event")?;
            store.init(payload.data);
            Ok(true)
        }
        "patch" => {
            let payload: PatchPayload = parse(&event.data, "patch event")?;
            let Some((kind, _)) = DataKind::for_path(&payload.path) else {
                tracing::debug!(path = %payload.path, "patch for unrecognized path");
                return Ok(false);
            };
            let item = Item::from_json(kind, payload.data)
                .map_err(|err| Error::parse_json("patch event item", err))?;
            store.upsert(item);
            Ok(false)
        }
        "delete" => {
            let payload: DeletePayload = parse(&event.data, "delete event")?;
            let Some((kind, key)) = DataKind::for_path(&payload.path) else {
                tracing::debug!(path = %payload.path, "delete for unrecognized path");
                return Ok(false);
            };
            store.delete(kind, key, payload.version);
            Ok(false)
        }
        "indirect/put" => {
            let data = requestor.request_all_data().await?;
            store.init(data);
            Ok(true)
        }
        "indirect/patch" => {
            let path = event.data.as_str();
            let Some((kind, key)) = DataKind::for_path(path) else {
                tracing::debug!(%path, "indirect patch for unrecognized path");
                return Ok(false);
            };
            let item = requestor.request_object(kind, key).await?;
            store.upsert(item);
            Ok(false)
        }
        other => {
            tracing::debug!(event = %other, "ignoring unrecognized stream event");
            Ok(false)
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: &str, context: &'static str) -> Result<T, Error> {
    serde_json::from_str(data).map_err(|err| Error::parse_json(context, err))
}

#[derive(serde::Deserialize)]
struct PutPayload {
    #[serde(default)]
    #[allow(dead_code)]
    path: Option<String>,
    data: AllData,
}

#[derive(serde::Deserialize)]
struct PatchPayload {
    path: String,
    data: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct DeletePayload {
    path: String,
    version: u64,
}

/// Exponential backoff from `base`, capped, with half the delay jittered.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16)).min(MAX_RECONNECT_DELAY);
    let half = exp / 2;
    let jitter = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
    half + Duration::from_millis(jitter)
}
