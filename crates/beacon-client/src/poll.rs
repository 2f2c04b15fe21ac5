use crate::{
    processor::{InitSignal, UpdateProcessor},
    requestor::Requestor,
    Config,
};
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tokio::task::JoinHandle;

/// The polling update processor, used when streaming is disabled:
/// fetches a full snapshot through the requestor on a fixed interval and
/// installs it with `store.init`.
pub struct PollingProcessor {
    interval: Duration,
    store: Arc<dyn Store>,
    requestor: Arc<Requestor>,
    task: Option<JoinHandle<()>>,
}

impl PollingProcessor {
    pub fn new(config: &Config, store: Arc<dyn Store>, requestor: Arc<Requestor>) -> Self {
        PollingProcessor {
            interval: config.poll_interval,
            store,
            requestor,
            task: None,
        }
    }
}

impl UpdateProcessor for PollingProcessor {
    fn start(&mut self, init: InitSignal) {
        let interval = self.interval;
        let store = self.store.clone();
        let requestor = self.requestor.clone();
        self.task = Some(tokio::spawn(run(interval, store, requestor, init)));
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollingProcessor {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    interval: Duration,
    store: Arc<dyn Store>,
    requestor: Arc<Requestor>,
    init: InitSignal,
) {
    let mut init = Some(init);

    loop {
        match requestor.request_all_data().await {
            Ok(data) => {
                store.init(data);
                if let Some(init) = init.take() {
                    let _ = init.send(Ok(()));
                }
            }
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, "polling request failed; will poll again");
            }
            Err(err) => {
                tracing::error!(error = %err, "permanent polling failure; shutting down");
                if let Some(init) = init.take() {
                    let _ = init.send(Err(err));
                }
                return;
            }
        }

        tokio::time::sleep(interval).await;
    }
}
