use crate::{
    diagnostics::{DiagnosticsSink, NullDiagnosticsSink},
    events::{Event, EventSink, NullEventSink},
    flags_state::{FlagsState, FlagsStateOptions},
    poll::PollingProcessor,
    processor::{NullUpdateProcessor, UpdateProcessor},
    requestor::Requestor,
    stream::StreamingProcessor,
    Config, Error,
};
use eval::{Detail, ErrorKind, Lookup, User};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use store::{AllData, DataKind, Item, MemoryStore, Store, StoreUpdates};
use tokio::sync::{oneshot, watch};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum InitState {
    Initializing,
    Ready,
    Failed,
}

/// The feature-flag client.
///
/// Owns the local rule-data store and the update processor feeding it.
/// Evaluation (`variation`, `variation_detail`, `all_flags_state`) is a
/// purely local computation and never blocks on the network.
pub struct Client {
    config: Config,
    store: Arc<StoreUpdates<MemoryStore>>,
    processor: Mutex<Box<dyn UpdateProcessor>>,
    events: Arc<dyn EventSink>,
    init_state: watch::Receiver<InitState>,
    init_publisher: Mutex<Option<watch::Sender<InitState>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl Client {
    /// Builds a client with no-op analytics and diagnostics sinks.
    pub fn build(config: Config) -> Result<Client, Error> {
        Self::build_with(config, Arc::new(NullEventSink), Arc::new(NullDiagnosticsSink))
    }

    /// Builds a client with caller-provided collaborator sinks.
    pub fn build_with(
        config: Config,
        events: Arc<dyn EventSink>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Client, Error> {
        let store = Arc::new(StoreUpdates::new(MemoryStore::new()));

        // Event suppression is governed by `send_events` alone; an offline
        // client with events enabled still hands them to the sink.
        let events: Arc<dyn EventSink> = if config.send_events {
            events
        } else {
            Arc::new(NullEventSink)
        };
        let diagnostics: Arc<dyn DiagnosticsSink> = if config.diagnostic_opt_out {
            Arc::new(NullDiagnosticsSink)
        } else {
            diagnostics
        };

        let processor: Box<dyn UpdateProcessor> = if config.offline || config.use_ldd {
            Box::new(NullUpdateProcessor)
        } else {
            let requestor = Arc::new(Requestor::new(&config)?);
            let data_store: Arc<dyn Store> = store.clone();
            if config.stream {
                Box::new(StreamingProcessor::new(
                    &config,
                    data_store,
                    requestor,
                    diagnostics,
                )?)
            } else {
                Box::new(PollingProcessor::new(&config, data_store, requestor))
            }
        };

        let (tx, rx) = watch::channel(InitState::Initializing);
        Ok(Client {
            config,
            store,
            processor: Mutex::new(processor),
            events,
            init_state: rx,
            init_publisher: Mutex::new(Some(tx)),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Starts the update processor. Must be called from within a Tokio
    /// runtime; calling more than once has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        // Daemon mode reads a store populated out-of-band; this in-memory
        // client starts from an empty but initialized store.
        if self.config.use_ldd {
            self.store.init(AllData::default());
        }

        let Some(publisher) = lock(&self.init_publisher).take() else {
            return;
        };

        let (tx, rx) = oneshot::channel();
        lock(&self.processor).start(tx);

        tokio::spawn(async move {
            let state = match rx.await {
                Ok(Ok(())) => InitState::Ready,
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "client failed to initialize");
                    InitState::Failed
                }
                // The processor was dropped without reporting.
                Err(_) => InitState::Failed,
            };
            let _ = publisher.send(state);
        });
    }

    /// Resolves once the first rule-data snapshot is applied, or fails if
    /// the update processor hit a permanent error first.
    pub async fn wait_for_initialization(&self) -> Result<(), Error> {
        let mut rx = self.init_state.clone();
        loop {
            let state = *rx.borrow();
            match state {
                InitState::Ready => return Ok(()),
                InitState::Failed => return Err(Error::InitFailed),
                InitState::Initializing => {
                    if rx.changed().await.is_err() {
                        return Err(Error::InitFailed);
                    }
                }
            }
        }
    }

    pub fn initialized(&self) -> bool {
        *self.init_state.borrow() == InitState::Ready
    }

    /// Evaluates a flag, returning the variation value or `default`.
    pub fn variation(&self, user: &User, key: &str, default: impl Into<Value>) -> Value {
        let default = default.into();
        let detail = self.evaluate_internal(user, key, &default, false);
        detail.value.unwrap_or(default)
    }

    /// Evaluates a flag, returning the full detail (value, variation
    /// index, and reason).
    pub fn variation_detail(&self, user: &User, key: &str, default: impl Into<Value>) -> Detail {
        let default = default.into();
        self.evaluate_internal(user, key, &default, true)
    }

    pub fn bool_variation(&self, user: &User, key: &str, default: bool) -> bool {
        match self.variation(user, key, default).as_bool() {
            Some(value) => value,
            None => {
                tracing::warn!(key, "flag value is not a boolean; serving the default");
                default
            }
        }
    }

    pub fn str_variation(&self, user: &User, key: &str, default: &str) -> String {
        match self.variation(user, key, default).as_str() {
            Some(value) => value.to_string(),
            None => {
                tracing::warn!(key, "flag value is not a string; serving the default");
                default.to_string()
            }
        }
    }

    pub fn float_variation(&self, user: &User, key: &str, default: f64) -> f64 {
        match self.variation(user, key, default).as_f64() {
            Some(value) => value,
            None => {
                tracing::warn!(key, "flag value is not a number; serving the default");
                default
            }
        }
    }

    /// Like [`Client::variation_detail`] but typed: a non-boolean value
    /// yields a `WRONG_TYPE` detail carrying the default.
    pub fn bool_variation_detail(&self, user: &User, key: &str, default: bool) -> Detail {
        let detail = self.variation_detail(user, key, default);
        match detail.value {
            Some(Value::Bool(_)) | None => detail,
            Some(_) => Detail::error(ErrorKind::WrongType).or_default(&Value::Bool(default)),
        }
    }

    pub fn str_variation_detail(&self, user: &User, key: &str, default: &str) -> Detail {
        let detail = self.variation_detail(user, key, default);
        match detail.value {
            Some(Value::String(_)) | None => detail,
            Some(_) => {
                Detail::error(ErrorKind::WrongType).or_default(&Value::String(default.to_string()))
            }
        }
    }

    pub fn float_variation_detail(&self, user: &User, key: &str, default: f64) -> Detail {
        let detail = self.variation_detail(user, key, default);
        match detail.value {
            Some(Value::Number(_)) | None => detail,
            Some(_) => Detail::error(ErrorKind::WrongType).or_default(&serde_json::json!(default)),
        }
    }

    /// A snapshot of all flag values and metadata for `user`, suitable
    /// for bootstrapping client-side SDKs.
    pub fn all_flags_state(&self, user: &User, options: FlagsStateOptions) -> FlagsState {
        if !self.store.initialized() {
            tracing::warn!(
                offline = self.config.offline,
                "all_flags_state called before the store holds data"
            );
            return FlagsState::invalid();
        }
        if user.key().is_empty() {
            tracing::warn!("all_flags_state called without a user key");
            return FlagsState::invalid();
        }

        let mut state = FlagsState::new();
        for (_, item) in self.store.all(DataKind::Features) {
            let Item::Flag(flag) = item else { continue };
            if options.client_side_only && !flag.client_side {
                continue;
            }
            let result = eval::evaluate(&flag, user, self.lookup());
            state.add(&flag, &result.detail, &options);
        }
        state
    }

    /// Installs a full rule-data snapshot directly, replacing the store's
    /// contents and marking it initialized. This is how an offline client
    /// (or a test) gets data to evaluate against; clients with an update
    /// processor have no need of it, and a later `put` or poll snapshot
    /// replaces whatever was seeded.
    pub fn seed(&self, data: AllData) {
        self.store.init(data);
    }

    /// Flushes any buffered analytics events.
    pub fn flush(&self) {
        self.events.flush();
    }

    /// Shuts down the update processor, the store, and the event sink.
    /// Idempotent; evaluations after close serve defaults.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.processor).close();
        self.events.flush();
        self.events.close();
        self.store.close();
    }

    fn lookup(&self) -> &dyn Lookup {
        self.store.as_ref()
    }

    fn evaluate_internal(
        &self,
        user: &User,
        key: &str,
        default: &Value,
        with_reasons: bool,
    ) -> Detail {
        // An offline client has no update processor; it serves defaults
        // until data is seeded, and evaluates normally afterwards.
        if !self.store.initialized() {
            if self.config.offline {
                tracing::debug!(key, "offline client has no data; serving the default");
            } else {
                tracing::warn!(key, "variation called before initialization; serving the default");
            }
            return Detail::error(ErrorKind::ClientNotReady).or_default(default);
        }

        let Some(flag) = self.store.flag(key) else {
            tracing::warn!(key, "unknown feature flag; serving the default");
            self.events.send_event(Event::feature_request(
                key,
                user.clone(),
                None,
                None,
                default.clone(),
                None,
                with_reasons.then_some(eval::Reason::Error {
                    error_kind: ErrorKind::FlagNotFound,
                }),
                false,
                None,
            ));
            return Detail::error(ErrorKind::FlagNotFound).or_default(default);
        };

        let result = eval::evaluate(&flag, user, self.lookup());
        if let Some(error) = &result.error {
            tracing::warn!(key, error = %error, "flag evaluation fault");
        }

        for prereq in result.events {
            self.events
                .send_event(Event::from_prerequisite(prereq, with_reasons));
        }
        self.events.send_event(Event::feature_request(
            key,
            user.clone(),
            result.detail.value.clone(),
            result.detail.variation_index,
            default.clone(),
            Some(flag.version),
            with_reasons.then(|| result.detail.reason.clone()),
            flag.track_events,
            flag.debug_events_until_date,
        ));

        result.detail.or_default(default)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigBuilder;
    use eval::Reason;
    use serde_json::json;

    /// Records every event handed to the sink.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
        flushes: AtomicBool,
    }

    impl EventSink for RecordingSink {
        fn send_event(&self, event: Event) {
            lock(&self.events).push(event);
        }
        fn flush(&self) {
            self.flushes.store(true, Ordering::SeqCst);
        }
        fn close(&self) {}
    }

    fn offline_client() -> Client {
        let config = ConfigBuilder::new("key").offline(true).build().unwrap();
        Client::build(config).unwrap()
    }

    /// A client with no processor whose store is seeded directly.
    fn seeded_client(flags: Vec<eval::Flag>) -> (Client, Arc<RecordingSink>) {
        let config = ConfigBuilder::new("key").use_ldd(true).build().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let client = Client::build_with(config, sink.clone(), Arc::new(NullDiagnosticsSink)).unwrap();
        client.seed(AllData {
            flags: flags.into_iter().map(|f| (f.key.clone(), f)).collect(),
            segments: Default::default(),
        });
        (client, sink)
    }

    fn bool_flag(key: &str, on: bool) -> eval::Flag {
        serde_json::from_value(json!({
            "key": key,
            "version": 1,
            "on": on,
            "variations": [false, true],
            "offVariation": 0,
            "fallthrough": {"variation": 1},
            "salt": "s",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn offline_client_serves_defaults_until_seeded() {
        let client = offline_client();
        client.start();
        client.wait_for_initialization().await.unwrap();
        assert!(client.initialized());

        let user = User::with_key("u");
        let detail = client.variation_detail(&user, "go", json!("dft"));
        assert_eq!(detail.value, Some(json!("dft")));
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: ErrorKind::ClientNotReady
            }
        );
        assert!(!client.all_flags_state(&user, FlagsStateOptions::default()).valid());

        // Once data is seeded, the offline client evaluates normally.
        client.seed(AllData {
            flags: [("go".to_string(), bool_flag("go", true))].into(),
            segments: Default::default(),
        });
        let detail = client.variation_detail(&user, "go", false);
        assert_eq!(detail.value, Some(json!(true)));
        assert_eq!(detail.reason, Reason::Fallthrough);
        assert!(client.all_flags_state(&user, FlagsStateOptions::default()).valid());
    }

    #[tokio::test]
    async fn offline_client_still_reports_events_when_enabled() {
        let config = ConfigBuilder::new("key").offline(true).build().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let client =
            Client::build_with(config, sink.clone(), Arc::new(NullDiagnosticsSink)).unwrap();
        client.seed(AllData {
            flags: [("f".to_string(), bool_flag("f", true))].into(),
            segments: Default::default(),
        });

        client.variation(&User::with_key("u"), "f", false);
        assert_eq!(lock(&sink.events).len(), 1);
    }

    #[tokio::test]
    async fn uninitialized_client_is_not_ready() {
        let config = ConfigBuilder::new("key").use_ldd(true).build().unwrap();
        let client = Client::build(config).unwrap();
        // start() not called: the store has no data.
        assert!(!client.initialized());

        let detail = client.variation_detail(&User::with_key("u"), "f", false);
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: ErrorKind::ClientNotReady
            }
        );
    }

    #[tokio::test]
    async fn variations_evaluate_from_the_seeded_store() {
        let (client, _) = seeded_client(vec![bool_flag("on-flag", true), bool_flag("off-flag", false)]);
        let user = User::with_key("u");

        assert!(client.bool_variation(&user, "on-flag", false));
        assert!(!client.bool_variation(&user, "off-flag", true));

        let detail = client.variation_detail(&user, "on-flag", false);
        assert_eq!(detail.variation_index, Some(1));
        assert_eq!(detail.reason, Reason::Fallthrough);
    }

    #[tokio::test]
    async fn unknown_flags_serve_the_default_with_flag_not_found() {
        let (client, sink) = seeded_client(vec![]);
        let user = User::with_key("u");

        let detail = client.variation_detail(&user, "ghost", json!(42));
        assert_eq!(detail.value, Some(json!(42)));
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: ErrorKind::FlagNotFound
            }
        );
        // The miss still produces an analytics event.
        assert_eq!(lock(&sink.events).len(), 1);
    }

    #[tokio::test]
    async fn typed_variations_guard_against_wrong_types() {
        let (client, _) = seeded_client(vec![bool_flag("b", true)]);
        let user = User::with_key("u");

        assert_eq!(client.str_variation(&user, "b", "dft"), "dft");
        assert_eq!(client.float_variation(&user, "b", 1.5), 1.5);

        let mut string_flag = bool_flag("s", true);
        string_flag.variations = vec![json!("x"), json!("y")];
        let (client, _) = seeded_client(vec![string_flag]);
        let detail = client.bool_variation_detail(&user, "s", true);
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: ErrorKind::WrongType
            }
        );
        assert_eq!(detail.value, Some(json!(true)));
    }

    #[tokio::test]
    async fn feature_events_flow_to_the_sink() {
        let (client, sink) = seeded_client(vec![bool_flag("f", true)]);
        client.variation(&User::with_key("u"), "f", false);

        let events = lock(&sink.events);
        assert_eq!(events.len(), 1);
        let Event::FeatureRequest {
            key,
            value,
            variation,
            version,
            reason,
            ..
        } = &events[0];
        assert_eq!(key, "f");
        assert_eq!(value, &Some(json!(true)));
        assert_eq!(variation, &Some(1));
        assert_eq!(version, &Some(1));
        // variation() does not request reasons.
        assert_eq!(reason, &None);
    }

    #[tokio::test]
    async fn prerequisite_events_carry_prereq_of() {
        let parent: eval::Flag = serde_json::from_value(json!({
            "key": "parent", "version": 1, "on": true,
            "variations": [false, true],
            "offVariation": 0,
            "prerequisites": [{"key": "child", "variation": 1}],
            "fallthrough": {"variation": 1},
            "salt": "s",
        }))
        .unwrap();
        let (client, sink) = seeded_client(vec![parent, bool_flag("child", true)]);

        client.variation(&User::with_key("u"), "parent", false);

        let events = lock(&sink.events);
        assert_eq!(events.len(), 2);
        let Event::FeatureRequest { key, prereq_of, .. } = &events[0];
        assert_eq!(key, "child");
        assert_eq!(prereq_of, &Some("parent".to_string()));
    }

    #[tokio::test]
    async fn all_flags_state_reports_every_flag() {
        let (client, _) = seeded_client(vec![bool_flag("a", true), bool_flag("b", false)]);
        let state = client.all_flags_state(&User::with_key("u"), FlagsStateOptions::default());

        assert!(state.valid());
        assert_eq!(state.value("a"), Some(&json!(true)));
        assert_eq!(state.value("b"), Some(&json!(false)));

        // Round-trips through its wire form.
        let json = serde_json::to_value(&state).unwrap();
        let back: FlagsState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[tokio::test]
    async fn all_flags_state_filters_client_side_flags() {
        let mut client_side = bool_flag("cs", true);
        client_side.client_side = true;
        let (client, _) = seeded_client(vec![client_side, bool_flag("server", true)]);

        let state = client.all_flags_state(
            &User::with_key("u"),
            FlagsStateOptions {
                client_side_only: true,
                ..FlagsStateOptions::default()
            },
        );
        assert_eq!(state.keys().collect::<Vec<_>>(), ["cs"]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_flushes_events() {
        let (client, sink) = seeded_client(vec![]);
        client.close();
        client.close();
        assert!(sink.flushes.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn use_ldd_marks_the_client_ready_without_a_processor() {
        let config = ConfigBuilder::new("key").use_ldd(true).build().unwrap();
        let client = Client::build(config).unwrap();
        client.start();
        client.wait_for_initialization().await.unwrap();
        assert!(client.initialized());
        assert!(client.store.initialized());
    }
}
