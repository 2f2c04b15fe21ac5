use crate::Error;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use std::time::Duration;
use url::Url;

const DEFAULT_BASE_URI: &str = "https://sdk.beacon.dev";
const DEFAULT_STREAM_URI: &str = "https://stream.beacon.dev";
const DEFAULT_EVENTS_URI: &str = "https://events.beacon.dev";

const DEFAULT_USER_AGENT: &str = concat!("BeaconClient/", env!("CARGO_PKG_VERSION"));

/// The polling interval never drops below this, whatever the builder asks.
const MINIMUM_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound proxy settings, applied to every connection the client makes.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Basic-auth credentials, if the proxy requires them.
    pub auth: Option<(String, String)>,
}

/// Additional TLS trust and client-certificate material, in PEM form.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub ca: Option<Vec<u8>>,
    /// Concatenated client certificate and key.
    pub identity: Option<Vec<u8>>,
}

/// Validated client configuration. Build one with [`ConfigBuilder`].
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) sdk_key: String,
    pub(crate) base_uri: Url,
    pub(crate) stream_uri: Url,
    pub(crate) events_uri: Url,
    pub(crate) stream: bool,
    pub(crate) offline: bool,
    pub(crate) use_ldd: bool,
    pub(crate) send_events: bool,
    pub(crate) diagnostic_opt_out: bool,
    pub(crate) stream_initial_reconnect_delay: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) wrapper: Option<String>,
    pub(crate) proxy: Option<ProxyConfig>,
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) user_agent: String,
}

impl Config {
    /// Default headers carried on every request: SDK-key authorization,
    /// user agent, and the wrapper tag when configured.
    pub(crate) fn default_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&self.sdk_key)
            .map_err(|_| Error::InvalidConfig("SDK key contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| Error::InvalidConfig("user agent contains invalid characters".into()))?,
        );
        if let Some(wrapper) = &self.wrapper {
            headers.insert(
                "X-Beacon-Wrapper",
                HeaderValue::from_str(wrapper).map_err(|_| {
                    Error::InvalidConfig("wrapper name contains invalid characters".into())
                })?,
            );
        }
        Ok(headers)
    }

    /// One HTTP client, shared by the requestor and both processors.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .default_headers(self.default_headers()?)
            .connect_timeout(self.connect_timeout);

        if let Some(proxy) = &self.proxy {
            let uri = format!("{}://{}:{}", proxy.scheme, proxy.host, proxy.port);
            let mut p = reqwest::Proxy::all(&uri)
                .map_err(|err| Error::InvalidConfig(format!("invalid proxy {uri}: {err}")))?;
            if let Some((user, pass)) = &proxy.auth {
                p = p.basic_auth(user, pass);
            }
            builder = builder.proxy(p);
        }

        if let Some(tls) = &self.tls {
            if let Some(ca) = &tls.ca {
                let cert = reqwest::Certificate::from_pem(ca)
                    .map_err(|err| Error::InvalidConfig(format!("invalid CA certificate: {err}")))?;
                builder = builder.add_root_certificate(cert);
            }
            if let Some(identity) = &tls.identity {
                let identity = reqwest::Identity::from_pem(identity)
                    .map_err(|err| Error::InvalidConfig(format!("invalid client identity: {err}")))?;
                builder = builder.identity(identity);
            }
        }

        builder.build().map_err(Error::Http)
    }
}

/// Builder for [`Config`]. Only the SDK key is required.
pub struct ConfigBuilder {
    sdk_key: String,
    base_uri: String,
    stream_uri: String,
    events_uri: String,
    stream: bool,
    offline: bool,
    use_ldd: bool,
    send_events: bool,
    diagnostic_opt_out: bool,
    stream_initial_reconnect_delay: Duration,
    poll_interval: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
    wrapper_name: Option<String>,
    wrapper_version: Option<String>,
    proxy: Option<ProxyConfig>,
    tls: Option<TlsConfig>,
    user_agent: String,
}

impl ConfigBuilder {
    pub fn new(sdk_key: impl Into<String>) -> Self {
        ConfigBuilder {
            sdk_key: sdk_key.into(),
            base_uri: DEFAULT_BASE_URI.into(),
            stream_uri: DEFAULT_STREAM_URI.into(),
            events_uri: DEFAULT_EVENTS_URI.into(),
            stream: true,
            offline: false,
            use_ldd: false,
            send_events: true,
            diagnostic_opt_out: false,
            stream_initial_reconnect_delay: Duration::from_secs(1),
            poll_interval: MINIMUM_POLL_INTERVAL,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            wrapper_name: None,
            wrapper_version: None,
            proxy: None,
            tls: None,
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }

    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = uri.into();
        self
    }

    pub fn stream_uri(mut self, uri: impl Into<String>) -> Self {
        self.stream_uri = uri.into();
        self
    }

    pub fn events_uri(mut self, uri: impl Into<String>) -> Self {
        self.events_uri = uri.into();
        self
    }

    /// Choose streaming (default) or polling for rule-data updates.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// An offline client runs no update processor and sends no events.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Daemon mode: the store is populated out-of-band, so the client
    /// runs no update processor and treats itself as initialized.
    pub fn use_ldd(mut self, use_ldd: bool) -> Self {
        self.use_ldd = use_ldd;
        self
    }

    pub fn send_events(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    pub fn diagnostic_opt_out(mut self, opt_out: bool) -> Self {
        self.diagnostic_opt_out = opt_out;
        self
    }

    /// Initial delay before a stream reconnect. Takes a `Duration`, which
    /// expresses both the seconds and the milliseconds forms losslessly.
    pub fn stream_initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.stream_initial_reconnect_delay = delay;
        self
    }

    /// Polling interval; values under 30 s are raised to the floor.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn wrapper(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.wrapper_name = Some(name.into());
        self.wrapper_version = Some(version.into());
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        if self.sdk_key.is_empty() {
            return Err(Error::InvalidConfig("SDK key is required".into()));
        }

        let parse = |name: &str, uri: &str| -> Result<Url, Error> {
            Url::parse(uri.trim_end_matches('/'))
                .map_err(|err| Error::InvalidConfig(format!("invalid {name} '{uri}': {err}")))
        };

        let poll_interval = self.poll_interval.max(MINIMUM_POLL_INTERVAL);
        if poll_interval > self.poll_interval {
            tracing::warn!(
                requested = ?self.poll_interval,
                floor = ?MINIMUM_POLL_INTERVAL,
                "poll interval raised to the minimum"
            );
        }

        let wrapper = match (&self.wrapper_name, &self.wrapper_version) {
            (Some(name), Some(version)) => Some(format!("{name}/{version}")),
            (Some(name), None) => Some(name.clone()),
            _ => None,
        };

        Ok(Config {
            base_uri: parse("base URI", &self.base_uri)?,
            stream_uri: parse("stream URI", &self.stream_uri)?,
            events_uri: parse("events URI", &self.events_uri)?,
            sdk_key: self.sdk_key,
            stream: self.stream,
            offline: self.offline,
            use_ldd: self.use_ldd,
            send_events: self.send_events,
            diagnostic_opt_out: self.diagnostic_opt_out,
            stream_initial_reconnect_delay: self.stream_initial_reconnect_delay,
            poll_interval,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            wrapper,
            proxy: self.proxy,
            tls: self.tls,
            user_agent: self.user_agent,
        })
    }
}
