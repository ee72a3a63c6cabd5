use std::{fmt, time::Duration};

/// Client-wide settings, fixed once the client is built.
#[derive(Clone, PartialEq, Eq)]
pub struct Configuration {
    /// Sent as `X-Parse-Application-Id` on every request.
    pub application_id: String,
    /// Sent as `X-Parse-Client-Key` when set.
    pub client_key: Option<String>,
    /// Master key, only sent for executions that ask for it.
    pub primary_key: Option<String>,
    /// Base URL of the REST API, e.g. `http://localhost:1337/parse`.
    pub server_url: String,
    /// Maximum number of dispatches for one execution, including the first.
    pub max_connection_attempts: u32,
    /// Timeout of a single HTTP exchange in milliseconds.
    pub request_timeout_ms: u64,
    /// Wait before a retry when the server gives no usable hint.
    pub default_retry_delay_ms: u64,
    /// Sends `X-Parse-Request-Id` on POST and PUT so retried writes can be deduplicated.
    pub idempotency: bool,
    /// Extra headers added to every request.
    pub additional_headers: Vec<(String, String)>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("application_id", &self.application_id)
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("primary_key", &self.primary_key.as_ref().map(|_| "<redacted>"))
            .field("server_url", &self.server_url)
            .field("max_connection_attempts", &self.max_connection_attempts)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("default_retry_delay_ms", &self.default_retry_delay_ms)
            .field("idempotency", &self.idempotency)
            .field("additional_headers", &self.additional_headers)
            .finish()
    }
}

impl Configuration {
    pub fn new(application_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            client_key: None,
            primary_key: None,
            server_url: server_url.into(),
            max_connection_attempts: 1,
            request_timeout_ms: 10_000,
            default_retry_delay_ms: 2_000,
            idempotency: true,
            additional_headers: Vec::new(),
        }
    }

    /// Reads the configuration from environment variables.
    ///
    /// Reads:
    /// - `PARSE_APPLICATION_ID` (required)
    /// - `PARSE_SERVER_URL` (required)
    /// - `PARSE_CLIENT_KEY`
    /// - `PARSE_PRIMARY_KEY`
    /// - `PARSE_MAX_CONNECTION_ATTEMPTS`
    pub fn from_env() -> std::result::Result<Self, String> {
        let application_id = required_env("PARSE_APPLICATION_ID")?;
        let server_url = required_env("PARSE_SERVER_URL")?;

        let mut configuration = Self::new(application_id, server_url);
        configuration.client_key = optional_env("PARSE_CLIENT_KEY");
        configuration.primary_key = optional_env("PARSE_PRIMARY_KEY");
        if let Some(attempts) = optional_env("PARSE_MAX_CONNECTION_ATTEMPTS") {
            configuration.max_connection_attempts = attempts.parse().map_err(|_| {
                format!("PARSE_MAX_CONNECTION_ATTEMPTS must be a positive integer, got '{attempts}'")
            })?;
        }
        Ok(configuration)
    }

    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }

    pub fn with_max_connection_attempts(mut self, attempts: u32) -> Self {
        self.max_connection_attempts = attempts;
        self
    }

    pub fn with_default_retry_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay_ms = delay.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }
}

fn required_env(name: &str) -> std::result::Result<String, String> {
    let value = std::env::var(name).map_err(|_| format!("missing {name} environment variable"))?;
    if value.trim().is_empty() {
        return Err(format!("{name} is set but empty"));
    }
    Ok(value)
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Which credential an execution authenticates with.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credential {
    /// Application id and client key only.
    #[default]
    Default,
    /// Acts as the user owning the session.
    SessionToken(String),
    /// Bypasses ACLs with the configured primary key.
    PrimaryKey,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::SessionToken(_) => f.write_str("SessionToken(<redacted>)"),
            Self::PrimaryKey => f.write_str("PrimaryKey"),
        }
    }
}

/// Per-execution settings.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOptions {
    pub credential: Credential,
    /// Sent as `X-Parse-Installation-Id`.
    pub installation_id: Option<String>,
    /// Passed to cloud triggers as `X-Parse-Cloud-Context`.
    pub context: Option<serde_json::Value>,
    /// Surface download progress before the terminal value.
    pub allow_intermediate_responses: bool,
    /// Runtime that streaming executions and their retries run on.
    /// Defaults to the runtime of the caller.
    pub callback_runtime: Option<tokio::runtime::Handle>,
    /// Wall-clock limit for the whole execution, retries included.
    pub timeout: Option<Duration>,
}

impl ExecutionOptions {
    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.credential = Credential::SessionToken(session_token.into());
        self
    }

    pub fn with_primary_key(mut self) -> Self {
        self.credential = Credential::PrimaryKey;
        self
    }

    pub fn with_installation_id(mut self, installation_id: impl Into<String>) -> Self {
        self.installation_id = Some(installation_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_intermediate_responses(mut self, allow: bool) -> Self {
        self.allow_intermediate_responses = allow;
        self
    }

    pub fn with_callback_runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.callback_runtime = Some(handle);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
