//! Runs commands against the transport until they succeed or fail for good.
//!
//! One logical execution moves through
//! `Idle -> Dispatched -> {Succeeded | RetryScheduled -> Dispatched | FailedFatal}`.
//! Attempts of one execution are strictly sequential; separate executions
//! share nothing but the transport and the configuration.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method, Url,
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    time::sleep,
};

use crate::{
    retry::{AttemptFailure, RetryDecision, RetryPolicy},
    transport::{HttpRequest, ProgressSink, Transport},
    Command, Configuration, Credential, ErrorCode, ExecutionOptions, ParseError, Progress, Result,
};

pub const APPLICATION_ID_HEADER: &str = "x-parse-application-id";
pub const CLIENT_KEY_HEADER: &str = "x-parse-client-key";
pub const MASTER_KEY_HEADER: &str = "x-parse-master-key";
pub const SESSION_TOKEN_HEADER: &str = "x-parse-session-token";
pub const INSTALLATION_ID_HEADER: &str = "x-parse-installation-id";
pub const CLOUD_CONTEXT_HEADER: &str = "x-parse-cloud-context";
pub const REQUEST_ID_HEADER: &str = "x-parse-request-id";

/// Progress values held for a streaming execution whose consumer lags behind.
/// Further values are dropped until the consumer catches up.
pub const PROGRESS_BUFFER: usize = 256;

/// Number of the attempt an execution is on, starting at 1.
///
/// Every execution creates its own counter and is the only one advancing it.
/// Observers get read-only clones that may be read from any thread.
#[derive(Clone, Debug)]
pub struct AttemptCounter(Arc<AtomicU32>);

impl AttemptCounter {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU32::new(1)))
    }

    pub fn current(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn advance(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// One value delivered by a streaming execution.
#[derive(Debug)]
pub enum Delivery<T> {
    /// Progress of the attempt in flight. Never the last delivery.
    Intermediate(Progress),
    /// The single final result.
    Terminal(Result<T>),
}

impl<T> Delivery<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Handle to an execution running in the background.
pub struct Execution<T> {
    progress: mpsc::Receiver<Progress>,
    outcome: Option<oneshot::Receiver<Result<T>>>,
    attempts: AttemptCounter,
}

impl<T> fmt::Debug for Execution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("attempt", &self.attempts.current())
            .field("finished", &self.outcome.is_none())
            .finish()
    }
}

impl<T> Execution<T> {
    /// Next delivery: any progress values first, then the terminal result,
    /// then `None` forever.
    pub async fn next(&mut self) -> Option<Delivery<T>> {
        if let Some(progress) = self.progress.recv().await {
            return Some(Delivery::Intermediate(progress));
        }
        let outcome = self.outcome.take()?;
        Some(Delivery::Terminal(
            outcome.await.unwrap_or_else(|_| Err(abandoned())),
        ))
    }

    /// Waits for the terminal result, skipping progress.
    pub async fn outcome(self) -> Result<T> {
        match self.outcome {
            Some(outcome) => outcome.await.unwrap_or_else(|_| Err(abandoned())),
            None => Err(ParseError::other("terminal result was already delivered")),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.current()
    }

    pub fn attempt_counter(&self) -> AttemptCounter {
        self.attempts.clone()
    }
}

fn abandoned() -> ParseError {
    ParseError::other("execution ended without producing a result")
}

/// Sends commands through a [`Transport`], retrying as the [`RetryPolicy`] allows.
#[derive(Clone)]
pub struct CommandExecutor {
    transport: Arc<dyn Transport>,
    configuration: Arc<Configuration>,
    policy: RetryPolicy,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("configuration", &self.configuration)
            .field("policy", &self.policy)
            .finish()
    }
}

impl CommandExecutor {
    pub fn new(transport: Arc<dyn Transport>, configuration: Arc<Configuration>) -> Self {
        let policy = RetryPolicy::from_configuration(&configuration);
        Self {
            transport,
            configuration,
            policy,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `command` to its terminal result on the calling task.
    pub async fn execute<T>(&self, command: &Command<T>, options: &ExecutionOptions) -> Result<T> {
        let (_, execution) = self.execute_tracked(command, options);
        execution.await
    }

    /// Like [`execute`](Self::execute), also returning the attempt counter of
    /// this execution. Nothing is dispatched until the future is polled.
    pub fn execute_tracked<'a, T>(
        &'a self,
        command: &'a Command<T>,
        options: &'a ExecutionOptions,
    ) -> (AttemptCounter, impl Future<Output = Result<T>> + 'a)
    where
        T: 'a,
    {
        let attempts = AttemptCounter::new();
        let observer = attempts.clone();
        let execution = async move { self.run(command, options, &attempts, None).await };
        (observer, execution)
    }

    /// Spawns the execution on `options.callback_runtime` (or the current
    /// runtime) and returns a handle delivering progress, when
    /// `allow_intermediate_responses` is set, and then exactly one terminal result.
    pub fn execute_streaming<T>(
        &self,
        command: Command<T>,
        options: ExecutionOptions,
    ) -> Execution<T>
    where
        T: Send + 'static,
    {
        let attempts = AttemptCounter::new();
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let execution = Execution {
            progress: progress_rx,
            outcome: Some(outcome_rx),
            attempts: attempts.clone(),
        };

        let handle = match options.callback_runtime.clone() {
            Some(handle) => handle,
            None => match Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    let _ = outcome_tx.send(Err(ParseError::new(
                        ErrorCode::NotInitialized,
                        "no tokio runtime available to run the execution",
                    )));
                    return execution;
                }
            },
        };

        let executor = self.clone();
        let progress = options.allow_intermediate_responses.then_some(progress_tx);
        handle.spawn(async move {
            let result = executor
                .run(&command, &options, &attempts, progress.as_ref())
                .await;
            // Close the progress channel first so the terminal value is always last.
            drop(progress);
            let _ = outcome_tx.send(result);
        });

        execution
    }

    async fn run<T>(
        &self,
        command: &Command<T>,
        options: &ExecutionOptions,
        attempts: &AttemptCounter,
        progress: Option<&mpsc::Sender<Progress>>,
    ) -> Result<T> {
        let request = self.build_request(command, options)?;

        loop {
            let attempt = attempts.current();

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt,
                "dispatching request"
            );

            let sink = progress.map(|sender| ProgressSink::new(sender.clone(), attempt));
            let failure = match self.transport.perform(&request, sink.as_ref()).await {
                Ok(response) if response.is_success() => {
                    return command.map_response(&response.body);
                }
                Ok(response) => AttemptFailure::Status(response),
                Err(err) => AttemptFailure::Transport(err),
            };

            match self.policy.evaluate(failure, attempt) {
                RetryDecision::Wait(delay) => {
                    let next = attempts.advance();

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        url = %request.url,
                        delay_ms = delay.as_millis() as u64,
                        next_attempt = next,
                        "retrying request"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = next;

                    sleep(delay).await;
                }
                RetryDecision::Fail(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %request.url, attempt, code = %err.code, "request failed");

                    return Err(err);
                }
            }
        }
    }

    fn build_request<T>(
        &self,
        command: &Command<T>,
        options: &ExecutionOptions,
    ) -> Result<HttpRequest> {
        let configuration = &self.configuration;
        let base = if command.is_absolute() {
            command.path()
        } else {
            configuration.server_url.as_str()
        };
        let mut url = Url::parse(base)
            .map_err(|err| ParseError::other(format!("invalid request URL '{base}': {err}")))?;
        if !command.is_absolute() {
            // Each segment is percent-encoded, so `?` or `#` in a name stays in the path.
            url.path_segments_mut()
                .map_err(|()| {
                    ParseError::other(format!("server URL '{base}' cannot take a path"))
                })?
                .pop_if_empty()
                .extend(command.path().trim_start_matches('/').split('/'));
        }
        if !command.params().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in command.params() {
                pairs.append_pair(name, value);
            }
        }

        let mut headers = HeaderMap::new();
        if !command.is_absolute() {
            insert_header(&mut headers, APPLICATION_ID_HEADER, &configuration.application_id)?;
            if let Some(client_key) = &configuration.client_key {
                insert_header(&mut headers, CLIENT_KEY_HEADER, client_key)?;
            }
            match &options.credential {
                Credential::Default => {}
                Credential::SessionToken(token) => {
                    insert_header(&mut headers, SESSION_TOKEN_HEADER, token)?;
                }
                Credential::PrimaryKey => {
                    let primary_key = configuration.primary_key.as_deref().ok_or_else(|| {
                        ParseError::other("primary key requested but not configured")
                    })?;
                    insert_header(&mut headers, MASTER_KEY_HEADER, primary_key)?;
                }
            }
            if let Some(installation_id) = &options.installation_id {
                insert_header(&mut headers, INSTALLATION_ID_HEADER, installation_id)?;
            }
            if let Some(context) = &options.context {
                insert_header(&mut headers, CLOUD_CONTEXT_HEADER, &context.to_string())?;
            }
            // One id per logical execution: retries of a write share it.
            if configuration.idempotency && matches!(*command.method(), Method::POST | Method::PUT) {
                insert_header(
                    &mut headers,
                    REQUEST_ID_HEADER,
                    &uuid::Uuid::new_v4().to_string(),
                )?;
            }
            for (name, value) in &configuration.additional_headers {
                insert_header(&mut headers, name, value)?;
            }
        }
        if let Some(body) = command.body() {
            insert_header(&mut headers, CONTENT_TYPE.as_str(), &body.content_type)?;
        }

        Ok(HttpRequest {
            method: command.method().clone(),
            url,
            headers,
            body: command.body().map(|body| body.bytes.clone()),
            timeout: Duration::from_millis(configuration.request_timeout_ms),
        })
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| ParseError::other(format!("invalid header name '{name}': {err}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|err| ParseError::other(format!("invalid value for header '{name}': {err}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}
