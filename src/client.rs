use std::{fmt, sync::Arc};

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::{
    decode::{decode_empty, decode_json},
    executor::{CommandExecutor, Execution},
    transport::{ReqwestTransport, Transport},
    wire, Command, Configuration, ErrorCode, ExecutionOptions, HealthStatus, ParseError,
    ParseFile, Query, Result, SavedObject, UpdatedObject, User,
};

/// Client for a Parse Server REST API.
///
/// Cloning is cheap; clones share the transport and the configuration.
#[derive(Clone)]
pub struct ParseClient {
    executor: CommandExecutor,
}

impl fmt::Debug for ParseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseClient")
            .field("configuration", self.executor.configuration())
            .finish()
    }
}

impl ParseClient {
    /// Creates a client talking HTTP through `reqwest`.
    pub fn new(configuration: Configuration) -> Self {
        Self::with_transport(configuration, Arc::new(ReqwestTransport::default()))
    }

    /// Creates a client on top of a custom [`Transport`].
    pub fn with_transport(configuration: Configuration, transport: Arc<dyn Transport>) -> Self {
        Self {
            executor: CommandExecutor::new(transport, Arc::new(configuration)),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// See [`Configuration::from_env`] for the variables read.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use parse_server_http::ParseClient;
    ///
    /// let client = ParseClient::from_env().expect("missing PARSE_* env vars");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        Configuration::from_env().map(Self::new)
    }

    pub fn configuration(&self) -> &Configuration {
        self.executor.configuration()
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Executes a command, retrying as configured.
    ///
    /// `options.timeout` bounds the whole execution, retries and backoff
    /// included; hitting it fails with [`ErrorCode::Timeout`].
    pub async fn execute<T>(&self, command: &Command<T>, options: &ExecutionOptions) -> Result<T> {
        let execution = self.executor.execute(command, options);
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .unwrap_or_else(|_| {
                    Err(ParseError::new(
                        ErrorCode::Timeout,
                        format!("execution did not finish within {} ms", limit.as_millis()),
                    ))
                }),
            None => execution.await,
        }
    }

    /// Executes a command in the background, see [`CommandExecutor::execute_streaming`].
    pub fn execute_streaming<T>(
        &self,
        command: Command<T>,
        options: ExecutionOptions,
    ) -> Execution<T>
    where
        T: Send + 'static,
    {
        self.executor.execute_streaming(command, options)
    }

    /// Creates an object of `class_name`.
    pub async fn create<B: Serialize + ?Sized>(
        &self,
        class_name: &str,
        object: &B,
        options: &ExecutionOptions,
    ) -> Result<SavedObject> {
        let command = Command::json(Method::POST, format!("/classes/{class_name}"))
            .with_json_body(object)?;
        self.execute(&command, options).await
    }

    /// Fetches one object by id.
    pub async fn fetch<T: DeserializeOwned + 'static>(
        &self,
        class_name: &str,
        object_id: &str,
        options: &ExecutionOptions,
    ) -> Result<T> {
        let command = Command::json(Method::GET, format!("/classes/{class_name}/{object_id}"));
        self.execute(&command, options).await
    }

    /// Applies `changes` to an existing object.
    pub async fn update<B: Serialize + ?Sized>(
        &self,
        class_name: &str,
        object_id: &str,
        changes: &B,
        options: &ExecutionOptions,
    ) -> Result<UpdatedObject> {
        let command = Command::json(Method::PUT, format!("/classes/{class_name}/{object_id}"))
            .with_json_body(changes)?;
        self.execute(&command, options).await
    }

    pub async fn delete(
        &self,
        class_name: &str,
        object_id: &str,
        options: &ExecutionOptions,
    ) -> Result<()> {
        let command = Command::new(
            Method::DELETE,
            format!("/classes/{class_name}/{object_id}"),
            decode_empty,
        );
        self.execute(&command, options).await
    }

    /// Returns the objects of `class_name` matching `query`.
    pub async fn find<T: DeserializeOwned + 'static>(
        &self,
        class_name: &str,
        query: &Query,
        options: &ExecutionOptions,
    ) -> Result<Vec<T>> {
        let command = Command::new(Method::GET, format!("/classes/{class_name}"), |body: &[u8]| {
            decode_json::<wire::FindResponse<T>>(body).map(|response| response.results)
        })
        .with_params(query.to_params());
        self.execute(&command, options).await
    }

    /// Counts the objects of `class_name` matching `query`.
    pub async fn count(
        &self,
        class_name: &str,
        query: &Query,
        options: &ExecutionOptions,
    ) -> Result<u64> {
        let command = Command::new(Method::GET, format!("/classes/{class_name}"), |body: &[u8]| {
            decode_json::<wire::CountResponse>(body).map(|response| response.count)
        })
        .with_params(query.to_count_params());
        self.execute(&command, options).await
    }

    /// Creates a user. The returned user carries the new session token.
    pub async fn sign_up(
        &self,
        username: &str,
        password: &str,
        options: &ExecutionOptions,
    ) -> Result<User> {
        let requested = username.to_owned();
        let command = Command::new(Method::POST, "/users", move |body: &[u8]| {
            let mut user: User = decode_json(body)?;
            user.username.get_or_insert_with(|| requested.clone());
            Ok(user)
        })
        .with_json_body(&json!({ "username": username, "password": password }))?;
        self.execute(&command, options).await
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        options: &ExecutionOptions,
    ) -> Result<User> {
        let command = Command::json(Method::POST, "/login")
            .with_json_body(&json!({ "username": username, "password": password }))?;
        self.execute(&command, options).await
    }

    /// Returns the user owning `session_token`.
    pub async fn current_user(
        &self,
        session_token: &str,
        options: &ExecutionOptions,
    ) -> Result<User> {
        let options = options.clone().with_session_token(session_token);
        self.execute(&Command::json(Method::GET, "/users/me"), &options)
            .await
    }

    /// Invalidates `session_token` on the server.
    pub async fn logout(&self, session_token: &str, options: &ExecutionOptions) -> Result<()> {
        let options = options.clone().with_session_token(session_token);
        let command = Command::new(Method::POST, "/logout", decode_empty);
        self.execute(&command, &options).await
    }

    /// Calls the cloud function `name` and returns its `result`.
    pub async fn call_function<T, P>(
        &self,
        name: &str,
        params: &P,
        options: &ExecutionOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned + 'static,
        P: Serialize + ?Sized,
    {
        let command = Command::new(Method::POST, format!("/functions/{name}"), |body: &[u8]| {
            decode_json::<wire::FunctionResponse<T>>(body).map(|response| response.result)
        })
        .with_json_body(params)?;
        self.execute(&command, options).await
    }

    /// Uploads a file. The server may rename it; use the returned name.
    pub async fn upload_file(
        &self,
        name: &str,
        bytes: impl Into<Vec<u8>>,
        content_type: &str,
        options: &ExecutionOptions,
    ) -> Result<ParseFile> {
        let command =
            Command::json(Method::POST, format!("/files/{name}")).with_body(bytes, content_type);
        self.execute(&command, options).await
    }

    /// Downloads a file by URL in the background.
    ///
    /// With `allow_intermediate_responses` set, the execution yields
    /// [`Progress`](crate::Progress) values while the body arrives.
    pub fn download_file(&self, file: &ParseFile, options: ExecutionOptions) -> Execution<Vec<u8>> {
        let command = Command::new(Method::GET, file.url.clone(), |body: &[u8]| Ok(body.to_vec()));
        self.execute_streaming(command, options)
    }

    /// Deletes a file. Always uses the primary key.
    pub async fn delete_file(&self, file: &ParseFile, options: &ExecutionOptions) -> Result<()> {
        let options = options.clone().with_primary_key();
        let command = Command::new(Method::DELETE, format!("/files/{}", file.name), decode_empty);
        self.execute(&command, &options).await
    }

    /// Checks that the server is up.
    pub async fn health(&self, options: &ExecutionOptions) -> Result<HealthStatus> {
        self.execute(&Command::json(Method::GET, "/health"), options)
            .await
    }
}
