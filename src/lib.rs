//! `parse-server-http` is an async HTTP client for the Parse Server REST API.
//!
//! Every call is a [`Command`] run by the [`CommandExecutor`], which retries
//! rate-limited (`429`) and unavailable (`503`) responses as well as
//! connection failures, honouring `x-rate-limit-reset` and `retry-after`
//! hints, up to [`Configuration::max_connection_attempts`] dispatches.
//!
//! [`ParseClient`] wraps the executor with ready-made commands:
//! - [`ParseClient::create`], [`ParseClient::fetch`], [`ParseClient::update`],
//!   [`ParseClient::delete`]
//! - [`ParseClient::find`], [`ParseClient::count`]
//! - [`ParseClient::login`], [`ParseClient::sign_up`], [`ParseClient::logout`]
//! - [`ParseClient::call_function`]
//! - [`ParseClient::upload_file`], [`ParseClient::download_file`]

mod client;
mod command;
pub mod decode;
mod error;
pub mod executor;
mod options;
mod params;
pub mod retry;
pub mod transport;
mod types;
mod wire;

pub use client::ParseClient;
pub use command::{Body, Command};
pub use error::{ErrorCode, ParseError};
pub use executor::{AttemptCounter, CommandExecutor, Delivery, Execution};
pub use options::{Configuration, Credential, ExecutionOptions};
pub use params::Query;
pub use retry::{RetryDecision, RetryHintParser, RetryPolicy};
pub use types::{HealthStatus, ParseFile, Progress, SavedObject, UpdatedObject, User};

pub type Result<T> = std::result::Result<T, ParseError>;
