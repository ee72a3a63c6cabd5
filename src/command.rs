use std::{fmt, sync::Arc};

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};

use crate::{decode::decode_json, ParseError, Result};

type Mapper<T> = Arc<dyn Fn(&[u8]) -> Result<T> + Send + Sync>;

/// Request body with its content type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Body {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Description of one REST call and of how to read its successful response.
///
/// Commands hold no execution state and can be executed any number of times.
pub struct Command<T> {
    method: Method,
    path: String,
    params: Vec<(String, String)>,
    body: Option<Body>,
    mapper: Mapper<T>,
}

impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            path: self.path.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
            mapper: Arc::clone(&self.mapper),
        }
    }
}

impl<T> fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("body_len", &self.body.as_ref().map(|body| body.bytes.len()))
            .finish()
    }
}

impl<T> Command<T> {
    /// `path` is relative to the server URL (`/classes/GameScore`) or an
    /// absolute `http(s)://` URL, which is requested without Parse headers.
    /// Relative paths hold raw segments separated by `/`; they are
    /// percent-encoded when the request is built.
    pub fn new<F>(method: Method, path: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            mapper: Arc::new(mapper),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.params.extend(params);
        self
    }

    pub fn with_body(mut self, bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        self.body = Some(Body {
            content_type: content_type.into(),
            bytes: bytes.into(),
        });
        self
    }

    pub fn with_json_body<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| ParseError::other(format!("failed to encode request body: {err}")))?;
        Ok(self.with_body(bytes, "application/json"))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub(crate) fn is_absolute(&self) -> bool {
        self.path.starts_with("http://") || self.path.starts_with("https://")
    }

    /// Runs the mapper over a successful response body.
    pub fn map_response(&self, body: &[u8]) -> Result<T> {
        (self.mapper)(body)
    }
}

impl<T: DeserializeOwned + 'static> Command<T> {
    /// Command whose response body is JSON decoded straight into `T`.
    pub fn json(method: Method, path: impl Into<String>) -> Self {
        Self::new(method, path, decode_json::<T>)
    }
}
