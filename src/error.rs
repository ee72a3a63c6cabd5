use std::fmt;

use crate::transport::TransportError;

macro_rules! error_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)+) => {
        /// Stable numeric error codes reported by Parse Server or by this crate.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($(#[$doc])* $name,)+
            /// A code this crate has no name for.
            Other(i32),
        }

        impl ErrorCode {
            /// Returns the numeric code.
            pub fn as_i32(self) -> i32 {
                match self {
                    $(Self::$name => $value,)+
                    Self::Other(value) => value,
                }
            }
        }

        impl From<i32> for ErrorCode {
            fn from(value: i32) -> Self {
                match value {
                    $($value => Self::$name,)+
                    other => Self::Other(other),
                }
            }
        }
    };
}

error_codes! {
    /// Failure without a more specific cause, including client-side decoding.
    OtherCause = -1,
    InternalServer = 1,
    /// The server could not be reached or gave no usable response.
    ConnectionFailed = 100,
    ObjectNotFound = 101,
    InvalidQuery = 102,
    InvalidClassName = 103,
    MissingObjectId = 104,
    InvalidKeyName = 105,
    InvalidPointer = 106,
    InvalidJson = 107,
    CommandUnavailable = 108,
    NotInitialized = 109,
    IncorrectType = 111,
    InvalidChannelName = 112,
    PushMisconfigured = 115,
    ObjectTooLarge = 116,
    OperationForbidden = 119,
    CacheMiss = 120,
    InvalidNestedKey = 121,
    InvalidFileName = 122,
    InvalidAcl = 123,
    /// The request (or the whole execution) ran out of time.
    Timeout = 124,
    InvalidEmailAddress = 125,
    MissingContentType = 126,
    MissingContentLength = 127,
    InvalidContentLength = 128,
    FileTooLarge = 129,
    FileSaveError = 130,
    DuplicateValue = 137,
    InvalidRoleName = 139,
    ExceededQuota = 140,
    ScriptFailed = 141,
    ValidationError = 142,
    FileDeleteError = 153,
    RequestLimitExceeded = 155,
    InvalidEventName = 160,
    UsernameMissing = 200,
    PasswordMissing = 201,
    UsernameTaken = 202,
    EmailTaken = 203,
    EmailMissing = 204,
    EmailNotFound = 205,
    SessionMissing = 206,
    MustCreateUserThroughSignup = 207,
    AccountAlreadyLinked = 208,
    InvalidSessionToken = 209,
    LinkedIdMissing = 250,
    InvalidLinkedSession = 251,
    UnsupportedService = 252,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Error type returned by this crate.
///
/// Every failed execution ends in one of these, whether the backend reported
/// it, the response could not be decoded, or the transport gave up.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("parse error {code}: {message}")]
pub struct ParseError {
    /// Code callers can branch on.
    pub code: ErrorCode,
    /// Human-readable message from the backend or from this crate.
    pub message: String,
}

impl ParseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OtherCause, message)
    }
}

impl From<TransportError> for ParseError {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::Timeout(_) => ErrorCode::Timeout,
            TransportError::Connection(_) => ErrorCode::ConnectionFailed,
        };
        Self::new(code, err.to_string())
    }
}
