use serde::Deserialize;

/// Error body returned by Parse Server: `{"code": 101, "error": "..."}`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    #[serde(alias = "message")]
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse<T> {
    pub results: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct FunctionResponse<T> {
    pub result: T,
}
