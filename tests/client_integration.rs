use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use parse_server_http::{
    Configuration, Delivery, ErrorCode, ExecutionOptions, ParseClient, ParseFile, Query,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: JsonValue,
    headers: Vec<(&'static str, String)>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
            delay: Duration::from_millis(0),
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct RecordedRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: String,
}

impl RecordedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

async fn mock_handler(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    state
        .requests
        .lock()
        .expect("request log mutex must not be poisoned")
        .push(RecordedRequest {
            method,
            path: uri.path().to_owned(),
            query: uri.query().map(str::to_owned),
            headers,
            body,
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"code": 1, "error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut response_headers = HeaderMap::new();
    for (name, value) in &response.headers {
        response_headers.insert(
            *name,
            HeaderValue::from_str(value).expect("mock header value must be valid"),
        );
    }

    (response.status, response_headers, Json(response.body))
}

struct TestServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn server_url(&self) -> String {
        format!("{}/parse", self.base_url)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .clone()
    }

    fn hits(&self) -> usize {
        self.requests().len()
    }

    fn client(&self, max_attempts: u32) -> ParseClient {
        ParseClient::new(
            Configuration::new("app-id", self.server_url())
                .with_client_key("client-key")
                .with_primary_key("primary-key")
                .with_max_connection_attempts(max_attempts)
                .with_default_retry_delay(Duration::from_millis(50))
                .with_request_timeout(Duration::from_secs(2)),
        )
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .fallback(mock_handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        requests: state.requests,
        task,
    }
}

fn rate_limited() -> MockResponse {
    MockResponse::json(
        StatusCode::TOO_MANY_REQUESTS,
        json!({"code": 155, "error": "request limit exceeded"}),
    )
}

fn unavailable() -> MockResponse {
    MockResponse::json(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"code": 1, "error": "server is restarting"}),
    )
}

fn saved() -> MockResponse {
    MockResponse::json(
        StatusCode::CREATED,
        json!({"objectId": "Ed1nuqPvcm", "createdAt": "2022-01-01T12:23:45.678Z"}),
    )
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GameScore {
    object_id: String,
    score: i64,
    player_name: String,
}

#[tokio::test]
async fn create_sends_parse_headers_and_returns_saved_object() {
    let server = spawn_server(vec![saved()]).await;
    let client = server.client(1);

    let saved = client
        .create(
            "GameScore",
            &json!({"score": 1337, "playerName": "Sean Plott"}),
            &ExecutionOptions::default().with_installation_id("install-1"),
        )
        .await
        .expect("create must succeed");

    assert_eq!(saved.object_id, "Ed1nuqPvcm");
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/parse/classes/GameScore");
    assert_eq!(request.header("x-parse-application-id"), Some("app-id"));
    assert_eq!(request.header("x-parse-client-key"), Some("client-key"));
    assert_eq!(request.header("x-parse-installation-id"), Some("install-1"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert!(request.header("x-parse-request-id").is_some());
    assert!(request.header("x-parse-master-key").is_none());
    let body: JsonValue = serde_json::from_str(&request.body).expect("body must be JSON");
    assert_eq!(body, json!({"score": 1337, "playerName": "Sean Plott"}));
}

#[tokio::test]
async fn find_sends_constraints_and_decodes_results() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({
            "results": [
                {"objectId": "a1", "score": 1337, "playerName": "Sean Plott"},
                {"objectId": "b2", "score": 9000, "playerName": "Jo"}
            ]
        }),
    )])
    .await;
    let client = server.client(1);

    let scores: Vec<GameScore> = client
        .find(
            "GameScore",
            &Query::matching(json!({"score": {"$gte": 1000}}))
                .limit(2)
                .order(["-score"]),
            &ExecutionOptions::default(),
        )
        .await
        .expect("find must succeed");

    assert_eq!(scores.len(), 2);
    assert_eq!(scores[1].player_name, "Jo");
    let request = &server.requests()[0];
    assert_eq!(request.method, Method::GET);
    let query = request.query.as_deref().expect("must send query string");
    assert!(query.contains("where=%7B%22score%22%3A%7B%22%24gte%22%3A1000%7D%7D"));
    assert!(query.contains("limit=2"));
    assert!(query.contains("order=-score"));
    assert!(request.header("x-parse-request-id").is_none());
}

#[tokio::test]
async fn count_asks_for_count_only() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({"results": [], "count": 42}),
    )])
    .await;
    let client = server.client(1);

    let count = client
        .count("GameScore", &Query::all().limit(10), &ExecutionOptions::default())
        .await
        .expect("count must succeed");

    assert_eq!(count, 42);
    let query = server.requests()[0].query.clone().expect("must send query");
    assert_eq!(query, "limit=0&count=1");
}

#[tokio::test]
async fn call_function_unwraps_result() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({"result": {"average": 4.5}}),
    )])
    .await;
    let client = server.client(1);

    let result: JsonValue = client
        .call_function(
            "averageStars",
            &json!({"movie": "The Matrix"}),
            &ExecutionOptions::default().with_context(json!({"caller": "test"})),
        )
        .await
        .expect("function call must succeed");

    assert_eq!(result, json!({"average": 4.5}));
    let request = &server.requests()[0];
    assert_eq!(request.path, "/parse/functions/averageStars");
    assert_eq!(
        request.header("x-parse-cloud-context"),
        Some(r#"{"caller":"test"}"#)
    );
}

#[tokio::test]
async fn bad_request_surfaces_envelope_without_retry() {
    let server = spawn_server(vec![
        MockResponse::json(
            StatusCode::BAD_REQUEST,
            json!({"code": 111, "error": "schema mismatch for GameScore.score"}),
        ),
        saved(),
    ])
    .await;
    let client = server.client(3);

    let err = client
        .create("GameScore", &json!({"score": "high"}), &ExecutionOptions::default())
        .await
        .expect_err("create must fail");

    assert_eq!(err.code, ErrorCode::IncorrectType);
    assert_eq!(err.message, "schema mismatch for GameScore.score");
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn rate_limit_interval_header_retries_until_ceiling() {
    let server = spawn_server(vec![
        rate_limited().with_header("x-rate-limit-reset", "2"),
        rate_limited().with_header("x-rate-limit-reset", "2"),
        saved(),
    ])
    .await;
    let client = server.client(2);

    let started = Instant::now();
    let err = client
        .health(&ExecutionOptions::default())
        .await
        .expect_err("must give up after two attempts");

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(err.code, ErrorCode::RequestLimitExceeded);
    assert_eq!(err.message, "request limit exceeded");
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn unavailable_with_http_date_retries_then_succeeds() {
    let retry_at = (chrono::Utc::now() + chrono::Duration::seconds(2))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    let server = spawn_server(vec![
        unavailable().with_header("retry-after", retry_at),
        MockResponse::json(StatusCode::OK, json!({"status": "ok"})),
    ])
    .await;
    let client = server.client(3);

    let started = Instant::now();
    let health = client
        .health(&ExecutionOptions::default())
        .await
        .expect("second attempt must succeed");

    assert!(health.is_ok());
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn rate_limit_without_hint_uses_default_delay() {
    let server = spawn_server(vec![rate_limited(), rate_limited(), rate_limited()]).await;
    let client = server.client(3);

    let started = Instant::now();
    let err = client
        .health(&ExecutionOptions::default())
        .await
        .expect_err("must give up");

    assert_eq!(err.code, ErrorCode::RequestLimitExceeded);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn retried_write_reuses_request_id() {
    let server = spawn_server(vec![unavailable().with_header("retry-after", "0"), saved()]).await;
    let client = server.client(2);

    client
        .create("GameScore", &json!({"score": 1}), &ExecutionOptions::default())
        .await
        .expect("retry must succeed");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let first = requests[0].header("x-parse-request-id");
    assert!(first.is_some());
    assert_eq!(first, requests[1].header("x-parse-request-id"));
}

#[tokio::test]
async fn connection_refused_surfaces_connection_failed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind listener");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);

    for max_attempts in [1, 2] {
        let client = ParseClient::new(
            Configuration::new("app-id", format!("http://{address}/parse"))
                .with_max_connection_attempts(max_attempts)
                .with_default_retry_delay(Duration::from_millis(10)),
        );

        let err = client
            .health(&ExecutionOptions::default())
            .await
            .expect_err("nothing listens on the port");

        assert_eq!(err.code, ErrorCode::ConnectionFailed);
    }
}

#[tokio::test]
async fn request_timeout_surfaces_timeout_code() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({"status": "ok"}),
    )
    .with_delay(Duration::from_millis(150))])
    .await;
    let client = ParseClient::new(
        Configuration::new("app-id", server.server_url())
            .with_request_timeout(Duration::from_millis(20)),
    );

    let err = client
        .health(&ExecutionOptions::default())
        .await
        .expect_err("request must time out");

    assert_eq!(err.code, ErrorCode::Timeout);
}

#[tokio::test]
async fn execution_timeout_bounds_retries() {
    let server = spawn_server(vec![
        unavailable().with_header("retry-after", "30"),
        MockResponse::json(StatusCode::OK, json!({"status": "ok"})),
    ])
    .await;
    let client = server.client(3);

    let started = Instant::now();
    let err = client
        .health(&ExecutionOptions::default().with_timeout(Duration::from_millis(300)))
        .await
        .expect_err("execution must time out");

    assert_eq!(err.code, ErrorCode::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn download_reports_progress_before_terminal() {
    let payload = "x".repeat(256 * 1024);
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!(payload))]).await;
    let client = server.client(1);
    let file = ParseFile {
        name: "blob.json".to_owned(),
        url: format!("{}/files/app-id/blob.json", server.base_url),
    };

    let mut execution = client.download_file(
        &file,
        ExecutionOptions::default().with_intermediate_responses(true),
    );
    let mut progress = Vec::new();
    let mut terminal = None;
    while let Some(delivery) = execution.next().await {
        match delivery {
            Delivery::Intermediate(value) => {
                assert!(terminal.is_none(), "progress after terminal value");
                progress.push(value);
            }
            Delivery::Terminal(result) => {
                assert!(terminal.is_none(), "second terminal value");
                terminal = Some(result);
            }
        }
    }

    let bytes = terminal
        .expect("terminal value must arrive")
        .expect("download must succeed");
    let last = progress.last().expect("must report progress");
    assert!(last.transferred <= bytes.len() as u64);
    assert!(progress
        .windows(2)
        .all(|pair| pair[0].transferred < pair[1].transferred));
    assert_eq!(last.attempt, 1);
    assert_eq!(bytes.len(), payload.len() + 2);
    let request = &server.requests()[0];
    assert!(request.header("x-parse-application-id").is_none());
}

#[tokio::test]
async fn login_then_current_user_sends_session_token() {
    let user = json!({
        "objectId": "g7y9tkhB7O",
        "username": "cooldude6",
        "sessionToken": "r:pnktnjyb996sj4p156gjtp4im"
    });
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, user.clone()),
        MockResponse::json(StatusCode::OK, user),
        MockResponse::json(StatusCode::OK, json!({})),
    ])
    .await;
    let client = server.client(1);
    let options = ExecutionOptions::default();

    let logged_in = client
        .login("cooldude6", "p_n7!-e8", &options)
        .await
        .expect("login must succeed");
    let token = logged_in.session_token.expect("login returns a session");
    let me = client
        .current_user(&token, &options)
        .await
        .expect("current user must succeed");
    client
        .logout(&token, &options)
        .await
        .expect("logout must succeed");

    assert_eq!(me.username.as_deref(), Some("cooldude6"));
    let requests = server.requests();
    assert_eq!(requests[0].path, "/parse/login");
    assert!(requests[0].header("x-parse-session-token").is_none());
    assert_eq!(requests[1].path, "/parse/users/me");
    assert_eq!(requests[1].header("x-parse-session-token"), Some(token.as_str()));
    assert_eq!(requests[2].path, "/parse/logout");
    assert_eq!(requests[2].header("x-parse-session-token"), Some(token.as_str()));
}

#[tokio::test]
async fn names_with_reserved_characters_stay_in_the_path() {
    let server = spawn_server(vec![
        MockResponse::json(
            StatusCode::CREATED,
            json!({"name": "tfss-my pic?.png#1", "url": "http://files.test/tfss-pic.png"}),
        ),
        MockResponse::json(
            StatusCode::OK,
            json!({"objectId": "a?b", "score": 7, "playerName": "Jo"}),
        ),
    ])
    .await;
    let client = server.client(1);
    let options = ExecutionOptions::default();

    let file = client
        .upload_file("my pic?.png#1", b"png".to_vec(), "image/png", &options)
        .await
        .expect("upload must succeed");
    let score: GameScore = client
        .fetch("GameScore", "a?b", &options)
        .await
        .expect("fetch must succeed");

    assert_eq!(file.name, "tfss-my pic?.png#1");
    assert_eq!(score.object_id, "a?b");
    let requests = server.requests();
    assert_eq!(requests[0].path, "/parse/files/my%20pic%3F.png%231");
    assert_eq!(requests[0].query, None);
    assert_eq!(requests[0].header("content-type"), Some("image/png"));
    assert_eq!(requests[1].path, "/parse/classes/GameScore/a%3Fb");
    assert_eq!(requests[1].query, None);
}

#[tokio::test]
async fn delete_file_uses_primary_key() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!({}))]).await;
    let client = server.client(1);
    let file = ParseFile {
        name: "d1e0_pic.png".to_owned(),
        url: format!("{}/files/app-id/d1e0_pic.png", server.base_url),
    };

    client
        .delete_file(&file, &ExecutionOptions::default())
        .await
        .expect("delete must succeed");

    let request = &server.requests()[0];
    assert_eq!(request.method, Method::DELETE);
    assert_eq!(request.path, "/parse/files/d1e0_pic.png");
    assert_eq!(request.header("x-parse-master-key"), Some("primary-key"));
}
