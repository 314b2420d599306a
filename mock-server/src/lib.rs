use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::debug;
use url::form_urlencoded;

/// What `/echo` reports about the request it received.
#[derive(Debug, Serialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub query: Map<String, Value>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/", any(ok))
        .route("/querystring", get(querystring).delete(querystring))
        .route("/404", get(not_found))
        .route("/404-with-valid-json", get(valid_json))
        .route("/404-with-invalid-json", get(invalid_json))
        .route("/404-with-stripe-error", get(stripe_error))
        .route("/400-with-message", get(with_message))
        .route("/echo", any(echo))
        .route("/delay/{ms}", any(delay))
        .route("/redirect", any(redirect))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn ok() -> Json<Value> {
    Json(json!({ "message": "OK" }))
}

async fn querystring(RawQuery(query): RawQuery) -> Json<Map<String, Value>> {
    Json(query_object(query.as_deref()))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn valid_json() -> Response {
    json_text(StatusCode::BAD_REQUEST, r#"{"foo":"baz"}"#)
}

async fn invalid_json() -> Response {
    json_text(StatusCode::NOT_FOUND, "foobaz")
}

async fn stripe_error() -> (StatusCode, Json<Value>) {
    let body = json!({
        "error": {
            "message": "Some error happened",
            "stack": {},
            "code": 23,
            "param": "hello_world"
        }
    });
    (StatusCode::NOT_FOUND, Json(body))
}

async fn with_message() -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": "Oops!" })))
}

async fn echo(
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.as_str().to_string(), value)
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        headers,
        query: query_object(query.as_deref()),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn delay(Path(ms): Path<u64>) -> Json<Value> {
    debug!(ms, "delaying response");
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "message": "OK" }))
}

async fn redirect() -> Redirect {
    Redirect::to("/")
}

/// Content type `application/json` without parameters, body as given.
fn json_text(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Decoded query pairs; a repeated key collects its values into an array.
pub fn query_object(query: Option<&str>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        let value = Value::String(value.into_owned());
        match out.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                out.insert(key.into_owned(), value);
            }
        }
    }
    out
}
