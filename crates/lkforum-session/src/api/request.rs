//! Request and response shapes for `AuthClient::fetch`.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::Form;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::AuthError;

#[derive(Debug)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    /// Sent with its own multipart content type
    Multipart(Form),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

/// Method, extra headers and body of an authenticated call.
#[derive(Debug)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Serialize `body` into a JSON body
    pub fn json_from<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, AuthError> {
        Ok(self.json(serde_json::to_value(body)?))
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    pub fn is_multipart(&self) -> bool {
        self.body.as_ref().map(RequestBody::is_multipart).unwrap_or(false)
    }
}

/// Successful response that was not JSON
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub enum ApiResponse {
    Json(Value),
    Raw(RawResponse),
}

impl ApiResponse {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            ApiResponse::Raw(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            ApiResponse::Raw(_) => None,
        }
    }

    /// Deserialize a JSON response into `T`
    pub fn parse<T: DeserializeOwned>(self) -> Result<T, AuthError> {
        match self {
            ApiResponse::Json(value) => serde_json::from_value(value)
                .map_err(|e| AuthError::InvalidResponse(e.to_string())),
            ApiResponse::Raw(raw) => Err(AuthError::InvalidResponse(format!(
                "expected JSON body, got {} bytes with status {}",
                raw.body.len(),
                raw.status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::ACCEPT;

    #[test]
    fn test_builder() {
        let options = RequestOptions::post()
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(serde_json::json!({ "title": "hello" }));
        assert_eq!(options.method, Method::POST);
        assert_eq!(options.headers.get(ACCEPT).unwrap(), "application/json");
        assert!(!options.is_multipart());

        let options = RequestOptions::put().multipart(Form::new().text("name", "avatar"));
        assert!(options.is_multipart());
        assert_eq!(RequestOptions::default().method, Method::GET);
    }

    #[test]
    fn test_parse_json_response() {
        #[derive(serde::Deserialize)]
        struct Post {
            id: String,
        }

        let response = ApiResponse::Json(serde_json::json!({ "id": "p1" }));
        let post: Post = response.parse().unwrap();
        assert_eq!(post.id, "p1");
    }

    #[test]
    fn test_parse_raw_response_fails() {
        let response = ApiResponse::Raw(RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: b"pong".to_vec(),
        });
        assert!(response.as_json().is_none());
        assert!(matches!(
            response.parse::<Value>(),
            Err(AuthError::InvalidResponse(_))
        ));
    }
}
