use async_trait::async_trait;
use std::time::Duration;

use crate::error::PaymentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// A request to the payment provider
///
/// Deliberately not `Debug`: it carries client secrets and bearer tokens.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub bearer_token: Option<String>,
    pub body: RequestBody,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the payment provider
///
/// Only a failure to get any response at all is an `Err`; non-2xx answers
/// come back as an `HttpResponse` for the caller to classify.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PaymentError>;
}

/// `reqwest`-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PaymentError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(pairs),
            RequestBody::Json(value) => builder.json(value),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.without_url().to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Route {
        path_suffix: String,
        responses: VecDeque<Result<HttpResponse, PaymentError>>,
    }

    /// Scripted transport
    ///
    /// Responses are queued per URL suffix. The last queued response for a
    /// route keeps being returned once the others are used up.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        routes: Mutex<Vec<Route>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn on(&self, path_suffix: &str, status: u16, body: &str) -> &Self {
            self.push(
                path_suffix,
                Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                }),
            )
        }

        pub(crate) fn fail(&self, path_suffix: &str, message: &str) -> &Self {
            self.push(path_suffix, Err(PaymentError::Transport(message.to_string())))
        }

        fn push(&self, path_suffix: &str, response: Result<HttpResponse, PaymentError>) -> &Self {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|r| r.path_suffix == path_suffix) {
                Some(route) => route.responses.push_back(response),
                None => routes.push(Route {
                    path_suffix: path_suffix.to_string(),
                    responses: VecDeque::from([response]),
                }),
            }
            self
        }

        /// Number of requests whose URL ends with `path_suffix`
        pub(crate) fn calls(&self, path_suffix: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.ends_with(path_suffix))
                .count()
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PaymentError> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);

            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .iter_mut()
                .find(|r| url.ends_with(&r.path_suffix))
                .ok_or_else(|| PaymentError::Transport(format!("no route for {url}")))?;
            if route.responses.len() > 1 {
                route.responses.pop_front().unwrap()
            } else {
                route.responses[0].clone()
            }
        }
    }
}
