//! Chat Client
//!
//! Sends chat requests over a pool of API keys. Key-level failures rotate to
//! the next key and retry after a backoff delay until the attempt budget is
//! spent; any other failure is returned to the caller as is.

use crate::api::{ChatMessage, CompletionRequest, CompletionResponse, StreamAccumulator};
use crate::client::retry::RetryPolicy;
use crate::client::transport::{HttpTransport, Transport};
use crate::config::{bearer_headers, ConfigLoader, GatewayConfig};
use crate::error::{ChatError, Result};
use crate::keys::{mask_key, CredentialPool, EnvSecrets, KeyPoolResolver, SecretSource};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-call options for [`ChatClient::send`]
#[derive(Default)]
pub struct SendOptions<'a> {
    /// Target model; defaults to the client's model
    pub model: Option<String>,

    /// Receives each text increment. Supplying it switches the request to streaming.
    pub on_chunk: Option<&'a mut (dyn FnMut(&str) + Send)>,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// Overrides the client's retry budget for this call
    pub max_retries: Option<u32>,
}

impl<'a> SendOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn on_chunk(mut self, on_chunk: &'a mut (dyn FnMut(&str) + Send)) -> Self {
        self.on_chunk = Some(on_chunk);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Outcome of [`ChatClient::test_connection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTestResult {
    pub success: bool,

    /// 0-based index of the key that answered
    pub active_key_index: Option<usize>,

    pub total_keys: usize,

    pub error: Option<String>,
}

impl ConnectionTestResult {
    fn success(index: usize, total_keys: usize) -> Self {
        Self {
            success: true,
            active_key_index: Some(index),
            total_keys,
            error: None,
        }
    }

    fn failure(total_keys: usize, error: &str) -> Self {
        Self {
            success: false,
            active_key_index: None,
            total_keys,
            error: Some(error.to_string()),
        }
    }
}

/// Builder for [`ChatClient`]
pub struct ChatClientBuilder {
    model: String,
    api_key: Option<String>,
    max_retries: Option<u32>,
    config: Option<GatewayConfig>,
    secrets: Option<Arc<dyn SecretSource>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ChatClientBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: None,
            max_retries: None,
            config: None,
            secrets: None,
            transport: None,
        }
    }

    /// Use this single key instead of resolving a pool
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Use this configuration instead of the default loader
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ChatClient> {
        let config = match self.config {
            Some(config) => config,
            None => ConfigLoader::new()?.into_config(),
        };
        let secrets: Arc<dyn SecretSource> = match self.secrets {
            Some(secrets) => secrets,
            None => Arc::new(EnvSecrets),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_config(&config.request)?),
        };

        let resolver = KeyPoolResolver::from_config(&config, secrets);
        let pool = CredentialPool::randomized(resolver.resolve(&self.model, self.api_key.as_deref()));

        let mut retry = config.retry.policy();
        if let Some(max_retries) = self.max_retries {
            retry = retry.with_max_retries(max_retries);
        }

        debug!(
            model = %self.model,
            keys = pool.len(),
            position = pool.position(),
            "chat client ready"
        );

        Ok(ChatClient {
            model: self.model,
            pool,
            resolver,
            transport,
            config,
            retry,
        })
    }
}

/// Multi-key chat client for one model.
///
/// Not meant for overlapping calls: `send` and `test_connection` take
/// `&mut self` because they move the active-key cursor.
pub struct ChatClient {
    model: String,
    pool: CredentialPool,
    resolver: KeyPoolResolver,
    transport: Arc<dyn Transport>,
    config: GatewayConfig,
    retry: RetryPolicy,
}

impl ChatClient {
    /// Client for `model` using the default config, environment keys and HTTP transport
    pub fn new(model: impl Into<String>) -> Result<Self> {
        ChatClientBuilder::new(model).build()
    }

    /// Client for `model` that only ever uses `api_key`
    pub fn with_api_key(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        ChatClientBuilder::new(model).api_key(api_key).build()
    }

    pub fn builder(model: impl Into<String>) -> ChatClientBuilder {
        ChatClientBuilder::new(model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Number of keys in the pool
    pub fn key_count(&self) -> usize {
        self.pool.len()
    }

    /// 1-based position of the active key, 0 when there are no keys
    pub fn current_key_position(&self) -> usize {
        self.pool.position()
    }

    /// Switch models. The pool is re-resolved from configuration (an explicit
    /// key given at construction no longer applies) and the cursor goes back
    /// to the first key.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.pool.reset(self.resolver.resolve_pool(&self.model));
        debug!(model = %self.model, keys = self.pool.len(), "model switched");
    }

    /// Send `messages` and return the reply text.
    ///
    /// With `on_chunk` set the reply is streamed and every increment is
    /// passed to the callback before the full text is returned.
    pub async fn send(
        &mut self,
        messages: &[ChatMessage],
        mut options: SendOptions<'_>,
    ) -> Result<String> {
        if self.pool.is_empty() {
            return Err(ChatError::NoCredentials {
                model: self.model.clone(),
            });
        }

        let model = options.model.take().unwrap_or_else(|| self.model.clone());
        let max_retries = options.max_retries.unwrap_or(self.retry.max_retries);
        let attempts = max_retries.saturating_add(1);

        let request = CompletionRequest::new(model.as_str(), messages)
            .with_temperature(options.temperature.unwrap_or(self.config.request.temperature))
            .with_max_tokens(options.max_tokens.unwrap_or(self.config.request.max_tokens))
            .with_stream(options.on_chunk.is_some());
        let body = serde_json::to_value(&request)?;
        let url = self.config.chat_url();

        let mut attempt: u32 = 0;
        loop {
            let key = self
                .pool
                .current()
                .map(str::to_string)
                .ok_or_else(|| ChatError::Internal("active key out of range".to_string()))?;

            debug!(
                model = %model,
                attempt = attempt.saturating_add(1),
                attempts,
                key = %mask_key(&key),
                position = self.pool.position(),
                "sending chat request"
            );

            let err = match self
                .attempt(&url, &key, &body, options.on_chunk.as_deref_mut())
                .await
            {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            let Some(fault) = err.key_fault() else {
                return Err(err);
            };

            warn!(
                attempt = attempt.saturating_add(1),
                attempts,
                position = self.pool.position(),
                keys = self.pool.len(),
                %fault,
                error = %err,
                "API key rejected, switching to next key"
            );
            self.pool.rotate();

            if attempt >= max_retries {
                error!(attempts, model = %model, "all attempts failed");
                return Err(ChatError::AllAttemptsExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.retry.delay_for(attempt);
            info!(delay_ms = delay.as_millis() as u64, "waiting before next attempt");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One request with one key, including reading the whole body
    async fn attempt(
        &self,
        url: &str,
        key: &str,
        body: &serde_json::Value,
        on_chunk: Option<&mut (dyn FnMut(&str) + Send + '_)>,
    ) -> Result<String> {
        let headers = self.config.chat_headers(key)?;
        let response = self.transport.post_json(url, &headers, body).await?;

        if !response.is_success() {
            let status = response.status.as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::from_gateway_response(status, &text));
        }

        match on_chunk {
            Some(on_chunk) => StreamAccumulator::new(on_chunk).consume(response.body).await,
            None => {
                let text = response.text().await?;
                let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
                    ChatError::Response(format!(
                        "Failed to parse response: {}. Body: {}",
                        e,
                        text.chars().take(500).collect::<String>()
                    ))
                })?;
                Ok(parsed.content())
            }
        }
    }

    /// Find a working key.
    ///
    /// Probes the active key first, then every other key once in pool order.
    /// The first key that answers becomes active. Never fails; the outcome is
    /// in the result.
    pub async fn test_connection(&mut self) -> ConnectionTestResult {
        let total = self.pool.len();
        if total == 0 {
            error!(model = %self.model, "no API keys available to test");
            return ConnectionTestResult::failure(0, "No API keys available");
        }

        info!(keys = total, "testing connection");

        let current = self.pool.cursor();
        let order = std::iter::once(current).chain((0..total).filter(move |i| *i != current));

        for index in order {
            if self.probe(index).await {
                self.pool.select(index);
                return ConnectionTestResult::success(index, total);
            }
        }

        error!(keys = total, "connection failed with every available API key");
        ConnectionTestResult::failure(total, "Connection failed with every available API key")
    }

    async fn probe(&self, index: usize) -> bool {
        let Some(key) = self.pool.get(index) else {
            return false;
        };
        let position = index + 1;

        let headers = match bearer_headers(key) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(position, error = %e, "cannot probe API key");
                return false;
            }
        };

        match self.transport.get(&self.config.models_url(), &headers).await {
            Ok(response) if response.is_success() => {
                info!(position, "API key verified");
                true
            }
            Ok(response) => {
                warn!(position, status = %response.status, "API key probe rejected");
                false
            }
            Err(e) => {
                warn!(position, error = %e, "API key probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::TransportResponse;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::{HeaderMap, AUTHORIZATION};
    use reqwest::StatusCode;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    const INVALID_KEY: &str =
        r#"{"error":{"message":"Invalid API key","code":"invalid_api_key"}}"#;

    enum Reply {
        Status(u16, &'static str),
        Json(&'static str),
        Stream(Vec<&'static str>),
        Fail(&'static str),
    }

    /// Scripted transport: POSTs pop replies in order, GETs succeed for `valid_keys`
    #[derive(Default)]
    struct FakeTransport {
        script: Mutex<VecDeque<Reply>>,
        valid_keys: Vec<String>,
        posted_keys: Mutex<Vec<String>>,
        posted_bodies: Mutex<Vec<serde_json::Value>>,
        probed_keys: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn scripted(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn accepting(keys: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                valid_keys: keys.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            })
        }

        fn posted_keys(&self) -> Vec<String> {
            self.posted_keys.lock().unwrap().clone()
        }

        fn last_body(&self) -> serde_json::Value {
            self.posted_bodies.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string()
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post_json(
            &self,
            _url: &str,
            headers: &HeaderMap,
            body: &serde_json::Value,
        ) -> Result<TransportResponse> {
            self.posted_keys.lock().unwrap().push(bearer(headers));
            self.posted_bodies.lock().unwrap().push(body.clone());

            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Status(500, "script exhausted"));

            match reply {
                Reply::Status(code, body) => Ok(TransportResponse::from_bytes(
                    StatusCode::from_u16(code).unwrap(),
                    body,
                )),
                Reply::Json(body) => Ok(TransportResponse::from_bytes(StatusCode::OK, body)),
                Reply::Stream(frames) => {
                    let items: Vec<Result<Bytes>> = frames
                        .into_iter()
                        .map(|f| Ok(Bytes::from_static(f.as_bytes())))
                        .collect();
                    Ok(TransportResponse::new(
                        StatusCode::OK,
                        Box::pin(futures::stream::iter(items)),
                    ))
                }
                Reply::Fail(msg) => Err(ChatError::Transport(msg.to_string())),
            }
        }

        async fn get(&self, _url: &str, headers: &HeaderMap) -> Result<TransportResponse> {
            let key = bearer(headers);
            self.probed_keys.lock().unwrap().push(key.clone());

            let status = if self.valid_keys.contains(&key) {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            Ok(TransportResponse::from_bytes(status, "{}"))
        }
    }

    fn config_for(keys: &[&str]) -> (GatewayConfig, HashMap<String, String>) {
        let mut config = GatewayConfig {
            base_url: "https://gateway.test/api/v1".to_string(),
            ..Default::default()
        };
        config.default_keys_env = (1..=keys.len()).map(|i| format!("KEY_{}", i)).collect();

        let secrets = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (format!("KEY_{}", i + 1), k.to_string()))
            .collect();
        (config, secrets)
    }

    fn client(keys: &[&str], transport: Arc<FakeTransport>) -> ChatClient {
        let (config, secrets) = config_for(keys);
        ChatClient::builder("vendor/model")
            .config(config)
            .secrets(Arc::new(secrets))
            .transport(transport)
            .build()
            .unwrap()
    }

    fn key_at(keys: &[&str], index: usize) -> String {
        keys[index % keys.len()].to_string()
    }

    #[test]
    fn test_initial_position_in_range() {
        for _ in 0..50 {
            let c = client(&["k1", "k2", "k3"], FakeTransport::scripted(vec![]));
            assert_eq!(c.key_count(), 3);
            assert!((1..=3).contains(&c.current_key_position()));
        }
    }

    #[tokio::test]
    async fn test_empty_pool_rejects_without_request() {
        let transport = FakeTransport::scripted(vec![Reply::Json("{}")]);
        let mut c = client(&[], transport.clone());

        assert_eq!(c.key_count(), 0);
        assert_eq!(c.current_key_position(), 0);

        let err = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NoCredentials { .. }));
        assert!(transport.posted_keys().is_empty());
    }

    #[tokio::test]
    async fn test_send_returns_first_choice() {
        let transport = FakeTransport::scripted(vec![Reply::Json(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello there"}}]}"#,
        )]);
        let mut c = client(&["k1", "k2"], transport.clone());
        let position = c.current_key_position();

        let reply = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap();
        assert_eq!(reply, "Hello there");
        assert_eq!(c.current_key_position(), position);

        let body = transport.last_body();
        assert_eq!(body["model"], "vendor/model");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_send_options_reach_payload() {
        let transport =
            FakeTransport::scripted(vec![Reply::Json(r#"{"choices":[{"message":{}}]}"#)]);
        let mut c = client(&["k1"], transport.clone());

        let reply = c
            .send(
                &[ChatMessage::user("describe").with_image("data:image/png;base64,AAAA")],
                SendOptions::new()
                    .model("other/model")
                    .temperature(0.25)
                    .max_tokens(64),
            )
            .await
            .unwrap();
        assert_eq!(reply, "");

        let body = transport.last_body();
        assert_eq!(body["model"], "other/model");
        assert_eq!(body["temperature"], 0.25);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["content"][0]["text"], "describe");
        assert_eq!(
            body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
        // the client's own model is untouched
        assert_eq!(c.model(), "vendor/model");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_key_every_attempt_exhausts_budget() {
        let keys = ["k1", "k2", "k3"];
        let transport = FakeTransport::scripted(vec![
            Reply::Status(401, INVALID_KEY),
            Reply::Status(401, INVALID_KEY),
            Reply::Status(401, INVALID_KEY),
            Reply::Status(401, INVALID_KEY),
        ]);
        let mut c = client(&keys, transport.clone());
        let start_cursor = c.current_key_position() - 1;

        let started = Instant::now();
        let err = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match &err {
            ChatError::AllAttemptsExhausted { attempts, last } => {
                assert_eq!(*attempts, 4);
                assert!(last.is_key_fault());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let expected: Vec<String> = (0..4).map(|i| key_at(&keys, start_cursor + i)).collect();
        assert_eq!(transport.posted_keys(), expected);

        // rotated once per attempt
        assert_eq!(c.current_key_position() - 1, (start_cursor + 4) % 3);

        // 1s + 2s + 4s between the four attempts
        assert!(elapsed >= Duration::from_millis(7000));
        assert!(elapsed < Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt() {
        let keys = ["k1", "k2", "k3", "k4"];
        let transport = FakeTransport::scripted(vec![
            Reply::Status(429, ""),
            Reply::Status(402, r#"{"error":{"message":"Insufficient credits","code":402}}"#),
            Reply::Json(r#"{"choices":[{"message":{"content":"finally"}}]}"#),
        ]);
        let mut c = client(&keys, transport.clone());
        let start_cursor = c.current_key_position() - 1;

        let started = Instant::now();
        let reply = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap();

        assert_eq!(reply, "finally");
        let used = transport.posted_keys();
        assert_eq!(used.len(), 3);

        let cursor = c.current_key_position() - 1;
        assert_eq!(cursor, (start_cursor + 2) % 4);
        assert_eq!(used[2], keys[cursor]);

        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_other_errors_propagate_without_rotation() {
        let transport = FakeTransport::scripted(vec![Reply::Status(
            500,
            r#"{"error":{"message":"Internal Server Error","code":500}}"#,
        )]);
        let mut c = client(&["k1", "k2"], transport.clone());
        let position = c.current_key_position();

        let err = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Gateway { status: 500, .. }));
        assert_eq!(transport.posted_keys().len(), 1);
        assert_eq!(c.current_key_position(), position);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let transport = FakeTransport::scripted(vec![Reply::Fail("connection refused")]);
        let mut c = client(&["k1", "k2"], transport.clone());

        let err = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert_eq!(transport.posted_keys().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_rate_limit_message_rotates() {
        let transport = FakeTransport::scripted(vec![
            Reply::Fail("proxy: rate limit reached"),
            Reply::Json(r#"{"choices":[{"message":{"content":"ok"}}]}"#),
        ]);
        let mut c = client(&["k1", "k2"], transport.clone());

        let reply = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap();
        assert_eq!(reply, "ok");

        let used = transport.posted_keys();
        assert_eq!(used.len(), 2);
        assert_ne!(used[0], used[1]);
    }

    #[tokio::test]
    async fn test_per_call_retry_budget() {
        let transport = FakeTransport::scripted(vec![Reply::Status(429, "")]);
        let mut c = client(&["k1", "k2"], transport.clone());

        let err = c
            .send(
                &[ChatMessage::user("hi")],
                SendOptions::new().max_retries(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ChatError::AllAttemptsExhausted { attempts: 1, .. }
        ));
        assert_eq!(transport.posted_keys().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uppercase_quota_message_rotates() {
        let transport = FakeTransport::scripted(vec![
            Reply::Status(403, r#"{"error":{"message":"QUOTA exceeded","code":403}}"#),
            Reply::Json(r#"{"choices":[{"message":{"content":"ok"}}]}"#),
        ]);
        let mut c = client(&["k1", "k2"], transport.clone());

        let reply = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap();

        assert_eq!(reply, "ok");
        let used = transport.posted_keys();
        assert_eq!(used.len(), 2);
        assert_ne!(used[0], used[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_retry_budget_with_logging_enabled() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let transport = FakeTransport::scripted(vec![
            Reply::Status(429, ""),
            Reply::Json(r#"{"choices":[{"message":{"content":"ok"}}]}"#),
        ]);
        let mut c = client(&["k1", "k2"], transport.clone());

        let reply = c
            .send(
                &[ChatMessage::user("hi")],
                SendOptions::new().max_retries(u32::MAX),
            )
            .await
            .unwrap();

        assert_eq!(reply, "ok");
        assert_eq!(transport.posted_keys().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_key_pool_retries_same_key() {
        let transport = FakeTransport::scripted(vec![
            Reply::Status(429, ""),
            Reply::Status(429, ""),
            Reply::Status(429, ""),
            Reply::Status(429, ""),
        ]);
        let mut c = client(&["only"], transport.clone());

        let err = c
            .send(&[ChatMessage::user("hi")], SendOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::AllAttemptsExhausted { .. }));
        assert_eq!(transport.posted_keys(), vec!["only"; 4]);
        assert_eq!(c.current_key_position(), 1);
    }

    #[tokio::test]
    async fn test_streaming_delivers_increments() {
        let transport = FakeTransport::scripted(vec![Reply::Stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n",
            "data: [DONE]\n",
        ])]);
        let mut c = client(&["k1"], transport.clone());

        let mut seen = Vec::new();
        let mut on_chunk = |s: &str| seen.push(s.to_string());
        let reply = c
            .send(
                &[ChatMessage::user("hi")],
                SendOptions::new().on_chunk(&mut on_chunk),
            )
            .await
            .unwrap();

        assert_eq!(reply, "AB");
        assert_eq!(seen, vec!["A", "B"]);
        assert_eq!(transport.last_body()["stream"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_retries_after_key_fault() {
        let transport = FakeTransport::scripted(vec![
            Reply::Status(401, INVALID_KEY),
            Reply::Stream(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n"]),
        ]);
        let mut c = client(&["k1", "k2"], transport.clone());

        let mut seen = Vec::new();
        let mut on_chunk = |s: &str| seen.push(s.to_string());
        let reply = c
            .send(
                &[ChatMessage::user("hi")],
                SendOptions::new().on_chunk(&mut on_chunk),
            )
            .await
            .unwrap();

        assert_eq!(reply, "ok");
        assert_eq!(seen, vec!["ok"]);
    }

    #[test]
    fn test_explicit_key_replaces_pool() {
        let (config, secrets) = config_for(&["k1", "k2", "k3"]);
        let c = ChatClient::builder("vendor/model")
            .api_key("sk-explicit")
            .config(config)
            .secrets(Arc::new(secrets))
            .transport(FakeTransport::scripted(vec![]))
            .build()
            .unwrap();

        assert_eq!(c.key_count(), 1);
        assert_eq!(c.current_key_position(), 1);
    }

    #[test]
    fn test_set_model_resets_cursor_and_reresolves() {
        let (mut config, secrets) = config_for(&["k1", "k2", "k3"]);
        config.models.insert(
            "vendor/dedicated".to_string(),
            crate::config::ModelConfig {
                name: "Dedicated".to_string(),
                api_keys_env: vec!["KEY_3".to_string(), "KEY_2".to_string()],
                ..Default::default()
            },
        );

        let mut c = ChatClient::builder("vendor/model")
            .api_key("sk-explicit")
            .config(config)
            .secrets(Arc::new(secrets))
            .transport(FakeTransport::scripted(vec![]))
            .build()
            .unwrap();
        assert_eq!(c.key_count(), 1);

        // same model again: explicit key dropped, global pool resolved
        c.set_model("vendor/model");
        assert_eq!(c.model(), "vendor/model");
        assert_eq!(c.key_count(), 3);
        assert_eq!(c.current_key_position(), 1);

        c.set_model("vendor/dedicated");
        assert_eq!(c.key_count(), 2);
        assert_eq!(c.current_key_position(), 1);
    }

    #[tokio::test]
    async fn test_connection_finds_third_key() {
        let keys = ["k1", "k2", "k3"];
        let transport = FakeTransport::accepting(&["k3"]);
        let mut c = client(&keys, transport.clone());

        let result = c.test_connection().await;
        assert_eq!(result, ConnectionTestResult::success(2, 3));
        assert_eq!(c.current_key_position(), 3);

        let probed = transport.probed_keys.lock().unwrap().clone();
        assert!(probed.len() <= 3);
        let mut unique = probed.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), probed.len());
        assert_eq!(probed.last().map(String::as_str), Some("k3"));
    }

    #[tokio::test]
    async fn test_connection_all_keys_fail() {
        let transport = FakeTransport::accepting(&[]);
        let mut c = client(&["k1", "k2", "k3"], transport.clone());
        let position = c.current_key_position();

        let result = c.test_connection().await;
        assert!(!result.success);
        assert_eq!(result.total_keys, 3);
        assert_eq!(result.active_key_index, None);
        assert!(result.error.is_some());
        assert_eq!(transport.probed_keys.lock().unwrap().len(), 3);
        assert_eq!(c.current_key_position(), position);
    }

    #[tokio::test]
    async fn test_connection_empty_pool() {
        let transport = FakeTransport::accepting(&["k1"]);
        let mut c = client(&[], transport.clone());

        let result = c.test_connection().await;
        assert!(!result.success);
        assert_eq!(result.total_keys, 0);
        assert!(transport.probed_keys.lock().unwrap().is_empty());
    }
}
