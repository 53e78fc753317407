//! REST endpoints of the chat backend.
//!
//! Responses are decoded whatever the HTTP status, because the backend
//! reports most failures as `{"success": false, "message": ...}` bodies. Only
//! a body that does not decode is turned into a status error.

use async_trait::async_trait;
use chatroom_core::weather::WeatherReport;
use reqwest::{Client, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded with {0}")]
    Status(StatusCode),
    #[error("unexpected response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// The canonical account name; may differ in case from what was typed.
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NicknameAvailability {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl ServerConfig {
    pub fn contains(&self, address: &str) -> bool {
        self.servers.iter().any(|server| server.address == address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WeatherResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Option<WeatherReport>,
}

impl WeatherResponse {
    /// The report, if the provider answered `200` with at least one day.
    pub fn into_report(self) -> Option<WeatherReport> {
        if self.code != 200 {
            return None;
        }
        self.data.filter(|report| !report.forecasts.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CityMatch {
    #[serde(default)]
    pub adcode: serde_json::Value,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CityResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<CityMatch>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The REST surface the controller depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, username: &str, password: &SecretString)
    -> Result<LoginResponse, ApiError>;

    async fn register(
        &self,
        username: &str,
        password: &SecretString,
        confirm: &SecretString,
    ) -> Result<RegisterResponse, ApiError>;

    async fn check_nickname(&self, nickname: &str) -> Result<NicknameAvailability, ApiError>;

    /// Lists the real-time servers a client may join.
    async fn server_config(&self) -> Result<ServerConfig, ApiError>;

    async fn weather(&self, city: &str) -> Result<WeatherResponse, ApiError>;

    async fn lookup_city(&self, name: &str) -> Result<CityResponse, ApiError>;
}

/// `ChatApi` over HTTP with reqwest.
pub struct HttpChatApi {
    client: Client,
    base: Url,
    weather_url: Option<Url>,
    weather_key: Option<SecretString>,
}

impl HttpChatApi {
    pub fn new(base: Url) -> Self {
        Self {
            client: Client::new(),
            base,
            weather_url: None,
            weather_key: None,
        }
    }

    /// Points weather queries at a dedicated endpoint and/or adds a key.
    pub fn with_weather(mut self, url: Option<Url>, key: Option<SecretString>) -> Self {
        self.weather_url = url;
        self.weather_key = key;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::Endpoint(format!("{path}: {e}")))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<T>(&body) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(ApiError::Status(status)),
            Err(e) => Err(ApiError::Decode(e)),
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    #[instrument(skip(self, password))]
    async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, ApiError> {
        let response = self
            .client
            .post(self.endpoint("api/login")?)
            .json(&json!({
                "username": username,
                "password": password.expose_secret(),
            }))
            .send()
            .await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self, password, confirm))]
    async fn register(
        &self,
        username: &str,
        password: &SecretString,
        confirm: &SecretString,
    ) -> Result<RegisterResponse, ApiError> {
        let response = self
            .client
            .post(self.endpoint("api/register")?)
            .json(&json!({
                "username": username,
                "password": password.expose_secret(),
                "confirm_password": confirm.expose_secret(),
            }))
            .send()
            .await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self))]
    async fn check_nickname(&self, nickname: &str) -> Result<NicknameAvailability, ApiError> {
        let mut url = self.endpoint("api/check-nickname")?;
        url.query_pairs_mut().append_pair("nickname", nickname);
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self))]
    async fn server_config(&self) -> Result<ServerConfig, ApiError> {
        let response = self.client.get(self.endpoint("api/config")?).send().await?;
        let config: ServerConfig = Self::read_json(response).await?;
        debug!(servers = config.servers.len(), "Fetched server list");
        Ok(config)
    }

    #[instrument(skip(self))]
    async fn weather(&self, city: &str) -> Result<WeatherResponse, ApiError> {
        let mut url = match &self.weather_url {
            Some(url) => url.clone(),
            None => self.endpoint("api/weather")?,
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("city", city);
            if let Some(key) = &self.weather_key {
                query.append_pair("key", key.expose_secret());
            }
        }
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self))]
    async fn lookup_city(&self, name: &str) -> Result<CityResponse, ApiError> {
        let mut url = self.endpoint("api/city")?;
        url.query_pairs_mut().append_pair("name", name);
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }
}
