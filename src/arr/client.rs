use super::types::{ArrItem, MovieCommand, SeriesCommand, SystemStatus};
use crate::config::{ArrConfig, ArrType};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ArrError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("update still pending after {attempts} checks")]
    Pending { attempts: u32 },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ArrError {
    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ArrError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ArrError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ArrError::Pending { .. } => true,
            ArrError::Decode(_) => false,
        }
    }
}

/// A media manager (Radarr or Sonarr) that owns files on disk.
#[async_trait::async_trait]
pub trait MediaBackend: Send + Sync {
    /// Configured instance name, used in logs.
    fn name(&self) -> &str;

    fn kind(&self) -> ArrType;

    /// Test the connection to the *arr instance
    async fn test_connection(&self) -> Result<bool, ArrError>;

    /// Find the movie or series whose folder contains `path`.
    async fn find_item_for_path(&self, path: &Path) -> Result<Option<i64>, ArrError>;

    /// Stop the backend from grabbing this item again.
    async fn blacklist(&self, item_id: i64) -> Result<(), ArrError>;

    /// Trigger a disk rescan for a specific item
    async fn rescan(&self, item_id: i64) -> Result<(), ArrError>;

    /// Trigger a release search for a specific item
    async fn search(&self, item_id: i64) -> Result<(), ArrError>;
}

/// Create an appropriate client based on config
pub fn create_client(config: &ArrConfig) -> Arc<dyn MediaBackend> {
    match config.arr_type {
        ArrType::Radarr => Arc::new(RadarrClient::new(config)),
        ArrType::Sonarr => Arc::new(SonarrClient::new(config)),
    }
}

/// The item whose folder is the deepest ancestor of `path`.
pub fn owning_item<'a>(items: &'a [ArrItem], path: &Path) -> Option<&'a ArrItem> {
    items
        .iter()
        .filter_map(|item| {
            let root = PathBuf::from(item.path.as_deref()?.trim_end_matches('/'));
            path.starts_with(&root).then_some((root.components().count(), item))
        })
        .max_by_key(|(depth, _)| *depth)
        .map(|(_, item)| item)
}

struct BaseArrClient {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    /// `/movie` or `/series`
    items: &'static str,
    blacklist_retries: u32,
    blacklist_retry_delay: Duration,
}

impl BaseArrClient {
    fn new(config: &ArrConfig, items: &'static str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            items,
            blacklist_retries: config.blacklist_retries,
            blacklist_retry_delay: Duration::from_secs(config.blacklist_retry_delay_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3{}", self.base_url, path)
    }

    async fn checked(response: Response) -> Result<Response, ArrError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ArrError::Status { status, body })
    }

    async fn get(&self, path: &str) -> Result<Response, ArrError> {
        let response = self
            .client
            .get(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;
        Self::checked(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ArrError> {
        self.get(path)
            .await?
            .json()
            .await
            .map_err(|e| ArrError::Decode(format!("GET {path}: {e}")))
    }

    async fn post_command<T: Serialize>(&self, command: &T) -> Result<(), ArrError> {
        let response = self
            .client
            .post(self.url("/command"))
            .header("X-Api-Key", &self.api_key)
            .json(command)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, ArrError> {
        match self.get_json::<SystemStatus>("/system/status").await {
            Ok(status) => {
                tracing::debug!(
                    backend = %self.name,
                    app = status.app_name.as_deref().unwrap_or("unknown"),
                    version = status.version.as_deref().unwrap_or("unknown"),
                    "Connected"
                );
                Ok(true)
            }
            Err(ArrError::Status { status, .. }) if status.is_client_error() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find_item_for_path(&self, path: &Path) -> Result<Option<i64>, ArrError> {
        let items: Vec<ArrItem> = self.get_json(self.items).await?;
        let found = owning_item(&items, path);
        if let Some(item) = found {
            tracing::debug!(
                backend = %self.name,
                item_id = item.id,
                title = %item.title,
                "Owner of {} found",
                path.display()
            );
        }
        Ok(found.map(|item| item.id))
    }

    /// Unmonitor the item. A 202 means the backend queued the update, so
    /// re-read the item until it reports unmonitored or retries run out.
    async fn unmonitor(&self, item_id: i64) -> Result<(), ArrError> {
        let path = format!("{}/{}", self.items, item_id);

        let mut item: serde_json::Value = self.get_json(&path).await?;
        let Some(fields) = item.as_object_mut() else {
            return Err(ArrError::Decode(format!("GET {path}: not an object")));
        };
        fields.insert("monitored".into(), serde_json::Value::Bool(false));

        let response = self
            .client
            .put(self.url(&path))
            .header("X-Api-Key", &self.api_key)
            .json(&item)
            .send()
            .await?;
        let response = Self::checked(response).await?;

        if response.status() != StatusCode::ACCEPTED {
            return Ok(());
        }

        let attempts = self.blacklist_retries.max(1);
        for attempt in 1..=attempts {
            tokio::time::sleep(self.blacklist_retry_delay).await;
            let current: ArrItem = self.get_json(&path).await?;
            // A record without the field proves nothing yet.
            if current.monitored == Some(false) {
                return Ok(());
            }
            tracing::debug!(
                backend = %self.name,
                item_id,
                "Unmonitor still pending ({}/{})",
                attempt,
                attempts
            );
        }

        Err(ArrError::Pending { attempts })
    }
}

pub struct RadarrClient(BaseArrClient);

impl RadarrClient {
    pub fn new(config: &ArrConfig) -> Self {
        Self(BaseArrClient::new(config, "/movie"))
    }
}

#[async_trait::async_trait]
impl MediaBackend for RadarrClient {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn kind(&self) -> ArrType {
        ArrType::Radarr
    }

    async fn test_connection(&self) -> Result<bool, ArrError> {
        self.0.test_connection().await
    }

    async fn find_item_for_path(&self, path: &Path) -> Result<Option<i64>, ArrError> {
        self.0.find_item_for_path(path).await
    }

    async fn blacklist(&self, movie_id: i64) -> Result<(), ArrError> {
        self.0.unmonitor(movie_id).await
    }

    async fn rescan(&self, movie_id: i64) -> Result<(), ArrError> {
        self.0
            .post_command(&MovieCommand::rescan(movie_id))
            .await
    }

    async fn search(&self, movie_id: i64) -> Result<(), ArrError> {
        self.0
            .post_command(&MovieCommand::search(movie_id))
            .await
    }
}

pub struct SonarrClient(BaseArrClient);

impl SonarrClient {
    pub fn new(config: &ArrConfig) -> Self {
        Self(BaseArrClient::new(config, "/series"))
    }

    fn command(name: &'static str, series_id: i64) -> SeriesCommand {
        SeriesCommand { name, series_id }
    }
}

#[async_trait::async_trait]
impl MediaBackend for SonarrClient {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn kind(&self) -> ArrType {
        ArrType::Sonarr
    }

    async fn test_connection(&self) -> Result<bool, ArrError> {
        self.0.test_connection().await
    }

    async fn find_item_for_path(&self, path: &Path) -> Result<Option<i64>, ArrError> {
        self.0.find_item_for_path(path).await
    }

    async fn blacklist(&self, series_id: i64) -> Result<(), ArrError> {
        self.0.unmonitor(series_id).await
    }

    async fn rescan(&self, series_id: i64) -> Result<(), ArrError> {
        self.0
            .post_command(&Self::command("RescanSeries", series_id))
            .await
    }

    async fn search(&self, series_id: i64) -> Result<(), ArrError> {
        self.0
            .post_command(&Self::command("SeriesSearch", series_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, path: Option<&str>) -> ArrItem {
        ArrItem {
            id,
            title: format!("item {id}"),
            path: path.map(String::from),
            monitored: Some(true),
        }
    }

    #[test]
    fn owner_is_deepest_ancestor() {
        let items = vec![
            item(1, Some("/tv")),
            item(2, Some("/tv/Show")),
            item(3, Some("/tv/Show Two")),
            item(4, None),
        ];
        let owner = owning_item(&items, Path::new("/tv/Show/Season 1/e01.mkv")).unwrap();
        assert_eq!(owner.id, 2);
    }

    #[test]
    fn prefix_without_separator_does_not_match() {
        let items = vec![item(1, Some("/movies/Heat"))];
        assert!(owning_item(&items, Path::new("/movies/Heat 2/a.mkv")).is_none());
    }

    #[test]
    fn trailing_slash_in_item_path() {
        let items = vec![item(9, Some("/movies/Heat (1995)/"))];
        let owner = owning_item(&items, Path::new("/movies/Heat (1995)/Heat.mkv"));
        assert_eq!(owner.map(|i| i.id), Some(9));
    }

    #[test]
    fn transient_classification() {
        assert!(ArrError::Pending { attempts: 3 }.is_transient());
        assert!(ArrError::Status {
            status: StatusCode::BAD_GATEWAY,
            body: String::new()
        }
        .is_transient());
        assert!(!ArrError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new()
        }
        .is_transient());
        assert!(!ArrError::Decode("x".into()).is_transient());
    }
}
