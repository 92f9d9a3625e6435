use serde::{Deserialize, Serialize};

/// The part of a Radarr movie or Sonarr series record we care about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrItem {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    /// Root folder of the movie or series on the backend's filesystem.
    pub path: Option<String>,
    /// Absent when the backend omitted the field.
    #[serde(default)]
    pub monitored: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Radarr commands disagree on the id field: `RescanMovie` reads a single
/// `movieId`, `MoviesSearch` reads `movieIds`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieCommand {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub movie_ids: Vec<i64>,
}

impl MovieCommand {
    pub fn rescan(movie_id: i64) -> Self {
        Self {
            name: "RescanMovie",
            movie_id: Some(movie_id),
            movie_ids: Vec::new(),
        }
    }

    pub fn search(movie_id: i64) -> Self {
        Self {
            name: "MoviesSearch",
            movie_id: None,
            movie_ids: vec![movie_id],
        }
    }
}

/// Sonarr commands take a single series id.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesCommand {
    pub name: &'static str,
    pub series_id: i64,
}
