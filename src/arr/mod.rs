//! Radarr and Sonarr API clients.

mod client;
pub mod types;

pub use client::{
    create_client, owning_item, ArrError, MediaBackend, RadarrClient, SonarrClient,
};
