use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::QueryCache;
use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub cache: QueryCache,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            workspace: None,
            db: None,
            cache: QueryCache::new(!config.no_cache),
            config,
        }
    }
}
