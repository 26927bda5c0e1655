use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Runtime configuration for the serving process and the crawl driver.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the live (serving) database file.
    pub db_path: PathBuf,
    /// Bind address for the HTTP server.
    pub host: IpAddr,
    /// Bind port for the HTTP server.
    pub port: u16,
    /// Capacity of the response cache (entry count).
    pub cache_capacity: usize,
    /// Minimum star count the crawl driver starts its walk from.
    pub crawl_min_stars: u32,
    /// UTC hours at which the in-process scheduler fires a crawl pass.
    pub crawl_hours: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("repos.db"),
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8080,
            cache_capacity: 10_000,
            crawl_min_stars: 1_000,
            crawl_hours: vec![0, 6, 12, 18],
        }
    }
}

impl Config {
    /// Production defaults: same as [`Config::default`] but bound to all
    /// interfaces, since `production()` is meant for a container/VM deploy
    /// rather than local development.
    pub fn production(db_path: PathBuf) -> Self {
        Self {
            db_path,
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            ..Self::default()
        }
    }

    /// Overlays a TOML config file's fields onto [`Config::default`].
    /// Every field is optional; an absent file is not an error at the call
    /// site (callers check existence first, per `src/bin/repolead.rs`).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile =
            toml::from_str(&raw).map_err(|e| Error::InvalidArgument(format!("bad config file: {e}")))?;
        let mut config = Self::default();
        if let Some(db_path) = file.db_path {
            config.db_path = db_path;
        }
        if let Some(host) = file.host {
            config.host = host;
        }
        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(cache_capacity) = file.cache_capacity {
            config.cache_capacity = cache_capacity;
        }
        if let Some(crawl_min_stars) = file.crawl_min_stars {
            config.crawl_min_stars = crawl_min_stars;
        }
        if let Some(crawl_hours) = file.crawl_hours {
            config.crawl_hours = crawl_hours;
        }
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    host: Option<IpAddr>,
    port: Option<u16>,
    cache_capacity: Option<usize>,
    crawl_min_stars: Option<u32>,
    crawl_hours: Option<Vec<u8>>,
}
