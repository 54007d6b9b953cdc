use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub uploads_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://attendance.db".into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
            uploads_dir: PathBuf::from("uploads/documents"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: std::env::var("BIND_ADDR")
                .ok()
                .and_then(|a| a.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            busy_timeout: std::env::var("DB_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            uploads_dir: std::env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
        }
    }
}
