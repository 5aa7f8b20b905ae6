use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Redis,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Backend::Redis),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub backend: Backend,
    pub redis_url: String,
    pub meili_url: String,
    pub meili_key: Option<String>,
    pub jwt_secret: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub minio: MinioConfig,
    pub presign_ttl_secs: u64,
    pub max_upload_bytes: usize,
    pub search_sync_secs: u64,
    pub login_max_attempts: u64,
    pub login_window_secs: u64,
    pub frontend_url: String,
}

#[derive(Clone, Debug)]
pub struct MinioConfig {
    pub endpoint: String,
    pub public_endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let endpoint: String = try_load("MINIO_ENDPOINT", "http://minio:9000")?;

        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            backend: try_load("DATA_BACKEND", "redis")?,
            redis_url: try_load("REDIS_URL", "redis://redis:6379")?,
            meili_url: try_load("MEILI_URL", "http://meilisearch:7700")?,
            meili_key: read_secret("MEILI_ADMIN_KEY"),
            jwt_secret: read_secret("JWT_SECRET")
                .ok_or_else(|| anyhow!("JWT_SECRET must be provided"))?,
            access_ttl_secs: try_load("ACCESS_TOKEN_TTL_SECS", "900")?,
            refresh_ttl_secs: try_load("REFRESH_TOKEN_TTL_SECS", "604800")?,
            minio: MinioConfig {
                public_endpoint: try_load("MINIO_PUBLIC_ENDPOINT", &endpoint)?,
                endpoint,
                bucket: try_load("MINIO_BUCKET", "dronewerx-media")?,
                region: try_load("MINIO_REGION", "us-east-1")?,
                access_key: read_secret("MINIO_ACCESS_KEY"),
                secret_key: read_secret("MINIO_SECRET_KEY"),
            },
            presign_ttl_secs: try_load("PRESIGN_TTL_SECS", "3600")?,
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", "52428800")?,
            search_sync_secs: try_load("SEARCH_SYNC_SECS", "30")?,
            login_max_attempts: try_load("LOGIN_MAX_ATTEMPTS", "5")?,
            login_window_secs: try_load("LOGIN_WINDOW_SECS", "900")?,
            frontend_url: try_load("FRONTEND_URL", "http://localhost:5173")?,
        })
    }

    /// Everything in memory, nothing external. Used for local runs and tests.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Self {
            port: 0,
            backend: Backend::Memory,
            redis_url: String::new(),
            meili_url: String::new(),
            meili_key: None,
            jwt_secret: jwt_secret.to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 604_800,
            minio: MinioConfig {
                endpoint: "http://localhost:9000".to_string(),
                public_endpoint: "http://localhost:9000".to_string(),
                bucket: "dronewerx-media".to_string(),
                region: "us-east-1".to_string(),
                access_key: None,
                secret_key: None,
            },
            presign_ttl_secs: 3600,
            max_upload_bytes: 5 * 1024 * 1024,
            search_sync_secs: 30,
            login_max_attempts: 5,
            login_window_secs: 900,
            frontend_url: "http://localhost:5173".to_string(),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value: {e}"))
}

/// Docker secrets first, then the environment.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path).context(path) {
        Ok(value) => Some(value.trim().to_string()),
        Err(e) => {
            let fallback = var(secret_name);
            if fallback.is_none() {
                warn!("Failed to read {secret_name}: {e:#}");
            }
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Redis".parse::<Backend>(), Ok(Backend::Redis));
        assert_eq!("memory".parse::<Backend>(), Ok(Backend::Memory));
        assert!("postgres".parse::<Backend>().is_err());
    }

    #[test]
    fn defaults_apply_for_missing_keys() {
        let port: u16 = try_load("DRONEWERX_TEST_UNSET_PORT", "1111").unwrap();
        assert_eq!(port, 1111);
    }

    #[test]
    fn bad_default_is_an_error() {
        let port: Result<u16> = try_load("DRONEWERX_TEST_UNSET_PORT", "not a port");
        assert!(port.is_err());
    }
}
