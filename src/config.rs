use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Carrier records per preview chunk.
    pub chunk_size: usize,
    /// Stores per commit-batch worker task.
    pub store_batch_size: usize,
    pub max_workers: usize,
    pub worker_timeout: Duration,
    pub chunk_ttl: Duration,
    pub result_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let chunk_size = positive(&env_map, "CHUNK_SIZE", 2000)? as usize;
        let store_batch_size = positive(&env_map, "STORE_BATCH_SIZE", 50)? as usize;
        let max_workers = positive(&env_map, "MAX_WORKERS", 4)? as usize;
        let worker_timeout = Duration::from_secs(positive(&env_map, "WORKER_TIMEOUT_SECS", 1800)?);
        let chunk_ttl = Duration::from_secs(positive(&env_map, "CHUNK_TTL_SECS", 3600)?);
        let result_ttl = Duration::from_secs(positive(&env_map, "RESULT_TTL_SECS", 86400)?);

        Ok(Config {
            port,
            database_path,
            chunk_size,
            store_batch_size,
            max_workers,
            worker_timeout,
            chunk_ttl,
            result_ttl,
        })
    }

    /// Defaults around an explicit database path, for tests and embedding.
    pub fn with_database_path(database_path: impl Into<String>) -> Self {
        Config {
            port: 8080,
            database_path: database_path.into(),
            chunk_size: 2000,
            store_batch_size: 50,
            max_workers: 4,
            worker_timeout: Duration::from_secs(1800),
            chunk_ttl: Duration::from_secs(3600),
            result_ttl: Duration::from_secs(86400),
        }
    }
}

fn positive(env_map: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = env_map.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be a positive integer, got {}", raw),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.chunk_size, 2000);
        assert_eq!(config.store_batch_size, 50);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.worker_timeout, Duration::from_secs(1800));
        assert_eq!(config.chunk_ttl, Duration::from_secs(3600));
        assert_eq!(config.result_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn test_with_database_path_matches_env_defaults() {
        let from_env = Config::from_env_map(setup_required_env()).unwrap();
        let direct = Config::with_database_path("/tmp/test.db");
        assert_eq!(format!("{from_env:?}"), format!("{direct:?}"));
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("CHUNK_SIZE".to_string(), "0".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "CHUNK_SIZE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("STORE_BATCH_SIZE".to_string(), "10".to_string());
        env_map.insert("WORKER_TIMEOUT_SECS".to_string(), " 60 ".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.store_batch_size, 10);
        assert_eq!(config.worker_timeout, Duration::from_secs(60));
    }
}
