use anyhow::anyhow;
use rand::{distributions, Rng};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api/catalog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    None,
}

impl FromStr for CacheBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "local" => Ok(Self::Memory),
            "none" | "off" | "dummy" => Ok(Self::None),
            other => Err(anyhow!("Unknown cache backend: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub api_timeout: Duration,
    pub api_retries: u32,
    pub bind_addr: String,
    pub port: u16,
    pub cache_backend: CacheBackendKind,
    pub cache_capacity: usize,
    pub fetch_workers: usize,
    pub import_files_dir: PathBuf,
    pub access_policy: String,
    pub default_agent: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Self {
            api_url: envmnt::get_or("CATALOG_API_URL", DEFAULT_API_URL),
            api_timeout: Duration::from_secs(parse_or("CATALOG_API_TIMEOUT_SECS", 30)?),
            api_retries: parse_or("CATALOG_API_RETRIES", 3)?,
            bind_addr: envmnt::get_or("BIND_ADDR", "0.0.0.0"),
            port: parse_or("PORT", 8080)?,
            cache_backend: envmnt::get_or("CACHE_BACKEND", "memory").parse()?,
            cache_capacity: parse_or::<usize>("CACHE_CAPACITY", crate::cache::DEFAULT_CAPACITY)?
                .max(1),
            fetch_workers: parse_or::<usize>("FETCH_WORKERS", 10)?.max(1),
            import_files_dir: envmnt::get_or("IMPORT_FILES_DIR", "FILES").into(),
            access_policy: envmnt::get_or("ACCESS_POLICY", "staff"),
            default_agent: envmnt::get_or("DEFAULT_AGENT", crate::import::DEFAULT_AGENT),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_timeout: Duration::from_secs(30),
            api_retries: 3,
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            cache_backend: CacheBackendKind::Memory,
            cache_capacity: crate::cache::DEFAULT_CAPACITY,
            fetch_workers: crate::catalog::DEFAULT_FETCH_WORKERS,
            import_files_dir: PathBuf::from("FILES"),
            access_policy: "staff".to_string(),
            default_agent: crate::import::DEFAULT_AGENT.to_string(),
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match envmnt::get_parse(key) {
        Ok(v) => Ok(v),
        Err(envmnt::errors::EnvmntError::Missing(_)) => Ok(default),
        Err(err) => Err(anyhow!("Invalid value for {key}: {err}")),
    }
}

/// Name of the env file for the current deployment.
pub fn env_file() -> &'static str {
    match std::env::var("CATALOG_ENVIRONMENT").as_deref() {
        Ok("staging") => ".env.staging",
        _ => ".env",
    }
}

/// Loads the env file into the process environment, creating an empty one
/// when it does not exist yet.
pub fn load_env_file() -> Result<&'static str, anyhow::Error> {
    let path = env_file();
    match std::fs::File::open(path) {
        Ok(_) => envmnt::load_file(path)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(path)?;
            envmnt::load_file(path)?;
        }
        Err(err) => {
            return Err(anyhow!("Unable to open {path} file: {err}"));
        }
    }
    Ok(path)
}

/// Cookie signing key. Generated on first start and appended to the env file
/// so sessions survive restarts.
pub fn session_key(env_path: &str) -> Result<String, anyhow::Error> {
    match envmnt::get_parse("SESSION_KEY") {
        Ok(v) => Ok(v),
        Err(envmnt::errors::EnvmntError::Missing(_)) => {
            let key = rand::thread_rng()
                .sample_iter(distributions::Alphanumeric)
                .take(64)
                .map(char::from)
                .collect::<String>();
            let mut f = std::fs::File::options().append(true).open(env_path)?;
            f.write_all(format!("\nSESSION_KEY={key}\n").as_bytes())?;
            Ok(key)
        }
        Err(err) => Err(anyhow!("Unable to read secret key: {err}")),
    }
}
