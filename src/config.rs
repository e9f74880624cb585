use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GwCloudError;

pub const GWCLOUD_ENDPOINT: &str = "https://gwcloud.org.au/bilby/graphql";
pub const GWCLOUD_FILE_DOWNLOAD_ENDPOINT: &str = "https://gwcloud.org.au/job/apiv1/file/?fileId=";
pub const GWCLOUD_UPLOADED_JOB_FILE_DOWNLOAD_ENDPOINT: &str =
    "https://gwcloud.org.au/bilby/file_download/?fileId=";
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 20;
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

const DEFAULT_CONFIG_FILE: &str = "gwcloud.json";

/// On-disk form of the client settings. Every field may be omitted.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub file_download_endpoint: Option<String>,
    #[serde(default)]
    pub uploaded_job_file_download_endpoint: Option<String>,
    #[serde(default)]
    pub download_workers: Option<usize>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub file_download_endpoint: String,
    pub uploaded_job_file_download_endpoint: String,
    pub download_workers: usize,
    pub chunk_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: GWCLOUD_ENDPOINT.to_string(),
            file_download_endpoint: GWCLOUD_FILE_DOWNLOAD_ENDPOINT.to_string(),
            uploaded_job_file_download_endpoint: GWCLOUD_UPLOADED_JOB_FILE_DOWNLOAD_ENDPOINT
                .to_string(),
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Download URL for a resolved file id. Uploaded jobs are served from a
    /// separate endpoint.
    pub fn download_url(&self, file_id: &str, is_uploaded_job: bool) -> String {
        let endpoint = if is_uploaded_job {
            &self.uploaded_job_file_download_endpoint
        } else {
            &self.file_download_endpoint
        };
        format!("{endpoint}{file_id}")
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `gwcloud.json` from the working directory when no
    /// path is given. A missing default file yields the built-in settings.
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, GwCloudError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GwCloudError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GwCloudError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ClientConfig, GwCloudError> {
        let defaults = ClientConfig::default();

        let download_workers = config
            .download_workers
            .unwrap_or(defaults.download_workers);
        if download_workers == 0 {
            return Err(GwCloudError::ConfigParse(
                "download_workers must be at least 1".to_string(),
            ));
        }
        let chunk_size = config.chunk_size.unwrap_or(defaults.chunk_size);
        if chunk_size == 0 {
            return Err(GwCloudError::ConfigParse(
                "chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(ClientConfig {
            endpoint: config.endpoint.unwrap_or(defaults.endpoint),
            file_download_endpoint: config
                .file_download_endpoint
                .unwrap_or(defaults.file_download_endpoint),
            uploaded_job_file_download_endpoint: config
                .uploaded_job_file_download_endpoint
                .unwrap_or(defaults.uploaded_job_file_download_endpoint),
            download_workers,
            chunk_size,
            timeout: config.timeout_secs.map(Duration::from_secs),
        })
    }
}
