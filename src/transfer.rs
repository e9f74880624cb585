//! Batched, concurrent transfer of job result files.
//!
//! Download tokens handed out with a file listing are single purpose: they
//! are exchanged for download ids (one round trip per owning job) right
//! before the bytes are fetched. The fetches then run on a fixed-width
//! worker pool sharing one byte counter.

use std::fs::File;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::info;

use crate::config::ClientConfig;
use crate::domain::JobId;
use crate::error::GwCloudError;
use crate::file_reference::FileReferenceList;
use crate::graphql::GraphqlClient;
use crate::pool::run_ordered;
use crate::progress::{ProgressCounter, ProgressSink};

const GENERATE_DOWNLOAD_IDS: &str = r#"
    mutation ResultFileMutation($input: GenerateFileDownloadIdsInput!) {
        generateFileDownloadIds(input: $input) {
            result
        }
    }
"#;

pub trait FileFetcher: Send + Sync {
    /// Streams the body at `url` into `out`, calling `progress` with the size
    /// of every chunk written.
    fn fetch(
        &self,
        url: &str,
        out: &mut dyn Write,
        progress: &dyn Fn(u64),
    ) -> Result<(), GwCloudError>;
}

#[derive(Clone)]
pub struct HttpFileFetcher {
    client: Client,
    chunk_size: usize,
}

impl HttpFileFetcher {
    pub fn new(config: &ClientConfig) -> Result<Self, GwCloudError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gwcloud-client/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GwCloudError::Http(err.to_string()))?,
        );
        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| GwCloudError::Http(err.to_string()))?;
        Ok(Self {
            client,
            chunk_size: config.chunk_size.max(1),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, GwCloudError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "file download failed".to_string());
        Err(GwCloudError::Status { status, message })
    }
}

impl FileFetcher for HttpFileFetcher {
    fn fetch(
        &self,
        url: &str,
        out: &mut dyn Write,
        progress: &dyn Fn(u64),
    ) -> Result<(), GwCloudError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| GwCloudError::Http(err.to_string()))?;
        let mut response = Self::handle_status(response)?;

        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| GwCloudError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])
                .map_err(|err| GwCloudError::Filesystem(err.to_string()))?;
            progress(read as u64);
        }
        out.flush()
            .map_err(|err| GwCloudError::Filesystem(err.to_string()))
    }
}

/// Content of one downloaded file, keyed by its path within the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: Utf8PathBuf,
    pub content: Vec<u8>,
}

struct DownloadTask<T> {
    url: String,
    target: T,
}

pub struct TransferEngine<'a> {
    graphql: &'a dyn GraphqlClient,
    fetcher: &'a dyn FileFetcher,
    config: &'a ClientConfig,
    progress: &'a dyn ProgressSink,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        graphql: &'a dyn GraphqlClient,
        fetcher: &'a dyn FileFetcher,
        config: &'a ClientConfig,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            graphql,
            fetcher,
            config,
            progress,
        }
    }

    /// Exchanges download tokens of one job for download ids, in token order.
    pub fn download_ids(
        &self,
        job_id: &JobId,
        tokens: &[String],
    ) -> Result<Vec<String>, GwCloudError> {
        let data = self.graphql.request(
            GENERATE_DOWNLOAD_IDS,
            json!({
                "input": {
                    "jobId": job_id,
                    "downloadTokens": tokens,
                }
            }),
        )?;
        let ids = data
            .pointer("/generateFileDownloadIds/result")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GwCloudError::MalformedResponse(
                    "generateFileDownloadIds carried no result".to_string(),
                )
            })?
            .iter()
            .map(|id| match id {
                Value::String(text) => Ok(text.clone()),
                Value::Number(number) => Ok(number.to_string()),
                other => Err(GwCloudError::MalformedResponse(format!(
                    "download id is not a scalar: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if ids.len() != tokens.len() {
            return Err(GwCloudError::DownloadIdMismatch {
                job_id: job_id.to_string(),
                expected: tokens.len(),
                actual: ids.len(),
            });
        }
        Ok(ids)
    }

    /// Resolves the download URL of every file, in the order of `files`.
    fn resolve_urls(&self, files: &FileReferenceList) -> Result<Vec<String>, GwCloudError> {
        let mut urls: Vec<Option<String>> = vec![None; files.len()];
        for batch in files.batch_by_job_id() {
            let ids = self.download_ids(&batch.job_id, &batch.files.tokens())?;
            for (position, id) in batch.positions.iter().zip(ids) {
                urls[*position] = Some(self.config.download_url(&id, batch.is_uploaded_job));
            }
        }
        Ok(urls.into_iter().flatten().collect())
    }

    /// Downloads every file into memory. The result follows the order of
    /// `files`, whichever jobs they belong to.
    pub fn fetch_files(
        &self,
        files: &FileReferenceList,
    ) -> Result<Vec<DownloadedFile>, GwCloudError> {
        let tasks = self
            .resolve_urls(files)?
            .into_iter()
            .zip(files.paths())
            .map(|(url, target)| DownloadTask { url, target })
            .collect::<Vec<_>>();
        let counter = ProgressCounter::new(files.total_bytes(), self.progress);

        let downloaded = run_ordered(tasks, self.config.download_workers, |task| {
            let mut content = Vec::new();
            self.fetcher
                .fetch(&task.url, &mut content, &|bytes| counter.advance(bytes))?;
            Ok(DownloadedFile {
                path: task.target,
                content,
            })
        })?;

        info!(
            files = downloaded.len(),
            bytes = counter.transferred(),
            "All {} files downloaded!",
            downloaded.len()
        );
        Ok(downloaded)
    }

    /// Downloads every file below `root`, creating directories as needed and
    /// overwriting existing files.
    pub fn save_files(
        &self,
        files: &FileReferenceList,
        root: &Utf8Path,
        preserve_directory_structure: bool,
    ) -> Result<(), GwCloudError> {
        let tasks = self
            .resolve_urls(files)?
            .into_iter()
            .zip(files.output_paths(root, preserve_directory_structure))
            .map(|(url, target)| DownloadTask { url, target })
            .collect::<Vec<_>>();
        let counter = ProgressCounter::new(files.total_bytes(), self.progress);

        let saved = run_ordered(tasks, self.config.download_workers, |task| {
            if let Some(parent) = task.target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| GwCloudError::Filesystem(err.to_string()))?;
            }
            let mut file = File::create(&task.target).map_err(|err| {
                GwCloudError::Filesystem(format!("create {}: {err}", task.target))
            })?;
            self.fetcher
                .fetch(&task.url, &mut file, &|bytes| counter.advance(bytes))
        })?;

        info!(
            files = saved.len(),
            bytes = counter.transferred(),
            root = %root,
            "All {} files saved!",
            saved.len()
        );
        Ok(())
    }
}
