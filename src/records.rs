//! Typed forms of the GraphQL payloads.
//!
//! Responses are first passed through [`convert_keys`] with the renames
//! below, then deserialized here:
//!
//! | wire key                | record field            |
//! |-------------------------|-------------------------|
//! | `id`                    | `job_id`                |
//! | `name`                  | `name`                  |
//! | `description`           | `description`           |
//! | `user` / `userId`       | `user`                  |
//! | `jobStatus.name`        | `job_status.name`       |
//! | `jobStatus.date`        | `job_status.date`       |
//! | `eventId.*`             | `event_id.*`            |
//! | `path`                  | `path`                  |
//! | `isDir`                 | `is_dir`                |
//! | `fileSize`              | `file_size`             |
//! | `downloadToken`         | `download_token`        |
//!
//! Any other job attribute is kept, snake_case keyed, in `BilbyJob::other`.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::domain::{EventId, JobId, JobStatus, null_as_default};
use crate::error::GwCloudError;
use crate::file_reference::FileReferenceList;
use crate::job::{BilbyJob, JobFileSource};
use crate::keys::convert_keys;

pub const JOB_KEY_MAP: &[(&str, &str)] = &[("id", "job_id")];

#[derive(Debug, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, alias = "user_id", deserialize_with = "scalar_text")]
    pub user: Option<String>,
    #[serde(default)]
    pub job_status: Option<JobStatusRecord>,
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusRecord {
    pub name: String,
    pub date: String,
}

impl JobRecord {
    /// Normalizes a raw job node and reads it.
    pub fn from_value(value: Value) -> Result<Self, GwCloudError> {
        serde_json::from_value(convert_keys(value, JOB_KEY_MAP, false))
            .map_err(|err| GwCloudError::MalformedResponse(format!("job record: {err}")))
    }

    pub fn into_job(self, source: Arc<dyn JobFileSource>) -> Result<BilbyJob, GwCloudError> {
        let status = self
            .job_status
            .map(|status| JobStatus::parse(status.name, &status.date))
            .transpose()?;
        Ok(BilbyJob {
            job_id: self.job_id,
            name: self.name,
            description: self.description,
            status,
            event_id: self.event_id,
            user: self.user,
            other: self.other,
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultFileRecord {
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_dir: bool,
    pub file_size: Value,
    pub download_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResultFilesRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<ResultFileRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_uploaded_job: bool,
}

impl ResultFilesRecord {
    pub fn from_value(value: Value) -> Result<Self, GwCloudError> {
        serde_json::from_value(convert_keys(value, &[], false))
            .map_err(|err| GwCloudError::MalformedResponse(format!("result files: {err}")))
    }

    /// File references of `job_id`, skipping directories.
    pub fn into_file_list(self, job_id: &JobId) -> Result<FileReferenceList, GwCloudError> {
        let is_uploaded_job = self.is_uploaded_job;
        let mut list = FileReferenceList::new();
        for file in self.files.into_iter().filter(|file| !file.is_dir) {
            list.push_value(serde_json::json!({
                "path": file.path,
                "file_size": file.file_size,
                "download_token": file.download_token,
                "job_id": job_id,
                "is_uploaded_job": is_uploaded_job,
            }))?;
        }
        Ok(list)
    }
}

pub fn event_id_from_value(value: Value) -> Result<EventId, GwCloudError> {
    serde_json::from_value(convert_keys(value, &[], false))
        .map_err(|err| GwCloudError::MalformedResponse(format!("event id: {err}")))
}

fn scalar_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}
