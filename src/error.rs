use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GwCloudError {
    #[error("your API token does not exist, make sure it is correct")]
    #[diagnostic(
        code(gwcloud::authentication),
        help(
            "read the API token documentation at \
             https://gwcloud-python.readthedocs.io/en/latest/gettingstarted.html#getting-access \
             or head straight to https://gwcloud.org.au/auth/api-token to create one"
        )
    )]
    Authentication,

    #[error("GWCloud request failed: {0}")]
    Http(String),

    #[error("GWCloud returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("GWCloud reported an error: {0}")]
    Graphql(String),

    #[error("unexpected GWCloud response: {0}")]
    MalformedResponse(String),

    #[error("the supporting file \"{0}\" does not exist")]
    SupportingFileMissing(PathBuf),

    #[error("{0}")]
    UploadFailed(String),

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("invalid file reference: {0}")]
    InvalidFileReference(String),

    #[error("job {job_id}: requested {expected} download ids, received {actual}")]
    DownloadIdMismatch {
        job_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to build job archive: {0}")]
    Archive(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}
