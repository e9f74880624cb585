use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use serde_json::{Map, Value};

use crate::domain::{EventId, JobId, JobStatus};
use crate::error::GwCloudError;
use crate::file_reference::FileReferenceList;
use crate::filters;
use crate::transfer::DownloadedFile;

/// What a job needs from the client that produced it to reach its files.
pub trait JobFileSource: Send + Sync {
    fn files_for_job(&self, job_id: &JobId) -> Result<FileReferenceList, GwCloudError>;

    fn fetch_files(&self, files: &FileReferenceList) -> Result<Vec<DownloadedFile>, GwCloudError>;

    fn save_files(
        &self,
        files: &FileReferenceList,
        root: &Utf8Path,
        preserve_directory_structure: bool,
    ) -> Result<(), GwCloudError>;
}

/// Named subsets of a job's result files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSelection {
    Full,
    Default,
    Png,
    CornerPlot,
    Config,
}

impl FileSelection {
    pub fn apply(self, files: &FileReferenceList) -> FileReferenceList {
        match self {
            FileSelection::Full => files.clone(),
            FileSelection::Default => filters::default_filter(files),
            FileSelection::Png => filters::png_filter(files),
            FileSelection::CornerPlot => filters::corner_plot_filter(files),
            FileSelection::Config => filters::config_filter(files),
        }
    }
}

/// A Bilby job as returned by the service.
#[derive(Clone)]
pub struct BilbyJob {
    pub job_id: JobId,
    pub name: String,
    pub description: String,
    pub status: Option<JobStatus>,
    pub event_id: Option<EventId>,
    pub user: Option<String>,
    /// Remaining response attributes, snake_case keyed.
    pub other: Map<String, Value>,
    pub(crate) source: Arc<dyn JobFileSource>,
}

impl BilbyJob {
    pub fn new(
        source: Arc<dyn JobFileSource>,
        job_id: JobId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            name: name.into(),
            description: description.into(),
            status: None,
            event_id: None,
            user: None,
            other: Map::new(),
            source,
        }
    }

    pub fn get_full_file_list(&self) -> Result<FileReferenceList, GwCloudError> {
        self.source.files_for_job(&self.job_id)
    }

    pub fn get_file_list(&self, selection: FileSelection) -> Result<FileReferenceList, GwCloudError> {
        Ok(selection.apply(&self.get_full_file_list()?))
    }

    pub fn get_default_file_list(&self) -> Result<FileReferenceList, GwCloudError> {
        self.get_file_list(FileSelection::Default)
    }

    pub fn get_png_file_list(&self) -> Result<FileReferenceList, GwCloudError> {
        self.get_file_list(FileSelection::Png)
    }

    pub fn get_corner_plot_file_list(&self) -> Result<FileReferenceList, GwCloudError> {
        self.get_file_list(FileSelection::CornerPlot)
    }

    pub fn get_config_file_list(&self) -> Result<FileReferenceList, GwCloudError> {
        self.get_file_list(FileSelection::Config)
    }

    /// Downloads the selected files into memory.
    pub fn files(&self, selection: FileSelection) -> Result<Vec<DownloadedFile>, GwCloudError> {
        let files = self.get_file_list(selection)?;
        self.source.fetch_files(&files)
    }

    pub fn save_files(
        &self,
        selection: FileSelection,
        root: &Utf8Path,
        preserve_directory_structure: bool,
    ) -> Result<(), GwCloudError> {
        let files = self.get_file_list(selection)?;
        self.source
            .save_files(&files, root, preserve_directory_structure)
    }
}

impl fmt::Debug for BilbyJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BilbyJob")
            .field("job_id", &self.job_id)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("status", &self.status)
            .field("event_id", &self.event_id)
            .field("user", &self.user)
            .field("other", &self.other)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BilbyJob {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
            && self.name == other.name
            && self.description == other.description
            && self.status == other.status
            && self.event_id == other.event_id
            && self.user == other.user
            && self.other == other.other
    }
}
