use std::collections::HashMap;
use std::ops::Add;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::JobId;
use crate::error::GwCloudError;
use crate::keys::{confined, remove_path_anchor};

/// A single remote file belonging to a job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "FileReferenceRecord")]
pub struct FileReference {
    path: Utf8PathBuf,
    file_size: u64,
    download_token: String,
    job_id: JobId,
    is_uploaded_job: bool,
}

impl FileReference {
    pub fn new(
        path: impl AsRef<Utf8Path>,
        file_size: u64,
        download_token: impl Into<String>,
        job_id: JobId,
        is_uploaded_job: bool,
    ) -> Self {
        Self {
            path: remove_path_anchor(path.as_ref()),
            file_size,
            download_token: download_token.into(),
            job_id,
            is_uploaded_job,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn download_token(&self) -> &str {
        &self.download_token
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_uploaded_job(&self) -> bool {
        self.is_uploaded_job
    }
}

#[derive(Deserialize)]
struct FileReferenceRecord {
    path: String,
    file_size: FileSize,
    download_token: String,
    job_id: JobId,
    #[serde(default)]
    is_uploaded_job: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileSize {
    Number(u64),
    Text(String),
}

impl TryFrom<FileReferenceRecord> for FileReference {
    type Error = GwCloudError;

    fn try_from(record: FileReferenceRecord) -> Result<Self, Self::Error> {
        let file_size = match record.file_size {
            FileSize::Number(size) => size,
            FileSize::Text(text) => text.trim().parse().map_err(|_| {
                GwCloudError::InvalidFileReference(format!("file size is not a count: {text}"))
            })?,
        };
        Ok(FileReference::new(
            Utf8Path::new(&record.path),
            file_size,
            record.download_token,
            record.job_id,
            record.is_uploaded_job,
        ))
    }
}

/// The references of one job, as produced by
/// [`FileReferenceList::batch_by_job_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFileBatch {
    pub job_id: JobId,
    pub files: FileReferenceList,
    pub is_uploaded_job: bool,
    /// Index of each member of `files` in the list the batch was taken from.
    pub positions: Vec<usize>,
}

/// Ordered collection of [`FileReference`], kept in server listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReferenceList {
    items: Vec<FileReference>,
}

impl FileReferenceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from untyped snake_case records, rejecting the whole
    /// input if any element is not shaped like a file reference.
    pub fn from_values(values: Vec<Value>) -> Result<Self, GwCloudError> {
        let mut list = Self::new();
        for value in values {
            list.push_value(value)?;
        }
        Ok(list)
    }

    pub fn push(&mut self, item: FileReference) {
        self.items.push(item);
    }

    /// Appends an untyped record. The list is left unchanged on error.
    pub fn push_value(&mut self, value: Value) -> Result<(), GwCloudError> {
        let item = serde_json::from_value::<FileReference>(value)
            .map_err(|err| GwCloudError::InvalidFileReference(err.to_string()))?;
        self.items.push(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FileReference> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileReference> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[FileReference] {
        &self.items
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(FileReference::file_size).sum()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|item| item.download_token.clone())
            .collect()
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.items.iter().map(|item| item.path.clone()).collect()
    }

    pub fn uploaded(&self) -> Vec<bool> {
        self.items.iter().map(FileReference::is_uploaded_job).collect()
    }

    /// Destination of every file below `root`, either keeping the remote
    /// directory layout or flattening to the bare file name. `..` and `.`
    /// components are dropped so no destination leaves `root`.
    pub fn output_paths(
        &self,
        root: &Utf8Path,
        preserve_directory_structure: bool,
    ) -> Vec<Utf8PathBuf> {
        self.items
            .iter()
            .map(|item| {
                let relative = confined(&item.path);
                if preserve_directory_structure {
                    root.join(&relative)
                } else {
                    root.join(relative.file_name().unwrap_or_default())
                }
            })
            .collect()
    }

    /// Groups the references by owning job, in order of first appearance.
    pub fn batch_by_job_id(&self) -> Vec<JobFileBatch> {
        let mut batches: Vec<JobFileBatch> = Vec::new();
        let mut index_by_job: HashMap<&JobId, usize> = HashMap::new();

        for (position, item) in self.items.iter().enumerate() {
            let slot = *index_by_job.entry(&item.job_id).or_insert_with(|| {
                batches.push(JobFileBatch {
                    job_id: item.job_id.clone(),
                    files: FileReferenceList::new(),
                    is_uploaded_job: item.is_uploaded_job,
                    positions: Vec::new(),
                });
                batches.len() - 1
            });
            let batch = &mut batches[slot];
            if batch.is_uploaded_job != item.is_uploaded_job {
                warn!(
                    job_id = %item.job_id,
                    path = %item.path,
                    "file disagrees with its job about upload provenance"
                );
            }
            batch.files.push(item.clone());
            batch.positions.push(position);
        }

        batches
    }

    pub fn filter_list<F>(&self, predicate: F) -> FileReferenceList
    where
        F: Fn(&FileReference) -> bool,
    {
        self.items
            .iter()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }

    pub fn filter_list_by_path(
        &self,
        directory: Option<&str>,
        name: Option<&str>,
        extension: Option<&str>,
    ) -> FileReferenceList {
        crate::filters::custom_path_filter(self, directory, name, extension)
    }
}

impl From<Vec<FileReference>> for FileReferenceList {
    fn from(items: Vec<FileReference>) -> Self {
        Self { items }
    }
}

impl FromIterator<FileReference> for FileReferenceList {
    fn from_iter<I: IntoIterator<Item = FileReference>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl Extend<FileReference> for FileReferenceList {
    fn extend<I: IntoIterator<Item = FileReference>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl IntoIterator for FileReferenceList {
    type Item = FileReference;
    type IntoIter = std::vec::IntoIter<FileReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileReferenceList {
    type Item = &'a FileReference;
    type IntoIter = std::slice::Iter<'a, FileReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Add for FileReferenceList {
    type Output = FileReferenceList;

    fn add(mut self, rhs: FileReferenceList) -> Self::Output {
        self.items.extend(rhs.items);
        self
    }
}
