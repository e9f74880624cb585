use std::fs;
use std::path::Path;
use std::sync::Arc;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::archive::temporary_job_archive;
use crate::config::ClientConfig;
use crate::domain::{Cluster, EventId, JobId, TimeRange};
use crate::error::GwCloudError;
use crate::file_reference::FileReferenceList;
use crate::graphql::{GraphqlClient, GraphqlHttpClient, UploadFile};
use crate::job::{BilbyJob, JobFileSource};
use crate::keys::convert_keys;
use crate::progress::{LogProgress, ProgressSink};
use crate::records::{JobRecord, ResultFilesRecord, event_id_from_value};
use crate::transfer::{DownloadedFile, FileFetcher, HttpFileFetcher, TransferEngine};

const NEW_JOB_FROM_INI_STRING: &str = r#"
    mutation NewBilbyJobFromIniString($input: BilbyJobFromIniStringMutationInput!){
        newBilbyJobFromIniString (input: $input) {
            result {
                jobId
                supportingFiles {
                    filePath
                    token
                }
            }
        }
    }
"#;

const UPLOAD_SUPPORTING_FILE: &str = r#"
    mutation SupportingFileUploadMutation($input: UploadSupportingFileMutationInput!) {
        uploadSupportingFile(input: $input) {
            result {
                result
            }
        }
    }
"#;

const PUBLIC_JOBS: &str = r#"
    query ($search: String, $timeRange: String, $first: Int){
        publicBilbyJobs (search: $search, timeRange: $timeRange, first: $first) {
            edges {
                node {
                    id
                    user
                    name
                    description
                    jobStatus {
                        name
                        date
                    }
                    eventId {
                        eventId
                        triggerId
                        nickname
                        isLigoEvent
                    }
                }
            }
        }
    }
"#;

const JOB_BY_ID: &str = r#"
    query ($id: ID!){
        bilbyJob (id: $id) {
            id
            name
            userId
            description
            jobStatus {
                name
                date
            }
            eventId {
                eventId
                triggerId
                nickname
                isLigoEvent
            }
        }
    }
"#;

const USER_JOBS: &str = r#"
    query ($first: Int){
        bilbyJobs (first: $first){
            edges {
                node {
                    id
                    name
                    userId
                    description
                    jobStatus {
                        name
                        date
                    }
                    eventId {
                        eventId
                        triggerId
                        nickname
                        isLigoEvent
                    }
                }
            }
        }
    }
"#;

const RESULT_FILES: &str = r#"
    query ($jobId: ID!) {
        bilbyResultFiles (jobId: $jobId) {
            files {
                path
                isDir
                fileSize
                downloadToken
            }
            isUploadedJob
        }
    }
"#;

const GENERATE_UPLOAD_TOKEN: &str = r#"
    query GenerateBilbyJobUploadToken {
        generateBilbyJobUploadToken {
            token
        }
    }
"#;

const UPLOAD_JOB: &str = r#"
    mutation JobUploadMutation($input: UploadBilbyJobMutationInput!) {
        uploadBilbyJob(input: $input) {
            result {
                jobId
            }
        }
    }
"#;

const CREATE_EVENT_ID: &str = r#"
    mutation CreateEventIDMutation($input: EventIDMutationInput!) {
        createEventId (input: $input) {
            result
        }
    }
"#;

const UPDATE_EVENT_ID: &str = r#"
    mutation UpdateEventIDMutation($input: UpdateEventIDMutationInput!) {
        updateEventId (input: $input) {
            result
        }
    }
"#;

const DELETE_EVENT_ID: &str = r#"
    mutation DeleteEventIDMutation($input: DeleteEventIDMutationInput!) {
        deleteEventId (input: $input) {
            result
        }
    }
"#;

const EVENT_ID: &str = r#"
    query ($eventId: String!){
        eventId (eventId: $eventId) {
            eventId
            triggerId
            nickname
            isLigoEvent
        }
    }
"#;

const ALL_EVENT_IDS: &str = r#"
    query {
        allEventIds {
            eventId
            triggerId
            nickname
            isLigoEvent
        }
    }
"#;

pub const DEFAULT_JOB_COUNT: usize = 100;

#[derive(Serialize)]
struct EventIdInput<'a> {
    event_id: &'a str,
    trigger_id: Option<&'a str>,
    nickname: Option<&'a str>,
    is_ligo_event: Option<bool>,
}

impl EventIdInput<'_> {
    fn to_variables(&self) -> Result<Value, GwCloudError> {
        let input = serde_json::to_value(self)
            .map_err(|err| GwCloudError::MalformedResponse(err.to_string()))?;
        Ok(json!({ "input": convert_keys(input, &[], true) }))
    }
}

/// Entry point to the GWCloud Bilby service.
pub struct GwCloud<G = GraphqlHttpClient, F = HttpFileFetcher> {
    graphql: Arc<G>,
    fetcher: Arc<F>,
    config: Arc<ClientConfig>,
    progress: Arc<dyn ProgressSink>,
}

impl<G, F> Clone for GwCloud<G, F> {
    fn clone(&self) -> Self {
        Self {
            graphql: Arc::clone(&self.graphql),
            fetcher: Arc::clone(&self.fetcher),
            config: Arc::clone(&self.config),
            progress: Arc::clone(&self.progress),
        }
    }
}

impl GwCloud<GraphqlHttpClient, HttpFileFetcher> {
    /// Connects with an API token over HTTPS.
    pub fn from_token(token: impl Into<String>, config: ClientConfig) -> Result<Self, GwCloudError> {
        let graphql = GraphqlHttpClient::new(token, &config)?;
        let fetcher = HttpFileFetcher::new(&config)?;
        Ok(Self::new(config, graphql, fetcher))
    }
}

impl<G, F> GwCloud<G, F>
where
    G: GraphqlClient + 'static,
    F: FileFetcher + 'static,
{
    pub fn new(config: ClientConfig, graphql: G, fetcher: F) -> Self {
        Self {
            graphql: Arc::new(graphql),
            fetcher: Arc::new(fetcher),
            config: Arc::new(config),
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    pub fn graphql(&self) -> &G {
        &self.graphql
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn engine(&self) -> TransferEngine<'_> {
        TransferEngine::new(
            self.graphql.as_ref(),
            self.fetcher.as_ref(),
            &self.config,
            self.progress.as_ref(),
        )
    }

    fn source(&self) -> Arc<dyn JobFileSource> {
        Arc::new(self.clone())
    }

    fn job_from_node(&self, node: Value) -> Result<BilbyJob, GwCloudError> {
        JobRecord::from_value(node)?.into_job(self.source())
    }

    fn jobs_from_edges(&self, edges: &Value) -> Result<Vec<BilbyJob>, GwCloudError> {
        let Some(edges) = edges.as_array() else {
            return Ok(Vec::new());
        };
        edges
            .iter()
            .filter_map(|edge| edge.get("node"))
            .filter(|node| !node.is_null())
            .map(|node| self.job_from_node(node.clone()))
            .collect()
    }

    pub fn get_job_by_id(&self, job_id: impl Into<JobId>) -> Result<Option<BilbyJob>, GwCloudError> {
        let job_id = job_id.into();
        let data = self.graphql.request(JOB_BY_ID, json!({ "id": job_id }))?;
        match data.get("bilbyJob") {
            Some(node) if !node.is_null() => Ok(Some(self.job_from_node(node.clone())?)),
            _ => {
                info!(job_id = %job_id, "No job matching input ID was returned.");
                Ok(None)
            }
        }
    }

    pub fn get_user_jobs(&self, count: usize) -> Result<Vec<BilbyJob>, GwCloudError> {
        let data = self.graphql.request(USER_JOBS, json!({ "first": count }))?;
        let jobs = self.jobs_from_edges(&data["bilbyJobs"]["edges"])?;
        if jobs.is_empty() {
            info!("User has no jobs.");
        }
        Ok(jobs)
    }

    pub fn get_public_job_list(
        &self,
        search: &str,
        time_range: TimeRange,
        count: usize,
    ) -> Result<Vec<BilbyJob>, GwCloudError> {
        let data = self.graphql.request(
            PUBLIC_JOBS,
            json!({
                "search": search,
                "timeRange": time_range.as_str(),
                "first": count,
            }),
        )?;
        let jobs = self.jobs_from_edges(&data["publicBilbyJobs"]["edges"])?;
        if jobs.is_empty() {
            info!(search, "Job search returned no results.");
        }
        Ok(jobs)
    }

    /// Public jobs flagged as preferred, optionally narrowed by `search`.
    pub fn get_preferred_job_list(&self, search: &str) -> Result<Vec<BilbyJob>, GwCloudError> {
        self.get_public_job_list(
            &format!("preferred lasky {search}"),
            TimeRange::Any,
            DEFAULT_JOB_COUNT,
        )
    }

    /// Submits a job from the text of a Bilby ini file. Supporting files the
    /// ini refers to are read relative to the working directory.
    pub fn start_bilby_job_from_string(
        &self,
        name: &str,
        description: &str,
        private: bool,
        ini_string: &str,
        cluster: &Cluster,
    ) -> Result<Option<BilbyJob>, GwCloudError> {
        self.submit_job(name, description, private, ini_string, cluster, None)
    }

    /// Submits a job from an ini file. Supporting files are read relative to
    /// the directory holding the ini file.
    pub fn start_bilby_job_from_file(
        &self,
        name: &str,
        description: &str,
        private: bool,
        ini_file: &Path,
        cluster: &Cluster,
    ) -> Result<Option<BilbyJob>, GwCloudError> {
        let ini_string = fs::read_to_string(ini_file).map_err(|err| {
            GwCloudError::Filesystem(format!("read {}: {err}", ini_file.display()))
        })?;
        let base = ini_file.parent().filter(|parent| !parent.as_os_str().is_empty());
        self.submit_job(
            name,
            description,
            private,
            ini_string.trim(),
            cluster,
            base,
        )
    }

    fn submit_job(
        &self,
        name: &str,
        description: &str,
        private: bool,
        ini_string: &str,
        cluster: &Cluster,
        base: Option<&Path>,
    ) -> Result<Option<BilbyJob>, GwCloudError> {
        let data = self.graphql.request(
            NEW_JOB_FROM_INI_STRING,
            json!({
                "input": {
                    "params": {
                        "details": {
                            "name": name,
                            "description": description,
                            "private": private,
                            "cluster": cluster.as_str(),
                        },
                        "iniString": {
                            "iniString": ini_string,
                        }
                    }
                }
            }),
        )?;
        let result = &data["newBilbyJobFromIniString"]["result"];

        if let Some(supporting_files) = result["supportingFiles"].as_array() {
            for supporting_file in supporting_files {
                let token = required_str(supporting_file, "token")?;
                let file_path = Path::new(required_str(supporting_file, "filePath")?);
                let local_path = match base {
                    Some(base) if file_path.is_relative() => base.join(file_path),
                    _ => file_path.to_path_buf(),
                };
                self.upload_supporting_file(token, &local_path)?;
            }
        }

        let job_id = job_id_of(result, "newBilbyJobFromIniString")?;
        info!(job_id = %job_id, "Job submitted.");
        self.get_job_by_id(job_id)
    }

    /// Uploads one supporting file against the token handed out at submission.
    pub fn upload_supporting_file(&self, token: &str, path: &Path) -> Result<(), GwCloudError> {
        if !path.is_file() {
            return Err(GwCloudError::SupportingFileMissing(path.to_path_buf()));
        }
        debug!(path = %path.display(), "uploading supporting file");
        let data = self.graphql.upload(
            UPLOAD_SUPPORTING_FILE,
            json!({ "input": { "fileToken": token, "supportingFile": null } }),
            vec![UploadFile::new("input.supportingFile", path)],
        )?;
        let uploaded = data
            .pointer("/uploadSupportingFile/result/result")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !uploaded {
            return Err(GwCloudError::UploadFailed(
                "Unable to upload supporting file. An error occurred on the remote side."
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn generate_upload_token(&self) -> Result<String, GwCloudError> {
        let data = self.graphql.request(GENERATE_UPLOAD_TOKEN, json!({}))?;
        data.pointer("/generateBilbyJobUploadToken/token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GwCloudError::MalformedResponse("upload token missing from response".to_string())
            })
    }

    /// Uploads a finished job from its `.tar.gz` output archive.
    pub fn upload_job_archive(
        &self,
        description: &str,
        archive: &Path,
        public: bool,
    ) -> Result<Option<BilbyJob>, GwCloudError> {
        let upload_token = self.generate_upload_token()?;
        let data = self.graphql.upload(
            UPLOAD_JOB,
            json!({
                "input": {
                    "uploadToken": upload_token,
                    "details": {
                        "description": description,
                        "private": !public,
                    },
                    "jobFile": null,
                }
            }),
            vec![UploadFile::new("input.jobFile", archive)],
        )?;
        let job_id = job_id_of(&data["uploadBilbyJob"]["result"], "uploadBilbyJob")?;
        info!(job_id = %job_id, "Job uploaded.");
        self.get_job_by_id(job_id)
    }

    /// Archives a finished job's output directory and uploads it.
    pub fn upload_job_directory(
        &self,
        description: &str,
        directory: &Path,
        public: bool,
    ) -> Result<Option<BilbyJob>, GwCloudError> {
        let archive = temporary_job_archive(directory)?;
        self.upload_job_archive(description, archive.path(), public)
    }

    pub fn create_event_id(&self, event: &EventId) -> Result<Option<EventId>, GwCloudError> {
        let input = EventIdInput {
            event_id: &event.event_id,
            trigger_id: event.trigger_id.as_deref(),
            nickname: event.nickname.as_deref(),
            is_ligo_event: Some(event.is_ligo_event),
        };
        let data = self
            .graphql
            .request(CREATE_EVENT_ID, input.to_variables()?)?;
        info!(result = %data["createEventId"]["result"], "createEventId");
        self.get_event_id(&event.event_id)
    }

    /// Changes the supplied attributes of an existing event id; `None`
    /// leaves an attribute untouched.
    pub fn update_event_id(
        &self,
        event_id: &str,
        trigger_id: Option<&str>,
        nickname: Option<&str>,
        is_ligo_event: Option<bool>,
    ) -> Result<Option<EventId>, GwCloudError> {
        let input = EventIdInput {
            event_id,
            trigger_id,
            nickname,
            is_ligo_event,
        };
        let data = self
            .graphql
            .request(UPDATE_EVENT_ID, input.to_variables()?)?;
        info!(result = %data["updateEventId"]["result"], "updateEventId");
        self.get_event_id(event_id)
    }

    pub fn delete_event_id(&self, event_id: &str) -> Result<(), GwCloudError> {
        let data = self.graphql.request(
            DELETE_EVENT_ID,
            json!({ "input": { "eventId": event_id } }),
        )?;
        info!(result = %data["deleteEventId"]["result"], "deleteEventId");
        Ok(())
    }

    pub fn get_event_id(&self, event_id: &str) -> Result<Option<EventId>, GwCloudError> {
        if event_id.is_empty() {
            return Ok(None);
        }
        let data = self
            .graphql
            .request(EVENT_ID, json!({ "eventId": event_id }))?;
        match data.get("eventId") {
            Some(record) if !record.is_null() => Ok(Some(event_id_from_value(record.clone())?)),
            _ => {
                info!(event_id, "No event id matching input was returned.");
                Ok(None)
            }
        }
    }

    pub fn get_all_event_ids(&self) -> Result<Vec<EventId>, GwCloudError> {
        let data = self.graphql.request(ALL_EVENT_IDS, json!({}))?;
        let Some(records) = data["allEventIds"].as_array() else {
            return Ok(Vec::new());
        };
        records.iter().cloned().map(event_id_from_value).collect()
    }

    /// Lists the result files of a job. Directories are left out.
    pub fn get_files_by_job_id(
        &self,
        job_id: impl Into<JobId>,
    ) -> Result<FileReferenceList, GwCloudError> {
        let job_id = job_id.into();
        let data = self
            .graphql
            .request(RESULT_FILES, json!({ "jobId": job_id }))?;
        match data.get("bilbyResultFiles") {
            Some(record) if !record.is_null() => {
                ResultFilesRecord::from_value(record.clone())?.into_file_list(&job_id)
            }
            _ => {
                info!(job_id = %job_id, "No result files were returned.");
                Ok(FileReferenceList::new())
            }
        }
    }

    /// Downloads the referenced files into memory, in the order given.
    pub fn get_files_by_reference(
        &self,
        files: &FileReferenceList,
    ) -> Result<Vec<DownloadedFile>, GwCloudError> {
        self.engine().fetch_files(files)
    }

    pub fn save_files_by_reference(
        &self,
        files: &FileReferenceList,
        root: &Utf8Path,
        preserve_directory_structure: bool,
    ) -> Result<(), GwCloudError> {
        self.engine()
            .save_files(files, root, preserve_directory_structure)
    }

    pub fn get_download_ids_from_tokens(
        &self,
        job_id: &JobId,
        tokens: &[String],
    ) -> Result<Vec<String>, GwCloudError> {
        self.engine().download_ids(job_id, tokens)
    }

    pub fn get_download_id_from_token(
        &self,
        job_id: &JobId,
        token: &str,
    ) -> Result<String, GwCloudError> {
        self.get_download_ids_from_tokens(job_id, &[token.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                GwCloudError::MalformedResponse("no download id was returned".to_string())
            })
    }
}

impl<G, F> JobFileSource for GwCloud<G, F>
where
    G: GraphqlClient + 'static,
    F: FileFetcher + 'static,
{
    fn files_for_job(&self, job_id: &JobId) -> Result<FileReferenceList, GwCloudError> {
        self.get_files_by_job_id(job_id.clone())
    }

    fn fetch_files(&self, files: &FileReferenceList) -> Result<Vec<DownloadedFile>, GwCloudError> {
        self.get_files_by_reference(files)
    }

    fn save_files(
        &self,
        files: &FileReferenceList,
        root: &Utf8Path,
        preserve_directory_structure: bool,
    ) -> Result<(), GwCloudError> {
        self.save_files_by_reference(files, root, preserve_directory_structure)
    }
}

fn required_str<'v>(value: &'v Value, key: &str) -> Result<&'v str, GwCloudError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GwCloudError::MalformedResponse(format!("missing field `{key}`")))
}

fn job_id_of(result: &Value, operation: &str) -> Result<JobId, GwCloudError> {
    let value = result.get("jobId").cloned().unwrap_or(Value::Null);
    serde_json::from_value::<JobId>(value)
        .map_err(|_| GwCloudError::MalformedResponse(format!("{operation} returned no job id")))
}
