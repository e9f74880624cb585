use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use serde_json::{Value, json};

use gwcloud_client::client::GwCloud;
use gwcloud_client::config::ClientConfig;
use gwcloud_client::domain::{Cluster, EventId, JobId, JobStatus, TimeRange};
use gwcloud_client::error::GwCloudError;
use gwcloud_client::file_reference::{FileReference, FileReferenceList};
use gwcloud_client::graphql::{GraphqlClient, UploadFile};
use gwcloud_client::job::FileSelection;
use gwcloud_client::progress::{NoProgress, ProgressSink, TransferProgress};
use gwcloud_client::transfer::FileFetcher;

type Responder =
    Box<dyn Fn(&str, &Value, &[UploadFile]) -> Result<Value, GwCloudError> + Send + Sync>;

#[derive(Debug, Clone)]
struct Request {
    query: String,
    variables: Value,
    files: Vec<UploadFile>,
    authorized: bool,
}

struct MockGraphql {
    responder: Responder,
    requests: Mutex<Vec<Request>>,
}

impl MockGraphql {
    fn new(
        responder: impl Fn(&str, &Value, &[UploadFile]) -> Result<Value, GwCloudError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    fn count(&self, operation: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.query.contains(operation))
            .count()
    }
}

impl GraphqlClient for MockGraphql {
    fn request(&self, query: &str, variables: Value) -> Result<Value, GwCloudError> {
        let response = (self.responder)(query, &variables, &[]);
        self.requests.lock().unwrap().push(Request {
            query: query.to_string(),
            variables,
            files: Vec::new(),
            authorized: true,
        });
        response
    }

    fn upload(
        &self,
        query: &str,
        variables: Value,
        files: Vec<UploadFile>,
    ) -> Result<Value, GwCloudError> {
        let response = (self.responder)(query, &variables, &files);
        self.requests.lock().unwrap().push(Request {
            query: query.to_string(),
            variables,
            files,
            authorized: false,
        });
        response
    }
}

#[derive(Default)]
struct MockFetcher {
    failing: Option<String>,
    urls: Mutex<Vec<String>>,
}

impl FileFetcher for MockFetcher {
    fn fetch(
        &self,
        url: &str,
        out: &mut dyn Write,
        progress: &dyn Fn(u64),
    ) -> Result<(), GwCloudError> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.failing.as_deref().is_some_and(|failing| url.ends_with(failing)) {
            return Err(GwCloudError::Status {
                status: 404,
                message: "missing".to_string(),
            });
        }
        out.write_all(url.as_bytes())
            .map_err(|err| GwCloudError::Filesystem(err.to_string()))?;
        progress(url.len() as u64);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<TransferProgress>>>);

impl ProgressSink for Recorder {
    fn update(&self, progress: TransferProgress) {
        self.0.lock().unwrap().push(progress);
    }
}

fn client(graphql: MockGraphql) -> GwCloud<MockGraphql, MockFetcher> {
    GwCloud::new(ClientConfig::default(), graphql, MockFetcher::default()).with_progress(NoProgress)
}

fn job_node(id: u64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "description": format!("{name} description"),
        "user": "Test User1",
        "eventId": {"eventId": "GW123456"},
        "jobStatus": {"name": "Completed", "date": "2021-12-02"},
    })
}

fn download_ids(variables: &Value) -> Value {
    let ids: Vec<String> = variables["input"]["downloadTokens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|token| format!("id-{}", token.as_str().unwrap()))
        .collect();
    json!({"generateFileDownloadIds": {"result": ids}})
}

fn two_job_references() -> FileReferenceList {
    vec![
        FileReference::new("result/a.json", 10, "ta", JobId::from("1"), false),
        FileReference::new("data/b.png", 20, "tb", JobId::from("2"), true),
        FileReference::new("result/c.png", 30, "tc", JobId::from("1"), false),
        FileReference::new("d.ini", 40, "td", JobId::from("2"), true),
    ]
    .into()
}

#[test]
fn job_lookup_builds_typed_record() {
    let client = client(MockGraphql::new(|query, _, _| {
        assert!(query.contains("bilbyJob (id"));
        Ok(json!({"bilbyJob": job_node(1, "test_name")}))
    }));

    let job = client.get_job_by_id("1").unwrap().unwrap();

    assert_eq!(job.job_id, JobId::from("1"));
    assert_eq!(job.name, "test_name");
    assert_eq!(job.description, "test_name description");
    assert_eq!(job.user.as_deref(), Some("Test User1"));
    assert_eq!(
        job.status,
        Some(JobStatus::new(
            "Completed",
            NaiveDate::from_ymd_opt(2021, 12, 2).unwrap()
        ))
    );
    assert_eq!(job.event_id.unwrap().event_id, "GW123456");
    assert_eq!(client.graphql().requests()[0].variables, json!({"id": "1"}));
}

#[test]
fn missing_job_is_none() {
    let client = client(MockGraphql::new(|_, _, _| Ok(json!({"bilbyJob": null}))));
    assert!(client.get_job_by_id("404").unwrap().is_none());
}

#[test]
fn user_jobs_follow_edge_order() {
    let client = client(MockGraphql::new(|query, _, _| {
        assert!(query.contains("bilbyJobs (first"));
        Ok(json!({"bilbyJobs": {"edges": [
            {"node": job_node(1, "one")},
            {"node": job_node(2, "two")},
            {"node": job_node(3, "three")},
        ]}}))
    }));

    let jobs = client.get_user_jobs(100).unwrap();
    let names: Vec<_> = jobs.iter().map(|job| job.name.as_str()).collect();
    assert_eq!(names, vec!["one", "two", "three"]);
    assert_eq!(client.graphql().requests()[0].variables, json!({"first": 100}));
}

#[test]
fn public_search_sends_time_range_and_preferred_prefix() {
    let client = client(MockGraphql::new(|_, _, _| {
        Ok(json!({"publicBilbyJobs": {"edges": []}}))
    }));

    assert!(
        client
            .get_public_job_list("GW150914", TimeRange::Week, 10)
            .unwrap()
            .is_empty()
    );
    assert!(client.get_preferred_job_list("GW150914").unwrap().is_empty());

    let requests = client.graphql().requests();
    assert_eq!(
        requests[0].variables,
        json!({"search": "GW150914", "timeRange": "1w", "first": 10})
    );
    assert_eq!(
        requests[1].variables,
        json!({"search": "preferred lasky GW150914", "timeRange": "all", "first": 100})
    );
}

#[test]
fn null_description_keeps_the_whole_listing() {
    let client = client(MockGraphql::new(|_, _, _| {
        let mut second = job_node(2, "second");
        second["description"] = Value::Null;
        second["eventId"]["isLigoEvent"] = Value::Null;
        Ok(json!({"publicBilbyJobs": {"edges": [
            {"node": job_node(1, "first")},
            {"node": second},
        ]}}))
    }));

    let jobs = client.get_public_job_list("", TimeRange::Any, 100).unwrap();

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].description, "first description");
    assert_eq!(jobs[1].name, "second");
    assert_eq!(jobs[1].description, "");
    assert!(!jobs[1].event_id.as_ref().unwrap().is_ligo_event);
}

#[test]
fn authentication_errors_propagate() {
    let client = client(MockGraphql::new(|_, _, _| Err(GwCloudError::Authentication)));
    assert_matches!(client.get_user_jobs(5), Err(GwCloudError::Authentication));
}

#[test]
fn files_of_two_jobs_resolve_once_per_job_in_caller_order() {
    let client = client(MockGraphql::new(|query, variables, _| {
        assert!(query.contains("generateFileDownloadIds"));
        Ok(download_ids(variables))
    }));
    let references = two_job_references();

    let files = client.get_files_by_reference(&references).unwrap();

    assert_eq!(client.graphql().count("generateFileDownloadIds"), 2);
    let requests = client.graphql().requests();
    assert_eq!(
        requests[0].variables,
        json!({"input": {"jobId": "1", "downloadTokens": ["ta", "tc"]}})
    );
    assert_eq!(
        requests[1].variables,
        json!({"input": {"jobId": "2", "downloadTokens": ["tb", "td"]}})
    );

    let config = client.config();
    assert_eq!(files.len(), 4);
    for (file, reference) in files.iter().zip(&references) {
        assert_eq!(file.path, reference.path());
        let url = config.download_url(
            &format!("id-{}", reference.download_token()),
            reference.is_uploaded_job(),
        );
        assert_eq!(file.content, url.as_bytes());
    }
}

#[test]
fn progress_counts_every_byte() {
    let recorder = Recorder::default();
    let client = GwCloud::new(
        ClientConfig::default(),
        MockGraphql::new(|_, variables, _| Ok(download_ids(variables))),
        MockFetcher::default(),
    )
    .with_progress(recorder.clone());

    let files = client.get_files_by_reference(&two_job_references()).unwrap();

    let downloaded: u64 = files.iter().map(|file| file.content.len() as u64).sum();
    let updates = recorder.0.lock().unwrap();
    assert_eq!(updates.len(), 4);
    assert_eq!(updates.iter().map(|update| update.delta).sum::<u64>(), downloaded);
    assert_eq!(
        updates.iter().map(|update| update.transferred).max(),
        Some(downloaded)
    );
    assert!(updates.iter().all(|update| update.total == 100));
}

#[test]
fn save_flattens_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let client = client(MockGraphql::new(|_, variables, _| Ok(download_ids(variables))));

    client
        .save_files_by_reference(&two_job_references(), &root, false)
        .unwrap();

    let saved = fs::read_to_string(root.join("b.png")).unwrap();
    assert!(saved.ends_with("id-tb"));
    assert!(saved.starts_with(&client.config().uploaded_job_file_download_endpoint));
    assert!(root.join("a.json").is_file());
    assert!(!root.join("result").exists());
}

#[test]
fn save_stays_below_root() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let root = base.join("root");
    let client = client(MockGraphql::new(|_, variables, _| Ok(download_ids(variables))));
    let references: FileReferenceList = vec![FileReference::new(
        "../escaped.txt",
        1,
        "te",
        JobId::from("1"),
        false,
    )]
    .into();

    client.save_files_by_reference(&references, &root, true).unwrap();

    assert!(!base.join("escaped.txt").exists());
    assert!(root.join("escaped.txt").is_file());
}

#[test]
fn save_keeps_structure_and_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    fs::create_dir_all(root.join("result")).unwrap();
    fs::write(root.join("result/a.json"), "stale content that is longer than the url").unwrap();
    let client = client(MockGraphql::new(|_, variables, _| Ok(download_ids(variables))));

    client
        .save_files_by_reference(&two_job_references(), &root, true)
        .unwrap();

    let saved = fs::read_to_string(root.join("result/a.json")).unwrap();
    assert_eq!(saved, client.config().download_url("id-ta", false));
    assert!(root.join("data/b.png").is_file());
}

#[test]
fn id_count_mismatch_aborts() {
    let client = client(MockGraphql::new(|_, _, _| {
        Ok(json!({"generateFileDownloadIds": {"result": ["only-one"]}}))
    }));

    let result = client.get_files_by_reference(&two_job_references());
    assert_matches!(
        result,
        Err(GwCloudError::DownloadIdMismatch { expected: 2, actual: 1, .. })
    );
}

#[test]
fn failed_fetch_aborts_batch() {
    let client = GwCloud::new(
        ClientConfig::default(),
        MockGraphql::new(|_, variables, _| Ok(download_ids(variables))),
        MockFetcher {
            failing: Some("id-tc".to_string()),
            ..MockFetcher::default()
        },
    )
    .with_progress(NoProgress);

    assert_matches!(
        client.get_files_by_reference(&two_job_references()),
        Err(GwCloudError::Status { status: 404, .. })
    );
}

#[test]
fn download_id_helpers() {
    let client = client(MockGraphql::new(|_, variables, _| Ok(download_ids(variables))));
    let job = JobId::from("7");

    assert_eq!(
        client
            .get_download_ids_from_tokens(&job, &["a".to_string(), "b".to_string()])
            .unwrap(),
        vec!["id-a", "id-b"]
    );
    assert_eq!(client.get_download_id_from_token(&job, "c").unwrap(), "id-c");
}

#[test]
fn job_file_lists_skip_directories_and_download_through_client() {
    let client = client(MockGraphql::new(|query, variables, _| {
        if query.contains("bilbyJob (id") {
            return Ok(json!({"bilbyJob": job_node(3, "files")}));
        }
        if query.contains("bilbyResultFiles") {
            return Ok(json!({"bilbyResultFiles": {
                "files": [
                    {"path": "path/to/test.png", "fileSize": "1", "downloadToken": "test_token_1", "isDir": false},
                    {"path": "path/to/test.json", "fileSize": "10", "downloadToken": "test_token_2", "isDir": false},
                    {"path": "path/to/test", "fileSize": "100", "downloadToken": "test_token_3", "isDir": true},
                ],
                "isUploadedJob": false,
            }}));
        }
        Ok(download_ids(variables))
    }));

    let job = client.get_job_by_id("3").unwrap().unwrap();
    let files = job.get_full_file_list().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files.total_bytes(), 11);
    assert!(files.iter().all(|file| file.job_id() == &JobId::from("3")));

    let pngs = job.files(FileSelection::Png).unwrap();
    assert_eq!(pngs.len(), 1);
    assert_eq!(pngs[0].path, Utf8Path::new("path/to/test.png"));
    assert_eq!(client.graphql().count("generateFileDownloadIds"), 1);
}

fn submission_responder(
    supporting_result: bool,
) -> impl Fn(&str, &Value, &[UploadFile]) -> Result<Value, GwCloudError> + Send + Sync + 'static {
    move |query, _, _| {
        if query.contains("newBilbyJobFromIniString") {
            return Ok(json!({"newBilbyJobFromIniString": {"result": {
                "jobId": "11",
                "supportingFiles": [{"filePath": "psd.txt", "token": "supporting-token"}],
            }}}));
        }
        if query.contains("uploadSupportingFile") {
            return Ok(json!({"uploadSupportingFile": {"result": {"result": supporting_result}}}));
        }
        Ok(json!({"bilbyJob": job_node(11, "submitted")}))
    }
}

#[test]
fn ini_file_submission_uploads_supporting_files_next_to_it() {
    let dir = tempfile::tempdir().unwrap();
    let ini = dir.path().join("job.ini");
    fs::write(&ini, "\n  psd-dict={H1: psd.txt}\n\n").unwrap();
    fs::write(dir.path().join("psd.txt"), "1 2 3").unwrap();
    let client = client(MockGraphql::new(submission_responder(true)));

    let job = client
        .start_bilby_job_from_file("submitted", "a job", true, &ini, &Cluster::Ozstar)
        .unwrap()
        .unwrap();
    assert_eq!(job.job_id, JobId::from("11"));

    let requests = client.graphql().requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[0].variables["input"]["params"],
        json!({
            "details": {"name": "submitted", "description": "a job", "private": true, "cluster": "ozstar"},
            "iniString": {"iniString": "psd-dict={H1: psd.txt}"},
        })
    );
    assert!(requests[0].authorized);

    let upload = &requests[1];
    assert!(!upload.authorized);
    assert_eq!(
        upload.variables,
        json!({"input": {"fileToken": "supporting-token", "supportingFile": null}})
    );
    assert_eq!(
        upload.files,
        vec![UploadFile::new("input.supportingFile", dir.path().join("psd.txt"))]
    );
}

#[test]
fn missing_supporting_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let ini = dir.path().join("job.ini");
    fs::write(&ini, "psd-dict={H1: psd.txt}").unwrap();
    let client = client(MockGraphql::new(submission_responder(true)));

    let result = client.start_bilby_job_from_file("job", "", false, &ini, &Cluster::Default);
    assert_matches!(result, Err(GwCloudError::SupportingFileMissing(path)) if path.ends_with("psd.txt"));
    assert_eq!(client.graphql().count("uploadSupportingFile"), 0);
}

#[test]
fn rejected_supporting_file_fails_submission() {
    let dir = tempfile::tempdir().unwrap();
    let ini = dir.path().join("job.ini");
    fs::write(&ini, "psd-dict={H1: psd.txt}").unwrap();
    fs::write(dir.path().join("psd.txt"), "1 2 3").unwrap();
    let client = client(MockGraphql::new(submission_responder(false)));

    let result = client.start_bilby_job_from_file("job", "", false, &ini, &Cluster::Default);
    assert_matches!(result, Err(GwCloudError::UploadFailed(message)) if message.contains("remote side"));
    assert_eq!(client.graphql().count("bilbyJob (id"), 0);
}

#[test]
fn directory_upload_sends_gzipped_tar_of_the_job() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("result")).unwrap();
    fs::write(dir.path().join("result/run_result.json"), "{}").unwrap();
    fs::write(dir.path().join("run_config_complete.ini"), "x=1").unwrap();

    let entries: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen = Arc::clone(&entries);
    let client = client(MockGraphql::new(move |query, _, files| {
        if query.contains("generateBilbyJobUploadToken") {
            return Ok(json!({"generateBilbyJobUploadToken": {"token": "upload-token"}}));
        }
        if query.contains("uploadBilbyJob") {
            let archive = fs::File::open(&files[0].path).unwrap();
            let mut tar = tar::Archive::new(GzDecoder::new(archive));
            let mut names = seen.lock().unwrap();
            for entry in tar.entries().unwrap() {
                let entry = entry.unwrap();
                names.push(entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string());
            }
            return Ok(json!({"uploadBilbyJob": {"result": {"jobId": 21}}}));
        }
        Ok(json!({"bilbyJob": job_node(21, "uploaded")}))
    }));

    let job = client
        .upload_job_directory("uploaded job", dir.path(), false)
        .unwrap()
        .unwrap();
    assert_eq!(job.job_id, JobId::from("21"));

    let mut names = entries.lock().unwrap().clone();
    names.sort();
    assert_eq!(
        names,
        vec!["result", "result/run_result.json", "run_config_complete.ini"]
    );

    let requests = client.graphql().requests();
    let upload = requests
        .iter()
        .find(|request| request.query.contains("uploadBilbyJob"))
        .unwrap();
    assert_eq!(
        upload.variables,
        json!({"input": {
            "uploadToken": "upload-token",
            "details": {"description": "uploaded job", "private": true},
            "jobFile": null,
        }})
    );
    assert!(!upload.files[0].path.exists());
}

#[test]
fn event_ids_round_trip_through_camel_case() {
    let store: Arc<Mutex<HashMap<String, Value>>> = Arc::default();
    let events = Arc::clone(&store);
    let client = client(MockGraphql::new(move |query, variables, _| {
        let mut events = events.lock().unwrap();
        if query.contains("createEventId") {
            let input = variables["input"].clone();
            events.insert(input["eventId"].as_str().unwrap().to_string(), input);
            return Ok(json!({"createEventId": {"result": "Event ID created!"}}));
        }
        if query.contains("updateEventId") {
            let input = &variables["input"];
            let record = events.get_mut(input["eventId"].as_str().unwrap()).unwrap();
            if let Some(nickname) = input["nickname"].as_str() {
                record["nickname"] = json!(nickname);
            }
            return Ok(json!({"updateEventId": {"result": "Event ID updated!"}}));
        }
        if query.contains("deleteEventId") {
            events.remove(variables["input"]["eventId"].as_str().unwrap());
            return Ok(json!({"deleteEventId": {"result": "Event ID deleted!"}}));
        }
        if query.contains("allEventIds") {
            return Ok(json!({"allEventIds": events.values().cloned().collect::<Vec<_>>()}));
        }
        let key = variables["eventId"].as_str().unwrap();
        Ok(json!({"eventId": events.get(key).cloned()}))
    }));

    let mut event = EventId::new("GW123456_123456");
    event.trigger_id = Some("S123456a".to_string());
    let created = client.create_event_id(&event).unwrap().unwrap();
    assert_eq!(created, event);
    assert_eq!(
        client.graphql().requests()[0].variables,
        json!({"input": {
            "eventId": "GW123456_123456",
            "triggerId": "S123456a",
            "nickname": null,
            "isLigoEvent": false,
        }})
    );

    let updated = client
        .update_event_id("GW123456_123456", None, Some("GW-nick"), None)
        .unwrap()
        .unwrap();
    assert_eq!(updated.nickname.as_deref(), Some("GW-nick"));
    assert_eq!(updated.trigger_id.as_deref(), Some("S123456a"));

    assert_eq!(client.get_all_event_ids().unwrap(), vec![updated]);

    client.delete_event_id("GW123456_123456").unwrap();
    assert!(client.get_event_id("GW123456_123456").unwrap().is_none());
    assert!(client.get_all_event_ids().unwrap().is_empty());
}

#[test]
fn empty_event_id_makes_no_request() {
    let client = client(MockGraphql::new(|_, _, _| unreachable!()));
    assert!(client.get_event_id("").unwrap().is_none());
    assert!(client.graphql().requests().is_empty());
}
