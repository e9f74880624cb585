use std::path::PathBuf;

use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::GwCloudError;

/// A local file sent alongside a mutation. `variable` is the dotted path of
/// the `Upload` variable it fills, e.g. `input.supportingFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub variable: String,
    pub path: PathBuf,
}

impl UploadFile {
    pub fn new(variable: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            variable: variable.into(),
            path: path.into(),
        }
    }
}

pub trait GraphqlClient: Send + Sync {
    /// Sends an authorized query or mutation and returns its `data` member.
    fn request(&self, query: &str, variables: Value) -> Result<Value, GwCloudError>;

    /// Sends a mutation as a multipart upload, without authorization.
    fn upload(
        &self,
        query: &str,
        variables: Value,
        files: Vec<UploadFile>,
    ) -> Result<Value, GwCloudError>;
}

#[derive(Clone)]
pub struct GraphqlHttpClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl GraphqlHttpClient {
    pub fn new(token: impl Into<String>, config: &ClientConfig) -> Result<Self, GwCloudError> {
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
            endpoint: config.endpoint.clone(),
            token: token.into(),
        })
    }

    fn handle_status(response: Response) -> Result<Response, GwCloudError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        if matches!(status, 401 | 403) {
            return Err(GwCloudError::Authentication);
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "GWCloud request failed".to_string());
        Err(GwCloudError::Status { status, message })
    }

    fn read_data(response: Response) -> Result<Value, GwCloudError> {
        let response = Self::handle_status(response)?;
        let body: GraphqlResponse = response
            .json()
            .map_err(|err| GwCloudError::MalformedResponse(err.to_string()))?;
        body.into_data()
    }
}

impl GraphqlClient for GraphqlHttpClient {
    fn request(&self, query: &str, variables: Value) -> Result<Value, GwCloudError> {
        debug!(endpoint = %self.endpoint, "graphql request");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .map_err(|err| GwCloudError::Http(err.to_string()))?;
        Self::read_data(response)
    }

    fn upload(
        &self,
        query: &str,
        variables: Value,
        files: Vec<UploadFile>,
    ) -> Result<Value, GwCloudError> {
        debug!(endpoint = %self.endpoint, files = files.len(), "graphql upload");
        let (operations, map) = multipart_operations(query, variables, &files);
        let mut form = Form::new()
            .text("operations", operations.to_string())
            .text("map", map.to_string());
        for (index, file) in files.iter().enumerate() {
            form = form.file(index.to_string(), &file.path).map_err(|err| {
                GwCloudError::Filesystem(format!("open {}: {err}", file.path.display()))
            })?;
        }

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .map_err(|err| GwCloudError::Http(err.to_string()))?;
        Self::read_data(response)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
    message: String,
}

impl GraphqlResponse {
    fn into_data(self) -> Result<Value, GwCloudError> {
        if !self.errors.is_empty() {
            if self
                .errors
                .iter()
                .any(|error| is_authentication_message(&error.message))
            {
                return Err(GwCloudError::Authentication);
            }
            let messages = self
                .errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>();
            return Err(GwCloudError::Graphql(messages.join("; ")));
        }
        match self.data {
            Some(Value::Null) | None => Err(GwCloudError::MalformedResponse(
                "response carried no data".to_string(),
            )),
            Some(data) => Ok(data),
        }
    }
}

fn is_authentication_message(message: &str) -> bool {
    let message = message.to_lowercase();
    (message.contains("token") && (message.contains("not exist") || message.contains("invalid")))
        || message.contains("not authenticated")
        || message.contains("authentication")
}

/// Builds the `operations` and `map` parts of a GraphQL multipart request.
/// Every upload variable is nulled in `operations` and mapped to the numbered
/// file part carrying its content.
pub fn multipart_operations(query: &str, variables: Value, files: &[UploadFile]) -> (Value, Value) {
    let mut variables = variables;
    let mut map = serde_json::Map::new();
    for (index, file) in files.iter().enumerate() {
        set_path(&mut variables, &file.variable, Value::Null);
        map.insert(
            index.to_string(),
            json!([format!("variables.{}", file.variable)]),
        );
    }
    (
        json!({ "query": query, "variables": variables }),
        Value::Object(map),
    )
}

fn set_path(target: &mut Value, dotted: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Value::Object(object) = target else {
        return;
    };
    match dotted.split_once('.') {
        None => {
            object.insert(dotted.to_string(), value);
        }
        Some((head, rest)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            set_path(child, rest, value);
        }
    }
}
