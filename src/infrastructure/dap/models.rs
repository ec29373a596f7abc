use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Body of a table data query. `since` is only sent for incremental pulls.
#[derive(Debug, Serialize)]
pub struct QueryRequest<'a> {
    pub format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Running,
    Complete,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

#[derive(Debug, Deserialize)]
pub struct ObjectId {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobState,
    #[serde(default)]
    pub objects: Vec<ObjectId>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ObjectRef<'a> {
    pub id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ResourceUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectUrls {
    pub urls: HashMap<String, ResourceUrl>,
}
