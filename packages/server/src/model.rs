//! Wire models for invocations and their outputs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thingworks_blob::BlobRegistry;
use thingworks_invocation::{
    ActionOutput, InvocationError, InvocationId, InvocationSnapshot, InvocationState, LogRecord,
};

/// URL prefix of invocation resources.
pub const INVOCATIONS_PATH: &str = "/action_invocations";

pub fn invocation_href(id: InvocationId) -> String {
    format!("{}/{}", INVOCATIONS_PATH, id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkElement {
    pub rel: String,
    pub href: String,
}

impl LinkElement {
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
        }
    }
}

/// A blob output as sent to clients: a download link instead of the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobModel {
    pub href: String,
    pub media_type: String,
    pub rel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputModel {
    Value(Value),
    Blob(BlobModel),
}

impl OutputModel {
    /// Convert an action output for the wire, issuing a blob handle valid
    /// for `blob_expiry` if the output is a blob.
    pub fn from_output(
        output: &ActionOutput,
        blobs: &BlobRegistry,
        blob_expiry: std::time::Duration,
        description: Option<String>,
    ) -> Option<Self> {
        match output {
            ActionOutput::None => None,
            ActionOutput::Value(value) => Some(Self::Value(value.clone())),
            ActionOutput::Blob(blob) => {
                let handle = blobs.register_with_expiry(blob, blob_expiry);
                Some(Self::Blob(BlobModel {
                    href: handle.href(),
                    media_type: handle.media_type,
                    rel: "output".to_string(),
                    description,
                }))
            }
        }
    }
}

/// An invocation as served by `GET /action_invocations/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationModel {
    pub status: InvocationState,
    pub id: InvocationId,
    /// `/{thing}/{action}`
    pub action: String,
    pub href: String,
    pub time_requested: DateTime<Utc>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_completed: Option<DateTime<Utc>>,
    pub input: Value,
    pub output: Option<OutputModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
    pub log: Vec<LogRecord>,
    pub links: Vec<LinkElement>,
}

impl InvocationModel {
    pub fn from_snapshot(snapshot: &InvocationSnapshot, blobs: &BlobRegistry) -> Self {
        let status = &snapshot.status;
        let action = format!("/{}/{}", status.thing, status.action);
        let href = invocation_href(status.id);

        let output = snapshot.output.as_ref().and_then(|output| {
            OutputModel::from_output(
                output,
                blobs,
                snapshot.retention.blob_expiry,
                Some(format!("Output of {}", action)),
            )
        });

        let mut links = vec![LinkElement::new("self", href.clone())];
        if output.is_some() {
            links.push(LinkElement::new("output", format!("{}/output", href)));
        }

        Self {
            status: status.state,
            id: status.id,
            action,
            href,
            time_requested: status.requested_at,
            time_started: status.started_at,
            time_completed: status.ended_at,
            input: snapshot.input.clone(),
            output,
            error: status.error.clone(),
            log: snapshot.log.clone(),
            links,
        }
    }
}
