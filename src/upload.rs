//! Payload preparation.
//!
//! User arguments may embed raw binary payloads. Before a submission joins
//! the queue, every embedded binary is uploaded through the [`Uploader`]
//! collaborator and replaced in place by the server's file descriptor, so the
//! wire payload is pure JSON. Argument order is preserved throughout.

use crate::error::{QueueflowError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Marker the server uses to recognize file descriptors inside payloads.
pub const FILE_DATA_KIND: &str = "gradio.FileData";

/// One positional argument of a submission.
#[derive(Debug, Clone)]
pub enum InputValue {
    /// Plain JSON value, passed through unchanged
    Data(Value),
    /// Raw binary payload, uploaded and replaced by a [`FileRef`]
    Blob {
        bytes: Vec<u8>,
        filename: Option<String>,
    },
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        InputValue::Data(value)
    }
}

impl InputValue {
    /// Binary argument with a filename hint.
    pub fn blob(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        InputValue::Blob {
            bytes: bytes.into(),
            filename: Some(filename.into()),
        }
    }
}

/// Server-side reference to an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    /// Server-local path returned by the upload endpoint
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileRef {
    /// The payload shape the server expects in place of the raw binary.
    pub fn descriptor(&self) -> Value {
        let mut descriptor = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        descriptor["meta"] = json!({ "_type": FILE_DATA_KIND });
        descriptor
    }
}

/// A binary payload queued for upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// Uploads binary payloads ahead of a queue join.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload all files in one batch, returning one [`FileRef`] per file in
    /// input order.
    async fn upload(&self, root: &str, files: Vec<FileUpload>) -> Result<Vec<FileRef>>;
}

/// Multipart uploader against `${root}/upload`.
pub struct HttpUploader {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpUploader {
    pub fn new(auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| QueueflowError::Config(format!("Failed to create upload client: {e}")))?;
        Ok(Self { client, auth_token })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, root: &str, files: Vec<FileUpload>) -> Result<Vec<FileRef>> {
        let mut form = reqwest::multipart::Form::new();
        let names: Vec<Option<String>> = files.iter().map(|f| f.filename.clone()).collect();
        for file in files {
            let mut part = reqwest::multipart::Part::bytes(file.bytes);
            if let Some(name) = file.filename {
                part = part.file_name(name);
            }
            form = form.part("files", part);
        }

        let mut req = self.client.post(format!("{root}/upload")).multipart(form);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(QueueflowError::Upload(format!(
                "upload failed with HTTP {}",
                response.status()
            )));
        }

        // The server answers with one stored path per uploaded part.
        let paths: Vec<String> = response.json().await?;
        Ok(paths
            .into_iter()
            .zip(names)
            .map(|(path, orig_name)| FileRef {
                path,
                url: None,
                orig_name,
                size: None,
                mime_type: None,
            })
            .collect())
    }
}

/// Rewrite the argument list into the server-shaped payload, uploading every
/// embedded binary in one batch.
pub async fn prepare_payload(
    root: &str,
    args: Vec<InputValue>,
    uploader: &dyn Uploader,
) -> Result<Vec<Value>> {
    let mut blob_slots = Vec::new();
    let mut files = Vec::new();
    let mut payload: Vec<Value> = Vec::with_capacity(args.len());

    for (position, arg) in args.into_iter().enumerate() {
        match arg {
            InputValue::Data(value) => payload.push(value),
            InputValue::Blob { bytes, filename } => {
                blob_slots.push(position);
                files.push(FileUpload { bytes, filename });
                payload.push(Value::Null);
            }
        }
    }

    if files.is_empty() {
        return Ok(payload);
    }

    let refs = uploader.upload(root, files).await?;
    if refs.len() != blob_slots.len() {
        return Err(QueueflowError::Upload(format!(
            "uploaded {} files but server returned {} references",
            blob_slots.len(),
            refs.len()
        )));
    }
    for (position, file_ref) in blob_slots.into_iter().zip(refs) {
        payload[position] = file_ref.descriptor();
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeUploader {
        fail: bool,
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        async fn upload(&self, _root: &str, files: Vec<FileUpload>) -> Result<Vec<FileRef>> {
            if self.fail {
                return Err(QueueflowError::Upload("boom".to_string()));
            }
            Ok(files
                .into_iter()
                .enumerate()
                .map(|(i, f)| FileRef {
                    path: format!("/tmp/upload/{i}"),
                    url: None,
                    orig_name: f.filename,
                    size: Some(f.bytes.len() as u64),
                    mime_type: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_prepare_passes_plain_values_through() {
        let args = vec![
            InputValue::Data(json!(2)),
            InputValue::Data(json!({"k": "v"})),
        ];
        let payload = prepare_payload("http://x", args, &FakeUploader { fail: false })
            .await
            .unwrap();
        assert_eq!(payload, vec![json!(2), json!({"k": "v"})]);
    }

    #[tokio::test]
    async fn test_prepare_uploads_blobs_in_place() {
        let args = vec![
            InputValue::Data(json!("before")),
            InputValue::blob(vec![1u8, 2, 3], "cat.png"),
            InputValue::Data(json!("after")),
        ];
        let payload = prepare_payload("http://x", args, &FakeUploader { fail: false })
            .await
            .unwrap();

        assert_eq!(payload[0], json!("before"));
        assert_eq!(payload[2], json!("after"));
        assert_eq!(payload[1]["path"], json!("/tmp/upload/0"));
        assert_eq!(payload[1]["orig_name"], json!("cat.png"));
        assert_eq!(payload[1]["meta"]["_type"], json!(FILE_DATA_KIND));
    }

    #[tokio::test]
    async fn test_prepare_propagates_upload_failure() {
        let args = vec![InputValue::blob(vec![0u8], "x.bin")];
        let err = prepare_payload("http://x", args, &FakeUploader { fail: true })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueflowError::Upload(_)));
    }
}
