use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignError};

/// Body posted to the upload endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub pdf_base64: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadResponse {
    pub success: bool,
    pub blob_url: Option<String>,
    pub file_name: Option<String>,
    pub error: Option<String>,
    /// The blob was stored but recording it downstream failed.
    pub db_error: Option<String>,
}

/// A successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub file_name: String,
    pub blob_url: Option<String>,
    pub db_error: Option<String>,
}

/// Body posted to the metadata callback after a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataNotice {
    pub file_name: String,
    pub blob_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

/// Destination for signed documents.
pub trait Uploader: Send {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt>;

    /// Tell the embedding system where the document went. Failures here are
    /// reported on their own and never undo the upload.
    fn notify_metadata(&self, _notice: &MetadataNotice) -> Result<()> {
        Ok(())
    }
}

/// Turn an endpoint reply into a receipt. Non-2xx statuses and replies
/// without `success: true` are failures.
pub fn interpret_response(status: u16, body: &str, requested_name: &str) -> Result<UploadReceipt> {
    let parsed: Option<UploadResponse> = serde_json::from_str(body).ok();
    if !(200..300).contains(&status) {
        let reason = parsed
            .and_then(|r| r.error)
            .unwrap_or_else(|| format!("HTTP {}", status));
        return Err(SignError::Upload(reason));
    }
    let response =
        parsed.ok_or_else(|| SignError::Upload("unreadable response from upload endpoint".into()))?;
    if !response.success {
        return Err(SignError::Upload(
            response
                .error
                .unwrap_or_else(|| "upload was not accepted".to_string()),
        ));
    }
    Ok(UploadReceipt {
        file_name: response
            .file_name
            .unwrap_or_else(|| requested_name.to_string()),
        blob_url: response.blob_url,
        db_error: response.db_error,
    })
}

/// Uploads over HTTP with a blocking client.
pub struct HttpUploader {
    endpoint: String,
    metadata_callback: Option<String>,
    agent: ureq::Agent,
}

impl HttpUploader {
    pub fn new(endpoint: &str, metadata_callback: Option<&str>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            metadata_callback: metadata_callback.map(str::to_string),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn post_json<T: Serialize>(&self, url: &str, body: &T) -> std::result::Result<(u16, String), String> {
        match self.agent.post(url).send_json(body) {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.into_string().map_err(|e| e.to_string())?;
                Ok((status, text))
            }
            Err(ureq::Error::Status(status, resp)) => Ok((status, resp.into_string().unwrap_or_default())),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt> {
        log::info!(
            "Uploading {} ({} base64 bytes) to {}",
            request.file_name,
            request.pdf_base64.len(),
            self.endpoint
        );
        let (status, body) = self
            .post_json(&self.endpoint, request)
            .map_err(SignError::Upload)?;
        let receipt = interpret_response(status, &body, &request.file_name)?;
        if let Some(db_error) = &receipt.db_error {
            log::warn!("Upload stored but not recorded: {}", db_error);
        }
        Ok(receipt)
    }

    fn notify_metadata(&self, notice: &MetadataNotice) -> Result<()> {
        let Some(url) = &self.metadata_callback else {
            return Ok(());
        };
        let (status, body) = self.post_json(url, notice).map_err(SignError::Metadata)?;
        if !(200..300).contains(&status) {
            return Err(SignError::Metadata(format!("HTTP {}: {}", status, body.trim())));
        }
        log::info!("Metadata callback accepted {}", notice.file_name);
        Ok(())
    }
}
