//! Google Drive v3 client.

use std::path::Path;

use gwrap_core::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::ServiceClient;
use crate::connection::{ApiRequest, Connector};
use crate::manager::CredentialManager;
use crate::scope::ServiceScope;

/// A file or folder as returned by `files.list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Fields beyond the default projection, kept as the provider sent them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriveFile {
    /// Returns true for folders.
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some("application/vnd.google-apps.folder")
    }
}

/// Lists and uploads files in the user's Drive.
#[derive(Debug)]
pub struct DriveClient {
    client: ServiceClient,
}

impl DriveClient {
    pub fn connect(
        application_name: Option<&str>,
        manager: &mut CredentialManager,
        connector: &dyn Connector,
    ) -> ApiResult<Self> {
        let client =
            ServiceClient::connect(ServiceScope::Drive, application_name, manager, connector)?;
        Ok(Self { client })
    }

    /// Returns every file and folder visible to the user.
    pub fn list_files(&self) -> ApiResult<Vec<DriveFile>> {
        let connection = self.client.connection();
        let files: Vec<DriveFile> = connection.list(&ApiRequest::get(connection.url("files")), "files")?;

        debug!("File and directory details:");
        for file in &files {
            debug!("  {}", serde_json::to_string(file).unwrap_or_default());
        }
        Ok(files)
    }

    /// Uploads a local file under `name`, optionally inside folder `parent_id`.
    ///
    /// # Errors
    ///
    /// An unreadable local file is an I/O error; provider failures are
    /// remote service errors.
    pub fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        name: &str,
        parent_id: Option<&str>,
    ) -> ApiResult<()> {
        let local_path = local_path.as_ref();
        let media = std::fs::read(local_path).map_err(|e| {
            ApiError::io(format!("failed to read {}: {}", local_path.display(), e)).with_source(e)
        })?;

        let connection = self.client.connection();
        let request = ApiRequest::post(connection.upload_url("files")?)
            .with_query("uploadType", "multipart")
            .with_related(
                upload_metadata(name, parent_id),
                media,
                guess_media_type(local_path),
            );

        connection.execute(&request)?;
        debug!("File [{}] uploaded to Google Drive.", local_path.display());
        Ok(())
    }

    pub fn service(&self) -> &ServiceClient {
        &self.client
    }
}

/// File metadata for `files.create`; `parents` only appears when given.
fn upload_metadata(name: &str, parent_id: Option<&str>) -> Value {
    let mut metadata = json!({ "name": name });
    if let Some(parent) = parent_id {
        metadata["parents"] = json!([parent]);
    }
    metadata
}

fn guess_media_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
