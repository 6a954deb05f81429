use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::json;
use walkdir::WalkDir;

use crate::adapters::google::auth::GcpAuth;
use crate::adapters::http;
use crate::utils::error::{ConnectorError, Result};

const SERVICE: &str = "Drive API";
const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3";
const MIME_TYPE_FOLDER: &str = "application/vnd.google-apps.folder";

/// Scope the credentials must be authorized for.
pub const SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// A Google Drive path.
///
/// Paths starting with `//name/` address the shared drive `name`; paths with
/// a single leading `/` address the user's own "My Drive" drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrivePath {
    drive: String,
    parts: Vec<String>,
}

impl DrivePath {
    pub fn new(path: &str) -> Result<Self> {
        path.parse()
    }

    /// Name of the shared drive, or the empty string for a user drive.
    pub fn drive(&self) -> &str {
        &self.drive
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The final path component, when there is one.
    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Return a new path with the given segments appended.
    pub fn join(&self, segments: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.extend(
            segments
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string),
        );
        Self {
            drive: self.drive.clone(),
            parts,
        }
    }

    /// Return the path as a URI.
    pub fn as_uri(&self) -> String {
        format!("gdrive:{self}")
    }
}

impl FromStr for DrivePath {
    type Err = ConnectorError;

    fn from_str(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(ConnectorError::InvalidConfigValue {
                field: "path".to_string(),
                value: path.to_string(),
                reason: "The path must start with '//' (shared drive) or '/' (the user's own \
                         \"My Drive\" drive)"
                    .to_string(),
            });
        }
        let shared = path.starts_with("//");
        let mut segments = path
            .trim_start_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let drive = if shared {
            if segments.is_empty() {
                return Err(ConnectorError::InvalidConfigValue {
                    field: "path".to_string(),
                    value: path.to_string(),
                    reason: "Missing shared drive name".to_string(),
                });
            }
            segments.remove(0)
        } else {
            String::new()
        };
        Ok(Self {
            drive,
            parts: segments,
        })
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.drive.is_empty() {
            write!(f, "/{}", self.parts.join("/"))
        } else {
            write!(f, "//{}/{}", self.drive, self.parts.join("/"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileResource {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<FileResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveList {
    #[serde(default)]
    drives: Vec<FileResource>,
}

/// Google Drive connector.
pub struct Drive {
    auth: GcpAuth,
    endpoint: String,
    upload_endpoint: String,
    http: reqwest::Client,
    drive_ids: Mutex<HashMap<String, String>>,
}

impl Drive {
    pub fn connect(auth: GcpAuth) -> Self {
        Self {
            auth,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            http: http::client(),
            drive_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Override the API endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Override the upload API endpoint.
    pub fn with_upload_endpoint(mut self, endpoint: &str) -> Self {
        self.upload_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Return `true` if the given path exists.
    pub async fn exists(&self, path: &DrivePath, in_trash: bool) -> Result<bool> {
        tracing::info!("Checking existence of \"{path}\"");
        Ok(self.file_id_by_path(path, in_trash).await?.is_some())
    }

    /// Create a folder at the given path (including parent folders).
    pub async fn mkdir(&self, path: &DrivePath) -> Result<DrivePath> {
        tracing::info!("Creating Google Drive folder \"{path}\"");
        self.create_folder_at_path(path).await?;
        Ok(path.clone())
    }

    /// Remove a file or folder at the given path.
    ///
    /// `use_trash` moves the target to the trash instead of deleting it
    /// permanently and cannot be combined with `in_trash`.
    pub async fn remove(
        &self,
        path: &DrivePath,
        missing_ok: bool,
        use_trash: bool,
        in_trash: bool,
    ) -> Result<()> {
        if use_trash {
            tracing::info!("Moving Google Drive path \"{path}\" to trash");
        } else {
            tracing::info!("Deleting Google Drive path \"{path}\"");
        }
        if use_trash && in_trash {
            return Err(ConnectorError::Config {
                message: "The `use_trash` parameter cannot be used together with `in_trash`"
                    .to_string(),
            });
        }
        if path.parts().is_empty() {
            return Err(ConnectorError::Config {
                message: format!("Invalid path \"{path}\""),
            });
        }
        match self.file_id_by_path(path, in_trash).await? {
            Some(file_id) => self.remove_file(&file_id, use_trash).await,
            None if missing_ok => Ok(()),
            None => Err(ConnectorError::NotFound {
                message: format!("No such file or folder: \"{path}\""),
            }),
        }
    }

    /// Upload a file or directory to Google Drive and return the Google
    /// Drive path pointing to it.
    ///
    /// Existing files are moved to the trash first when overwriting.
    pub async fn upload(&self, src: &Path, dst: &DrivePath, overwrite: bool) -> Result<DrivePath> {
        let name = file_name(src)?;
        if src.is_file() {
            self.upload_file_to_path(src, dst, overwrite).await?;
        } else if src.is_dir() {
            self.upload_folder_to_path(src, dst, overwrite).await?;
        } else {
            return Err(ConnectorError::Config {
                message: format!("Invalid source path \"{}\"", src.display()),
            });
        }
        Ok(dst.join(&name))
    }

    async fn drive_id(&self, name: &str) -> Result<String> {
        if let Ok(drive_ids) = self.drive_ids.lock() {
            if let Some(id) = drive_ids.get(name) {
                return Ok(id.clone());
            }
        }

        let token = self.auth.access_token(SCOPE).await?;
        let drive_id = if name.is_empty() {
            tracing::debug!("Loading drive ID of the user's root drive");
            let response = self
                .http
                .get(format!("{}/files/root", self.endpoint))
                .query(&[("fields", "id")])
                .bearer_auth(token)
                .send()
                .await?;
            let response = http::check_response(SERVICE, response).await?;
            let root: FileResource = response.json().await?;
            root.id
        } else {
            tracing::debug!("Loading drive ID of shared drive \"{name}\"");
            let response = self
                .http
                .get(format!("{}/drives", self.endpoint))
                .query(&[("q", format!("name = '{}'", escape_query(name)))])
                .bearer_auth(token)
                .send()
                .await?;
            let response = http::check_response(SERVICE, response).await?;
            let drives: DriveList = response.json().await?;
            match drives.drives.len() {
                0 => {
                    return Err(ConnectorError::NotFound {
                        message: format!("Shared drive \"{name}\" not found"),
                    })
                }
                1 => drives.drives.into_iter().next().map(|drive| drive.id).unwrap_or_default(),
                _ => {
                    return Err(ConnectorError::Config {
                        message: format!("Shared drive name \"{name}\" is not unique"),
                    })
                }
            }
        };

        tracing::debug!("Drive ID: {drive_id}");
        if let Ok(mut drive_ids) = self.drive_ids.lock() {
            drive_ids.insert(name.to_string(), drive_id.clone());
        }
        Ok(drive_id)
    }

    async fn file_ids(
        &self,
        parent_id: &str,
        name: Option<&str>,
        drive_id: Option<&str>,
        folders: Option<bool>,
        in_trash: Option<bool>,
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut query = format!("'{}' in parents", escape_query(parent_id));
        if let Some(name) = name {
            query.push_str(&format!(" and name = '{}'", escape_query(name)));
        }
        if let Some(folders) = folders {
            query.push_str(&format!(
                " and mimeType {} '{MIME_TYPE_FOLDER}'",
                if folders { "=" } else { "!=" }
            ));
        }
        if let Some(in_trash) = in_trash {
            query.push_str(&format!(" and trashed = {in_trash}"));
        }

        let token = self.auth.access_token(SCOPE).await?;
        let mut file_ids: HashMap<String, Vec<String>> = HashMap::new();
        let mut page = 0;
        let mut page_token: Option<String> = None;
        loop {
            page += 1;
            tracing::debug!("Loading page {page}");
            let mut params = vec![
                ("corpora", if drive_id.is_some() { "drive" } else { "user" }.to_string()),
                ("q", query.clone()),
                ("spaces", "drive".to_string()),
                ("fields", "nextPageToken, files(id, name)".to_string()),
                ("supportsAllDrives", "true".to_string()),
                (
                    "includeItemsFromAllDrives",
                    drive_id.is_some().to_string(),
                ),
            ];
            if let Some(drive_id) = drive_id {
                params.push(("driveId", drive_id.to_string()));
            }
            if let Some(token_value) = &page_token {
                params.push(("pageToken", token_value.clone()));
            }
            let response = self
                .http
                .get(format!("{}/files", self.endpoint))
                .query(&params)
                .bearer_auth(&token)
                .send()
                .await?;
            let response = http::check_response(SERVICE, response).await?;
            let list: FileList = response.json().await?;
            for file in list.files {
                let key = name
                    .map(str::to_string)
                    .or(file.name)
                    .unwrap_or_default();
                file_ids.entry(key).or_default().push(file.id);
            }
            page_token = list.next_page_token;
            if page_token.is_none() {
                return Ok(file_ids);
            }
        }
    }

    async fn file_id_by_path(&self, path: &DrivePath, in_trash: bool) -> Result<Option<String>> {
        tracing::debug!("Loading file ID of path \"{path}\"");
        let drive_id = self.drive_id(path.drive()).await?;
        let shared_drive_id = (!path.drive().is_empty()).then(|| drive_id.clone());
        let mut parent_id = drive_id;

        let parts = path.parts();
        for (index, part) in parts.iter().enumerate() {
            let last = index == parts.len() - 1;
            let file_ids = self
                .file_ids(
                    &parent_id,
                    Some(part),
                    shared_drive_id.as_deref(),
                    // Only consider folders before the last element
                    if last { None } else { Some(true) },
                    // Do not consider the trash state until the last element
                    match (in_trash, last) {
                        (false, _) => Some(false),
                        (true, false) => None,
                        (true, true) => Some(true),
                    },
                )
                .await?;
            let ids = file_ids.get(part.as_str()).map(Vec::as_slice).unwrap_or_default();
            match ids {
                [] => return Ok(None),
                [id] => parent_id = id.clone(),
                _ => {
                    return Err(ConnectorError::Config {
                        message: format!("Name \"{part}\" is not unique in path \"{path}\""),
                    })
                }
            }
        }
        tracing::debug!("Path file ID: {parent_id}");
        Ok(Some(parent_id))
    }

    async fn remove_file(&self, file_id: &str, use_trash: bool) -> Result<()> {
        let token = self.auth.access_token(SCOPE).await?;
        let response = if use_trash {
            tracing::debug!("Moving file \"{file_id}\" to trash");
            self.http
                .patch(format!("{}/files/{file_id}", self.endpoint))
                .query(&[("supportsAllDrives", "true")])
                .bearer_auth(token)
                .json(&json!({"trashed": true}))
                .send()
                .await?
        } else {
            tracing::debug!("Deleting file \"{file_id}\"");
            self.http
                .delete(format!("{}/files/{file_id}", self.endpoint))
                .query(&[("supportsAllDrives", "true")])
                .bearer_auth(token)
                .send()
                .await?
        };
        http::check_response(SERVICE, response).await?;
        Ok(())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        tracing::debug!("Creating folder \"{name}\" with parent \"{parent_id}\"");
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .post(format!("{}/files", self.endpoint))
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .bearer_auth(token)
            .json(&json!({
                "mimeType": MIME_TYPE_FOLDER,
                "name": name,
                "parents": [parent_id],
            }))
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let folder: FileResource = response.json().await?;
        tracing::debug!("Created folder ID: {}", folder.id);
        Ok(folder.id)
    }

    async fn create_folder_at_path(&self, path: &DrivePath) -> Result<String> {
        tracing::debug!("Creating folder at path \"{path}\"");
        let drive_id = self.drive_id(path.drive()).await?;
        let shared_drive_id = (!path.drive().is_empty()).then(|| drive_id.clone());
        let mut parent_id = drive_id;
        let mut create = false;

        for part in path.parts() {
            if !create {
                let folder_ids = self
                    .file_ids(
                        &parent_id,
                        Some(part),
                        shared_drive_id.as_deref(),
                        Some(true),
                        Some(false),
                    )
                    .await?;
                let ids = folder_ids.get(part.as_str()).map(Vec::as_slice).unwrap_or_default();
                match ids {
                    [] => create = true,
                    [id] => parent_id = id.clone(),
                    // Every path element must be unique
                    _ => {
                        return Err(ConnectorError::Config {
                            message: format!("Name \"{part}\" is not unique in path \"{path}\""),
                        })
                    }
                }
            }
            if create {
                parent_id = self.create_folder(part, &parent_id).await?;
            }
        }
        tracing::debug!("Created path file ID: {parent_id}");
        Ok(parent_id)
    }

    async fn upload_file(&self, src: &Path, parent_id: &str) -> Result<()> {
        tracing::debug!("Uploading file \"{}\" to \"{parent_id}\"", src.display());
        let metadata = json!({"name": file_name(src)?, "parents": [parent_id]});
        let contents = tokio::fs::read(src).await?;
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .post(format!("{}/files", self.upload_endpoint))
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id"),
                ("supportsAllDrives", "true"),
            ])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", http::MULTIPART_BOUNDARY),
            )
            .body(http::multipart_related(
                &metadata.to_string(),
                "application/octet-stream",
                &contents,
            ))
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let file: FileResource = response.json().await?;
        tracing::debug!("Uploaded file ID: {}", file.id);
        Ok(())
    }

    async fn overwrite_existing(
        &self,
        file_ids: &HashMap<String, Vec<String>>,
        name: &str,
        dst: &DrivePath,
        overwrite: bool,
    ) -> Result<()> {
        for file_id in file_ids.get(name).map(Vec::as_slice).unwrap_or_default() {
            if !overwrite {
                return Err(ConnectorError::Config {
                    message: format!("File \"{}\" already exists", dst.join(name)),
                });
            }
            tracing::info!("Moving existing file \"{}\" to trash", dst.join(name));
            self.remove_file(file_id, true).await?;
        }
        Ok(())
    }

    async fn upload_file_to_path(
        &self,
        src: &Path,
        dst: &DrivePath,
        overwrite: bool,
    ) -> Result<()> {
        tracing::info!("Uploading file \"{}\" to \"{dst}\"", src.display());
        let name = file_name(src)?;
        let parent_id = self.create_folder_at_path(dst).await?;
        let drive_id = if dst.drive().is_empty() {
            None
        } else {
            Some(self.drive_id(dst.drive()).await?)
        };
        let file_ids = self
            .file_ids(&parent_id, Some(&name), drive_id.as_deref(), None, Some(false))
            .await?;
        self.overwrite_existing(&file_ids, &name, dst, overwrite)
            .await?;
        self.upload_file(src, &parent_id).await
    }

    async fn upload_folder_to_path(
        &self,
        src: &Path,
        dst: &DrivePath,
        overwrite: bool,
    ) -> Result<()> {
        tracing::info!("Uploading folder \"{}\" to \"{dst}\"", src.display());
        let src_name = file_name(src)?;
        let drive_id = if dst.drive().is_empty() {
            None
        } else {
            Some(self.drive_id(dst.drive()).await?)
        };

        for entry in WalkDir::new(src).into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(src)
                .map_err(|error| ConnectorError::Config {
                    message: format!("Invalid source path \"{}\": {error}", src.display()),
                })?;
            let mut dst_folder = dst.join(&src_name);
            for component in relative.components() {
                dst_folder = dst_folder.join(&component.as_os_str().to_string_lossy());
            }

            tracing::info!(
                "Uploading subfolder \"{}\" to \"{dst_folder}\"",
                entry.path().display()
            );
            let parent_id = self.create_folder_at_path(&dst_folder).await?;
            let file_ids = self
                .file_ids(&parent_id, None, drive_id.as_deref(), None, Some(false))
                .await?;
            for child in std::fs::read_dir(entry.path())? {
                let child = child?;
                if !child.file_type()?.is_file() {
                    continue;
                }
                let child_name = file_name(&child.path())?;
                tracing::info!(
                    "Uploading file \"{}\" to \"{dst_folder}\"",
                    child.path().display()
                );
                self.overwrite_existing(&file_ids, &child_name, &dst_folder, overwrite)
                    .await?;
                self.upload_file(&child.path(), &parent_id).await?;
            }
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ConnectorError::Config {
            message: format!("Invalid source path \"{}\"", path.display()),
        })
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
