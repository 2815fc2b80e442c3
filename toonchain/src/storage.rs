//! Pinning uploads to an IPFS storage service and reading content back through a gateway.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ipfs::directory_entry_name;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const METADATA_FILE_NAME: &str = "metadata.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage token not configured")]
    MissingToken,
    #[error("nothing to upload")]
    Empty,
    #[error("upload failed: http status {0}")]
    Http(u16),
    #[error("transport: {0}")]
    Transport(String),
    #[error("upload response carried no cid")]
    MissingCid,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => StorageError::Http(status.as_u16()),
            None => StorageError::Transport(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let content_type = content_type_for(&name).to_string();
        Self { name, content_type, bytes }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Best-effort MIME type from the file extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "json" => JSON_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

/// web3.storage answers `{ "cid": .. }`, nft.storage wraps it in `{ "value": { "cid": .. } }`.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum UploadResponse {
    Direct { cid: String },
    Wrapped { value: WrappedCid },
}

#[derive(Deserialize)]
pub struct WrappedCid {
    cid: String,
}

impl UploadResponse {
    pub fn into_cid(self) -> Result<String, StorageError> {
        let cid = match self {
            UploadResponse::Direct { cid } => cid,
            UploadResponse::Wrapped { value } => value.cid,
        };
        if cid.trim().is_empty() {
            Err(StorageError::MissingCid)
        } else {
            Ok(cid)
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Pins a single file and returns its CID.
    async fn upload_file(&self, file: FileUpload) -> Result<String, StorageError>;

    /// Pins the files as one directory, names taken as given, and returns the directory CID.
    async fn upload_directory(&self, files: Vec<FileUpload>) -> Result<String, StorageError>;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// Uploads pages as a directory where each file is renamed `NNN_<name>` by position.
pub async fn upload_files(store: &dyn BlobStore, files: Vec<FileUpload>) -> Result<String, StorageError> {
    if files.is_empty() {
        return Err(StorageError::Empty);
    }
    let named = files
        .into_iter()
        .enumerate()
        .map(|(index, mut file)| {
            file.name = directory_entry_name(index, &file.name);
            file
        })
        .collect();
    store.upload_directory(named).await
}

/// Pins `value` as a pretty-printed `metadata.json`.
pub async fn upload_json<T: Serialize + ?Sized>(store: &dyn BlobStore, value: &T) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let file = FileUpload::new(METADATA_FILE_NAME, bytes).with_content_type(JSON_CONTENT_TYPE);
    store.upload_file(file).await
}

pub async fn fetch_json<T: DeserializeOwned>(store: &dyn BlobStore, url: &str) -> Result<T, StorageError> {
    let bytes = store.fetch(url).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(feature = "http")]
pub use http::Web3Storage;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use log::{debug, info, warn};
    use reqwest::multipart::{Form, Part};
    use reqwest::Client;

    use super::{BlobStore, FileUpload, StorageError, UploadResponse};
    use crate::config::StorageConfig;

    /// Client for a pinning service speaking the web3.storage `POST /upload` API.
    #[derive(Clone, Debug)]
    pub struct Web3Storage {
        http: Client,
        endpoint: String,
        token: Option<String>,
    }

    impl Web3Storage {
        pub fn new(config: &StorageConfig, timeout: Duration) -> Result<Self, StorageError> {
            let http = Client::builder().timeout(timeout).build()?;
            Ok(Self { http, endpoint: config.endpoint.clone(), token: config.token.clone() })
        }

        fn token(&self) -> Result<&str, StorageError> {
            self.token.as_deref().filter(|t| !t.is_empty()).ok_or(StorageError::MissingToken)
        }

        async fn post_form(&self, form: Form, files: usize) -> Result<String, StorageError> {
            let token = self.token()?;
            let resp = self.http.post(&self.endpoint).bearer_auth(token).multipart(form).send().await?;
            let status = resp.status();
            if !status.is_success() {
                warn!("upload of {files} file(s) to {} failed with status {}", self.endpoint, status.as_u16());
                return Err(StorageError::Http(status.as_u16()));
            }
            let body: UploadResponse = serde_json::from_slice(&resp.bytes().await?)?;
            let cid = body.into_cid()?;
            info!("pinned {files} file(s) as {cid}");
            Ok(cid)
        }
    }

    fn part(file: FileUpload) -> Result<Part, StorageError> {
        Ok(Part::bytes(file.bytes).file_name(file.name).mime_str(&file.content_type)?)
    }

    #[async_trait]
    impl BlobStore for Web3Storage {
        async fn upload_file(&self, file: FileUpload) -> Result<String, StorageError> {
            self.token()?;
            debug!("uploading {} ({} bytes)", file.name, file.bytes.len());
            let form = Form::new().part("file", part(file)?);
            self.post_form(form, 1).await
        }

        async fn upload_directory(&self, files: Vec<FileUpload>) -> Result<String, StorageError> {
            self.token()?;
            if files.is_empty() {
                return Err(StorageError::Empty);
            }
            let count = files.len();
            let mut form = Form::new();
            for file in files {
                form = form.part("file", part(file)?);
            }
            self.post_form(form, count).await
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
            let resp = self.http.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(StorageError::Http(status.as_u16()));
            }
            Ok(resp.bytes().await?.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        uploads: Mutex<Vec<Vec<FileUpload>>>,
    }

    #[async_trait]
    impl BlobStore for Recorder {
        async fn upload_file(&self, file: FileUpload) -> Result<String, StorageError> {
            self.uploads.lock().unwrap().push(vec![file]);
            Ok("bafyfile".into())
        }

        async fn upload_directory(&self, files: Vec<FileUpload>) -> Result<String, StorageError> {
            self.uploads.lock().unwrap().push(files);
            Ok("bafydir".into())
        }

        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, StorageError> {
            Ok(br#"{"name":"n","description":"d","images":[]}"#.to_vec())
        }
    }

    #[tokio::test]
    async fn upload_files_renames_by_position() {
        let store = Recorder::default();
        let cid = upload_files(&store, vec![FileUpload::new("a.png", vec![1]), FileUpload::new("b.JPG", vec![2])]).await.unwrap();
        assert_eq!(cid, "bafydir");
        let uploads = store.uploads.lock().unwrap();
        let names: Vec<_> = uploads[0].iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["000_a.png", "001_b.JPG"]);
        assert_eq!(uploads[0][1].content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn upload_files_refuses_empty_directory() {
        let store = Recorder::default();
        assert!(matches!(upload_files(&store, vec![]).await, Err(StorageError::Empty)));
        assert!(store.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_json_wraps_value_in_metadata_file() {
        let store = Recorder::default();
        let cid = upload_json(&store, &serde_json::json!({ "name": "Ep" })).await.unwrap();
        assert_eq!(cid, "bafyfile");
        let uploads = store.uploads.lock().unwrap();
        let file = &uploads[0][0];
        assert_eq!(file.name, "metadata.json");
        assert_eq!(file.content_type, "application/json");
        assert_eq!(file.bytes, b"{\n  \"name\": \"Ep\"\n}");
    }

    #[test]
    fn both_upload_response_shapes_yield_cid() {
        let direct: UploadResponse = serde_json::from_str(r#"{"cid":"bafy1"}"#).unwrap();
        let wrapped: UploadResponse = serde_json::from_str(r#"{"ok":true,"value":{"cid":"bafy2"}}"#).unwrap();
        let blank: UploadResponse = serde_json::from_str(r#"{"cid":""}"#).unwrap();
        assert_eq!(direct.into_cid().unwrap(), "bafy1");
        assert_eq!(wrapped.into_cid().unwrap(), "bafy2");
        assert!(matches!(blank.into_cid(), Err(StorageError::MissingCid)));
    }
}
