use std::path::Path;

use toonchain::FileUpload;

/// Reads `path` into an upload named after the file.
pub async fn load_upload(path: &Path) -> std::io::Result<FileUpload> {
    let bytes = tokio::fs::read(path).await?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "file".to_string());
    Ok(FileUpload::new(name, bytes))
}

/// Loads every page in the order given on the command line.
pub async fn load_uploads(paths: &[std::path::PathBuf]) -> std::io::Result<Vec<FileUpload>> {
    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        uploads.push(load_upload(path).await?);
    }
    Ok(uploads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_keep_name_order_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.png");
        let a = dir.path().join("a.jpg");
        tokio::fs::write(&b, [1u8, 2]).await.unwrap();
        tokio::fs::write(&a, [3u8]).await.unwrap();

        let uploads = load_uploads(&[b, a]).await.unwrap();
        assert_eq!(uploads[0].name, "b.png");
        assert_eq!(uploads[0].content_type, "image/png");
        assert_eq!(uploads[0].bytes, [1, 2]);
        assert_eq!(uploads[1].content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_upload(&dir.path().join("nope.png")).await.is_err());
    }
}
