use std::path::{Path, PathBuf};

use anyhow::bail;
use chrono::NaiveDateTime;
use tokio::fs::{create_dir_all, remove_file, File};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Saves a document supporting a change request and returns the path it was
/// written to. The name is `<requested_by>_<YYYYmmddHHMMSS>_<file name>`.
pub async fn save_document(
    dir: &Path,
    requested_by: &str,
    at: NaiveDateTime,
    file_name: &str,
    bytes: &[u8],
) -> anyhow::Result<PathBuf> {
    let file_name = sanitize(file_name);
    if file_name.is_empty() {
        bail!("Document file name was empty!")
    }
    let name = format!(
        "{}_{}_{}",
        sanitize(requested_by),
        at.format("%Y%m%d%H%M%S"),
        file_name
    );
    create_dir_all(dir).await?;
    let path = dir.join(name);
    if path.exists() {
        bail!("Document {} already exists!", path.display())
    }
    let mut writer = BufWriter::new(File::create(&path).await?);
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(path)
}

/// Removes a document whose change request was never stored.
pub async fn discard_document(path: &Path) {
    if let Err(err) = remove_file(path).await {
        log::warn!("Could not remove orphaned document {}: {}", path.display(), err);
    }
}

/// Keeps only the final path component and drops separators.
fn sanitize(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    base.chars()
        .filter(|c| !c.is_control() && *c != ':')
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(9, 30, 5)
            .unwrap()
    }

    #[tokio::test]
    async fn writes_document_under_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_document(dir.path(), "1RV21CS001", at(), "note.pdf", b"%PDF")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("1RV21CS001_20240110093005_note.pdf"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn strips_directories_from_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_document(dir.path(), "s1", at(), "../../etc/passwd", b"x")
            .await
            .unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(save_document(dir.path(), "s1", at(), "..", b"x").await.is_err());
    }
}
