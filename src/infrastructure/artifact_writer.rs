// Artifact writer - Puts rendered documents on disk
use crate::domain::error::ReportError;
use crate::domain::report::ReportDocument;
use std::path::{Path, PathBuf};

/// Writes every document under `dir`. Each file is written to a temporary
/// sibling first and renamed into place, so a reader never sees a partial file.
/// On failure, replaced files are restored and a directory created by this
/// call is removed again.
pub async fn write_documents(dir: &Path, documents: &[ReportDocument]) -> Result<Vec<PathBuf>, ReportError> {
    let created = first_missing_ancestor(dir).await;
    let result = create_and_write(dir, documents).await;
    if result.is_err() {
        if let Some(root) = &created {
            tracing::debug!("Removing {} after failed write", root.display());
            let _ = tokio::fs::remove_dir_all(root).await;
        }
    }
    result
}

async fn create_and_write(dir: &Path, documents: &[ReportDocument]) -> Result<Vec<PathBuf>, ReportError> {
    tokio::fs::create_dir_all(dir).await?;

    let mut staged = Vec::with_capacity(documents.len());
    for document in documents {
        let path = dir.join(document.file_name());
        let tmp = dir.join(format!(".{}.tmp", document.file_name()));
        if let Err(e) = tokio::fs::write(&tmp, document.contents()).await {
            discard(&staged).await;
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        staged.push((tmp, path));
    }

    // (path, backup of the file it replaced)
    let mut committed: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(staged.len());
    for (tmp, path) in &staged {
        match replace(tmp, path).await {
            Ok(backup) => committed.push((path.clone(), backup)),
            Err(e) => {
                tracing::warn!("Could not write {}: {}", path.display(), e);
                roll_back(&committed).await;
                discard(&staged).await;
                return Err(e);
            }
        }
    }

    let mut written = Vec::with_capacity(committed.len());
    for (path, backup) in committed {
        if let Some(backup) = backup {
            let _ = tokio::fs::remove_file(&backup).await;
        }
        tracing::info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Renames `tmp` over `path`, first moving an existing file aside.
async fn replace(tmp: &Path, path: &Path) -> Result<Option<PathBuf>, ReportError> {
    let backup = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_file() => {
            let backup = backup_path(path);
            tokio::fs::rename(path, &backup).await?;
            Some(backup)
        }
        _ => None,
    };
    if let Err(e) = tokio::fs::rename(tmp, path).await {
        if let Some(backup) = &backup {
            let _ = tokio::fs::rename(backup, path).await;
        }
        return Err(e.into());
    }
    Ok(backup)
}

async fn roll_back(committed: &[(PathBuf, Option<PathBuf>)]) {
    for (path, backup) in committed.iter().rev() {
        let _ = tokio::fs::remove_file(path).await;
        if let Some(backup) = backup {
            let _ = tokio::fs::rename(backup, path).await;
        }
    }
}

async fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (tmp, _) in staged {
        let _ = tokio::fs::remove_file(tmp).await;
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{}.bak", name))
}

/// Outermost ancestor of `dir` that does not exist yet, i.e. the directory
/// `create_dir_all` would start creating at.
async fn first_missing_ancestor(dir: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || tokio::fs::try_exists(ancestor).await.unwrap_or(true) {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_writes_documents_into_new_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("reports").join("output");
        let documents = vec![
            ReportDocument::Html(Bytes::from_static(b"<html></html>")),
            ReportDocument::Junit(Bytes::from_static(b"<testsuites/>")),
        ];

        let written = write_documents(&dir, &documents).await.unwrap();
        assert_eq!(written, vec![dir.join("report.html"), dir.join("junit.xml")]);
        assert_eq!(std::fs::read(dir.join("junit.xml")).unwrap(), b"<testsuites/>");

        let mut names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["junit.xml", "report.html"]);
    }

    #[tokio::test]
    async fn test_overwrites_previous_report() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("report.html"), "old").unwrap();

        write_documents(tmp.path(), &[ReportDocument::Html(Bytes::from_static(b"new"))])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(tmp.path().join("report.html")).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("taken");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let err = write_documents(&blocker.join("out"), &[ReportDocument::Html(Bytes::new())])
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Io(_)));
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_failed_rename_restores_replaced_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("report.html"), "old").unwrap();
        // A non-empty directory cannot be replaced by a file
        std::fs::create_dir(tmp.path().join("junit.xml")).unwrap();
        std::fs::write(tmp.path().join("junit.xml").join("keep"), "").unwrap();

        let documents = vec![
            ReportDocument::Html(Bytes::from_static(b"new")),
            ReportDocument::Junit(Bytes::from_static(b"<testsuites/>")),
        ];
        let err = write_documents(tmp.path(), &documents).await.unwrap_err();

        assert!(matches!(err, ReportError::Io(_)));
        assert_eq!(std::fs::read_to_string(tmp.path().join("report.html")).unwrap(), "old");
        assert_eq!(listing(tmp.path()), vec!["junit.xml", "report.html"]);
    }

    #[tokio::test]
    async fn test_failed_write_removes_created_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("reports").join("output");
        let documents = vec![
            ReportDocument::Html(Bytes::from_static(b"first")),
            ReportDocument::Html(Bytes::from_static(b"second")),
        ];

        assert!(write_documents(&dir, &documents).await.is_err());
        assert!(!tmp.path().join("reports").exists());
        assert!(listing(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_existing_directory_is_kept_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let documents = vec![
            ReportDocument::Html(Bytes::from_static(b"first")),
            ReportDocument::Html(Bytes::from_static(b"second")),
        ];

        assert!(write_documents(tmp.path(), &documents).await.is_err());
        assert!(tmp.path().exists());
        assert!(listing(tmp.path()).is_empty());
    }
}
