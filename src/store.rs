use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::error::HarvestError;
use crate::links::JoinedRow;
use crate::summary::GroupedSummary;

/// File and directory names inside one run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    #[serde(default = "default_table_file")]
    pub table_file: String,
    #[serde(default = "default_summary_file")]
    pub summary_file: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            table_file: default_table_file(),
            summary_file: default_summary_file(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_table_file() -> String {
    "final.csv".to_string()
}

fn default_summary_file() -> String {
    "query_results.json".to_string()
}

fn default_download_dir() -> String {
    "downloaded_files".to_string()
}

/// Output of one pipeline run. Concurrent runs must use distinct roots; see
/// [`create_run_dir`].
#[derive(Debug, Clone)]
pub struct RunStore {
    root: Utf8PathBuf,
    layout: OutputLayout,
}

impl RunStore {
    pub fn new(root: Utf8PathBuf, layout: OutputLayout) -> Self {
        Self { root, layout }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn table_path(&self) -> Utf8PathBuf {
        self.root.join(&self.layout.table_file)
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.root.join(&self.layout.summary_file)
    }

    pub fn download_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.layout.download_dir)
    }

    pub fn ensure_dirs(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.download_dir().as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn write_table(&self, rows: &[JoinedRow]) -> Result<Utf8PathBuf, HarvestError> {
        let path = self.table_path();
        let mut writer = csv::Writer::from_writer(Vec::new());
        if rows.is_empty() {
            writer
                .write_record(TABLE_COLUMNS)
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        for row in rows {
            writer
                .serialize(row)
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        let content = writer
            .into_inner()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn write_summary(&self, summary: &GroupedSummary) -> Result<Utf8PathBuf, HarvestError> {
        let path = self.summary_path();
        let content = serde_json::to_vec_pretty(summary)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    /// Writes a downloaded artifact under the download directory.
    pub fn write_artifact(&self, file_name: &str, content: &[u8]) -> Result<Utf8PathBuf, HarvestError> {
        if !is_plain_file_name(file_name) {
            return Err(HarvestError::Filesystem(format!(
                "refusing to write artifact named {file_name:?}"
            )));
        }
        let path = self.download_dir().join(file_name);
        write_bytes_atomic(&path, content)?;
        Ok(path)
    }
}

const TABLE_COLUMNS: [&str; 9] = [
    "main_objectid",
    "objectname",
    "sample_typename",
    "created_date",
    "updated_date",
    "main_objectfilepath",
    "linked_objectid",
    "linked_objectfilepath",
    "associated_typename",
];

pub fn read_table(path: &Utf8Path) -> Result<Vec<JoinedRow>, HarvestError> {
    let mut reader = csv::Reader::from_path(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("open {path}: {err}")))?;
    reader
        .deserialize()
        .map(|row| row.map_err(|err| HarvestError::Filesystem(err.to_string())))
        .collect()
}

/// Creates a fresh, uniquely named run directory below `parent`.
pub fn create_run_dir(parent: &Utf8Path) -> Result<Utf8PathBuf, HarvestError> {
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let prefix = format!("run-{}-", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    let dir = Builder::new()
        .prefix(&prefix)
        .tempdir_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?
        .keep();
    Utf8PathBuf::from_path_buf(dir)
        .map_err(|_| HarvestError::Filesystem("non-utf8 run directory".to_string()))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    let parent = path
        .parent()
        .ok_or_else(|| HarvestError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".matinf-part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RunStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("run")).unwrap();
        (temp, RunStore::new(root, OutputLayout::default()))
    }

    #[test]
    fn layout_paths() {
        let (_temp, store) = store();
        assert!(store.table_path().ends_with("run/final.csv"));
        assert!(store.summary_path().ends_with("run/query_results.json"));
        assert!(store.download_dir().ends_with("run/downloaded_files"));
    }

    #[test]
    fn empty_table_still_has_header() {
        let (_temp, store) = store();
        store.ensure_dirs().unwrap();
        let path = store.write_table(&[]).unwrap();
        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert!(content.starts_with("main_objectid,objectname,"));
        assert!(read_table(&path).unwrap().is_empty());
    }

    #[test]
    fn artifact_names_cannot_escape_download_dir() {
        let (_temp, store) = store();
        assert!(store.write_artifact("../evil.sh", b"x").is_err());
        assert!(store.write_artifact("..", b"x").is_err());
        let path = store.write_artifact("edx.csv", b"a,b").unwrap();
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"a,b");
    }

    #[test]
    fn run_dirs_are_unique() {
        let temp = tempfile::tempdir().unwrap();
        let parent = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let first = create_run_dir(&parent).unwrap();
        let second = create_run_dir(&parent).unwrap();
        assert_ne!(first, second);
        assert!(first.as_std_path().is_dir());
    }
}
