use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::composition::filter_by_composition;
use crate::criteria::{CompositionMatch, ElementCriteria};
use crate::domain::{DateRange, ObjectId, TypeName};
use crate::error::HarvestError;
use crate::links::{JoinedRow, LinkMapping, LinkedObjects, fetch_linked_objects};
use crate::presence::filter_by_presence;
use crate::query::LinkedObjectsQuery;
use crate::remote::{FileFetcher, RemoteExecutor};
use crate::store::{OutputLayout, RunStore};
use crate::summary::{GroupedSummary, group_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    FetchObjects,
    PresenceFilter,
    CompositionFilter,
    Finalize,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::FetchObjects => write!(f, "fetch-objects"),
            PipelineStage::PresenceFilter => write!(f, "presence-filter"),
            PipelineStage::CompositionFilter => write!(f, "composition-filter"),
            PipelineStage::Finalize => write!(f, "finalize"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub query: LinkedObjectsQuery,
    pub criteria: ElementCriteria,
    pub strict: bool,
    pub composition_match: CompositionMatch,
}

impl PipelineRequest {
    pub fn new<I, S>(
        associated_typenames: I,
        sample_typename: &str,
        start_date: &str,
        end_date: &str,
        criteria: ElementCriteria,
    ) -> Result<Self, HarvestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let associated_typenames = associated_typenames
            .into_iter()
            .map(|name| name.as_ref().parse::<TypeName>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        let request = Self {
            query: LinkedObjectsQuery {
                sample_typename: sample_typename.parse()?,
                associated_typenames,
                created: DateRange::parse(start_date, end_date)?,
            },
            criteria,
            strict: false,
            composition_match: CompositionMatch::default(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.query.associated_typenames.is_empty() {
            return Err(HarvestError::InvalidCriteria(
                "at least one associated type name is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedArtifact {
    pub linked_objectid: ObjectId,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadFailure {
    pub linked_objectid: ObjectId,
    pub file_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub downloaded: Vec<DownloadedArtifact>,
    pub failed: Vec<DownloadFailure>,
    /// Linked objects whose file path is a placeholder.
    pub skipped: Vec<ObjectId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilteredResult {
    pub stages: Vec<PipelineStage>,
    pub rows: Vec<JoinedRow>,
    pub mapping: LinkMapping,
    pub object_ids: Vec<ObjectId>,
    pub summary: GroupedSummary,
    pub table_path: String,
    pub summary_path: String,
    pub downloads: DownloadReport,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct Pipeline<E: RemoteExecutor, F: FileFetcher> {
    executor: E,
    fetcher: F,
}

impl<E: RemoteExecutor, F: FileFetcher> Pipeline<E, F> {
    pub fn new(executor: E, fetcher: F) -> Self {
        Self { executor, fetcher }
    }

    pub fn run(
        &self,
        request: &PipelineRequest,
        store: &RunStore,
        sink: &dyn ProgressSink,
    ) -> Result<FilteredResult, HarvestError> {
        request.validate()?;
        let started = Instant::now();
        let mut stages = Vec::new();

        sink.event(ProgressEvent {
            message: format!(
                "phase=Query; {} objects linked to {}",
                request.query.sample_typename,
                join_names(&request.query.associated_typenames)
            ),
            elapsed: None,
        });
        let linked = fetch_linked_objects(&self.executor, &request.query, request.strict)
            .map_err(HarvestError::at_stage(PipelineStage::FetchObjects))?;
        stages.push(PipelineStage::FetchObjects);

        let mut sample_ids = linked.object_ids.clone();
        let mut mapping = linked.mapping.clone();

        if !request.criteria.is_empty() {
            sink.event(ProgressEvent {
                message: format!("phase=Filter; element presence over {} samples", sample_ids.len()),
                elapsed: Some(started.elapsed()),
            });
            let presence = filter_by_presence(&self.executor, &sample_ids, &request.criteria)
                .map_err(HarvestError::at_stage(PipelineStage::PresenceFilter))?;
            stages.push(PipelineStage::PresenceFilter);
            mapping = mapping.restrict(&presence.sample_id_set());
            sample_ids = presence.sample_ids;
        }

        if request.criteria.has_ranges() {
            sink.event(ProgressEvent {
                message: format!("phase=Filter; composition ranges over {} samples", sample_ids.len()),
                elapsed: Some(started.elapsed()),
            });
            let outcome = filter_by_composition(
                &self.executor,
                &sample_ids,
                &mapping,
                &request.criteria,
                request.composition_match,
            )
            .map_err(HarvestError::at_stage(PipelineStage::CompositionFilter))?;
            stages.push(PipelineStage::CompositionFilter);
            mapping = outcome.mapping;
        }

        let result = self
            .finalize(&linked, mapping, stages, store, sink)
            .map_err(HarvestError::at_stage(PipelineStage::Finalize))?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} samples, {} downloaded, {} failed",
                result.object_ids.len(),
                result.downloads.downloaded.len(),
                result.downloads.failed.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(result)
    }

    fn finalize(
        &self,
        linked: &LinkedObjects,
        mapping: LinkMapping,
        mut stages: Vec<PipelineStage>,
        store: &RunStore,
        sink: &dyn ProgressSink,
    ) -> Result<FilteredResult, HarvestError> {
        let kept = linked.restrict(&mapping.keys());
        store.ensure_dirs()?;

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {} rows", kept.rows.len()),
            elapsed: None,
        });
        let summary = group_rows(&kept.rows);
        let table_path = store.write_table(&kept.rows)?;
        let summary_path = store.write_summary(&summary)?;
        info!(path = %table_path, rows = kept.rows.len(), "results table written");

        let downloads = self.materialize(&kept.rows, store, sink);
        stages.push(PipelineStage::Finalize);

        Ok(FilteredResult {
            stages,
            rows: kept.rows,
            mapping,
            object_ids: kept.object_ids,
            summary,
            table_path: table_path.to_string(),
            summary_path: summary_path.to_string(),
            downloads,
        })
    }

    /// Downloads each distinct linked object once. Failures are recorded and
    /// never abort the run.
    fn materialize(
        &self,
        rows: &[JoinedRow],
        store: &RunStore,
        sink: &dyn ProgressSink,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        let mut seen = BTreeSet::new();
        let mut used_names = BTreeSet::new();

        for row in rows {
            let id = row.linked_objectid;
            if !seen.insert(id) {
                continue;
            }
            let file_path = row.linked_objectfilepath.as_deref().unwrap_or("").trim();
            if is_placeholder_path(file_path) {
                debug!(linked = %id, "no file path, skipping download");
                report.skipped.push(id);
                continue;
            }

            sink.event(ProgressEvent {
                message: format!("phase=Download; object {id}"),
                elapsed: None,
            });
            match self.download_one(id, file_path, store, &mut used_names) {
                Ok(path) => {
                    debug!(linked = %id, path = %path, "artifact downloaded");
                    report.downloaded.push(DownloadedArtifact {
                        linked_objectid: id,
                        path: path.to_string(),
                    });
                }
                Err(err) => {
                    warn!(linked = %id, file = file_path, error = %err, "download failed, skipping");
                    report.failed.push(DownloadFailure {
                        linked_objectid: id,
                        file_path: file_path.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        info!(
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "downloads finished"
        );
        report
    }

    fn download_one(
        &self,
        id: ObjectId,
        file_path: &str,
        store: &RunStore,
        used_names: &mut BTreeSet<String>,
    ) -> Result<Utf8PathBuf, HarvestError> {
        let fetched = self.fetcher.fetch(id)?;
        let name = artifact_file_name(file_path, fetched.suggested_filename.as_deref(), id);
        let name = unique_name(&name, id, used_names);
        store.write_artifact(&name, &fetched.bytes)
    }
}

/// `name` if unused in this run, else `<id>_<name>`, then `<id>_<n>_<name>`.
fn unique_name(name: &str, id: ObjectId, used_names: &mut BTreeSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut attempt = 0u32;
    while !used_names.insert(candidate.clone()) {
        attempt += 1;
        candidate = if attempt == 1 {
            format!("{id}_{name}")
        } else {
            format!("{id}_{attempt}_{name}")
        };
    }
    candidate
}

/// Runs the whole pipeline into `destination` with the default file layout.
/// `destination` must not be shared with a concurrent run.
pub fn run_pipeline<E: RemoteExecutor, F: FileFetcher>(
    executor: E,
    fetcher: F,
    request: &PipelineRequest,
    destination: &Utf8Path,
) -> Result<FilteredResult, HarvestError> {
    let store = RunStore::new(destination.to_path_buf(), OutputLayout::default());
    Pipeline::new(executor, fetcher).run(request, &store, &SilentProgress)
}

/// Empty paths and the textual null markers the service exports for
/// missing files.
pub fn is_placeholder_path(path: &str) -> bool {
    let path = path.trim();
    path.is_empty()
        || ["nan", "none", "null"]
            .iter()
            .any(|marker| path.eq_ignore_ascii_case(marker))
}

/// Basename of the remote path (either separator), else the name the service
/// suggested, else `<id>.bin`.
pub fn artifact_file_name(file_path: &str, suggested: Option<&str>, id: ObjectId) -> String {
    let usable = |name: &str| !name.is_empty() && name != "." && name != "..";
    let basename = file_path
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or("");
    if usable(basename) {
        return basename.to_string();
    }
    if let Some(suggested) = suggested {
        let suggested = suggested.rsplit(['/', '\\']).next().map(str::trim).unwrap_or("");
        if usable(suggested) {
            return suggested.to_string();
        }
    }
    format!("{id}.bin")
}

fn join_names(names: &BTreeSet<TypeName>) -> String {
    names
        .iter()
        .map(TypeName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
