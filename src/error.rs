use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::pipeline::PipelineStage;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("MatInf request failed: {0}")]
    RemoteHttp(String),

    #[error("MatInf returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("malformed MatInf response: {0}")]
    MalformedResponse(String),

    #[error("download request failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing API key (set MATINF_API_KEY or api_key in matinf.json)")]
    MissingApiKey,

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<HarvestError>,
    },
}

impl HarvestError {
    pub fn at_stage(stage: PipelineStage) -> impl FnOnce(HarvestError) -> HarvestError {
        move |err| HarvestError::Stage {
            stage,
            source: Box::new(err),
        }
    }

    /// The innermost error, looking through stage wrappers.
    pub fn root(&self) -> &HarvestError {
        match self {
            HarvestError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            HarvestError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self.root(),
            HarvestError::RemoteHttp(_)
                | HarvestError::RemoteStatus { .. }
                | HarvestError::MalformedResponse(_)
        )
    }
}
