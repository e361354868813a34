//! Data models for chipnote-analyzer
//!
//! - Frame / Note: segmentation input and output
//! - Job: background analysis job state
//! - AnalysisResult: the completed job payload

pub mod analysis_result;
pub mod job;
pub mod note;

pub use analysis_result::{
    AnalysisOutput, AnalysisParams, AnalysisResult, RequestMetadata, SegmentationStats,
    ALGORITHM, RESULT_SOURCE, RESULT_VERSION,
};
pub use job::{AnalysisStage, Job, TransitionError};
pub use note::{Frame, Note, Sequence, SILENCE_KEY};
