//! Analysis services

pub mod analysis_pipeline;
pub mod collaborators;
pub mod frequency_quantizer;
pub mod job_registry;
pub mod note_segmenter;
pub mod progress_streamer;
pub mod sequence_post_processor;

pub use analysis_pipeline::{
    resolve_tempo, AnalysisPipeline, AnalysisRequest, JobFinalizer, PipelineError, StagedUpload,
    TERMINATED_MESSAGE,
};
pub use collaborators::{
    AudioLoader, CollaboratorError, Collaborators, LeadSelection, LeadSelector, MonoSignal,
    PitchTrack, PitchTracker, Stem, StemSeparator, StereoSignal, TempoEstimator,
};
pub use job_registry::{CleanupReport, JobDebugInfo, JobRegistry, RegistryError};
pub use note_segmenter::{
    FrameError, NoteSegmenter, SegmentProgress, SegmentationOutcome, SegmenterConfig,
    SegmenterError,
};
pub use progress_streamer::{ProgressEvent, ProgressStreamer};
pub use sequence_post_processor::SequencePostProcessor;
