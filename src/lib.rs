pub mod job;
pub mod manifest;
pub mod metadata;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod report;
pub mod stages;
pub mod validation;
pub mod workspace;

pub use job::{JobSettings, VideoJob};
pub use metadata::{FrameRate, Portion, ProbeError, VideoMetadata};
pub use pipeline::{PipelineManager, StageKind, VideoState};
pub use process::ExternalToolError;
pub use report::JobSummary;
