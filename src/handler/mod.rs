//! Event handlers invoked by the router

mod pipeline;
mod transform;

pub use pipeline::TransformEventHandler;
pub use transform::{ContentTransform, TransformError, Uppercase};

use crate::event::Event;
use crate::runner::UploadReceipt;
use crate::utils::DispatchResult;
use async_trait::async_trait;
use std::fmt;

/// Progress of one pipeline run. `Failed` is reported through the error
/// path together with the last stage reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Extracted,
    Downloaded,
    Transformed,
    MetadataBuilt,
    Uploaded,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "received",
            PipelineStage::Extracted => "extracted",
            PipelineStage::Downloaded => "downloaded",
            PipelineStage::Transformed => "transformed",
            PipelineStage::MetadataBuilt => "metadata_built",
            PipelineStage::Uploaded => "uploaded",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a handler produced. Callers may ignore it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    /// Receipt of the upload, when the handler submitted one
    pub receipt: Option<UploadReceipt>,
}

/// Reacts to an event a route matched.
///
/// Failures are returned unchanged to the dispatcher; handlers never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> DispatchResult<HandlerOutcome>;
}
