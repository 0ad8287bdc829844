//! Photo description boundary.
//!
//! Hook point for a captioning backend. Nothing here talks to the
//! network; the only implementation is a local placeholder so the CLI
//! flag works end to end.

use anyhow::Result;
use async_trait::async_trait;
use obscura::CapturedPhoto;
use tracing::debug;

#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, photo: &CapturedPhoto) -> Result<String>;
}

/// Stands in until a real captioning backend exists.
pub struct NullDescriber;

#[async_trait]
impl Describer for NullDescriber {
    async fn describe(&self, photo: &CapturedPhoto) -> Result<String> {
        debug!(request_id = %photo.request_id, "describing photo locally");
        Ok(format!(
            "A {}x{} photo taken in {} orientation.",
            photo.width, photo.height, photo.orientation
        ))
    }
}
