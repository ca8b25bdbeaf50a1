use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::request::ImageRequest;

/// A single produced image, paired with the request that made it.
///
/// Built only after a successful service round trip. The value is treated
/// as immutable: the store persists the bytes while a display layer can
/// hold its own clone of the same artifact.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub bytes: Vec<u8>,
    pub request: Arc<ImageRequest>,
    pub created_at: DateTime<Utc>,
}

impl GeneratedArtifact {
    pub fn new(bytes: Vec<u8>, request: Arc<ImageRequest>) -> Self {
        Self {
            bytes,
            request,
            created_at: Utc::now(),
        }
    }
}
