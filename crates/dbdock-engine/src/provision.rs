use std::sync::Arc;

use dbdock_common::{DockError, ImageRef, ProgressSink, Result};
use futures::TryStreamExt;
use tracing::{info, instrument};

use crate::engine::{ContainerEngine, PullProgress};

/// Statuses that carry no information unless accompanied by byte counts.
const NOISE_STATUSES: [&str; 3] = ["Waiting", "Buffering", "Verifying Checksum"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    AlreadyPresent,
    Pulled,
}

pub struct ImageProvisioner {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Makes sure `image` is available locally, pulling it if needed.
    #[instrument(skip(self, image, progress), fields(image = %image))]
    pub async fn ensure_image(&self, image: &ImageRef, progress: &dyn ProgressSink) -> Result<ImageOutcome> {
        let failure = |err: crate::engine::EngineError| DockError::ImageProvisionFailure {
            image: image.to_string(),
            message: err.to_string(),
        };

        if self.engine.image_exists(image).await.map_err(failure)? {
            progress.report(&format!("Image {image} already exists locally"));
            return Ok(ImageOutcome::AlreadyPresent);
        }

        info!("Pulling image");
        progress.report(&format!("Pulling image {image}..."));
        let mut events = self.engine.pull_image(image);
        let mut last: Option<String> = None;
        while let Some(event) = events.try_next().await.map_err(failure)? {
            let Some(message) = describe(&event) else {
                continue;
            };
            if last.as_deref() != Some(message.as_str()) {
                progress.report(&message);
                last = Some(message);
            }
        }

        progress.report(&format!("Image {image} pulled successfully"));
        Ok(ImageOutcome::Pulled)
    }
}

/// Turns one pull event into a progress line, or `None` when it is noise.
pub fn describe(event: &PullProgress) -> Option<String> {
    let status = event.status.as_deref().unwrap_or("").trim();
    let progress = event.progress.as_deref().unwrap_or("").trim();
    let has_counts = event.current.is_some() || event.total.is_some();

    if NOISE_STATUSES.contains(&status) && !has_counts {
        return None;
    }
    if status.is_empty() && progress.is_empty() && !has_counts {
        return None;
    }

    let label = match event.id.as_deref() {
        Some(id) if !id.is_empty() => format!("{id}: {status}"),
        _ => status.to_string(),
    };

    let message = match (event.current, event.total) {
        (Some(current), Some(total)) if total > 0 => {
            let percent = (current.clamp(0, total) * 100) / total;
            format!(
                "{label} {percent}% ({}/{})",
                format_bytes(current),
                format_bytes(total)
            )
        }
        (Some(current), _) if current > 0 => format!("{label} {}", format_bytes(current)),
        _ if !progress.is_empty() => format!("{label} {progress}"),
        _ => label,
    };
    Some(message.trim().to_string())
}

/// Human-readable byte count with up to two decimals: `1.5 KB`, `12 MB`.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}
