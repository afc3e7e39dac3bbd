use std::sync::atomic::{AtomicBool, Ordering};

/// Check whether the cancellation flag has been raised.
#[must_use]
pub fn cancel_requested(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::SeqCst)
}

/// Render a human-friendly byte count.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;

    let value = bytes as f64;
    if value < KIB {
        format!("{bytes} B")
    } else if value < MIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{:.1} MB", value / MIB)
    }
}

/// Download progress as a percentage, or `None` when the total is unknown.
#[must_use]
pub fn progress_percent(downloaded: u64, total: u64) -> Option<f32> {
    (total > 0).then(|| (downloaded as f32 / total as f32) * 100.0)
}
