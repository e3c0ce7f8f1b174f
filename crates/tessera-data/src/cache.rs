//! Process-wide switch for reusing prepared datasets.
//!
//! The loader reuses a prepared dataset whose fingerprint matches the config
//! only while caching is enabled. The preprocess command disables it for the
//! duration of materialization so every run rebuilds from source.

use std::sync::atomic::{AtomicBool, Ordering};

static DATASET_CACHING: AtomicBool = AtomicBool::new(true);

/// Whether prepared datasets may be reused.
pub fn is_dataset_caching_enabled() -> bool {
    DATASET_CACHING.load(Ordering::SeqCst)
}

/// Set the caching switch, returning the previous value.
pub fn set_dataset_caching_enabled(enabled: bool) -> bool {
    DATASET_CACHING.swap(enabled, Ordering::SeqCst)
}

/// Disable dataset caching until the returned guard is dropped.
///
/// ```
/// use tessera_data::{disable_dataset_caching, is_dataset_caching_enabled};
///
/// {
///     let _guard = disable_dataset_caching();
///     assert!(!is_dataset_caching_enabled());
/// }
/// assert!(is_dataset_caching_enabled());
/// ```
#[must_use = "caching is re-enabled as soon as the guard is dropped"]
pub fn disable_dataset_caching() -> DatasetCachingGuard {
    DatasetCachingGuard {
        previous: set_dataset_caching_enabled(false),
    }
}

/// RAII guard that restores the previous caching state on drop.
#[derive(Debug)]
pub struct DatasetCachingGuard {
    previous: bool,
}

impl Drop for DatasetCachingGuard {
    fn drop(&mut self) {
        set_dataset_caching_enabled(self.previous);
    }
}
