/// Memory per worker when `executor_options.memory_mb` is not given
pub const DEFAULT_MEMORY_MB: u64 = 300;
/// Worker count when neither the configuration nor the host reports one
pub const FALLBACK_WORKERS: usize = 4;
/// Accepted range of the mask computation threshold, in percent
pub const MIN_THRESHOLD: f64 = 0.0;
pub const MAX_THRESHOLD: f64 = 100.0;
/// Directory of per-layer metadata documents inside the shared namespace
pub const METADATA_SUBDIR: &str = "cell_misc";
