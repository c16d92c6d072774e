//! Global constants used throughout the spool codebase.
//!
//! File names, directory names and tuning parameters that are shared by
//! multiple modules live here so they stay discoverable and consistent.

/// Name of the lockfile written next to the root manifest.
pub const LOCKFILE_FILENAME: &str = "spool.lock";

/// Name of the integrity witness file, written inside the modules folder.
pub const INTEGRITY_FILENAME: &str = ".spool-integrity.json";

/// Marker file that, when present in the working directory, triggers the
/// clean step at the end of an install. Each line is a glob pattern of
/// files to purge from installed packages.
pub const CLEAN_FILENAME: &str = ".spoolclean";

/// Legacy shrinkwrap file. Its presence only produces a warning.
pub const SHRINKWRAP_FILENAME: &str = "spool-shrinkwrap.json";

/// File name a fetched package's checksum is recorded under, inside its
/// cache directory.
pub const CACHE_CHECKSUM_FILENAME: &str = ".spool-checksum";

/// Directory (under the spool home) holding the on-disk package index.
pub const INDEX_DIRNAME: &str = "index";

/// Directory (under the spool home) holding fetched package payloads.
pub const CACHE_DIRNAME: &str = "cache";

/// Subdirectory of a modules folder where non-hoisted duplicate versions
/// are linked.
pub const VERSIONS_DIRNAME: &str = ".versions";

/// File the update nag persists its last-check timestamp in, inside the
/// spool home directory.
pub const UPDATE_CHECK_FILENAME: &str = "update-check.json";

/// Endpoint the update nag fetches the latest release version from when
/// the `self-update-url` option is not configured.
pub const SELF_UPDATE_URL: &str = "https://releases.spool.dev/latest-version";

/// Seconds between opportunistic self-update checks (24 hours).
pub const UPDATE_CHECK_INTERVAL_SECS: i64 = 60 * 60 * 24;

/// Minimum number of parallel fetch operations regardless of CPU count.
pub const MIN_FETCH_PARALLELISM: usize = 10;

/// Multiplier applied to CPU core count for default fetch parallelism.
pub const FETCH_PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default CPU core count when detection fails.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// The version of the running binary, compared against `engines.spool`
/// ranges and the self-update endpoint.
pub const SPOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
