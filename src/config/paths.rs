//! Storage key and file naming

/// Directory and database names
pub const APP_DIR: &str = "simlab";
pub const STORE_DB: &str = "simlab.db";
pub const KV_TABLE: &str = "kv_store";

/// Key prefix shared by every cached fingerprint.
pub const CACHE_PREFIX: &str = "sim_cache_";
pub const CACHE_VERSION: &str = "v1";

/// History document key.
pub const HISTORY_KEY: &str = "simulationHistory";
/// Version stamped into exported history documents.
pub const HISTORY_DOCUMENT_VERSION: u32 = 5;

/// Resume marker key for an in-flight run.
pub const SESSION_MARKER_KEY: &str = "simulationInProgress";
