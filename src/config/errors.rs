//! Error code constants

/// Validation error codes (0100-0199)
pub const ERR_VALIDATION: &str = "E-SIM-0100";
pub const ERR_WORKLOAD_FILE: &str = "E-SIM-0101";
pub const ERR_CONFIG: &str = "E-SIM-0102";

/// Run execution error codes (0200-0299)
pub const ERR_WARMING_UP: &str = "E-SIM-0201";
pub const ERR_RUN_FAILED: &str = "E-SIM-0202";
pub const ERR_HTTP_STATUS: &str = "E-SIM-0203";
pub const ERR_TRANSPORT: &str = "E-SIM-0204";
pub const ERR_DECODE: &str = "E-SIM-0205";
pub const ERR_CANCELLED: &str = "E-SIM-0206";

/// Storage error codes (0300-0399)
pub const ERR_QUOTA_EXCEEDED: &str = "E-SIM-0300";
pub const ERR_STORAGE: &str = "E-SIM-0301";
pub const ERR_INVALID_DOCUMENT: &str = "E-SIM-0302";
