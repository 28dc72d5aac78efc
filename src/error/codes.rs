/// Error code registry for sumcheck
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Cluster errors
/// - 3000-3999: Dataset and import errors
/// - 4000-4999: Reduction errors
/// - 5000-5999: Verification errors
/// - 6000-6999: Health errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_INVALID_TOML: u16 = 1004;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;
    pub const CONFIG_HOSTS_FILE: u16 = 1006;

    // Cluster errors (2000-2999)
    pub const CLUSTER_PROVISION_FAILED: u16 = 2001;
    pub const CLUSTER_NODE_FAILURE: u16 = 2002;
    pub const CLUSTER_DEGRADED: u16 = 2003;
    pub const CLUSTER_TORN_DOWN: u16 = 2004;

    // Dataset and import errors (3000-3999)
    pub const DATASET_DUPLICATE_KEY: u16 = 3001;
    pub const DATASET_UNKNOWN: u16 = 3002;
    pub const DATASET_SOURCE_NOT_FOUND: u16 = 3003;
    pub const DATASET_IMPORT_TIMEOUT: u16 = 3004;
    pub const DATASET_PARSE_FAILED: u16 = 3005;
    pub const DATASET_IO_ERROR: u16 = 3006;

    // Reduction errors (4000-4999)
    pub const REDUCE_COLUMN_RANGE: u16 = 4001;
    pub const REDUCE_TIMEOUT: u16 = 4002;
    pub const REDUCE_STALE_SCOPE: u16 = 4003;

    // Verification errors (5000-5999)
    pub const VERIFY_INCONSISTENT: u16 = 5001;
    pub const VERIFY_LENGTH_MISMATCH: u16 = 5002;

    // Health errors (6000-6999)
    pub const HEALTH_ANOMALIES: u16 = 6001;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_INTERNAL_ERROR: u16 = 9004;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid YAML syntax in configuration",
        1003 => "Invalid JSON syntax in configuration",
        1004 => "Invalid TOML syntax in configuration",
        1005 => "Invalid value in configuration",
        1006 => "Hosts file could not be read or resolved",

        // Cluster errors
        2001 => "Cluster could not reach the required size",
        2002 => "A node failed during an operation",
        2003 => "Cluster has failed nodes and must be rebuilt",
        2004 => "Cluster was already torn down",

        // Dataset errors
        3001 => "Dataset key already used in this session",
        3002 => "Dataset key is unknown or unusable",
        3003 => "Import source not found",
        3004 => "Import did not finish before its timeout",
        3005 => "Shard parse failed",
        3006 => "I/O error while reading a dataset",

        // Reduction errors
        4001 => "Column index outside the dataset",
        4002 => "Reduction did not finish before its timeout",
        4003 => "Result namespace was reset after this scope was issued",

        // Verification errors
        5001 => "Scaled result does not match the base result",
        5002 => "Result vectors have different lengths",

        // Health errors
        6001 => "Cluster reported anomalies",

        // Other errors
        9000 => "Generic error",
        9004 => "Internal error",

        _ => "Unknown error code",
    }
}
