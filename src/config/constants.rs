pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:8003/api/v1";

pub const LOG_FILE_PATH: &str = "/tmp/parley.log";

pub const CREDENTIALS_FILE_PATH: &str = "${HOME}/.local/share/parley/credentials.json";

/// Header carrying the test mode flag on every REST and streaming call
pub const TEST_MODE_HEADER: &str = "X-Test-Mode";

/// Fallback poll interval for the calendar device flow
pub const DEVICE_POLL_INTERVAL_SECS: u64 = 5;

/// Poll attempts before the device flow gives up
pub const DEVICE_POLL_MAX_ATTEMPTS: u32 = 60;
