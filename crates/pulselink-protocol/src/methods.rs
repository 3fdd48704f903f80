//! Method names understood by the companion, and pushed to the device.

/// Push one heart-rate sample to the remote API.
pub const SEND_HEART_RATE: &str = "SEND_HEART_RATE";
/// Push one location sample to the remote API.
pub const SEND_LOCATION: &str = "SEND_LOCATION";
/// Push a combined snapshot (same handling as `MANUAL_SYNC`).
pub const SEND_DATA: &str = "SEND_DATA";
/// User-triggered sync of whatever readings the device currently has.
pub const MANUAL_SYNC: &str = "MANUAL_SYNC";
/// POST a probe body to the configured (or given) endpoint.
pub const TEST_CONNECTION: &str = "TEST_CONNECTION";
/// POST caller-supplied test data to the configured endpoint.
pub const TEST_DATA_SEND: &str = "TEST_DATA_SEND";
/// Report whether the configured endpoint is reachable.
pub const CHECK_NETWORK: &str = "CHECK_NETWORK";
/// Read the companion's stored settings.
pub const GET_SETTINGS: &str = "GET_SETTINGS";
/// Merge and persist a partial settings update.
pub const UPDATE_SETTINGS: &str = "UPDATE_SETTINGS";

/// Companion → device push carrying the full new settings.
pub const SETTINGS_CHANGED: &str = "SETTINGS_CHANGED";

/// Every request method the stock companion registers.
pub const REQUEST_METHODS: &[&str] = &[
    SEND_HEART_RATE,
    SEND_LOCATION,
    SEND_DATA,
    MANUAL_SYNC,
    TEST_CONNECTION,
    TEST_DATA_SEND,
    CHECK_NETWORK,
    GET_SETTINGS,
    UPDATE_SETTINGS,
];
