/// Forwarding of the crate's log output to the app's logger.
pub mod logger;

/// The device key-value store used for preferences.
pub mod key_value_store;
