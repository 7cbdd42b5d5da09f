//! Error handling utilities.
//!
//! Typed error enums are declared with [`tsundoku_error`](crate::tsundoku_error), which adds
//! the UniFFI derives and a `Generic` variant for anything coming out of an `anyhow` chain.
//! Internal multi-step operations (the state transfer, for one) build `anyhow` errors with
//! `.context(..)` and are rendered with [`AnyhowErrorExt`] when they are only logged.

pub use anyhow;

/// Renders an `anyhow` error together with its cause chain.
pub trait AnyhowErrorExt {
    /// Renders the error as `outer (caused by: middle -> root)`.
    fn to_generic_message(&self) -> String;

    /// Same as [`AnyhowErrorExt::to_generic_message`], with `prefix: ` in front.
    fn to_generic_message_with_prefix(&self, prefix: &str) -> String;
}

impl AnyhowErrorExt for anyhow::Error {
    fn to_generic_message(&self) -> String {
        let mut message = self.to_string();

        let chain: Vec<String> = self.chain().skip(1).map(ToString::to_string).collect();
        if !chain.is_empty() {
            message.push_str(" (caused by: ");
            message.push_str(&chain.join(" -> "));
            message.push(')');
        }

        message
    }

    fn to_generic_message_with_prefix(&self, prefix: &str) -> String {
        format!("{}: {}", prefix, self.to_generic_message())
    }
}
