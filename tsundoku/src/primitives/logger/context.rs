use std::cell::RefCell;

thread_local! {
    static LOG_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// A scope guard that sets a logging context and restores the previous one when dropped.
///
/// # Examples
///
/// ```rust
/// use tsundoku::primitives::logger::LogContext;
///
/// {
///     let _ctx = LogContext::new("MigrationController");
///     tsundoku::info!("prefixed with [Tsundoku][MigrationController]");
/// }
/// ```
pub struct LogContext {
    previous: Option<String>,
}

impl LogContext {
    /// Creates a new logging context scope.
    #[must_use]
    pub fn new(module: &str) -> Self {
        let previous = LOG_CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            let prev = ctx.clone();
            *ctx = Some(format!("[Tsundoku][{module}]"));
            prev
        });

        Self { previous }
    }
}

impl Drop for LogContext {
    fn drop(&mut self) {
        LOG_CONTEXT.with(|ctx| {
            (*ctx.borrow_mut()).clone_from(&self.previous);
        });
    }
}

/// Gets the current logging context, if any.
#[must_use]
pub fn get_context() -> Option<String> {
    LOG_CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Runs a block inside a logging context.
///
/// ```rust
/// use tsundoku::with_log_context;
///
/// with_log_context!("SourceSelection" => {
///     tsundoku::debug!("prefixed");
/// });
/// ```
#[macro_export]
macro_rules! with_log_context {
    ($module:expr => $block:block) => {{
        let _ctx = $crate::primitives::logger::LogContext::new($module);
        $block
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_restored_on_drop() {
        assert_eq!(get_context(), None);
        {
            let _outer = LogContext::new("MigrationController");
            assert_eq!(
                get_context().as_deref(),
                Some("[Tsundoku][MigrationController]")
            );
            {
                let _inner = LogContext::new("EntryTransfer");
                assert_eq!(get_context().as_deref(), Some("[Tsundoku][EntryTransfer]"));
            }
            assert_eq!(
                get_context().as_deref(),
                Some("[Tsundoku][MigrationController]")
            );
        }
        assert_eq!(get_context(), None);
    }

    #[test]
    fn test_with_log_context_macro() {
        let inside = crate::with_log_context!("SourceSelection" => {
            get_context()
        });
        assert_eq!(inside.as_deref(), Some("[Tsundoku][SourceSelection]"));
        assert_eq!(get_context(), None);
    }
}
