//! Extension traits for best-effort backend operations.

/// Extension trait for Result types in best-effort operations.
///
/// Use where a failure should be logged at debug level and otherwise
/// ignored, e.g. optional capability checks or var-object cleanup:
///
/// ```text
/// let sources = self.broker.send_request("loadedSources", None)
///     .await
///     .debug_ok("loadedSources failed")?;
/// ```
pub trait DebugResult<T> {
    /// Convert to Option, logging the error at debug level if Err.
    fn debug_ok(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> DebugResult<T> for Result<T, E> {
    fn debug_ok(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", context, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_ok() {
        let ok: Result<i32, &str> = Ok(42);
        assert_eq!(ok.debug_ok("capability check"), Some(42));
        let err: Result<i32, &str> = Err("refused");
        assert_eq!(err.debug_ok("capability check"), None);
    }
}
