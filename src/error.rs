/// Logging adaptor for results whose failure is not fatal to the caller.
pub trait ResultOkLogExt<T, E> {
    /// Logs the error at error level, prefixed with `context`, and discards it.
    fn ok_log(self, context: &str) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self, context: &str) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{context}: {err}");
                None
            }
        }
    }
}
