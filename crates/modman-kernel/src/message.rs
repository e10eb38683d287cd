//! Message formatting capability.

use crate::result::OpResult;

/// Renders message keys into operator-facing text.
pub trait MessageFormatter: Send + Sync {
    /// Render `key` with the configured prefix, replacing `{i}` with `args[i]`.
    fn format(&self, key: &str, args: &[String]) -> String;

    /// Render `key` without the prefix.
    fn format_plain(&self, key: &str, args: &[String]) -> String;

    fn render(&self, result: &OpResult) -> String {
        self.format(result.message_key(), result.args())
    }
}
