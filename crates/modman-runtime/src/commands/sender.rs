use std::sync::Arc;

use modman_kernel::MessageFormatter;

/// Whoever issued an operator command. Receives message keys and renders
/// them however suits its output.
pub trait CommandSender {
    /// Send `key` with `args`, with the catalog prefix when `prefixed`.
    fn send_message(&self, prefixed: bool, key: &str, args: &[String]);

    fn has_permission(&self, permission: &str) -> bool;

    /// Consoles hold every permission.
    fn is_console(&self) -> bool {
        false
    }

    fn send(&self, key: &str, args: &[String]) {
        self.send_message(true, key, args);
    }
}

/// Prints rendered messages to stdout.
pub struct ConsoleSender {
    formatter: Arc<dyn MessageFormatter>,
}

impl ConsoleSender {
    pub fn new(formatter: Arc<dyn MessageFormatter>) -> Self {
        Self { formatter }
    }
}

impl CommandSender for ConsoleSender {
    fn send_message(&self, prefixed: bool, key: &str, args: &[String]) {
        let line = if prefixed {
            self.formatter.format(key, args)
        } else {
            self.formatter.format_plain(key, args)
        };
        println!("{line}");
    }

    fn has_permission(&self, _permission: &str) -> bool {
        true
    }

    fn is_console(&self) -> bool {
        true
    }
}
