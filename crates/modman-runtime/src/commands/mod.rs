//! Operator console: `help`, `list`, `info`, `dump`, `usage`, `lookup`,
//! `enable`, `disable`, `restart`, `load`, `unload` and `reload`.

mod console;
mod sender;

pub use console::{COMMANDS, OperatorCommand, OperatorConsole, VERSIONS_FILE};
pub use sender::{CommandSender, ConsoleSender};
