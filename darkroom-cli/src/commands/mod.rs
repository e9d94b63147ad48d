//! CLI command implementations

use console::Emoji;

pub mod list;
pub mod process;
pub mod serve;
pub mod status;
pub mod sweep;

pub use list::ListCommand;
pub use process::ProcessCommand;
pub use serve::ServeCommand;
pub use status::StatusCommand;
pub use sweep::SweepCommand;

pub(crate) static SUCCESS: Emoji = Emoji("✓", "√");
pub(crate) static FAILURE: Emoji = Emoji("✗", "x");
pub(crate) static INFO: Emoji = Emoji("ℹ", "i");
