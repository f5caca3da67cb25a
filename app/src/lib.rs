pub mod context;
pub mod render;

pub use context::{Lexis, PromptRedirect};
pub use render::{format_sources, format_turn, TerminalPrinter};
