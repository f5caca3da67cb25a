use lexis_core::{display_source, ChatFailure, ChatObserver, ConversationTurn};
use std::io::{self, Write};

/// Prints a streaming answer to a terminal as it grows.
///
/// The observer is handed the full answer on every event, so only the part not
/// yet shown is written. Sources are held back and listed after the answer.
pub struct TerminalPrinter<W: Write> {
    out: W,
    shown: String,
    sources: Vec<String>,
    failed: bool,
}

impl TerminalPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
            sources: Vec::new(),
            failed: false,
        }
    }

    /// Close the current answer and reset for the next one.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.shown.is_empty() || self.failed {
            writeln!(self.out)?;
        }
        if !self.sources.is_empty() {
            writeln!(self.out, "{}", format_sources(&self.sources))?;
        }
        self.out.flush()?;
        self.shown.clear();
        self.sources.clear();
        self.failed = false;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_answer(&mut self, answer: &str) -> io::Result<()> {
        match answer.strip_prefix(self.shown.as_str()) {
            Some(delta) => write!(self.out, "{delta}")?,
            // The server rewrote earlier text; start the answer over.
            None => write!(self.out, "\n{answer}")?,
        }
        self.out.flush()?;
        self.shown.clear();
        self.shown.push_str(answer);
        Ok(())
    }
}

impl<W: Write> ChatObserver for TerminalPrinter<W> {
    fn on_sources(&mut self, sources: &[String]) {
        self.sources = sources.to_vec();
    }

    fn on_content(&mut self, answer: &str) {
        if let Err(err) = self.write_answer(answer) {
            tracing::debug!(%err, "failed to write answer to terminal");
        }
    }

    fn on_error(&mut self, failure: &ChatFailure) {
        self.failed = true;
        let separator = if self.shown.is_empty() { "" } else { "\n\n" };
        if let Err(err) = write!(self.out, "{separator}{}", failure.user_message()) {
            tracing::debug!(%err, "failed to write notice to terminal");
        }
    }
}

pub fn format_sources(sources: &[String]) -> String {
    let names: Vec<String> = sources.iter().map(|s| display_source(s)).collect();
    format!("Sources: {}", names.join(", "))
}

/// A finished turn as plain text, for the non-streaming path and the greeting.
pub fn format_turn(turn: &ConversationTurn) -> String {
    if turn.sources.is_empty() {
        turn.content.clone()
    } else {
        format!("{}\n{}", turn.content, format_sources(&turn.sources))
    }
}
