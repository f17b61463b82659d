//! Leveled operator output.

use console::{style, Term};
use std::io::Write;

/// Operator-facing output handler. Log records go to `log`; this is the
/// short human summary line printed alongside them.
pub struct Output {
    term: Term,
    quiet: bool,
}

impl Output {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
            quiet: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Write a plain line
    pub fn note(&self, message: &str) {
        if !self.quiet {
            let _ = writeln!(&self.term, "   {}", message);
        }
    }

    /// Write an info message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            let _ = writeln!(&self.term, "{}", style(message).cyan());
        }
    }

    /// Write a success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            let _ = writeln!(&self.term, "{} {}", style("✔").green().bold(), message);
        }
    }

    /// Write a warning message
    pub fn warning(&self, message: &str) {
        let _ = writeln!(
            &self.term,
            "{} {}",
            style("Warning:").yellow().bold(),
            message
        );
    }

    /// Write a failure message
    pub fn failure(&self, message: &str) {
        let _ = writeln!(&self.term, "{} {}", style("✘").red().bold(), message);
    }

    /// Write a section rule
    pub fn section(&self, title: &str) {
        if !self.quiet {
            let _ = writeln!(&self.term, "\n{}", style(title).bold().underlined());
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
