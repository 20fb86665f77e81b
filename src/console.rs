use crossterm::style::{style, Stylize};
use std::io::{self, IsTerminal, Write};

use crate::shell::{Reply, ShellError, Status};

/// Line-oriented output for replies, status lines and errors.
///
/// Colors are only emitted when enabled and the output is a terminal.
pub struct Console<W: Write> {
    out: W,
    color: bool,
}

impl Console<io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        let out = io::stdout();
        let color = color && out.is_terminal();
        Self { out, color }
    }
}

impl<W: Write> Console<W> {
    /// Console over an arbitrary writer, never colored.
    pub fn new(out: W) -> Self {
        Self { out, color: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn prompt(&mut self, path: &str) -> io::Result<()> {
        write!(self.out, "{path}> ")?;
        self.out.flush()
    }

    pub fn print_reply(&mut self, reply: &Reply) -> io::Result<()> {
        for line in &reply.lines {
            writeln!(self.out, "{line}")?;
        }
        match &reply.status {
            Some(Status::Info(message)) => writeln!(self.out, "{message}")?,
            Some(Status::Warning(message)) if self.color => {
                writeln!(self.out, "{}", style(message).yellow())?
            }
            Some(Status::Warning(message)) => writeln!(self.out, "warning: {message}")?,
            None => {}
        }
        self.out.flush()
    }

    pub fn print_error(&mut self, err: &ShellError) -> io::Result<()> {
        let message = err.to_string();
        if self.color {
            writeln!(self.out, "{}", style(&message).red())?;
        } else {
            writeln!(self.out, "error: {message}")?;
        }
        self.out.flush()
    }
}
