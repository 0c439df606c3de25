//! Minimal terminal emitter for diagnostic records.

use std::io::{self, Write};
use std::rc::Rc;

use chime_pos::{display_width, Range};

use crate::{Diagnostic, Level, SourceMapper};

pub trait Emitter {
    /// Emit a structured diagnostic.
    fn emit(&mut self, diagnostic: &Diagnostic);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorConfig {
    Auto,
    Always,
    Never,
}

impl ColorConfig {
    fn use_color(self) -> bool {
        match self {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            // On Windows the console mode would be queried once at startup;
            // only the unix TTY probe is wired in here.
            ColorConfig::Auto => stderr_isatty(),
        }
    }
}

fn stderr_isatty() -> bool {
    unsafe { libc::isatty(libc::STDERR_FILENO) != 0 }
}

/// Swallows every record. Installed while the parser speculates outside a
/// transaction and by unit tests that only count emissions.
pub struct SilentEmitter;

impl Emitter for SilentEmitter {
    fn emit(&mut self, _diagnostic: &Diagnostic) {}
}

/// Writes human-readable diagnostics to stderr, coloured when stderr is a
/// terminal.
pub struct TtyEmitter {
    use_color: bool,
    source_mapper: Option<Rc<dyn SourceMapper>>,
}

impl TtyEmitter {
    pub fn new(color_config: ColorConfig, source_mapper: Option<Rc<dyn SourceMapper>>) -> TtyEmitter {
        TtyEmitter {
            use_color: color_config.use_color(),
            source_mapper,
        }
    }

    fn level_color(level: Level) -> term::color::Color {
        match level {
            Level::Bug | Level::Fatal | Level::Error => term::color::BRIGHT_RED,
            Level::Warning => term::color::BRIGHT_YELLOW,
            Level::Note => term::color::BRIGHT_GREEN,
            Level::Help => term::color::BRIGHT_CYAN,
            Level::Cancelled => unreachable!(),
        }
    }

    fn write_header(&self, diagnostic: &Diagnostic) -> io::Result<()> {
        let label = match &diagnostic.code {
            Some(code) => format!("{}[{}]", diagnostic.level, code),
            None => diagnostic.level.to_string(),
        };
        if self.use_color {
            if let Some(mut t) = term::stderr() {
                let _ = t.fg(Self::level_color(diagnostic.level));
                let _ = t.attr(term::Attr::Bold);
                let _ = write!(t, "{}", label);
                let _ = t.reset();
                let _ = writeln!(t, ": {}", diagnostic.message);
                return Ok(());
            }
        }
        writeln!(io::stderr(), "{}: {}", label, diagnostic.message)
    }

    fn write_range(&self, range: Range, label: Option<&str>, caret: char) -> io::Result<()> {
        let mut err = io::stderr();
        let mapper = match &self.source_mapper {
            Some(m) => m,
            None => return Ok(()),
        };
        let path = mapper
            .file_path(range.begin.file_id)
            .unwrap_or_else(|| "<unknown>".to_string());
        writeln!(
            err,
            "  --> {}:{}:{}",
            path, range.begin.line, range.begin.column
        )?;
        if let Some(line) = mapper.line_text(range.begin.file_id, range.begin.line) {
            writeln!(err, "   | {}", line)?;
            let upto = (range.begin.column as usize).saturating_sub(1).min(line.len());
            let pad = display_width(line.get(..upto).unwrap_or(&line));
            let width = if range.end.line == range.begin.line {
                (range.end.column.saturating_sub(range.begin.column) as usize).max(1)
            } else {
                1
            };
            let marks: String = std::iter::repeat(caret).take(width).collect();
            match label {
                Some(label) => writeln!(err, "   | {}{} {}", " ".repeat(pad), marks, label)?,
                None => writeln!(err, "   | {}{}", " ".repeat(pad), marks)?,
            }
        }
        Ok(())
    }
}

impl Emitter for TtyEmitter {
    fn emit(&mut self, diagnostic: &Diagnostic) {
        let _ = self.write_header(diagnostic);
        for range_label in diagnostic.range.range_labels() {
            let caret = if range_label.is_primary { '^' } else { '-' };
            let _ = self.write_range(range_label.range, range_label.label.as_deref(), caret);
        }
        for child in &diagnostic.children {
            let _ = writeln!(io::stderr(), "   = {}: {}", child.level, child.message);
            for range_label in child.range.range_labels() {
                let _ = self.write_range(range_label.range, range_label.label.as_deref(), '-');
            }
        }
        for suggestion in &diagnostic.suggestions {
            let _ = writeln!(io::stderr(), "   = help: {}", suggestion.msg);
            for substitution in &suggestion.substitutions {
                let _ = writeln!(
                    io::stderr(),
                    "     replace {:?} with `{}`",
                    substitution.range,
                    substitution.replacement
                );
            }
        }
    }
}
