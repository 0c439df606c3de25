use crate::Level;
use chime_pos::{MultiRange, Range};

use serde::{Deserialize, Serialize};

/// A structured diagnostic record: kind code, main range with its hint,
/// secondary hints, free-text notes, and help substitutions suitable for
/// automated fix-it emission.
#[must_use]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    /// Stable kind string, e.g. `lex_illegal_integer_suffix`.
    pub code: Option<String>,
    pub range: MultiRange,
    pub children: Vec<SubDiagnostic>,
    pub suggestions: Vec<CodeSuggestion>,
}

/// For example a note attached to an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubDiagnostic {
    pub level: Level,
    pub message: String,
    pub range: MultiRange,
}

/// A help message carrying one or more suggested edits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeSuggestion {
    pub msg: String,
    pub substitutions: Vec<Substitution>,
}

/// One `(range, replacement)` pair of a suggestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub range: Range,
    pub replacement: String,
}

impl Diagnostic {
    pub fn new(level: Level, message: &str) -> Self {
        Diagnostic::new_with_code(level, None, message)
    }

    pub fn new_with_code(level: Level, code: Option<String>, message: &str) -> Self {
        Diagnostic {
            level,
            message: message.to_owned(),
            code,
            range: MultiRange::default(),
            children: vec![],
            suggestions: vec![],
        }
    }

    /// Cancel the diagnostic (a structured diagnostic must either be emitted
    /// or cancelled or it will panic when dropped).
    pub fn cancel(&mut self) {
        self.level = Level::Cancelled;
    }

    pub fn cancelled(&self) -> bool {
        self.level == Level::Cancelled
    }

    pub fn is_fatal(&self) -> bool {
        self.level == Level::Fatal
    }

    /// Add a range/label pair to be included in the resulting snippet.
    /// The first primary range together with its label is the main hint.
    pub fn range_label<T: Into<String>>(&mut self, range: Range, label: T) -> &mut Self {
        self.range.push_range_label(range, label.into());
        self
    }

    pub fn note(&mut self, msg: &str) -> &mut Self {
        self.sub(Level::Note, msg, MultiRange::default());
        self
    }

    pub fn range_note<R: Into<MultiRange>>(&mut self, range: R, msg: &str) -> &mut Self {
        self.sub(Level::Note, msg, range.into());
        self
    }

    pub fn warn(&mut self, msg: &str) -> &mut Self {
        self.sub(Level::Warning, msg, MultiRange::default());
        self
    }

    pub fn help(&mut self, msg: &str) -> &mut Self {
        self.sub(Level::Help, msg, MultiRange::default());
        self
    }

    /// Attach a help message with a suggested edit of the code.
    pub fn help_substitution(&mut self, msg: &str, range: Range, replacement: &str) -> &mut Self {
        self.suggestions.push(CodeSuggestion {
            msg: msg.to_owned(),
            substitutions: vec![Substitution {
                range,
                replacement: replacement.to_owned(),
            }],
        });
        self
    }

    /// Attach a help message with several alternative edits.
    pub fn help_substitutions(
        &mut self,
        msg: &str,
        substitutions: Vec<Substitution>,
    ) -> &mut Self {
        self.suggestions.push(CodeSuggestion {
            msg: msg.to_owned(),
            substitutions,
        });
        self
    }

    pub fn set_range<R: Into<MultiRange>>(&mut self, range: R) -> &mut Self {
        self.range = range.into();
        self
    }

    pub fn code(&mut self, s: String) -> &mut Self {
        self.code = Some(s);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// The primary range, if the diagnostic has one.
    pub fn main_range(&self) -> Option<Range> {
        self.range.primary_range()
    }

    /// The label attached to the primary range, if any.
    pub fn main_hint(&self) -> Option<String> {
        let primary = self.range.primary_range()?;
        self.range
            .range_labels()
            .into_iter()
            .find(|l| l.range == primary && l.label.is_some())
            .and_then(|l| l.label)
    }

    fn sub(&mut self, level: Level, message: &str, range: MultiRange) {
        self.children.push(SubDiagnostic {
            level,
            message: message.to_owned(),
            range,
        });
    }
}

impl SubDiagnostic {
    pub fn message(&self) -> &str {
        &self.message
    }
}
