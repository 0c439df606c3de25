//! Diagnostic handling for the Chime compiler.
//!
//! Diagnostics are structured records (kind code, ranges, hints, notes,
//! help substitutions); rendering beyond a minimal TTY emitter is left to
//! embedders. The handler supports *transactions*: the parser opens one
//! before a speculative production, and either commits the buffered
//! records or rolls them back when it re-parses another way.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use chime_pos::{MultiRange, Range};

pub mod emitter;
pub mod ice;

mod diagnostic;
mod diagnostic_builder;

pub use crate::diagnostic::{CodeSuggestion, Diagnostic, SubDiagnostic, Substitution};
pub use crate::diagnostic_builder::DiagnosticBuilder;
pub use crate::emitter::{ColorConfig, Emitter, SilentEmitter, TtyEmitter};

#[derive(Copy, PartialEq, Eq, Clone, Hash, Debug, PartialOrd, Serialize, Deserialize)]
pub enum Level {
    Bug,
    Fatal,
    Error,
    Warning,
    Note,
    Help,
    Cancelled,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.to_str().fmt(f)
    }
}

impl Level {
    pub fn to_str(self) -> &'static str {
        match self {
            Level::Bug => "error: internal compiler error",
            Level::Fatal | Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
            Level::Help => "help",
            Level::Cancelled => panic!("Shouldn't call on cancelled error"),
        }
    }

    pub fn is_error(self) -> bool {
        match self {
            Level::Bug | Level::Fatal | Level::Error => true,
            Level::Warning | Level::Note | Level::Help | Level::Cancelled => false,
        }
    }
}

/// Maps positions back to source text. Implemented by the source manager;
/// declared here so the emitter does not depend on the syntax crate.
pub trait SourceMapper {
    fn file_path(&self, file_id: u32) -> Option<String>;
    fn line_text(&self, file_id: u32, line: u32) -> Option<String>;
}

/// A handler deals with errors; certain errors (fatal, bug) may cause
/// immediate exit, others log errors for later reporting.
pub struct Handler {
    err_count: Cell<usize>,
    emitter: RefCell<Box<dyn Emitter>>,
    transactions: RefCell<Vec<Vec<Diagnostic>>>,
    treat_err_as_bug: bool,
}

impl Handler {
    pub fn with_tty_emitter(
        color_config: ColorConfig,
        source_mapper: Option<Rc<dyn SourceMapper>>,
    ) -> Handler {
        let emitter = Box::new(TtyEmitter::new(color_config, source_mapper));
        Handler::with_emitter(false, emitter)
    }

    pub fn with_emitter(treat_err_as_bug: bool, emitter: Box<dyn Emitter>) -> Handler {
        Handler {
            err_count: Cell::new(0),
            emitter: RefCell::new(emitter),
            transactions: RefCell::new(vec![]),
            treat_err_as_bug,
        }
    }

    // _____________________________________________________________________
    // struct_* constructors

    pub fn struct_err<'a>(&'a self, msg: &str) -> DiagnosticBuilder<'a> {
        let mut result = DiagnosticBuilder::new(self, Level::Error, msg);
        if self.treat_err_as_bug {
            result.level = Level::Bug;
        }
        result
    }

    pub fn struct_range_err<'a, R: Into<MultiRange>>(
        &'a self,
        range: R,
        msg: &str,
    ) -> DiagnosticBuilder<'a> {
        let mut result = self.struct_err(msg);
        result.set_range(range);
        result
    }

    /// The workhorse constructor: an error with a stable kind code, a main
    /// range and the main hint attached to it.
    pub fn struct_err_with_code<'a>(
        &'a self,
        code: &str,
        range: Range,
        msg: &str,
        main_hint: &str,
    ) -> DiagnosticBuilder<'a> {
        let mut result =
            DiagnosticBuilder::new_with_code(self, Level::Error, Some(code.to_owned()), msg);
        result.set_range(range);
        if !main_hint.is_empty() {
            result.range_label(range, main_hint);
        }
        result
    }

    pub fn struct_warn_with_code<'a>(
        &'a self,
        code: &str,
        range: Range,
        msg: &str,
    ) -> DiagnosticBuilder<'a> {
        let mut result =
            DiagnosticBuilder::new_with_code(self, Level::Warning, Some(code.to_owned()), msg);
        result.set_range(range);
        result
    }

    pub fn struct_range_warn<'a, R: Into<MultiRange>>(
        &'a self,
        range: R,
        msg: &str,
    ) -> DiagnosticBuilder<'a> {
        let mut result = DiagnosticBuilder::new(self, Level::Warning, msg);
        result.set_range(range);
        result
    }

    pub fn struct_note<'a>(&'a self, msg: &str) -> DiagnosticBuilder<'a> {
        DiagnosticBuilder::new(self, Level::Note, msg)
    }

    pub fn struct_fatal<'a>(&'a self, msg: &str) -> DiagnosticBuilder<'a> {
        DiagnosticBuilder::new(self, Level::Fatal, msg)
    }

    // _____________________________________________________________________
    // transactions

    /// Open a diagnostic transaction. All diagnostics emitted until the
    /// matching commit/rollback are buffered and do not count as errors.
    pub fn begin_transaction(&self) {
        self.transactions.borrow_mut().push(vec![]);
    }

    /// Commit the innermost transaction: buffered diagnostics flow to the
    /// enclosing transaction, or to the emitter when none is open.
    pub fn commit_transaction(&self) {
        let batch = {
            let mut transactions = self.transactions.borrow_mut();
            let batch = transactions
                .pop()
                .expect("commit without an open diagnostic transaction");
            if let Some(parent) = transactions.last_mut() {
                parent.extend(batch);
                return;
            }
            batch
        };
        for diagnostic in &batch {
            self.emit_final(diagnostic);
        }
    }

    /// Discard the innermost transaction and everything buffered in it.
    pub fn rollback_transaction(&self) {
        self.transactions
            .borrow_mut()
            .pop()
            .expect("rollback without an open diagnostic transaction");
    }

    /// The number of error-level diagnostics buffered in the innermost
    /// open transaction. The parser uses this to decide whether a
    /// speculative production succeeded.
    pub fn transaction_err_count(&self) -> usize {
        self.transactions
            .borrow()
            .last()
            .map(|batch| batch.iter().filter(|d| d.level.is_error()).count())
            .unwrap_or(0)
    }

    pub fn in_transaction(&self) -> bool {
        !self.transactions.borrow().is_empty()
    }

    // _____________________________________________________________________
    // emission

    pub fn emit_diagnostic(&self, diagnostic: &Diagnostic) {
        if diagnostic.cancelled() {
            return;
        }
        if self.in_transaction() {
            self.transactions
                .borrow_mut()
                .last_mut()
                .unwrap()
                .push(diagnostic.clone());
            return;
        }
        self.emit_final(diagnostic);
    }

    fn emit_final(&self, diagnostic: &Diagnostic) {
        if diagnostic.level.is_error() {
            self.bump_err_count();
        }
        self.emitter.borrow_mut().emit(diagnostic);
    }

    pub fn cancel(&self, err: &mut DiagnosticBuilder) {
        err.cancel();
    }

    pub fn bump_err_count(&self) {
        self.err_count.set(self.err_count.get() + 1);
    }

    pub fn err_count(&self) -> usize {
        self.err_count.get()
    }

    pub fn has_errors(&self) -> bool {
        self.err_count.get() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CollectingEmitter(Arc<Mutex<Vec<Diagnostic>>>);

    impl Emitter for CollectingEmitter {
        fn emit(&mut self, diagnostic: &Diagnostic) {
            self.0.lock().unwrap().push(diagnostic.clone());
        }
    }

    fn test_handler() -> (Handler, Arc<Mutex<Vec<Diagnostic>>>) {
        let sink = Arc::new(Mutex::new(vec![]));
        let handler = Handler::with_emitter(false, Box::new(CollectingEmitter(sink.clone())));
        (handler, sink)
    }

    #[test]
    fn test_emit_counts_errors() {
        let (handler, sink) = test_handler();
        handler.struct_err("boom").emit();
        handler.struct_note("fyi").emit();
        assert_eq!(handler.err_count(), 1);
        assert_eq!(sink.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_rollback_discards() {
        let (handler, sink) = test_handler();
        handler.begin_transaction();
        handler.struct_err("speculative").emit();
        assert_eq!(handler.transaction_err_count(), 1);
        handler.rollback_transaction();
        assert_eq!(handler.err_count(), 0);
        assert!(sink.lock().unwrap().is_empty());
    }

    #[test]
    fn test_commit_flushes() {
        let (handler, sink) = test_handler();
        handler.begin_transaction();
        handler.struct_err("kept").emit();
        handler.commit_transaction();
        assert_eq!(handler.err_count(), 1);
        assert_eq!(sink.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_nested_transactions() {
        let (handler, sink) = test_handler();
        handler.begin_transaction();
        handler.struct_err("outer").emit();
        handler.begin_transaction();
        handler.struct_err("inner").emit();
        handler.commit_transaction();
        // inner commit flows into the outer batch, nothing emitted yet
        assert!(sink.lock().unwrap().is_empty());
        handler.rollback_transaction();
        assert_eq!(handler.err_count(), 0);
        assert!(sink.lock().unwrap().is_empty());
    }
}
