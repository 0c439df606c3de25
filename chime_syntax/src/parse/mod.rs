//! The main parser interface.
//!
//! The parser is hand-written, single-pass and predictive, with bounded
//! lookahead and explicit diagnostic transactions for ambiguous prefixes
//! (generic argument lists). Recovery consumes to the next newline or
//! matching delimiter and leaves `IS_BROKEN` nodes behind so the checker
//! can continue.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use chime_errors::emitter::ColorConfig;
use chime_errors::{DiagnosticBuilder, Handler, SourceMapper};
use chime_pos::{Position, Range};

use crate::ast::*;
use crate::lexer::Lexer;
use crate::source::SourceManager;
use crate::token::{Token, TokenKind, TokenLit};

pub mod attach;
mod decl;
mod expr;

pub type PResult<'a, T> = Result<T, DiagnosticBuilder<'a>>;

struct MapperHandle(Rc<RefCell<SourceManager>>);

impl SourceMapper for MapperHandle {
    fn file_path(&self, file_id: u32) -> Option<String> {
        self.0.borrow().source(file_id).map(|s| s.path.clone())
    }

    fn line_text(&self, file_id: u32, line: u32) -> Option<String> {
        self.0
            .borrow()
            .source(file_id)
            .and_then(|s| s.line_text(line).map(|t| t.to_string()))
    }
}

/// Info about a parsing session.
pub struct ParseSess {
    pub handler: Handler,
    source_manager: Rc<RefCell<SourceManager>>,
    /// Keep original macro-invocation argument tokens so a language
    /// server can query positions after a best-effort expansion.
    pub enable_macro_in_lsp: Cell<bool>,
}

impl ParseSess {
    pub fn new() -> ParseSess {
        let source_manager = Rc::new(RefCell::new(SourceManager::new()));
        let handler = Handler::with_tty_emitter(
            ColorConfig::Auto,
            Some(Rc::new(MapperHandle(source_manager.clone()))),
        );
        ParseSess::with_handler(handler, source_manager)
    }

    pub fn with_handler(
        handler: Handler,
        source_manager: Rc<RefCell<SourceManager>>,
    ) -> ParseSess {
        ParseSess {
            handler,
            source_manager,
            enable_macro_in_lsp: Cell::new(false),
        }
    }

    pub fn source_manager(&self) -> Ref<'_, SourceManager> {
        self.source_manager.borrow()
    }

    pub fn source_manager_mut(&self) -> RefMut<'_, SourceManager> {
        self.source_manager.borrow_mut()
    }
}

impl Default for ParseSess {
    fn default() -> ParseSess {
        ParseSess::new()
    }
}

/// Parse a registered buffer into a `File`, attaching comments.
pub fn parse_file(sess: &ParseSess, path: &str, src: &str) -> File {
    let file_id = sess
        .source_manager_mut()
        .add_source(path, src.to_string(), None);
    debug!("parsing {} as file {}", path, file_id);
    let (tokens, comments) = Lexer::new(src, file_id, &sess.handler).tokenize();
    let mut parser = Parser::new(sess, tokens, file_id);
    let mut file = parser.parse_file_contents(path);
    attach::attach_comments(&mut file, &comments);
    let mut map = HashMap::new();
    map.insert(file_id, comments);
    sess.source_manager_mut().attach_comments(&map);
    file
}

/// Parse one expression from a string; used by tests and the macro host.
pub fn parse_expr_from_str<'a>(sess: &'a ParseSess, name: &str, src: &str) -> PResult<'a, Expr> {
    let file_id = sess
        .source_manager_mut()
        .add_source(name, src.to_string(), None);
    let (tokens, _comments) = Lexer::new(src, file_id, &sess.handler).tokenize();
    let mut parser = Parser::new(sess, tokens, file_id);
    parser.skip_newlines();
    parser.parse_expr()
}

pub struct Parser<'a> {
    pub sess: &'a ParseSess,
    tokens: Vec<Token>,
    pos: usize,
    pub file_id: u32,
    prev_end: Position,
    /// Non-zero while parsing a context (condition headers) where a bare
    /// `{` must not be taken as a trailing closure.
    no_trailing_closure: u32,
}

impl<'a> Parser<'a> {
    pub fn new(sess: &'a ParseSess, tokens: Vec<Token>, file_id: u32) -> Parser<'a> {
        Parser {
            sess,
            tokens,
            pos: 0,
            file_id,
            prev_end: Position::new(file_id, 1, 1),
            no_trailing_closure: 0,
        }
    }

    pub(super) fn push_no_trailing_closure(&mut self) {
        self.no_trailing_closure += 1;
    }

    pub(super) fn pop_no_trailing_closure(&mut self) {
        self.no_trailing_closure -= 1;
    }

    pub(super) fn trailing_closure_depth(&self) -> u32 {
        self.no_trailing_closure
    }

    // _____________________________________________________________________
    // token navigation

    pub fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub fn look(&self, k: usize) -> &Token {
        &self.tokens[(self.pos + k).min(self.tokens.len() - 1)]
    }

    /// Peek `k` tokens ahead ignoring newlines.
    pub fn look_skip_newlines(&self, k: usize) -> &Token {
        let mut seen = 0;
        let mut i = self.pos;
        loop {
            let token = &self.tokens[i.min(self.tokens.len() - 1)];
            if token.kind != TokenKind::Newline {
                if seen == k {
                    return token;
                }
                seen += 1;
            }
            if token.kind == TokenKind::Eof {
                return token;
            }
            i += 1;
        }
    }

    pub fn bump(&mut self) -> Token {
        let token = self.cur().clone();
        self.prev_end = token.end;
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub fn at(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    pub fn at_eof(&self) -> bool {
        self.at(TokenKind::Eof)
    }

    pub fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) || self.at(TokenKind::Semi) {
            self.bump();
        }
    }

    /// Skip newlines (not semicolons); used inside bracketed lists.
    pub fn skip_soft_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.bump();
        }
    }

    pub fn eat_skip_newlines(&mut self, kind: TokenKind) -> bool {
        if self.look_skip_newlines(0).kind == kind {
            self.skip_soft_newlines();
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn prev_end(&self) -> Position {
        self.prev_end
    }

    pub fn base_from(&self, begin: Position) -> NodeBase {
        NodeBase::new(begin, self.prev_end)
    }

    pub fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<'a, Token> {
        if self.at(kind) {
            return Ok(self.bump());
        }
        let token = self.cur().clone();
        let mut err = self.sess.handler.struct_err_with_code(
            "parse_expected",
            token.range(),
            &format!("expected {}, found `{}`", what, token_desc(&token)),
            &format!("expected {} here", what),
        );
        err.set_range(token.range());
        Err(err)
    }

    /// Expect a closing delimiter; a mismatch consumes up to the next
    /// newline and reports `parse_expected_right_delimiter`.
    pub fn expect_closing(&mut self, kind: TokenKind, open: Position, what: &str) -> bool {
        if self.eat_skip_newlines(kind) {
            return true;
        }
        let token = self.cur().clone();
        self.sess
            .handler
            .struct_err_with_code(
                "parse_expected_right_delimiter",
                token.range(),
                &format!("expected `{}` , found `{}`", what, token_desc(&token)),
                &format!("expected `{}` here", what),
            )
            .range_label(Range::with_width(open, 1), "to match this delimiter")
            .emit();
        self.recover_to_newline();
        false
    }

    /// Consume tokens up to (not including) the next newline.
    pub fn recover_to_newline(&mut self) {
        while !self.at_eof() && !self.at(TokenKind::Newline) {
            self.bump();
        }
    }

    /// Consume until one of `kinds` at delimiter depth zero, eating the
    /// found token.
    pub fn recover_past(&mut self, kind: TokenKind) {
        let mut depth: i32 = 0;
        while !self.at_eof() {
            let k = self.cur().kind;
            match k {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 && k == kind {
                        self.bump();
                        return;
                    }
                    depth -= 1;
                }
                _ if k == kind && depth == 0 => {
                    self.bump();
                    return;
                }
                _ => {}
            }
            self.bump();
        }
    }

    // _____________________________________________________________________
    // save/restore for speculative parses

    pub fn save(&self) -> usize {
        self.pos
    }

    pub fn restore(&mut self, saved: usize) {
        self.pos = saved;
        self.prev_end = if saved == 0 {
            Position::new(self.file_id, 1, 1)
        } else {
            self.tokens[saved - 1].end
        };
    }

    // _____________________________________________________________________
    // file

    pub fn parse_file_contents(&mut self, path: &str) -> File {
        let begin = self.cur().begin;
        let mut file = File {
            base: NodeBase::new(begin, begin),
            path: path.to_string(),
            file_id: self.file_id,
            package_spec: None,
            imports: vec![],
            decls: vec![],
        };

        self.skip_newlines();
        if self.at(TokenKind::KwPackage) {
            let begin = self.cur().begin;
            self.bump();
            let name = self.parse_dotted_name();
            let decl = Decl::new(self.base_from(begin), name, DeclKind::PackageSpec);
            file.package_spec = Some(decl);
        }

        self.skip_newlines();
        while self.at(TokenKind::KwImport) {
            let begin = self.cur().begin;
            self.bump();
            let mut path = vec![];
            loop {
                match self.expect(TokenKind::Ident, "an import path segment") {
                    Ok(token) => path.push(Ident::new(token.value.clone(), token.range())),
                    Err(mut err) => {
                        err.emit();
                        self.recover_to_newline();
                        break;
                    }
                }
                if !self.eat(TokenKind::Dot) {
                    break;
                }
            }
            let alias = if self.at(TokenKind::KwAs) {
                self.bump();
                match self.expect(TokenKind::Ident, "an import alias") {
                    Ok(token) => Some(Ident::new(token.value.clone(), token.range())),
                    Err(mut err) => {
                        err.emit();
                        None
                    }
                }
            } else {
                None
            };
            let name = path
                .last()
                .cloned()
                .unwrap_or_else(|| Ident::synthesized("<broken import>"));
            file.imports.push(Decl::new(
                self.base_from(begin),
                name,
                DeclKind::ImportSpec(ImportSpec { path, alias }),
            ));
            self.skip_newlines();
        }

        while !self.at_eof() {
            match self.parse_decl() {
                Ok(Some(decl)) => file.decls.push(decl),
                Ok(None) => {}
                Err(mut err) => {
                    err.emit();
                    file.base.enable_attr(Attributes::HAS_BROKEN);
                    self.recover_to_newline();
                }
            }
            self.skip_newlines();
        }

        file.base.end = self.prev_end;
        file
    }

    pub fn parse_dotted_name(&mut self) -> Ident {
        let begin = self.cur().begin;
        let mut text = String::new();
        loop {
            if self.at(TokenKind::Ident) {
                let token = self.bump();
                text.push_str(&token.value);
            } else {
                break;
            }
            if self.eat(TokenKind::Dot) {
                text.push('.');
            } else {
                break;
            }
        }
        Ident::new(text, Range::new(begin, self.prev_end))
    }

    // _____________________________________________________________________
    // literals shared by expression and pattern parsing

    pub fn lit_from_token(&self, token: &Token) -> ExprKind {
        let kind = match token.kind {
            TokenKind::IntLiteral => LitKind::Int,
            TokenKind::FloatLiteral => LitKind::Float,
            TokenKind::RuneLiteral => LitKind::Rune,
            TokenKind::BoolLiteral => LitKind::Bool,
            TokenKind::ByteString => LitKind::Byte,
            _ => LitKind::Str,
        };
        ExprKind::LitConst {
            kind,
            text: token.value.clone(),
        }
    }

    pub fn token_has_interpolation(token: &Token) -> bool {
        matches!(
            token.lit,
            Some(TokenLit::Str {
                has_interpolation: true,
                ..
            })
        )
    }
}

pub fn token_desc(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "<eof>".to_string(),
        TokenKind::Newline => "<newline>".to_string(),
        _ => token.value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DeclKind, ExprKind, PatternKind, Stmt};
    use chime_errors::{Diagnostic, Emitter};
    use std::sync::{Arc, Mutex};

    struct Sink(Arc<Mutex<Vec<Diagnostic>>>);

    impl Emitter for Sink {
        fn emit(&mut self, diagnostic: &Diagnostic) {
            self.0.lock().unwrap().push(diagnostic.clone());
        }
    }

    fn test_sess() -> (ParseSess, Arc<Mutex<Vec<Diagnostic>>>) {
        let sink = Arc::new(Mutex::new(vec![]));
        let source_manager = Rc::new(RefCell::new(SourceManager::new()));
        let handler = Handler::with_emitter(false, Box::new(Sink(sink.clone())));
        (ParseSess::with_handler(handler, source_manager), sink)
    }

    fn expr(src: &str) -> Expr {
        let (sess, sink) = test_sess();
        let parsed = parse_expr_from_str(&sess, "test.cm", src).unwrap_or_else(|mut e| {
            e.emit();
            panic!("parse failed: {:?}", sink.lock().unwrap())
        });
        assert!(
            sink.lock().unwrap().is_empty(),
            "unexpected diagnostics: {:?}",
            sink.lock().unwrap()
        );
        parsed
    }

    fn file(src: &str) -> (File, Vec<Diagnostic>) {
        let (sess, sink) = test_sess();
        let parsed = parse_file(&sess, "test.cm", src);
        let diags = sink.lock().unwrap().clone();
        (parsed, diags)
    }

    #[test]
    fn test_trailing_closure() {
        // `foo { x => x + 1 }` is a trailing closure around a lambda
        let e = expr("foo { x => x + 1 }");
        match &e.kind {
            ExprKind::TrailingClosure { expr, lambda } => {
                assert!(matches!(&expr.kind, ExprKind::Ref { name, .. } if name.name == "foo"));
                match &lambda.kind {
                    ExprKind::Lambda { body } => {
                        assert_eq!(body.param_list.params.len(), 1);
                        assert_eq!(body.param_list.params[0].name.name, "x");
                    }
                    other => panic!("expected a lambda, got {:?}", other),
                }
            }
            other => panic!("expected a trailing closure, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_call_vs_comparison() {
        // with a call follow-set token after `>`, this is a generic call
        let e = expr("a<Int64, Bool>(d)");
        match &e.kind {
            ExprKind::Call { callee, args } => {
                assert_eq!(args.len(), 1);
                match &callee.kind {
                    ExprKind::Ref { type_args, .. } => assert_eq!(type_args.len(), 2),
                    other => panic!("expected a ref callee, got {:?}", other),
                }
            }
            other => panic!("expected a call, got {:?}", other),
        }

        // without it, the same prefix is two comparisons
        let e = expr("a < b && c > d");
        assert!(matches!(
            &e.kind,
            ExprKind::Binary {
                op: crate::ast::BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_subscript_range_dispatch() {
        let e = expr("a[1..2]");
        match &e.kind {
            ExprKind::Subscript { indices, .. } => {
                assert_eq!(indices.len(), 1);
                assert!(matches!(&indices[0].kind, ExprKind::Range { .. }));
            }
            other => panic!("expected a subscript, got {:?}", other),
        }

        let e = expr("a[1]");
        match &e.kind {
            ExprKind::Subscript { indices, .. } => {
                assert!(matches!(&indices[0].kind, ExprKind::LitConst { .. }));
            }
            other => panic!("expected a subscript, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_chain_access() {
        let e = expr("a?.b");
        match &e.kind {
            ExprKind::Optional { base_expr } => {
                assert!(matches!(&base_expr.kind, ExprKind::MemberAccess { .. }));
            }
            other => panic!("expected an optional access, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let e = expr("1 + 2 * 3");
        match &e.kind {
            ExprKind::Binary {
                op: crate::ast::BinaryOp::Add,
                rhs,
                ..
            } => {
                assert!(matches!(
                    &rhs.kind,
                    ExprKind::Binary {
                        op: crate::ast::BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected parse {:?}", other),
        }

        // ** is right-associative
        let e = expr("2 ** 3 ** 4");
        match &e.kind {
            ExprKind::Binary {
                op: crate::ast::BinaryOp::Pow,
                lhs,
                rhs,
            } => {
                assert!(matches!(&lhs.kind, ExprKind::LitConst { .. }));
                assert!(matches!(
                    &rhs.kind,
                    ExprKind::Binary {
                        op: crate::ast::BinaryOp::Pow,
                        ..
                    }
                ));
            }
            other => panic!("unexpected parse {:?}", other),
        }
    }

    #[test]
    fn test_string_interpolation_parses_inner_expr() {
        let e = expr("\"v = ${x + 1}!\"");
        match &e.kind {
            ExprKind::StrInterpolation { parts } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[0], crate::ast::StrPart::Text(t) if t == "v = "));
                assert!(matches!(&parts[1], crate::ast::StrPart::Interpolation(_)));
                assert!(matches!(&parts[2], crate::ast::StrPart::Text(t) if t == "!"));
            }
            other => panic!("expected interpolation, got {:?}", other),
        }
    }

    #[test]
    fn test_file_decls() {
        let src = "package demo.core\n\
                   import std.collection\n\
                   \n\
                   interface I {}\n\
                   class A <: Object { public func m() {} }\n\
                   extend A <: I {}\n\
                   func f(v: I) {}\n\
                   main() { f(A()) }\n";
        let (parsed, diags) = file(src);
        assert!(diags.is_empty(), "{:?}", diags);
        assert!(parsed.package_spec.is_some());
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.decls.len(), 5);
        assert!(matches!(parsed.decls[0].kind, DeclKind::Interface(_)));
        assert!(matches!(parsed.decls[1].kind, DeclKind::Class(_)));
        assert!(matches!(parsed.decls[2].kind, DeclKind::Extend(_)));
        assert!(matches!(parsed.decls[3].kind, DeclKind::Func(_)));
        assert!(matches!(parsed.decls[4].kind, DeclKind::Main(_)));
    }

    #[test]
    fn test_enum_decl() {
        let (parsed, diags) = file("enum Color { Red | Green | Rgb(Int64, Int64, Int64) }\n");
        assert!(diags.is_empty(), "{:?}", diags);
        match &parsed.decls[0].kind {
            DeclKind::Enum(e) => {
                assert_eq!(e.constructors.len(), 3);
                assert_eq!(e.constructors[2].name.name, "Rgb");
            }
            other => panic!("expected an enum, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_func_with_where() {
        let (parsed, diags) = file("func id<T>(x: T): T where T <: Object { return x }\n");
        assert!(diags.is_empty(), "{:?}", diags);
        let decl = &parsed.decls[0];
        let generic = decl.generic.as_ref().unwrap();
        assert_eq!(generic.type_parameters.len(), 1);
        assert_eq!(generic.constraints.len(), 1);
        assert_eq!(generic.constraints[0].type_param.name, "T");
    }

    #[test]
    fn test_match_with_patterns() {
        let e = expr("match (x) { case Some(v) => v case _ => 0 }");
        match &e.kind {
            ExprKind::Match { selector, arms } => {
                assert!(selector.is_some());
                assert_eq!(arms.len(), 2);
                assert!(matches!(&arms[0].patterns[0].kind, PatternKind::Enum { .. }));
                assert!(matches!(&arms[1].patterns[0].kind, PatternKind::Wildcard));
            }
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_if_let_pattern() {
        let e = expr("if (let Some(v) <- o) { v }");
        match &e.kind {
            ExprKind::If { cond, .. } => {
                assert!(matches!(&cond.kind, ExprKind::LetPatternDestructor { .. }));
            }
            other => panic!("expected an if, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_produces_broken_file() {
        let (parsed, diags) = file("func f( {\nlet x = 1\n");
        assert!(!diags.is_empty());
        // the second declaration still parses
        let has_var = parsed.decls.iter().any(|d| matches!(d.kind, DeclKind::Var(_)))
            || parsed.decls.iter().any(|d| match &d.kind {
                DeclKind::Func(f) => f
                    .body
                    .block
                    .as_ref()
                    .map_or(false, |b| b.stmts.iter().any(|s| matches!(s, Stmt::Decl(_)))),
                _ => false,
            });
        assert!(has_var || !parsed.decls.is_empty());
    }

    #[test]
    fn test_right_delimiter_recovery() {
        let (_, diags) = file("func f() { let x = (1 + 2\n}\n");
        assert!(diags
            .iter()
            .any(|d| d.code.as_deref() == Some("parse_expected_right_delimiter")));
    }

    #[test]
    fn test_macro_invocation_keeps_tokens() {
        let (sess, _sink) = test_sess();
        sess.enable_macro_in_lsp.set(true);
        let parsed = parse_file(&sess, "m.cm", "@Derive!(a + b)\nfunc f() {}\n");
        let invocation = parsed
            .decls
            .iter()
            .find_map(|d| match &d.kind {
                DeclKind::MacroExpand(inv) => Some(inv),
                _ => None,
            })
            .expect("macro invocation parsed");
        assert_eq!(invocation.full_name.name, "Derive");
        assert!(invocation.keep_original_args);
        assert_eq!(invocation.arg_tokens.len(), 3);
        assert!(invocation.new_tokens.is_none());
    }

    #[test]
    fn test_comment_attachment() {
        let src = "// leading for f\n\
                   func f() {}\n\
                   func g() {} // trailing for g\n";
        let (parsed, diags) = file(src);
        assert!(diags.is_empty(), "{:?}", diags);
        let f = &parsed.decls[0];
        assert_eq!(f.base.comments.leading.len(), 1);
        assert_eq!(f.base.comments.leading[0].comments[0].text, "// leading for f");
        let g = &parsed.decls[1];
        assert!(g
            .base
            .comments
            .trailing
            .iter()
            .any(|c| c.comments[0].text == "// trailing for g"));
    }

    #[test]
    fn test_compound_assign() {
        let e = expr("a += 1");
        match &e.kind {
            ExprKind::Assign { op, .. } => assert_eq!(*op, Some(crate::ast::BinaryOp::Add)),
            other => panic!("expected an assignment, got {:?}", other),
        }
    }
}
