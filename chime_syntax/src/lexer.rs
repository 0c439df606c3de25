//! The Chime lexer: byte stream to token stream with precise positions.
//!
//! Tokens keep their literal source text; numeric literals carry their
//! parsed value. Malformed literals, unterminated strings and unsafe
//! Unicode code points produce structured diagnostics and an `Invalid`
//! token, then the lexer resynchronises at the next plausible boundary.

use std::collections::VecDeque;

use unicode_xid::UnicodeXID;

use chime_errors::Handler;
use chime_pos::{Position, Range};

use crate::token::{keyword_kind, FloatSuffix, IntSuffix, Token, TokenKind, TokenLit};

const ESCAPES: &str = "\\n \\r \\t \\b \\f \\v \\0 \\\\ \\' \\\" \\u{H+} \\$";
const ESCAPES_BYTE: &str = "\\n \\r \\t \\b \\f \\v \\0 \\\\ \\' \\\" \\u{H+}";

/// Code-point ranges rejected as unsafe in source text: bidirectional
/// overrides and isolates, interlinear annotation, tag characters,
/// variation selectors, specials, private-use areas, control pictures,
/// viramas, ideographic description characters and deprecated alternates.
#[rustfmt::skip]
static UNSECURE_UNICODE: &[(u32, u32)] = &[
    (0x0f84, 0x0f84),     // Tibetan virama
    (0x180b, 0x180d),     // Mongolian variation selectors
    (0x202a, 0x202e),     // bidi embedding/override
    (0x2066, 0x2069),     // bidi isolates
    (0x206a, 0x206f),     // deprecated format characters
    (0x2400, 0x243f),     // control pictures
    (0x2ff0, 0x2ffb),     // ideographic description characters
    (0xe000, 0xf8ff),     // private use area
    (0xfe00, 0xfe0f),     // variation selectors
    (0xfff0, 0xfffb),     // specials + interlinear annotation
    (0x11046, 0x11046),   // Brahmi virama
    (0x1d173, 0x1d17a),   // musical formatting
    (0xe0000, 0xe007f),   // tag characters
    (0xe0100, 0xe01ef),   // variation selectors supplement
    (0xf0000, 0xffffd),   // supplementary private use A
    (0x100000, 0x10fffd), // supplementary private use B
];

fn is_unsecure_unicode(c: char) -> bool {
    let ucs = c as u32;
    UNSECURE_UNICODE
        .binary_search_by(|&(lo, hi)| {
            if hi < ucs {
                std::cmp::Ordering::Less
            } else if lo > ucs {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .is_ok()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StrFlavor {
    Plain,
    MultiLine,
    Raw,
    Byte,
}

pub struct Lexer<'a> {
    src: &'a str,
    file_id: u32,
    offset: usize,
    line: u32,
    column: u32,
    handler: &'a Handler,
    lookahead: VecDeque<Token>,
    /// Comment tokens seen so far, for attachment after parsing.
    pub comments: Vec<Token>,
    /// Opening positions of `${` interpolations not yet closed, so an
    /// unterminated interpolation is reported against its `${`.
    interp_stack: Vec<Position>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file_id: u32, handler: &'a Handler) -> Lexer<'a> {
        Lexer {
            src,
            file_id,
            offset: 0,
            line: 1,
            column: 1,
            handler,
            lookahead: VecDeque::new(),
            comments: vec![],
            interp_stack: vec![],
        }
    }

    pub fn pos(&self) -> Position {
        Position::new(self.file_id, self.line, self.column)
    }

    /// The next token, comments skipped (they are collected aside).
    pub fn next(&mut self) -> Token {
        if let Some(token) = self.lookahead.pop_front() {
            return token;
        }
        self.scan_non_comment()
    }

    /// Peek `k` tokens ahead (0-based), newlines included.
    pub fn look_ahead(&mut self, k: usize) -> &Token {
        while self.lookahead.len() <= k {
            let token = self.scan_non_comment();
            self.lookahead.push_back(token);
        }
        &self.lookahead[k]
    }

    /// Peek `k` non-newline tokens ahead.
    pub fn look_ahead_skip_newlines(&mut self, k: usize) -> Token {
        let mut seen = 0;
        let mut i = 0;
        loop {
            let token = self.look_ahead(i).clone();
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

    /// Lex the whole buffer. The vector always ends with `Eof`.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Token>) {
        let mut tokens = vec![];
        loop {
            let token = self.next();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, self.comments)
    }

    fn scan_non_comment(&mut self) -> Token {
        loop {
            let token = self.scan();
            if token.kind == TokenKind::Comment {
                self.comments.push(token);
                continue;
            }
            return token;
        }
    }

    // _____________________________________________________________________
    // cursor primitives

    fn rest(&self) -> &'a str {
        &self.src[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else if c == '\r' {
            // \r\n counts as one terminator; let the \n advance the line
            if self.peek() != Some('\n') {
                self.line += 1;
                self.column = 1;
            }
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn text_from(&self, start: usize) -> &'a str {
        &self.src[start..self.offset]
    }

    // _____________________________________________________________________
    // scanning

    fn scan(&mut self) -> Token {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') => {
                    self.bump();
                }
                _ => break,
            }
        }

        let begin = self.pos();
        let start = self.offset;
        let c = match self.peek() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, "", begin, begin),
        };

        if c == '\n' || c == '\r' {
            self.bump();
            if c == '\r' {
                self.eat('\n');
            }
            return Token::new(TokenKind::Newline, "\n", begin, self.pos());
        }

        if is_unsecure_unicode(c) {
            self.bump();
            let range = Range::new(begin, self.pos());
            self.handler
                .struct_err_with_code(
                    "lex_unsecure_unicode",
                    range,
                    &format!("unsafe Unicode code point U+{:04X} in source", c as u32),
                    "this character can alter how the source is displayed",
                )
                .emit();
            return Token::new(TokenKind::Invalid, self.text_from(start), begin, self.pos());
        }

        if c == '_' {
            self.bump();
            // a `_` head swallows any XID-continue tail and stays a wildcard
            while self.peek().map_or(false, UnicodeXID::is_xid_continue) {
                self.bump();
            }
            let text = self.text_from(start);
            if text.len() > 1 {
                self.handler
                    .struct_warn_with_code(
                        "lex_wildcard_with_continue",
                        Range::new(begin, self.pos()),
                        &format!("`{}` parses as a wildcard, not an identifier", text),
                    )
                    .emit();
            }
            return Token::new(TokenKind::Wildcard, text, begin, self.pos());
        }

        if UnicodeXID::is_xid_start(c) {
            return self.scan_ident_or_keyword(begin, start);
        }

        if c.is_ascii_digit() {
            return self.scan_number(begin, start);
        }

        match c {
            '"' => self.scan_string(begin, start, StrFlavor::Plain),
            '#' if self.rest().starts_with("#\"") => {
                self.bump();
                self.scan_string(begin, start, StrFlavor::Raw)
            }
            '\'' => self.scan_rune(begin, start),
            '/' if self.peek2() == Some('/') => {
                while self.peek().map_or(false, |c| c != '\n' && c != '\r') {
                    self.bump();
                }
                Token::new(TokenKind::Comment, self.text_from(start), begin, self.pos())
            }
            '/' if self.peek2() == Some('*') => {
                self.bump();
                self.bump();
                let mut depth = 1;
                while depth > 0 {
                    match self.bump() {
                        Some('*') if self.peek() == Some('/') => {
                            self.bump();
                            depth -= 1;
                        }
                        Some('/') if self.peek() == Some('*') => {
                            self.bump();
                            depth += 1;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                Token::new(TokenKind::Comment, self.text_from(start), begin, self.pos())
            }
            '$' => {
                self.bump();
                if self.peek().map_or(false, UnicodeXID::is_xid_start) {
                    let ident_start = self.offset;
                    let ident_begin = self.pos();
                    while self.peek().map_or(false, UnicodeXID::is_xid_continue) {
                        self.bump();
                    }
                    let ident = self.text_from(ident_start);
                    if keyword_kind(ident).is_some() {
                        self.handler
                            .struct_err_with_code(
                                "lex_dollar_keyword",
                                Range::new(ident_begin, self.pos()),
                                &format!("keyword `{}` cannot follow `$`", ident),
                                "expected an identifier here",
                            )
                            .emit();
                        return Token::new(
                            TokenKind::Invalid,
                            self.text_from(start),
                            begin,
                            self.pos(),
                        );
                    }
                }
                Token::new(TokenKind::Dollar, "$", begin, self.pos())
            }
            _ => self.scan_operator(begin, start),
        }
    }

    fn scan_ident_or_keyword(&mut self, begin: Position, start: usize) -> Token {
        // byte strings look like an identifier head
        if self.peek() == Some('b') && self.peek2() == Some('"') {
            self.bump();
            return self.scan_string(begin, start, StrFlavor::Byte);
        }
        while self.peek().map_or(false, UnicodeXID::is_xid_continue) {
            self.bump();
        }
        let text = self.text_from(start);
        let mut token = match keyword_kind(text) {
            Some(kind) => Token::new(kind, text, begin, self.pos()),
            None => Token::new(TokenKind::Ident, text, begin, self.pos()),
        };
        if token.kind == TokenKind::BoolLiteral {
            token.lit = Some(TokenLit::Bool(text == "true"));
        }
        token
    }

    // _____________________________________________________________________
    // numbers

    fn scan_number(&mut self, begin: Position, start: usize) -> Token {
        let (base, prefix_len) = if self.rest().starts_with("0b") || self.rest().starts_with("0B") {
            (2, 2)
        } else if self.rest().starts_with("0o") || self.rest().starts_with("0O") {
            (8, 2)
        } else if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            (16, 2)
        } else {
            (10, 0)
        };
        for _ in 0..prefix_len {
            self.bump();
        }

        let digits_start = self.offset;
        let mut broken = false;
        self.scan_digits(base, &mut broken);
        if self.offset == digits_start && base != 10 {
            self.handler
                .struct_err_with_code(
                    "lex_expected_digit",
                    Range::new(begin, self.pos()),
                    &format!("expected a digit after the {} prefix", base_name(base)),
                    base_digit_hint(base),
                )
                .emit();
            broken = true;
        }

        let mut is_float = false;

        // A decimal point is only legal for decimal and hexadecimal bases.
        if self.peek() == Some('.') && self.peek2().map_or(false, |c| c.is_ascii_hexdigit()) {
            if base == 10 || base == 16 {
                is_float = true;
                self.bump();
                self.scan_digits(base, &mut broken);
            } else {
                let point = self.pos();
                self.handler
                    .struct_err_with_code(
                        "lex_unexpected_decimal_point",
                        Range::with_width(point, 1),
                        &format!("a {} literal cannot have a fractional part", base_name(base)),
                        "only decimal or hexadecimal numbers support a fractional part",
                    )
                    .help_substitution(
                        "if you expect a hexadecimal fraction, use the hexadecimal prefix",
                        Range::new(begin, begin.shift(2)),
                        "0x",
                    )
                    .emit();
                self.bump();
                self.scan_digits(base, &mut broken);
                broken = true;
            }
        }

        // An exponent is only legal for decimal (`e`) and hexadecimal
        // float (`p`) literals.
        match self.peek() {
            Some('e') | Some('E') if base == 10 => {
                is_float = true;
                self.bump();
                let _ = self.eat('+') || self.eat('-');
                let exp_start = self.offset;
                self.scan_digits(10, &mut broken);
                if self.offset == exp_start {
                    self.handler
                        .struct_err_with_code(
                            "lex_expected_exponent_part",
                            Range::with_width(self.pos(), 1),
                            "expected digits after the exponent marker",
                            "the exponent part is decimal",
                        )
                        .emit();
                    broken = true;
                }
            }
            Some('p') | Some('P') if base == 16 => {
                is_float = true;
                self.bump();
                let _ = self.eat('+') || self.eat('-');
                self.scan_digits(10, &mut broken);
            }
            Some('e') | Some('E') | Some('p') | Some('P') if base != 10 && base != 16 => {
                let marker = self.pos();
                self.bump();
                self.handler
                    .struct_err_with_code(
                        "lex_unexpected_exponent_part",
                        Range::with_width(marker, 1),
                        &format!("a {} literal cannot have an exponent part", base_name(base)),
                        "only decimal or hexadecimal numbers support an exponent part",
                    )
                    .emit();
                self.scan_digits(10, &mut broken);
                broken = true;
            }
            _ => {}
        }

        let digits_end = self.offset;

        // suffix
        let suffix_begin = self.pos();
        let suffix_start = self.offset;
        while self.peek().map_or(false, UnicodeXID::is_xid_continue) {
            self.bump();
        }
        let suffix = self.text_from(suffix_start);

        let text = self.text_from(start);
        let mut token = Token::new(
            if is_float {
                TokenKind::FloatLiteral
            } else {
                TokenKind::IntLiteral
            },
            text,
            begin,
            self.pos(),
        );

        if broken {
            token.kind = TokenKind::Invalid;
            return token;
        }

        let digits: String = self.src[if prefix_len > 0 { start + prefix_len } else { start }..digits_end]
            .chars()
            .filter(|&c| c != '_')
            .collect();

        if is_float {
            match parse_float_suffix(suffix) {
                Ok(parsed_suffix) => {
                    let value = digits.parse::<f64>().unwrap_or(0.0);
                    token.lit = Some(TokenLit::Float {
                        value,
                        suffix: parsed_suffix,
                    });
                }
                Err(()) => {
                    self.emit_suffix_err(
                        "lex_illegal_float_suffix",
                        suffix,
                        suffix_begin,
                        "f16, f32 and f64 are the float suffixes",
                    );
                    token.kind = TokenKind::Invalid;
                }
            }
        } else {
            match parse_int_suffix(suffix) {
                Ok(parsed_suffix) => {
                    let value = u128::from_str_radix(&digits, base).unwrap_or(0);
                    token.lit = Some(TokenLit::Int {
                        value,
                        base,
                        suffix: parsed_suffix,
                    });
                }
                Err(()) => {
                    self.emit_suffix_err(
                        "lex_illegal_integer_suffix",
                        suffix,
                        suffix_begin,
                        "u8, u16, u32, u64, i8, i16, i32 and i64 are the integer suffixes",
                    );
                    token.kind = TokenKind::Invalid;
                }
            }
        }
        token
    }

    fn emit_suffix_err(&self, code: &str, suffix: &str, begin: Position, note: &str) {
        let range = Range::with_width(begin, suffix.chars().count() as u32);
        self.handler
            .struct_err_with_code(
                code,
                range,
                &format!("illegal literal suffix `{}`", suffix),
                "unknown suffix",
            )
            .note(note)
            .emit();
    }

    fn scan_digits(&mut self, base: u32, broken: &mut bool) {
        loop {
            match self.peek() {
                Some('_') => {
                    self.bump();
                }
                Some(c) if c.is_digit(base) => {
                    self.bump();
                }
                // A digit of a larger base is a structured error, then skipped.
                Some(c) if c.is_ascii_digit() => {
                    let at = self.pos();
                    self.handler
                        .struct_err_with_code(
                            "lex_unexpected_digit",
                            Range::with_width(at, 1),
                            &format!("digit `{}` is out of range for {}", c, base_name(base)),
                            base_digit_hint(base),
                        )
                        .emit();
                    *broken = true;
                    self.bump();
                }
                _ => break,
            }
        }
    }

    // _____________________________________________________________________
    // strings and runes

    fn scan_string(&mut self, begin: Position, start: usize, flavor: StrFlavor) -> Token {
        if flavor == StrFlavor::Byte {
            self.bump(); // the opening quote after `b`
        } else {
            self.bump(); // the opening quote (raw: after `#`)
        }

        let flavor = if flavor == StrFlavor::Plain
            && self.peek() == Some('"')
            && self.peek2() == Some('"')
        {
            self.bump();
            self.bump();
            StrFlavor::MultiLine
        } else {
            flavor
        };

        let mut cooked = String::new();
        let mut has_interpolation = false;
        let interp_depth_at_entry = self.interp_stack.len();

        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    self.report_unterminated(begin, interp_depth_at_entry);
                    return Token::new(
                        TokenKind::Invalid,
                        self.text_from(start),
                        begin,
                        self.pos(),
                    );
                }
            };
            match c {
                '"' => {
                    if flavor == StrFlavor::MultiLine {
                        if self.rest().starts_with("\"\"\"") {
                            self.bump();
                            self.bump();
                            self.bump();
                            break;
                        }
                        cooked.push('"');
                        self.bump();
                    } else if flavor == StrFlavor::Raw {
                        self.bump();
                        if self.eat('#') {
                            break;
                        }
                        cooked.push('"');
                    } else {
                        self.bump();
                        break;
                    }
                }
                '\n' | '\r' if flavor == StrFlavor::Plain || flavor == StrFlavor::Byte => {
                    self.report_unterminated(begin, interp_depth_at_entry);
                    return Token::new(
                        TokenKind::Invalid,
                        self.text_from(start),
                        begin,
                        self.pos(),
                    );
                }
                '\\' if flavor != StrFlavor::Raw => {
                    if let Some(escaped) = self.scan_escape(flavor == StrFlavor::Byte) {
                        cooked.push(escaped);
                    }
                }
                '$' if flavor == StrFlavor::Plain || flavor == StrFlavor::MultiLine => {
                    if self.peek2() == Some('{') {
                        has_interpolation = true;
                        let interp_pos = self.pos();
                        self.interp_stack.push(interp_pos);
                        cooked.push('$');
                        self.bump();
                        cooked.push('{');
                        self.bump();
                        if !self.skip_interpolation(&mut cooked) {
                            self.report_unterminated(begin, interp_depth_at_entry);
                            return Token::new(
                                TokenKind::Invalid,
                                self.text_from(start),
                                begin,
                                self.pos(),
                            );
                        }
                        self.interp_stack.pop();
                        cooked.push('}');
                    } else {
                        cooked.push('$');
                        self.bump();
                    }
                }
                other => {
                    if is_unsecure_unicode(other) {
                        let at = self.pos();
                        self.handler
                            .struct_err_with_code(
                                "lex_unsecure_unicode",
                                Range::with_width(at, 1),
                                &format!(
                                    "unsafe Unicode code point U+{:04X} in string literal",
                                    other as u32
                                ),
                                "this character can alter how the source is displayed",
                            )
                            .emit();
                    }
                    cooked.push(other);
                    self.bump();
                }
            }
        }

        let kind = match flavor {
            StrFlavor::Plain => TokenKind::StringLiteral,
            StrFlavor::MultiLine => TokenKind::MultiLineString,
            StrFlavor::Raw => TokenKind::RawString,
            StrFlavor::Byte => TokenKind::ByteString,
        };
        let mut token = Token::new(kind, self.text_from(start), begin, self.pos());
        token.lit = Some(TokenLit::Str {
            cooked,
            has_interpolation,
        });
        token
    }

    /// Copy an interpolation body verbatim into `cooked`, tracking brace
    /// depth. Returns false on end of input.
    fn skip_interpolation(&mut self, cooked: &mut String) -> bool {
        let mut depth = 1;
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => return false,
            };
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        return true;
                    }
                }
                '\n' | '\r' => return false,
                _ => {}
            }
            cooked.push(c);
            self.bump();
        }
    }

    fn report_unterminated(&mut self, string_begin: Position, interp_depth_at_entry: usize) {
        if self.interp_stack.len() > interp_depth_at_entry {
            let interp_pos = *self.interp_stack.last().unwrap();
            self.interp_stack.truncate(interp_depth_at_entry);
            self.handler
                .struct_err_with_code(
                    "lex_unterminated_interpolation",
                    Range::with_width(interp_pos, 2),
                    "unterminated string interpolation",
                    "the `${` opened here is never closed",
                )
                .emit();
        } else {
            self.handler
                .struct_err_with_code(
                    "lex_unterminated_string",
                    Range::with_width(string_begin, 1),
                    "unterminated string literal",
                    "the string opened here is never closed",
                )
                .emit();
        }
    }

    fn scan_escape(&mut self, in_byte_string: bool) -> Option<char> {
        let escape_begin = self.pos();
        self.bump(); // the backslash
        let c = self.bump()?;
        match c {
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'b' => Some('\u{8}'),
            'f' => Some('\u{c}'),
            'v' => Some('\u{b}'),
            '0' => Some('\0'),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            '$' if !in_byte_string => Some('$'),
            'u' => {
                if self.eat('{') {
                    let mut value: u32 = 0;
                    let mut digits = 0;
                    while let Some(h) = self.peek().and_then(|c| c.to_digit(16)) {
                        value = value.saturating_mul(16).saturating_add(h);
                        digits += 1;
                        self.bump();
                    }
                    let closed = self.eat('}');
                    if digits > 0 && closed {
                        if let Some(decoded) = char::from_u32(value) {
                            return Some(decoded);
                        }
                    }
                }
                self.emit_escape_err(escape_begin, "u", in_byte_string);
                None
            }
            other => {
                self.emit_escape_err(escape_begin, &other.to_string(), in_byte_string);
                None
            }
        }
    }

    fn emit_escape_err(&self, begin: Position, escape: &str, in_byte_string: bool) {
        let all = if in_byte_string { ESCAPES_BYTE } else { ESCAPES };
        self.handler
            .struct_err_with_code(
                "lex_unrecognized_escape",
                Range::with_width(begin, escape.chars().count() as u32 + 1),
                &format!("unrecognized escape sequence `\\{}`", escape),
                "unknown escape",
            )
            .note(&format!("the supported escapes are: {}", all))
            .emit();
    }

    fn scan_rune(&mut self, begin: Position, start: usize) -> Token {
        self.bump(); // opening quote
        let value = match self.peek() {
            Some('\\') => self.scan_escape(false),
            Some(c) => {
                self.bump();
                Some(c)
            }
            None => None,
        };
        if !self.eat('\'') {
            self.handler
                .struct_err_with_code(
                    "lex_unterminated_string",
                    Range::with_width(begin, 1),
                    "unterminated rune literal",
                    "the rune opened here is never closed",
                )
                .emit();
            return Token::new(TokenKind::Invalid, self.text_from(start), begin, self.pos());
        }
        let mut token = Token::new(TokenKind::RuneLiteral, self.text_from(start), begin, self.pos());
        token.lit = value.map(TokenLit::Rune);
        token
    }

    // _____________________________________________________________________
    // operators

    fn scan_operator(&mut self, begin: Position, start: usize) -> Token {
        use TokenKind::*;
        // longest match first
        static TABLE: &[(&str, TokenKind)] = &[
            ("**=", StarStarEq),
            ("<<=", ShlEq),
            (">>=", ShrEq),
            ("&&=", AndAndEq),
            ("||=", OrOrEq),
            ("??=", CoalesceEq),
            ("..=", Range2Eq),
            ("**", StarStar),
            ("->", Arrow),
            ("=>", DoubleArrow),
            ("==", EqEq),
            ("!=", NotEq),
            ("<-", Backarrow),
            ("<:", SubtypeOf),
            ("<=", Le),
            (">=", Ge),
            ("<<", Shl),
            (">>", Shr),
            ("&&", AndAnd),
            ("||", OrOr),
            ("??", Coalesce),
            ("?.", QuestDot),
            ("?[", QuestBracket),
            ("?(", QuestParen),
            ("?{", QuestBrace),
            ("..", Range2),
            ("+=", PlusEq),
            ("-=", MinusEq),
            ("*=", StarEq),
            ("/=", SlashEq),
            ("%=", PercentEq),
            ("&=", AndEq),
            ("|=", OrEq),
            ("^=", CaretEq),
            ("++", PlusPlus),
            ("--", MinusMinus),
            ("(", LParen),
            (")", RParen),
            ("[", LBracket),
            ("]", RBracket),
            ("{", LBrace),
            ("}", RBrace),
            (",", Comma),
            (";", Semi),
            (":", Colon),
            (".", Dot),
            ("@", At),
            ("?", Question),
            ("=", Assign),
            ("+", Plus),
            ("-", Minus),
            ("*", Star),
            ("/", Slash),
            ("%", Percent),
            ("!", Not),
            ("<", Lt),
            (">", Gt),
            ("&", And),
            ("|", Or),
            ("^", Caret),
            ("\\", Backslash),
        ];
        for (text, kind) in TABLE {
            if self.rest().starts_with(text) {
                for _ in 0..text.chars().count() {
                    self.bump();
                }
                return Token::new(*kind, *text, begin, self.pos());
            }
        }
        let c = self.bump().unwrap();
        self.handler
            .struct_err_with_code(
                "lex_unknown_start_of_token",
                Range::with_width(begin, 1),
                &format!("unknown start of token `{}`", c),
                "unexpected character",
            )
            .emit();
        Token::new(TokenKind::Invalid, self.text_from(start), begin, self.pos())
    }
}

fn base_name(base: u32) -> &'static str {
    match base {
        2 => "binary",
        8 => "octal",
        16 => "hexadecimal",
        _ => "decimal",
    }
}

fn base_digit_hint(base: u32) -> &'static str {
    match base {
        2 => "binary digits are 0~1",
        8 => "octal digits are 0~7",
        16 => "hexadecimal digits are 0~9 or a~f",
        _ => "decimal digits are 0~9",
    }
}

fn parse_int_suffix(suffix: &str) -> Result<Option<IntSuffix>, ()> {
    Ok(Some(match suffix {
        "" => return Ok(None),
        "i8" => IntSuffix::I8,
        "i16" => IntSuffix::I16,
        "i32" => IntSuffix::I32,
        "i64" => IntSuffix::I64,
        "u8" => IntSuffix::U8,
        "u16" => IntSuffix::U16,
        "u32" => IntSuffix::U32,
        "u64" => IntSuffix::U64,
        _ => return Err(()),
    }))
}

fn parse_float_suffix(suffix: &str) -> Result<Option<FloatSuffix>, ()> {
    Ok(Some(match suffix {
        "" => return Ok(None),
        "f16" => FloatSuffix::F16,
        "f32" => FloatSuffix::F32,
        "f64" => FloatSuffix::F64,
        _ => return Err(()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_errors::{Diagnostic, Emitter};
    use std::sync::{Arc, Mutex};

    struct Sink(Arc<Mutex<Vec<Diagnostic>>>);

    impl Emitter for Sink {
        fn emit(&mut self, diagnostic: &Diagnostic) {
            self.0.lock().unwrap().push(diagnostic.clone());
        }
    }

    fn lex(src: &str) -> (Vec<Token>, Vec<Diagnostic>) {
        let sink = Arc::new(Mutex::new(vec![]));
        let handler = Handler::with_emitter(false, Box::new(Sink(sink.clone())));
        let (tokens, _comments) = Lexer::new(src, 1, &handler).tokenize();
        let diags = sink.lock().unwrap().clone();
        (tokens, diags)
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_tokens() {
        let (tokens, diags) = lex("let x = 1 + 2");
        assert!(diags.is_empty());
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::KwLet,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::IntLiteral,
                TokenKind::Plus,
                TokenKind::IntLiteral,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[1].value, "x");
        assert_eq!(tokens[1].begin, Position::new(1, 1, 5));
    }

    #[test]
    fn test_integer_bases_and_values() {
        let (tokens, diags) = lex("0b1010 0o17 0xff 42i8");
        assert!(diags.is_empty());
        assert_eq!(
            tokens[0].lit,
            Some(TokenLit::Int {
                value: 10,
                base: 2,
                suffix: None
            })
        );
        assert_eq!(
            tokens[1].lit,
            Some(TokenLit::Int {
                value: 15,
                base: 8,
                suffix: None
            })
        );
        assert_eq!(
            tokens[2].lit,
            Some(TokenLit::Int {
                value: 255,
                base: 16,
                suffix: None
            })
        );
        assert_eq!(
            tokens[3].lit,
            Some(TokenLit::Int {
                value: 42,
                base: 10,
                suffix: Some(IntSuffix::I8)
            })
        );
    }

    #[test]
    fn test_illegal_integer_suffix() {
        // spec scenario S1
        let (tokens, diags) = lex("let x = 1i7");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("lex_illegal_integer_suffix"));
        let range = diags[0].main_range().unwrap();
        assert_eq!(range.begin, Position::new(1, 1, 10));
        assert_eq!(range.end, Position::new(1, 1, 12));
        assert_eq!(tokens[3].kind, TokenKind::Invalid);
    }

    #[test]
    fn test_unexpected_digit() {
        let (_, diags) = lex("0b102");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("lex_unexpected_digit"));
        assert!(diags[0].main_range().is_some());
    }

    #[test]
    fn test_float_forms() {
        let (tokens, diags) = lex("1.5 2e3 0x1.8p1 1.0f32");
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(tokens[0].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[1].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[2].kind, TokenKind::FloatLiteral);
        assert_eq!(
            tokens[3].lit,
            Some(TokenLit::Float {
                value: 1.0,
                suffix: Some(FloatSuffix::F32)
            })
        );
    }

    #[test]
    fn test_octal_with_exponent_rejected() {
        let (_, diags) = lex("0o17e2");
        assert!(diags
            .iter()
            .any(|d| d.code.as_deref() == Some("lex_unexpected_exponent_part")));
    }

    #[test]
    fn test_string_forms() {
        let (tokens, diags) = lex("\"ab\\n\" #\"raw\\n\"# b\"bytes\"");
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        match &tokens[0].lit {
            Some(TokenLit::Str { cooked, .. }) => assert_eq!(cooked, "ab\n"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tokens[1].kind, TokenKind::RawString);
        match &tokens[1].lit {
            Some(TokenLit::Str { cooked, .. }) => assert_eq!(cooked, "raw\\n"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tokens[2].kind, TokenKind::ByteString);
    }

    #[test]
    fn test_interpolation_token() {
        let (tokens, diags) = lex("\"a${x + 1}b\"");
        assert!(diags.is_empty());
        match &tokens[0].lit {
            Some(TokenLit::Str {
                cooked,
                has_interpolation,
            }) => {
                assert!(has_interpolation);
                assert_eq!(cooked, "a${x + 1}b");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_interpolation_reports_opening() {
        let (_, diags) = lex("\"a${x");
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].code.as_deref(),
            Some("lex_unterminated_interpolation")
        );
        // the `${` starts at column 3
        assert_eq!(diags[0].main_range().unwrap().begin, Position::new(1, 1, 3));
    }

    #[test]
    fn test_unrecognized_escape_lists_alternatives() {
        let (_, diags) = lex("\"\\q\"");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("lex_unrecognized_escape"));
        assert!(diags[0].children.iter().any(|n| n.message.contains("\\u{H+}")));
    }

    #[test]
    fn test_byte_string_escape_set_omits_dollar() {
        let (_, diags) = lex("b\"\\$\"");
        assert_eq!(diags.len(), 1);
        assert!(!diags[0].children[0].message.contains("\\$"));
    }

    #[test]
    fn test_unsecure_unicode() {
        let (tokens, diags) = lex("let x \u{202e}");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("lex_unsecure_unicode"));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Invalid));
    }

    #[test]
    fn test_wildcard_with_continue() {
        let (tokens, diags) = lex("_abc");
        assert_eq!(tokens[0].kind, TokenKind::Wildcard);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("lex_wildcard_with_continue"));
    }

    #[test]
    fn test_dollar_keyword() {
        let (_, diags) = lex("$func");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code.as_deref(), Some("lex_dollar_keyword"));
    }

    #[test]
    fn test_optional_chain_operators() {
        let (tokens, diags) = lex("a?.b ?? c?[0]");
        assert!(diags.is_empty());
        assert!(kinds(&tokens).contains(&TokenKind::QuestDot));
        assert!(kinds(&tokens).contains(&TokenKind::Coalesce));
        assert!(kinds(&tokens).contains(&TokenKind::QuestBracket));
    }

    #[test]
    fn test_comments_collected() {
        let sink = Arc::new(Mutex::new(vec![]));
        let handler = Handler::with_emitter(false, Box::new(Sink(sink)));
        let (tokens, comments) =
            Lexer::new("// hello\nlet x = 1 /* block */\n", 1, &handler).tokenize();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].value, "// hello");
        assert_eq!(comments[1].value, "/* block */");
        assert!(!kinds(&tokens).contains(&TokenKind::Comment));
    }

    #[test]
    fn test_lookahead() {
        let sink = Arc::new(Mutex::new(vec![]));
        let handler = Handler::with_emitter(false, Box::new(Sink(sink)));
        let mut lexer = Lexer::new("a\nb", 1, &handler);
        assert_eq!(lexer.look_ahead(1).kind, TokenKind::Newline);
        assert_eq!(lexer.look_ahead_skip_newlines(1).value, "b");
        assert_eq!(lexer.next().value, "a");
    }
}
