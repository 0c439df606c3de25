//! Token model shared by the lexer and the parser.

use chime_pos::{Position, Range};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Ident,
    Wildcard,
    IntLiteral,
    FloatLiteral,
    RuneLiteral,
    StringLiteral,
    MultiLineString,
    RawString,
    ByteString,
    BoolLiteral,
    Comment,
    Newline,
    Eof,
    Invalid,

    // keywords
    KwLet,
    KwVar,
    KwConst,
    KwFunc,
    KwMain,
    KwClass,
    KwInterface,
    KwStruct,
    KwEnum,
    KwExtend,
    KwType,
    KwProp,
    KwMacro,
    KwQuote,
    KwInit,
    KwThis,
    KwSuper,
    KwIf,
    KwElse,
    KwMatch,
    KwCase,
    KwWhile,
    KwDo,
    KwFor,
    KwIn,
    KwTry,
    KwCatch,
    KwFinally,
    KwThrow,
    KwReturn,
    KwBreak,
    KwContinue,
    KwSpawn,
    KwSynchronized,
    KwIs,
    KwAs,
    KwImport,
    KwPackage,
    KwWhere,
    KwStatic,
    KwPublic,
    KwPrivate,
    KwProtected,
    KwInternal,
    KwOpen,
    KwAbstract,
    KwOverride,
    KwOperator,
    KwForeign,
    KwUnsafe,
    KwGet,
    KwSet,

    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    Dot,
    Arrow,      // ->
    DoubleArrow, // =>
    Backarrow,   // <-
    SubtypeOf,   // <:
    At,
    Question,
    QuestDot,     // ?.
    QuestBracket, // ?[
    QuestParen,   // ?(
    QuestBrace,   // ?{
    Range2,       // ..
    Range2Eq,     // ..=

    // operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Not,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    And,
    Or,
    Caret,
    Shl,
    Shr,
    Coalesce, // ??
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    StarStarEq,
    AndAndEq,
    OrOrEq,
    AndEq,
    OrEq,
    CaretEq,
    ShlEq,
    ShrEq,
    CoalesceEq,
    PlusPlus,
    MinusMinus,
    Backslash,
    Dollar,
}

impl TokenKind {
    pub fn is_assign_op(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Assign
                | PlusEq
                | MinusEq
                | StarEq
                | SlashEq
                | PercentEq
                | StarStarEq
                | AndAndEq
                | OrOrEq
                | AndEq
                | OrEq
                | CaretEq
                | ShlEq
                | ShrEq
                | CoalesceEq
        )
    }

    pub fn is_string_literal(self) -> bool {
        use TokenKind::*;
        matches!(self, StringLiteral | MultiLineString | RawString | ByteString)
    }

    pub fn is_modifier(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            KwStatic
                | KwPublic
                | KwPrivate
                | KwProtected
                | KwInternal
                | KwOpen
                | KwAbstract
                | KwOverride
                | KwOperator
                | KwForeign
                | KwUnsafe
                | KwConst
        )
    }
}

pub fn keyword_kind(text: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match text {
        "let" => KwLet,
        "var" => KwVar,
        "const" => KwConst,
        "func" => KwFunc,
        "main" => KwMain,
        "class" => KwClass,
        "interface" => KwInterface,
        "struct" => KwStruct,
        "enum" => KwEnum,
        "extend" => KwExtend,
        "type" => KwType,
        "prop" => KwProp,
        "macro" => KwMacro,
        "quote" => KwQuote,
        "init" => KwInit,
        "this" => KwThis,
        "super" => KwSuper,
        "if" => KwIf,
        "else" => KwElse,
        "match" => KwMatch,
        "case" => KwCase,
        "while" => KwWhile,
        "do" => KwDo,
        "for" => KwFor,
        "in" => KwIn,
        "try" => KwTry,
        "catch" => KwCatch,
        "finally" => KwFinally,
        "throw" => KwThrow,
        "return" => KwReturn,
        "break" => KwBreak,
        "continue" => KwContinue,
        "spawn" => KwSpawn,
        "synchronized" => KwSynchronized,
        "is" => KwIs,
        "as" => KwAs,
        "import" => KwImport,
        "package" => KwPackage,
        "where" => KwWhere,
        "static" => KwStatic,
        "public" => KwPublic,
        "private" => KwPrivate,
        "protected" => KwProtected,
        "internal" => KwInternal,
        "open" => KwOpen,
        "abstract" => KwAbstract,
        "override" => KwOverride,
        "operator" => KwOperator,
        "foreign" => KwForeign,
        "unsafe" => KwUnsafe,
        "true" | "false" => BoolLiteral,
        _ => return None,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntSuffix {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatSuffix {
    F16,
    F32,
    F64,
}

/// The parsed payload of a literal token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TokenLit {
    Int {
        value: u128,
        base: u32,
        suffix: Option<IntSuffix>,
    },
    Float {
        value: f64,
        suffix: Option<FloatSuffix>,
    },
    Rune(char),
    Bool(bool),
    /// Cooked string content with escapes resolved; interpolation spans are
    /// re-lexed by the parser.
    Str {
        cooked: String,
        has_interpolation: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// The literal source text of the token.
    pub value: String,
    pub begin: Position,
    pub end: Position,
    /// Set on tokens the parser synthesizes when it merges lookahead.
    pub synthesized: bool,
    pub lit: Option<TokenLit>,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, begin: Position, end: Position) -> Token {
        Token {
            kind,
            value: value.into(),
            begin,
            end,
            synthesized: false,
            lit: None,
        }
    }

    pub fn synthesized(kind: TokenKind, value: impl Into<String>, at: Position) -> Token {
        Token {
            kind,
            value: value.into(),
            begin: at,
            end: at,
            synthesized: true,
            lit: None,
        }
    }

    pub fn range(&self) -> Range {
        Range::new(self.begin, self.end)
    }

    pub fn is_keyword(&self) -> bool {
        keyword_kind(&self.value) == Some(self.kind)
    }
}
