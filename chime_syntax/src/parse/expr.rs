//! Expression parsing.
//!
//! Pratt-style with an explicit precedence table. The `a<b, c>(d)`
//! prefix is disambiguated with a diagnostic transaction: type arguments
//! are parsed speculatively and accepted only when the token after `>`
//! belongs to the generic-call follow set; otherwise the tokens are
//! re-parsed as comparisons.

use chime_pos::Position;

use crate::ast::*;
use crate::lexer::Lexer;
use crate::parse::{token_desc, PResult, Parser};
use crate::token::{Token, TokenKind, TokenLit};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
    None,
}

fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8, Assoc)> {
    use TokenKind::*;
    Some(match kind {
        StarStar => (BinaryOp::Pow, 110, Assoc::Right),
        Star => (BinaryOp::Mul, 100, Assoc::Left),
        Slash => (BinaryOp::Div, 100, Assoc::Left),
        Percent => (BinaryOp::Rem, 100, Assoc::Left),
        Plus => (BinaryOp::Add, 90, Assoc::Left),
        Minus => (BinaryOp::Sub, 90, Assoc::Left),
        Shl => (BinaryOp::Shl, 80, Assoc::Left),
        Shr => (BinaryOp::Shr, 80, Assoc::Left),
        Lt => (BinaryOp::Lt, 60, Assoc::None),
        Le => (BinaryOp::Le, 60, Assoc::None),
        Gt => (BinaryOp::Gt, 60, Assoc::None),
        Ge => (BinaryOp::Ge, 60, Assoc::None),
        EqEq => (BinaryOp::Eq, 55, Assoc::None),
        NotEq => (BinaryOp::NotEq, 55, Assoc::None),
        And => (BinaryOp::BitAnd, 50, Assoc::Left),
        Caret => (BinaryOp::BitXor, 45, Assoc::Left),
        Or => (BinaryOp::BitOr, 40, Assoc::Left),
        AndAnd => (BinaryOp::And, 35, Assoc::Left),
        OrOr => (BinaryOp::Or, 30, Assoc::Left),
        Coalesce => (BinaryOp::Coalesce, 25, Assoc::Right),
        _ => return None,
    })
}

const RANGE_PREC: u8 = 70;
const IS_AS_PREC: u8 = 65;

fn compound_assign_op(kind: TokenKind) -> Option<BinaryOp> {
    use TokenKind::*;
    Some(match kind {
        PlusEq => BinaryOp::Add,
        MinusEq => BinaryOp::Sub,
        StarEq => BinaryOp::Mul,
        SlashEq => BinaryOp::Div,
        PercentEq => BinaryOp::Rem,
        StarStarEq => BinaryOp::Pow,
        ShlEq => BinaryOp::Shl,
        ShrEq => BinaryOp::Shr,
        AndEq => BinaryOp::BitAnd,
        OrEq => BinaryOp::BitOr,
        CaretEq => BinaryOp::BitXor,
        AndAndEq => BinaryOp::And,
        OrOrEq => BinaryOp::Or,
        CoalesceEq => BinaryOp::Coalesce,
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    pub fn parse_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        let lhs = self.parse_binary(0)?;
        let kind = self.cur().kind;
        if kind.is_assign_op() {
            self.bump();
            self.skip_soft_newlines();
            let value = self.parse_expr()?; // right-associative
            let op = compound_assign_op(kind);
            return Ok(Expr::new(
                self.base_from(begin),
                ExprKind::Assign {
                    op,
                    target: Box::new(lhs),
                    value: Box::new(value),
                },
            ));
        }
        Ok(lhs)
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        let mut lhs = self.parse_unary()?;

        loop {
            let kind = self.cur().kind;

            // ranges are non-associative: one level only
            if (kind == TokenKind::Range2 || kind == TokenKind::Range2Eq)
                && RANGE_PREC >= min_prec
            {
                let inclusive = kind == TokenKind::Range2Eq;
                self.bump();
                self.skip_soft_newlines();
                let end = if self.starts_expr() {
                    Some(Box::new(self.parse_binary(RANGE_PREC + 1)?))
                } else {
                    None
                };
                let step = if self.eat(TokenKind::Colon) {
                    Some(Box::new(self.parse_binary(RANGE_PREC + 1)?))
                } else {
                    None
                };
                lhs = Expr::new(
                    self.base_from(begin),
                    ExprKind::Range {
                        start: Some(Box::new(lhs)),
                        end,
                        step,
                        inclusive,
                    },
                );
                continue;
            }

            if (kind == TokenKind::KwIs || kind == TokenKind::KwAs) && IS_AS_PREC >= min_prec {
                let is_is = kind == TokenKind::KwIs;
                self.bump();
                let ty = Box::new(self.parse_type()?);
                lhs = Expr::new(
                    self.base_from(begin),
                    if is_is {
                        ExprKind::Is {
                            expr: Box::new(lhs),
                            ty,
                        }
                    } else {
                        ExprKind::As {
                            expr: Box::new(lhs),
                            ty,
                        }
                    },
                );
                continue;
            }

            let (op, prec, assoc) = match binary_op(kind) {
                Some(entry) if entry.1 >= min_prec => entry,
                _ => break,
            };
            self.bump();
            self.skip_soft_newlines();
            let next_min = match assoc {
                Assoc::Left | Assoc::None => prec + 1,
                Assoc::Right => prec,
            };
            let rhs = self.parse_binary(next_min)?;
            lhs = Expr::new(
                self.base_from(begin),
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        let op = match self.cur().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Not => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.parse_unary()?;
            return Ok(Expr::new(
                self.base_from(begin),
                ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
            ));
        }
        self.parse_postfix()
    }

    // _____________________________________________________________________
    // postfix: calls, members, subscripts, optional access

    fn parse_postfix(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        let mut expr = self.parse_primary()?;

        loop {
            match self.cur().kind {
                TokenKind::Dot => {
                    self.bump();
                    expr = self.parse_member_after_dot(begin, expr)?;
                }
                TokenKind::LParen => {
                    let args = self.parse_call_args()?;
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    );
                }
                TokenKind::LBracket => {
                    let open = self.cur().begin;
                    self.bump();
                    self.skip_soft_newlines();
                    let mut indices = vec![];
                    while !self.at(TokenKind::RBracket) && !self.at_eof() {
                        indices.push(self.parse_subscript_index()?);
                        self.skip_soft_newlines();
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                        self.skip_soft_newlines();
                    }
                    self.expect_closing(TokenKind::RBracket, open, "]");
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::Subscript {
                            receiver: Box::new(expr),
                            indices,
                        },
                    );
                }
                TokenKind::QuestDot => {
                    self.bump();
                    let access = self.parse_member_after_dot(begin, expr)?;
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::Optional {
                            base_expr: Box::new(access),
                        },
                    );
                }
                TokenKind::QuestBracket => {
                    let open = self.cur().begin;
                    self.bump();
                    let mut indices = vec![];
                    while !self.at(TokenKind::RBracket) && !self.at_eof() {
                        indices.push(self.parse_subscript_index()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect_closing(TokenKind::RBracket, open, "]");
                    let access = Expr::new(
                        self.base_from(begin),
                        ExprKind::Subscript {
                            receiver: Box::new(expr),
                            indices,
                        },
                    );
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::Optional {
                            base_expr: Box::new(access),
                        },
                    );
                }
                TokenKind::QuestParen => {
                    // `?(` re-enters call parsing after the `?`
                    let token = self.bump();
                    let open = Token::new(TokenKind::LParen, "(", token.begin.shift(1), token.end);
                    let args = self.parse_call_args_after_open(open.begin)?;
                    let access = Expr::new(
                        self.base_from(begin),
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    );
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::Optional {
                            base_expr: Box::new(access),
                        },
                    );
                }
                TokenKind::QuestBrace => {
                    self.bump();
                    let lambda = self.parse_lambda_after_open()?;
                    let access = Expr::new(
                        self.base_from(begin),
                        ExprKind::TrailingClosure {
                            expr: Box::new(expr),
                            lambda: Box::new(lambda),
                        },
                    );
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::Optional {
                            base_expr: Box::new(access),
                        },
                    );
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = if self.cur().kind == TokenKind::PlusPlus {
                        IncDecOp::Inc
                    } else {
                        IncDecOp::Dec
                    };
                    self.bump();
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::IncOrDec {
                            op,
                            expr: Box::new(expr),
                        },
                    );
                }
                TokenKind::Lt if self.can_take_type_args(&expr) => {
                    match self.try_parse_generic_call_args()? {
                        Some(type_args) => {
                            set_type_args(&mut expr, type_args);
                        }
                        None => break,
                    }
                }
                TokenKind::LBrace if self.trailing_closure_allowed() => {
                    let lambda = self.parse_lambda()?;
                    expr = Expr::new(
                        self.base_from(begin),
                        ExprKind::TrailingClosure {
                            expr: Box::new(expr),
                            lambda: Box::new(lambda),
                        },
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_member_after_dot(&mut self, begin: Position, receiver: Expr) -> PResult<'a, Expr> {
        let field_token = self.expect(TokenKind::Ident, "a member name")?;
        let field = Ident::new(field_token.value.clone(), field_token.range());
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::MemberAccess {
                receiver: Box::new(receiver),
                field,
                type_args: vec![],
            },
        ))
    }

    /// A subscript index accepts an optional range, so the start
    /// expression is bounded by `..` precedence and range syntax is then
    /// dispatched on.
    fn parse_subscript_index(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        if self.at(TokenKind::Range2) || self.at(TokenKind::Range2Eq) {
            // open-start range `[..2]`
            let inclusive = self.cur().kind == TokenKind::Range2Eq;
            self.bump();
            let end = if self.starts_expr() {
                Some(Box::new(self.parse_binary(RANGE_PREC + 1)?))
            } else {
                None
            };
            return Ok(Expr::new(
                self.base_from(begin),
                ExprKind::Range {
                    start: None,
                    end,
                    step: None,
                    inclusive,
                },
            ));
        }
        self.parse_expr()
    }

    fn can_take_type_args(&self, expr: &Expr) -> bool {
        matches!(
            &expr.kind,
            ExprKind::Ref { type_args, .. } | ExprKind::MemberAccess { type_args, .. }
                if type_args.is_empty()
        )
    }

    /// Speculatively parse `<T, U>` as generic call arguments inside a
    /// diagnostic transaction; the `>` is a type-argument terminator only
    /// when the next token is in the follow set.
    fn try_parse_generic_call_args(&mut self) -> PResult<'a, Option<Vec<TypeAnno>>> {
        let saved = self.save();
        self.sess.handler.begin_transaction();
        self.bump(); // `<`

        let mut type_args = vec![];
        let mut ok = true;
        loop {
            match self.parse_type() {
                Ok(anno) => type_args.push(anno),
                Err(mut err) => {
                    err.cancel();
                    ok = false;
                    break;
                }
            }
            if self.eat(TokenKind::Comma) {
                continue;
            }
            break;
        }
        if ok && !self.eat(TokenKind::Gt) {
            ok = false;
        }
        if ok && !generic_call_follows(self.cur()) {
            ok = false;
        }
        if ok && self.sess.handler.transaction_err_count() > 0 {
            ok = false;
        }

        if ok {
            self.sess.handler.commit_transaction();
            Ok(Some(type_args))
        } else {
            self.sess.handler.rollback_transaction();
            self.restore(saved);
            Ok(None)
        }
    }

    fn parse_call_args(&mut self) -> PResult<'a, Vec<Expr>> {
        let open = self.cur().begin;
        self.bump(); // `(`
        self.parse_call_args_after_open(open)
    }

    fn parse_call_args_after_open(&mut self, open: Position) -> PResult<'a, Vec<Expr>> {
        let mut args = vec![];
        self.skip_soft_newlines();
        while !self.at(TokenKind::RParen) && !self.at_eof() {
            let begin = self.cur().begin;
            // named argument: `name: expr`
            let name = if self.at(TokenKind::Ident) && self.look(1).kind == TokenKind::Colon {
                let token = self.bump();
                self.bump(); // `:`
                Some(Ident::new(token.value.clone(), token.range()))
            } else {
                None
            };
            let value = self.parse_expr()?;
            args.push(Expr::new(
                self.base_from(begin),
                ExprKind::FuncArg {
                    name,
                    expr: Box::new(value),
                },
            ));
            self.skip_soft_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_soft_newlines();
        }
        self.expect_closing(TokenKind::RParen, open, ")");
        Ok(args)
    }

    // _____________________________________________________________________
    // primaries

    fn parse_primary(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        match self.cur().kind {
            TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::RuneLiteral
            | TokenKind::BoolLiteral
            | TokenKind::ByteString => {
                let token = self.bump();
                Ok(Expr::new(self.base_from(begin), self.lit_from_token(&token)))
            }
            TokenKind::StringLiteral | TokenKind::MultiLineString | TokenKind::RawString => {
                let token = self.bump();
                if Parser::token_has_interpolation(&token) {
                    self.build_str_interpolation(begin, &token)
                } else {
                    Ok(Expr::new(self.base_from(begin), self.lit_from_token(&token)))
                }
            }
            TokenKind::Ident => {
                let token = self.bump();
                if token.value == "ifAvailable" && self.at(TokenKind::LParen) {
                    return self.parse_if_available(begin);
                }
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Ref {
                        name: Ident::new(token.value.clone(), token.range()),
                        type_args: vec![],
                    },
                ))
            }
            TokenKind::KwThis | TokenKind::KwSuper => {
                let token = self.bump();
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Ref {
                        name: Ident::new(token.value.clone(), token.range()),
                        type_args: vec![],
                    },
                ))
            }
            TokenKind::Wildcard => {
                self.bump();
                Ok(Expr::new(self.base_from(begin), ExprKind::Wildcard))
            }
            TokenKind::LParen => {
                let open = self.cur().begin;
                self.bump();
                self.skip_soft_newlines();
                if self.eat(TokenKind::RParen) {
                    return Ok(Expr::new(
                        self.base_from(begin),
                        ExprKind::LitConst {
                            kind: LitKind::Unit,
                            text: "()".to_string(),
                        },
                    ));
                }
                let mut items = vec![self.parse_expr()?];
                self.skip_soft_newlines();
                while self.eat(TokenKind::Comma) {
                    self.skip_soft_newlines();
                    if self.at(TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                    self.skip_soft_newlines();
                }
                self.expect_closing(TokenKind::RParen, open, ")");
                if items.len() == 1 {
                    Ok(Expr::new(
                        self.base_from(begin),
                        ExprKind::Paren {
                            expr: Box::new(items.pop().unwrap()),
                        },
                    ))
                } else {
                    Ok(Expr::new(self.base_from(begin), ExprKind::TupleLit { items }))
                }
            }
            TokenKind::LBracket => {
                let open = self.cur().begin;
                self.bump();
                self.skip_soft_newlines();
                let mut items = vec![];
                while !self.at(TokenKind::RBracket) && !self.at_eof() {
                    items.push(self.parse_expr()?);
                    self.skip_soft_newlines();
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    self.skip_soft_newlines();
                }
                self.expect_closing(TokenKind::RBracket, open, "]");
                Ok(Expr::new(self.base_from(begin), ExprKind::ArrayLit { items }))
            }
            TokenKind::LBrace => self.parse_lambda(),
            TokenKind::KwIf => self.parse_if_expr(),
            TokenKind::KwMatch => self.parse_match_expr(),
            TokenKind::KwWhile => self.parse_while_expr(),
            TokenKind::KwDo => self.parse_do_while_expr(),
            TokenKind::KwFor => self.parse_for_in_expr(),
            TokenKind::KwTry => self.parse_try_expr(),
            TokenKind::KwThrow => {
                self.bump();
                let expr = self.parse_expr()?;
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Throw {
                        expr: Box::new(expr),
                    },
                ))
            }
            TokenKind::KwReturn => {
                self.bump();
                let expr = if self.starts_expr() {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                Ok(Expr::new(self.base_from(begin), ExprKind::Return { expr }))
            }
            TokenKind::KwBreak => {
                self.bump();
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Jump {
                        kind: JumpKind::Break,
                    },
                ))
            }
            TokenKind::KwContinue => {
                self.bump();
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Jump {
                        kind: JumpKind::Continue,
                    },
                ))
            }
            TokenKind::KwSpawn => {
                self.bump();
                self.skip_soft_newlines();
                let block = self.parse_block()?;
                let task = Expr::new(self.base_from(begin), ExprKind::Block(block));
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Spawn {
                        task: Box::new(task),
                    },
                ))
            }
            TokenKind::KwSynchronized => {
                self.bump();
                let open = self.expect(TokenKind::LParen, "`(`")?;
                let mutex = self.parse_expr()?;
                self.expect_closing(TokenKind::RParen, open.begin, ")");
                self.skip_soft_newlines();
                let block = self.parse_block()?;
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::Synchronized {
                        mutex: Box::new(mutex),
                        block,
                    },
                ))
            }
            TokenKind::KwQuote => {
                self.bump();
                let open = self.expect(TokenKind::LParen, "`(`")?;
                let mut tokens = vec![];
                let mut depth = 1;
                while depth > 0 && !self.at_eof() {
                    match self.cur().kind {
                        TokenKind::LParen => depth += 1,
                        TokenKind::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                self.bump();
                                break;
                            }
                        }
                        _ => {}
                    }
                    tokens.push(self.bump());
                }
                let _ = open;
                Ok(Expr::new(self.base_from(begin), ExprKind::Quote { tokens }))
            }
            TokenKind::KwLet => {
                // a let-pattern destructor in condition position
                self.bump();
                let pattern = self.parse_pattern()?;
                self.expect(TokenKind::Backarrow, "`<-`")?;
                let initializer = self.parse_expr()?;
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::LetPatternDestructor {
                        patterns: vec![pattern],
                        initializer: Box::new(initializer),
                    },
                ))
            }
            TokenKind::At if self.look(2).kind == TokenKind::Not => {
                self.bump(); // @
                let name_token = self.expect(TokenKind::Ident, "a macro name")?;
                self.bump(); // !
                let invocation = self.parse_macro_invocation_args(&name_token)?;
                Ok(Expr::new(
                    self.base_from(begin),
                    ExprKind::MacroExpand { invocation },
                ))
            }
            TokenKind::KwUnsafe => {
                self.bump();
                self.skip_soft_newlines();
                let block = self.parse_block()?;
                let mut expr = Expr::new(self.base_from(begin), ExprKind::Block(block));
                expr.base.enable_attr(Attributes::UNSAFE);
                Ok(expr)
            }
            _ => {
                let token = self.cur().clone();
                // A stray operator where an operand is expected: report a
                // structured hint and continue with a broken placeholder
                // so the statement parser does not lose its place.
                if binary_op(token.kind).is_some() || token.kind.is_assign_op() {
                    self.sess
                        .handler
                        .struct_err_with_code(
                            "parse_unexpected_operator",
                            token.range(),
                            &format!("unexpected operator `{}`", token.value),
                            "an operand is expected before this operator",
                        )
                        .emit();
                    self.bump();
                    return Ok(Expr::invalid(begin, self.prev_end()));
                }
                Err(self.sess.handler.struct_err_with_code(
                    "parse_expected",
                    token.range(),
                    &format!("expected an expression, found `{}`", token_desc(&token)),
                    "expected an expression here",
                ))
            }
        }
    }

    pub(super) fn starts_expr(&self) -> bool {
        use TokenKind::*;
        matches!(
            self.cur().kind,
            Ident
                | IntLiteral
                | FloatLiteral
                | RuneLiteral
                | BoolLiteral
                | StringLiteral
                | MultiLineString
                | RawString
                | ByteString
                | Wildcard
                | LParen
                | LBracket
                | LBrace
                | Minus
                | Not
                | At
                | KwThis
                | KwSuper
                | KwIf
                | KwMatch
                | KwWhile
                | KwDo
                | KwFor
                | KwTry
                | KwThrow
                | KwReturn
                | KwBreak
                | KwContinue
                | KwSpawn
                | KwSynchronized
                | KwQuote
                | KwLet
                | KwUnsafe
        )
    }

    // _____________________________________________________________________
    // string interpolation

    /// Build a `StrInterpolation` from a cooked literal: the `${...}`
    /// spans are re-lexed and parsed as expressions.
    fn build_str_interpolation(&mut self, begin: Position, token: &Token) -> PResult<'a, Expr> {
        let cooked = match &token.lit {
            Some(TokenLit::Str { cooked, .. }) => cooked.clone(),
            _ => String::new(),
        };
        let mut parts = vec![];
        let mut text = String::new();
        let mut rest = cooked.as_str();
        while let Some(idx) = rest.find("${") {
            text.push_str(&rest[..idx]);
            let after = &rest[idx + 2..];
            let close = find_matching_brace(after);
            let inner = &after[..close];
            if !text.is_empty() {
                parts.push(StrPart::Text(std::mem::take(&mut text)));
            }
            let (tokens, _comments) = Lexer::new(inner, 0, &self.sess.handler).tokenize();
            let mut sub = Parser::new(self.sess, tokens, 0);
            sub.skip_newlines();
            match sub.parse_expr() {
                Ok(expr) => parts.push(StrPart::Interpolation(Box::new(expr))),
                Err(mut err) => {
                    err.emit();
                    parts.push(StrPart::Interpolation(Box::new(Expr::invalid(
                        token.begin,
                        token.end,
                    ))));
                }
            }
            rest = &after[(close + 1).min(after.len())..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            parts.push(StrPart::Text(text));
        }
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::StrInterpolation { parts },
        ))
    }

    // _____________________________________________________________________
    // lambdas and blocks

    pub fn parse_block(&mut self) -> PResult<'a, Block> {
        let begin = self.cur().begin;
        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let mut stmts = vec![];
        self.skip_newlines();
        while !self.at(TokenKind::RBrace) && !self.at_eof() {
            match self.parse_stmt() {
                Ok(Some(stmt)) => stmts.push(stmt),
                Ok(None) => break,
                Err(mut err) => {
                    err.emit();
                    self.recover_to_newline();
                }
            }
            self.skip_newlines();
        }
        self.expect_closing(TokenKind::RBrace, open.begin, "}");
        Ok(Block {
            base: self.base_from(begin),
            stmts,
        })
    }

    pub fn parse_stmt(&mut self) -> PResult<'a, Option<Stmt>> {
        self.skip_newlines();
        if self.at(TokenKind::RBrace) || self.at_eof() {
            return Ok(None);
        }
        if let Some(decl) = self.parse_decl()? {
            return Ok(Some(Stmt::Decl(decl)));
        }
        let expr = self.parse_expr()?;
        Ok(Some(Stmt::Expr(expr)))
    }

    pub fn parse_lambda(&mut self) -> PResult<'a, Expr> {
        self.expect(TokenKind::LBrace, "`{`")?;
        self.parse_lambda_after_open()
    }

    /// Parse a lambda after its `{`: `params => stmts }` or `stmts }`.
    fn parse_lambda_after_open(&mut self) -> PResult<'a, Expr> {
        let begin = self.prev_end();
        self.skip_soft_newlines();

        // Speculate on a parameter list; bail out to a parameterless body
        // when no `=>` follows.
        let saved = self.save();
        let params = self.try_parse_lambda_params();
        let params = match params {
            Some(params) => params,
            None => {
                self.restore(saved);
                vec![]
            }
        };

        let mut stmts = vec![];
        self.skip_newlines();
        while !self.at(TokenKind::RBrace) && !self.at_eof() {
            match self.parse_stmt() {
                Ok(Some(stmt)) => stmts.push(stmt),
                Ok(None) => break,
                Err(mut err) => {
                    err.emit();
                    self.recover_to_newline();
                }
            }
            self.skip_newlines();
        }
        self.expect_closing(TokenKind::RBrace, begin, "}");

        let block = Block {
            base: self.base_from(begin),
            stmts,
        };
        let body = FuncBody {
            base: self.base_from(begin),
            param_list: FuncParamList {
                base: NodeBase::synthesized(),
                params,
            },
            ret_ty: None,
            block: Some(block),
        };
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::Lambda {
                body: Box::new(body),
            },
        ))
    }

    fn try_parse_lambda_params(&mut self) -> Option<Vec<Decl>> {
        let mut params = vec![];
        if self.eat(TokenKind::DoubleArrow) {
            return Some(params);
        }
        loop {
            if !self.at(TokenKind::Ident) && !self.at(TokenKind::Wildcard) {
                return None;
            }
            let token = self.bump();
            let name = Ident::new(token.value.clone(), token.range());
            let ty_anno = if self.eat(TokenKind::Colon) {
                match self.parse_type() {
                    Ok(anno) => Some(Box::new(anno)),
                    Err(mut err) => {
                        err.cancel();
                        return None;
                    }
                }
            } else {
                None
            };
            params.push(Decl::new(
                NodeBase::new(token.begin, token.end),
                name,
                DeclKind::FuncParam(FuncParam {
                    ty_anno,
                    default_value: None,
                    is_named: false,
                    owned_lambda: None,
                }),
            ));
            if self.eat(TokenKind::Comma) {
                continue;
            }
            if self.eat(TokenKind::DoubleArrow) {
                return Some(params);
            }
            return None;
        }
    }

    fn trailing_closure_allowed(&self) -> bool {
        self.trailing_closure_depth() == 0
    }

    // _____________________________________________________________________
    // control flow

    fn parse_condition(&mut self) -> PResult<'a, Expr> {
        self.push_no_trailing_closure();
        let result = self.parse_expr();
        self.pop_no_trailing_closure();
        result
    }

    fn parse_if_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        self.bump(); // if
        let open = self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.parse_condition()?;
        self.expect_closing(TokenKind::RParen, open.begin, ")");
        self.skip_soft_newlines();
        let then_block = self.parse_block()?;
        let else_branch = if self.look_skip_newlines(0).kind == TokenKind::KwElse {
            self.skip_soft_newlines();
            self.bump();
            self.skip_soft_newlines();
            if self.at(TokenKind::KwIf) {
                Some(Box::new(self.parse_if_expr()?))
            } else {
                let else_begin = self.cur().begin;
                let block = self.parse_block()?;
                Some(Box::new(Expr::new(
                    NodeBase::new(else_begin, self.prev_end()),
                    ExprKind::Block(block),
                )))
            }
        } else {
            None
        };
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::If {
                cond: Box::new(cond),
                then_block,
                else_branch,
            },
        ))
    }

    fn parse_match_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        self.bump(); // match
        let selector = if self.at(TokenKind::LParen) {
            let open = self.cur().begin;
            self.bump();
            let selector = self.parse_condition()?;
            self.expect_closing(TokenKind::RParen, open, ")");
            Some(Box::new(selector))
        } else {
            None
        };
        self.skip_soft_newlines();
        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let mut arms = vec![];
        self.skip_newlines();
        while self.at(TokenKind::KwCase) {
            let arm_begin = self.cur().begin;
            self.bump();
            let mut patterns = vec![self.parse_pattern()?];
            while self.eat(TokenKind::Or) {
                patterns.push(self.parse_pattern()?);
            }
            let guard = if self.at(TokenKind::KwWhere) {
                self.bump();
                Some(Box::new(self.parse_condition()?))
            } else {
                None
            };
            self.expect(TokenKind::DoubleArrow, "`=>`")?;
            let mut stmts = vec![];
            self.skip_newlines();
            while !self.at(TokenKind::KwCase) && !self.at(TokenKind::RBrace) && !self.at_eof() {
                match self.parse_stmt() {
                    Ok(Some(stmt)) => stmts.push(stmt),
                    Ok(None) => break,
                    Err(mut err) => {
                        err.emit();
                        self.recover_to_newline();
                    }
                }
                self.skip_newlines();
            }
            arms.push(MatchArm {
                base: self.base_from(arm_begin),
                patterns,
                guard,
                body: Block {
                    base: self.base_from(arm_begin),
                    stmts,
                },
            });
            self.skip_newlines();
        }
        self.expect_closing(TokenKind::RBrace, open.begin, "}");
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::Match { selector, arms },
        ))
    }

    fn parse_while_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        self.bump(); // while
        let open = self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.parse_condition()?;
        self.expect_closing(TokenKind::RParen, open.begin, ")");
        self.skip_soft_newlines();
        let block = self.parse_block()?;
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::While {
                cond: Box::new(cond),
                block,
            },
        ))
    }

    fn parse_do_while_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        self.bump(); // do
        self.skip_soft_newlines();
        let block = self.parse_block()?;
        self.skip_soft_newlines();
        self.expect(TokenKind::KwWhile, "`while`")?;
        let open = self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.parse_condition()?;
        self.expect_closing(TokenKind::RParen, open.begin, ")");
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::DoWhile {
                block,
                cond: Box::new(cond),
            },
        ))
    }

    fn parse_for_in_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        self.bump(); // for
        let open = self.expect(TokenKind::LParen, "`(`")?;
        let pattern = self.parse_pattern()?;
        self.expect(TokenKind::KwIn, "`in`")?;
        let in_expr = self.parse_condition()?;
        let guard = if self.at(TokenKind::KwWhere) {
            self.bump();
            Some(Box::new(self.parse_condition()?))
        } else {
            None
        };
        self.expect_closing(TokenKind::RParen, open.begin, ")");
        self.skip_soft_newlines();
        let block = self.parse_block()?;
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::ForIn {
                pattern: Box::new(pattern),
                in_expr: Box::new(in_expr),
                guard,
                block,
            },
        ))
    }

    fn parse_try_expr(&mut self) -> PResult<'a, Expr> {
        let begin = self.cur().begin;
        self.bump(); // try
        self.skip_soft_newlines();
        let block = self.parse_block()?;
        let mut catches = vec![];
        loop {
            self.skip_soft_newlines();
            if !self.at(TokenKind::KwCatch) {
                break;
            }
            let catch_begin = self.cur().begin;
            self.bump();
            let open = self.expect(TokenKind::LParen, "`(`")?;
            let pattern = self.parse_pattern()?;
            self.expect_closing(TokenKind::RParen, open.begin, ")");
            self.skip_soft_newlines();
            let catch_block = self.parse_block()?;
            catches.push(Catch {
                base: self.base_from(catch_begin),
                pattern: Box::new(pattern),
                block: catch_block,
            });
        }
        let finally = if self.look_skip_newlines(0).kind == TokenKind::KwFinally {
            self.skip_soft_newlines();
            self.bump();
            self.skip_soft_newlines();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::Try {
                block,
                catches,
                finally,
            },
        ))
    }

    fn parse_if_available(&mut self, begin: Position) -> PResult<'a, Expr> {
        let open = self.cur().begin;
        self.bump(); // `(`
        let arg = self.parse_expr()?;
        self.expect(TokenKind::Comma, "`,`")?;
        self.skip_soft_newlines();
        let available = self.parse_expr()?;
        self.expect(TokenKind::Comma, "`,`")?;
        self.skip_soft_newlines();
        let unavailable = self.parse_expr()?;
        self.expect_closing(TokenKind::RParen, open, ")");
        Ok(Expr::new(
            self.base_from(begin),
            ExprKind::IfAvailable {
                arg: Box::new(arg),
                available: Box::new(available),
                unavailable: Box::new(unavailable),
            },
        ))
    }
}

/// Byte index of the `}` closing an interpolation body, minding nesting.
fn find_matching_brace(s: &str) -> usize {
    let mut depth = 1;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    s.len()
}

/// Legal tokens after the closing `>` of generic call arguments.
fn generic_call_follows(token: &Token) -> bool {
    use TokenKind::*;
    matches!(
        token.kind,
        LParen | LBracket | Dot | Comma | LBrace | Range2 | Range2Eq | RParen | RBracket
            | Newline | Semi | Eof | Colon
    )
}

fn set_type_args(expr: &mut Expr, args: Vec<TypeAnno>) {
    match &mut expr.kind {
        ExprKind::Ref { type_args, .. } | ExprKind::MemberAccess { type_args, .. } => {
            *type_args = args;
        }
        _ => {}
    }
}
