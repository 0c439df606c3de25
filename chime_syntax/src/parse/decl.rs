//! Declaration, type-annotation and pattern parsing.

use crate::ast::*;
use crate::parse::{token_desc, PResult, Parser};
use crate::token::{Token, TokenKind};

impl<'a> Parser<'a> {
    /// Parse one top-level or member declaration. Returns `Ok(None)` when
    /// the current token cannot start a declaration (the caller recovers).
    pub fn parse_decl(&mut self) -> PResult<'a, Option<Decl>> {
        self.skip_newlines();
        if self.at_eof() || self.at(TokenKind::RBrace) {
            return Ok(None);
        }

        let begin = self.cur().begin;
        let annotations = self.parse_annotations()?;

        // A macro invocation in declaration position.
        if self.at(TokenKind::At) && self.look(2).kind == TokenKind::Not {
            return self.parse_macro_expand_decl().map(Some);
        }

        let modifiers = self.parse_modifiers();

        let mut decl = match self.cur().kind {
            TokenKind::KwLet | TokenKind::KwVar => self.parse_var_decl()?,
            TokenKind::KwConst if self.look(1).kind != TokenKind::KwFunc => {
                self.parse_var_decl()?
            }
            TokenKind::KwFunc | TokenKind::KwConst => self.parse_func_decl(false)?,
            TokenKind::KwMain => self.parse_main_decl()?,
            TokenKind::KwInit => self.parse_func_decl(true)?,
            TokenKind::KwClass => self.parse_classlike(ClassKeyword::Class)?,
            TokenKind::KwInterface => self.parse_classlike(ClassKeyword::Interface)?,
            TokenKind::KwStruct => self.parse_classlike(ClassKeyword::Struct)?,
            TokenKind::KwEnum => self.parse_enum_decl()?,
            TokenKind::KwExtend => self.parse_extend_decl()?,
            TokenKind::KwType => self.parse_type_alias()?,
            TokenKind::KwProp => self.parse_prop_decl(false)?,
            TokenKind::KwMacro => self.parse_macro_decl()?,
            TokenKind::Ident if self.cur().value == "mut" && self.look(1).kind == TokenKind::KwProp => {
                self.bump();
                self.parse_prop_decl(true)?
            }
            _ => {
                if annotations.is_empty() && modifiers.is_empty() {
                    return Ok(None);
                }
                let token = self.cur().clone();
                return Err(self.sess.handler.struct_err_with_code(
                    "parse_expected",
                    token.range(),
                    &format!("expected a declaration, found `{}`", token_desc(&token)),
                    "expected a declaration here",
                ));
            }
        };

        decl.base.begin = begin;
        decl.annotations = annotations;
        apply_modifiers(&mut decl, modifiers);
        if decl
            .annotations
            .iter()
            .any(|a| a.kind == AnnotationKind::Annotation)
        {
            decl.base.enable_attr(Attributes::IS_ANNOTATION);
        }
        Ok(Some(decl))
    }

    // _____________________________________________________________________
    // annotations, modifiers, macro invocations

    /// `@Name`, `@Name(args...)`, `@Annotation[target: ...]`.
    pub fn parse_annotations(&mut self) -> PResult<'a, Vec<Annotation>> {
        let mut annotations = vec![];
        loop {
            self.skip_soft_newlines();
            if !self.at(TokenKind::At) || self.look(2).kind == TokenKind::Not {
                break;
            }
            let begin = self.cur().begin;
            self.bump();
            let name_token = self.expect(TokenKind::Ident, "an annotation name")?;
            let name = Ident::new(name_token.value.clone(), name_token.range());
            let kind = match name.name.as_str() {
                "Annotation" => AnnotationKind::Annotation,
                "Frozen" => AnnotationKind::Frozen,
                _ => AnnotationKind::Custom,
            };
            let mut args = vec![];
            let mut targets = None;
            let mut runtime_visible = false;
            if self.at(TokenKind::LBracket) {
                // target list of an `@Annotation` declaration
                let open = self.cur().begin;
                self.bump();
                let mut mask = 0u64;
                while !self.at(TokenKind::RBracket) && !self.at_eof() {
                    let token = self.bump();
                    if token.kind == TokenKind::Ident {
                        mask |= annotation_target_bit(&token.value);
                        if token.value == "runtime" {
                            runtime_visible = true;
                        }
                    }
                    if !self.eat(TokenKind::Comma) && !self.at(TokenKind::RBracket) {
                        break;
                    }
                }
                self.expect_closing(TokenKind::RBracket, open, "]");
                targets = Some(mask);
            }
            if self.at(TokenKind::LParen) {
                let open = self.cur().begin;
                self.bump();
                self.skip_soft_newlines();
                while !self.at(TokenKind::RParen) && !self.at_eof() {
                    args.push(self.parse_expr()?);
                    self.skip_soft_newlines();
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    self.skip_soft_newlines();
                }
                self.expect_closing(TokenKind::RParen, open, ")");
            }
            annotations.push(Annotation {
                base: self.base_from(begin),
                kind,
                name,
                args,
                targets,
                runtime_visible,
            });
        }
        Ok(annotations)
    }

    pub fn parse_modifiers(&mut self) -> Vec<Modifier> {
        let mut modifiers = vec![];
        loop {
            let kind = match self.cur().kind {
                TokenKind::KwPublic => ModifierKind::Public,
                TokenKind::KwPrivate => ModifierKind::Private,
                TokenKind::KwProtected => ModifierKind::Protected,
                TokenKind::KwInternal => ModifierKind::Internal,
                TokenKind::KwStatic => ModifierKind::Static,
                TokenKind::KwOpen => ModifierKind::Open,
                TokenKind::KwAbstract => ModifierKind::Abstract,
                TokenKind::KwOverride => ModifierKind::Override,
                TokenKind::KwOperator => ModifierKind::Operator,
                TokenKind::KwForeign => ModifierKind::Foreign,
                TokenKind::KwUnsafe => ModifierKind::Unsafe,
                TokenKind::KwConst if self.look(1).kind == TokenKind::KwFunc => ModifierKind::Const,
                _ => break,
            };
            let token = self.bump();
            modifiers.push(Modifier {
                base: NodeBase::new(token.begin, token.end),
                kind,
            });
        }
        modifiers
    }

    /// `@Name!(tokens)` applied in declaration position.
    fn parse_macro_expand_decl(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump(); // @
        let name_token = self.expect(TokenKind::Ident, "a macro name")?;
        self.bump(); // !
        let invocation = self.parse_macro_invocation_args(&name_token)?;
        let name = Ident::new(name_token.value.clone(), name_token.range());
        Ok(Decl::new(
            self.base_from(begin),
            name,
            DeclKind::MacroExpand(invocation),
        ))
    }

    pub(super) fn parse_macro_invocation_args(
        &mut self,
        name_token: &Token,
    ) -> PResult<'a, MacroInvocation> {
        let open = self.expect(TokenKind::LParen, "`(` after a macro name")?;
        let mut arg_tokens = vec![];
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
            arg_tokens.push(self.bump());
        }
        let _ = open;
        Ok(MacroInvocation {
            full_name: Ident::new(name_token.value.clone(), name_token.range()),
            arg_tokens,
            attr_tokens: vec![],
            new_tokens: None,
            new_tokens_str: None,
            has_failed: false,
            keep_original_args: self.sess.enable_macro_in_lsp.get(),
            decl: None,
        })
    }

    // _____________________________________________________________________
    // variables and functions

    fn parse_var_decl(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        let is_var = self.cur().kind == TokenKind::KwVar;
        self.bump(); // let/var/const

        // pattern form: `let (a, b) = ...` or `let Some(x) = ...`
        if !self.at(TokenKind::Ident) && !self.at(TokenKind::Wildcard) {
            let pattern = self.parse_pattern()?;
            let ty_anno = if self.eat(TokenKind::Colon) {
                Some(Box::new(self.parse_type()?))
            } else {
                None
            };
            let init = if self.eat(TokenKind::Assign) {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            return Ok(Decl::new(
                self.base_from(begin),
                Ident::synthesized("<pattern>"),
                DeclKind::VarWithPattern(VarWithPatternDecl {
                    is_var,
                    pattern: Box::new(pattern),
                    ty_anno,
                    init,
                }),
            ));
        }

        let name_token = self.bump();
        let name = Ident::new(name_token.value.clone(), name_token.range());
        let ty_anno = if self.eat(TokenKind::Colon) {
            Some(Box::new(self.parse_type()?))
        } else {
            None
        };
        let init = if self.eat(TokenKind::Assign) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok(Decl::new(
            self.base_from(begin),
            name,
            DeclKind::Var(VarDecl {
                is_var,
                ty_anno,
                init,
            }),
        ))
    }

    fn parse_func_decl(&mut self, is_init: bool) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        let is_const = self.cur().kind == TokenKind::KwConst;
        if is_const {
            self.bump();
        }
        let (name, operator) = if is_init {
            let token = self.bump(); // init
            (Ident::new("init", token.range()), None)
        } else {
            self.expect(TokenKind::KwFunc, "`func`")?;
            if self.at(TokenKind::Ident) {
                let token = self.bump();
                (Ident::new(token.value.clone(), token.range()), None)
            } else {
                // operator function: `func +(...)` and friends
                let token = self.bump();
                (Ident::new(token.value.clone(), token.range()), Some(token.kind))
            }
        };

        let generic = self.parse_generic_params()?;
        let body_begin = self.cur().begin;
        let param_list = self.parse_param_list()?;
        let ret_ty = if self.eat(TokenKind::Colon) {
            Some(Box::new(self.parse_type()?))
        } else {
            None
        };
        let generic = self.parse_where_clauses(generic)?;
        self.skip_soft_newlines();
        let block = if self.at(TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            None
        };
        let body = FuncBody {
            base: self.base_from(body_begin),
            param_list,
            ret_ty,
            block,
        };

        let mut decl = Decl::new(
            self.base_from(begin),
            name,
            DeclKind::Func(FuncDecl {
                body,
                is_const,
                is_frozen: false,
                is_getter: false,
                is_setter: false,
                operator,
                owner_func: None,
                prop_decl: None,
            }),
        );
        if generic.is_some() {
            decl.base.enable_attr(Attributes::GENERIC);
        }
        if is_init {
            decl.base.enable_attr(Attributes::CONSTRUCTOR);
        }
        decl.generic = generic;
        Ok(decl)
    }

    fn parse_main_decl(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        let token = self.bump(); // main
        let body = self.parse_func_signature_and_block(true)?;
        let mut decl = Decl::new(
            self.base_from(begin),
            Ident::new("main", token.range()),
            DeclKind::Main(MainDecl { body }),
        );
        decl.base.enable_attr(Attributes::MAIN_ENTRY);
        Ok(decl)
    }

    fn parse_macro_decl(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump(); // macro
        let name_token = self.expect(TokenKind::Ident, "a macro name")?;
        let name = Ident::new(name_token.value.clone(), name_token.range());
        let body = self.parse_func_signature_and_block(true)?;
        Ok(Decl::new(
            self.base_from(begin),
            name,
            DeclKind::Macro(MacroDecl { body }),
        ))
    }

    /// `(params) [: Ret] [block]`
    pub(super) fn parse_func_signature_and_block(
        &mut self,
        block_expected: bool,
    ) -> PResult<'a, FuncBody> {
        let begin = self.cur().begin;
        let param_list = self.parse_param_list()?;
        let ret_ty = if self.eat(TokenKind::Colon) {
            Some(Box::new(self.parse_type()?))
        } else {
            None
        };
        self.skip_soft_newlines();
        let block = if self.at(TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            if block_expected {
                // abstract members and foreign functions have no body
            }
            None
        };
        Ok(FuncBody {
            base: self.base_from(begin),
            param_list,
            ret_ty,
            block,
        })
    }

    fn parse_param_list(&mut self) -> PResult<'a, FuncParamList> {
        let begin = self.cur().begin;
        let open = self.expect(TokenKind::LParen, "`(`")?;
        let mut params = vec![];
        self.skip_soft_newlines();
        while !self.at(TokenKind::RParen) && !self.at_eof() {
            let param_begin = self.cur().begin;
            let name_token = self.expect(TokenKind::Ident, "a parameter name")?;
            let name = Ident::new(name_token.value.clone(), name_token.range());
            let is_named = self.eat(TokenKind::Not);
            let ty_anno = if self.eat(TokenKind::Colon) {
                Some(Box::new(self.parse_type()?))
            } else {
                None
            };
            let default_value = if self.eat(TokenKind::Assign) {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            params.push(Decl::new(
                self.base_from(param_begin),
                name,
                DeclKind::FuncParam(FuncParam {
                    ty_anno,
                    default_value,
                    is_named,
                    owned_lambda: None,
                }),
            ));
            self.skip_soft_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
            self.skip_soft_newlines();
        }
        self.expect_closing(TokenKind::RParen, open.begin, ")");
        Ok(FuncParamList {
            base: self.base_from(begin),
            params,
        })
    }

    // _____________________________________________________________________
    // nominal declarations

    fn parse_classlike(&mut self, keyword: ClassKeyword) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump();
        let name_token = self.expect(TokenKind::Ident, "a type name")?;
        let name = Ident::new(name_token.value.clone(), name_token.range());
        let generic = self.parse_generic_params()?;
        let super_types = if self.eat(TokenKind::SubtypeOf) {
            self.parse_super_type_list()?
        } else {
            vec![]
        };
        let generic = self.parse_where_clauses(generic)?;
        let body = self.parse_member_block()?;
        let kind = match keyword {
            ClassKeyword::Class => DeclKind::Class(ClassLikeDecl { super_types, body }),
            ClassKeyword::Interface => DeclKind::Interface(ClassLikeDecl { super_types, body }),
            ClassKeyword::Struct => DeclKind::Struct(ClassLikeDecl { super_types, body }),
        };
        let mut decl = Decl::new(self.base_from(begin), name, kind);
        if generic.is_some() {
            decl.base.enable_attr(Attributes::GENERIC);
        }
        decl.generic = generic;
        Ok(decl)
    }

    fn parse_enum_decl(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump();
        let name_token = self.expect(TokenKind::Ident, "an enum name")?;
        let name = Ident::new(name_token.value.clone(), name_token.range());
        let generic = self.parse_generic_params()?;
        let super_types = if self.eat(TokenKind::SubtypeOf) {
            self.parse_super_type_list()?
        } else {
            vec![]
        };
        let generic = self.parse_where_clauses(generic)?;

        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let mut constructors = vec![];
        let mut members = vec![];
        self.skip_newlines();
        self.eat(TokenKind::Or); // a leading `|` is tolerated
        self.skip_newlines();
        // constructors first: `A | B(T) | C`
        while self.at(TokenKind::Ident) {
            let ctor_begin = self.cur().begin;
            let ctor_token = self.bump();
            let ctor_name = Ident::new(ctor_token.value.clone(), ctor_token.range());
            let mut param_tys = vec![];
            if self.at(TokenKind::LParen) {
                let paren = self.cur().begin;
                self.bump();
                while !self.at(TokenKind::RParen) && !self.at_eof() {
                    param_tys.push(self.parse_type()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_closing(TokenKind::RParen, paren, ")");
            }
            let body = FuncBody {
                base: NodeBase::new(ctor_begin, self.prev_end()),
                param_list: FuncParamList {
                    base: NodeBase::new(ctor_begin, self.prev_end()),
                    params: param_tys
                        .into_iter()
                        .map(|ty| {
                            let base = NodeBase::new(ty.base.begin, ty.base.end);
                            Decl::new(
                                base,
                                Ident::synthesized(""),
                                DeclKind::FuncParam(FuncParam {
                                    ty_anno: Some(Box::new(ty)),
                                    default_value: None,
                                    is_named: false,
                                    owned_lambda: None,
                                }),
                            )
                        })
                        .collect(),
                },
                ret_ty: None,
                block: None,
            };
            let mut ctor = Decl::new(
                self.base_from(ctor_begin),
                ctor_name,
                DeclKind::Func(FuncDecl {
                    body,
                    is_const: false,
                    is_frozen: false,
                    is_getter: false,
                    is_setter: false,
                    operator: None,
                    owner_func: None,
                    prop_decl: None,
                }),
            );
            ctor.base.enable_attr(Attributes::ENUM_CONSTRUCTOR);
            constructors.push(ctor);
            self.skip_newlines();
            if !self.eat(TokenKind::Or) {
                break;
            }
            self.skip_newlines();
        }
        // then ordinary members
        self.skip_newlines();
        while !self.at(TokenKind::RBrace) && !self.at_eof() {
            match self.parse_decl()? {
                Some(member) => members.push(member),
                None => break,
            }
            self.skip_newlines();
        }
        self.expect_closing(TokenKind::RBrace, open.begin, "}");

        let mut decl = Decl::new(
            self.base_from(begin),
            name,
            DeclKind::Enum(EnumDecl {
                super_types,
                constructors,
                members,
            }),
        );
        if generic.is_some() {
            decl.base.enable_attr(Attributes::GENERIC);
        }
        decl.generic = generic;
        Ok(decl)
    }

    fn parse_extend_decl(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump();
        let generic = self.parse_generic_params()?;
        let extended = self.parse_type()?;
        let super_interfaces = if self.eat(TokenKind::SubtypeOf) {
            self.parse_super_type_list()?
        } else {
            vec![]
        };
        let generic = self.parse_where_clauses(generic)?;
        let body = if self.look_skip_newlines(0).kind == TokenKind::LBrace {
            self.parse_member_block()?
        } else {
            vec![]
        };
        let name = Ident::synthesized(format!("<extend {}>", type_anno_name(&extended)));
        let mut decl = Decl::new(
            self.base_from(begin),
            name,
            DeclKind::Extend(ExtendDecl {
                extended: Box::new(extended),
                super_interfaces,
                body,
            }),
        );
        if generic.is_some() {
            decl.base.enable_attr(Attributes::GENERIC);
        }
        decl.generic = generic;
        Ok(decl)
    }

    fn parse_type_alias(&mut self) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump();
        let name_token = self.expect(TokenKind::Ident, "a type alias name")?;
        let name = Ident::new(name_token.value.clone(), name_token.range());
        let generic = self.parse_generic_params()?;
        self.expect(TokenKind::Assign, "`=`")?;
        let ty_anno = self.parse_type()?;
        let mut decl = Decl::new(
            self.base_from(begin),
            name,
            DeclKind::TypeAlias(TypeAliasDecl {
                ty_anno: Box::new(ty_anno),
            }),
        );
        decl.generic = generic;
        Ok(decl)
    }

    fn parse_prop_decl(&mut self, is_mut: bool) -> PResult<'a, Decl> {
        let begin = self.cur().begin;
        self.bump(); // prop
        let name_token = self.expect(TokenKind::Ident, "a property name")?;
        let name = Ident::new(name_token.value.clone(), name_token.range());
        let ty_anno = if self.eat(TokenKind::Colon) {
            Some(Box::new(self.parse_type()?))
        } else {
            None
        };
        let mut getters = vec![];
        let mut setters = vec![];
        self.skip_soft_newlines();
        if self.at(TokenKind::LBrace) {
            let open = self.cur().begin;
            self.bump();
            self.skip_newlines();
            while (self.at(TokenKind::KwGet) || self.at(TokenKind::KwSet)
                || (self.at(TokenKind::Ident)
                    && (self.cur().value == "get" || self.cur().value == "set")))
                && !self.at_eof()
            {
                let acc_begin = self.cur().begin;
                let acc_token = self.bump();
                let is_getter = acc_token.value == "get";
                let body = self.parse_func_signature_and_block(true)?;
                let mut accessor = Decl::new(
                    self.base_from(acc_begin),
                    Ident::new(
                        format!("{}_{}", acc_token.value, name.name),
                        acc_token.range(),
                    ),
                    DeclKind::Func(FuncDecl {
                        body,
                        is_const: false,
                        is_frozen: false,
                        is_getter,
                        is_setter: !is_getter,
                        operator: None,
                        owner_func: None,
                        prop_decl: None,
                    }),
                );
                accessor.base.enable_attr(Attributes::COMPILER_ADD);
                if is_getter {
                    getters.push(accessor);
                } else {
                    setters.push(accessor);
                }
                self.skip_newlines();
            }
            self.expect_closing(TokenKind::RBrace, open, "}");
        }
        Ok(Decl::new(
            self.base_from(begin),
            name,
            DeclKind::Prop(PropDecl {
                ty_anno,
                is_mut,
                is_const: false,
                is_frozen: false,
                getters,
                setters,
            }),
        ))
    }

    fn parse_member_block(&mut self) -> PResult<'a, Vec<Decl>> {
        self.skip_soft_newlines();
        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let mut members = vec![];
        self.skip_newlines();
        while !self.at(TokenKind::RBrace) && !self.at_eof() {
            match self.parse_decl() {
                Ok(Some(mut member)) => {
                    member.base.enable_attr(Attributes::IN_CLASSLIKE);
                    members.push(member);
                }
                Ok(None) => break,
                Err(mut err) => {
                    err.emit();
                    self.recover_to_newline();
                }
            }
            self.skip_newlines();
        }
        self.expect_closing(TokenKind::RBrace, open.begin, "}");
        Ok(members)
    }

    fn parse_super_type_list(&mut self) -> PResult<'a, Vec<TypeAnno>> {
        let mut list = vec![self.parse_type()?];
        while self.eat(TokenKind::And) {
            list.push(self.parse_type()?);
        }
        Ok(list)
    }

    // _____________________________________________________________________
    // generics

    pub(super) fn parse_generic_params(&mut self) -> PResult<'a, Option<Generic>> {
        if !self.at(TokenKind::Lt) {
            return Ok(None);
        }
        let open = self.cur().begin;
        self.bump();
        let mut type_parameters = vec![];
        while !self.at(TokenKind::Gt) && !self.at_eof() {
            let token = self.expect(TokenKind::Ident, "a generic parameter name")?;
            let mut param = Decl::new(
                NodeBase::new(token.begin, token.end),
                Ident::new(token.value.clone(), token.range()),
                DeclKind::GenericParam,
            );
            param.base.enable_attr(Attributes::GENERIC);
            type_parameters.push(param);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        if !self.eat(TokenKind::Gt) {
            self.expect_closing(TokenKind::Gt, open, ">");
        }
        Ok(Some(Generic {
            type_parameters,
            constraints: vec![],
        }))
    }

    /// `where T <: A & B, U <: C`
    pub(super) fn parse_where_clauses(
        &mut self,
        generic: Option<Generic>,
    ) -> PResult<'a, Option<Generic>> {
        if !self.at(TokenKind::KwWhere) {
            return Ok(generic);
        }
        let mut generic = generic.unwrap_or(Generic {
            type_parameters: vec![],
            constraints: vec![],
        });
        self.bump();
        loop {
            let begin = self.cur().begin;
            let token = self.expect(TokenKind::Ident, "a constrained type parameter")?;
            let type_param = Ident::new(token.value.clone(), token.range());
            self.expect(TokenKind::SubtypeOf, "`<:`")?;
            let mut upper_bounds = vec![self.parse_type()?];
            while self.eat(TokenKind::And) {
                upper_bounds.push(self.parse_type()?);
            }
            generic.constraints.push(GenericConstraint {
                base: self.base_from(begin),
                type_param,
                upper_bounds,
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(Some(generic))
    }

    // _____________________________________________________________________
    // type annotations

    pub fn parse_type(&mut self) -> PResult<'a, TypeAnno> {
        let begin = self.cur().begin;

        // `?T`
        if self.at(TokenKind::Question) {
            self.bump();
            let inner = self.parse_type()?;
            return Ok(TypeAnno::new(
                self.base_from(begin),
                TypeAnnoKind::Option {
                    inner: Box::new(inner),
                },
            ));
        }

        // `(T, U)` grouping, tuple, or function parameter list
        if self.at(TokenKind::LParen) {
            let open = self.cur().begin;
            self.bump();
            let mut items = vec![];
            while !self.at(TokenKind::RParen) && !self.at_eof() {
                items.push(self.parse_type()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_closing(TokenKind::RParen, open, ")");
            if self.eat(TokenKind::Arrow) {
                let ret = self.parse_type()?;
                return Ok(TypeAnno::new(
                    self.base_from(begin),
                    TypeAnnoKind::Func {
                        params: items,
                        ret: Box::new(ret),
                    },
                ));
            }
            let kind = if items.len() == 1 {
                TypeAnnoKind::Paren(Box::new(items.pop().unwrap()))
            } else {
                TypeAnnoKind::Tuple(items)
            };
            return Ok(TypeAnno::new(self.base_from(begin), kind));
        }

        if !self.at(TokenKind::Ident) {
            let token = self.cur().clone();
            let mut err = self.sess.handler.struct_err_with_code(
                "parse_expected",
                token.range(),
                &format!("expected a type, found `{}`", token_desc(&token)),
                "expected a type here",
            );
            err.set_range(token.range());
            return Err(err);
        }

        let token = self.bump();
        let name = Ident::new(token.value.clone(), token.range());

        if name.name == "This" {
            return Ok(TypeAnno::new(self.base_from(begin), TypeAnnoKind::This));
        }
        if let Some(primitive) = primitive_kind(&name.name) {
            return Ok(TypeAnno::new(
                self.base_from(begin),
                TypeAnnoKind::Primitive(primitive),
            ));
        }

        let type_args = self.parse_type_args_if_present()?;

        if name.name == "VArray" && type_args.len() == 2 {
            // `VArray<T, $N>`: second argument is the length constant
            let mut args = type_args;
            let size_anno = args.pop().unwrap();
            let elem = args.pop().unwrap();
            if let TypeAnnoKind::Constant(size) = size_anno.kind {
                return Ok(TypeAnno::new(
                    self.base_from(begin),
                    TypeAnnoKind::VArray {
                        elem: Box::new(elem),
                        size,
                    },
                ));
            }
            return Ok(TypeAnno::new(
                self.base_from(begin),
                TypeAnnoKind::Invalid,
            ));
        }

        let mut anno = TypeAnno::new(
            self.base_from(begin),
            TypeAnnoKind::Ref { name, type_args },
        );

        // qualified types: `pkg.Type<T>`
        while self.at(TokenKind::Dot) && self.look(1).kind == TokenKind::Ident {
            self.bump();
            let field_token = self.bump();
            let field = Ident::new(field_token.value.clone(), field_token.range());
            let type_args = self.parse_type_args_if_present()?;
            anno = TypeAnno::new(
                self.base_from(begin),
                TypeAnnoKind::Qualified {
                    qualifier: Box::new(anno),
                    field,
                    type_args,
                },
            );
        }

        Ok(anno)
    }

    fn parse_type_args_if_present(&mut self) -> PResult<'a, Vec<TypeAnno>> {
        if !self.at(TokenKind::Lt) {
            return Ok(vec![]);
        }
        let open = self.cur().begin;
        self.bump();
        let mut args = vec![];
        while !self.at(TokenKind::Gt) && !self.at_eof() {
            if self.at(TokenKind::Dollar) || self.at(TokenKind::IntLiteral) {
                // constant type argument (value-array sizes)
                self.eat(TokenKind::Dollar);
                let token = self.bump();
                let expr = Expr::new(
                    NodeBase::new(token.begin, token.end),
                    self.lit_from_token(&token),
                );
                args.push(TypeAnno::new(
                    NodeBase::new(token.begin, token.end),
                    TypeAnnoKind::Constant(Box::new(expr)),
                ));
            } else {
                args.push(self.parse_type()?);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        if !self.eat(TokenKind::Gt) {
            self.expect_closing(TokenKind::Gt, open, ">");
        }
        Ok(args)
    }

    // _____________________________________________________________________
    // patterns

    pub fn parse_pattern(&mut self) -> PResult<'a, Pattern> {
        let begin = self.cur().begin;
        let mut pattern = self.parse_pattern_atom()?;

        // `pat: Type` makes a type pattern
        if self.at(TokenKind::Colon) {
            self.bump();
            let mut types = vec![self.parse_type()?];
            while self.eat(TokenKind::Or) {
                types.push(self.parse_type()?);
            }
            pattern = if types.len() > 1 {
                Pattern::new(
                    self.base_from(begin),
                    PatternKind::ExceptType {
                        types,
                        pattern: Box::new(pattern),
                    },
                )
            } else {
                Pattern::new(
                    self.base_from(begin),
                    PatternKind::Type {
                        pattern: Box::new(pattern),
                        ty: Box::new(types.pop().unwrap()),
                    },
                )
            };
        }
        Ok(pattern)
    }

    fn parse_pattern_atom(&mut self) -> PResult<'a, Pattern> {
        let begin = self.cur().begin;
        match self.cur().kind {
            TokenKind::Wildcard => {
                self.bump();
                Ok(Pattern::new(self.base_from(begin), PatternKind::Wildcard))
            }
            TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::RuneLiteral
            | TokenKind::BoolLiteral
            | TokenKind::StringLiteral
            | TokenKind::MultiLineString
            | TokenKind::RawString
            | TokenKind::ByteString => {
                let token = self.bump();
                let expr = Expr::new(
                    NodeBase::new(token.begin, token.end),
                    self.lit_from_token(&token),
                );
                Ok(Pattern::new(
                    self.base_from(begin),
                    PatternKind::Const(Box::new(expr)),
                ))
            }
            TokenKind::Minus => {
                // negative literal pattern
                self.bump();
                let token = self.bump();
                let lit = Expr::new(
                    NodeBase::new(token.begin, token.end),
                    self.lit_from_token(&token),
                );
                let neg = Expr::new(
                    self.base_from(begin),
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(lit),
                    },
                );
                Ok(Pattern::new(
                    self.base_from(begin),
                    PatternKind::Const(Box::new(neg)),
                ))
            }
            TokenKind::LParen => {
                let open = self.cur().begin;
                self.bump();
                let mut items = vec![];
                while !self.at(TokenKind::RParen) && !self.at_eof() {
                    items.push(self.parse_pattern()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_closing(TokenKind::RParen, open, ")");
                if items.len() == 1 {
                    Ok(items.pop().unwrap())
                } else {
                    Ok(Pattern::new(self.base_from(begin), PatternKind::Tuple(items)))
                }
            }
            TokenKind::Ident => {
                let token = self.bump();
                let name = Ident::new(token.value.clone(), token.range());
                // qualified or applied enum constructor
                if self.at(TokenKind::Dot) || self.at(TokenKind::LParen) {
                    let mut constructor = Expr::new(
                        NodeBase::new(token.begin, token.end),
                        ExprKind::Ref {
                            name,
                            type_args: vec![],
                        },
                    );
                    while self.at(TokenKind::Dot) {
                        self.bump();
                        let field_token = self.expect(TokenKind::Ident, "a constructor name")?;
                        constructor = Expr::new(
                            self.base_from(begin),
                            ExprKind::MemberAccess {
                                receiver: Box::new(constructor),
                                field: Ident::new(field_token.value.clone(), field_token.range()),
                                type_args: vec![],
                            },
                        );
                    }
                    let mut patterns = vec![];
                    if self.at(TokenKind::LParen) {
                        let open = self.cur().begin;
                        self.bump();
                        while !self.at(TokenKind::RParen) && !self.at_eof() {
                            patterns.push(self.parse_pattern()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect_closing(TokenKind::RParen, open, ")");
                    }
                    Ok(Pattern::new(
                        self.base_from(begin),
                        PatternKind::Enum {
                            constructor: Box::new(constructor),
                            patterns,
                        },
                    ))
                } else {
                    // a bare name: fresh binding or nullary enum
                    // constructor, resolved by the checker
                    Ok(Pattern::new(
                        self.base_from(begin),
                        PatternKind::VarOrEnum { name },
                    ))
                }
            }
            _ => {
                let token = self.cur().clone();
                Err(self.sess.handler.struct_err_with_code(
                    "parse_expected",
                    token.range(),
                    &format!("expected a pattern, found `{}`", token_desc(&token)),
                    "expected a pattern here",
                ))
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ClassKeyword {
    Class,
    Interface,
    Struct,
}

fn apply_modifiers(decl: &mut Decl, modifiers: Vec<Modifier>) {
    for modifier in &modifiers {
        let attr = match modifier.kind {
            ModifierKind::Public => Attributes::PUBLIC,
            ModifierKind::Private => Attributes::PRIVATE,
            ModifierKind::Protected => Attributes::PROTECTED,
            ModifierKind::Internal => Attributes::INTERNAL,
            ModifierKind::Static => Attributes::STATIC,
            ModifierKind::Open => Attributes::OPEN,
            ModifierKind::Abstract => Attributes::ABSTRACT,
            ModifierKind::Override => Attributes::empty(),
            ModifierKind::Operator => Attributes::empty(),
            ModifierKind::Foreign => Attributes::FOREIGN,
            ModifierKind::Unsafe => Attributes::UNSAFE,
            ModifierKind::Const => Attributes::empty(),
        };
        decl.base.enable_attr(attr);
        if modifier.kind == ModifierKind::Const {
            if let Some(func) = decl.func_mut() {
                func.is_const = true;
            }
        }
    }
    decl.modifiers = modifiers;
}

fn annotation_target_bit(name: &str) -> u64 {
    match name {
        "class" => 1 << 0,
        "interface" => 1 << 1,
        "struct" => 1 << 2,
        "enum" => 1 << 3,
        "func" => 1 << 4,
        "var" => 1 << 5,
        "prop" => 1 << 6,
        "param" => 1 << 7,
        "extend" => 1 << 8,
        "type" => 1 << 9,
        _ => 0,
    }
}

fn primitive_kind(name: &str) -> Option<PrimitiveTyKind> {
    Some(match name {
        "Int8" => PrimitiveTyKind::Int8,
        "Int16" => PrimitiveTyKind::Int16,
        "Int32" => PrimitiveTyKind::Int32,
        "Int64" => PrimitiveTyKind::Int64,
        "UInt8" => PrimitiveTyKind::UInt8,
        "UInt16" => PrimitiveTyKind::UInt16,
        "UInt32" => PrimitiveTyKind::UInt32,
        "UInt64" => PrimitiveTyKind::UInt64,
        "Float16" => PrimitiveTyKind::Float16,
        "Float32" => PrimitiveTyKind::Float32,
        "Float64" => PrimitiveTyKind::Float64,
        "Bool" => PrimitiveTyKind::Bool,
        "Rune" => PrimitiveTyKind::Rune,
        "Unit" => PrimitiveTyKind::Unit,
        "Nothing" => PrimitiveTyKind::Nothing,
        _ => return None,
    })
}

fn type_anno_name(anno: &TypeAnno) -> String {
    match &anno.kind {
        TypeAnnoKind::Ref { name, .. } => name.name.clone(),
        TypeAnnoKind::Primitive(kind) => format!("{:?}", kind),
        TypeAnnoKind::Qualified { field, .. } => field.name.clone(),
        _ => "<type>".to_string(),
    }
}
