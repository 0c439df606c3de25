//! The Chime AST.
//!
//! Every node category is a closed sum: a struct carrying the shared
//! `NodeBase` header (positions, attribute bitset, optional semantic type,
//! walk memo) plus a kind enum holding the variant payload. Trees are
//! singly owned through `Box`/`Vec`; back-references (`outer_decl`,
//! `map_expr`, resolved targets) are plain ids, never strong references.

use std::sync::atomic::{AtomicU32, Ordering};

use chime_pos::{Position, Range, ZERO_POSITION};

use crate::token::{Token, TokenKind};

/// Identity of an AST node, unique within the process.
pub type NodeId = u32;

/// A canonical type handle given out by the type manager. Identity is
/// index equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TyId(pub u32);

/// A resolved symbol handle given out by the checker's symbol table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(1);

pub fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reset the process-wide node id counter; embedders call this between
/// independent runs.
pub fn reset_node_ids() {
    NEXT_NODE_ID.store(1, Ordering::Relaxed);
}

bitflags! {
    /// Semantic marks shared by every node kind.
    pub struct Attributes: u32 {
        const PUBLIC           = 1 << 0;
        const PRIVATE          = 1 << 1;
        const PROTECTED        = 1 << 2;
        const INTERNAL         = 1 << 3;
        const STATIC           = 1 << 4;
        const OPEN             = 1 << 5;
        const ABSTRACT         = 1 << 6;
        const CONSTRUCTOR      = 1 << 7;
        const ENUM_CONSTRUCTOR = 1 << 8;
        const GENERIC          = 1 << 9;
        const IMPORTED         = 1 << 10;
        const COMPILER_ADD     = 1 << 11;
        const IN_CLASSLIKE     = 1 << 12;
        const NEED_AUTO_BOX    = 1 << 13;
        const HAS_BROKEN       = 1 << 14;
        const IS_BROKEN        = 1 << 15;
        const IS_ANNOTATION    = 1 << 16;
        const INCRE_COMPILE    = 1 << 17;
        const NO_REFLECT_INFO  = 1 << 18;
        const GLOBAL           = 1 << 19;
        const FOREIGN          = 1 << 20;
        const INTRINSIC        = 1 << 21;
        const UNSAFE           = 1 << 22;
        const MAIN_ENTRY       = 1 << 23;
    }
}

impl Default for Attributes {
    fn default() -> Attributes {
        Attributes::empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommentKind {
    Line,
    Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comment {
    pub kind: CommentKind,
    pub text: String,
    pub range: Range,
}

/// A contiguous run of comments separated by at most blank-line
/// boundaries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommentGroup {
    pub comments: Vec<Comment>,
}

impl CommentGroup {
    pub fn begin(&self) -> Position {
        self.comments.first().map(|c| c.range.begin).unwrap_or(ZERO_POSITION)
    }

    pub fn end(&self) -> Position {
        self.comments.last().map(|c| c.range.end).unwrap_or(ZERO_POSITION)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommentGroups {
    pub leading: Vec<CommentGroup>,
    pub trailing: Vec<CommentGroup>,
    pub inner: Vec<CommentGroup>,
}

/// The header shared by every node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeBase {
    pub id: NodeId,
    pub begin: Position,
    pub end: Position,
    pub attrs: Attributes,
    /// Filled in by the checker; never changed once set (desugaring
    /// produces new nodes with new types).
    pub ty: Option<TyId>,
    /// The last walker id that visited this node.
    pub visited_by: u32,
    /// Non-owning back-reference to the enclosing declaration.
    pub outer_decl: Option<NodeId>,
    /// Back-pointer to the pre-rearrangement expression, set when generic
    /// instantiation moves nodes around.
    pub map_expr: Option<NodeId>,
    pub comments: CommentGroups,
}

impl NodeBase {
    pub fn new(begin: Position, end: Position) -> NodeBase {
        NodeBase {
            id: next_node_id(),
            begin,
            end,
            attrs: Attributes::empty(),
            ty: None,
            visited_by: 0,
            outer_decl: None,
            map_expr: None,
            comments: CommentGroups::default(),
        }
    }

    pub fn synthesized() -> NodeBase {
        let mut base = NodeBase::new(ZERO_POSITION, ZERO_POSITION);
        base.attrs |= Attributes::COMPILER_ADD;
        base
    }

    pub fn range(&self) -> Range {
        Range::new(self.begin, self.end)
    }

    pub fn has_attr(&self, attrs: Attributes) -> bool {
        self.attrs.contains(attrs)
    }

    pub fn enable_attr(&mut self, attrs: Attributes) {
        self.attrs |= attrs;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ident {
    pub name: String,
    pub range: Range,
}

impl Ident {
    pub fn new(name: impl Into<String>, range: Range) -> Ident {
        Ident {
            name: name.into(),
            range,
        }
    }

    pub fn synthesized(name: impl Into<String>) -> Ident {
        Ident {
            name: name.into(),
            range: Range::default(),
        }
    }
}

// _____________________________________________________________________________
// Package and File

#[derive(Clone, Debug, PartialEq)]
pub struct Package {
    pub base: NodeBase,
    pub name: String,
    pub files: Vec<File>,
    /// Monomorphic copies produced by the generic instantiator; later
    /// passes treat them as ordinary decls.
    pub instantiated_decls: Vec<Decl>,
    /// Decls imported at source level (re-parsed from caches).
    pub source_imported_decls: Vec<Decl>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Package {
        Package {
            base: NodeBase::synthesized(),
            name: name.into(),
            files: vec![],
            instantiated_decls: vec![],
            source_imported_decls: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct File {
    pub base: NodeBase,
    pub path: String,
    pub file_id: u32,
    pub package_spec: Option<Decl>,
    pub imports: Vec<Decl>,
    pub decls: Vec<Decl>,
}

// _____________________________________________________________________________
// Declarations

#[derive(Clone, Debug, PartialEq)]
pub struct Decl {
    pub base: NodeBase,
    pub name: Ident,
    pub annotations: Vec<Annotation>,
    pub modifiers: Vec<Modifier>,
    pub generic: Option<Generic>,
    pub kind: DeclKind,
    /// The symbol the checker created for this decl.
    pub symbol: Option<SymbolId>,
    /// Deterministic global identifier, set during mangling.
    pub mangled_name: Option<String>,
    /// The pre-sema mangling the incremental cache is keyed on.
    pub mangled_before_sema: Option<String>,
    pub export_id: Option<String>,
    /// Replacement produced by main/macro/primary-ctor desugaring.
    pub desugar_decl: Option<Box<Decl>>,
    /// Set by the incremental loader when the decl must be re-emitted.
    pub to_be_compiled: bool,
    pub is_inline: bool,
}

impl Decl {
    pub fn new(base: NodeBase, name: Ident, kind: DeclKind) -> Decl {
        Decl {
            base,
            name,
            annotations: vec![],
            modifiers: vec![],
            generic: None,
            kind,
            symbol: None,
            mangled_name: None,
            mangled_before_sema: None,
            export_id: None,
            desugar_decl: None,
            to_be_compiled: false,
            is_inline: false,
        }
    }

    pub fn is_nominal(&self) -> bool {
        matches!(
            self.kind,
            DeclKind::Class(_) | DeclKind::Interface(_) | DeclKind::Struct(_) | DeclKind::Enum(_)
        )
    }

    pub fn is_exported(&self) -> bool {
        self.base.has_attr(Attributes::PUBLIC) || self.base.has_attr(Attributes::PROTECTED)
    }

    pub fn func(&self) -> Option<&FuncDecl> {
        match &self.kind {
            DeclKind::Func(f) | DeclKind::PrimaryCtor(f) => Some(f),
            _ => None,
        }
    }

    pub fn func_mut(&mut self) -> Option<&mut FuncDecl> {
        match &mut self.kind {
            DeclKind::Func(f) | DeclKind::PrimaryCtor(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeclKind {
    PackageSpec,
    ImportSpec(ImportSpec),
    Var(VarDecl),
    VarWithPattern(VarWithPatternDecl),
    Func(FuncDecl),
    FuncParam(FuncParam),
    Prop(PropDecl),
    Class(ClassLikeDecl),
    Interface(ClassLikeDecl),
    Struct(ClassLikeDecl),
    Enum(EnumDecl),
    Extend(ExtendDecl),
    TypeAlias(TypeAliasDecl),
    Macro(MacroDecl),
    Main(MainDecl),
    PrimaryCtor(FuncDecl),
    MacroExpand(MacroInvocation),
    GenericParam,
    BuiltIn,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportSpec {
    pub path: Vec<Ident>,
    pub alias: Option<Ident>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub is_var: bool,
    pub ty_anno: Option<Box<TypeAnno>>,
    pub init: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarWithPatternDecl {
    pub is_var: bool,
    pub pattern: Box<Pattern>,
    pub ty_anno: Option<Box<TypeAnno>>,
    pub init: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncDecl {
    pub body: FuncBody,
    pub is_const: bool,
    pub is_frozen: bool,
    pub is_getter: bool,
    pub is_setter: bool,
    pub operator: Option<TokenKind>,
    /// Owner of a default-parameter synthetic function.
    pub owner_func: Option<NodeId>,
    /// Owning property for accessors.
    pub prop_decl: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncParam {
    pub ty_anno: Option<Box<TypeAnno>>,
    pub default_value: Option<Box<Expr>>,
    pub is_named: bool,
    /// Non-zero when the parameter belongs to a lambda rather than a
    /// declared function (the IR loader configures these late).
    pub owned_lambda: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropDecl {
    pub ty_anno: Option<Box<TypeAnno>>,
    pub is_mut: bool,
    pub is_const: bool,
    pub is_frozen: bool,
    pub getters: Vec<Decl>,
    pub setters: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassLikeDecl {
    pub super_types: Vec<TypeAnno>,
    pub body: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDecl {
    pub super_types: Vec<TypeAnno>,
    pub constructors: Vec<Decl>,
    pub members: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtendDecl {
    pub extended: Box<TypeAnno>,
    pub super_interfaces: Vec<TypeAnno>,
    pub body: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAliasDecl {
    pub ty_anno: Box<TypeAnno>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MacroDecl {
    pub body: FuncBody,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MainDecl {
    pub body: FuncBody,
}

/// The contract with the external macro host. After a successful
/// expansion `new_tokens` is the replacement stream and `new_tokens_str`
/// its rendered source; after a failed expansion the original args remain
/// and downstream passes work best-effort.
#[derive(Clone, Debug, PartialEq)]
pub struct MacroInvocation {
    pub full_name: Ident,
    pub arg_tokens: Vec<Token>,
    pub attr_tokens: Vec<Token>,
    pub new_tokens: Option<Vec<Token>>,
    pub new_tokens_str: Option<String>,
    pub has_failed: bool,
    /// Retain original argument tokens for position queries (set by the
    /// `enable_macro_in_lsp` parse mode).
    pub keep_original_args: bool,
    /// The expanded declaration, parsed from `new_tokens`.
    pub decl: Option<Box<Decl>>,
}

// _____________________________________________________________________________
// Function bodies, generics, annotations, modifiers

#[derive(Clone, Debug, PartialEq)]
pub struct FuncBody {
    pub base: NodeBase,
    pub param_list: FuncParamList,
    pub ret_ty: Option<Box<TypeAnno>>,
    pub block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncParamList {
    pub base: NodeBase,
    pub params: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Generic {
    pub type_parameters: Vec<Decl>,
    pub constraints: Vec<GenericConstraint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenericConstraint {
    pub base: NodeBase,
    pub type_param: Ident,
    pub upper_bounds: Vec<TypeAnno>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationKind {
    /// A user annotation, `@Name(...)`.
    Custom,
    /// The `@Annotation` meta annotation declaring an annotation class.
    Annotation,
    /// `@Frozen`, marking a callable inline-stable.
    Frozen,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub base: NodeBase,
    pub kind: AnnotationKind,
    pub name: Ident,
    pub args: Vec<Expr>,
    /// Bitset of legal attachment targets, for `@Annotation` decls.
    pub targets: Option<u64>,
    pub runtime_visible: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModifierKind {
    Public,
    Private,
    Protected,
    Internal,
    Static,
    Open,
    Abstract,
    Override,
    Operator,
    Foreign,
    Unsafe,
    Const,
}

/// Modifiers are kept in an ordered set and, unlike every other node,
/// are re-entered by walkers that already saw them.
#[derive(Clone, Debug, PartialEq)]
pub struct Modifier {
    pub base: NodeBase,
    pub kind: ModifierKind,
}

// _____________________________________________________________________________
// Expressions

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub base: NodeBase,
    pub kind: ExprKind,
    /// Additive desugar: the original node is retained and traversal
    /// prefers this replacement.
    pub desugar: Option<Box<Expr>>,
    /// Resolved reference target, where the kind has one.
    pub target: Option<SymbolId>,
}

impl Expr {
    pub fn new(base: NodeBase, kind: ExprKind) -> Expr {
        Expr {
            base,
            kind,
            desugar: None,
            target: None,
        }
    }

    pub fn synthesized(kind: ExprKind) -> Expr {
        Expr::new(NodeBase::synthesized(), kind)
    }

    pub fn invalid(begin: Position, end: Position) -> Expr {
        let mut base = NodeBase::new(begin, end);
        base.enable_attr(Attributes::IS_BROKEN);
        Expr::new(base, ExprKind::Invalid)
    }

    /// The expression semantics flow through: the desugar if present.
    pub fn effective(&self) -> &Expr {
        match &self.desugar {
            Some(d) => d.effective(),
            None => self,
        }
    }

    pub fn effective_ty(&self) -> Option<TyId> {
        self.effective().base.ty
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Coalesce,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    NotEq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncDecOp {
    Inc,
    Dec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTyKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Bool,
    Rune,
    Unit,
    Nothing,
    String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LitKind {
    Int,
    Float,
    Rune,
    Bool,
    Str,
    Byte,
    Unit,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StrPart {
    Text(String),
    Interpolation(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub base: NodeBase,
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn synthesized(stmts: Vec<Stmt>) -> Block {
        Block {
            base: NodeBase::synthesized(),
            stmts,
        }
    }

    /// The last statement, which carries the block's value when it is an
    /// expression.
    pub fn last_expr(&self) -> Option<&Expr> {
        match self.stmts.last() {
            Some(Stmt::Expr(e)) => Some(e),
            _ => None,
        }
    }

    /// Whether the block's value position is held by a declaration (or
    /// the block is empty): such blocks evaluate to `Unit`.
    pub fn ends_with_decl(&self) -> bool {
        !matches!(self.stmts.last(), Some(Stmt::Expr(_)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Decl(Decl),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchArm {
    pub base: NodeBase,
    pub patterns: Vec<Pattern>,
    pub guard: Option<Box<Expr>>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Catch {
    pub base: NodeBase,
    pub pattern: Box<Pattern>,
    pub block: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Ref {
        name: Ident,
        type_args: Vec<TypeAnno>,
    },
    MemberAccess {
        receiver: Box<Expr>,
        field: Ident,
        type_args: Vec<TypeAnno>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// A call argument; `name` is set for named arguments.
    FuncArg {
        name: Option<Ident>,
        expr: Box<Expr>,
    },
    LitConst {
        kind: LitKind,
        text: String,
    },
    StrInterpolation {
        parts: Vec<StrPart>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        /// Compound assignments carry the underlying operator.
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncOrDec {
        op: IncDecOp,
        expr: Box<Expr>,
    },
    Range {
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        inclusive: bool,
    },
    Subscript {
        receiver: Box<Expr>,
        indices: Vec<Expr>,
    },
    Paren {
        expr: Box<Expr>,
    },
    TupleLit {
        items: Vec<Expr>,
    },
    ArrayLit {
        items: Vec<Expr>,
    },
    /// Fixed-length value-array construction.
    Array {
        size: Option<Box<Expr>>,
        init: Option<Box<Expr>>,
    },
    TypeConv {
        target: Box<TypeAnno>,
        expr: Box<Expr>,
    },
    Lambda {
        body: Box<FuncBody>,
    },
    TrailingClosure {
        expr: Box<Expr>,
        lambda: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_block: Block,
        else_branch: Option<Box<Expr>>,
    },
    Match {
        selector: Option<Box<Expr>>,
        arms: Vec<MatchArm>,
    },
    Try {
        block: Block,
        catches: Vec<Catch>,
        finally: Option<Block>,
    },
    Throw {
        expr: Box<Expr>,
    },
    Return {
        expr: Option<Box<Expr>>,
    },
    Jump {
        kind: JumpKind,
    },
    ForIn {
        pattern: Box<Pattern>,
        in_expr: Box<Expr>,
        guard: Option<Box<Expr>>,
        block: Block,
    },
    While {
        cond: Box<Expr>,
        block: Block,
    },
    DoWhile {
        block: Block,
        cond: Box<Expr>,
    },
    Spawn {
        task: Box<Expr>,
    },
    Synchronized {
        mutex: Box<Expr>,
        block: Block,
    },
    Is {
        expr: Box<Expr>,
        ty: Box<TypeAnno>,
    },
    As {
        expr: Box<Expr>,
        ty: Box<TypeAnno>,
    },
    /// A `?.`/`?[`/`?(`/`?{` questioned access step.
    Optional {
        base_expr: Box<Expr>,
    },
    /// The checker's desugar wrapping a whole questioned access chain.
    OptionalChain {
        expr: Box<Expr>,
    },
    LetPatternDestructor {
        patterns: Vec<Pattern>,
        initializer: Box<Expr>,
    },
    Quote {
        tokens: Vec<Token>,
    },
    MacroExpand {
        invocation: MacroInvocation,
    },
    IfAvailable {
        arg: Box<Expr>,
        available: Box<Expr>,
        unavailable: Box<Expr>,
    },
    Block(Block),
    Wildcard,
    PrimitiveType {
        kind: PrimitiveTyKind,
    },
    Invalid,
}

// _____________________________________________________________________________
// Patterns

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub base: NodeBase,
    pub kind: PatternKind,
    /// Additive desugar, like `Expr::desugar`; `VarOrEnum` resolves into
    /// this once the checker knows the name.
    pub desugar: Option<Box<Pattern>>,
}

impl Pattern {
    pub fn new(base: NodeBase, kind: PatternKind) -> Pattern {
        Pattern {
            base,
            kind,
            desugar: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatternKind {
    Const(Box<Expr>),
    Wildcard,
    Var {
        name: Ident,
        symbol: Option<SymbolId>,
    },
    Tuple(Vec<Pattern>),
    Type {
        pattern: Box<Pattern>,
        ty: Box<TypeAnno>,
    },
    Enum {
        constructor: Box<Expr>,
        patterns: Vec<Pattern>,
    },
    ExceptType {
        types: Vec<TypeAnno>,
        pattern: Box<Pattern>,
    },
    /// An unresolved name that is either a fresh binding or a nullary enum
    /// constructor; the checker desugars it once the name resolves.
    VarOrEnum {
        name: Ident,
    },
}

// _____________________________________________________________________________
// Type annotations

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAnno {
    pub base: NodeBase,
    pub kind: TypeAnnoKind,
}

impl TypeAnno {
    pub fn new(base: NodeBase, kind: TypeAnnoKind) -> TypeAnno {
        TypeAnno { base, kind }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeAnnoKind {
    Ref {
        name: Ident,
        type_args: Vec<TypeAnno>,
    },
    Paren(Box<TypeAnno>),
    Func {
        params: Vec<TypeAnno>,
        ret: Box<TypeAnno>,
    },
    Tuple(Vec<TypeAnno>),
    This,
    Primitive(PrimitiveTyKind),
    /// `?T`; nested options stack the count.
    Option {
        inner: Box<TypeAnno>,
    },
    VArray {
        elem: Box<TypeAnno>,
        size: Box<Expr>,
    },
    Qualified {
        qualifier: Box<TypeAnno>,
        field: Ident,
        type_args: Vec<TypeAnno>,
    },
    /// A literal used in type position (value-array sizes).
    Constant(Box<Expr>),
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeBase::synthesized();
        let b = NodeBase::synthesized();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_effective_prefers_desugar() {
        let mut outer = Expr::synthesized(ExprKind::Wildcard);
        let mut mid = Expr::synthesized(ExprKind::Invalid);
        let inner = Expr::synthesized(ExprKind::LitConst {
            kind: LitKind::Unit,
            text: "()".to_string(),
        });
        mid.desugar = Some(Box::new(inner));
        outer.desugar = Some(Box::new(mid));
        match &outer.effective().kind {
            ExprKind::LitConst { kind: LitKind::Unit, .. } => {}
            other => panic!("expected the innermost desugar, got {:?}", other),
        }
    }

    #[test]
    fn test_block_ends_with_decl() {
        let block = Block::synthesized(vec![]);
        assert!(block.ends_with_decl());

        let block = Block::synthesized(vec![Stmt::Expr(Expr::synthesized(ExprKind::Wildcard))]);
        assert!(!block.ends_with_decl());
    }
}
