//! The memoized AST walker.
//!
//! Every traversal draws a fresh id from a process-wide atomic counter and
//! stamps each node it visits; a re-entrant traversal sharing the id
//! treats a stamped node as already walked and skips its subtree. Modifier
//! nodes are the exception: they live in an ordered set and are always
//! re-entered.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::ast::*;

static NEXT_WALKER_ID: AtomicU32 = AtomicU32::new(1);

/// Id 0 is reserved; wrapping past zero skips it.
pub fn next_walker_id() -> u32 {
    loop {
        let id = NEXT_WALKER_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Reset the process-wide walker id counter; embedders call this between
/// independent runs.
pub fn reset_walker_ids() {
    NEXT_WALKER_ID.store(1, Ordering::Relaxed);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitAction {
    /// Continue to walk into child items.
    WalkChildren,
    /// Continue walking, but don't enter child items.
    SkipChildren,
    /// Stop walking immediately.
    StopNow,
    /// Only clean up states. Keep the action as it is.
    KeepDecision,
}

/// A borrowed view of any walkable node.
pub enum NodeMut<'a> {
    Package(&'a mut Package),
    File(&'a mut File),
    Decl(&'a mut Decl),
    Expr(&'a mut Expr),
    Pattern(&'a mut Pattern),
    TypeAnno(&'a mut TypeAnno),
    Annotation(&'a mut Annotation),
    Modifier(&'a mut Modifier),
}

impl<'a> NodeMut<'a> {
    pub fn base(&self) -> &NodeBase {
        match self {
            NodeMut::Package(n) => &n.base,
            NodeMut::File(n) => &n.base,
            NodeMut::Decl(n) => &n.base,
            NodeMut::Expr(n) => &n.base,
            NodeMut::Pattern(n) => &n.base,
            NodeMut::TypeAnno(n) => &n.base,
            NodeMut::Annotation(n) => &n.base,
            NodeMut::Modifier(n) => &n.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut NodeBase {
        match self {
            NodeMut::Package(n) => &mut n.base,
            NodeMut::File(n) => &mut n.base,
            NodeMut::Decl(n) => &mut n.base,
            NodeMut::Expr(n) => &mut n.base,
            NodeMut::Pattern(n) => &mut n.base,
            NodeMut::TypeAnno(n) => &mut n.base,
            NodeMut::Annotation(n) => &mut n.base,
            NodeMut::Modifier(n) => &mut n.base,
        }
    }

    fn reborrow(&mut self) -> NodeMut<'_> {
        match self {
            NodeMut::Package(n) => NodeMut::Package(n),
            NodeMut::File(n) => NodeMut::File(n),
            NodeMut::Decl(n) => NodeMut::Decl(n),
            NodeMut::Expr(n) => NodeMut::Expr(n),
            NodeMut::Pattern(n) => NodeMut::Pattern(n),
            NodeMut::TypeAnno(n) => NodeMut::TypeAnno(n),
            NodeMut::Annotation(n) => NodeMut::Annotation(n),
            NodeMut::Modifier(n) => NodeMut::Modifier(n),
        }
    }
}

pub type VisitFn<'f> = dyn FnMut(NodeMut<'_>) -> VisitAction + 'f;

/// The main class used for walking the Chime AST.
pub struct Walker<'f> {
    id: u32,
    pre: Option<Box<VisitFn<'f>>>,
    post: Option<Box<VisitFn<'f>>>,
}

impl<'f> Walker<'f> {
    pub fn new(
        pre: Option<Box<VisitFn<'f>>>,
        post: Option<Box<VisitFn<'f>>>,
    ) -> Walker<'f> {
        Walker {
            id: next_walker_id(),
            pre,
            post,
        }
    }

    pub fn with_pre(pre: impl FnMut(NodeMut<'_>) -> VisitAction + 'f) -> Walker<'f> {
        Walker::new(Some(Box::new(pre)), None)
    }

    /// Share a previous traversal's id, so nodes it already stamped are
    /// treated as walked.
    pub fn with_id(
        id: u32,
        pre: Option<Box<VisitFn<'f>>>,
        post: Option<Box<VisitFn<'f>>>,
    ) -> Walker<'f> {
        Walker { id, pre, post }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Walk a node. Returns `false` if the traversal was stopped by
    /// `StopNow`; ancestor frames unwind with no further side effects.
    pub fn walk(&mut self, mut node: NodeMut<'_>) -> bool {
        let is_modifier = matches!(node, NodeMut::Modifier(_));
        {
            let base = node.base_mut();
            if !is_modifier && base.visited_by == self.id {
                return true;
            }
            base.visited_by = self.id;
        }

        let pre_action = match &mut self.pre {
            Some(pre) => pre(node.reborrow()),
            None => VisitAction::WalkChildren,
        };
        match pre_action {
            VisitAction::StopNow => return false,
            VisitAction::SkipChildren => {}
            VisitAction::WalkChildren | VisitAction::KeepDecision => {
                if !self.walk_children(node.reborrow()) {
                    return false;
                }
            }
        }

        match &mut self.post {
            Some(post) => post(node) != VisitAction::StopNow,
            None => true,
        }
    }

    pub fn walk_package(&mut self, package: &mut Package) -> bool {
        self.walk(NodeMut::Package(package))
    }

    pub fn walk_file(&mut self, file: &mut File) -> bool {
        self.walk(NodeMut::File(file))
    }

    pub fn walk_decl(&mut self, decl: &mut Decl) -> bool {
        self.walk(NodeMut::Decl(decl))
    }

    pub fn walk_expr(&mut self, expr: &mut Expr) -> bool {
        self.walk(NodeMut::Expr(expr))
    }

    // _____________________________________________________________________
    // child enumeration, fixed per kind

    fn walk_children(&mut self, node: NodeMut<'_>) -> bool {
        match node {
            NodeMut::Package(package) => {
                for decl in &mut package.instantiated_decls {
                    if !self.walk(NodeMut::Decl(decl)) {
                        return false;
                    }
                }
                for file in &mut package.files {
                    if !self.walk(NodeMut::File(file)) {
                        return false;
                    }
                }
                for decl in &mut package.source_imported_decls {
                    if !self.walk(NodeMut::Decl(decl)) {
                        return false;
                    }
                }
                true
            }
            NodeMut::File(file) => {
                if let Some(spec) = &mut file.package_spec {
                    if !self.walk(NodeMut::Decl(spec)) {
                        return false;
                    }
                }
                for import in &mut file.imports {
                    if !self.walk(NodeMut::Decl(import)) {
                        return false;
                    }
                }
                for decl in &mut file.decls {
                    if !self.walk(NodeMut::Decl(decl)) {
                        return false;
                    }
                }
                true
            }
            NodeMut::Decl(decl) => self.walk_decl_children(decl),
            NodeMut::Expr(expr) => self.walk_expr_children(expr),
            NodeMut::Pattern(pattern) => self.walk_pattern_children(pattern),
            NodeMut::TypeAnno(anno) => self.walk_type_children(anno),
            NodeMut::Annotation(annotation) => {
                for arg in &mut annotation.args {
                    if !self.walk(NodeMut::Expr(arg)) {
                        return false;
                    }
                }
                true
            }
            NodeMut::Modifier(_) => true,
        }
    }

    fn walk_decl_children(&mut self, decl: &mut Decl) -> bool {
        // Annotations and modifiers come first, then kind-specific
        // children, matching pre-order document order.
        for annotation in &mut decl.annotations {
            if !self.walk(NodeMut::Annotation(annotation)) {
                return false;
            }
        }
        for modifier in &mut decl.modifiers {
            if !self.walk(NodeMut::Modifier(modifier)) {
                return false;
            }
        }
        if let Some(generic) = &mut decl.generic {
            for param in &mut generic.type_parameters {
                if !self.walk(NodeMut::Decl(param)) {
                    return false;
                }
            }
            for constraint in &mut generic.constraints {
                for bound in &mut constraint.upper_bounds {
                    if !self.walk(NodeMut::TypeAnno(bound)) {
                        return false;
                    }
                }
            }
        }
        match &mut decl.kind {
            DeclKind::PackageSpec | DeclKind::GenericParam | DeclKind::BuiltIn => true,
            DeclKind::ImportSpec(_) => true,
            DeclKind::Var(var) => {
                if let Some(anno) = &mut var.ty_anno {
                    if !self.walk(NodeMut::TypeAnno(anno)) {
                        return false;
                    }
                }
                match &mut var.init {
                    Some(init) => self.walk(NodeMut::Expr(init)),
                    None => true,
                }
            }
            DeclKind::VarWithPattern(var) => {
                if !self.walk(NodeMut::Pattern(&mut var.pattern)) {
                    return false;
                }
                if let Some(anno) = &mut var.ty_anno {
                    if !self.walk(NodeMut::TypeAnno(anno)) {
                        return false;
                    }
                }
                match &mut var.init {
                    Some(init) => self.walk(NodeMut::Expr(init)),
                    None => true,
                }
            }
            DeclKind::Func(func) | DeclKind::PrimaryCtor(func) => {
                self.walk_func_body(&mut func.body)
            }
            DeclKind::FuncParam(param) => {
                if let Some(anno) = &mut param.ty_anno {
                    if !self.walk(NodeMut::TypeAnno(anno)) {
                        return false;
                    }
                }
                match &mut param.default_value {
                    Some(default) => self.walk(NodeMut::Expr(default)),
                    None => true,
                }
            }
            DeclKind::Prop(prop) => {
                if let Some(anno) = &mut prop.ty_anno {
                    if !self.walk(NodeMut::TypeAnno(anno)) {
                        return false;
                    }
                }
                for getter in &mut prop.getters {
                    if !self.walk(NodeMut::Decl(getter)) {
                        return false;
                    }
                }
                for setter in &mut prop.setters {
                    if !self.walk(NodeMut::Decl(setter)) {
                        return false;
                    }
                }
                true
            }
            DeclKind::Class(class) | DeclKind::Interface(class) | DeclKind::Struct(class) => {
                for super_ty in &mut class.super_types {
                    if !self.walk(NodeMut::TypeAnno(super_ty)) {
                        return false;
                    }
                }
                for member in &mut class.body {
                    if !self.walk(NodeMut::Decl(member)) {
                        return false;
                    }
                }
                true
            }
            DeclKind::Enum(e) => {
                for super_ty in &mut e.super_types {
                    if !self.walk(NodeMut::TypeAnno(super_ty)) {
                        return false;
                    }
                }
                for ctor in &mut e.constructors {
                    if !self.walk(NodeMut::Decl(ctor)) {
                        return false;
                    }
                }
                for member in &mut e.members {
                    if !self.walk(NodeMut::Decl(member)) {
                        return false;
                    }
                }
                true
            }
            DeclKind::Extend(extend) => {
                if !self.walk(NodeMut::TypeAnno(&mut extend.extended)) {
                    return false;
                }
                for iface in &mut extend.super_interfaces {
                    if !self.walk(NodeMut::TypeAnno(iface)) {
                        return false;
                    }
                }
                for member in &mut extend.body {
                    if !self.walk(NodeMut::Decl(member)) {
                        return false;
                    }
                }
                true
            }
            DeclKind::TypeAlias(alias) => self.walk(NodeMut::TypeAnno(&mut alias.ty_anno)),
            DeclKind::Macro(m) => self.walk_func_body(&mut m.body),
            DeclKind::Main(m) => self.walk_func_body(&mut m.body),
            DeclKind::MacroExpand(invocation) => match &mut invocation.decl {
                Some(expanded) => self.walk(NodeMut::Decl(expanded)),
                None => true,
            },
        }
    }

    fn walk_func_body(&mut self, body: &mut FuncBody) -> bool {
        for param in &mut body.param_list.params {
            if !self.walk(NodeMut::Decl(param)) {
                return false;
            }
        }
        if let Some(ret) = &mut body.ret_ty {
            if !self.walk(NodeMut::TypeAnno(ret)) {
                return false;
            }
        }
        match &mut body.block {
            Some(block) => self.walk_block(block),
            None => true,
        }
    }

    fn walk_block(&mut self, block: &mut Block) -> bool {
        for stmt in &mut block.stmts {
            let ok = match stmt {
                Stmt::Decl(decl) => self.walk(NodeMut::Decl(decl)),
                Stmt::Expr(expr) => self.walk(NodeMut::Expr(expr)),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn walk_expr_children(&mut self, expr: &mut Expr) -> bool {
        // An expression with a desugar is walked through the desugar; the
        // original children are not visited.
        if let Some(desugar) = &mut expr.desugar {
            return self.walk(NodeMut::Expr(desugar));
        }
        match &mut expr.kind {
            ExprKind::Ref { type_args, .. } => {
                for arg in type_args {
                    if !self.walk(NodeMut::TypeAnno(arg)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::MemberAccess {
                receiver,
                type_args,
                ..
            } => {
                if !self.walk(NodeMut::Expr(receiver)) {
                    return false;
                }
                for arg in type_args {
                    if !self.walk(NodeMut::TypeAnno(arg)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::Call { callee, args } => {
                if !self.walk(NodeMut::Expr(callee)) {
                    return false;
                }
                for arg in args {
                    if !self.walk(NodeMut::Expr(arg)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::FuncArg { expr, .. } => self.walk(NodeMut::Expr(expr)),
            ExprKind::LitConst { .. }
            | ExprKind::Jump { .. }
            | ExprKind::Quote { .. }
            | ExprKind::Wildcard
            | ExprKind::PrimitiveType { .. }
            | ExprKind::Invalid => true,
            ExprKind::StrInterpolation { parts } => {
                for part in parts {
                    if let StrPart::Interpolation(expr) = part {
                        if !self.walk(NodeMut::Expr(expr)) {
                            return false;
                        }
                    }
                }
                true
            }
            ExprKind::Unary { expr, .. }
            | ExprKind::IncOrDec { expr, .. }
            | ExprKind::Paren { expr }
            | ExprKind::Throw { expr }
            | ExprKind::Spawn { task: expr }
            | ExprKind::OptionalChain { expr }
            | ExprKind::Optional { base_expr: expr } => self.walk(NodeMut::Expr(expr)),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.walk(NodeMut::Expr(lhs)) && self.walk(NodeMut::Expr(rhs))
            }
            ExprKind::Assign { target, value, .. } => {
                self.walk(NodeMut::Expr(target)) && self.walk(NodeMut::Expr(value))
            }
            ExprKind::Range { start, end, step, .. } => {
                for part in [start, end, step].iter_mut().filter_map(|p| p.as_mut()) {
                    if !self.walk(NodeMut::Expr(part)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::Subscript { receiver, indices } => {
                if !self.walk(NodeMut::Expr(receiver)) {
                    return false;
                }
                for index in indices {
                    if !self.walk(NodeMut::Expr(index)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::TupleLit { items } | ExprKind::ArrayLit { items } => {
                for item in items {
                    if !self.walk(NodeMut::Expr(item)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::Array { size, init } => {
                for part in [size, init].iter_mut().filter_map(|p| p.as_mut()) {
                    if !self.walk(NodeMut::Expr(part)) {
                        return false;
                    }
                }
                true
            }
            ExprKind::TypeConv { target, expr } => {
                self.walk(NodeMut::TypeAnno(target)) && self.walk(NodeMut::Expr(expr))
            }
            ExprKind::Lambda { body } => self.walk_func_body(body),
            ExprKind::TrailingClosure { expr, lambda } => {
                self.walk(NodeMut::Expr(expr)) && self.walk(NodeMut::Expr(lambda))
            }
            ExprKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                if !self.walk(NodeMut::Expr(cond)) {
                    return false;
                }
                if !self.walk_block(then_block) {
                    return false;
                }
                match else_branch {
                    Some(els) => self.walk(NodeMut::Expr(els)),
                    None => true,
                }
            }
            ExprKind::Match { selector, arms } => {
                if let Some(selector) = selector {
                    if !self.walk(NodeMut::Expr(selector)) {
                        return false;
                    }
                }
                for arm in arms {
                    for pattern in &mut arm.patterns {
                        if !self.walk(NodeMut::Pattern(pattern)) {
                            return false;
                        }
                    }
                    if let Some(guard) = &mut arm.guard {
                        if !self.walk(NodeMut::Expr(guard)) {
                            return false;
                        }
                    }
                    if !self.walk_block(&mut arm.body) {
                        return false;
                    }
                }
                true
            }
            ExprKind::Try {
                block,
                catches,
                finally,
            } => {
                if !self.walk_block(block) {
                    return false;
                }
                for catch in catches {
                    if !self.walk(NodeMut::Pattern(&mut catch.pattern)) {
                        return false;
                    }
                    if !self.walk_block(&mut catch.block) {
                        return false;
                    }
                }
                match finally {
                    Some(finally) => self.walk_block(finally),
                    None => true,
                }
            }
            ExprKind::Return { expr } => match expr {
                Some(expr) => self.walk(NodeMut::Expr(expr)),
                None => true,
            },
            ExprKind::ForIn {
                pattern,
                in_expr,
                guard,
                block,
            } => {
                if !self.walk(NodeMut::Pattern(pattern)) {
                    return false;
                }
                if !self.walk(NodeMut::Expr(in_expr)) {
                    return false;
                }
                if let Some(guard) = guard {
                    if !self.walk(NodeMut::Expr(guard)) {
                        return false;
                    }
                }
                self.walk_block(block)
            }
            ExprKind::While { cond, block } => {
                self.walk(NodeMut::Expr(cond)) && self.walk_block(block)
            }
            ExprKind::DoWhile { block, cond } => {
                self.walk_block(block) && self.walk(NodeMut::Expr(cond))
            }
            ExprKind::Synchronized { mutex, block } => {
                self.walk(NodeMut::Expr(mutex)) && self.walk_block(block)
            }
            ExprKind::Is { expr, ty } | ExprKind::As { expr, ty } => {
                self.walk(NodeMut::Expr(expr)) && self.walk(NodeMut::TypeAnno(ty))
            }
            ExprKind::LetPatternDestructor {
                patterns,
                initializer,
            } => {
                for pattern in patterns {
                    if !self.walk(NodeMut::Pattern(pattern)) {
                        return false;
                    }
                }
                self.walk(NodeMut::Expr(initializer))
            }
            ExprKind::MacroExpand { invocation } => match &mut invocation.decl {
                Some(decl) => self.walk(NodeMut::Decl(decl)),
                None => true,
            },
            ExprKind::IfAvailable {
                arg,
                available,
                unavailable,
            } => {
                self.walk(NodeMut::Expr(arg))
                    && self.walk(NodeMut::Expr(available))
                    && self.walk(NodeMut::Expr(unavailable))
            }
            ExprKind::Block(block) => self.walk_block(block),
        }
    }

    fn walk_pattern_children(&mut self, pattern: &mut Pattern) -> bool {
        if let Some(desugar) = &mut pattern.desugar {
            return self.walk(NodeMut::Pattern(desugar));
        }
        match &mut pattern.kind {
            PatternKind::Const(expr) => self.walk(NodeMut::Expr(expr)),
            PatternKind::Wildcard | PatternKind::Var { .. } | PatternKind::VarOrEnum { .. } => {
                true
            }
            PatternKind::Tuple(patterns) => {
                for sub in patterns {
                    if !self.walk(NodeMut::Pattern(sub)) {
                        return false;
                    }
                }
                true
            }
            PatternKind::Type { pattern, ty } => {
                self.walk(NodeMut::Pattern(pattern)) && self.walk(NodeMut::TypeAnno(ty))
            }
            PatternKind::Enum {
                constructor,
                patterns,
            } => {
                if !self.walk(NodeMut::Expr(constructor)) {
                    return false;
                }
                for sub in patterns {
                    if !self.walk(NodeMut::Pattern(sub)) {
                        return false;
                    }
                }
                true
            }
            PatternKind::ExceptType { types, pattern } => {
                for ty in types {
                    if !self.walk(NodeMut::TypeAnno(ty)) {
                        return false;
                    }
                }
                self.walk(NodeMut::Pattern(pattern))
            }
        }
    }

    fn walk_type_children(&mut self, anno: &mut TypeAnno) -> bool {
        match &mut anno.kind {
            TypeAnnoKind::Ref { type_args, .. } => {
                for arg in type_args {
                    if !self.walk(NodeMut::TypeAnno(arg)) {
                        return false;
                    }
                }
                true
            }
            TypeAnnoKind::Paren(inner) | TypeAnnoKind::Option { inner } => {
                self.walk(NodeMut::TypeAnno(inner))
            }
            TypeAnnoKind::Func { params, ret } => {
                for param in params {
                    if !self.walk(NodeMut::TypeAnno(param)) {
                        return false;
                    }
                }
                self.walk(NodeMut::TypeAnno(ret))
            }
            TypeAnnoKind::Tuple(items) => {
                for item in items {
                    if !self.walk(NodeMut::TypeAnno(item)) {
                        return false;
                    }
                }
                true
            }
            TypeAnnoKind::This | TypeAnnoKind::Primitive(_) | TypeAnnoKind::Invalid => true,
            TypeAnnoKind::VArray { elem, size } => {
                self.walk(NodeMut::TypeAnno(elem)) && self.walk(NodeMut::Expr(size))
            }
            TypeAnnoKind::Qualified {
                qualifier,
                type_args,
                ..
            } => {
                if !self.walk(NodeMut::TypeAnno(qualifier)) {
                    return false;
                }
                for arg in type_args {
                    if !self.walk(NodeMut::TypeAnno(arg)) {
                        return false;
                    }
                }
                true
            }
            TypeAnnoKind::Constant(expr) => self.walk(NodeMut::Expr(expr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_pos::ZERO_POSITION;

    fn lit(text: &str) -> Expr {
        Expr::synthesized(ExprKind::LitConst {
            kind: LitKind::Int,
            text: text.to_string(),
        })
    }

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::synthesized(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    #[test]
    fn test_walker_ids_skip_zero() {
        let a = next_walker_id();
        let b = next_walker_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pre_order_visits_all() {
        let mut expr = binary(BinaryOp::Add, lit("1"), binary(BinaryOp::Mul, lit("2"), lit("3")));
        let mut count = 0;
        let mut walker = Walker::with_pre(|_| {
            count += 1;
            VisitAction::WalkChildren
        });
        assert!(walker.walk_expr(&mut expr));
        drop(walker);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_skip_children() {
        let mut expr = binary(BinaryOp::Add, lit("1"), binary(BinaryOp::Mul, lit("2"), lit("3")));
        let mut count = 0;
        let mut walker = Walker::with_pre(|node| {
            count += 1;
            if let NodeMut::Expr(e) = &node {
                if matches!(e.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }) {
                    return VisitAction::SkipChildren;
                }
            }
            VisitAction::WalkChildren
        });
        assert!(walker.walk_expr(&mut expr));
        drop(walker);
        // the two Mul operands are never observed
        assert_eq!(count, 3);
    }

    #[test]
    fn test_stop_now_unwinds() {
        let mut expr = binary(BinaryOp::Add, lit("1"), lit("2"));
        let mut seen_post = 0;
        let mut walker = Walker::new(
            Some(Box::new(|_| VisitAction::StopNow)),
            Some(Box::new(|_| {
                seen_post += 1;
                VisitAction::KeepDecision
            })),
        );
        assert!(!walker.walk_expr(&mut expr));
        drop(walker);
        assert_eq!(seen_post, 0);
    }

    #[test]
    fn test_same_id_skips_visited() {
        let mut expr = lit("1");
        let id = next_walker_id();
        let mut first = 0;
        let mut walker =
            Walker::with_id(id, Some(Box::new(|_| {
                // sees the node once
                VisitAction::WalkChildren
            })), None);
        walker.walk_expr(&mut expr);
        drop(walker);

        let mut walker = Walker::with_id(
            id,
            Some(Box::new(|_| {
                first += 1;
                VisitAction::WalkChildren
            })),
            None,
        );
        walker.walk_expr(&mut expr);
        drop(walker);
        assert_eq!(first, 0);
    }

    #[test]
    fn test_desugar_replaces_children() {
        // outer Paren around "1", desugared to "2": the walker must see the
        // desugar and never the original child.
        let mut paren = Expr::synthesized(ExprKind::Paren {
            expr: Box::new(lit("1")),
        });
        paren.desugar = Some(Box::new(lit("2")));

        let mut seen = vec![];
        let mut walker = Walker::with_pre(|node| {
            if let NodeMut::Expr(e) = &node {
                if let ExprKind::LitConst { text, .. } = &e.kind {
                    seen.push(text.clone());
                }
            }
            VisitAction::WalkChildren
        });
        walker.walk_expr(&mut paren);
        drop(walker);
        assert_eq!(seen, vec!["2".to_string()]);
    }

    #[test]
    fn test_modifiers_always_reentered() {
        let mut modifier = Modifier {
            base: NodeBase::new(ZERO_POSITION, ZERO_POSITION),
            kind: ModifierKind::Public,
        };
        let id = next_walker_id();
        let mut count = 0;
        for _ in 0..2 {
            let mut walker = Walker::with_id(
                id,
                Some(Box::new(|_| {
                    count += 1;
                    VisitAction::WalkChildren
                })),
                None,
            );
            walker.walk(NodeMut::Modifier(&mut modifier));
            drop(walker);
        }
        assert_eq!(count, 2);
    }
}
