//! Extension box marking and auto-boxing.
//!
//! A value type that converts to an interface through an `extend` (or a
//! `T` flowing into an `Option<T>` context) cannot carry the needed
//! vtable directly. The marker traversal flags the conversion points
//! with `NEED_AUTO_BOX`; the boxer then generates a boxed base class per
//! boxed value type, a specialised subclass per use site, and rewrites
//! the expressions through `desugar` links.

use std::cell::RefCell;
use std::collections::HashMap;

use log::debug;

use chime_pos::Range;
use chime_syntax::ast::*;
use chime_syntax::walk::{NodeMut, VisitAction, Walker};

use crate::check::TypeChecker;
use crate::symbol::SymbolKind;
use crate::types::Ty;

// _________________________________________________________________________
// marker

/// Whether converting `child` into `target` requires a box. The target
/// may carry more `Option` layers than the child; strip them before the
/// extension check (this only happens while checking generic bodies
/// before instantiation).
fn need_auto_box(
    checker: &mut TypeChecker<'_>,
    child: Option<TyId>,
    target: Option<TyId>,
    is_upcast: bool,
) -> bool {
    let (child, mut target) = match (child, target) {
        (Some(child), Some(target)) => (child, target),
        _ => return false,
    };
    while checker.manager.count_option_nested_level(child)
        < checker.manager.count_option_nested_level(target)
    {
        target = match checker.manager.option_inner(target) {
            Some(inner) => inner,
            None => break,
        };
    }
    let extended = checker.manager.has_extension_relation(child, target);
    if extended && is_upcast {
        checker.manager.record_used_extend(child, target);
    }
    extended
}

/// Downcasts from an interface selector to a class pattern always go
/// through the unbox path: the runtime instance may be a boxed subclass
/// even when no extension relation is visible statically.
pub fn must_unbox_downcast(checker: &TypeChecker<'_>, selector_ty: TyId, pattern_ty: TyId) -> bool {
    checker.manager.is_interface(selector_ty) && checker.manager.is_class(pattern_ty)
}

/// The marker walks exactly the composite positions that can hold a
/// value converting to an interface: variable declarations, assignments,
/// calls, returns, array/tuple literals, array constructions, and the
/// result positions of `match`/`if`/`while`/`try`.
pub fn mark_extend_boxes(checker: &mut TypeChecker<'_>, package: &mut Package) {
    let state = RefCell::new(MarkerState {
        checker,
        ret_stack: vec![],
    });
    let mut walker = Walker::new(
        Some(Box::new(|node| state.borrow_mut().pre(node))),
        Some(Box::new(|node| state.borrow_mut().post(node))),
    );
    walker.walk_package(package);
}

struct MarkerState<'a, 's> {
    checker: &'a mut TypeChecker<'s>,
    ret_stack: Vec<Option<TyId>>,
}

impl<'a, 's> MarkerState<'a, 's> {
    fn pre(&mut self, mut node: NodeMut<'_>) -> VisitAction {
        match &mut node {
            NodeMut::Decl(decl) => {
                if decl.func().is_some() {
                    let ret = decl
                        .symbol
                        .and_then(|s| self.checker.table.get(s).sig.as_ref().map(|sig| sig.ret));
                    self.ret_stack.push(ret);
                }
                self.mark_decl(decl);
            }
            NodeMut::Expr(expr) => self.mark_expr(expr),
            _ => {}
        }
        VisitAction::WalkChildren
    }

    fn post(&mut self, node: NodeMut<'_>) -> VisitAction {
        if let NodeMut::Decl(decl) = &node {
            if decl.func().is_some() {
                self.ret_stack.pop();
            }
        }
        VisitAction::KeepDecision
    }

    fn mark_decl(&mut self, decl: &mut Decl) {
        // `let v: I = value_of_extended_type`
        if let DeclKind::Var(var) = &decl.kind {
            let target = decl.base.ty;
            let child = var.init.as_ref().and_then(|e| e.effective_ty());
            if need_auto_box(self.checker, child, target, true) {
                decl.base.enable_attr(Attributes::NEED_AUTO_BOX);
            }
        }
    }

    fn mark_expr(&mut self, expr: &mut Expr) {
        let mut need = false;
        match &expr.kind {
            ExprKind::Assign { target, value, .. } => {
                let target_ty = target.effective_ty();
                let child = value.effective_ty();
                need = need_auto_box(self.checker, child, target_ty, true);
            }
            ExprKind::Call { args, .. } => {
                if let Some(sig) = expr
                    .target
                    .and_then(|s| self.checker.table.get(s).sig.clone())
                {
                    for (arg, param) in args.iter().zip(sig.params) {
                        if need_auto_box(self.checker, arg.effective_ty(), Some(param), true) {
                            need = true;
                        }
                    }
                }
            }
            ExprKind::Return { expr: value } => {
                let ret = self.ret_stack.last().copied().flatten();
                if let Some(value) = value {
                    need = need_auto_box(self.checker, value.effective_ty(), ret, true);
                }
            }
            ExprKind::ArrayLit { items } | ExprKind::TupleLit { items } => {
                let elem_targets: Vec<Option<TyId>> = match expr
                    .base
                    .ty
                    .map(|t| self.checker.manager.get(t).clone())
                {
                    Some(Ty::Array { elem }) => vec![Some(elem); items.len()],
                    Some(Ty::Tuple(tys)) => tys.into_iter().map(Some).collect(),
                    _ => vec![None; items.len()],
                };
                for (item, target) in items.iter().zip(elem_targets) {
                    if need_auto_box(self.checker, item.effective_ty(), target, true) {
                        need = true;
                    }
                }
            }
            ExprKind::Array { init, .. } => {
                let elem = expr.base.ty.and_then(|t| match self.checker.manager.get(t) {
                    Ty::Array { elem } => Some(*elem),
                    _ => None,
                });
                if let Some(init) = init {
                    need = need_auto_box(self.checker, init.effective_ty(), elem, true);
                }
            }
            ExprKind::If {
                then_block,
                else_branch,
                ..
            } => {
                if let Some(ty) = expr.base.ty {
                    need = self.block_needs_box(then_block, ty);
                    if let Some(els) = else_branch {
                        if need_auto_box(self.checker, els.effective_ty(), Some(ty), true) {
                            need = true;
                        }
                    }
                }
            }
            ExprKind::While { block, .. } | ExprKind::DoWhile { block, .. } => {
                if let Some(ty) = expr.base.ty {
                    need = self.block_needs_box(block, ty);
                }
            }
            ExprKind::Try { block, catches, .. } => {
                if let Some(ty) = expr.base.ty {
                    need = self.block_needs_box(block, ty);
                    for catch in catches {
                        if self.block_needs_box(&catch.block, ty) {
                            need = true;
                        }
                    }
                }
            }
            ExprKind::Match { selector, arms } => {
                if let Some(ty) = expr.base.ty {
                    for arm in arms {
                        if self.block_needs_box(&arm.body, ty) {
                            need = true;
                        }
                    }
                }
                // both cast directions on the patterns
                if let Some(selector_ty) = selector.as_ref().and_then(|s| s.effective_ty()) {
                    for arm in arms {
                        for pattern in &arm.patterns {
                            if self.type_pattern_needs_box(pattern, selector_ty) {
                                need = true;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        if need {
            expr.base.enable_attr(Attributes::NEED_AUTO_BOX);
        }
    }

    /// The block's value position (its last expression; `Unit` when it
    /// ends with a declaration) against the surrounding type.
    fn block_needs_box(&mut self, block: &Block, target: TyId) -> bool {
        let last = block
            .last_expr()
            .and_then(|e| e.effective_ty())
            .or_else(|| Some(self.checker.manager.unit_ty()));
        need_auto_box(self.checker, last, Some(target), true)
    }

    fn type_pattern_needs_box(&mut self, pattern: &Pattern, selector_ty: TyId) -> bool {
        if let PatternKind::Type { ty, .. } = &pattern.kind {
            if let Some(pattern_ty) = ty.base.ty {
                // upcast: the selector's value boxes into the pattern's
                // interface; downcast: the boxed instance unboxes back
                if need_auto_box(self.checker, Some(selector_ty), Some(pattern_ty), true) {
                    return true;
                }
                if need_auto_box(self.checker, Some(pattern_ty), Some(selector_ty), false) {
                    return true;
                }
                if must_unbox_downcast(self.checker, selector_ty, pattern_ty) {
                    return true;
                }
            }
        }
        false
    }
}

// _________________________________________________________________________
// boxer

pub struct AutoBoxer<'a, 's> {
    checker: &'a mut TypeChecker<'s>,
    /// Boxed base class per boxed value type.
    box_classes: HashMap<TyId, SymbolId>,
    /// Generated decls, appended to the package afterwards.
    generated: Vec<Decl>,
    site_counter: u32,
}

/// Run the full extension-box rewrite: assumes the marker has run.
pub fn run_auto_box(checker: &mut TypeChecker<'_>, package: &mut Package) {
    let mut boxer = AutoBoxer {
        checker,
        box_classes: HashMap::new(),
        generated: vec![],
        site_counter: 0,
    };
    boxer.rewrite_package(package);
    let generated = boxer.generated;
    if let Some(file) = package.files.first_mut() {
        file.decls.extend(generated);
    } else {
        package.source_imported_decls.extend(generated);
    }
}

impl<'a, 's> AutoBoxer<'a, 's> {
    fn rewrite_package(&mut self, package: &mut Package) {
        for file in &mut package.files {
            for decl in &mut file.decls {
                self.rewrite_decl(decl);
            }
        }
        for decl in &mut package.instantiated_decls {
            self.rewrite_decl(decl);
        }
    }

    fn rewrite_decl(&mut self, decl: &mut Decl) {
        if decl.base.has_attr(Attributes::NEED_AUTO_BOX) {
            if let DeclKind::Var(var) = &mut decl.kind {
                let target = decl.base.ty;
                let mut init = var.init.take();
                if let (Some(init_expr), Some(target)) = (&mut init, target) {
                    self.box_expr_if_needed(init_expr, target);
                }
                if let DeclKind::Var(var) = &mut decl.kind {
                    var.init = init;
                }
            }
        }
        match &mut decl.kind {
            DeclKind::Func(func) | DeclKind::PrimaryCtor(func) => {
                let ret = decl
                    .base
                    .ty
                    .and_then(|t| match self.checker.manager.get(t) {
                        Ty::Func { ret, .. } => Some(*ret),
                        _ => None,
                    });
                if let Some(block) = &mut func.body.block {
                    self.rewrite_block(block, ret);
                }
            }
            DeclKind::Main(main) => {
                let block = main.body.block.as_mut();
                if let Some(block) = block {
                    self.rewrite_block(block, None);
                }
            }
            DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
                for member in &mut c.body {
                    self.rewrite_decl(member);
                }
            }
            DeclKind::Enum(e) => {
                for member in &mut e.members {
                    self.rewrite_decl(member);
                }
            }
            DeclKind::Extend(e) => {
                for member in &mut e.body {
                    self.rewrite_decl(member);
                }
            }
            DeclKind::Var(var) => {
                if let Some(init) = &mut var.init {
                    self.rewrite_expr(init, None);
                }
            }
            _ => {}
        }
    }

    fn rewrite_block(&mut self, block: &mut Block, value_target: Option<TyId>) {
        // a block whose value position is a declaration gets a synthetic
        // Unit literal so a boxing site exists
        if value_target.is_some() && block.ends_with_decl() {
            let unit = self.checker.manager.unit_ty();
            let mut lit = Expr::synthesized(ExprKind::LitConst {
                kind: LitKind::Unit,
                text: "()".to_string(),
            });
            lit.base.ty = Some(unit);
            block.stmts.push(Stmt::Expr(lit));
        }
        let len = block.stmts.len();
        for (i, stmt) in block.stmts.iter_mut().enumerate() {
            match stmt {
                Stmt::Decl(decl) => self.rewrite_decl(decl),
                Stmt::Expr(expr) => {
                    let target = if i + 1 == len { value_target } else { None };
                    self.rewrite_expr(expr, target);
                }
            }
        }
    }

    fn rewrite_expr(&mut self, expr: &mut Expr, context_target: Option<TyId>) {
        let marked = expr.base.has_attr(Attributes::NEED_AUTO_BOX);
        let expr_target = expr.target;
        match &mut expr.kind {
            ExprKind::Call { callee, args } => {
                self.rewrite_expr(callee, None);
                let params: Vec<Option<TyId>> = expr_target
                    .and_then(|s| self.checker.table.get(s).sig.clone())
                    .map(|sig| sig.params.into_iter().map(Some).collect())
                    .unwrap_or_else(|| vec![None; args.len()]);
                for (arg, param) in args.iter_mut().zip(params) {
                    match param {
                        Some(param) if marked => {
                            self.rewrite_expr(arg, Some(param));
                            // boxing wraps the argument value, not the
                            // FuncArg shell around it
                            match &mut arg.kind {
                                ExprKind::FuncArg { expr: inner, .. } => {
                                    self.box_expr_if_needed(inner, param);
                                }
                                _ => self.box_expr_if_needed(arg, param),
                            }
                        }
                        other => self.rewrite_expr(arg, other),
                    }
                }
            }
            ExprKind::FuncArg { expr: inner, .. } => {
                self.rewrite_expr(inner, context_target);
            }
            ExprKind::Assign { target, value, .. } => {
                self.rewrite_expr(target, None);
                let target_ty = target.effective_ty();
                self.rewrite_expr(value, target_ty);
                if let Some(target_ty) = target_ty {
                    if marked {
                        self.box_expr_if_needed(value, target_ty);
                    }
                }
            }
            ExprKind::Return { expr: value } => {
                if let Some(value) = value {
                    self.rewrite_expr(value, context_target);
                    if marked {
                        if let Some(target) = context_target {
                            self.box_expr_if_needed(value, target);
                        }
                    }
                }
            }
            ExprKind::ArrayLit { items } | ExprKind::TupleLit { items } => {
                let targets: Vec<Option<TyId>> =
                    match expr.base.ty.map(|t| self.checker.manager.get(t).clone()) {
                        Some(Ty::Array { elem }) => vec![Some(elem); items.len()],
                        Some(Ty::Tuple(tys)) => tys.into_iter().map(Some).collect(),
                        _ => vec![None; items.len()],
                    };
                for (item, target) in items.iter_mut().zip(targets) {
                    self.rewrite_expr(item, target);
                    if marked {
                        if let Some(target) = target {
                            self.box_expr_if_needed(item, target);
                        }
                    }
                }
            }
            ExprKind::If {
                cond,
                then_block,
                else_branch,
            } => {
                self.rewrite_expr(cond, None);
                let value_target = if marked { expr.base.ty } else { None };
                self.rewrite_block(then_block, value_target);
                if let Some(els) = else_branch {
                    self.rewrite_expr(els, value_target);
                    if let Some(target) = value_target {
                        self.box_expr_if_needed(els, target);
                    }
                }
            }
            ExprKind::Match { selector, arms } => {
                let selector_ty = selector.as_ref().and_then(|s| s.effective_ty());
                if let Some(selector) = selector {
                    self.rewrite_expr(selector, None);
                }
                let value_target = if marked { expr.base.ty } else { None };
                for arm in arms.iter_mut() {
                    if let Some(selector_ty) = selector_ty {
                        for pattern in &mut arm.patterns {
                            self.rewrite_downcast_pattern(pattern, selector_ty, &mut arm.body);
                        }
                    }
                    self.rewrite_block(&mut arm.body, value_target);
                }
            }
            ExprKind::While { cond, block } => {
                self.rewrite_expr(cond, None);
                self.rewrite_block(block, None);
            }
            ExprKind::DoWhile { block, cond } => {
                self.rewrite_block(block, None);
                self.rewrite_expr(cond, None);
            }
            ExprKind::Try {
                block,
                catches,
                finally,
            } => {
                let value_target = if marked { expr.base.ty } else { None };
                self.rewrite_block(block, value_target);
                for catch in catches.iter_mut() {
                    self.rewrite_block(&mut catch.block, value_target);
                }
                if let Some(finally) = finally {
                    self.rewrite_block(finally, None);
                }
            }
            ExprKind::Block(block) => self.rewrite_block(block, context_target),
            ExprKind::Paren { expr: inner }
            | ExprKind::Unary { expr: inner, .. }
            | ExprKind::Throw { expr: inner }
            | ExprKind::Spawn { task: inner }
            | ExprKind::Optional { base_expr: inner }
            | ExprKind::OptionalChain { expr: inner } => self.rewrite_expr(inner, None),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.rewrite_expr(lhs, None);
                self.rewrite_expr(rhs, None);
            }
            ExprKind::MemberAccess { receiver, field, .. } => {
                self.rewrite_expr(receiver, None);
                // a static member is not reachable through a boxed
                // receiver; reject pending a language-level decision
                if let Some(member) = expr_target {
                    let is_static = self
                        .checker
                        .table
                        .get(member)
                        .attrs
                        .contains(Attributes::STATIC);
                    let receiver_boxed = receiver
                        .effective_ty()
                        .map_or(false, |t| {
                            let used = self.checker.manager.used_extends();
                            used.iter().any(|(child, _)| *child == t)
                        });
                    if is_static && receiver_boxed {
                        self.checker
                            .sess
                            .handler
                            .struct_err_with_code(
                                "sema_boxed_static_access",
                                Range::new(field.range.begin, field.range.end),
                                "static member access through a boxed value is not supported",
                                "this value was boxed for an extension conversion",
                            )
                            .emit();
                    }
                }
            }
            ExprKind::Lambda { body } => {
                let ret = body.ret_ty.as_ref().and_then(|anno| anno.base.ty);
                if let Some(block) = &mut body.block {
                    self.rewrite_block(block, ret);
                }
            }
            _ => {
                if let Some(desugar) = &mut expr.desugar {
                    self.rewrite_expr(desugar, context_target);
                }
            }
        }
        // var decls handled at the decl level; nothing else to do here
        let _ = context_target;
    }

    /// Upcast rewrite: `expr : T` in a context demanding `I` where
    /// `T <: I` through extension becomes `Box_T(expr)`.
    fn box_expr_if_needed(&mut self, expr: &mut Expr, target: TyId) {
        if expr.desugar.as_ref().map_or(false, |d| {
            matches!(d.kind, ExprKind::Call { .. }) && d.base.has_attr(Attributes::NEED_AUTO_BOX)
        }) {
            return;
        }
        let child = match expr.effective_ty() {
            Some(child) => child,
            None => return,
        };
        if !self.checker.manager.has_extension_relation(child, target) {
            return;
        }
        let box_symbol = self.boxed_base_class(child);
        let site_symbol = self.specialized_box_class(child, box_symbol);
        let box_ty = self.checker.manager.get_class_ty(site_symbol, vec![]);

        let original = expr.effective().clone();
        let mut callee = Expr::synthesized(ExprKind::Ref {
            name: Ident::synthesized(self.checker.table.get(site_symbol).name.clone()),
            type_args: vec![],
        });
        callee.target = Some(site_symbol);
        callee.base.ty = Some(box_ty);
        let mut arg = Expr::synthesized(ExprKind::FuncArg {
            name: None,
            expr: Box::new(original),
        });
        arg.base.ty = Some(child);
        let mut call = Expr::synthesized(ExprKind::Call {
            callee: Box::new(callee),
            args: vec![arg],
        });
        call.target = Some(site_symbol);
        call.base.ty = Some(box_ty);
        call.base.enable_attr(Attributes::NEED_AUTO_BOX);
        call.base.map_expr = Some(expr.base.id);
        debug!(
            "boxing value of `{}` into `{}`",
            self.checker.manager.mangle(child),
            self.checker.table.get(site_symbol).name
        );
        expr.desugar = Some(Box::new(call));
    }

    /// Downcast rewrite: `case v: T` over an interface selector becomes a
    /// binding of the boxed carrier, with `v` reading `$value` through
    /// it.
    fn rewrite_downcast_pattern(
        &mut self,
        pattern: &mut Pattern,
        selector_ty: TyId,
        body: &mut Block,
    ) {
        let (inner_symbol, pattern_ty) = match &pattern.kind {
            PatternKind::Type { pattern: inner, ty } => {
                let pattern_ty = match ty.base.ty {
                    Some(t) => t,
                    None => return,
                };
                let symbol = match &inner.kind {
                    PatternKind::Var { symbol, .. } => *symbol,
                    _ => None,
                };
                (symbol, pattern_ty)
            }
            _ => return,
        };
        let needs = self
            .checker
            .manager
            .has_extension_relation(pattern_ty, selector_ty)
            || must_unbox_downcast(self.checker, selector_ty, pattern_ty);
        if !needs {
            return;
        }
        let box_symbol = self.boxed_base_class(pattern_ty);
        let box_ty = self.checker.manager.get_class_ty(box_symbol, vec![]);

        // synthetic `$tmp: Box_T` binding
        let tmp_symbol = self.checker.table.add(
            "$tmp",
            SymbolKind::Var,
            next_node_id(),
            None,
            Attributes::COMPILER_ADD,
        );
        self.checker.table.get_mut(tmp_symbol).ty = Some(box_ty);
        let mut tmp_var = Pattern::new(
            NodeBase::synthesized(),
            PatternKind::Var {
                name: Ident::synthesized("$tmp"),
                symbol: Some(tmp_symbol),
            },
        );
        tmp_var.base.ty = Some(box_ty);
        let mut box_anno = TypeAnno::new(NodeBase::synthesized(), TypeAnnoKind::Ref {
            name: Ident::synthesized(self.checker.table.get(box_symbol).name.clone()),
            type_args: vec![],
        });
        box_anno.base.ty = Some(box_ty);
        let mut desugared = Pattern::new(
            NodeBase::synthesized(),
            PatternKind::Type {
                pattern: Box::new(tmp_var),
                ty: Box::new(box_anno),
            },
        );
        desugared.base.ty = Some(box_ty);
        pattern.desugar = Some(Box::new(desugared));
        pattern.base.enable_attr(Attributes::NEED_AUTO_BOX);

        // references to the user's binding read `$tmp.$value`
        if let Some(user_symbol) = inner_symbol {
            let value_symbol = self.box_value_field(box_symbol);
            rewrite_reads_through_box(body, user_symbol, tmp_symbol, value_symbol, pattern_ty);
        }
    }

    /// The boxed base class for a value type, created on first use:
    /// a `$value` field, a forwarding ctor, the value type's interfaces
    /// (including extension-added ones) and forwarding thunks for its
    /// public instance members.
    fn boxed_base_class(&mut self, value_ty: TyId) -> SymbolId {
        if let Some(&existing) = self.box_classes.get(&value_ty) {
            return existing;
        }
        let name = self.checker.manager.box_class_name(value_ty);
        let symbol = self.checker.table.add(
            name.clone(),
            SymbolKind::Class,
            next_node_id(),
            None,
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::NO_REFLECT_INFO,
        );
        self.checker.manager.register_nominal(symbol, &name);
        let box_ty = self.checker.manager.get_class_ty(symbol, vec![]);
        self.checker.table.get_mut(symbol).ty = Some(box_ty);
        self.checker.table.get_mut(symbol).mangled = Some(name.clone());
        self.box_classes.insert(value_ty, symbol);

        // supers: every interface the value type satisfies, plus the
        // boxed base of its super class (or Object)
        let mut supers: Vec<TyId> = vec![];
        let mut value_supers = self.checker.manager.supers_of(value_ty);
        let extension_ifaces: Vec<TyId> = {
            let key = match self.checker.manager.nominal_decl(value_ty) {
                Some(decl) => crate::types::ExtendKey::Decl(decl),
                None => crate::types::ExtendKey::Builtin(value_ty),
            };
            self.checker
                .manager
                .extends_of(key)
                .iter()
                .flat_map(|r| r.interfaces.clone())
                .collect()
        };
        let mut super_class = None;
        for super_ty in value_supers.drain(..) {
            if self.checker.manager.is_class(super_ty) {
                super_class = Some(super_ty);
            } else {
                supers.push(super_ty);
            }
        }
        for iface in extension_ifaces {
            if !supers.contains(&iface) {
                supers.push(iface);
            }
        }
        match super_class {
            Some(parent) => {
                let parent_box = self.boxed_base_class(parent);
                let parent_box_ty = self.checker.manager.get_class_ty(parent_box, vec![]);
                supers.insert(0, parent_box_ty);
            }
            None => {
                if let Some(object) = self.checker.manager.object_decl {
                    let object_ty = self.checker.manager.get_class_ty(object, vec![]);
                    supers.insert(0, object_ty);
                }
            }
        }
        self.checker.manager.set_super_tys(symbol, supers.clone());

        // the `$value` field
        let value_field = self.checker.table.add(
            "$value",
            SymbolKind::Var,
            next_node_id(),
            Some(symbol),
            Attributes::PUBLIC | Attributes::COMPILER_ADD,
        );
        self.checker.table.get_mut(value_field).ty = Some(value_ty);
        self.checker.table.get_mut(symbol).members.push(value_field);

        // the ctor taking the single value
        let ctor = self.checker.table.add(
            "init",
            SymbolKind::Func,
            next_node_id(),
            Some(symbol),
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::CONSTRUCTOR,
        );
        self.checker.table.get_mut(ctor).sig = Some(crate::symbol::FuncSig {
            params: vec![value_ty],
            ret: box_ty,
        });
        self.checker.table.get_mut(symbol).members.push(ctor);

        // forwarding thunks for the value type's public instance members
        let value_members: Vec<SymbolId> = self
            .checker
            .manager
            .nominal_decl(value_ty)
            .map(|decl| self.checker.table.get(decl).members.clone())
            .unwrap_or_default();
        for member in value_members {
            let info = self.checker.table.get(member);
            let is_instance_callable = matches!(info.kind, SymbolKind::Func | SymbolKind::Prop)
                && !info.attrs.contains(Attributes::STATIC)
                && !info.attrs.contains(Attributes::CONSTRUCTOR)
                && info.attrs.contains(Attributes::PUBLIC);
            if !is_instance_callable {
                continue;
            }
            let thunk_name = info.name.clone();
            let thunk_sig = info.sig.clone();
            let thunk_ty = info.ty;
            let thunk = self.checker.table.add(
                thunk_name,
                SymbolKind::Func,
                next_node_id(),
                Some(symbol),
                Attributes::PUBLIC | Attributes::COMPILER_ADD,
            );
            self.checker.table.get_mut(thunk).sig = thunk_sig;
            self.checker.table.get_mut(thunk).ty = thunk_ty;
            self.checker.table.get_mut(symbol).members.push(thunk);
        }

        // the AST decl so downstream passes see an ordinary class
        let mut decl = Decl::new(
            NodeBase::synthesized(),
            Ident::synthesized(name.clone()),
            DeclKind::Class(ClassLikeDecl {
                super_types: vec![],
                body: vec![],
            }),
        );
        decl.base
            .enable_attr(Attributes::COMPILER_ADD | Attributes::NO_REFLECT_INFO | Attributes::PUBLIC);
        decl.base.ty = Some(box_ty);
        decl.symbol = Some(symbol);
        decl.mangled_name = Some(name.clone());
        self.checker.table.get_mut(symbol).node = decl.base.id;
        self.generated.push(decl);
        symbol
    }

    /// A per-use-site subclass of the boxed base; it inherits the
    /// implementation and gives the checker a place for site-specific
    /// annotations.
    fn specialized_box_class(&mut self, value_ty: TyId, base: SymbolId) -> SymbolId {
        self.site_counter += 1;
        let name = format!(
            "{}_{}",
            self.checker.manager.box_class_name(value_ty),
            self.site_counter
        );
        let symbol = self.checker.table.add(
            name.clone(),
            SymbolKind::Class,
            next_node_id(),
            None,
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::NO_REFLECT_INFO,
        );
        self.checker.manager.register_nominal(symbol, &name);
        let ty = self.checker.manager.get_class_ty(symbol, vec![]);
        self.checker.table.get_mut(symbol).ty = Some(ty);
        let base_ty = self.checker.manager.get_class_ty(base, vec![]);
        self.checker.manager.set_super_tys(symbol, vec![base_ty]);

        // inherit the ctor signature
        let ctor_sig = self
            .checker
            .table
            .get(base)
            .members
            .iter()
            .copied()
            .find(|&m| self.checker.table.get(m).attrs.contains(Attributes::CONSTRUCTOR))
            .and_then(|m| self.checker.table.get(m).sig.clone());
        if let Some(mut sig) = ctor_sig {
            sig.ret = ty;
            let ctor = self.checker.table.add(
                "init",
                SymbolKind::Func,
                next_node_id(),
                Some(symbol),
                Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::CONSTRUCTOR,
            );
            self.checker.table.get_mut(ctor).sig = Some(sig);
            self.checker.table.get_mut(symbol).members.push(ctor);
        }

        let mut decl = Decl::new(
            NodeBase::synthesized(),
            Ident::synthesized(name.clone()),
            DeclKind::Class(ClassLikeDecl {
                super_types: vec![],
                body: vec![],
            }),
        );
        decl.base
            .enable_attr(Attributes::COMPILER_ADD | Attributes::NO_REFLECT_INFO | Attributes::PUBLIC);
        decl.base.ty = Some(ty);
        decl.symbol = Some(symbol);
        decl.mangled_name = Some(name);
        self.checker.table.get_mut(symbol).node = decl.base.id;
        self.generated.push(decl);
        symbol
    }

    fn box_value_field(&self, box_symbol: SymbolId) -> Option<SymbolId> {
        self.checker
            .table
            .get(box_symbol)
            .members
            .iter()
            .copied()
            .find(|&m| self.checker.table.get(m).name == "$value")
    }
}

/// Rewrite reads of `user` in a case body to `$tmp.$value`.
fn rewrite_reads_through_box(
    body: &mut Block,
    user: SymbolId,
    tmp: SymbolId,
    value_field: Option<SymbolId>,
    value_ty: TyId,
) {
    let mut walker = Walker::with_pre(|mut node| {
        if let NodeMut::Expr(expr) = &mut node {
            if expr.target == Some(user) && matches!(expr.kind, ExprKind::Ref { .. }) {
                let mut tmp_ref = Expr::synthesized(ExprKind::Ref {
                    name: Ident::synthesized("$tmp"),
                    type_args: vec![],
                });
                tmp_ref.target = Some(tmp);
                let mut access = Expr::synthesized(ExprKind::MemberAccess {
                    receiver: Box::new(tmp_ref),
                    field: Ident::synthesized("$value"),
                    type_args: vec![],
                });
                access.target = value_field;
                access.base.ty = Some(value_ty);
                access.base.map_expr = Some(expr.base.id);
                expr.desugar = Some(Box::new(access));
            }
        }
        VisitAction::WalkChildren
    });
    for stmt in &mut body.stmts {
        match stmt {
            Stmt::Decl(decl) => {
                walker.walk_decl(decl);
            }
            Stmt::Expr(expr) => {
                walker.walk_expr(expr);
            }
        }
    }
}

// _________________________________________________________________________
// option boxing

/// Wrap `expr : T` whose context demands `Option<T>` in `Option.Some`.
/// Runs once before instantiation (through `desugar` links on generic
/// code) and once after, on the instantiated copies.
pub fn run_option_box(checker: &mut TypeChecker<'_>, package: &mut Package) {
    let some_ctor = checker.some_ctor;
    let state = RefCell::new(OptionBoxState { checker, some_ctor });
    let mut walker = Walker::new(
        Some(Box::new(|node| state.borrow_mut().pre(node))),
        None,
    );
    walker.walk_package(package);
}

struct OptionBoxState<'a, 's> {
    checker: &'a mut TypeChecker<'s>,
    some_ctor: Option<SymbolId>,
}

impl<'a, 's> OptionBoxState<'a, 's> {
    fn pre(&mut self, mut node: NodeMut<'_>) -> VisitAction {
        match &mut node {
            NodeMut::Decl(decl) => {
                if let DeclKind::Var(var) = &mut decl.kind {
                    let target = decl.base.ty;
                    if let (Some(init), Some(target)) = (&mut var.init, target) {
                        self.wrap_if_option_context(init, target);
                    }
                }
            }
            NodeMut::Expr(expr) => {
                let expr_target = expr.target;
                match &mut expr.kind {
                    ExprKind::Call { args, .. } => {
                        if let Some(sig) = expr_target
                            .and_then(|s| self.checker.table.get(s).sig.clone())
                        {
                            for (arg, param) in args.iter_mut().zip(sig.params) {
                                match &mut arg.kind {
                                    ExprKind::FuncArg { expr: inner, .. } => {
                                        self.wrap_if_option_context(inner, param);
                                    }
                                    _ => self.wrap_if_option_context(arg, param),
                                }
                            }
                        }
                    }
                    ExprKind::Assign { target, value, .. } => {
                        if let Some(target_ty) = target.effective_ty() {
                            self.wrap_if_option_context(value, target_ty);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        VisitAction::WalkChildren
    }

    fn wrap_if_option_context(&mut self, expr: &mut Expr, target: TyId) {
        let child = match expr.effective_ty() {
            Some(child) => child,
            None => return,
        };
        if self.checker.manager.count_option_nested_level(child)
            >= self.checker.manager.count_option_nested_level(target)
        {
            return;
        }
        if !self.checker.manager.is_assignable(child, target) {
            return;
        }
        let inner_target = match self.checker.manager.option_inner(target) {
            Some(inner) => inner,
            None => return,
        };
        // wrap layer by layer for nested options
        self.wrap_if_option_context(expr, inner_target);

        let original = expr.effective().clone();
        let mut some_ref = Expr::synthesized(ExprKind::Ref {
            name: Ident::synthesized("Some"),
            type_args: vec![],
        });
        some_ref.target = self.some_ctor;
        some_ref.base.ty = Some(target);
        let arg_ty = original.base.ty;
        let mut arg = Expr::synthesized(ExprKind::FuncArg {
            name: None,
            expr: Box::new(original),
        });
        arg.base.ty = arg_ty;
        let mut call = Expr::synthesized(ExprKind::Call {
            callee: Box::new(some_ref),
            args: vec![arg],
        });
        call.target = self.some_ctor;
        call.base.ty = Some(target);
        call.base.map_expr = Some(expr.base.id);
        expr.desugar = Some(Box::new(call));
    }
}
