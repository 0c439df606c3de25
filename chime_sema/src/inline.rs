//! Inline-eligibility analysis.
//!
//! Small, `const` or frozen, source-exportable functions are marked as
//! inline candidates so the cache can ship their bodies. The analysis
//! counts body nodes in pre-order and stops early on any disqualifier.

use log::debug;

use chime_syntax::ast::*;
use chime_syntax::walk::{NodeMut, VisitAction, Walker};

use crate::check::TypeChecker;
use crate::symbol::SymbolKind;
use crate::types::Ty;

const MAX_NODE_NUMBER: usize = 32;

pub fn analyze_inline(checker: &mut TypeChecker<'_>, package: &mut Package) {
    for file in &mut package.files {
        for decl in &mut file.decls {
            analyze_decl(checker, decl);
        }
    }
    for decl in &mut package.instantiated_decls {
        analyze_decl(checker, decl);
    }
}

fn analyze_decl(checker: &mut TypeChecker<'_>, decl: &mut Decl) {
    match &mut decl.kind {
        DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
            for member in &mut c.body {
                analyze_decl(checker, member);
            }
            return;
        }
        DeclKind::Enum(e) => {
            for member in &mut e.members {
                analyze_decl(checker, member);
            }
            return;
        }
        DeclKind::Extend(e) => {
            for member in &mut e.body {
                analyze_decl(checker, member);
            }
            return;
        }
        DeclKind::Func(_) => {}
        _ => return,
    }

    let eligible = is_inline_function(&*checker, decl);
    if eligible {
        debug!("marking {} inline", decl.name.name);
        decl.is_inline = true;
        if let Some(symbol) = decl.symbol {
            checker.table.get_mut(symbol).is_inline = true;
        }
    }
}

fn can_export_for_inline(checker: &TypeChecker<'_>, decl: &Decl) -> bool {
    let symbol = match decl.symbol {
        Some(symbol) => symbol,
        None => return false,
    };
    let info = checker.table.get(symbol);
    if !info.is_exported() {
        return false;
    }
    match info.parent {
        Some(parent) => checker.table.get(parent).is_exported(),
        None => true,
    }
}

fn is_inline_function(checker: &TypeChecker<'_>, decl: &Decl) -> bool {
    if !can_export_for_inline(checker, decl) {
        return false;
    }
    // enum constructors carry no body; real constructors and main never
    // inline
    if decl.base.has_attr(Attributes::ENUM_CONSTRUCTOR)
        || decl.base.has_attr(Attributes::CONSTRUCTOR)
        || decl.base.has_attr(Attributes::MAIN_ENTRY)
    {
        return false;
    }
    if decl.base.has_attr(Attributes::FOREIGN)
        || decl.base.has_attr(Attributes::INTRINSIC)
        || decl.base.has_attr(Attributes::OPEN)
        || decl.base.has_attr(Attributes::ABSTRACT)
        || decl.base.has_attr(Attributes::GENERIC)
    {
        return false;
    }
    let func = match decl.func() {
        Some(func) => func,
        None => return false,
    };
    if !func.is_frozen && !func.is_const {
        return false;
    }
    if func.is_getter || func.is_setter {
        // accessors only inline when their property is frozen or const;
        // that state is mirrored onto the accessor during collection
        if !func.is_frozen && !func.is_const {
            return false;
        }
    }
    let block = match &func.body.block {
        Some(block) => block,
        None => return false,
    };
    count_body_nodes(checker, block, &func.body.param_list)
}

/// Pre-order count with early termination; nested lambdas and functions
/// disqualify outright, default-valued parameters are not counted.
fn count_body_nodes(
    checker: &TypeChecker<'_>,
    block: &Block,
    _params: &FuncParamList,
) -> bool {
    let mut count: usize = 0;
    let mut ok = true;
    // the walker wants mutable nodes; count over a clone of the body
    let mut body = block.clone();
    let table = &checker.table;
    let manager = &checker.manager;
    {
        let mut walker = Walker::with_pre(|node| {
            let expr = match &node {
                NodeMut::Expr(expr) => expr,
                NodeMut::Decl(decl) if matches!(decl.kind, DeclKind::Func(_)) => {
                    // a nested function disqualifies
                    ok = false;
                    return VisitAction::StopNow;
                }
                _ => return VisitAction::WalkChildren,
            };
            if count >= MAX_NODE_NUMBER {
                ok = false;
                return VisitAction::StopNow;
            }
            if expr.desugar.is_some() {
                return VisitAction::WalkChildren;
            }
            if let Some(ty) = expr.base.ty {
                if contains_internal_type(checker_view(table, manager), ty) {
                    ok = false;
                    return VisitAction::StopNow;
                }
            }
            match &expr.kind {
                ExprKind::Block(_) => VisitAction::WalkChildren,
                ExprKind::Lambda { .. } => {
                    ok = false;
                    VisitAction::StopNow
                }
                ExprKind::Ref { .. } | ExprKind::MemberAccess { .. } => {
                    if !can_count_ref(table, expr) {
                        ok = false;
                        return VisitAction::StopNow;
                    }
                    count += 1;
                    VisitAction::WalkChildren
                }
                _ => {
                    count += 1;
                    VisitAction::WalkChildren
                }
            }
        });
        for stmt in &mut body.stmts {
            let proceed = match stmt {
                Stmt::Decl(decl) => walker.walk_decl(decl),
                Stmt::Expr(expr) => walker.walk_expr(expr),
            };
            if !proceed {
                break;
            }
        }
    }
    ok
}

#[derive(Clone, Copy)]
struct CheckerView<'a> {
    table: &'a crate::symbol::SymbolTable,
    manager: &'a crate::types::TypeManager,
}

fn checker_view<'a>(
    table: &'a crate::symbol::SymbolTable,
    manager: &'a crate::types::TypeManager,
) -> CheckerView<'a> {
    CheckerView { table, manager }
}

/// A global must be exported; a static member must be public on an
/// exported decl. Instance member variables are always reachable from
/// the object.
fn can_count_ref(table: &crate::symbol::SymbolTable, expr: &Expr) -> bool {
    let target = match expr.target {
        Some(target) => target,
        None => return true,
    };
    let info = table.get(target);
    match info.kind {
        SymbolKind::Var => {
            if info.attrs.contains(Attributes::GLOBAL) && !info.is_exported() {
                return false;
            }
            if info.attrs.contains(Attributes::STATIC) {
                if let Some(parent) = info.parent {
                    if !table.get(parent).is_exported() || !info.is_exported() {
                        return false;
                    }
                }
            }
            true
        }
        SymbolKind::Func => {
            if info.attrs.contains(Attributes::INTRINSIC) {
                return true;
            }
            if info.attrs.contains(Attributes::FOREIGN) {
                return false;
            }
            if !info.is_exported() {
                return false;
            }
            match info.parent {
                Some(parent) => table.get(parent).is_exported(),
                None => true,
            }
        }
        _ => true,
    }
}

/// A type is internal when its decl is neither exported nor generic, or
/// any of its arguments is.
fn contains_internal_type(view: CheckerView<'_>, ty: TyId) -> bool {
    match view.manager.get(ty) {
        Ty::Invalid => true,
        Ty::Class { decl, args }
        | Ty::Interface { decl, args }
        | Ty::Struct { decl, args }
        | Ty::Enum { decl, args, .. } => {
            let info = view.table.get(*decl);
            if !info.is_exported()
                && !info.attrs.contains(Attributes::GENERIC)
                && !info.attrs.contains(Attributes::COMPILER_ADD)
            {
                return true;
            }
            args.iter()
                .any(|&a| contains_internal_type(view, a))
        }
        Ty::Tuple(items) => items
            .iter()
            .any(|&a| contains_internal_type(view, a)),
        Ty::Func { params, ret, .. } => {
            params
                .iter()
                .any(|&a| contains_internal_type(view, a))
                || contains_internal_type(view, *ret)
        }
        Ty::Array { elem } | Ty::VArray { elem, .. } => {
            contains_internal_type(view, *elem)
        }
        _ => false,
    }
}
