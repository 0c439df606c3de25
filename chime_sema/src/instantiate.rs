//! Generic instantiation.
//!
//! Every generic declaration gets a monomorphic copy per distinct
//! instantiation: the post-check AST is walked for use sites supplying
//! concrete type arguments, the keys are canonicalised, the decl's tree
//! is cloned deeply (fresh node identities, `map_expr` back-pointers to
//! the originals) and re-checked with the parameters bound. Abstract
//! member targets are then re-bound to the concrete receiver's
//! implementations through its supers and extension set.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use chime_syntax::ast::*;
use chime_syntax::walk::{NodeMut, VisitAction, Walker};

use crate::check::TypeChecker;
use crate::symbol::SymbolKind;
use crate::types::ExtendKey;

/// One materialised instantiation request.
#[derive(Clone, Debug)]
struct InstantiationKey {
    decl: SymbolId,
    args: Vec<TyId>,
}

pub fn instantiate_package(checker: &mut TypeChecker<'_>, package: &mut Package) {
    let keys = collect_instantiation_keys(checker, package);
    debug!("instantiating {} generic uses", keys.len());
    let mut produced = vec![];
    for key in keys {
        if let Some(clone) = instantiate_one(checker, &*package, &key) {
            produced.push(clone);
        }
    }
    package.instantiated_decls.extend(produced);

    for decl in &mut package.instantiated_decls {
        record_instantiated_extends(checker, decl);
    }
}

/// Walk the post-check AST collecting every use site that supplies
/// concrete type arguments for a generic decl; keys are canonicalised by
/// `(decl, tuple-of-arg-tys)`.
fn collect_instantiation_keys(
    checker: &mut TypeChecker<'_>,
    package: &mut Package,
) -> Vec<InstantiationKey> {
    let mut seen: BTreeSet<(SymbolId, Vec<TyId>)> = BTreeSet::new();
    let generic_args_at = checker.generic_args_at.clone();
    let generic_symbols: BTreeSet<SymbolId> = checker
        .table
        .iter()
        .filter(|info| !info.generic_params.is_empty())
        .map(|info| info.id)
        .collect();

    let mut walker = Walker::with_pre(|node| {
        if let NodeMut::Expr(expr) = &node {
            if let Some(target) = expr.target {
                if generic_symbols.contains(&target) {
                    if let Some(args) = generic_args_at.get(&expr.base.id) {
                        seen.insert((target, args.clone()));
                    }
                }
            }
        }
        VisitAction::WalkChildren
    });
    walker.walk_package(package);
    drop(walker);

    // only fully concrete argument tuples are materialised; partially
    // generic ones appear again after their enclosing decl instantiates
    seen.retain(|(_, args)| {
        args.iter().all(|&a| {
            !matches!(
                checker.manager.get(a),
                crate::types::Ty::Generic { .. } | crate::types::Ty::Invalid
            )
        })
    });

    seen.into_iter()
        .map(|(decl, args)| InstantiationKey { decl, args })
        .collect()
}

fn instantiate_one(
    checker: &mut TypeChecker<'_>,
    package: &Package,
    key: &InstantiationKey,
) -> Option<Decl> {
    let node = checker.table.get(key.decl).node;
    let original = find_decl(package, node)?;
    let generic = original.generic.clone()?;

    let mut clone = original.clone();
    refresh_clone(&mut clone);
    clone.generic = None;
    clone.base.attrs.remove(Attributes::GENERIC);
    clone.base.enable_attr(Attributes::COMPILER_ADD);
    let arg_mangle: Vec<String> = key
        .args
        .iter()
        .map(|&a| checker.manager.mangle(a))
        .collect();
    clone.name = Ident::synthesized(format!("{}${}", clone.name.name, arg_mangle.join("_")));
    debug!("instantiating {} as {}", original.name.name, clone.name.name);

    // bind the type parameters to the concrete arguments and re-run the
    // checker on the clone so targets re-bind and types re-compute
    checker.push_instantiation_scope(&generic, &key.args);
    checker.collect_decl(&mut clone, None, None);
    checker.recheck_decl(&mut clone);
    checker.pop_instantiation_scope();

    Some(clone)
}

fn find_decl<'p>(package: &'p Package, node: NodeId) -> Option<&'p Decl> {
    for file in &package.files {
        for decl in &file.decls {
            if decl.base.id == node {
                return Some(decl);
            }
            let members: &[Decl] = match &decl.kind {
                DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => &c.body,
                DeclKind::Enum(e) => &e.members,
                DeclKind::Extend(e) => &e.body,
                _ => &[],
            };
            for member in members {
                if member.base.id == node {
                    return Some(member);
                }
            }
        }
    }
    None
}

/// A cloned tree must have unique identities: fresh node ids (with
/// `map_expr` pointing back at the source node), cleared walk memos,
/// types, symbols and desugars, so the re-check rebinds everything.
pub fn refresh_clone(decl: &mut Decl) {
    let mut walker = Walker::with_pre(|mut node| {
        if let NodeMut::Expr(expr) = &mut node {
            expr.desugar = None;
            expr.target = None;
        }
        if let NodeMut::Pattern(pattern) = &mut node {
            pattern.desugar = None;
            if let PatternKind::Var { symbol, .. } = &mut pattern.kind {
                *symbol = None;
            }
        }
        if let NodeMut::Decl(decl) = &mut node {
            decl.symbol = None;
            decl.mangled_name = None;
            decl.export_id = None;
        }
        let base = node.base_mut();
        base.map_expr = Some(base.id);
        base.id = next_node_id();
        base.visited_by = 0;
        base.ty = None;
        base.attrs.remove(Attributes::NEED_AUTO_BOX);
        VisitAction::WalkChildren
    });
    walker.walk_decl(decl);
}

/// For each member access on a formerly generic receiver, choose the
/// concrete implementation: match the abstract member's signature
/// against what the receiver inherits through its super classes and
/// extension set, preferring an implementation whose declaring decl's
/// inherited-type set lies within the static upper bound of the
/// constraint the call was made through.
fn record_instantiated_extends(checker: &mut TypeChecker<'_>, decl: &mut Decl) {
    struct Rebind {
        node: NodeId,
        new_target: SymbolId,
    }
    let mut rebinds: Vec<Rebind> = vec![];
    {
        let table = &checker.table;
        let manager = std::cell::RefCell::new(&mut checker.manager);
        let mut walker = Walker::with_pre(|mut node| {
            if let NodeMut::Expr(expr) = &mut node {
                if let ExprKind::MemberAccess { receiver, field, .. } = &expr.kind {
                    let target = match expr.target {
                        Some(t) => t,
                        None => return VisitAction::WalkChildren,
                    };
                    let target_info = table.get(target);
                    let declared_in_interface = target_info
                        .parent
                        .map_or(false, |p| table.get(p).kind == SymbolKind::Interface);
                    if !declared_in_interface {
                        return VisitAction::WalkChildren;
                    }
                    let receiver_ty = match receiver.effective_ty() {
                        Some(t) => t,
                        None => return VisitAction::WalkChildren,
                    };
                    let mut manager = manager.borrow_mut();
                    let receiver_decl = match manager.nominal_decl(receiver_ty) {
                        Some(d) => d,
                        None => return VisitAction::WalkChildren,
                    };
                    // candidates: the receiver's own members plus those
                    // added by its extensions
                    let mut candidates: Vec<SymbolId> = table
                        .get(receiver_decl)
                        .members
                        .iter()
                        .copied()
                        .filter(|&m| table.get(m).name == field.name)
                        .collect();
                    for record in manager.extends_of(ExtendKey::Decl(receiver_decl)) {
                        candidates.extend(
                            table
                                .get(record.extend_symbol)
                                .members
                                .iter()
                                .copied()
                                .filter(|&m| table.get(m).name == field.name),
                        );
                    }
                    let wanted_sig = target_info.sig.clone();
                    let upper_bound = manager.upper_bounds(receiver_ty).first().copied();
                    let mut chosen: Option<SymbolId> = None;
                    for candidate in candidates {
                        if candidate == target {
                            continue;
                        }
                        let info = table.get(candidate);
                        let sig_matches = match (&wanted_sig, &info.sig) {
                            (Some(a), Some(b)) => a.params.len() == b.params.len(),
                            (None, _) => true,
                            _ => false,
                        };
                        if !sig_matches {
                            continue;
                        }
                        // prefer the impl whose declaring decl sits under
                        // the constraint's upper bound
                        let preferred = match (upper_bound, info.parent) {
                            (Some(bound), Some(parent)) => {
                                let parent_ty = table.get(parent).ty;
                                parent_ty.map_or(false, |t| manager.is_subtype(t, bound))
                            }
                            _ => true,
                        };
                        if chosen.is_none() || preferred {
                            chosen = Some(candidate);
                        }
                    }
                    if let Some(new_target) = chosen {
                        rebinds.push(Rebind {
                            node: expr.base.id,
                            new_target,
                        });
                    }
                }
            }
            VisitAction::WalkChildren
        });
        walker.walk_decl(decl);
    }

    if rebinds.is_empty() {
        return;
    }
    let by_node: HashMap<NodeId, SymbolId> =
        rebinds.into_iter().map(|r| (r.node, r.new_target)).collect();
    let mut walker = Walker::with_pre(|mut node| {
        if let NodeMut::Expr(expr) = &mut node {
            if let Some(&new_target) = by_node.get(&expr.base.id) {
                expr.target = Some(new_target);
            }
        }
        VisitAction::WalkChildren
    });
    walker.walk_decl(decl);
}
