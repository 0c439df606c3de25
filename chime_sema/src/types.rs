//! Canonical semantic types.
//!
//! The type manager hash-conses every construction request: two
//! canonically equal requests return the same `TyId`, so type identity is
//! id equality everywhere downstream. The manager also owns the subtype
//! relation, generic substitution and the extension registry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use log::debug;

use chime_syntax::ast::{NodeId, PrimitiveTyKind, SymbolId, TyId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    Primitive(PrimitiveTyKind),
    Tuple(Vec<TyId>),
    Func {
        params: Vec<TyId>,
        ret: TyId,
        is_c: bool,
        has_varargs: bool,
    },
    Array {
        elem: TyId,
    },
    VArray {
        elem: TyId,
        size: u64,
    },
    Struct {
        decl: SymbolId,
        args: Vec<TyId>,
    },
    Class {
        decl: SymbolId,
        args: Vec<TyId>,
    },
    Interface {
        decl: SymbolId,
        args: Vec<TyId>,
    },
    Enum {
        decl: SymbolId,
        args: Vec<TyId>,
        is_option: bool,
    },
    Generic {
        decl: SymbolId,
    },
    Ref {
        pointee: TyId,
    },
    Closure {
        func: TyId,
    },
    CString,
    CPointer {
        pointee: TyId,
    },
    Void,
    Any,
    Invalid,
}

/// One `extend T <: I...` registration.
#[derive(Clone, Debug)]
pub struct ExtendRecord {
    pub extend_symbol: SymbolId,
    pub decl_node: NodeId,
    /// Interfaces the extension adds, in terms of the extended decl's
    /// generic parameters.
    pub interfaces: Vec<TyId>,
}

/// Keys for the extension registry: nominal decls or builtin types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtendKey {
    Decl(SymbolId),
    Builtin(TyId),
}

pub struct TypeManager {
    tys: Vec<Ty>,
    intern: HashMap<Ty, TyId>,
    /// Upper bounds of generic parameter types; populated at most once.
    generic_bounds: HashMap<TyId, Vec<TyId>>,
    /// Display names of registered nominal decls (for mangling).
    decl_names: HashMap<SymbolId, String>,
    /// Direct super types in terms of the decl's own generic parameters.
    decl_supers: HashMap<SymbolId, Vec<TyId>>,
    decl_generic_params: HashMap<SymbolId, Vec<TyId>>,
    extends: HashMap<ExtendKey, Vec<ExtendRecord>>,
    /// Conversions the box pass actually used. The marker traversal is
    /// re-entrant, so writers serialise on this mutex.
    used_extends: Mutex<BTreeMap<(TyId, TyId), SymbolId>>,
    /// The builtin `Option` enum decl, set during bootstrap.
    pub option_decl: Option<SymbolId>,
    /// The builtin `Object` root class decl.
    pub object_decl: Option<SymbolId>,
}

impl Default for TypeManager {
    fn default() -> TypeManager {
        TypeManager::new()
    }
}

impl TypeManager {
    pub fn new() -> TypeManager {
        TypeManager {
            tys: vec![],
            intern: HashMap::new(),
            generic_bounds: HashMap::new(),
            decl_names: HashMap::new(),
            decl_supers: HashMap::new(),
            decl_generic_params: HashMap::new(),
            extends: HashMap::new(),
            used_extends: Mutex::new(BTreeMap::new()),
            option_decl: None,
            object_decl: None,
        }
    }

    // _____________________________________________________________________
    // construction

    pub fn intern(&mut self, ty: Ty) -> TyId {
        if let Some(&id) = self.intern.get(&ty) {
            return id;
        }
        let id = TyId(self.tys.len() as u32);
        self.tys.push(ty.clone());
        self.intern.insert(ty, id);
        id
    }

    pub fn get(&self, id: TyId) -> &Ty {
        &self.tys[id.0 as usize]
    }

    pub fn get_primitive_ty(&mut self, kind: PrimitiveTyKind) -> TyId {
        self.intern(Ty::Primitive(kind))
    }

    pub fn unit_ty(&mut self) -> TyId {
        self.get_primitive_ty(PrimitiveTyKind::Unit)
    }

    pub fn nothing_ty(&mut self) -> TyId {
        self.get_primitive_ty(PrimitiveTyKind::Nothing)
    }

    pub fn bool_ty(&mut self) -> TyId {
        self.get_primitive_ty(PrimitiveTyKind::Bool)
    }

    pub fn int64_ty(&mut self) -> TyId {
        self.get_primitive_ty(PrimitiveTyKind::Int64)
    }

    pub fn string_ty(&mut self) -> TyId {
        self.get_primitive_ty(PrimitiveTyKind::String)
    }

    pub fn any_ty(&mut self) -> TyId {
        self.intern(Ty::Any)
    }

    pub fn invalid_ty(&mut self) -> TyId {
        self.intern(Ty::Invalid)
    }

    pub fn get_tuple_ty(&mut self, items: Vec<TyId>) -> TyId {
        self.intern(Ty::Tuple(items))
    }

    pub fn get_function_ty(
        &mut self,
        params: Vec<TyId>,
        ret: TyId,
        is_c: bool,
        has_varargs: bool,
    ) -> TyId {
        self.intern(Ty::Func {
            params,
            ret,
            is_c,
            has_varargs,
        })
    }

    pub fn get_class_ty(&mut self, decl: SymbolId, args: Vec<TyId>) -> TyId {
        self.intern(Ty::Class { decl, args })
    }

    pub fn get_interface_ty(&mut self, decl: SymbolId, args: Vec<TyId>) -> TyId {
        self.intern(Ty::Interface { decl, args })
    }

    pub fn get_struct_ty(&mut self, decl: SymbolId, args: Vec<TyId>) -> TyId {
        self.intern(Ty::Struct { decl, args })
    }

    pub fn get_enum_ty(&mut self, decl: SymbolId, args: Vec<TyId>) -> TyId {
        let is_option = self.option_decl == Some(decl);
        self.intern(Ty::Enum {
            decl,
            args,
            is_option,
        })
    }

    pub fn get_generic_ty(&mut self, decl: SymbolId) -> TyId {
        self.intern(Ty::Generic { decl })
    }

    pub fn get_option_ty(&mut self, inner: TyId) -> TyId {
        let decl = self.option_decl.expect("Option decl not bootstrapped");
        self.intern(Ty::Enum {
            decl,
            args: vec![inner],
            is_option: true,
        })
    }

    pub fn is_option(&self, ty: TyId) -> bool {
        matches!(self.get(ty), Ty::Enum { is_option: true, .. })
    }

    pub fn option_inner(&self, ty: TyId) -> Option<TyId> {
        match self.get(ty) {
            Ty::Enum {
                is_option: true,
                args,
                ..
            } => args.first().copied(),
            _ => None,
        }
    }

    /// Number of `Option` layers around a type.
    pub fn count_option_nested_level(&self, ty: TyId) -> usize {
        let mut level = 0;
        let mut cur = ty;
        while let Some(inner) = self.option_inner(cur) {
            level += 1;
            cur = inner;
        }
        level
    }

    pub fn is_interface(&self, ty: TyId) -> bool {
        matches!(self.get(ty), Ty::Interface { .. })
    }

    pub fn is_class(&self, ty: TyId) -> bool {
        matches!(self.get(ty), Ty::Class { .. })
    }

    pub fn is_invalid(&self, ty: TyId) -> bool {
        matches!(self.get(ty), Ty::Invalid)
    }

    pub fn nominal_decl(&self, ty: TyId) -> Option<SymbolId> {
        match self.get(ty) {
            Ty::Class { decl, .. }
            | Ty::Interface { decl, .. }
            | Ty::Struct { decl, .. }
            | Ty::Enum { decl, .. } => Some(*decl),
            _ => None,
        }
    }

    /// Whether values of this type are stored by value and need a box to
    /// carry a vtable.
    pub fn is_value_semantics(&self, ty: TyId) -> bool {
        matches!(
            self.get(ty),
            Ty::Primitive(_) | Ty::Struct { .. } | Ty::Enum { .. } | Ty::Tuple(_) | Ty::VArray { .. }
        )
    }

    // _____________________________________________________________________
    // decl registration

    pub fn register_nominal(&mut self, decl: SymbolId, name: &str) {
        self.decl_names.insert(decl, name.to_string());
    }

    pub fn decl_name(&self, decl: SymbolId) -> &str {
        self.decl_names.get(&decl).map(|s| s.as_str()).unwrap_or("?")
    }

    pub fn set_super_tys(&mut self, decl: SymbolId, supers: Vec<TyId>) {
        self.decl_supers.insert(decl, supers);
    }

    pub fn set_decl_generic_params(&mut self, decl: SymbolId, params: Vec<TyId>) {
        self.decl_generic_params.insert(decl, params);
    }

    pub fn decl_generic_params(&self, decl: SymbolId) -> &[TyId] {
        self.decl_generic_params
            .get(&decl)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// `GenericTy::upper_bounds` is populated at most once.
    pub fn set_upper_bounds(&mut self, generic_ty: TyId, bounds: Vec<TyId>) {
        let prev = self.generic_bounds.insert(generic_ty, bounds);
        debug_assert!(prev.is_none(), "upper bounds populated twice");
    }

    pub fn upper_bounds(&self, ty: TyId) -> &[TyId] {
        self.generic_bounds
            .get(&ty)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    // _____________________________________________________________________
    // substitution

    /// Walk the type tree replacing generic parameters per `map`.
    pub fn instantiate(&mut self, ty: TyId, map: &HashMap<TyId, TyId>) -> TyId {
        if let Some(&mapped) = map.get(&ty) {
            return mapped;
        }
        match self.get(ty).clone() {
            Ty::Tuple(items) => {
                let items = items.into_iter().map(|t| self.instantiate(t, map)).collect();
                self.intern(Ty::Tuple(items))
            }
            Ty::Func {
                params,
                ret,
                is_c,
                has_varargs,
            } => {
                let params = params.into_iter().map(|t| self.instantiate(t, map)).collect();
                let ret = self.instantiate(ret, map);
                self.intern(Ty::Func {
                    params,
                    ret,
                    is_c,
                    has_varargs,
                })
            }
            Ty::Array { elem } => {
                let elem = self.instantiate(elem, map);
                self.intern(Ty::Array { elem })
            }
            Ty::VArray { elem, size } => {
                let elem = self.instantiate(elem, map);
                self.intern(Ty::VArray { elem, size })
            }
            Ty::Struct { decl, args } => {
                let args = args.into_iter().map(|t| self.instantiate(t, map)).collect();
                self.intern(Ty::Struct { decl, args })
            }
            Ty::Class { decl, args } => {
                let args = args.into_iter().map(|t| self.instantiate(t, map)).collect();
                self.intern(Ty::Class { decl, args })
            }
            Ty::Interface { decl, args } => {
                let args = args.into_iter().map(|t| self.instantiate(t, map)).collect();
                self.intern(Ty::Interface { decl, args })
            }
            Ty::Enum {
                decl,
                args,
                is_option,
            } => {
                let args = args.into_iter().map(|t| self.instantiate(t, map)).collect();
                self.intern(Ty::Enum {
                    decl,
                    args,
                    is_option,
                })
            }
            Ty::Ref { pointee } => {
                let pointee = self.instantiate(pointee, map);
                self.intern(Ty::Ref { pointee })
            }
            Ty::Closure { func } => {
                let func = self.instantiate(func, map);
                self.intern(Ty::Closure { func })
            }
            Ty::CPointer { pointee } => {
                let pointee = self.instantiate(pointee, map);
                self.intern(Ty::CPointer { pointee })
            }
            Ty::Primitive(_)
            | Ty::Generic { .. }
            | Ty::CString
            | Ty::Void
            | Ty::Any
            | Ty::Invalid => ty,
        }
    }

    // _____________________________________________________________________
    // subtyping

    /// Direct super types of a nominal type, with the decl's generic
    /// parameters substituted by the instantiation's arguments.
    pub fn supers_of(&mut self, ty: TyId) -> Vec<TyId> {
        let (decl, args) = match self.get(ty) {
            Ty::Class { decl, args }
            | Ty::Interface { decl, args }
            | Ty::Struct { decl, args }
            | Ty::Enum { decl, args, .. } => (*decl, args.clone()),
            _ => return vec![],
        };
        let supers = match self.decl_supers.get(&decl) {
            Some(supers) => supers.clone(),
            None => return vec![],
        };
        let params = self.decl_generic_params(decl).to_vec();
        let map: HashMap<TyId, TyId> = params.into_iter().zip(args).collect();
        supers
            .into_iter()
            .map(|s| self.instantiate(s, &map))
            .collect()
    }

    /// Subtype relation with function variance, generic upper bounds and
    /// interface inheritance.
    pub fn is_subtype(&mut self, a: TyId, b: TyId) -> bool {
        if a == b {
            return true;
        }
        if matches!(self.get(a), Ty::Primitive(PrimitiveTyKind::Nothing)) {
            return true;
        }
        if matches!(self.get(b), Ty::Any) {
            return true;
        }
        match (self.get(a).clone(), self.get(b).clone()) {
            (
                Ty::Func {
                    params: pa,
                    ret: ra,
                    ..
                },
                Ty::Func {
                    params: pb,
                    ret: rb,
                    ..
                },
            ) => {
                pa.len() == pb.len()
                    && pb
                        .iter()
                        .zip(pa.iter())
                        .all(|(&b_param, &a_param)| self.is_subtype(b_param, a_param))
                    && self.is_subtype(ra, rb)
            }
            (Ty::Tuple(items_a), Ty::Tuple(items_b)) => {
                items_a.len() == items_b.len()
                    && items_a
                        .iter()
                        .zip(items_b.iter())
                        .all(|(&ia, &ib)| self.is_subtype(ia, ib))
            }
            (Ty::Generic { .. }, _) => {
                let bounds = self.upper_bounds(a).to_vec();
                bounds.into_iter().any(|bound| self.is_subtype(bound, b))
            }
            (
                Ty::Class { .. } | Ty::Struct { .. } | Ty::Enum { .. } | Ty::Interface { .. },
                Ty::Interface { .. } | Ty::Class { .. },
            ) => {
                let supers = self.supers_of(a);
                supers.into_iter().any(|s| self.is_subtype(s, b))
            }
            _ => false,
        }
    }

    /// Assignability: subtyping, plus the implicit `Some` wrap into
    /// `Option` contexts.
    pub fn is_assignable(&mut self, value: TyId, target: TyId) -> bool {
        if self.is_subtype(value, target) {
            return true;
        }
        if let Some(inner) = self.option_inner(target) {
            return self.is_assignable(value, inner);
        }
        false
    }

    /// The transitive interface closure in deterministic order (sorted by
    /// mangled name) for stable codegen.
    pub fn get_all_super_tys(&mut self, ty: TyId) -> Vec<TyId> {
        let mut seen = BTreeSet::new();
        let mut work = vec![ty];
        let mut result = vec![];
        while let Some(cur) = work.pop() {
            for super_ty in self.supers_of(cur) {
                if seen.insert(super_ty) {
                    result.push(super_ty);
                    work.push(super_ty);
                }
            }
        }
        let mut keyed: Vec<(String, TyId)> = result
            .into_iter()
            .map(|t| (self.mangle(t), t))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, t)| t).collect()
    }

    // _____________________________________________________________________
    // extensions

    pub fn register_extend(&mut self, key: ExtendKey, record: ExtendRecord) {
        debug!(
            "registering extend {:?} adding {} interfaces",
            key,
            record.interfaces.len()
        );
        self.extends.entry(key).or_default().push(record);
    }

    pub fn extends_of(&self, key: ExtendKey) -> &[ExtendRecord] {
        self.extends.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Extensions registered for a builtin (non-nominal) type.
    pub fn get_builtin_ty_extends(&self, ty: TyId) -> &[ExtendRecord] {
        self.extends_of(ExtendKey::Builtin(ty))
    }

    fn extend_key_for(&self, ty: TyId) -> ExtendKey {
        match self.nominal_decl(ty) {
            Some(decl) => ExtendKey::Decl(decl),
            None => ExtendKey::Builtin(ty),
        }
    }

    /// Whether `child` conforms to interface `target` *via an extension*
    /// (rather than via direct inheritance, which needs no box).
    pub fn has_extension_relation(&mut self, child: TyId, target: TyId) -> bool {
        if !self.is_interface(target) {
            return false;
        }
        if self.is_subtype(child, target) {
            return false;
        }
        let key = self.extend_key_for(child);
        let records: Vec<TyId> = self
            .extends_of(key)
            .iter()
            .flat_map(|r| r.interfaces.clone())
            .collect();
        let map = self.generic_arg_map(child);
        records.into_iter().any(|iface| {
            let iface = self.instantiate(iface, &map);
            iface == target || self.is_subtype(iface, target)
        })
    }

    fn generic_arg_map(&mut self, ty: TyId) -> HashMap<TyId, TyId> {
        match self.get(ty) {
            Ty::Class { decl, args }
            | Ty::Interface { decl, args }
            | Ty::Struct { decl, args }
            | Ty::Enum { decl, args, .. } => {
                let decl = *decl;
                let args = args.clone();
                self.decl_generic_params(decl)
                    .iter()
                    .copied()
                    .zip(args)
                    .collect()
            }
            _ => HashMap::new(),
        }
    }

    /// The interface instantiation an extension actually grants when
    /// `child` converts to `target`.
    pub fn get_real_extended_ty(&mut self, child: TyId, target: TyId) -> Option<TyId> {
        let key = self.extend_key_for(child);
        let interfaces: Vec<TyId> = self
            .extends_of(key)
            .iter()
            .flat_map(|r| r.interfaces.clone())
            .collect();
        let map = self.generic_arg_map(child);
        for iface in interfaces {
            let iface = self.instantiate(iface, &map);
            if iface == target || self.is_subtype(iface, target) {
                return Some(iface);
            }
        }
        None
    }

    /// Record a conversion the box pass will materialise. Multiple
    /// traversals may record concurrently during a re-entrant box pass.
    pub fn record_used_extend(&mut self, child: TyId, target: TyId) {
        let extend_symbol = {
            let key = self.extend_key_for(child);
            self.extends_of(key).first().map(|r| r.extend_symbol)
        };
        let mut used = self.used_extends.lock().unwrap();
        used.insert((child, target), extend_symbol.unwrap_or(SymbolId(u32::MAX)));
    }

    pub fn used_extends(&self) -> Vec<(TyId, TyId)> {
        self.used_extends.lock().unwrap().keys().cloned().collect()
    }

    // _____________________________________________________________________
    // mangling

    /// Deterministic mangled names; boxed classes derive theirs from the
    /// boxed value type so separate compilation units agree.
    pub fn mangle(&self, ty: TyId) -> String {
        match self.get(ty) {
            Ty::Primitive(kind) => primitive_mangle(*kind).to_string(),
            Ty::Tuple(items) => {
                let mut out = format!("T{}", items.len());
                for item in items {
                    out.push_str(&self.mangle(*item));
                }
                out
            }
            Ty::Func { params, ret, .. } => {
                let mut out = String::from("F");
                for param in params {
                    out.push_str(&self.mangle(*param));
                }
                out.push_str("R");
                out.push_str(&self.mangle(*ret));
                out.push('E');
                out
            }
            Ty::Array { elem } => format!("A{}", self.mangle(*elem)),
            Ty::VArray { elem, size } => format!("V{}{}", size, self.mangle(*elem)),
            Ty::Struct { decl, args } => self.mangle_nominal('S', *decl, args),
            Ty::Class { decl, args } => self.mangle_nominal('C', *decl, args),
            Ty::Interface { decl, args } => self.mangle_nominal('I', *decl, args),
            Ty::Enum { decl, args, .. } => self.mangle_nominal('N', *decl, args),
            Ty::Generic { decl } => {
                let name = self.decl_name(*decl);
                format!("G{}{}", name.len(), name)
            }
            Ty::Ref { pointee } => format!("P{}", self.mangle(*pointee)),
            Ty::Closure { func } => format!("L{}", self.mangle(*func)),
            Ty::CString => "cs".to_string(),
            Ty::CPointer { pointee } => format!("cp{}", self.mangle(*pointee)),
            Ty::Void => "v".to_string(),
            Ty::Any => "a".to_string(),
            Ty::Invalid => "x".to_string(),
        }
    }

    fn mangle_nominal(&self, tag: char, decl: SymbolId, args: &[TyId]) -> String {
        let name = self.decl_name(decl);
        let mut out = format!("{}{}{}", tag, name.len(), name);
        if !args.is_empty() {
            out.push('I');
            for arg in args {
                out.push_str(&self.mangle(*arg));
            }
            out.push('E');
        }
        out
    }

    /// The deterministic name of the boxed base class for a value type.
    pub fn box_class_name(&self, value_ty: TyId) -> String {
        format!("Box_{}", self.mangle(value_ty))
    }
}

fn primitive_mangle(kind: PrimitiveTyKind) -> &'static str {
    use PrimitiveTyKind::*;
    match kind {
        Int8 => "i8",
        Int16 => "i16",
        Int32 => "i32",
        Int64 => "i64",
        UInt8 => "u8",
        UInt16 => "u16",
        UInt32 => "u32",
        UInt64 => "u64",
        Float16 => "f16",
        Float32 => "f32",
        Float64 => "f64",
        Bool => "b",
        Rune => "c",
        Unit => "u",
        Nothing => "n",
        String => "s",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_syntax::ast::Attributes;

    use crate::symbol::{SymbolKind, SymbolTable};

    fn nominal(
        table: &mut SymbolTable,
        manager: &mut TypeManager,
        name: &str,
        kind: SymbolKind,
    ) -> SymbolId {
        let id = table.add(name, kind, 0, None, Attributes::empty());
        manager.register_nominal(id, name);
        id
    }

    #[test]
    fn test_hash_consing_identity() {
        let mut manager = TypeManager::new();
        let a = manager.get_tuple_ty(vec![]);
        let b = manager.get_tuple_ty(vec![]);
        assert_eq!(a, b);

        let i64a = manager.int64_ty();
        let i64b = manager.get_primitive_ty(PrimitiveTyKind::Int64);
        assert_eq!(i64a, i64b);

        let f1 = manager.get_function_ty(vec![i64a], i64a, false, false);
        let f2 = manager.get_function_ty(vec![i64b], i64b, false, false);
        assert_eq!(f1, f2);
        let f3 = manager.get_function_ty(vec![i64b], i64b, true, false);
        assert_ne!(f1, f3);
    }

    #[test]
    fn test_subtype_via_interface() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let iface = nominal(&mut table, &mut manager, "I", SymbolKind::Interface);
        let class = nominal(&mut table, &mut manager, "A", SymbolKind::Class);
        let iface_ty = manager.get_interface_ty(iface, vec![]);
        let class_ty = manager.get_class_ty(class, vec![]);
        manager.set_super_tys(class, vec![iface_ty]);

        assert!(manager.is_subtype(class_ty, iface_ty));
        assert!(!manager.is_subtype(iface_ty, class_ty));

        let nothing = manager.nothing_ty();
        assert!(manager.is_subtype(nothing, class_ty));
        let any = manager.any_ty();
        assert!(manager.is_subtype(class_ty, any));
    }

    #[test]
    fn test_function_variance() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let iface = nominal(&mut table, &mut manager, "I", SymbolKind::Interface);
        let class = nominal(&mut table, &mut manager, "A", SymbolKind::Class);
        let iface_ty = manager.get_interface_ty(iface, vec![]);
        let class_ty = manager.get_class_ty(class, vec![]);
        manager.set_super_tys(class, vec![iface_ty]);

        // (I) -> A  <:  (A) -> I : contravariant params, covariant return
        let f_sub = manager.get_function_ty(vec![iface_ty], class_ty, false, false);
        let f_super = manager.get_function_ty(vec![class_ty], iface_ty, false, false);
        assert!(manager.is_subtype(f_sub, f_super));
        assert!(!manager.is_subtype(f_super, f_sub));
    }

    #[test]
    fn test_generic_substitution() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let t_param = nominal(&mut table, &mut manager, "T", SymbolKind::GenericParam);
        let generic_ty = manager.get_generic_ty(t_param);
        let i64 = manager.int64_ty();

        let tuple = manager.get_tuple_ty(vec![generic_ty, i64]);
        let mut map = HashMap::new();
        map.insert(generic_ty, i64);
        let instantiated = manager.instantiate(tuple, &map);
        assert_eq!(manager.get(instantiated), &Ty::Tuple(vec![i64, i64]));
        // idempotent on types without generics
        assert_eq!(manager.instantiate(instantiated, &map), instantiated);
    }

    #[test]
    fn test_upper_bounds_subtype() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let iface = nominal(&mut table, &mut manager, "I", SymbolKind::Interface);
        let iface_ty = manager.get_interface_ty(iface, vec![]);
        let t_param = nominal(&mut table, &mut manager, "T", SymbolKind::GenericParam);
        let generic_ty = manager.get_generic_ty(t_param);
        manager.set_upper_bounds(generic_ty, vec![iface_ty]);

        assert!(manager.is_subtype(generic_ty, iface_ty));
    }

    #[test]
    fn test_extension_relation() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let iface = nominal(&mut table, &mut manager, "I", SymbolKind::Interface);
        let class = nominal(&mut table, &mut manager, "A", SymbolKind::Class);
        let extend = nominal(&mut table, &mut manager, "<extend A>", SymbolKind::Extend);
        let iface_ty = manager.get_interface_ty(iface, vec![]);
        let class_ty = manager.get_class_ty(class, vec![]);

        assert!(!manager.has_extension_relation(class_ty, iface_ty));
        manager.register_extend(
            ExtendKey::Decl(class),
            ExtendRecord {
                extend_symbol: extend,
                decl_node: 0,
                interfaces: vec![iface_ty],
            },
        );
        assert!(manager.has_extension_relation(class_ty, iface_ty));
        // direct inheritance never counts as an extension relation
        let class2 = nominal(&mut table, &mut manager, "B", SymbolKind::Class);
        let class2_ty = manager.get_class_ty(class2, vec![]);
        manager.set_super_tys(class2, vec![iface_ty]);
        assert!(!manager.has_extension_relation(class2_ty, iface_ty));

        manager.record_used_extend(class_ty, iface_ty);
        assert_eq!(manager.used_extends(), vec![(class_ty, iface_ty)]);
    }

    #[test]
    fn test_mangle_deterministic() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let class = nominal(&mut table, &mut manager, "A", SymbolKind::Class);
        let class_ty = manager.get_class_ty(class, vec![]);
        assert_eq!(manager.mangle(class_ty), "C1A");
        assert_eq!(manager.box_class_name(class_ty), "Box_C1A");

        let i64 = manager.int64_ty();
        let generic = manager.get_class_ty(class, vec![i64]);
        assert_eq!(manager.mangle(generic), "C1AIi64E");
    }

    #[test]
    fn test_option_nesting() {
        let mut table = SymbolTable::new();
        let mut manager = TypeManager::new();
        let option = nominal(&mut table, &mut manager, "Option", SymbolKind::Enum);
        manager.option_decl = Some(option);
        let i64 = manager.int64_ty();
        let opt = manager.get_option_ty(i64);
        let opt_opt = manager.get_option_ty(opt);
        assert_eq!(manager.count_option_nested_level(i64), 0);
        assert_eq!(manager.count_option_nested_level(opt), 1);
        assert_eq!(manager.count_option_nested_level(opt_opt), 2);
        assert!(manager.is_assignable(i64, opt_opt));
    }
}
