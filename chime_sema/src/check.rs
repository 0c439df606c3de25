//! The type checker.
//!
//! A multi-pass traversal over the AST: a collection pass creates symbols
//! and scopes, a signature pass resolves declared types, and a body pass
//! infers and checks expression types, resolves names and performs the
//! desugarings (let-pattern conditions, optional chains, interpolation,
//! trailing closures, compound assignment).
//!
//! Unrecoverable local errors mark the node `IS_BROKEN` (and the
//! enclosing decl `HAS_BROKEN`) and checking continues so downstream
//! errors are still reported; later passes guard on `ty` validity.

use std::collections::HashMap;

use log::debug;

use chime_pos::Range;
use chime_syntax::ast::*;
use chime_syntax::parse::ParseSess;

use crate::pset::PSet;
use crate::symbol::{FuncSig, SymbolKind, SymbolTable};
use crate::types::{ExtendKey, ExtendRecord, Ty, TypeManager};

pub struct TypeChecker<'a> {
    pub sess: &'a ParseSess,
    pub table: SymbolTable,
    pub manager: TypeManager,
    /// Lexical scopes: name to candidate symbols, innermost last.
    scopes: Vec<HashMap<String, Vec<SymbolId>>>,
    /// The speculative visibility set. Tentative branches `commit`
    /// beforehand and `reset`/`stash` depending on the outcome.
    pub visible: PSet<SymbolId>,
    /// Stack of enclosing declaration node ids for `outer_decl` links.
    decl_stack: Vec<NodeId>,
    /// Stack of enclosing nominal symbol for `this` resolution.
    self_stack: Vec<SymbolId>,
    /// Expected return types of enclosing functions.
    ret_stack: Vec<TyId>,
    pub package_name: String,
    /// Concrete type arguments inferred at each generic use site, keyed
    /// by the referencing node; consumed by the instantiator.
    pub generic_args_at: HashMap<NodeId, Vec<TyId>>,
    /// Builtin symbols created by bootstrap.
    pub some_ctor: Option<SymbolId>,
    pub none_ctor: Option<SymbolId>,
    string_builder: Option<SymbolId>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(sess: &'a ParseSess, package_name: &str) -> TypeChecker<'a> {
        let mut checker = TypeChecker {
            sess,
            table: SymbolTable::new(),
            manager: TypeManager::new(),
            scopes: vec![HashMap::new()],
            visible: PSet::new(),
            decl_stack: vec![],
            self_stack: vec![],
            ret_stack: vec![],
            package_name: package_name.to_string(),
            generic_args_at: HashMap::new(),
            some_ctor: None,
            none_ctor: None,
            string_builder: None,
        };
        checker.bootstrap_core();
        checker
    }

    /// Create the builtin decls every package sees: `Object`, `Option`
    /// with its two constructors, and the runtime string builder.
    fn bootstrap_core(&mut self) {
        let object = self.table.add(
            "Object",
            SymbolKind::Class,
            0,
            None,
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::OPEN,
        );
        self.manager.register_nominal(object, "Object");
        self.manager.object_decl = Some(object);
        self.declare("Object", object);

        let option = self.table.add(
            "Option",
            SymbolKind::Enum,
            0,
            None,
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::GENERIC,
        );
        self.manager.register_nominal(option, "Option");
        self.manager.option_decl = Some(option);
        let t_param = self.table.add(
            "T",
            SymbolKind::GenericParam,
            0,
            Some(option),
            Attributes::COMPILER_ADD,
        );
        self.manager.register_nominal(t_param, "T");
        let t_ty = self.manager.get_generic_ty(t_param);
        self.manager.set_decl_generic_params(option, vec![t_ty]);
        self.table.get_mut(option).generic_params = vec![t_param];
        let option_ty = self.manager.get_option_ty(t_ty);

        let some = self.table.add(
            "Some",
            SymbolKind::EnumCtor,
            0,
            Some(option),
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::ENUM_CONSTRUCTOR,
        );
        let some_sig = FuncSig {
            params: vec![t_ty],
            ret: option_ty,
        };
        self.table.get_mut(some).sig = Some(some_sig);
        let none = self.table.add(
            "None",
            SymbolKind::EnumCtor,
            0,
            Some(option),
            Attributes::PUBLIC | Attributes::COMPILER_ADD | Attributes::ENUM_CONSTRUCTOR,
        );
        self.table.get_mut(none).ty = Some(option_ty);
        self.table.get_mut(option).members = vec![some, none];
        self.declare("Option", option);
        self.declare("Some", some);
        self.declare("None", none);
        self.some_ctor = Some(some);
        self.none_ctor = Some(none);

        let builder = self.table.add(
            "$StringBuilder",
            SymbolKind::BuiltIn,
            0,
            None,
            Attributes::COMPILER_ADD,
        );
        self.string_builder = Some(builder);
    }

    // _____________________________________________________________________
    // scopes

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        let frame = self.scopes.pop().expect("scope underflow");
        for ids in frame.values() {
            for id in ids {
                self.visible.erase(id);
            }
        }
    }

    fn declare(&mut self, name: &str, symbol: SymbolId) {
        self.scopes
            .last_mut()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(symbol);
        self.visible.insert(symbol);
    }

    /// All candidates for a name, innermost scope first; invisible
    /// symbols (stashed away by a speculative branch) are skipped.
    fn lookup_all(&self, name: &str) -> Vec<SymbolId> {
        let mut out = vec![];
        for frame in self.scopes.iter().rev() {
            if let Some(ids) = frame.get(name) {
                for &id in ids.iter().rev() {
                    if self.visible.contains(&id) {
                        out.push(id);
                    }
                }
                if !out.is_empty() {
                    break;
                }
            }
        }
        out
    }

    fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.lookup_all(name).into_iter().next()
    }

    // _____________________________________________________________________
    // entry

    pub fn check_package(&mut self, package: &mut Package) {
        debug!("checking package {}", package.name);
        for file in &mut package.files {
            for decl in &mut file.decls {
                decl.base.enable_attr(Attributes::GLOBAL);
                self.collect_decl(decl, None, None);
            }
        }
        for file in &mut package.files {
            for decl in &mut file.decls {
                self.resolve_signature(decl);
            }
        }
        for file in &mut package.files {
            for decl in &mut file.decls {
                self.check_decl_body(decl);
            }
        }
    }

    /// Re-run name/type binding over an instantiated clone.
    pub fn recheck_decl(&mut self, decl: &mut Decl) {
        self.resolve_signature(decl);
        self.check_decl_body(decl);
    }

    /// Bind generic parameter names to concrete types for the re-check of
    /// an instantiated clone. The visibility delta is speculative: it is
    /// committed before and merged away after.
    pub fn push_instantiation_scope(&mut self, generic: &Generic, args: &[TyId]) {
        self.push_scope();
        self.visible.commit();
        for (param, &arg) in generic.type_parameters.iter().zip(args) {
            let alias = self.table.add(
                param.name.name.clone(),
                SymbolKind::TypeAlias,
                param.base.id,
                None,
                Attributes::COMPILER_ADD,
            );
            self.table.get_mut(alias).ty = Some(arg);
            self.declare(&param.name.name.clone(), alias);
        }
    }

    pub fn pop_instantiation_scope(&mut self) {
        self.visible.reset_soft();
        self.pop_scope();
    }

    // _____________________________________________________________________
    // pass 1: collection

    pub fn collect_decl(
        &mut self,
        decl: &mut Decl,
        parent: Option<SymbolId>,
        parent_node: Option<NodeId>,
    ) {
        decl.base.outer_decl = parent_node;
        let kind = match &decl.kind {
            DeclKind::Var(_) | DeclKind::VarWithPattern(_) => SymbolKind::Var,
            DeclKind::Func(_) | DeclKind::PrimaryCtor(_) => SymbolKind::Func,
            DeclKind::FuncParam(_) => SymbolKind::Param,
            DeclKind::Prop(_) => SymbolKind::Prop,
            DeclKind::Class(_) => SymbolKind::Class,
            DeclKind::Interface(_) => SymbolKind::Interface,
            DeclKind::Struct(_) => SymbolKind::Struct,
            DeclKind::Enum(_) => SymbolKind::Enum,
            DeclKind::Extend(_) => SymbolKind::Extend,
            DeclKind::TypeAlias(_) => SymbolKind::TypeAlias,
            DeclKind::Macro(_) => SymbolKind::Macro,
            DeclKind::Main(_) => SymbolKind::Main,
            DeclKind::GenericParam => SymbolKind::GenericParam,
            DeclKind::BuiltIn => SymbolKind::BuiltIn,
            DeclKind::PackageSpec | DeclKind::ImportSpec(_) | DeclKind::MacroExpand(_) => return,
        };
        // `@Frozen` marks a callable inline-stable
        let frozen = decl
            .annotations
            .iter()
            .any(|a| a.kind == AnnotationKind::Frozen);
        if frozen {
            match &mut decl.kind {
                DeclKind::Func(func) | DeclKind::PrimaryCtor(func) => func.is_frozen = true,
                DeclKind::Prop(prop) => prop.is_frozen = true,
                _ => {}
            }
        }
        let symbol = self.table.add(
            decl.name.name.clone(),
            kind,
            decl.base.id,
            parent,
            decl.base.attrs,
        );
        decl.symbol = Some(symbol);
        decl.mangled_before_sema = Some(self.mangle_before_sema(decl, parent));
        self.table.get_mut(symbol).mangled_before_sema = decl.mangled_before_sema.clone();
        if kind.is_nominal() {
            self.manager.register_nominal(symbol, &decl.name.name);
        }
        if let Some(p) = parent {
            self.table.get_mut(p).members.push(symbol);
        }
        self.declare(&decl.name.name.clone(), symbol);

        // generic parameters
        if let Some(generic) = &mut decl.generic {
            let mut param_tys = vec![];
            let mut param_ids = vec![];
            for param in &mut generic.type_parameters {
                let param_symbol = self.table.add(
                    param.name.name.clone(),
                    SymbolKind::GenericParam,
                    param.base.id,
                    Some(symbol),
                    param.base.attrs,
                );
                param.symbol = Some(param_symbol);
                param.base.outer_decl = Some(decl.base.id);
                self.manager.register_nominal(param_symbol, &param.name.name);
                param_tys.push(self.manager.get_generic_ty(param_symbol));
                param_ids.push(param_symbol);
            }
            self.manager.set_decl_generic_params(symbol, param_tys);
            self.table.get_mut(symbol).generic_params = param_ids;
        }

        // member declarations
        let node_id = decl.base.id;
        match &mut decl.kind {
            DeclKind::Class(body) | DeclKind::Interface(body) | DeclKind::Struct(body) => {
                let mut members = std::mem::take(&mut body.body);
                for member in &mut members {
                    self.collect_decl(member, Some(symbol), Some(node_id));
                }
                match &mut decl.kind {
                    DeclKind::Class(b) | DeclKind::Interface(b) | DeclKind::Struct(b) => {
                        b.body = members;
                    }
                    _ => unreachable!(),
                }
            }
            DeclKind::Enum(e) => {
                let mut ctors = std::mem::take(&mut e.constructors);
                let mut members = std::mem::take(&mut e.members);
                for ctor in &mut ctors {
                    self.collect_decl(ctor, Some(symbol), Some(node_id));
                    if let Some(ctor_symbol) = ctor.symbol {
                        let info = self.table.get_mut(ctor_symbol);
                        info.kind = SymbolKind::EnumCtor;
                        info.attrs |= Attributes::ENUM_CONSTRUCTOR;
                    }
                }
                for member in &mut members {
                    self.collect_decl(member, Some(symbol), Some(node_id));
                }
                if let DeclKind::Enum(e) = &mut decl.kind {
                    e.constructors = ctors;
                    e.members = members;
                }
            }
            DeclKind::Extend(extend) => {
                let mut members = std::mem::take(&mut extend.body);
                for member in &mut members {
                    self.collect_decl(member, Some(symbol), Some(node_id));
                }
                if let DeclKind::Extend(extend) = &mut decl.kind {
                    extend.body = members;
                }
            }
            DeclKind::Prop(prop) => {
                let prop_frozen = prop.is_frozen;
                let prop_const = prop.is_const;
                let mut getters = std::mem::take(&mut prop.getters);
                let mut setters = std::mem::take(&mut prop.setters);
                for accessor in getters.iter_mut().chain(setters.iter_mut()) {
                    // accessors mirror their property's frozen/const state
                    if let Some(func) = accessor.func_mut() {
                        func.is_frozen |= prop_frozen;
                        func.is_const |= prop_const;
                        func.prop_decl = Some(node_id);
                    }
                    self.collect_decl(accessor, Some(symbol), Some(node_id));
                    if let Some(acc_symbol) = accessor.symbol {
                        self.table.get_mut(acc_symbol).attrs |= Attributes::COMPILER_ADD;
                    }
                }
                if let DeclKind::Prop(prop) = &mut decl.kind {
                    prop.getters = getters;
                    prop.setters = setters;
                }
            }
            _ => {}
        }
    }

    fn mangle_before_sema(&self, decl: &Decl, parent: Option<SymbolId>) -> String {
        let mut out = self.package_name.clone();
        if let Some(parent) = parent {
            out.push_str("::");
            out.push_str(&self.table.get(parent).name);
        }
        out.push_str("::");
        out.push_str(&decl.name.name);
        if let Some(func) = decl.func() {
            out.push_str(&format!("/{}", func.body.param_list.params.len()));
        }
        out
    }

    // _____________________________________________________________________
    // pass 2: signatures

    pub fn resolve_signature(&mut self, decl: &mut Decl) {
        let symbol = match decl.symbol {
            Some(symbol) => symbol,
            None => return,
        };

        // generic constraints populate upper bounds, at most once
        if let Some(generic) = &mut decl.generic {
            let mut constraints = std::mem::take(&mut generic.constraints);
            let type_params: Vec<(String, SymbolId)> = generic
                .type_parameters
                .iter()
                .filter_map(|p| p.symbol.map(|s| (p.name.name.clone(), s)))
                .collect();
            for constraint in &mut constraints {
                let bounds: Vec<TyId> = {
                    let mut bounds = vec![];
                    for anno in &mut constraint.upper_bounds {
                        bounds.push(self.resolve_type_anno(anno));
                    }
                    bounds
                };
                if let Some((_, param_symbol)) = type_params
                    .iter()
                    .find(|(name, _)| *name == constraint.type_param.name)
                {
                    let generic_ty = self.manager.get_generic_ty(*param_symbol);
                    if self.manager.upper_bounds(generic_ty).is_empty() {
                        self.manager.set_upper_bounds(generic_ty, bounds);
                    }
                }
            }
            if let Some(generic) = &mut decl.generic {
                generic.constraints = constraints;
            }
        }

        match &mut decl.kind {
            DeclKind::Var(var) => {
                let mut anno = var.ty_anno.take();
                let ty = anno.as_mut().map(|anno| self.resolve_type_anno(anno));
                if let DeclKind::Var(var) = &mut decl.kind {
                    var.ty_anno = anno;
                }
                if let Some(ty) = ty {
                    self.set_decl_ty(decl, symbol, ty);
                }
            }
            DeclKind::Func(_) | DeclKind::PrimaryCtor(_) => {
                let ty = self.resolve_func_signature(decl, symbol);
                self.set_decl_ty(decl, symbol, ty);
            }
            DeclKind::Main(_) => {
                let unit = self.manager.unit_ty();
                let int64 = self.manager.int64_ty();
                let ty = self.manager.get_function_ty(vec![], int64, false, false);
                let _ = unit;
                self.set_decl_ty(decl, symbol, ty);
            }
            DeclKind::Class(_) | DeclKind::Interface(_) | DeclKind::Struct(_) => {
                let args: Vec<TyId> = self.manager.decl_generic_params(symbol).to_vec();
                let ty = match decl.kind {
                    DeclKind::Class(_) => self.manager.get_class_ty(symbol, args),
                    DeclKind::Interface(_) => self.manager.get_interface_ty(symbol, args),
                    _ => self.manager.get_struct_ty(symbol, args),
                };
                self.set_decl_ty(decl, symbol, ty);

                let supers = self.resolve_super_annos(decl);
                self.manager.set_super_tys(symbol, supers);
                self.resolve_member_signatures(decl);
            }
            DeclKind::Enum(_) => {
                let args: Vec<TyId> = self.manager.decl_generic_params(symbol).to_vec();
                let ty = self.manager.get_enum_ty(symbol, args);
                self.set_decl_ty(decl, symbol, ty);
                let supers = self.resolve_super_annos(decl);
                self.manager.set_super_tys(symbol, supers);

                // enum constructors: nullary ones have the enum type,
                // applied ones a function type into it
                if let DeclKind::Enum(e) = &mut decl.kind {
                    let mut ctors = std::mem::take(&mut e.constructors);
                    for ctor in &mut ctors {
                        let ctor_symbol = match ctor.symbol {
                            Some(s) => s,
                            None => continue,
                        };
                        let params = self.resolve_param_annos(ctor);
                        if params.is_empty() {
                            self.table.get_mut(ctor_symbol).ty = Some(ty);
                            ctor.base.ty = Some(ty);
                        } else {
                            let sig = FuncSig { params, ret: ty };
                            let func_ty = self.manager.get_function_ty(
                                sig.params.clone(),
                                sig.ret,
                                false,
                                false,
                            );
                            self.table.get_mut(ctor_symbol).sig = Some(sig);
                            self.table.get_mut(ctor_symbol).ty = Some(func_ty);
                            ctor.base.ty = Some(func_ty);
                        }
                    }
                    if let DeclKind::Enum(e) = &mut decl.kind {
                        e.constructors = ctors;
                    }
                    self.resolve_member_signatures(decl);
                }
            }
            DeclKind::Extend(_) => {
                self.resolve_extend_signature(decl, symbol);
            }
            DeclKind::TypeAlias(alias) => {
                let mut anno = std::mem::replace(
                    &mut alias.ty_anno,
                    Box::new(TypeAnno::new(NodeBase::synthesized(), TypeAnnoKind::Invalid)),
                );
                let ty = self.resolve_type_anno(&mut anno);
                if let DeclKind::TypeAlias(alias) = &mut decl.kind {
                    alias.ty_anno = anno;
                }
                self.set_decl_ty(decl, symbol, ty);
            }
            _ => {}
        }
    }

    fn set_decl_ty(&mut self, decl: &mut Decl, symbol: SymbolId, ty: TyId) {
        // a ty, once set by the checker, is never changed
        if decl.base.ty.is_none() {
            decl.base.ty = Some(ty);
        }
        self.table.get_mut(symbol).ty = Some(ty);
        let mangled = format!(
            "{}:{}",
            decl.mangled_before_sema.clone().unwrap_or_default(),
            self.manager.mangle(ty)
        );
        decl.mangled_name = Some(mangled.clone());
        decl.export_id = Some(mangled.clone());
        let info = self.table.get_mut(symbol);
        info.mangled = Some(mangled.clone());
        info.export_id = Some(mangled);
    }

    fn resolve_super_annos(&mut self, decl: &mut Decl) -> Vec<TyId> {
        let annos = match &mut decl.kind {
            DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
                &mut c.super_types
            }
            DeclKind::Enum(e) => &mut e.super_types,
            _ => return vec![],
        };
        let mut out = vec![];
        let mut taken = std::mem::take(annos);
        for anno in &mut taken {
            out.push(self.resolve_type_anno(anno));
        }
        match &mut decl.kind {
            DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
                c.super_types = taken;
            }
            DeclKind::Enum(e) => e.super_types = taken,
            _ => {}
        }
        out.retain(|ty| !self.manager.is_invalid(*ty));
        out
    }

    fn resolve_member_signatures(&mut self, decl: &mut Decl) {
        let symbol = decl.symbol;
        let members: Option<&mut Vec<Decl>> = match &mut decl.kind {
            DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => Some(&mut c.body),
            DeclKind::Enum(e) => Some(&mut e.members),
            DeclKind::Extend(e) => Some(&mut e.body),
            _ => None,
        };
        if let Some(members) = members {
            let mut taken = std::mem::take(members);
            let _ = symbol;
            for member in &mut taken {
                self.resolve_signature(member);
            }
            match &mut decl.kind {
                DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
                    c.body = taken;
                }
                DeclKind::Enum(e) => e.members = taken,
                DeclKind::Extend(e) => e.body = taken,
                _ => {}
            }
        }
    }

    fn resolve_param_annos(&mut self, decl: &mut Decl) -> Vec<TyId> {
        let mut taken = match decl.func_mut() {
            Some(func) => std::mem::take(&mut func.body.param_list.params),
            None => return vec![],
        };
        let mut tys = vec![];
        for param in &mut taken {
            let ty = if let DeclKind::FuncParam(fp) = &mut param.kind {
                let mut anno = fp.ty_anno.take();
                let ty = anno
                    .as_mut()
                    .map(|anno| self.resolve_type_anno(anno))
                    .unwrap_or_else(|| self.manager.invalid_ty());
                if let DeclKind::FuncParam(fp) = &mut param.kind {
                    fp.ty_anno = anno;
                }
                ty
            } else {
                self.manager.invalid_ty()
            };
            param.base.ty = Some(ty);
            if let Some(param_symbol) = param.symbol {
                self.table.get_mut(param_symbol).ty = Some(ty);
            }
            tys.push(ty);
        }
        if let Some(func) = decl.func_mut() {
            func.body.param_list.params = taken;
        }
        tys
    }

    fn resolve_func_signature(&mut self, decl: &mut Decl, symbol: SymbolId) -> TyId {
        let params = self.resolve_param_annos(decl);
        let ret_anno = decl.func_mut().and_then(|func| func.body.ret_ty.take());
        let ret = match ret_anno {
            Some(mut anno) => {
                let ty = self.resolve_type_anno(&mut anno);
                if let Some(func) = decl.func_mut() {
                    func.body.ret_ty = Some(anno);
                }
                ty
            }
            None => self.manager.unit_ty(),
        };
        let is_c = decl.base.has_attr(Attributes::FOREIGN);
        let sig = FuncSig {
            params: params.clone(),
            ret,
        };
        self.table.get_mut(symbol).sig = Some(sig);
        self.manager.get_function_ty(params, ret, is_c, false)
    }

    fn resolve_extend_signature(&mut self, decl: &mut Decl, symbol: SymbolId) {
        let (extended_ty, interfaces) = {
            let extend = match &mut decl.kind {
                DeclKind::Extend(extend) => extend,
                _ => return,
            };
            let mut extended_anno = std::mem::replace(
                &mut extend.extended,
                Box::new(TypeAnno::new(NodeBase::synthesized(), TypeAnnoKind::Invalid)),
            );
            let mut iface_annos = std::mem::take(&mut extend.super_interfaces);
            let extended_ty = self.resolve_type_anno(&mut extended_anno);
            let mut interfaces = vec![];
            for anno in &mut iface_annos {
                interfaces.push(self.resolve_type_anno(anno));
            }
            if let DeclKind::Extend(extend) = &mut decl.kind {
                extend.extended = extended_anno;
                extend.super_interfaces = iface_annos;
            }
            (extended_ty, interfaces)
        };
        if self.manager.is_invalid(extended_ty) {
            return;
        }
        decl.base.ty = Some(extended_ty);
        self.table.get_mut(symbol).ty = Some(extended_ty);
        let key = match self.manager.nominal_decl(extended_ty) {
            Some(extended_decl) => ExtendKey::Decl(extended_decl),
            None => ExtendKey::Builtin(extended_ty),
        };
        self.manager.register_extend(
            key,
            ExtendRecord {
                extend_symbol: symbol,
                decl_node: decl.base.id,
                interfaces: interfaces
                    .into_iter()
                    .filter(|t| !self.manager.is_invalid(*t))
                    .collect(),
            },
        );
        self.resolve_member_signatures(decl);
    }

    // _____________________________________________________________________
    // type annotation resolution

    pub fn resolve_type_anno(&mut self, anno: &mut TypeAnno) -> TyId {
        let ty = match &mut anno.kind {
            TypeAnnoKind::Primitive(kind) => self.manager.get_primitive_ty(*kind),
            TypeAnnoKind::Paren(inner) => self.resolve_type_anno(inner),
            TypeAnnoKind::Option { inner } => {
                let inner = self.resolve_type_anno(inner);
                self.manager.get_option_ty(inner)
            }
            TypeAnnoKind::Tuple(items) => {
                let mut tys = vec![];
                for item in items.iter_mut() {
                    tys.push(self.resolve_type_anno(item));
                }
                self.manager.get_tuple_ty(tys)
            }
            TypeAnnoKind::Func { params, ret } => {
                let mut param_tys = vec![];
                for param in params.iter_mut() {
                    param_tys.push(self.resolve_type_anno(param));
                }
                let ret = self.resolve_type_anno(ret);
                self.manager.get_function_ty(param_tys, ret, false, false)
            }
            TypeAnnoKind::This => match self.self_stack.last() {
                Some(&symbol) => self
                    .table
                    .get(symbol)
                    .ty
                    .unwrap_or_else(|| self.manager.invalid_ty()),
                None => self.manager.invalid_ty(),
            },
            TypeAnnoKind::VArray { elem, size } => {
                let elem = self.resolve_type_anno(elem);
                let size_value = const_int_value(size).unwrap_or(0);
                self.manager.intern(Ty::VArray {
                    elem,
                    size: size_value,
                })
            }
            TypeAnnoKind::Ref { name, type_args } => {
                let mut args = vec![];
                for arg in type_args.iter_mut() {
                    args.push(self.resolve_type_anno(arg));
                }
                let name = name.clone();
                self.resolve_named_type(&name, args, anno.base.range())
            }
            TypeAnnoKind::Qualified {
                qualifier,
                field,
                type_args,
            } => {
                let _ = self.resolve_type_anno(qualifier);
                let mut args = vec![];
                for arg in type_args.iter_mut() {
                    args.push(self.resolve_type_anno(arg));
                }
                let field = field.clone();
                self.resolve_named_type(&field, args, anno.base.range())
            }
            TypeAnnoKind::Constant(_) => self.manager.int64_ty(),
            TypeAnnoKind::Invalid => self.manager.invalid_ty(),
        };
        if anno.base.ty.is_none() {
            anno.base.ty = Some(ty);
        }
        ty
    }

    fn resolve_named_type(&mut self, name: &Ident, args: Vec<TyId>, range: Range) -> TyId {
        if name.name == "Any" {
            return self.manager.any_ty();
        }
        if name.name == "Array" && args.len() == 1 {
            return self.manager.intern(Ty::Array { elem: args[0] });
        }
        if name.name == "CString" {
            return self.manager.intern(Ty::CString);
        }
        if name.name == "CPointer" && args.len() == 1 {
            return self.manager.intern(Ty::CPointer { pointee: args[0] });
        }
        match self.lookup(&name.name) {
            Some(symbol) => {
                let info = self.table.get(symbol);
                match info.kind {
                    SymbolKind::Class => self.manager.get_class_ty(symbol, args),
                    SymbolKind::Interface => self.manager.get_interface_ty(symbol, args),
                    SymbolKind::Struct => self.manager.get_struct_ty(symbol, args),
                    SymbolKind::Enum => self.manager.get_enum_ty(symbol, args),
                    SymbolKind::GenericParam => self.manager.get_generic_ty(symbol),
                    SymbolKind::TypeAlias => info
                        .ty
                        .unwrap_or_else(|| self.manager.invalid_ty()),
                    _ => {
                        self.err_undeclared(&name.name, range);
                        self.manager.invalid_ty()
                    }
                }
            }
            None => {
                self.err_undeclared(&name.name, range);
                self.manager.invalid_ty()
            }
        }
    }

    fn err_undeclared(&self, name: &str, range: Range) {
        self.sess
            .handler
            .struct_err_with_code(
                "sema_undeclared_identifier",
                range,
                &format!("undeclared identifier `{}`", name),
                "not found in this scope",
            )
            .emit();
    }

    // _____________________________________________________________________
    // pass 3: bodies

    pub fn check_decl_body(&mut self, decl: &mut Decl) {
        let symbol = decl.symbol;
        let node_id = decl.base.id;
        self.decl_stack.push(node_id);
        match &mut decl.kind {
            DeclKind::Var(var) => {
                let expected = decl.base.ty;
                let mut init = var.init.take();
                if let Some(init_expr) = &mut init {
                    let ty = self.check_expr(init_expr, expected);
                    if let Some(expected) = expected {
                        self.require_assignable(ty, expected, init_expr.base.range());
                    } else if decl.base.ty.is_none() {
                        decl.base.ty = Some(ty);
                        if let Some(symbol) = symbol {
                            self.table.get_mut(symbol).ty = Some(ty);
                        }
                    }
                }
                if let DeclKind::Var(var) = &mut decl.kind {
                    var.init = init;
                }
                if decl.mangled_name.is_none() {
                    if let (Some(symbol), Some(ty)) = (symbol, decl.base.ty) {
                        self.set_decl_ty(decl, symbol, ty);
                    }
                }
            }
            DeclKind::VarWithPattern(var) => {
                let mut init = var.init.take();
                let mut pattern =
                    std::mem::replace(&mut var.pattern, Box::new(Pattern::new(
                        NodeBase::synthesized(),
                        PatternKind::Wildcard,
                    )));
                let init_ty = init
                    .as_mut()
                    .map(|e| self.check_expr(e, None))
                    .unwrap_or_else(|| self.manager.invalid_ty());
                self.check_pattern(&mut pattern, init_ty);
                if let DeclKind::VarWithPattern(var) = &mut decl.kind {
                    var.init = init;
                    var.pattern = pattern;
                }
            }
            DeclKind::Func(_) | DeclKind::PrimaryCtor(_) => {
                self.check_func_body(decl);
            }
            DeclKind::Main(_) | DeclKind::Macro(_) => {
                let body = match &mut decl.kind {
                    DeclKind::Main(m) => &mut m.body,
                    DeclKind::Macro(m) => &mut m.body,
                    _ => unreachable!(),
                };
                let mut taken_body = std::mem::replace(body, empty_func_body());
                self.push_scope();
                let int64 = self.manager.int64_ty();
                self.ret_stack.push(int64);
                if let Some(block) = &mut taken_body.block {
                    self.check_block(block, None);
                }
                self.ret_stack.pop();
                self.pop_scope();
                match &mut decl.kind {
                    DeclKind::Main(m) => m.body = taken_body,
                    DeclKind::Macro(m) => m.body = taken_body,
                    _ => unreachable!(),
                }
            }
            DeclKind::Class(_)
            | DeclKind::Interface(_)
            | DeclKind::Struct(_)
            | DeclKind::Enum(_)
            | DeclKind::Extend(_) => {
                if let Some(symbol) = symbol {
                    self.self_stack.push(symbol);
                }
                self.push_scope();
                // members are visible to each other
                let member_symbols: Vec<(String, SymbolId)> = symbol
                    .map(|s| {
                        self.table
                            .get(s)
                            .members
                            .iter()
                            .map(|&m| (self.table.get(m).name.clone(), m))
                            .collect()
                    })
                    .unwrap_or_default();
                for (name, member) in &member_symbols {
                    self.declare(name, *member);
                }
                // generic parameters are visible in the body
                let generic_params: Vec<(String, SymbolId)> = symbol
                    .map(|s| {
                        self.table
                            .get(s)
                            .generic_params
                            .iter()
                            .map(|&p| (self.table.get(p).name.clone(), p))
                            .collect()
                    })
                    .unwrap_or_default();
                for (name, param) in &generic_params {
                    self.declare(name, *param);
                }
                let members: &mut Vec<Decl> = match &mut decl.kind {
                    DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
                        &mut c.body
                    }
                    DeclKind::Enum(e) => &mut e.members,
                    DeclKind::Extend(e) => &mut e.body,
                    _ => unreachable!(),
                };
                let mut taken = std::mem::take(members);
                for member in &mut taken {
                    self.check_decl_body(member);
                }
                match &mut decl.kind {
                    DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
                        c.body = taken;
                    }
                    DeclKind::Enum(e) => e.members = taken,
                    DeclKind::Extend(e) => e.body = taken,
                    _ => unreachable!(),
                }
                self.pop_scope();
                if symbol.is_some() {
                    self.self_stack.pop();
                }
            }
            DeclKind::Prop(_) => {
                let (mut getters, mut setters) = match &mut decl.kind {
                    DeclKind::Prop(p) => {
                        (std::mem::take(&mut p.getters), std::mem::take(&mut p.setters))
                    }
                    _ => unreachable!(),
                };
                for accessor in getters.iter_mut().chain(setters.iter_mut()) {
                    self.check_decl_body(accessor);
                }
                if let DeclKind::Prop(p) = &mut decl.kind {
                    p.getters = getters;
                    p.setters = setters;
                }
            }
            _ => {}
        }
        self.decl_stack.pop();
        if decl.base.has_attr(Attributes::IS_BROKEN) {
            decl.base.enable_attr(Attributes::HAS_BROKEN);
        }
    }

    fn check_func_body(&mut self, decl: &mut Decl) {
        let symbol = decl.symbol;
        let ret = symbol
            .and_then(|s| self.table.get(s).sig.as_ref().map(|sig| sig.ret))
            .unwrap_or_else(|| self.manager.unit_ty());
        let generic_params: Vec<(String, SymbolId)> = symbol
            .map(|s| {
                self.table
                    .get(s)
                    .generic_params
                    .iter()
                    .map(|&p| (self.table.get(p).name.clone(), p))
                    .collect()
            })
            .unwrap_or_default();

        let mut body = match decl.func_mut() {
            Some(func) => std::mem::replace(&mut func.body, empty_func_body()),
            None => return,
        };

        self.push_scope();
        for (name, param) in &generic_params {
            self.declare(name, *param);
        }
        // parameters and their default values
        for param in &mut body.param_list.params {
            if let Some(param_symbol) = param.symbol {
                self.declare(&param.name.name.clone(), param_symbol);
            }
            let expected = param.base.ty;
            if let DeclKind::FuncParam(fp) = &mut param.kind {
                let mut default = fp.default_value.take();
                if let Some(default_expr) = &mut default {
                    let ty = self.check_expr(default_expr, expected);
                    if let Some(expected) = expected {
                        self.require_assignable(ty, expected, default_expr.base.range());
                    }
                }
                if let DeclKind::FuncParam(fp) = &mut param.kind {
                    fp.default_value = default;
                }
            }
        }
        self.ret_stack.push(ret);
        if let Some(block) = &mut body.block {
            let block_ty = self.check_block(block, Some(ret));
            let unit = self.manager.unit_ty();
            if ret != unit
                && !self.manager.is_invalid(ret)
                && !self.manager.is_assignable(block_ty, ret)
                && !block_returns(block)
            {
                self.type_mismatch(block_ty, ret, block.base.range());
            }
        }
        self.ret_stack.pop();
        self.pop_scope();

        if let Some(func) = decl.func_mut() {
            func.body = body;
        }
    }

    pub fn check_block(&mut self, block: &mut Block, expected_last: Option<TyId>) -> TyId {
        self.push_scope();
        let len = block.stmts.len();
        let mut ty = self.manager.unit_ty();
        for (i, stmt) in block.stmts.iter_mut().enumerate() {
            match stmt {
                Stmt::Decl(decl) => {
                    let parent_node = self.decl_stack.last().copied();
                    self.collect_decl(decl, None, parent_node);
                    self.resolve_signature(decl);
                    self.check_decl_body(decl);
                }
                Stmt::Expr(expr) => {
                    let expected = if i + 1 == len { expected_last } else { None };
                    let expr_ty = self.check_expr(expr, expected);
                    if i + 1 == len {
                        ty = expr_ty;
                    }
                }
            }
        }
        self.pop_scope();
        if block.ends_with_decl() {
            ty = self.manager.unit_ty();
        }
        if block.base.ty.is_none() {
            block.base.ty = Some(ty);
        }
        ty
    }

    // _____________________________________________________________________
    // expressions

    pub fn check_expr(&mut self, expr: &mut Expr, expected: Option<TyId>) -> TyId {
        if let Some(ty) = expr.base.ty {
            return ty;
        }
        let ty = self.check_expr_kind(expr, expected);
        if expr.base.ty.is_none() {
            expr.base.ty = Some(ty);
        }
        ty
    }

    fn check_expr_kind(&mut self, expr: &mut Expr, expected: Option<TyId>) -> TyId {
        let range = expr.base.range();
        match &mut expr.kind {
            ExprKind::LitConst { kind, .. } => {
                let lit_kind = kind.clone();
                self.lit_ty(&lit_kind, expected)
            }
            ExprKind::Ref { name, .. } => {
                let name = name.clone();
                match self.lookup(&name.name) {
                    Some(symbol) => {
                        expr.target = Some(symbol);
                        self.symbol_value_ty(symbol)
                    }
                    None => {
                        if name.name == "this" {
                            if let Some(&class) = self.self_stack.last() {
                                if let Some(ty) = self.table.get(class).ty {
                                    return ty;
                                }
                            }
                        }
                        self.err_undeclared(&name.name, range);
                        self.mark_broken(expr);
                        self.manager.invalid_ty()
                    }
                }
            }
            ExprKind::MemberAccess {
                receiver, field, ..
            } => {
                self.check_expr(receiver, None);
                // an optional-chain unwrap lives in the receiver's desugar
                let receiver_ty = receiver
                    .effective_ty()
                    .unwrap_or_else(|| self.manager.invalid_ty());
                let field = field.clone();
                match self.lookup_member(receiver_ty, &field.name) {
                    Some(member) => {
                        expr.target = Some(member);
                        self.symbol_value_ty(member)
                    }
                    None => {
                        if self.manager.is_invalid(receiver_ty) {
                            return receiver_ty;
                        }
                        self.sess
                            .handler
                            .struct_err_with_code(
                                "sema_member_not_found",
                                field.range,
                                &format!(
                                    "no member `{}` on type `{}`",
                                    field.name,
                                    self.manager.mangle(receiver_ty)
                                ),
                                "member not found",
                            )
                            .emit();
                        self.mark_broken(expr);
                        self.manager.invalid_ty()
                    }
                }
            }
            ExprKind::Call { .. } => self.check_call(expr, expected),
            ExprKind::FuncArg { expr: inner, .. } => self.check_expr(inner, expected),
            ExprKind::Paren { expr: inner } => self.check_expr(inner, expected),
            ExprKind::Unary { op, expr: inner } => {
                let op = *op;
                let inner_ty = self.check_expr(inner, expected);
                match op {
                    UnaryOp::Not => self.manager.bool_ty(),
                    UnaryOp::Neg => inner_ty,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let lhs_ty = self.check_expr(lhs, None);
                let rhs_expected = match op {
                    BinaryOp::And | BinaryOp::Or => Some(self.manager.bool_ty()),
                    _ => Some(lhs_ty),
                };
                let rhs_ty = self.check_expr(rhs, rhs_expected);
                self.binary_result_ty(op, lhs_ty, rhs_ty, range)
            }
            ExprKind::Assign { .. } => self.check_assign(expr),
            ExprKind::IncOrDec { expr: inner, .. } => {
                let _ = self.check_expr(inner, None);
                self.manager.unit_ty()
            }
            ExprKind::Range { start, end, step, .. } => {
                let elem = match start {
                    Some(start) => self.check_expr(start, None),
                    None => self.manager.int64_ty(),
                };
                if let Some(end) = end {
                    let end_ty = self.check_expr(end, Some(elem));
                    self.require_assignable(end_ty, elem, range);
                }
                if let Some(step) = step {
                    let step_expected = self.manager.int64_ty();
                    self.check_expr(step, Some(step_expected));
                }
                self.manager.intern(Ty::Array { elem })
            }
            ExprKind::Subscript { receiver, indices } => {
                let receiver_ty = self.check_expr(receiver, None);
                for index in indices.iter_mut() {
                    let int64 = self.manager.int64_ty();
                    self.check_expr(index, Some(int64));
                }
                match self.manager.get(receiver_ty).clone() {
                    Ty::Array { elem } => elem,
                    Ty::VArray { elem, .. } => elem,
                    Ty::Tuple(items) => items.first().copied().unwrap_or(receiver_ty),
                    Ty::Invalid => receiver_ty,
                    _ => {
                        self.type_mismatch_msg(
                            "sema_mismatched_types",
                            "this type cannot be indexed",
                            range,
                        );
                        self.manager.invalid_ty()
                    }
                }
            }
            ExprKind::TupleLit { items } => {
                let expected_items: Vec<Option<TyId>> = match expected.map(|e| self.manager.get(e).clone()) {
                    Some(Ty::Tuple(tys)) if tys.len() == items.len() => {
                        tys.into_iter().map(Some).collect()
                    }
                    _ => vec![None; items.len()],
                };
                let mut tys = vec![];
                for (item, item_expected) in items.iter_mut().zip(expected_items) {
                    tys.push(self.check_expr(item, item_expected));
                }
                self.manager.get_tuple_ty(tys)
            }
            ExprKind::ArrayLit { items } => {
                let elem_expected = expected.and_then(|e| match self.manager.get(e) {
                    Ty::Array { elem } => Some(*elem),
                    _ => None,
                });
                let mut elem = elem_expected.unwrap_or_else(|| self.manager.invalid_ty());
                for (i, item) in items.iter_mut().enumerate() {
                    let item_ty = self.check_expr(item, elem_expected);
                    if i == 0 && elem_expected.is_none() {
                        elem = item_ty;
                    }
                }
                if items.is_empty() && elem_expected.is_none() {
                    elem = self.manager.any_ty();
                }
                self.manager.intern(Ty::Array { elem })
            }
            ExprKind::Array { size, init } => {
                if let Some(size) = size {
                    let int64 = self.manager.int64_ty();
                    self.check_expr(size, Some(int64));
                }
                let elem = match init {
                    Some(init) => self.check_expr(init, None),
                    None => self.manager.any_ty(),
                };
                self.manager.intern(Ty::Array { elem })
            }
            ExprKind::TypeConv { target, expr: inner } => {
                let target_ty = self.resolve_type_anno(target);
                self.check_expr(inner, None);
                target_ty
            }
            ExprKind::Lambda { body } => self.check_lambda(body, expected),
            ExprKind::TrailingClosure { .. } => self.check_trailing_closure(expr, expected),
            ExprKind::If { .. } => self.check_if(expr, expected),
            ExprKind::Match { .. } => self.check_match(expr, expected),
            ExprKind::Try {
                block,
                catches,
                finally,
            } => {
                let ty = self.check_block(block, expected);
                for catch in catches.iter_mut() {
                    let any = self.manager.any_ty();
                    self.push_scope();
                    self.check_pattern(&mut catch.pattern, any);
                    self.check_block(&mut catch.block, expected);
                    self.pop_scope();
                }
                if let Some(finally) = finally {
                    self.check_block(finally, None);
                }
                ty
            }
            ExprKind::Throw { expr: inner } => {
                self.check_expr(inner, None);
                self.manager.nothing_ty()
            }
            ExprKind::Return { expr: inner } => {
                let expected_ret = self.ret_stack.last().copied();
                if let Some(inner) = inner {
                    let ty = self.check_expr(inner, expected_ret);
                    if let Some(expected_ret) = expected_ret {
                        self.require_assignable(ty, expected_ret, range);
                    }
                }
                self.manager.nothing_ty()
            }
            ExprKind::Jump { .. } => self.manager.nothing_ty(),
            ExprKind::ForIn { .. } => self.check_for_in(expr),
            ExprKind::While { .. } | ExprKind::DoWhile { .. } => self.check_while(expr),
            ExprKind::Spawn { task } => {
                self.check_expr(task, None);
                self.manager.unit_ty()
            }
            ExprKind::Synchronized { mutex, block } => {
                self.check_expr(mutex, None);
                self.check_block(block, None);
                self.manager.unit_ty()
            }
            ExprKind::Is { expr: inner, ty } => {
                self.check_expr(inner, None);
                self.resolve_type_anno(ty);
                self.manager.bool_ty()
            }
            ExprKind::As { expr: inner, ty } => {
                self.check_expr(inner, None);
                let target = self.resolve_type_anno(ty);
                self.manager.get_option_ty(target)
            }
            ExprKind::Optional { .. } => self.check_optional_chain(expr),
            ExprKind::OptionalChain { expr: inner } => self.check_expr(inner, expected),
            ExprKind::LetPatternDestructor { .. } => {
                // legal only inside a condition; the enclosing if/while
                // checks and desugars it
                self.sess
                    .handler
                    .struct_err_with_code(
                        "sema_let_pattern_outside_condition",
                        range,
                        "`let` pattern can only appear in a condition",
                        "not a condition position",
                    )
                    .emit();
                self.mark_broken(expr);
                self.manager.invalid_ty()
            }
            ExprKind::StrInterpolation { .. } => self.check_str_interpolation(expr),
            ExprKind::Quote { .. } => self.manager.any_ty(),
            ExprKind::MacroExpand { invocation } => {
                // after a failed (or absent) expansion the original args
                // remain and the subtree is checked best-effort
                if let Some(decl) = &mut invocation.decl {
                    self.collect_decl(decl, None, None);
                    self.resolve_signature(decl);
                    self.check_decl_body(decl);
                }
                self.manager.unit_ty()
            }
            ExprKind::IfAvailable {
                arg,
                available,
                unavailable,
            } => {
                self.check_expr(arg, None);
                let ty = self.check_expr(available, expected);
                self.check_expr(unavailable, Some(ty));
                ty
            }
            ExprKind::Block(block) => self.check_block(block, expected),
            ExprKind::Wildcard => expected.unwrap_or_else(|| self.manager.invalid_ty()),
            ExprKind::PrimitiveType { kind } => {
                let kind = *kind;
                self.manager.get_primitive_ty(kind)
            }
            ExprKind::Invalid => self.manager.invalid_ty(),
        }
    }

    fn lit_ty(&mut self, kind: &LitKind, expected: Option<TyId>) -> TyId {
        use PrimitiveTyKind::*;
        match kind {
            LitKind::Int => {
                if let Some(expected) = expected {
                    if matches!(
                        self.manager.get(expected),
                        Ty::Primitive(Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32
                            | UInt64 | Float16 | Float32 | Float64)
                    ) {
                        return expected;
                    }
                    if let Some(inner) = self.manager.option_inner(expected) {
                        return self.lit_ty(kind, Some(inner));
                    }
                }
                self.manager.int64_ty()
            }
            LitKind::Float => {
                if let Some(expected) = expected {
                    if matches!(
                        self.manager.get(expected),
                        Ty::Primitive(Float16 | Float32 | Float64)
                    ) {
                        return expected;
                    }
                }
                self.manager.get_primitive_ty(Float64)
            }
            LitKind::Bool => self.manager.bool_ty(),
            LitKind::Rune => self.manager.get_primitive_ty(Rune),
            LitKind::Str | LitKind::Byte => self.manager.string_ty(),
            LitKind::Unit => self.manager.unit_ty(),
        }
    }

    fn symbol_value_ty(&mut self, symbol: SymbolId) -> TyId {
        let info = self.table.get(symbol);
        if let Some(ty) = info.ty {
            return ty;
        }
        if let Some(sig) = &info.sig {
            let params = sig.params.clone();
            let ret = sig.ret;
            return self.manager.get_function_ty(params, ret, false, false);
        }
        self.manager.invalid_ty()
    }

    fn lookup_member(&mut self, receiver_ty: TyId, name: &str) -> Option<SymbolId> {
        let decl = self.manager.nominal_decl(receiver_ty)?;
        // own members, then super types, then extensions
        let direct = self
            .table
            .get(decl)
            .members
            .iter()
            .copied()
            .find(|&m| self.table.get(m).name == name);
        if direct.is_some() {
            return direct;
        }
        for super_ty in self.manager.supers_of(receiver_ty) {
            if let Some(found) = self.lookup_member(super_ty, name) {
                return Some(found);
            }
        }
        let records: Vec<SymbolId> = self
            .manager
            .extends_of(ExtendKey::Decl(decl))
            .iter()
            .map(|r| r.extend_symbol)
            .collect();
        for extend_symbol in records {
            let found = self
                .table
                .get(extend_symbol)
                .members
                .iter()
                .copied()
                .find(|&m| self.table.get(m).name == name);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn mark_broken(&mut self, expr: &mut Expr) {
        expr.base.enable_attr(Attributes::IS_BROKEN);
    }

    fn require_assignable(&mut self, value: TyId, target: TyId, range: Range) {
        if self.manager.is_invalid(value) || self.manager.is_invalid(target) {
            return;
        }
        if !self.manager.is_assignable(value, target)
            && !self.manager.has_extension_relation(value, target)
        {
            self.type_mismatch(value, target, range);
        }
    }

    fn type_mismatch(&mut self, value: TyId, target: TyId, range: Range) {
        let found = self.manager.mangle(value);
        let expected = self.manager.mangle(target);
        self.sess
            .handler
            .struct_err_with_code(
                "sema_mismatched_types",
                range,
                &format!("mismatched types: expected `{}`, found `{}`", expected, found),
                "type mismatch",
            )
            .emit();
    }

    fn type_mismatch_msg(&self, code: &str, msg: &str, range: Range) {
        self.sess
            .handler
            .struct_err_with_code(code, range, msg, "here")
            .emit();
    }

    fn binary_result_ty(&mut self, op: BinaryOp, lhs: TyId, rhs: TyId, range: Range) -> TyId {
        use BinaryOp::*;
        if self.manager.is_invalid(lhs) || self.manager.is_invalid(rhs) {
            return self.manager.invalid_ty();
        }
        match op {
            Lt | Le | Gt | Ge | Eq | NotEq => self.manager.bool_ty(),
            And | Or => self.manager.bool_ty(),
            Coalesce => self.manager.option_inner(lhs).unwrap_or(lhs),
            _ => {
                if lhs != rhs && !self.manager.is_subtype(rhs, lhs) {
                    self.type_mismatch(rhs, lhs, range);
                    return self.manager.invalid_ty();
                }
                lhs
            }
        }
    }

    // _____________________________________________________________________
    // calls and overloads

    fn check_call(&mut self, expr: &mut Expr, expected: Option<TyId>) -> TyId {
        let range = expr.base.range();
        let expr_node = expr.base.id;
        let (callee, args) = match &mut expr.kind {
            ExprKind::Call { callee, args } => (callee, args),
            _ => unreachable!(),
        };

        // primitive conversion call: `Int64(x)`
        if let ExprKind::Ref { name, .. } = &callee.kind {
            if let Some(kind) = primitive_name(&name.name) {
                for arg in args.iter_mut() {
                    self.check_expr(arg, None);
                }
                let target = self.manager.get_primitive_ty(kind);
                callee.base.ty = Some(target);
                callee.kind = ExprKind::PrimitiveType { kind };
                return target;
            }
        }

        // explicit type arguments, resolved up front
        let explicit_args: Vec<TyId> = match &mut callee.kind {
            ExprKind::Ref { type_args, .. } | ExprKind::MemberAccess { type_args, .. } => {
                let mut out = vec![];
                for anno in type_args.iter_mut() {
                    out.push(self.resolve_type_anno(anno));
                }
                out
            }
            _ => vec![],
        };

        // candidates first, so an unambiguous callee can flow expected
        // parameter types into the arguments (lambda inference needs it)
        let candidates: Vec<SymbolId> = match &mut callee.kind {
            ExprKind::Ref { name, .. } => {
                let name = name.clone();
                let found = self.lookup_all(&name.name);
                if found.is_empty() {
                    for arg in args.iter_mut() {
                        self.check_expr(arg, None);
                    }
                    self.err_undeclared(&name.name, name.range);
                    self.mark_broken(expr);
                    return self.manager.invalid_ty();
                }
                found
            }
            ExprKind::MemberAccess { receiver, field, .. } => {
                self.check_expr(receiver, None);
                let receiver_ty = receiver
                    .effective_ty()
                    .unwrap_or_else(|| self.manager.invalid_ty());
                if self.manager.is_invalid(receiver_ty) {
                    return receiver_ty;
                }
                let field = field.clone();
                match self.lookup_member(receiver_ty, &field.name) {
                    Some(member) => vec![member],
                    None => {
                        self.sess
                            .handler
                            .struct_err_with_code(
                                "sema_member_not_found",
                                field.range,
                                &format!("no member `{}`", field.name),
                                "member not found",
                            )
                            .emit();
                        self.mark_broken(expr);
                        return self.manager.invalid_ty();
                    }
                }
            }
            _ => {
                // calling a value of function type
                let callee_ty = self.check_expr(callee, None);
                return match self.manager.get(callee_ty).clone() {
                    Ty::Func { params, ret, .. } => {
                        for (i, arg) in args.iter_mut().enumerate() {
                            let expected_param = params.get(i).copied();
                            let arg_ty = self.check_expr(arg, expected_param);
                            if let Some(param) = expected_param {
                                self.require_assignable(arg_ty, param, arg.base.range());
                            }
                        }
                        ret
                    }
                    Ty::Invalid => callee_ty,
                    _ => {
                        self.type_mismatch_msg(
                            "sema_mismatched_types",
                            "this value is not callable",
                            range,
                        );
                        self.manager.invalid_ty()
                    }
                };
            }
        };

        // a single non-generic candidate propagates its parameter types
        let expected_params: Option<Vec<TyId>> = if candidates.len() == 1 {
            let only = candidates[0];
            if self.table.get(only).generic_params.is_empty() {
                self.table.get(only).sig.as_ref().map(|sig| sig.params.clone())
            } else {
                None
            }
        } else {
            None
        };
        let mut arg_tys = vec![];
        for (i, arg) in args.iter_mut().enumerate() {
            let expected_param = expected_params
                .as_ref()
                .and_then(|params| params.get(i).copied());
            arg_tys.push(self.check_expr(arg, expected_param));
        }

        match self.resolve_overload(&candidates, &arg_tys, &explicit_args, range, expected) {
            Some((symbol, ret, generic_args)) => {
                callee.target = Some(symbol);
                expr.target = Some(symbol);
                // class constructor-style call: `A()` on a class symbol
                if !generic_args.is_empty() {
                    self.generic_args_at.insert(expr_node, generic_args);
                }
                for (arg, param) in args.iter_mut().zip(
                    self.table
                        .get(symbol)
                        .sig
                        .clone()
                        .map(|s| s.params)
                        .unwrap_or_default(),
                ) {
                    let arg_ty = arg.base.ty.unwrap_or_else(|| self.manager.invalid_ty());
                    self.require_assignable(arg_ty, param, arg.base.range());
                }
                ret
            }
            None => {
                self.mark_broken(expr);
                self.manager.invalid_ty()
            }
        }
    }

    /// Overload resolution: filter by arity and assignability, then pick
    /// the strictly most specific candidate; ties are an error.
    fn resolve_overload(
        &mut self,
        candidates: &[SymbolId],
        arg_tys: &[TyId],
        explicit_type_args: &[TyId],
        range: Range,
        _expected: Option<TyId>,
    ) -> Option<(SymbolId, TyId, Vec<TyId>)> {
        struct Viable {
            symbol: SymbolId,
            params: Vec<TyId>,
            ret: TyId,
            generic_args: Vec<TyId>,
        }
        let mut viable: Vec<Viable> = vec![];

        for &candidate in candidates {
            let info = self.table.get(candidate);
            // constructing a nominal type: `A(...)` resolves through its
            // constructors, or defaults to the type itself
            if info.kind.is_nominal() {
                let ctor_params = self.ctor_params_of(candidate, arg_tys.len());
                let params = match ctor_params {
                    Some(params) => params,
                    None if arg_tys.is_empty() => vec![],
                    None => continue,
                };
                let args: Vec<TyId> = self.manager.decl_generic_params(candidate).to_vec();
                let ret = match self.table.get(candidate).kind {
                    SymbolKind::Class => self.manager.get_class_ty(candidate, args.clone()),
                    SymbolKind::Struct => self.manager.get_struct_ty(candidate, args.clone()),
                    SymbolKind::Enum => self.manager.get_enum_ty(candidate, args.clone()),
                    SymbolKind::Interface => continue,
                    _ => unreachable!(),
                };
                viable.push(Viable {
                    symbol: candidate,
                    params,
                    ret,
                    generic_args: vec![],
                });
                continue;
            }
            let sig = match &info.sig {
                Some(sig) => sig.clone(),
                None => match info.ty {
                    Some(ty) => match self.manager.get(ty).clone() {
                        Ty::Func { params, ret, .. } => FuncSig { params, ret },
                        _ => continue,
                    },
                    None => continue,
                },
            };
            if sig.params.len() != arg_tys.len() {
                continue;
            }
            let generic_params: Vec<_> = self.table.get(candidate).generic_params.clone();
            let generic_param_tys: Vec<TyId> = generic_params
                .iter()
                .map(|&p| self.manager.get_generic_ty(p))
                .collect();

            let (params, ret, generic_args) = if generic_param_tys.is_empty() {
                (sig.params.clone(), sig.ret, vec![])
            } else {
                let mut map: HashMap<TyId, TyId> = HashMap::new();
                if !explicit_type_args.is_empty() {
                    if explicit_type_args.len() != generic_param_tys.len() {
                        continue;
                    }
                    for (&param, &arg) in generic_param_tys.iter().zip(explicit_type_args) {
                        map.insert(param, arg);
                    }
                } else {
                    // unify parameter types against argument types
                    let mut ok = true;
                    for (&param, &arg) in sig.params.iter().zip(arg_tys) {
                        if !self.unify(param, arg, &mut map) {
                            ok = false;
                            break;
                        }
                    }
                    if !ok {
                        continue;
                    }
                    if let Some(&unbound) = generic_param_tys.iter().find(|p| !map.contains_key(p)) {
                        let name = self.manager.mangle(unbound);
                        self.sess
                            .handler
                            .struct_err_with_code(
                                "sema_unable_to_infer_generic_argument",
                                range,
                                &format!("unable to infer generic argument `{}`", name),
                                "cannot infer the type argument from this call",
                            )
                            .emit();
                        continue;
                    }
                }
                let params = sig
                    .params
                    .iter()
                    .map(|&p| self.manager.instantiate(p, &map))
                    .collect();
                let ret = self.manager.instantiate(sig.ret, &map);
                let generic_args = generic_param_tys
                    .iter()
                    .map(|p| *map.get(p).unwrap())
                    .collect();
                (params, ret, generic_args)
            };

            let assignable = params
                .iter()
                .zip(arg_tys)
                .all(|(&param, &arg)| {
                    self.manager.is_assignable(arg, param)
                        || self.manager.has_extension_relation(arg, param)
                        || self.manager.is_invalid(arg)
                });
            if assignable {
                viable.push(Viable {
                    symbol: candidate,
                    params,
                    ret,
                    generic_args,
                });
            }
        }

        if viable.is_empty() {
            self.sess
                .handler
                .struct_err_with_code(
                    "sema_no_matching_function",
                    range,
                    "no matching callable for these arguments",
                    "no viable candidate",
                )
                .emit();
            return None;
        }
        if viable.len() == 1 {
            let v = viable.pop().unwrap();
            return Some((v.symbol, v.ret, v.generic_args));
        }

        // strictly-more-specific selection
        let mut best: Option<usize> = None;
        for i in 0..viable.len() {
            let mut beats_all = true;
            for j in 0..viable.len() {
                if i == j {
                    continue;
                }
                let more_specific = viable[i]
                    .params
                    .iter()
                    .zip(viable[j].params.iter())
                    .all(|(&a, &b)| self.manager.is_subtype(a, b));
                let strictly = more_specific && viable[i].params != viable[j].params;
                if !strictly {
                    beats_all = false;
                    break;
                }
            }
            if beats_all {
                best = Some(i);
                break;
            }
        }
        match best {
            Some(i) => {
                let v = viable.swap_remove(i);
                Some((v.symbol, v.ret, v.generic_args))
            }
            None => {
                self.sess
                    .handler
                    .struct_err_with_code(
                        "sema_ambiguous_overload",
                        range,
                        "ambiguous call: multiple candidates are equally specific",
                        "ambiguous call",
                    )
                    .emit();
                None
            }
        }
    }

    fn ctor_params_of(&mut self, nominal: SymbolId, arity: usize) -> Option<Vec<TyId>> {
        let ctors: Vec<SymbolId> = self
            .table
            .get(nominal)
            .members
            .iter()
            .copied()
            .filter(|&m| {
                let info = self.table.get(m);
                info.attrs.contains(Attributes::CONSTRUCTOR) || info.name == "init"
            })
            .collect();
        for ctor in ctors {
            if let Some(sig) = &self.table.get(ctor).sig {
                if sig.params.len() == arity {
                    return Some(sig.params.clone());
                }
            }
        }
        None
    }

    /// Structural unification binding generic parameters in `map`.
    fn unify(&mut self, param: TyId, arg: TyId, map: &mut HashMap<TyId, TyId>) -> bool {
        if let Some(&bound) = map.get(&param) {
            return bound == arg || self.manager.is_subtype(arg, bound);
        }
        if matches!(self.manager.get(param), Ty::Generic { .. }) {
            map.insert(param, arg);
            return true;
        }
        match (self.manager.get(param).clone(), self.manager.get(arg).clone()) {
            (Ty::Tuple(pa), Ty::Tuple(aa)) if pa.len() == aa.len() => pa
                .into_iter()
                .zip(aa)
                .all(|(p, a)| self.unify(p, a, map)),
            (
                Ty::Func {
                    params: pp,
                    ret: pr,
                    ..
                },
                Ty::Func {
                    params: ap,
                    ret: ar,
                    ..
                },
            ) if pp.len() == ap.len() => {
                pp.into_iter().zip(ap).all(|(p, a)| self.unify(p, a, map))
                    && self.unify(pr, ar, map)
            }
            (Ty::Array { elem: pe }, Ty::Array { elem: ae }) => self.unify(pe, ae, map),
            (
                Ty::Enum {
                    decl: pd,
                    args: pa,
                    ..
                },
                Ty::Enum {
                    decl: ad,
                    args: aa,
                    ..
                },
            ) if pd == ad => pa.into_iter().zip(aa).all(|(p, a)| self.unify(p, a, map)),
            (Ty::Class { decl: pd, args: pa }, Ty::Class { decl: ad, args: aa }) if pd == ad => {
                pa.into_iter().zip(aa).all(|(p, a)| self.unify(p, a, map))
            }
            (
                Ty::Struct { decl: pd, args: pa },
                Ty::Struct { decl: ad, args: aa },
            ) if pd == ad => pa.into_iter().zip(aa).all(|(p, a)| self.unify(p, a, map)),
            (
                Ty::Interface { decl: pd, args: pa },
                Ty::Interface { decl: ad, args: aa },
            ) if pd == ad => pa.into_iter().zip(aa).all(|(p, a)| self.unify(p, a, map)),
            _ => self.manager.is_assignable(arg, param),
        }
    }

    // _____________________________________________________________________
    // desugaring checks

    fn check_assign(&mut self, expr: &mut Expr) -> TyId {
        let range = expr.base.range();
        let (op, target_ty, value_ty, has_optional_target) = {
            let (op, target, value) = match &mut expr.kind {
                ExprKind::Assign { op, target, value } => (op, target, value),
                _ => unreachable!(),
            };
            let target_ty = self.check_expr(target, None);
            let value_ty = self.check_expr(value, Some(target_ty));
            let has_optional = contains_optional(target);
            (*op, target_ty, value_ty, has_optional)
        };
        if op.is_none() {
            self.require_assignable(value_ty, target_ty, range);
        }

        // compound assignment expands under the overload rules:
        // `a op= b` becomes `a = a op b`
        if let Some(op) = op {
            let (target, value) = match &expr.kind {
                ExprKind::Assign { target, value, .. } => (target.clone(), value.clone()),
                _ => unreachable!(),
            };
            let mut rhs = Expr::synthesized(ExprKind::Binary {
                op,
                lhs: target.clone(),
                rhs: value,
            });
            rhs.base.ty = Some(target_ty);
            let mut plain = Expr::synthesized(ExprKind::Assign {
                op: None,
                target,
                value: Box::new(rhs),
            });
            let unit = self.manager.unit_ty();
            plain.base.ty = Some(unit);
            // a `?`-suffixed target chain keeps its optional guard
            let desugar = if has_optional_target {
                let mut chain = Expr::synthesized(ExprKind::OptionalChain {
                    expr: Box::new(plain),
                });
                chain.base.ty = Some(unit);
                chain
            } else {
                plain
            };
            expr.desugar = Some(Box::new(desugar));
        }
        self.manager.unit_ty()
    }

    fn check_lambda(&mut self, body: &mut FuncBody, expected: Option<TyId>) -> TyId {
        let expected_fn = expected.and_then(|e| match self.manager.get(e).clone() {
            Ty::Func { params, ret, .. } => Some((params, ret)),
            _ => None,
        });
        self.push_scope();
        let mut param_tys = vec![];
        for (i, param) in body.param_list.params.iter_mut().enumerate() {
            let annotated = if let DeclKind::FuncParam(fp) = &mut param.kind {
                let mut anno = fp.ty_anno.take();
                let ty = anno.as_mut().map(|anno| self.resolve_type_anno(anno));
                if let DeclKind::FuncParam(fp) = &mut param.kind {
                    fp.ty_anno = anno;
                }
                ty
            } else {
                None
            };
            let ty = annotated
                .or_else(|| expected_fn.as_ref().and_then(|(params, _)| params.get(i).copied()))
                .unwrap_or_else(|| self.manager.invalid_ty());
            param.base.ty = Some(ty);
            param_tys.push(ty);
            let symbol = self.table.add(
                param.name.name.clone(),
                SymbolKind::Param,
                param.base.id,
                None,
                Attributes::empty(),
            );
            self.table.get_mut(symbol).ty = Some(ty);
            param.symbol = Some(symbol);
            self.declare(&param.name.name.clone(), symbol);
        }
        let expected_ret = expected_fn.as_ref().map(|(_, ret)| *ret);
        let ret = match &mut body.block {
            Some(block) => self.check_block(block, expected_ret),
            None => self.manager.unit_ty(),
        };
        self.pop_scope();
        let ret = expected_ret.unwrap_or(ret);
        self.manager.get_function_ty(param_tys, ret, false, false)
    }

    /// Trailing closure desugars into the call's last positional
    /// argument.
    fn check_trailing_closure(&mut self, expr: &mut Expr, expected: Option<TyId>) -> TyId {
        let (callee, lambda) = match &expr.kind {
            ExprKind::TrailingClosure { expr, lambda } => (expr.clone(), lambda.clone()),
            _ => unreachable!(),
        };
        let mut lambda_arg = Expr::synthesized(ExprKind::FuncArg {
            name: None,
            expr: lambda,
        });
        lambda_arg.base.attrs |= Attributes::COMPILER_ADD;
        let mut call = match callee.kind {
            ExprKind::Call {
                callee: inner_callee,
                mut args,
            } => {
                args.push(lambda_arg);
                Expr::new(
                    NodeBase::new(expr.base.begin, expr.base.end),
                    ExprKind::Call {
                        callee: inner_callee,
                        args,
                    },
                )
            }
            _ => Expr::new(
                NodeBase::new(expr.base.begin, expr.base.end),
                ExprKind::Call {
                    callee,
                    args: vec![lambda_arg],
                },
            ),
        };
        call.base.attrs |= Attributes::COMPILER_ADD;
        let ty = self.check_expr(&mut call, expected);
        expr.desugar = Some(Box::new(call));
        ty
    }

    fn check_if(&mut self, expr: &mut Expr, expected: Option<TyId>) -> TyId {
        let (cond_is_let, ty) = {
            let (cond, then_block, else_branch) = match &mut expr.kind {
                ExprKind::If {
                    cond,
                    then_block,
                    else_branch,
                } => (cond, then_block, else_branch),
                _ => unreachable!(),
            };
            let cond_is_let = matches!(cond.kind, ExprKind::LetPatternDestructor { .. });
            if cond_is_let {
                self.push_scope();
                self.check_let_condition(cond);
            } else {
                let bool_ty = self.manager.bool_ty();
                let cond_ty = self.check_expr(cond, Some(bool_ty));
                self.require_assignable(cond_ty, bool_ty, cond.base.range());
            }
            let then_ty = self.check_block(then_block, expected);
            if cond_is_let {
                self.pop_scope();
            }
            let ty = match else_branch {
                Some(els) => {
                    let else_ty = self.check_expr(els, expected);
                    if then_ty == else_ty {
                        then_ty
                    } else if self.manager.is_subtype(then_ty, else_ty) {
                        else_ty
                    } else if self.manager.is_subtype(else_ty, then_ty) {
                        then_ty
                    } else {
                        self.manager.unit_ty()
                    }
                }
                None => self.manager.unit_ty(),
            };
            (cond_is_let, ty)
        };
        // an `if` over a let-pattern condition desugars to a match
        if cond_is_let {
            self.desugar_if_let(expr, ty);
        }
        ty
    }

    fn check_let_condition(&mut self, cond: &mut Expr) {
        if let ExprKind::LetPatternDestructor {
            patterns,
            initializer,
        } = &mut cond.kind
        {
            let init_ty = self.check_expr(initializer, None);
            for pattern in patterns {
                self.check_pattern(pattern, init_ty);
            }
            let bool_ty = self.manager.bool_ty();
            cond.base.ty = Some(bool_ty);
        }
    }

    /// `if (let P <- e) { A } else { B }` becomes
    /// `match (e) { case P => A; case _ => B }`.
    fn desugar_if_let(&mut self, expr: &mut Expr, ty: TyId) {
        let (cond, then_block, else_branch) = match &expr.kind {
            ExprKind::If {
                cond,
                then_block,
                else_branch,
            } => (cond.clone(), then_block.clone(), else_branch.clone()),
            _ => return,
        };
        let (patterns, initializer) = match cond.kind {
            ExprKind::LetPatternDestructor {
                patterns,
                initializer,
            } => (patterns, initializer),
            _ => return,
        };
        let mut arms = vec![MatchArm {
            base: NodeBase::synthesized(),
            patterns,
            guard: None,
            body: then_block,
        }];
        let else_stmts = match else_branch {
            Some(els) => vec![Stmt::Expr(*els)],
            None => vec![],
        };
        arms.push(MatchArm {
            base: NodeBase::synthesized(),
            patterns: vec![Pattern::new(NodeBase::synthesized(), PatternKind::Wildcard)],
            guard: None,
            body: Block::synthesized(else_stmts),
        });
        let mut desugar = Expr::synthesized(ExprKind::Match {
            selector: Some(initializer),
            arms,
        });
        desugar.base.ty = Some(ty);
        expr.desugar = Some(Box::new(desugar));
    }

    fn check_while(&mut self, expr: &mut Expr) -> TyId {
        let cond_is_let = {
            let (cond, block) = match &mut expr.kind {
                ExprKind::While { cond, block } => (cond, block),
                ExprKind::DoWhile { cond, block } => (cond, block),
                _ => unreachable!(),
            };
            let cond_is_let = matches!(cond.kind, ExprKind::LetPatternDestructor { .. });
            if cond_is_let {
                self.push_scope();
                self.check_let_condition(cond);
            } else {
                let bool_ty = self.manager.bool_ty();
                let cond_ty = self.check_expr(cond, Some(bool_ty));
                self.require_assignable(cond_ty, bool_ty, cond.base.range());
            }
            self.check_block(block, None);
            if cond_is_let {
                self.pop_scope();
            }
            cond_is_let
        };
        let unit = self.manager.unit_ty();
        if cond_is_let {
            if let ExprKind::While { cond, block } = &expr.kind {
                if let ExprKind::LetPatternDestructor {
                    patterns,
                    initializer,
                } = &cond.kind
                {
                    // loop body runs under the match; exhausted pattern
                    // breaks out
                    let break_arm = MatchArm {
                        base: NodeBase::synthesized(),
                        patterns: vec![Pattern::new(
                            NodeBase::synthesized(),
                            PatternKind::Wildcard,
                        )],
                        guard: None,
                        body: Block::synthesized(vec![Stmt::Expr(Expr::synthesized(
                            ExprKind::Jump {
                                kind: JumpKind::Break,
                            },
                        ))]),
                    };
                    let mut match_expr = Expr::synthesized(ExprKind::Match {
                        selector: Some(initializer.clone()),
                        arms: vec![
                            MatchArm {
                                base: NodeBase::synthesized(),
                                patterns: patterns.clone(),
                                guard: None,
                                body: block.clone(),
                            },
                            break_arm,
                        ],
                    });
                    match_expr.base.ty = Some(unit);
                    let mut true_cond = Expr::synthesized(ExprKind::LitConst {
                        kind: LitKind::Bool,
                        text: "true".to_string(),
                    });
                    let bool_ty = self.manager.bool_ty();
                    true_cond.base.ty = Some(bool_ty);
                    let mut desugar = Expr::synthesized(ExprKind::While {
                        cond: Box::new(true_cond),
                        block: Block::synthesized(vec![Stmt::Expr(match_expr)]),
                    });
                    desugar.base.ty = Some(unit);
                    expr.desugar = Some(Box::new(desugar));
                }
            }
        }
        unit
    }

    fn check_for_in(&mut self, expr: &mut Expr) -> TyId {
        let unit = self.manager.unit_ty();
        let (pattern_checked_ty, iterable_range) = {
            let (pattern, in_expr, guard, block) = match &mut expr.kind {
                ExprKind::ForIn {
                    pattern,
                    in_expr,
                    guard,
                    block,
                } => (pattern, in_expr, guard, block),
                _ => unreachable!(),
            };
            let in_ty = self.check_expr(in_expr, None);
            let elem = match self.manager.get(in_ty).clone() {
                Ty::Array { elem } => elem,
                Ty::VArray { elem, .. } => elem,
                Ty::Invalid => in_ty,
                _ => {
                    self.type_mismatch_msg(
                        "sema_mismatched_types",
                        "this type cannot be iterated",
                        in_expr.base.range(),
                    );
                    self.manager.invalid_ty()
                }
            };
            self.push_scope();
            self.check_pattern(pattern, elem);
            if let Some(guard) = guard {
                let bool_ty = self.manager.bool_ty();
                self.check_expr(guard, Some(bool_ty));
            }
            self.check_block(block, None);
            self.pop_scope();
            (elem, in_expr.base.range())
        };
        let _ = (pattern_checked_ty, iterable_range);

        // `for (P in e)` desugars to a match over each element binding
        if let ExprKind::ForIn { pattern, block, .. } = &expr.kind {
            let selector = Expr::synthesized(ExprKind::Wildcard);
            let mut selector = selector;
            selector.base.ty = Some(pattern_checked_ty);
            let mut match_expr = Expr::synthesized(ExprKind::Match {
                selector: Some(Box::new(selector)),
                arms: vec![MatchArm {
                    base: NodeBase::synthesized(),
                    patterns: vec![(**pattern).clone()],
                    guard: None,
                    body: block.clone(),
                }],
            });
            match_expr.base.ty = Some(unit);
            let mut true_cond = Expr::synthesized(ExprKind::LitConst {
                kind: LitKind::Bool,
                text: "true".to_string(),
            });
            let bool_ty = self.manager.bool_ty();
            true_cond.base.ty = Some(bool_ty);
            let mut desugar = Expr::synthesized(ExprKind::While {
                cond: Box::new(true_cond),
                block: Block::synthesized(vec![Stmt::Expr(match_expr)]),
            });
            desugar.base.ty = Some(unit);
            expr.desugar = Some(Box::new(desugar));
        }
        unit
    }

    fn check_match(&mut self, expr: &mut Expr, expected: Option<TyId>) -> TyId {
        let (selector, arms) = match &mut expr.kind {
            ExprKind::Match { selector, arms } => (selector, arms),
            _ => unreachable!(),
        };
        let selector_ty = match selector {
            Some(selector) => self.check_expr(selector, None),
            None => self.manager.bool_ty(),
        };
        let mut result: Option<TyId> = None;
        for arm in arms.iter_mut() {
            self.push_scope();
            // speculative bindings: commit, then merge on success
            self.visible.commit();
            for pattern in &mut arm.patterns {
                self.check_pattern(pattern, selector_ty);
            }
            if let Some(guard) = &mut arm.guard {
                let bool_ty = self.manager.bool_ty();
                self.check_expr(guard, Some(bool_ty));
            }
            let arm_ty = self.check_block(&mut arm.body, expected);
            self.visible.reset_soft();
            self.pop_scope();
            result = Some(match result {
                None => arm_ty,
                Some(prev) if prev == arm_ty => prev,
                Some(prev) if self.manager.is_subtype(arm_ty, prev) => prev,
                Some(prev) if self.manager.is_subtype(prev, arm_ty) => arm_ty,
                Some(_) => self.manager.unit_ty(),
            });
        }
        result.unwrap_or_else(|| self.manager.unit_ty())
    }

    /// `a?.b`-style access wraps into an `OptionalChainExpr` whose type
    /// is the optional of the access result.
    fn check_optional_chain(&mut self, expr: &mut Expr) -> TyId {
        let inner_ty = {
            let base_expr = match &mut expr.kind {
                ExprKind::Optional { base_expr } => base_expr,
                _ => unreachable!(),
            };
            // type the receiver first so its option layer is known, then
            // record the unwrapped value type the access applies to
            match &mut base_expr.kind {
                ExprKind::MemberAccess { receiver, .. }
                | ExprKind::Subscript { receiver, .. } => {
                    self.check_expr(receiver, None);
                }
                ExprKind::Call { callee, .. } => {
                    self.check_expr(callee, None);
                }
                ExprKind::TrailingClosure { expr: inner, .. } => {
                    self.check_expr(inner, None);
                }
                _ => {}
            }
            unwrap_optional_receivers(base_expr, &mut self.manager);
            self.check_expr(base_expr, None)
        };
        let ty = if self.manager.is_invalid(inner_ty) {
            inner_ty
        } else {
            self.manager.get_option_ty(inner_ty)
        };
        let access = match &expr.kind {
            ExprKind::Optional { base_expr } => base_expr.clone(),
            _ => unreachable!(),
        };
        let mut chain = Expr::synthesized(ExprKind::OptionalChain { expr: access });
        chain.base.ty = Some(ty);
        expr.desugar = Some(Box::new(chain));
        ty
    }

    /// String interpolation lowers to runtime string-builder calls.
    fn check_str_interpolation(&mut self, expr: &mut Expr) -> TyId {
        let string_ty = self.manager.string_ty();
        let builder = self.string_builder;
        let parts = match &mut expr.kind {
            ExprKind::StrInterpolation { parts } => parts,
            _ => unreachable!(),
        };
        let mut append_args: Vec<Expr> = vec![];
        for part in parts.iter_mut() {
            match part {
                StrPart::Text(text) => {
                    let mut lit = Expr::synthesized(ExprKind::LitConst {
                        kind: LitKind::Str,
                        text: text.clone(),
                    });
                    lit.base.ty = Some(string_ty);
                    append_args.push(lit);
                }
                StrPart::Interpolation(inner) => {
                    self.check_expr(inner, None);
                    append_args.push((**inner).clone());
                }
            }
        }
        let mut callee = Expr::synthesized(ExprKind::Ref {
            name: Ident::synthesized("$StringBuilder.append"),
            type_args: vec![],
        });
        callee.target = builder;
        callee.base.ty = Some(string_ty);
        let args = append_args
            .into_iter()
            .map(|arg| {
                let ty = arg.base.ty;
                let mut wrapped = Expr::synthesized(ExprKind::FuncArg {
                    name: None,
                    expr: Box::new(arg),
                });
                wrapped.base.ty = ty;
                wrapped
            })
            .collect();
        let mut call = Expr::synthesized(ExprKind::Call {
            callee: Box::new(callee),
            args,
        });
        call.target = builder;
        call.base.ty = Some(string_ty);
        expr.desugar = Some(Box::new(call));
        string_ty
    }

    // _____________________________________________________________________
    // patterns

    pub fn check_pattern(&mut self, pattern: &mut Pattern, selector_ty: TyId) {
        let range = pattern.base.range();
        match &mut pattern.kind {
            PatternKind::Wildcard => {
                pattern.base.ty = Some(selector_ty);
            }
            PatternKind::Const(expr) => {
                let ty = self.check_expr(expr, Some(selector_ty));
                self.require_assignable(ty, selector_ty, range);
                pattern.base.ty = Some(selector_ty);
            }
            PatternKind::Var { name, symbol } => {
                let id = self.table.add(
                    name.name.clone(),
                    SymbolKind::Var,
                    pattern.base.id,
                    None,
                    Attributes::empty(),
                );
                self.table.get_mut(id).ty = Some(selector_ty);
                *symbol = Some(id);
                let name = name.name.clone();
                self.declare(&name, id);
                pattern.base.ty = Some(selector_ty);
            }
            PatternKind::VarOrEnum { name } => {
                // resolves to an enum constructor if the selector's enum
                // has one of this name, else binds a fresh var
                let name = name.clone();
                let ctor = self
                    .manager
                    .nominal_decl(selector_ty)
                    .and_then(|decl| {
                        self.table
                            .get(decl)
                            .members
                            .iter()
                            .copied()
                            .find(|&m| {
                                self.table.get(m).kind == SymbolKind::EnumCtor
                                    && self.table.get(m).name == name.name
                            })
                    });
                let desugared = match ctor {
                    Some(ctor_symbol) => {
                        let mut ctor_ref = Expr::synthesized(ExprKind::Ref {
                            name: name.clone(),
                            type_args: vec![],
                        });
                        ctor_ref.target = Some(ctor_symbol);
                        ctor_ref.base.ty = Some(selector_ty);
                        let mut enum_pattern = Pattern::new(
                            NodeBase::synthesized(),
                            PatternKind::Enum {
                                constructor: Box::new(ctor_ref),
                                patterns: vec![],
                            },
                        );
                        enum_pattern.base.ty = Some(selector_ty);
                        enum_pattern
                    }
                    None => {
                        let mut var_pattern = Pattern::new(
                            NodeBase::synthesized(),
                            PatternKind::Var {
                                name: name.clone(),
                                symbol: None,
                            },
                        );
                        self.check_pattern(&mut var_pattern, selector_ty);
                        var_pattern
                    }
                };
                pattern.desugar = Some(Box::new(desugared));
                pattern.base.ty = Some(selector_ty);
            }
            PatternKind::Tuple(items) => {
                let item_tys: Vec<TyId> = match self.manager.get(selector_ty).clone() {
                    Ty::Tuple(tys) if tys.len() == items.len() => tys,
                    _ => {
                        let invalid = self.manager.invalid_ty();
                        vec![invalid; items.len()]
                    }
                };
                for (item, ty) in items.iter_mut().zip(item_tys) {
                    self.check_pattern(item, ty);
                }
                pattern.base.ty = Some(selector_ty);
            }
            PatternKind::Type { pattern: inner, ty } => {
                let target = self.resolve_type_anno(ty);
                self.check_pattern(inner, target);
                pattern.base.ty = Some(target);
            }
            PatternKind::Enum {
                constructor,
                patterns,
            } => {
                let ctor_symbol = self.resolve_enum_ctor(constructor, selector_ty);
                let param_tys: Vec<TyId> = ctor_symbol
                    .and_then(|s| self.table.get(s).sig.clone())
                    .map(|sig| sig.params)
                    .unwrap_or_default();
                // substitute the enum instantiation's arguments
                let map = self.enum_arg_map(selector_ty);
                for (sub, param_ty) in patterns.iter_mut().zip(param_tys) {
                    let ty = self.manager.instantiate(param_ty, &map);
                    self.check_pattern(sub, ty);
                }
                pattern.base.ty = Some(selector_ty);
            }
            PatternKind::ExceptType { types, pattern: inner } => {
                for anno in types.iter_mut() {
                    self.resolve_type_anno(anno);
                }
                let any = self.manager.any_ty();
                self.check_pattern(inner, any);
                pattern.base.ty = Some(selector_ty);
            }
        }
    }

    fn enum_arg_map(&mut self, enum_ty: TyId) -> HashMap<TyId, TyId> {
        match self.manager.get(enum_ty).clone() {
            Ty::Enum { decl, args, .. } => self
                .manager
                .decl_generic_params(decl)
                .to_vec()
                .into_iter()
                .zip(args)
                .collect(),
            _ => HashMap::new(),
        }
    }

    fn resolve_enum_ctor(&mut self, constructor: &mut Expr, selector_ty: TyId) -> Option<SymbolId> {
        let name = match &constructor.kind {
            ExprKind::Ref { name, .. } => name.name.clone(),
            ExprKind::MemberAccess { field, .. } => field.name.clone(),
            _ => return None,
        };
        let ctor = self.manager.nominal_decl(selector_ty).and_then(|decl| {
            self.table
                .get(decl)
                .members
                .iter()
                .copied()
                .find(|&m| self.table.get(m).name == name)
        });
        if let Some(ctor) = ctor {
            constructor.target = Some(ctor);
            constructor.base.ty = Some(selector_ty);
        }
        ctor
    }
}

fn empty_func_body() -> FuncBody {
    FuncBody {
        base: NodeBase::synthesized(),
        param_list: FuncParamList {
            base: NodeBase::synthesized(),
            params: vec![],
        },
        ret_ty: None,
        block: None,
    }
}

fn const_int_value(expr: &Expr) -> Option<u64> {
    match &expr.kind {
        ExprKind::LitConst { text, .. } => text.parse().ok(),
        _ => None,
    }
}

fn primitive_name(name: &str) -> Option<PrimitiveTyKind> {
    use PrimitiveTyKind::*;
    Some(match name {
        "Int8" => Int8,
        "Int16" => Int16,
        "Int32" => Int32,
        "Int64" => Int64,
        "UInt8" => UInt8,
        "UInt16" => UInt16,
        "UInt32" => UInt32,
        "UInt64" => UInt64,
        "Float16" => Float16,
        "Float32" => Float32,
        "Float64" => Float64,
        "Bool" => Bool,
        "Rune" => Rune,
        _ => return None,
    })
}

fn contains_optional(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Optional { .. } | ExprKind::OptionalChain { .. } => true,
        ExprKind::MemberAccess { receiver, .. } => contains_optional(receiver),
        ExprKind::Subscript { receiver, .. } => contains_optional(receiver),
        ExprKind::Call { callee, .. } => contains_optional(callee),
        _ => false,
    }
}

/// Inside a questioned access the receiver value is the unwrapped
/// option. A set `ty` is never changed, so the unwrap is a desugar: a
/// synthesized copy of the receiver carrying the inner type.
fn unwrap_optional_receivers(expr: &mut Expr, manager: &mut TypeManager) {
    let receiver = match &mut expr.kind {
        ExprKind::MemberAccess { receiver, .. } => receiver,
        ExprKind::Subscript { receiver, .. } => receiver,
        ExprKind::Call { callee, .. } => callee,
        ExprKind::TrailingClosure { expr, .. } => expr,
        _ => return,
    };
    if let Some(ty) = receiver.effective_ty() {
        if let Some(inner) = manager.option_inner(ty) {
            let mut unwrapped = receiver.effective().clone();
            unwrapped.base.ty = Some(inner);
            unwrapped.base.map_expr = Some(receiver.base.id);
            unwrapped.base.attrs |= Attributes::COMPILER_ADD;
            receiver.desugar = Some(Box::new(unwrapped));
        }
    }
}

fn block_returns(block: &Block) -> bool {
    matches!(
        block.stmts.last(),
        Some(Stmt::Expr(e)) if matches!(
            e.kind,
            ExprKind::Return { .. } | ExprKind::Throw { .. }
        )
    )
}
