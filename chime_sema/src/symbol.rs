//! The symbol table produced by the checker's collection pass.
//!
//! Symbols are plain data keyed by `SymbolId`; the AST references them
//! through resolved-target fields and the table references the AST back
//! through node ids. Neither side owns the other.

use chime_syntax::ast::{Attributes, NodeId, SymbolId, TyId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Package,
    Var,
    Func,
    Param,
    Prop,
    Class,
    Interface,
    Struct,
    Enum,
    EnumCtor,
    Extend,
    TypeAlias,
    GenericParam,
    Macro,
    Main,
    BuiltIn,
}

impl SymbolKind {
    pub fn is_nominal(self) -> bool {
        matches!(
            self,
            SymbolKind::Class | SymbolKind::Interface | SymbolKind::Struct | SymbolKind::Enum
        )
    }
}

/// Callable signature used by overload resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncSig {
    pub params: Vec<TyId>,
    pub ret: TyId,
}

#[derive(Clone, Debug)]
pub struct SymbolInfo {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    /// The declaring AST node.
    pub node: NodeId,
    /// Enclosing nominal type or function.
    pub parent: Option<SymbolId>,
    pub ty: Option<TyId>,
    pub sig: Option<FuncSig>,
    pub attrs: Attributes,
    pub mangled: Option<String>,
    pub mangled_before_sema: Option<String>,
    pub export_id: Option<String>,
    /// Member symbols of a nominal type, in declaration order.
    pub members: Vec<SymbolId>,
    pub generic_params: Vec<SymbolId>,
    pub is_inline: bool,
}

impl SymbolInfo {
    pub fn is_exported(&self) -> bool {
        self.attrs.contains(Attributes::PUBLIC) || self.attrs.contains(Attributes::PROTECTED)
    }
}

#[derive(Default)]
pub struct SymbolTable {
    infos: Vec<SymbolInfo>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable { infos: vec![] }
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: SymbolKind,
        node: NodeId,
        parent: Option<SymbolId>,
        attrs: Attributes,
    ) -> SymbolId {
        let id = SymbolId(self.infos.len() as u32);
        self.infos.push(SymbolInfo {
            id,
            name: name.into(),
            kind,
            node,
            parent,
            ty: None,
            sig: None,
            attrs,
            mangled: None,
            mangled_before_sema: None,
            export_id: None,
            members: vec![],
            generic_params: vec![],
            is_inline: false,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &SymbolInfo {
        &self.infos[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut SymbolInfo {
        &mut self.infos[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.infos.iter()
    }

    /// Whether `inner` is declared (transitively) inside `outer`.
    pub fn is_inside(&self, inner: SymbolId, outer: SymbolId) -> bool {
        let mut cur = Some(inner);
        while let Some(id) = cur {
            if id == outer {
                return true;
            }
            cur = self.get(id).parent;
        }
        false
    }
}
