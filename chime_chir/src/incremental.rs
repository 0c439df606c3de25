//! Incremental-compilation cache: a flat image of the previous build's
//! declarations, and the loader that rebinds unchanged declarations and
//! computes the removal set.
//!
//! The loader never fails hard: a corrupt image degrades to a full
//! rebuild (an empty removal set with nothing imported); a mismatched
//! declaration is left for the checker to recompute.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{debug, warn};

use chime_syntax::ast::{
    AnnotationKind, Attributes, Decl, DeclKind, Ident, NodeBase, Package,
};
use chime_syntax::source::SourceManager;

pub const CACHE_MAGIC: &[u8; 4] = b"CHAC";
pub const CACHE_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedDecl {
    pub mangled_before_sema: String,
    /// Final mangled name; empty when the decl was never emitted.
    pub mangled_name: String,
    pub export_id: String,
    pub kind_tag: u8,
    /// Hash of the decl's source text, for unchanged detection.
    pub src_hash: u64,
    pub is_inline: bool,
    pub is_generic_instantiation: bool,
    /// `mangled_before_sema` of the generic origin; empty when none.
    pub generic_origin: String,
    pub generic_arity: u32,
    pub param_count: u32,
    pub omitted_ret_ty: bool,
    /// An unchanged main/macro decl reattaches its cached desugar.
    pub has_desugar: bool,
    pub is_annotation: bool,
    pub annotation_targets: u64,
    pub runtime_visible: bool,
    /// Whether default parameters introduced inline-flagged synthetics.
    pub inline_default_synthetics: bool,
    /// Full removal closure: prop accessors, default-parameter
    /// synthetics and copied default implementations.
    pub removal_members: Vec<String>,
    pub generic_param_names: Vec<String>,
    /// Parameter-position mapping of the emitted signature.
    pub param_positions: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedPackage {
    pub name: String,
    pub files: Vec<String>,
    pub decls: Vec<CachedDecl>,
    pub dependent_packages: Vec<String>,
}

// _________________________________________________________________________
// building the image

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn decl_kind_tag(decl: &Decl) -> u8 {
    match &decl.kind {
        DeclKind::Var(_) | DeclKind::VarWithPattern(_) => 0,
        DeclKind::Func(_) => 1,
        DeclKind::Class(_) => 2,
        DeclKind::Interface(_) => 3,
        DeclKind::Struct(_) => 4,
        DeclKind::Enum(_) => 5,
        DeclKind::Extend(_) => 6,
        DeclKind::TypeAlias(_) => 7,
        DeclKind::Prop(_) => 8,
        DeclKind::Macro(_) => 9,
        DeclKind::Main(_) => 10,
        DeclKind::PrimaryCtor(_) => 11,
        _ => 255,
    }
}

fn member_mangles(decl: &Decl) -> Vec<String> {
    let mut out = vec![];
    let mut push = |member: &Decl| {
        if let Some(mangled) = &member.mangled_name {
            out.push(mangled.clone());
        }
    };
    match &decl.kind {
        DeclKind::Class(c) | DeclKind::Interface(c) | DeclKind::Struct(c) => {
            for member in &c.body {
                push(member);
                if let DeclKind::Prop(prop) = &member.kind {
                    for accessor in prop.getters.iter().chain(prop.setters.iter()) {
                        push(accessor);
                    }
                }
            }
        }
        DeclKind::Enum(e) => {
            for member in e.constructors.iter().chain(e.members.iter()) {
                push(member);
            }
        }
        DeclKind::Extend(e) => {
            for member in &e.body {
                push(member);
            }
        }
        DeclKind::Prop(prop) => {
            for accessor in prop.getters.iter().chain(prop.setters.iter()) {
                push(accessor);
            }
        }
        _ => {}
    }
    out
}

fn cache_one_decl(decl: &Decl, source_manager: &SourceManager) -> CachedDecl {
    let text = source_manager.content_between(decl.base.begin, decl.base.end, None);
    let (generic_arity, generic_param_names) = match &decl.generic {
        Some(generic) => (
            generic.type_parameters.len() as u32,
            generic
                .type_parameters
                .iter()
                .map(|p| p.name.name.clone())
                .collect(),
        ),
        None => (0, vec![]),
    };
    let (param_count, omitted_ret_ty, param_positions, inline_default_synthetics) =
        match decl.func() {
            Some(func) => {
                let params = &func.body.param_list.params;
                (
                    params.len() as u32,
                    func.body.ret_ty.is_none(),
                    (0..params.len() as u32).collect(),
                    decl.is_inline
                        && params.iter().any(|p| {
                            matches!(&p.kind, DeclKind::FuncParam(fp) if fp.default_value.is_some())
                        }),
                )
            }
            None => (0, false, vec![], false),
        };
    let annotation = decl
        .annotations
        .iter()
        .find(|a| a.kind == AnnotationKind::Annotation);
    CachedDecl {
        mangled_before_sema: decl.mangled_before_sema.clone().unwrap_or_default(),
        mangled_name: decl.mangled_name.clone().unwrap_or_default(),
        export_id: decl.export_id.clone().unwrap_or_default(),
        kind_tag: decl_kind_tag(decl),
        src_hash: hash_text(&text),
        is_inline: decl.is_inline,
        is_generic_instantiation: false,
        generic_origin: String::new(),
        generic_arity,
        param_count,
        omitted_ret_ty,
        has_desugar: decl.desugar_decl.is_some()
            || matches!(decl.kind, DeclKind::Main(_) | DeclKind::Macro(_)),
        is_annotation: decl.base.has_attr(Attributes::IS_ANNOTATION),
        annotation_targets: annotation.and_then(|a| a.targets).unwrap_or(0),
        runtime_visible: annotation.map_or(false, |a| a.runtime_visible),
        inline_default_synthetics,
        removal_members: member_mangles(decl),
        generic_param_names,
        param_positions,
    }
}

/// Snapshot a checked package into a cache image.
pub fn build_cache(package: &Package, source_manager: &SourceManager) -> CachedPackage {
    let mut cached = CachedPackage {
        name: package.name.clone(),
        files: package.files.iter().map(|f| f.path.clone()).collect(),
        decls: vec![],
        dependent_packages: vec![],
    };
    for file in &package.files {
        for import in &file.imports {
            if let DeclKind::ImportSpec(spec) = &import.kind {
                let path: Vec<String> = spec.path.iter().map(|i| i.name.clone()).collect();
                let joined = path.join(".");
                if !cached.dependent_packages.contains(&joined) {
                    cached.dependent_packages.push(joined);
                }
            }
        }
        for decl in &file.decls {
            cached.decls.push(cache_one_decl(decl, source_manager));
        }
    }
    for decl in &package.instantiated_decls {
        let mut entry = cache_one_decl(decl, source_manager);
        entry.is_generic_instantiation = true;
        // instantiated names are `origin$args`; strip the argument
        // suffix while keeping the arity tail to recover the origin key
        let full = decl.mangled_before_sema.clone().unwrap_or_default();
        entry.generic_origin = match full.split_once('$') {
            Some((head, tail)) => match tail.rsplit_once('/') {
                Some((_, arity)) => format!("{}/{}", head, arity),
                None => head.to_string(),
            },
            None => full,
        };
        cached.decls.push(entry);
    }
    cached
}

// _________________________________________________________________________
// binary image encode/decode

fn write_str(out: &mut Vec<u8>, text: &str) {
    let _ = out.write_u32::<LittleEndian>(text.len() as u32);
    out.extend_from_slice(text.as_bytes());
}

fn write_str_list(out: &mut Vec<u8>, list: &[String]) {
    let _ = out.write_u32::<LittleEndian>(list.len() as u32);
    for item in list {
        write_str(out, item);
    }
}

pub fn encode_cache(cached: &CachedPackage) -> Vec<u8> {
    let mut out = vec![];
    out.extend_from_slice(CACHE_MAGIC);
    let _ = out.write_u32::<LittleEndian>(CACHE_VERSION);
    write_str(&mut out, &cached.name);
    write_str_list(&mut out, &cached.files);
    write_str_list(&mut out, &cached.dependent_packages);
    let _ = out.write_u32::<LittleEndian>(cached.decls.len() as u32);
    for decl in &cached.decls {
        write_str(&mut out, &decl.mangled_before_sema);
        write_str(&mut out, &decl.mangled_name);
        write_str(&mut out, &decl.export_id);
        let _ = out.write_u8(decl.kind_tag);
        let _ = out.write_u64::<LittleEndian>(decl.src_hash);
        let flags: u8 = (decl.is_inline as u8)
            | ((decl.is_generic_instantiation as u8) << 1)
            | ((decl.omitted_ret_ty as u8) << 2)
            | ((decl.has_desugar as u8) << 3)
            | ((decl.is_annotation as u8) << 4)
            | ((decl.runtime_visible as u8) << 5)
            | ((decl.inline_default_synthetics as u8) << 6);
        let _ = out.write_u8(flags);
        write_str(&mut out, &decl.generic_origin);
        let _ = out.write_u32::<LittleEndian>(decl.generic_arity);
        let _ = out.write_u32::<LittleEndian>(decl.param_count);
        let _ = out.write_u64::<LittleEndian>(decl.annotation_targets);
        write_str_list(&mut out, &decl.removal_members);
        write_str_list(&mut out, &decl.generic_param_names);
        let _ = out.write_u32::<LittleEndian>(decl.param_positions.len() as u32);
        for &position in &decl.param_positions {
            let _ = out.write_u32::<LittleEndian>(position);
        }
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|s| s[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(LittleEndian::read_u64)
    }

    fn str(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn str_list(&mut self) -> Option<Vec<String>> {
        let len = self.u32()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.str()?);
        }
        Some(out)
    }
}

/// Decode an image; `None` means corrupt, which callers treat as "full
/// rebuild" (an empty removal set).
pub fn decode_cache(buf: &[u8]) -> Option<CachedPackage> {
    let mut reader = Reader { buf, pos: 0 };
    if reader.take(4)? != CACHE_MAGIC {
        return None;
    }
    if reader.u32()? != CACHE_VERSION {
        return None;
    }
    let name = reader.str()?;
    let files = reader.str_list()?;
    let dependent_packages = reader.str_list()?;
    let decl_count = reader.u32()? as usize;
    let mut decls = Vec::with_capacity(decl_count);
    for _ in 0..decl_count {
        let mangled_before_sema = reader.str()?;
        let mangled_name = reader.str()?;
        let export_id = reader.str()?;
        let kind_tag = reader.u8()?;
        let src_hash = reader.u64()?;
        let flags = reader.u8()?;
        let generic_origin = reader.str()?;
        let generic_arity = reader.u32()?;
        let param_count = reader.u32()?;
        let annotation_targets = reader.u64()?;
        let removal_members = reader.str_list()?;
        let generic_param_names = reader.str_list()?;
        let position_count = reader.u32()? as usize;
        let mut param_positions = Vec::with_capacity(position_count);
        for _ in 0..position_count {
            param_positions.push(reader.u32()?);
        }
        decls.push(CachedDecl {
            mangled_before_sema,
            mangled_name,
            export_id,
            kind_tag,
            src_hash,
            is_inline: flags & 1 != 0,
            is_generic_instantiation: flags & 2 != 0,
            generic_origin,
            generic_arity,
            param_count,
            omitted_ret_ty: flags & 4 != 0,
            has_desugar: flags & 8 != 0,
            is_annotation: flags & 16 != 0,
            annotation_targets,
            runtime_visible: flags & 32 != 0,
            inline_default_synthetics: flags & 64 != 0,
            removal_members,
            generic_param_names,
            param_positions,
        });
    }
    Some(CachedPackage {
        name,
        files,
        decls,
        dependent_packages,
    })
}

// _________________________________________________________________________
// loading

/// Rebind unchanged declarations from a cached image against the newly
/// parsed package and compute the set of mangled names the back-end must
/// remove. A corrupt image yields an empty set and imports nothing.
pub fn load_cached_package(
    image: &[u8],
    package: &mut Package,
    source_manager: &SourceManager,
) -> BTreeSet<String> {
    let cached = match decode_cache(image) {
        Some(cached) => cached,
        None => {
            warn!("corrupt incremental image, falling back to full rebuild");
            return BTreeSet::new();
        }
    };
    load_verified_cache(&cached, package, source_manager)
}

pub fn load_verified_cache(
    cached: &CachedPackage,
    package: &mut Package,
    source_manager: &SourceManager,
) -> BTreeSet<String> {
    let mut removed = BTreeSet::new();

    // file-id translation table: sized to the larger of the two file
    // lists; source files keep their current ids
    let mut file_ids = vec![0u32; cached.files.len().max(package.files.len())];
    for (index, file) in package.files.iter().enumerate() {
        file_ids[index] = file.file_id;
    }
    debug!("prepared {} file-id slots", file_ids.len());

    // the source package's decl index by pre-sema mangling
    let mut source_decls: HashMap<String, &mut Decl> = HashMap::new();
    for file in &mut package.files {
        for decl in &mut file.decls {
            if let Some(key) = decl.mangled_before_sema.clone() {
                source_decls.insert(key, decl);
            }
        }
    }

    // pool order is preserved so references never resolve before their
    // object is ready
    let mut queued_instantiations: Vec<&CachedDecl> = vec![];
    let mut to_be_compiled_origins: BTreeSet<String> = BTreeSet::new();

    for entry in &cached.decls {
        if entry.is_generic_instantiation {
            queued_instantiations.push(entry);
            continue;
        }
        let decl = match source_decls.get_mut(&entry.mangled_before_sema) {
            None => {
                // removed from source: everything it emitted must go,
                // including accessors, synthetics and copied impls
                if !entry.mangled_name.is_empty() {
                    removed.insert(entry.mangled_name.clone());
                    for member in &entry.removal_members {
                        removed.insert(member.clone());
                    }
                }
                continue;
            }
            Some(decl) => decl,
        };

        let shape_changed = entry.generic_arity
            != decl.generic.as_ref().map_or(0, |g| g.type_parameters.len() as u32)
            || decl.func().map_or(false, |f| {
                f.body.param_list.params.len() as u32 != entry.param_count
            });
        let text = source_manager.content_between(decl.base.begin, decl.base.end, None);
        let src_changed = hash_text(&text) != entry.src_hash;

        if shape_changed || src_changed {
            // do not import; the checker recomputes, the back-end re-emits
            decl.to_be_compiled = true;
            to_be_compiled_origins.insert(entry.mangled_before_sema.clone());
            continue;
        }

        // unchanged: rebind type identity, mangled name, exported id and
        // generic-parameter targets from the cache
        decl.mangled_name = Some(entry.mangled_name.clone());
        decl.export_id = Some(entry.export_id.clone());
        decl.base.enable_attr(Attributes::INCRE_COMPILE);
        if let Some(generic) = &mut decl.generic {
            for (param, name) in generic
                .type_parameters
                .iter_mut()
                .zip(&entry.generic_param_names)
            {
                param.base.enable_attr(Attributes::INCRE_COMPILE);
                debug_assert_eq!(&param.name.name, name);
            }
        }
        if let Some(func) = decl.func() {
            debug_assert_eq!(
                func.body.param_list.params.len(),
                entry.param_positions.len()
            );
        }

        // unchanged @Annotation decls keep their targets and visibility
        if entry.is_annotation {
            decl.base.enable_attr(Attributes::IS_ANNOTATION);
            if let Some(annotation) = decl
                .annotations
                .iter_mut()
                .find(|a| a.kind == AnnotationKind::Annotation)
            {
                annotation.targets = Some(entry.annotation_targets);
                annotation.runtime_visible = entry.runtime_visible;
            }
        }

        // unchanged main/macro decls reattach the cached desugar
        if entry.has_desugar
            && matches!(decl.kind, DeclKind::Main(_) | DeclKind::Macro(_))
            && decl.desugar_decl.is_none()
        {
            let mut desugar = Decl::new(
                NodeBase::synthesized(),
                Ident::synthesized(format!("{}$desugar", decl.name.name)),
                DeclKind::BuiltIn,
            );
            desugar.mangled_name = Some(entry.mangled_name.clone());
            desugar.base.enable_attr(Attributes::INCRE_COMPILE);
            decl.desugar_decl = Some(Box::new(desugar));
        }

        // compile-inline detection: inline-eligible entries whose default
        // parameters introduced inline synthetics must be re-emitted
        if entry.is_inline && entry.inline_default_synthetics {
            decl.to_be_compiled = true;
            to_be_compiled_origins.insert(entry.mangled_before_sema.clone());
        }
    }

    // instantiations whose origin is gone or queued for recompilation
    // lose their caches
    for entry in queued_instantiations {
        let origin_missing = !source_decls.contains_key(&entry.generic_origin);
        let origin_dirty = to_be_compiled_origins.contains(&entry.generic_origin);
        if origin_missing || origin_dirty {
            if !entry.mangled_name.is_empty() {
                removed.insert(entry.mangled_name.clone());
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_errors::{Emitter, Handler};
    use chime_sema::check::TypeChecker;
    use chime_sema::pipeline::run_sema;
    use chime_syntax::parse::{parse_file, ParseSess};
    use chime_syntax::source::SourceManager as Sm;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct NullEmitter;

    impl Emitter for NullEmitter {
        fn emit(&mut self, _diagnostic: &chime_errors::Diagnostic) {}
    }

    fn checked_package(src: &str) -> (Package, ParseSess) {
        let handler = Handler::with_emitter(false, Box::new(NullEmitter));
        let source_manager = Rc::new(RefCell::new(Sm::new()));
        let sess = ParseSess::with_handler(handler, source_manager);
        let file = parse_file(&sess, "pkg/lib.cm", src);
        let mut package = Package::new("demo");
        package.files.push(file);
        {
            let mut checker = TypeChecker::new(&sess, "demo");
            run_sema(&mut checker, &mut package);
        }
        (package, sess)
    }

    const V1: &str = "public func g(x: Int64): Int64 { return x }\n\
                      public func h(x: Int64): Int64 { return x + 1 }\n";

    #[test]
    fn test_cache_round_trip() {
        let (package, sess) = checked_package(V1);
        let cached = build_cache(&package, &sess.source_manager());
        let decoded = decode_cache(&encode_cache(&cached)).expect("image decodes");
        assert_eq!(cached, decoded);
    }

    #[test]
    fn test_corrupt_image_is_full_rebuild() {
        let (mut package, sess) = checked_package(V1);
        let removed = load_cached_package(b"garbage", &mut package, &sess.source_manager());
        assert!(removed.is_empty());
    }

    #[test]
    fn test_unchanged_decl_rebinds() {
        // v1 and v2 identical for g: the cache rebinds and the decl stays
        // off the to-be-compiled list
        let (package_v1, sess_v1) = checked_package(V1);
        let cached = build_cache(&package_v1, &sess_v1.source_manager());
        let image = encode_cache(&cached);

        let (mut package_v2, sess_v2) = checked_package(V1);
        let expected: Vec<Option<String>> = package_v2.files[0]
            .decls
            .iter()
            .map(|d| d.mangled_name.clone())
            .collect();
        // clear what the fresh run computed so the rebind is observable
        for decl in &mut package_v2.files[0].decls {
            decl.mangled_name = None;
            decl.export_id = None;
        }
        let removed =
            load_cached_package(&image, &mut package_v2, &sess_v2.source_manager());
        assert!(removed.is_empty());
        for (decl, expected_mangled) in package_v2.files[0].decls.iter().zip(expected) {
            assert!(!decl.to_be_compiled, "{} must stay clean", decl.name.name);
            assert!(decl.base.has_attr(Attributes::INCRE_COMPILE));
            // the rebound identity equals what a full rebuild computes
            assert_eq!(decl.mangled_name, expected_mangled);
        }
    }

    #[test]
    fn test_changed_decl_not_imported() {
        let (package_v1, sess_v1) = checked_package(V1);
        let image = encode_cache(&build_cache(&package_v1, &sess_v1.source_manager()));

        let v2 = "public func g(x: Int64): Int64 { return x * 2 }\n\
                  public func h(x: Int64): Int64 { return x + 1 }\n";
        let (mut package_v2, sess_v2) = checked_package(v2);
        let removed =
            load_cached_package(&image, &mut package_v2, &sess_v2.source_manager());
        assert!(removed.is_empty());
        let g = package_v2.files[0]
            .decls
            .iter()
            .find(|d| d.name.name == "g")
            .unwrap();
        assert!(g.to_be_compiled);
        let h = package_v2.files[0]
            .decls
            .iter()
            .find(|d| d.name.name == "h")
            .unwrap();
        assert!(!h.to_be_compiled);
    }

    #[test]
    fn test_removed_decl_in_removal_set() {
        let (package_v1, sess_v1) = checked_package(V1);
        let image = encode_cache(&build_cache(&package_v1, &sess_v1.source_manager()));

        let v2 = "public func g(x: Int64): Int64 { return x }\n";
        let (mut package_v2, sess_v2) = checked_package(v2);
        let removed =
            load_cached_package(&image, &mut package_v2, &sess_v2.source_manager());
        assert_eq!(removed.len(), 1);
        let gone = removed.iter().next().unwrap();
        assert!(gone.contains("h"), "removal set names h, got {}", gone);
    }

    #[test]
    fn test_instantiation_cache_cleared_when_origin_dirty() {
        let generic_src = "public func id<T>(x: T): T { return x }\n\
                           main() { let a = id<Int64>(1) }\n";
        let (package_v1, sess_v1) = checked_package(generic_src);
        assert!(!package_v1.instantiated_decls.is_empty());
        let image = encode_cache(&build_cache(&package_v1, &sess_v1.source_manager()));

        let changed = "public func id<T>(x: T): T { let y = x\nreturn y }\n\
                       main() { let a = id<Int64>(1) }\n";
        let (mut package_v2, sess_v2) = checked_package(changed);
        let removed =
            load_cached_package(&image, &mut package_v2, &sess_v2.source_manager());
        // the instantiation of the dirty origin lost its cache
        assert!(
            removed.iter().any(|m| m.contains("id$")),
            "expected an instantiation in {:?}",
            removed
        );
    }
}
