//! The semantic pipeline over one package.
//!
//! Phases are strictly sequential: check, option boxing over the
//! pre-instantiation tree, extension box marking and rewrite, generic
//! instantiation, a second option-box run over the instantiated copies,
//! and inline analysis.

use chime_syntax::ast::Package;

use crate::boxing;
use crate::check::TypeChecker;
use crate::inline;
use crate::instantiate;

pub fn run_sema(checker: &mut TypeChecker<'_>, package: &mut Package) {
    checker.check_package(package);

    // option boxing before instantiation, writing `desugar` links so
    // generic code boxes value types into Option at decls and calls
    boxing::run_option_box(checker, package);

    boxing::mark_extend_boxes(checker, package);
    boxing::run_auto_box(checker, package);

    instantiate::instantiate_package(checker, package);

    // the post-instantiation option pass covers the monomorphic copies
    boxing::run_option_box(checker, package);

    inline::analyze_inline(checker, package);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;
    use chime_errors::{Diagnostic, Emitter, Handler};
    use chime_syntax::ast::*;
    use chime_syntax::parse::{parse_file, ParseSess};
    use chime_syntax::source::SourceManager;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    struct Sink(Arc<Mutex<Vec<Diagnostic>>>);

    impl Emitter for Sink {
        fn emit(&mut self, diagnostic: &Diagnostic) {
            self.0.lock().unwrap().push(diagnostic.clone());
        }
    }

    fn test_sess() -> (ParseSess, Arc<Mutex<Vec<Diagnostic>>>) {
        let sink = Arc::new(Mutex::new(vec![]));
        let handler = Handler::with_emitter(false, Box::new(Sink(sink.clone())));
        let source_manager = Rc::new(RefCell::new(SourceManager::new()));
        (ParseSess::with_handler(handler, source_manager), sink)
    }

    fn run(src: &str) -> (Package, Vec<Diagnostic>, ParseSess) {
        let (sess, sink) = test_sess();
        let file = parse_file(&sess, "test.cm", src);
        let mut package = Package::new("demo");
        package.files.push(file);
        {
            let mut checker = TypeChecker::new(&sess, "demo");
            run_sema(&mut checker, &mut package);
        }
        let diags = sink.lock().unwrap().clone();
        (package, diags, sess)
    }

    fn run_with_checker<'a>(
        sess: &'a ParseSess,
        src: &str,
    ) -> (Package, TypeChecker<'a>) {
        let file = parse_file(sess, "test.cm", src);
        let mut package = Package::new("demo");
        package.files.push(file);
        let mut checker = TypeChecker::new(sess, "demo");
        run_sema(&mut checker, &mut package);
        (package, checker)
    }

    fn main_block(package: &Package) -> &Block {
        package
            .files
            .iter()
            .flat_map(|f| f.decls.iter())
            .find_map(|d| match &d.kind {
                DeclKind::Main(m) => m.body.block.as_ref(),
                _ => None,
            })
            .expect("main with a body")
    }

    #[test]
    fn test_simple_program_checks_clean() {
        let (_, diags, _) = run(
            "public func add(a: Int64, b: Int64): Int64 { return a + b }\n\
             main() { let x = add(1, 2) }\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_undeclared_identifier_reported() {
        let (_, diags, _) = run("main() { let x = missing }\n");
        assert!(diags
            .iter()
            .any(|d| d.code.as_deref() == Some("sema_undeclared_identifier")));
    }

    #[test]
    fn test_type_mismatch_reported_and_checking_continues() {
        let (_, diags, _) = run(
            "func f(x: Bool) {}\n\
             main() { f(1)\nlet y = missing }\n",
        );
        assert!(diags
            .iter()
            .any(|d| d.code.as_deref() == Some("sema_no_matching_function")
                || d.code.as_deref() == Some("sema_mismatched_types")));
        // the checker kept going past the first error
        assert!(diags
            .iter()
            .any(|d| d.code.as_deref() == Some("sema_undeclared_identifier")));
    }

    #[test]
    fn test_autobox_through_extension() {
        // scenario: a class reaching an interface only through `extend`
        let sess = {
            let sink = Arc::new(Mutex::new(vec![]));
            let handler = Handler::with_emitter(false, Box::new(Sink(sink)));
            let source_manager = Rc::new(RefCell::new(SourceManager::new()));
            ParseSess::with_handler(handler, source_manager)
        };
        let (package, mut checker) = run_with_checker(
            &sess,
            "interface I {}\n\
             class A <: Object { public func m() {} }\n\
             extend A <: I {}\n\
             func f(v: I) {}\n\
             main() { f(A()) }\n",
        );

        // the argument to f is rewritten to a call of a box class
        let block = main_block(&package);
        let call = match &block.stmts[0] {
            Stmt::Expr(e) => e,
            other => panic!("unexpected stmt {:?}", other),
        };
        let arg_inner = match &call.kind {
            ExprKind::Call { args, .. } => match &args[0].kind {
                ExprKind::FuncArg { expr, .. } => expr,
                other => panic!("expected FuncArg, got {:?}", other),
            },
            other => panic!("expected a call, got {:?}", other),
        };
        let boxed = arg_inner
            .desugar
            .as_ref()
            .expect("argument boxed through a desugar");
        let box_target = match &boxed.kind {
            ExprKind::Call { callee, .. } => callee.target.expect("box ctor target"),
            other => panic!("expected a box call, got {:?}", other),
        };
        let box_name = checker.table.get(box_target).name.clone();
        assert!(box_name.starts_with("Box_"), "got {}", box_name);

        // the boxed base class inherits I
        let base = checker
            .table
            .iter()
            .find(|info| info.name == "Box_C1A")
            .map(|info| info.id)
            .expect("boxed base class generated");
        let base_ty = checker.table.get(base).ty.unwrap();
        let iface = checker
            .table
            .iter()
            .find(|info| info.name == "I" && info.kind == SymbolKind::Interface)
            .map(|info| info.id)
            .unwrap();
        let iface_ty = checker.manager.get_interface_ty(iface, vec![]);
        assert!(checker.manager.is_subtype(base_ty, iface_ty));

        // the boxed base also carries a $value field and a forwarding
        // thunk for the public method m
        let members: Vec<String> = checker
            .table
            .get(base)
            .members
            .iter()
            .map(|&m| checker.table.get(m).name.clone())
            .collect();
        assert!(members.contains(&"$value".to_string()));
        assert!(members.contains(&"m".to_string()));
    }

    #[test]
    fn test_option_autobox_wraps_some() {
        // scenario: `f(3)` into `f(x: ?Int64)` becomes `f(Some(3))`
        let (package, diags, _) = run(
            "func f(x: ?Int64) {}\n\
             main() { f(3) }\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let block = main_block(&package);
        let call = match &block.stmts[0] {
            Stmt::Expr(e) => e,
            other => panic!("unexpected stmt {:?}", other),
        };
        let arg_inner = match &call.kind {
            ExprKind::Call { args, .. } => match &args[0].kind {
                ExprKind::FuncArg { expr, .. } => expr,
                other => panic!("expected FuncArg, got {:?}", other),
            },
            other => panic!("expected a call, got {:?}", other),
        };
        let wrapped = arg_inner.desugar.as_ref().expect("Some-wrap desugar");
        match &wrapped.kind {
            ExprKind::Call { callee, args } => {
                match &callee.kind {
                    ExprKind::Ref { name, .. } => assert_eq!(name.name, "Some"),
                    other => panic!("expected Some, got {:?}", other),
                }
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected a Some call, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_instantiation() {
        let sess = {
            let sink = Arc::new(Mutex::new(vec![]));
            let handler = Handler::with_emitter(false, Box::new(Sink(sink)));
            let source_manager = Rc::new(RefCell::new(SourceManager::new()));
            ParseSess::with_handler(handler, source_manager)
        };
        let (package, checker) = run_with_checker(
            &sess,
            "public func id<T>(x: T): T { return x }\n\
             main() { let a = id<Int64>(1)\nlet b = id<Bool>(true)\nlet c = id<Int64>(2) }\n",
        );
        // one monomorphic copy per distinct instantiation key
        assert_eq!(package.instantiated_decls.len(), 2);
        let names: Vec<&str> = package
            .instantiated_decls
            .iter()
            .map(|d| d.name.name.as_str())
            .collect();
        assert!(names.iter().any(|n| n.contains("i64")), "{:?}", names);
        assert!(names.iter().any(|n| n.contains("b")), "{:?}", names);
        // the copies re-checked to concrete signatures
        for decl in &package.instantiated_decls {
            let ty = decl.base.ty.expect("instantiated decl typed");
            match checker.manager.get(ty) {
                crate::types::Ty::Func { params, ret, .. } => {
                    assert_eq!(params.len(), 1);
                    assert_eq!(params[0], *ret);
                }
                other => panic!("expected a function type, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unable_to_infer_generic_argument() {
        let (_, diags, _) = run(
            "public func first<T, U>(x: T): T { return x }\n\
             main() { let a = first(1) }\n",
        );
        assert!(diags
            .iter()
            .any(|d| d.code.as_deref() == Some("sema_unable_to_infer_generic_argument")));
    }

    #[test]
    fn test_overload_most_specific() {
        let sess = {
            let sink = Arc::new(Mutex::new(vec![]));
            let handler = Handler::with_emitter(false, Box::new(Sink(sink)));
            let source_manager = Rc::new(RefCell::new(SourceManager::new()));
            ParseSess::with_handler(handler, source_manager)
        };
        let (package, checker) = run_with_checker(
            &sess,
            "interface I {}\n\
             class A <: I {}\n\
             func g(v: I): Int64 { return 1 }\n\
             func g(v: A): Int64 { return 2 }\n\
             main() { let r = g(A()) }\n",
        );
        // the A overload wins for an A argument
        let block = main_block(&package);
        let target = match &block.stmts[0] {
            Stmt::Decl(decl) => match &decl.kind {
                DeclKind::Var(var) => var.init.as_ref().unwrap().target.unwrap(),
                other => panic!("unexpected decl {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        };
        let info = checker.table.get(target);
        let param = info.sig.as_ref().unwrap().params[0];
        let a_decl = checker
            .table
            .iter()
            .find(|i| i.name == "A" && i.kind == SymbolKind::Class)
            .unwrap()
            .id;
        assert_eq!(checker.manager.nominal_decl(param), Some(a_decl));
    }

    #[test]
    fn test_trailing_closure_desugars_into_call() {
        let (package, diags, _) = run(
            "func each(f: (Int64) -> Int64): Int64 { return f(1) }\n\
             main() { let r = each { x => x } }\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let block = main_block(&package);
        let init = match &block.stmts[0] {
            Stmt::Decl(decl) => match &decl.kind {
                DeclKind::Var(var) => var.init.as_ref().unwrap(),
                other => panic!("unexpected decl {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        };
        let desugared = init.desugar.as_ref().expect("trailing closure desugar");
        match &desugared.kind {
            ExprKind::Call { args, .. } => {
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_if_let_desugars_to_match() {
        let (package, diags, _) = run(
            "func f(o: ?Int64): Int64 {\n\
             if (let Some(v) <- o) { return v }\n\
             return 0\n\
             }\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let func_block = package
            .files
            .iter()
            .flat_map(|f| f.decls.iter())
            .find_map(|d| match &d.kind {
                DeclKind::Func(func) => func.body.block.as_ref(),
                _ => None,
            })
            .unwrap();
        let if_expr = match &func_block.stmts[0] {
            Stmt::Expr(e) => e,
            other => panic!("unexpected stmt {:?}", other),
        };
        let desugar = if_expr.desugar.as_ref().expect("if-let desugar");
        assert!(matches!(&desugar.kind, ExprKind::Match { .. }));
    }

    #[test]
    fn test_inline_analysis() {
        let (package, diags, _) = run(
            "@Frozen\npublic func inc(x: Int64): Int64 { return x + 1 }\n\
             public func big(x: Int64): Int64 { return x }\n\
             main() { let a = inc(1) }\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        let inc = package
            .files
            .iter()
            .flat_map(|f| f.decls.iter())
            .find(|d| d.name.name == "inc")
            .unwrap();
        assert!(inc.is_inline);
        // not frozen, not const: never inline
        let big = package
            .files
            .iter()
            .flat_map(|f| f.decls.iter())
            .find(|d| d.name.name == "big")
            .unwrap();
        assert!(!big.is_inline);
    }

    #[test]
    fn test_interpolation_desugars_to_builder_calls() {
        let (package, diags, _) = run("main() { let s = \"v=${1 + 2}\" }\n");
        assert!(diags.is_empty(), "{:?}", diags);
        let block = main_block(&package);
        let init = match &block.stmts[0] {
            Stmt::Decl(decl) => match &decl.kind {
                DeclKind::Var(var) => var.init.as_ref().unwrap(),
                other => panic!("unexpected decl {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        };
        assert!(matches!(
            &init.desugar.as_ref().unwrap().kind,
            ExprKind::Call { .. }
        ));
    }
}
