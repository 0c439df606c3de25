//! Readable-text dump of a CHIR package, written by `chir-dis` into a
//! `.chirtxt` file.

use std::io::{self, Write};

use crate::ir::*;

/// The serialization-only header: phase and container version.
pub fn print_serialize_info(package: &IrPackage, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "// chir container version {}", package.version)?;
    writeln!(out, "// serialized after phase: {}", package.phase)?;
    writeln!(out)
}

pub fn print_package(package: &IrPackage, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "package {} {{", package.name)?;

    if !package.file_names.is_empty() {
        writeln!(out, "  // source files")?;
        for (id, name) in &package.file_names {
            writeln!(out, "  file {} = {:?}", id, name)?;
        }
        writeln!(out)?;
    }

    for (index, def) in package.defs.iter().enumerate() {
        print_def(package, (index + 1) as DefId, def, out)?;
    }

    for value in package.values.iter().skip(1) {
        match value {
            IrValue::GlobalVar { name, mangled, ty, .. } => {
                writeln!(
                    out,
                    "  global @{} // {} : {}",
                    name,
                    mangled,
                    type_str(package, *ty)
                )?;
            }
            IrValue::Func {
                name,
                mangled,
                body,
                is_lambda,
                ..
            } => {
                let flavor = if *is_lambda { "lambda" } else { "func" };
                writeln!(out, "  {} @{} // {}", flavor, name, mangled)?;
                print_body(package, *body, out)?;
            }
            _ => {}
        }
    }
    if package.global_init_func != NULL_ID {
        writeln!(out, "  // global init func: %{}", package.global_init_func)?;
    }
    writeln!(out, "}}")
}

fn print_def(
    package: &IrPackage,
    id: DefId,
    def: &CustomTypeDef,
    out: &mut dyn Write,
) -> io::Result<()> {
    match def {
        CustomTypeDef::Class {
            name,
            mangled,
            super_class,
            interfaces,
            instance_vars,
            methods,
        } => {
            writeln!(out, "  class {} // def {} {}", name, id, mangled)?;
            if *super_class != NULL_ID {
                writeln!(out, "    super: {}", type_str(package, *super_class))?;
            }
            for iface in interfaces {
                writeln!(out, "    implements: {}", type_str(package, *iface))?;
            }
            for var in instance_vars {
                writeln!(out, "    var {}: {}", var.name, type_str(package, var.ty))?;
            }
            for method in methods {
                writeln!(out, "    method: %{}", method)?;
            }
        }
        CustomTypeDef::Struct {
            name,
            mangled,
            instance_vars,
            ..
        } => {
            writeln!(out, "  struct {} // def {} {}", name, id, mangled)?;
            for var in instance_vars {
                writeln!(out, "    var {}: {}", var.name, type_str(package, var.ty))?;
            }
        }
        CustomTypeDef::Enum {
            name,
            mangled,
            ctors,
            ..
        } => {
            writeln!(out, "  enum {} // def {} {}", name, id, mangled)?;
            for ctor in ctors {
                let params: Vec<String> = ctor
                    .param_tys
                    .iter()
                    .map(|&t| type_str(package, t))
                    .collect();
                writeln!(out, "    | {}({})", ctor.name, params.join(", "))?;
            }
        }
    }
    writeln!(out)
}

fn print_body(package: &IrPackage, body: ValueId, out: &mut dyn Write) -> io::Result<()> {
    let blocks = match package.get_value(body) {
        Some(IrValue::BlockGroup { blocks, .. }) => blocks.clone(),
        _ => return Ok(()),
    };
    for block_id in blocks {
        writeln!(out, "    block %{}:", block_id)?;
        if let Some(IrValue::Block { exprs, .. }) = package.get_value(block_id) {
            for &expr_id in exprs {
                if let Some(expr) = package.get_expr(expr_id) {
                    print_expr(package, expr_id, expr, out)?;
                }
            }
        }
    }
    Ok(())
}

fn print_expr(
    package: &IrPackage,
    id: ExprId,
    expr: &IrExpr,
    out: &mut dyn Write,
) -> io::Result<()> {
    let operands: Vec<String> = expr.operands.iter().map(|o| format!("%{}", o)).collect();
    let result = if expr.result != NULL_ID {
        format!("%{} = ", expr.result)
    } else {
        String::new()
    };
    writeln!(
        out,
        "      {}{} ({}) // expr {}",
        result,
        kind_str(package, &expr.kind),
        operands.join(", "),
        id
    )
}

fn kind_str(package: &IrPackage, kind: &IrExprKind) -> String {
    match kind {
        IrExprKind::UnaryOp(op) => format!("unary.{:?}", op),
        IrExprKind::BinaryOp(op) => format!("binary.{:?}", op),
        IrExprKind::Constant => "constant".to_string(),
        IrExprKind::Load => "load".to_string(),
        IrExprKind::Store => "store".to_string(),
        IrExprKind::GetElementRef { path } => format!("get_element_ref {:?}", path),
        IrExprKind::StoreElementRef { path } => format!("store_element_ref {:?}", path),
        IrExprKind::Allocate { ty } => format!("allocate {}", type_str(package, *ty)),
        IrExprKind::Apply => "apply".to_string(),
        IrExprKind::Invoke { method } => format!("invoke {}", method),
        IrExprKind::TypeCast { target } => format!("typecast {}", type_str(package, *target)),
        IrExprKind::InstanceOf { ty } => format!("instanceof {}", type_str(package, *ty)),
        IrExprKind::Box_ => "box".to_string(),
        IrExprKind::UnBox => "unbox".to_string(),
        IrExprKind::GoTo { target } => format!("goto %{}", target),
        IrExprKind::Branch {
            true_block,
            false_block,
        } => format!("branch %{} %{}", true_block, false_block),
        IrExprKind::MultiBranch { default, cases } => {
            format!("multibranch default %{} cases {}", default, cases.len())
        }
        IrExprKind::Exit => "exit".to_string(),
        IrExprKind::RaiseException { target } => format!("raise %{}", target),
        IrExprKind::ApplyWithException { normal, exception } => {
            format!("apply_with_exception %{} %{}", normal, exception)
        }
        IrExprKind::InvokeWithException {
            method,
            normal,
            exception,
        } => format!("invoke_with_exception {} %{} %{}", method, normal, exception),
        IrExprKind::IntOpWithException { op, .. } => format!("intop_with_exception {:?}", op),
        IrExprKind::Spawn => "spawn".to_string(),
        IrExprKind::GetException => "get_exception".to_string(),
        IrExprKind::Lambda { body, .. } => format!("lambda body %{}", body),
        IrExprKind::Debug { name } => format!("debug {}", name),
        IrExprKind::Tuple => "tuple".to_string(),
        IrExprKind::ForInRange { .. } => "for_in_range".to_string(),
        IrExprKind::ForInIter { .. } => "for_in_iter".to_string(),
        IrExprKind::ForInClosedRange { .. } => "for_in_closed_range".to_string(),
        IrExprKind::Intrinsic { kind } => format!("intrinsic {}", kind),
    }
}

fn type_str(package: &IrPackage, id: TypeId) -> String {
    match package.get_type(id) {
        None => "null".to_string(),
        Some(IrType::Primitive(kind)) => format!("{:?}", kind),
        Some(IrType::Tuple(items)) => {
            let inner: Vec<String> = items.iter().map(|&t| type_str(package, t)).collect();
            format!("({})", inner.join(", "))
        }
        Some(IrType::Func { params, ret, .. }) => {
            let inner: Vec<String> = params.iter().map(|&t| type_str(package, t)).collect();
            format!("({}) -> {}", inner.join(", "), type_str(package, *ret))
        }
        Some(IrType::Ref(pointee)) => format!("&{}", type_str(package, *pointee)),
        Some(IrType::Closure { func, .. }) => format!("closure {}", type_str(package, *func)),
        Some(IrType::Array(elem)) => format!("[{}]", type_str(package, *elem)),
        Some(IrType::VArray { elem, size }) => {
            format!("[{}; {}]", type_str(package, *elem), size)
        }
        Some(IrType::Custom { def, .. }) => match package.get_custom_type_def(*def) {
            Some(CustomTypeDef::Class { name, .. })
            | Some(CustomTypeDef::Struct { name, .. })
            | Some(CustomTypeDef::Enum { name, .. }) => name.clone(),
            None => format!("custom#{}", def),
        },
        Some(IrType::Generic { name }) => name.clone(),
        Some(IrType::CPointer(pointee)) => format!("cpointer {}", type_str(package, *pointee)),
        Some(IrType::CString) => "cstring".to_string(),
        Some(IrType::Void) => "void".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_contains_structure() {
        let mut package = IrPackage::new("demo", "opt");
        let i64 = package.add_type(IrType::Primitive(IrPrimitive::Int64));
        package.add_def(CustomTypeDef::Class {
            name: "C".to_string(),
            mangled: "C1C".to_string(),
            super_class: NULL_ID,
            interfaces: vec![],
            instance_vars: vec![MemberVar {
                name: "x".to_string(),
                ty: i64,
            }],
            methods: vec![],
        });
        let mut out = vec![];
        print_serialize_info(&package, &mut out).unwrap();
        print_package(&package, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("package demo"));
        assert!(text.contains("class C"));
        assert!(text.contains("var x: Int64"));
        assert!(text.contains("version 1"));
    }
}
