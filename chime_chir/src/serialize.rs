//! The CHIR container writer.
//!
//! A length-prefixed little-endian container: header (magic, version,
//! phase, package name), then the four pools as tagged unions, the
//! global-init-func index and the source-file-name table. The layout is
//! not frozen; the deserializer only promises structural round-trips.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::ir::*;

pub fn serialize_package(package: &IrPackage) -> io::Result<Vec<u8>> {
    let mut out = vec![];
    out.write_all(CHIR_MAGIC)?;
    out.write_u32::<LittleEndian>(package.version)?;
    write_str(&mut out, &package.phase)?;
    write_str(&mut out, &package.name)?;

    out.write_u32::<LittleEndian>((package.types.len() - 1) as u32)?;
    for ty in &package.types[1..] {
        write_type(&mut out, ty)?;
    }
    out.write_u32::<LittleEndian>((package.values.len() - 1) as u32)?;
    for value in &package.values[1..] {
        write_value(&mut out, value)?;
    }
    out.write_u32::<LittleEndian>(package.exprs.len() as u32)?;
    for expr in &package.exprs {
        write_expr(&mut out, expr)?;
    }
    out.write_u32::<LittleEndian>(package.defs.len() as u32)?;
    for def in &package.defs {
        write_def(&mut out, def)?;
    }
    out.write_u32::<LittleEndian>(package.global_init_func)?;
    out.write_u32::<LittleEndian>(package.file_names.len() as u32)?;
    for (id, name) in &package.file_names {
        out.write_u32::<LittleEndian>(*id)?;
        write_str(&mut out, name)?;
    }
    Ok(out)
}

fn write_str(out: &mut Vec<u8>, text: &str) -> io::Result<()> {
    out.write_u32::<LittleEndian>(text.len() as u32)?;
    out.write_all(text.as_bytes())
}

fn write_ids(out: &mut Vec<u8>, ids: &[u32]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(ids.len() as u32)?;
    for &id in ids {
        out.write_u32::<LittleEndian>(id)?;
    }
    Ok(())
}

pub(crate) fn primitive_tag(kind: IrPrimitive) -> u8 {
    use IrPrimitive::*;
    match kind {
        Int8 => 0,
        Int16 => 1,
        Int32 => 2,
        Int64 => 3,
        UInt8 => 4,
        UInt16 => 5,
        UInt32 => 6,
        UInt64 => 7,
        Float16 => 8,
        Float32 => 9,
        Float64 => 10,
        Bool => 11,
        Rune => 12,
        Unit => 13,
        Nothing => 14,
        String => 15,
    }
}

fn write_type(out: &mut Vec<u8>, ty: &IrType) -> io::Result<()> {
    match ty {
        IrType::Primitive(kind) => {
            out.write_u8(0)?;
            out.write_u8(primitive_tag(*kind))
        }
        IrType::Tuple(items) => {
            out.write_u8(1)?;
            write_ids(out, items)
        }
        IrType::Func {
            params,
            ret,
            is_c,
            has_varargs,
        } => {
            out.write_u8(2)?;
            write_ids(out, params)?;
            out.write_u32::<LittleEndian>(*ret)?;
            out.write_u8(*is_c as u8)?;
            out.write_u8(*has_varargs as u8)
        }
        IrType::Ref(pointee) => {
            out.write_u8(3)?;
            out.write_u32::<LittleEndian>(*pointee)
        }
        IrType::Closure { func, env } => {
            out.write_u8(4)?;
            out.write_u32::<LittleEndian>(*func)?;
            out.write_u32::<LittleEndian>(*env)
        }
        IrType::Array(elem) => {
            out.write_u8(5)?;
            out.write_u32::<LittleEndian>(*elem)
        }
        IrType::VArray { elem, size } => {
            out.write_u8(6)?;
            out.write_u32::<LittleEndian>(*elem)?;
            out.write_u64::<LittleEndian>(*size)
        }
        IrType::Custom { def, args } => {
            out.write_u8(7)?;
            out.write_u32::<LittleEndian>(*def)?;
            write_ids(out, args)
        }
        IrType::Generic { name } => {
            out.write_u8(8)?;
            write_str(out, name)
        }
        IrType::CPointer(pointee) => {
            out.write_u8(9)?;
            out.write_u32::<LittleEndian>(*pointee)
        }
        IrType::CString => out.write_u8(10),
        IrType::Void => out.write_u8(11),
    }
}

fn write_value(out: &mut Vec<u8>, value: &IrValue) -> io::Result<()> {
    match value {
        IrValue::BoolLit(v) => {
            out.write_u8(0)?;
            out.write_u8(*v as u8)
        }
        IrValue::IntLit { ty, value } => {
            out.write_u8(1)?;
            out.write_u32::<LittleEndian>(*ty)?;
            out.write_u64::<LittleEndian>(*value)
        }
        IrValue::FloatLit { ty, value } => {
            out.write_u8(2)?;
            out.write_u32::<LittleEndian>(*ty)?;
            out.write_f64::<LittleEndian>(*value)
        }
        IrValue::RuneLit(c) => {
            out.write_u8(3)?;
            out.write_u32::<LittleEndian>(*c as u32)
        }
        IrValue::StringLit(text) => {
            out.write_u8(4)?;
            write_str(out, text)
        }
        IrValue::UnitLit => out.write_u8(5),
        IrValue::NullLit => out.write_u8(6),
        IrValue::Parameter {
            ty,
            owner_func,
            owned_lambda,
        } => {
            out.write_u8(7)?;
            out.write_u32::<LittleEndian>(*ty)?;
            out.write_u32::<LittleEndian>(*owner_func)?;
            out.write_u32::<LittleEndian>(*owned_lambda)
        }
        IrValue::LocalVar { ty, expr } => {
            out.write_u8(8)?;
            out.write_u32::<LittleEndian>(*ty)?;
            out.write_u32::<LittleEndian>(*expr)
        }
        IrValue::GlobalVar {
            ty,
            name,
            mangled,
            init,
        } => {
            out.write_u8(9)?;
            out.write_u32::<LittleEndian>(*ty)?;
            write_str(out, name)?;
            write_str(out, mangled)?;
            out.write_u32::<LittleEndian>(*init)
        }
        IrValue::Func {
            ty,
            name,
            mangled,
            params,
            body,
            is_lambda,
        } => {
            out.write_u8(10)?;
            out.write_u32::<LittleEndian>(*ty)?;
            write_str(out, name)?;
            write_str(out, mangled)?;
            write_ids(out, params)?;
            out.write_u32::<LittleEndian>(*body)?;
            out.write_u8(*is_lambda as u8)
        }
        IrValue::Block { group, exprs } => {
            out.write_u8(11)?;
            out.write_u32::<LittleEndian>(*group)?;
            write_ids(out, exprs)
        }
        IrValue::BlockGroup {
            owner_func,
            blocks,
            entry,
        } => {
            out.write_u8(12)?;
            out.write_u32::<LittleEndian>(*owner_func)?;
            write_ids(out, blocks)?;
            out.write_u32::<LittleEndian>(*entry)
        }
        IrValue::ImportedFunc { ty, mangled } => {
            out.write_u8(13)?;
            out.write_u32::<LittleEndian>(*ty)?;
            write_str(out, mangled)
        }
        IrValue::ImportedVar { ty, mangled } => {
            out.write_u8(14)?;
            out.write_u32::<LittleEndian>(*ty)?;
            write_str(out, mangled)
        }
    }
}

fn unary_tag(kind: IrUnaryKind) -> u8 {
    match kind {
        IrUnaryKind::Neg => 0,
        IrUnaryKind::Not => 1,
        IrUnaryKind::BitNot => 2,
    }
}

pub(crate) fn binary_tag(kind: IrBinaryKind) -> u8 {
    use IrBinaryKind::*;
    match kind {
        Add => 0,
        Sub => 1,
        Mul => 2,
        Div => 3,
        Rem => 4,
        Pow => 5,
        Shl => 6,
        Shr => 7,
        BitAnd => 8,
        BitOr => 9,
        BitXor => 10,
        Lt => 11,
        Le => 12,
        Gt => 13,
        Ge => 14,
        Eq => 15,
        NotEq => 16,
    }
}

fn write_expr(out: &mut Vec<u8>, expr: &IrExpr) -> io::Result<()> {
    match &expr.kind {
        IrExprKind::UnaryOp(op) => {
            out.write_u8(0)?;
            out.write_u8(unary_tag(*op))?;
        }
        IrExprKind::BinaryOp(op) => {
            out.write_u8(1)?;
            out.write_u8(binary_tag(*op))?;
        }
        IrExprKind::Constant => out.write_u8(2)?,
        IrExprKind::Load => out.write_u8(3)?,
        IrExprKind::Store => out.write_u8(4)?,
        IrExprKind::GetElementRef { path } => {
            out.write_u8(5)?;
            out.write_u32::<LittleEndian>(path.len() as u32)?;
            for p in path {
                out.write_u64::<LittleEndian>(*p)?;
            }
        }
        IrExprKind::StoreElementRef { path } => {
            out.write_u8(6)?;
            out.write_u32::<LittleEndian>(path.len() as u32)?;
            for p in path {
                out.write_u64::<LittleEndian>(*p)?;
            }
        }
        IrExprKind::Allocate { ty } => {
            out.write_u8(7)?;
            out.write_u32::<LittleEndian>(*ty)?;
        }
        IrExprKind::Apply => out.write_u8(8)?,
        IrExprKind::Invoke { method } => {
            out.write_u8(9)?;
            write_str(out, method)?;
        }
        IrExprKind::TypeCast { target } => {
            out.write_u8(10)?;
            out.write_u32::<LittleEndian>(*target)?;
        }
        IrExprKind::InstanceOf { ty } => {
            out.write_u8(11)?;
            out.write_u32::<LittleEndian>(*ty)?;
        }
        IrExprKind::Box_ => out.write_u8(12)?,
        IrExprKind::UnBox => out.write_u8(13)?,
        IrExprKind::GoTo { target } => {
            out.write_u8(14)?;
            out.write_u32::<LittleEndian>(*target)?;
        }
        IrExprKind::Branch {
            true_block,
            false_block,
        } => {
            out.write_u8(15)?;
            out.write_u32::<LittleEndian>(*true_block)?;
            out.write_u32::<LittleEndian>(*false_block)?;
        }
        IrExprKind::MultiBranch { default, cases } => {
            out.write_u8(16)?;
            out.write_u32::<LittleEndian>(*default)?;
            out.write_u32::<LittleEndian>(cases.len() as u32)?;
            for (value, block) in cases {
                out.write_u64::<LittleEndian>(*value)?;
                out.write_u32::<LittleEndian>(*block)?;
            }
        }
        IrExprKind::Exit => out.write_u8(17)?,
        IrExprKind::RaiseException { target } => {
            out.write_u8(18)?;
            out.write_u32::<LittleEndian>(*target)?;
        }
        IrExprKind::ApplyWithException { normal, exception } => {
            out.write_u8(19)?;
            out.write_u32::<LittleEndian>(*normal)?;
            out.write_u32::<LittleEndian>(*exception)?;
        }
        IrExprKind::InvokeWithException {
            method,
            normal,
            exception,
        } => {
            out.write_u8(20)?;
            write_str(out, method)?;
            out.write_u32::<LittleEndian>(*normal)?;
            out.write_u32::<LittleEndian>(*exception)?;
        }
        IrExprKind::IntOpWithException {
            op,
            normal,
            exception,
        } => {
            out.write_u8(21)?;
            out.write_u8(binary_tag(*op))?;
            out.write_u32::<LittleEndian>(*normal)?;
            out.write_u32::<LittleEndian>(*exception)?;
        }
        IrExprKind::Spawn => out.write_u8(22)?,
        IrExprKind::GetException => out.write_u8(23)?,
        IrExprKind::Lambda {
            func_ty,
            body,
            params,
        } => {
            out.write_u8(24)?;
            out.write_u32::<LittleEndian>(*func_ty)?;
            out.write_u32::<LittleEndian>(*body)?;
            write_ids(out, params)?;
        }
        IrExprKind::Debug { name } => {
            out.write_u8(25)?;
            write_str(out, name)?;
        }
        IrExprKind::Tuple => out.write_u8(26)?,
        IrExprKind::ForInRange { body, latch } => {
            out.write_u8(27)?;
            out.write_u32::<LittleEndian>(*body)?;
            out.write_u32::<LittleEndian>(*latch)?;
        }
        IrExprKind::ForInIter { body, latch } => {
            out.write_u8(28)?;
            out.write_u32::<LittleEndian>(*body)?;
            out.write_u32::<LittleEndian>(*latch)?;
        }
        IrExprKind::ForInClosedRange { body, latch } => {
            out.write_u8(29)?;
            out.write_u32::<LittleEndian>(*body)?;
            out.write_u32::<LittleEndian>(*latch)?;
        }
        IrExprKind::Intrinsic { kind } => {
            out.write_u8(30)?;
            out.write_u16::<LittleEndian>(*kind)?;
        }
    }
    write_ids(out, &expr.operands)?;
    out.write_u32::<LittleEndian>(expr.result)?;
    out.write_u32::<LittleEndian>(expr.parent_block)?;
    write_annotations(out, &expr.annotations)
}

pub(crate) fn write_annotations(out: &mut Vec<u8>, annotations: &Annotations) -> io::Result<()> {
    out.write_u32::<LittleEndian>(annotations.entries.len() as u32)?;
    for entry in &annotations.entries {
        match entry {
            Annotation::BoundsCheckNeeded(v) => {
                out.write_u8(0)?;
                out.write_u8(*v as u8)?;
            }
            Annotation::CastCheckNeeded(v) => {
                out.write_u8(1)?;
                out.write_u8(*v as u8)?;
            }
            Annotation::DebugLocation { file, line, column } => {
                out.write_u8(2)?;
                out.write_u32::<LittleEndian>(*file)?;
                out.write_u32::<LittleEndian>(*line)?;
                out.write_u32::<LittleEndian>(*column)?;
            }
            Annotation::LinkType(v) => {
                out.write_u8(3)?;
                out.write_u8(*v)?;
            }
            Annotation::SkipCheckKind(v) => {
                out.write_u8(4)?;
                out.write_u8(*v)?;
            }
            Annotation::NeverOverflow(v) => {
                out.write_u8(5)?;
                out.write_u8(*v as u8)?;
            }
            Annotation::WarningLocation { file, line, column } => {
                out.write_u8(6)?;
                out.write_u32::<LittleEndian>(*file)?;
                out.write_u32::<LittleEndian>(*line)?;
                out.write_u32::<LittleEndian>(*column)?;
            }
        }
    }
    Ok(())
}

fn write_member_vars(out: &mut Vec<u8>, vars: &[MemberVar]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(vars.len() as u32)?;
    for var in vars {
        write_str(out, &var.name)?;
        out.write_u32::<LittleEndian>(var.ty)?;
    }
    Ok(())
}

fn write_def(out: &mut Vec<u8>, def: &CustomTypeDef) -> io::Result<()> {
    match def {
        CustomTypeDef::Class {
            name,
            mangled,
            super_class,
            interfaces,
            instance_vars,
            methods,
        } => {
            out.write_u8(0)?;
            write_str(out, name)?;
            write_str(out, mangled)?;
            out.write_u32::<LittleEndian>(*super_class)?;
            write_ids(out, interfaces)?;
            write_member_vars(out, instance_vars)?;
            write_ids(out, methods)
        }
        CustomTypeDef::Struct {
            name,
            mangled,
            interfaces,
            instance_vars,
            methods,
        } => {
            out.write_u8(1)?;
            write_str(out, name)?;
            write_str(out, mangled)?;
            write_ids(out, interfaces)?;
            write_member_vars(out, instance_vars)?;
            write_ids(out, methods)
        }
        CustomTypeDef::Enum {
            name,
            mangled,
            interfaces,
            ctors,
            methods,
        } => {
            out.write_u8(2)?;
            write_str(out, name)?;
            write_str(out, mangled)?;
            write_ids(out, interfaces)?;
            out.write_u32::<LittleEndian>(ctors.len() as u32)?;
            for ctor in ctors {
                write_str(out, &ctor.name)?;
                write_ids(out, &ctor.param_tys)?;
            }
            write_ids(out, methods)
        }
    }
}
