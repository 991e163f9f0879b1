// src/ir/print.rs
// 模块 -> 文本格式。与 frontend/parser 互为逆：parse(print(m)) 结构不变。

use std::fmt::Write;

use crate::ir::inst::{Function, Inst, Operand, Term};
use crate::ir::module::{GlobalData, Init, Linkage, Module, Ty};

pub fn print_module(m: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module \"{}\"", escape_quoted(&m.name));
    let _ = writeln!(out);

    for (_, g) in m.iter_globals() {
        print_global(&mut out, g);
    }

    for f in &m.funcs {
        if f.is_decl() {
            let _ = writeln!(out, "declare {}", sym(&f.name));
        }
    }

    for f in &m.funcs {
        if !f.is_decl() {
            let _ = writeln!(out);
            print_func(&mut out, m, f);
        }
    }

    if !m.ctors.is_empty() {
        let _ = writeln!(out);
        for c in &m.ctors {
            let _ = writeln!(out, "ctor {} {}", c.priority, sym(&m.func(c.func).name));
        }
    }

    out
}

fn print_global(out: &mut String, g: &GlobalData) {
    let _ = write!(out, "global {} : {} = ", sym(&g.name), ty(&g.ty));
    match &g.init {
        Some(Init::Bytes(b)) => {
            let _ = write!(out, "c\"{}\"", escape_bytes(b));
        }
        Some(Init::Int(v)) => {
            let _ = write!(out, "{}", v);
        }
        Some(Init::Zero) | None => {
            let _ = write!(out, "zeroinit");
        }
    }
    if g.is_const {
        let _ = write!(out, ", const");
    }
    if g.thread_local {
        let _ = write!(out, ", thread_local");
    }
    if let Some(s) = &g.section {
        let _ = write!(out, ", section \"{}\"", escape_quoted(s));
    }
    match g.linkage {
        Linkage::External => {}
        Linkage::Internal => { let _ = write!(out, ", linkage internal"); }
        Linkage::Private => { let _ = write!(out, ", linkage private"); }
    }
    if g.addr_space != 0 {
        let _ = write!(out, ", addrspace {}", g.addr_space);
    }
    let _ = writeln!(out);
}

fn print_func(out: &mut String, m: &Module, f: &Function) {
    let _ = write!(out, "fn {}", sym(&f.name));
    match f.linkage {
        Linkage::External => {}
        Linkage::Internal => { let _ = write!(out, " linkage internal"); }
        Linkage::Private => { let _ = write!(out, " linkage private"); }
    }
    let _ = writeln!(out, " {{");

    for b in &f.blocks {
        let _ = writeln!(out, "{}:", b.label);
        for i in &b.insts {
            let _ = writeln!(out, "  {}", inst(m, f, i));
        }
        let line = match b.term {
            Term::Br(t) => format!("br {}", f.block(t).label),
            Term::CondBr { cond, then_bb, else_bb } => format!(
                "condbr {}, {}, {}",
                op(cond),
                f.block(then_bb).label,
                f.block(else_bb).label
            ),
            Term::Ret => "ret".to_string(),
        };
        let _ = writeln!(out, "  {}", line);
    }
    let _ = writeln!(out, "}}");
}

fn inst(m: &Module, f: &Function, i: &Inst) -> String {
    match i {
        Inst::Phi { dst, incomings } => {
            let arms = incomings
                .iter()
                .map(|(bb, v)| format!("[{}, {}]", op(*v), f.block(*bb).label))
                .collect::<Vec<_>>()
                .join(", ");
            format!("%{} = phi {}", dst.0, arms)
        }
        Inst::Gep { dst, base, index } => {
            let name = m
                .global(*base)
                .map(|g| sym(&g.name))
                .unwrap_or_else(|| "@\"<erased>\"".to_string());
            format!("%{} = gep {}, {}", dst.0, name, op(*index))
        }
        Inst::LoadI8 { dst, addr } => format!("%{} = load.i8 %{}", dst.0, addr.0),
        Inst::StoreI8 { val, addr } => format!("store.i8 {}, %{}", op(*val), addr.0),
        Inst::TruncI8 { dst, src } => format!("%{} = trunc.i8 {}", dst.0, op(*src)),
        Inst::AddI8 { dst, a, b } => format!("%{} = add.i8 {}, {}", dst.0, op(*a), op(*b)),
        Inst::MulI8 { dst, a, b } => format!("%{} = mul.i8 {}, {}", dst.0, op(*a), op(*b)),
        Inst::XorI8 { dst, a, b } => format!("%{} = xor.i8 {}, {}", dst.0, op(*a), op(*b)),
        Inst::AddI32 { dst, a, b } => format!("%{} = add.i32 {}, {}", dst.0, op(*a), op(*b)),
        Inst::UltI32 { dst, a, b } => format!("%{} = ult.i32 {}, {}", dst.0, op(*a), op(*b)),
        Inst::Call { callee, args } => {
            let args = args.iter().map(|a| op(*a)).collect::<Vec<_>>().join(", ");
            format!("call {}({})", sym(&m.func(*callee).name), args)
        }
    }
}

fn op(o: Operand) -> String {
    match o {
        Operand::Reg(r) => format!("%{}", r.0),
        Operand::Imm(v) => format!("{}", v),
    }
}

fn ty(t: &Ty) -> String {
    match t {
        Ty::I8 => "i8".to_string(),
        Ty::I32 => "i32".to_string(),
        Ty::I64 => "i64".to_string(),
        Ty::Ptr => "ptr".to_string(),
        Ty::Array { elem, len } => format!("[{} x {}]", len, ty(elem)),
    }
}

/// `@name`，名字含标识符以外的字符时加引号
fn sym(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$')
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if plain {
        format!("@{}", name)
    } else {
        format!("@\"{}\"", escape_quoted(name))
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// LLVM 风格字节转义：可打印 ASCII 原样，其余 `\XX`
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\{:02X}", b);
        }
    }
    out
}
