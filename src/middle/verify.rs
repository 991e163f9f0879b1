// src/middle/verify.rs

//! 模块结构校验：引用可解析、下标在界、初始化器与类型一致。
//! 错误写入 DiagSink（无 span，模块级），有错则整体返回 Err。

use anyhow::{bail, Result};
use smallvec::smallvec;

use crate::diag::DiagSink;
use crate::ir::{Init, Inst, Module, Term, Ty};
use crate::utils::fast::SmallVec2;

pub fn verify_module(m: &Module, file_name: &str, diags: &mut DiagSink) -> Result<()> {
    let before = diags.len();

    // 全局：常量必须带初始化器；字节数组初始化器长度与类型一致
    for (_, g) in m.iter_globals() {
        if g.is_const && g.init.is_none() {
            diags.error(
                "V0001",
                file_name,
                None,
                format!("constant global `@{}` has no initializer", g.name),
            );
        }
        if let (Ty::Array { len, .. }, Some(Init::Bytes(b))) = (&g.ty, &g.init) {
            if b.len() as u32 != *len {
                diags.error(
                    "V0002",
                    file_name,
                    None,
                    format!(
                        "global `@{}`: initializer has {} bytes but type is [{} x i8]",
                        g.name,
                        b.len(),
                        len
                    ),
                );
            }
        }
    }

    // 函数体：gep 基址存活、call 目标在界、跳转与 phi 的块下标在界
    for f in &m.funcs {
        let nblocks = f.blocks.len() as u32;
        for b in &f.blocks {
            for inst in &b.insts {
                match inst {
                    Inst::Gep { base, .. } => {
                        if m.global(*base).is_none() {
                            diags.error(
                                "V0003",
                                file_name,
                                None,
                                format!(
                                    "fn `@{}`: gep references erased or unknown global #{}",
                                    f.name, base.0
                                ),
                            );
                        }
                    }
                    Inst::Call { callee, .. } => {
                        if callee.0 as usize >= m.funcs.len() {
                            diags.error(
                                "V0004",
                                file_name,
                                None,
                                format!("fn `@{}`: call target #{} out of range", f.name, callee.0),
                            );
                        }
                    }
                    Inst::Phi { incomings, .. } => {
                        for (bb, _) in incomings {
                            if bb.0 >= nblocks {
                                diags.error(
                                    "V0005",
                                    file_name,
                                    None,
                                    format!(
                                        "fn `@{}`: phi incoming block #{} out of range",
                                        f.name, bb.0
                                    ),
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
            let targets: SmallVec2<u32> = match &b.term {
                Term::Br(t) => smallvec![t.0],
                Term::CondBr { then_bb, else_bb, .. } => smallvec![then_bb.0, else_bb.0],
                Term::Ret => SmallVec2::new(),
            };
            for t in targets {
                if t >= nblocks {
                    diags.error(
                        "V0006",
                        file_name,
                        None,
                        format!("fn `@{}`: branch target #{} out of range", f.name, t),
                    );
                }
            }
        }
    }

    // 构造器表：目标必须是本模块定义的函数
    for c in &m.ctors {
        if c.func.0 as usize >= m.funcs.len() {
            diags.error(
                "V0007",
                file_name,
                None,
                format!("ctor target #{} out of range", c.func.0),
            );
        } else if m.func(c.func).is_decl() {
            diags.error(
                "V0008",
                file_name,
                None,
                format!("ctor target `@{}` is only a declaration", m.func(c.func).name),
            );
        }
    }

    let errors = diags.len() - before;
    if errors > 0 {
        bail!("module `{}` failed verification with {} error(s)", m.name, errors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GlobalData, Linkage};

    #[test]
    fn length_mismatch_is_flagged() {
        let mut m = Module::new("t");
        m.add_global(GlobalData {
            name: "bad".to_string(),
            ty: Ty::i8_array(4),
            linkage: Linkage::External,
            section: None,
            addr_space: 0,
            is_const: true,
            thread_local: false,
            init: Some(Init::Bytes(b"hi\0".to_vec())),
        });
        let mut diags = DiagSink::new();
        assert!(verify_module(&m, "t.ir", &mut diags).is_err());
        assert!(diags.has_errors());
    }

    #[test]
    fn dangling_gep_is_flagged() {
        use crate::ir::{FuncBuilder, Operand};

        let mut m = Module::new("t");
        let g = m.add_global(GlobalData {
            name: "gone".to_string(),
            ty: Ty::i8_array(3),
            linkage: Linkage::External,
            section: None,
            addr_space: 0,
            is_const: true,
            thread_local: false,
            init: Some(Init::Bytes(b"hi\0".to_vec())),
        });

        let mut b = FuncBuilder::new("f", Linkage::External);
        b.gep(g, Operand::Imm(0));
        b.ret();
        m.add_func(b.finish());
        m.erase_global(g);

        let mut diags = DiagSink::new();
        assert!(verify_module(&m, "t.ir", &mut diags).is_err());
    }
}
