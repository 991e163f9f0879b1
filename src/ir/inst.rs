// src/ir/inst.rs

use crate::ir::module::{FuncId, GlobalId, Linkage};
use crate::utils::fast::{SmallVec2, SmallVec4};

/// 虚拟寄存器（函数内编号）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

/// 基本块句柄（函数内下标）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// 指令操作数：寄存器或立即数。
/// 位宽由指令决定，算术一律按无符号回绕处理。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
}

/// 指令集只覆盖本工具需要的最小子集：
/// 字节级读写、8/32 位回绕算术、比较，以及对外部符号的调用。
#[derive(Clone, Debug)]
pub enum Inst {
    /// 入口依赖前驱的循环变量
    Phi { dst: Reg, incomings: SmallVec2<(BlockId, Operand)> },
    /// `&global[index]`，模块内全局的唯一引用形式
    Gep { dst: Reg, base: GlobalId, index: Operand },
    LoadI8 { dst: Reg, addr: Reg },
    StoreI8 { val: Operand, addr: Reg },
    /// i32 -> i8 截断
    TruncI8 { dst: Reg, src: Operand },
    AddI8 { dst: Reg, a: Operand, b: Operand },
    MulI8 { dst: Reg, a: Operand, b: Operand },
    XorI8 { dst: Reg, a: Operand, b: Operand },
    AddI32 { dst: Reg, a: Operand, b: Operand },
    /// 无符号小于比较，结果 0/1
    UltI32 { dst: Reg, a: Operand, b: Operand },
    /// 调用（无返回值语义；被调方可为仅声明的外部符号）
    Call { callee: FuncId, args: SmallVec4<Operand> },
}

impl Inst {
    /// 产生结果的指令返回其目的寄存器
    pub fn dst(&self) -> Option<Reg> {
        match self {
            Inst::Phi { dst, .. }
            | Inst::Gep { dst, .. }
            | Inst::LoadI8 { dst, .. }
            | Inst::TruncI8 { dst, .. }
            | Inst::AddI8 { dst, .. }
            | Inst::MulI8 { dst, .. }
            | Inst::XorI8 { dst, .. }
            | Inst::AddI32 { dst, .. }
            | Inst::UltI32 { dst, .. } => Some(*dst),
            Inst::StoreI8 { .. } | Inst::Call { .. } => None,
        }
    }
}

/// 块终结指令
#[derive(Clone, Copy, Debug)]
pub enum Term {
    Br(BlockId),
    CondBr { cond: Operand, then_bb: BlockId, else_bb: BlockId },
    Ret,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
    pub term: Term,
}

/// 函数：无参无返回值的过程。`blocks` 为空即外部声明。
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub blocks: Vec<Block>,
    /// 已分配的寄存器个数（解释器据此开寄存器文件）
    pub next_reg: u32,
}

impl Function {
    pub fn declaration(name: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            linkage: Linkage::External,
            blocks: Vec::new(),
            next_reg: 0,
        }
    }

    pub fn is_decl(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn find_block(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .map(|i| BlockId(i as u32))
    }
}
