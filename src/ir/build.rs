// src/ir/build.rs

use crate::ir::inst::{Block, BlockId, Function, Inst, Operand, Reg, Term};
use crate::ir::module::{GlobalId, Linkage};
use crate::utils::fast::{fast_map, FastMap, SmallVec2};

/// 顺序构建单个函数的小型 builder：维护“当前插入块”光标，
/// 新建块时按提示名去重（`strdec.body`、`strdec.body1`、...）。
pub struct FuncBuilder {
    func: Function,
    cur: BlockId,
    label_seen: FastMap<String, u32>,
}

impl FuncBuilder {
    /// 以 `entry` 块开始一个新函数
    pub fn new(name: impl Into<String>, linkage: Linkage) -> Self {
        let entry = Block {
            label: "entry".to_string(),
            insts: Vec::new(),
            term: Term::Ret,
        };
        let mut label_seen = fast_map();
        label_seen.insert("entry".to_string(), 1);
        FuncBuilder {
            func: Function {
                name: name.into(),
                linkage,
                blocks: vec![entry],
                next_reg: 0,
            },
            cur: BlockId(0),
            label_seen,
        }
    }

    pub fn current_block(&self) -> BlockId {
        self.cur
    }

    /// 新建基本块；重名时追加序号。不切换光标。
    pub fn new_block(&mut self, hint: &str) -> BlockId {
        let n = self.label_seen.entry(hint.to_string()).or_insert(0);
        let label = if *n == 0 { hint.to_string() } else { format!("{}{}", hint, *n) };
        *n += 1;
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block {
            label,
            insts: Vec::new(),
            term: Term::Ret,
        });
        id
    }

    /// 把光标移到指定块尾部
    pub fn switch_to(&mut self, bb: BlockId) {
        self.cur = bb;
    }

    fn fresh_reg(&mut self) -> Reg {
        let r = Reg(self.func.next_reg);
        self.func.next_reg += 1;
        r
    }

    fn push(&mut self, inst: Inst) {
        self.func.blocks[self.cur.0 as usize].insts.push(inst);
    }

    pub fn phi(&mut self, incomings: SmallVec2<(BlockId, Operand)>) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::Phi { dst, incomings });
        dst
    }

    /// 给已有 phi 补一条入边（回边的值在循环体构建完后才知道）
    pub fn add_phi_incoming(&mut self, bb: BlockId, phi: Reg, from: BlockId, val: Operand) {
        for inst in &mut self.func.blocks[bb.0 as usize].insts {
            if let Inst::Phi { dst, incomings } = inst {
                if *dst == phi {
                    incomings.push((from, val));
                    return;
                }
            }
        }
        unreachable!("add_phi_incoming: no phi {:?} in block {:?}", phi, bb);
    }

    pub fn gep(&mut self, base: GlobalId, index: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::Gep { dst, base, index });
        dst
    }

    pub fn load_i8(&mut self, addr: Reg) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::LoadI8 { dst, addr });
        dst
    }

    pub fn store_i8(&mut self, val: Operand, addr: Reg) {
        self.push(Inst::StoreI8 { val, addr });
    }

    pub fn trunc_i8(&mut self, src: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::TruncI8 { dst, src });
        dst
    }

    pub fn add_i8(&mut self, a: Operand, b: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::AddI8 { dst, a, b });
        dst
    }

    pub fn mul_i8(&mut self, a: Operand, b: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::MulI8 { dst, a, b });
        dst
    }

    pub fn xor_i8(&mut self, a: Operand, b: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::XorI8 { dst, a, b });
        dst
    }

    pub fn add_i32(&mut self, a: Operand, b: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::AddI32 { dst, a, b });
        dst
    }

    pub fn ult_i32(&mut self, a: Operand, b: Operand) -> Reg {
        let dst = self.fresh_reg();
        self.push(Inst::UltI32 { dst, a, b });
        dst
    }

    pub fn br(&mut self, target: BlockId) {
        self.func.blocks[self.cur.0 as usize].term = Term::Br(target);
    }

    pub fn cond_br(&mut self, cond: Operand, then_bb: BlockId, else_bb: BlockId) {
        self.func.blocks[self.cur.0 as usize].term =
            Term::CondBr { cond, then_bb, else_bb };
    }

    pub fn ret(&mut self) {
        self.func.blocks[self.cur.0 as usize].term = Term::Ret;
    }

    pub fn finish(self) -> Function {
        self.func
    }
}
