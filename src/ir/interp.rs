// src/ir/interp.rs
// 小型解释器：在全局字节镜像上执行模块的构造器/函数。
// 服务两处：driver 的 --verify 冒烟检查、集成测试里的往返验证。

use anyhow::{anyhow, bail, Result};

use crate::ir::inst::{BlockId, Inst, Operand, Reg, Term};
use crate::ir::module::{FuncId, GlobalId, Init, Module};
use crate::utils::fast::{int_map, IntMap};

/// 单步执行上限。构造器里的解码循环都是按 size 计数的有界循环，
/// 正常模块远达不到；超限视为坏模块。
const STEP_LIMIT: u64 = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug)]
enum Val {
    Int(u64),
    /// 全局内字节地址
    Addr(GlobalId, u32),
}

pub struct Machine<'m> {
    module: &'m Module,
    /// GlobalId -> 字节镜像
    mem: IntMap<u32, Vec<u8>>,
    /// 被调用过的外部符号（声明序）
    pub external_calls: Vec<String>,
}

impl<'m> Machine<'m> {
    /// 按各全局的初始化器建立字节镜像
    pub fn new(module: &'m Module) -> Self {
        let mut mem = int_map();
        for (id, g) in module.iter_globals() {
            let size = g.ty.byte_len() as usize;
            let bytes = match &g.init {
                Some(Init::Bytes(b)) => b.clone(),
                Some(Init::Int(v)) => v.to_le_bytes()[..size.min(8)].to_vec(),
                Some(Init::Zero) | None => vec![0u8; size],
            };
            mem.insert(id.0, bytes);
        }
        Machine { module, mem, external_calls: Vec::new() }
    }

    /// 当前镜像中某全局的字节
    pub fn global_bytes(&self, id: GlobalId) -> Option<&[u8]> {
        self.mem.get(&id.0).map(|v| v.as_slice())
    }

    /// 按优先级（小者先，同级按登记序）执行全部构造器各一次
    pub fn run_ctors(&mut self) -> Result<()> {
        let mut order = self.module.ctors.clone();
        order.sort_by_key(|c| c.priority);
        for c in order {
            self.run_func(c.func)?;
        }
        Ok(())
    }

    pub fn run_func(&mut self, id: FuncId) -> Result<()> {
        let f = self.module.func(id);
        if f.is_decl() {
            // 外部符号：记录调用即可
            self.external_calls.push(f.name.clone());
            return Ok(());
        }

        let mut regs: Vec<Option<Val>> = vec![None; f.next_reg as usize];
        let mut cur = BlockId(0);
        let mut prev: Option<BlockId> = None;
        let mut steps: u64 = 0;

        loop {
            steps += 1;
            if steps > STEP_LIMIT {
                bail!("fn `{}`: step limit exceeded", f.name);
            }
            let block = f.block(cur);

            // phi 先整体求值再提交（同块多 phi 互不影响）
            let mut phi_writes: Vec<(Reg, Val)> = Vec::new();
            for inst in &block.insts {
                if let Inst::Phi { dst, incomings } = inst {
                    let from = prev.ok_or_else(|| {
                        anyhow!("fn `{}`: phi in entry block `{}`", f.name, block.label)
                    })?;
                    let (_, v) = incomings
                        .iter()
                        .find(|(bb, _)| *bb == from)
                        .ok_or_else(|| {
                            anyhow!(
                                "fn `{}`: phi has no incoming for predecessor `{}`",
                                f.name,
                                f.block(from).label
                            )
                        })?;
                    phi_writes.push((*dst, self.eval(&regs, *v)?));
                }
            }
            for (r, v) in phi_writes {
                regs[r.0 as usize] = Some(v);
            }

            for inst in &block.insts {
                steps += 1;
                if steps > STEP_LIMIT {
                    bail!("fn `{}`: step limit exceeded", f.name);
                }
                match inst {
                    Inst::Phi { .. } => {}
                    Inst::Gep { dst, base, index } => {
                        let off = self.eval_int(&regs, *index)?;
                        regs[dst.0 as usize] = Some(Val::Addr(*base, off as u32));
                    }
                    Inst::LoadI8 { dst, addr } => {
                        let (g, off) = self.addr(&regs, *addr)?;
                        let b = self.read_byte(g, off)?;
                        regs[dst.0 as usize] = Some(Val::Int(b as u64));
                    }
                    Inst::StoreI8 { val, addr } => {
                        let v = self.eval_int(&regs, *val)? as u8;
                        let (g, off) = self.addr(&regs, *addr)?;
                        self.write_byte(g, off, v)?;
                    }
                    Inst::TruncI8 { dst, src } => {
                        let v = self.eval_int(&regs, *src)? & 0xFF;
                        regs[dst.0 as usize] = Some(Val::Int(v));
                    }
                    Inst::AddI8 { dst, a, b } => {
                        let v = (self.eval_int(&regs, *a)?)
                            .wrapping_add(self.eval_int(&regs, *b)?)
                            & 0xFF;
                        regs[dst.0 as usize] = Some(Val::Int(v));
                    }
                    Inst::MulI8 { dst, a, b } => {
                        let v = (self.eval_int(&regs, *a)?)
                            .wrapping_mul(self.eval_int(&regs, *b)?)
                            & 0xFF;
                        regs[dst.0 as usize] = Some(Val::Int(v));
                    }
                    Inst::XorI8 { dst, a, b } => {
                        let v = (self.eval_int(&regs, *a)? ^ self.eval_int(&regs, *b)?) & 0xFF;
                        regs[dst.0 as usize] = Some(Val::Int(v));
                    }
                    Inst::AddI32 { dst, a, b } => {
                        let v = (self.eval_int(&regs, *a)?)
                            .wrapping_add(self.eval_int(&regs, *b)?)
                            & 0xFFFF_FFFF;
                        regs[dst.0 as usize] = Some(Val::Int(v));
                    }
                    Inst::UltI32 { dst, a, b } => {
                        let a = self.eval_int(&regs, *a)? & 0xFFFF_FFFF;
                        let b = self.eval_int(&regs, *b)? & 0xFFFF_FFFF;
                        regs[dst.0 as usize] = Some(Val::Int((a < b) as u64));
                    }
                    Inst::Call { callee, .. } => {
                        self.run_func(*callee)?;
                    }
                }
            }

            match block.term {
                Term::Br(t) => {
                    prev = Some(cur);
                    cur = t;
                }
                Term::CondBr { cond, then_bb, else_bb } => {
                    let c = self.eval_int(&regs, cond)?;
                    prev = Some(cur);
                    cur = if c != 0 { then_bb } else { else_bb };
                }
                Term::Ret => return Ok(()),
            }
        }
    }

    fn eval(&self, regs: &[Option<Val>], o: Operand) -> Result<Val> {
        match o {
            Operand::Imm(v) => Ok(Val::Int(v as u64)),
            Operand::Reg(r) => regs
                .get(r.0 as usize)
                .copied()
                .flatten()
                .ok_or_else(|| anyhow!("use of unset register %{}", r.0)),
        }
    }

    fn eval_int(&self, regs: &[Option<Val>], o: Operand) -> Result<u64> {
        match self.eval(regs, o)? {
            Val::Int(v) => Ok(v),
            Val::Addr(..) => bail!("expected integer operand, found address"),
        }
    }

    fn addr(&self, regs: &[Option<Val>], r: Reg) -> Result<(GlobalId, u32)> {
        match self.eval(regs, Operand::Reg(r))? {
            Val::Addr(g, off) => Ok((g, off)),
            Val::Int(_) => bail!("expected address in %{}, found integer", r.0),
        }
    }

    fn read_byte(&self, g: GlobalId, off: u32) -> Result<u8> {
        self.mem
            .get(&g.0)
            .and_then(|m| m.get(off as usize))
            .copied()
            .ok_or_else(|| anyhow!("load out of bounds: global #{} + {}", g.0, off))
    }

    fn write_byte(&mut self, g: GlobalId, off: u32, v: u8) -> Result<()> {
        let slot = self
            .mem
            .get_mut(&g.0)
            .and_then(|m| m.get_mut(off as usize))
            .ok_or_else(|| anyhow!("store out of bounds: global #{} + {}", g.0, off))?;
        *slot = v;
        Ok(())
    }
}
