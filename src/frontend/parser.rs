// src/frontend/parser.rs
// 文本模块格式 -> ir::Module。语法见 src/grammar/module.pest。
//
// 两遍下降：先收集全局/声明/函数头建符号表，再填函数体与 ctor 表，
// 这样 gep/call/ctor 可以前向引用后文定义的符号。

use anyhow::{anyhow, bail, Context, Result};
use pest::iterators::Pair;
use pest::Parser;

use crate::diag::DiagSink;
use crate::frontend::span::{FileId, Span};
use crate::ir::{
    Block, BlockId, FuncId, Function, GlobalData, GlobalId, Init, Inst, Linkage, Module, Operand,
    Reg, Term, Ty,
};
use crate::utils::fast::{fast_map, FastMap, SmallVec2, SmallVec4};

#[derive(pest_derive::Parser)]
#[grammar = "./grammar/module.pest"]
pub struct ModuleParser;

/// 便捷入口：诊断丢弃，只要 Result
pub fn parse_module(src: &str, fid: FileId) -> Result<Module> {
    let mut diags = DiagSink::new();
    parse_module_with_diags(src, fid, "<input>", &mut diags)
}

/// 带诊断入口：语法/解析期错误写入 `diags`（带 span），同时返回 Err
pub fn parse_module_with_diags(
    src: &str,
    fid: FileId,
    file_name: &str,
    diags: &mut DiagSink,
) -> Result<Module> {
    let mut pairs = ModuleParser::parse(Rule::file, src).map_err(|e| {
        let (start, end) = match e.location {
            pest::error::InputLocation::Pos(p) => (p, (p + 1).min(src.len())),
            pest::error::InputLocation::Span((s, t)) => (s, t),
        };
        diags.error(
            "P0001",
            file_name,
            Some(Span { file: fid, start, end }),
            e.variant.message().to_string(),
        );
        anyhow!("parse `{}` failed", file_name)
    })?;

    let file = pairs
        .next()
        .ok_or_else(|| anyhow!("parse `{}` produced no output", file_name))?;

    Lowerer { fid, file_name, diags }.lower_file(file)
}

struct Lowerer<'a> {
    fid: FileId,
    file_name: &'a str,
    diags: &'a mut DiagSink,
}

impl Lowerer<'_> {
    fn span(&self, sp: pest::Span) -> Span {
        Span { file: self.fid, start: sp.start(), end: sp.end() }
    }

    /// 记录一条带位置的错误并生成 anyhow 错误
    fn err(&mut self, code: &str, sp: pest::Span, msg: String) -> anyhow::Error {
        self.diags
            .error(code, self.file_name, Some(self.span(sp)), msg.clone());
        anyhow!(msg)
    }

    fn lower_file(mut self, file: Pair<Rule>) -> Result<Module> {
        let mut module = Module::new("");
        let mut gmap: FastMap<String, GlobalId> = fast_map();
        let mut fmap: FastMap<String, FuncId> = fast_map();

        let mut items: Vec<Pair<Rule>> = Vec::new();
        for p in file.into_inner() {
            match p.as_rule() {
                Rule::module_decl => {
                    let q = expect_inner(p)?;
                    module.name = unquote(q.as_str());
                }
                Rule::item => items.push(expect_inner(p)?),
                Rule::EOI => {}
                other => bail!("unexpected rule at top level: {:?}", other),
            }
        }

        // 1) 符号表：全局、外部声明、函数头
        for p in &items {
            match p.as_rule() {
                Rule::global_def => {
                    let sp = p.as_span();
                    let g = self.lower_global(p.clone())?;
                    if gmap.contains_key(&g.name) {
                        return Err(self.err(
                            "P0002",
                            sp,
                            format!("duplicate global `@{}`", g.name),
                        ));
                    }
                    let name = g.name.clone();
                    let id = module.add_global(g);
                    gmap.insert(name, id);
                }
                Rule::declare_def | Rule::fn_def => {
                    let sp = p.as_span();
                    let sym = expect_rule(p.clone(), Rule::sym)?;
                    let name = sym_name(sym)?;
                    if fmap.contains_key(&name) {
                        return Err(self.err(
                            "P0003",
                            sp,
                            format!("duplicate function `@{}`", name),
                        ));
                    }
                    let id = module.add_func(Function::declaration(name.clone()));
                    fmap.insert(name, id);
                }
                Rule::ctor_def => {}
                other => bail!("unexpected item rule: {:?}", other),
            }
        }

        // 2) 函数体与构造器表
        for p in items {
            match p.as_rule() {
                Rule::fn_def => {
                    let sym = expect_rule(p.clone(), Rule::sym)?;
                    let name = sym_name(sym)?;
                    let id = fmap[&name];
                    let f = self.lower_fn_body(p, name, &gmap, &fmap)?;
                    module.funcs[id.0 as usize] = f;
                }
                Rule::ctor_def => {
                    let sp = p.as_span();
                    let mut inner = p.into_inner();
                    let prio_p = next_pair(&mut inner, "ctor priority")?;
                    let prio: i64 = parse_int(&prio_p)?;
                    if !(0..=u16::MAX as i64).contains(&prio) {
                        return Err(self.err(
                            "P0004",
                            sp,
                            format!("ctor priority {} out of range", prio),
                        ));
                    }
                    let sym = next_pair(&mut inner, "ctor target")?;
                    let target_sp = sym.as_span();
                    let name = sym_name(sym)?;
                    let func = match fmap.get(&name) {
                        Some(id) => *id,
                        None => {
                            return Err(self.err(
                                "P0005",
                                target_sp,
                                format!("ctor references unknown function `@{}`", name),
                            ));
                        }
                    };
                    module.append_ctor(func, prio as u16);
                }
                _ => {}
            }
        }

        Ok(module)
    }

    fn lower_global(&mut self, p: Pair<Rule>) -> Result<GlobalData> {
        let mut inner = p.into_inner();
        let name = sym_name(next_pair(&mut inner, "global name")?)?;
        let ty = lower_ty(next_pair(&mut inner, "global type")?)?;
        let init_p = expect_inner(next_pair(&mut inner, "global initializer")?)?;
        let init = match init_p.as_rule() {
            Rule::cstr => {
                let body = expect_inner(init_p)?;
                Init::Bytes(decode_cstr(body.as_str())?)
            }
            Rule::zeroinit => Init::Zero,
            Rule::int => Init::Int(parse_int(&init_p)?),
            other => bail!("unexpected initializer rule: {:?}", other),
        };

        let mut g = GlobalData {
            name,
            ty,
            linkage: Linkage::External,
            section: None,
            addr_space: 0,
            is_const: false,
            thread_local: false,
            init: Some(init),
        };

        for attr in inner {
            let a = expect_inner(attr)?;
            match a.as_rule() {
                Rule::attr_const => g.is_const = true,
                Rule::attr_tls => g.thread_local = true,
                Rule::attr_section => {
                    let q = expect_inner(a)?;
                    g.section = Some(unquote(q.as_str()));
                }
                Rule::attr_linkage => {
                    g.linkage = lower_linkage(expect_inner(a)?);
                }
                Rule::attr_addrspace => {
                    let n = expect_inner(a)?;
                    let v: i64 = parse_int(&n)?;
                    g.addr_space = u32::try_from(v)
                        .map_err(|_| anyhow!("addrspace {} out of range", v))?;
                }
                other => bail!("unexpected attr rule: {:?}", other),
            }
        }

        Ok(g)
    }

    fn lower_fn_body(
        &mut self,
        p: Pair<Rule>,
        name: String,
        gmap: &FastMap<String, GlobalId>,
        fmap: &FastMap<String, FuncId>,
    ) -> Result<Function> {
        let mut linkage = Linkage::External;
        let mut block_pairs: Vec<Pair<Rule>> = Vec::new();
        for q in p.into_inner() {
            match q.as_rule() {
                Rule::sym => {}
                Rule::fn_linkage => linkage = lower_linkage(expect_inner(q)?),
                Rule::block => block_pairs.push(q),
                other => bail!("unexpected rule in fn: {:?}", other),
            }
        }

        // 先扫标签再填指令，允许前向跳转
        let mut labels: FastMap<String, BlockId> = fast_map();
        for (i, b) in block_pairs.iter().enumerate() {
            let label_p = expect_rule(b.clone(), Rule::label_ref)?;
            let label = label_p.as_str().to_string();
            if labels.contains_key(&label) {
                return Err(self.err(
                    "P0006",
                    label_p.as_span(),
                    format!("duplicate block label `{}` in fn `@{}`", label, name),
                ));
            }
            labels.insert(label, BlockId(i as u32));
        }

        let mut max_reg: Option<u32> = None;
        let mut blocks = Vec::with_capacity(block_pairs.len());
        for b in block_pairs {
            blocks.push(self.lower_block(b, &name, gmap, fmap, &labels, &mut max_reg)?);
        }

        Ok(Function {
            name,
            linkage,
            blocks,
            next_reg: max_reg.map(|r| r + 1).unwrap_or(0),
        })
    }

    fn lower_block(
        &mut self,
        p: Pair<Rule>,
        fn_name: &str,
        gmap: &FastMap<String, GlobalId>,
        fmap: &FastMap<String, FuncId>,
        labels: &FastMap<String, BlockId>,
        max_reg: &mut Option<u32>,
    ) -> Result<Block> {
        let mut label = String::new();
        let mut insts = Vec::new();
        let mut term = Term::Ret;

        for q in p.into_inner() {
            match q.as_rule() {
                Rule::label_ref => label = q.as_str().to_string(),
                Rule::inst => {
                    let i = expect_inner(q)?;
                    insts.push(self.lower_inst(i, gmap, fmap, labels, max_reg)?);
                }
                Rule::term => {
                    let t = expect_inner(q)?;
                    term = self.lower_term(t, fn_name, labels, max_reg)?;
                }
                other => bail!("unexpected rule in block: {:?}", other),
            }
        }

        Ok(Block { label, insts, term })
    }

    fn lower_inst(
        &mut self,
        p: Pair<Rule>,
        gmap: &FastMap<String, GlobalId>,
        fmap: &FastMap<String, FuncId>,
        labels: &FastMap<String, BlockId>,
        max_reg: &mut Option<u32>,
    ) -> Result<Inst> {
        match p.as_rule() {
            Rule::assign => {
                let mut inner = p.into_inner();
                let dst = parse_reg(&next_pair(&mut inner, "assign dst")?, max_reg)?;
                let rhs = next_pair(&mut inner, "assign rhs")?;
                self.lower_rhs(dst, rhs, gmap, labels, max_reg)
            }
            Rule::store_st => {
                let mut inner = p.into_inner();
                let val = lower_operand(next_pair(&mut inner, "store value")?, max_reg)?;
                let addr = parse_reg(&next_pair(&mut inner, "store address")?, max_reg)?;
                Ok(Inst::StoreI8 { val, addr })
            }
            Rule::call_st => {
                let mut inner = p.into_inner();
                let sym = next_pair(&mut inner, "call target")?;
                let sp = sym.as_span();
                let name = sym_name(sym)?;
                let callee = match fmap.get(&name) {
                    Some(id) => *id,
                    None => {
                        return Err(self.err(
                            "P0007",
                            sp,
                            format!("call to unknown function `@{}`", name),
                        ));
                    }
                };
                let mut args: SmallVec4<Operand> = SmallVec4::new();
                for a in inner {
                    args.push(lower_operand(a, max_reg)?);
                }
                Ok(Inst::Call { callee, args })
            }
            other => bail!("unexpected inst rule: {:?}", other),
        }
    }

    fn lower_rhs(
        &mut self,
        dst: Reg,
        p: Pair<Rule>,
        gmap: &FastMap<String, GlobalId>,
        labels: &FastMap<String, BlockId>,
        max_reg: &mut Option<u32>,
    ) -> Result<Inst> {
        match p.as_rule() {
            Rule::rhs_phi => {
                let mut incomings: SmallVec2<(BlockId, Operand)> = SmallVec2::new();
                for arm in p.into_inner() {
                    let mut inner = arm.into_inner();
                    let v = lower_operand(next_pair(&mut inner, "phi value")?, max_reg)?;
                    let label_p = next_pair(&mut inner, "phi label")?;
                    let bb = self.resolve_label(&label_p, labels)?;
                    incomings.push((bb, v));
                }
                Ok(Inst::Phi { dst, incomings })
            }
            Rule::rhs_gep => {
                let mut inner = p.into_inner();
                let sym = next_pair(&mut inner, "gep base")?;
                let sp = sym.as_span();
                let name = sym_name(sym)?;
                let base = match gmap.get(&name) {
                    Some(id) => *id,
                    None => {
                        return Err(self.err(
                            "P0008",
                            sp,
                            format!("gep references unknown global `@{}`", name),
                        ));
                    }
                };
                let index = lower_operand(next_pair(&mut inner, "gep index")?, max_reg)?;
                Ok(Inst::Gep { dst, base, index })
            }
            Rule::rhs_load => {
                let addr = parse_reg(&expect_inner(p)?, max_reg)?;
                Ok(Inst::LoadI8 { dst, addr })
            }
            Rule::rhs_trunc => {
                let src = lower_operand(expect_inner(p)?, max_reg)?;
                Ok(Inst::TruncI8 { dst, src })
            }
            Rule::rhs_bin => {
                let mut inner = p.into_inner();
                let op = next_pair(&mut inner, "binary op")?;
                let a = lower_operand(next_pair(&mut inner, "lhs")?, max_reg)?;
                let b = lower_operand(next_pair(&mut inner, "rhs")?, max_reg)?;
                Ok(match op.as_str() {
                    "add.i8" => Inst::AddI8 { dst, a, b },
                    "mul.i8" => Inst::MulI8 { dst, a, b },
                    "xor.i8" => Inst::XorI8 { dst, a, b },
                    "add.i32" => Inst::AddI32 { dst, a, b },
                    "ult.i32" => Inst::UltI32 { dst, a, b },
                    other => bail!("unknown binary op `{}`", other),
                })
            }
            other => bail!("unexpected rhs rule: {:?}", other),
        }
    }

    fn lower_term(
        &mut self,
        p: Pair<Rule>,
        fn_name: &str,
        labels: &FastMap<String, BlockId>,
        max_reg: &mut Option<u32>,
    ) -> Result<Term> {
        match p.as_rule() {
            Rule::term_br => {
                let label_p = expect_inner(p)?;
                Ok(Term::Br(self.resolve_label(&label_p, labels)?))
            }
            Rule::term_cbr => {
                let mut inner = p.into_inner();
                let cond = lower_operand(next_pair(&mut inner, "condbr cond")?, max_reg)?;
                let t = self.resolve_label(&next_pair(&mut inner, "condbr then")?, labels)?;
                let e = self.resolve_label(&next_pair(&mut inner, "condbr else")?, labels)?;
                Ok(Term::CondBr { cond, then_bb: t, else_bb: e })
            }
            Rule::term_ret => Ok(Term::Ret),
            other => bail!("unexpected terminator in fn `@{}`: {:?}", fn_name, other),
        }
    }

    fn resolve_label(
        &mut self,
        p: &Pair<Rule>,
        labels: &FastMap<String, BlockId>,
    ) -> Result<BlockId> {
        match labels.get(p.as_str()) {
            Some(bb) => Ok(*bb),
            None => Err(self.err(
                "P0009",
                p.as_span(),
                format!("unknown block label `{}`", p.as_str()),
            )),
        }
    }
}

// ===============================
// 语法树小工具
// ===============================

fn expect_inner(p: Pair<Rule>) -> Result<Pair<Rule>> {
    let rule = p.as_rule();
    p.into_inner()
        .next()
        .ok_or_else(|| anyhow!("rule {:?} has no inner pair", rule))
}

/// 在 pair 的直接子节点中找第一个指定 rule
fn expect_rule(p: Pair<Rule>, rule: Rule) -> Result<Pair<Rule>> {
    let outer = p.as_rule();
    p.into_inner()
        .find(|q| q.as_rule() == rule)
        .ok_or_else(|| anyhow!("rule {:?} has no {:?} child", outer, rule))
}

fn next_pair<'i>(
    pairs: &mut pest::iterators::Pairs<'i, Rule>,
    what: &str,
) -> Result<Pair<'i, Rule>> {
    pairs.next().ok_or_else(|| anyhow!("missing {}", what))
}

fn lower_ty(p: Pair<Rule>) -> Result<Ty> {
    let inner = expect_inner(p)?;
    match inner.as_rule() {
        Rule::array_ty => {
            let mut it = inner.into_inner();
            let len_p = next_pair(&mut it, "array length")?;
            let len: i64 = parse_int(&len_p)?;
            let len = u32::try_from(len)
                .map_err(|_| anyhow!("array length {} out of range", len))?;
            let elem = lower_prim(&next_pair(&mut it, "array element type")?)?;
            Ok(Ty::Array { elem: Box::new(elem), len })
        }
        Rule::prim_ty => lower_prim(&inner),
        other => bail!("unexpected type rule: {:?}", other),
    }
}

fn lower_prim(p: &Pair<Rule>) -> Result<Ty> {
    Ok(match p.as_str() {
        "i8" => Ty::I8,
        "i32" => Ty::I32,
        "i64" => Ty::I64,
        "ptr" => Ty::Ptr,
        other => bail!("unknown type `{}`", other),
    })
}

fn sym_name(p: Pair<Rule>) -> Result<String> {
    let inner = expect_inner(p)?;
    Ok(match inner.as_rule() {
        Rule::quoted => unquote(inner.as_str()),
        _ => inner.as_str().to_string(),
    })
}

/// 去掉引号并还原 `\"` / `\\`
fn unquote(s: &str) -> String {
    let body = &s[1..s.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(n) = chars.next() {
                out.push(n);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `c"..."` 字节串解码：`\XX` 十六进制、`\\`，其余原样
fn decode_cstr(body: &str) -> Result<Vec<u8>> {
    let raw = body.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            if i + 1 < raw.len() && raw[i + 1] == b'\\' {
                out.push(b'\\');
                i += 2;
            } else if i + 2 < raw.len() {
                let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                    .context("invalid escape in byte string")?;
                let v = u8::from_str_radix(hex, 16)
                    .with_context(|| format!("invalid escape `\\{}`", hex))?;
                out.push(v);
                i += 3;
            } else {
                bail!("truncated escape in byte string");
            }
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn parse_int(p: &Pair<Rule>) -> Result<i64> {
    p.as_str()
        .parse::<i64>()
        .with_context(|| format!("invalid integer `{}`", p.as_str()))
}

/// `%N` -> Reg(N)，并更新函数内已见最大寄存器号
fn parse_reg(p: &Pair<Rule>, max_reg: &mut Option<u32>) -> Result<Reg> {
    let n = p.as_str()[1..]
        .parse::<u32>()
        .with_context(|| format!("invalid register `{}`", p.as_str()))?;
    *max_reg = Some(max_reg.map_or(n, |m| m.max(n)));
    Ok(Reg(n))
}

fn lower_operand(p: Pair<Rule>, max_reg: &mut Option<u32>) -> Result<Operand> {
    let inner = expect_inner(p)?;
    Ok(match inner.as_rule() {
        Rule::reg => Operand::Reg(parse_reg(&inner, max_reg)?),
        _ => Operand::Imm(parse_int(&inner)?),
    })
}

fn lower_linkage(p: Pair<Rule>) -> Linkage {
    match p.as_str() {
        "internal" => Linkage::Internal,
        "private" => Linkage::Private,
        _ => Linkage::External,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::print::print_module;

    const SRC: &str = r#"
module "hello"

global @greeting : [6 x i8] = c"HELLO\00", const
global @count : i32 = 0, linkage internal

declare @puts

fn @main {
entry:
  %0 = gep @greeting, 0
  call @puts(%0)
  ret
}
"#;

    #[test]
    fn parse_then_print_is_stable() {
        let m1 = parse_module(SRC, FileId::DUMMY).expect("first parse");
        let text = print_module(&m1);
        let m2 = parse_module(&text, FileId::DUMMY).expect("reparse of printed module");
        assert_eq!(text, print_module(&m2));
    }

    #[test]
    fn cstr_escapes_decode() {
        let m = parse_module(
            "global @s : [4 x i8] = c\"a\\5Cb\\00\", const",
            FileId::DUMMY,
        )
        .expect("parse");
        let id = m.find_global("s").expect("global s");
        assert_eq!(m.global(id).unwrap().init_bytes(), Some(&b"a\\b\0"[..]));
    }

    #[test]
    fn unknown_global_in_gep_is_an_error() {
        let src = "fn @f {\nentry:\n  %0 = gep @nope, 0\n  ret\n}\n";
        assert!(parse_module(src, FileId::DUMMY).is_err());
    }
}
