// src/middle/strenc.rs

//! 字符串全局多样化：把常量字符串全局换成按字节编码的可写孪生，
//! 并合成一个装载期解码例程，首次使用前原地还原。
//!
//! 每编译单元一条线性流水线：
//! `Scan -> (per global: Filtered | Encoded) -> Synthesize -> Register -> Done`。
//! 单个全局要么整体完成改写要么不碰；非空字节串的编码不会失败，
//! 所以过滤之后不存在“部分失败”状态。

use smallvec::smallvec;

use crate::diag::DiagSink;
use crate::entropy::EntropySource;
use crate::ir::{
    FuncBuilder, FuncId, GlobalData, GlobalId, Init, Inst, Linkage, Module, Operand,
};
use crate::utils::fast::SmallVec;

/// ===============================
/// 选项 / 结果 / 记录
/// ===============================

#[derive(Clone, Debug)]
pub struct EncodeOptions {
    /// 总开关：false 时整个变换是空操作
    pub enabled: bool,
    /// 配置追加的排除节（整名匹配）
    pub exclude_sections: Vec<String>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions { enabled: true, exclude_sections: Vec::new() }
    }
}

/// 变换的全部对外结果：是否改动 + 编码条数（仅诊断，不参与控制流）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub changed: bool,
    pub encoded: u32,
}

/// 每个被改写全局的记录，按产生顺序进入解码例程
#[derive(Clone, Copy, Debug)]
pub struct EncodedGlobal {
    /// 改写后的孪生全局
    pub global: GlobalId,
    pub key: u8,
    pub step: u8,
    pub size: u32,
}

/// ===============================
/// 1) 资格判定（EligibilityFilter）
/// ===============================

const METADATA_SECTION: &str = "llvm.metadata";
const OBJC_METHNAME_FRAGMENT: &str = "__objc_methname";

/// 一个全局可编码，当且仅当全部成立：
/// - 常量且带初始化器（外部供给/未初始化的不碰）
/// - 非线程局部
/// - 不在元数据节/方法名节，也不在配置排除节
/// - 初始化器是 `[N x i8]` 的 NUL 结尾字节串（无内嵌 NUL）
/// - 原始字节非空（只有终结符的空串也算合法候选）
///
/// 无副作用、确定性。改写产物常量位已清，天然不再入选，
/// 因此对自身输出重跑不会二次编码。
pub fn should_encode_global(g: &GlobalData, opts: &EncodeOptions) -> bool {
    if !g.is_const || g.init.is_none() {
        return false;
    }
    if g.thread_local {
        return false;
    }
    if let Some(sec) = &g.section {
        if sec == METADATA_SECTION || sec.contains(OBJC_METHNAME_FRAGMENT) {
            return false;
        }
        if opts.exclude_sections.iter().any(|s| s == sec) {
            return false;
        }
    }
    if !g.ty.is_i8_array() {
        return false;
    }
    let Some(bytes) = g.init_bytes() else {
        return false;
    };
    match bytes.split_last() {
        Some((last, head)) => *last == 0 && !head.contains(&0),
        None => false,
    }
}

/// ===============================
/// 2) 编码（Encoder）
/// ===============================

/// `cipher[i] = plain[i] XOR (key + (i as u8) * step)`，全程 8 位回绕。
/// XOR 自逆：同一公式既是编码也是解码。掩码在某个下标上恰为 0 时
/// 该字节原样通过，这是方案的既定性质。
pub fn encode_bytes(plain: &[u8], key: u8, step: u8) -> Vec<u8> {
    plain
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ key.wrapping_add((i as u8).wrapping_mul(step)))
        .collect()
}

/// ===============================
/// 3) 全局改写（GlobalRewriter）
/// ===============================

/// 两阶段改写：先造孪生并收集全部引用点，再统一改指，最后才擦除原全局。
/// 孪生照抄名字/类型/链接/节/地址空间，仅清常量位、换密文初始化器。
fn rewrite_global(m: &mut Module, old: GlobalId, key: u8, step: u8) -> Option<EncodedGlobal> {
    let (twin, size) = {
        let g = m.global(old)?;
        let bytes = g.init_bytes()?;
        let size = bytes.len() as u32;
        if size == 0 {
            return None;
        }
        let twin = GlobalData {
            name: g.name.clone(),
            ty: g.ty.clone(),
            linkage: g.linkage,
            section: g.section.clone(),
            addr_space: g.addr_space,
            is_const: false,
            thread_local: g.thread_local,
            init: Some(Init::Bytes(encode_bytes(bytes, key, step))),
        };
        (twin, size)
    };
    let new_id = m.add_global(twin);

    // 引用点先收集、后改指（模块内全局只以 gep 基址形式被引用）
    let mut uses: Vec<(usize, usize, usize)> = Vec::new();
    for (fi, f) in m.funcs.iter().enumerate() {
        for (bi, b) in f.blocks.iter().enumerate() {
            for (ii, inst) in b.insts.iter().enumerate() {
                if let Inst::Gep { base, .. } = inst {
                    if *base == old {
                        uses.push((fi, bi, ii));
                    }
                }
            }
        }
    }
    for (fi, bi, ii) in uses {
        if let Inst::Gep { base, .. } = &mut m.funcs[fi].blocks[bi].insts[ii] {
            *base = new_id;
        }
    }

    m.erase_global(old);
    Some(EncodedGlobal { global: new_id, key, step, size })
}

/// ===============================
/// 4) 解码例程合成（DecodeRoutineSynthesizer）
/// ===============================

/// 为本次全部记录生成一个共享解码过程：无参无返回值，
/// 每条记录一个按 size 计数的字节循环，顺序与记录产生顺序一致，
/// 循环之间互不依赖。size == 0 的记录跳过（防御；过滤器保证不出现）。
fn synthesize_decode_fn(
    m: &mut Module,
    records: &[EncodedGlobal],
    entropy: &mut dyn EntropySource,
) -> FuncId {
    let name = format!(".datadiv_decode{}", entropy.next_u64());
    let mut b = FuncBuilder::new(name, Linkage::Private);

    for r in records {
        if r.size == 0 {
            continue;
        }

        let preheader = b.current_block();
        let body = b.new_block("strdec.body");
        let end = b.new_block("strdec.end");
        b.br(body);

        b.switch_to(body);
        let index = b.phi(smallvec![(preheader, Operand::Imm(0))]);
        let addr = b.gep(r.global, Operand::Reg(index));
        let loaded = b.load_i8(addr);
        // mask = key + (index as u8) * step，与编码公式逐位一致
        let index8 = b.trunc_i8(Operand::Reg(index));
        let scaled = b.mul_i8(Operand::Reg(index8), Operand::Imm(r.step as i64));
        let mask = b.add_i8(Operand::Reg(scaled), Operand::Imm(r.key as i64));
        let decoded = b.xor_i8(Operand::Reg(loaded), Operand::Reg(mask));
        b.store_i8(Operand::Reg(decoded), addr);
        let next = b.add_i32(Operand::Reg(index), Operand::Imm(1));
        let more = b.ult_i32(Operand::Reg(next), Operand::Imm(r.size as i64));
        b.cond_br(Operand::Reg(more), body, end);
        b.add_phi_incoming(body, index, body, Operand::Reg(next));

        b.switch_to(end);
    }

    b.ret();
    m.add_func(b.finish())
}

/// ===============================
/// 5) 装载期注册（ConstructorRegistrar）
/// ===============================

const CTOR_PRIORITY: u16 = 0;

/// 注册为装载期构造器：宿主保证首次使用前恰好运行一次。
/// 与其他无关构造器的相对顺序不作约定（需要时由宿主优先级机制建立）。
/// 例程本身不可重入：二次执行会把明文再编码回去。
fn register_ctor(m: &mut Module, f: FuncId) {
    m.append_ctor(f, CTOR_PRIORITY);
}

/// ===============================
/// 0) 驱动
/// ===============================

/// 对单个模块执行一次完整流水线。
/// 随机源按全局依次抽 key、step（step 强制置奇），
/// 解码例程与注册仅在编码集非空时各发生一次。
pub fn transform(
    m: &mut Module,
    opts: &EncodeOptions,
    entropy: &mut dyn EntropySource,
    diags: &mut DiagSink,
) -> PassOutcome {
    if !opts.enabled {
        return PassOutcome::default();
    }

    let candidates: Vec<GlobalId> = m
        .iter_globals()
        .filter(|(_, g)| should_encode_global(g, opts))
        .map(|(id, _)| id)
        .collect();

    let mut records: SmallVec<[EncodedGlobal; 16]> = SmallVec::new();
    let mut outcome = PassOutcome::default();

    for id in candidates {
        let key = entropy.next_byte();
        let step = entropy.next_byte() | 1; // 奇数步长：掩码在 256 字节窗口内单调变化

        if let Some(rec) = rewrite_global(m, id, key, step) {
            if let Some(g) = m.global(rec.global) {
                let msg = format!("encoded global `@{}` ({} bytes)", g.name, rec.size);
                diags.note("E0001", &m.name, None, msg);
            }
            records.push(rec);
            outcome.encoded += 1;
            outcome.changed = true;
        }
    }

    if !records.is_empty() {
        let f = synthesize_decode_fn(m, &records, entropy);
        register_ctor(m, f);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::unit_rng;
    use crate::ir::Ty;

    /// 固定序列随机源，测试用
    struct FixedEntropy {
        bytes: Vec<u8>,
        at: usize,
    }

    impl FixedEntropy {
        fn new(bytes: &[u8]) -> Self {
            FixedEntropy { bytes: bytes.to_vec(), at: 0 }
        }
    }

    impl EntropySource for FixedEntropy {
        fn next_byte(&mut self) -> u8 {
            let b = self.bytes[self.at % self.bytes.len()];
            self.at += 1;
            b
        }

        fn next_u64(&mut self) -> u64 {
            0xDEAD_BEEF
        }
    }

    fn str_global(name: &str, bytes: &[u8]) -> GlobalData {
        GlobalData {
            name: name.to_string(),
            ty: Ty::i8_array(bytes.len() as u32),
            linkage: Linkage::External,
            section: None,
            addr_space: 0,
            is_const: true,
            thread_local: false,
            init: Some(Init::Bytes(bytes.to_vec())),
        }
    }

    #[test]
    fn concrete_vector_hello() {
        let plain = [0x48, 0x45, 0x4C, 0x4C, 0x4F, 0x00];
        let cipher = encode_bytes(&plain, 0x12, 0x05);
        assert_eq!(cipher, vec![0x5A, 0x52, 0x50, 0x6D, 0x69, 0x2B]);
        assert_eq!(encode_bytes(&cipher, 0x12, 0x05), plain.to_vec());
    }

    #[test]
    fn encode_roundtrips_for_sampled_keys_and_steps() {
        let plains: [&[u8]; 3] = [b"x\0", b"hello world\0", &[0u8]];
        for &key in &[0u8, 1, 0x12, 0x7F, 0xFF] {
            for &step in &[1u8, 5, 0x2B, 0xFF] {
                for plain in plains {
                    let cipher = encode_bytes(plain, key, step);
                    assert_eq!(cipher.len(), plain.len());
                    assert_eq!(encode_bytes(&cipher, key, step), plain.to_vec());
                }
            }
        }
    }

    #[test]
    fn zero_mask_leaves_byte_unchanged() {
        // key=0, i=0 -> mask 0，首字节原样通过（方案既定性质）
        let cipher = encode_bytes(b"A\0", 0, 3);
        assert_eq!(cipher[0], b'A');
    }

    #[test]
    fn filter_rejects_ineligible_globals() {
        let opts = EncodeOptions::default();

        assert!(should_encode_global(&str_global("ok", b"hi\0"), &opts));
        // 只有终结符的空串也是合法候选
        assert!(should_encode_global(&str_global("empty", b"\0"), &opts));

        let mut g = str_global("nc", b"hi\0");
        g.is_const = false;
        assert!(!should_encode_global(&g, &opts));

        let mut g = str_global("tls", b"hi\0");
        g.thread_local = true;
        assert!(!should_encode_global(&g, &opts));

        let mut g = str_global("meta", b"hi\0");
        g.section = Some("llvm.metadata".to_string());
        assert!(!should_encode_global(&g, &opts));

        let mut g = str_global("objc", b"hi\0");
        g.section = Some("__TEXT,__objc_methname,cstring_literals".to_string());
        assert!(!should_encode_global(&g, &opts));

        // 无终结符 / 内嵌 NUL
        assert!(!should_encode_global(&str_global("noterm", b"hi"), &opts));
        assert!(!should_encode_global(&str_global("embedded", b"h\0i\0"), &opts));

        // 非字节数组
        let mut g = str_global("int", b"hi\0");
        g.ty = Ty::I32;
        assert!(!should_encode_global(&g, &opts));

        // 配置排除节
        let opts = EncodeOptions {
            enabled: true,
            exclude_sections: vec![".keep".to_string()],
        };
        let mut g = str_global("kept", b"hi\0");
        g.section = Some(".keep".to_string());
        assert!(!should_encode_global(&g, &opts));
    }

    #[test]
    fn step_is_forced_odd() {
        // 随机源只吐偶数字节，合成的掩码乘数仍必须是奇数
        let mut m = Module::new("t");
        m.add_global(str_global("a", b"abc\0"));
        let mut ent = FixedEntropy::new(&[0x10, 0x20, 0x30, 0x40]);
        let mut diags = DiagSink::new();

        let out = transform(&mut m, &EncodeOptions::default(), &mut ent, &mut diags);
        assert_eq!(out.encoded, 1);

        let decode = m
            .find_func(".datadiv_decode3735928559")
            .expect("decode routine present");
        let mut saw_mul = false;
        for b in &m.func(decode).blocks {
            for i in &b.insts {
                if let Inst::MulI8 { b: Operand::Imm(step), .. } = i {
                    saw_mul = true;
                    assert_eq!(step % 2, 1, "step must be odd");
                }
            }
        }
        assert!(saw_mul);
    }

    #[test]
    fn empty_module_reports_no_change() {
        let mut m = Module::new("empty");
        let mut rng = unit_rng(Some(1), 0);
        let mut diags = DiagSink::new();

        let out = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
        assert_eq!(out, PassOutcome::default());
        assert!(m.funcs.is_empty());
        assert!(m.ctors.is_empty());
    }

    #[test]
    fn disabled_pass_is_a_noop() {
        let mut m = Module::new("t");
        m.add_global(str_global("a", b"abc\0"));
        let mut rng = unit_rng(Some(1), 0);
        let mut diags = DiagSink::new();
        let opts = EncodeOptions { enabled: false, ..Default::default() };

        let out = transform(&mut m, &opts, &mut rng, &mut diags);
        assert!(!out.changed);
        assert!(m.ctors.is_empty());
        let id = m.find_global("a").expect("global kept");
        assert!(m.global(id).unwrap().is_const);
    }

    #[test]
    fn rewrite_preserves_name_linkage_type_and_clears_const() {
        let mut m = Module::new("t");
        let mut g = str_global("msg", b"secret\0");
        g.linkage = Linkage::Internal;
        g.section = Some(".rodata".to_string());
        m.add_global(g);

        let mut rng = unit_rng(Some(9), 0);
        let mut diags = DiagSink::new();
        let out = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
        assert!(out.changed);
        assert_eq!(out.encoded, 1);

        let id = m.find_global("msg").expect("twin keeps the name");
        let twin = m.global(id).unwrap();
        assert_eq!(twin.linkage, Linkage::Internal);
        assert_eq!(twin.section.as_deref(), Some(".rodata"));
        assert_eq!(twin.ty, Ty::i8_array(7));
        assert!(!twin.is_const);
        // 密文长度不变，但不再是明文
        let cipher = twin.init_bytes().unwrap();
        assert_eq!(cipher.len(), 7);
        assert_ne!(cipher, b"secret\0");
        // 恰好一次装载期注册，优先级 0
        assert_eq!(m.ctors.len(), 1);
        assert_eq!(m.ctors[0].priority, 0);
    }

    #[test]
    fn second_run_over_own_output_encodes_nothing() {
        let mut m = Module::new("t");
        m.add_global(str_global("a", b"abc\0"));
        m.add_global(str_global("b", b"de\0"));
        let mut rng = unit_rng(Some(3), 0);
        let mut diags = DiagSink::new();

        let first = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
        assert_eq!(first.encoded, 2);

        let second = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
        assert!(!second.changed);
        assert_eq!(second.encoded, 0);
        assert_eq!(m.ctors.len(), 1);
    }
}
