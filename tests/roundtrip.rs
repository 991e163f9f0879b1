// 端到端往返：变换后的模块在解释器里跑完构造器，
// 所有被编码全局的字节镜像必须还原为原始明文。

use datadiv::diag::DiagSink;
use datadiv::entropy::unit_rng;
use datadiv::frontend::parser::parse_module;
use datadiv::frontend::span::FileId;
use datadiv::ir::interp::Machine;
use datadiv::ir::print::print_module;
use datadiv::ir::{Linkage, Module};
use datadiv::middle::strenc::{transform, EncodeOptions, PassOutcome};
use datadiv::middle::verify::verify_module;

const UNIT: &str = r#"
module "hello"

global @greeting : [15 x i8] = c"hello, datadiv\00", const
global @farewell : [9 x i8] = c"goodbye.\00", const, linkage internal

declare @puts

fn @main {
entry:
  %0 = gep @greeting, 0
  call @puts(%0)
  %1 = gep @farewell, 0
  call @puts(%1)
  ret
}
"#;

fn encode_unit(src: &str, seed: u64) -> (Module, PassOutcome) {
    let mut m = parse_module(src, FileId::DUMMY).expect("parse input unit");
    let mut rng = unit_rng(Some(seed), 0);
    let mut diags = DiagSink::new();
    let outcome = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
    (m, outcome)
}

#[test]
fn decode_routine_restores_all_plaintexts() {
    let (m, outcome) = encode_unit(UNIT, 42);
    assert!(outcome.changed);
    assert_eq!(outcome.encoded, 2);

    // 变换后的模块仍然结构良好
    let mut diags = DiagSink::new();
    verify_module(&m, "hello.ir", &mut diags).expect("transformed module verifies");

    // 初始化器确实不是明文了
    let greeting = m.find_global("greeting").expect("twin keeps name");
    let cipher = m.global(greeting).unwrap().init_bytes().unwrap().to_vec();
    assert_ne!(cipher, b"hello, datadiv\0".to_vec());

    // 跑构造器，镜像必须还原
    let mut machine = Machine::new(&m);
    machine.run_ctors().expect("ctors run");
    assert_eq!(machine.global_bytes(greeting).unwrap(), b"hello, datadiv\0");

    let farewell = m.find_global("farewell").unwrap();
    assert_eq!(machine.global_bytes(farewell).unwrap(), b"goodbye.\0");
}

#[test]
fn decode_routine_shape_and_registration() {
    let (m, _) = encode_unit(UNIT, 7);

    assert_eq!(m.ctors.len(), 1);
    assert_eq!(m.ctors[0].priority, 0);

    let decode = m.func(m.ctors[0].func);
    assert!(decode.name.starts_with(".datadiv_decode"));
    assert_eq!(decode.linkage, Linkage::Private);
    assert!(!decode.is_decl());
    // 两条记录 -> 每条一个 body/end 块，外加 entry
    assert_eq!(decode.blocks.len(), 5);
}

#[test]
fn rewritten_globals_keep_name_linkage_and_type() {
    let (m, _) = encode_unit(UNIT, 9);

    let farewell = m.find_global("farewell").expect("name preserved");
    let g = m.global(farewell).unwrap();
    assert_eq!(g.linkage, Linkage::Internal);
    assert!(g.ty.is_i8_array());
    assert_eq!(g.ty.byte_len(), 9);
    assert!(!g.is_const, "twin must be writable at load time");
}

#[test]
fn printed_output_does_not_leak_plaintext() {
    let (m, _) = encode_unit(UNIT, 1);
    let text = print_module(&m);
    assert!(!text.contains("hello, datadiv"));
    assert!(!text.contains("goodbye."));
    // 引用改指到孪生之后 gep 仍按名字引用
    assert!(text.contains("gep @greeting"));
}

#[test]
fn second_pass_over_own_output_is_a_noop() {
    let (mut m, first) = encode_unit(UNIT, 3);
    assert!(first.changed);

    let before = print_module(&m);
    let mut rng = unit_rng(Some(3), 1);
    let mut diags = DiagSink::new();
    let second = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);

    assert!(!second.changed);
    assert_eq!(second.encoded, 0);
    assert_eq!(print_module(&m), before);
    assert_eq!(m.ctors.len(), 1);
}

// 规格向量：key=0x12、step=0x05 时 "HELLO\0" 的密文是 ZRPmi+；
// 手写的解码例程经解释执行必须还原出明文。
const VECTOR: &str = r#"
module "vector"

global @s : [6 x i8] = c"ZRPmi+"

fn @.datadiv_decode1 linkage private {
entry:
  br strdec.body
strdec.body:
  %0 = phi [0, entry], [%7, strdec.body]
  %1 = gep @s, %0
  %2 = load.i8 %1
  %3 = trunc.i8 %0
  %4 = mul.i8 %3, 5
  %5 = add.i8 %4, 18
  %6 = xor.i8 %2, %5
  store.i8 %6, %1
  %7 = add.i32 %0, 1
  %8 = ult.i32 %7, 6
  condbr %8, strdec.body, strdec.end
strdec.end:
  ret
}

ctor 0 @.datadiv_decode1
"#;

#[test]
fn hand_written_decode_loop_matches_the_cipher() {
    let m = parse_module(VECTOR, FileId::DUMMY).expect("parse vector unit");
    let s = m.find_global("s").unwrap();
    assert_eq!(
        m.global(s).unwrap().init_bytes().unwrap(),
        &[0x5A, 0x52, 0x50, 0x6D, 0x69, 0x2B]
    );

    let mut machine = Machine::new(&m);
    machine.run_ctors().expect("decode loop runs");
    assert_eq!(
        machine.global_bytes(s).unwrap(),
        &[0x48, 0x45, 0x4C, 0x4C, 0x4F, 0x00]
    );
}
