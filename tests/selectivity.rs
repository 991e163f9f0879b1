// 选择性：不合格的全局在变换前后逐字节不变；
// 空模块与关掉的开关都必须是严格空操作。

use datadiv::diag::DiagSink;
use datadiv::entropy::unit_rng;
use datadiv::frontend::parser::parse_module;
use datadiv::frontend::span::FileId;
use datadiv::ir::print::print_module;
use datadiv::middle::strenc::{transform, EncodeOptions};

const MIXED: &str = r#"
module "mixed"

global @secret : [7 x i8] = c"secret\00", const
global @empty : [1 x i8] = c"\00", const
global @rw_buf : [6 x i8] = c"buf00\00"
global @tls_tag : [4 x i8] = c"tls\00", const, thread_local
global @meta : [5 x i8] = c"meta\00", const, section "llvm.metadata"
global @methname : [5 x i8] = c"init\00", const, section "__DATA,__objc_methname"
global @counter : i32 = 0, const
global @blob : [4 x i8] = c"ab\00c", const

declare @use_bytes

fn @main {
entry:
  %0 = gep @secret, 0
  call @use_bytes(%0)
  ret
}
"#;

/// 变换前后都应原样保留的全局
const UNTOUCHED: &[(&str, &[u8])] = &[
    ("rw_buf", b"buf00\0"),
    ("tls_tag", b"tls\0"),
    ("meta", b"meta\0"),
    ("methname", b"init\0"),
    ("blob", b"ab\0c"),
];

#[test]
fn only_eligible_globals_are_encoded() {
    let mut m = parse_module(MIXED, FileId::DUMMY).expect("parse mixed unit");
    let mut rng = unit_rng(Some(11), 0);
    let mut diags = DiagSink::new();

    let outcome = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
    // secret + empty（只有终结符的空串也合法）
    assert_eq!(outcome.encoded, 2);

    for (name, bytes) in UNTOUCHED {
        let id = m.find_global(name).unwrap_or_else(|| panic!("`@{}` kept", name));
        let g = m.global(id).unwrap();
        assert_eq!(
            g.init_bytes(),
            Some(*bytes),
            "`@{}` must be byte-identical",
            name
        );
    }

    // 不合格全局的常量位也不该被碰
    let tls = m.find_global("tls_tag").unwrap();
    assert!(m.global(tls).unwrap().is_const);

    // 标量全局原样
    let counter = m.find_global("counter").unwrap();
    assert!(m.global(counter).unwrap().init_bytes().is_none());
}

#[test]
fn config_excluded_section_is_honored() {
    let src = r#"
module "cfg"
global @kept : [5 x i8] = c"kept\00", const, section ".keep"
global @taken : [6 x i8] = c"taken\00", const
"#;
    let mut m = parse_module(src, FileId::DUMMY).expect("parse");
    let mut rng = unit_rng(Some(5), 0);
    let mut diags = DiagSink::new();
    let opts = EncodeOptions {
        enabled: true,
        exclude_sections: vec![".keep".to_string()],
    };

    let outcome = transform(&mut m, &opts, &mut rng, &mut diags);
    assert_eq!(outcome.encoded, 1);

    let kept = m.find_global("kept").unwrap();
    assert_eq!(m.global(kept).unwrap().init_bytes(), Some(&b"kept\0"[..]));
}

#[test]
fn disabled_flag_makes_the_pass_inert() {
    let mut m = parse_module(MIXED, FileId::DUMMY).expect("parse");
    let before = print_module(&m);

    let mut rng = unit_rng(Some(2), 0);
    let mut diags = DiagSink::new();
    let opts = EncodeOptions { enabled: false, ..Default::default() };
    let outcome = transform(&mut m, &opts, &mut rng, &mut diags);

    assert!(!outcome.changed);
    assert_eq!(outcome.encoded, 0);
    assert_eq!(print_module(&m), before, "disabled pass must not touch the module");
}

#[test]
fn module_without_candidates_reports_no_change() {
    let src = r#"
module "none"
global @counter : i32 = 7, const
global @rw : [3 x i8] = c"ab\00"
"#;
    let mut m = parse_module(src, FileId::DUMMY).expect("parse");
    let mut rng = unit_rng(Some(1), 0);
    let mut diags = DiagSink::new();

    let outcome = transform(&mut m, &EncodeOptions::default(), &mut rng, &mut diags);
    assert!(!outcome.changed);
    assert_eq!(outcome.encoded, 0);
    // 没有解码例程、没有装载期登记
    assert!(m.funcs.is_empty());
    assert!(m.ctors.is_empty());
}
