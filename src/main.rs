// src/main.rs
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use datadiv::cli::args::{CliArgs, Command};
use datadiv::cli::colors::{ansi, ColorSupport};
use datadiv::diag::{render_diagnostics_colored, DiagSink, SourceMap};
use datadiv::entropy::unit_rng;
use datadiv::frontend::parser;
use datadiv::ir::interp::Machine;
use datadiv::ir::print::print_module;
use datadiv::middle::strenc::{transform, EncodeOptions};
use datadiv::middle::verify::verify_module;
use datadiv::project;

fn main() -> Result<()> {
    let args = match CliArgs::parse() {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    };

    match args.command {
        Command::Help => {
            eprintln!("{}", CliArgs::usage());
            Ok(())
        }
        Command::Encode { inputs, disable, verify, quiet, seed, out_dir } => {
            run_encode(inputs, disable, verify, quiet, seed, out_dir)
        }
    }
}

/// 一次 encode 运行中对所有单元相同的部分
struct RunCfg {
    opts: EncodeOptions,
    seed: Option<u64>,
    verify: bool,
    quiet: bool,
    out_dir: Option<String>,
}

fn run_encode(
    inputs: Vec<String>,
    disable: bool,
    verify: bool,
    quiet: bool,
    seed_flag: Option<u64>,
    out_dir: Option<String>,
) -> Result<()> {
    // 1) 载入工程配置（Div.toml 可选），CLI 覆盖配置
    let proj = project::load_from_cwd().context("failed to load project (Div.toml or defaults)")?;
    let cfg = RunCfg {
        opts: EncodeOptions {
            enabled: proj.enabled && !disable,
            exclude_sections: proj.exclude_sections.clone(),
        },
        seed: seed_flag.or(proj.seed),
        verify,
        quiet,
        out_dir,
    };

    // 2) 输出目录（缺省为各输入文件旁）
    if let Some(dir) = &cfg.out_dir {
        fs::create_dir_all(dir).with_context(|| format!("create_dir_all({})", dir))?;
    }

    // 3) 并行读入全部编译单元
    let paths: Vec<PathBuf> = inputs.iter().map(PathBuf::from).collect();
    let units = datadiv::utils::parallel::read_files_parallel(&paths)?;

    // 4) 每单元独立处理：解析 -> 校验 -> 变换 -> 打印输出
    //    种子模式下单元 idx 用 seed+idx 的独立随机流，并行与否结果一致
    let stats: DashMap<String, u32> = DashMap::new();
    let results: Vec<Result<()>> = units
        .par_iter()
        .enumerate()
        .map(|(idx, (path, src))| process_unit(idx as u64, path, src, &cfg, &stats))
        .collect();

    // 5) 汇总
    let mut failed = 0usize;
    for (r, (path, _)) in results.iter().zip(&units) {
        if let Err(e) = r {
            failed += 1;
            eprintln!("error: {}: {:#}", path.display(), e);
        }
    }

    let total: u32 = stats.iter().map(|e| *e.value()).sum();
    if !cfg.quiet {
        let (bold, green, reset) = if ColorSupport::cached().is_enabled() {
            (ansi::BOLD, ansi::GREEN, ansi::RESET)
        } else {
            ("", "", "")
        };
        eprintln!(
            "{}{}done:{} {} unit(s), {} global(s) encoded",
            bold,
            green,
            reset,
            units.len() - failed,
            total
        );
    }

    if failed > 0 {
        process::exit(1);
    }
    Ok(())
}

fn process_unit(
    idx: u64,
    path: &Path,
    src: &str,
    cfg: &RunCfg,
    stats: &DashMap<String, u32>,
) -> Result<()> {
    let file_name = path.display().to_string();
    let mut sm = SourceMap::new();
    let fid = sm.add_file(file_name.clone(), src.to_string());
    let mut diags = DiagSink::new();

    // 解析
    let mut module = match parser::parse_module_with_diags(src, fid, &file_name, &mut diags) {
        Ok(m) => m,
        Err(e) => {
            render_diagnostics_colored(&diags.into_vec(), &sm);
            return Err(e);
        }
    };

    // 解析后的结构校验
    if let Err(e) = verify_module(&module, &file_name, &mut diags) {
        render_diagnostics_colored(&diags.into_vec(), &sm);
        return Err(e);
    }

    // 变换
    let mut rng = unit_rng(cfg.seed, idx);
    let outcome = transform(&mut module, &cfg.opts, &mut rng, &mut diags);
    stats.insert(file_name.clone(), outcome.encoded);

    // 变换后重校验 + 构造器冒烟执行
    if cfg.verify {
        if let Err(e) = verify_module(&module, &file_name, &mut diags) {
            render_diagnostics_colored(&diags.into_vec(), &sm);
            return Err(e);
        }
        let mut machine = Machine::new(&module);
        machine
            .run_ctors()
            .context("constructor smoke run failed")?;
    }

    // 写出 <stem>.enc.ir
    let out_path = output_path(path, cfg.out_dir.as_deref())?;
    fs::write(&out_path, print_module(&module))
        .with_context(|| format!("write `{}` failed", out_path.display()))?;

    if !cfg.quiet {
        render_diagnostics_colored(&diags.into_vec(), &sm);
        eprintln!(
            "OK: {} -> {} ({} global(s) encoded)",
            path.display(),
            out_path.display(),
            outcome.encoded
        );
    }
    Ok(())
}

fn output_path(input: &Path, out_dir: Option<&str>) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("input `{}` has no usable file stem", input.display()))?;
    let file = format!("{}.enc.ir", stem);
    Ok(match out_dir {
        Some(dir) => Path::new(dir).join(file),
        None => input.with_file_name(file),
    })
}
