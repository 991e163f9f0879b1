// src/cli/args.rs
// 命令行参数解析

use std::env;

#[derive(Debug, Clone)]
pub enum Command {
    Encode {
        inputs: Vec<String>,
        /// 关掉变换本身：流水线照走，但模块原样通过
        disable: bool,
        /// 输出前重校验，并在解释器里冒烟执行构造器
        verify: bool,
        quiet: bool,
        /// 覆盖 Div.toml 的种子
        seed: Option<u64>,
        out_dir: Option<String>,
    },
    Help,
}

#[derive(Debug)]
pub struct CliArgs {
    pub command: Command,
}

const USAGE: &str =
    "Usage: datadiv encode <input.ir ...> [--disable] [--verify] [--seed N] [--out-dir DIR] [--quiet]";

impl CliArgs {
    pub fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().skip(1).collect();

        if args.is_empty() {
            return Err(USAGE.to_string());
        }

        match args[0].as_str() {
            "encode" => {
                let mut inputs = Vec::new();
                let mut disable = false;
                let mut verify = false;
                let mut quiet = false;
                let mut seed = None;
                let mut out_dir = None;
                let mut i = 1;

                // 解析可选参数
                while i < args.len() {
                    match args[i].as_str() {
                        "--disable" => {
                            disable = true;
                            i += 1;
                        }
                        "--verify" => {
                            verify = true;
                            i += 1;
                        }
                        "--quiet" => {
                            quiet = true;
                            i += 1;
                        }
                        "--seed" => {
                            if i + 1 >= args.len() {
                                return Err("--seed requires an argument".to_string());
                            }
                            let v = args[i + 1]
                                .parse::<u64>()
                                .map_err(|_| format!("invalid seed `{}`", args[i + 1]))?;
                            seed = Some(v);
                            i += 2;
                        }
                        "--out-dir" => {
                            if i + 1 >= args.len() {
                                return Err("--out-dir requires an argument".to_string());
                            }
                            out_dir = Some(args[i + 1].clone());
                            i += 2;
                        }
                        other => {
                            if other.starts_with("--") {
                                return Err(format!("unknown option `{}`\n{}", other, USAGE));
                            }
                            inputs.push(other.to_string());
                            i += 1;
                        }
                    }
                }

                if inputs.is_empty() {
                    return Err(USAGE.to_string());
                }

                Ok(CliArgs {
                    command: Command::Encode { inputs, disable, verify, quiet, seed, out_dir },
                })
            }
            "help" | "--help" | "-h" => Ok(CliArgs { command: Command::Help }),
            _ => Err(USAGE.to_string()),
        }
    }

    pub fn usage() -> &'static str {
        USAGE
    }
}
