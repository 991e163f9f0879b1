// src/project.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct DivToml {
    #[serde(default)]
    encode: EncodeTable,
}

#[derive(Debug, Default, Deserialize)]
struct EncodeTable {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    seed: Option<u64>, // 可复现构建；不写则每次走系统熵
    #[serde(default)]
    exclude_sections: Vec<String>,
}

/// 工程描述
#[derive(Debug, Clone)]
pub struct Project {
    /// 工程根目录（Div.toml 所在目录）
    pub root: PathBuf,
    /// 变换总开关（CLI `--disable` 可进一步覆盖）
    pub enabled: bool,
    /// 每编译单元随机流的基准种子
    pub seed: Option<u64>,
    /// 配置追加的排除节
    pub exclude_sections: Vec<String>,
}

/// 从当前工作目录加载工程：
/// - root = 当前工作目录
/// - 读取 <root>/Div.toml（可选）；读取/解析失败回退默认值
pub fn load_from_cwd() -> Result<Project> {
    let root = std::env::current_dir().context("current_dir() failed")?;
    Ok(load_from_dir(&root))
}

/// 从指定目录加载工程
pub fn load_from_dir(root: &Path) -> Project {
    let div_toml = root.join("Div.toml");
    let table = match fs::read_to_string(&div_toml) {
        Ok(s) => match toml::from_str::<DivToml>(&s) {
            Ok(cfg) => cfg.encode,
            Err(e) => {
                eprintln!(
                    "warning: parse `{}` as TOML failed: {e}",
                    div_toml.display()
                );
                EncodeTable::default()
            }
        },
        // 没有 Div.toml；完全默认
        Err(_) => EncodeTable::default(),
    };

    Project {
        root: root.to_path_buf(),
        enabled: table.enabled.unwrap_or(true),
        seed: table.seed,
        exclude_sections: table.exclude_sections,
    }
}
