//! 并行处理工具模块
//! 使用 Rayon 并行读入多个编译单元

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;

/// 并行读取文件内容
pub fn read_files_parallel(file_paths: &[PathBuf]) -> Result<Vec<(PathBuf, String)>> {
    let results: Result<Vec<_>> = file_paths
        .par_iter()
        .map(|path| {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            Ok((path.clone(), content))
        })
        .collect();

    results
}
