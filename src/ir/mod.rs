// src/ir/mod.rs
// 模块中间表示：全局数据 / 函数 / 构造器表，及其构建、打印与解释执行

pub mod module;
pub mod inst;
pub mod build;
pub mod print;
pub mod interp;

pub use build::FuncBuilder;
pub use inst::{Block, BlockId, Function, Inst, Operand, Reg, Term};
pub use module::{CtorEntry, FuncId, GlobalData, GlobalId, Init, Linkage, Module, Ty};
