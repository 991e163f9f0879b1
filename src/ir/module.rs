// src/ir/module.rs

use crate::ir::inst::Function;

/// 全局数据句柄（arena 下标）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// 函数句柄（arena 下标）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
    Private,
}

/// 类型：标量 + 字节数组（字符串全局的载体）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ty {
    I8,
    I32,
    I64,
    Ptr,
    Array { elem: Box<Ty>, len: u32 },
}

impl Ty {
    pub fn i8_array(len: u32) -> Ty {
        Ty::Array { elem: Box::new(Ty::I8), len }
    }

    /// 是否为 `[N x i8]`
    pub fn is_i8_array(&self) -> bool {
        matches!(self, Ty::Array { elem, .. } if **elem == Ty::I8)
    }

    /// 存储占用的字节数
    pub fn byte_len(&self) -> u32 {
        match self {
            Ty::I8 => 1,
            Ty::I32 => 4,
            Ty::I64 | Ty::Ptr => 8,
            Ty::Array { elem, len } => elem.byte_len() * len,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Init {
    /// 原始初始化字节（`c"..."`）
    Bytes(Vec<u8>),
    Int(i64),
    Zero,
}

/// 具名全局数据对象。
///
/// 属性集合对齐宿主模型：链接性、存储节、地址空间、常量位、线程局部位。
#[derive(Clone, Debug)]
pub struct GlobalData {
    pub name: String,
    pub ty: Ty,
    pub linkage: Linkage,
    pub section: Option<String>,
    pub addr_space: u32,
    pub is_const: bool,
    pub thread_local: bool,
    pub init: Option<Init>,
}

impl GlobalData {
    /// 初始化字节视图（仅 `Init::Bytes`）
    pub fn init_bytes(&self) -> Option<&[u8]> {
        match &self.init {
            Some(Init::Bytes(b)) => Some(b),
            _ => None,
        }
    }
}

/// 装载期构造器登记项
#[derive(Clone, Copy, Debug)]
pub struct CtorEntry {
    pub priority: u16,
    pub func: FuncId,
}

/// 模块：一个编译单元的全部全局、函数与构造器表。
///
/// 全局以 arena 下标寻址；被擦除的槽位置墓碑（`None`），遍历与打印自动跳过，
/// 已发出的 `GlobalId` 不因擦除而失效。
pub struct Module {
    pub name: String,
    pub globals: Vec<Option<GlobalData>>,
    pub funcs: Vec<Function>,
    pub ctors: Vec<CtorEntry>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            globals: Vec::new(),
            funcs: Vec::new(),
            ctors: Vec::new(),
        }
    }

    pub fn add_global(&mut self, g: GlobalData) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Some(g));
        id
    }

    /// 取全局；墓碑槽返回 None
    pub fn global(&self, id: GlobalId) -> Option<&GlobalData> {
        self.globals.get(id.0 as usize).and_then(|g| g.as_ref())
    }

    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut GlobalData> {
        self.globals.get_mut(id.0 as usize).and_then(|g| g.as_mut())
    }

    /// 擦除全局（置墓碑）。调用方负责先改写所有引用。
    pub fn erase_global(&mut self, id: GlobalId) {
        if let Some(slot) = self.globals.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// 遍历存活全局
    pub fn iter_globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalData)> {
        self.globals
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (GlobalId(i as u32), g)))
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.iter_globals()
            .find(|(_, g)| g.name == name)
            .map(|(id, _)| id)
    }

    pub fn add_func(&mut self, f: Function) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(f);
        id
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.0 as usize]
    }

    pub fn find_func(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// 登记装载期构造器。同优先级之间的相对顺序即登记顺序。
    pub fn append_ctor(&mut self, func: FuncId, priority: u16) {
        self.ctors.push(CtorEntry { priority, func });
    }
}
