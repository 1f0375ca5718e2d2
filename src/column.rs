//! 列存数据模型：Column / Table
//!
//! ```text
//! Column
//!  ├─ dtype
//!  ├─ data        (定长元素连续存放；String 为 offsets + chars)
//!  ├─ null_mask   (可选，1 = 有效；不可空列不分配)
//!  ├─ null_count  (始终与 null_mask 一致)
//!  └─ children    (List: [offsets, elements]；Struct: 每字段一列)
//! ```

use ahash::AHashMap;
use std::sync::Arc;

use crate::bitmask::Bitmask;
use crate::common::{EngineError, Result};
use crate::types::{DType, TimeUnit, Value};

// ── Buffer ────────────────────────────────────────────────────────────────────

/// 列的物理数据缓冲区；`Empty` 既用于嵌套列，也表示"没有数据指针"
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Empty,
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str { offsets: Vec<i32>, chars: Vec<u8> },
}

impl Buffer {
    /// 为 `dtype` 分配一个空缓冲区，预留 `capacity` 个元素
    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        match dtype {
            DType::Bool8                                   => Self::U8(Vec::with_capacity(capacity)),
            DType::Int8                                    => Self::I8(Vec::with_capacity(capacity)),
            DType::Int16                                   => Self::I16(Vec::with_capacity(capacity)),
            DType::Int32 | DType::Date32 | DType::Category => Self::I32(Vec::with_capacity(capacity)),
            DType::Int64 | DType::Timestamp(_)
            | DType::Decimal64 { .. }                      => Self::I64(Vec::with_capacity(capacity)),
            DType::Float32                                 => Self::F32(Vec::with_capacity(capacity)),
            DType::Float64                                 => Self::F64(Vec::with_capacity(capacity)),
            DType::String => {
                let mut offsets = Vec::with_capacity(capacity + 1);
                offsets.push(0);
                Self::Str { offsets, chars: Vec::new() }
            }
            DType::List | DType::Struct => Self::Empty,
        }
    }

    /// 元素个数；`Empty` 为 0
    pub fn len(&self) -> usize {
        match self {
            Self::Empty               => 0,
            Self::U8(v)               => v.len(),
            Self::I8(v)               => v.len(),
            Self::I16(v)              => v.len(),
            Self::I32(v)              => v.len(),
            Self::I64(v)              => v.len(),
            Self::F32(v)              => v.len(),
            Self::F64(v)              => v.len(),
            Self::Str { offsets, .. } => offsets.len().saturating_sub(1),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// 追加一个"零值"占位（null 行仍需占位）
    pub fn push_default(&mut self) {
        match self {
            Self::Empty  => {}
            Self::U8(v)  => v.push(0),
            Self::I8(v)  => v.push(0),
            Self::I16(v) => v.push(0),
            Self::I32(v) => v.push(0),
            Self::I64(v) => v.push(0),
            Self::F32(v) => v.push(0.0),
            Self::F64(v) => v.push(0.0),
            Self::Str { offsets, .. } => {
                let last = offsets.last().copied().unwrap_or(0);
                offsets.push(last);
            }
        }
    }

    /// 追加 `other[idx]`；两者必须是同一变体
    pub fn push_from(&mut self, other: &Buffer, idx: usize) -> Result<()> {
        match (self, other) {
            (Self::U8(d), Self::U8(s))   => d.push(s[idx]),
            (Self::I8(d), Self::I8(s))   => d.push(s[idx]),
            (Self::I16(d), Self::I16(s)) => d.push(s[idx]),
            (Self::I32(d), Self::I32(s)) => d.push(s[idx]),
            (Self::I64(d), Self::I64(s)) => d.push(s[idx]),
            (Self::F32(d), Self::F32(s)) => d.push(s[idx]),
            (Self::F64(d), Self::F64(s)) => d.push(s[idx]),
            (Self::Str { offsets, chars }, Self::Str { offsets: so, chars: sc }) => {
                let (lo, hi) = (so[idx] as usize, so[idx + 1] as usize);
                chars.extend_from_slice(&sc[lo..hi]);
                offsets.push(chars.len() as i32);
            }
            (Self::Empty, Self::Empty) => {}
            _ => return Err(EngineError::Device("buffer variant mismatch".into())),
        }
        Ok(())
    }

    /// 追加整段
    pub fn append(&mut self, other: &Buffer) -> Result<()> {
        match (self, other) {
            (Self::U8(d), Self::U8(s))   => d.extend_from_slice(s),
            (Self::I8(d), Self::I8(s))   => d.extend_from_slice(s),
            (Self::I16(d), Self::I16(s)) => d.extend_from_slice(s),
            (Self::I32(d), Self::I32(s)) => d.extend_from_slice(s),
            (Self::I64(d), Self::I64(s)) => d.extend_from_slice(s),
            (Self::F32(d), Self::F32(s)) => d.extend_from_slice(s),
            (Self::F64(d), Self::F64(s)) => d.extend_from_slice(s),
            (Self::Str { offsets, chars }, Self::Str { offsets: so, chars: sc }) => {
                let base = chars.len() as i32;
                let first = so.first().copied().unwrap_or(0);
                let last = so.last().copied().unwrap_or(0);
                chars.extend_from_slice(&sc[first as usize..last as usize]);
                offsets.extend(so.iter().skip(1).map(|o| o - first + base));
            }
            (Self::Empty, Self::Empty) => {}
            _ => return Err(EngineError::Device("buffer variant mismatch".into())),
        }
        Ok(())
    }
}

// ── NativeType ────────────────────────────────────────────────────────────────

/// 可直接构造定长列的 Rust 原生类型
pub trait NativeType: Copy + Send + Sync + PartialOrd + 'static {
    const DTYPE: DType;
    fn into_buffer(values: Vec<Self>) -> Buffer;
    fn slice(buffer: &Buffer) -> Option<&[Self]>;
}

macro_rules! native_type {
    ($t:ty, $dtype:expr, $variant:ident) => {
        impl NativeType for $t {
            const DTYPE: DType = $dtype;
            fn into_buffer(values: Vec<Self>) -> Buffer { Buffer::$variant(values) }
            fn slice(buffer: &Buffer) -> Option<&[Self]> {
                match buffer { Buffer::$variant(v) => Some(v), _ => None }
            }
        }
    };
}

native_type!(i8,  DType::Int8,    I8);
native_type!(i16, DType::Int16,   I16);
native_type!(i32, DType::Int32,   I32);
native_type!(i64, DType::Int64,   I64);
native_type!(f32, DType::Float32, F32);
native_type!(f64, DType::Float64, F64);

// ── Column ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    dtype:      DType,
    size:       usize,
    data:       Buffer,
    null_mask:  Option<Bitmask>,
    null_count: usize,
    children:   Vec<Column>,
    /// Category 列的字典（code → 字符串）
    dictionary: Option<Arc<Vec<String>>>,
}

impl Column {
    /// 由各部分组装；校验位图长度与子列行数，`null_count` 由位图推导。
    ///
    /// 定长列的 `data` 允许为 `Buffer::Empty`（等价于空数据指针），由各算子的入口校验拒绝。
    pub fn from_parts(
        dtype:     DType,
        size:      usize,
        data:      Buffer,
        null_mask: Option<Bitmask>,
        children:  Vec<Column>,
    ) -> Result<Self> {
        if let Some(mask) = &null_mask {
            if mask.len() != size {
                return Err(EngineError::InvalidArgument(format!(
                    "null mask covers {} rows, column has {size}", mask.len()
                )));
            }
        }
        if !matches!(data, Buffer::Empty) && !dtype.is_nested() && data.len() != size {
            return Err(EngineError::InvalidArgument(format!(
                "{dtype:?} buffer holds {} elements, column has {size}", data.len()
            )));
        }
        match dtype {
            DType::List => {
                let ok = children.len() == 2 && children[0].len() == size + 1;
                if !ok {
                    return Err(EngineError::InvalidArgument(
                        "list column needs [offsets(len + 1), elements] children".into(),
                    ));
                }
            }
            DType::Struct => {
                if let Some(c) = children.iter().find(|c| c.len() != size) {
                    return Err(EngineError::InvalidArgument(format!(
                        "struct field has {} rows, parent has {size}", c.len()
                    )));
                }
            }
            _ => {}
        }
        let null_count = null_mask.as_ref().map_or(0, Bitmask::count_nulls);
        Ok(Self { dtype, size, data, null_mask, null_count, children, dictionary: None })
    }

    /// 定长原生列（不可空）
    pub fn from_vec<T: NativeType>(values: Vec<T>) -> Self {
        let size = values.len();
        Self::plain(T::DTYPE, size, T::into_buffer(values), None)
    }

    /// 带 null 的定长原生列
    pub fn from_options<T: NativeType + Default>(values: Vec<Option<T>>) -> Self {
        let mask = Bitmask::from_bools(values.iter().map(Option::is_some));
        let data: Vec<T> = values.into_iter().map(Option::unwrap_or_default).collect();
        let size = data.len();
        Self::plain(T::DTYPE, size, T::into_buffer(data), Some(mask))
    }

    pub fn from_bools(values: Vec<bool>) -> Self {
        let size = values.len();
        Self::plain(DType::Bool8, size, Buffer::U8(values.into_iter().map(u8::from).collect()), None)
    }

    pub fn timestamps(values: Vec<i64>, unit: TimeUnit) -> Self {
        let size = values.len();
        Self::plain(DType::Timestamp(unit), size, Buffer::I64(values), None)
    }

    pub fn dates(days: Vec<i32>) -> Self {
        let size = days.len();
        Self::plain(DType::Date32, size, Buffer::I32(days), None)
    }

    pub fn decimals(values: Vec<i64>, scale: i32) -> Self {
        let size = values.len();
        Self::plain(DType::Decimal64 { scale }, size, Buffer::I64(values), None)
    }

    pub fn from_strs<S: AsRef<str>>(values: &[S]) -> Self {
        Self::from_opt_strs(&values.iter().map(|s| Some(s.as_ref())).collect::<Vec<_>>())
            .without_nulls()
    }

    pub fn from_opt_strs(values: &[Option<&str>]) -> Self {
        let mut offsets = Vec::with_capacity(values.len() + 1);
        let mut chars   = Vec::new();
        offsets.push(0);
        for v in values {
            if let Some(s) = v {
                chars.extend_from_slice(s.as_bytes());
            }
            offsets.push(chars.len() as i32);
        }
        let mask = Bitmask::from_bools(values.iter().map(Option::is_some));
        Self::plain(DType::String, values.len(), Buffer::Str { offsets, chars }, Some(mask))
    }

    /// 字典编码列：`codes[i]` 索引 `keys`，负 code 视为 null
    pub fn category(codes: Vec<i32>, keys: Vec<String>) -> Self {
        let mask = Bitmask::from_bools(codes.iter().map(|&c| c >= 0));
        let size = codes.len();
        let mut col = Self::plain(DType::Category, size, Buffer::I32(codes), Some(mask)).without_nulls();
        col.dictionary = Some(Arc::new(keys));
        col
    }

    /// 由字符串直接构造 Category 列（字典按首次出现排序）
    pub fn category_from_strs(values: &[&str]) -> Self {
        let mut keys: Vec<String> = Vec::new();
        let codes = values.iter().map(|v| {
            let pos = keys.iter().position(|k| k == v).unwrap_or_else(|| {
                keys.push(v.to_string());
                keys.len() - 1
            });
            pos as i32
        }).collect();
        Self::category(codes, keys)
    }

    /// List 列：`offsets.len() == rows + 1`
    pub fn list(offsets: Vec<i32>, elements: Column, null_mask: Option<Bitmask>) -> Result<Self> {
        let size = offsets.len().saturating_sub(1);
        if offsets.windows(2).any(|w| w[0] > w[1])
            || offsets.last().map_or(false, |&l| l as usize != elements.len())
        {
            return Err(EngineError::InvalidArgument("list offsets must be non-decreasing and end at the child length".into()));
        }
        let offsets = Column::from_vec(offsets);
        Self::from_parts(DType::List, size, Buffer::Empty, null_mask, vec![offsets, elements])
    }

    pub fn structure(fields: Vec<Column>, size: usize, null_mask: Option<Bitmask>) -> Result<Self> {
        Self::from_parts(DType::Struct, size, Buffer::Empty, null_mask, fields)
    }

    /// `size` 行、全部为 null 的列（嵌套列的子列为 0 行）
    pub fn nulls(dtype: DType, size: usize) -> Self {
        let mut data = Buffer::with_capacity(dtype, size);
        for _ in 0..size { data.push_default(); }
        let children = match dtype {
            DType::List => vec![Column::from_vec(vec![0i32; size + 1]), Column::empty(DType::Int32)],
            _ => Vec::new(),
        };
        Self {
            dtype, size, data,
            null_mask: Some(Bitmask::all_null(size)),
            null_count: size,
            children,
            dictionary: None,
        }
    }

    pub fn empty(dtype: DType) -> Self {
        Self::nulls(dtype, 0).without_nulls()
    }

    fn plain(dtype: DType, size: usize, data: Buffer, null_mask: Option<Bitmask>) -> Self {
        let null_count = null_mask.as_ref().map_or(0, Bitmask::count_nulls);
        Self { dtype, size, data, null_mask, null_count, children: Vec::new(), dictionary: None }
    }

    // ── 访问器 ────────────────────────────────────────────────────────────────

    pub fn dtype(&self)      -> DType           { self.dtype }
    pub fn len(&self)        -> usize           { self.size }
    pub fn is_empty(&self)   -> bool            { self.size == 0 }
    pub fn data(&self)       -> &Buffer         { &self.data }
    pub fn null_mask(&self)  -> Option<&Bitmask> { self.null_mask.as_ref() }
    pub fn null_count(&self) -> usize           { self.null_count }
    pub fn has_nulls(&self)  -> bool            { self.null_count > 0 }
    pub fn nullable(&self)   -> bool            { self.null_mask.is_some() }
    pub fn children(&self)   -> &[Column]       { &self.children }
    pub fn dictionary(&self) -> Option<&Arc<Vec<String>>> { self.dictionary.as_ref() }

    /// 非空列却没有数据缓冲区
    pub fn is_missing_data(&self) -> bool {
        self.size > 0 && !self.dtype.is_nested() && matches!(self.data, Buffer::Empty)
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.null_mask.as_ref().map_or(true, |m| m.get(i))
    }

    pub fn as_slice<T: NativeType>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    /// List 列的 offsets
    pub fn list_offsets(&self) -> Option<&[i32]> {
        match self.dtype {
            DType::List => self.children.first().and_then(|c| c.as_slice::<i32>()),
            _ => None,
        }
    }

    pub fn list_elements(&self) -> Option<&Column> {
        match self.dtype {
            DType::List => self.children.get(1),
            _ => None,
        }
    }

    /// 第 `i` 个元素的运行时值
    pub fn value(&self, i: usize) -> Value {
        if !self.is_valid(i) {
            return Value::Null;
        }
        match (&self.data, self.dtype) {
            (Buffer::U8(v), _)                     => Value::Bool(v[i] != 0),
            (Buffer::I8(v), _)                     => Value::Int8(v[i]),
            (Buffer::I16(v), _)                    => Value::Int16(v[i]),
            (Buffer::I32(v), DType::Date32)        => Value::Date32(v[i]),
            (Buffer::I32(v), DType::Category)      => {
                let key = self.dictionary.as_ref().and_then(|d| d.get(v[i] as usize));
                key.map_or(Value::Null, |k| Value::Str(k.clone()))
            }
            (Buffer::I32(v), _)                    => Value::Int32(v[i]),
            (Buffer::I64(v), DType::Timestamp(u))  => Value::Timestamp(v[i], u),
            (Buffer::I64(v), DType::Decimal64 { scale }) => Value::Decimal64(v[i], scale),
            (Buffer::I64(v), _)                    => Value::Int64(v[i]),
            (Buffer::F32(v), _)                    => Value::Float32(v[i]),
            (Buffer::F64(v), _)                    => Value::Float64(v[i]),
            (Buffer::Str { offsets, chars }, _)    => {
                let (lo, hi) = (offsets[i] as usize, offsets[i + 1] as usize);
                Value::Str(String::from_utf8_lossy(&chars[lo..hi]).into_owned())
            }
            (Buffer::Empty, DType::List) => {
                let (Some(offsets), Some(elements)) = (self.list_offsets(), self.list_elements()) else {
                    return Value::Null;
                };
                let (lo, hi) = (offsets[i] as usize, offsets[i + 1] as usize);
                Value::List((lo..hi).map(|j| elements.value(j)).collect())
            }
            (Buffer::Empty, DType::Struct) => {
                Value::Struct(self.children.iter().map(|c| c.value(i)).collect())
            }
            (Buffer::Empty, _) => Value::Null,
        }
    }

    pub fn to_values(&self) -> Vec<Value> {
        (0..self.size).map(|i| self.value(i)).collect()
    }

    // ── 变换 ──────────────────────────────────────────────────────────────────

    /// 去掉全有效的位图（不可空列不携带退化的全 1 位图）
    pub fn without_nulls(mut self) -> Self {
        if self.null_count == 0 {
            self.null_mask = None;
        }
        self
    }

    /// 替换位图并重算 null 数
    pub fn with_null_mask(mut self, mask: Option<Bitmask>) -> Result<Self> {
        if let Some(m) = &mask {
            if m.len() != self.size {
                return Err(EngineError::InvalidArgument("null mask length mismatch".into()));
            }
        }
        self.null_count = mask.as_ref().map_or(0, Bitmask::count_nulls);
        self.null_mask = mask;
        Ok(self)
    }

    pub fn with_dictionary(mut self, keys: Arc<Vec<String>>) -> Self {
        self.dictionary = Some(keys);
        self
    }

    pub fn into_parts(self) -> (DType, usize, Buffer, Option<Bitmask>, Vec<Column>) {
        (self.dtype, self.size, self.data, self.null_mask, self.children)
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// 有序列集合，所有列行数相同
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            if let Some(c) = columns.iter().find(|c| c.len() != first.len()) {
                return Err(EngineError::InvalidArgument(format!(
                    "table columns disagree on row count: {} vs {}", first.len(), c.len()
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn empty() -> Self { Self::default() }

    pub fn num_rows(&self)    -> usize { self.columns.first().map_or(0, Column::len) }
    pub fn num_columns(&self) -> usize { self.columns.len() }
    pub fn column(&self, i: usize) -> &Column { &self.columns[i] }
    pub fn columns(&self)     -> &[Column] { &self.columns }
    pub fn into_columns(self) -> Vec<Column> { self.columns }

    /// 按行取值，便于测试断言
    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value(i)).collect()
    }
}

// ── Category 字典 ─────────────────────────────────────────────────────────────

/// 把两列 Category 的 code 映射到同一字典：`a` 的字典在前，`b` 独有的键按出现顺序追加
pub fn synchronize_dictionaries(a: &Column, b: &Column) -> Result<(Column, Column)> {
    let (Some(da), Some(db)) = (a.dictionary(), b.dictionary()) else {
        return Err(EngineError::InvalidArgument("dictionary sync needs two category columns".into()));
    };
    if Arc::ptr_eq(da, db) || da == db {
        let shared = Arc::clone(da);
        return Ok((a.clone(), b.clone().with_dictionary(shared)));
    }
    let mut keys: Vec<String> = (**da).clone();
    let mut index: AHashMap<&str, i32> = da.iter().enumerate().map(|(i, k)| (k.as_str(), i as i32)).collect();
    let mut remap = Vec::with_capacity(db.len());
    for k in db.iter() {
        let code = match index.get(k.as_str()) {
            Some(&c) => c,
            None => {
                keys.push(k.clone());
                let c = (keys.len() - 1) as i32;
                index.insert(k.as_str(), c);
                c
            }
        };
        remap.push(code);
    }
    let shared = Arc::new(keys);
    let b = recode(b, &remap)?.with_dictionary(Arc::clone(&shared));
    Ok((a.clone().with_dictionary(shared), b))
}

/// 删除未被任何有效行引用的字典键，并重排 code
pub fn compact_dictionary(col: Column) -> Result<Column> {
    let Some(dict) = col.dictionary().cloned() else { return Ok(col) };
    let codes = col.as_slice::<i32>().unwrap_or(&[]);
    let mut used = vec![false; dict.len()];
    for (i, &c) in codes.iter().enumerate() {
        if col.is_valid(i) && c >= 0 && (c as usize) < used.len() {
            used[c as usize] = true;
        }
    }
    if used.iter().all(|&u| u) {
        return Ok(col);
    }
    let mut remap = vec![-1i32; dict.len()];
    let mut keys = Vec::new();
    for (i, k) in dict.iter().enumerate().filter(|(i, _)| used[*i]) {
        remap[i] = keys.len() as i32;
        keys.push(k.clone());
    }
    Ok(recode(&col, &remap)?.with_dictionary(Arc::new(keys)))
}

/// 按 `remap[old] = new` 改写 code；null 行保持原值
fn recode(col: &Column, remap: &[i32]) -> Result<Column> {
    let codes = col.as_slice::<i32>()
        .ok_or_else(|| EngineError::NullData(format!("{:?}", col.dtype())))?;
    let out = codes.iter().enumerate()
        .map(|(i, &c)| match remap.get(c as usize) {
            Some(&n) if c >= 0 => Ok(n),
            _ if !col.is_valid(i) => Ok(c),
            _ => Err(EngineError::InvalidArgument(format!("category code {c} outside its dictionary"))),
        })
        .collect::<Result<Vec<i32>>>()?;
    Column::from_parts(DType::Category, col.len(), Buffer::I32(out), col.null_mask().cloned(), Vec::new())
}
