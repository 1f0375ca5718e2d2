//! Gather：按索引序列从源列复制行
//!
//! 越界策略：
//! - `Nullify`   — 越界索引（含 `NOT_MATCHED`）产生 null 行
//! - `Ignore`    — 越界索引保持目标行不变（两遍 gather 的第二遍）
//! - `Unchecked` — 调用方保证索引在范围内；违反时报设备错误

use std::sync::Arc;

use tracing::trace;

use crate::bitmask::Bitmask;
use crate::column::{Buffer, Column, Table};
use crate::common::{EngineError, Result, SizeType};
use crate::device::Stream;
use crate::types::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfBounds {
    Nullify,
    Ignore,
    Unchecked,
}

/// 一行的来源：`None` 为 null 行
type RowRef<'a> = Option<(&'a Column, usize)>;

fn resolve<'a>(source: &'a Column, idx: SizeType, policy: OutOfBounds) -> Result<RowRef<'a>> {
    if idx >= 0 && (idx as usize) < source.len() {
        return Ok(Some((source, idx as usize)));
    }
    match policy {
        OutOfBounds::Unchecked => Err(EngineError::Device(format!(
            "gather index {idx} out of bounds for {} rows", source.len()
        ))),
        _ => Ok(None),
    }
}

/// 对整张表 gather
pub fn gather(source: &Table, map: &[SizeType], policy: OutOfBounds, stream: &Stream) -> Result<Table> {
    let columns = source.columns().iter()
        .map(|c| gather_column(c, map, policy, stream))
        .collect::<Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Ok(Table::empty());
    }
    Table::new(columns)
}

/// 对单列 gather；无目标列时 `Ignore` 与 `Nullify` 等价
pub fn gather_column(source: &Column, map: &[SizeType], policy: OutOfBounds, stream: &Stream) -> Result<Column> {
    if source.is_missing_data() {
        return Err(EngineError::NullData(format!("{:?}", source.dtype())));
    }
    stream.launch("gather", || {
        let rows = map.iter()
            .map(|&i| resolve(source, i, policy))
            .collect::<Result<Vec<_>>>()?;
        assemble(source, &rows)
    })
}

/// 把 `source[map[r]]` 写入 `dest` 的第 r 行；越界的 r 保持 `dest` 原值
pub fn gather_into(source: &Column, map: &[SizeType], dest: &Column, stream: &Stream) -> Result<Column> {
    if dest.len() != map.len() {
        return Err(EngineError::InvalidArgument(format!(
            "gather map has {} rows, destination {}", map.len(), dest.len()
        )));
    }
    if source.dtype() != dest.dtype() {
        return Err(EngineError::DtypeMismatch { left: source.dtype(), right: dest.dtype() });
    }
    stream.launch("gather_into", || {
        let rows: Vec<RowRef> = map.iter().enumerate()
            .map(|(r, &i)| {
                let hit = i >= 0 && (i as usize) < source.len();
                let (col, row) = if hit { (source, i as usize) } else { (dest, r) };
                col.is_valid(row).then_some((col, row))
            })
            .collect();
        let out = assemble(dest, &rows)?;
        trace!(rows = map.len(), "gather_into");
        Ok(out)
    })
}

/// 由行来源序列组装一列；所有来源与 `template` 同类型
pub(crate) fn assemble(template: &Column, rows: &[RowRef]) -> Result<Column> {
    let dtype = template.dtype();
    let mut mask = Bitmask::with_capacity(rows.len());
    let mut any_null = template.nullable();
    for r in rows {
        let valid = r.map_or(false, |(c, i)| c.is_valid(i));
        any_null |= !valid;
        mask.push(valid);
    }

    let column = match dtype {
        DType::List => {
            let elements = template.list_elements()
                .ok_or_else(|| EngineError::Device("list column without elements".into()))?;
            let mut offsets = Vec::with_capacity(rows.len() + 1);
            let mut child_rows: Vec<RowRef> = Vec::new();
            offsets.push(0i32);
            for r in rows {
                if let Some((c, i)) = r.filter(|(c, i)| c.is_valid(*i)) {
                    let (o, e) = match (c.list_offsets(), c.list_elements()) {
                        (Some(o), Some(e)) => (o, e),
                        _ => return Err(EngineError::Device("list column without children".into())),
                    };
                    for j in o[i] as usize..o[i + 1] as usize {
                        child_rows.push(e.is_valid(j).then_some((e, j)));
                    }
                }
                offsets.push(child_rows.len() as i32);
            }
            let child = assemble(elements, &child_rows)?;
            Column::list(offsets, child, any_null.then_some(mask))?
        }
        DType::Struct => {
            let fields = (0..template.children().len())
                .map(|k| {
                    let field_rows: Vec<RowRef> = rows.iter()
                        .map(|r| {
                            r.filter(|(c, i)| c.is_valid(*i))
                                .map(|(c, i)| (&c.children()[k], i))
                                .filter(|(f, i)| f.is_valid(*i))
                        })
                        .collect();
                    assemble(&template.children()[k], &field_rows)
                })
                .collect::<Result<Vec<_>>>()?;
            Column::structure(fields, rows.len(), any_null.then_some(mask))?
        }
        _ => {
            let mut data = Buffer::with_capacity(dtype, rows.len());
            for r in rows {
                match r {
                    Some((c, i)) => data.push_from(c.data(), *i)?,
                    None         => data.push_default(),
                }
            }
            let mut col = Column::from_parts(dtype, rows.len(), data, any_null.then_some(mask), Vec::new())?;
            if let Some(dict) = template.dictionary() {
                col = col.with_dictionary(Arc::clone(dict));
            }
            col
        }
    };
    Ok(column)
}
