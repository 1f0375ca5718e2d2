//! ORC 读取编排
//!
//! ```text
//!   OrcReader::read(skip_rows, num_rows, stripes)
//!     │  select_stripes            — 行区间或显式 stripe 列表
//!     ▼
//!   for level in selection.levels:
//!     assemble_stripe × stripes    — 流目录 → 合并读 → 解压
//!     ColumnDesc × (stripe, 列)    — 行区间、行组定位、字典基址
//!     decode_presence ▸ decode_values ▸ finalize
//!     aggregate_child_rows         — LIST 子行数 → 下一层的行参数
//!     ▼
//!   assemble                        — 按 schema 递归重建 LIST / STRUCT
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::column::{Column, Table};
use crate::common::{verify_data, EngineError, Result};
use crate::device::Stream;
use crate::orc::decode::{
    aggregate_child_rows, column_spec, ChildRows, ColumnBuilder, ColumnDesc, DecodedColumn, RowGroupSeek, RowRange,
};
use crate::orc::metadata::{AggregateMetadata, ColumnSelection, SchemaMatching, SchemaNode, SelectedStripe};
use crate::orc::proto::TypeKind;
use crate::orc::source::DataSource;
use crate::orc::stream::{assemble_stripe, index_plan, row_group_positions, StripeData};
use crate::orc::timezone::TimezoneTable;
use crate::types::TimeUnit;

const DEFAULT_TZ_DIR: &str = "/usr/share/zoneinfo";

// ── 配置 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// 要读取的列（顶层名或点分路径）；None 为全部
    pub columns:             Option<Vec<String>>,
    pub timestamp_unit:      TimeUnit,
    /// DATE 输出为毫秒时间戳
    pub use_np_dtypes:       bool,
    pub use_index:           bool,
    pub decimals_as_float64: bool,
    pub schema_matching:     SchemaMatching,
    pub timezone_dir:        Option<PathBuf>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            columns:             None,
            timestamp_unit:      TimeUnit::Nanosecond,
            use_np_dtypes:       false,
            use_index:           true,
            decimals_as_float64: false,
            schema_matching:     SchemaMatching::Permissive,
            timezone_dir:        None,
        }
    }
}

impl ReaderOptions {
    pub fn new() -> Self { Self::default() }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timestamp_unit(mut self, unit: TimeUnit) -> Self {
        self.timestamp_unit = unit;
        self
    }

    pub fn with_np_dtypes(mut self, on: bool) -> Self {
        self.use_np_dtypes = on;
        self
    }

    pub fn with_index(mut self, on: bool) -> Self {
        self.use_index = on;
        self
    }

    pub fn with_decimals_as_float64(mut self, on: bool) -> Self {
        self.decimals_as_float64 = on;
        self
    }

    pub fn with_schema_matching(mut self, matching: SchemaMatching) -> Self {
        self.schema_matching = matching;
        self
    }

    pub fn with_timezone_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.timezone_dir = Some(dir.into());
        self
    }

    fn resolved_timezone_dir(&self) -> PathBuf {
        self.timezone_dir.clone()
            .or_else(|| std::env::var_os("TZDIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TZ_DIR))
    }
}

// ── 结果 ──────────────────────────────────────────────────────────────────────

/// 输出列名树；LIST 的子节点为 "offsets" 与元素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNameInfo {
    pub name:     String,
    pub children: Vec<ColumnNameInfo>,
}

impl ColumnNameInfo {
    fn leaf(name: impl Into<String>) -> Self { Self { name: name.into(), children: Vec::new() } }
}

#[derive(Debug)]
pub struct ReadResult {
    pub table:         Table,
    pub column_names:  Vec<String>,
    pub schema_info:   Vec<ColumnNameInfo>,
    pub user_metadata: BTreeMap<String, String>,
}

// ── Reader ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OrcReader {
    meta:      AggregateMetadata,
    options:   ReaderOptions,
    selection: ColumnSelection,
    names:     Vec<String>,
    stream:    Stream,
}

impl OrcReader {
    /// 解析所有数据源的文件尾并解析选列；未知列名在此报错
    pub fn new(sources: Vec<Arc<dyn DataSource>>, options: ReaderOptions) -> Result<Self> {
        let meta = AggregateMetadata::open(sources, options.schema_matching)?;
        let selection = meta.primary().select_columns(options.columns.as_deref())?;
        let names = match &options.columns {
            Some(cols) => cols.clone(),
            None => selection.roots.iter().map(|&id| meta.primary().field_name(id).to_owned()).collect(),
        };
        info!(
            sources = meta.sources().len(),
            rows = meta.num_rows(),
            stripes = meta.num_stripes(),
            columns = names.len(),
            levels = selection.levels.len(),
            "opened ORC reader"
        );
        Ok(Self { meta, options, selection, names, stream: Stream::default() })
    }

    pub fn with_stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    pub fn metadata(&self) -> &AggregateMetadata { &self.meta }
    pub fn selection(&self) -> &ColumnSelection { &self.selection }

    /// 读取 `[skip_rows, skip_rows + num_rows)`，或显式 stripe 列表（此时忽略行参数）
    pub fn read(&self, skip_rows: usize, num_rows: Option<usize>, stripes: Option<&[Vec<usize>]>) -> Result<ReadResult> {
        let explicit = stripes.is_some_and(|s| !s.is_empty());
        if explicit && (skip_rows != 0 || num_rows.is_some()) {
            warn!(skip_rows, ?num_rows, "explicit stripe selection overrides the row range");
        }
        let stripes = self.meta.select_stripes(stripes, skip_rows, num_rows)?;
        let total: usize = stripes.iter().map(|s| s.num_rows).sum();
        let timezone = self.load_timezone(&stripes)?;
        let seekable = self.seekable_stripes(&stripes);

        let mut decoded: Vec<Vec<DecodedColumn>> = Vec::with_capacity(self.selection.levels.len());
        let mut child_rows: Vec<ChildRows> = Vec::new();
        for (level, columns) in self.selection.levels.iter().enumerate() {
            let row_ranges: Vec<Vec<RowRange>> = if level == 0 {
                let ranges: Vec<RowRange> = stripes.iter()
                    .map(|s| RowRange { skip: s.skip_rows, num: s.num_rows, start: s.start_row })
                    .collect();
                vec![ranges; columns.len()]
            } else {
                verify_data!(
                    child_rows.len() == columns.len(),
                    "level {level} has {} columns but {} child row sets", columns.len(), child_rows.len()
                );
                child_rows.iter().map(|c| (0..stripes.len()).map(|s| c.row_range(s)).collect()).collect()
            };
            let column_rows: Vec<usize> = if level == 0 {
                vec![total; columns.len()]
            } else {
                child_rows.iter().map(|c| c.total).collect()
            };

            let level_out = self.decode_level(level, &stripes, &seekable, &row_ranges, &column_rows, timezone.as_ref())?;
            self.stream.synchronize()?;
            child_rows = aggregate_child_rows(&level_out, stripes.len())?;
            decoded.push(level_out);
        }

        let (columns, schema_info) = self.assemble(decoded)?;
        let table = if columns.is_empty() { Table::empty() } else { Table::new(columns)? };
        info!(rows = table.num_rows(), columns = table.num_columns(), stripes = stripes.len(), "read ORC");
        Ok(ReadResult {
            table,
            column_names: self.names.clone(),
            schema_info,
            user_metadata: self.meta.user_metadata(),
        })
    }

    /// 只有选中 TIMESTAMP 列时才加载首个 stripe 记录的写入时区
    fn load_timezone(&self, stripes: &[SelectedStripe]) -> Result<Option<TimezoneTable>> {
        let primary = self.meta.primary();
        let wants = self.selection.levels.iter().flatten()
            .any(|c| matches!(primary.node(c.id), SchemaNode::Primitive { kind: TypeKind::Timestamp, .. }));
        let Some(first) = stripes.first().filter(|_| wants) else { return Ok(None) };
        let name = first.footer.writer_timezone();
        TimezoneTable::load(name, &self.options.resolved_timezone_dir())
    }

    /// 每个 stripe 是否按行索引定位
    fn seekable_stripes(&self, stripes: &[SelectedStripe]) -> Vec<bool> {
        let primary = self.meta.primary();
        let nested = self.selection.has_nested()
            || self.selection.levels.first().is_some_and(|cols| cols.iter().any(|c| {
                primary.node(c.id).is_nested() || !primary.struct_ancestors(c.id).is_empty()
            }));
        if !self.options.use_index || nested {
            return vec![false; stripes.len()];
        }
        stripes.iter()
            .map(|s| {
                let stride = self.meta.sources()[s.source_idx].row_index_stride();
                stride > 0 && stride.is_power_of_two() && s.skip_rows >= stride
            })
            .collect()
    }

    fn decode_level(
        &self,
        level:       usize,
        stripes:     &[SelectedStripe],
        seekable:    &[bool],
        row_ranges:  &[Vec<RowRange>],
        column_rows: &[usize],
        timezone:    Option<&TimezoneTable>,
    ) -> Result<Vec<DecodedColumn>> {
        let columns = &self.selection.levels[level];
        let primary = self.meta.primary();
        let specs = columns.iter()
            .map(|c| column_spec(primary, c, &self.options))
            .collect::<Result<Vec<_>>>()?;

        let data: Vec<StripeData> = stripes.par_iter().zip(seekable.par_iter())
            .map(|(s, &seek)| assemble_stripe(&self.meta.sources()[s.source_idx], s, columns, seek, &self.stream))
            .collect::<Result<_>>()?;

        // 行组定位：每个 (stripe, 列) 至多一个
        let mut seeks: Vec<Vec<Option<RowGroupSeek>>> = Vec::with_capacity(stripes.len());
        for ((s, stripe), &seek) in stripes.iter().zip(&data).zip(seekable) {
            let stride = self.meta.sources()[s.source_idx].row_index_stride();
            let per_col = (0..columns.len())
                .map(|c| if seek { row_group_seek(stripe, c, specs[c].kind, s.skip_rows, stride) } else { Ok(None) })
                .collect::<Result<Vec<_>>>()?;
            seeks.push(per_col);
        }

        let mut descs: Vec<Vec<ColumnDesc<'_>>> = vec![Vec::with_capacity(stripes.len()); columns.len()];
        let mut nullable = vec![false; columns.len()];
        for (c, col_descs) in descs.iter_mut().enumerate() {
            let mut dict_base = 0usize;
            for (si, stripe) in data.iter().enumerate() {
                let streams = &stripe.columns[c];
                nullable[c] |= streams.has_present()
                    || streams.parent_present.iter().any(|r| !r.is_empty());
                col_descs.push(ColumnDesc {
                    stripe,
                    col: c,
                    rows: row_ranges[c][si],
                    seek: seeks[si][c].as_ref(),
                    dict_base,
                    timezone,
                });
                if streams.encoding.is_dictionary() {
                    dict_base += streams.dict_size;
                }
            }
        }

        let mut builders: Vec<ColumnBuilder> = specs.into_iter().zip(column_rows).zip(&nullable)
            .map(|((spec, &rows), &n)| ColumnBuilder::new(spec, rows, n))
            .collect();
        self.stream.launch("decode_nulls_and_dictionaries", || {
            builders.par_iter_mut().zip(descs.par_iter()).try_for_each(|(b, d)| b.decode_presence(d))
        })?;
        self.stream.launch("decode_values", || {
            builders.par_iter_mut().zip(descs.par_iter()).try_for_each(|(b, d)| b.decode_values(d))
        })?;
        let out = builders.into_iter().map(ColumnBuilder::finalize).collect::<Result<Vec<_>>>()?;
        debug!(
            level,
            columns = out.len(),
            rows = column_rows.iter().sum::<usize>(),
            nulls = out.iter().filter_map(|c| c.null_mask.as_ref()).map(|m| m.count_nulls()).sum::<usize>(),
            "decoded nesting level"
        );
        Ok(out)
    }

    // ── 输出组装 ──────────────────────────────────────────────────────────────

    fn assemble(&self, decoded: Vec<Vec<DecodedColumn>>) -> Result<(Vec<Column>, Vec<ColumnNameInfo>)> {
        let mut slots: HashMap<usize, DecodedColumn> = decoded.into_iter().flatten()
            .map(|c| (c.spec.id, c))
            .collect();
        let mut columns = Vec::with_capacity(self.selection.roots.len());
        let mut infos = Vec::with_capacity(self.selection.roots.len());
        for (&id, name) in self.selection.roots.iter().zip(&self.names) {
            let (col, mut info) = self.assemble_column(id, &mut slots)?;
            info.name = name.clone();
            columns.push(col);
            infos.push(info);
        }
        Ok((columns, infos))
    }

    fn assemble_column(&self, id: usize, slots: &mut HashMap<usize, DecodedColumn>) -> Result<(Column, ColumnNameInfo)> {
        let meta = self.meta.primary();
        let dc = slots.remove(&id)
            .ok_or_else(|| EngineError::Decode(format!("column {id} was not decoded")))?;
        let mut info = ColumnNameInfo::leaf(meta.field_name(id));
        let column = match meta.node(id) {
            SchemaNode::List { element } => {
                let (child, child_info) = self.assemble_column(*element, slots)?;
                info.children = vec![ColumnNameInfo::leaf("offsets"), child_info];
                let offsets = dc.list_offsets
                    .ok_or_else(|| EngineError::Decode(format!("list column {id} has no offsets")))?;
                Column::list(offsets, child, dc.null_mask)?
            }
            SchemaNode::Struct { fields, .. } => {
                let mut children = Vec::with_capacity(fields.len());
                for &f in fields {
                    let (child, child_info) = self.assemble_column(f, slots)?;
                    children.push(child);
                    info.children.push(child_info);
                }
                Column::structure(children, dc.rows, dc.null_mask)?
            }
            _ => Column::from_parts(dc.spec.dtype, dc.rows, dc.data, dc.null_mask, Vec::new())?,
        };
        Ok((column, info))
    }
}

/// 按 stripe 内跳过的行数定位到行组起点
fn row_group_seek(
    stripe: &StripeData,
    col:    usize,
    kind:   TypeKind,
    skip:   usize,
    stride: usize,
) -> Result<Option<RowGroupSeek>> {
    let Some(index) = stripe.row_index.get(col).and_then(Option::as_ref) else { return Ok(None) };
    let group = skip / stride;
    let Some(entry) = index.entry.get(group) else { return Ok(None) };
    let streams = &stripe.columns[col];
    let plan = index_plan(kind, streams.encoding.is_dictionary());
    let positions = row_group_positions(entry, streams.has_present(), &plan, stripe.compressed)?;
    Ok(Some(RowGroupSeek { positions, residual: skip % stride }))
}
