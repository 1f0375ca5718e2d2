//! ORC 元数据：文件尾解析、schema 树、按嵌套层级选列、stripe 选择
//!
//! 文件尾布局：
//! ```text
//! ┌──────────┬─────────────┬──────────────┬────────────┬───────┐
//! │ stripes… │ metadata    │ Footer       │ PostScript │ psLen │
//! │          │ (统计，跳过) │ (按文件编解码) │ (不压缩)    │ 1B    │
//! └──────────┴─────────────┴──────────────┴────────────┴───────┘
//! ```
//!
//! 选列结果按层级组织：STRUCT 的字段与其父节点同层，LIST 的元素子树进入下一层。
//! ```text
//! a: int, b: list<struct<x: int, y: list<int>>>
//!   level 0: [a(0), b(3)]
//!   level 1: [struct(0), x(0), y(1)]
//!   level 2: [int(0)]
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use prost::Message;
use tracing::{debug, info};

use crate::common::{verify_data, EngineError, Result};
use crate::compression::{decompress_host, Codec, CompressionInfo};
use crate::orc::proto::{CompressionKind, Footer, PostScript, StripeFooter, StripeInformation, TypeKind};
use crate::orc::source::DataSource;

/// 首次从文件尾读取的字节数；PostScript + Footer 更大时再补读
const TAIL_READ_SIZE: usize = 16 * 1024;
const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;
const MAGIC: &str = "ORC";

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Primitive { kind: TypeKind, precision: u32, scale: u32 },
    List { element: usize },
    Struct { fields: Vec<usize>, names: Vec<String> },
    /// MAP / UNION：能解析，但选中即报错
    Unsupported { kind: TypeKind },
}

impl SchemaNode {
    pub fn is_nested(&self) -> bool { matches!(self, Self::List { .. } | Self::Struct { .. }) }

    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Primitive { kind: a, .. }, Self::Primitive { kind: b, .. }) => a == b,
            (Self::List { .. }, Self::List { .. }) => true,
            (Self::Struct { names: a, .. }, Self::Struct { names: b, .. }) => a == b,
            (Self::Unsupported { kind: a }, Self::Unsupported { kind: b }) => a == b,
            _ => false,
        }
    }
}

/// 选中的一列：schema id + 下一层中属于它的条目数（仅 LIST 非零）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedColumn {
    pub id:           usize,
    pub num_children: usize,
}

pub type LevelSelection = Vec<Vec<SelectedColumn>>;

/// 选列结果：输出顺序的根列 + 按层级展开的列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSelection {
    pub roots:  Vec<usize>,
    pub levels: LevelSelection,
}

impl ColumnSelection {
    pub fn has_nested(&self) -> bool { self.levels.len() > 1 }
}

// ── 单个数据源 ────────────────────────────────────────────────────────────────

pub struct OrcMetadata {
    source:         Arc<dyn DataSource>,
    postscript:     PostScript,
    footer:         Footer,
    compression:    CompressionInfo,
    schema:         Vec<SchemaNode>,
    parents:        Vec<Option<usize>>,
    /// 从根经 STRUCT 可达的列的点分路径（跨 LIST 的为 None）
    paths:          Vec<Option<String>>,
    field_names:    Vec<String>,
    stripe_footers: Vec<OnceLock<Arc<StripeFooter>>>,
}

impl std::fmt::Debug for OrcMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrcMetadata")
            .field("num_rows", &self.num_rows())
            .field("num_columns", &self.num_columns())
            .field("num_stripes", &self.num_stripes())
            .field("compression", &self.compression)
            .finish()
    }
}

impl OrcMetadata {
    pub fn open(source: Arc<dyn DataSource>) -> Result<Self> {
        let size = source.size() as usize;
        verify_data!(size > MAGIC.len() + 1, "source of {size} bytes is too small for ORC");

        let tail_len = size.min(TAIL_READ_SIZE);
        let mut tail = source.host_read((size - tail_len) as u64, tail_len)?;
        let ps_len = *tail.last().ok_or_else(|| EngineError::Decode("empty tail".into()))? as usize;
        verify_data!(ps_len + 1 <= tail_len, "postscript length {ps_len} exceeds the file");
        let postscript = PostScript::decode(&tail[tail_len - 1 - ps_len..tail_len - 1])?;
        if let Some(magic) = postscript.magic.as_deref() {
            verify_data!(magic == MAGIC, "bad postscript magic {magic:?}");
        }

        let kind = CompressionKind::try_from(postscript.compression.unwrap_or_default())
            .map_err(|_| EngineError::Unsupported("unknown compression kind".into()))?;
        let block_size = match postscript.compression_block_size() as usize {
            0 => DEFAULT_BLOCK_SIZE,
            n => n,
        };
        let compression = CompressionInfo { codec: Codec::try_from(kind)?, block_size };

        let footer_len = postscript.footer_length() as usize;
        verify_data!(footer_len + ps_len + 1 <= size, "footer length {footer_len} exceeds the file");
        let footer_start = size - 1 - ps_len - footer_len;
        let raw_footer = if footer_len + ps_len + 1 <= tail_len {
            let off = tail_len - 1 - ps_len - footer_len;
            tail.drain(..off);
            tail.truncate(footer_len);
            tail
        } else {
            source.host_read(footer_start as u64, footer_len)?
        };
        let footer = Footer::decode(decompress_host(&raw_footer, &compression)?.as_slice())?;

        let (schema, parents) = build_schema(&footer)?;
        let (paths, field_names) = build_names(&schema);
        let stripe_footers = (0..footer.stripes.len()).map(|_| OnceLock::new()).collect();
        let meta = Self { source, postscript, footer, compression, schema, parents, paths, field_names, stripe_footers };
        info!(
            rows = meta.num_rows(),
            columns = meta.num_columns(),
            stripes = meta.num_stripes(),
            codec = ?meta.compression.codec,
            "parsed ORC tail"
        );
        Ok(meta)
    }

    pub fn source(&self)          -> &Arc<dyn DataSource> { &self.source }
    pub fn num_rows(&self)        -> usize { self.footer.number_of_rows() as usize }
    pub fn num_columns(&self)     -> usize { self.footer.types.len() }
    pub fn num_stripes(&self)     -> usize { self.footer.stripes.len() }
    pub fn row_index_stride(&self) -> usize { self.footer.row_index_stride() as usize }
    pub fn compression(&self)     -> &CompressionInfo { &self.compression }
    pub fn stripes(&self)         -> &[StripeInformation] { &self.footer.stripes }
    pub fn schema(&self)          -> &[SchemaNode] { &self.schema }
    pub fn node(&self, id: usize) -> &SchemaNode { &self.schema[id] }
    pub fn parent(&self, id: usize) -> Option<usize> { self.parents[id] }
    pub fn writer_version(&self)  -> u32 { self.postscript.writer_version() }

    /// 父 STRUCT 中的字段名；LIST 元素为 "element"
    pub fn field_name(&self, id: usize) -> &str { &self.field_names[id] }

    /// 根的直接字段
    pub fn top_level_columns(&self) -> &[usize] {
        match self.schema.first() {
            Some(SchemaNode::Struct { fields, .. }) => fields,
            _ => &[],
        }
    }

    /// 按名字（顶层字段名或点分路径）查找列
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.paths.iter().position(|p| p.as_deref() == Some(name))
    }

    pub fn user_metadata(&self) -> BTreeMap<String, String> {
        self.footer.metadata.iter()
            .map(|m| (m.name().to_owned(), String::from_utf8_lossy(m.value()).into_owned()))
            .collect()
    }

    /// 读取并解析 stripe footer；首次选中时才解压，结果缓存
    pub fn stripe_footer(&self, stripe: usize) -> Result<Arc<StripeFooter>> {
        if let Some(f) = self.stripe_footers[stripe].get() {
            return Ok(Arc::clone(f));
        }
        let info = &self.footer.stripes[stripe];
        let offset = info.start() + info.index_len() + info.data_len();
        let raw = self.source.host_read(offset, info.footer_len() as usize)?;
        let footer = Arc::new(StripeFooter::decode(decompress_host(&raw, &self.compression)?.as_slice())?);
        let _ = self.stripe_footers[stripe].set(Arc::clone(&footer));
        Ok(footer)
    }

    /// 深度优先选列，按嵌套层级分组
    pub fn select_columns(&self, names: Option<&[String]>) -> Result<ColumnSelection> {
        let roots: Vec<usize> = match names {
            None => self.top_level_columns().to_vec(),
            Some(names) => names.iter()
                .map(|n| self.find_column(n).ok_or_else(|| EngineError::ColumnNotFound(n.clone())))
                .collect::<Result<_>>()?,
        };
        for (i, id) in roots.iter().enumerate() {
            if roots[..i].contains(id) {
                return Err(EngineError::InvalidArgument(format!("column {} selected twice", self.field_names[*id])));
            }
        }
        let mut levels = LevelSelection::new();
        for &id in &roots {
            self.add_column(&mut levels, id, 0)?;
        }
        debug!(roots = roots.len(), levels = levels.len(), "column selection");
        Ok(ColumnSelection { roots, levels })
    }

    fn add_column(&self, selection: &mut LevelSelection, id: usize, level: usize) -> Result<()> {
        if selection.len() <= level {
            selection.resize_with(level + 1, Vec::new);
        }
        selection[level].push(SelectedColumn { id, num_children: 0 });
        let pos = selection[level].len() - 1;
        match &self.schema[id] {
            SchemaNode::Primitive { .. } => {}
            SchemaNode::List { element } => {
                let before = selection.get(level + 1).map_or(0, Vec::len);
                self.add_column(selection, *element, level + 1)?;
                selection[level][pos].num_children = selection[level + 1].len() - before;
            }
            SchemaNode::Struct { fields, .. } => {
                for &f in fields {
                    self.add_column(selection, f, level)?;
                }
            }
            SchemaNode::Unsupported { kind } => {
                return Err(EngineError::Unsupported(format!("ORC {kind:?} column {}", self.field_names[id])));
            }
        }
        Ok(())
    }

    /// `id` 在同一层内的 STRUCT 祖先，最外层在前
    pub fn struct_ancestors(&self, id: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cur = self.parents[id];
        while let Some(p) = cur {
            if p == 0 || !matches!(self.schema[p], SchemaNode::Struct { .. }) {
                break;
            }
            chain.push(p);
            cur = self.parents[p];
        }
        chain.reverse();
        chain
    }
}

fn build_schema(footer: &Footer) -> Result<(Vec<SchemaNode>, Vec<Option<usize>>)> {
    let n = footer.types.len();
    verify_data!(n > 0, "ORC footer has no types");
    let mut parents = vec![None; n];
    let mut schema = Vec::with_capacity(n);
    for (id, t) in footer.types.iter().enumerate() {
        let kind = TypeKind::try_from(t.kind.unwrap_or_default())
            .map_err(|_| EngineError::Unsupported(format!("unknown ORC type kind {:?} for column {id}", t.kind)))?;
        for &sub in &t.subtypes {
            let sub = sub as usize;
            verify_data!(sub > id && sub < n, "column {id} has invalid subtype {sub}");
            parents[sub] = Some(id);
        }
        let node = match kind {
            TypeKind::List => {
                verify_data!(t.subtypes.len() == 1, "list column {id} needs exactly one subtype");
                SchemaNode::List { element: t.subtypes[0] as usize }
            }
            TypeKind::Struct => {
                verify_data!(
                    t.field_names.len() == t.subtypes.len(),
                    "struct column {id} has {} names for {} fields", t.field_names.len(), t.subtypes.len()
                );
                SchemaNode::Struct {
                    fields: t.subtypes.iter().map(|&s| s as usize).collect(),
                    names:  t.field_names.clone(),
                }
            }
            TypeKind::Map | TypeKind::Union => SchemaNode::Unsupported { kind },
            _ => SchemaNode::Primitive { kind, precision: t.precision(), scale: t.scale() },
        };
        schema.push(node);
    }
    verify_data!(matches!(schema[0], SchemaNode::Struct { .. }), "ORC root type must be a struct");
    Ok((schema, parents))
}

fn build_names(schema: &[SchemaNode]) -> (Vec<Option<String>>, Vec<String>) {
    let mut paths = vec![None; schema.len()];
    let mut names = vec![String::new(); schema.len()];
    for (id, node) in schema.iter().enumerate() {
        match node {
            SchemaNode::Struct { fields, names: field_names } => {
                for (&f, name) in fields.iter().zip(field_names) {
                    names[f] = name.clone();
                    paths[f] = match (id, &paths[id]) {
                        (0, _) => Some(name.clone()),
                        (_, Some(parent)) => Some(format!("{parent}.{name}")),
                        (_, None) => None,
                    };
                }
            }
            SchemaNode::List { element } => names[*element] = "element".to_owned(),
            _ => {}
        }
    }
    (paths, names)
}

// ── 多数据源聚合 ──────────────────────────────────────────────────────────────

/// 多数据源之间的 schema 一致性要求；列数总是强制一致
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaMatching {
    #[default]
    Permissive,
    Strict,
}

/// 选中的一个 stripe 及其要解码的行区间
#[derive(Debug, Clone)]
pub struct SelectedStripe {
    pub source_idx: usize,
    pub stripe_idx: usize,
    pub info:       StripeInformation,
    pub footer:     Arc<StripeFooter>,
    /// stripe 内跳过的行数
    pub skip_rows:  usize,
    /// 跳过之后要输出的行数
    pub num_rows:   usize,
    /// 在输出中的起始行
    pub start_row:  usize,
}

#[derive(Debug)]
pub struct AggregateMetadata {
    sources: Vec<OrcMetadata>,
}

impl AggregateMetadata {
    pub fn open(sources: Vec<Arc<dyn DataSource>>, matching: SchemaMatching) -> Result<Self> {
        if sources.is_empty() {
            return Err(EngineError::InvalidArgument("no ORC sources".into()));
        }
        let sources: Vec<OrcMetadata> = sources.into_iter().map(OrcMetadata::open).collect::<Result<_>>()?;
        let first = &sources[0];
        for (i, m) in sources.iter().enumerate().skip(1) {
            if m.num_columns() != first.num_columns() {
                return Err(EngineError::SchemaMismatch(format!(
                    "source {i} has {} columns, source 0 has {}", m.num_columns(), first.num_columns()
                )));
            }
            if matching == SchemaMatching::Strict {
                let same = m.schema.iter().zip(&first.schema).all(|(a, b)| a.same_shape(b));
                if !same {
                    return Err(EngineError::SchemaMismatch(format!("source {i} schema differs from source 0")));
                }
            }
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[OrcMetadata] { &self.sources }
    pub fn primary(&self) -> &OrcMetadata { &self.sources[0] }
    pub fn num_rows(&self) -> usize { self.sources.iter().map(OrcMetadata::num_rows).sum() }
    pub fn num_stripes(&self) -> usize { self.sources.iter().map(OrcMetadata::num_stripes).sum() }

    /// 合并所有数据源的用户元数据（前面的数据源优先）
    pub fn user_metadata(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for m in self.sources.iter().rev() {
            out.extend(m.user_metadata());
        }
        out
    }

    /// 按显式 stripe 列表或 [skip_rows, skip_rows + num_rows) 选择 stripe
    pub fn select_stripes(
        &self,
        stripes:   Option<&[Vec<usize>]>,
        skip_rows: usize,
        num_rows:  Option<usize>,
    ) -> Result<Vec<SelectedStripe>> {
        let mut selected = Vec::new();
        if let Some(stripes) = stripes.filter(|s| !s.is_empty()) {
            if stripes.len() > self.sources.len() {
                return Err(EngineError::InvalidArgument(format!(
                    "stripe lists for {} sources, only {} sources given", stripes.len(), self.sources.len()
                )));
            }
            let mut start_row = 0usize;
            for (source_idx, list) in stripes.iter().enumerate() {
                let meta = &self.sources[source_idx];
                for &stripe_idx in list {
                    if stripe_idx >= meta.num_stripes() {
                        return Err(EngineError::InvalidStripe {
                            source_idx, index: stripe_idx, num_stripes: meta.num_stripes(),
                        });
                    }
                    let info = meta.stripes()[stripe_idx].clone();
                    let rows = info.num_rows() as usize;
                    selected.push(SelectedStripe {
                        source_idx, stripe_idx, footer: meta.stripe_footer(stripe_idx)?, info,
                        skip_rows: 0, num_rows: rows, start_row,
                    });
                    start_row += rows;
                }
            }
            debug!(stripes = selected.len(), rows = start_row, "explicit stripe selection");
            return Ok(selected);
        }

        let total = self.num_rows();
        if skip_rows > total {
            return Err(EngineError::InvalidArgument(format!("skip_rows {skip_rows} beyond {total} rows")));
        }
        let wanted = num_rows.map_or(total - skip_rows, |n| n.min(total - skip_rows));
        let end = skip_rows + wanted;
        let mut row = 0usize;
        for (source_idx, meta) in self.sources.iter().enumerate() {
            for (stripe_idx, info) in meta.stripes().iter().enumerate() {
                let rows = info.num_rows() as usize;
                let (first, last) = (row, row + rows);
                row = last;
                if last <= skip_rows || rows == 0 {
                    continue;
                }
                if first >= end {
                    break;
                }
                let skip = skip_rows.saturating_sub(first);
                let take = last.min(end) - first - skip;
                selected.push(SelectedStripe {
                    source_idx, stripe_idx, info: info.clone(), footer: meta.stripe_footer(stripe_idx)?,
                    skip_rows: skip, num_rows: take, start_row: first + skip - skip_rows,
                });
            }
        }
        debug!(stripes = selected.len(), skip_rows, rows = wanted, "row-range stripe selection");
        Ok(selected)
    }
}
