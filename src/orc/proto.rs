//! ORC 文件尾与 stripe footer 的 protobuf 消息（proto2，由 prost 解码）

// ── 枚举 ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CompressionKind {
    None   = 0,
    Zlib   = 1,
    Snappy = 2,
    Lzo    = 3,
    Lz4    = 4,
    Zstd   = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeKind {
    Boolean          = 0,
    Byte             = 1,
    Short            = 2,
    Int              = 3,
    Long             = 4,
    Float            = 5,
    Double           = 6,
    String           = 7,
    Binary           = 8,
    Timestamp        = 9,
    List             = 10,
    Map              = 11,
    Struct           = 12,
    Union            = 13,
    Decimal          = 14,
    Date             = 15,
    Varchar          = 16,
    Char             = 17,
    TimestampInstant = 18,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StreamKind {
    Present         = 0,
    Data            = 1,
    Length          = 2,
    DictionaryData  = 3,
    DictionaryCount = 4,
    Secondary       = 5,
    RowIndex        = 6,
    BloomFilter     = 7,
    BloomFilterUtf8 = 8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EncodingKind {
    Direct       = 0,
    Dictionary   = 1,
    DirectV2     = 2,
    DictionaryV2 = 3,
}

// ── 文件尾 ────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PostScript {
    #[prost(uint64, optional, tag = "1")]
    pub footer_length: Option<u64>,
    #[prost(enumeration = "CompressionKind", optional, tag = "2")]
    pub compression: Option<i32>,
    #[prost(uint64, optional, tag = "3")]
    pub compression_block_size: Option<u64>,
    #[prost(uint32, repeated, packed = "true", tag = "4")]
    pub version: Vec<u32>,
    #[prost(uint64, optional, tag = "5")]
    pub metadata_length: Option<u64>,
    #[prost(uint32, optional, tag = "6")]
    pub writer_version: Option<u32>,
    #[prost(string, optional, tag = "8000")]
    pub magic: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StripeInformation {
    #[prost(uint64, optional, tag = "1")]
    pub offset: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub index_length: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub data_length: Option<u64>,
    #[prost(uint64, optional, tag = "4")]
    pub footer_length: Option<u64>,
    #[prost(uint64, optional, tag = "5")]
    pub number_of_rows: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Type {
    #[prost(enumeration = "TypeKind", optional, tag = "1")]
    pub kind: Option<i32>,
    #[prost(uint32, repeated, packed = "true", tag = "2")]
    pub subtypes: Vec<u32>,
    #[prost(string, repeated, tag = "3")]
    pub field_names: Vec<String>,
    #[prost(uint32, optional, tag = "4")]
    pub maximum_length: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub precision: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub scale: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserMetadataItem {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Footer {
    #[prost(uint64, optional, tag = "1")]
    pub header_length: Option<u64>,
    #[prost(uint64, optional, tag = "2")]
    pub content_length: Option<u64>,
    #[prost(message, repeated, tag = "3")]
    pub stripes: Vec<StripeInformation>,
    #[prost(message, repeated, tag = "4")]
    pub types: Vec<Type>,
    #[prost(message, repeated, tag = "5")]
    pub metadata: Vec<UserMetadataItem>,
    #[prost(uint64, optional, tag = "6")]
    pub number_of_rows: Option<u64>,
    #[prost(uint32, optional, tag = "8")]
    pub row_index_stride: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub writer: Option<u32>,
}

// ── Stripe footer ─────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stream {
    #[prost(enumeration = "StreamKind", optional, tag = "1")]
    pub kind: Option<i32>,
    #[prost(uint32, optional, tag = "2")]
    pub column: Option<u32>,
    #[prost(uint64, optional, tag = "3")]
    pub length: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnEncoding {
    #[prost(enumeration = "EncodingKind", optional, tag = "1")]
    pub kind: Option<i32>,
    #[prost(uint32, optional, tag = "2")]
    pub dictionary_size: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StripeFooter {
    #[prost(message, repeated, tag = "1")]
    pub streams: Vec<Stream>,
    #[prost(message, repeated, tag = "2")]
    pub columns: Vec<ColumnEncoding>,
    #[prost(string, optional, tag = "3")]
    pub writer_timezone: Option<String>,
}

// ── Row index ─────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RowIndexEntry {
    #[prost(uint64, repeated, packed = "true", tag = "1")]
    pub positions: Vec<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RowIndex {
    #[prost(message, repeated, tag = "1")]
    pub entry: Vec<RowIndexEntry>,
}

// ── 便捷访问 ──────────────────────────────────────────────────────────────────

impl Stream {
    /// 未知的流类型返回 None（按字节跳过）
    pub fn stream_kind(&self) -> Option<StreamKind> {
        StreamKind::try_from(self.kind.unwrap_or_default()).ok()
    }
    pub fn column_id(&self) -> u32 { self.column.unwrap_or_default() }
    pub fn byte_len(&self) -> u64 { self.length.unwrap_or_default() }
}

impl ColumnEncoding {
    pub fn encoding_kind(&self) -> EncodingKind {
        EncodingKind::try_from(self.kind.unwrap_or_default()).unwrap_or(EncodingKind::Direct)
    }
    pub fn is_v2(&self) -> bool {
        matches!(self.encoding_kind(), EncodingKind::DirectV2 | EncodingKind::DictionaryV2)
    }
    pub fn is_dictionary(&self) -> bool {
        matches!(self.encoding_kind(), EncodingKind::Dictionary | EncodingKind::DictionaryV2)
    }
}

impl StripeInformation {
    pub fn num_rows(&self) -> u64 { self.number_of_rows.unwrap_or_default() }
    pub fn start(&self) -> u64 { self.offset.unwrap_or_default() }
    pub fn index_len(&self) -> u64 { self.index_length.unwrap_or_default() }
    pub fn data_len(&self) -> u64 { self.data_length.unwrap_or_default() }
    pub fn footer_len(&self) -> u64 { self.footer_length.unwrap_or_default() }
}
