mod common;

use std::io::Write;
use std::sync::Arc;

use common::{decimal, int_rle, list, primitive, structure, OrcFileBuilder, StripeBuilder};
use olap_gpu_engine::orc::proto::{CompressionKind, StreamKind, TypeKind};
use olap_gpu_engine::orc::{
    BufferSource, ColumnNameInfo, DataSource, FileSource, OrcReader, ReaderOptions, SchemaMatching,
};
use olap_gpu_engine::{DType, EngineError, TimeUnit, Value};

fn source(bytes: Vec<u8>) -> Arc<dyn DataSource> { Arc::new(BufferSource::new(bytes)) }

fn open(bytes: Vec<u8>, options: ReaderOptions) -> OrcReader {
    OrcReader::new(vec![source(bytes)], options).unwrap()
}

fn int(v: i32) -> Value { Value::Int32(v) }
fn s(v: &str) -> Value { Value::str(v) }

/// a: int, b: string, c: double；两个 stripe 各 3 行
fn flat_file(compression: CompressionKind, block_size: usize) -> OrcFileBuilder {
    OrcFileBuilder::new(vec![
        structure(&[(1, "a"), (2, "b"), (3, "c")]),
        primitive(TypeKind::Int),
        primitive(TypeKind::String),
        primitive(TypeKind::Double),
    ])
    .compression(compression, block_size)
    .stripe(StripeBuilder::new(3)
        .ints(1, &[Some(1), None, Some(3)])
        .strings(2, &[Some("x"), Some("y"), None])
        .doubles(3, &[Some(0.5), Some(1.5), Some(2.5)]))
    .stripe(StripeBuilder::new(3)
        .ints(1, &[Some(4), Some(5), Some(6)])
        .strings(2, &[Some("p"), None, Some("r")])
        .doubles(3, &[None, Some(4.5), Some(5.5)]))
}

#[test]
fn reads_every_column_of_every_stripe() {
    let bytes = flat_file(CompressionKind::None, 0).user_metadata("creator", "fixture").build();
    let out = open(bytes, ReaderOptions::default()).read(0, None, None).unwrap();

    assert_eq!(out.column_names, vec!["a", "b", "c"]);
    assert_eq!(out.user_metadata.get("creator").map(String::as_str), Some("fixture"));
    let t = &out.table;
    assert_eq!((t.num_rows(), t.num_columns()), (6, 3));
    assert_eq!(t.column(0).dtype(), DType::Int32);
    assert_eq!(t.column(0).to_values(), vec![int(1), Value::Null, int(3), int(4), int(5), int(6)]);
    assert_eq!(t.column(1).to_values(), vec![s("x"), s("y"), Value::Null, s("p"), Value::Null, s("r")]);
    assert_eq!(t.column(2).null_count(), 1);
    assert_eq!(t.column(2).value(4), Value::Float64(4.5));
}

#[test]
fn selected_columns_come_back_in_request_order() {
    let bytes = flat_file(CompressionKind::None, 0).build();
    let out = open(bytes, ReaderOptions::new().with_columns(["c", "a"])).read(0, None, None).unwrap();
    assert_eq!(out.column_names, vec!["c", "a"]);
    assert_eq!(out.table.column(0).dtype(), DType::Float64);
    assert_eq!(out.table.column(1).value(5), int(6));
}

#[test]
fn unknown_column_fails_at_open() {
    let bytes = flat_file(CompressionKind::None, 0).build();
    let err = OrcReader::new(vec![source(bytes)], ReaderOptions::new().with_columns(["zzz"])).unwrap_err();
    assert!(matches!(err, EngineError::ColumnNotFound(name) if name == "zzz"));
}

#[test]
fn row_range_spans_stripes() {
    let bytes = flat_file(CompressionKind::None, 0).build();
    let reader = open(bytes, ReaderOptions::default());

    let out = reader.read(2, Some(3), None).unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![int(3), int(4), int(5)]);
    assert_eq!(out.table.column(1).to_values(), vec![Value::Null, s("p"), Value::Null]);
    assert_eq!(out.table.column(2).to_values(), vec![Value::Float64(2.5), Value::Null, Value::Float64(4.5)]);

    let tail = reader.read(6, None, None).unwrap();
    assert_eq!((tail.table.num_rows(), tail.table.num_columns()), (0, 3));
    assert!(reader.read(7, None, None).is_err());
}

#[test]
fn explicit_stripes_override_row_range() {
    let bytes = flat_file(CompressionKind::None, 0).build();
    let reader = open(bytes, ReaderOptions::default());
    let out = reader.read(1, Some(1), Some(&[vec![1]])).unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![int(4), int(5), int(6)]);

    let err = reader.read(0, None, Some(&[vec![2]])).unwrap_err();
    assert!(matches!(err, EngineError::InvalidStripe { source_idx: 0, index: 2, num_stripes: 2 }));
}

#[test]
fn sources_are_read_back_to_back() {
    let a = flat_file(CompressionKind::None, 0).build();
    let b = flat_file(CompressionKind::None, 0).build();
    let reader = OrcReader::new(vec![source(a), source(b)], ReaderOptions::new().with_columns(["a"])).unwrap();
    assert_eq!(reader.metadata().num_rows(), 12);
    let out = reader.read(4, Some(4), None).unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![int(5), int(6), int(1), Value::Null]);

    let picked = reader.read(0, None, Some(&[vec![], vec![0]])).unwrap();
    assert_eq!(picked.table.column(0).to_values(), vec![int(1), Value::Null, int(3)]);
}

#[test]
fn strict_matching_rejects_different_schemas() {
    let ints = flat_file(CompressionKind::None, 0).build();
    let other = OrcFileBuilder::new(vec![
        structure(&[(1, "a"), (2, "b"), (3, "c")]),
        primitive(TypeKind::Long),
        primitive(TypeKind::String),
        primitive(TypeKind::Double),
    ])
    .stripe(StripeBuilder::new(1).ints(1, &[Some(1)]).strings(2, &[Some("q")]).doubles(3, &[Some(1.0)]))
    .build();

    let strict = ReaderOptions::new().with_schema_matching(SchemaMatching::Strict);
    let err = OrcReader::new(vec![source(ints.clone()), source(other.clone())], strict).unwrap_err();
    assert!(matches!(err, EngineError::SchemaMismatch(_)));
    assert!(OrcReader::new(vec![source(ints), source(other)], ReaderOptions::default()).is_ok());
}

#[test]
fn dictionaries_continue_across_stripes() {
    let bytes = OrcFileBuilder::new(vec![structure(&[(1, "k")]), primitive(TypeKind::String)])
        .stripe(StripeBuilder::new(3).dictionary_strings(1, &["a", "b"], &[Some(1), Some(0), None]))
        .stripe(StripeBuilder::new(2).dictionary_strings(1, &["c"], &[Some(0), Some(0)]))
        .build();
    let out = open(bytes, ReaderOptions::default()).read(0, None, None).unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![s("b"), s("a"), Value::Null, s("c"), s("c")]);

    let skipped = open(
        OrcFileBuilder::new(vec![structure(&[(1, "k")]), primitive(TypeKind::String)])
            .stripe(StripeBuilder::new(3).dictionary_strings(1, &["a", "b"], &[Some(1), Some(0), None]))
            .stripe(StripeBuilder::new(2).dictionary_strings(1, &["c"], &[Some(0), Some(0)]))
            .build(),
        ReaderOptions::default(),
    )
    .read(1, Some(3), None)
    .unwrap();
    assert_eq!(skipped.table.column(0).to_values(), vec![s("a"), Value::Null, s("c")]);
}

#[test]
fn booleans_and_bytes() {
    let bytes = OrcFileBuilder::new(vec![
        structure(&[(1, "flag"), (2, "tiny")]),
        primitive(TypeKind::Boolean),
        primitive(TypeKind::Byte),
    ])
    .stripe(StripeBuilder::new(10)
        .bools(1, &[Some(true), None, Some(false), Some(true), Some(true), Some(false), Some(false), Some(true), Some(true), None])
        .bytes(2, &[Some(-1), Some(2), Some(3), None, Some(5), Some(6), Some(7), Some(8), Some(9), Some(-128)]))
    .build();
    let out = open(bytes, ReaderOptions::default()).read(8, None, None).unwrap();
    assert_eq!(out.table.column(0).dtype(), DType::Bool8);
    assert_eq!(out.table.column(0).to_values(), vec![Value::Bool(true), Value::Null]);
    assert_eq!(out.table.column(1).to_values(), vec![Value::Int8(9), Value::Int8(-128)]);
}

// ── 嵌套 ──────────────────────────────────────────────────────────────────────

/// l: list<int>, s: struct<x: int, y: string>
fn nested_file() -> Vec<u8> {
    OrcFileBuilder::new(vec![
        structure(&[(1, "l"), (3, "s")]),
        list(2),
        primitive(TypeKind::Int),
        structure(&[(4, "x"), (5, "y")]),
        primitive(TypeKind::Int),
        primitive(TypeKind::String),
    ])
    .stripe(StripeBuilder::new(3)
        .lists(1, &[Some(2), None, Some(1)])
        .ints(2, &[Some(10), Some(20), Some(30)])
        .structs(3, &[true, false, true])
        .ints(4, &[Some(1), None])
        .strings(5, &[Some("p"), Some("q")]))
    .stripe(StripeBuilder::new(1)
        .lists(1, &[Some(1)])
        .ints(2, &[Some(40)])
        .structs(3, &[true])
        .ints(4, &[Some(7)])
        .strings(5, &[Some("z")]))
    .build()
}

#[test]
fn lists_and_structs_are_rebuilt() {
    let out = open(nested_file(), ReaderOptions::default()).read(0, None, None).unwrap();
    let t = &out.table;
    assert_eq!(t.column(0).dtype(), DType::List);
    assert_eq!(t.column(0).to_values(), vec![
        Value::List(vec![int(10), int(20)]),
        Value::Null,
        Value::List(vec![int(30)]),
        Value::List(vec![int(40)]),
    ]);
    assert_eq!(t.column(1).to_values(), vec![
        Value::Struct(vec![int(1), s("p")]),
        Value::Null,
        Value::Struct(vec![Value::Null, s("q")]),
        Value::Struct(vec![int(7), s("z")]),
    ]);

    let leaf = |n: &str| ColumnNameInfo { name: n.to_string(), children: Vec::new() };
    assert_eq!(out.schema_info[0], ColumnNameInfo { name: "l".into(), children: vec![leaf("offsets"), leaf("element")] });
    assert_eq!(out.schema_info[1], ColumnNameInfo { name: "s".into(), children: vec![leaf("x"), leaf("y")] });
}

#[test]
fn skipped_parent_rows_skip_their_children() {
    let out = open(nested_file(), ReaderOptions::default()).read(1, None, None).unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![
        Value::Null,
        Value::List(vec![int(30)]),
        Value::List(vec![int(40)]),
    ]);
    assert_eq!(out.table.column(1).value(0), Value::Null);
    assert_eq!(out.table.column(1).value(2), Value::Struct(vec![int(7), s("z")]));
}

#[test]
fn struct_field_by_path_inherits_parent_nulls() {
    let out = open(nested_file(), ReaderOptions::new().with_columns(["s.x"])).read(0, None, None).unwrap();
    assert_eq!(out.column_names, vec!["s.x"]);
    assert_eq!(out.table.column(0).to_values(), vec![int(1), Value::Null, Value::Null, int(7)]);
}

fn struct_in_struct_file() -> Vec<u8> {
    OrcFileBuilder::new(vec![
        structure(&[(1, "s")]),
        structure(&[(2, "a"), (3, "t")]),
        primitive(TypeKind::Int),
        structure(&[(4, "b")]),
        primitive(TypeKind::Int),
    ])
    .stripe(StripeBuilder::new(4)
        .structs(1, &[true, false, true, true])
        .ints(2, &[Some(1), Some(2), None])
        .structs(3, &[true, false, true])
        .ints(4, &[Some(5), None]))
    .build()
}

#[test]
fn struct_inside_struct_takes_every_ancestor_mask() {
    let out = open(struct_in_struct_file(), ReaderOptions::default()).read(0, None, None).unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![
        Value::Struct(vec![int(1), Value::Struct(vec![int(5)])]),
        Value::Null,
        Value::Struct(vec![int(2), Value::Null]),
        Value::Struct(vec![Value::Null, Value::Struct(vec![Value::Null])]),
    ]);

    let inner = open(struct_in_struct_file(), ReaderOptions::new().with_columns(["s.t"])).read(0, None, None).unwrap();
    assert_eq!(inner.table.column(0).to_values(), vec![
        Value::Struct(vec![int(5)]),
        Value::Null,
        Value::Null,
        Value::Struct(vec![Value::Null]),
    ]);
}

// ── 类型映射 ──────────────────────────────────────────────────────────────────

fn decimal_file(precision: u32) -> Vec<u8> {
    OrcFileBuilder::new(vec![structure(&[(1, "d")]), decimal(precision, 2)])
        .stripe(StripeBuilder::new(3).decimals(1, &[Some((12345, 2)), None, Some((5, 0))]))
        .build()
}

#[test]
fn decimals_rescale_or_convert() {
    let out = open(decimal_file(10), ReaderOptions::default()).read(0, None, None).unwrap();
    assert_eq!(out.table.column(0).dtype(), DType::Decimal64 { scale: -2 });
    assert_eq!(out.table.column(0).to_values(), vec![
        Value::Decimal64(12345, -2), Value::Null, Value::Decimal64(500, -2),
    ]);

    let floats = open(decimal_file(10), ReaderOptions::new().with_decimals_as_float64(true))
        .read(0, None, None)
        .unwrap();
    assert_eq!(floats.table.column(0).to_values(), vec![Value::Float64(123.45), Value::Null, Value::Float64(5.0)]);

    let err = open(decimal_file(20), ReaderOptions::default()).read(0, None, None).unwrap_err();
    assert!(matches!(err, EngineError::DecimalOverflow { precision: 20 }));
    assert!(open(decimal_file(20), ReaderOptions::new().with_decimals_as_float64(true)).read(0, None, None).is_ok());
}

#[test]
fn timestamps_use_the_orc_epoch_and_requested_unit() {
    let bytes = OrcFileBuilder::new(vec![structure(&[(1, "t")]), primitive(TypeKind::Timestamp)])
        .stripe(StripeBuilder::new(2)
            .writer_timezone("UTC")
            .timestamps(1, &[Some((10, 5_000_000)), None]))
        .build();
    let ms = open(bytes.clone(), ReaderOptions::new().with_timestamp_unit(TimeUnit::Millisecond))
        .read(0, None, None)
        .unwrap();
    assert_eq!(ms.table.column(0).to_values(), vec![
        Value::Timestamp(1_420_070_410_005, TimeUnit::Millisecond), Value::Null,
    ]);
    let ns = open(bytes, ReaderOptions::default()).read(0, None, None).unwrap();
    assert_eq!(ns.table.column(0).value(0), Value::Timestamp(1_420_070_410_005_000_000, TimeUnit::Nanosecond));
}

#[test]
fn timestamps_beyond_the_tick_range_fail_to_decode() {
    // 2015 纪元后约 285 年：纳秒 tick 溢出 i64，毫秒仍可表示
    let secs = 9_000_000_000i64;
    let bytes = OrcFileBuilder::new(vec![structure(&[(1, "t")]), primitive(TypeKind::Timestamp)])
        .stripe(StripeBuilder::new(1).timestamps(1, &[Some((secs, 0))]))
        .build();
    let err = open(bytes.clone(), ReaderOptions::default()).read(0, None, None).unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));

    let ms = open(bytes, ReaderOptions::new().with_timestamp_unit(TimeUnit::Millisecond))
        .read(0, None, None)
        .unwrap();
    assert_eq!(ms.table.column(0).value(0), Value::Timestamp((secs + 1_420_070_400) * 1000, TimeUnit::Millisecond));
}

#[test]
fn dates_as_days_or_milliseconds() {
    let file = || {
        OrcFileBuilder::new(vec![structure(&[(1, "day")]), primitive(TypeKind::Date)])
            .stripe(StripeBuilder::new(2).ints(1, &[Some(1), Some(-1)]))
            .build()
    };
    let days = open(file(), ReaderOptions::default()).read(0, None, None).unwrap();
    assert_eq!(days.table.column(0).to_values(), vec![Value::Date32(1), Value::Date32(-1)]);

    let ms = open(file(), ReaderOptions::new().with_np_dtypes(true)).read(0, None, None).unwrap();
    assert_eq!(ms.table.column(0).to_values(), vec![
        Value::Timestamp(86_400_000, TimeUnit::Millisecond),
        Value::Timestamp(-86_400_000, TimeUnit::Millisecond),
    ]);

    let far = OrcFileBuilder::new(vec![structure(&[(1, "day")]), primitive(TypeKind::Date)])
        .stripe(StripeBuilder::new(1).ints(1, &[Some(1 << 50)]))
        .build();
    let err = open(far, ReaderOptions::new().with_np_dtypes(true)).read(0, None, None).unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
}

// ── 压缩 ──────────────────────────────────────────────────────────────────────

fn wide_file(compression: CompressionKind, block_size: usize) -> OrcFileBuilder {
    let ints: Vec<Option<i64>> = (0..1000).map(|i| (i % 13 != 0).then_some(i % 7)).collect();
    let words: Vec<Option<&str>> = (0..1000).map(|i| Some(if i % 3 == 0 { "alpha" } else { "beta" })).collect();
    OrcFileBuilder::new(vec![structure(&[(1, "n"), (2, "w")]), primitive(TypeKind::Long), primitive(TypeKind::String)])
        .compression(compression, block_size)
        .stripe(StripeBuilder::new(1000).ints(1, &ints).strings(2, &words))
}

#[test]
fn every_codec_reads_the_same_table() {
    let plain = open(wide_file(CompressionKind::None, 0).build(), ReaderOptions::default())
        .read(0, None, None)
        .unwrap();
    assert_eq!(plain.table.column(0).value(13), Value::Null);
    assert_eq!(plain.table.column(0).value(15), Value::Int64(1));
    for kind in [CompressionKind::Zlib, CompressionKind::Snappy, CompressionKind::Lz4, CompressionKind::Zstd] {
        let out = open(wide_file(kind, 256).build(), ReaderOptions::default()).read(0, None, None).unwrap();
        assert_eq!(out.table, plain.table, "{kind:?}");
    }
    let small = open(flat_file(CompressionKind::Zlib, 8).build(), ReaderOptions::default()).read(2, Some(2), None).unwrap();
    assert_eq!(small.table.column(0).to_values(), vec![int(3), int(4)]);
}

#[test]
fn stored_blocks_keep_their_exact_length() {
    let bytes = wide_file(CompressionKind::Lz4, 300).stored_blocks().build();
    let stored = open(bytes, ReaderOptions::default()).read(0, None, None).unwrap();
    let plain = open(wide_file(CompressionKind::None, 0).build(), ReaderOptions::default())
        .read(0, None, None)
        .unwrap();
    assert_eq!(stored.table, plain.table);
}

#[test]
fn corrupted_block_is_reported() {
    let mut bytes = OrcFileBuilder::new(vec![structure(&[(1, "z")]), primitive(TypeKind::Long)])
        .compression(CompressionKind::Lz4, 64 * 1024)
        .stripe(StripeBuilder::new(100).ints(1, &[Some(0); 100]))
        .build();
    // 第一个 stripe 从偏移 3 开始，第一个流就是 DATA
    let header = u32::from(bytes[3]) | u32::from(bytes[4]) << 8 | u32::from(bytes[5]) << 16;
    assert_eq!(header & 1, 0, "fixture block should be compressed");
    let len = (header >> 1) as usize;
    bytes[6..6 + len].fill(0xff);

    let err = open(bytes, ReaderOptions::default()).read(0, None, None).unwrap_err();
    assert!(matches!(err, EngineError::Compression(_)), "{err:?}");
}

// ── 行索引 ────────────────────────────────────────────────────────────────────

#[test]
fn row_index_skips_whole_row_groups() {
    // 第一个行组只写了 2 个值：顺序解码会读穿，按行索引定位则直接从第二组开始
    let first = int_rle(&[0, 1], true);
    let second = int_rle(&(104..110).collect::<Vec<i64>>(), true);
    let data = [first.clone(), second].concat();
    let group = first.len() as u64;
    let build = || {
        OrcFileBuilder::new(vec![structure(&[(1, "v")]), primitive(TypeKind::Int)])
            .row_index_stride(4)
            .stripe(StripeBuilder::new(10)
                .row_index(1, vec![vec![0, 0], vec![group, 0], vec![group, 4]])
                .stream(StreamKind::Data, 1, data.clone()))
            .build()
    };

    let out = open(build(), ReaderOptions::default()).read(5, None, None).unwrap();
    assert_eq!(out.table.column(0).to_values(), (105..110).map(int).collect::<Vec<_>>());

    let sequential = open(build(), ReaderOptions::new().with_index(false)).read(5, None, None);
    assert!(sequential.is_err());
}

#[test]
fn file_source_reads_from_disk() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&flat_file(CompressionKind::Snappy, 64).build()).unwrap();
    let file: Arc<dyn DataSource> = Arc::new(FileSource::open(tmp.path()).unwrap());
    let out = OrcReader::new(vec![file], ReaderOptions::new().with_columns(["b"]))
        .unwrap()
        .read(0, None, None)
        .unwrap();
    assert_eq!(out.table.column(0).to_values(), vec![s("x"), s("y"), Value::Null, s("p"), Value::Null, s("r")]);
}
