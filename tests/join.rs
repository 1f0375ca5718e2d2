use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use olap_gpu_engine::join::{join, join_indices, JoinKind, JoinOptions, JoinStrategy};
use olap_gpu_engine::{Column, DType, Stream, Table, TimeUnit, Value, NOT_MATCHED};

fn table(cols: Vec<Column>) -> Table { Table::new(cols).unwrap() }

fn empty_left() -> Table { table(vec![Column::empty(DType::Int32), Column::empty(DType::String)]) }
fn empty_right() -> Table { table(vec![Column::empty(DType::Int32), Column::empty(DType::Float64)]) }

fn left() -> Table {
    table(vec![Column::from_vec(vec![1i32, 2]), Column::from_strs(&["a", "b"])])
}

fn right() -> Table {
    table(vec![Column::from_vec(vec![3i32, 4]), Column::from_vec(vec![0.5f64, 1.5])])
}

#[test]
fn empty_with_empty_is_empty_for_every_kind() {
    let s = Stream::default();
    for kind in [JoinKind::Left, JoinKind::Inner, JoinKind::Outer] {
        let out = join(&empty_left(), &empty_right(), &[0], &[0], &JoinOptions::new(kind), &s).unwrap();
        assert_eq!(out.num_rows(), 0, "{kind:?}");
        assert_eq!(out.num_columns(), 3, "{kind:?}");
    }
}

#[test]
fn outer_join_with_empty_right_keeps_left_rows() {
    let s = Stream::default();
    let out = join(&left(), &empty_right(), &[0], &[0], &JoinOptions::new(JoinKind::Outer), &s).unwrap();
    assert_eq!(out.num_rows(), 2);
    assert_eq!(out.column(0).to_values(), vec![Value::Int32(1), Value::Int32(2)]);
    assert_eq!(out.column(1).to_values(), vec![Value::str("a"), Value::str("b")]);
    assert_eq!(out.column(2).to_values(), vec![Value::Null, Value::Null]);
}

#[test]
fn outer_join_with_empty_left_takes_keys_from_right() {
    let s = Stream::default();
    let out = join(&empty_left(), &right(), &[0], &[0], &JoinOptions::new(JoinKind::Outer), &s).unwrap();
    assert_eq!(out.num_rows(), 2);
    assert_eq!(out.column(0).to_values(), vec![Value::Int32(3), Value::Int32(4)]);
    assert_eq!(out.column(1).null_count(), 2);
    assert_eq!(out.column(2).to_values(), vec![Value::Float64(0.5), Value::Float64(1.5)]);
}

#[test]
fn one_empty_side_for_left_and_inner() {
    let s = Stream::default();
    let left_join = join(&left(), &empty_right(), &[0], &[0], &JoinOptions::new(JoinKind::Left), &s).unwrap();
    assert_eq!(left_join.num_rows(), 2);
    assert_eq!(left_join.column(2).null_count(), 2);

    let none = join(&empty_left(), &right(), &[0], &[0], &JoinOptions::new(JoinKind::Left), &s).unwrap();
    assert_eq!(none.num_rows(), 0);
    for (l, r) in [(left(), empty_right()), (empty_left(), right())] {
        let inner = join(&l, &r, &[0], &[0], &JoinOptions::new(JoinKind::Inner), &s).unwrap();
        assert_eq!(inner.num_rows(), 0);
    }
}

#[test]
fn inner_rows_have_equal_keys_and_left_rows_appear() {
    let s = Stream::default();
    let l = table(vec![
        Column::from_options(vec![Some(1i64), Some(2), None, Some(2), Some(7)]),
        Column::from_strs(&["u", "v", "w", "x", "y"]),
    ]);
    let r = table(vec![
        Column::from_options(vec![Some(2i64), None, Some(1), Some(2)]),
        Column::from_vec(vec![10i32, 20, 30, 40]),
    ]);

    let inner = join_indices(&l, &r, &[0], &[0], &JoinOptions::new(JoinKind::Inner), &s).unwrap();
    assert_eq!(inner.len(), 5);
    for (&li, &ri) in inner.left.iter().zip(&inner.right) {
        assert_eq!(l.column(0).value(li as usize), r.column(0).value(ri as usize));
        assert!(!l.column(0).value(li as usize).is_null());
    }

    let left_join = join_indices(&l, &r, &[0], &[0], &JoinOptions::new(JoinKind::Left), &s).unwrap();
    let mut seen: HashMap<i32, usize> = HashMap::new();
    for &li in &left_join.left {
        *seen.entry(li).or_default() += 1;
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[&1], 2);
    assert_eq!(seen[&2], 1);
    assert!(left_join.left.iter().zip(&left_join.right).any(|(&l, &r)| l == 4 && r == NOT_MATCHED));
}

#[test]
fn materialized_join_keeps_types() {
    let s = Stream::default();
    let ts = |v: Vec<i64>| Column::timestamps(v, TimeUnit::Millisecond);
    let l = table(vec![ts(vec![100, 200, 300]), Column::from_vec(vec![1.0f32, 2.0, 3.0])]);
    let r = table(vec![Column::from_strs(&["p", "q"]), ts(vec![300, 100])]);
    let out = join(&l, &r, &[0], &[1], &JoinOptions::new(JoinKind::Left), &s).unwrap();
    assert_eq!(out.num_columns(), 3);
    assert_eq!(out.column(0).dtype(), DType::Timestamp(TimeUnit::Millisecond));
    assert_eq!(out.row(0), vec![Value::Timestamp(100, TimeUnit::Millisecond), Value::Float32(1.0), Value::str("q")]);
    assert_eq!(out.row(1), vec![Value::Timestamp(200, TimeUnit::Millisecond), Value::Float32(2.0), Value::Null]);
    assert_eq!(out.row(2), vec![Value::Timestamp(300, TimeUnit::Millisecond), Value::Float32(3.0), Value::str("p")]);
}

#[test]
fn multi_column_keys() {
    let s = Stream::default();
    let l = table(vec![Column::from_vec(vec![1i32, 1, 2]), Column::from_strs(&["a", "b", "a"])]);
    let r = table(vec![
        Column::from_strs(&["b", "a", "a"]),
        Column::from_vec(vec![1i32, 2, 1]),
        Column::from_vec(vec![7i64, 8, 9]),
    ]);
    let out = join(&l, &r, &[0, 1], &[1, 0], &JoinOptions::new(JoinKind::Inner), &s).unwrap();
    assert_eq!(out.num_columns(), 3);
    assert_eq!(out.row(0), vec![Value::Int32(1), Value::str("a"), Value::Int64(9)]);
    assert_eq!(out.row(1), vec![Value::Int32(1), Value::str("b"), Value::Int64(7)]);
    assert_eq!(out.row(2), vec![Value::Int32(2), Value::str("a"), Value::Int64(8)]);
}

#[test]
fn hash_and_sort_strategies_agree_on_random_keys() {
    let s = Stream::default();
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys = |n: usize| -> Vec<Option<i32>> {
        (0..n).map(|_| (rng.random_range(0..10) != 0).then(|| rng.random_range(0..25))).collect()
    };
    for round in 0..8 {
        let l = table(vec![Column::from_options(keys(40 + round))]);
        let r = table(vec![Column::from_options(keys(30 + 2 * round))]);
        for kind in [JoinKind::Left, JoinKind::Inner, JoinKind::Outer] {
            for nulls_equal in [false, true] {
                let hash = JoinOptions::new(kind).with_nulls_equal(nulls_equal);
                let sort = hash.clone().with_strategy(JoinStrategy::Sort);
                let a = join_indices(&l, &r, &[0], &[0], &hash, &s).unwrap();
                let b = join_indices(&l, &r, &[0], &[0], &sort, &s).unwrap();
                assert_eq!(a, b, "round {round} {kind:?} nulls_equal={nulls_equal}");
                assert_eq!(
                    join(&l, &r, &[0], &[0], &hash, &s).unwrap(),
                    join(&l, &r, &[0], &[0], &sort, &s).unwrap(),
                );
            }
        }
    }
}
