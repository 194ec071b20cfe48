//! Tests for row operation encoding and decoding
//!
//! These tests verify:
//! - Projection of client columns onto the tablet schema
//! - Defaults and NULL handling for INSERT / UPSERT
//! - UPDATE and DELETE semantics
//! - Rejection of malformed batches
//! - Arena ownership and limits

use oplog::row_ops::{
    decode, CellValue, RowOperationType, RowOperations, RowOperationsDecoder, RowOperationsEncoder,
};
use oplog::schema::{ColumnSchema, DataType, Schema, Value};
use oplog::{Arena, LogError};

// =============================================================================
// Helper Functions
// =============================================================================

/// id | name | age? | score = 1.5 | nickname = "anon" | avatar?
fn tablet_schema() -> Schema {
    Schema::new(vec![
        ColumnSchema::key("id", DataType::Int32),
        ColumnSchema::new("name", DataType::String),
        ColumnSchema::new("age", DataType::Int32).nullable(),
        ColumnSchema::new("score", DataType::Double).with_default(Value::Double(1.5)),
        ColumnSchema::new("nickname", DataType::String)
            .with_default(Value::String("anon".to_string())),
        ColumnSchema::new("avatar", DataType::Binary).nullable(),
    ])
    .unwrap()
}

fn client_schema(columns: Vec<ColumnSchema>) -> Schema {
    let mut all = vec![ColumnSchema::key("id", DataType::Int32)];
    all.extend(columns);
    Schema::new(all).unwrap()
}

fn simple_schema() -> Schema {
    Schema::new(vec![
        ColumnSchema::key("id", DataType::Int32),
        ColumnSchema::new("name", DataType::String).nullable(),
    ])
    .unwrap()
}

fn encode(schema: &Schema, ops: &[(RowOperationType, Vec<(&str, Value)>)]) -> RowOperations {
    let mut encoder = RowOperationsEncoder::new(schema);
    for (op_type, cells) in ops {
        encoder.add(*op_type, cells).unwrap();
    }
    encoder.finish()
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

fn assert_invalid<T: std::fmt::Debug>(result: Result<T, LogError>) {
    assert!(
        matches!(result, Err(LogError::InvalidArgument(_))),
        "expected InvalidArgument, got {result:?}"
    );
}

// =============================================================================
// Projection Tests
// =============================================================================

#[test]
fn test_insert_missing_required_column_fails() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("age", DataType::Int32).nullable()]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("age", Value::Int32(30))],
        )],
    );

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &client, &tablet, &mut arena));
}

#[test]
fn test_update_missing_required_column_succeeds() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("age", DataType::Int32).nullable()]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Update,
            vec![("id", Value::Int32(1)), ("age", Value::Int32(30))],
        )],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op_type, RowOperationType::Update);
    assert_eq!(ops[0].key_values, vec![CellValue::Int32(1)]);
    assert_eq!(ops[0].column_values, vec![(2, CellValue::Int32(30))]);
    assert_eq!(ops[0].column(1), None);
}

#[test]
fn test_column_absent_from_tablet_fails() {
    let tablet = tablet_schema();
    let client = client_schema(vec![
        ColumnSchema::new("name", DataType::String),
        ColumnSchema::new("extra", DataType::Int64).nullable(),
    ]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("name", string("a"))],
        )],
    );

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &client, &tablet, &mut arena));
}

#[test]
fn test_column_type_mismatch_fails() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("age", DataType::Int64)]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Update,
            vec![("id", Value::Int32(1)), ("age", Value::Int64(3))],
        )],
    );

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &client, &tablet, &mut arena));
}

#[test]
fn test_key_mismatch_fails() {
    let tablet = tablet_schema();
    let client = Schema::new(vec![ColumnSchema::key("user_id", DataType::Int32)]).unwrap();
    let raw = encode(
        &client,
        &[(RowOperationType::Delete, vec![("user_id", Value::Int32(1))])],
    );

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &client, &tablet, &mut arena));
}

#[test]
fn test_client_column_order_is_projected() {
    let tablet = tablet_schema();
    let client = client_schema(vec![
        ColumnSchema::new("avatar", DataType::Binary).nullable(),
        ColumnSchema::new("age", DataType::Int32).nullable(),
        ColumnSchema::new("name", DataType::String),
    ]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Update,
            vec![
                ("id", Value::Int32(9)),
                ("name", string("zed")),
                ("avatar", Value::Binary(vec![1, 2, 3])),
            ],
        )],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(
        ops[0].column_values,
        vec![
            (1, CellValue::String("zed")),
            (5, CellValue::Binary(&[1, 2, 3])),
        ]
    );
}

// =============================================================================
// Default / NULL Tests
// =============================================================================

#[test]
fn test_insert_fills_defaults_and_nulls() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("name", DataType::String)]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("name", string("ann"))],
        )],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(
        ops[0].column_values,
        vec![
            (1, CellValue::String("ann")),
            (2, CellValue::Null),
            (3, CellValue::Double(1.5)),
            (4, CellValue::String("anon")),
            (5, CellValue::Null),
        ]
    );
}

#[test]
fn test_upsert_fills_defaults() {
    let tablet = tablet_schema();
    let client = client_schema(vec![
        ColumnSchema::new("name", DataType::String),
        ColumnSchema::new("score", DataType::Double),
    ]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Upsert,
            vec![
                ("id", Value::Int32(2)),
                ("name", string("bo")),
                ("score", Value::Double(9.0)),
            ],
        )],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(ops[0].op_type, RowOperationType::Upsert);
    assert_eq!(ops[0].column(3), Some(&CellValue::Double(9.0)));
    assert_eq!(ops[0].column(4), Some(&CellValue::String("anon")));
}

#[test]
fn test_explicit_null_for_nullable_column() {
    let tablet = tablet_schema();
    let client = client_schema(vec![
        ColumnSchema::new("name", DataType::String),
        ColumnSchema::new("age", DataType::Int32).nullable(),
    ]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Update,
            vec![("id", Value::Int32(1)), ("age", Value::Null)],
        )],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(ops[0].column_values, vec![(2, CellValue::Null)]);
}

#[test]
fn test_null_for_non_nullable_column_fails() {
    let tablet = tablet_schema();
    // The client believes `name` is nullable; the tablet does not
    let client = client_schema(vec![ColumnSchema::new("name", DataType::String).nullable()]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Update,
            vec![("id", Value::Int32(1)), ("name", Value::Null)],
        )],
    );

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &client, &tablet, &mut arena));
}

// =============================================================================
// Operation Type Tests
// =============================================================================

#[test]
fn test_delete_carries_only_keys() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("name", DataType::String)]);
    let raw = encode(
        &client,
        &[(RowOperationType::Delete, vec![("id", Value::Int32(4))])],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(ops[0].op_type, RowOperationType::Delete);
    assert_eq!(ops[0].key_values, vec![CellValue::Int32(4)]);
    assert!(ops[0].column_values.is_empty());
}

#[test]
fn test_update_without_columns_fails() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("name", DataType::String)]);
    let raw = encode(
        &client,
        &[(RowOperationType::Update, vec![("id", Value::Int32(4))])],
    );

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &client, &tablet, &mut arena));
}

#[test]
fn test_batch_of_mixed_operations() {
    let schema = simple_schema();
    let raw = encode(
        &schema,
        &[
            (
                RowOperationType::Insert,
                vec![("id", Value::Int32(1)), ("name", string("a"))],
            ),
            (
                RowOperationType::Update,
                vec![("id", Value::Int32(1)), ("name", string("b"))],
            ),
            (RowOperationType::Delete, vec![("id", Value::Int32(1))]),
            (RowOperationType::Insert, vec![("id", Value::Int32(2))]),
        ],
    );

    let mut arena = Arena::default();
    let ops = RowOperationsDecoder::new(&raw, &schema, &schema)
        .decode_operations(&mut arena)
        .unwrap();

    let described: Vec<String> = ops.iter().map(|op| op.describe(&schema)).collect();
    assert_eq!(
        described,
        vec![
            r#"INSERT (int32 id=1, string name="a")"#.to_string(),
            r#"UPDATE (int32 id=1) SET string name="b""#.to_string(),
            "DELETE (int32 id=1)".to_string(),
            "INSERT (int32 id=2, string name=NULL)".to_string(),
        ]
    );
}

#[test]
fn test_describe_with_narrower_schema() {
    let schema = simple_schema();
    let raw = encode(
        &schema,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(7)), ("name", string("a"))],
        )],
    );

    let mut arena = Arena::default();
    let ops = decode(&raw, &schema, &schema, &mut arena).unwrap();

    let key_only = Schema::new(vec![ColumnSchema::key("id", DataType::Int32)]).unwrap();
    assert_eq!(ops[0].describe(&key_only), r#"INSERT (int32 id=7, #1="a")"#);
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_truncated_rows_fail() {
    let schema = simple_schema();
    let mut raw = encode(
        &schema,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("name", string("a"))],
        )],
    );
    raw.rows.pop();

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &schema, &schema, &mut arena));
}

#[test]
fn test_unknown_operation_type_fails() {
    let schema = simple_schema();
    let mut raw = encode(
        &schema,
        &[(RowOperationType::Delete, vec![("id", Value::Int32(1))])],
    );
    raw.rows[0] = 0x7F;

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &schema, &schema, &mut arena));
}

#[test]
fn test_indirect_pointer_out_of_range_fails() {
    let schema = simple_schema();
    let mut raw = encode(
        &schema,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("name", string("abc"))],
        )],
    );
    raw.indirect_data.truncate(1);

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &schema, &schema, &mut arena));
}

#[test]
fn test_invalid_utf8_string_fails() {
    let schema = simple_schema();
    let mut raw = encode(
        &schema,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("name", string("abc"))],
        )],
    );
    raw.indirect_data[0] = 0xFF;

    let mut arena = Arena::default();
    assert_invalid(decode(&raw, &schema, &schema, &mut arena));
}

#[test]
fn test_raw_batch_is_not_modified() {
    let tablet = tablet_schema();
    let client = client_schema(vec![ColumnSchema::new("name", DataType::String)]);
    let raw = encode(
        &client,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(1)), ("name", string("ann"))],
        )],
    );
    let before = raw.clone();

    let mut arena = Arena::default();
    decode(&raw, &client, &tablet, &mut arena).unwrap();

    assert_eq!(raw, before);
}

// =============================================================================
// Arena Tests
// =============================================================================

#[test]
fn test_arena_holds_decoded_strings() {
    let schema = simple_schema();
    let raw = encode(
        &schema,
        &[
            (
                RowOperationType::Insert,
                vec![("id", Value::Int32(1)), ("name", string("hello"))],
            ),
            (
                RowOperationType::Insert,
                vec![("id", Value::Int32(2)), ("name", string("world"))],
            ),
        ],
    );

    let mut arena = Arena::new(16, 1024);
    let ops = decode(&raw, &schema, &schema, &mut arena).unwrap();
    let owned: Vec<Value> = ops.iter().map(|op| op.column_values[0].1.to_value()).collect();
    drop(ops);

    assert_eq!(owned, vec![string("hello"), string("world")]);
    assert_eq!(arena.allocated_bytes(), 10);
    assert_eq!(arena.num_chunks(), 1);

    arena.reset();
    assert_eq!(arena.allocated_bytes(), 0);
    assert_eq!(arena.num_chunks(), 0);

    // Reusable after reset
    let ops = decode(&raw, &schema, &schema, &mut arena).unwrap();
    assert_eq!(ops[1].column_values[0].1, CellValue::String("world"));
}

#[test]
fn test_arena_limit_exceeded_fails() {
    let schema = simple_schema();
    let raw = encode(
        &schema,
        &[
            (
                RowOperationType::Insert,
                vec![("id", Value::Int32(1)), ("name", string("aaaaaaaaaa"))],
            ),
            (
                RowOperationType::Insert,
                vec![("id", Value::Int32(2)), ("name", string("bbbbbbbbbb"))],
            ),
        ],
    );

    let mut arena = Arena::new(8, 16);
    assert_invalid(decode(&raw, &schema, &schema, &mut arena));

    // A failed batch leaves nothing behind
    let small = encode(
        &schema,
        &[(
            RowOperationType::Insert,
            vec![("id", Value::Int32(3)), ("name", string("ok"))],
        )],
    );
    let ops = decode(&small, &schema, &schema, &mut arena).unwrap();
    assert_eq!(ops[0].column_values[0].1, CellValue::String("ok"));
}

// =============================================================================
// Encoder Tests
// =============================================================================

#[test]
fn test_encoder_rejects_bad_cells() {
    let schema = simple_schema();
    let mut encoder = RowOperationsEncoder::new(&schema);

    assert_invalid(encoder.add(RowOperationType::Insert, &[("name", string("a"))]));
    assert_invalid(encoder.add(
        RowOperationType::Insert,
        &[("id", Value::Int32(1)), ("missing", Value::Int32(1))],
    ));
    assert_invalid(encoder.add(
        RowOperationType::Insert,
        &[("id", Value::Int32(1)), ("id", Value::Int32(2))],
    ));
    assert_invalid(encoder.add(RowOperationType::Insert, &[("id", Value::Int64(1))]));
    assert_invalid(encoder.add(RowOperationType::Insert, &[("id", Value::Null)]));
    assert_invalid(encoder.add(
        RowOperationType::Delete,
        &[("id", Value::Int32(1)), ("name", string("a"))],
    ));

    // Failed adds leave the batch untouched
    assert!(encoder.is_empty());
    assert_eq!(encoder.finish(), RowOperations::default());
}
