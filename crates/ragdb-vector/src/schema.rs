use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Metadata keys copied into their own columns so filters on them can be
/// pushed down to the scan.
pub const PROMOTED_COLUMNS: [&str; 5] = ["file_path", "language", "chunk_type", "document_id", "dataset_id"];

pub fn build_record_schema(dim: i32) -> Arc<Schema> {
	let mut fields = vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("metadata", DataType::Utf8, false),
	];
	for column in PROMOTED_COLUMNS {
		fields.push(Field::new(column, DataType::Utf8, false));
	}
	fields.push(Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false));
	fields.push(Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false));
	fields.push(Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true));
	Arc::new(Schema::new(fields))
}

pub fn is_promoted(key: &str) -> bool {
	PROMOTED_COLUMNS.contains(&key)
}
