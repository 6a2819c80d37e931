//! Arrow <-> `VectorRecord` conversion.
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::Schema;
use std::sync::Arc;

use ragdb_core::error::{Error, Result};
use ragdb_core::types::{Meta, VectorRecord};

use crate::schema::PROMOTED_COLUMNS;

/// Build a batch from records whose timestamps are already resolved.
pub fn records_to_batch(schema: Arc<Schema>, dim: i32, records: &[VectorRecord]) -> Result<RecordBatch> {
	let mut ids = Vec::with_capacity(records.len());
	let mut texts = Vec::with_capacity(records.len());
	let mut metas = Vec::with_capacity(records.len());
	let mut promoted: Vec<Vec<String>> = vec![Vec::with_capacity(records.len()); PROMOTED_COLUMNS.len()];
	let mut created = Vec::with_capacity(records.len());
	let mut updated = Vec::with_capacity(records.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());
	for r in records {
		ids.push(r.id.clone());
		texts.push(r.text.clone());
		metas.push(serde_json::to_string(&r.metadata).map_err(Error::store)?);
		for (col, key) in promoted.iter_mut().zip(PROMOTED_COLUMNS) {
			col.push(r.metadata.get(key).cloned().unwrap_or_default());
		}
		created.push(r.created_at.unwrap_or_default());
		updated.push(r.updated_at.unwrap_or_default());
		vectors.push(Some(r.embedding.iter().map(|&x| Some(x)).collect()));
	}
	let mut columns: Vec<Arc<dyn Array>> =
		vec![Arc::new(StringArray::from(ids)), Arc::new(StringArray::from(texts)), Arc::new(StringArray::from(metas))];
	for col in promoted {
		columns.push(Arc::new(StringArray::from(col)));
	}
	columns.push(Arc::new(TimestampMillisecondArray::from(created)));
	columns.push(Arc::new(TimestampMillisecondArray::from(updated)));
	columns.push(Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim)));
	RecordBatch::try_new(schema, columns).map_err(Error::store)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::Store(format!("column '{name}' missing or not utf8")))
}

fn timestamp_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a TimestampMillisecondArray> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
}

fn parse_meta(raw: &str) -> Result<Meta> {
	if raw.is_empty() {
		return Ok(Meta::new());
	}
	serde_json::from_str(raw).map_err(|e| Error::Store(format!("bad metadata json: {e}")))
}

/// Rows of a batch as records. Missing vector cells come back empty.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<VectorRecord>> {
	let ids = string_column(batch, "id")?;
	let texts = string_column(batch, "text")?;
	let metas = string_column(batch, "metadata")?;
	let created = timestamp_column(batch, "created_at");
	let updated = timestamp_column(batch, "updated_at");
	let vectors = batch.column_by_name("vector").and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let embedding = match vectors {
			Some(fsl) if fsl.is_valid(i) => fsl.value(i).as_primitive::<Float32Type>().values().to_vec(),
			_ => Vec::new(),
		};
		out.push(VectorRecord {
			id: ids.value(i).to_string(),
			embedding,
			text: texts.value(i).to_string(),
			metadata: parse_meta(metas.value(i))?,
			created_at: created.filter(|c| c.is_valid(i)).map(|c| c.value(i)),
			updated_at: updated.filter(|c| c.is_valid(i)).map(|c| c.value(i)),
		});
	}
	Ok(out)
}

/// Cosine distances from a vector search, in row order.
pub fn distances(batch: &RecordBatch) -> Result<Vec<f32>> {
	let col = batch
		.column_by_name("_distance")
		.and_then(|c| c.as_any().downcast_ref::<Float32Array>())
		.ok_or_else(|| Error::Store("vector search returned no _distance column".into()))?;
	Ok((0..batch.num_rows()).map(|i| col.value(i)).collect())
}

/// `(id, created_at)` pairs from a projection of those two columns.
pub fn created_at_by_id(batch: &RecordBatch) -> Result<Vec<(String, i64)>> {
	let ids = string_column(batch, "id")?;
	let Some(created) = timestamp_column(batch, "created_at") else {
		return Ok(Vec::new());
	};
	Ok((0..batch.num_rows()).filter(|&i| created.is_valid(i)).map(|i| (ids.value(i).to_string(), created.value(i))).collect())
}
