//! Index builds and compaction for the vector table.
//!
//! None of this is on the query path: searches work (by brute force) with no
//! index at all. `build_indices` trains IVF-PQ once the table holds enough rows
//! for PQ training and adds BTree indices on the columns filters and deletes
//! hit most.
use lancedb::index::scalar::BTreeIndexBuilder;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::table::OptimizeAction;
use lancedb::{DistanceType, Table};
use serde::Serialize;
use tracing::{info, warn};

use ragdb_core::error::{Error, Result};

/// PQ training needs a few hundred rows to produce usable centroids.
pub const MIN_ROWS_FOR_IVFPQ: usize = 256;

const SCALAR_INDEX_COLUMNS: [&str; 2] = ["id", "document_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfPqParams {
	pub nlist: usize,
	pub m: usize,
}

pub fn compute_ivfpq_params(total_ready: usize, dim: usize) -> IvfPqParams {
	#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	let sqrt_n = (total_ready as f64).sqrt() as usize;
	let mut nlist = (2 * sqrt_n).clamp(1, 65_536);
	// Clamp nlist below the row count for tiny datasets
	if total_ready > 1 {
		nlist = nlist.min(total_ready - 1);
	} else {
		nlist = 1;
	}
	// num_sub_vectors must divide dim
	let mut m = if dim >= 1024 { 32 } else { 16 };
	while m > 1 && dim % m != 0 {
		m /= 2;
	}
	IvfPqParams { nlist, m }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
	pub vector_index: Option<String>,
	pub scalar_indices: Vec<String>,
	pub skipped_reason: Option<String>,
}

pub async fn build_indices(table: &Table, rows: usize, dim: usize) -> Result<IndexReport> {
	let mut report = IndexReport::default();
	if rows >= MIN_ROWS_FOR_IVFPQ {
		let params = compute_ivfpq_params(rows, dim);
		let name = "vector_idx".to_string();
		table
			.create_index(
				&["vector"],
				Index::IvfPq(
					IvfPqIndexBuilder::default()
						.distance_type(DistanceType::Cosine)
						.num_partitions(u32::try_from(params.nlist).unwrap_or(u32::MAX))
						.num_sub_vectors(u32::try_from(params.m).unwrap_or(16)),
				),
			)
			.name(name.clone())
			.replace(true)
			.execute()
			.await
			.map_err(Error::store)?;
		info!(rows, nlist = params.nlist, m = params.m, "built IVF-PQ index");
		report.vector_index = Some(name);
	} else {
		report.skipped_reason = Some(format!("{rows} rows, IVF-PQ needs at least {MIN_ROWS_FOR_IVFPQ}"));
	}

	for column in SCALAR_INDEX_COLUMNS {
		let name = format!("{column}_idx");
		let built = table
			.create_index(&[column], Index::BTree(BTreeIndexBuilder::default()))
			.name(name.clone())
			.replace(true)
			.execute()
			.await;
		match built {
			Ok(()) => report.scalar_indices.push(name),
			Err(e) => warn!(column, error = %e, "scalar index build failed"),
		}
	}
	Ok(report)
}

/// Compact fragments, prune old versions and fold new rows into indices.
pub async fn optimize(table: &Table) -> Result<()> {
	table.optimize(OptimizeAction::All).await.map_err(Error::store)?;
	info!("vector table optimized");
	Ok(())
}

pub async fn index_names(table: &Table) -> Result<Vec<String>> {
	let indices = table.list_indices().await.map_err(Error::store)?;
	let mut names: Vec<String> = indices.into_iter().map(|i| i.name).collect();
	names.sort();
	Ok(names)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn params_stay_within_the_row_count() {
		assert_eq!(compute_ivfpq_params(1, 768), IvfPqParams { nlist: 1, m: 16 });
		let p = compute_ivfpq_params(300, 1024);
		assert_eq!(p.nlist, 34);
		assert_eq!(p.m, 32);
		let big = compute_ivfpq_params(10_000_000, 768);
		assert_eq!(big.nlist, 6324);
	}

	#[test]
	fn sub_vectors_divide_the_dimension() {
		assert_eq!(compute_ivfpq_params(1000, 384).m, 16);
		assert_eq!(compute_ivfpq_params(1000, 100).m, 4);
		assert_eq!(compute_ivfpq_params(1000, 7).m, 1);
	}
}
