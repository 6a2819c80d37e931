//! LanceDB connection and table helpers.
use arrow_array::RecordBatchIterator;
use arrow_schema::Schema;
use lancedb::{connect, Connection, Table};
use std::sync::Arc;
use tracing::info;

use ragdb_core::error::{Error, Result};

pub async fn open_db(uri: &str) -> Result<Connection> {
	connect(uri).execute().await.map_err(Error::store)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
	let names = conn.table_names().execute().await.map_err(Error::store)?;
	Ok(names.iter().any(|n| n == name))
}

/// Open `name`, creating it empty with `schema` if missing. An existing table
/// whose vector width differs from `schema` is rejected.
pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<Table> {
	if !table_exists(conn, name).await? {
		let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
		conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::store)?;
		info!(table = name, "created vector table");
	}
	let table = conn.open_table(name).execute().await.map_err(Error::store)?;
	let existing = table.schema().await.map_err(Error::store)?;
	let want = schema.field_with_name("vector").map(|f| f.data_type().clone()).map_err(Error::store)?;
	let have = existing
		.field_with_name("vector")
		.map(|f| f.data_type().clone())
		.map_err(|_| Error::Store(format!("table '{name}' has no vector column")))?;
	if want != have {
		return Err(Error::InvalidConfig(format!("table '{name}' stores {have:?}, expected {want:?}")));
	}
	Ok(table)
}

/// SQL string literal with single quotes escaped.
pub fn sql_literal(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

/// `column IN ('a', 'b')`
pub fn sql_in(column: &str, values: &[String]) -> String {
	let list: Vec<String> = values.iter().map(|v| sql_literal(v)).collect();
	format!("{column} IN ({})", list.join(", "))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn literals_are_escaped() {
		assert_eq!(sql_literal("it's"), "'it''s'");
		assert_eq!(sql_in("id", &["a".into(), "b'c".into()]), "id IN ('a', 'b''c')");
	}
}
