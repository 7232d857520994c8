//! Row store adapter over SQLite.
//!
//! The store owns the schema contract between the relational table and the
//! ANN index: a 64-bit integer primary-key column whose values double as ANN
//! positions, a non-null blob column holding the compressed vector, and any
//! number of user-declared scalar columns.
//!
//! On construction the adapter either reflects an existing table (verifying
//! the contract columns are present and discovering user columns from the
//! catalog) or creates the table from the declared specs.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::types::{
    ColumnSpec, ColumnType, Row, Value, DEFAULT_IDX_COLUMN, DEFAULT_VECTOR_COLUMN,
};

// ============================================================================
// TableConfig
// ============================================================================

/// Configuration for opening or creating the record table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Table name.
    pub table_name: String,

    /// Name of the integer primary-key column.
    pub idx_name: String,

    /// Name of the vector blob column.
    pub vector_name: String,

    /// User column declarations (ignored when the table already exists;
    /// reflected columns win).
    pub columns: Vec<ColumnSpec>,
}

impl TableConfig {
    /// Create a config with default `idx`/`vector` column names.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            idx_name: DEFAULT_IDX_COLUMN.to_string(),
            vector_name: DEFAULT_VECTOR_COLUMN.to_string(),
            columns: Vec::new(),
        }
    }

    /// Override the primary-key column name.
    pub fn with_idx_name(mut self, name: impl Into<String>) -> Self {
        self.idx_name = name.into();
        self
    }

    /// Override the vector column name.
    pub fn with_vector_name(mut self, name: impl Into<String>) -> Self {
        self.vector_name = name.into();
        self
    }

    /// Declare user columns.
    pub fn with_columns(mut self, columns: Vec<ColumnSpec>) -> Self {
        self.columns = columns;
        self
    }
}

// ============================================================================
// RowStore
// ============================================================================

/// SQLite-backed record store.
pub struct RowStore {
    conn: Connection,
    table_name: String,
    idx_name: String,
    vector_name: String,
    user_columns: Vec<ColumnSpec>,
    reflected: bool,
}

impl RowStore {
    /// Open a store backed by a SQLite database file.
    pub fn open_path(path: impl AsRef<std::path::Path>, config: TableConfig) -> DbResult<Self> {
        Self::open(Connection::open(path)?, config)
    }

    /// Open a store backed by an in-memory SQLite database.
    pub fn open_in_memory(config: TableConfig) -> DbResult<Self> {
        Self::open(Connection::open_in_memory()?, config)
    }

    /// Open the store, creating or reflecting the record table.
    pub fn open(conn: Connection, config: TableConfig) -> DbResult<Self> {
        validate_ident(&config.table_name)?;
        validate_ident(&config.idx_name)?;
        validate_ident(&config.vector_name)?;
        for spec in &config.columns {
            validate_ident(&spec.name)?;
        }

        let mut store = Self {
            conn,
            table_name: config.table_name,
            idx_name: config.idx_name,
            vector_name: config.vector_name,
            user_columns: config.columns,
            reflected: false,
        };

        if store.table_exists()? {
            store.reflect()?;
            store.reflected = true;
            debug!(
                "Reflected table '{}' with {} user columns",
                store.table_name,
                store.user_columns.len()
            );
        } else {
            store.create_table()?;
            debug!(
                "Created table '{}' with {} user columns",
                store.table_name,
                store.user_columns.len()
            );
        }

        Ok(store)
    }

    /// Whether the table pre-existed and was reflected rather than created.
    pub fn reflected(&self) -> bool {
        self.reflected
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Primary-key column name.
    pub fn idx_name(&self) -> &str {
        &self.idx_name
    }

    /// Vector column name.
    pub fn vector_name(&self) -> &str {
        &self.vector_name
    }

    /// Reflected or declared user columns.
    pub fn user_columns(&self) -> &[ColumnSpec] {
        &self.user_columns
    }

    /// Whether the table has the named column (contract or user).
    pub fn has_column(&self, name: &str) -> bool {
        name == self.idx_name
            || name == self.vector_name
            || self.user_columns.iter().any(|c| c.name == name)
    }

    fn table_exists(&self) -> DbResult<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Discover the schema of an existing table from the catalog.
    ///
    /// Verifies the contract columns and replaces the declared user columns
    /// with what the catalog reports, including unique/indexed flags.
    fn reflect(&mut self) -> DbResult<()> {
        let mut columns: Vec<ColumnSpec> = Vec::new();
        let mut saw_idx = false;
        let mut saw_vector = false;

        {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA table_info({})", quote_ident(&self.table_name)))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;

            for row in rows {
                let (name, declared, notnull, pk) = row?;
                if name == self.idx_name {
                    if pk == 0 || ColumnType::from_declared(&declared) != ColumnType::Integer {
                        return Err(DbError::reflection(
                            &self.table_name,
                            format!("column '{}' must be an INTEGER PRIMARY KEY", name),
                        ));
                    }
                    saw_idx = true;
                } else if name == self.vector_name {
                    saw_vector = true;
                } else {
                    let mut spec = ColumnSpec::new(name, ColumnType::from_declared(&declared));
                    spec.nullable = notnull == 0;
                    columns.push(spec);
                }
            }
        }

        if !saw_idx {
            return Err(DbError::missing_column(&self.table_name, &self.idx_name));
        }
        if !saw_vector {
            return Err(DbError::missing_column(&self.table_name, &self.vector_name));
        }

        // Recover unique/indexed flags from single-column secondary indexes.
        let index_names: Vec<(String, bool)> = {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA index_list({})", quote_ident(&self.table_name)))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)? != 0))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        for (index_name, unique) in index_names {
            // Expression-index members report a NULL name; skip those.
            let members: Vec<String> = {
                let mut stmt = self
                    .conn
                    .prepare(&format!("PRAGMA index_info({})", quote_ident(&index_name)))?;
                let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(2))?;
                rows.collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .flatten()
                    .collect()
            };
            if members.len() != 1 {
                continue;
            }
            if let Some(spec) = columns.iter_mut().find(|c| c.name == members[0]) {
                if unique {
                    spec.unique = true;
                } else {
                    spec.indexed = true;
                }
            }
        }

        self.user_columns = columns;
        Ok(())
    }

    fn create_table(&self) -> DbResult<()> {
        let mut ddl = format!(
            "CREATE TABLE {} ({} INTEGER PRIMARY KEY, {} BLOB NOT NULL",
            quote_ident(&self.table_name),
            quote_ident(&self.idx_name),
            quote_ident(&self.vector_name),
        );
        for spec in &self.user_columns {
            ddl.push_str(", ");
            ddl.push_str(&quote_ident(&spec.name));
            ddl.push(' ');
            ddl.push_str(spec.ty.sql_type());
            if !spec.nullable {
                ddl.push_str(" NOT NULL");
            }
        }
        ddl.push(')');
        self.conn.execute(&ddl, [])?;

        for spec in &self.user_columns {
            if spec.unique {
                self.conn.execute(
                    &format!(
                        "CREATE UNIQUE INDEX {} ON {} ({})",
                        quote_ident(&format!("ux_{}_{}", self.table_name, spec.name)),
                        quote_ident(&self.table_name),
                        quote_ident(&spec.name),
                    ),
                    [],
                )?;
            } else if spec.indexed {
                self.conn.execute(
                    &format!(
                        "CREATE INDEX {} ON {} ({})",
                        quote_ident(&format!("ix_{}_{}", self.table_name, spec.name)),
                        quote_ident(&self.table_name),
                        quote_ident(&spec.name),
                    ),
                    [],
                )?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Bulk-append rows in one transaction.
    ///
    /// Every row must provide the idx and vector columns; user columns
    /// default to NULL when absent. Keys outside the schema are rejected.
    pub fn insert_many(&mut self, rows: &[Row]) -> DbResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut column_names: Vec<String> =
            vec![self.idx_name.clone(), self.vector_name.clone()];
        column_names.extend(self.user_columns.iter().map(|c| c.name.clone()));

        let placeholders: Vec<String> =
            (1..=column_names.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table_name),
            column_names
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders.join(", "),
        );

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                for key in row.keys() {
                    if !column_names.iter().any(|c| c == key) {
                        return Err(DbError::unknown_column(&self.table_name, key));
                    }
                }
                for required in [&self.idx_name, &self.vector_name] {
                    if !row.contains_key(required) {
                        return Err(DbError::MissingValue {
                            column: required.clone(),
                        });
                    }
                }
                let values: Vec<Value> = column_names
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                stmt.execute(params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} rows into '{}'", rows.len(), self.table_name);
        Ok(rows.len())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Generic predicate-based retrieval.
    ///
    /// `where_clause` is raw SQL (without the `WHERE` keyword) trusted from
    /// the embedding process; `None` selects everything. Callers bound
    /// memory by batching their predicates.
    pub fn select_where(
        &self,
        where_clause: Option<&str>,
        columns: &[&str],
    ) -> DbResult<Vec<Row>> {
        for column in columns {
            if !self.has_column(column) {
                return Err(DbError::unknown_column(&self.table_name, *column));
            }
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM {}",
            column_list,
            quote_ident(&self.table_name)
        );
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        sql.push_str(&format!(" ORDER BY {}", quote_ident(&self.idx_name)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut out = Row::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                out.insert(column.to_string(), Value::from(row.get_ref(i)?));
            }
            Ok(out)
        })?;

        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Vector blobs for `idx` in `[lo, hi)`, ordered by idx ascending.
    pub fn select_vectors_by_id_range(&self, lo: i64, hi: i64) -> DbResult<Vec<Vec<u8>>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} >= ?1 AND {} < ?2 ORDER BY {}",
            quote_ident(&self.vector_name),
            quote_ident(&self.table_name),
            quote_ident(&self.idx_name),
            quote_ident(&self.idx_name),
            quote_ident(&self.idx_name),
        ))?;
        let rows = stmt.query_map(params![lo, hi], |row| row.get::<_, Vec<u8>>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Number of rows with `idx` in `[lo, hi)`.
    pub fn count_in_range(&self, lo: i64, hi: i64) -> DbResult<i64> {
        Ok(self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} >= ?1 AND {} < ?2",
                quote_ident(&self.table_name),
                quote_ident(&self.idx_name),
                quote_ident(&self.idx_name),
            ),
            params![lo, hi],
            |row| row.get(0),
        )?)
    }

    /// Largest stored `idx`, or `None` for an empty table.
    pub fn max_idx(&self) -> DbResult<Option<i64>> {
        Ok(self.conn.query_row(
            &format!(
                "SELECT MAX({}) FROM {}",
                quote_ident(&self.idx_name),
                quote_ident(&self.table_name),
            ),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?)
    }

    /// Any single stored vector blob, used to rediscover the dimension on
    /// reopen. `None` for an empty table.
    pub fn sample_one_vector(&self) -> DbResult<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} LIMIT 1",
                    quote_ident(&self.vector_name),
                    quote_ident(&self.table_name),
                ),
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// First missing `idx` in `[lo, hi)`, if any.
    ///
    /// Used to name the exact gap when a contiguity check fails.
    pub fn first_gap_in_range(&self, lo: i64, hi: i64) -> DbResult<Option<i64>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} >= ?1 AND {} < ?2 ORDER BY {}",
            quote_ident(&self.idx_name),
            quote_ident(&self.table_name),
            quote_ident(&self.idx_name),
            quote_ident(&self.idx_name),
            quote_ident(&self.idx_name),
        ))?;
        let rows = stmt.query_map(params![lo, hi], |row| row.get::<_, i64>(0))?;

        let mut expected = lo;
        for row in rows {
            let idx = row?;
            if idx != expected {
                return Ok(Some(expected));
            }
            expected += 1;
        }
        if expected < hi {
            Ok(Some(expected))
        } else {
            Ok(None)
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Quote an identifier for use in SQL text.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Identifiers are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
fn validate_ident(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidColumnSpec {
            column: name.to_string(),
            message: "identifiers must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_store(columns: Vec<ColumnSpec>) -> RowStore {
        let conn = Connection::open_in_memory().unwrap();
        let config = TableConfig::new("records").with_columns(columns);
        RowStore::open(conn, config).unwrap()
    }

    fn record(idx: i64, vector: &[u8], name: Option<&str>) -> Row {
        let mut row = Row::new();
        row.insert("idx".to_string(), Value::Integer(idx));
        row.insert("vector".to_string(), Value::Blob(vector.to_vec()));
        if let Some(name) = name {
            row.insert("name".to_string(), Value::from(name));
        }
        row
    }

    fn text_column() -> Vec<ColumnSpec> {
        vec![ColumnSpec::new("name", ColumnType::Text).indexed()]
    }

    #[test]
    fn test_create_and_insert() {
        let mut store = open_test_store(text_column());
        assert!(!store.reflected());

        let rows = vec![
            record(0, b"aa", Some("zero")),
            record(1, b"bb", Some("one")),
        ];
        assert_eq!(store.insert_many(&rows).unwrap(), 2);
        assert_eq!(store.max_idx().unwrap(), Some(1));
        assert_eq!(store.count_in_range(0, 2).unwrap(), 2);
    }

    #[test]
    fn test_insert_missing_vector_rejected() {
        let mut store = open_test_store(vec![]);
        let mut row = Row::new();
        row.insert("idx".to_string(), Value::Integer(0));
        let err = store.insert_many(&[row]).unwrap_err();
        assert!(matches!(err, DbError::MissingValue { .. }));
    }

    #[test]
    fn test_insert_unknown_key_rejected() {
        let mut store = open_test_store(vec![]);
        let mut row = record(0, b"aa", None);
        row.insert("bogus".to_string(), Value::Integer(1));
        let err = store.insert_many(&[row]).unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn { .. }));
    }

    #[test]
    fn test_select_where() {
        let mut store = open_test_store(text_column());
        store
            .insert_many(&[
                record(0, b"aa", Some("zero")),
                record(1, b"bb", Some("one")),
                record(2, b"cc", Some("two")),
            ])
            .unwrap();

        let rows = store
            .select_where(Some("name = 'one'"), &["idx", "name"])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["idx"].as_integer(), Some(1));
        assert_eq!(rows[0]["name"].as_text(), Some("one"));

        let all = store.select_where(None, &["idx"]).unwrap();
        assert_eq!(all.len(), 3);
        // Ordered by idx ascending
        assert_eq!(all[0]["idx"].as_integer(), Some(0));
        assert_eq!(all[2]["idx"].as_integer(), Some(2));
    }

    #[test]
    fn test_select_unknown_column_rejected() {
        let store = open_test_store(vec![]);
        let err = store.select_where(None, &["bogus"]).unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn { .. }));
    }

    #[test]
    fn test_vector_range_scan() {
        let mut store = open_test_store(vec![]);
        store
            .insert_many(&[
                record(0, b"v0", None),
                record(1, b"v1", None),
                record(2, b"v2", None),
            ])
            .unwrap();

        let blobs = store.select_vectors_by_id_range(1, 3).unwrap();
        assert_eq!(blobs, vec![b"v1".to_vec(), b"v2".to_vec()]);
    }

    #[test]
    fn test_sample_one_vector() {
        let mut store = open_test_store(vec![]);
        assert!(store.sample_one_vector().unwrap().is_none());
        store.insert_many(&[record(0, b"v0", None)]).unwrap();
        assert_eq!(store.sample_one_vector().unwrap(), Some(b"v0".to_vec()));
    }

    #[test]
    fn test_first_gap() {
        let mut store = open_test_store(vec![]);
        store
            .insert_many(&[record(0, b"a", None), record(2, b"c", None)])
            .unwrap();
        assert_eq!(store.first_gap_in_range(0, 3).unwrap(), Some(1));
        assert_eq!(store.first_gap_in_range(0, 1).unwrap(), None);
        // Missing tail counts as a gap
        assert_eq!(store.first_gap_in_range(3, 5).unwrap(), Some(3));
    }

    #[test]
    fn test_reflect_existing_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE records (idx INTEGER PRIMARY KEY, vector BLOB NOT NULL, \
             url TEXT, score REAL);
             CREATE UNIQUE INDEX ux_records_url ON records (url);",
        )
        .unwrap();
        let store = RowStore::open(conn, TableConfig::new("records")).unwrap();
        assert!(store.reflected());
        let url = store
            .user_columns()
            .iter()
            .find(|c| c.name == "url")
            .unwrap();
        assert!(url.unique);
        assert_eq!(url.ty, ColumnType::Text);
        assert!(store.has_column("score"));
    }

    #[test]
    fn test_reflect_missing_contract_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE records (idx INTEGER PRIMARY KEY, payload BLOB)")
            .unwrap();
        let err = RowStore::open(conn, TableConfig::new("records")).unwrap_err();
        assert!(matches!(err, DbError::MissingColumn { .. }));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = RowStore::open(conn, TableConfig::new("bad name")).unwrap_err();
        assert!(matches!(err, DbError::InvalidColumnSpec { .. }));
    }
}
