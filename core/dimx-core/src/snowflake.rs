//! Snowflaked dimensions: a tree of dimension tables joined by foreign keys.
//!
//! A referencing table holds the key of every table it references as one of
//! its attributes. The root is the table closest to the fact table; every
//! other table is reachable from it through exactly one reference.
//!
//! Ensuring a member fills the tree bottom-up: lookups start at the root,
//! and only where a level misses are the levels it references ensured
//! before it is inserted. Every key resolved on the way is written into the
//! row.

use crate::dimension::Dimension;
use crate::error::{DimxError, DimxResult};
use crate::row::{Row, Value};
use crate::schema::TableSchema;
use ahash::{AHashMap, AHashSet};
use tracing::{debug, instrument};

pub struct SnowflakedDimension {
    tables: Vec<Box<dyn Dimension>>,
    root: usize,
    /// table → tables it references
    children: Vec<Vec<usize>>,
    /// tables by distance from the root
    levels: Vec<Vec<usize>>,
    /// root key followed by the attributes of every table
    all_attributes: Vec<String>,
    expect_bogus_key_values: bool,
}

impl SnowflakedDimension {
    /// `references` lists `(referencing, referenced)` table names. The
    /// referencing table of the first pair is the root.
    ///
    /// With `expect_bogus_key_values` a table that missed its lookup is
    /// looked up once more after the tables it references were ensured,
    /// which tolerates rows carrying foreign keys that did not resolve.
    pub fn new(
        tables: Vec<Box<dyn Dimension>>,
        references: &[(&str, &str)],
        expect_bogus_key_values: bool,
    ) -> DimxResult<Self> {
        let mut index = AHashMap::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            if index.insert(table.name().to_string(), i).is_some() {
                return Err(DimxError::Configuration(format!(
                    "table '{}' takes part in the snowflake twice",
                    table.name()
                )));
            }
        }
        let position = |name: &str| {
            index.get(name).copied().ok_or_else(|| {
                DimxError::Configuration(format!("referenced table '{name}' is not in the snowflake"))
            })
        };

        let &(first, _) = references.first().ok_or_else(|| {
            DimxError::Configuration("a snowflaked dimension needs at least one reference".into())
        })?;
        let root = position(first)?;

        let mut children = vec![Vec::new(); tables.len()];
        let mut referenced = AHashSet::new();
        for &(from, to) in references {
            let (from, to) = (position(from)?, position(to)?);
            if to == root {
                return Err(DimxError::Configuration(format!(
                    "root table '{}' cannot be referenced",
                    tables[root].name()
                )));
            }
            if !referenced.insert(to) {
                return Err(DimxError::Configuration(format!(
                    "table '{}' is referenced more than once",
                    tables[to].name()
                )));
            }
            let fk = tables[to].key();
            if !tables[from].schema().attributes().iter().any(|a| a == fk) {
                return Err(DimxError::Configuration(format!(
                    "table '{}' references '{}' but has no attribute '{fk}'",
                    tables[from].name(),
                    tables[to].name()
                )));
            }
            children[from].push(to);
        }

        // breadth-first from the root; each table is referenced once, so the
        // walk terminates and every table is visited at most once
        let mut levels = vec![vec![root]];
        let mut visited = 1;
        loop {
            let next: Vec<usize> = levels[levels.len() - 1]
                .iter()
                .flat_map(|&t| children[t].iter().copied())
                .collect();
            if next.is_empty() {
                break;
            }
            visited += next.len();
            levels.push(next);
        }
        if visited != tables.len() {
            return Err(DimxError::Configuration(
                "every table of a snowflake must be reachable from its root".into(),
            ));
        }

        let mut all_attributes = vec![tables[root].key().to_string()];
        let mut seen: AHashSet<String> = all_attributes.iter().cloned().collect();
        for table in &tables {
            for att in table.schema().attributes() {
                if !seen.insert(att.clone()) {
                    return Err(DimxError::Configuration(format!(
                        "attribute '{att}' appears in more than one table of the snowflake"
                    )));
                }
                all_attributes.push(att.clone());
            }
        }

        debug!(
            root = %tables[root].name(),
            tables = tables.len(),
            levels = levels.len(),
            "snowflaked dimension ready"
        );
        Ok(Self {
            tables,
            root,
            children,
            levels,
            all_attributes,
            expect_bogus_key_values,
        })
    }

    pub fn root(&self) -> &dyn Dimension {
        self.tables[self.root].as_ref()
    }

    /// Names of the participating tables, root first, level by level.
    pub fn table_names(&self) -> Vec<&str> {
        self.levels
            .iter()
            .flatten()
            .map(|&t| self.tables[t].name())
            .collect()
    }

    pub fn all_attributes(&self) -> &[String] {
        &self.all_attributes
    }

    /// Ensure the member in every table where it is missing. The keys of
    /// every table visited are written into `row`.
    pub fn ensure_row(&mut self, row: &mut Row) -> DimxResult<Value> {
        let mut inserted = false;
        self.ensure_table(self.root, row, &mut inserted)
    }

    /// Like [`ensure_row`](Self::ensure_row) but fails when the member
    /// already exists in every table.
    pub fn insert_row(&mut self, row: &mut Row) -> DimxResult<Value> {
        let mut inserted = false;
        let key = self.ensure_table(self.root, row, &mut inserted)?;
        if !inserted {
            return Err(DimxError::ConstraintViolation(format!(
                "member of '{}' already present; nothing inserted",
                self.tables[self.root].name()
            )));
        }
        Ok(key)
    }

    /// Root row with the rows of every referenced table merged in.
    pub fn get_full_by_key(&mut self, key: &Value) -> DimxResult<Option<Row>> {
        self.expand(self.root, key)
    }

    /// Full rows whose attributes, from any table, equal the given values.
    pub fn get_full_by_vals(&mut self, values: &Row) -> DimxResult<Vec<Row>> {
        if let Some(unknown) = values
            .names()
            .find(|n| !self.all_attributes.iter().any(|a| a == *n))
        {
            return Err(DimxError::Configuration(format!(
                "'{unknown}' is not an attribute of the snowflake rooted at '{}'",
                self.tables[self.root].name()
            )));
        }
        let root_schema = self.tables[self.root].schema();
        let root_values: Row = values
            .iter()
            .filter(|(n, _)| root_schema.has_attribute(n))
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect();
        let root_key = root_schema.key().to_string();

        let candidates = self.tables[self.root].get_by_vals(&root_values)?;
        let mut rows = Vec::new();
        for candidate in candidates {
            let Some(key) = candidate.get(&root_key) else { continue };
            let Some(full) = self.expand(self.root, key)? else { continue };
            if values
                .iter()
                .all(|(n, v)| !v.is_null() && full.get(n) == Some(v))
            {
                rows.push(full);
            }
        }
        Ok(rows)
    }

    fn is_miss(&self, table: usize, key: &Value) -> bool {
        self.tables[table].default_id_value() == Some(key)
    }

    fn lookup_table(&mut self, table: usize, row: &Row) -> DimxResult<Option<Value>> {
        let found = self.tables[table].lookup(row)?;
        Ok(found.filter(|k| !self.is_miss(table, k)))
    }

    fn ensure_table(&mut self, table: usize, row: &mut Row, inserted: &mut bool) -> DimxResult<Value> {
        let key_att = self.tables[table].key().to_string();
        // lookup attributes may include foreign keys not resolved yet
        let retry = !self.tables[table].schema().has_lookup_values(row);
        if !retry {
            if let Some(key) = self.lookup_table(table, row)? {
                row.set(key_att, key.clone());
                return Ok(key);
            }
        }

        for child in self.children[table].clone() {
            self.ensure_table(child, row, inserted)?;
        }

        let found = if retry || self.expect_bogus_key_values {
            self.lookup_table(table, row)?
        } else {
            None
        };
        let key = match found {
            Some(key) => key,
            None => {
                *inserted = true;
                self.tables[table].insert(row)?
            }
        };
        row.set(key_att, key.clone());
        Ok(key)
    }

    fn expand(&mut self, table: usize, key: &Value) -> DimxResult<Option<Row>> {
        let Some(mut row) = self.tables[table].get_by_key(key)? else {
            return Ok(None);
        };
        for child in self.children[table].clone() {
            let fk = self.tables[child].key().to_string();
            let Some(child_key) = row.get(&fk).filter(|v| !v.is_null()).cloned() else {
                continue;
            };
            if let Some(child_row) = self.expand(child, &child_key)? {
                row.merge(&child_row);
            }
        }
        Ok(Some(row))
    }
}

impl Dimension for SnowflakedDimension {
    fn schema(&self) -> &TableSchema {
        self.tables[self.root].schema()
    }

    fn lookup(&mut self, row: &Row) -> DimxResult<Option<Value>> {
        self.tables[self.root].lookup(row)
    }

    fn insert(&mut self, row: &Row) -> DimxResult<Value> {
        let mut row = row.clone();
        self.insert_row(&mut row)
    }

    fn ensure(&mut self, row: &Row) -> DimxResult<Value> {
        let mut row = row.clone();
        self.ensure_row(&mut row)
    }

    /// Root row only; see [`get_full_by_key`](SnowflakedDimension::get_full_by_key).
    fn get_by_key(&mut self, key: &Value) -> DimxResult<Option<Row>> {
        self.tables[self.root].get_by_key(key)
    }

    fn get_by_vals(&mut self, values: &Row) -> DimxResult<Vec<Row>> {
        self.tables[self.root].get_by_vals(values)
    }

    /// Update every table whose key is in `row`, leaves first.
    fn update(&mut self, row: &Row) -> DimxResult<()> {
        for level in self.levels.iter().rev() {
            for &table in level {
                if row.contains(self.tables[table].key()) {
                    self.tables[table].update(row)?;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.tables[self.root].name()))]
    fn end_load(&mut self) -> DimxResult<()> {
        for table in &mut self.tables {
            table.end_load()?;
        }
        Ok(())
    }

    /// Ensure the tables the root references, then let the root add a
    /// version. Only the root may be versioned.
    fn scd_ensure(&mut self, row: &mut Row) -> DimxResult<Value> {
        let mut inserted = false;
        for child in self.children[self.root].clone() {
            self.ensure_table(child, row, &mut inserted)?;
        }
        let key = self.tables[self.root].scd_ensure(row)?;
        row.set(self.tables[self.root].key().to_string(), key.clone());
        Ok(key)
    }

    fn default_id_value(&self) -> Option<&Value> {
        self.tables[self.root].default_id_value()
    }
}

impl std::fmt::Debug for SnowflakedDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakedDimension")
            .field("tables", &self.table_names())
            .field("expect_bogus_key_values", &self.expect_bogus_key_values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::dimension::DimensionTable;
    use crate::row;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn table(
        store: &Arc<MemoryStore>,
        name: &str,
        key: &str,
        atts: &[&str],
        lookup: &[&str],
    ) -> Box<dyn Dimension> {
        Box::new(
            DimensionTable::builder(store.clone(), name, key, atts.iter().copied())
                .lookupatts(lookup.iter().copied())
                .cache(CacheConfig::default())
                .build()
                .unwrap(),
        )
    }

    /// book → author → country
    fn books(store: &Arc<MemoryStore>) -> SnowflakedDimension {
        SnowflakedDimension::new(
            vec![
                table(store, "book", "bookid", &["title", "authorid"], &["title"]),
                table(store, "author", "authorid", &["author", "countryid"], &["author"]),
                table(store, "country", "countryid", &["country"], &["country"]),
            ],
            &[("book", "author"), ("author", "country")],
            false,
        )
        .unwrap()
    }

    #[test]
    fn ensure_fills_every_level_once() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = books(&store);
        let mut first = row! { "title" => "Dune", "author" => "Herbert", "country" => "US" };
        let k1 = dim.ensure_row(&mut first).unwrap();
        assert!(first.contains("authorid") && first.contains("countryid"));

        let mut second = row! { "title" => "Emma", "author" => "Austen", "country" => "UK" };
        dim.ensure_row(&mut second).unwrap();
        let mut again = row! { "title" => "Dune", "author" => "Herbert", "country" => "US" };
        assert_eq!(dim.ensure_row(&mut again).unwrap(), k1);

        assert_eq!(store.row_count("book"), 2);
        assert_eq!(store.row_count("author"), 2);
        assert_eq!(store.row_count("country"), 2);
    }

    #[test]
    fn insert_of_present_member_fails() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = books(&store);
        let r = row! { "title" => "Dune", "author" => "Herbert", "country" => "US" };
        dim.insert(&r).unwrap();
        let err = dim.insert(&r).unwrap_err();
        assert!(matches!(err, DimxError::ConstraintViolation(_)));
    }

    #[test]
    fn full_rows_merge_referenced_tables() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = books(&store);
        let key = dim
            .ensure(&row! { "title" => "Dune", "author" => "Herbert", "country" => "US" })
            .unwrap();
        let full = dim.get_full_by_key(&key).unwrap().unwrap();
        assert_eq!(full.get("country"), Some(&Value::from("US")));
        assert_eq!(full.get("author"), Some(&Value::from("Herbert")));

        let root_only = dim.get_by_key(&key).unwrap().unwrap();
        assert!(!root_only.contains("country"));

        let by_country = dim.get_full_by_vals(&row! { "country" => "US" }).unwrap();
        assert_eq!(by_country.len(), 1);
        assert!(dim.get_full_by_vals(&row! { "country" => "DK" }).unwrap().is_empty());
    }

    #[test]
    fn invalid_trees_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let unreachable = SnowflakedDimension::new(
            vec![
                table(&store, "book", "bookid", &["title", "authorid"], &["title"]),
                table(&store, "author", "authorid", &["author"], &["author"]),
                table(&store, "shelf", "shelfid", &["shelf"], &["shelf"]),
            ],
            &[("book", "author")],
            false,
        );
        assert!(matches!(unreachable, Err(DimxError::Configuration(_))));

        let missing_fk = SnowflakedDimension::new(
            vec![
                table(&store, "book", "bookid", &["title"], &["title"]),
                table(&store, "author", "authorid", &["author"], &["author"]),
            ],
            &[("book", "author")],
            false,
        );
        assert!(matches!(missing_fk, Err(DimxError::Configuration(_))));

        let shared_attribute = SnowflakedDimension::new(
            vec![
                table(&store, "book", "bookid", &["name", "authorid"], &["name"]),
                table(&store, "author", "authorid", &["name"], &["name"]),
            ],
            &[("book", "author")],
            false,
        );
        assert!(matches!(shared_attribute, Err(DimxError::Configuration(_))));
    }

    #[test]
    fn update_reaches_tables_whose_key_is_present() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = books(&store);
        let mut r = row! { "title" => "Dune", "author" => "Herbert", "country" => "US" };
        dim.ensure_row(&mut r).unwrap();
        let countryid = r.get("countryid").cloned().unwrap();
        dim.update(&row! { "countryid" => countryid, "country" => "USA" })
            .unwrap();
        assert_eq!(store.rows("country")[0].get("country"), Some(&Value::from("USA")));
    }
}
