//! Table definitions shared by every dimension variant.

use crate::error::{DimxError, DimxResult};
use crate::row::{NaturalKey, Row, Value};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// Identifier quoting used when statements are rendered to SQL text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quote {
    /// Identifiers are emitted as given.
    #[default]
    None,
    /// The same character on both sides, e.g. `"name"`.
    Char(char),
    /// Distinct opening and closing characters, e.g. `[name]`.
    Pair(char, char),
}

impl Quote {
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Quote::None => ident.to_string(),
            Quote::Char(c) => format!("{c}{ident}{c}"),
            Quote::Pair(open, close) => format!("{open}{ident}{close}"),
        }
    }

    pub fn quote_list<S: AsRef<str>>(&self, idents: &[S]) -> String {
        idents
            .iter()
            .map(|i| self.quote(i.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Name, surrogate key, attributes and natural key of one dimension table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    key: String,
    attributes: Vec<String>,
    lookupatts: Vec<String>,
    /// key followed by attributes
    all: Vec<String>,
    quote: Quote,
}

impl TableSchema {
    /// 스키마 생성 및 검증
    ///
    /// An empty `lookupatts` defaults to all attributes.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        attributes: Vec<String>,
        lookupatts: Vec<String>,
    ) -> DimxResult<Self> {
        let name = name.into();
        let key = key.into();

        if name.is_empty() {
            return Err(DimxError::Configuration("table name is empty".into()));
        }
        if key.is_empty() {
            return Err(DimxError::Configuration(format!(
                "table '{name}' has an empty key attribute"
            )));
        }
        if attributes.is_empty() {
            return Err(DimxError::Configuration(format!(
                "table '{name}' must have at least one attribute"
            )));
        }
        if attributes.contains(&key) {
            return Err(DimxError::Configuration(format!(
                "key '{key}' of table '{name}' must not be listed among its attributes"
            )));
        }
        let mut seen = AHashSet::new();
        for att in &attributes {
            if !seen.insert(att.as_str()) {
                return Err(DimxError::Configuration(format!(
                    "attribute '{att}' is listed twice in table '{name}'"
                )));
            }
        }

        let lookupatts = if lookupatts.is_empty() {
            attributes.clone()
        } else {
            lookupatts
        };
        for att in &lookupatts {
            if *att != key && !attributes.contains(att) {
                return Err(DimxError::Configuration(format!(
                    "lookup attribute '{att}' is not an attribute of table '{name}'"
                )));
            }
        }

        let mut all = Vec::with_capacity(attributes.len() + 1);
        all.push(key.clone());
        all.extend(attributes.iter().cloned());

        Ok(Self {
            name,
            key,
            attributes,
            lookupatts,
            all,
            quote: Quote::None,
        })
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quote = quote;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn lookupatts(&self) -> &[String] {
        &self.lookupatts
    }

    pub fn all(&self) -> &[String] {
        &self.all
    }

    pub fn quote(&self) -> Quote {
        self.quote
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.all.iter().any(|a| a == name)
    }

    pub fn is_lookup_attribute(&self, name: &str) -> bool {
        self.lookupatts.iter().any(|a| a == name)
    }

    /// Natural key of `row`; a missing lookup attribute is a configuration
    /// error.
    pub fn natural_key(&self, row: &Row) -> DimxResult<NaturalKey> {
        self.lookupatts
            .iter()
            .map(|att| {
                row.get(att)
                    .cloned()
                    .ok_or_else(|| DimxError::missing_attribute(&self.name, att))
            })
            .collect()
    }

    pub fn has_lookup_values(&self, row: &Row) -> bool {
        self.lookupatts.iter().all(|att| row.contains(att))
    }

    /// Params row carrying the natural key under the lookup attribute names.
    pub fn lookup_params(&self, nk: &NaturalKey) -> Row {
        self.lookupatts
            .iter()
            .cloned()
            .zip(nk.iter().cloned())
            .collect()
    }

    /// Every attribute of `row`, in table order, without the key.
    pub fn attribute_values(&self, row: &Row) -> DimxResult<Row> {
        self.attributes
            .iter()
            .map(|att| {
                row.get(att)
                    .map(|v| (att.clone(), v.clone()))
                    .ok_or_else(|| DimxError::missing_attribute(&self.name, att))
            })
            .collect()
    }

    /// Full stored row: the key plus every attribute, in table order.
    pub fn stored_row(&self, key: &Value, row: &Row) -> DimxResult<Row> {
        let mut stored = Row::new().with(self.key.clone(), key.clone());
        stored.merge(&self.attribute_values(row)?);
        Ok(stored)
    }

    /// Render a statement with this table's identifier quoting.
    pub fn render(&self, statement: &crate::store::Statement) -> String {
        statement.to_sql(&self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lookupatts_default_to_attributes() {
        let schema = TableSchema::new("book", "bookid", atts(&["name", "genre"]), vec![]).unwrap();
        assert_eq!(schema.lookupatts(), &atts(&["name", "genre"])[..]);
        assert_eq!(schema.all(), &atts(&["bookid", "name", "genre"])[..]);
    }

    #[test]
    fn unknown_lookup_attribute_is_rejected() {
        let err = TableSchema::new("book", "bookid", atts(&["name"]), atts(&["isbn"])).unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));
    }

    #[test]
    fn key_among_attributes_is_rejected() {
        let err =
            TableSchema::new("book", "bookid", atts(&["bookid", "name"]), vec![]).unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));
    }

    #[test]
    fn natural_key_requires_every_lookup_attribute() {
        let schema =
            TableSchema::new("book", "bookid", atts(&["name", "genre"]), atts(&["name"])).unwrap();
        let nk = schema
            .natural_key(&crate::row! { "genre" => "x", "name" => "Sushi" })
            .unwrap();
        assert_eq!(nk.as_slice(), &[Value::from("Sushi")]);
        assert!(schema.natural_key(&crate::row! { "genre" => "x" }).is_err());
    }

    #[test]
    fn quote_styles() {
        assert_eq!(Quote::Char('"').quote("name"), "\"name\"");
        assert_eq!(Quote::Pair('[', ']').quote_list(&["a", "b"]), "[a], [b]");
        assert_eq!(Quote::None.quote("a"), "a");
    }
}
