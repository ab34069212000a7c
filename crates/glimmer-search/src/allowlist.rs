//! Tables, columns and functions a generated query may reference.
//!
//! The allowlist is built once at startup and shared read-only; there is no
//! way to add entries after construction.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Read-only description of the queryable schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaAllowlist {
    tables: BTreeMap<String, BTreeSet<String>>,
    functions: BTreeSet<String>,
}

/// Scalar and aggregate functions with no side effects or server access.
const SAFE_FUNCTIONS: &[&str] = &[
    "abs",
    "array_length",
    "avg",
    "cardinality",
    "coalesce",
    "count",
    "current_date",
    "greatest",
    "jsonb_array_length",
    "least",
    "length",
    "lower",
    "max",
    "min",
    "now",
    "nullif",
    "round",
    "sum",
    "trim",
    "upper",
];

impl SchemaAllowlist {
    /// An allowlist with no tables and no functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `table` with exactly `columns`.
    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            table.to_ascii_lowercase(),
            columns.iter().map(|c| c.to_ascii_lowercase()).collect(),
        );
        self
    }

    pub fn with_functions(mut self, functions: &[&str]) -> Self {
        self.functions
            .extend(functions.iter().map(|f| f.to_ascii_lowercase()));
        self
    }

    /// The product catalog: products, brands, ingredients and their link table.
    pub fn catalog() -> Self {
        Self::new()
            .with_table(
                "products",
                &[
                    "id",
                    "name",
                    "brand_id",
                    "category",
                    "description",
                    "price",
                    "rating",
                    "skin_types",
                    "concerns",
                    "attributes",
                    "created_at",
                ],
            )
            .with_table("brands", &["id", "name", "country"])
            .with_table(
                "ingredients",
                &["id", "name", "function", "comedogenic_rating"],
            )
            .with_table(
                "product_ingredients",
                &["product_id", "ingredient_id", "position"],
            )
            .with_functions(SAFE_FUNCTIONS)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn allows_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|columns| columns.contains(column))
    }

    pub fn allows_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.tables.iter().map(|(t, c)| (t.as_str(), c))
    }

    /// Schema summary for the translation prompt, one table per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (table, columns) in &self.tables {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let _ = writeln!(out, "- {}({})", table, columns.join(", "));
        }
        if !self.functions.is_empty() {
            let functions: Vec<&str> = self.functions.iter().map(String::as_str).collect();
            let _ = writeln!(out, "Allowed functions: {}", functions.join(", "));
        }
        out
    }
}

/// Unconditional bounded listing, served whenever a generated query is not used.
pub fn fallback_listing_sql(max_rows: u64) -> String {
    format!(
        "SELECT p.id, p.name, p.category, p.price, p.rating, b.name AS brand \
         FROM products AS p LEFT JOIN brands AS b ON b.id = p.brand_id \
         ORDER BY p.rating DESC NULLS LAST, p.name LIMIT {}",
        max_rows
    )
}
