//! Static validation of AI-generated SQL.
//!
//! A candidate is accepted only when all of these hold, checked in order:
//!
//! 1. It is exactly one read-only `SELECT` statement.
//! 2. It contains no mutating keyword, statement separator, comment,
//!    parameter placeholder, tautological `OR`, set operation (`UNION`,
//!    `INTERSECT`, `EXCEPT`), CTE, derived table, wildcard projection,
//!    row lock or function outside the allowlist.
//! 3. Every table it reads is in the allowlist.
//! 4. Every column it references belongs to an allowlisted column set.
//!    Qualified columns are resolved through table aliases; unqualified ones
//!    must belong to some table in scope or name a projection alias.
//!    JSON path and containment operators (`->`, `->>`, `@>`) are operators,
//!    not columns, and need no allowance.
//!
//! Token-level checks (separators, comments, keywords) run on the raw token
//! stream before parsing; everything else walks the parsed AST. Accepted
//! statements are re-rendered from the AST with a bounded `LIMIT`, so the SQL
//! handed to the datastore is exactly the tree that was checked.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_expressions, BinaryOperator, Expr, Ident, ObjectName, Query, SelectItem, SetExpr,
    Statement, TableFactor, Value, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use tracing::debug;

use crate::allowlist::SchemaAllowlist;
use crate::translator::{QueryMetadata, Translation};

/// Keywords that only appear in statements with side effects.
const MUTATING_KEYWORDS: &[&str] = &[
    "ALTER", "ATTACH", "CALL", "COPY", "CREATE", "DEALLOCATE", "DELETE", "DETACH", "DISCARD",
    "DO", "DROP", "EXECUTE", "GRANT", "INSERT", "INTO", "LISTEN", "LOAD", "LOCK", "MERGE",
    "NOTIFY", "PREPARE", "REFRESH", "REINDEX", "RENAME", "RESET", "REVOKE", "SET", "TRUNCATE",
    "UPDATE", "VACUUM",
];

/// The only schema a table name may be qualified with.
const DEFAULT_SCHEMA: &str = "public";

/// The validation rule a candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionRule {
    /// No candidate was produced.
    Missing,
    /// The candidate could not be tokenized or parsed.
    Syntax,
    NotSingleSelect,
    ForbiddenConstruct,
    TableNotAllowed,
    ColumnNotAllowed,
}

impl RejectionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionRule::Missing => "missing",
            RejectionRule::Syntax => "syntax",
            RejectionRule::NotSingleSelect => "not_single_select",
            RejectionRule::ForbiddenConstruct => "forbidden_construct",
            RejectionRule::TableNotAllowed => "table_not_allowed",
            RejectionRule::ColumnNotAllowed => "column_not_allowed",
        }
    }
}

impl fmt::Display for RejectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate was refused. Never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rule: RejectionRule,
    pub reason: String,
}

impl Rejection {
    pub fn new(rule: RejectionRule, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.reason)
    }
}

/// A statement that passed every rule, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Sanitized SQL, rendered from the validated AST.
    pub sql: String,
    pub tables: BTreeSet<String>,
    /// Referenced columns as `table.column`.
    pub columns: BTreeSet<String>,
    /// Row limit enforced on the outermost query.
    pub row_limit: u64,
    pub confidence: f64,
    pub metadata: QueryMetadata,
}

/// Checks candidates against a [`SchemaAllowlist`].
#[derive(Debug, Clone)]
pub struct QueryValidator {
    allowlist: Arc<SchemaAllowlist>,
    max_rows: u64,
}

impl QueryValidator {
    pub fn new(allowlist: Arc<SchemaAllowlist>, max_rows: u64) -> Self {
        Self {
            allowlist,
            max_rows: max_rows.max(1),
        }
    }

    pub fn allowlist(&self) -> &SchemaAllowlist {
        &self.allowlist
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    /// Validate a translation's candidate and carry its confidence and metadata.
    pub fn validate(&self, translation: &Translation) -> Result<QueryPlan, Rejection> {
        let candidate = translation
            .sql
            .as_deref()
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| Rejection::new(RejectionRule::Missing, "no query was generated"))?;
        let mut plan = self.validate_sql(candidate)?;
        plan.confidence = translation.confidence;
        plan.metadata = translation.metadata.clone();
        Ok(plan)
    }

    /// Validate raw SQL. The returned plan has zero confidence and no metadata.
    pub fn validate_sql(&self, candidate: &str) -> Result<QueryPlan, Rejection> {
        let dialect = PostgreSqlDialect {};

        let tokens = Tokenizer::new(&dialect, candidate)
            .tokenize()
            .map_err(|e| Rejection::new(RejectionRule::Syntax, e.to_string()))?;
        scan_tokens(&tokens)?;

        let mut statements = Parser::parse_sql(&dialect, candidate)
            .map_err(|e| Rejection::new(RejectionRule::Syntax, e.to_string()))?;
        if statements.len() != 1 {
            return Err(Rejection::new(
                RejectionRule::NotSingleSelect,
                format!("expected one statement, found {}", statements.len()),
            ));
        }
        let mut statement = statements.remove(0);
        if !matches!(statement, Statement::Query(_)) {
            return Err(Rejection::new(
                RejectionRule::NotSingleSelect,
                "only SELECT statements are allowed",
            ));
        }

        let mut refs = References::default();
        if let ControlFlow::Break(rejection) = statement.visit(&mut refs) {
            return Err(rejection);
        }
        if let Some(name) = refs
            .functions
            .iter()
            .find(|name| !self.allowlist.allows_function(name))
        {
            return Err(Rejection::new(
                RejectionRule::ForbiddenConstruct,
                format!("function {} is not allowed", name),
            ));
        }

        let scope = self.resolve_tables(&refs)?;
        let columns = self.resolve_columns(&refs, &scope)?;
        let row_limit = clamp_limit(&mut statement, self.max_rows);

        let plan = QueryPlan {
            sql: statement.to_string(),
            tables: scope.tables,
            columns,
            row_limit,
            confidence: 0.0,
            metadata: QueryMetadata::default(),
        };
        debug!(
            subsystem = "search",
            component = "validator",
            op = "validate",
            tables = plan.tables.len(),
            columns = plan.columns.len(),
            row_limit,
            "Query accepted"
        );
        Ok(plan)
    }

    fn resolve_tables(&self, refs: &References) -> Result<Scope, Rejection> {
        let mut scope = Scope::default();
        for table in &refs.tables {
            if !self.allowlist.has_table(&table.name) {
                return Err(Rejection::new(
                    RejectionRule::TableNotAllowed,
                    format!("table {} is not allowed", table.name),
                ));
            }
            scope.tables.insert(table.name.clone());

            let qualifier = table.alias.as_ref().unwrap_or(&table.name);
            match scope.qualifiers.get(qualifier) {
                Some(existing) if existing != &table.name => {
                    return Err(Rejection::new(
                        RejectionRule::ForbiddenConstruct,
                        format!(
                            "{} refers to both {} and {}",
                            qualifier, existing, table.name
                        ),
                    ));
                }
                _ => {
                    scope
                        .qualifiers
                        .insert(qualifier.clone(), table.name.clone());
                }
            }
        }

        if scope.tables.is_empty() {
            return Err(Rejection::new(
                RejectionRule::TableNotAllowed,
                "query reads no allowed table",
            ));
        }
        Ok(scope)
    }

    fn resolve_columns(
        &self,
        refs: &References,
        scope: &Scope,
    ) -> Result<BTreeSet<String>, Rejection> {
        let mut columns = BTreeSet::new();

        for (qualifier, column) in &refs.qualified {
            let table = scope.qualifiers.get(qualifier).ok_or_else(|| {
                Rejection::new(
                    RejectionRule::ColumnNotAllowed,
                    format!("unknown table or alias {}", qualifier),
                )
            })?;
            if !self.allowlist.allows_column(table, column) {
                return Err(Rejection::new(
                    RejectionRule::ColumnNotAllowed,
                    format!("column {}.{} is not allowed", table, column),
                ));
            }
            columns.insert(format!("{}.{}", table, column));
        }

        for column in &refs.unqualified {
            let owners: Vec<&String> = scope
                .tables
                .iter()
                .filter(|table| self.allowlist.allows_column(table, column))
                .collect();
            if owners.is_empty() {
                if refs.projection_aliases.contains(column) {
                    continue;
                }
                return Err(Rejection::new(
                    RejectionRule::ColumnNotAllowed,
                    format!("column {} is not allowed", column),
                ));
            }
            for table in owners {
                columns.insert(format!("{}.{}", table, column));
            }
        }

        Ok(columns)
    }
}

fn scan_tokens(tokens: &[Token]) -> Result<(), Rejection> {
    let forbidden = |reason: String| -> Result<(), Rejection> {
        Err(Rejection::new(RejectionRule::ForbiddenConstruct, reason))
    };
    let mut separator_seen = false;

    for token in tokens {
        match token {
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                return forbidden("comments are not allowed".to_string());
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ if separator_seen => {
                return forbidden("statement separator followed by more input".to_string());
            }
            Token::SemiColon => separator_seen = true,
            Token::Word(word)
                if word.quote_style.is_none()
                    && MUTATING_KEYWORDS.contains(&word.value.to_ascii_uppercase().as_str()) =>
            {
                return forbidden(format!(
                    "keyword {} is not allowed",
                    word.value.to_ascii_uppercase()
                ));
            }
            Token::Placeholder(p) if p.starts_with('$') => {
                return forbidden(format!("placeholder {} is not allowed", p));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Force the outermost row limit to at most `max_rows`. `FETCH FIRST` is
/// folded into `LIMIT`.
fn clamp_limit(statement: &mut Statement, max_rows: u64) -> u64 {
    let Statement::Query(query) = statement else {
        return max_rows;
    };
    let requested = match &query.limit {
        Some(Expr::Value(Value::Number(n, _))) => n.parse::<u64>().ok(),
        _ => None,
    };
    let limit = requested.map_or(max_rows, |n| n.min(max_rows));
    query.fetch = None;
    query.limit = Some(Expr::Value(Value::Number(limit.to_string(), false)));
    limit
}

/// Unquoted identifiers fold to lower case, as PostgreSQL does.
fn normalize(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_ascii_lowercase()
    }
}

fn table_name(name: &ObjectName) -> Option<String> {
    match name.0.as_slice() {
        [table] => Some(normalize(table)),
        [schema, table] if normalize(schema) == DEFAULT_SCHEMA => Some(normalize(table)),
        _ => None,
    }
}

fn is_literal(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(_))
}

/// Conditions that hold for every row, such as `1 = 1` or `'a' <> 'b'`.
fn is_tautology(expr: &Expr) -> bool {
    match expr {
        Expr::Nested(inner) => is_tautology(inner),
        Expr::Value(Value::Boolean(true)) => true,
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq => left == right,
            BinaryOperator::NotEq | BinaryOperator::Gt | BinaryOperator::Lt => {
                is_literal(left) && is_literal(right) && left != right
            }
            BinaryOperator::Or => is_tautology(left) || is_tautology(right),
            _ => false,
        },
        Expr::IsNotNull(inner) => is_literal(inner) && !matches!(**inner, Expr::Value(Value::Null)),
        _ => false,
    }
}

/// Whether `expr` reads any column of the current row.
fn references_column(expr: &Expr) -> bool {
    visit_expressions(expr, |e| match e {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    })
    .is_break()
}

/// An `OR` branch that ignores the row (`NOT FALSE`, `1 IN (1)`) or always
/// holds lets every row through.
fn is_unconditional_branch(expr: &Expr) -> bool {
    is_tautology(expr) || !references_column(expr)
}

struct TableRef {
    name: String,
    alias: Option<String>,
}

#[derive(Default)]
struct Scope {
    tables: BTreeSet<String>,
    /// Alias (or bare table name) to table.
    qualifiers: BTreeMap<String, String>,
}

/// Everything a statement references, gathered in one AST walk.
#[derive(Default)]
struct References {
    tables: Vec<TableRef>,
    qualified: Vec<(String, String)>,
    unqualified: Vec<String>,
    projection_aliases: BTreeSet<String>,
    functions: Vec<String>,
}

fn forbid(reason: impl Into<String>) -> ControlFlow<Rejection> {
    ControlFlow::Break(Rejection::new(RejectionRule::ForbiddenConstruct, reason))
}

impl Visitor for References {
    type Break = Rejection;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Rejection> {
        if query.with.is_some() {
            return forbid("WITH clauses are not allowed");
        }
        if !query.locks.is_empty() {
            return forbid("row locking clauses are not allowed");
        }
        match query.body.as_ref() {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    return forbid("SELECT INTO is not allowed");
                }
                for item in &select.projection {
                    match item {
                        SelectItem::ExprWithAlias { alias, .. } => {
                            self.projection_aliases.insert(normalize(alias));
                        }
                        SelectItem::UnnamedExpr(_) => {}
                        _ => return forbid("wildcard projections are not allowed"),
                    }
                }
            }
            SetExpr::Query(_) => {}
            SetExpr::SetOperation { op, .. } => {
                return forbid(format!("set operation {} is not allowed", op));
            }
            _ => {
                return ControlFlow::Break(Rejection::new(
                    RejectionRule::NotSingleSelect,
                    "only SELECT queries are allowed",
                ));
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Rejection> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return forbid("table functions are not allowed");
                }
                if alias.as_ref().is_some_and(|a| !a.columns.is_empty()) {
                    return forbid("column aliases on tables are not allowed");
                }
                let Some(table) = table_name(name) else {
                    return ControlFlow::Break(Rejection::new(
                        RejectionRule::TableNotAllowed,
                        format!("table {} is not allowed", name),
                    ));
                };
                self.tables.push(TableRef {
                    name: table,
                    alias: alias.as_ref().map(|a| normalize(&a.name)),
                });
                ControlFlow::Continue(())
            }
            TableFactor::NestedJoin { .. } => ControlFlow::Continue(()),
            TableFactor::Derived { .. } => forbid("derived tables are not allowed"),
            _ => forbid("only plain tables may appear in FROM"),
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Rejection> {
        match expr {
            Expr::Identifier(ident) => self.unqualified.push(normalize(ident)),
            Expr::CompoundIdentifier(idents) => match idents.as_slice() {
                [qualifier, column] => self
                    .qualified
                    .push((normalize(qualifier), normalize(column))),
                [schema, table, column] if normalize(schema) == DEFAULT_SCHEMA => self
                    .qualified
                    .push((normalize(table), normalize(column))),
                _ => {
                    return ControlFlow::Break(Rejection::new(
                        RejectionRule::ColumnNotAllowed,
                        format!("unsupported column reference {}", expr),
                    ));
                }
            },
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } if is_unconditional_branch(left) || is_unconditional_branch(right) => {
                return forbid(format!("always-true condition in {}", expr));
            }
            Expr::Function(function) => {
                let name: Vec<String> = function.name.0.iter().map(normalize).collect();
                self.functions.push(name.join("."));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::fallback_listing_sql;

    fn validator() -> QueryValidator {
        QueryValidator::new(Arc::new(SchemaAllowlist::catalog()), 50)
    }

    fn rejected(sql: &str) -> Rejection {
        validator()
            .validate_sql(sql)
            .expect_err("query should be rejected")
    }

    #[test]
    fn test_accepts_simple_select_and_appends_limit() {
        let plan = validator()
            .validate_sql("SELECT name, price FROM products WHERE category = 'serum'")
            .unwrap();
        assert!(plan.sql.ends_with("LIMIT 50"));
        assert_eq!(plan.row_limit, 50);
        assert_eq!(plan.tables, BTreeSet::from(["products".to_string()]));
        assert!(plan.columns.contains("products.price"));
        assert!(plan.columns.contains("products.category"));
    }

    #[test]
    fn test_limit_is_clamped_not_raised() {
        let v = validator();
        let plan = v.validate_sql("SELECT name FROM products LIMIT 500").unwrap();
        assert_eq!(plan.row_limit, 50);
        assert!(plan.sql.ends_with("LIMIT 50"));

        let plan = v.validate_sql("SELECT name FROM products LIMIT 10").unwrap();
        assert_eq!(plan.row_limit, 10);
        assert!(plan.sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_single_trailing_separator_is_dropped() {
        let plan = validator()
            .validate_sql("SELECT name FROM products;")
            .unwrap();
        assert!(!plan.sql.contains(';'));
    }

    #[test]
    fn test_stacked_statement_is_rejected() {
        let r = rejected("SELECT name FROM products; DROP TABLE products");
        assert_eq!(r.rule, RejectionRule::ForbiddenConstruct);
        assert!(r.reason.contains("separator"));
    }

    #[test]
    fn test_comments_are_rejected() {
        assert!(rejected("SELECT name FROM products -- hidden").reason.contains("comments"));
        assert!(rejected("SELECT name /* x */ FROM products").reason.contains("comments"));
    }

    #[test]
    fn test_mutating_statements_are_rejected() {
        for sql in [
            "DELETE FROM products",
            "UPDATE products SET price = 0",
            "INSERT INTO brands (name) VALUES ('x')",
            "SELECT name INTO stolen FROM products",
        ] {
            assert_eq!(rejected(sql).rule, RejectionRule::ForbiddenConstruct, "{}", sql);
        }
    }

    #[test]
    fn test_keywords_inside_strings_are_fine() {
        validator()
            .validate_sql("SELECT name FROM products WHERE description ILIKE '%drop of serum%'")
            .unwrap();
    }

    #[test]
    fn test_union_is_rejected() {
        let r = rejected("SELECT name FROM products UNION SELECT name FROM brands");
        assert_eq!(r.rule, RejectionRule::ForbiddenConstruct);
        assert!(r.reason.contains("UNION"));
    }

    #[test]
    fn test_tautologies_are_rejected() {
        for sql in [
            "SELECT name FROM products WHERE name = 'x' OR 1 = 1",
            "SELECT name FROM products WHERE name = 'x' OR 'a' = 'a'",
            "SELECT name FROM products WHERE name = 'x' OR (2 > 1)",
            "SELECT name FROM products WHERE name = 'x' OR TRUE",
            "SELECT name FROM products WHERE name = 'x' OR NOT FALSE",
            "SELECT name FROM products WHERE name = 'x' OR 1 IN (1)",
            "SELECT name FROM products WHERE name = 'x' OR 'a' LIKE 'a'",
            "SELECT name FROM products WHERE name = 'x' OR 1 BETWEEN 0 AND 2",
        ] {
            assert_eq!(rejected(sql).rule, RejectionRule::ForbiddenConstruct, "{}", sql);
        }
    }

    #[test]
    fn test_ordinary_or_is_accepted() {
        validator()
            .validate_sql("SELECT name FROM products WHERE category = 'serum' OR category = 'toner'")
            .unwrap();
        validator()
            .validate_sql("SELECT name FROM products WHERE price BETWEEN 5 AND 20 OR name LIKE 'Gel%'")
            .unwrap();
    }

    #[test]
    fn test_tables_outside_allowlist_are_rejected() {
        assert_eq!(rejected("SELECT id FROM users").rule, RejectionRule::TableNotAllowed);
        assert_eq!(
            rejected("SELECT tablename FROM pg_catalog.pg_tables").rule,
            RejectionRule::TableNotAllowed
        );
        assert_eq!(
            rejected("SELECT payload FROM ai_cache").rule,
            RejectionRule::TableNotAllowed
        );
    }

    #[test]
    fn test_public_schema_qualifier_is_accepted() {
        let plan = validator()
            .validate_sql("SELECT name FROM public.products")
            .unwrap();
        assert!(plan.tables.contains("products"));
    }

    #[test]
    fn test_aliases_are_resolved() {
        let plan = validator()
            .validate_sql(
                "SELECT p.name, b.name AS brand FROM products p \
                 JOIN brands b ON b.id = p.brand_id WHERE b.country = 'KR'",
            )
            .unwrap();
        assert_eq!(
            plan.tables,
            BTreeSet::from(["brands".to_string(), "products".to_string()])
        );
        for column in ["brands.id", "brands.name", "brands.country", "products.brand_id"] {
            assert!(plan.columns.contains(column), "{}", column);
        }
    }

    #[test]
    fn test_columns_outside_allowlist_are_rejected() {
        let r = rejected("SELECT p.cost_price FROM products p");
        assert_eq!(r.rule, RejectionRule::ColumnNotAllowed);
        assert!(r.reason.contains("products.cost_price"));

        // Column exists, but on a different table.
        assert_eq!(
            rejected("SELECT b.price FROM brands b").rule,
            RejectionRule::ColumnNotAllowed
        );
        assert_eq!(
            rejected("SELECT secret FROM products").rule,
            RejectionRule::ColumnNotAllowed
        );
    }

    #[test]
    fn test_unknown_alias_is_rejected() {
        let r = rejected("SELECT x.name FROM products p");
        assert_eq!(r.rule, RejectionRule::ColumnNotAllowed);
        assert!(r.reason.contains("unknown table or alias x"));
    }

    #[test]
    fn test_projection_alias_may_be_referenced() {
        validator()
            .validate_sql("SELECT price * 2 AS doubled FROM products ORDER BY doubled DESC")
            .unwrap();
    }

    #[test]
    fn test_json_operators_are_allowed() {
        let plan = validator()
            .validate_sql(
                "SELECT name FROM products \
                 WHERE attributes ->> 'spf' = '50' AND attributes @> '{\"vegan\": true}'",
            )
            .unwrap();
        assert!(plan.columns.contains("products.attributes"));
    }

    #[test]
    fn test_array_membership_is_allowed() {
        validator()
            .validate_sql("SELECT name FROM products WHERE 'dry' = ANY(skin_types)")
            .unwrap();
    }

    #[test]
    fn test_functions_must_be_allowlisted() {
        validator()
            .validate_sql("SELECT name FROM products WHERE lower(name) LIKE '%serum%'")
            .unwrap();
        let r = rejected("SELECT pg_sleep(10) FROM products");
        assert!(r.reason.contains("pg_sleep"));
    }

    #[test]
    fn test_subquery_over_allowed_tables_is_accepted() {
        let plan = validator()
            .validate_sql(
                "SELECT p.name FROM products p WHERE p.id IN (\
                 SELECT pi.product_id FROM product_ingredients pi \
                 JOIN ingredients i ON i.id = pi.ingredient_id \
                 WHERE i.name = 'niacinamide')",
            )
            .unwrap();
        assert_eq!(plan.tables.len(), 3);
    }

    #[test]
    fn test_structural_escapes_are_rejected() {
        for sql in [
            "WITH x AS (SELECT name FROM products) SELECT name FROM x",
            "SELECT q.name FROM (SELECT name FROM products) AS q",
            "SELECT * FROM products",
            "SELECT p.* FROM products p",
            "SELECT name FROM products FOR SHARE",
        ] {
            assert_eq!(rejected(sql).rule, RejectionRule::ForbiddenConstruct, "{}", sql);
        }
    }

    #[test]
    fn test_non_select_statements_are_rejected() {
        assert_eq!(rejected("VALUES (1)").rule, RejectionRule::NotSingleSelect);
        assert_eq!(
            rejected("EXPLAIN SELECT name FROM products").rule,
            RejectionRule::NotSingleSelect
        );
        assert_eq!(rejected("").rule, RejectionRule::NotSingleSelect);
    }

    #[test]
    fn test_garbage_is_a_syntax_rejection() {
        assert_eq!(rejected("SELEC name FROM").rule, RejectionRule::Syntax);
        assert_eq!(rejected("SELECT 'unterminated").rule, RejectionRule::Syntax);
    }

    #[test]
    fn test_placeholders_are_rejected() {
        let r = rejected("SELECT name FROM products WHERE id = $1");
        assert!(r.reason.contains("placeholder"));
    }

    #[test]
    fn test_fallback_listing_passes_validation() {
        let plan = validator().validate_sql(&fallback_listing_sql(50)).unwrap();
        assert_eq!(plan.row_limit, 50);
    }

    #[test]
    fn test_validate_requires_a_candidate() {
        let translation = Translation::default();
        let r = validator().validate(&translation).unwrap_err();
        assert_eq!(r.rule, RejectionRule::Missing);
    }

    #[test]
    fn test_validate_carries_translation_fields() {
        let translation = Translation {
            sql: Some("SELECT name FROM products WHERE price <= 30".to_string()),
            confidence: 0.8,
            metadata: QueryMetadata {
                price_max: Some(30.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let plan = validator().validate(&translation).unwrap();
        assert_eq!(plan.confidence, 0.8);
        assert_eq!(plan.metadata.price_max, Some(30.0));
    }
}
