/// Query Builder Module
///
/// `QueryBuilder` accumulates a SQL statement description by value and
/// compiles it to MySQL-family dialect SQL (backtick-quoted identifiers,
/// positional `?` placeholders) plus a binding list whose order matches
/// the placeholders left to right.
///
/// The builder is a plain owned value: every fluent call consumes and
/// returns it, so ownership is unambiguous and nothing is aliased across
/// threads. `Clone` deep-copies the whole AST and bindings, which is how
/// the derived probes (`exists`, `first`) avoid mutating the original.
///
/// Combinators between WHERE clauses apply each clause's own AND/OR tag
/// left to right with no parenthesized precedence grouping. Mixed AND/OR
/// chains therefore read strictly in construction order; callers needing
/// grouping must use `where_raw`. This is a documented limitation.
use crate::connection::Connection;
use crate::core::{QuarryError, Result};
use crate::result_set::ResultSet;
use crate::value::SqlValue;

/// What kind of statement the builder compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// Combinator tag carried by each WHERE/HAVING clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    fn keyword(self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    fn keyword(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// The nine predicate shapes a WHERE clause can take.
#[derive(Debug, Clone)]
enum PredicateKind {
    Basic { column: String, operator: String },
    Raw { sql: String },
    In { column: String, count: usize },
    NotIn { column: String, count: usize },
    Null { column: String },
    NotNull { column: String },
    Between { column: String },
    NotBetween { column: String },
    SubQuery {
        column: String,
        operator: String,
        builder: Box<QueryBuilder>,
    },
}

#[derive(Debug, Clone)]
struct WhereClause {
    kind: PredicateKind,
    boolean: BoolOp,
}

#[derive(Debug, Clone)]
struct JoinClause {
    kind: &'static str,
    table: String,
    on: String,
}

#[derive(Debug, Clone)]
enum TableSource {
    None,
    Table(String),
    SubQuery {
        builder: Box<QueryBuilder>,
        alias: String,
    },
}

/// An accumulating SQL statement description plus its binding list.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    kind: QueryKind,
    table: TableSource,
    columns: Vec<String>,
    distinct: bool,
    joins: Vec<JoinClause>,
    wheres: Vec<WhereClause>,
    group_by: Vec<String>,
    havings: Vec<WhereClause>,
    orders: Vec<(String, OrderDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    insert_rows: Vec<Vec<(String, SqlValue)>>,
    update_pairs: Vec<(String, SqlValue)>,
    // Bindings are kept per clause family so the assembled list always
    // matches placeholder emission order regardless of call order.
    table_bindings: Vec<SqlValue>,
    where_bindings: Vec<SqlValue>,
    having_bindings: Vec<SqlValue>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::create()
    }
}

impl QueryBuilder {
    pub fn create() -> Self {
        QueryBuilder {
            kind: QueryKind::Select,
            table: TableSource::None,
            columns: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            insert_rows: Vec::new(),
            update_pairs: Vec::new(),
            table_bindings: Vec::new(),
            where_bindings: Vec::new(),
            having_bindings: Vec::new(),
        }
    }

    pub fn table(mut self, name: &str) -> Self {
        self.table = TableSource::Table(name.to_string());
        self
    }

    /// Selects from a sub-query with an alias. The sub-query's bindings
    /// ride along and are emitted before any WHERE bindings; its compile
    /// errors surface from the outer `to_sql`.
    pub fn from_sub_query(mut self, sub: QueryBuilder, alias: &str) -> Self {
        self.table_bindings.extend(sub.bindings());
        self.table = TableSource::SubQuery {
            builder: Box::new(sub),
            alias: alias.to_string(),
        };
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(JoinClause {
            kind: "INNER JOIN",
            table: table.to_string(),
            on: on.to_string(),
        });
        self
    }

    pub fn left_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(JoinClause {
            kind: "LEFT JOIN",
            table: table.to_string(),
            on: on.to_string(),
        });
        self
    }

    pub fn right_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(JoinClause {
            kind: "RIGHT JOIN",
            table: table.to_string(),
            on: on.to_string(),
        });
        self
    }

    fn push_where(mut self, kind: PredicateKind, boolean: BoolOp) -> Self {
        self.wheres.push(WhereClause { kind, boolean });
        self
    }

    /// Adds an AND-combined equality predicate.
    pub fn where_(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.where_op(column, "=", value)
    }

    /// Adds an AND-combined predicate with an explicit operator.
    pub fn where_op(mut self, column: &str, operator: &str, value: impl Into<SqlValue>) -> Self {
        self.where_bindings.push(value.into());
        self.push_where(
            PredicateKind::Basic {
                column: column.to_string(),
                operator: operator.to_string(),
            },
            BoolOp::And,
        )
    }

    pub fn or_where(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.or_where_op(column, "=", value)
    }

    pub fn or_where_op(mut self, column: &str, operator: &str, value: impl Into<SqlValue>) -> Self {
        self.where_bindings.push(value.into());
        self.push_where(
            PredicateKind::Basic {
                column: column.to_string(),
                operator: operator.to_string(),
            },
            BoolOp::Or,
        )
    }

    /// Adds a raw SQL fragment as a predicate, with its own bindings.
    /// Raw fragments are the escape hatch for grouped AND/OR logic.
    pub fn where_raw(mut self, sql: &str, bindings: Vec<SqlValue>) -> Self {
        self.where_bindings.extend(bindings);
        self.push_where(
            PredicateKind::Raw {
                sql: sql.to_string(),
            },
            BoolOp::And,
        )
    }

    pub fn or_where_raw(mut self, sql: &str, bindings: Vec<SqlValue>) -> Self {
        self.where_bindings.extend(bindings);
        self.push_where(
            PredicateKind::Raw {
                sql: sql.to_string(),
            },
            BoolOp::Or,
        )
    }

    pub fn where_in(mut self, column: &str, values: Vec<SqlValue>) -> Self {
        let count = values.len();
        self.where_bindings.extend(values);
        self.push_where(
            PredicateKind::In {
                column: column.to_string(),
                count,
            },
            BoolOp::And,
        )
    }

    pub fn where_not_in(mut self, column: &str, values: Vec<SqlValue>) -> Self {
        let count = values.len();
        self.where_bindings.extend(values);
        self.push_where(
            PredicateKind::NotIn {
                column: column.to_string(),
                count,
            },
            BoolOp::And,
        )
    }

    pub fn where_null(self, column: &str) -> Self {
        let column = column.to_string();
        self.push_where(PredicateKind::Null { column }, BoolOp::And)
    }

    pub fn where_not_null(self, column: &str) -> Self {
        let column = column.to_string();
        self.push_where(PredicateKind::NotNull { column }, BoolOp::And)
    }

    pub fn where_between(
        mut self,
        column: &str,
        low: impl Into<SqlValue>,
        high: impl Into<SqlValue>,
    ) -> Self {
        self.where_bindings.push(low.into());
        self.where_bindings.push(high.into());
        self.push_where(
            PredicateKind::Between {
                column: column.to_string(),
            },
            BoolOp::And,
        )
    }

    pub fn where_not_between(
        mut self,
        column: &str,
        low: impl Into<SqlValue>,
        high: impl Into<SqlValue>,
    ) -> Self {
        self.where_bindings.push(low.into());
        self.where_bindings.push(high.into());
        self.push_where(
            PredicateKind::NotBetween {
                column: column.to_string(),
            },
            BoolOp::And,
        )
    }

    /// Adds a predicate comparing a column against a sub-query, e.g.
    /// `where_sub_query("id", "IN", sub)`. The sub-query compiles when the
    /// outer statement does, so its errors are not swallowed.
    pub fn where_sub_query(mut self, column: &str, operator: &str, sub: QueryBuilder) -> Self {
        self.where_bindings.extend(sub.bindings());
        self.push_where(
            PredicateKind::SubQuery {
                column: column.to_string(),
                operator: operator.to_string(),
                builder: Box::new(sub),
            },
            BoolOp::And,
        )
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Adds an AND-combined HAVING predicate.
    pub fn having(mut self, column: &str, operator: &str, value: impl Into<SqlValue>) -> Self {
        self.having_bindings.push(value.into());
        self.havings.push(WhereClause {
            kind: PredicateKind::Basic {
                column: column.to_string(),
                operator: operator.to_string(),
            },
            boolean: BoolOp::And,
        });
        self
    }

    pub fn having_raw(mut self, sql: &str, bindings: Vec<SqlValue>) -> Self {
        self.having_bindings.extend(bindings);
        self.havings.push(WhereClause {
            kind: PredicateKind::Raw {
                sql: sql.to_string(),
            },
            boolean: BoolOp::And,
        });
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.orders
            .push((column.to_string(), OrderDirection::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.orders
            .push((column.to_string(), OrderDirection::Desc));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Switches to INSERT with one row of ordered column/value pairs.
    /// Binding order follows pair order.
    pub fn insert(mut self, row: Vec<(String, SqlValue)>) -> Self {
        self.kind = QueryKind::Insert;
        self.insert_rows.push(row);
        self
    }

    /// Switches to multi-row INSERT. All rows must share the column set of
    /// the first row; compilation fails otherwise.
    pub fn insert_many(mut self, rows: Vec<Vec<(String, SqlValue)>>) -> Self {
        self.kind = QueryKind::Insert;
        self.insert_rows.extend(rows);
        self
    }

    /// Switches to UPDATE with ordered SET pairs.
    pub fn update(mut self, pairs: Vec<(String, SqlValue)>) -> Self {
        self.kind = QueryKind::Update;
        self.update_pairs = pairs;
        self
    }

    /// Switches to DELETE.
    pub fn delete(mut self) -> Self {
        self.kind = QueryKind::Delete;
        self
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// The complete binding list, in the same left-to-right order as the
    /// `?` placeholders `to_sql` emits.
    pub fn bindings(&self) -> Vec<SqlValue> {
        let mut out = Vec::new();
        match self.kind {
            QueryKind::Select => {
                out.extend(self.table_bindings.iter().cloned());
                out.extend(self.where_bindings.iter().cloned());
                out.extend(self.having_bindings.iter().cloned());
            }
            QueryKind::Insert => {
                for row in &self.insert_rows {
                    out.extend(row.iter().map(|(_, v)| v.clone()));
                }
            }
            QueryKind::Update => {
                out.extend(self.update_pairs.iter().map(|(_, v)| v.clone()));
                out.extend(self.where_bindings.iter().cloned());
            }
            QueryKind::Delete => {
                out.extend(self.where_bindings.iter().cloned());
            }
        }
        out
    }

    /// Compiles the accumulated description to dialect SQL.
    pub fn to_sql(&self) -> Result<String> {
        match self.kind {
            QueryKind::Select => self.compile_select(),
            QueryKind::Insert => self.compile_insert(),
            QueryKind::Update => self.compile_update(),
            QueryKind::Delete => self.compile_delete(),
        }
    }

    fn table_sql(&self) -> Result<String> {
        match &self.table {
            TableSource::Table(name) => Ok(escape_identifier(name)),
            TableSource::SubQuery { builder, alias } => {
                Ok(format!("({}) AS {}", builder.to_sql()?, escape_identifier(alias)))
            }
            TableSource::None => Err(QuarryError::Query(
                "no table set on query builder".to_string(),
            )),
        }
    }

    fn compile_select(&self) -> Result<String> {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<String> = self.columns.iter().map(|c| escape_identifier(c)).collect();
            sql.push_str(&cols.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table_sql()?);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.kind);
            sql.push(' ');
            sql.push_str(&escape_identifier(&join.table));
            sql.push_str(" ON ");
            sql.push_str(&join.on);
        }

        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compile_predicates(&self.wheres)?);
        }

        if !self.group_by.is_empty() {
            let cols: Vec<String> = self.group_by.iter().map(|c| escape_identifier(c)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols.join(", "));
        }

        if !self.havings.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&compile_predicates(&self.havings)?);
        }

        if !self.orders.is_empty() {
            let orders: Vec<String> = self
                .orders
                .iter()
                .map(|(col, dir)| format!("{} {}", escape_identifier(col), dir.keyword()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(sql)
    }

    fn compile_insert(&self) -> Result<String> {
        let first = self
            .insert_rows
            .first()
            .ok_or_else(|| QuarryError::Query("insert requires at least one row".to_string()))?;
        if first.is_empty() {
            return Err(QuarryError::Query(
                "insert row has no columns".to_string(),
            ));
        }

        // The first row fixes the column set.
        let columns: Vec<&String> = first.iter().map(|(c, _)| c).collect();
        for (i, row) in self.insert_rows.iter().enumerate().skip(1) {
            let row_columns: Vec<&String> = row.iter().map(|(c, _)| c).collect();
            if row_columns != columns {
                return Err(QuarryError::Query(format!(
                    "insert row {i} does not match the column set of the first row"
                )));
            }
        }

        let escaped: Vec<String> = columns.iter().map(|c| escape_identifier(c)).collect();
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let all_rows = vec![placeholders; self.insert_rows.len()].join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table_sql()?,
            escaped.join(", "),
            all_rows
        ))
    }

    fn compile_update(&self) -> Result<String> {
        if self.update_pairs.is_empty() {
            return Err(QuarryError::Query(
                "update requires at least one column".to_string(),
            ));
        }
        let sets: Vec<String> = self
            .update_pairs
            .iter()
            .map(|(c, _)| format!("{} = ?", escape_identifier(c)))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table_sql()?, sets.join(", "));
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compile_predicates(&self.wheres)?);
        }
        Ok(sql)
    }

    fn compile_delete(&self) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", self.table_sql()?);
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compile_predicates(&self.wheres)?);
        }
        Ok(sql)
    }

    /// Runs the compiled statement expecting rows back.
    pub fn fetch(&self, conn: &Connection) -> Result<ResultSet> {
        let sql = self.to_sql()?;
        conn.query(&sql, &self.bindings())
    }

    /// Runs the compiled statement expecting an affected-row count.
    pub fn execute(&self, conn: &Connection) -> Result<usize> {
        let sql = self.to_sql()?;
        conn.execute(&sql, &self.bindings())
    }

    /// Probes for any matching row with a `SELECT 1 ... LIMIT 1` derived
    /// from a clone of this builder; the original is untouched.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        let mut probe = self.clone();
        probe.kind = QueryKind::Select;
        probe.columns = vec!["1".to_string()];
        probe.orders.clear();
        probe.limit = Some(1);
        probe.offset = None;
        let rs = probe.fetch(conn)?;
        Ok(!rs.is_empty())
    }

    pub fn doesnt_exist(&self, conn: &Connection) -> Result<bool> {
        Ok(!self.exists(conn)?)
    }

    /// Fetches the first matching row via a cloned `LIMIT 1` query.
    pub fn first(&self, conn: &Connection) -> Result<ResultSet> {
        let mut probe = self.clone();
        probe.limit = Some(1);
        probe.fetch(conn)
    }
}

fn compile_predicates(clauses: &[WhereClause]) -> Result<String> {
    let mut sql = String::new();
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            sql.push(' ');
            sql.push_str(clause.boolean.keyword());
            sql.push(' ');
        }
        sql.push_str(&compile_predicate(&clause.kind)?);
    }
    Ok(sql)
}

fn compile_predicate(kind: &PredicateKind) -> Result<String> {
    let compiled = match kind {
        PredicateKind::Basic { column, operator } => {
            format!("{} {} ?", escape_identifier(column), operator)
        }
        PredicateKind::Raw { sql } => sql.clone(),
        PredicateKind::In { column, count } => {
            if *count == 0 {
                return Err(QuarryError::Query(
                    "IN predicate requires at least one value".to_string(),
                ));
            }
            format!(
                "{} IN ({})",
                escape_identifier(column),
                vec!["?"; *count].join(", ")
            )
        }
        PredicateKind::NotIn { column, count } => {
            if *count == 0 {
                return Err(QuarryError::Query(
                    "NOT IN predicate requires at least one value".to_string(),
                ));
            }
            format!(
                "{} NOT IN ({})",
                escape_identifier(column),
                vec!["?"; *count].join(", ")
            )
        }
        PredicateKind::Null { column } => format!("{} IS NULL", escape_identifier(column)),
        PredicateKind::NotNull { column } => {
            format!("{} IS NOT NULL", escape_identifier(column))
        }
        PredicateKind::Between { column } => {
            format!("{} BETWEEN ? AND ?", escape_identifier(column))
        }
        PredicateKind::NotBetween { column } => {
            format!("{} NOT BETWEEN ? AND ?", escape_identifier(column))
        }
        PredicateKind::SubQuery {
            column,
            operator,
            builder,
        } => format!(
            "{} {} ({})",
            escape_identifier(column),
            operator,
            builder.to_sql()?
        ),
    };
    Ok(compiled)
}

/// Backtick-quotes an identifier, splitting on `.` so `t.col` becomes
/// `` `t`.`col` ``. Raw expressions (anything containing `(`, `*` or a
/// space) and numeric literals pass through unescaped; the heuristic
/// matches how callers write aggregates, aliases and probe columns.
pub fn escape_identifier(identifier: &str) -> String {
    if identifier.contains('(') || identifier.contains('*') || identifier.contains(' ') {
        return identifier.to_string();
    }
    if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
        return identifier.to_string();
    }
    identifier
        .split('.')
        .map(|part| format!("`{}`", part.replace('`', "``")))
        .collect::<Vec<_>>()
        .join(".")
}
