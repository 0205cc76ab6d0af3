//! SQL statement tree and its textual emitter.
//!
//! Every identifier reaching SQL text is an [`Ident`], which only exists after
//! passing the identifier allow-list. Values never reach the text: they become
//! placeholders numbered in emission order, which keeps each statement's
//! argument list gap-free regardless of how the tree was assembled.

use crate::catalog::types::Value;
use crate::error::EngineError;
use crate::store::Statement;
use compact_str::CompactString;

const MAX_IDENT_LEN: usize = 63;

pub fn is_valid_identifier(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_lowercase() || *b == b'_' => {}
        _ => return false,
    }
    bytes.len() <= MAX_IDENT_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(CompactString);

impl Ident {
    pub fn new(name: &str) -> Result<Self, EngineError> {
        if is_valid_identifier(name) {
            Ok(Self(CompactString::from(name)))
        } else {
            Err(EngineError::Validation(format!(
                "'{name}' is not a valid identifier"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub schema: Ident,
    pub table: Ident,
    pub alias: Option<Ident>,
}

impl TableRef {
    pub fn new(schema: Ident, table: Ident) -> Self {
        Self {
            schema,
            table,
            alias: None,
        }
    }

    pub fn aliased(mut self, alias: Ident) -> Self {
        self.alias = Some(alias);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    ArrayAgg,
    Avg,
    Count,
    JsonAgg,
    StringAgg,
    Max,
    Min,
    Sum,
}

impl AggFunc {
    fn name(self) -> &'static str {
        match self {
            AggFunc::ArrayAgg => "ARRAY_AGG",
            AggFunc::Avg => "AVG",
            AggFunc::Count => "COUNT",
            AggFunc::JsonAgg => "JSON_AGG",
            AggFunc::StringAgg => "STRING_AGG",
            AggFunc::Max => "MAX",
            AggFunc::Min => "MIN",
            AggFunc::Sum => "SUM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
    ILike,
    NotLike,
    NotILike,
    EqAny,
    NeAll,
    Contains,
    ContainedBy,
    Overlaps,
}

impl BinaryOp {
    fn sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::ILike => "ILIKE",
            BinaryOp::NotLike => "NOT LIKE",
            BinaryOp::NotILike => "NOT ILIKE",
            BinaryOp::EqAny => "= ANY",
            BinaryOp::NeAll => "<> ALL",
            BinaryOp::Contains => "@>",
            BinaryOp::ContainedBy => "<@",
            BinaryOp::Overlaps => "&&",
        }
    }

    fn wraps_right(self) -> bool {
        matches!(self, BinaryOp::EqAny | BinaryOp::NeAll)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// `"table"."column"`
    Column { table: Ident, column: Ident },
    /// Unqualified column or output alias.
    Name(Ident),
    Param(Value),
    Null,
    Bool(bool),
    /// Static string literal; only compile-time constants go here.
    Str(&'static str),
    Aggregate {
        func: AggFunc,
        distinct: bool,
        args: Vec<SqlExpr>,
    },
    Cast {
        expr: Box<SqlExpr>,
        ty: &'static str,
    },
    /// Schema-qualified user function, e.g. a policy predicate.
    Function {
        schema: Ident,
        name: Ident,
        args: Vec<SqlExpr>,
    },
    Builtin {
        name: &'static str,
        args: Vec<SqlExpr>,
    },
    Binary {
        left: Box<SqlExpr>,
        op: BinaryOp,
        right: Box<SqlExpr>,
    },
    Concat(Vec<SqlExpr>),
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
    /// Conjunction, parenthesized when more than one term.
    And(Vec<SqlExpr>),
    Subquery(Box<Select>),
}

impl SqlExpr {
    pub fn column(table: &Ident, column: &Ident) -> Self {
        SqlExpr::Column {
            table: table.clone(),
            column: column.clone(),
        }
    }

    pub fn binary(left: SqlExpr, op: BinaryOp, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(left, BinaryOp::Eq, right)
    }

    pub fn aggregate(func: AggFunc, distinct: bool, arg: SqlExpr) -> Self {
        SqlExpr::Aggregate {
            func,
            distinct,
            args: vec![arg],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

/// One element of a flat `WHERE` list. Brackets are kept as counts so that
/// caller-built bracket structures survive unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub connector: Connector,
    pub open: u32,
    pub expr: SqlExpr,
    pub close: u32,
}

impl Condition {
    pub fn and(expr: SqlExpr) -> Self {
        Self {
            connector: Connector::And,
            open: 0,
            expr,
            close: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    /// Terms combined with `AND`.
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub columns: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<Condition>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn from(table: TableRef) -> Self {
        Self {
            columns: Vec::new(),
            from: table,
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn column(mut self, expr: SqlExpr, alias: Option<Ident>) -> Self {
        self.columns.push(SelectItem { expr, alias });
        self
    }

    pub fn filter(mut self, expr: SqlExpr) -> Self {
        self.filters.push(Condition::and(expr));
        self
    }

    pub fn to_statement(&self) -> Statement {
        let mut out = Emitter::default();
        out.select(self);
        out.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: TableRef,
    pub columns: Vec<Ident>,
    pub values: Vec<SqlExpr>,
    pub returning: Option<Ident>,
}

impl Insert {
    pub fn to_statement(&self) -> Statement {
        let mut out = Emitter::default();
        out.push("INSERT INTO ");
        out.table_name(&self.table);
        if self.columns.is_empty() {
            out.push(" DEFAULT VALUES");
        } else {
            out.push(" (");
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push(", ");
                }
                out.ident(column);
            }
            out.push(") VALUES (");
            out.list(&self.values);
            out.push(")");
        }
        if let Some(returning) = &self.returning {
            out.push(" RETURNING ");
            out.ident(returning);
        }
        out.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: TableRef,
    pub assignments: Vec<(Ident, SqlExpr)>,
    /// Terms combined with `AND`.
    pub filters: Vec<SqlExpr>,
}

impl Update {
    pub fn to_statement(&self) -> Statement {
        let mut out = Emitter::default();
        out.push("UPDATE ");
        out.table_ref(&self.table);
        out.push(" SET ");
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.ident(column);
            out.push(" = ");
            out.expr(value);
        }
        out.where_and(&self.filters);
        out.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: TableRef,
    pub filters: Vec<SqlExpr>,
}

impl Delete {
    pub fn to_statement(&self) -> Statement {
        let mut out = Emitter::default();
        out.push("DELETE FROM ");
        out.table_ref(&self.table);
        out.where_and(&self.filters);
        out.finish()
    }
}

#[derive(Default)]
struct Emitter {
    sql: String,
    args: Vec<Value>,
}

impl Emitter {
    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            args: self.args,
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn ident(&mut self, ident: &Ident) {
        self.sql.push('"');
        self.sql.push_str(ident.as_str());
        self.sql.push('"');
    }

    fn table_name(&mut self, table: &TableRef) {
        self.ident(&table.schema);
        self.push(".");
        self.ident(&table.table);
    }

    fn table_ref(&mut self, table: &TableRef) {
        self.table_name(table);
        if let Some(alias) = &table.alias {
            self.push(" AS ");
            self.ident(alias);
        }
    }

    fn param(&mut self, value: &Value) {
        self.args.push(value.clone());
        self.sql.push('$');
        self.sql.push_str(&self.args.len().to_string());
    }

    fn list(&mut self, exprs: &[SqlExpr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(expr);
        }
    }

    fn where_and(&mut self, filters: &[SqlExpr]) {
        for (i, filter) in filters.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            self.expr(filter);
        }
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        for (i, item) in select.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&item.expr);
            if let Some(alias) = &item.alias {
                self.push(" AS ");
                self.ident(alias);
            }
        }
        self.push(" FROM ");
        self.table_ref(&select.from);
        for join in &select.joins {
            self.push(" ");
            self.push(join.kind.sql());
            self.push(" ");
            self.table_ref(&join.table);
            self.push(" ON ");
            if join.on.is_empty() {
                self.push("TRUE");
            }
            for (i, term) in join.on.iter().enumerate() {
                if i > 0 {
                    self.push(" AND ");
                }
                self.expr(term);
            }
        }
        for (i, condition) in select.filters.iter().enumerate() {
            if i == 0 {
                self.push(" WHERE ");
            } else {
                self.push(match condition.connector {
                    Connector::And => " AND ",
                    Connector::Or => " OR ",
                });
            }
            for _ in 0..condition.open {
                self.push("(");
            }
            self.expr(&condition.expr);
            for _ in 0..condition.close {
                self.push(")");
            }
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.list(&select.group_by);
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, item) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&item.expr);
                self.push(if item.ascending {
                    " ASC"
                } else {
                    " DESC NULLS LAST"
                });
            }
        }
        if let Some(limit) = select.limit {
            self.push(" LIMIT ");
            self.push(&limit.to_string());
        }
        if let Some(offset) = select.offset {
            self.push(" OFFSET ");
            self.push(&offset.to_string());
        }
    }

    fn expr(&mut self, expr: &SqlExpr) {
        match expr {
            SqlExpr::Column { table, column } => {
                self.ident(table);
                self.push(".");
                self.ident(column);
            }
            SqlExpr::Name(name) => self.ident(name),
            SqlExpr::Param(value) => self.param(value),
            SqlExpr::Null => self.push("NULL"),
            SqlExpr::Bool(true) => self.push("TRUE"),
            SqlExpr::Bool(false) => self.push("FALSE"),
            SqlExpr::Str(text) => {
                self.push("'");
                self.push(&text.replace('\'', "''"));
                self.push("'");
            }
            SqlExpr::Aggregate {
                func,
                distinct,
                args,
            } => {
                self.push(func.name());
                self.push("(");
                if *distinct {
                    self.push("DISTINCT ");
                }
                self.list(args);
                self.push(")");
            }
            SqlExpr::Cast { expr, ty } => {
                self.expr(expr);
                self.push("::");
                self.push(ty);
            }
            SqlExpr::Function { schema, name, args } => {
                self.ident(schema);
                self.push(".");
                self.ident(name);
                self.push("(");
                self.list(args);
                self.push(")");
            }
            SqlExpr::Builtin { name, args } => {
                self.push(name);
                self.push("(");
                self.list(args);
                self.push(")");
            }
            SqlExpr::Binary { left, op, right } => {
                self.expr(left);
                self.push(" ");
                self.push(op.sql());
                if op.wraps_right() {
                    self.push("(");
                    match right.as_ref() {
                        // ANY/ALL over a row set, not over an array-valued expression
                        SqlExpr::Subquery(select) => self.select(select),
                        other => self.expr(other),
                    }
                    self.push(")");
                } else {
                    self.push(" ");
                    self.expr(right);
                }
            }
            SqlExpr::Concat(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.push(" || ");
                    }
                    self.expr(part);
                }
            }
            SqlExpr::IsNull { expr, negated } => {
                self.expr(expr);
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            SqlExpr::And(terms) => match terms.as_slice() {
                [] => self.push("TRUE"),
                [single] => self.expr(single),
                _ => {
                    self.push("(");
                    for (i, term) in terms.iter().enumerate() {
                        if i > 0 {
                            self.push(" AND ");
                        }
                        self.expr(term);
                    }
                    self.push(")");
                }
            },
            SqlExpr::Subquery(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
            }
        }
    }
}
