use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms, Role};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    DefineService {
        id: Ulid,
        name: String,
        duration: Ms,
    },
    PublishShift {
        id: Ulid,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
    },
    RevokeShift {
        id: Ulid,
    },
    PublishSlot {
        id: Ulid,
        shift_id: Ulid,
        service_id: Ulid,
        start: Ms,
        end: Ms,
        capacity: u32,
    },
    RevokeSlot {
        id: Ulid,
    },
    Book {
        id: Ulid,
        slot_id: Ulid,
        customer_id: Ulid,
        note: Option<String>,
        actor: Option<Ulid>,
        actor_role: Option<Role>,
    },
    SetStatus {
        id: Ulid,
        status: AppointmentStatus,
        actor: Ulid,
        actor_role: Role,
    },
    SelectSlots {
        staff_id: Ulid,
        service_id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectSlot {
        id: Ulid,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectAppointments {
        customer_id: Ulid,
    },
    SelectHistory {
        appointment_id: Ulid,
    },
    SelectNotices {
        recipient_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "services" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("services", 3, values.len()));
            }
            Ok(Command::DefineService {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                duration: parse_i64(&values[2])?,
            })
        }
        "shifts" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("shifts", 4, values.len()));
            }
            let (start, end) = (parse_i64(&values[2])?, parse_i64(&values[3])?);
            if start >= end {
                return Err(SqlError::Parse("start must precede end".into()));
            }
            Ok(Command::PublishShift {
                id: parse_ulid(&values[0])?,
                staff_id: parse_ulid(&values[1])?,
                start,
                end,
            })
        }
        "slots" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("slots", 5, values.len()));
            }
            let (start, end) = (parse_i64(&values[3])?, parse_i64(&values[4])?);
            if start >= end {
                return Err(SqlError::Parse("start must precede end".into()));
            }
            let capacity = if values.len() >= 6 {
                parse_u32(&values[5])?
            } else {
                1
            };
            Ok(Command::PublishSlot {
                id: parse_ulid(&values[0])?,
                shift_id: parse_ulid(&values[1])?,
                service_id: parse_ulid(&values[2])?,
                start,
                end,
                capacity,
            })
        }
        "appointments" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("appointments", 3, values.len()));
            }
            let note = if values.len() >= 4 {
                parse_string_or_null(&values[3])?
            } else {
                None
            };
            let (actor, actor_role) = match values.len() {
                0..=4 => (None, None),
                5 => return Err(SqlError::WrongArity("appointments", 6, 5)),
                _ => (
                    Some(parse_ulid(&values[4])?),
                    Some(parse_role(&values[5])?),
                ),
            };
            Ok(Command::Book {
                id: parse_ulid(&values[0])?,
                slot_id: parse_ulid(&values[1])?,
                customer_id: parse_ulid(&values[2])?,
                note,
                actor,
                actor_role,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "shifts" => {
            let id = extract_where_id(&delete.selection)?;
            Ok(Command::RevokeShift { id })
        }
        "slots" => Err(SqlError::Unsupported(
            "slots are revoked, not deleted: UPDATE slots SET active = false".into(),
        )),
        "appointments" => Err(SqlError::Unsupported(
            "appointments are canceled, not deleted: UPDATE appointments SET status = 'canceled'".into(),
        )),
        "history" => Err(SqlError::Unsupported("history is append-only".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "slots" => {
            for a in assignments {
                let col = assignment_column(a).ok_or_else(|| {
                    SqlError::Parse("unsupported assignment target".into())
                })?;
                if col != "active" {
                    return Err(SqlError::Unsupported(format!(
                        "only `active` may be updated on slots, not `{col}`"
                    )));
                }
                if parse_bool(&a.value)? {
                    return Err(SqlError::Unsupported(
                        "slots cannot be re-activated".into(),
                    ));
                }
            }
            Ok(Command::RevokeSlot { id })
        }
        "appointments" => {
            let (mut status, mut actor, mut actor_role) = (None, None, None);
            for a in assignments {
                let col = assignment_column(a).ok_or_else(|| {
                    SqlError::Parse("unsupported assignment target".into())
                })?;
                match col.as_str() {
                    "status" => status = Some(parse_status(&a.value)?),
                    "actor" => actor = Some(parse_ulid(&a.value)?),
                    "actor_role" => actor_role = Some(parse_role(&a.value)?),
                    other => {
                        return Err(SqlError::Unsupported(format!(
                            "appointments column `{other}` is immutable"
                        )));
                    }
                }
            }
            Ok(Command::SetStatus {
                id,
                status: status.ok_or(SqlError::MissingFilter("status"))?,
                actor: actor.ok_or(SqlError::MissingFilter("actor"))?,
                actor_role: actor_role.ok_or(SqlError::MissingFilter("actor_role"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "slots" => {
            if let Some(id) = filters.id {
                return Ok(Command::SelectSlot { id });
            }
            let start = filters.start.ok_or(SqlError::MissingFilter("start"))?;
            let end = filters.end.ok_or(SqlError::MissingFilter("end"))?;
            if start >= end {
                return Err(SqlError::Parse("start must precede end".into()));
            }
            Ok(Command::SelectSlots {
                staff_id: filters.staff_id.ok_or(SqlError::MissingFilter("staff_id"))?,
                service_id: filters
                    .service_id
                    .ok_or(SqlError::MissingFilter("service_id"))?,
                start,
                end,
            })
        }
        "appointments" => {
            if let Some(id) = filters.id {
                return Ok(Command::SelectAppointment { id });
            }
            Ok(Command::SelectAppointments {
                customer_id: filters
                    .customer_id
                    .ok_or(SqlError::MissingFilter("customer_id"))?,
            })
        }
        "history" => Ok(Command::SelectHistory {
            appointment_id: filters
                .appointment_id
                .ok_or(SqlError::MissingFilter("appointment_id"))?,
        }),
        "notices" => Ok(Command::SelectNotices {
            recipient_id: filters
                .recipient_id
                .ok_or(SqlError::MissingFilter("recipient_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    staff_id: Option<Ulid>,
    service_id: Option<Ulid>,
    customer_id: Option<Ulid>,
    appointment_id: Option<Ulid>,
    recipient_id: Option<Ulid>,
    start: Option<Ms>,
    end: Option<Ms>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                match col.as_deref() {
                    Some("id") => filters.id = Some(parse_ulid(right)?),
                    Some("staff_id") => filters.staff_id = Some(parse_ulid(right)?),
                    Some("service_id") => filters.service_id = Some(parse_ulid(right)?),
                    Some("customer_id") => filters.customer_id = Some(parse_ulid(right)?),
                    Some("appointment_id") => filters.appointment_id = Some(parse_ulid(right)?),
                    Some("recipient_id") => filters.recipient_id = Some(parse_ulid(right)?),
                    _ => {}
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        ast::AssignmentTarget::Tuple(_) => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_status(expr: &Expr) -> Result<AppointmentStatus, SqlError> {
    let s = parse_string(expr)?;
    AppointmentStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_string(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
