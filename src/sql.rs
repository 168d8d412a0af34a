use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCategory(Category),
    UpdateCategory { id: Ulid, patch: CategoryPatch },
    DeleteCategory(Ulid),
    SelectCategories { id: Option<Ulid> },
    InsertPet(Pet),
    DeletePet(Ulid),
    SelectPets { id: Option<Ulid>, owner_id: Option<Ulid> },
    InsertRoom(Room),
    UpdateRoom { id: Ulid, patch: RoomPatch },
    SetRoomVisibility { id: Ulid, visible: bool },
    DeleteRoom(Ulid),
    SelectRooms { id: Option<Ulid>, visible: Option<bool> },
    InsertBooking(NewBooking),
    UpdateBooking { id: Ulid, patch: BookingPatch },
    DeleteBooking(Ulid),
    SelectBookings(BookingFilter),
    SelectAvailability { room_id: Ulid, range: StayRange, exclude: Option<Ulid> },
    SelectBlocking { room_id: Ulid, range: StayRange },
    SelectCrossing { room_id: Ulid, range: StayRange },
    SelectAvailableRooms { category_id: Ulid, range: StayRange },
    SelectFreeRanges { room_id: Ulid, window: StayRange },
    SelectFutureBookings { room_id: Ulid },
    Listen(String),
    Unlisten(String),
}

/// Exactly one filter applies per bookings SELECT.
#[derive(Debug, PartialEq)]
pub enum BookingFilter {
    ById(Ulid),
    ByRoom(Ulid),
    ByPet(Ulid),
    ByOwner(Ulid),
    /// Boundary-inclusive: a booking touching the window on either edge is in.
    InWindow(StayRange),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen(channel));
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
        return Ok(Command::Unlisten(channel));
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Canonical column orders for column-list-free inserts.
const CATEGORY_COLUMNS: &[&str] = &["id", "name", "description"];
const PET_COLUMNS: &[&str] = &["id", "name", "species", "owner_id"];
const ROOM_COLUMNS: &[&str] = &["id", "category_id", "number", "area", "description", "visible"];
const BOOKING_COLUMNS: &[&str] = &[
    "id", "kind", "check_in", "check_out", "check_in_time", "check_out_time", "status",
    "stop_reason", "cancel_reason", "price", "amount", "prepayment", "prepaid", "comment",
    "file_url", "room_id", "pet_ids",
];

/// Column → value pairs for one INSERT row, honoring an explicit column list
/// or falling back to the table's canonical order.
struct Row {
    fields: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| expr)
    }

    fn required(&self, table: &'static str, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(table, column))
    }
}

fn insert_row(insert: &ast::Insert, canonical: &[&str]) -> Result<Row, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let values = match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.len() != 1 {
                return Err(SqlError::Parse("expected exactly one VALUES row".into()));
            }
            &values.rows[0]
        }
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };

    let names: Vec<String> = if insert.columns.is_empty() {
        if values.len() > canonical.len() {
            return Err(SqlError::Parse(format!(
                "too many values: expected at most {}, got {}",
                canonical.len(),
                values.len()
            )));
        }
        canonical[..values.len()].iter().map(|s| s.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::Parse(format!(
                "column list has {} names but VALUES has {}",
                insert.columns.len(),
                values.len()
            )));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };

    Ok(Row {
        fields: names.into_iter().zip(values.iter().cloned()).collect(),
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "categories" => {
            let row = insert_row(insert, CATEGORY_COLUMNS)?;
            Ok(Command::InsertCategory(Category {
                id: parse_ulid_expr(row.required("categories", "id")?)?,
                name: parse_string_expr(row.required("categories", "name")?)?,
                description: opt(row.get("description"), parse_string_or_null)?.flatten(),
            }))
        }
        "pets" => {
            let row = insert_row(insert, PET_COLUMNS)?;
            Ok(Command::InsertPet(Pet {
                id: parse_ulid_expr(row.required("pets", "id")?)?,
                name: parse_string_expr(row.required("pets", "name")?)?,
                species: parse_species_expr(row.required("pets", "species")?)?,
                owner_id: opt(row.get("owner_id"), parse_ulid_or_null)?.flatten(),
            }))
        }
        "rooms" => {
            let row = insert_row(insert, ROOM_COLUMNS)?;
            Ok(Command::InsertRoom(Room {
                id: parse_ulid_expr(row.required("rooms", "id")?)?,
                category_id: parse_ulid_expr(row.required("rooms", "category_id")?)?,
                number: parse_string_expr(row.required("rooms", "number")?)?,
                area: opt(row.get("area"), parse_f64_or_null)?.flatten(),
                description: opt(row.get("description"), parse_string_or_null)?.flatten(),
                visible: opt(row.get("visible"), parse_bool_expr)?.unwrap_or(true),
            }))
        }
        "bookings" => {
            let row = insert_row(insert, BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking(NewBooking {
                id: parse_ulid_expr(row.required("bookings", "id")?)?,
                kind: opt(row.get("kind"), parse_kind_expr)?.unwrap_or(BookingKind::Stay),
                range: StayRange {
                    check_in: parse_date_expr(row.required("bookings", "check_in")?)?,
                    check_out: parse_date_expr(row.required("bookings", "check_out")?)?,
                },
                check_in_time: opt(row.get("check_in_time"), parse_time_or_null)?.flatten(),
                check_out_time: opt(row.get("check_out_time"), parse_time_or_null)?.flatten(),
                status: opt(row.get("status"), parse_status_or_null)?.flatten(),
                stop_reason: opt(row.get("stop_reason"), parse_stop_reason_or_null)?.flatten(),
                cancel_reason: opt(row.get("cancel_reason"), parse_string_or_null)?.flatten(),
                price: opt(row.get("price"), parse_i64_expr)?.unwrap_or(0),
                amount: opt(row.get("amount"), parse_i64_expr)?.unwrap_or(0),
                prepayment: opt(row.get("prepayment"), parse_i64_expr)?.unwrap_or(0),
                prepaid: opt(row.get("prepaid"), parse_bool_expr)?.unwrap_or(false),
                comment: opt(row.get("comment"), parse_string_or_null)?.flatten(),
                file_url: opt(row.get("file_url"), parse_string_or_null)?.flatten(),
                room_id: parse_ulid_expr(row.required("bookings", "room_id")?)?,
                pet_ids: parse_pet_ids_expr(row.required("bookings", "pet_ids")?)?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn opt<T>(
    expr: Option<&Expr>,
    f: impl FnOnce(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    expr.map(f).transpose()
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let name = assignment_column(a)?;
        set.push((name, &a.value));
    }

    match table.as_str() {
        "categories" => {
            let mut patch = CategoryPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "name" => patch.name = parse_string_or_null(value)?,
                    "description" => patch.description = parse_string_or_null(value)?,
                    _ => return Err(SqlError::UnknownColumn("categories", col)),
                }
            }
            Ok(Command::UpdateCategory { id, patch })
        }
        "rooms" => {
            // `SET visible = ...` alone is the hide/unhide operation; it has
            // its own guard and cannot be combined with field updates.
            if set.iter().any(|(col, _)| col == "visible") {
                if set.len() != 1 {
                    return Err(SqlError::Unsupported(
                        "visible cannot be combined with other room updates".into(),
                    ));
                }
                let visible = parse_bool_expr(set[0].1)?;
                return Ok(Command::SetRoomVisibility { id, visible });
            }
            let mut patch = RoomPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "category_id" => patch.category_id = parse_ulid_or_null(value)?,
                    "number" => patch.number = parse_string_or_null(value)?,
                    "area" => patch.area = parse_f64_or_null(value)?,
                    "description" => patch.description = parse_string_or_null(value)?,
                    _ => return Err(SqlError::UnknownColumn("rooms", col)),
                }
            }
            Ok(Command::UpdateRoom { id, patch })
        }
        "bookings" => {
            let mut patch = BookingPatch::default();
            for (col, value) in set {
                match col.as_str() {
                    "kind" => patch.kind = parse_kind_or_null(value)?,
                    "check_in" => patch.check_in = parse_date_or_null(value)?,
                    "check_out" => patch.check_out = parse_date_or_null(value)?,
                    "check_in_time" => patch.check_in_time = parse_time_or_null(value)?,
                    "check_out_time" => patch.check_out_time = parse_time_or_null(value)?,
                    "status" => patch.status = parse_status_or_null(value)?,
                    "stop_reason" => patch.stop_reason = parse_stop_reason_or_null(value)?,
                    "cancel_reason" => patch.cancel_reason = parse_string_or_null(value)?,
                    "price" => patch.price = parse_i64_or_null(value)?,
                    "amount" => patch.amount = parse_i64_or_null(value)?,
                    "prepayment" => patch.prepayment = parse_i64_or_null(value)?,
                    "prepaid" => patch.prepaid = parse_bool_or_null(value)?,
                    "comment" => patch.comment = parse_string_or_null(value)?,
                    "file_url" => patch.file_url = parse_string_or_null(value)?,
                    "room_id" => patch.room_id = parse_ulid_or_null(value)?,
                    "pet_ids" => patch.pet_ids = Some(parse_pet_ids_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn("bookings", col)),
                }
            }
            Ok(Command::UpdateBooking { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "categories" => Ok(Command::DeleteCategory(id)),
        "pets" => Ok(Command::DeletePet(id)),
        "rooms" => Ok(Command::DeleteRoom(id)),
        "bookings" => Ok(Command::DeleteBooking(id)),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Equality filters collected from a WHERE clause.
#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    room_id: Option<Ulid>,
    category_id: Option<Ulid>,
    pet_id: Option<Ulid>,
    owner_id: Option<Ulid>,
    exclude: Option<Ulid>,
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
    visible: Option<bool>,
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
        collect_filters(selection, &mut filters)?;
    }
    let range = || -> Result<StayRange, SqlError> {
        Ok(StayRange {
            check_in: filters.check_in.ok_or(SqlError::MissingFilter("check_in"))?,
            check_out: filters.check_out.ok_or(SqlError::MissingFilter("check_out"))?,
        })
    };

    match table.as_str() {
        "categories" => Ok(Command::SelectCategories { id: filters.id }),
        "pets" => Ok(Command::SelectPets { id: filters.id, owner_id: filters.owner_id }),
        "rooms" => Ok(Command::SelectRooms { id: filters.id, visible: filters.visible }),
        "bookings" => {
            let filter = if let Some(id) = filters.id {
                BookingFilter::ById(id)
            } else if let Some(room_id) = filters.room_id {
                BookingFilter::ByRoom(room_id)
            } else if let Some(pet_id) = filters.pet_id {
                BookingFilter::ByPet(pet_id)
            } else if let Some(owner_id) = filters.owner_id {
                BookingFilter::ByOwner(owner_id)
            } else if filters.check_in.is_some() || filters.check_out.is_some() {
                BookingFilter::InWindow(range()?)
            } else {
                return Err(SqlError::MissingFilter("id, room_id, pet_id, owner_id or window"));
            };
            Ok(Command::SelectBookings(filter))
        }
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            range: range()?,
            exclude: filters.exclude,
        }),
        "blocking" => Ok(Command::SelectBlocking {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            range: range()?,
        }),
        "crossing" => Ok(Command::SelectCrossing {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            range: range()?,
        }),
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            category_id: filters.category_id.ok_or(SqlError::MissingFilter("category_id"))?,
            range: range()?,
        }),
        "free_ranges" => Ok(Command::SelectFreeRanges {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            window: range()?,
        }),
        "future_bookings" => Ok(Command::SelectFutureBookings {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                let Some(col) = expr_column_name(left) else {
                    return Ok(());
                };
                match col.as_str() {
                    "id" => filters.id = Some(parse_ulid_expr(right)?),
                    "room_id" => filters.room_id = Some(parse_ulid_expr(right)?),
                    "category_id" => filters.category_id = Some(parse_ulid_expr(right)?),
                    "pet_id" => filters.pet_id = Some(parse_ulid_expr(right)?),
                    "owner_id" => filters.owner_id = Some(parse_ulid_expr(right)?),
                    "exclude" => filters.exclude = Some(parse_ulid_expr(right)?),
                    "check_in" => filters.check_in = Some(parse_date_expr(right)?),
                    "check_out" => filters.check_out = Some(parse_date_expr(right)?),
                    "visible" => filters.visible = Some(parse_bool_expr(right)?),
                    _ => {}
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── AST helpers ───────────────────────────────────────────────

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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

// ── Literal parsers ───────────────────────────────────────────

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid_expr(expr).map(Some)
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string_expr(expr).map(Some)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.parse().map_err(|e| SqlError::Parse(format!("bad integer: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => {
            if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
                Ok(-parse_i64_expr(expr)?)
            } else {
                Err(SqlError::Parse(format!("expected value, got {expr:?}")))
            }
        }
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64_expr(expr).map(Some)
}

fn parse_f64_or_null(expr: &Expr) -> Result<Option<f64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad float: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_bool_expr(expr).map(Some)
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_date_expr(expr).map(Some)
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<NaiveTime>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let s = parse_string_expr(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map(Some)
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

fn parse_kind_expr(expr: &Expr) -> Result<BookingKind, SqlError> {
    let s = parse_string_expr(expr)?;
    BookingKind::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad booking kind: {s}")))
}

fn parse_kind_or_null(expr: &Expr) -> Result<Option<BookingKind>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_kind_expr(expr).map(Some)
}

fn parse_status_or_null(expr: &Expr) -> Result<Option<BookingStatus>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let s = parse_string_expr(expr)?;
    BookingStatus::parse(&s)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("bad booking status: {s}")))
}

fn parse_stop_reason_or_null(expr: &Expr) -> Result<Option<StopReason>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let s = parse_string_expr(expr)?;
    StopReason::parse(&s)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("bad stop reason: {s}")))
}

fn parse_species_expr(expr: &Expr) -> Result<PetSpecies, SqlError> {
    let s = parse_string_expr(expr)?;
    PetSpecies::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad species: {s}")))
}

/// Pet id lists ride in a single string literal: `'id1,id2,id3'`.
fn parse_pet_ids_expr(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    let s = parse_string_expr(expr)?;
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Ulid::from_string(part).map_err(|e| SqlError::Parse(format!("bad ULID: {e}"))))
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} in {t}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing required column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
