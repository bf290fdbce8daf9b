use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{BookingRequest, NewReview, NewUser, SearchFilter, SortKey, StatsFilter};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser(NewUser),
    UpdateUser {
        id: Ulid,
        patch: UserPatch,
    },
    InsertProperty(Box<Property>),
    UpdateProperty {
        id: Ulid,
        host_id: Ulid,
        patch: Box<PropertyPatch>,
    },
    /// Soft delete.
    DeleteProperty {
        id: Ulid,
        host_id: Ulid,
    },
    InsertBooking(BookingRequest),
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
        reason: Option<String>,
    },
    RecordPayment {
        id: Ulid,
    },
    RescheduleBooking {
        id: Ulid,
        check_in: Ms,
        check_out: Ms,
    },
    InsertReview(NewReview),
    UpdateReview {
        id: Ulid,
        reviewer_id: Ulid,
        rating: Option<u8>,
        comment: Option<String>,
    },
    DeleteReview {
        id: Ulid,
        reviewer_id: Ulid,
    },
    /// `INSERT INTO review_votes (review_id, voter_id)`.
    MarkReviewHelpful {
        id: Ulid,
        voter_id: Ulid,
    },
    /// `INSERT INTO review_reports (review_id, reporter_id[, reason])`.
    ReportReview {
        id: Ulid,
        reporter_id: Ulid,
        reason: Option<String>,
    },
    SelectUsers {
        id: Option<Ulid>,
        email: Option<String>,
    },
    SelectProperties {
        id: Option<Ulid>,
        host_id: Option<Ulid>,
    },
    SelectBookings(BookingFilter),
    SelectReviews {
        id: Option<Ulid>,
        property_id: Option<Ulid>,
        reviewer_id: Option<Ulid>,
    },
    SelectAvailability {
        property_id: Ulid,
        check_in: Ms,
        check_out: Ms,
        guests: Option<u32>,
        exclude: Option<Ulid>,
    },
    SelectCalendar {
        property_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Search(Box<SearchFilter>),
    SelectBookingStats(StatsFilter),
    SelectBookingTrends(StatsFilter),
    SelectReviewStats {
        property_id: Ulid,
    },
    Listen {
        channel: String,
    },
    /// `None` is `UNLISTEN *`.
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN") {
        return Ok(Command::Listen {
            channel: channel_arg(rest)?,
        });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN") {
        let channel = match rest.trim() {
            "*" => None,
            _ => Some(channel_arg(rest)?),
        };
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    let rest = &sql[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace)).then_some(rest)
}

fn channel_arg(rest: &str) -> Result<String, SqlError> {
    let channel = rest.trim().trim_matches('"');
    if channel.is_empty() {
        return Err(SqlError::Parse("missing channel name".into()));
    }
    Ok(channel.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = single_insert_row(insert)?;
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("{table}: column list required")));
    }
    if insert.columns.len() != row.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), row.len()));
    }
    let mut cols = Columns::new(&table);
    for (ident, expr) in insert.columns.iter().zip(row) {
        cols.push(ident.value.to_lowercase(), Op::Eq, expr);
    }

    let cmd = match table.as_str() {
        "users" => Command::InsertUser(NewUser {
            id: ulid(cols.require("id")?)?,
            email: text(cols.require("email")?)?,
            first_name: text(cols.require("first_name")?)?,
            last_name: text(cols.require("last_name")?)?,
            phone: cols.take("phone").map(nullable_text).transpose()?.flatten(),
            is_host: cols.take("is_host").map(boolean).transpose()?.unwrap_or(false),
        }),
        "properties" => Command::InsertProperty(Box::new(property_row(&mut cols)?)),
        "bookings" => Command::InsertBooking(BookingRequest {
            id: ulid(cols.require("id")?)?,
            property_id: ulid(cols.require("property_id")?)?,
            guest_id: ulid(cols.require("guest_id")?)?,
            check_in: instant(cols.require("check_in")?)?,
            check_out: instant(cols.require("check_out")?)?,
            guests: int(cols.require("guests")?)?,
            special_requests: cols
                .take("special_requests")
                .map(nullable_text)
                .transpose()?
                .flatten(),
        }),
        "reviews" => Command::InsertReview(NewReview {
            id: ulid(cols.require("id")?)?,
            booking_id: ulid(cols.require("booking_id")?)?,
            reviewer_id: ulid(cols.require("reviewer_id")?)?,
            rating: int(cols.require("rating")?)?,
            comment: text(cols.require("comment")?)?,
        }),
        "review_votes" => Command::MarkReviewHelpful {
            id: ulid(cols.require("review_id")?)?,
            voter_id: ulid(cols.require("voter_id")?)?,
        },
        "review_reports" => Command::ReportReview {
            id: ulid(cols.require("review_id")?)?,
            reporter_id: ulid(cols.require("reporter_id")?)?,
            reason: cols.take("reason").map(nullable_text).transpose()?.flatten(),
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    cols.finish()?;
    Ok(cmd)
}

fn property_row(cols: &mut Columns<'_>) -> Result<Property, SqlError> {
    Ok(Property {
        id: ulid(cols.require("id")?)?,
        host_id: ulid(cols.require("host_id")?)?,
        title: text(cols.require("title")?)?,
        description: text(cols.require("description")?)?,
        kind: parsed(cols.require("property_type")?)?,
        location: Location {
            address: text(cols.require("address")?)?,
            city: text(cols.require("city")?)?,
            state: text(cols.require("state")?)?,
            country: text(cols.require("country")?)?,
            latitude: cols.take("latitude").map(float).transpose()?.unwrap_or(0.0),
            longitude: cols.take("longitude").map(float).transpose()?.unwrap_or(0.0),
        },
        pricing: Pricing {
            base_price: int(cols.require("base_price")?)?,
            cleaning_fee: int(cols.require("cleaning_fee")?)?,
            service_fee: int(cols.require("service_fee")?)?,
            currency: match cols.take("currency") {
                Some(e) => text(e)?,
                None => "INR".to_string(),
            },
        },
        capacity: Capacity {
            guests: int(cols.require("guests")?)?,
            bedrooms: int(cols.require("bedrooms")?)?,
            beds: int(cols.require("beds")?)?,
            bathrooms: float(cols.require("bathrooms")?)?,
        },
        policy: StayPolicy {
            min_stay: int(cols.require("min_stay")?)?,
            max_stay: int(cols.require("max_stay")?)?,
            instant_book: cols
                .take("instant_book")
                .map(boolean)
                .transpose()?
                .unwrap_or(false),
        },
        amenities: list(cols.require("amenities")?)?,
        house_rules: cols.take("house_rules").map(list).transpose()?.unwrap_or_default(),
        is_active: true,
        created_at: 0,
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut set = Columns::new(&table);
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push(column, Op::Eq, &a.value);
    }
    let mut filter = conditions(&table, selection)?;
    let id = ulid(filter.require("id")?)?;

    let cmd = match table.as_str() {
        "users" => {
            let patch = UserPatch {
                first_name: set.take("first_name").map(text).transpose()?,
                last_name: set.take("last_name").map(text).transpose()?,
                phone: set.take("phone").map(text).transpose()?,
                is_host: set.take("is_host").map(boolean).transpose()?,
                is_verified: set.take("is_verified").map(boolean).transpose()?,
            };
            Command::UpdateUser { id, patch }
        }
        "properties" => {
            let host_id = ulid(filter.require("host_id")?)?;
            let patch = property_patch(&mut set)?;
            Command::UpdateProperty {
                id,
                host_id,
                patch: Box::new(patch),
            }
        }
        "bookings" => booking_update(id, &mut set)?,
        "reviews" => Command::UpdateReview {
            id,
            reviewer_id: ulid(filter.require("reviewer_id")?)?,
            rating: set.take("rating").map(int).transpose()?,
            comment: set.take("comment").map(text).transpose()?,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    set.finish()?;
    filter.finish()?;
    Ok(cmd)
}

fn property_patch(set: &mut Columns<'_>) -> Result<PropertyPatch, SqlError> {
    Ok(PropertyPatch {
        title: set.take("title").map(text).transpose()?,
        description: set.take("description").map(text).transpose()?,
        kind: set.take("property_type").map(parsed).transpose()?,
        address: set.take("address").map(text).transpose()?,
        city: set.take("city").map(text).transpose()?,
        state: set.take("state").map(text).transpose()?,
        country: set.take("country").map(text).transpose()?,
        latitude: set.take("latitude").map(float).transpose()?,
        longitude: set.take("longitude").map(float).transpose()?,
        base_price: set.take("base_price").map(int).transpose()?,
        cleaning_fee: set.take("cleaning_fee").map(int).transpose()?,
        service_fee: set.take("service_fee").map(int).transpose()?,
        currency: set.take("currency").map(text).transpose()?,
        guests: set.take("guests").map(int).transpose()?,
        bedrooms: set.take("bedrooms").map(int).transpose()?,
        beds: set.take("beds").map(int).transpose()?,
        bathrooms: set.take("bathrooms").map(float).transpose()?,
        min_stay: set.take("min_stay").map(int).transpose()?,
        max_stay: set.take("max_stay").map(int).transpose()?,
        instant_book: set.take("instant_book").map(boolean).transpose()?,
        amenities: set.take("amenities").map(list).transpose()?,
        house_rules: set.take("house_rules").map(list).transpose()?,
        is_active: set.take("is_active").map(boolean).transpose()?,
    })
}

/// A booking UPDATE changes exactly one aspect: status, payment or dates.
fn booking_update(id: Ulid, set: &mut Columns<'_>) -> Result<Command, SqlError> {
    let status = set.take("status").map(parsed::<BookingStatus>).transpose()?;
    let reason = set
        .take("cancellation_reason")
        .map(nullable_text)
        .transpose()?
        .flatten();
    let payment = set.take("payment_status").map(parsed::<PaymentStatus>).transpose()?;
    let check_in = set.take("check_in").map(instant).transpose()?;
    let check_out = set.take("check_out").map(instant).transpose()?;

    if reason.is_some() && status != Some(BookingStatus::Cancelled) {
        return Err(SqlError::Unsupported(
            "cancellation_reason is only set when cancelling".into(),
        ));
    }

    match (status, payment, check_in, check_out) {
        (Some(BookingStatus::Cancelled), None, None, None) => Ok(Command::CancelBooking { id, reason }),
        (Some(status), None, None, None) => Ok(Command::UpdateBookingStatus { id, status }),
        (None, Some(PaymentStatus::Paid), None, None) => Ok(Command::RecordPayment { id }),
        (None, Some(other), None, None) => Err(SqlError::Unsupported(format!(
            "payment_status can only be set to paid, not {other}"
        ))),
        (None, None, Some(check_in), Some(check_out)) => Ok(Command::RescheduleBooking {
            id,
            check_in,
            check_out,
        }),
        (None, None, None, None) => Err(SqlError::Parse("bookings: nothing to update".into())),
        _ => Err(SqlError::Unsupported(
            "bookings: set status, payment_status, or check_in and check_out together".into(),
        )),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let mut filter = conditions(&table, delete.selection.as_ref())?;
    let id = ulid(filter.require("id")?)?;

    let cmd = match table.as_str() {
        "properties" => Command::DeleteProperty {
            id,
            host_id: ulid(filter.require("host_id")?)?,
        },
        "bookings" => Command::CancelBooking { id, reason: None },
        "reviews" => Command::DeleteReview {
            id,
            reviewer_id: ulid(filter.require("reviewer_id")?)?,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filter.finish()?;
    Ok(cmd)
}

// ── SELECT ────────────────────────────────────────────────────

/// Every table returns its full row shape; the projection list is not consulted.
fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let mut f = conditions(&table, select.selection.as_ref())?;

    let cmd = match table.as_str() {
        "users" => Command::SelectUsers {
            id: opt_ulid(&mut f, "id")?,
            email: f.take("email").map(text).transpose()?,
        },
        "properties" => Command::SelectProperties {
            id: opt_ulid(&mut f, "id")?,
            host_id: opt_ulid(&mut f, "host_id")?,
        },
        "bookings" => Command::SelectBookings(BookingFilter {
            id: opt_ulid(&mut f, "id")?,
            property_id: opt_ulid(&mut f, "property_id")?,
            guest_id: opt_ulid(&mut f, "guest_id")?,
            host_id: opt_ulid(&mut f, "host_id")?,
            status: f.take("status").map(parsed).transpose()?,
            payment_status: f.take("payment_status").map(parsed).transpose()?,
        }),
        "reviews" => Command::SelectReviews {
            id: opt_ulid(&mut f, "id")?,
            property_id: opt_ulid(&mut f, "property_id")?,
            reviewer_id: opt_ulid(&mut f, "reviewer_id")?,
        },
        "availability" => Command::SelectAvailability {
            property_id: ulid(f.require("property_id")?)?,
            check_in: instant(f.require("check_in")?)?,
            check_out: instant(f.require("check_out")?)?,
            guests: f.take("guests").map(int).transpose()?,
            exclude: opt_ulid(&mut f, "exclude_booking")?,
        },
        "calendar" => Command::SelectCalendar {
            property_id: ulid(f.require("property_id")?)?,
            start: instant(f.require_op("start", Op::GtEq)?)?,
            end: instant(f.require_op("end", Op::LtEq)?)?,
        },
        "search" => Command::Search(Box::new(search_filter(&mut f)?)),
        "booking_stats" => Command::SelectBookingStats(stats_filter(&mut f)?),
        "booking_trends" => Command::SelectBookingTrends(stats_filter(&mut f)?),
        "review_stats" => Command::SelectReviewStats {
            property_id: ulid(f.require("property_id")?)?,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    f.finish()?;
    Ok(cmd)
}

fn opt_ulid(f: &mut Columns<'_>, column: &str) -> Result<Option<Ulid>, SqlError> {
    f.take(column).map(ulid).transpose()
}

/// Coordinates without an explicit sort order rank by distance.
fn search_filter(f: &mut Columns<'_>) -> Result<SearchFilter, SqlError> {
    let latitude = f.take("latitude").map(float).transpose()?;
    let default_sort = if latitude.is_some() {
        SortKey::Distance
    } else {
        SortKey::default()
    };
    Ok(SearchFilter {
        location: f.take("location").map(text).transpose()?,
        guests: f.take("guests").map(int).transpose()?,
        min_price: f.take("min_price").map(int).transpose()?,
        max_price: f.take("max_price").map(int).transpose()?,
        kind: f.take("property_type").map(parsed).transpose()?,
        amenities: f
            .take_all("amenity")
            .into_iter()
            .map(text)
            .collect::<Result<_, _>>()?,
        instant_book: f.take("instant_book").map(boolean).transpose()?,
        min_rating: f.take("min_rating").map(float).transpose()?,
        latitude,
        longitude: f.take("longitude").map(float).transpose()?,
        radius_km: f.take("radius_km").map(float).transpose()?,
        check_in: f.take("check_in").map(instant).transpose()?,
        check_out: f.take("check_out").map(instant).transpose()?,
        sort: f
            .take("sort")
            .map(parsed::<SortKey>)
            .transpose()?
            .unwrap_or(default_sort),
        reverse: f.take("reverse").map(boolean).transpose()?.unwrap_or(false),
        page: f.take("page").map(int).transpose()?.unwrap_or(1),
        page_size: f.take("page_size").map(int).transpose()?.unwrap_or(0),
    })
}

fn stats_filter(f: &mut Columns<'_>) -> Result<StatsFilter, SqlError> {
    Ok(StatsFilter {
        host_id: f.take("host_id").map(ulid).transpose()?,
        property_id: f.take("property_id").map(ulid).transpose()?,
        created_from: f.take_op("created_at", Op::GtEq).map(instant).transpose()?,
        created_to: f.take_op("created_at", Op::LtEq).map(instant).transpose()?,
    })
}

// ── Column/condition collection ───────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

/// Column-to-expression pairs from an INSERT row, SET list or WHERE clause.
/// Every pair must be consumed; leftovers are reported by `finish`.
struct Columns<'a> {
    table: String,
    entries: Vec<(String, Op, &'a Expr)>,
}

impl<'a> Columns<'a> {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            entries: Vec::new(),
        }
    }

    fn push(&mut self, column: String, op: Op, expr: &'a Expr) {
        self.entries.push((column, op, expr));
    }

    fn take_op(&mut self, column: &str, op: Op) -> Option<&'a Expr> {
        let pos = self
            .entries
            .iter()
            .position(|(c, o, _)| c == column && *o == op)?;
        Some(self.entries.remove(pos).2)
    }

    fn take(&mut self, column: &str) -> Option<&'a Expr> {
        self.take_op(column, Op::Eq)
    }

    fn take_all(&mut self, column: &str) -> Vec<&'a Expr> {
        let mut out = Vec::new();
        while let Some(e) = self.take(column) {
            out.push(e);
        }
        out
    }

    fn require_op(&mut self, column: &'static str, op: Op) -> Result<&'a Expr, SqlError> {
        self.take_op(column, op).ok_or(SqlError::Missing(column))
    }

    fn require(&mut self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.require_op(column, Op::Eq)
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.entries.into_iter().next() {
            None => Ok(()),
            Some((column, _, _)) => Err(SqlError::UnknownColumn {
                table: self.table,
                column,
            }),
        }
    }
}

/// Split a WHERE clause into `column <op> value` conjuncts.
fn conditions<'a>(table: &str, selection: Option<&'a Expr>) -> Result<Columns<'a>, SqlError> {
    let mut cols = Columns::new(table);
    if let Some(expr) = selection {
        collect_conditions(expr, &mut cols)?;
    }
    Ok(cols)
}

fn collect_conditions<'a>(expr: &'a Expr, cols: &mut Columns<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_conditions(inner, cols),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conditions(left, cols)?;
            collect_conditions(right, cols)
        }
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Eq => Op::Eq,
                BinaryOperator::GtEq => Op::GtEq,
                BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("condition on {left}")))?;
            cols.push(column, op, right);
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("condition {other}"))),
    }
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn single_insert_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Result<&Value, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Ok(value),
        Expr::Nested(inner) => extract_value(inner),
        _ => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

/// Literal as text: quoted strings and bare numbers.
fn literal(expr: &Expr) -> Result<String, SqlError> {
    if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(format!("-{}", literal(expr)?));
    }
    match extract_value(expr)? {
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) | Value::Number(s, _) => {
            Ok(s.clone())
        }
        Value::Boolean(b) => Ok(b.to_string()),
        other => Err(SqlError::Parse(format!("unexpected literal {other}"))),
    }
}

fn text(expr: &Expr) -> Result<String, SqlError> {
    literal(expr)
}

fn nullable_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Ok(Value::Null) => Ok(None),
        _ => literal(expr).map(Some),
    }
}

fn ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn int<T: TryFrom<i64>>(expr: &Expr) -> Result<T, SqlError> {
    let s = literal(expr)?;
    let v: i64 = s
        .trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("expected integer, got {s}")))?;
    T::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn float(expr: &Expr) -> Result<f64, SqlError> {
    let s = literal(expr)?;
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("expected number, got {s}")))?;
    if !v.is_finite() {
        return Err(SqlError::Parse(format!("expected finite number, got {s}")));
    }
    Ok(v)
}

fn boolean(expr: &Expr) -> Result<bool, SqlError> {
    let s = literal(expr)?;
    match s.to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Ok(true),
        "false" | "f" | "0" | "no" => Ok(false),
        _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
    }
}

fn parsed<T: std::str::FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    literal(expr)?.parse().map_err(SqlError::Parse)
}

/// Comma-separated text, e.g. `'wifi, kitchen'`. Blank items are dropped.
fn list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    Ok(text(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn instant(expr: &Expr) -> Result<Ms, SqlError> {
    parse_instant(&literal(expr)?)
}

/// `YYYY-MM-DD` (UTC midnight), an RFC 3339 timestamp, or Unix milliseconds.
pub fn parse_instant(s: &str) -> Result<Ms, SqlError> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp_millis())
        .map_err(|_| SqlError::Parse(format!("bad date: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn { table: String, column: String },
    /// Column count, value count.
    WrongArity(usize, usize),
    Missing(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn { table, column } => {
                write!(f, "{table}: unexpected column {column}")
            }
            SqlError::WrongArity(columns, values) => {
                write!(f, "{columns} columns but {values} values")
            }
            SqlError::Missing(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
