use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use futures::{Sink, SinkExt, stream};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};
use ulid::Ulid;

use crate::engine::{
    BookingStats, Engine, EngineError, PropertyView, Quote, ReviewStats, SearchPage, UserView,
};
use crate::model::*;
use crate::notify::{self, channel_name, parse_channel};
use crate::observability;
use crate::pricing;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(StayFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Authentication ───────────────────────────────────────────────

/// Single shared password, checked in cleartext (use TLS off localhost).
#[derive(Debug)]
pub struct StayAuthSource {
    password: String,
}

impl StayAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StayAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Query handling ───────────────────────────────────────────────

/// Per-connection handler. Owns the connection's LISTEN subscriptions.
pub struct StayHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StayQueryParser>,
    listening: Mutex<HashMap<Ulid, broadcast::Receiver<Event>>>,
}

impl StayHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StayQueryParser),
            listening: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and time one statement, then hand over any
    /// notifications that arrived for this connection.
    async fn run<C>(&self, client: &mut C, query: &str, format: &Format) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "parse", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, cmd, format).await;
        let elapsed = started.elapsed();
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(elapsed.as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        tracing::debug!("{label} {status} in {elapsed:?}");

        self.deliver_notifications(client).await?;
        result
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let mut pending = Vec::new();
        {
            let mut listening = self.listening.lock().await;
            for (property_id, rx) in listening.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(event) => pending.push(NotificationResponse::new(
                            0,
                            channel_name(*property_id),
                            notify::payload(&event),
                        )),
                        Err(TryRecvError::Lagged(n)) => {
                            tracing::warn!("listener on {property_id} fell behind, {n} notifications dropped");
                        }
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
            }
        }
        for n in pending {
            client
                .send(PgWireBackendMessage::NotificationResponse(n))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUser(new) => {
                engine.register_user(new).await.map_err(engine_err)?;
                Ok(executed("INSERT", 1))
            }
            Command::UpdateUser { id, patch } => {
                engine.update_user(id, patch).await.map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::InsertProperty(property) => {
                engine.list_property(*property).await.map_err(engine_err)?;
                Ok(executed("INSERT", 1))
            }
            Command::UpdateProperty { id, host_id, patch } => {
                engine
                    .update_property(host_id, id, *patch)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::DeleteProperty { id, host_id } => {
                engine
                    .deactivate_property(host_id, id)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("DELETE", 1))
            }
            Command::InsertBooking(req) => {
                if let Err(e) = engine.create_booking(req).await {
                    if matches!(e, EngineError::Unavailable(_)) {
                        metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                    }
                    return Err(engine_err(e));
                }
                Ok(executed("INSERT", 1))
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .update_booking_status(id, status, None)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::CancelBooking { id, reason } => {
                engine.cancel_booking(id, reason).await.map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::RecordPayment { id } => {
                engine.record_payment(id).await.map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::RescheduleBooking {
                id,
                check_in,
                check_out,
            } => {
                engine
                    .reschedule_booking(id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::InsertReview(new) => {
                engine.post_review(new).await.map_err(engine_err)?;
                Ok(executed("INSERT", 1))
            }
            Command::UpdateReview {
                id,
                reviewer_id,
                rating,
                comment,
            } => {
                engine
                    .edit_review(reviewer_id, id, rating, comment)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("UPDATE", 1))
            }
            Command::DeleteReview { id, reviewer_id } => {
                engine
                    .remove_review(reviewer_id, id)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("DELETE", 1))
            }
            Command::MarkReviewHelpful { id, voter_id } => {
                engine
                    .mark_review_helpful(voter_id, id)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("INSERT", 1))
            }
            Command::ReportReview {
                id,
                reporter_id,
                reason,
            } => {
                engine
                    .report_review(reporter_id, id, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(executed("INSERT", 1))
            }
            Command::SelectUsers { id, email } => {
                let email = email.map(|e| e.trim().to_lowercase());
                let users: Vec<UserView> = engine
                    .list_users()
                    .into_iter()
                    .filter(|v| id.is_none_or(|id| v.user.id == id))
                    .filter(|v| email.as_ref().is_none_or(|e| &v.user.email == e))
                    .collect();
                Ok(query_response(users_schema(), format, users, encode_user))
            }
            Command::SelectProperties { id, host_id } => {
                let views: Vec<PropertyView> = match id {
                    Some(id) => match engine.get_property(id).await {
                        Ok(v) => vec![v],
                        Err(EngineError::NotFound(..)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_properties(host_id).await,
                };
                let views = views
                    .into_iter()
                    .filter(|v| host_id.is_none_or(|h| v.property.host_id == h));
                Ok(query_response(properties_schema(), format, views, encode_property))
            }
            Command::SelectBookings(filter) => {
                let bookings = engine.list_bookings(&filter).await;
                Ok(query_response(bookings_schema(), format, bookings, encode_booking))
            }
            Command::SelectReviews {
                id,
                property_id,
                reviewer_id,
            } => {
                let reviews: Vec<Review> = engine
                    .list_reviews(property_id, reviewer_id)
                    .into_iter()
                    .filter(|r| id.is_none_or(|id| r.id == id))
                    .collect();
                Ok(query_response(reviews_schema(), format, reviews, encode_review))
            }
            Command::SelectAvailability {
                property_id,
                check_in,
                check_out,
                guests,
                exclude,
            } => {
                let mut quote = engine
                    .quote(property_id, check_in, check_out, guests)
                    .await
                    .map_err(engine_err)?;
                if exclude.is_some() {
                    quote.available = engine
                        .is_available(property_id, check_in, check_out, exclude)
                        .await
                        .map_err(engine_err)?;
                }
                Ok(query_response(availability_schema(), format, [quote], encode_quote))
            }
            Command::SelectCalendar {
                property_id,
                start,
                end,
            } => {
                let open = engine
                    .open_dates(property_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let rows = open.into_iter().map(|span| (property_id, span));
                Ok(query_response(calendar_schema(), format, rows, encode_open_dates))
            }
            Command::Search(filter) => {
                let page = engine.search(&filter).await.map_err(engine_err)?;
                Ok(search_response(page, format))
            }
            Command::SelectBookingStats(filter) => {
                let stats = engine.booking_stats(&filter).await;
                Ok(query_response(booking_stats_schema(), format, [stats], encode_booking_stats))
            }
            Command::SelectBookingTrends(filter) => {
                let stats = engine.booking_stats(&filter).await;
                Ok(query_response(booking_trends_schema(), format, stats.monthly, |enc, m| {
                    enc.encode_field(&m.month)?;
                    enc.encode_field(&(m.bookings as i64))?;
                    enc.encode_field(&m.revenue)
                }))
            }
            Command::SelectReviewStats { property_id } => {
                if engine.get_property_state(&property_id).is_none() {
                    return Err(engine_err(EngineError::NotFound("property", property_id)));
                }
                let stats = engine.review_stats(property_id);
                Ok(query_response(
                    review_stats_schema(),
                    format,
                    [(property_id, stats)],
                    encode_review_stats,
                ))
            }
            Command::Listen { channel } => {
                let property_id = parse_channel(&channel).ok_or_else(|| {
                    user_error(
                        "42601",
                        format!("invalid channel: {channel} (expected property_{{id}})"),
                    )
                })?;
                if engine.get_property_state(&property_id).is_none() {
                    return Err(engine_err(EngineError::NotFound("property", property_id)));
                }
                self.listening
                    .lock()
                    .await
                    .entry(property_id)
                    .or_insert_with(|| engine.notify.subscribe(property_id));
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                let mut listening = self.listening.lock().await;
                match channel {
                    None => listening.clear(),
                    Some(channel) => {
                        if let Some(property_id) = parse_channel(&channel) {
                            listening.remove(&property_id);
                        }
                    }
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

fn executed(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Apply the client's requested result formats column by column.
fn formatted(fields: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    fields
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            FieldInfo::new(f.name().to_string(), None, None, f.datatype().clone(), format.format_for(i))
        })
        .collect()
}

/// Instants go out as RFC 3339 UTC text.
fn iso(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    format: &Format,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(formatted(schema, format));
    let rows: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn users_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("first_name", Type::VARCHAR),
        field("last_name", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("is_host", Type::BOOL),
        field("is_verified", Type::BOOL),
        field("joined_at", Type::VARCHAR),
        field("guest_rating", Type::FLOAT8),
        field("guest_review_count", Type::INT8),
    ]
}

fn encode_user(enc: &mut DataRowEncoder, v: UserView) -> PgWireResult<()> {
    let u = &v.user;
    enc.encode_field(&u.id.to_string())?;
    enc.encode_field(&u.email)?;
    enc.encode_field(&u.first_name)?;
    enc.encode_field(&u.last_name)?;
    enc.encode_field(&u.phone)?;
    enc.encode_field(&u.is_host)?;
    enc.encode_field(&u.is_verified)?;
    enc.encode_field(&iso(u.joined_at))?;
    enc.encode_field(&v.guest_rating.average)?;
    enc.encode_field(&i64::from(v.guest_rating.count))
}

fn properties_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("property_type", Type::VARCHAR),
        field("address", Type::VARCHAR),
        field("city", Type::VARCHAR),
        field("state", Type::VARCHAR),
        field("country", Type::VARCHAR),
        field("latitude", Type::FLOAT8),
        field("longitude", Type::FLOAT8),
        field("base_price", Type::INT8),
        field("cleaning_fee", Type::INT8),
        field("service_fee", Type::INT8),
        field("currency", Type::VARCHAR),
        field("guests", Type::INT8),
        field("bedrooms", Type::INT8),
        field("beds", Type::INT8),
        field("bathrooms", Type::FLOAT8),
        field("min_stay", Type::INT8),
        field("max_stay", Type::INT8),
        field("instant_book", Type::BOOL),
        field("amenities", Type::VARCHAR),
        field("house_rules", Type::VARCHAR),
        field("is_active", Type::BOOL),
        field("created_at", Type::VARCHAR),
        field("rating", Type::FLOAT8),
        field("review_count", Type::INT8),
    ]
}

fn encode_property(enc: &mut DataRowEncoder, v: PropertyView) -> PgWireResult<()> {
    let p = &v.property;
    enc.encode_field(&p.id.to_string())?;
    enc.encode_field(&p.host_id.to_string())?;
    enc.encode_field(&p.title)?;
    enc.encode_field(&p.description)?;
    enc.encode_field(&p.kind.as_str())?;
    enc.encode_field(&p.location.address)?;
    enc.encode_field(&p.location.city)?;
    enc.encode_field(&p.location.state)?;
    enc.encode_field(&p.location.country)?;
    enc.encode_field(&p.location.latitude)?;
    enc.encode_field(&p.location.longitude)?;
    enc.encode_field(&p.pricing.base_price)?;
    enc.encode_field(&p.pricing.cleaning_fee)?;
    enc.encode_field(&p.pricing.service_fee)?;
    enc.encode_field(&p.pricing.currency)?;
    enc.encode_field(&i64::from(p.capacity.guests))?;
    enc.encode_field(&i64::from(p.capacity.bedrooms))?;
    enc.encode_field(&i64::from(p.capacity.beds))?;
    enc.encode_field(&p.capacity.bathrooms)?;
    enc.encode_field(&i64::from(p.policy.min_stay))?;
    enc.encode_field(&i64::from(p.policy.max_stay))?;
    enc.encode_field(&p.policy.instant_book)?;
    enc.encode_field(&p.amenities.join(","))?;
    enc.encode_field(&p.house_rules.join(","))?;
    enc.encode_field(&p.is_active)?;
    enc.encode_field(&iso(p.created_at))?;
    enc.encode_field(&v.rating.average)?;
    enc.encode_field(&i64::from(v.rating.count))
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("property_id", Type::VARCHAR),
        field("guest_id", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("nights", Type::INT8),
        field("guests", Type::INT8),
        field("total_price", Type::INT8),
        field("currency", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("payment_status", Type::VARCHAR),
        field("cancellation_reason", Type::VARCHAR),
        field("special_requests", Type::VARCHAR),
        field("created_at", Type::VARCHAR),
    ]
}

fn encode_booking(enc: &mut DataRowEncoder, b: Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.property_id.to_string())?;
    enc.encode_field(&b.guest_id.to_string())?;
    enc.encode_field(&b.host_id.to_string())?;
    enc.encode_field(&iso(b.stay.start))?;
    enc.encode_field(&iso(b.stay.end))?;
    enc.encode_field(&i64::from(pricing::nights(&b.stay)))?;
    enc.encode_field(&i64::from(b.guests))?;
    enc.encode_field(&b.total_price)?;
    enc.encode_field(&b.currency)?;
    enc.encode_field(&b.status.as_str())?;
    enc.encode_field(&b.payment_status.as_str())?;
    enc.encode_field(&b.cancellation_reason)?;
    enc.encode_field(&b.special_requests)?;
    enc.encode_field(&iso(b.created_at))
}

fn reviews_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("booking_id", Type::VARCHAR),
        field("property_id", Type::VARCHAR),
        field("reviewer_id", Type::VARCHAR),
        field("subject_id", Type::VARCHAR),
        field("kind", Type::VARCHAR),
        field("rating", Type::INT8),
        field("comment", Type::VARCHAR),
        field("helpful_votes", Type::INT8),
        field("reported_count", Type::INT8),
        field("created_at", Type::VARCHAR),
    ]
}

fn encode_review(enc: &mut DataRowEncoder, r: Review) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.booking_id.to_string())?;
    enc.encode_field(&r.property_id.to_string())?;
    enc.encode_field(&r.reviewer_id.to_string())?;
    enc.encode_field(&r.subject_id.to_string())?;
    enc.encode_field(&r.kind.as_str())?;
    enc.encode_field(&i64::from(r.rating))?;
    enc.encode_field(&r.comment)?;
    enc.encode_field(&i64::from(r.helpful_votes))?;
    enc.encode_field(&i64::from(r.reported_count))?;
    enc.encode_field(&iso(r.created_at))
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("property_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("nights", Type::INT8),
        field("available", Type::BOOL),
        field("bookable", Type::BOOL),
        field("total_price", Type::INT8),
        field("currency", Type::VARCHAR),
    ]
}

fn encode_quote(enc: &mut DataRowEncoder, q: Quote) -> PgWireResult<()> {
    enc.encode_field(&q.property_id.to_string())?;
    enc.encode_field(&iso(q.stay.start))?;
    enc.encode_field(&iso(q.stay.end))?;
    enc.encode_field(&i64::from(q.nights))?;
    enc.encode_field(&q.available)?;
    enc.encode_field(&(q.available && q.bookable))?;
    enc.encode_field(&q.total_price)?;
    enc.encode_field(&q.currency)
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        field("property_id", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("nights", Type::INT8),
    ]
}

fn encode_open_dates(enc: &mut DataRowEncoder, (property_id, span): (Ulid, Span)) -> PgWireResult<()> {
    enc.encode_field(&property_id.to_string())?;
    enc.encode_field(&iso(span.start))?;
    enc.encode_field(&iso(span.end))?;
    enc.encode_field(&i64::from(pricing::nights(&span)))
}

fn search_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("host_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("property_type", Type::VARCHAR),
        field("city", Type::VARCHAR),
        field("state", Type::VARCHAR),
        field("country", Type::VARCHAR),
        field("base_price", Type::INT8),
        field("currency", Type::VARCHAR),
        field("guests", Type::INT8),
        field("instant_book", Type::BOOL),
        field("amenities", Type::VARCHAR),
        field("rating", Type::FLOAT8),
        field("review_count", Type::INT8),
        field("latitude", Type::FLOAT8),
        field("longitude", Type::FLOAT8),
        field("distance_km", Type::FLOAT8),
        field("total", Type::INT8),
    ]
}

fn search_response(page: SearchPage, format: &Format) -> Response {
    let total = page.total as i64;
    query_response(search_schema(), format, page.hits, |enc, hit| {
        let p = &hit.property;
        enc.encode_field(&p.id.to_string())?;
        enc.encode_field(&p.host_id.to_string())?;
        enc.encode_field(&p.title)?;
        enc.encode_field(&p.kind.as_str())?;
        enc.encode_field(&p.location.city)?;
        enc.encode_field(&p.location.state)?;
        enc.encode_field(&p.location.country)?;
        enc.encode_field(&p.pricing.base_price)?;
        enc.encode_field(&p.pricing.currency)?;
        enc.encode_field(&i64::from(p.capacity.guests))?;
        enc.encode_field(&p.policy.instant_book)?;
        enc.encode_field(&p.amenities.join(","))?;
        enc.encode_field(&hit.rating.average)?;
        enc.encode_field(&i64::from(hit.rating.count))?;
        enc.encode_field(&p.location.latitude)?;
        enc.encode_field(&p.location.longitude)?;
        enc.encode_field(&hit.distance_km)?;
        enc.encode_field(&total)
    })
}

fn booking_stats_schema() -> Vec<FieldInfo> {
    vec![
        field("total_bookings", Type::INT8),
        field("total_revenue", Type::INT8),
        field("paid_revenue", Type::INT8),
        field("pending", Type::INT8),
        field("confirmed", Type::INT8),
        field("cancelled", Type::INT8),
        field("completed", Type::INT8),
        field("average_booking_value", Type::INT8),
        field("cancellation_rate", Type::FLOAT8),
        field("average_nights", Type::FLOAT8),
    ]
}

fn encode_booking_stats(enc: &mut DataRowEncoder, s: BookingStats) -> PgWireResult<()> {
    enc.encode_field(&(s.total_bookings as i64))?;
    enc.encode_field(&s.total_revenue)?;
    enc.encode_field(&s.paid_revenue)?;
    enc.encode_field(&(s.pending as i64))?;
    enc.encode_field(&(s.confirmed as i64))?;
    enc.encode_field(&(s.cancelled as i64))?;
    enc.encode_field(&(s.completed as i64))?;
    enc.encode_field(&s.average_booking_value)?;
    enc.encode_field(&s.cancellation_rate)?;
    enc.encode_field(&s.average_nights)
}

fn booking_trends_schema() -> Vec<FieldInfo> {
    vec![
        field("month", Type::VARCHAR),
        field("bookings", Type::INT8),
        field("revenue", Type::INT8),
    ]
}

fn review_stats_schema() -> Vec<FieldInfo> {
    vec![
        field("property_id", Type::VARCHAR),
        field("total_reviews", Type::INT8),
        field("average_rating", Type::FLOAT8),
        field("one_star", Type::INT8),
        field("two_star", Type::INT8),
        field("three_star", Type::INT8),
        field("four_star", Type::INT8),
        field("five_star", Type::INT8),
    ]
}

fn encode_review_stats(enc: &mut DataRowEncoder, (property_id, s): (Ulid, ReviewStats)) -> PgWireResult<()> {
    enc.encode_field(&property_id.to_string())?;
    enc.encode_field(&(s.total_reviews as i64))?;
    enc.encode_field(&s.average_rating)?;
    for count in s.breakdown {
        enc.encode_field(&(count as i64))?;
    }
    Ok(())
}

/// Table named after FROM in a SELECT, lowercased.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.trim_start().to_lowercase();
    if !lower.starts_with("select") {
        return None;
    }
    let after = lower.split(" from ").nth(1)?;
    let table = after
        .split(|c: char| c.is_whitespace() || c == ';')
        .next()?
        .trim_matches('"');
    Some(table.rsplit('.').next().unwrap_or(table).to_string())
}

/// Row shape a statement will produce, for Describe.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let fields = match select_table(sql).as_deref() {
        Some("users") => users_schema(),
        Some("properties") => properties_schema(),
        Some("bookings") => bookings_schema(),
        Some("reviews") => reviews_schema(),
        Some("availability") => availability_schema(),
        Some("calendar") => calendar_schema(),
        Some("search") => search_schema(),
        Some("booking_stats") => booking_stats_schema(),
        Some("booking_trends") => booking_trends_schema(),
        Some("review_stats") => review_stats_schema(),
        _ => vec![],
    };
    formatted(fields, format)
}

#[async_trait]
impl SimpleQueryHandler for StayHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StayQueryParser;

#[async_trait]
impl QueryParser for StayQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StayHandler {
    type Statement = String;
    type QueryParser = StayQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(client, &sql, &portal.result_column_format).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, &Format::UnifiedText),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Byte ranges and indexes of the `$N` placeholders that sit outside
/// quoted literals and identifiers.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            // A doubled quote closes and immediately reopens.
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace `$1, $2, ...` with bound text-format values, quoted as literals.
/// Single left-to-right pass: bound text is copied out and never rescanned.
/// A placeholder with no bound value stays in place for the parser to reject.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StayFactory {
    handler: Arc<StayHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StayAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StayFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(StayHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                StayAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StayFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) => "P0002",
        EngineError::InvalidRequest(_) => "22023",
        EngineError::Unavailable(_) => "23P01",
        EngineError::AlreadyExists(_) | EngineError::Duplicate(_) => "23505",
        EngineError::IllegalTransition { .. } => "55000",
        EngineError::Forbidden(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
