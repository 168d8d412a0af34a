use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::KennelAuthSource;
use crate::engine::{Engine, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command};
use crate::tenant::TenantManager;

pub struct KennelHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<KennelQueryParser>,
}

impl KennelHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(KennelQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run_command(
        &self,
        engine: &Engine,
        tenant: &str,
        user: &str,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let mutation = is_mutation(&cmd);
        metrics::counter!(observability::COMMANDS_TOTAL, "command" => label).increment(1);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::counter!(observability::COMMAND_ERRORS_TOTAL, "command" => label).increment(1);
        }
        if mutation {
            match &result {
                Ok(_) => tracing::info!(tenant, user, command = label, "mutation applied"),
                Err(e) => {
                    tracing::warn!(tenant, user, command = label, error = %e, "mutation rejected")
                }
            }
        }
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertCategory(category) => {
                engine.create_category(category).await.map_err(engine_err)?;
                Ok(vec![insert_tag(1)])
            }
            Command::UpdateCategory { id, patch } => {
                engine.update_category(id, patch).await.map_err(engine_err)?;
                Ok(vec![update_tag(1)])
            }
            Command::DeleteCategory(id) => {
                engine.delete_category(id).await.map_err(engine_err)?;
                Ok(vec![delete_tag(1)])
            }
            Command::SelectCategories { id } => {
                let categories = match id {
                    Some(id) => vec![engine.get_category(&id).map_err(engine_err)?],
                    None => engine.list_categories(),
                };
                Ok(vec![category_rows(categories)?])
            }
            Command::InsertPet(pet) => {
                engine.register_pet(pet).await.map_err(engine_err)?;
                Ok(vec![insert_tag(1)])
            }
            Command::DeletePet(id) => {
                engine.remove_pet(id).await.map_err(engine_err)?;
                Ok(vec![delete_tag(1)])
            }
            Command::SelectPets { id, owner_id } => {
                let pets = match (id, owner_id) {
                    (Some(id), _) => vec![engine.get_pet(&id).map_err(engine_err)?],
                    (None, Some(owner)) => {
                        engine.list_pets_for_owner(&owner).map_err(engine_err)?
                    }
                    (None, None) => engine.list_pets(),
                };
                Ok(vec![pet_rows(pets)?])
            }
            Command::InsertRoom(room) => {
                engine.create_room(room).await.map_err(engine_err)?;
                Ok(vec![insert_tag(1)])
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(vec![update_tag(1)])
            }
            Command::SetRoomVisibility { id, visible } => {
                engine.set_room_visibility(id, visible).await.map_err(engine_err)?;
                Ok(vec![update_tag(1)])
            }
            Command::DeleteRoom(id) => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(vec![delete_tag(1)])
            }
            Command::SelectRooms { id, visible } => {
                let rooms = match id {
                    Some(id) => vec![engine.get_room(&id).await.map_err(engine_err)?],
                    None => engine.list_rooms(visible).await,
                };
                Ok(vec![room_rows(rooms)?])
            }
            Command::InsertBooking(new) => {
                engine.create_booking(new).await.map_err(engine_err)?;
                Ok(vec![insert_tag(1)])
            }
            Command::UpdateBooking { id, patch } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                Ok(vec![update_tag(1)])
            }
            Command::DeleteBooking(id) => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(vec![delete_tag(1)])
            }
            Command::SelectBookings(filter) => {
                let bookings = match filter {
                    BookingFilter::ById(id) => {
                        vec![engine.get_booking(&id).await.map_err(engine_err)?]
                    }
                    BookingFilter::ByRoom(room_id) => {
                        engine.list_bookings_for_room(&room_id).await.map_err(engine_err)?
                    }
                    BookingFilter::ByPet(pet_id) => {
                        engine.list_bookings_for_pet(&pet_id).await.map_err(engine_err)?
                    }
                    BookingFilter::ByOwner(owner_id) => {
                        engine.list_bookings_for_owner(&owner_id).await.map_err(engine_err)?
                    }
                    BookingFilter::InWindow(window) => {
                        engine.list_bookings_in_window(&window).await.map_err(engine_err)?
                    }
                };
                Ok(vec![booking_rows(bookings)?])
            }
            Command::SelectAvailability { room_id, range, exclude } => {
                // One row when the range is free; a blocked range surfaces as
                // the engine's Conflict error, not a flag.
                engine
                    .check_available(&room_id, &range, exclude)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&true)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBlocking { room_id, range } => {
                let bookings = engine
                    .list_blocking(&room_id, &range)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(bookings)?])
            }
            Command::SelectCrossing { room_id, range } => {
                let bookings = engine
                    .list_crossing(&room_id, &range)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(bookings)?])
            }
            Command::SelectAvailableRooms { category_id, range } => {
                let rooms = engine
                    .list_available_rooms(&category_id, &range)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![room_rows(rooms)?])
            }
            Command::SelectFreeRanges { room_id, window } => {
                let ranges = engine
                    .list_free_ranges(&room_id, &window)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(free_range_schema());
                let rid = room_id.to_string();
                let rows: Vec<PgWireResult<_>> = ranges
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid)?;
                        encoder.encode_field(&r.check_in.to_string())?;
                        encoder.encode_field(&r.check_out.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectFutureBookings { room_id } => {
                let bookings = engine
                    .list_future_bookings(&room_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(bookings)?])
            }
            Command::Listen(channel) => {
                parse_room_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten(channel) => {
                parse_room_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

fn insert_tag(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn update_tag(rows: usize) -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(rows))
}

fn delete_tag(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

fn parse_room_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel.strip_prefix("room_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected room_{{id}})"),
        )))
    })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

// ── Row schemas ──────────────────────────────────────────────────

/// Tenant and login user from the connection metadata, for mutation logging.
fn caller_identity<C: ClientInfo>(client: &C) -> (String, String) {
    let meta = client.metadata();
    let tenant = meta
        .get("database")
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    let user = meta.get("user").cloned().unwrap_or_default();
    (tenant, user)
}

fn is_mutation(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::InsertCategory(_)
            | Command::UpdateCategory { .. }
            | Command::DeleteCategory(_)
            | Command::InsertPet(_)
            | Command::DeletePet(_)
            | Command::InsertRoom(_)
            | Command::UpdateRoom { .. }
            | Command::SetRoomVisibility { .. }
            | Command::DeleteRoom(_)
            | Command::InsertBooking(_)
            | Command::UpdateBooking { .. }
            | Command::DeleteBooking(_)
    )
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("kind"),
        text_field("check_in"),
        text_field("check_out"),
        text_field("check_in_time"),
        text_field("check_out_time"),
        text_field("status"),
        text_field("stop_reason"),
        text_field("cancel_reason"),
        int8_field("price"),
        int8_field("amount"),
        int8_field("prepayment"),
        bool_field("prepaid"),
        text_field("comment"),
        text_field("file_url"),
        text_field("room_id"),
        text_field("pet_ids"),
    ]
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("category_id"),
        text_field("number"),
        FieldInfo::new("area".into(), None, None, Type::FLOAT8, FieldFormat::Text),
        text_field("description"),
        bool_field("visible"),
    ]
}

fn category_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), text_field("description")]
}

fn pet_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("species"),
        text_field("owner_id"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![bool_field("available")]
}

fn free_range_schema() -> Vec<FieldInfo> {
    vec![text_field("room_id"), text_field("check_in"), text_field("check_out")]
}

// ── Row encoders ─────────────────────────────────────────────────

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.kind.as_str())?;
            encoder.encode_field(&b.range.check_in.to_string())?;
            encoder.encode_field(&b.range.check_out.to_string())?;
            encoder.encode_field(&b.check_in_time.map(|t| t.to_string()))?;
            encoder.encode_field(&b.check_out_time.map(|t| t.to_string()))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.stop_reason.map(|r| r.as_str()))?;
            encoder.encode_field(&b.cancel_reason)?;
            encoder.encode_field(&b.price)?;
            encoder.encode_field(&b.amount)?;
            encoder.encode_field(&b.prepayment)?;
            encoder.encode_field(&b.prepaid)?;
            encoder.encode_field(&b.comment)?;
            encoder.encode_field(&b.file_url)?;
            encoder.encode_field(&b.room_id.to_string())?;
            let pets = b
                .pet_ids
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            encoder.encode_field(&pets)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn room_rows(rooms: Vec<Room>) -> PgWireResult<Response> {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.category_id.to_string())?;
            encoder.encode_field(&r.number)?;
            encoder.encode_field(&r.area)?;
            encoder.encode_field(&r.description)?;
            encoder.encode_field(&r.visible)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn category_rows(categories: Vec<Category>) -> PgWireResult<Response> {
    let schema = Arc::new(category_schema());
    let rows: Vec<PgWireResult<_>> = categories
        .into_iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.id.to_string())?;
            encoder.encode_field(&c.name)?;
            encoder.encode_field(&c.description)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn pet_rows(pets: Vec<Pet>) -> PgWireResult<Response> {
    let schema = Arc::new(pet_schema());
    let rows: Vec<PgWireResult<_>> = pets
        .into_iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.name)?;
            encoder.encode_field(&p.species.as_str())?;
            encoder.encode_field(&p.owner_id.map(|o| o.to_string()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result schema from the raw statement text; used by Describe before the
/// parameters are bound.
fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABLE_ROOMS") {
        room_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("FREE_RANGES") {
        free_range_schema()
    } else if upper.contains("BOOKINGS") || upper.contains("BLOCKING") || upper.contains("CROSSING")
    {
        booking_schema()
    } else if upper.contains("ROOMS") {
        room_schema()
    } else if upper.contains("CATEGORIES") {
        category_schema()
    } else if upper.contains("PETS") {
        pet_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for KennelHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let (tenant, user) = caller_identity(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, &tenant, &user, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct KennelQueryParser;

#[async_trait]
impl QueryParser for KennelQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for KennelHandler {
    type Statement = String;
    type QueryParser = KennelQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let (tenant, user) = caller_identity(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, &tenant, &user, cmd).await?;
        Ok(responses.remove(0))
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
            schema_for_sql(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max {
                    max = n;
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct KennelFactory {
    handler: Arc<KennelHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<KennelAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl KennelFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = KennelAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(KennelHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for KennelFactory {
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

/// Drive one client connection through the pgwire state machine.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(KennelFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory)
        .await
        .map_err(std::io::Error::other)
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    let code = match e.kind() {
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => "23P01",
        ErrorKind::Validation => "22023",
        ErrorKind::Storage => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
