use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use kenneld::tenant::TenantManager;
use kenneld::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("kenneld_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "kenneld".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect_db(addr: SocketAddr, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("kenneld")
        .password("kenneld");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    connect_db(addr, "test").await
}

/// Seed a category, visible room and pet; returns their ids.
async fn seed(client: &tokio_postgres::Client) -> (Ulid, Ulid, Ulid) {
    let (category, room, pet) = (Ulid::new(), Ulid::new(), Ulid::new());
    client
        .batch_execute(&format!(
            "INSERT INTO categories (id, name) VALUES ('{category}', 'standard')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, category_id, number) VALUES ('{room}', '{category}', '101')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO pets (id, name, species) VALUES ('{pet}', 'Rex', 'dog')"
        ))
        .await
        .unwrap();
    (category, room, pet)
}

fn insert_booking_sql(id: Ulid, room: Ulid, pet: Ulid, check_in: &str, check_out: &str) -> String {
    format!(
        "INSERT INTO bookings (id, check_in, check_out, room_id, pet_ids) \
         VALUES ('{id}', '{check_in}', '{check_out}', '{room}', '{pet}')"
    )
}

/// Data rows of a simple query, as column-name-indexed string lookups.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

// ── Booking flow ─────────────────────────────────────────────

#[tokio::test]
async fn booking_round_trip() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&insert_booking_sql(booking, room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM bookings WHERE room_id = '{room}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(booking.to_string().as_str()));
    assert_eq!(rows[0].get("status"), Some("initial"));
    assert_eq!(rows[0].get("kind"), Some("stay"));
    assert_eq!(rows[0].get("check_in"), Some("2024-06-01"));
}

#[tokio::test]
async fn prepaid_booking_is_confirmed() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, check_in, check_out, prepaid, prepayment, room_id, pet_ids) \
             VALUES ('{booking}', '2024-06-01', '2024-06-05', true, 100, '{room}', '{pet}')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM bookings WHERE id = '{booking}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("confirmed"));
}

#[tokio::test]
async fn conflict_maps_to_exclusion_violation() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-10"))
        .await
        .unwrap();

    let err = client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-05", "2024-06-15"))
        .await
        .unwrap_err();
    let db_err = err.as_db_error().unwrap();
    assert_eq!(db_err.code(), &SqlState::EXCLUSION_VIOLATION);
    assert!(db_err.message().contains("is not available for current dates"));
    assert!(db_err.message().contains(&room.to_string()));
}

#[tokio::test]
async fn same_day_turnover_accepted() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();
    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-05", "2024-06-10"))
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_update_and_cancel() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&insert_booking_sql(booking, room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();

    client
        .batch_execute(&format!(
            "UPDATE bookings SET check_out = '2024-06-07' WHERE id = '{booking}'"
        ))
        .await
        .unwrap();

    // Cancel without a reason is a conflict.
    let err = client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'cancelled' WHERE id = '{booking}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code(), &SqlState::EXCLUSION_VIOLATION);

    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'cancelled', cancel_reason = 'plans changed' WHERE id = '{booking}'"
        ))
        .await
        .unwrap();

    // Cancelled bookings free the range.
    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-07"))
        .await
        .unwrap();
}

#[tokio::test]
async fn kind_change_maps_to_invalid_parameter() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&insert_booking_sql(booking, room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("UPDATE bookings SET kind = 'closing' WHERE id = '{booking}'"))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code(), &SqlState::INVALID_PARAMETER_VALUE);
}

#[tokio::test]
async fn unknown_booking_maps_to_no_data_found() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    seed(&client).await;

    let err = client
        .simple_query(&format!("SELECT * FROM bookings WHERE id = '{}'", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code(), &SqlState::NO_DATA_FOUND);
}

#[tokio::test]
async fn garbage_sql_maps_to_syntax_error() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let err = client.simple_query("FROBNICATE THE KENNEL").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code(), &SqlState::SYNTAX_ERROR);
}

// ── Virtual tables ───────────────────────────────────────────

#[tokio::test]
async fn availability_row_when_free_conflict_when_blocked() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();

    // A blocked range is an error, never a row with a false flag.
    let err = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND check_in = '2024-06-02' AND check_out = '2024-06-04'"
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code(), &SqlState::EXCLUSION_VIOLATION);
    assert!(db.message().contains("is not available"));

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE room_id = '{room}' AND check_in = '2024-06-05' AND check_out = '2024-06-09'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("available"), Some("t"));
}

#[tokio::test]
async fn blocking_and_crossing_tables() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-05", "2024-06-10"))
        .await
        .unwrap();

    // An adjacent range: crossing sees it, blocking does not.
    let blocking = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM blocking WHERE room_id = '{room}' AND check_in = '2024-06-10' AND check_out = '2024-06-15'"
            ))
            .await
            .unwrap(),
    );
    assert!(blocking.is_empty());

    let crossing = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM crossing WHERE room_id = '{room}' AND check_in = '2024-06-10' AND check_out = '2024-06-15'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(crossing.len(), 1);
}

#[tokio::test]
async fn available_rooms_in_category() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (category, room, pet) = seed(&client).await;

    let second = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, category_id, number) VALUES ('{second}', '{category}', '102')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-10"))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM available_rooms WHERE category_id = '{category}' AND check_in = '2024-06-02' AND check_out = '2024-06-06'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(second.to_string().as_str()));
}

#[tokio::test]
async fn free_ranges_table() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-05", "2024-06-10"))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM free_ranges WHERE room_id = '{room}' AND check_in = '2024-06-01' AND check_out = '2024-06-15'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("check_in"), Some("2024-06-01"));
    assert_eq!(rows[0].get("check_out"), Some("2024-06-05"));
    assert_eq!(rows[1].get("check_in"), Some("2024-06-10"));
    assert_eq!(rows[1].get("check_out"), Some("2024-06-15"));
}

// ── Room visibility over the wire ────────────────────────────

#[tokio::test]
async fn hide_room_guard_and_hidden_room_rejection() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    // A booking far in the future keeps the room open.
    let booking = Ulid::new();
    client
        .batch_execute(&insert_booking_sql(booking, room, pet, "2099-06-01", "2099-06-05"))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("UPDATE rooms SET visible = false WHERE id = '{room}'"))
        .await
        .unwrap_err();
    let db_err = err.as_db_error().unwrap();
    assert_eq!(db_err.code(), &SqlState::EXCLUSION_VIOLATION);
    assert!(db_err.message().contains("has opened bookings"));

    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'cancelled', cancel_reason = 'never mind' WHERE id = '{booking}'"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!("UPDATE rooms SET visible = false WHERE id = '{room}'"))
        .await
        .unwrap();

    // Hidden rooms take no new bookings.
    let err = client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code(), &SqlState::EXCLUSION_VIOLATION);

    // Unhide and book.
    client
        .batch_execute(&format!("UPDATE rooms SET visible = true WHERE id = '{room}'"))
        .await
        .unwrap();
    client
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();
}

// ── Extended protocol ────────────────────────────────────────

#[tokio::test]
async fn extended_query_with_params() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, pet) = seed(&client).await;

    let booking = Ulid::new();
    client
        .batch_execute(&insert_booking_sql(booking, room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();

    let room_str = room.to_string();
    let rows = client
        .query(
            "SELECT * FROM bookings WHERE room_id = $1",
            &[&room_str.as_str()],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: &str = rows[0].get("id");
    assert_eq!(id, booking.to_string());
}

// ── Tenancy ──────────────────────────────────────────────────

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let (addr, _tm) = start_test_server().await;
    let client_a = connect_db(addr, "hotel_a").await;
    let client_b = connect_db(addr, "hotel_b").await;

    let (_, room, pet) = seed(&client_a).await;
    client_a
        .batch_execute(&insert_booking_sql(Ulid::new(), room, pet, "2024-06-01", "2024-06-05"))
        .await
        .unwrap();

    // Tenant B has no rooms at all.
    let rows = data_rows(client_b.simple_query("SELECT * FROM rooms").await.unwrap());
    assert!(rows.is_empty());
}

// ── LISTEN / UNLISTEN ────────────────────────────────────────

#[tokio::test]
async fn listen_and_unlisten_are_acknowledged() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;
    let (_, room, _) = seed(&client).await;

    client.batch_execute(&format!("LISTEN room_{room}")).await.unwrap();
    client.batch_execute(&format!("UNLISTEN room_{room}")).await.unwrap();
}

#[tokio::test]
async fn listen_rejects_malformed_channel() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    assert!(client.batch_execute("LISTEN not_a_room_channel").await.is_err());
    assert!(client.batch_execute("LISTEN room_xyz").await.is_err());
}
