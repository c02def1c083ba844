//! End-to-end tests driving the model layer, query builder and
//! transactions through a real pool against a file-backed database.

use quarry::{
    ConnectionPool, IsolationLevel, Model, PoolConfig, QueryBuilder, SqlValue, Table, Transaction,
};
use tempfile::NamedTempFile;

struct User;

impl Table for User {
    const TABLE: &'static str = "users";
}

struct Order;

impl Table for Order {
    const TABLE: &'static str = "orders";
    const TIMESTAMPS: bool = true;
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn open_pool(db: &NamedTempFile) -> ConnectionPool {
    init_tracing();
    let config = PoolConfig::new()
        .host("localhost")
        .username("root")
        .database(db.path().to_str().unwrap())
        .min_pool_size(1)
        .initial_pool_size(1)
        .max_pool_size(2)
        .idle_timeout_ms(0);
    let pool = ConnectionPool::open(config).unwrap();

    let conn = pool.acquire(1_000).unwrap();
    conn.execute_script(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            email TEXT,
            status INTEGER DEFAULT 0
        );
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            total REAL NOT NULL,
            created_at DATETIME,
            updated_at DATETIME
        );",
    )
    .unwrap();
    pool.release(conn);
    pool
}

fn seed_user(pool: &ConnectionPool, username: &str, status: i32) -> i64 {
    let mut user = Model::<User>::new();
    user.set_attribute("username", username);
    user.set_attribute("status", status);
    user.insert(pool).unwrap();
    user.get_attribute("id").unwrap().to_i64().unwrap()
}

#[test]
fn crud_round_trip_through_the_pool() {
    let db = NamedTempFile::new().unwrap();
    let pool = open_pool(&db);

    let id = seed_user(&pool, "alice", 1);

    let mut found = Model::<User>::find(&pool, id).unwrap().expect("must exist");
    assert_eq!(
        found.get_attribute("username").unwrap().to_text().unwrap(),
        "alice"
    );

    found.set_attribute("email", "alice@example.com");
    found.update(&pool).unwrap();

    let reloaded = Model::<User>::find(&pool, id).unwrap().unwrap();
    assert_eq!(
        reloaded.get_attribute("email").unwrap().to_text().unwrap(),
        "alice@example.com"
    );

    let mut to_delete = reloaded;
    to_delete.delete(&pool).unwrap();
    assert!(Model::<User>::find(&pool, id).unwrap().is_none());
}

#[test]
fn builder_queries_hydrate_models() {
    let db = NamedTempFile::new().unwrap();
    let pool = open_pool(&db);

    seed_user(&pool, "a", 1);
    seed_user(&pool, "b", 0);
    seed_user(&pool, "c", 1);

    let active = Model::<User>::find_where(
        &pool,
        Model::<User>::query()
            .where_("status", 1)
            .order_by_desc("username"),
    )
    .unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(
        active[0].get_attribute("username").unwrap().to_text().unwrap(),
        "c"
    );

    let picked = Model::<User>::find_where(
        &pool,
        Model::<User>::query().where_in(
            "username",
            vec![SqlValue::Text("a".into()), SqlValue::Text("b".into())],
        ),
    )
    .unwrap();
    assert_eq!(picked.len(), 2);
}

#[test]
fn transaction_default_fate_is_abort() {
    let db = NamedTempFile::new().unwrap();
    let pool = open_pool(&db);
    let id = seed_user(&pool, "dave", 0);

    // Mutate inside a transaction and abandon it.
    let conn = pool.acquire(1_000).unwrap();
    {
        let _tx = Transaction::begin(conn.connection(), IsolationLevel::RepeatableRead).unwrap();
        conn.execute(
            "UPDATE users SET status = 9 WHERE id = ?",
            &[SqlValue::BigInt(id)],
        )
        .unwrap();
        // Scope exit without commit.
    }
    pool.release(conn);

    let after_abandon = Model::<User>::find(&pool, id).unwrap().unwrap();
    assert_eq!(
        after_abandon.get_attribute("status").unwrap().to_i32().unwrap(),
        0,
        "abandoned transaction must leave the row unchanged"
    );

    // Explicit commit persists.
    let conn = pool.acquire(1_000).unwrap();
    {
        let mut tx =
            Transaction::begin(conn.connection(), IsolationLevel::RepeatableRead).unwrap();
        conn.execute(
            "UPDATE users SET status = 9 WHERE id = ?",
            &[SqlValue::BigInt(id)],
        )
        .unwrap();
        tx.commit().unwrap();
    }
    pool.release(conn);

    let after_commit = Model::<User>::find(&pool, id).unwrap().unwrap();
    assert_eq!(
        after_commit.get_attribute("status").unwrap().to_i32().unwrap(),
        9
    );
}

#[test]
fn transaction_groups_multiple_statements() {
    let db = NamedTempFile::new().unwrap();
    let pool = open_pool(&db);
    let id = seed_user(&pool, "erin", 0);

    let conn = pool.acquire(1_000).unwrap();
    {
        let mut tx = Transaction::begin_default(conn.connection()).unwrap();
        let insert = QueryBuilder::create().table("orders").insert(vec![
            ("user_id".to_string(), SqlValue::BigInt(id)),
            ("total".to_string(), SqlValue::Double(9.5)),
        ]);
        insert.execute(conn.connection()).unwrap();
        conn.execute(
            "UPDATE users SET status = 1 WHERE id = ?",
            &[SqlValue::BigInt(id)],
        )
        .unwrap();
        tx.commit().unwrap();
    }
    pool.release(conn);

    let orders = Model::<Order>::find_where(
        &pool,
        Model::<Order>::query().where_("user_id", SqlValue::BigInt(id)),
    )
    .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(
        orders[0].get_attribute("total").unwrap().to_f64().unwrap(),
        9.5
    );

    let user = Model::<User>::find(&pool, id).unwrap().unwrap();
    assert_eq!(user.get_attribute("status").unwrap().to_i32().unwrap(), 1);
}

#[test]
fn timestamps_survive_the_database_round_trip() {
    let db = NamedTempFile::new().unwrap();
    let pool = open_pool(&db);
    let id = seed_user(&pool, "fay", 0);

    let mut order = Model::<Order>::new();
    order.set_attribute("user_id", SqlValue::BigInt(id));
    order.set_attribute("total", 12.0);
    order.insert(&pool).unwrap();

    let reloaded = Model::<Order>::find(
        &pool,
        order.get_attribute("id").unwrap().clone(),
    )
    .unwrap()
    .unwrap();
    // DATETIME columns hydrate back as timestamps.
    assert!(matches!(
        reloaded.get_attribute("created_at"),
        Some(SqlValue::Timestamp(_))
    ));
    assert!(reloaded
        .get_attribute("created_at")
        .unwrap()
        .to_timestamp()
        .is_ok());
}
