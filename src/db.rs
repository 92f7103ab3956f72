use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use rusqlite::{params, Connection, Row};

use crate::dialogue::DialogState;
use crate::errors::BotError;

/// A registered stall
#[derive(Debug, Clone, PartialEq)]
pub struct Vendor {
    pub id: i64,
    pub owner_id: Option<i64>,
    pub name: String,
    pub room_number: i64,
    pub active: bool,
}

/// A catalog product with its unit of measure
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub unit: String,
}

/// Fixed initial catalog, inserted if absent at startup
const SEED_PRODUCTS: &[(&str, &str)] = &[
    ("Apple", "kg"),
    ("Banana", "kg"),
    ("Cucumber", "kg"),
    ("Fresh herbs", "bunch"),
    ("Lettuce", "each"),
    ("Melon", "each"),
    ("Onion", "kg"),
    ("Orange", "kg"),
    ("Pomegranate", "kg"),
    ("Potato", "kg"),
    ("Tomato", "kg"),
    ("Watermelon", "each"),
];

/// Format a calendar date the way the prices table stores it
pub fn market_date(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Initialize the database schema
pub fn init_database_schema(conn: &Connection) -> Result<()> {
    info!("Initializing database schema...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vendors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER UNIQUE,
            name TEXT NOT NULL,
            room_number INTEGER UNIQUE NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )
    .context("Failed to create vendors table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            unit TEXT NOT NULL DEFAULT 'kg'
        )",
        [],
    )
    .context("Failed to create products table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vendor_id INTEGER NOT NULL,
            product_id INTEGER NOT NULL,
            price INTEGER NOT NULL,
            date TEXT NOT NULL,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(vendor_id, product_id, date),
            FOREIGN KEY(vendor_id) REFERENCES vendors(id),
            FOREIGN KEY(product_id) REFERENCES products(id)
        )",
        [],
    )
    .context("Failed to create prices table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dialog_states (
            user_id INTEGER PRIMARY KEY,
            state TEXT NOT NULL,
            context TEXT
        )",
        [],
    )
    .context("Failed to create dialog_states table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscribers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER UNIQUE NOT NULL,
            subscribed_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create subscribers table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Seed the product catalog, inserting only names not already present
pub fn seed_initial_products(conn: &Connection) -> Result<()> {
    for (name, unit) in SEED_PRODUCTS {
        conn.execute(
            "INSERT OR IGNORE INTO products (name, unit) VALUES (?1, ?2)",
            params![name, unit],
        )
        .context("Failed to seed product catalog")?;
    }
    Ok(())
}

fn vendor_from_row(row: &Row) -> rusqlite::Result<Vendor> {
    Ok(Vendor {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        room_number: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
    })
}

/// Register a new stall. The insert is the only write: the UNIQUE
/// constraints on room_number and owner_id make registration atomic, so a
/// losing racer leaves no partial row behind.
pub fn create_vendor(conn: &Connection, owner_id: i64, name: &str, room_number: i64) -> Result<i64> {
    info!("Registering stall {room_number} for user {owner_id}");

    let inserted = conn.execute(
        "INSERT INTO vendors (owner_id, name, room_number, active) VALUES (?1, ?2, ?3, 1)",
        params![owner_id, name, room_number],
    );

    match inserted {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(BotError::Conflict(
                "That room number is already registered. Contact the admin if it is yours."
                    .to_string(),
            )
            .into())
        }
        Err(e) => Err(e).context("Failed to insert vendor"),
    }
}

/// Look up the stall owned by a user, if any
pub fn vendor_by_owner(conn: &Connection, owner_id: i64) -> Result<Option<Vendor>> {
    let mut stmt = conn
        .prepare("SELECT id, owner_id, name, room_number, active FROM vendors WHERE owner_id = ?1")
        .context("Failed to prepare vendor-by-owner statement")?;

    match stmt.query_row(params![owner_id], vendor_from_row) {
        Ok(vendor) => Ok(Some(vendor)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read vendor by owner"),
    }
}

/// Look up a stall by its room number
pub fn vendor_by_room(conn: &Connection, room_number: i64) -> Result<Option<Vendor>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, name, room_number, active FROM vendors WHERE room_number = ?1",
        )
        .context("Failed to prepare vendor-by-room statement")?;

    match stmt.query_row(params![room_number], vendor_from_row) {
        Ok(vendor) => Ok(Some(vendor)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read vendor by room"),
    }
}

/// All active stalls, ordered by room number
pub fn list_active_vendors(conn: &Connection) -> Result<Vec<Vendor>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, owner_id, name, room_number, active FROM vendors
             WHERE active = 1 ORDER BY room_number",
        )
        .context("Failed to prepare vendor list statement")?;

    let vendors = stmt
        .query_map([], vendor_from_row)
        .context("Failed to query active vendors")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read vendor rows")?;

    Ok(vendors)
}

/// The full product catalog, ordered by name
pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    let mut stmt = conn
        .prepare("SELECT id, name, unit FROM products ORDER BY name")
        .context("Failed to prepare product list statement")?;

    let products = stmt
        .query_map([], |row| {
            Ok(Product {
                id: row.get(0)?,
                name: row.get(1)?,
                unit: row.get(2)?,
            })
        })
        .context("Failed to query products")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read product rows")?;

    Ok(products)
}

/// Look up a catalog product by its exact name
pub fn product_by_name(conn: &Connection, name: &str) -> Result<Option<Product>> {
    let mut stmt = conn
        .prepare("SELECT id, name, unit FROM products WHERE name = ?1")
        .context("Failed to prepare product-by-name statement")?;

    let product = stmt.query_row(params![name], |row| {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            unit: row.get(2)?,
        })
    });

    match product {
        Ok(product) => Ok(Some(product)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read product by name"),
    }
}

/// Record a price for (vendor, product, date). A second submission for the
/// same key replaces the price in place; the UNIQUE index guarantees at most
/// one row per key even under concurrent double-submits.
pub fn upsert_price(
    conn: &Connection,
    vendor_id: i64,
    product_id: i64,
    date: NaiveDate,
    price: i64,
) -> Result<()> {
    info!("Recording price {price} for vendor {vendor_id} product {product_id}");

    conn.execute(
        "INSERT INTO prices (vendor_id, product_id, price, date)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(vendor_id, product_id, date)
         DO UPDATE SET price = excluded.price, updated_at = CURRENT_TIMESTAMP",
        params![vendor_id, product_id, price, market_date(date)],
    )
    .context("Failed to upsert price")?;

    Ok(())
}

/// Read back one recorded price, if any
pub fn price_for(
    conn: &Connection,
    vendor_id: i64,
    product_id: i64,
    date: NaiveDate,
) -> Result<Option<i64>> {
    let mut stmt = conn
        .prepare("SELECT price FROM prices WHERE vendor_id = ?1 AND product_id = ?2 AND date = ?3")
        .context("Failed to prepare price lookup statement")?;

    match stmt.query_row(params![vendor_id, product_id, market_date(date)], |row| {
        row.get(0)
    }) {
        Ok(price) => Ok(Some(price)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read price"),
    }
}

/// Opt a user into the daily broadcast. Returns false if already subscribed.
pub fn add_subscriber(conn: &Connection, user_id: i64) -> Result<bool> {
    let rows = conn
        .execute(
            "INSERT OR IGNORE INTO subscribers (user_id) VALUES (?1)",
            params![user_id],
        )
        .context("Failed to insert subscriber")?;

    Ok(rows > 0)
}

/// Opt a user out. Returns false if they were not subscribed.
pub fn remove_subscriber(conn: &Connection, user_id: i64) -> Result<bool> {
    let rows = conn
        .execute(
            "DELETE FROM subscribers WHERE user_id = ?1",
            params![user_id],
        )
        .context("Failed to delete subscriber")?;

    Ok(rows > 0)
}

/// Everyone currently opted into the broadcast
pub fn list_subscribers(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT user_id FROM subscribers ORDER BY user_id")
        .context("Failed to prepare subscriber list statement")?;

    let subscribers = stmt
        .query_map([], |row| row.get(0))
        .context("Failed to query subscribers")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read subscriber rows")?;

    Ok(subscribers)
}

/// Overwrite a user's dialog state (one row per user)
pub fn save_dialog_state(conn: &Connection, user_id: i64, state: &DialogState) -> Result<()> {
    let (tag, context) = state.to_storage()?;

    conn.execute(
        "INSERT OR REPLACE INTO dialog_states (user_id, state, context) VALUES (?1, ?2, ?3)",
        params![user_id, tag, context],
    )
    .context("Failed to save dialog state")?;

    Ok(())
}

/// Load a user's dialog state, if they have one stored
pub fn load_dialog_state(conn: &Connection, user_id: i64) -> Result<Option<DialogState>> {
    let mut stmt = conn
        .prepare("SELECT state, context FROM dialog_states WHERE user_id = ?1")
        .context("Failed to prepare dialog state statement")?;

    let row = stmt.query_row(params![user_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    });

    match row {
        Ok((tag, context)) => Ok(Some(DialogState::from_storage(&tag, context.as_deref())?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read dialog state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn setup_test_db() -> Result<(Connection, NamedTempFile)> {
        let temp_file = NamedTempFile::new()?;
        let conn = Connection::open(temp_file.path())?;
        init_database_schema(&conn)?;
        seed_initial_products(&conn)?;
        Ok((conn, temp_file))
    }

    fn sample_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 26).unwrap()
    }

    #[test]
    fn test_seed_products_idempotent() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        let before = list_products(&conn)?;
        assert_eq!(before.len(), SEED_PRODUCTS.len());

        // Re-seeding must not duplicate anything
        seed_initial_products(&conn)?;
        let after = list_products(&conn)?;
        assert_eq!(after.len(), before.len());

        Ok(())
    }

    #[test]
    fn test_products_ordered_by_name() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        let products = list_products(&conn)?;
        let names: Vec<String> = products.iter().map(|p| p.name.clone()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        // Units come from the seed catalog
        let tomato = product_by_name(&conn, "Tomato")?.unwrap();
        assert_eq!(tomato.unit, "kg");
        let lettuce = product_by_name(&conn, "Lettuce")?.unwrap();
        assert_eq!(lettuce.unit, "each");

        Ok(())
    }

    #[test]
    fn test_create_vendor_and_lookups() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        let vendor_id = create_vendor(&conn, 1001, "Akbar's Fruits", 12)?;
        assert!(vendor_id > 0);

        let by_owner = vendor_by_owner(&conn, 1001)?.unwrap();
        assert_eq!(by_owner.id, vendor_id);
        assert_eq!(by_owner.name, "Akbar's Fruits");
        assert_eq!(by_owner.room_number, 12);
        assert!(by_owner.active);

        let by_room = vendor_by_room(&conn, 12)?.unwrap();
        assert_eq!(by_room.id, vendor_id);

        assert!(vendor_by_owner(&conn, 9999)?.is_none());
        assert!(vendor_by_room(&conn, 99)?.is_none());

        Ok(())
    }

    #[test]
    fn test_create_vendor_duplicate_room_rejected() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        create_vendor(&conn, 1001, "Vendor A", 12)?;
        let err = create_vendor(&conn, 2002, "Vendor B", 12).unwrap_err();
        let bot_err = err.downcast::<BotError>().unwrap();
        assert!(matches!(bot_err, BotError::Conflict(_)));

        // Vendor A untouched, Vendor B never created
        let a = vendor_by_room(&conn, 12)?.unwrap();
        assert_eq!(a.name, "Vendor A");
        assert!(vendor_by_owner(&conn, 2002)?.is_none());

        Ok(())
    }

    #[test]
    fn test_create_vendor_duplicate_owner_rejected() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        create_vendor(&conn, 1001, "First stall", 12)?;
        let err = create_vendor(&conn, 1001, "Second stall", 13).unwrap_err();
        assert!(err.downcast_ref::<BotError>().is_some());
        assert!(vendor_by_room(&conn, 13)?.is_none());

        Ok(())
    }

    #[test]
    fn test_list_active_vendors_ordered_by_room() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        create_vendor(&conn, 1, "C", 30)?;
        create_vendor(&conn, 2, "A", 10)?;
        create_vendor(&conn, 3, "B", 20)?;

        let rooms: Vec<i64> = list_active_vendors(&conn)?
            .iter()
            .map(|v| v.room_number)
            .collect();
        assert_eq!(rooms, vec![10, 20, 30]);

        Ok(())
    }

    #[test]
    fn test_upsert_price_replaces_not_duplicates() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        let vendor_id = create_vendor(&conn, 1001, "Akbar's Fruits", 12)?;
        let tomato = product_by_name(&conn, "Tomato")?.unwrap();
        let date = sample_date();

        upsert_price(&conn, vendor_id, tomato.id, date, 1000)?;
        assert_eq!(price_for(&conn, vendor_id, tomato.id, date)?, Some(1000));

        upsert_price(&conn, vendor_id, tomato.id, date, 1200)?;
        assert_eq!(price_for(&conn, vendor_id, tomato.id, date)?, Some(1200));

        // Still exactly one row for the (vendor, product, date) key
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prices WHERE vendor_id = ?1 AND product_id = ?2 AND date = ?3",
            params![vendor_id, tomato.id, market_date(date)],
            |row| row.get(0),
        )?;
        assert_eq!(count, 1);

        Ok(())
    }

    #[test]
    fn test_prices_independent_per_date() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        let vendor_id = create_vendor(&conn, 1001, "Akbar's Fruits", 12)?;
        let tomato = product_by_name(&conn, "Tomato")?.unwrap();
        let today = sample_date();
        let yesterday = today.pred_opt().unwrap();

        upsert_price(&conn, vendor_id, tomato.id, yesterday, 1000)?;
        upsert_price(&conn, vendor_id, tomato.id, today, 1200)?;

        assert_eq!(
            price_for(&conn, vendor_id, tomato.id, yesterday)?,
            Some(1000)
        );
        assert_eq!(price_for(&conn, vendor_id, tomato.id, today)?, Some(1200));

        Ok(())
    }

    #[test]
    fn test_subscriber_add_remove_idempotent() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        assert!(add_subscriber(&conn, 42)?);
        assert!(!add_subscriber(&conn, 42)?);
        assert_eq!(list_subscribers(&conn)?, vec![42]);

        assert!(remove_subscriber(&conn, 42)?);
        assert!(!remove_subscriber(&conn, 42)?);
        assert!(list_subscribers(&conn)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_dialog_state_round_trip() -> Result<()> {
        let (conn, _temp_file) = setup_test_db()?;

        assert!(load_dialog_state(&conn, 7)?.is_none());

        save_dialog_state(
            &conn,
            7,
            &DialogState::RegisterRoom {
                name: "Akbar".into(),
            },
        )?;
        let loaded = load_dialog_state(&conn, 7)?.unwrap();
        assert_eq!(
            loaded,
            DialogState::RegisterRoom {
                name: "Akbar".into()
            }
        );

        // One row per user, overwritten on every transition
        save_dialog_state(&conn, 7, &DialogState::Main)?;
        assert_eq!(load_dialog_state(&conn, 7)?.unwrap(), DialogState::Main);

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dialog_states WHERE user_id = 7",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 1);

        Ok(())
    }
}
