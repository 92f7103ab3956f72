//! Read-side aggregation over the prices table. Every query takes the
//! market date explicitly and performs no writes.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::db::market_date;

/// One product's price at one stall
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLine {
    pub product: String,
    pub price: i64,
    pub unit: String,
}

/// Day-over-day movement for one (vendor, product) pairing
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub product: String,
    pub delta: i64,
}

/// A stall offering a product at the day's minimum price
#[derive(Debug, Clone, PartialEq)]
pub struct CheapestLine {
    pub product: String,
    pub price: i64,
    pub room_number: i64,
    pub vendor: String,
}

/// Everything one stall has entered for the given date, ordered by product
/// name. Empty when the vendor entered nothing.
pub fn prices_for_vendor(
    conn: &Connection,
    vendor_id: i64,
    date: NaiveDate,
) -> Result<Vec<PriceLine>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.name, pr.price, p.unit
             FROM prices pr
             JOIN products p ON pr.product_id = p.id
             WHERE pr.vendor_id = ?1 AND pr.date = ?2
             ORDER BY p.name",
        )
        .context("Failed to prepare vendor prices query")?;

    let lines = stmt
        .query_map(params![vendor_id, market_date(date)], |row| {
            Ok(PriceLine {
                product: row.get(0)?,
                price: row.get(1)?,
                unit: row.get(2)?,
            })
        })
        .context("Failed to query vendor prices")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read vendor price rows")?;

    Ok(lines)
}

/// Price movements between two dates. A product appears only for (vendor,
/// product) pairings that have an entry on both dates; the join is on
/// vendor AND product so one stall's today is never compared against
/// another stall's yesterday.
pub fn price_changes(
    conn: &Connection,
    date: NaiveDate,
    prior: NaiveDate,
) -> Result<Vec<PriceChange>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.name, t.price - y.price
             FROM prices t
             JOIN prices y ON t.product_id = y.product_id AND t.vendor_id = y.vendor_id
             JOIN products p ON t.product_id = p.id
             WHERE t.date = ?1 AND y.date = ?2
             ORDER BY p.name",
        )
        .context("Failed to prepare price changes query")?;

    let changes = stmt
        .query_map(params![market_date(date), market_date(prior)], |row| {
            Ok(PriceChange {
                product: row.get(0)?,
                delta: row.get(1)?,
            })
        })
        .context("Failed to query price changes")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read price change rows")?;

    Ok(changes)
}

/// For each product with at least one entry on `date`, every stall offering
/// it at the day's minimum price. Ties all appear, ordered by product name
/// then room number.
pub fn cheapest_per_product(conn: &Connection, date: NaiveDate) -> Result<Vec<CheapestLine>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.name, pr.price, v.room_number, v.name
             FROM prices pr
             JOIN products p ON pr.product_id = p.id
             JOIN vendors v ON pr.vendor_id = v.id
             WHERE pr.date = ?1 AND pr.price = (
                 SELECT MIN(price) FROM prices WHERE product_id = p.id AND date = ?1
             )
             ORDER BY p.name, v.room_number",
        )
        .context("Failed to prepare cheapest-per-product query")?;

    let lines = stmt
        .query_map(params![market_date(date)], |row| {
            Ok(CheapestLine {
                product: row.get(0)?,
                price: row.get(1)?,
                room_number: row.get(2)?,
                vendor: row.get(3)?,
            })
        })
        .context("Failed to query cheapest per product")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read cheapest rows")?;

    Ok(lines)
}

/// Unattributed minimum per product, for the daily broadcast
pub fn cheapest_summary(conn: &Connection, date: NaiveDate) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.name, MIN(pr.price)
             FROM prices pr
             JOIN products p ON pr.product_id = p.id
             WHERE pr.date = ?1
             GROUP BY p.name
             ORDER BY p.name",
        )
        .context("Failed to prepare cheapest summary query")?;

    let summary = stmt
        .query_map(params![market_date(date)], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .context("Failed to query cheapest summary")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read summary rows")?;

    Ok(summary)
}
