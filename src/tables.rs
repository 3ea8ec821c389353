//! Column-oriented tables for the extracted receipt data.
//!
//! Each receipt is persisted redundantly as JSON (readable) and bincode
//! (columnar binary); both encode the same struct-of-vectors tables.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use time::{Date, Time};

use crate::receipt::{Category, Item, Receipt, Shop};

/// Shop table: one row per receipt. Carries both the parsed date/time columns
/// and the raw strings they were parsed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopColumns {
    pub name: Vec<String>,
    pub date: Vec<Option<Date>>,
    pub time: Vec<Option<Time>>,
    pub total: Vec<f64>,
    pub date_str: Vec<String>,
    pub time_str: Vec<String>,
}

impl ShopColumns {
    pub fn from_receipt(receipt: &Receipt) -> Self {
        let mut columns = Self::default();
        columns.push(&receipt.shop);
        columns
    }

    pub fn push(&mut self, shop: &Shop) {
        self.name.push(shop.name.clone());
        self.date.push(shop.date());
        self.time.push(shop.time());
        self.total.push(shop.total);
        self.date_str.push(shop.date_str.clone());
        self.time_str.push(shop.time_str.clone());
    }

    pub fn append(&mut self, other: &Self) {
        self.name.extend_from_slice(&other.name);
        self.date.extend_from_slice(&other.date);
        self.time.extend_from_slice(&other.time);
        self.total.extend_from_slice(&other.total);
        self.date_str.extend_from_slice(&other.date_str);
        self.time_str.extend_from_slice(&other.time_str);
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    fn columns_aligned(&self) -> bool {
        let len = self.name.len();
        [
            self.date.len(),
            self.time.len(),
            self.total.len(),
            self.date_str.len(),
            self.time_str.len(),
        ]
        .iter()
        .all(|&l| l == len)
    }

    fn row(&self, idx: usize) -> Shop {
        Shop {
            name: self.name[idx].clone(),
            date_str: self.date_str[idx].clone(),
            time_str: self.time_str[idx].clone(),
            total: self.total[idx],
        }
    }
}

/// Items table: one row per purchased item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemColumns {
    pub name: Vec<String>,
    pub price: Vec<f64>,
    pub count: Vec<Option<i64>>,
    pub mass: Vec<Option<f64>>,
    pub tax: Vec<Option<String>>,
    pub category: Vec<Option<Category>>,
}

impl ItemColumns {
    pub fn from_receipt(receipt: &Receipt) -> Self {
        let mut columns = Self::default();
        for item in &receipt.items {
            columns.push(item);
        }
        columns
    }

    pub fn push(&mut self, item: &Item) {
        self.name.push(item.name.clone());
        self.price.push(item.price);
        self.count.push(item.count);
        self.mass.push(item.mass);
        self.tax.push(item.tax.clone());
        self.category.push(item.category);
    }

    pub fn append(&mut self, other: &Self) {
        self.name.extend_from_slice(&other.name);
        self.price.extend_from_slice(&other.price);
        self.count.extend_from_slice(&other.count);
        self.mass.extend_from_slice(&other.mass);
        self.tax.extend_from_slice(&other.tax);
        self.category.extend_from_slice(&other.category);
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    fn columns_aligned(&self) -> bool {
        let len = self.name.len();
        [
            self.price.len(),
            self.count.len(),
            self.mass.len(),
            self.tax.len(),
            self.category.len(),
        ]
        .iter()
        .all(|&l| l == len)
    }

    fn row(&self, idx: usize) -> Item {
        Item {
            name: self.name[idx].clone(),
            price: self.price[idx],
            count: self.count[idx],
            mass: self.mass[idx],
            tax: self.tax[idx].clone(),
            category: self.category[idx],
        }
    }
}

/// Rebuild a receipt from its persisted tables. The shop table of a single
/// receipt holds exactly one row. Tables whose column vectors disagree in
/// length (a truncated or corrupted file) are rejected instead of indexed.
pub fn receipt_from_columns(shop: &ShopColumns, items: &ItemColumns) -> anyhow::Result<Receipt> {
    if !shop.columns_aligned() || !items.columns_aligned() {
        bail!("table columns disagree in length, refusing to rebuild the receipt");
    }
    if shop.len() != 1 {
        bail!(
            "expected exactly one shop row for a single receipt, found {}",
            shop.len()
        );
    }
    Ok(Receipt {
        shop: shop.row(0),
        items: (0..items.len()).map(|idx| items.row(idx)).collect(),
    })
}
