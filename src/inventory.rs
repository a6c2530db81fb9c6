use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PosError, Result};
use crate::header::Table;
use crate::manager::DataManager;
use crate::numeric::{format_number, parse_date, parse_number};
use crate::sheet::{INVENTORY, INVENTORY_HEADER, RowStore, cell_name};

/// One row of TonKho
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Sheet row holding this product (1-based, header is row 1)
    pub row: usize,
    pub id: String,
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub cost_price: f64,
    pub sale_price: f64,
    pub supplier: String,
    pub min_stock: f64,
    pub expiry: Option<NaiveDate>,
}

impl Product {
    /// Stock valued at purchase price
    pub fn cost_value(&self) -> f64 {
        self.quantity * self.cost_price
    }

    /// Stock valued at sale price
    pub fn sale_value(&self) -> f64 {
        self.quantity * self.sale_price
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.min_stock
    }

}

/// Where each TonKho field lives in the current sheet (0-based).
///
/// Names are looked up in the header first. Fields the header does not name
/// get fresh columns past the last header cell, in canonical order, so an old
/// seven-column sheet grows TonToiThieu and HanSuDung at positions 8 and 9.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InventoryColumns {
    pub id: usize,
    pub name: usize,
    pub unit: usize,
    pub quantity: usize,
    pub cost_price: usize,
    pub sale_price: usize,
    pub supplier: usize,
    pub min_stock: usize,
    pub expiry: usize,
}

impl InventoryColumns {
    pub fn resolve(table: &Table) -> Self {
        // An empty worksheet has no header at all: use the canonical layout
        if table.headers.is_empty() {
            return InventoryColumns {
                id: 0,
                name: 1,
                unit: 2,
                quantity: 3,
                cost_price: 4,
                sale_price: 5,
                supplier: 6,
                min_stock: 7,
                expiry: 8,
            };
        }

        let mut next_free = table.headers.len();
        let mut locate = |name: &str| {
            table.column(name).unwrap_or_else(|| {
                next_free += 1;
                next_free - 1
            })
        };

        InventoryColumns {
            id: locate("MaSanPham"),
            name: locate("TenSanPham"),
            unit: locate("DonVi"),
            quantity: locate("SoLuong"),
            cost_price: locate("GiaNhap"),
            sale_price: locate("GiaBan"),
            supplier: locate("NhaCungCap"),
            min_stock: locate("TonToiThieu"),
            expiry: locate("HanSuDung"),
        }
    }

    /// Number of cells a full product row needs
    pub fn width(&self, table: &Table) -> usize {
        [
            self.id,
            self.name,
            self.unit,
            self.quantity,
            self.cost_price,
            self.sale_price,
            self.supplier,
            self.min_stock,
            self.expiry,
        ]
        .into_iter()
        .max()
        .map_or(0, |m| m + 1)
        .max(table.headers.len())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InventorySnapshot {
    pub columns: InventoryColumns,
    /// Named header cells currently in row 1
    pub header_len: usize,
    pub width: usize,
    pub products: Vec<Product>,
}

impl InventorySnapshot {
    pub fn from_values(values: Vec<Vec<String>>, default_min_stock: f64) -> Self {
        let table = Table::from_values(values);
        let columns = InventoryColumns::resolve(&table);
        let width = columns.width(&table);

        fn cell(row: &[String], col: usize) -> &str {
            row.get(col).map(|s| s.trim()).unwrap_or("")
        }

        let products = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let min_stock = cell(row, columns.min_stock);
                Product {
                    row: Table::sheet_row(i),
                    id: cell(row, columns.id).to_string(),
                    name: cell(row, columns.name).to_string(),
                    unit: cell(row, columns.unit).to_string(),
                    quantity: parse_number(cell(row, columns.quantity)),
                    cost_price: parse_number(cell(row, columns.cost_price)),
                    sale_price: parse_number(cell(row, columns.sale_price)),
                    supplier: cell(row, columns.supplier).to_string(),
                    min_stock: if min_stock.is_empty() {
                        default_min_stock
                    } else {
                        parse_number(min_stock)
                    },
                    expiry: parse_date(cell(row, columns.expiry)),
                }
            })
            .collect();

        InventorySnapshot {
            columns,
            header_len: table.headers.len(),
            width,
            products,
        }
    }

    /// First product whose id matches, by linear scan
    pub fn find(&self, product_id: &str) -> Option<&Product> {
        let product_id = product_id.trim();
        self.products.iter().find(|p| p.id == product_id)
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.find(product_id).is_some()
    }
}

/// Catalogue entry for a product added without a stock receipt
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewProduct {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub cost_price: f64,
    pub sale_price: f64,
    pub supplier: String,
    pub min_stock: Option<f64>,
    pub expiry: Option<NaiveDate>,
}

impl<S: RowStore> DataManager<S> {
    /// Inventory as currently stored, bypassing the cache
    pub(crate) fn fresh_inventory(&self) -> Result<InventorySnapshot> {
        let values = self.values(INVENTORY)?;
        Ok(InventorySnapshot::from_values(values, self.default_min_stock))
    }

    /// Name the columns a new product row is about to fill beyond the header
    pub(crate) fn extend_inventory_header(&mut self, snapshot: &InventorySnapshot) -> Result<()> {
        if snapshot.header_len == 0 && self.values(INVENTORY)?.is_empty() {
            let header = INVENTORY_HEADER.iter().map(|h| h.to_string()).collect();
            return self.store.append_row(INVENTORY, header);
        }

        let c = snapshot.columns;
        let fields = [
            (c.id, "MaSanPham"),
            (c.name, "TenSanPham"),
            (c.unit, "DonVi"),
            (c.quantity, "SoLuong"),
            (c.cost_price, "GiaNhap"),
            (c.sale_price, "GiaBan"),
            (c.supplier, "NhaCungCap"),
            (c.min_stock, "TonToiThieu"),
            (c.expiry, "HanSuDung"),
        ];
        for (col, name) in fields {
            if col >= snapshot.header_len {
                warn!("{} has no {} column, adding it at {}", INVENTORY, name, cell_name(1, col + 1));
                self.store.update_cell(INVENTORY, 1, col + 1, name.to_string())?;
            }
        }
        Ok(())
    }

    /// Inventory snapshot, served from the read cache while it is fresh
    pub fn inventory_snapshot(&mut self) -> Result<InventorySnapshot> {
        if let Some(snapshot) = self.inventory_cache.get() {
            debug!("inventory cache hit");
            return Ok(snapshot);
        }
        debug!("inventory cache miss, reading {}", INVENTORY);
        let snapshot = self.fresh_inventory()?;
        self.inventory_cache.put(snapshot.clone());
        Ok(snapshot)
    }

    pub fn load_inventory(&mut self) -> Result<Vec<Product>> {
        Ok(self.inventory_snapshot()?.products)
    }

    pub fn find_product(&mut self, product_id: &str) -> Result<Product> {
        self.inventory_snapshot()?
            .find(product_id)
            .cloned()
            .ok_or_else(|| PosError::ProductNotFound {
                product_id: product_id.trim().to_string(),
            })
    }

    /// Case-insensitive substring match on name or id; empty query lists everything
    pub fn search_products(&mut self, query: &str) -> Result<Vec<Product>> {
        let query = query.trim().to_lowercase();
        let products = self.load_inventory()?;
        if query.is_empty() {
            return Ok(products);
        }
        Ok(products
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&query) || p.id.to_lowercase().contains(&query)
            })
            .collect())
    }

    /// Suggested id for a new product: one past the number of products
    pub fn next_product_id(&mut self) -> Result<String> {
        Ok((self.load_inventory()?.len() + 1).to_string())
    }

    /// `candidate` if unused, otherwise `candidate_MMSS` from the current time
    pub fn unique_product_id(&mut self, candidate: &str) -> Result<String> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return self.next_product_id();
        }
        if self.fresh_inventory()?.contains(candidate) {
            let suffixed = format!("{}_{}", candidate, self.now().format("%M%S"));
            info!("product id {} already exists, using {}", candidate, suffixed);
            return Ok(suffixed);
        }
        Ok(candidate.to_string())
    }

    /// Append a catalogue entry and return the id it was stored under
    pub fn add_product(&mut self, product: NewProduct) -> Result<String> {
        if product.name.trim().is_empty() {
            return Err(PosError::InvalidProduct {
                message: "product name is required".to_string(),
            });
        }
        if product.quantity < 0.0 || product.cost_price < 0.0 || product.sale_price < 0.0 {
            return Err(PosError::InvalidProduct {
                message: format!("negative quantity or price for {}", product.name.trim()),
            });
        }

        let id = self.unique_product_id(&product.id)?;
        let snapshot = self.fresh_inventory()?;
        let row = product_row(&snapshot, &id, &product, self.default_min_stock);
        self.extend_inventory_header(&snapshot)?;
        self.store.append_row(INVENTORY, row)?;
        self.invalidate();

        info!("added product {} ({})", id, product.name.trim());
        Ok(id)
    }
}

/// Lay out a new TonKho row following the sheet's current column positions
pub(crate) fn product_row(
    snapshot: &InventorySnapshot,
    id: &str,
    product: &NewProduct,
    default_min_stock: f64,
) -> Vec<String> {
    let c = snapshot.columns;
    let mut row = vec![String::new(); snapshot.width];
    row[c.id] = id.to_string();
    row[c.name] = product.name.trim().to_string();
    row[c.unit] = product.unit.trim().to_string();
    row[c.quantity] = format_number(product.quantity);
    row[c.cost_price] = format_number(product.cost_price);
    row[c.sale_price] = format_number(product.sale_price);
    row[c.supplier] = product.supplier.trim().to_string();
    row[c.min_stock] = format_number(product.min_stock.unwrap_or(default_min_stock));
    row[c.expiry] = product
        .expiry
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    row
}
