use chrono::NaiveDateTime;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PosError, Result};
use crate::header::Table;
use crate::inventory::{InventorySnapshot, NewProduct, product_row};
use crate::manager::{DataManager, cell_text};
use crate::numeric::{TIMESTAMP_FORMAT, format_number, parse_date_time, parse_number};
use crate::sheet::{INVENTORY, PURCHASES, PURCHASES_HEADER, RowStore};

/// One line of a goods receipt
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportItem {
    pub product_id: String,
    /// Required for products that are not in TonKho yet
    pub name: String,
    pub unit: String,
    pub supplier: String,
    pub quantity: f64,
    pub cost_price: f64,
    pub sale_price: f64,
}

/// One row of LichSuNhap
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub row: usize,
    pub imported_at: Option<NaiveDateTime>,
    pub product_id: String,
    pub name: String,
    pub supplier: String,
    pub unit: String,
    pub quantity: f64,
    pub cost_price: f64,
    pub total: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImportSummary {
    pub lines: usize,
    pub total_cost: f64,
    /// Ids of products created by this receipt
    pub new_products: Vec<String>,
}

fn check_item(item: &ImportItem) -> Result<()> {
    if !item.quantity.is_finite() || item.quantity <= 0.0 {
        return Err(PosError::InvalidQuantity {
            product_id: item.product_id.trim().to_string(),
            quantity: item.quantity,
        });
    }
    for price in [item.cost_price, item.sale_price] {
        if !price.is_finite() || price < 0.0 {
            return Err(PosError::InvalidAmount { amount: price });
        }
    }
    if item.product_id.trim().is_empty() {
        return Err(PosError::InvalidProduct {
            message: "product id is required".to_string(),
        });
    }
    Ok(())
}

impl<S: RowStore> DataManager<S> {
    /// Receive goods into stock.
    ///
    /// Known products get their quantity raised and both prices replaced by the
    /// receipt's; unknown ones are added to TonKho. Each line is logged to
    /// LichSuNhap.
    pub fn process_import(&mut self, items: &[ImportItem]) -> Result<ImportSummary> {
        if items.is_empty() {
            return Err(PosError::EmptyCart);
        }

        let before = self.values(INVENTORY)?;
        let inventory = InventorySnapshot::from_values(before.clone(), self.default_min_stock);
        for item in items {
            check_item(item)?;
            if !inventory.contains(&item.product_id) && item.name.trim().is_empty() {
                return Err(PosError::InvalidProduct {
                    message: format!("new product {} needs a name", item.product_id.trim()),
                });
            }
        }

        let columns = inventory.columns;
        let timestamp = self.now().format(TIMESTAMP_FORMAT).to_string();
        let default_min_stock = self.default_min_stock;
        // sheet row and current stock of every product touched so far; the
        // first row holding an id wins, as in every lookup
        let mut stock: HashMap<String, (usize, f64)> = HashMap::new();
        for p in &inventory.products {
            stock.entry(p.id.clone()).or_insert((p.row, p.quantity));
        }
        let mut header_checked = false;
        let mut new_products = Vec::new();
        let mut log_rows = Vec::with_capacity(items.len());
        let mut total_cost = 0.0;

        self.transact(|dm, undo| {
            for item in items {
                let id = item.product_id.trim().to_string();
                let known = inventory.find(&id);
                let name = match known {
                    Some(p) if item.name.trim().is_empty() => p.name.clone(),
                    _ => item.name.trim().to_string(),
                };
                let unit = match known {
                    Some(p) if item.unit.trim().is_empty() => p.unit.clone(),
                    _ => item.unit.trim().to_string(),
                };

                match stock.get(&id).copied() {
                    Some((row, quantity)) => {
                        let updated = quantity + item.quantity;
                        for (col, value) in [
                            (columns.quantity, updated),
                            (columns.cost_price, item.cost_price),
                            (columns.sale_price, item.sale_price),
                        ] {
                            let old = cell_text(&before, row, col + 1);
                            dm.write_cell(undo, INVENTORY, row, col + 1, format_number(value), old)?;
                        }
                        stock.insert(id.clone(), (row, updated));
                    }
                    None => {
                        if !header_checked {
                            dm.extend_inventory_header(&inventory)?;
                            header_checked = true;
                        }
                        let product = NewProduct {
                            id: id.clone(),
                            name: name.clone(),
                            unit: unit.clone(),
                            quantity: item.quantity,
                            cost_price: item.cost_price,
                            sale_price: item.sale_price,
                            supplier: item.supplier.clone(),
                            min_stock: None,
                            expiry: None,
                        };
                        let row = product_row(&inventory, &id, &product, default_min_stock);
                        let sheet_row = dm.append_logged(undo, INVENTORY, vec![row])?;
                        stock.insert(id.clone(), (sheet_row, item.quantity));
                        new_products.push(id.clone());
                    }
                }

                let line_cost = item.quantity * item.cost_price;
                total_cost += line_cost;
                log_rows.push(vec![
                    timestamp.clone(),
                    id,
                    name,
                    item.supplier.trim().to_string(),
                    unit,
                    format_number(item.quantity),
                    format_number(item.cost_price),
                    format_number(line_cost),
                ]);
            }

            dm.append_logged(undo, PURCHASES, log_rows)?;
            Ok(())
        })?;

        info!(
            "received {} line(s) into stock, cost {}, {} new product(s)",
            items.len(),
            format_number(total_cost),
            new_products.len()
        );
        Ok(ImportSummary {
            lines: items.len(),
            total_cost,
            new_products,
        })
    }

    pub fn load_purchase_history(&self) -> Result<Vec<PurchaseRecord>> {
        let values = self.values(PURCHASES)?;
        let table = Table::with_fixed_header(values, &PURCHASES_HEADER);
        Ok(table
            .rows
            .iter()
            .enumerate()
            .map(|(i, cells)| PurchaseRecord {
                row: Table::sheet_row(i),
                imported_at: parse_date_time(&cells[0]),
                product_id: cells[1].trim().to_string(),
                name: cells[2].trim().to_string(),
                supplier: cells[3].trim().to_string(),
                unit: cells[4].trim().to_string(),
                quantity: parse_number(&cells[5]),
                cost_price: parse_number(&cells[6]),
                total: parse_number(&cells[7]),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Clock;
    use crate::sales::CartItem;
    use crate::sheet::{FailingStore, Workbook};
    use pretty_assertions::assert_eq;

    fn manager() -> DataManager<Workbook> {
        let mut book = Workbook::pharmacy();
        book.append_row(
            INVENTORY,
            ["P1", "Paracetamol", "Viên", "10", "500", "1000", "DHG", "", ""]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        )
        .unwrap();
        let mut dm = DataManager::new(book);
        dm.set_clock(Clock::Fixed(
            NaiveDateTime::parse_from_str("2025-04-01 08:00:00", TIMESTAMP_FORMAT).unwrap(),
        ));
        dm
    }

    fn item(id: &str, name: &str, quantity: f64, cost: f64, price: f64) -> ImportItem {
        ImportItem {
            product_id: id.to_string(),
            name: name.to_string(),
            unit: "Hộp".to_string(),
            supplier: "Pharmacity".to_string(),
            quantity,
            cost_price: cost,
            sale_price: price,
        }
    }

    #[test]
    fn restock_existing_product_updates_prices() {
        let mut dm = manager();
        let summary = dm
            .process_import(&[item("P1", "", 20.0, 550.0, 1200.0)])
            .unwrap();
        assert_eq!(summary.total_cost, 11_000.0);
        assert!(summary.new_products.is_empty());

        let p1 = dm.find_product("P1").unwrap();
        assert_eq!(p1.quantity, 30.0);
        assert_eq!(p1.cost_price, 550.0);
        assert_eq!(p1.sale_price, 1200.0);

        let log = dm.load_purchase_history().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].name, "Paracetamol");
        assert_eq!(log[0].total, 11_000.0);
    }

    #[test]
    fn new_product_is_created_and_accumulates() {
        let mut dm = manager();
        let summary = dm
            .process_import(&[
                item("N1", "Khẩu trang", 50.0, 1000.0, 2000.0),
                item("N1", "Khẩu trang", 25.0, 900.0, 2000.0),
            ])
            .unwrap();
        assert_eq!(summary.new_products, vec!["N1".to_string()]);
        assert_eq!(summary.lines, 2);

        let n1 = dm.find_product("N1").unwrap();
        assert_eq!(n1.row, 3);
        assert_eq!(n1.quantity, 75.0);
        assert_eq!(n1.cost_price, 900.0);
        assert_eq!(n1.supplier, "Pharmacity");
        assert_eq!(dm.load_inventory().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_ids_restock_the_first_row() {
        let mut dm = manager();
        dm.store_mut()
            .append_row(
                INVENTORY,
                ["P1", "Paracetamol (lô cũ)", "Viên", "7", "450", "1000", "DHG", "", ""]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            )
            .unwrap();

        dm.process_import(&[item("P1", "", 10.0, 600.0, 1200.0)])
            .unwrap();

        let p1 = dm.find_product("P1").unwrap();
        assert_eq!(p1.row, 2);
        assert_eq!(p1.quantity, 20.0);
        assert_eq!(p1.cost_price, 600.0);
        let values = dm.store().get_all_values(INVENTORY).unwrap();
        assert_eq!(values[2][3], "7");
        assert!(dm.checkout(&[CartItem::new("P1", 12.0)]).is_ok());
    }

    #[test]
    fn failed_purchase_log_undoes_stock_changes() {
        let mut book = Workbook::pharmacy();
        book.append_row(
            INVENTORY,
            ["P1", "Paracetamol", "Viên", "10", "500", "1000", "DHG", "", ""]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        )
        .unwrap();
        let mut dm = DataManager::new(FailingStore::new(book, PURCHASES));
        assert_eq!(dm.find_product("P1").unwrap().quantity, 10.0);

        let err = dm
            .process_import(&[
                item("P1", "", 5.0, 550.0, 1100.0),
                item("N1", "Khẩu trang", 50.0, 1000.0, 2000.0),
            ])
            .unwrap_err();
        assert!(matches!(err, PosError::Persistence { .. }));

        let p1 = dm.find_product("P1").unwrap();
        assert_eq!(p1.quantity, 10.0);
        assert_eq!(p1.cost_price, 500.0);
        assert_eq!(dm.load_inventory().unwrap().len(), 1);
        assert!(dm.load_purchase_history().unwrap().is_empty());
    }

    #[test]
    fn new_product_needs_name() {
        let mut dm = manager();
        let err = dm.process_import(&[item("N2", " ", 1.0, 1.0, 1.0)]).unwrap_err();
        assert!(matches!(err, PosError::InvalidProduct { .. }));
        assert!(dm.load_purchase_history().unwrap().is_empty());
    }

    #[test]
    fn invalid_lines_write_nothing() {
        let mut dm = manager();
        assert!(matches!(
            dm.process_import(&[item("P1", "", 5.0, 1.0, 1.0), item("P1", "", -1.0, 1.0, 1.0)]),
            Err(PosError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            dm.process_import(&[item("P1", "", 5.0, -1.0, 1.0)]),
            Err(PosError::InvalidAmount { .. })
        ));
        assert!(matches!(dm.process_import(&[]), Err(PosError::EmptyCart)));
        assert_eq!(dm.find_product("P1").unwrap().quantity, 10.0);
    }
}
