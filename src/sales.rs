use chrono::NaiveDateTime;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PosError, Result};
use crate::header::{Table, normalize_row};
use crate::inventory::InventorySnapshot;
use crate::manager::{DataManager, cell_text};
use crate::numeric::{
    ORDER_ID_FORMAT, TIMESTAMP_FORMAT, format_number, parse_date_time, parse_number,
};
use crate::sheet::{INVENTORY, RowStore, SALES, SALES_HEADER};

// 1-based LichSuBan columns rewritten by partial returns
const COL_QUANTITY: usize = 6;
const COL_REVENUE: usize = 8;
const COL_PROFIT: usize = 10;

/// Tolerance when comparing quantities read back from the sheet
const EPSILON: f64 = 1e-9;

/// One line of a customer's basket
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: f64,
    /// Overrides the listed sale price when set
    #[serde(default)]
    pub unit_price: Option<f64>,
}

impl CartItem {
    pub fn new(product_id: &str, quantity: f64) -> Self {
        CartItem {
            product_id: product_id.to_string(),
            quantity,
            unit_price: None,
        }
    }
}

/// One row of LichSuBan
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    /// Sheet row (1-based, header is row 1)
    pub row: usize,
    pub sold_at: Option<NaiveDateTime>,
    pub order_id: String,
    pub product_id: String,
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub revenue: f64,
    /// Purchase price at the moment of sale
    pub cost_price: f64,
    pub profit: f64,
}

impl SaleRecord {
    fn from_row(row: usize, cells: &[String]) -> Self {
        let text = |i: usize| cells.get(i).map(|s| s.trim()).unwrap_or("");
        let number = |i: usize| parse_number(text(i));
        SaleRecord {
            row,
            sold_at: parse_date_time(text(0)),
            order_id: text(1).to_string(),
            product_id: text(2).to_string(),
            name: text(3).to_string(),
            unit: text(4).to_string(),
            quantity: number(5),
            unit_price: number(6),
            revenue: number(7),
            cost_price: number(8),
            profit: number(9),
        }
    }

    pub fn to_cells(&self, timestamp: &str) -> Vec<String> {
        vec![
            timestamp.to_string(),
            self.order_id.clone(),
            self.product_id.clone(),
            self.name.clone(),
            self.unit.clone(),
            format_number(self.quantity),
            format_number(self.unit_price),
            format_number(self.revenue),
            format_number(self.cost_price),
            format_number(self.profit),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Receipt {
    pub order_id: String,
    pub timestamp: NaiveDateTime,
    pub lines: Vec<SaleRecord>,
    pub total: f64,
    pub profit: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Refund {
    pub order_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub amount: f64,
    pub profit_reversed: f64,
    /// Whether the product was found in TonKho and restocked
    pub restocked: bool,
}

fn check_quantity(product_id: &str, quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(PosError::InvalidQuantity {
            product_id: product_id.trim().to_string(),
            quantity,
        });
    }
    Ok(())
}

impl<S: RowStore> DataManager<S> {
    /// Sell a basket: take the goods out of stock and log one sale row per line.
    ///
    /// Every line is checked against the current stock before anything is
    /// written, so a basket either goes through whole or not at all.
    pub fn checkout(&mut self, cart: &[CartItem]) -> Result<Receipt> {
        if cart.is_empty() {
            return Err(PosError::EmptyCart);
        }

        let before = self.values(INVENTORY)?;
        let inventory = InventorySnapshot::from_values(before.clone(), self.default_min_stock);
        let mut remaining: HashMap<&str, f64> = HashMap::new();
        let mut touched = Vec::new();

        for item in cart {
            check_quantity(&item.product_id, item.quantity)?;
            let product =
                inventory
                    .find(&item.product_id)
                    .ok_or_else(|| PosError::ProductNotFound {
                        product_id: item.product_id.trim().to_string(),
                    })?;

            let left = remaining.entry(product.id.as_str()).or_insert_with(|| {
                touched.push(product);
                product.quantity
            });
            *left -= item.quantity;
            if *left < -EPSILON {
                return Err(PosError::InsufficientStock {
                    product_id: product.id.clone(),
                    requested: product.quantity - *left,
                    available: product.quantity,
                });
            }
        }

        let now = self.now();
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let order_id = self.allocate_order_id(now)?;

        let mut lines = Vec::with_capacity(cart.len());
        for item in cart {
            // validated above
            let Some(product) = inventory.find(&item.product_id) else {
                continue;
            };
            let unit_price = item.unit_price.unwrap_or(product.sale_price);
            lines.push(SaleRecord {
                row: 0,
                sold_at: Some(now),
                order_id: order_id.clone(),
                product_id: product.id.clone(),
                name: product.name.clone(),
                unit: product.unit.clone(),
                quantity: item.quantity,
                unit_price,
                revenue: unit_price * item.quantity,
                cost_price: product.cost_price,
                profit: (unit_price - product.cost_price) * item.quantity,
            });
        }

        let quantity_col = inventory.columns.quantity + 1;
        let rows: Vec<Vec<String>> = lines.iter().map(|l| l.to_cells(&timestamp)).collect();
        let committed = self.transact(|dm, undo| {
            let first_row = dm.append_logged(undo, SALES, rows)?;
            for product in &touched {
                let left = format_number(remaining[product.id.as_str()]);
                let old = cell_text(&before, product.row, quantity_col);
                dm.write_cell(undo, INVENTORY, product.row, quantity_col, left, old)?;
            }
            Ok(first_row)
        });
        let first_row = match committed {
            Ok(first_row) => first_row,
            Err(e) => {
                error!("checkout {} failed, nothing sold: {}", order_id, e);
                return Err(e);
            }
        };
        for (i, line) in lines.iter_mut().enumerate() {
            line.row = first_row + i;
        }

        let total: f64 = lines.iter().map(|l| l.revenue).sum();
        let profit: f64 = lines.iter().map(|l| l.profit).sum();
        info!(
            "order {} sold {} line(s), total {}, profit {}",
            order_id,
            lines.len(),
            format_number(total),
            format_number(profit)
        );

        Ok(Receipt {
            order_id,
            timestamp: now,
            lines,
            total,
            profit,
        })
    }

    /// Checkout where the customer pays later; the total is charged to their debt
    pub fn checkout_on_credit(&mut self, cart: &[CartItem], customer: &str) -> Result<Receipt> {
        if customer.trim().is_empty() {
            return Err(PosError::MissingCustomer);
        }
        let receipt = self.checkout(cart)?;
        if receipt.total > 0.0 {
            self.record_charge(customer, receipt.total, &receipt.order_id, "Mua chịu")?;
        }
        Ok(receipt)
    }

    /// Order ids are the checkout time to the second; a clash within the same
    /// second gets a `-n` suffix
    fn allocate_order_id(&self, now: NaiveDateTime) -> Result<String> {
        let base = now.format(ORDER_ID_FORMAT).to_string();
        let values = self.values(SALES)?;
        let taken = |id: &str| {
            values
                .iter()
                .skip(1)
                .any(|row| row.get(1).map(|s| s.trim()) == Some(id))
        };

        if !taken(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Every sale ever logged, each row normalised to the ten LichSuBan columns
    pub fn load_sales_history(&self) -> Result<Vec<SaleRecord>> {
        let values = self.values(SALES)?;
        if values.len() < 2 {
            return Ok(Vec::new());
        }
        let table = Table::with_fixed_header(values, &SALES_HEADER);
        Ok(table
            .rows
            .iter()
            .enumerate()
            .map(|(i, cells)| SaleRecord::from_row(Table::sheet_row(i), cells))
            .collect())
    }

    /// Lines of one order, in the order they were sold
    pub fn find_order(&self, order_id: &str) -> Result<Vec<SaleRecord>> {
        let order_id = order_id.trim();
        Ok(self
            .load_sales_history()?
            .into_iter()
            .filter(|s| s.order_id == order_id)
            .collect())
    }

    /// Take back `quantity` of a product sold in `order_id`.
    ///
    /// The most recent matching sale row is used. A full return deletes it, a
    /// partial one shrinks its quantity, revenue and profit.
    pub fn process_return(
        &mut self,
        order_id: &str,
        product_id: &str,
        quantity: f64,
    ) -> Result<Refund> {
        check_quantity(product_id, quantity)?;
        let order_id = order_id.trim();
        let product_id = product_id.trim();

        let values = self.values(SALES)?;
        let found = values.iter().enumerate().skip(1).rev().find(|(_, row)| {
            row.len() > 2 && row[1].trim() == order_id && row[2].trim() == product_id
        });
        let Some((index, cells)) = found else {
            return Err(PosError::SaleNotFound {
                order_id: order_id.to_string(),
                product_id: product_id.to_string(),
            });
        };

        let sheet_row = index + 1;
        let sale = SaleRecord::from_row(sheet_row, &normalize_row(cells.clone(), SALES_HEADER.len()));
        if quantity > sale.quantity + EPSILON {
            return Err(PosError::InvalidQuantity {
                product_id: product_id.to_string(),
                quantity,
            });
        }

        let before = self.values(INVENTORY)?;
        let inventory = InventorySnapshot::from_values(before.clone(), self.default_min_stock);
        let product = inventory.find(product_id);
        if product.is_none() {
            warn!(
                "returned product {} is no longer in inventory, stock not restored",
                product_id
            );
        }
        let restocked = product.is_some();
        let quantity_col = inventory.columns.quantity + 1;

        self.transact(|dm, undo| {
            if let Some(product) = product {
                let old = cell_text(&before, product.row, quantity_col);
                let restored = format_number(product.quantity + quantity);
                dm.write_cell(undo, INVENTORY, product.row, quantity_col, restored, old)?;
            }

            let left = sale.quantity - quantity;
            if left <= EPSILON {
                // last write: nothing after it can fail
                return dm.store.delete_rows(SALES, sheet_row);
            }
            let revenue = sale.unit_price * left;
            let profit = (sale.unit_price - sale.cost_price) * left;
            for (col, value) in [
                (COL_QUANTITY, left),
                (COL_REVENUE, revenue),
                (COL_PROFIT, profit),
            ] {
                let old = cell_text(&values, sheet_row, col);
                dm.write_cell(undo, SALES, sheet_row, col, format_number(value), old)?;
            }
            Ok(())
        })?;

        let refund = Refund {
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            quantity,
            amount: sale.unit_price * quantity,
            profit_reversed: (sale.unit_price - sale.cost_price) * quantity,
            restocked,
        };
        info!(
            "order {} returned {} x {}, refund {}",
            order_id,
            format_number(quantity),
            product_id,
            format_number(refund.amount)
        );
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Clock;
    use crate::sheet::{FailingStore, Workbook};

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn at(ts: &str) -> Clock {
        Clock::Fixed(NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap())
    }

    fn book() -> Workbook {
        let mut book = Workbook::pharmacy();
        book.append_rows(
            INVENTORY,
            vec![
                strings(&["P1", "Paracetamol", "Viên", "100", "500", "1000"]),
                strings(&["P2", "Siro ho", "Chai", "3", "30000", "45000"]),
            ],
        )
        .unwrap();
        book
    }

    fn manager() -> DataManager<Workbook> {
        let mut dm = DataManager::new(book());
        dm.set_clock(at("2025-03-08 09:15:00"));
        dm
    }

    fn stored_quantity<S: RowStore>(dm: &DataManager<S>, row: usize) -> String {
        dm.store().get_all_values(INVENTORY).unwrap()[row - 1][3].clone()
    }

    #[test]
    fn checkout_updates_stock_and_logs_profit() {
        let mut dm = manager();
        let receipt = dm
            .checkout(&[CartItem::new("P1", 10.0), CartItem::new("P2", 1.0)])
            .unwrap();

        assert_eq!(receipt.order_id, "20250308091500");
        assert_eq!(receipt.total, 10_000.0 + 45_000.0);
        assert_eq!(receipt.profit, 5_000.0 + 15_000.0);
        assert_eq!(dm.find_product("P1").unwrap().quantity, 90.0);
        assert_eq!(dm.find_product("P2").unwrap().quantity, 2.0);

        let history = dm.load_sales_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].row, 2);
        assert_eq!(history[0].cost_price, 500.0);
        assert_eq!(history[1].profit, 15_000.0);
        assert_eq!(receipt.lines[1].row, 3);
    }

    #[test]
    fn duplicate_lines_share_the_stock() {
        let mut dm = manager();
        let err = dm
            .checkout(&[CartItem::new("P2", 2.0), CartItem::new("P2", 2.0)])
            .unwrap_err();
        assert!(matches!(
            err,
            PosError::InsufficientStock { requested, available, .. } if requested == 4.0 && available == 3.0
        ));
        // nothing written
        assert_eq!(dm.find_product("P2").unwrap().quantity, 3.0);
        assert!(dm.load_sales_history().unwrap().is_empty());
    }

    #[test]
    fn unknown_product_rejects_whole_cart() {
        let mut dm = manager();
        let err = dm
            .checkout(&[CartItem::new("P1", 1.0), CartItem::new("X", 1.0)])
            .unwrap_err();
        assert!(matches!(err, PosError::ProductNotFound { .. }));
        assert_eq!(dm.find_product("P1").unwrap().quantity, 100.0);
    }

    #[test]
    fn empty_cart_and_bad_quantity() {
        let mut dm = manager();
        assert!(matches!(dm.checkout(&[]), Err(PosError::EmptyCart)));
        assert!(matches!(
            dm.checkout(&[CartItem::new("P1", 0.0)]),
            Err(PosError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn failed_sales_log_leaves_stock_untouched() {
        let mut dm = DataManager::new(FailingStore::new(book(), SALES));
        assert_eq!(dm.find_product("P1").unwrap().quantity, 100.0);

        let err = dm.checkout(&[CartItem::new("P1", 4.0)]).unwrap_err();
        assert!(matches!(err, PosError::Persistence { .. }));
        assert_eq!(stored_quantity(&dm, 2), "100");
        assert_eq!(dm.find_product("P1").unwrap().quantity, 100.0);
        assert!(dm.load_sales_history().unwrap().is_empty());
    }

    #[test]
    fn failed_stock_update_removes_logged_sale() {
        let mut dm = DataManager::new(FailingStore::new(book(), INVENTORY));
        assert_eq!(dm.find_product("P1").unwrap().quantity, 100.0);

        assert!(dm
            .checkout(&[CartItem::new("P1", 4.0), CartItem::new("P2", 1.0)])
            .is_err());
        assert!(dm.load_sales_history().unwrap().is_empty());
        assert_eq!(dm.find_product("P1").unwrap().quantity, 100.0);
    }

    #[test]
    fn failed_return_restores_stock() {
        let mut book = book();
        book.append_row(
            SALES,
            strings(&["2025-03-08 09:00:00", "A1", "P1", "Paracetamol", "Viên", "5", "1000", "5000", "500", "2500"]),
        )
        .unwrap();
        let mut dm = DataManager::new(FailingStore::new(book, SALES));

        assert!(dm.process_return("A1", "P1", 5.0).is_err());
        assert!(dm.process_return("A1", "P1", 2.0).is_err());
        assert_eq!(stored_quantity(&dm, 2), "100");
        assert_eq!(dm.find_product("P1").unwrap().quantity, 100.0);
        assert_eq!(dm.load_sales_history().unwrap()[0].quantity, 5.0);
    }

    #[test]
    fn same_second_orders_get_distinct_ids() {
        let mut dm = manager();
        let first = dm.checkout(&[CartItem::new("P1", 1.0)]).unwrap();
        let second = dm.checkout(&[CartItem::new("P1", 1.0)]).unwrap();
        assert_eq!(first.order_id, "20250308091500");
        assert_eq!(second.order_id, "20250308091500-2");
    }

    #[test]
    fn price_override() {
        let mut dm = manager();
        let receipt = dm
            .checkout(&[CartItem {
                product_id: "P1".to_string(),
                quantity: 2.0,
                unit_price: Some(800.0),
            }])
            .unwrap();
        assert_eq!(receipt.total, 1600.0);
        assert_eq!(receipt.profit, 600.0);
    }

    #[test]
    fn full_return_deletes_the_row() {
        let mut dm = manager();
        let receipt = dm.checkout(&[CartItem::new("P2", 2.0)]).unwrap();

        let refund = dm.process_return(&receipt.order_id, "P2", 2.0).unwrap();
        assert_eq!(refund.amount, 90_000.0);
        assert_eq!(refund.profit_reversed, 30_000.0);
        assert!(refund.restocked);
        assert_eq!(dm.find_product("P2").unwrap().quantity, 3.0);
        assert!(dm.load_sales_history().unwrap().is_empty());
    }

    #[test]
    fn partial_return_shrinks_the_row() {
        let mut dm = manager();
        let receipt = dm.checkout(&[CartItem::new("P1", 10.0)]).unwrap();

        dm.process_return(&receipt.order_id, "P1", 4.0).unwrap();
        let history = dm.load_sales_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quantity, 6.0);
        assert_eq!(history[0].revenue, 6_000.0);
        assert_eq!(history[0].profit, 3_000.0);
        assert_eq!(dm.find_product("P1").unwrap().quantity, 94.0);
    }

    #[test]
    fn return_more_than_sold_is_rejected() {
        let mut dm = manager();
        let receipt = dm.checkout(&[CartItem::new("P1", 1.0)]).unwrap();
        assert!(matches!(
            dm.process_return(&receipt.order_id, "P1", 2.0),
            Err(PosError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            dm.process_return("nope", "P1", 1.0),
            Err(PosError::SaleNotFound { .. })
        ));
    }

    #[test]
    fn return_of_delisted_product_still_adjusts_history() {
        let mut book = Workbook::pharmacy();
        book.append_row(
            SALES,
            strings(&["2025-01-02 08:00:00", "A1", "GONE", "Old", "Hộp", "1", "10", "10", "4", "6"]),
        )
        .unwrap();
        let mut dm = DataManager::new(book);

        let refund = dm.process_return("A1", "GONE", 1.0).unwrap();
        assert!(!refund.restocked);
        assert!(dm.load_sales_history().unwrap().is_empty());
    }

    #[test]
    fn short_and_long_rows_are_normalised() {
        let mut book = Workbook::pharmacy();
        book.append_rows(
            SALES,
            vec![
                strings(&["2025-01-02 08:00:00", "A1", "P1"]),
                strings(&["bad date", "A2", "P1", "X", "Viên", "2", "1,000", "2,000", "500", "1,000", "extra"]),
            ],
        )
        .unwrap();
        let dm = DataManager::new(book);

        let history = dm.load_sales_history().unwrap();
        assert_eq!(history[0].quantity, 0.0);
        assert!(history[0].sold_at.is_some());
        assert!(history[1].sold_at.is_none());
        assert_eq!(history[1].revenue, 2000.0);
    }

    #[test]
    fn latest_matching_row_is_returned_first() {
        let mut book = Workbook::pharmacy();
        book.append_rows(
            SALES,
            vec![
                strings(&["2025-01-02 08:00:00", "A1", "P1", "X", "Viên", "1", "10", "10", "4", "6"]),
                strings(&["2025-01-02 08:00:00", "A1", "P1", "X", "Viên", "5", "10", "50", "4", "30"]),
            ],
        )
        .unwrap();
        let mut dm = DataManager::new(book);

        dm.process_return("A1", "P1", 5.0).unwrap();
        let history = dm.load_sales_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quantity, 1.0);
    }
}
