//! Dashboards over loaded ledger data.
//!
//! Everything here is a pure function of the rows handed in, so the same
//! numbers back the CLI, the web API and the exports.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::inventory::Product;
use crate::manager::DataManager;
use crate::purchases::PurchaseRecord;
use crate::sales::SaleRecord;
use crate::sheet::RowStore;

/// Revenue and profit for one bucket of a chart
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodPoint {
    pub label: String,
    pub revenue: f64,
    pub profit: f64,
    /// Spend on goods received in the same bucket
    pub purchases: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodReport {
    pub title: String,
    pub points: Vec<PeriodPoint>,
    pub revenue: f64,
    pub profit: f64,
    pub purchases: f64,
}

impl PeriodReport {
    fn from_buckets(title: String, buckets: BTreeMap<String, PeriodPoint>) -> Self {
        let points: Vec<PeriodPoint> = buckets.into_values().collect();
        PeriodReport {
            title,
            revenue: points.iter().map(|p| p.revenue).sum(),
            profit: points.iter().map(|p| p.profit).sum(),
            purchases: points.iter().map(|p| p.purchases).sum(),
            points,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Totals {
    pub revenue: f64,
    pub profit: f64,
    pub purchases: f64,
    pub orders: usize,
    pub units_sold: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum StockOrder {
    #[default]
    Ascending,
    Descending,
}

impl std::str::FromStr for StockOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(StockOrder::Ascending),
            "desc" | "descending" => Ok(StockOrder::Descending),
            other => Err(format!("unknown sort order {:?}, use asc or desc", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Valuation {
    pub sku_count: usize,
    pub total_cost: f64,
    pub total_sale_value: f64,
    pub products: Vec<Product>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpiryAlert {
    pub product: Product,
    /// Negative once the product has expired
    pub days_left: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dashboard {
    pub date: NaiveDate,
    pub sku_count: usize,
    pub stock_units: f64,
    pub stock_cost: f64,
    pub today: Totals,
    pub month: Totals,
    pub low_stock: usize,
    pub outstanding_debt: f64,
}

fn sold_on(sale: &SaleRecord) -> Option<NaiveDate> {
    sale.sold_at.map(|ts| ts.date())
}

fn bucket<'a>(
    buckets: &'a mut BTreeMap<String, PeriodPoint>,
    key: String,
    label: String,
) -> &'a mut PeriodPoint {
    buckets.entry(key).or_insert_with(|| PeriodPoint {
        label,
        revenue: 0.0,
        profit: 0.0,
        purchases: 0.0,
    })
}

/// Sales made on `date`, newest first
pub fn daily_sales(history: &[SaleRecord], date: NaiveDate) -> Vec<SaleRecord> {
    let mut sales: Vec<SaleRecord> = history
        .iter()
        .filter(|s| sold_on(s) == Some(date))
        .cloned()
        .collect();
    sales.sort_by(|a, b| b.sold_at.cmp(&a.sold_at).then(b.row.cmp(&a.row)));
    sales
}

/// Day-by-day revenue and profit for one month, labelled `dd/mm`
pub fn monthly_by_day(
    history: &[SaleRecord],
    purchases: &[PurchaseRecord],
    year: i32,
    month: u32,
) -> PeriodReport {
    let in_month = |d: NaiveDate| d.year() == year && d.month() == month;
    let mut buckets = BTreeMap::new();

    for sale in history {
        let Some(day) = sold_on(sale).filter(|d| in_month(*d)) else {
            continue;
        };
        let point = bucket(&mut buckets, day.to_string(), day.format("%d/%m").to_string());
        point.revenue += sale.revenue;
        point.profit += sale.profit;
    }
    for purchase in purchases {
        let Some(day) = purchase.imported_at.map(|ts| ts.date()).filter(|d| in_month(*d)) else {
            continue;
        };
        bucket(&mut buckets, day.to_string(), day.format("%d/%m").to_string()).purchases +=
            purchase.total;
    }

    PeriodReport::from_buckets(format!("{:02}/{}", month, year), buckets)
}

/// Month-by-month revenue, profit and purchase spend for one year
pub fn yearly_by_month(
    history: &[SaleRecord],
    purchases: &[PurchaseRecord],
    year: i32,
) -> PeriodReport {
    let mut buckets = BTreeMap::new();
    let key = |d: NaiveDate| (format!("{:02}", d.month()), d.format("%m/%Y").to_string());

    for sale in history {
        let Some(day) = sold_on(sale).filter(|d| d.year() == year) else {
            continue;
        };
        let (k, label) = key(day);
        let point = bucket(&mut buckets, k, label);
        point.revenue += sale.revenue;
        point.profit += sale.profit;
    }
    for purchase in purchases {
        let Some(day) = purchase
            .imported_at
            .map(|ts| ts.date())
            .filter(|d| d.year() == year)
        else {
            continue;
        };
        let (k, label) = key(day);
        bucket(&mut buckets, k, label).purchases += purchase.total;
    }

    PeriodReport::from_buckets(year.to_string(), buckets)
}

/// Year-by-year revenue, profit and purchase spend over the whole history
pub fn by_year(history: &[SaleRecord], purchases: &[PurchaseRecord]) -> PeriodReport {
    let mut buckets = BTreeMap::new();
    for sale in history {
        let Some(day) = sold_on(sale) else { continue };
        let point = bucket(&mut buckets, day.year().to_string(), day.year().to_string());
        point.revenue += sale.revenue;
        point.profit += sale.profit;
    }
    for purchase in purchases {
        let Some(day) = purchase.imported_at.map(|ts| ts.date()) else {
            continue;
        };
        bucket(&mut buckets, day.year().to_string(), day.year().to_string()).purchases +=
            purchase.total;
    }
    PeriodReport::from_buckets("all years".to_string(), buckets)
}

/// Totals for sales and purchases dated within `from..=to`
pub fn period_totals(
    history: &[SaleRecord],
    purchases: &[PurchaseRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Totals {
    let within = |d: Option<NaiveDate>| d.is_some_and(|d| d >= from && d <= to);
    let mut totals = Totals::default();
    let mut orders = std::collections::BTreeSet::new();

    for sale in history.iter().filter(|s| within(sold_on(s))) {
        totals.revenue += sale.revenue;
        totals.profit += sale.profit;
        totals.units_sold += sale.quantity;
        orders.insert(sale.order_id.as_str());
    }
    totals.orders = orders.len();
    totals.purchases = purchases
        .iter()
        .filter(|p| within(p.imported_at.map(|ts| ts.date())))
        .map(|p| p.total)
        .sum();
    totals
}

pub fn inventory_valuation(products: &[Product], order: StockOrder) -> Valuation {
    let mut rows = products.to_vec();
    rows.sort_by(|a, b| match order {
        StockOrder::Ascending => a.quantity.total_cmp(&b.quantity),
        StockOrder::Descending => b.quantity.total_cmp(&a.quantity),
    });
    Valuation {
        sku_count: products.len(),
        total_cost: products.iter().map(Product::cost_value).sum(),
        total_sale_value: products.iter().map(Product::sale_value).sum(),
        products: rows,
    }
}

/// Products at or below their minimum stock, emptiest first
pub fn low_stock(products: &[Product]) -> Vec<Product> {
    let mut low: Vec<Product> = products.iter().filter(|p| p.is_low_stock()).cloned().collect();
    low.sort_by(|a, b| a.quantity.total_cmp(&b.quantity));
    low
}

/// Products expiring within `within_days` of `today`, expired ones included
pub fn expiring(products: &[Product], today: NaiveDate, within_days: i64) -> Vec<ExpiryAlert> {
    let mut alerts: Vec<ExpiryAlert> = products
        .iter()
        .filter_map(|p| {
            let days_left = (p.expiry? - today).num_days();
            (days_left <= within_days).then(|| ExpiryAlert {
                product: p.clone(),
                days_left,
            })
        })
        .collect();
    alerts.sort_by_key(|a| a.days_left);
    alerts
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

impl<S: RowStore> DataManager<S> {
    /// Home-screen figures for the current day and month
    pub fn dashboard(&mut self) -> Result<Dashboard> {
        let today = self.now().date();
        let products = self.load_inventory()?;
        let history = self.load_sales_history()?;
        let purchases = self.load_purchase_history()?;
        let outstanding_debt: f64 = self
            .outstanding_balances()?
            .iter()
            .map(|b| b.balance)
            .sum();

        Ok(Dashboard {
            date: today,
            sku_count: products.len(),
            stock_units: products.iter().map(|p| p.quantity).sum(),
            stock_cost: products.iter().map(Product::cost_value).sum(),
            today: period_totals(&history, &purchases, today, today),
            month: period_totals(&history, &purchases, month_start(today), today),
            low_stock: low_stock(&products).len(),
            outstanding_debt,
        })
    }
}
