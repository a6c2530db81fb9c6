#![cfg(not(tarpaulin_include))]

use chrono::Datelike;

use crate::debt::CustomerBalance;
use crate::error::{PosError, Result};
use crate::inventory::Product;
use crate::manager::DataManager;
use crate::numeric::{DATE_FORMAT, TIMESTAMP_FORMAT, format_number, parse_number};
use crate::report::{self, ExpiryAlert, PeriodReport, StockOrder};
use crate::sales::SaleRecord;
use crate::sheet::{RowStore, Workbook, Worksheet};

/// A rectangular block of text ready for export
///
/// Worksheets export as they are stored; reports are flattened into one of
/// these first so CSV and XLSX output share a single code path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportTable {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    pub fn new(name: &str, header: &[&str]) -> Self {
        ExportTable {
            name: name.to_string(),
            rows: vec![header.iter().map(|h| h.to_string()).collect()],
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }
}

impl From<&Worksheet> for ExportTable {
    fn from(worksheet: &Worksheet) -> Self {
        ExportTable {
            name: worksheet.name.clone(),
            rows: worksheet.rows.clone(),
        }
    }
}

/// Convert a table to CSV format
///
/// Fields containing commas, quotes or line breaks are quoted, with embedded
/// quotes doubled. Short rows are written as they are; no padding is added.
///
/// # Examples
/// ```
/// use pharmacy_pos::downloader::{ExportTable, to_csv};
///
/// let mut table = ExportTable::new("TonKho", &["MaSanPham", "TenSanPham"]);
/// table.push(vec!["P1".into(), "Vitamin C, 500mg".into()]);
/// assert_eq!(to_csv(&table).unwrap(), "MaSanPham,TenSanPham\nP1,\"Vitamin C, 500mg\"\n");
/// ```
pub fn to_csv(table: &ExportTable) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in &table.rows {
        wtr.write_record(row)?;
    }

    let bytes = wtr.into_inner().map_err(|e| PosError::Csv {
        line: 0,
        message: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| PosError::Csv {
        line: 0,
        message: e.to_string(),
    })
}

/// Convert one or more tables to an XLSX workbook, one worksheet each
///
/// Cells that look numeric are written as numbers so sums work in Excel;
/// everything else, including the header row and ids like `0012`, stays text.
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes
pub fn to_xlsx(tables: &[ExportTable]) -> Result<Vec<u8>> {
    let mut workbook = rust_xlsxwriter::Workbook::new();

    for table in tables {
        let mut worksheet = rust_xlsxwriter::Worksheet::new();
        worksheet.set_name(&table.name)?;

        for (r, row) in table.rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let (r, c) = (r as u32, c as u16);
                if r > 0 && looks_numeric(value) {
                    worksheet.write_number(r, c, parse_number(value))?;
                } else {
                    worksheet.write_string(r, c, value)?;
                }
            }
        }

        workbook.push_worksheet(worksheet);
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Every worksheet of the workbook, in name order
pub fn workbook_tables(workbook: &Workbook) -> Vec<ExportTable> {
    workbook.worksheets.values().map(ExportTable::from).collect()
}

// Plain decimal numbers only; leading zeros mark codes, not quantities
fn looks_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    let leading_zero =
        trimmed.len() > 1 && trimmed.starts_with('0') && !trimmed.starts_with("0.");
    if trimmed.is_empty() || leading_zero {
        return false;
    }
    trimmed.parse::<f64>().is_ok_and(f64::is_finite)
}

pub fn period_table(report: &PeriodReport) -> ExportTable {
    let mut table = ExportTable::new(
        &sheet_title("BaoCao", &report.title),
        &["Ky", "DoanhThu", "LoiNhuan", "TienNhap"],
    );
    for point in &report.points {
        table.push(vec![
            point.label.clone(),
            format_number(point.revenue),
            format_number(point.profit),
            format_number(point.purchases),
        ]);
    }
    table.push(vec![
        "Tong".to_string(),
        format_number(report.revenue),
        format_number(report.profit),
        format_number(report.purchases),
    ]);
    table
}

pub fn sales_table(name: &str, sales: &[SaleRecord]) -> ExportTable {
    let mut table = ExportTable::new(name, &crate::sheet::SALES_HEADER);
    for sale in sales {
        let sold_at = sale
            .sold_at
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        table.push(sale.to_cells(&sold_at));
    }
    table
}

pub fn products_table(name: &str, products: &[Product]) -> ExportTable {
    let mut table = ExportTable::new(name, &crate::sheet::INVENTORY_HEADER);
    for p in products {
        table.push(vec![
            p.id.clone(),
            p.name.clone(),
            p.unit.clone(),
            format_number(p.quantity),
            format_number(p.cost_price),
            format_number(p.sale_price),
            p.supplier.clone(),
            format_number(p.min_stock),
            p.expiry
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
        ]);
    }
    table
}

pub fn expiry_table(alerts: &[ExpiryAlert]) -> ExportTable {
    let mut table = ExportTable::new(
        "HanSuDung",
        &["MaSanPham", "TenSanPham", "SoLuong", "HanSuDung", "SoNgayConLai"],
    );
    for alert in alerts {
        table.push(vec![
            alert.product.id.clone(),
            alert.product.name.clone(),
            format_number(alert.product.quantity),
            alert
                .product
                .expiry
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            alert.days_left.to_string(),
        ]);
    }
    table
}

pub fn balances_table(balances: &[CustomerBalance]) -> ExportTable {
    let mut table = ExportTable::new("CongNo", &["KhachHang", "SoDu", "GiaoDichCuoi"]);
    for b in balances {
        table.push(vec![
            b.customer.clone(),
            format_number(b.balance),
            b.last_activity
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default(),
        ]);
    }
    table
}

/// Report names accepted by [`DataManager::export_tables`] besides worksheet names
pub const REPORT_TARGETS: [&str; 8] = [
    "all", "today", "month", "year", "stock", "low", "expiry", "debt",
];

impl<S: RowStore> DataManager<S> {
    /// Tables for an export target: a worksheet name, `all` worksheets, or a
    /// report over the current day, month or year
    pub fn export_tables(&mut self, target: &str) -> Result<Vec<ExportTable>> {
        let today = self.now().date();
        let tables = match target {
            "all" => {
                let mut tables = Vec::new();
                for name in self.store.worksheet_names() {
                    tables.push(ExportTable {
                        rows: self.store.get_all_values(&name)?,
                        name,
                    });
                }
                tables
            }
            "today" => {
                let history = self.load_sales_history()?;
                vec![sales_table("HomNay", &report::daily_sales(&history, today))]
            }
            "month" => {
                let history = self.load_sales_history()?;
                let purchases = self.load_purchase_history()?;
                vec![period_table(&report::monthly_by_day(
                    &history,
                    &purchases,
                    today.year(),
                    today.month(),
                ))]
            }
            "year" => {
                let history = self.load_sales_history()?;
                let purchases = self.load_purchase_history()?;
                vec![period_table(&report::yearly_by_month(
                    &history,
                    &purchases,
                    today.year(),
                ))]
            }
            "stock" => {
                let products = self.load_inventory()?;
                let valuation = report::inventory_valuation(&products, StockOrder::Ascending);
                vec![products_table("TonKhoHienTai", &valuation.products)]
            }
            "low" => vec![products_table(
                "SapHetHang",
                &report::low_stock(&self.load_inventory()?),
            )],
            "expiry" => vec![expiry_table(&report::expiring(
                &self.load_inventory()?,
                today,
                30,
            ))],
            "debt" => vec![balances_table(&self.outstanding_balances()?)],
            worksheet => vec![ExportTable {
                name: worksheet.to_string(),
                rows: self.store.get_all_values(worksheet)?,
            }],
        };
        Ok(tables)
    }
}

// Excel limits sheet names to 31 characters and bans []:*?/\
fn sheet_title(prefix: &str, title: &str) -> String {
    let raw = format!("{} {}", prefix, title);
    raw.chars()
        .map(|c| if "[]:*?/\\".contains(c) { '-' } else { c })
        .take(31)
        .collect()
}
