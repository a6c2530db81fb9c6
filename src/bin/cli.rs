#![cfg(not(tarpaulin_include))]

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};

use pharmacy_pos::config::Config;
use pharmacy_pos::downloader::{self, ExportTable};
use pharmacy_pos::header::Table;
use pharmacy_pos::inventory::{NewProduct, Product};
use pharmacy_pos::loader;
use pharmacy_pos::manager::DataManager;
use pharmacy_pos::numeric::{TIMESTAMP_FORMAT, format_currency, format_number, parse_date, parse_number};
use pharmacy_pos::purchases::ImportItem;
use pharmacy_pos::report::{self, PeriodReport, StockOrder};
use pharmacy_pos::sales::{CartItem, SaleRecord};
use pharmacy_pos::saving::FileStore;
use pharmacy_pos::sheet::RowStore;

#[derive(Parser)]
#[command(name = "pos")]
#[command(author, version, about = "Pharmacy point of sale and stock ledger")]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workbook file, overrides the config
    #[arg(short, long, global = true)]
    workbook: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workbook with all worksheets, or repair a missing one
    Init,

    /// Append rows from a CSV file (first line is the header) to a worksheet
    Seed { worksheet: String, csv: PathBuf },

    /// List products, optionally filtered by id or name
    Inventory {
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Add one product to TonKho
    AddProduct {
        /// Product id; generated when omitted
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        unit: String,
        #[arg(long, default_value_t = 0.0)]
        quantity: f64,
        #[arg(long, default_value_t = 0.0)]
        cost: f64,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
        #[arg(long, default_value = "")]
        supplier: String,
        #[arg(long)]
        min_stock: Option<f64>,
        /// Expiry date, YYYY-MM-DD or DD/MM/YYYY
        #[arg(long)]
        expiry: Option<String>,
    },

    /// Sell items given as ID:QTY or ID:QTY@PRICE
    Sell {
        #[arg(required = true)]
        items: Vec<String>,

        /// Put the order on this customer's tab
        #[arg(long)]
        customer: Option<String>,
    },

    /// Receive goods from a CSV file or ID:QTY:COST:PRICE items
    Import {
        /// CSV with MaSanPham, TenSanPham, DonVi, NhaCungCap, SoLuong, GiaNhap, GiaBan
        #[arg(short, long)]
        file: Option<PathBuf>,

        items: Vec<String>,

        #[arg(long, default_value = "")]
        supplier: String,
    },

    /// Take back a product sold in an order
    Return {
        order_id: String,
        product_id: String,

        /// Defaults to the whole quantity of the sale line
        #[arg(short, long)]
        quantity: Option<f64>,
    },

    /// Sales history, all of it or one day or one order
    History {
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        order: Option<String>,
    },

    /// Purchase history
    Purchases,

    #[command(subcommand)]
    Report(ReportKind),

    #[command(subcommand)]
    Debt(DebtCommand),

    /// Export a worksheet or report to CSV or XLSX
    Export {
        /// Worksheet name, or one of: all, today, month, year, stock, low, expiry, debt
        target: String,

        #[arg(short, long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        /// Output file; CSV goes to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ReportKind {
    /// Sales of one day, newest first
    Daily {
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Revenue and profit per day of a month
    Month {
        #[arg(short, long)]
        year: Option<i32>,
        #[arg(short, long)]
        month: Option<u32>,
    },
    /// Revenue, profit and purchases per month of a year
    Year {
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// Revenue, profit and purchases per year
    Years,
    /// Stock on hand and its value
    Stock {
        #[arg(short, long, default_value = "asc")]
        order: StockOrder,
    },
    /// Products at or under their minimum stock
    Low,
    /// Products expiring soon, expired ones included
    Expiry {
        #[arg(short, long, default_value_t = 30)]
        days: i64,
    },
    Dashboard,
}

#[derive(Subcommand)]
enum DebtCommand {
    /// Record goods taken on credit
    Charge {
        customer: String,
        amount: f64,
        #[arg(long, default_value = "")]
        order: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Record a repayment
    Pay {
        customer: String,
        amount: f64,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Customers with an outstanding balance
    List,
    /// One customer's balance and entries
    Balance { customer: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Xlsx,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(path) = cli.workbook {
        config.workbook_path = path;
    }
    let store = FileStore::open(&config.workbook_path)
        .with_context(|| format!("opening {}", config.workbook_path.display()))?;
    let mut dm = DataManager::with_config(store, &config);

    match cli.command {
        Commands::Init => {
            println!(
                "{}: {} ready with {}",
                config.store_name,
                config.workbook_path.display(),
                dm.store().worksheet_names().join(", ")
            );
        }
        Commands::Seed { worksheet, csv } => {
            let rows = loader::from_csv(&csv)?;
            let count = loader::seed_worksheet(dm.store_mut(), &worksheet, rows)?;
            println!("{} row(s) added to {}", count, worksheet);
        }
        Commands::Inventory { search } => {
            let products = match search {
                Some(q) => dm.search_products(&q)?,
                None => dm.load_inventory()?,
            };
            print_products(&products);
        }
        Commands::AddProduct {
            id,
            name,
            unit,
            quantity,
            cost,
            price,
            supplier,
            min_stock,
            expiry,
        } => {
            let expiry = expiry.as_deref().map(date_arg).transpose()?;
            let product_id = dm.add_product(NewProduct {
                id: id.unwrap_or_default(),
                name,
                unit,
                quantity,
                cost_price: cost,
                sale_price: price,
                supplier,
                min_stock,
                expiry,
            })?;
            println!("added {}", product_id);
        }
        Commands::Sell { items, customer } => {
            let cart = items
                .iter()
                .map(|raw| cart_item(raw))
                .collect::<Result<Vec<_>>>()?;
            let receipt = match customer {
                Some(customer) => dm.checkout_on_credit(&cart, &customer)?,
                None => dm.checkout(&cart)?,
            };
            println!("Order {}  {}", receipt.order_id, receipt.timestamp.format(TIMESTAMP_FORMAT));
            for line in &receipt.lines {
                println!(
                    "  {:<10} {:<30} {:>6} x {:>12} = {:>14}",
                    line.product_id,
                    line.name,
                    format_number(line.quantity),
                    format_currency(line.unit_price),
                    format_currency(line.revenue)
                );
            }
            println!("Total {}  (profit {})", format_currency(receipt.total), format_currency(receipt.profit));
        }
        Commands::Import {
            file,
            items,
            supplier,
        } => {
            let mut lines = match file {
                Some(path) => import_file(&path)?,
                None => Vec::new(),
            };
            for raw in &items {
                lines.push(import_item(raw, &supplier)?);
            }
            if lines.is_empty() {
                bail!("nothing to import: give --file or ID:QTY:COST:PRICE items");
            }
            let summary = dm.process_import(&lines)?;
            println!(
                "{} line(s) received, cost {}",
                summary.lines,
                format_currency(summary.total_cost)
            );
            if !summary.new_products.is_empty() {
                println!("new products: {}", summary.new_products.join(", "));
            }
        }
        Commands::Return {
            order_id,
            product_id,
            quantity,
        } => {
            let quantity = match quantity {
                Some(q) => q,
                None => dm
                    .find_order(&order_id)?
                    .iter()
                    .rev()
                    .find(|s| s.product_id == product_id.trim())
                    .map(|s| s.quantity)
                    .ok_or_else(|| anyhow!("{} was not sold in order {}", product_id, order_id))?,
            };
            let refund = dm.process_return(&order_id, &product_id, quantity)?;
            println!(
                "returned {} of {} from {}, refund {}{}",
                format_number(refund.quantity),
                refund.product_id,
                refund.order_id,
                format_currency(refund.amount),
                if refund.restocked { "" } else { " (product no longer stocked)" }
            );
        }
        Commands::History { date, order } => {
            let sales = match (date, order) {
                (_, Some(order)) => dm.find_order(&order)?,
                (Some(date), None) => report::daily_sales(&dm.load_sales_history()?, date_arg(&date)?),
                (None, None) => dm.load_sales_history()?,
            };
            print_sales(&sales);
        }
        Commands::Purchases => {
            for p in dm.load_purchase_history()? {
                println!(
                    "{:<19} {:<10} {:<30} {:>6} x {:>12} = {:>14}  {}",
                    p.imported_at.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()).unwrap_or_default(),
                    p.product_id,
                    p.name,
                    format_number(p.quantity),
                    format_currency(p.cost_price),
                    format_currency(p.total),
                    p.supplier
                );
            }
        }
        Commands::Report(kind) => run_report(&mut dm, kind)?,
        Commands::Debt(command) => run_debt(&mut dm, command)?,
        Commands::Export {
            target,
            format,
            output,
        } => {
            let tables = dm.export_tables(&target)?;
            export(&tables, format, output)?;
        }
    }

    Ok(())
}

fn run_report(dm: &mut DataManager<FileStore>, kind: ReportKind) -> Result<()> {
    let today = dm.now().date();
    match kind {
        ReportKind::Daily { date } => {
            let date = match date {
                Some(raw) => date_arg(&raw)?,
                None => today,
            };
            let sales = report::daily_sales(&dm.load_sales_history()?, date);
            print_sales(&sales);
            let total: f64 = sales.iter().map(|s| s.revenue).sum();
            let profit: f64 = sales.iter().map(|s| s.profit).sum();
            println!("{}: revenue {}, profit {}", date, format_currency(total), format_currency(profit));
        }
        ReportKind::Month { year, month } => {
            let month = month.unwrap_or(today.month());
            if !(1..=12).contains(&month) {
                bail!("month must be 1-12, got {}", month);
            }
            let history = dm.load_sales_history()?;
            let purchases = dm.load_purchase_history()?;
            let year = year.unwrap_or(today.year());
            print_period(&report::monthly_by_day(&history, &purchases, year, month));
        }
        ReportKind::Year { year } => {
            let history = dm.load_sales_history()?;
            let purchases = dm.load_purchase_history()?;
            print_period(&report::yearly_by_month(
                &history,
                &purchases,
                year.unwrap_or(today.year()),
            ));
        }
        ReportKind::Years => {
            let history = dm.load_sales_history()?;
            let purchases = dm.load_purchase_history()?;
            print_period(&report::by_year(&history, &purchases));
        }
        ReportKind::Stock { order } => {
            let valuation = report::inventory_valuation(&dm.load_inventory()?, order);
            print_products(&valuation.products);
            println!(
                "{} product(s), cost {}, sale value {}",
                valuation.sku_count,
                format_currency(valuation.total_cost),
                format_currency(valuation.total_sale_value)
            );
        }
        ReportKind::Low => print_products(&report::low_stock(&dm.load_inventory()?)),
        ReportKind::Expiry { days } => {
            for alert in report::expiring(&dm.load_inventory()?, today, days) {
                let status = if alert.days_left < 0 {
                    format!("expired {} day(s) ago", -alert.days_left)
                } else {
                    format!("{} day(s) left", alert.days_left)
                };
                println!(
                    "{:<10} {:<30} {:>6}  {}",
                    alert.product.id,
                    alert.product.name,
                    format_number(alert.product.quantity),
                    status
                );
            }
        }
        ReportKind::Dashboard => {
            let d = dm.dashboard()?;
            println!("{}", d.date);
            println!("  products       {}", d.sku_count);
            println!("  units in stock {}", format_number(d.stock_units));
            println!("  stock at cost  {}", format_currency(d.stock_cost));
            println!(
                "  today          {} revenue, {} profit, {} order(s)",
                format_currency(d.today.revenue),
                format_currency(d.today.profit),
                d.today.orders
            );
            println!(
                "  this month     {} revenue, {} profit, {} spent on stock",
                format_currency(d.month.revenue),
                format_currency(d.month.profit),
                format_currency(d.month.purchases)
            );
            println!("  low stock      {}", d.low_stock);
            println!("  owed to us     {}", format_currency(d.outstanding_debt));
        }
    }
    Ok(())
}

fn run_debt(dm: &mut DataManager<FileStore>, command: DebtCommand) -> Result<()> {
    match command {
        DebtCommand::Charge {
            customer,
            amount,
            order,
            note,
        } => {
            dm.record_charge(&customer, amount, &order, &note)?;
            println!("{} now owes {}", customer, format_currency(dm.customer_balance(&customer)?));
        }
        DebtCommand::Pay {
            customer,
            amount,
            note,
        } => {
            dm.record_payment(&customer, amount, &note)?;
            println!("{} now owes {}", customer, format_currency(dm.customer_balance(&customer)?));
        }
        DebtCommand::List => {
            for b in dm.outstanding_balances()? {
                println!("{:<30} {:>14}", b.customer, format_currency(b.balance));
            }
        }
        DebtCommand::Balance { customer } => {
            let key = customer.trim().to_lowercase();
            for e in dm.load_debt_ledger()? {
                if e.customer.to_lowercase() == key {
                    println!(
                        "{:<19} {:<10} {:>14}  {} {}",
                        e.date.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()).unwrap_or_default(),
                        e.kind.as_str(),
                        format_currency(e.amount),
                        e.order_id,
                        e.note
                    );
                }
            }
            println!("balance {}", format_currency(dm.customer_balance(&customer)?));
        }
    }
    Ok(())
}

fn export(tables: &[ExportTable], format: Format, output: Option<PathBuf>) -> Result<()> {
    match (format, output) {
        (Format::Csv, None) => {
            for table in tables {
                print!("{}", downloader::to_csv(table)?);
            }
        }
        (Format::Csv, Some(path)) => {
            let text = tables
                .iter()
                .map(downloader::to_csv)
                .collect::<pharmacy_pos::Result<String>>()?;
            fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        }
        (Format::Xlsx, Some(path)) => {
            let bytes = downloader::to_xlsx(tables)?;
            fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        }
        (Format::Xlsx, None) => bail!("XLSX export needs --output"),
    }
    Ok(())
}

fn date_arg(raw: &str) -> Result<NaiveDate> {
    parse_date(raw).ok_or_else(|| anyhow!("invalid date {:?}, use YYYY-MM-DD or DD/MM/YYYY", raw))
}

// ID:QTY or ID:QTY@PRICE
fn cart_item(raw: &str) -> Result<CartItem> {
    let (id, rest) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected ID:QTY, got {:?}", raw))?;
    let (quantity, price) = match rest.split_once('@') {
        Some((q, p)) => (q, Some(p)),
        None => (rest, None),
    };
    let quantity: f64 = quantity
        .trim()
        .parse()
        .with_context(|| format!("bad quantity in {:?}", raw))?;
    let mut item = CartItem::new(id, quantity);
    if let Some(price) = price {
        item.unit_price = Some(
            price
                .trim()
                .parse()
                .with_context(|| format!("bad price in {:?}", raw))?,
        );
    }
    Ok(item)
}

// ID:QTY:COST:PRICE
fn import_item(raw: &str, supplier: &str) -> Result<ImportItem> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [id, quantity, cost, price] = parts.as_slice() else {
        bail!("expected ID:QTY:COST:PRICE, got {:?}", raw);
    };
    Ok(ImportItem {
        product_id: id.trim().to_string(),
        supplier: supplier.to_string(),
        quantity: parse_number(quantity),
        cost_price: parse_number(cost),
        sale_price: parse_number(price),
        ..ImportItem::default()
    })
}

fn import_file(path: &Path) -> Result<Vec<ImportItem>> {
    let csv = loader::from_csv(path)?;
    let mut values = vec![csv.header];
    values.extend(csv.rows);
    let table = Table::from_values(values);

    let text = |row: usize, name: &str| table.get(row, name).unwrap_or("").trim().to_string();
    Ok((0..table.len())
        .map(|row| ImportItem {
            product_id: text(row, "MaSanPham"),
            name: text(row, "TenSanPham"),
            unit: text(row, "DonVi"),
            supplier: text(row, "NhaCungCap"),
            quantity: parse_number(&text(row, "SoLuong")),
            cost_price: parse_number(&text(row, "GiaNhap")),
            sale_price: parse_number(&text(row, "GiaBan")),
        })
        .collect())
}

fn print_products(products: &[Product]) {
    println!(
        "{:<10} {:<30} {:<8} {:>8} {:>12} {:>12}  {}",
        "Ma", "Ten", "DonVi", "SoLuong", "GiaNhap", "GiaBan", "HanSuDung"
    );
    for p in products {
        println!(
            "{:<10} {:<30} {:<8} {:>8} {:>12} {:>12}  {}{}",
            p.id,
            p.name,
            p.unit,
            format_number(p.quantity),
            format_number(p.cost_price),
            format_number(p.sale_price),
            p.expiry.map(|d| d.to_string()).unwrap_or_default(),
            if p.is_low_stock() { "  (low)" } else { "" }
        );
    }
}

fn print_sales(sales: &[SaleRecord]) {
    for s in sales {
        println!(
            "{:<19} {:<16} {:<10} {:<30} {:>6} {:>14} {:>14}",
            s.sold_at.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()).unwrap_or_default(),
            s.order_id,
            s.product_id,
            s.name,
            format_number(s.quantity),
            format_currency(s.revenue),
            format_currency(s.profit)
        );
    }
}

fn print_period(report: &PeriodReport) {
    println!("{}", report.title);
    for p in &report.points {
        println!(
            "  {:<8} {:>16} {:>16} {:>16}",
            p.label,
            format_currency(p.revenue),
            format_currency(p.profit),
            format_currency(p.purchases)
        );
    }
    println!(
        "  {:<8} {:>16} {:>16} {:>16}",
        "Tong",
        format_currency(report.revenue),
        format_currency(report.profit),
        format_currency(report.purchases)
    );
}
