//! End-to-end ledger flows against a file-backed workbook

mod common;

use common::{TestContext, fixture};
use pharmacy_pos::downloader::{to_csv, to_xlsx};
use pharmacy_pos::inventory::NewProduct;
use pharmacy_pos::numeric::parse_date;
use pharmacy_pos::purchases::ImportItem;
use pharmacy_pos::report;
use pharmacy_pos::sales::CartItem;
use pharmacy_pos::sheet::{INVENTORY, SALES};
use pharmacy_pos::{PosError, RowStore, loader, saving};
use pretty_assertions::assert_eq;

fn restock(id: &str, name: &str, quantity: f64, cost: f64, price: f64) -> ImportItem {
    ImportItem {
        product_id: id.to_string(),
        name: name.to_string(),
        unit: "Lọ".to_string(),
        supplier: "DHG".to_string(),
        quantity,
        cost_price: cost,
        sale_price: price,
    }
}

#[test]
fn test_full_trading_day() {
    let ctx = TestContext::new();
    let mut dm = ctx.open_at("2025-03-01 08:00:00");

    let csv = loader::from_csv(fixture("tonkho.csv")).unwrap();
    assert_eq!(loader::seed_worksheet(dm.store_mut(), INVENTORY, csv).unwrap(), 3);

    let p002 = dm.find_product("P002").unwrap();
    assert_eq!(p002.name, "Siro ho Prospan, 100ml");
    assert_eq!(p002.min_stock, 5.0);
    assert_eq!(p002.expiry, parse_date("2025-03-20"));

    // two cash sales in the same second, then one on credit
    let first = dm
        .checkout(&[CartItem::new("P001", 10.0), CartItem::new("P002", 2.0)])
        .unwrap();
    assert_eq!(first.order_id, "20250301080000");
    assert_eq!(first.total, 188_000.0);
    assert_eq!(first.profit, 53_000.0);

    let second = dm.checkout(&[CartItem::new("P001", 5.0)]).unwrap();
    assert_eq!(second.order_id, "20250301080000-2");

    let credit = dm
        .checkout_on_credit(&[CartItem::new("P003", 3.0)], "Cô Ba")
        .unwrap();
    assert_eq!(credit.total, 105_000.0);
    assert_eq!(dm.customer_balance("cô ba").unwrap(), 105_000.0);

    let err = dm.checkout(&[CartItem::new("P003", 100.0)]).unwrap_err();
    assert!(matches!(err, PosError::InsufficientStock { available, .. } if available == 5.0));
    let low: Vec<String> = report::low_stock(&dm.load_inventory().unwrap())
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(low, vec!["P003".to_string()]);

    // customer brings one bottle of syrup back
    let refund = dm.process_return(&first.order_id, "P002", 1.0).unwrap();
    assert_eq!(refund.amount, 89_000.0);
    assert!(refund.restocked);
    assert_eq!(dm.find_product("P002").unwrap().quantity, 11.0);
    let order = dm.find_order(&first.order_id).unwrap();
    assert_eq!(order[1].quantity, 1.0);
    assert_eq!(order[1].revenue, 89_000.0);

    // afternoon delivery
    let summary = dm
        .process_import(&[
            restock("P003", "", 20.0, 24_000.0, 35_000.0),
            restock("P004", "Vitamin C 500mg", 30.0, 30_000.0, 45_000.0),
        ])
        .unwrap();
    assert_eq!(summary.new_products, vec!["P004".to_string()]);
    assert_eq!(summary.total_cost, 1_380_000.0);
    assert_eq!(dm.find_product("P003").unwrap().quantity, 25.0);

    dm.record_payment("cô ba", 50_000.0, "tiền mặt").unwrap();

    let dashboard = dm.dashboard().unwrap();
    assert_eq!(dashboard.sku_count, 4);
    assert_eq!(dashboard.today.revenue, 209_000.0);
    assert_eq!(dashboard.today.profit, 61_500.0);
    assert_eq!(dashboard.today.orders, 3);
    assert_eq!(dashboard.month.purchases, 1_380_000.0);
    assert_eq!(dashboard.outstanding_debt, 55_000.0);
    assert_eq!(dashboard.low_stock, 0);

    let today = dm.now().date();
    let expiring = report::expiring(&dm.load_inventory().unwrap(), today, 30);
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].product.id, "P002");
    assert_eq!(expiring[0].days_left, 19);
    drop(dm);

    // everything was written through; reopen the next morning
    let mut dm = ctx.open_at("2025-03-02 09:00:00");
    let history = dm.load_sales_history().unwrap();
    assert_eq!(report::daily_sales(&history, parse_date("2025-03-01").unwrap()).len(), 4);
    assert_eq!(dm.customer_balance("Cô Ba").unwrap(), 55_000.0);

    let month = dm.export_tables("month").unwrap();
    assert_eq!(month[0].rows.last().unwrap()[1], "209000");

    let inventory_csv = to_csv(&dm.export_tables(INVENTORY).unwrap()[0]).unwrap();
    assert!(inventory_csv.contains("\"Siro ho Prospan, 100ml\""));

    let xlsx = to_xlsx(&dm.export_tables("all").unwrap()).unwrap();
    assert!(xlsx.starts_with(b"PK"));
}

#[test]
fn test_old_inventory_layout_is_extended_on_write() {
    let ctx = TestContext::new();
    let mut dm = ctx.open_at("2025-06-10 10:00:00");

    // an older sheet with only seven columns, in a different order
    let old_header = ["TenSanPham", "MaSanPham", "DonVi", "SoLuong", "GiaNhap", "GiaBan", "NhaCungCap"];
    let mut book = pharmacy_pos::Workbook::new();
    book.add_worksheet(pharmacy_pos::sheet::Worksheet::create(INVENTORY, &old_header));
    book.append_row(
        INVENTORY,
        ["Băng gạc", "B01", "Cuộn", "40", "3000", "5000", "Bảo Thạch"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    )
    .unwrap();
    dm.store_mut().replace(book).unwrap();

    let id = dm
        .add_product(NewProduct {
            name: "Cồn 70 độ".to_string(),
            unit: "Chai".to_string(),
            quantity: 12.0,
            cost_price: 8000.0,
            sale_price: 12000.0,
            expiry: parse_date("2026-01-31"),
            ..NewProduct::default()
        })
        .unwrap();
    assert_eq!(id, "2");
    drop(dm);

    let mut dm = ctx.open_at("2025-06-10 10:05:00");
    let values = dm.store().get_all_values(INVENTORY).unwrap();
    assert_eq!(&values[0][..7], &old_header);
    assert!(values[0].contains(&"HanSuDung".to_string()));

    let bandage = dm.find_product("B01").unwrap();
    assert_eq!(bandage.name, "Băng gạc");
    assert_eq!(bandage.quantity, 40.0);
    assert_eq!(bandage.expiry, None);

    let added = dm.find_product(&id).unwrap();
    assert_eq!(added.expiry, parse_date("2026-01-31"));
    assert_eq!(added.quantity, 12.0);
    // other worksheets are recreated with their headers
    assert_eq!(dm.store().get_all_values(SALES).unwrap().len(), 1);
}

#[test]
fn test_workbook_bytes_replace_store() {
    let ctx = TestContext::new();
    let mut dm = ctx.open_at("2025-01-05 12:00:00");
    dm.add_product(NewProduct {
        id: "X1".to_string(),
        name: "Nước muối sinh lý".to_string(),
        quantity: 3.0,
        ..NewProduct::default()
    })
    .unwrap();

    let bytes = saving::to_bytes(dm.store().workbook()).unwrap();
    let other = TestContext::new();
    let mut copy = other.open_at("2025-01-05 12:00:00");
    assert!(copy.find_product("X1").is_err());
    copy.store_mut()
        .replace(saving::from_bytes(&bytes).unwrap())
        .unwrap();
    assert_eq!(copy.find_product("X1").unwrap().quantity, 3.0);

    assert!(saving::from_bytes(b"not a workbook").is_err());
}
