/*!
# Pharmacy POS

Point of sale and stock ledger for a single retail pharmacy, kept in a
spreadsheet-style workbook.

## Overview

All shop data lives in four worksheets of one workbook. Every worksheet has a
header in row 1 and one record per row below it; cells are plain text and are
parsed leniently on read (`"1,200"`, `"50000 đ"` and `""` are all numbers).

| Worksheet    | Holds                                              |
|--------------|----------------------------------------------------|
| `TonKho`     | products on hand, prices, supplier, min stock, expiry |
| `LichSuBan`  | one row per product per sale                       |
| `LichSuNhap` | one row per product per goods receipt              |
| `CongNo`     | customer credit: charges and repayments            |

## Architecture

### Row store
- [`sheet::RowStore`] is the only way data is read or written: whole-worksheet
  reads, appends, single-cell updates and row deletes, addressed by worksheet
  name and 1-based row/column.
- [`sheet::Workbook`] keeps worksheets in memory; [`saving::FileStore`] wraps
  one and writes it through to a gzip-compressed bincode file after every
  mutation.

### Data manager
- [`manager::DataManager`] owns a store, a time-limited inventory cache and
  the clock used to stamp transactions.
- Inventory reads tolerate header drift: columns are found by name, blank or
  repeated headers are renamed, and missing columns are added on the next write.
- Operations: product lookup and creation, checkout (cash or credit), goods
  receipt, returns, sales and purchase history, customer balances.

### Reports and exports
- [`report`] turns loaded rows into daily, monthly and yearly figures, stock
  valuation, low-stock and expiry alerts and a dashboard.
- [`downloader`] writes worksheets and reports as CSV or XLSX; [`loader`]
  seeds worksheets from CSV.

### Surfaces
- `pos`: command line front end.
- `website` (feature `web`): JSON API on axum.

## Modules

- **sheet**: row store trait, in-memory workbook, worksheet names and headers
- **saving**: workbook persistence with compression
- **header**: header cleanup and row normalisation
- **numeric**: lenient number and date parsing, formatting
- **cache**: time-to-live cache
- **manager**: the data manager
- **inventory**, **sales**, **purchases**, **debt**: ledger operations
- **report**: dashboards and summaries
- **downloader**: CSV and XLSX export
- **loader**: CSV import
- **config**: file and environment configuration
- **app**: HTTP routing (feature `web`)
*/

pub mod cache;
pub mod config;
pub mod debt;
pub mod downloader;
pub mod error;
pub mod header;
pub mod inventory;
pub mod loader;
pub mod manager;
pub mod numeric;
pub mod purchases;
pub mod report;
pub mod sales;
pub mod saving;
pub mod sheet;

#[cfg(feature = "web")]
pub mod app;

pub use config::Config;
pub use error::{PosError, Result};
pub use manager::{Clock, DataManager};
pub use saving::FileStore;
pub use sheet::{RowStore, Workbook};
