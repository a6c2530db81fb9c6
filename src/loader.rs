#![cfg(not(tarpaulin_include))]

use crate::error::{PosError, Result};
use crate::header::{clean_headers, normalize_row};
use crate::sheet::{RowStore, cell_name};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;

/// Rows parsed from a CSV file; the first row is the header
#[derive(Clone, Debug, PartialEq)]
pub struct CsvRows {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Load rows from a CSV file
///
/// Quoted fields may contain commas, doubled quotes and line breaks. Blank
/// lines are skipped and every data row is padded or cut to the header's width.
///
/// # Examples
/// ```no_run
/// use pharmacy_pos::loader::from_csv;
///
/// match from_csv("tonkho.csv") {
///     Ok(csv) => println!("{} products", csv.rows.len()),
///     Err(e) => eprintln!("Error loading CSV: {}", e),
/// }
/// ```
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<CsvRows> {
    let path = filepath.as_ref();
    let text = fs::read_to_string(path).map_err(|e| PosError::io(path, e))?;
    parse_csv(&text)
}

/// Parse CSV text already in memory
pub fn parse_csv(text: &str) -> Result<CsvRows> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let mut records = records.into_iter();
    let Some(header) = records.next() else {
        return Err(PosError::Csv {
            line: 1,
            message: "CSV file is empty".to_string(),
        });
    };
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
    let cols = header.len();
    debug!("CSV header has {} column(s)", cols);

    let rows = records.map(|row| normalize_row(row, cols)).collect();
    Ok(CsvRows { header, rows })
}

/// Append the CSV's rows to a worksheet
///
/// The worksheet is created with the CSV's header if it does not exist yet.
/// Otherwise each CSV column goes under the worksheet column of the same
/// name, whatever the order; names the worksheet lacks are added to its
/// header. Returns the number of rows appended.
pub fn seed_worksheet<S: RowStore>(store: &mut S, worksheet: &str, csv: CsvRows) -> Result<usize> {
    let header: Vec<&str> = csv.header.iter().map(String::as_str).collect();
    store.ensure_worksheet(worksheet, &header)?;

    let existing = store
        .get_all_values(worksheet)?
        .into_iter()
        .next()
        .unwrap_or_default();
    if existing.iter().all(|h| h.trim().is_empty()) {
        // headerless worksheet: the CSV's header becomes row 1
        if existing.is_empty() {
            store.append_row(worksheet, csv.header)?;
        } else {
            for (c, name) in csv.header.into_iter().enumerate() {
                store.update_cell(worksheet, 1, c + 1, name)?;
            }
        }
        let count = csv.rows.len();
        store.append_rows(worksheet, csv.rows)?;
        info!("seeded {} row(s) into {}", count, worksheet);
        return Ok(count);
    }

    let mut target = clean_headers(&existing);
    let mut positions = Vec::with_capacity(csv.header.len());
    for name in clean_headers(&csv.header) {
        let col = match target.iter().position(|h| *h == name) {
            Some(col) => col,
            None => {
                let col = target.len();
                warn!(
                    "{} has no {} column, adding it at {}",
                    worksheet,
                    name,
                    cell_name(1, col + 1)
                );
                store.update_cell(worksheet, 1, col + 1, name.clone())?;
                target.push(name);
                col
            }
        };
        positions.push(col);
    }

    let width = target.len();
    let rows: Vec<Vec<String>> = csv
        .rows
        .into_iter()
        .map(|row| {
            let mut placed = vec![String::new(); width];
            for (value, &col) in row.into_iter().zip(&positions) {
                placed[col] = value;
            }
            placed
        })
        .collect();

    let count = rows.len();
    store.append_rows(worksheet, rows)?;
    info!("seeded {} row(s) into {}", count, worksheet);
    Ok(count)
}
