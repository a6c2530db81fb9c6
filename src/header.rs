//! Header cleaning and row normalisation.
//!
//! Worksheets are edited by hand, so headers drift: blank header cells,
//! repeated names, rows that are shorter or longer than the header. A
//! [`Table`] is the reconciled view the data manager works on.

use std::collections::HashMap;

/// Trim header names, name blank ones `Col_{i}` and suffix repeats with `_{n}`
pub fn clean_headers(raw: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut clean = Vec::with_capacity(raw.len());

    for (i, h) in raw.iter().enumerate() {
        let mut name = h.trim().to_string();
        if name.is_empty() {
            name = format!("Col_{}", i);
        }
        match seen.get_mut(&name) {
            Some(count) => {
                *count += 1;
                name = format!("{}_{}", name, count);
            }
            None => {
                seen.insert(name.clone(), 0);
            }
        }
        clean.push(name);
    }

    clean
}

/// Pad a row with empty cells or cut it down to `width`
pub fn normalize_row(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table from raw worksheet values (row 0 is the header)
    pub fn from_values(values: Vec<Vec<String>>) -> Self {
        let mut iter = values.into_iter();
        let headers = match iter.next() {
            Some(raw) => clean_headers(&raw),
            None => return Table::default(),
        };
        let width = headers.len();
        let rows = iter.map(|row| normalize_row(row, width)).collect();
        Table { headers, rows }
    }

    /// Build a table with a fixed header, ignoring whatever header the sheet holds
    pub fn with_fixed_header(values: Vec<Vec<String>>, header: &[&str]) -> Self {
        let width = header.len();
        let rows = values
            .into_iter()
            .skip(1)
            .map(|row| normalize_row(row, width))
            .collect();
        Table {
            headers: header.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column by name
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        let col = self.column(name)?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Sheet row (1-based, header included) holding table row `index`
    pub fn sheet_row(index: usize) -> usize {
        index + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn blank_and_duplicate_headers() {
        let headers = clean_headers(&strings(&[" MaSanPham ", "", "GiaBan", "GiaBan", "GiaBan"]));
        assert_eq!(
            headers,
            strings(&["MaSanPham", "Col_1", "GiaBan", "GiaBan_1", "GiaBan_2"])
        );
    }

    #[test]
    fn rows_follow_header_width() {
        let table = Table::from_values(vec![
            strings(&["A", "B", "C"]),
            strings(&["1"]),
            strings(&["1", "2", "3", "4"]),
        ]);
        assert_eq!(table.rows[0], strings(&["1", "", ""]));
        assert_eq!(table.rows[1], strings(&["1", "2", "3"]));
    }

    #[test]
    fn empty_values_give_empty_table() {
        let table = Table::from_values(Vec::new());
        assert!(table.is_empty());
        assert!(table.headers.is_empty());
    }

    #[test]
    fn column_lookup() {
        let table = Table::from_values(vec![strings(&["Ma", "Ten"])]);
        assert_eq!(table.column("Ten"), Some(1));
        assert_eq!(table.column("SoLuong"), None);
        assert_eq!(Table::sheet_row(0), 2);
    }

    #[test]
    fn fixed_header_discards_stored_header() {
        let table = Table::with_fixed_header(
            vec![strings(&["x", "y"]), strings(&["1", "2", "3"])],
            &["A", "B"],
        );
        assert_eq!(table.get(0, "B"), Some("2"));
        assert_eq!(table.len(), 1);
    }
}
