use crate::error::{PosError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inventory worksheet
pub const INVENTORY: &str = "TonKho";
/// Sales history worksheet
pub const SALES: &str = "LichSuBan";
/// Purchase history worksheet
pub const PURCHASES: &str = "LichSuNhap";
/// Customer debt ledger worksheet
pub const DEBT: &str = "CongNo";

pub const INVENTORY_HEADER: [&str; 9] = [
    "MaSanPham",
    "TenSanPham",
    "DonVi",
    "SoLuong",
    "GiaNhap",
    "GiaBan",
    "NhaCungCap",
    "TonToiThieu",
    "HanSuDung",
];

pub const SALES_HEADER: [&str; 10] = [
    "NgayBan",
    "MaDonHang",
    "MaSanPham",
    "TenSanPham",
    "DonVi",
    "SoLuong",
    "GiaBan",
    "ThanhTien",
    "GiaVonLucBan",
    "LoiNhuan",
];

pub const PURCHASES_HEADER: [&str; 8] = [
    "NgayNhap",
    "MaSanPham",
    "TenSanPham",
    "NhaCungCap",
    "DonVi",
    "SoLuong",
    "GiaNhap",
    "ThanhTien",
];

pub const DEBT_HEADER: [&str; 6] = [
    "Ngay",
    "KhachHang",
    "MaDonHang",
    "LoaiGiaoDich",
    "SoTien",
    "GhiChu",
];

/// Row-oriented access to a spreadsheet.
///
/// Rows and columns are 1-based and row 1 holds the header, so the data row at
/// index `i` of a parsed table lives at sheet row `i + 2`.
pub trait RowStore {
    /// Every row of the worksheet, header included
    fn get_all_values(&self, worksheet: &str) -> Result<Vec<Vec<String>>>;

    fn append_row(&mut self, worksheet: &str, row: Vec<String>) -> Result<()>;

    fn append_rows(&mut self, worksheet: &str, rows: Vec<Vec<String>>) -> Result<()> {
        for row in rows {
            self.append_row(worksheet, row)?;
        }
        Ok(())
    }

    fn update_cell(&mut self, worksheet: &str, row: usize, col: usize, value: String)
    -> Result<()>;

    fn delete_rows(&mut self, worksheet: &str, row: usize) -> Result<()>;

    /// Create the worksheet with `header` as row 1 when it does not exist yet
    fn ensure_worksheet(&mut self, worksheet: &str, header: &[&str]) -> Result<()>;

    fn worksheet_names(&self) -> Vec<String>;
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Worksheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Worksheet {
    pub fn create(name: &str, header: &[&str]) -> Self {
        Worksheet {
            name: name.to_string(),
            rows: vec![header.iter().map(|h| h.to_string()).collect()],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        if row == 0 || col == 0 {
            return None;
        }
        self.rows
            .get(row - 1)
            .and_then(|r| r.get(col - 1))
            .map(String::as_str)
    }
}

/// In-memory workbook: a set of named worksheets of string cells
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Workbook {
    pub worksheets: BTreeMap<String, Worksheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Workbook::default()
    }

    /// Workbook with the four pharmacy worksheets and their headers
    pub fn pharmacy() -> Self {
        let mut book = Workbook::new();
        book.add_worksheet(Worksheet::create(INVENTORY, &INVENTORY_HEADER));
        book.add_worksheet(Worksheet::create(SALES, &SALES_HEADER));
        book.add_worksheet(Worksheet::create(PURCHASES, &PURCHASES_HEADER));
        book.add_worksheet(Worksheet::create(DEBT, &DEBT_HEADER));
        book
    }

    pub fn add_worksheet(&mut self, worksheet: Worksheet) {
        self.worksheets.insert(worksheet.name.clone(), worksheet);
    }

    pub fn worksheet(&self, name: &str) -> Result<&Worksheet> {
        self.worksheets
            .get(name)
            .ok_or_else(|| PosError::WorksheetNotFound {
                name: name.to_string(),
            })
    }

    fn worksheet_mut(&mut self, name: &str) -> Result<&mut Worksheet> {
        self.worksheets
            .get_mut(name)
            .ok_or_else(|| PosError::WorksheetNotFound {
                name: name.to_string(),
            })
    }

    /// Ensure the four pharmacy worksheets exist without touching existing data
    pub fn ensure_pharmacy_layout(&mut self) {
        for (name, header) in [
            (INVENTORY, &INVENTORY_HEADER[..]),
            (SALES, &SALES_HEADER[..]),
            (PURCHASES, &PURCHASES_HEADER[..]),
            (DEBT, &DEBT_HEADER[..]),
        ] {
            if !self.worksheets.contains_key(name) {
                self.add_worksheet(Worksheet::create(name, header));
            }
        }
    }
}

impl RowStore for Workbook {
    fn get_all_values(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.worksheet(worksheet)?.rows.clone())
    }

    fn append_row(&mut self, worksheet: &str, row: Vec<String>) -> Result<()> {
        self.worksheet_mut(worksheet)?.rows.push(row);
        Ok(())
    }

    fn update_cell(
        &mut self,
        worksheet: &str,
        row: usize,
        col: usize,
        value: String,
    ) -> Result<()> {
        let sheet = self.worksheet_mut(worksheet)?;
        let rows = sheet.rows.len();
        if row == 0 || col == 0 || row > rows {
            return Err(PosError::CellOutOfRange {
                worksheet: worksheet.to_string(),
                cell: cell_name(row, col),
                rows,
            });
        }

        let cells = &mut sheet.rows[row - 1];
        if cells.len() < col {
            cells.resize(col, String::new());
        }
        cells[col - 1] = value;
        Ok(())
    }

    fn delete_rows(&mut self, worksheet: &str, row: usize) -> Result<()> {
        let sheet = self.worksheet_mut(worksheet)?;
        if row == 1 {
            return Err(PosError::ProtectedHeader {
                worksheet: worksheet.to_string(),
            });
        }
        let rows = sheet.rows.len();
        if row == 0 || row > rows {
            return Err(PosError::CellOutOfRange {
                worksheet: worksheet.to_string(),
                cell: format!("row {}", row),
                rows,
            });
        }
        sheet.rows.remove(row - 1);
        Ok(())
    }

    fn ensure_worksheet(&mut self, worksheet: &str, header: &[&str]) -> Result<()> {
        if !self.worksheets.contains_key(worksheet) {
            self.add_worksheet(Worksheet::create(worksheet, header));
        }
        Ok(())
    }

    fn worksheet_names(&self) -> Vec<String> {
        self.worksheets.keys().cloned().collect()
    }
}

/// Convert column number to letter (A=1, B=2, ..., Z=26, AA=27)
pub fn col_to_letter(col: usize) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// A1-style reference for a 1-based row and column
pub fn cell_name(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letter(col), row)
}

/// Workbook whose writes to one worksheet fail, for exercising rollbacks
#[cfg(test)]
pub(crate) struct FailingStore {
    pub book: Workbook,
    pub broken: &'static str,
}

#[cfg(test)]
impl FailingStore {
    pub fn new(book: Workbook, broken: &'static str) -> Self {
        FailingStore { book, broken }
    }

    fn check(&self, worksheet: &str) -> Result<()> {
        if worksheet == self.broken {
            return Err(PosError::Persistence {
                message: "disk full".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
impl RowStore for FailingStore {
    fn get_all_values(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        self.book.get_all_values(worksheet)
    }

    fn append_row(&mut self, worksheet: &str, row: Vec<String>) -> Result<()> {
        self.check(worksheet)?;
        self.book.append_row(worksheet, row)
    }

    fn update_cell(&mut self, worksheet: &str, row: usize, col: usize, value: String) -> Result<()> {
        self.check(worksheet)?;
        self.book.update_cell(worksheet, row, col, value)
    }

    fn delete_rows(&mut self, worksheet: &str, row: usize) -> Result<()> {
        self.check(worksheet)?;
        self.book.delete_rows(worksheet, row)
    }

    fn ensure_worksheet(&mut self, worksheet: &str, header: &[&str]) -> Result<()> {
        self.book.ensure_worksheet(worksheet, header)
    }

    fn worksheet_names(&self) -> Vec<String> {
        self.book.worksheet_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn column_letters() {
        assert_eq!(col_to_letter(1), "A");
        assert_eq!(col_to_letter(26), "Z");
        assert_eq!(col_to_letter(27), "AA");
        assert_eq!(col_to_letter(52), "AZ");
        assert_eq!(cell_name(2, 4), "D2");
    }

    #[test]
    fn pharmacy_layout_has_headers() {
        let book = Workbook::pharmacy();
        assert_eq!(book.worksheet_names().len(), 4);
        let values = book.get_all_values(SALES).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].len(), 10);
    }

    #[test]
    fn update_pads_short_rows() {
        let mut book = Workbook::pharmacy();
        book.append_row(INVENTORY, strings(&["P1", "Paracetamol"]))
            .unwrap();
        book.update_cell(INVENTORY, 2, 4, "12".to_string()).unwrap();

        let ws = book.worksheet(INVENTORY).unwrap();
        assert_eq!(ws.cell(2, 4), Some("12"));
        assert_eq!(ws.cell(2, 3), Some(""));
    }

    #[test]
    fn update_outside_rows_fails() {
        let mut book = Workbook::pharmacy();
        let err = book
            .update_cell(INVENTORY, 5, 1, "x".to_string())
            .unwrap_err();
        assert!(matches!(err, PosError::CellOutOfRange { .. }));
    }

    #[test]
    fn header_cannot_be_deleted() {
        let mut book = Workbook::pharmacy();
        let err = book.delete_rows(SALES, 1).unwrap_err();
        assert!(matches!(err, PosError::ProtectedHeader { .. }));
    }

    #[test]
    fn delete_shifts_rows_up() {
        let mut book = Workbook::pharmacy();
        book.append_rows(
            DEBT,
            vec![strings(&["a"]), strings(&["b"]), strings(&["c"])],
        )
        .unwrap();
        book.delete_rows(DEBT, 3).unwrap();
        let values = book.get_all_values(DEBT).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2][0], "c");
    }

    #[test]
    fn unknown_worksheet() {
        let book = Workbook::new();
        assert!(matches!(
            book.get_all_values("SanPham"),
            Err(PosError::WorksheetNotFound { .. })
        ));
    }
}
