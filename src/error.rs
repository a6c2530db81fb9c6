//! Error types for the pharmacy ledger

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the row store, the data manager and its surfaces
#[derive(Error, Debug)]
pub enum PosError {
    #[error("Worksheet not found: {name}")]
    WorksheetNotFound { name: String },

    #[error("Cell {cell} is outside worksheet {worksheet} ({rows} rows)")]
    CellOutOfRange {
        worksheet: String,
        cell: String,
        rows: usize,
    },

    #[error("Row 1 of {worksheet} is the header and cannot be deleted")]
    ProtectedHeader { worksheet: String },

    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    #[error("Invalid product: {message}")]
    InvalidProduct { message: String },

    #[error("Not enough stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: f64,
        available: f64,
    },

    #[error("No sale of {product_id} found in order {order_id}")]
    SaleNotFound {
        order_id: String,
        product_id: String,
    },

    #[error("Nothing to process: the list is empty")]
    EmptyCart,

    #[error("Invalid quantity {quantity} for {product_id}")]
    InvalidQuantity { product_id: String, quantity: f64 },

    #[error("Amount must be positive, got {amount}")]
    InvalidAmount { amount: f64 },

    #[error("Customer name is required")]
    MissingCustomer,

    #[error("Payment of {amount} exceeds the outstanding balance {balance} for {customer}")]
    Overpayment {
        customer: String,
        amount: f64,
        balance: f64,
    },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode or decode workbook: {message}")]
    Persistence { message: String },

    #[error("CSV error at line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("XLSX export failed")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl From<csv::Error> for PosError {
    fn from(e: csv::Error) -> Self {
        let line = e.position().map_or(0, |p| p.line() as usize);
        PosError::Csv {
            line,
            message: e.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, PosError>;

impl PosError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PosError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error was caused by the request rather than the store
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PosError::ProductNotFound { .. }
                | PosError::InvalidProduct { .. }
                | PosError::InsufficientStock { .. }
                | PosError::SaleNotFound { .. }
                | PosError::EmptyCart
                | PosError::InvalidQuantity { .. }
                | PosError::InvalidAmount { .. }
                | PosError::MissingCustomer
                | PosError::Overpayment { .. }
        )
    }
}
