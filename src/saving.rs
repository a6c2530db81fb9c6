use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use crate::error::{PosError, Result};
use crate::sheet::{RowStore, Workbook};

pub fn save_workbook(workbook: &Workbook, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| PosError::io(path, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, workbook).map_err(|e| PosError::Persistence {
        message: e.to_string(),
    })?;

    let encoder = writer
        .into_inner()
        .map_err(|e| PosError::io(path, e.into_error()))?;
    encoder.finish().map_err(|e| PosError::io(path, e))?;

    debug!("saved workbook to {}", path.display());
    Ok(())
}

pub fn load_workbook(path: impl AsRef<Path>) -> Result<Workbook> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PosError::io(path, e))?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    deserialize_from(&mut reader).map_err(|e| PosError::Persistence {
        message: e.to_string(),
    })
}

/// Serialize a workbook to a gzip-compressed buffer
pub fn to_bytes(workbook: &Workbook) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let encoded = bincode::serialize(workbook).map_err(|e| PosError::Persistence {
        message: e.to_string(),
    })?;
    encoder
        .write_all(&encoded)
        .and_then(|_| encoder.finish())
        .map_err(|e| PosError::Persistence {
            message: e.to_string(),
        })
}

pub fn from_bytes(buffer: &[u8]) -> Result<Workbook> {
    let decoder = GzDecoder::new(Cursor::new(buffer));
    let mut reader = BufReader::new(decoder);
    deserialize_from(&mut reader).map_err(|e| PosError::Persistence {
        message: e.to_string(),
    })
}

/// Workbook backed by a file; every mutation is written through to disk
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    workbook: Workbook,
}

impl FileStore {
    /// Open the workbook at `path`, creating the pharmacy layout if the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut workbook = if path.exists() {
            load_workbook(&path)?
        } else {
            info!("creating new workbook at {}", path.display());
            Workbook::pharmacy()
        };
        workbook.ensure_pharmacy_layout();

        let store = FileStore { path, workbook };
        store.flush()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    /// Swap in a whole workbook, e.g. one uploaded through the web API
    pub fn replace(&mut self, mut workbook: Workbook) -> Result<()> {
        workbook.ensure_pharmacy_layout();
        self.workbook = workbook;
        self.flush()
    }

    pub fn flush(&self) -> Result<()> {
        save_workbook(&self.workbook, &self.path)
    }
}

impl RowStore for FileStore {
    fn get_all_values(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        self.workbook.get_all_values(worksheet)
    }

    fn append_row(&mut self, worksheet: &str, row: Vec<String>) -> Result<()> {
        self.workbook.append_row(worksheet, row)?;
        self.flush()
    }

    fn append_rows(&mut self, worksheet: &str, rows: Vec<Vec<String>>) -> Result<()> {
        self.workbook.append_rows(worksheet, rows)?;
        self.flush()
    }

    fn update_cell(
        &mut self,
        worksheet: &str,
        row: usize,
        col: usize,
        value: String,
    ) -> Result<()> {
        self.workbook.update_cell(worksheet, row, col, value)?;
        self.flush()
    }

    fn delete_rows(&mut self, worksheet: &str, row: usize) -> Result<()> {
        self.workbook.delete_rows(worksheet, row)?;
        self.flush()
    }

    fn ensure_worksheet(&mut self, worksheet: &str, header: &[&str]) -> Result<()> {
        self.workbook.ensure_worksheet(worksheet, header)?;
        self.flush()
    }

    fn worksheet_names(&self) -> Vec<String> {
        self.workbook.worksheet_names()
    }
}
