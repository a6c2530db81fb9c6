//! The data manager: owns the row store, the inventory read cache and the
//! clock used to stamp transactions. Domain operations live in `inventory`,
//! `sales`, `purchases` and `debt` as `impl` blocks on [`DataManager`].

use chrono::{Local, NaiveDateTime};
use log::{error, warn};
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::error::Result;
use crate::inventory::InventorySnapshot;
use crate::sheet::RowStore;

/// One write made by an unfinished ledger operation
#[derive(Debug)]
enum Undo {
    Cell {
        worksheet: &'static str,
        row: usize,
        col: usize,
        old: String,
    },
    Rows {
        worksheet: &'static str,
        first: usize,
        count: usize,
    },
}

/// Writes a ledger operation has made so far.
///
/// Operations that touch several cells or worksheets run inside
/// `DataManager::transact`, which undoes the recorded writes if a later one
/// fails, so stock and the history worksheets never disagree.
#[derive(Debug, Default)]
pub(crate) struct Rollback {
    steps: Vec<Undo>,
}

impl Rollback {
    pub(crate) fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Text of a 1-based cell in raw worksheet values, empty when out of range
pub(crate) fn cell_text(values: &[Vec<String>], row: usize, col: usize) -> String {
    values
        .get(row.wrapping_sub(1))
        .and_then(|r| r.get(col.wrapping_sub(1)))
        .cloned()
        .unwrap_or_default()
}

/// Source of "now" for timestamps and order ids
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Clock {
    System,
    Fixed(NaiveDateTime),
}

impl Clock {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Clock::System => Local::now().naive_local(),
            Clock::Fixed(ts) => *ts,
        }
    }
}

pub struct DataManager<S: RowStore> {
    pub(crate) store: S,
    pub(crate) inventory_cache: TtlCache<InventorySnapshot>,
    pub(crate) clock: Clock,
    pub(crate) default_min_stock: f64,
}

impl<S: RowStore> DataManager<S> {
    pub fn new(store: S) -> Self {
        DataManager::with_config(store, &Config::default())
    }

    pub fn with_config(store: S, config: &Config) -> Self {
        DataManager {
            store,
            inventory_cache: TtlCache::new(Duration::from_secs(config.cache_ttl_secs)),
            clock: Clock::System,
            default_min_stock: config.default_min_stock,
        }
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store; drops cached reads since the caller may write
    pub fn store_mut(&mut self) -> &mut S {
        self.inventory_cache.invalidate();
        &mut self.store
    }

    /// Drop every cached read; called after each committed mutation
    pub fn invalidate(&mut self) {
        self.inventory_cache.invalidate();
    }

    /// Update a cell and remember `old` so it can be put back
    pub(crate) fn write_cell(
        &mut self,
        undo: &mut Rollback,
        worksheet: &'static str,
        row: usize,
        col: usize,
        value: String,
        old: String,
    ) -> Result<()> {
        self.store.update_cell(worksheet, row, col, value)?;
        undo.steps.push(Undo::Cell {
            worksheet,
            row,
            col,
            old,
        });
        Ok(())
    }

    /// Append rows and remember where they landed; returns the first new sheet row
    pub(crate) fn append_logged(
        &mut self,
        undo: &mut Rollback,
        worksheet: &'static str,
        rows: Vec<Vec<String>>,
    ) -> Result<usize> {
        let first = self.values(worksheet)?.len() + 1;
        let count = rows.len();
        self.store.append_rows(worksheet, rows)?;
        if count > 0 {
            undo.steps.push(Undo::Rows {
                worksheet,
                first,
                count,
            });
        }
        Ok(first)
    }

    /// Run a multi-write operation: on error every recorded write is undone.
    /// Cached reads are dropped either way.
    pub(crate) fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut Self, &mut Rollback) -> Result<T>,
    ) -> Result<T> {
        let mut undo = Rollback::default();
        match op(self, &mut undo) {
            Ok(value) => {
                self.invalidate();
                Ok(value)
            }
            Err(e) => {
                self.roll_back(undo);
                Err(e)
            }
        }
    }

    /// Undo recorded writes, newest first, and drop cached reads
    fn roll_back(&mut self, undo: Rollback) {
        if !undo.is_empty() {
            warn!("rolling back {} write(s)", undo.steps.len());
        }
        for step in undo.steps.into_iter().rev() {
            let restored = match step {
                Undo::Cell {
                    worksheet,
                    row,
                    col,
                    old,
                } => self.store.update_cell(worksheet, row, col, old),
                Undo::Rows {
                    worksheet,
                    first,
                    count,
                } => (0..count).try_for_each(|_| self.store.delete_rows(worksheet, first)),
            };
            if let Err(e) = restored {
                error!("rollback incomplete: {}", e);
            }
        }
        self.invalidate();
    }

    pub(crate) fn values(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        self.store.get_all_values(worksheet)
    }
}
