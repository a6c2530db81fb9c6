//! Customer credit ledger (CongNo).
//!
//! Every entry is either a charge (`GhiNo`, the customer took goods on
//! credit) or a payment (`ThanhToan`). A customer's balance is the sum of
//! charges minus the sum of payments.

use chrono::NaiveDateTime;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PosError, Result};
use crate::header::Table;
use crate::manager::DataManager;
use crate::numeric::{TIMESTAMP_FORMAT, format_number, parse_date_time, parse_number};
use crate::sheet::{DEBT, DEBT_HEADER, RowStore};

const CHARGE: &str = "GhiNo";
const PAYMENT: &str = "ThanhToan";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtKind {
    Charge,
    Payment,
}

impl DebtKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DebtKind::Charge => CHARGE,
            DebtKind::Payment => PAYMENT,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            CHARGE => Some(DebtKind::Charge),
            PAYMENT => Some(DebtKind::Payment),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebtEntry {
    pub row: usize,
    pub date: Option<NaiveDateTime>,
    pub customer: String,
    pub order_id: String,
    pub kind: DebtKind,
    pub amount: f64,
    pub note: String,
}

impl DebtEntry {
    /// Effect on the customer's balance
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            DebtKind::Charge => self.amount,
            DebtKind::Payment => -self.amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomerBalance {
    pub customer: String,
    pub balance: f64,
    pub last_activity: Option<NaiveDateTime>,
}

fn customer_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl<S: RowStore> DataManager<S> {
    pub fn load_debt_ledger(&self) -> Result<Vec<DebtEntry>> {
        let values = self.values(DEBT)?;
        let table = Table::with_fixed_header(values, &DEBT_HEADER);
        let mut entries = Vec::with_capacity(table.len());

        for (i, cells) in table.rows.iter().enumerate() {
            let Some(kind) = DebtKind::parse(&cells[3]) else {
                warn!(
                    "{} row {} has unknown entry type {:?}, skipped",
                    DEBT,
                    Table::sheet_row(i),
                    cells[3]
                );
                continue;
            };
            entries.push(DebtEntry {
                row: Table::sheet_row(i),
                date: parse_date_time(&cells[0]),
                customer: cells[1].trim().to_string(),
                order_id: cells[2].trim().to_string(),
                kind,
                amount: parse_number(&cells[4]),
                note: cells[5].trim().to_string(),
            });
        }

        Ok(entries)
    }

    /// Outstanding balance for a customer; names match case-insensitively
    pub fn customer_balance(&self, customer: &str) -> Result<f64> {
        let key = customer_key(customer);
        Ok(self
            .load_debt_ledger()?
            .iter()
            .filter(|e| customer_key(&e.customer) == key)
            .map(DebtEntry::signed_amount)
            .sum())
    }

    /// Customers who still owe money, largest balance first
    pub fn outstanding_balances(&self) -> Result<Vec<CustomerBalance>> {
        let mut by_customer: BTreeMap<String, CustomerBalance> = BTreeMap::new();
        for entry in self.load_debt_ledger()? {
            let slot = by_customer
                .entry(customer_key(&entry.customer))
                .or_insert_with(|| CustomerBalance {
                    customer: entry.customer.clone(),
                    balance: 0.0,
                    last_activity: None,
                });
            slot.balance += entry.signed_amount();
            slot.last_activity = slot.last_activity.max(entry.date);
        }

        let mut balances: Vec<CustomerBalance> = by_customer
            .into_values()
            .filter(|b| b.balance > 0.005)
            .collect();
        balances.sort_by(|a, b| b.balance.total_cmp(&a.balance));
        Ok(balances)
    }

    pub fn record_charge(
        &mut self,
        customer: &str,
        amount: f64,
        order_id: &str,
        note: &str,
    ) -> Result<DebtEntry> {
        self.record_debt(customer, DebtKind::Charge, amount, order_id, note)
    }

    /// Record a repayment; paying more than is owed is refused
    pub fn record_payment(&mut self, customer: &str, amount: f64, note: &str) -> Result<DebtEntry> {
        if customer.trim().is_empty() {
            return Err(PosError::MissingCustomer);
        }
        let balance = self.customer_balance(customer)?;
        if amount > balance + 0.005 {
            return Err(PosError::Overpayment {
                customer: customer.trim().to_string(),
                amount,
                balance,
            });
        }
        self.record_debt(customer, DebtKind::Payment, amount, "", note)
    }

    fn record_debt(
        &mut self,
        customer: &str,
        kind: DebtKind,
        amount: f64,
        order_id: &str,
        note: &str,
    ) -> Result<DebtEntry> {
        let customer = customer.trim();
        if customer.is_empty() {
            return Err(PosError::MissingCustomer);
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(PosError::InvalidAmount { amount });
        }

        let now = self.now();
        let row = vec![
            now.format(TIMESTAMP_FORMAT).to_string(),
            customer.to_string(),
            order_id.trim().to_string(),
            kind.as_str().to_string(),
            format_number(amount),
            note.trim().to_string(),
        ];
        self.store.append_row(DEBT, row)?;
        let sheet_row = self.values(DEBT)?.len();
        self.invalidate();

        info!("{} {} for {}", kind.as_str(), format_number(amount), customer);
        Ok(DebtEntry {
            row: sheet_row,
            date: Some(now),
            customer: customer.to_string(),
            order_id: order_id.trim().to_string(),
            kind,
            amount,
            note: note.trim().to_string(),
        })
    }
}
