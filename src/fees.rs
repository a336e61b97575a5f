//! Fee, payment and post-dated cheque status rules.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FeeError {
    #[error("unknown {kind} status: {value}")]
    UnknownStatus { kind: &'static str, value: String },
    #[error("cannot move {kind} from {from} to {to}")]
    InvalidTransition {
        kind: &'static str,
        from: &'static str,
        to: &'static str,
    },
}

impl FeeError {
    pub fn code(&self) -> &'static str {
        match self {
            FeeError::UnknownStatus { .. } => "bad_params",
            FeeError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

pub fn round_money(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub const EPSILON: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
    Late,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Pending => "Pending",
            FeeStatus::Partial => "Partial",
            FeeStatus::Paid => "Paid",
            FeeStatus::Late => "Late",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FeeError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(FeeStatus::Pending),
            "partial" => Ok(FeeStatus::Partial),
            "paid" => Ok(FeeStatus::Paid),
            "late" => Ok(FeeStatus::Late),
            _ => Err(FeeError::UnknownStatus {
                kind: "fee",
                value: s.to_string(),
            }),
        }
    }
}

/// Money state of one fee record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeBalance {
    pub amount: f64,
    pub late_fee: f64,
    pub amount_paid: f64,
    pub due_date: NaiveDate,
}

impl FeeBalance {
    pub fn total_due(&self) -> f64 {
        round_money(self.amount + self.late_fee)
    }

    pub fn balance_due(&self) -> f64 {
        round_money((self.total_due() - self.amount_paid).max(0.0))
    }

    pub fn status(&self, today: NaiveDate) -> FeeStatus {
        if self.balance_due() < EPSILON {
            FeeStatus::Paid
        } else if today > self.due_date {
            FeeStatus::Late
        } else if self.amount_paid > EPSILON {
            FeeStatus::Partial
        } else {
            FeeStatus::Pending
        }
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    Success,
    Pending,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Success => "Success",
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FeeError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(TransactionStatus::Success),
            "pending" => Ok(TransactionStatus::Pending),
            "failed" => Ok(TransactionStatus::Failed),
            _ => Err(FeeError::UnknownStatus {
                kind: "transaction",
                value: s.to_string(),
            }),
        }
    }

    /// Label shown on receipts and transaction tables.
    pub fn badge_label(self) -> &'static str {
        match self {
            TransactionStatus::Success => "Paid",
            TransactionStatus::Pending => "Partial",
            TransactionStatus::Failed => "Void",
        }
    }

    /// Only successful transactions count towards `amount_paid`.
    pub fn counts_as_paid(self) -> bool {
        self == TransactionStatus::Success
    }

    pub fn transition(self, to: TransactionStatus) -> Result<TransactionStatus, FeeError> {
        use TransactionStatus::*;
        match (self, to) {
            (Pending, Success) | (Pending, Failed) | (Success, Failed) => Ok(to),
            _ => Err(FeeError::InvalidTransition {
                kind: "transaction",
                from: self.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PdcStatus {
    Pending,
    Cleared,
    Bounced,
}

impl PdcStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PdcStatus::Pending => "Pending",
            PdcStatus::Cleared => "Cleared",
            PdcStatus::Bounced => "Bounced",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FeeError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PdcStatus::Pending),
            "cleared" => Ok(PdcStatus::Cleared),
            "bounced" => Ok(PdcStatus::Bounced),
            _ => Err(FeeError::UnknownStatus {
                kind: "cheque",
                value: s.to_string(),
            }),
        }
    }

    pub fn transition(self, to: PdcStatus) -> Result<PdcStatus, FeeError> {
        match (self, to) {
            (PdcStatus::Pending, PdcStatus::Cleared) | (PdcStatus::Pending, PdcStatus::Bounced) => {
                Ok(to)
            }
            _ => Err(FeeError::InvalidTransition {
                kind: "cheque",
                from: self.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LateFeeRule {
    Fixed(f64),
    Percent(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LateFeePolicy {
    pub rule: LateFeeRule,
    pub grace_days: i64,
}

impl LateFeePolicy {
    /// Builds the policy from the `fees` setup section.
    pub fn from_settings(fees: &serde_json::Value) -> Self {
        let mode = fees
            .get("lateFeeMode")
            .and_then(|v| v.as_str())
            .unwrap_or("fixed");
        let rule = if mode == "percent" {
            LateFeeRule::Percent(
                fees.get("lateFeePercent")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(2.0),
            )
        } else {
            LateFeeRule::Fixed(
                fees.get("lateFeeAmount")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(50.0),
            )
        };
        let grace_days = fees.get("graceDays").and_then(|v| v.as_i64()).unwrap_or(0);
        Self { rule, grace_days }
    }

    /// Late fee owed on `balance` for a record at `today`, or `None` when not yet due.
    pub fn late_fee_for(&self, balance: &FeeBalance, today: NaiveDate) -> Option<f64> {
        if balance.balance_due() < EPSILON {
            return None;
        }
        if balance.days_overdue(today) <= self.grace_days {
            return None;
        }
        let fee = match self.rule {
            LateFeeRule::Fixed(amount) => amount,
            LateFeeRule::Percent(pct) => balance.balance_due() * pct / 100.0,
        };
        let fee = round_money(fee);
        if fee < EPSILON {
            None
        } else {
            Some(fee)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateItem {
    pub name: String,
    pub amount: f64,
}

pub fn template_total(items: &[TemplateItem]) -> f64 {
    round_money(items.iter().map(|i| i.amount).sum())
}
