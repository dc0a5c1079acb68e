use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::money::Money;

/// Declares a closed enum stored as TEXT, with `as_str`, `FromStr` and the
/// rusqlite conversions. Unknown strings are rejected on read.
macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[allow(dead_code)]
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(LedgerError::InvalidValue {
                        field: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

db_enum! {
    /// Ledger target kind. The first five are double-entry classes; the rest
    /// are statement accounts that receive flat transactions and can be
    /// reconciled against a bank statement.
    AccountType {
        Asset => "asset",
        Liability => "liability",
        Equity => "equity",
        Income => "income",
        Expense => "expense",
        Checking => "checking",
        Savings => "savings",
        CreditCard => "credit_card",
        Cash => "cash",
        Trust => "trust",
    }
}

impl AccountType {
    pub fn is_statement_account(self) -> bool {
        matches!(
            self,
            Self::Checking | Self::Savings | Self::CreditCard | Self::Cash | Self::Trust
        )
    }
}

db_enum! {
    JournalType {
        Standard => "standard",
        Adjustment => "adjustment",
        Reversal => "reversal",
        Opening => "opening",
        Closing => "closing",
    }
}

db_enum! {
    TransactionStatus {
        Pending => "pending",
        Printed => "printed",
        Cleared => "cleared",
        Void => "void",
    }
}

impl TransactionStatus {
    /// Forward-only: pending -> printed -> cleared, and anything not yet
    /// cleared may be voided.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Printed) | (Pending, Cleared) | (Printed, Cleared) | (Pending, Void) | (Printed, Void)
        )
    }
}

db_enum! {
    ReconciliationStatus {
        InProgress => "in_progress",
        Completed => "completed",
    }
}

db_enum! {
    MatchField {
        Description => "description",
        Vendor => "vendor",
        Memo => "memo",
        Amount => "amount",
        Any => "any",
    }
}

db_enum! {
    MatchType {
        Contains => "contains",
        StartsWith => "starts_with",
        EndsWith => "ends_with",
        Exact => "exact",
        Regex => "regex",
    }
}

db_enum! {
    CategorizedBy {
        Rule => "rule",
        Classifier => "classifier",
        Default => "default",
        Manual => "manual",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub is_active: bool,
}

impl Account {
    pub const COLUMNS: &'static str = "id, name, account_type, is_active";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            account_type: row.get(2)?,
            is_active: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub balance: Money,
    pub is_active: bool,
}

impl Client {
    pub const COLUMNS: &'static str = "id, name, balance, is_active";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            balance: row.get(2)?,
            is_active: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalLine {
    pub line_number: i64,
    pub account_id: i64,
    pub debit: Money,
    pub credit: Money,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Journal {
    pub journal_id: String,
    pub date: NaiveDate,
    pub journal_type: JournalType,
    pub description: String,
    pub source_type: Option<String>,
    pub source_id: Option<i64>,
    pub reverses_journal_id: Option<String>,
    pub lines: Vec<JournalLine>,
}

impl Journal {
    pub fn total_debit(&self) -> Money {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Money {
        self.lines.iter().map(|l| l.credit).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub client_id: Option<i64>,
    pub category_id: Option<i64>,
    pub date: NaiveDate,
    pub amount: Money,
    pub description: String,
    pub original_description: Option<String>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub status: TransactionStatus,
    pub check_number: Option<String>,
    pub is_split: bool,
    pub parent_transaction_id: Option<i64>,
    pub reconciliation_id: Option<i64>,
    pub cleared_date: Option<NaiveDate>,
    pub categorized_by: Option<CategorizedBy>,
}

impl Transaction {
    pub const COLUMNS: &'static str = "id, account_id, client_id, category_id, date, amount, \
         description, original_description, vendor, memo, status, check_number, is_split, \
         parent_transaction_id, reconciliation_id, cleared_date, categorized_by";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            client_id: row.get(2)?,
            category_id: row.get(3)?,
            date: row.get(4)?,
            amount: row.get(5)?,
            description: row.get(6)?,
            original_description: row.get(7)?,
            vendor: row.get(8)?,
            memo: row.get(9)?,
            status: row.get(10)?,
            check_number: row.get(11)?,
            is_split: row.get(12)?,
            parent_transaction_id: row.get(13)?,
            reconciliation_id: row.get(14)?,
            cleared_date: row.get(15)?,
            categorized_by: row.get(16)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSession {
    pub id: i64,
    pub account_id: i64,
    pub statement_date: NaiveDate,
    pub statement_ending_balance: Money,
    pub beginning_balance: Money,
    pub cleared_checks_count: i64,
    pub cleared_checks_total: Money,
    pub cleared_deposits_count: i64,
    pub cleared_deposits_total: Money,
    pub difference: Money,
    pub status: ReconciliationStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReconciliationSession {
    pub const COLUMNS: &'static str = "id, account_id, statement_date, statement_ending_balance, \
         beginning_balance, cleared_checks_count, cleared_checks_total, cleared_deposits_count, \
         cleared_deposits_total, difference, status, completed_at";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            statement_date: row.get(2)?,
            statement_ending_balance: row.get(3)?,
            beginning_balance: row.get(4)?,
            cleared_checks_count: row.get(5)?,
            cleared_checks_total: row.get(6)?,
            cleared_deposits_count: row.get(7)?,
            cleared_deposits_total: row.get(8)?,
            difference: row.get(9)?,
            status: row.get(10)?,
            completed_at: row.get(11)?,
        })
    }

    pub fn is_completed(&self) -> bool {
        self.status == ReconciliationStatus::Completed
    }

    /// beginning + deposits - checks
    pub fn cleared_balance(&self) -> Money {
        self.beginning_balance + self.cleared_deposits_total - self.cleared_checks_total
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: i64,
    pub user_id: Option<i64>,
    pub category_id: i64,
    pub match_field: MatchField,
    pub match_type: MatchType,
    pub match_value: String,
    pub case_sensitive: bool,
    pub vendor: Option<String>,
    pub priority: i64,
    pub hit_count: i64,
    pub is_active: bool,
}

impl Rule {
    pub const COLUMNS: &'static str = "id, user_id, category_id, match_field, match_type, \
         match_value, case_sensitive, vendor, priority, hit_count, is_active";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            category_id: row.get(2)?,
            match_field: row.get(3)?,
            match_type: row.get(4)?,
            match_value: row.get(5)?,
            case_sensitive: row.get(6)?,
            vendor: row.get(7)?,
            priority: row.get(8)?,
            hit_count: row.get(9)?,
            is_active: row.get(10)?,
        })
    }

    pub fn is_global(&self) -> bool {
        self.user_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_enum_text_roundtrip() {
        for t in AccountType::ALL {
            assert_eq!(AccountType::from_str(t.as_str()).unwrap(), *t);
        }
        assert_eq!(MatchType::from_str("starts_with").unwrap(), MatchType::StartsWith);
        assert_eq!(ReconciliationStatus::InProgress.as_str(), "in_progress");
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = TransactionStatus::from_str("bounced").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_VALUE");
    }

    #[test]
    fn test_status_moves_forward_only() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Printed));
        assert!(Printed.can_transition_to(Cleared));
        assert!(Printed.can_transition_to(Void));
        assert!(!Cleared.can_transition_to(Pending));
        assert!(!Cleared.can_transition_to(Void));
        assert!(!Printed.can_transition_to(Pending));
        assert!(!Void.can_transition_to(Pending));
    }

    #[test]
    fn test_statement_accounts() {
        assert!(AccountType::Trust.is_statement_account());
        assert!(AccountType::CreditCard.is_statement_account());
        assert!(!AccountType::Expense.is_statement_account());
    }
}
