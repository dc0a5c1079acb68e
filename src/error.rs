use chrono::NaiveDate;
use thiserror::Error;

use crate::money::Money;

/// Broad classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is wrong; nothing was written.
    Validation,
    /// The current state does not allow the operation.
    Conflict,
    NotFound,
    /// The store failed; the operation was rolled back.
    Storage,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    // Validation
    #[error("Journal entry needs at least 2 lines, got {0}")]
    TooFewLines(usize),

    #[error("Entry is not balanced. Debit: {debit}, Credit: {credit}")]
    UnbalancedEntry { debit: Money, credit: Money },

    #[error("Line {line}: debit and credit cannot both be non-zero")]
    DegenerateLine { line: usize },

    #[error("Line {line}: debit and credit are both zero")]
    EmptyLine { line: usize },

    #[error("Line {line}: amounts cannot be negative")]
    NegativeLineAmount { line: usize },

    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Split needs at least 2 lines, got {0}")]
    TooFewSplitLines(usize),

    #[error("Split line {line} has no client or category")]
    SplitLineMissingTarget { line: usize },

    #[error("Split line {line} has a zero amount")]
    SplitLineZeroAmount { line: usize },

    #[error("Split lines total {lines} but the transaction is {total} (difference {difference})")]
    SplitMismatch {
        total: Money,
        lines: Money,
        difference: Money,
    },

    #[error("Account {0} is inactive")]
    AccountInactive(i64),

    #[error("Account {0} cannot be reconciled: not a statement account")]
    NotStatementAccount(i64),

    #[error("Transaction {transaction_id} is not a reconciliation candidate for account {account_id}")]
    NotACandidate { transaction_id: i64, account_id: i64 },

    #[error("Invalid rule pattern '{pattern}': {reason}")]
    InvalidRulePattern { pattern: String, reason: String },

    #[error("Invalid {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Invalid date: {0}")]
    InvalidDate(#[from] chrono::ParseError),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Reconciliation does not balance. Difference is ${difference}")]
    ReconciliationMismatch { difference: Money },

    // Conflict
    #[error("Journal {0} has already been reversed")]
    AlreadyReversed(String),

    #[error("Account {0} already has a reconciliation in progress")]
    ReconciliationInProgress(i64),

    #[error("Reconciliation {0} is completed and cannot be changed")]
    ReconciliationCompleted(i64),

    #[error("Transaction {0} is not a split transaction")]
    NotASplit(i64),

    #[error("Transaction {0} belongs to a split and cannot be split again")]
    AlreadySplitChild(i64),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: i64,
        from: &'static str,
        to: &'static str,
    },

    #[error("Transaction {0} is cleared and locked to a completed reconciliation")]
    TransactionLocked(i64),

    #[error("Transaction {0} is part of a split; delete the split instead")]
    SplitMember(i64),

    #[error("Transaction {transaction_id} is held by open reconciliation {session_id}")]
    InOpenReconciliation { transaction_id: i64, session_id: i64 },

    #[error("Rule {0} is a global rule and is read-only")]
    RuleReadOnly(i64),

    #[error("Rule {0} belongs to another user")]
    RuleNotOwned(i64),

    // Not found
    #[error("Journal not found: {0}")]
    JournalNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    #[error("Reconciliation session not found: {0}")]
    SessionNotFound(i64),

    #[error("Rule not found: {0}")]
    RuleNotFound(i64),

    // Storage
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooFewLines(_)
            | Self::UnbalancedEntry { .. }
            | Self::DegenerateLine { .. }
            | Self::EmptyLine { .. }
            | Self::NegativeLineAmount { .. }
            | Self::NonPositiveAmount
            | Self::TooFewSplitLines(_)
            | Self::SplitLineMissingTarget { .. }
            | Self::SplitLineZeroAmount { .. }
            | Self::SplitMismatch { .. }
            | Self::AccountInactive(_)
            | Self::NotStatementAccount(_)
            | Self::NotACandidate { .. }
            | Self::InvalidRulePattern { .. }
            | Self::InvalidValue { .. }
            | Self::DuplicateName(_)
            | Self::ReconciliationMismatch { .. }
            | Self::InvalidDate(_) => ErrorKind::Validation,

            Self::AlreadyReversed(_)
            | Self::ReconciliationInProgress(_)
            | Self::ReconciliationCompleted(_)
            | Self::NotASplit(_)
            | Self::AlreadySplitChild(_)
            | Self::InvalidStatusTransition { .. }
            | Self::TransactionLocked(_)
            | Self::SplitMember(_)
            | Self::InOpenReconciliation { .. }
            | Self::RuleReadOnly(_)
            | Self::RuleNotOwned(_) => ErrorKind::Conflict,

            Self::JournalNotFound(_)
            | Self::AccountNotFound(_)
            | Self::ClientNotFound(_)
            | Self::CategoryNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::SessionNotFound(_)
            | Self::RuleNotFound(_) => ErrorKind::NotFound,

            Self::Db(_) | Self::Corrupt(_) => ErrorKind::Storage,
        }
    }

    /// Stable code for callers that map errors to responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TooFewLines(_) => "TOO_FEW_LINES",
            Self::UnbalancedEntry { .. } => "UNBALANCED_ENTRY",
            Self::DegenerateLine { .. } => "DEGENERATE_LINE",
            Self::EmptyLine { .. } => "EMPTY_LINE",
            Self::NegativeLineAmount { .. } => "NEGATIVE_LINE_AMOUNT",
            Self::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            Self::TooFewSplitLines(_) => "TOO_FEW_SPLIT_LINES",
            Self::SplitLineMissingTarget { .. } => "SPLIT_LINE_MISSING_TARGET",
            Self::SplitLineZeroAmount { .. } => "SPLIT_LINE_ZERO_AMOUNT",
            Self::SplitMismatch { .. } => "SPLIT_MISMATCH",
            Self::AccountInactive(_) => "ACCOUNT_INACTIVE",
            Self::NotStatementAccount(_) => "NOT_STATEMENT_ACCOUNT",
            Self::NotACandidate { .. } => "NOT_A_CANDIDATE",
            Self::InvalidRulePattern { .. } => "INVALID_RULE_PATTERN",
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::InvalidDate(_) => "INVALID_DATE",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::ReconciliationInProgress(_) => "RECONCILIATION_IN_PROGRESS",
            Self::ReconciliationCompleted(_) => "RECONCILIATION_COMPLETED",
            Self::ReconciliationMismatch { .. } => "RECONCILIATION_MISMATCH",
            Self::NotASplit(_) => "NOT_A_SPLIT",
            Self::AlreadySplitChild(_) => "ALREADY_SPLIT_CHILD",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::TransactionLocked(_) => "TRANSACTION_LOCKED",
            Self::SplitMember(_) => "SPLIT_MEMBER",
            Self::InOpenReconciliation { .. } => "IN_OPEN_RECONCILIATION",
            Self::RuleReadOnly(_) => "RULE_READ_ONLY",
            Self::RuleNotOwned(_) => "RULE_NOT_OWNED",
            Self::JournalNotFound(_) => "JOURNAL_NOT_FOUND",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            Self::CategoryNotFound(_) => "CATEGORY_NOT_FOUND",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::Db(_) => "DATABASE_ERROR",
            Self::Corrupt(_) => "CORRUPT_VALUE",
        }
    }
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?)
}

pub type Result<T> = std::result::Result<T, LedgerError>;
