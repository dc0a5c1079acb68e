//! Rule-based categorization.
//!
//! Rules are evaluated in one total order (priority ascending, then hit count
//! descending, then id) and the first match wins. Global rules and the acting
//! user's personal rules share one list.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::accounts::{category_id_by_name, require_category};
use crate::audit::{emit, AuditEntry, AuditSink};
use crate::db::{unit_of_work, UNCATEGORIZED};
use crate::error::{LedgerError, Result};
use crate::models::{CategorizedBy, MatchField, MatchType, Rule, Transaction};
use crate::money::Money;

pub const DEFAULT_PRIORITY: i64 = 100;

/// The descriptive fields a rule can look at.
#[derive(Debug, Clone, Default)]
pub struct TransactionFields {
    pub description: String,
    pub original_description: Option<String>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub amount: Money,
}

impl From<&Transaction> for TransactionFields {
    fn from(t: &Transaction) -> Self {
        Self {
            description: t.description.clone(),
            original_description: t.original_description.clone(),
            vendor: t.vendor.clone(),
            memo: t.memo.clone(),
            amount: t.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Categorization {
    pub category_id: i64,
    pub categorized_by: CategorizedBy,
    pub confidence: f64,
    pub rule_id: Option<i64>,
    /// Vendor name carried by the matching rule.
    pub vendor: Option<String>,
}

/// External fallback consulted when no rule matches. Runs on a worker thread
/// and is abandoned once the timeout passes.
pub trait Classifier: Send + Sync {
    /// Returns a category id and a confidence in `0.0..=1.0`.
    fn classify(&self, fields: &TransactionFields) -> Option<(i64, f64)>;
}

#[derive(Debug, Clone)]
pub struct NewRule {
    pub category_id: i64,
    pub match_field: MatchField,
    pub match_type: MatchType,
    pub match_value: String,
    pub case_sensitive: bool,
    pub vendor: Option<String>,
    pub priority: i64,
}

impl NewRule {
    pub fn contains(category_id: i64, value: impl Into<String>) -> Self {
        Self {
            category_id,
            match_field: MatchField::Description,
            match_type: MatchType::Contains,
            match_value: value.into(),
            case_sensitive: false,
            vendor: None,
            priority: DEFAULT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub category_id: Option<i64>,
    pub match_field: Option<MatchField>,
    pub match_type: Option<MatchType>,
    pub match_value: Option<String>,
    pub case_sensitive: Option<bool>,
    pub priority: Option<i64>,
}

pub struct CategorizeResult {
    pub categorized: usize,
    pub defaulted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountPattern {
    Equal(Money),
    Above(Money),
    Below(Money),
    Between(Money, Money),
}

impl AmountPattern {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| LedgerError::InvalidRulePattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };
        let amount = |s: &str| Money::from_str(s).map_err(|e| invalid(&e.to_string()));

        let s = raw.trim();
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Self::Equal(amount(rest)?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(Self::Above(amount(rest)?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Self::Below(amount(rest)?));
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let (lo, hi) = (amount(lo)?, amount(hi)?);
            if lo > hi {
                return Err(invalid("range start is above range end"));
            }
            return Ok(Self::Between(lo, hi));
        }
        Err(invalid("expected =N, >N, <N or N1-N2"))
    }

    /// Compared against the magnitude, so one rule covers both signs.
    fn matches(self, amount: Money) -> bool {
        let a = amount.abs();
        match self {
            Self::Equal(v) => a == v,
            Self::Above(v) => a > v,
            Self::Below(v) => a < v,
            Self::Between(lo, hi) => a >= lo && a <= hi,
        }
    }
}

enum Matcher {
    Text { needle: String, case_sensitive: bool },
    Pattern(Regex),
    Amount(AmountPattern),
}

impl Matcher {
    fn compile(field: MatchField, match_type: MatchType, value: &str, case_sensitive: bool) -> Result<Self> {
        if value.trim().is_empty() {
            return Err(LedgerError::InvalidRulePattern {
                pattern: value.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }
        if field == MatchField::Amount {
            return Ok(Self::Amount(AmountPattern::parse(value)?));
        }
        if match_type == MatchType::Regex {
            let re = RegexBuilder::new(value)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| LedgerError::InvalidRulePattern {
                    pattern: value.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(Self::Pattern(re));
        }
        let needle = if case_sensitive {
            value.to_string()
        } else {
            value.to_lowercase()
        };
        Ok(Self::Text {
            needle,
            case_sensitive,
        })
    }

    fn matches_text(&self, match_type: MatchType, haystack: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(haystack),
            Self::Text {
                needle,
                case_sensitive,
            } => {
                let lowered;
                let hay = if *case_sensitive {
                    haystack
                } else {
                    lowered = haystack.to_lowercase();
                    &lowered
                };
                match match_type {
                    MatchType::Contains => hay.contains(needle.as_str()),
                    MatchType::StartsWith => hay.starts_with(needle.as_str()),
                    MatchType::EndsWith => hay.ends_with(needle.as_str()),
                    MatchType::Exact => hay == needle,
                    MatchType::Regex => false,
                }
            }
            Self::Amount(_) => false,
        }
    }
}

struct CompiledRule {
    rule: Rule,
    matcher: Matcher,
}

impl CompiledRule {
    fn matches(&self, fields: &TransactionFields) -> bool {
        if let Matcher::Amount(pattern) = &self.matcher {
            return pattern.matches(fields.amount);
        }
        let candidates: Vec<&str> = match self.rule.match_field {
            MatchField::Description => vec![fields.description.as_str()],
            MatchField::Vendor => fields.vendor.as_deref().into_iter().collect(),
            MatchField::Memo => fields.memo.as_deref().into_iter().collect(),
            MatchField::Any => [
                Some(fields.description.as_str()),
                fields.original_description.as_deref(),
                fields.vendor.as_deref(),
                fields.memo.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect(),
            MatchField::Amount => Vec::new(),
        };
        candidates
            .into_iter()
            .any(|hay| self.matcher.matches_text(self.rule.match_type, hay))
    }
}

/// Rows the batch may (re)categorize.
const ELIGIBLE: &str = "(category_id IS NULL OR categorized_by = 'default') AND is_split = 0 AND status != 'void'";

/// Counts a rule match. Call inside the unit of work that stores the
/// categorization, so a failed write leaves the count untouched.
pub(crate) fn record_hit(conn: &Connection, rule_id: i64) -> Result<()> {
    conn.execute("UPDATE rules SET hit_count = hit_count + 1 WHERE id = ?1", [rule_id])?;
    Ok(())
}

fn validate_pattern(field: MatchField, match_type: MatchType, value: &str) -> Result<()> {
    Matcher::compile(field, match_type, value, true).map(|_| ())
}

pub struct Categorizer<'a> {
    conn: &'a Connection,
    audit: &'a dyn AuditSink,
    user_id: Option<i64>,
    classifier: Option<(Arc<dyn Classifier>, Duration)>,
}

impl<'a> Categorizer<'a> {
    /// `user_id` is the acting user. `None` is the system context, which
    /// sees and manages global rules only.
    pub fn new(conn: &'a Connection, audit: &'a dyn AuditSink, user_id: Option<i64>) -> Self {
        Self {
            conn,
            audit,
            user_id,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>, timeout: Duration) -> Self {
        self.classifier = Some((classifier, timeout));
        self
    }

    /// Active rules visible to the acting user, in evaluation order.
    pub fn list_rules(&self) -> Result<Vec<Rule>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM rules WHERE is_active = 1 AND (user_id IS NULL OR user_id = ?1) \
             ORDER BY priority ASC, hit_count DESC, id ASC",
            Rule::COLUMNS
        ))?;
        let rules = stmt
            .query_map([self.user_id], Rule::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    fn snapshot(&self) -> Result<Vec<CompiledRule>> {
        let mut compiled = Vec::new();
        for rule in self.list_rules()? {
            match Matcher::compile(rule.match_field, rule.match_type, &rule.match_value, rule.case_sensitive) {
                Ok(matcher) => compiled.push(CompiledRule { rule, matcher }),
                Err(e) => warn!(rule_id = rule.id, error = %e, "skipping unusable rule"),
            }
        }
        Ok(compiled)
    }

    /// Picks a category for one transaction without writing anything. The
    /// caller records the rule hit with [`record_hit`] in the same unit of
    /// work that stores the result.
    pub fn categorize(&self, fields: &TransactionFields) -> Result<Categorization> {
        let rules = self.snapshot()?;
        self.categorize_with(&rules, fields)
    }

    fn categorize_with(&self, rules: &[CompiledRule], fields: &TransactionFields) -> Result<Categorization> {
        if let Some(hit) = rules.iter().find(|r| r.matches(fields)) {
            debug!(rule_id = hit.rule.id, category_id = hit.rule.category_id, "rule matched");
            return Ok(Categorization {
                category_id: hit.rule.category_id,
                categorized_by: CategorizedBy::Rule,
                confidence: 1.0,
                rule_id: Some(hit.rule.id),
                vendor: hit.rule.vendor.clone(),
            });
        }

        if let Some((category_id, confidence)) = self.ask_classifier(fields) {
            if require_category(self.conn, category_id).is_ok() {
                return Ok(Categorization {
                    category_id,
                    categorized_by: CategorizedBy::Classifier,
                    confidence,
                    rule_id: None,
                    vendor: None,
                });
            }
            warn!(category_id, "classifier returned an unknown category");
        }

        Ok(Categorization {
            category_id: category_id_by_name(self.conn, UNCATEGORIZED)?,
            categorized_by: CategorizedBy::Default,
            confidence: 0.0,
            rule_id: None,
            vendor: None,
        })
    }

    fn ask_classifier(&self, fields: &TransactionFields) -> Option<(i64, f64)> {
        let (classifier, timeout) = self.classifier.as_ref()?;
        let classifier = Arc::clone(classifier);
        let fields = fields.clone();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(classifier.classify(&fields));
        });
        match rx.recv_timeout(*timeout) {
            Ok(answer) => answer,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "classifier timed out");
                None
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("classifier worker exited without an answer");
                None
            }
        }
    }

    /// Runs every uncategorized (or defaulted) transaction through one rule
    /// snapshot. Matching and the classifier run before the write lock is
    /// taken; the results are then stored in one short unit of work. Rows
    /// that were categorized or voided in between are left alone.
    pub fn categorize_uncategorized(&self) -> Result<CategorizeResult> {
        let rules = self.snapshot()?;
        let pending: Vec<Transaction> = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM transactions WHERE {ELIGIBLE} ORDER BY date, id",
                Transaction::COLUMNS
            ))?;
            let rows = stmt
                .query_map([], Transaction::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut decided = Vec::with_capacity(pending.len());
        for txn in &pending {
            decided.push((txn.id, self.categorize_with(&rules, &TransactionFields::from(txn))?));
        }

        let result = unit_of_work(self.conn, "categorize_uncategorized", |tx| {
            let mut result = CategorizeResult {
                categorized: 0,
                defaulted: 0,
            };
            for (id, c) in &decided {
                let changed = tx.execute(
                    &format!(
                        "UPDATE transactions SET category_id = ?1, categorized_by = ?2, \
                         vendor = COALESCE(vendor, ?3) WHERE id = ?4 AND {ELIGIBLE}"
                    ),
                    rusqlite::params![c.category_id, c.categorized_by, c.vendor, id],
                )?;
                if changed == 0 {
                    continue;
                }
                if let Some(rule_id) = c.rule_id {
                    record_hit(tx, rule_id)?;
                }
                if c.categorized_by == CategorizedBy::Default {
                    result.defaulted += 1;
                } else {
                    result.categorized += 1;
                }
            }
            Ok(result)
        })?;
        info!(
            categorized = result.categorized,
            defaulted = result.defaulted,
            "batch categorization finished"
        );
        Ok(result)
    }

    pub fn get_rule(&self, id: i64) -> Result<Rule> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM rules WHERE id = ?1", Rule::COLUMNS),
                [id],
                Rule::from_row,
            )
            .optional()?
            .ok_or(LedgerError::RuleNotFound(id))
    }

    /// Global rules belong to the system context; personal rules to their owner.
    fn check_can_modify(&self, rule: &Rule) -> Result<()> {
        if rule.is_global() {
            return match self.user_id {
                None => Ok(()),
                Some(_) => Err(LedgerError::RuleReadOnly(rule.id)),
            };
        }
        match self.user_id {
            Some(me) if rule.user_id == Some(me) => Ok(()),
            _ => Err(LedgerError::RuleNotOwned(rule.id)),
        }
    }

    pub fn add_rule(&self, rule: NewRule) -> Result<i64> {
        validate_pattern(rule.match_field, rule.match_type, &rule.match_value)?;
        require_category(self.conn, rule.category_id)?;
        self.conn.execute(
            "INSERT INTO rules (user_id, category_id, match_field, match_type, match_value, \
             case_sensitive, vendor, priority) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                self.user_id,
                rule.category_id,
                rule.match_field,
                rule.match_type,
                rule.match_value,
                rule.case_sensitive,
                rule.vendor,
                rule.priority,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(rule_id = id, priority = rule.priority, "rule added");
        emit(
            self.audit,
            AuditEntry::new("rule.create", "rule", id).new_values(json!({
                "category_id": rule.category_id,
                "match_field": rule.match_field,
                "match_type": rule.match_type,
                "match_value": rule.match_value,
                "priority": rule.priority,
            })),
        );
        Ok(id)
    }

    pub fn update_rule(&self, id: i64, update: RuleUpdate) -> Result<Rule> {
        let current = self.get_rule(id)?;
        self.check_can_modify(&current)?;

        let match_field = update.match_field.unwrap_or(current.match_field);
        let match_type = update.match_type.unwrap_or(current.match_type);
        let match_value = update.match_value.clone().unwrap_or_else(|| current.match_value.clone());
        validate_pattern(match_field, match_type, &match_value)?;
        let category_id = update.category_id.unwrap_or(current.category_id);
        require_category(self.conn, category_id)?;

        self.conn.execute(
            "UPDATE rules SET category_id = ?1, match_field = ?2, match_type = ?3, match_value = ?4, \
             case_sensitive = ?5, priority = ?6 WHERE id = ?7",
            rusqlite::params![
                category_id,
                match_field,
                match_type,
                match_value,
                update.case_sensitive.unwrap_or(current.case_sensitive),
                update.priority.unwrap_or(current.priority),
                id,
            ],
        )?;
        let updated = self.get_rule(id)?;
        emit(
            self.audit,
            AuditEntry::new("rule.update", "rule", id)
                .old(json!(current))
                .new_values(json!(updated)),
        );
        Ok(updated)
    }

    /// Soft delete; the row stays for history.
    pub fn delete_rule(&self, id: i64) -> Result<()> {
        let current = self.get_rule(id)?;
        self.check_can_modify(&current)?;
        self.conn
            .execute("UPDATE rules SET is_active = 0 WHERE id = ?1", [id])?;
        info!(rule_id = id, "rule deactivated");
        emit(
            self.audit,
            AuditEntry::new("rule.delete", "rule", id).old(json!(current)),
        );
        Ok(())
    }
}

/// Share of past votes a category needs before it is suggested.
const MIN_HISTORY_SHARE: f64 = 0.5;

/// Suggests the category most often given, by hand or by rule, to earlier
/// transactions from the same vendor (or with the same description).
pub struct HistoryClassifier {
    votes: HashMap<String, HashMap<i64, i64>>,
}

impl HistoryClassifier {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT lower(trim(COALESCE(vendor, description))), category_id, count(*) FROM transactions \
             WHERE category_id IS NOT NULL AND categorized_by IN ('manual', 'rule') AND status != 'void' \
             GROUP BY 1, 2",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
        })?;
        let mut votes: HashMap<String, HashMap<i64, i64>> = HashMap::new();
        for row in rows {
            let (key, category_id, n) = row?;
            votes.entry(key).or_default().insert(category_id, n);
        }
        debug!(keys = votes.len(), "history classifier loaded");
        Ok(Self { votes })
    }

    fn key(fields: &TransactionFields) -> String {
        fields
            .vendor
            .as_deref()
            .unwrap_or(&fields.description)
            .trim()
            .to_lowercase()
    }
}

impl Classifier for HistoryClassifier {
    fn classify(&self, fields: &TransactionFields) -> Option<(i64, f64)> {
        let votes = self.votes.get(&Self::key(fields))?;
        let total: i64 = votes.values().sum();
        // ties go to the older category
        let (&category_id, &n) = votes
            .iter()
            .max_by_key(|(id, n)| (**n, std::cmp::Reverse(**id)))?;
        let share = n as f64 / total as f64;
        (share >= MIN_HISTORY_SHARE).then_some((category_id, share))
    }
}
