use comfy_table::{Cell, Table};

use super::txn::category_names;
use super::{resolve_category, Books};
use crate::categorizer::{NewRule, RuleUpdate};
use crate::models::{MatchField, MatchType};

pub struct AddArgs {
    pub pattern: String,
    pub category: String,
    pub field: String,
    pub match_type: String,
    pub case_sensitive: bool,
    pub vendor: Option<String>,
    pub priority: i64,
}

pub fn add(args: AddArgs) -> anyhow::Result<()> {
    let books = Books::open()?;
    let rule = NewRule {
        category_id: resolve_category(&books.conn, &args.category)?,
        match_field: args.field.parse::<MatchField>()?,
        match_type: args.match_type.parse::<MatchType>()?,
        match_value: args.pattern.clone(),
        case_sensitive: args.case_sensitive,
        vendor: args.vendor,
        priority: args.priority,
    };
    let id = books.categorizer().add_rule(rule)?;
    println!("Added rule {id}: '{}' \u{2192} {}", args.pattern, args.category);
    Ok(())
}

pub fn list() -> anyhow::Result<()> {
    let books = Books::open()?;
    let rules = books.categorizer().list_rules()?;
    let categories = category_names(&books.conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Field", "Type", "Pattern", "Vendor", "Category", "Priority", "Hits", "Owner"]);
    for rule in rules {
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(rule.match_field),
            Cell::new(rule.match_type),
            Cell::new(&rule.match_value),
            Cell::new(rule.vendor.as_deref().unwrap_or_default()),
            Cell::new(categories.get(&rule.category_id).cloned().unwrap_or_default()),
            Cell::new(rule.priority),
            Cell::new(rule.hit_count),
            Cell::new(rule.user_id.map_or_else(|| "global".to_string(), |u| u.to_string())),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}

pub struct UpdateArgs {
    pub id: i64,
    pub pattern: Option<String>,
    pub category: Option<String>,
    pub field: Option<String>,
    pub match_type: Option<String>,
    pub case_sensitive: Option<bool>,
    pub priority: Option<i64>,
}

pub fn update(args: UpdateArgs) -> anyhow::Result<()> {
    let books = Books::open()?;
    let update = RuleUpdate {
        category_id: args
            .category
            .as_deref()
            .map(|c| resolve_category(&books.conn, c))
            .transpose()?,
        match_field: args.field.as_deref().map(str::parse::<MatchField>).transpose()?,
        match_type: args.match_type.as_deref().map(str::parse::<MatchType>).transpose()?,
        match_value: args.pattern,
        case_sensitive: args.case_sensitive,
        priority: args.priority,
    };
    let rule = books.categorizer().update_rule(args.id, update)?;
    println!(
        "Updated rule {}: {} {} '{}' (priority {})",
        rule.id, rule.match_field, rule.match_type, rule.match_value, rule.priority
    );
    Ok(())
}

pub fn delete(id: i64) -> anyhow::Result<()> {
    let books = Books::open()?;
    books.categorizer().delete_rule(id)?;
    println!("Deleted rule {id}");
    Ok(())
}
