use super::Books;

pub fn run() -> anyhow::Result<()> {
    let books = Books::open()?;
    let result = books.auto_categorizer()?.categorize_uncategorized()?;
    println!(
        "{} categorized, {} left as uncategorized",
        result.categorized, result.defaulted
    );
    Ok(())
}
