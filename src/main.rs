mod accounts;
mod audit;
mod categorizer;
mod cli;
mod db;
mod error;
mod fmt;
mod ledger;
mod models;
mod money;
mod reconciler;
mod settings;
mod splitter;
mod transactions;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{
    AccountsCommands, Cli, ClientsCommands, Commands, JournalCommands, ReconcileCommands, RulesCommands,
    SplitCommands, TxnCommands,
};

/// `RUST_LOG` wins when set; otherwise `level` applies to this crate only.
fn init_logger(level: &str) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::try_new(format!("{}={}", env!("CARGO_CRATE_NAME"), level))
            .unwrap_or_else(|_| EnvFilter::new(format!("{}=warn", env!("CARGO_CRATE_NAME")))),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logger(&settings::load_settings().log_level);

    let result = match cli.command {
        Commands::Init { data_dir, firm } => cli::init::run(data_dir, firm),
        Commands::Status => cli::status::run(),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add { name, account_type } => cli::accounts::add(&name, &account_type),
            AccountsCommands::List { all } => cli::accounts::list(all),
            AccountsCommands::Deactivate { account } => cli::accounts::deactivate(&account),
            AccountsCommands::Summary => cli::accounts::summary(),
        },
        Commands::Clients { command } => match command {
            ClientsCommands::Add { name } => cli::clients::add(&name),
            ClientsCommands::List => cli::clients::list(),
        },
        Commands::Journal { command } => match command {
            JournalCommands::Post {
                description,
                date,
                debits,
                credits,
                journal_type,
            } => cli::journal::post(&description, date, &debits, &credits, &journal_type),
            JournalCommands::Expense {
                amount,
                expense,
                from,
                description,
                date,
            } => cli::journal::simple(cli::journal::SimpleKind::Expense, amount, &expense, &from, &description, date),
            JournalCommands::Income {
                amount,
                to,
                from,
                description,
                date,
            } => cli::journal::simple(cli::journal::SimpleKind::Income, amount, &to, &from, &description, date),
            JournalCommands::Transfer {
                amount,
                from,
                to,
                description,
                date,
            } => cli::journal::simple(cli::journal::SimpleKind::Transfer, amount, &from, &to, &description, date),
            JournalCommands::Reverse { journal_id, reason } => cli::journal::reverse(&journal_id, &reason),
            JournalCommands::Show { journal_id } => cli::journal::show(&journal_id),
            JournalCommands::List { limit } => cli::journal::list(limit),
        },
        Commands::Balance { account, as_of } => cli::journal::balance(&account, as_of),
        Commands::TrialBalance { as_of } => cli::journal::trial_balance(as_of),
        Commands::Verify => cli::journal::verify(),
        Commands::Txn { command } => match command {
            TxnCommands::Add {
                account,
                amount,
                description,
                date,
                client,
                category,
                vendor,
                memo,
                check_number,
            } => cli::txn::add(cli::txn::AddArgs {
                account,
                amount,
                description,
                date,
                client,
                category,
                vendor,
                memo,
                check_number,
            }),
            TxnCommands::List { account, limit } => cli::txn::list(account.as_deref(), limit),
            TxnCommands::Status { id, status } => cli::txn::status(id, &status),
            TxnCommands::Void { id, reason } => cli::txn::void(id, &reason),
        },
        Commands::Split { command } => match command {
            SplitCommands::Create {
                account,
                total,
                description,
                date,
                check_number,
                lines,
            } => cli::split::create(cli::split::CreateArgs {
                account,
                total,
                description,
                date,
                check_number,
                lines,
            }),
            SplitCommands::Apply { id, lines } => cli::split::apply(id, &lines),
            SplitCommands::Show { id } => cli::split::show(id),
            SplitCommands::Delete { id } => cli::split::delete(id),
        },
        Commands::Reconcile { command } => match command {
            ReconcileCommands::Start { account, date, balance } => cli::reconcile::start(&account, date, balance),
            ReconcileCommands::Save { id, clear } => cli::reconcile::save(id, &clear),
            ReconcileCommands::Complete { id, clear } => cli::reconcile::complete(id, clear.as_deref()),
            ReconcileCommands::Update { id, date, balance } => cli::reconcile::update(id, date, balance),
            ReconcileCommands::Delete { id } => cli::reconcile::delete(id),
            ReconcileCommands::Show { id } => cli::reconcile::show(id),
            ReconcileCommands::List { account } => cli::reconcile::list(&account),
        },
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                field,
                match_type,
                case_sensitive,
                vendor,
                priority,
            } => cli::rules::add(cli::rules::AddArgs {
                pattern,
                category,
                field,
                match_type,
                case_sensitive,
                vendor,
                priority,
            }),
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Update {
                id,
                pattern,
                category,
                field,
                match_type,
                case_sensitive,
                priority,
            } => cli::rules::update(cli::rules::UpdateArgs {
                id,
                pattern,
                category,
                field,
                match_type,
                case_sensitive,
                priority,
            }),
            RulesCommands::Delete { id } => cli::rules::delete(id),
        },
        Commands::Categorize => cli::categorize::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
