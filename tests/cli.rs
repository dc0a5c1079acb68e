use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `HOME` and data dir of its own per test, so settings never leak.
fn iolta(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("iolta").unwrap();
    cmd.env("HOME", home.path())
        .env("IOLTA_DATA_DIR", home.path().join("books"))
        .env_remove("RUST_LOG");
    cmd
}

fn initialized() -> TempDir {
    let home = tempfile::tempdir().unwrap();
    iolta(&home)
        .args(["init", "--firm", "Smith & Jones"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized iolta at"));
    home
}

fn run(home: &TempDir, args: &[&str]) {
    iolta(home).args(args).assert().success();
}

#[test]
fn test_commands_before_init_fail() {
    let home = tempfile::tempdir().unwrap();
    iolta(&home)
        .args(["accounts", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Run `iolta init` first"));
}

#[test]
fn test_status_shows_firm() {
    let home = initialized();
    iolta(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Smith & Jones"));
}

#[test]
fn test_accounts_add_and_list() {
    let home = initialized();
    run(&home, &["accounts", "add", "Operating", "--type", "checking"]);
    iolta(&home)
        .args(["accounts", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Operating").and(predicate::str::contains("checking")));
}

#[test]
fn test_duplicate_account_is_rejected() {
    let home = initialized();
    run(&home, &["accounts", "add", "Operating", "--type", "checking"]);
    iolta(&home)
        .args(["accounts", "add", "Operating", "--type", "asset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate name: Operating"));
}

#[test]
fn test_unknown_account_type_is_rejected() {
    let home = initialized();
    iolta(&home)
        .args(["accounts", "add", "Mattress", "--type", "piggy_bank"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("piggy_bank"));
}

#[test]
fn test_expense_moves_both_balances() {
    let home = initialized();
    run(&home, &["accounts", "add", "Bank", "--type", "checking"]);
    run(&home, &["accounts", "add", "Office", "--type", "expense"]);
    run(
        &home,
        &["journal", "expense", "100.00", "--expense", "Office", "--from", "Bank", "--description", "Paper"],
    );

    iolta(&home)
        .args(["balance", "Bank"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Balance:  -$100.00"));
    iolta(&home)
        .args(["balance", "Office"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Balance:  $100.00"));
    iolta(&home)
        .arg("trial-balance")
        .assert()
        .success()
        .stdout(predicate::str::contains("Balanced"));
    iolta(&home)
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("All journals balance."));
}

#[test]
fn test_unbalanced_post_reports_totals() {
    let home = initialized();
    run(&home, &["accounts", "add", "Bank", "--type", "asset"]);
    run(&home, &["accounts", "add", "Fees", "--type", "income"]);
    iolta(&home)
        .args([
            "journal", "post", "--description", "Retainer", "--debit", "Bank=100.00", "--credit", "Fees=99.99",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Debit: 100.00, Credit: 99.99"));
    iolta(&home)
        .args(["journal", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Retainer").not());
}

#[test]
fn test_reconcile_flow() {
    let home = initialized();
    run(&home, &["accounts", "add", "Trust", "--type", "trust"]);
    run(&home, &["txn", "add", "Trust", "600.00", "Retainer deposit", "--date", "2025-01-05"]);
    run(&home, &["txn", "add", "Trust", "-100.00", "Court filing fee", "--date", "2025-01-10"]);

    iolta(&home)
        .args(["reconcile", "start", "Trust", "--date", "2025-01-31", "--balance", "500.00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reconciliation 1"));

    iolta(&home)
        .args(["reconcile", "start", "Trust", "--date", "2025-01-31", "--balance", "500.00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already has a reconciliation in progress"));

    run(&home, &["reconcile", "save", "1", "--clear", "1,2"]);
    iolta(&home)
        .args(["reconcile", "complete", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    iolta(&home)
        .args(["reconcile", "delete", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is completed and cannot be changed"));
    iolta(&home)
        .args(["txn", "void", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("locked"));
}

#[test]
fn test_reconcile_mismatch_reports_difference() {
    let home = initialized();
    run(&home, &["accounts", "add", "Trust", "--type", "trust"]);
    run(&home, &["txn", "add", "Trust", "600.00", "Deposit"]);
    run(&home, &["txn", "add", "Trust", "-90.00", "Check 101"]);
    run(&home, &["reconcile", "start", "Trust", "--date", "2025-01-31", "--balance", "500.00"]);
    iolta(&home)
        .args(["reconcile", "complete", "1", "--clear", "1,2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Difference is $-10.00"));
}

#[test]
fn test_split_updates_client_balances() {
    let home = initialized();
    run(&home, &["accounts", "add", "Trust", "--type", "trust"]);
    run(&home, &["clients", "add", "Acme"]);
    run(&home, &["clients", "add", "Globex"]);
    run(
        &home,
        &[
            "split", "create", "Trust", "150.00", "Combined retainer", "--line", "client:Acme=100.00", "--line",
            "client:Globex=50.00",
        ],
    );
    iolta(&home)
        .args(["clients", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("$100.00").and(predicate::str::contains("$50.00")));

    run(&home, &["split", "delete", "1"]);
    iolta(&home)
        .args(["clients", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("$100.00").not());
}

#[test]
fn test_split_mismatch_is_rejected() {
    let home = initialized();
    run(&home, &["accounts", "add", "Trust", "--type", "trust"]);
    run(&home, &["clients", "add", "Acme"]);
    run(&home, &["clients", "add", "Globex"]);
    iolta(&home)
        .args([
            "split", "create", "Trust", "150.00", "Short", "--line", "client:Acme=100.00", "--line",
            "client:Globex=40.00",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("difference 10.00"));
}

#[test]
fn test_rule_categorizes_new_transactions() {
    let home = initialized();
    run(&home, &["accounts", "add", "Operating", "--type", "checking"]);
    run(&home, &["rules", "add", "ADOBE", "--category", "Software & Subscriptions", "--vendor", "Adobe"]);
    iolta(&home)
        .args(["txn", "add", "Operating", "-54.99", "ADOBE *CREATIVE CLOUD"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Software & Subscriptions"));
    iolta(&home)
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ADOBE"));
}

#[test]
fn test_bad_regex_rule_is_rejected() {
    let home = initialized();
    iolta(&home)
        .args(["rules", "add", "([unclosed", "--category", "Uncategorized", "--match-type", "regex"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid rule pattern"));
}
