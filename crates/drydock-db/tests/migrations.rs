use drydock_db::{apply_migrations, LocalDatabase, LocalSettings, MigrationApplyError, SqlBackend, SqlValue};
use std::path::Path;

fn write_journal(dir: &Path, entries: &[(&str, i64)]) {
    std::fs::create_dir_all(dir.join("meta")).expect("create meta dir");
    let entries: Vec<serde_json::Value> = entries
        .iter()
        .enumerate()
        .map(|(idx, (tag, when))| {
            serde_json::json!({
                "idx": idx,
                "version": "5",
                "when": when,
                "tag": tag,
                "breakpoints": true
            })
        })
        .collect();
    let journal = serde_json::json!({"version": "5", "dialect": "sqlite", "entries": entries});
    std::fs::write(
        dir.join("meta").join("_journal.json"),
        serde_json::to_string_pretty(&journal).unwrap(),
    )
    .expect("write journal");
}

fn open_db(dir: &Path) -> LocalDatabase {
    LocalDatabase::open(&dir.join("data").join("db.sqlite"), LocalSettings::default())
        .expect("open local database")
}

async fn table_exists(db: &LocalDatabase, name: &str) -> bool {
    let result = db
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[SqlValue::from(name)],
        )
        .await
        .expect("query sqlite_master");
    result.first_value() == Some(&SqlValue::Integer(1))
}

#[tokio::test]
async fn applies_journal_in_order_and_is_idempotent() {
    let root = tempfile::tempdir().expect("tempdir");
    let migrations = root.path().join("migrations");
    std::fs::create_dir_all(&migrations).unwrap();
    std::fs::write(
        migrations.join("0000_init.sql"),
        "CREATE TABLE `users` (\n\t`id` integer PRIMARY KEY NOT NULL,\n\t`name` text\n);\n--> statement-breakpoint\nCREATE UNIQUE INDEX `users_name_unique` ON `users` (`name`);",
    )
    .unwrap();
    write_journal(&migrations, &[("0000_init", 1_700_000_000_000)]);

    let db = open_db(root.path());
    let applied = apply_migrations(&db, &migrations).await.expect("first apply");
    assert_eq!(applied, 1);
    assert!(table_exists(&db, "users").await);

    let again = apply_migrations(&db, &migrations).await.expect("second apply");
    assert_eq!(again, 0, "nothing new to apply");

    // A later generation appends to the journal.
    std::fs::write(
        migrations.join("0001_posts.sql"),
        "CREATE TABLE `posts` (`id` integer PRIMARY KEY NOT NULL, `user_id` integer REFERENCES users(id));",
    )
    .unwrap();
    write_journal(
        &migrations,
        &[("0000_init", 1_700_000_000_000), ("0001_posts", 1_700_000_100_000)],
    );

    let applied = apply_migrations(&db, &migrations).await.expect("third apply");
    assert_eq!(applied, 1);
    assert!(table_exists(&db, "posts").await);

    let tracked = db
        .query(
            "SELECT hash, created_at FROM \"__drizzle_migrations\" ORDER BY created_at",
            &[],
        )
        .await
        .expect("query tracking table");
    assert_eq!(tracked.rows.len(), 2);
    assert_eq!(tracked.rows[1][1].as_i64(), Some(1_700_000_100_000));
    assert_eq!(tracked.rows[0][0].as_str().map(str::len), Some(64));
}

#[tokio::test]
async fn missing_migrations_directory_applies_nothing() {
    let root = tempfile::tempdir().expect("tempdir");
    let db = open_db(root.path());
    let applied = apply_migrations(&db, &root.path().join("does-not-exist"))
        .await
        .expect("apply");
    assert_eq!(applied, 0);
}

#[tokio::test]
async fn failing_migration_rolls_back_the_whole_batch() {
    let root = tempfile::tempdir().expect("tempdir");
    let migrations = root.path().join("migrations");
    std::fs::create_dir_all(&migrations).unwrap();
    std::fs::write(
        migrations.join("0000_ok.sql"),
        "CREATE TABLE `kept` (`id` integer PRIMARY KEY);",
    )
    .unwrap();
    std::fs::write(
        migrations.join("0001_broken.sql"),
        "CREATE TABLE `half` (`id` integer PRIMARY KEY);\n--> statement-breakpoint\nTHIS IS NOT SQL;",
    )
    .unwrap();
    write_journal(&migrations, &[("0000_ok", 10), ("0001_broken", 20)]);

    let db = open_db(root.path());
    let err = apply_migrations(&db, &migrations)
        .await
        .expect_err("broken migration should fail");
    match err {
        MigrationApplyError::ExecutionFailed { tags, .. } => {
            assert_eq!(tags, vec!["0000_ok", "0001_broken"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(!table_exists(&db, "kept").await, "earlier migration in the batch rolls back too");
    assert!(!table_exists(&db, "half").await, "failed migration must roll back");
    let tracked = db
        .query("SELECT COUNT(*) FROM \"__drizzle_migrations\"", &[])
        .await
        .expect("query tracking table");
    assert_eq!(tracked.first_value(), Some(&SqlValue::Integer(0)));

    // Once fixed, the whole batch applies together.
    std::fs::write(
        migrations.join("0001_broken.sql"),
        "CREATE TABLE `half` (`id` integer PRIMARY KEY);",
    )
    .unwrap();
    let applied = apply_migrations(&db, &migrations).await.expect("apply fixed batch");
    assert_eq!(applied, 2);
    assert!(table_exists(&db, "kept").await);
    assert!(table_exists(&db, "half").await);
}
