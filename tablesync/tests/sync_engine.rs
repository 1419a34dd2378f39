use tablesync::database::memory::{MemorySourceDatabase, MemoryTargetDatabase};
use tablesync::error::ErrorKind;
use tablesync::schema::{ColumnDescriptor, TableName};
use tablesync::sql::TargetColumn;
use tablesync::test_utils::fixtures::{
    memory_engine, user_row, users_columns, users_rows, users_source, users_spec, users_table,
};
use tablesync::types::{Cell, TableRow};
use tablesync_config::shared::TableSyncSpec;
use tablesync_telemetry::init_test_tracing;

fn target_users() -> TableName {
    TableName::new("public", "users")
}

fn text_column(name: &str, nullable: bool) -> TargetColumn {
    TargetColumn {
        name: name.to_string(),
        data_type: "TEXT".to_string(),
        nullable,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn filtered_projection_is_created_and_loaded() {
    init_test_tracing();
    let target = MemoryTargetDatabase::new();
    let engine = memory_engine(users_source().await, target.clone(), true);
    let spec = TableSyncSpec {
        fields: Some(vec![
            "userid".to_string(),
            "Username".to_string(),
            "EMAIL".to_string(),
        ]),
        filter: Some("IsActive = 1".to_string()),
        ..users_spec("public.users")
    };

    let report = engine.run(&spec).await.unwrap();

    assert_eq!(report.rows_synced, 3);
    assert!(report.target_created);

    let columns = target.table_columns(&target_users()).await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["UserID", "Username", "Email"]);
    let types: Vec<&str> = columns.iter().map(|c| c.data_type.as_str()).collect();
    assert_eq!(types, vec!["INTEGER", "VARCHAR(50)", "VARCHAR(255)"]);

    let rows = target.table_rows(&target_users()).await.unwrap();
    assert_eq!(
        rows,
        vec![
            TableRow::new(vec![
                Cell::I32(1),
                Cell::from("ann"),
                Cell::from("ann@example.com")
            ]),
            TableRow::new(vec![Cell::I32(3), Cell::from("cid"), Cell::Null]),
            TableRow::new(vec![
                Cell::I32(4),
                Cell::from("dan"),
                Cell::from("dan@example.com")
            ]),
        ]
    );

    let statements = engine.source().fetched_statements().await;
    assert_eq!(
        statements[0].sql,
        r#"SELECT "UserID", "Username", "Email" FROM "dbo"."Users" WHERE IsActive = 1"#
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_runs_leave_the_same_content() {
    init_test_tracing();
    let target = MemoryTargetDatabase::new();
    let engine = memory_engine(users_source().await, target.clone(), true);
    let spec = users_spec("public.users");

    engine.run(&spec).await.unwrap();
    let first = target.table_rows(&target_users()).await.unwrap();
    let report = engine.run(&spec).await.unwrap();
    let second = target.table_rows(&target_users()).await.unwrap();

    assert_eq!(report.rows_synced, 5);
    assert!(!report.target_created);
    assert_eq!(first, second);
    assert_eq!(first, users_rows());
    assert_eq!(target.load_count(&target_users()).await, 2);
    assert_eq!(target.created_tables().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_load_keeps_the_previous_content() {
    init_test_tracing();
    let target = MemoryTargetDatabase::new();
    let engine = memory_engine(users_source().await, target.clone(), true);
    let spec = users_spec("public.users");

    engine.run(&spec).await.unwrap();
    let before = target.table_rows(&target_users()).await.unwrap();

    engine
        .source()
        .set_rows(&users_table(), vec![user_row(9, "zed", None, true); 4])
        .await;
    target.fail_insert_at(target_users(), 2).await;

    let err = engine.run(&spec).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LoadError);
    assert!(
        err.detail()
            .unwrap()
            .starts_with("load failed for table dbo.Users -> public.users: ")
    );
    assert_eq!(target.table_rows(&target_users()).await.unwrap(), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_source_leaves_the_target_untouched() {
    init_test_tracing();
    let source = MemorySourceDatabase::new();
    source.add_table(users_table(), users_columns(), vec![]).await;
    let target = MemoryTargetDatabase::new();
    let existing = vec![TableRow::new(vec![Cell::from("stale")])];
    target
        .add_table(target_users(), vec![text_column("UserID", true)], existing.clone())
        .await;
    let engine = memory_engine(source, target.clone(), true);

    let report = engine.run(&users_spec("users")).await.unwrap();

    assert_eq!(report.rows_synced, 0);
    assert_eq!(target.table_rows(&target_users()).await.unwrap(), existing);
    assert_eq!(target.load_count(&target_users()).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_target_tables_are_not_recreated() {
    init_test_tracing();
    let target = MemoryTargetDatabase::new();
    let columns: Vec<TargetColumn> = users_columns()
        .iter()
        .map(|column| text_column(&column.name, true))
        .collect();
    target.add_table(target_users(), columns.clone(), vec![]).await;
    let engine = memory_engine(users_source().await, target.clone(), true);

    let report = engine.run(&users_spec("public.users")).await.unwrap();

    assert!(!report.target_created);
    assert!(target.created_tables().await.is_empty());
    // The existing definition is kept even though it differs from the source.
    assert_eq!(target.table_columns(&target_users()).await.unwrap(), columns);
    assert_eq!(target.table_rows(&target_users()).await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_failures_name_the_step_and_tables() {
    init_test_tracing();
    let source = users_source().await;
    source
        .fail_fetch(users_table(), "connection reset by peer")
        .await;
    let target = MemoryTargetDatabase::new();
    let engine = memory_engine(source, target.clone(), true);

    let err = engine.run(&users_spec("public.users")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FetchError);
    let detail = err.detail().unwrap();
    assert!(detail.starts_with("fetch failed for table dbo.Users -> public.users: "));
    assert!(detail.contains("connection reset by peer"));
    // The table was created before the fetch failed and stays empty.
    assert_eq!(target.table_rows(&target_users()).await.unwrap(), vec![]);
}

#[tokio::test(flavor = "multi_thread")]
async fn source_schema_is_mapped_into_the_created_table() {
    init_test_tracing();
    let source = MemorySourceDatabase::new();
    source
        .add_table(
            TableName::new("dbo", "Everything"),
            vec![
                ColumnDescriptor::new("Id", "uniqueidentifier").not_null(),
                ColumnDescriptor::new("Amount", "money"),
                ColumnDescriptor::new("Notes", "nvarchar").with_length(-1),
                ColumnDescriptor::new("Code", "nchar").with_length(3),
                ColumnDescriptor::new("Shape", "geography"),
            ],
            vec![],
        )
        .await;
    let target = MemoryTargetDatabase::new();
    let engine = memory_engine(source, target.clone(), true);

    engine
        .run(&TableSyncSpec::new("Everything", "everything"))
        .await
        .unwrap();

    let created = target.created_tables().await;
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].sql,
        r#"CREATE TABLE "public"."everything" ("Id" UUID NOT NULL, "Amount" NUMERIC(19,4), "Notes" TEXT, "Code" CHAR(3), "Shape" TEXT)"#
    );
}
