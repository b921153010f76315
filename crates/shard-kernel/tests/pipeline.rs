use shard_core::{
    AggregationType, ColumnMetadata, ColumnRef, DataType, MemoryQueryResult, OrderByItem,
    Projection, ShardError, StatementBuilder, StatementContext, Value,
};
use shard_executor::{ExecutorConfig, ScriptedConnectionProvider, ScriptedResponse, StatementId};
use shard_kernel::{collect_rows, HintContext, KernelConfig, ShardingKernel};
use shard_route::{AlgorithmConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig};
use std::sync::Arc;
use std::time::Duration;

/// `orders` split four ways on one data source by `user_id % 4`.
fn table_sharded() -> KernelConfig {
    let rule = ShardingRuleConfig::new()
        .with_algorithm(
            "orders_mod",
            AlgorithmConfig::new("MOD").with_prop("sharding-count", 4),
        )
        .with_table(
            TableRuleConfig::new("orders")
                .with_actual_data_nodes("ds_0.orders_${0..3}")
                .with_table_strategy(StrategyConfig::standard("user_id", "orders_mod")),
        );
    KernelConfig::new(["ds_0"]).with_rule(rule)
}

/// `orders` once per data source, databases split by `user_id % 2`.
fn database_sharded() -> KernelConfig {
    let rule = ShardingRuleConfig::new()
        .with_algorithm(
            "db_mod",
            AlgorithmConfig::new("MOD").with_prop("sharding-count", 2),
        )
        .with_table(
            TableRuleConfig::new("orders")
                .with_actual_data_nodes("ds_${0..1}.orders")
                .with_database_strategy(StrategyConfig::standard("user_id", "db_mod")),
        );
    KernelConfig::new(["ds_0", "ds_1"]).with_rule(rule)
}

fn kernel(config: &KernelConfig, provider: &ScriptedConnectionProvider) -> ShardingKernel {
    ShardingKernel::new(config, Arc::new(provider.clone())).unwrap()
}

fn id_rows(ids: impl IntoIterator<Item = i64>) -> ScriptedResponse {
    ScriptedResponse::Rows(MemoryQueryResult::new(
        vec![ColumnMetadata::new("id", DataType::Int64, false)],
        ids.into_iter().map(|id| vec![Value::Int64(id)]).collect(),
    ))
}

fn paginated_select(sql: &str) -> StatementContext {
    StatementBuilder::select(sql)
        .table("orders")
        .projections(vec![Projection::Shorthand { owner: None }])
        .order_by(OrderByItem::asc(ColumnRef::new("id")))
        .limit()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_batch_insert_is_split_per_table() {
    let provider = ScriptedConnectionProvider::new()
        .with_response("ds_0", "orders_1", ScriptedResponse::Affected(3))
        .with_response("ds_0", "orders_2", ScriptedResponse::Affected(1));
    let kernel = kernel(&table_sharded(), &provider);

    let sql = "INSERT INTO orders (user_id, amount) VALUES (?, ?), (?, ?), (?, ?), (?, ?)";
    let statement = StatementBuilder::insert(sql)
        .table("orders")
        .insert_values(&["user_id", "amount"])
        .build()
        .unwrap();
    let params: Vec<Value> = [1, 10, 2, 20, 5, 50, 9, 90]
        .into_iter()
        .map(Value::Int64)
        .collect();

    let result = kernel.execute(sql, &statement, &params).await.unwrap();
    assert_eq!(result.affected_rows(), Some(4));

    let mut executed = provider.executed();
    executed.sort_by(|a, b| a.sql.cmp(&b.sql));
    assert_eq!(executed.len(), 2);
    assert_eq!(
        executed[0].sql,
        "INSERT INTO orders_1 (user_id, amount) VALUES (?, ?), (?, ?), (?, ?)"
    );
    assert_eq!(
        executed[0].parameters,
        [1, 10, 5, 50, 9, 90].map(Value::Int64).to_vec()
    );
    assert_eq!(
        executed[1].sql,
        "INSERT INTO orders_2 (user_id, amount) VALUES (?, ?)"
    );
    assert_eq!(executed[1].parameters, [2, 20].map(Value::Int64).to_vec());
}

#[tokio::test]
async fn test_paginated_select_over_two_shards() {
    let provider = ScriptedConnectionProvider::new()
        .with_response("ds_0", "LIMIT 8 OFFSET 0", id_rows((1..=15).step_by(2)))
        .with_response("ds_1", "LIMIT 8 OFFSET 0", id_rows((2..=16).step_by(2)));
    let kernel = kernel(&database_sharded(), &provider);

    let sql = "SELECT * FROM orders ORDER BY id LIMIT 5 OFFSET 3";
    let statement = paginated_select(sql);
    let result = kernel.execute(sql, &statement, &[]).await.unwrap();
    let mut merged = result.into_merged().unwrap();
    let ids: Vec<i64> = collect_rows(merged.as_mut())
        .unwrap()
        .into_iter()
        .filter_map(|row| row[0].as_i64())
        .collect();
    assert_eq!(ids, vec![4, 5, 6, 7, 8]);

    let executed = provider.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed
        .iter()
        .all(|s| s.sql == "SELECT * FROM orders ORDER BY id LIMIT 8 OFFSET 0"));
}

#[tokio::test]
async fn test_grouped_average_across_shards() {
    let metadata = vec![
        ColumnMetadata::new("user_id", DataType::Int64, false),
        ColumnMetadata::new("AVG(amount)", DataType::Float64, true),
        ColumnMetadata::new("AVG_DERIVED_COUNT_0", DataType::Int64, false),
        ColumnMetadata::new("AVG_DERIVED_SUM_0", DataType::Int64, true),
    ];
    let row = |user: i64, count: i64, sum: i64| {
        vec![
            Value::Int64(user),
            Value::Float64(sum as f64 / count as f64),
            Value::Int64(count),
            Value::Int64(sum),
        ]
    };
    let provider = ScriptedConnectionProvider::new()
        .with_response(
            "ds_0",
            "AVG_DERIVED_SUM_0",
            ScriptedResponse::Rows(MemoryQueryResult::new(
                metadata.clone(),
                vec![row(1, 1, 10), row(3, 1, 30)],
            )),
        )
        .with_response(
            "ds_1",
            "AVG_DERIVED_SUM_0",
            ScriptedResponse::Rows(MemoryQueryResult::new(
                metadata,
                vec![row(1, 2, 80), row(2, 1, 20)],
            )),
        );
    let kernel = kernel(&database_sharded(), &provider);

    let sql = "SELECT user_id, AVG(amount) FROM orders GROUP BY user_id ORDER BY user_id";
    let statement = StatementBuilder::select(sql)
        .table("orders")
        .projections(vec![
            Projection::Column {
                column: ColumnRef::new("user_id"),
                alias: None,
            },
            Projection::Aggregation {
                kind: AggregationType::Avg,
                argument: "amount".to_string(),
                distinct: false,
                alias: None,
            },
        ])
        .group_by(OrderByItem::asc(ColumnRef::new("user_id")))
        .order_by(OrderByItem::asc(ColumnRef::new("user_id")))
        .build()
        .unwrap();

    let preview = kernel
        .preview(sql, &statement, &[], &HintContext::new())
        .unwrap();
    assert_eq!(
        preview[0].sql_unit.sql,
        "SELECT user_id, AVG(amount), COUNT(amount) AS AVG_DERIVED_COUNT_0, \
         SUM(amount) AS AVG_DERIVED_SUM_0 FROM orders GROUP BY user_id ORDER BY user_id"
    );

    let mut merged = kernel
        .execute(sql, &statement, &[])
        .await
        .unwrap()
        .into_merged()
        .unwrap();
    assert_eq!(merged.column_count(), 2);
    assert_eq!(
        collect_rows(merged.as_mut()).unwrap(),
        vec![
            vec![Value::Int64(1), Value::Float64(30.0)],
            vec![Value::Int64(2), Value::Float64(20.0)],
            vec![Value::Int64(3), Value::Float64(30.0)],
        ]
    );
}

#[tokio::test]
async fn test_unit_failure_names_the_data_source() {
    let provider = ScriptedConnectionProvider::new()
        .with_response("ds_0", "orders", id_rows([1]))
        .with_response("ds_1", "orders", ScriptedResponse::Fail("disk full".to_string()));
    let kernel = kernel(&database_sharded(), &provider);

    let sql = "SELECT * FROM orders ORDER BY id LIMIT 5 OFFSET 3";
    let statement = paginated_select(sql);
    let err = kernel.execute(sql, &statement, &[]).await.unwrap_err();
    match err {
        ShardError::ExecutionFailure(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].data_source, "ds_1");
            assert!(failures[0].message.contains("disk full"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(kernel.stats().failures, 1);
}

#[tokio::test]
async fn test_cancel_in_flight_statement() {
    let provider = ScriptedConnectionProvider::new()
        .with_response("ds_0", "orders", id_rows([1]))
        .with_response("ds_1", "orders", id_rows([2]))
        .with_delay(Duration::from_secs(5));
    let config = database_sharded().with_executor(ExecutorConfig::default().with_unit_timeout_ms(0));
    let kernel = kernel(&config, &provider);

    let sql = "SELECT * FROM orders ORDER BY id LIMIT 5 OFFSET 3";
    let statement = paginated_select(sql);
    let hint = HintContext::new();
    let id = StatementId::new();
    let (result, cancelled) = tokio::join!(
        kernel.execute_with(id, sql, &statement, &[], &hint),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            kernel.cancel(id)
        }
    );
    assert!(cancelled);
    assert!(matches!(result, Err(ShardError::Cancelled)));
    assert!(kernel.in_flight().is_empty());
    assert_eq!(kernel.stats().cancellations, 1);
}

#[tokio::test]
async fn test_reload_swaps_rule_for_later_statements() {
    let provider = ScriptedConnectionProvider::new()
        .with_response("ds_1", "customers", id_rows([7]));
    let kernel = kernel(&database_sharded(), &provider);
    let before = kernel.rules().current();

    let unknown = StatementBuilder::select("SELECT * FROM customers")
        .table("customers")
        .build()
        .unwrap();
    assert!(matches!(
        kernel.preview("SELECT * FROM customers", &unknown, &[], &HintContext::new()),
        Err(ShardError::UnknownTable(_))
    ));

    let mut config = database_sharded();
    config.rule = config.rule.with_default_data_source("ds_1");
    kernel.reload(&config).unwrap();

    let result = kernel
        .execute("SELECT * FROM customers", &unknown, &[])
        .await
        .unwrap();
    let mut merged = result.into_merged().unwrap();
    assert_eq!(
        collect_rows(merged.as_mut()).unwrap(),
        vec![vec![Value::Int64(7)]]
    );
    assert!(before.default_data_source().is_none());
    assert_eq!(kernel.rules().current().default_data_source(), Some("ds_1"));
}
