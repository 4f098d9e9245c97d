//! Benchmarks for the per-call cost of the SQL gate's string work.
//!
//! Every model-proposed statement is translated and validated before it
//! reaches the engine, so both run once per tool call.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use copilot_core::SqlDialect;
use copilot_sql::{translate, SqlValidator};

/// Representative statements, cycling through date-heavy and plain shapes.
fn generate_statement(index: usize) -> String {
    match index % 4 {
        0 => format!(
            "SELECT sku, SUM(units) AS units FROM retail_sales GROUP BY sku ORDER BY units DESC LIMIT {}",
            index % 50 + 1
        ),
        1 => "SELECT EXTRACT(YEAR FROM date) AS y, EXTRACT(MONTH FROM date) AS m, region, \
              SUM(net_sales) AS net_sales FROM retail_sales \
              WHERE date >= CURRENT_DATE - INTERVAL 90 DAY GROUP BY y, m, region ORDER BY y, m"
            .to_string(),
        2 => format!(
            "SELECT category, AVG(net_sales / units) AS price FROM retail_sales \
             WHERE store_name = 'Store {}' GROUP BY category",
            index
        ),
        _ => "SELECT * FROM retail_sales WHERE region = 'North'; DROP TABLE retail_sales".to_string(),
    }
}

fn bench_translate(c: &mut Criterion) {
    let statements: Vec<String> = (0..400).map(generate_statement).collect();

    let mut group = c.benchmark_group("sql_translate");
    group.measurement_time(Duration::from_secs(5));

    for dialect in [SqlDialect::ClickHouse, SqlDialect::DuckDb, SqlDialect::Sqlite] {
        group.bench_function(dialect.to_string(), |b| {
            let mut idx = 0usize;
            b.iter(|| {
                let out = translate(&statements[idx % statements.len()], dialect);
                idx += 1;
                out
            });
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let validator = SqlValidator::new("retail_sales");
    let statements: Vec<String> = (0..400)
        .map(generate_statement)
        .map(|s| translate(&s, SqlDialect::Sqlite))
        .collect();

    let mut group = c.benchmark_group("sql_validate");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("single_statement", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let decision = validator.validate(&statements[idx % statements.len()]);
            idx += 1;
            decision
        });
    });

    group.bench_function("batch_100", |b| {
        b.iter(|| {
            statements[..100]
                .iter()
                .map(|s| validator.validate(s))
                .collect::<Vec<_>>()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_translate, bench_validate);
criterion_main!(benches);
