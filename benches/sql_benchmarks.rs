//! Benchmark suite for dbkit's compile and codec paths.
//!
//! Benchmarks cover:
//! - predicate compilation per SQL dialect
//! - full statement rendering (builder → SQL text + binds)
//! - document filter and `$expr` compilation
//! - PostgreSQL binary value encoding
//!
//! Run with: `cargo bench`

use std::str::FromStr;

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dbkit::ast::{
    compile_expression, compile_filter, compile_sql, compile_sql_with_key, key, primary_key, Dialect,
    DocumentPredicate, JoinKind, PrimaryKey, RegexOptions, SortDirection, SqlPredicate, Statement,
    MYSQL, POSTGRES, SQLITE,
};
use dbkit::value::postgres::{encode, param_type};
use dbkit::Value;
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Predicate inputs organized by complexity
// ---------------------------------------------------------------------------

fn simple_predicate() -> SqlPredicate {
    key("status").eq("active")
}

fn conjunction() -> SqlPredicate {
    key("age")
        .gt(18)
        .and(key("status").eq("active"))
        .and(key("deleted_at").is_null())
}

fn nested_predicate() -> SqlPredicate {
    let region = key("region").is_in(["eu", "us", "apac"]).unwrap();
    let window = key("created_at").between_exclusive("2024-01-01", "2025-01-01");
    let either = key("score").ge(90).or(key("name").like("A%"));
    !(region.and(window).and(either)).or(key("owner_id").eq(key("author_id")))
}

fn wide_in_list() -> SqlPredicate {
    key("id").is_in(0..500i64).unwrap()
}

fn document_predicate() -> DocumentPredicate {
    key("age")
        .ge(21)
        .and(key("tags").contains_element("rust"))
        .and(key("name").starts_with("Al", RegexOptions::case_insensitive()))
        .and(!key("score").between(10, 20))
}

fn dialects() -> [(&'static str, &'static Dialect); 3] {
    [("postgres", &POSTGRES), ("mysql", &MYSQL), ("sqlite", &SQLITE)]
}

fn bench_predicate_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("predicate_compilation");

    let cases = [
        ("simple", simple_predicate()),
        ("conjunction", conjunction()),
        ("nested", nested_predicate()),
        ("wide_in_list", wide_in_list()),
    ];

    for (dialect_name, dialect) in dialects() {
        for (name, predicate) in &cases {
            group.bench_with_input(
                BenchmarkId::new(dialect_name, name),
                predicate,
                |b, predicate| {
                    b.iter(|| compile_sql(black_box(predicate), dialect).unwrap());
                },
            );
        }
    }

    let composite = PrimaryKey::composite(["tenant_id", "id"]).unwrap();
    let by_key = primary_key().eq(Value::Array(vec![Value::Int64(7), Value::Int64(42)]));
    group.bench_function("composite_primary_key", |b| {
        b.iter(|| compile_sql_with_key(black_box(&by_key), &POSTGRES, &composite).unwrap());
    });

    group.finish();
}

fn bench_statement_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("statement_render");

    for (dialect_name, dialect) in dialects() {
        group.bench_function(BenchmarkId::new("select_join", dialect_name), |b| {
            b.iter(|| {
                Statement::new(dialect)
                    .select(&["u.name", "o.total"])
                    .from("users")
                    .join(JoinKind::Inner, "orders", &key("users.id").eq(key("orders.user_id")))
                    .where_(black_box(&conjunction()))
                    .order_by("o.total", SortDirection::Desc)
                    .limit(50)
                    .render()
                    .unwrap()
            });
        });

        group.bench_function(BenchmarkId::new("update", dialect_name), |b| {
            b.iter(|| {
                Statement::new(dialect)
                    .update("accounts")
                    .set("balance", Decimal::from_str("10.25").unwrap())
                    .set("note", "adjusted")
                    .where_(&key("id").eq(black_box(42)))
                    .render()
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_document_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_compilation");

    let predicate = document_predicate();
    group.bench_function("filter", |b| {
        b.iter(|| compile_filter(black_box(&predicate)).unwrap());
    });
    group.bench_function("expression", |b| {
        b.iter(|| compile_expression(black_box(&predicate)).unwrap());
    });

    group.finish();
}

fn bench_postgres_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("postgres_encoding");

    let cases = [
        ("int", Value::Int64(1_234_567)),
        ("text", Value::from("the quick brown fox")),
        ("decimal", Value::Decimal(Decimal::from_str("-12345.678901").unwrap())),
        (
            "array",
            Value::Array((0..64).map(Value::Int64).collect()),
        ),
    ];

    for (name, value) in &cases {
        let ty = param_type(value);
        group.bench_with_input(BenchmarkId::new("encode", name), value, |b, value| {
            let mut buf = BytesMut::with_capacity(1024);
            b.iter(|| {
                buf.clear();
                encode(black_box(value), &ty, &mut buf).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_predicate_compilation,
    bench_statement_render,
    bench_document_compilation,
    bench_postgres_encoding,
);
criterion_main!(benches);
