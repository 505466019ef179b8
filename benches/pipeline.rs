//! Benchmarks for the migration pipeline stages.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kiln::migrate::{
    HistoryMigrator, InMemoryHistoryRepository, MigrationCompiler, MigrationsCodeGenerator,
    MigrationsScaffolder, ModelDiffer, RecordingExecutor, RelationalModelDiffer,
    RustMigrationsGenerator, StaticMigrationsAssembly, StaticModelOwner,
};
use kiln::model::{Model, ModelBuilder, RelationalModel};

/// A model with `tables` entities of a handful of columns each.
fn model(tables: usize, with_note: bool) -> Model {
    let mut model_builder = ModelBuilder::new();
    for i in 0..tables {
        model_builder.entity(&format!("Entity{}", i), |b| {
            b.property::<i32>("Id");
            b.property::<String>("Name");
            b.property::<Option<String>>("Description");
            b.property::<i64>("Version");
            if with_note {
                b.property::<Option<String>>("Note");
            }
            b.has_key(&["Id"]);
            b.has_index(&["Name"]);
        });
    }
    model_builder.build()
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("relational_projection");

    for tables in [1, 10, 50] {
        let model = model(tables, true);
        group.bench_with_input(BenchmarkId::from_parameter(tables), &model, |b, model| {
            b.iter(|| black_box(RelationalModel::from_model(model)))
        });
    }

    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_diff");
    let differ = RelationalModelDiffer::new();

    for tables in [1, 10, 50] {
        let Ok(source) = RelationalModel::from_model(&model(tables, false)) else {
            continue;
        };
        let Ok(target) = RelationalModel::from_model(&model(tables, true)) else {
            continue;
        };

        group.bench_with_input(BenchmarkId::new("initial_create", tables), &target, |b, target| {
            b.iter(|| black_box(differ.get_differences(None, Some(target))))
        });
        group.bench_with_input(BenchmarkId::new("add_columns", tables), &tables, |b, _| {
            b.iter(|| black_box(differ.get_differences(Some(&source), Some(&target))))
        });
    }

    group.finish();
}

fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit");
    let generator = RustMigrationsGenerator::new();
    let differ = RelationalModelDiffer::new();

    for tables in [1, 10] {
        let model = model(tables, true);
        let Ok(target) = RelationalModel::from_model(&model) else {
            continue;
        };
        let up = differ.get_differences(None, Some(&target));

        group.bench_with_input(BenchmarkId::new("migration", tables), &up, |b, up| {
            b.iter(|| black_box(generator.generate_migration("bench::migrations", "InitialCreate", up, &[])))
        });
        group.bench_with_input(BenchmarkId::new("snapshot", tables), &model, |b, model| {
            b.iter(|| {
                black_box(generator.generate_snapshot(
                    "bench::migrations",
                    "bench::BenchContext",
                    "BenchContextModelSnapshot",
                    model,
                ))
            })
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.sample_size(20);

    for tables in [1, 10] {
        let owner = Arc::new(StaticModelOwner::new("BenchContext", "bench", model(tables, true)));
        let history = Arc::new(InMemoryHistoryRepository::default());
        let migrator = Arc::new(HistoryMigrator::new(history.clone(), Arc::new(RecordingExecutor::new())));
        let scaffolder = MigrationsScaffolder::new(owner, history, migrator);
        let Ok(scaffolded) = scaffolder.scaffold_migration(
            &StaticMigrationsAssembly::empty(),
            "InitialCreate",
            None,
            None,
            None,
            true,
        ) else {
            continue;
        };
        let compiler = MigrationCompiler::new();

        group.bench_with_input(BenchmarkId::from_parameter(tables), &scaffolded, |b, scaffolded| {
            b.iter(|| black_box(compiler.compile_migration(scaffolded, scaffolder.owner().as_ref(), &[])))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_projection, bench_diff, bench_emit, bench_compile);
criterion_main!(benches);
