use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::collections::BTreeMap;
use std::time::Duration;

use stockroom_core::{OrderId, ProductId};
use stockroom_infra::{InventoryService, RetryPolicy, ServiceSettings};
use stockroom_inventory::StockItem;
use stockroom_products::{Money, NewProduct};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn service() -> InventoryService {
    let settings = ServiceSettings {
        reservation_hold: None,
        ledger_retry: RetryPolicy::no_retry(),
        reserve_timeout: None,
    };
    InventoryService::in_memory(settings, Duration::from_secs(3600))
}

fn seed(rt: &Runtime, service: &InventoryService, products: usize, stock: i64) -> Vec<ProductId> {
    rt.block_on(async {
        let mut ids = Vec::with_capacity(products);
        for i in 0..products {
            let product = service
                .create_product(NewProduct {
                    name: format!("Bench {i}"),
                    description: String::new(),
                    sku: format!("BENCH-{i}"),
                    price: Money::new("USD", 100),
                    stock_quantity: stock,
                    category: "bench".to_string(),
                    attributes: BTreeMap::new(),
                })
                .await
                .unwrap();
            ids.push(product.id);
        }
        ids
    })
}

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_release_cycle");

    for item_count in [1usize, 5, 20] {
        group.throughput(Throughput::Elements(item_count as u64));
        group.bench_with_input(
            BenchmarkId::new("items", item_count),
            &item_count,
            |b, &n| {
                let rt = runtime();
                let service = service();
                let ids = seed(&rt, &service, n, i64::MAX / 2);
                let items: Vec<StockItem> =
                    ids.iter().map(|id| StockItem::new(id.clone(), 1)).collect();
                let mut seq = 0u64;

                b.iter(|| {
                    seq += 1;
                    let order = OrderId::parse(format!("bench-{seq}")).unwrap();
                    rt.block_on(async {
                        let outcome = service
                            .reserve_stock(order.clone(), black_box(items.clone()))
                            .await
                            .unwrap();
                        assert!(outcome.is_success());
                        black_box(service.release_stock(order, vec![]).await.unwrap());
                    });
                });
            },
        );
    }

    group.finish();
}

fn bench_idempotent_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("idempotent_replay");

    group.bench_function("replay_committed_order", |b| {
        let rt = runtime();
        let service = service();
        let ids = seed(&rt, &service, 3, 1_000);
        let items: Vec<StockItem> = ids.iter().map(|id| StockItem::new(id.clone(), 2)).collect();
        let order = OrderId::parse("bench-replay").unwrap();
        rt.block_on(service.reserve_stock(order.clone(), items.clone()))
            .unwrap();

        b.iter(|| {
            black_box(
                rt.block_on(service.reserve_stock(order.clone(), items.clone()))
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_cached_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("product_reads");
    let rt = runtime();
    let service = service();
    let ids = seed(&rt, &service, 100, 10);

    group.bench_function("get_product_cache_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % ids.len();
            black_box(rt.block_on(service.get_product(&ids[i])).unwrap());
        });
    });

    group.bench_function("get_product_after_invalidation", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % ids.len();
            rt.block_on(async {
                service.cache().invalidate(&ids[i]).await;
                black_box(service.get_product(&ids[i]).await.unwrap());
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_release_cycle,
    bench_idempotent_replay,
    bench_cached_reads
);
criterion_main!(benches);
