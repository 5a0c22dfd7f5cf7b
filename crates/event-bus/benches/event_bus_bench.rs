use criterion::{Criterion, criterion_group, criterion_main};
use event_bus::{BusConfig, LocalEventBus, WILDCARD, event_types};
use serde_json::json;

fn sale_data(id: u64) -> serde_json::Value {
    json!({
        "saleId": id,
        "customerId": "00000000-0000-0000-0000-000000000001",
        "totalCents": 12_500
    })
}

fn bench_emit_no_handlers(c: &mut Criterion) {
    let bus = LocalEventBus::for_service("bench");

    c.bench_function("event_bus/emit_no_handlers", |b| {
        b.iter(|| {
            bus.emit(event_types::SALE_CREATED, sale_data(1), None);
        });
    });
}

fn bench_emit_ten_handlers(c: &mut Criterion) {
    let bus = LocalEventBus::for_service("bench");
    for _ in 0..10 {
        bus.subscribe(event_types::SALE_CREATED, |_| Ok(()));
    }
    bus.subscribe(WILDCARD, |_| Ok(()));

    c.bench_function("event_bus/emit_ten_handlers", |b| {
        b.iter(|| {
            bus.emit(event_types::SALE_CREATED, sale_data(1), None);
        });
    });
}

fn bench_history_query(c: &mut Criterion) {
    let bus = LocalEventBus::new(BusConfig::new("bench").with_history_limit(1000));
    for i in 0..1000 {
        let event_type = if i % 2 == 0 {
            event_types::SALE_CREATED
        } else {
            event_types::PAYMENT_RECEIVED
        };
        bus.emit(event_type, sale_data(i), None);
    }

    c.bench_function("event_bus/history_filtered_100", |b| {
        b.iter(|| bus.history(Some(event_types::SALE_CREATED), 100));
    });
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let bus = LocalEventBus::for_service("bench");

    c.bench_function("event_bus/subscribe_unsubscribe", |b| {
        b.iter(|| {
            let subscription = bus.subscribe(event_types::SALE_CREATED, |_| Ok(()));
            subscription.unsubscribe();
        });
    });
}

criterion_group!(
    benches,
    bench_emit_no_handlers,
    bench_emit_ten_handlers,
    bench_history_query,
    bench_subscribe_unsubscribe
);
criterion_main!(benches);
