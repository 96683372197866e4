// Ledger transfer benchmarks.
//
// Covers a single engine transfer on both store backends and the history
// read path at a few page sizes.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bank_ledger::config::MIN_HASH_COST;
use bank_ledger::{
    BcryptCredentials, LedgerStore, MemoryLedger, Requester, RequestContext, SledLedger,
    TransactionEngine,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Opens two accounts and funds the first through an ATM deposit.
async fn funded_pair<S: LedgerStore>(engine: &TransactionEngine<S>, cents: u64) -> (u64, u64) {
    let ctx = RequestContext::unbounded();
    engine.provision_atm(&ctx, "bench", "pw").await.expect("provision");
    let a = engine.open_account(&ctx, 1).await.expect("open");
    let b = engine.open_account(&ctx, 2).await.expect("open");
    engine
        .atm_user_supplement(&ctx, "bench", "pw", cents, a.id, Requester::User(1))
        .await
        .expect("fund");
    (a.id, b.id)
}

fn bench_transfer<S: LedgerStore>(c: &mut Criterion, name: &str, store: S) {
    let rt = runtime();
    let engine = TransactionEngine::new(Arc::new(store), BcryptCredentials)
        .with_hash_cost(MIN_HASH_COST);
    let (a, b) = rt.block_on(funded_pair(&engine, 1_000_000_000_000));
    let ctx = RequestContext::unbounded();

    c.bench_function(&format!("transfer/{name}"), |bench| {
        bench.iter(|| {
            rt.block_on(engine.make_transaction(&ctx, a, b, 1, Requester::User(1), "bench"))
                .expect("transfer")
        });
    });
}

fn bench_transfers(c: &mut Criterion) {
    bench_transfer(c, "memory", MemoryLedger::new());
    bench_transfer(c, "sled", SledLedger::open_temporary().expect("temp db"));
}

fn bench_history(c: &mut Criterion) {
    let rt = runtime();
    let engine = TransactionEngine::new(
        Arc::new(SledLedger::open_temporary().expect("temp db")),
        BcryptCredentials,
    )
    .with_hash_cost(MIN_HASH_COST);
    let (a, b) = rt.block_on(funded_pair(&engine, 1_000_000));
    let ctx = RequestContext::unbounded();
    rt.block_on(async {
        for _ in 0..1_000 {
            engine
                .make_transaction(&ctx, a, b, 1, Requester::User(1), "seed")
                .await
                .expect("seed transfer");
        }
    });

    let mut group = c.benchmark_group("history");
    for limit in [10usize, 50, 100] {
        group.throughput(Throughput::Elements(limit as u64));
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |bench, &limit| {
            bench.iter(|| {
                rt.block_on(engine.account_history(&ctx, a, Requester::User(1), limit, 0))
                    .expect("history")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transfers, bench_history);
criterion_main!(benches);
