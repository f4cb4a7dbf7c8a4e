//! Access engine benchmarks
//!
//! Permission resolution with and without the cache, layer merging, and
//! approval chain selection.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cretoai_access::audit::{AuditRecorder, InMemoryAuditSink};
use cretoai_access::permissions::merge_layers;
use cretoai_access::workflow::{ChainPolicy, ChainPolicyConfig, LedgerService, TieredChainPolicy, TransferResult};
use cretoai_access::{
    AccessConfig, AccessEngine, Collaborators, Department, DirectoryStore, InMemoryDirectory, Member,
    PermissionKey, PermissionResolver, PermissionSet, Result, Role, SystemClock,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

const TEAM: &str = "bench-team";

struct NullLedger;

#[async_trait]
impl LedgerService for NullLedger {
    async fn transfer(&self, _from: &str, _to: &str, _amount: u64, idempotency_key: &str) -> Result<TransferResult> {
        Ok(TransferResult {
            transfer_id: idempotency_key.to_string(),
        })
    }
}

fn permissions(keys: &[PermissionKey]) -> PermissionSet {
    let mut set = PermissionSet::new();
    for key in keys {
        set.insert(*key, true).unwrap();
    }
    set
}

async fn seeded_directory(members: usize) -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .put_role(Role::new("member", TEAM, "Member").with_permissions(permissions(&[PermissionKey::CanRequestTokens])))
        .await
        .unwrap();
    directory
        .put_role(Role::new("approver", TEAM, "Approver").with_permissions(permissions(&[PermissionKey::CanApproveTokens])))
        .await
        .unwrap();
    directory
        .put_department(
            Department::new("finance", TEAM, "Finance").with_overrides(permissions(&[PermissionKey::CanViewAuditLog])),
        )
        .await
        .unwrap();

    for i in 0..members {
        let member = Member::new(TEAM, format!("user-{}", i), "member")
            .with_custom_role("approver")
            .with_department("finance");
        directory.put_member(member).await.unwrap();
    }
    directory
}

// ============================================================================
// RESOLUTION BENCHMARKS
// ============================================================================

fn bench_resolve_uncached(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let resolver = rt.block_on(async {
        let directory = seeded_directory(100).await;
        let audit = Arc::new(AuditRecorder::new(
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(SystemClock),
        ));
        PermissionResolver::new(directory.clone(), directory.clone(), directory, audit)
    });

    c.bench_function("resolve_uncached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(resolver.resolve("user-42", TEAM).await.unwrap()) });
    });
}

fn bench_resolve_cached(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let engine = rt.block_on(async {
        let directory = seeded_directory(100).await;
        let engine = AccessEngine::new(
            AccessConfig::default(),
            Collaborators::new(directory, Arc::new(NullLedger)),
        )
        .unwrap();
        // warm the cache
        engine.resolve_permissions("user-42", TEAM).await.unwrap();
        engine
    });

    c.bench_function("resolve_cached", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(engine.resolve_permissions("user-42", TEAM).await.unwrap()) });
    });
}

fn bench_merge_layers(c: &mut Criterion) {
    let role = permissions(&[PermissionKey::CanRequestTokens, PermissionKey::CanApproveTokens]);
    let department = permissions(&[PermissionKey::CanViewAuditLog]);
    let custom = permissions(&[PermissionKey::CanManageTokenRequests]);
    let mut member = PermissionSet::new();
    member.insert(PermissionKey::CanApproveTokens, false).unwrap();
    member.insert(PermissionKey::MaxRequestAmount, 5_000u64).unwrap();

    c.bench_function("merge_layers", |b| {
        b.iter(|| black_box(merge_layers(&role, Some(&department), Some(&custom), &member)))
    });
}

// ============================================================================
// WORKFLOW BENCHMARKS
// ============================================================================

fn bench_chain_selection(c: &mut Criterion) {
    let policy = TieredChainPolicy::new(ChainPolicyConfig::default()).unwrap();
    let mut group = c.benchmark_group("chain_selection");

    for amount in [500u64, 5_000, 500_000] {
        group.bench_with_input(BenchmarkId::from_parameter(amount), &amount, |b, &amount| {
            b.iter(|| black_box(policy.chain(amount, "compute")))
        });
    }

    group.finish();
}

fn bench_auto_approved_request(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let engine = rt.block_on(async {
        let directory = seeded_directory(10).await;
        AccessEngine::new(
            AccessConfig::default(),
            Collaborators::new(directory, Arc::new(NullLedger)),
        )
        .unwrap()
    });

    c.bench_function("create_auto_approved_request", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                engine
                    .create_token_request(TEAM, "user-1", 10, "bench", "misc")
                    .await
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_resolve_uncached,
    bench_resolve_cached,
    bench_merge_layers,
    bench_chain_selection,
    bench_auto_approved_request
);
criterion_main!(benches);
