use liquidator::config::Config;
use liquidator::db::init_db;
use liquidator::domain::{
    CarrierReport, Decimal, Idpos, Period, RechargeReport, StoreId, SubscriberId, TermReport,
};
use liquidator::engine::PreviewStatus;
use liquidator::orchestration::{
    Calculator, Ingestor, PeriodConsolidator, PreviewOrchestrator, SettlementCommitter,
    SettlementError, PROGRESS_DONE,
};
use liquidator::{MemoryStore, MockRecordFeed, Repository, TokioDispatcher};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Pipeline {
    repo: Arc<Repository>,
    calculator: Arc<Calculator>,
    consolidator: PeriodConsolidator,
    previews: PreviewOrchestrator,
    committer: SettlementCommitter,
    _temp: TempDir,
}

async fn setup_pipeline() -> Pipeline {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let config = Config::with_database_path(&db_path);
    let calculator = Arc::new(Calculator::new(repo.clone()));
    let previews = PreviewOrchestrator::new(
        calculator.clone(),
        repo.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(TokioDispatcher::new(4, Duration::from_secs(30))),
        &config,
    );

    Pipeline {
        consolidator: PeriodConsolidator::new(repo.clone()),
        committer: SettlementCommitter::new(calculator.clone(), repo.clone()),
        previews,
        calculator,
        repo,
        _temp: temp_dir,
    }
}

fn july() -> Period {
    "2025-07".parse().unwrap()
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn carrier(subscriber: i64, a: &str, b: &str, total_recharge: &str, cutoff: &str) -> CarrierReport {
    CarrierReport {
        subscriber_id: Some(SubscriberId::new(subscriber)),
        phone: None,
        iccid: None,
        period: july(),
        commission_split_a: dec(a),
        commission_split_b: dec(b),
        recharge_period_amount: Decimal::zero(),
        carrier_total_recharge: dec(total_recharge),
        activation_date: None,
        cutoff_date: None,
        commission_status: Some("PAID".to_string()),
        transaction_code: None,
        source_cutoff_label: cutoff.to_string(),
    }
}

fn term(subscriber: i64, idpos: &str, percent: &str) -> TermReport {
    TermReport {
        subscriber_id: SubscriberId::new(subscriber),
        idpos: Idpos::new(idpos.to_string()),
        sale_price: dec("120000"),
        residual_percentage: Some(dec(percent)),
        period: july(),
        created_at_ms: 1_752_000_000_000,
    }
}

fn recharge(subscriber: i64, amount: &str, reference: &str) -> RechargeReport {
    RechargeReport {
        subscriber_id: Some(SubscriberId::new(subscriber)),
        phone: None,
        iccid: None,
        amount: dec(amount),
        period_label: "2025-07".to_string(),
        reference: Some(reference.to_string()),
    }
}

async fn ingest(p: &Pipeline, feed: MockRecordFeed) {
    let ingestor = Ingestor::new(Arc::new(feed), p.repo.clone());
    ingestor.ingest_period(july()).await.unwrap();
}

/// Several subscribers spread over three stores, plus one whose store is unknown.
async fn seed_many(p: &Pipeline) -> Vec<StoreId> {
    let mut stores = Vec::new();
    for idpos in ["A", "B", "C"] {
        let store = p
            .repo
            .upsert_store(&Idpos::new(idpos.to_string()), &format!("Store {idpos}"))
            .await
            .unwrap();
        stores.push(store.id);
    }

    let mut feed = MockRecordFeed::new();
    for n in 1..=11i64 {
        let idpos = ["A", "B", "C", "GHOST"][(n % 4) as usize];
        feed = feed
            .with_carrier_record(carrier(n, "100", "25", &format!("{}", 1000 * n), "C1"))
            .with_carrier_record(carrier(n, "50", "5.5", "333.33", "C2"))
            .with_term(term(n, idpos, "7.5"));
        if n % 3 == 0 {
            feed = feed.with_recharge(recharge(n, "120.10", &format!("R{n}")));
        }
    }
    ingest(p, feed).await;
    p.consolidator.consolidate(july()).await.unwrap();
    stores
}

async fn preview_totals(p: &Pipeline, previews: &PreviewOrchestrator) -> BTreeMap<StoreId, Decimal> {
    let ticket = previews.start(july()).await.unwrap();
    let job_key = ticket.job_key.clone();
    ticket.wait().await;
    let listing = previews.result(&job_key).await.unwrap().expect("listing");
    assert_eq!(p.previews.progress(&job_key).await.unwrap(), Some(PROGRESS_DONE));
    listing
        .stores
        .into_iter()
        .map(|s| (s.store_id, s.total))
        .collect()
}

#[tokio::test]
async fn test_july_scenario_payout() {
    let p = setup_pipeline().await;
    let store = p
        .repo
        .upsert_store(&Idpos::new("STORE-1".to_string()), "Store One")
        .await
        .unwrap();

    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(10, "800", "200", "10000", "C1"))
            .with_carrier_record(carrier(10, "600", "150", "10000", "C2"))
            .with_recharge(recharge(10, "5000", "R1"))
            .with_term(term(10, "STORE-1", "10")),
    )
    .await;

    let report = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!(report.raw_count, 2);
    assert_eq!(report.consolidated_count, 1);

    let result = p.calculator.calculate("2025-07", None).await.unwrap();
    assert_eq!(result.line_count(), 1);
    let line = result.lines().next().unwrap();
    assert_eq!(line.commission_total, dec("1750"));
    assert_eq!(line.carrier_total_recharge, dec("20000"));
    assert_eq!(line.recharge_amount, dec("5000"));
    assert_eq!(line.base_real, dec("15000"));
    assert_eq!(line.residual_percent, dec("10"));
    assert_eq!(line.payout, dec("1500"));
    assert_eq!(line.store_id, store.id);
    assert_eq!(result.stores[&store.id].total, dec("1500"));
}

#[tokio::test]
async fn test_unresolved_store_lands_in_unassigned_bucket() {
    let p = setup_pipeline().await;
    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(20, "10", "0", "3000", "C1"))
            .with_term(term(20, "NOT-A-STORE", "10")),
    )
    .await;
    p.consolidator.consolidate(july()).await.unwrap();

    let result = p.calculator.calculate("2025-07", None).await.unwrap();
    let bucket = &result.stores[&StoreId::UNASSIGNED];
    assert_eq!(bucket.lines.len(), 1);
    assert_eq!(bucket.total, dec("300"));
    assert_eq!(bucket.idpos, None);
}

#[tokio::test]
async fn test_consolidation_is_idempotent() {
    let p = setup_pipeline().await;
    seed_many(&p).await;

    let first = p.consolidator.consolidate(july()).await.unwrap();
    let before = p.repo.consolidated_records(july()).await.unwrap();
    let second = p.consolidator.consolidate(july()).await.unwrap();
    let after = p.repo.consolidated_records(july()).await.unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.consolidated_count, 11);
    assert_eq!(second.consolidated_count, 11);
    assert_eq!(second.removed, 11);

    let strip = |records: Vec<liquidator::domain::CarrierRecord>| {
        records
            .into_iter()
            .map(|r| (r.subscriber_id, r.commission_total(), r.carrier_total_recharge, r.source_cutoffs))
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(before), strip(after));
}

#[tokio::test]
async fn test_empty_period_consolidates_to_nothing() {
    let p = setup_pipeline().await;
    let report = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!(report.raw_count, 0);
    assert_eq!(report.consolidated_count, 0);

    let ticket = p.previews.start(july()).await.unwrap();
    assert_eq!(ticket.chunk_count, 0);
    let job_key = ticket.job_key.clone();
    ticket.wait().await;
    let listing = p.previews.result(&job_key).await.unwrap().unwrap();
    assert!(listing.stores.is_empty());
}

#[tokio::test]
async fn test_chunk_sum_equivalence_for_every_chunk_size() {
    let p = setup_pipeline().await;
    seed_many(&p).await;

    let expected: BTreeMap<StoreId, Decimal> = p
        .calculator
        .calculate("2025-07", None)
        .await
        .unwrap()
        .stores
        .into_iter()
        .map(|(id, bucket)| (id, bucket.total))
        .collect();
    let record_count = p.repo.unconsumed_consolidated_ids(july()).await.unwrap().len();
    assert_eq!(record_count, 11);

    for size in 1..=record_count {
        let previews = p.previews.clone().with_chunk_size(size);
        let totals = preview_totals(&p, &previews).await;
        assert_eq!(totals, expected, "chunk size {size}");
    }
}

#[tokio::test]
async fn test_previews_never_consume_records() {
    let p = setup_pipeline().await;
    seed_many(&p).await;
    let before = p.repo.unconsumed_consolidated_ids(july()).await.unwrap();

    let previews = p.previews.clone().with_chunk_size(3);
    preview_totals(&p, &previews).await;
    preview_totals(&p, &previews).await;

    let after = p.repo.unconsumed_consolidated_ids(july()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes_after_merge() {
    let p = setup_pipeline().await;
    seed_many(&p).await;

    let previews = p.previews.clone().with_chunk_size(1);
    let ticket = previews.start(july()).await.unwrap();
    let job_key = ticket.job_key.clone();

    let mut last = 0;
    let mut observed = Vec::new();
    for _ in 0..2000 {
        let progress = previews.progress(&job_key).await.unwrap().unwrap();
        assert!(progress >= last, "progress went from {last} to {progress}");
        assert!(progress <= PROGRESS_DONE);
        observed.push(progress);
        last = progress;
        if progress == PROGRESS_DONE {
            assert!(previews.result(&job_key).await.unwrap().is_some());
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(last, PROGRESS_DONE, "observed {observed:?}");
    ticket.wait().await;
}

#[tokio::test]
async fn test_merge_adds_closed_and_pending_money() {
    let p = setup_pipeline().await;
    let store = p
        .repo
        .upsert_store(&Idpos::new("STORE-1".to_string()), "Store One")
        .await
        .unwrap();

    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(1, "10", "0", "1000", "C1"))
            .with_term(term(1, "STORE-1", "10")),
    )
    .await;
    p.consolidator.consolidate(july()).await.unwrap();
    let receipt = p.committer.commit_settlement(store.id, july(), Some("ops")).await.unwrap();
    assert_eq!(receipt.settlement.net_amount, dec("100"));

    // A late cutoff brings a new subscriber for the same store.
    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(2, "10", "0", "2500", "C2"))
            .with_term(term(2, "STORE-1", "10")),
    )
    .await;
    let report = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!(report.held, 1);
    assert_eq!(report.inserted, 1);

    let ticket = p.previews.start(july()).await.unwrap();
    let job_key = ticket.job_key.clone();
    ticket.wait().await;
    let listing = p.previews.result(&job_key).await.unwrap().unwrap();
    assert_eq!(listing.stores.len(), 1);
    let row = &listing.stores[0];
    assert_eq!(row.store_id, store.id);
    assert_eq!(row.status, PreviewStatus::Partial);
    assert_eq!(row.total, dec("350"));
    assert_eq!(row.lines.len(), 2);

    // The closed settlement stays final; the late line remains pending.
    let err = p
        .committer
        .commit_settlement(store.id, july(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::AlreadyClosed { .. }));
    assert_eq!(p.repo.unconsumed_consolidated_ids(july()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_closed_only_store_is_liquidated() {
    let p = setup_pipeline().await;
    let stores = seed_many(&p).await;
    p.committer.commit_settlement(stores[0], july(), None).await.unwrap();

    let totals = preview_totals(&p, &p.previews).await;
    let ticket = p.previews.start(july()).await.unwrap();
    let job_key = ticket.job_key.clone();
    ticket.wait().await;
    let listing = p.previews.result(&job_key).await.unwrap().unwrap();

    let settled = listing.stores.iter().find(|s| s.store_id == stores[0]).unwrap();
    assert_eq!(settled.status, PreviewStatus::Liquidated);
    assert_eq!(totals[&stores[0]], settled.total);
    assert!(listing
        .stores
        .iter()
        .filter(|s| s.store_id != stores[0])
        .all(|s| s.status == PreviewStatus::Pending));
}

#[tokio::test]
async fn test_concurrent_commits_settle_once() {
    let p = setup_pipeline().await;
    let stores = seed_many(&p).await;
    let store = stores[1];

    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let committer = p.committer.clone();
            tokio::spawn(async move { committer.commit_settlement(store, july(), None).await })
        })
        .collect();

    let mut closed = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.line_count, 3);
                closed += 1;
            }
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(closed, 1);
    assert_eq!(p.repo.ledger_entries(store).await.unwrap().len(), 1);
    assert_eq!(p.repo.unconsumed_consolidated_ids(july()).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_latest_term_wins_even_from_a_later_period() {
    let p = setup_pipeline().await;
    let first = p
        .repo
        .upsert_store(&Idpos::new("STORE-1".to_string()), "Store One")
        .await
        .unwrap();
    let second = p
        .repo
        .upsert_store(&Idpos::new("STORE-2".to_string()), "Store Two")
        .await
        .unwrap();

    let mut august = term(10, "STORE-2", "20");
    august.period = "2025-08".parse().unwrap();
    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(10, "100", "0", "1000", "C1"))
            .with_term(term(10, "STORE-1", "10"))
            .with_term(august),
    )
    .await;
    p.consolidator.consolidate(july()).await.unwrap();

    let result = p.calculator.calculate("2025-07", None).await.unwrap();
    assert!(!result.stores.contains_key(&first.id));
    let bucket = &result.stores[&second.id];
    assert_eq!(bucket.lines[0].residual_percent, dec("20"));
    assert_eq!(bucket.total, dec("200"));
}

#[tokio::test]
async fn test_closed_settlement_shows_when_nothing_is_pending() {
    let p = setup_pipeline().await;
    let store = p
        .repo
        .upsert_store(&Idpos::new("STORE-1".to_string()), "Store One")
        .await
        .unwrap();
    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(1, "10", "0", "1000", "C1"))
            .with_term(term(1, "STORE-1", "10")),
    )
    .await;
    p.consolidator.consolidate(july()).await.unwrap();
    p.committer.commit_settlement(store.id, july(), None).await.unwrap();
    assert!(p.repo.unconsumed_consolidated_ids(july()).await.unwrap().is_empty());

    let ticket = p.previews.start(july()).await.unwrap();
    assert_eq!(ticket.chunk_count, 0);
    let job_key = ticket.job_key.clone();
    ticket.wait().await;

    assert_eq!(p.previews.progress(&job_key).await.unwrap(), Some(PROGRESS_DONE));
    let listing = p.previews.result(&job_key).await.unwrap().unwrap();
    assert_eq!(listing.stores.len(), 1);
    assert_eq!(listing.stores[0].store_id, store.id);
    assert_eq!(listing.stores[0].status, PreviewStatus::Liquidated);
    assert_eq!(listing.grand_total(), dec("100"));
}

#[tokio::test]
async fn test_late_cutoff_after_settlement_stays_pending() {
    let p = setup_pipeline().await;
    let store = p
        .repo
        .upsert_store(&Idpos::new("STORE-1".to_string()), "Store One")
        .await
        .unwrap();
    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(1, "10", "0", "1000", "C1"))
            .with_term(term(1, "STORE-1", "10")),
    )
    .await;
    p.consolidator.consolidate(july()).await.unwrap();
    p.committer.commit_settlement(store.id, july(), None).await.unwrap();

    ingest(
        &p,
        MockRecordFeed::new().with_carrier_record(carrier(1, "40", "0", "5000", "C2")),
    )
    .await;
    let report = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!((report.held, report.supplemented, report.inserted), (1, 1, 0));

    // Re-running rebuilds the same supplementary record.
    let again = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!((again.removed, again.supplemented), (1, 1));
    assert_eq!(again.fingerprint, report.fingerprint);

    let pending = p.repo.unconsumed_consolidated_ids(july()).await.unwrap();
    assert_eq!(pending.len(), 1);
    let late = p.repo.consolidated_records_by_ids(&pending).await.unwrap();
    assert_eq!(late[0].commission_total(), dec("40"));
    assert_eq!(late[0].carrier_total_recharge, dec("5000"));
    assert_eq!(late[0].source_cutoffs, vec!["C2".to_string()]);

    let totals = preview_totals(&p, &p.previews).await;
    assert_eq!(totals[&store.id], dec("600"));
}

#[tokio::test]
async fn test_late_cutoff_is_settled_by_regenerating_a_draft() {
    let p = setup_pipeline().await;
    let store = p
        .repo
        .upsert_store(&Idpos::new("STORE-1".to_string()), "Store One")
        .await
        .unwrap();
    ingest(
        &p,
        MockRecordFeed::new()
            .with_carrier_record(carrier(1, "10", "0", "1000", "C1"))
            .with_term(term(1, "STORE-1", "10")),
    )
    .await;
    p.consolidator.consolidate(july()).await.unwrap();
    let draft = p.committer.draft_settlement(store.id, july(), None).await.unwrap();
    assert_eq!(draft.settlement.net_amount, dec("100"));

    ingest(
        &p,
        MockRecordFeed::new().with_carrier_record(carrier(1, "40", "0", "5000", "C2")),
    )
    .await;
    let report = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!(report.supplemented, 1);

    let receipt = p.committer.commit_settlement(store.id, july(), None).await.unwrap();
    assert!(receipt.regenerated);
    assert_eq!(receipt.line_count, 2);
    assert_eq!(receipt.settlement.net_amount, dec("600"));
    assert!(p.repo.unconsumed_consolidated_ids(july()).await.unwrap().is_empty());

    // Everything is covered now; nothing new appears on a further run.
    let report = p.consolidator.consolidate(july()).await.unwrap();
    assert_eq!((report.held, report.supplemented), (1, 0));
}
