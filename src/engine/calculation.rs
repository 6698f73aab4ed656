//! Commission calculation: consolidated carrier records + recharge aggregates +
//! latest commercial terms → per-line and per-store commission.
//!
//! Everything here is pure. The snapshot types are built once per calculation
//! invocation from repository reads and shared read-only across all lines.

use crate::domain::{
    clean_iccid, exact_phone, normalize_phone, CarrierRecord, CommercialTerm, CommissionLine,
    Decimal, Idpos, RechargeEvent, Store, StoreId, Subscriber, SubscriberId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Subscriber lookup by cleaned ICCID and normalized phone.
#[derive(Debug, Clone, Default)]
pub struct SubscriberDirectory {
    by_iccid: HashMap<String, SubscriberId>,
    by_phone: HashMap<String, SubscriberId>,
}

impl SubscriberDirectory {
    pub fn new(subscribers: &[Subscriber]) -> Self {
        let mut directory = Self::default();
        for subscriber in subscribers {
            if let Some(iccid) = subscriber.iccid.as_deref().and_then(clean_iccid) {
                directory.by_iccid.entry(iccid).or_insert(subscriber.id);
            }
            if let Some(phone) = subscriber.phone.as_deref().and_then(normalize_phone) {
                directory.by_phone.entry(phone).or_insert(subscriber.id);
            }
        }
        directory
    }

    pub fn by_iccid(&self, raw: &str) -> Option<SubscriberId> {
        clean_iccid(raw).and_then(|iccid| self.by_iccid.get(&iccid).copied())
    }

    pub fn by_phone(&self, raw: &str) -> Option<SubscriberId> {
        normalize_phone(raw).and_then(|phone| self.by_phone.get(&phone).copied())
    }

    /// Resolve a subscriber from an explicit link, then ICCID, then phone.
    pub fn resolve(
        &self,
        linked: Option<SubscriberId>,
        iccid: Option<&str>,
        phone: Option<&str>,
    ) -> Option<SubscriberId> {
        linked
            .or_else(|| iccid.and_then(|i| self.by_iccid(i)))
            .or_else(|| phone.and_then(|p| self.by_phone(p)))
    }
}

/// Store lookup by external code.
#[derive(Debug, Clone, Default)]
pub struct StoreDirectory {
    by_idpos: HashMap<Idpos, Store>,
}

impl StoreDirectory {
    pub fn new(stores: Vec<Store>) -> Self {
        Self {
            by_idpos: stores.into_iter().map(|s| (s.idpos.clone(), s)).collect(),
        }
    }

    pub fn get(&self, idpos: &Idpos) -> Option<&Store> {
        self.by_idpos.get(idpos)
    }
}

/// Recharge totals for a period, with the three lookup tiers.
#[derive(Debug, Clone, Default)]
pub struct RechargeIndex {
    by_subscriber: HashMap<SubscriberId, Decimal>,
    by_phone: HashMap<String, Decimal>,
    by_normalized_phone: HashMap<String, Decimal>,
}

impl RechargeIndex {
    /// Aggregate events, resolving missing subscriber links through the directory.
    pub fn build(events: &[RechargeEvent], subscribers: &SubscriberDirectory) -> Self {
        let mut index = Self::default();
        for event in events {
            let subscriber = subscribers.resolve(
                event.subscriber_id,
                event.iccid.as_deref(),
                event.phone.as_deref(),
            );
            if let Some(subscriber) = subscriber {
                *index.by_subscriber.entry(subscriber).or_default() += event.amount;
            }
            if let Some(phone) = event.phone.as_deref() {
                if let Some(exact) = exact_phone(phone) {
                    *index.by_phone.entry(exact).or_default() += event.amount;
                }
                if let Some(normalized) = normalize_phone(phone) {
                    *index.by_normalized_phone.entry(normalized).or_default() += event.amount;
                }
            }
        }
        index
    }

    /// Recharge amount for a line: by subscriber, then exact phone, then
    /// normalized phone. A zero tier falls through to the next one.
    pub fn resolve(&self, subscriber: Option<SubscriberId>, phone: Option<&str>) -> Decimal {
        let tiers = [
            subscriber.and_then(|s| self.by_subscriber.get(&s).copied()),
            phone
                .and_then(exact_phone)
                .and_then(|p| self.by_phone.get(&p).copied()),
            phone
                .and_then(normalize_phone)
                .and_then(|p| self.by_normalized_phone.get(&p).copied()),
        ];
        tiers
            .into_iter()
            .flatten()
            .find(|amount| !amount.is_zero())
            .unwrap_or_default()
    }
}

/// Authoritative commercial term per subscriber.
///
/// Built from the repository's ranking query output, which already returns a
/// single rank-1 term per subscriber.
#[derive(Debug, Clone, Default)]
pub struct LatestTerms {
    by_subscriber: HashMap<SubscriberId, CommercialTerm>,
}

impl LatestTerms {
    pub fn from_ranked(terms: Vec<CommercialTerm>) -> Self {
        let mut by_subscriber = HashMap::with_capacity(terms.len());
        for term in terms {
            by_subscriber.entry(term.subscriber_id).or_insert(term);
        }
        Self { by_subscriber }
    }

    pub fn get(&self, subscriber: SubscriberId) -> Option<&CommercialTerm> {
        self.by_subscriber.get(&subscriber)
    }

    pub fn len(&self) -> usize {
        self.by_subscriber.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subscriber.is_empty()
    }
}

/// Read-only view of everything a calculation joins against.
#[derive(Debug, Clone, Default)]
pub struct CalculationSnapshot {
    pub subscribers: SubscriberDirectory,
    pub stores: StoreDirectory,
    pub recharges: RechargeIndex,
    pub terms: LatestTerms,
}

impl CalculationSnapshot {
    pub fn new(
        subscribers: &[Subscriber],
        stores: Vec<Store>,
        recharges: &[RechargeEvent],
        latest_terms: Vec<CommercialTerm>,
    ) -> Self {
        let subscribers = SubscriberDirectory::new(subscribers);
        let recharges = RechargeIndex::build(recharges, &subscribers);
        Self {
            subscribers,
            stores: StoreDirectory::new(stores),
            recharges,
            terms: LatestTerms::from_ranked(latest_terms),
        }
    }
}

/// Lines and running total for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreBucket {
    pub store_id: StoreId,
    pub idpos: Option<Idpos>,
    pub name: Option<String>,
    pub total: Decimal,
    pub lines: Vec<CommissionLine>,
}

impl StoreBucket {
    fn empty(store_id: StoreId, idpos: Option<Idpos>, name: Option<String>) -> Self {
        Self {
            store_id,
            idpos,
            name,
            total: Decimal::zero(),
            lines: Vec::new(),
        }
    }
}

/// Calculation output grouped by store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalculationResult {
    pub stores: BTreeMap<StoreId, StoreBucket>,
}

impl CalculationResult {
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Flat view over every line, store by store.
    pub fn lines(&self) -> impl Iterator<Item = &CommissionLine> {
        self.stores.values().flat_map(|bucket| bucket.lines.iter())
    }

    pub fn line_count(&self) -> usize {
        self.stores.values().map(|b| b.lines.len()).sum()
    }

    /// Sum of every line payout.
    pub fn total_payout(&self) -> Decimal {
        self.stores.values().map(|b| b.total).sum()
    }

    /// Remove and return one store's bucket.
    pub fn take_store(&mut self, store_id: StoreId) -> Option<StoreBucket> {
        self.stores.remove(&store_id)
    }

    pub fn into_buckets(self) -> Vec<StoreBucket> {
        self.stores.into_values().collect()
    }

    /// Append a line to its store's bucket, creating the bucket on first use.
    pub fn push(&mut self, line: CommissionLine, store: Option<&Store>) {
        let bucket = self.stores.entry(line.store_id).or_insert_with(|| {
            StoreBucket::empty(
                line.store_id,
                store.map(|s| s.idpos.clone()),
                store.map(|s| s.name.clone()),
            )
        });
        bucket.total += line.payout;
        bucket.lines.push(line);
    }
}

/// Compute one commission line.
///
/// Returns the line together with the store it resolved to, if any.
pub fn compute_line<'a>(
    record: &CarrierRecord,
    snapshot: &'a CalculationSnapshot,
) -> (CommissionLine, Option<&'a Store>) {
    let subscriber = snapshot.subscribers.resolve(
        record.subscriber_id,
        record.iccid.as_deref(),
        record.phone.as_deref(),
    );
    let recharge_amount = snapshot
        .recharges
        .resolve(subscriber, record.phone.as_deref());
    let term = subscriber.and_then(|s| snapshot.terms.get(s));
    let store = term.and_then(|t| snapshot.stores.get(&t.idpos));

    let store_id = store.map(|s| s.id).unwrap_or(StoreId::UNASSIGNED);
    let base_real = match record.settled_carrier_total {
        // Supplementary record: only the increment over what was already settled.
        Some(settled) => {
            (settled + record.carrier_total_recharge - recharge_amount).floor_at_zero()
                - (settled - recharge_amount).floor_at_zero()
        }
        None => (record.carrier_total_recharge - recharge_amount).floor_at_zero(),
    };
    let residual_percent = term.map(|t| t.residual_percent()).unwrap_or_default();
    let payout = base_real.percent(residual_percent);

    let line = CommissionLine {
        carrier_record_id: record.id,
        subscriber_id: subscriber,
        phone: record.phone.clone(),
        iccid: record.iccid.clone(),
        store_id,
        idpos: term.map(|t| t.idpos.clone()),
        commercial_term_id: term.map(|t| t.id),
        sale_price: term.map(|t| t.sale_price),
        commission_split_a: record.commission_split_a,
        commission_split_b: record.commission_split_b,
        commission_total: record.commission_total(),
        carrier_total_recharge: record.carrier_total_recharge,
        recharge_period_amount: record.recharge_period_amount,
        recharge_amount,
        base_real,
        residual_percent,
        payout,
        activation_date: record.activation_date,
        cutoff_date: record.cutoff_date,
    };
    (line, store)
}

/// Calculate every record. Lines whose store cannot be resolved land in the
/// unassigned bucket; nothing is dropped.
pub fn calculate(records: &[CarrierRecord], snapshot: &CalculationSnapshot) -> CalculationResult {
    let mut result = CalculationResult::default();
    for record in records {
        let (line, store) = compute_line(record, snapshot);
        result.push(line, store);
    }
    result
}
