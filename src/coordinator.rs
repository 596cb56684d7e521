use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::cache::{CacheEntry, ResultCache};
use crate::error::ContributionError;
use crate::ledger::LedgerClient;
use crate::models::{AggregationResult, ParticipantAddress};
use crate::window::WindowSelector;

type Flight = Shared<BoxFuture<'static, Result<CacheEntry, ContributionError>>>;

/// Answers contribution queries from the cache, recomputing from the ledger
/// on a miss. At most one recomputation per address is in flight; concurrent
/// callers for that address share its outcome.
#[derive(Clone)]
pub struct QueryCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    ledger: Arc<dyn LedgerClient>,
    window: WindowSelector,
    aggregator: Aggregator,
    cache: ResultCache,
    collection: ParticipantAddress,
    ledger_timeout: Duration,
    in_flight: Mutex<HashMap<ParticipantAddress, Flight>>,
}

impl QueryCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        window: WindowSelector,
        aggregator: Aggregator,
        cache: ResultCache,
        collection: ParticipantAddress,
        ledger_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                window,
                aggregator,
                cache,
                collection,
                ledger_timeout,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    /// Validate caller-supplied text and answer for that address.
    pub async fn query_contribution(&self, raw: &str) -> Result<AggregationResult, ContributionError> {
        let address = ParticipantAddress::parse(raw)?;
        Ok(self.query(address).await?.value)
    }

    /// Cached entry for `address` if fresh, otherwise the outcome of the
    /// (possibly shared) recomputation.
    pub async fn query(&self, address: ParticipantAddress) -> Result<CacheEntry, ContributionError> {
        if let Some(entry) = self.inner.cache.get_entry(&address) {
            debug!(%address, "cache hit");
            return Ok(entry);
        }

        let flight = {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            // A flight may have landed between the first read and taking the lock.
            if let Some(entry) = self.inner.cache.get_entry(&address) {
                debug!(%address, "cache hit after lock");
                return Ok(entry);
            }

            match in_flight.get(&address) {
                Some(flight) => {
                    debug!(%address, "joining in-flight aggregation");
                    flight.clone()
                }
                None => {
                    let flight = self.start_flight(address);
                    in_flight.insert(address, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Spawn the slow path for `address`. Must be called with the in-flight
    /// lock held so the task cannot finish before its flight is registered.
    fn start_flight(&self, address: ParticipantAddress) -> Flight {
        info!(%address, "cache miss, aggregating from ledger");

        let task = tokio::spawn(Arc::clone(&self.inner).recompute(address));
        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    inner.retire(&address);
                    Err(ContributionError::UpstreamUnavailable(format!(
                        "aggregation task for {} aborted: {}",
                        address, e
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn recompute(self: Arc<Self>, address: ParticipantAddress) -> Result<CacheEntry, ContributionError> {
        match self.slow_path(&address).await {
            Ok(result) => {
                let entry = self.land(&address, result);
                info!(
                    %address,
                    contribution = %entry.value.contribution,
                    expected_allocation = %entry.value.expected_allocation,
                    "aggregation cached"
                );
                Ok(entry)
            }
            Err(e) => {
                self.retire(&address);
                warn!(%address, error = %e, "aggregation failed, cache left untouched");
                Err(e)
            }
        }
    }

    async fn slow_path(&self, address: &ParticipantAddress) -> Result<AggregationResult, ContributionError> {
        let window = self
            .bounded("eth_blockNumber", self.window.select(self.ledger.as_ref()))
            .await?;
        debug!(%address, from = window.from_block, to = window.to_block, "window selected");

        let records = self
            .bounded(
                "eth_getLogs",
                self.ledger.fetch_transfers(window, address, &self.collection),
            )
            .await?;
        debug!(%address, transfers = records.len(), "transfers fetched");

        Ok(self.aggregator.aggregate(&records))
    }

    async fn bounded<T>(
        &self,
        call: &str,
        fut: impl Future<Output = Result<T, ContributionError>>,
    ) -> Result<T, ContributionError> {
        tokio::time::timeout(self.ledger_timeout, fut)
            .await
            .map_err(|_| {
                ContributionError::UpstreamUnavailable(format!(
                    "{} timed out after {:?}",
                    call, self.ledger_timeout
                ))
            })?
    }

    /// Publish the result and retire the flight under one lock, so a caller
    /// always finds either the cached entry or the flight.
    fn land(&self, address: &ParticipantAddress, value: AggregationResult) -> CacheEntry {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = self.cache.put(*address, value);
        in_flight.remove(address);
        entry
    }

    fn retire(&self, address: &ParticipantAddress) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockWindow, TransferRecord};
    use bigdecimal::Zero;
    use alloy::primitives::U256;
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use bigdecimal::BigDecimal;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WEI: u128 = 1_000_000_000_000_000_000;
    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x4444444444444444444444444444444444444444";
    const COLLECTION: &str = "0x2222222222222222222222222222222222222222";

    #[derive(Clone)]
    enum Script {
        Transfers(Vec<u128>),
        Fail(ContributionError),
        Hang,
    }

    struct ScriptedLedger {
        height: u64,
        script: Mutex<Script>,
        fetch_delay: Duration,
        height_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        last_window: Mutex<Option<BlockWindow>>,
    }

    impl ScriptedLedger {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                height: 1_000_000,
                script: Mutex::new(script),
                fetch_delay: Duration::from_millis(100),
                height_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                last_window: Mutex::new(None),
            })
        }

        fn set_script(&self, script: Script) {
            *self.script.lock().unwrap() = script;
        }

        fn fetches(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn block_number(&self) -> Result<u64, ContributionError> {
            self.height_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.height)
        }

        async fn fetch_transfers(
            &self,
            window: BlockWindow,
            sender: &ParticipantAddress,
            recipient: &ParticipantAddress,
        ) -> Result<Vec<TransferRecord>, ContributionError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_window.lock().unwrap() = Some(window);
            let script = self.script.lock().unwrap().clone();
            match script {
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Script::Fail(e) => {
                    tokio::time::sleep(self.fetch_delay).await;
                    Err(e)
                }
                Script::Transfers(amounts) => {
                    tokio::time::sleep(self.fetch_delay).await;
                    Ok(amounts
                        .into_iter()
                        .map(|amount| TransferRecord {
                            sender: *sender,
                            recipient: *recipient,
                            amount: U256::from(amount),
                            tx_hash: "0x01".to_string(),
                        })
                        .collect())
                }
            }
        }
    }

    fn coordinator(ledger: Arc<ScriptedLedger>) -> QueryCoordinator {
        QueryCoordinator::new(
            ledger,
            WindowSelector::new(10_000),
            Aggregator::new(Decimal::from(13_000), 18),
            ResultCache::new(Duration::from_secs(300)),
            ParticipantAddress::parse(COLLECTION).unwrap(),
            Duration::from_secs(15),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn miss_computes_then_hit_skips_ledger() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![5 * WEI / 2, 5 * WEI / 4]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let first = coordinator.query_contribution(ALICE).await.unwrap();
        assert_eq!(first.contribution, "3.75".parse::<BigDecimal>().unwrap());
        assert_eq!(first.expected_allocation, BigDecimal::from(48_750));
        assert_eq!(
            *ledger.last_window.lock().unwrap(),
            Some(BlockWindow {
                from_block: 990_000,
                to_block: 1_000_000
            })
        );

        let second = coordinator.query_contribution(ALICE).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(ledger.fetches(), 1);
        assert_eq!(ledger.height_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_recomputed() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));

        coordinator.query_contribution(ALICE).await.unwrap();
        ledger.set_script(Script::Transfers(vec![WEI, WEI]));

        tokio::time::advance(Duration::from_secs(301)).await;
        let refreshed = coordinator.query_contribution(ALICE).await.unwrap();

        assert_eq!(refreshed.contribution, BigDecimal::from(2));
        assert_eq!(ledger.fetches(), 2);
        assert_eq!(coordinator.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_history_is_zero_and_cached() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let result = coordinator.query_contribution(ALICE).await.unwrap();
        assert!(result.contribution.is_zero());
        assert!(result.expected_allocation.is_zero());

        coordinator.query_contribution(ALICE).await.unwrap();
        assert_eq!(ledger.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn address_case_shares_one_entry() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let mixed = "0xABCDEFabcdef0123456789ABCDEF0123456789ab";
        let upper = coordinator.query_contribution(mixed).await.unwrap();
        let lower = coordinator
            .query_contribution(&mixed.to_lowercase())
            .await
            .unwrap();

        assert_eq!(upper, lower);
        assert_eq!(ledger.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_address_touches_nothing() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let err = coordinator.query_contribution("0xnot-an-address").await.unwrap_err();
        assert!(matches!(err, ContributionError::InvalidAddress(_)));
        assert_eq!(ledger.height_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.fetches(), 0);
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let results = join_all((0..16).map(|_| coordinator.query_contribution(ALICE))).await;

        assert_eq!(ledger.fetches(), 1);
        assert_eq!(ledger.height_calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().contribution, BigDecimal::from(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_failure() {
        let failure = ContributionError::MalformedRecord("bad amount".into());
        let ledger = ScriptedLedger::new(Script::Fail(failure.clone()));
        let coordinator = coordinator(Arc::clone(&ledger));

        let results = join_all((0..8).map(|_| coordinator.query_contribution(ALICE))).await;

        assert_eq!(ledger.fetches(), 1);
        for result in results {
            assert_eq!(result.unwrap_err(), failure);
        }
        assert!(coordinator.cache().get(&ParticipantAddress::parse(ALICE).unwrap()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn different_addresses_fetch_independently() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let (a, b) = tokio::join!(
            coordinator.query_contribution(ALICE),
            coordinator.query_contribution(BOB)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(ledger.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_poison_cache() {
        let ledger = ScriptedLedger::new(Script::Fail(ContributionError::UpstreamUnavailable(
            "connection reset".into(),
        )));
        let coordinator = coordinator(Arc::clone(&ledger));

        let err = coordinator.query_contribution(ALICE).await.unwrap_err();
        assert!(matches!(err, ContributionError::UpstreamUnavailable(_)));
        assert!(coordinator.cache().is_empty());

        // The next request retries rather than serving a placeholder.
        ledger.set_script(Script::Transfers(vec![WEI]));
        let result = coordinator.query_contribution(ALICE).await.unwrap();
        assert_eq!(result.contribution, BigDecimal::from(1));
        assert_eq!(ledger.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_leaves_expired_entry_absent() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));
        coordinator.query_contribution(ALICE).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        ledger.set_script(Script::Fail(ContributionError::MalformedRecord("bad".into())));

        let err = coordinator.query_contribution(ALICE).await.unwrap_err();
        assert!(matches!(err, ContributionError::MalformedRecord(_)));
        assert!(coordinator.cache().get(&ParticipantAddress::parse(ALICE).unwrap()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_ledger_times_out_for_every_waiter() {
        let ledger = ScriptedLedger::new(Script::Hang);
        let coordinator = coordinator(Arc::clone(&ledger));

        let results = join_all((0..4).map(|_| coordinator.query_contribution(ALICE))).await;

        assert_eq!(ledger.fetches(), 1);
        for result in results {
            assert!(matches!(
                result,
                Err(ContributionError::UpstreamUnavailable(_))
            ));
        }
        assert!(coordinator.cache().is_empty());
        assert!(coordinator.inner.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_does_not_cancel_shared_work() {
        let ledger = ScriptedLedger::new(Script::Transfers(vec![WEI]));
        let coordinator = coordinator(Arc::clone(&ledger));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            coordinator.query_contribution(ALICE),
        )
        .await;
        assert!(abandoned.is_err());

        let result = coordinator.query_contribution(ALICE).await.unwrap();
        assert_eq!(result.contribution, BigDecimal::from(1));
        assert_eq!(ledger.fetches(), 1);
    }
}
