// 9.0: price observations. each market has an index feed (pushed by an authorized adder)
// and a mark feed (pushed by the engine on every fill).
// 9.1 ring buffer, 9.2 per feed series with epoch aggregates, 9.3 the ledger.
//
// storage is bounded: raw samples live in a small ring for sub epoch windows, epoch
// aggregates in a larger ring. when a ring is full the oldest slot is overwritten, and
// queries that reach past what is retained fall back to the oldest aggregate still held.

use crate::types::{Address, MarketId, Price, Timestamp, HOUR_MS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feed {
    Index,
    Mark,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    pub epoch_ms: i64,
    pub epoch_capacity: usize,
    pub sample_capacity: usize,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            epoch_ms: 8 * HOUR_MS,
            epoch_capacity: 1_098,
            sample_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp: Timestamp,
    pub price: Price,
}

/// Running aggregate of every observation that landed in one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSlot {
    pub epoch_start: Timestamp,
    pub sum: Decimal,
    pub count: u64,
    pub last_price: Price,
    pub last_timestamp: Timestamp,
}

impl EpochSlot {
    fn open(epoch_start: Timestamp, obs: PriceObservation) -> Self {
        Self {
            epoch_start,
            sum: obs.price.value(),
            count: 1,
            last_price: obs.price,
            last_timestamp: obs.timestamp,
        }
    }

    fn absorb(&mut self, obs: PriceObservation) {
        self.sum += obs.price.value();
        self.count += 1;
        self.last_price = obs.price;
        self.last_timestamp = obs.timestamp;
    }

    pub fn average(&self) -> Price {
        Price::new_unchecked(self.sum / Decimal::from(self.count))
    }
}

// 9.1: fixed capacity circular array. the cursor points at the next slot to write.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    cursor: usize,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            capacity: capacity.max(1),
        }
    }

    /// Writes at the cursor. Returns the evicted element once the ring is full.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
            self.cursor = self.slots.len() % self.capacity;
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.cursor], value);
        self.cursor = (self.cursor + 1) % self.capacity;
        Some(evicted)
    }

    fn latest_index(&self) -> Option<usize> {
        if self.slots.is_empty() {
            None
        } else {
            Some((self.cursor + self.capacity - 1) % self.capacity)
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.latest_index().map(|i| &self.slots[i])
    }

    pub fn latest_mut(&mut self) -> Option<&mut T> {
        let i = self.latest_index()?;
        self.slots.get_mut(i)
    }

    pub fn oldest(&self) -> Option<&T> {
        if self.is_full() {
            self.slots.get(self.cursor)
        } else {
            self.slots.first()
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let split = if self.is_full() { self.cursor } else { 0 };
        self.slots[split..].iter().chain(self.slots[..split].iter())
    }
}

// 9.2: one feed of one market
#[derive(Debug, Clone)]
pub struct PriceSeries {
    seed: Price,
    epoch_ms: i64,
    samples: RingBuffer<PriceObservation>,
    epochs: RingBuffer<EpochSlot>,
    samples_evicted: bool,
}

impl PriceSeries {
    pub fn new(seed: Price, config: &ObservationConfig) -> Self {
        Self {
            seed,
            epoch_ms: config.epoch_ms.max(1),
            samples: RingBuffer::new(config.sample_capacity),
            epochs: RingBuffer::new(config.epoch_capacity),
            samples_evicted: false,
        }
    }

    pub fn seed(&self) -> Price {
        self.seed
    }

    pub fn latest(&self) -> Option<PriceObservation> {
        self.samples.latest().copied()
    }

    pub fn last_price(&self) -> Price {
        self.latest().map(|o| o.price).unwrap_or(self.seed)
    }

    pub fn epochs(&self) -> &RingBuffer<EpochSlot> {
        &self.epochs
    }

    fn epoch_start(&self, ts: Timestamp) -> Timestamp {
        Timestamp::from_millis(ts.as_millis().div_euclid(self.epoch_ms) * self.epoch_ms)
    }

    pub fn check_order(&self, ts: Timestamp) -> Result<(), ObservationError> {
        match self.latest() {
            Some(latest) if ts < latest.timestamp => Err(ObservationError::OutOfOrder {
                latest: latest.timestamp,
                got: ts,
            }),
            _ => Ok(()),
        }
    }

    /// Appends an observation. Returns the epoch slot evicted to make room, if any.
    pub fn push(&mut self, obs: PriceObservation) -> Result<Option<EpochSlot>, ObservationError> {
        self.check_order(obs.timestamp)?;

        if self.samples.push(obs).is_some() {
            self.samples_evicted = true;
        }

        let start = self.epoch_start(obs.timestamp);
        if let Some(slot) = self.epochs.latest_mut() {
            if slot.epoch_start == start {
                slot.absorb(obs);
                return Ok(None);
            }
        }
        Ok(self.epochs.push(EpochSlot::open(start, obs)))
    }

    /// Timestamp of the oldest raw sample, once older ones have been overwritten.
    fn raw_cutoff(&self) -> Option<Timestamp> {
        if self.samples_evicted {
            self.samples.oldest().map(|o| o.timestamp)
        } else {
            None
        }
    }

    fn sum_samples(&self, filter: impl Fn(Timestamp) -> bool) -> (Decimal, u64) {
        self.samples
            .iter()
            .filter(|o| filter(o.timestamp))
            .fold((Decimal::ZERO, 0u64), |(s, c), o| (s + o.price.value(), c + 1))
    }

    // raw samples answer the range as far back as they reach. only the part of the
    // range older than the oldest raw sample is filled in from epoch aggregates.
    fn mean_in(&self, start: Timestamp, end: Timestamp, inclusive_end: bool) -> Option<Price> {
        let in_range = |ts: Timestamp| ts >= start && if inclusive_end { ts <= end } else { ts < end };
        let (mut sum, mut count) = self.sum_samples(in_range);

        if let Some(cutoff) = self.raw_cutoff().filter(|cutoff| start < *cutoff) {
            let mut straddling = None;
            for slot in self.epochs.iter() {
                let slot_end = slot.epoch_start.plus_millis(self.epoch_ms);
                let starts_in = if inclusive_end {
                    slot.epoch_start <= end
                } else {
                    slot.epoch_start < end
                };
                if !starts_in || slot_end <= start {
                    continue;
                }
                if slot_end <= cutoff {
                    sum += slot.sum;
                    count += slot.count;
                } else if slot.epoch_start < cutoff {
                    straddling = Some(slot);
                }
            }

            // the epoch holding the cutoff mixes evicted and retained samples. its
            // evicted part is only used when nothing else answered.
            if count == 0 {
                if let Some(slot) = straddling {
                    let slot_end = slot.epoch_start.plus_millis(self.epoch_ms);
                    let (kept_sum, kept_count) = self.sum_samples(|ts| ts >= slot.epoch_start && ts < slot_end);
                    if slot.count > kept_count {
                        sum = slot.sum - kept_sum;
                        count = slot.count - kept_count;
                    }
                }
            }
        }

        (count > 0).then(|| Price::new_unchecked(sum / Decimal::from(count)))
    }

    /// Mean over [now - window, now]. Falls back to the latest price, then the seed.
    pub fn sma_over(&self, now: Timestamp, window_ms: i64) -> Price {
        let start = now.minus_millis(window_ms.max(0));
        if let Some(mean) = self.mean_in(start, now, true) {
            return mean;
        }
        self.last_price()
    }

    /// Mean over [start, end).
    pub fn epoch_sma(&self, start: Timestamp, end: Timestamp) -> Result<Price, ObservationError> {
        if end <= start {
            return Err(ObservationError::InvalidRange { start, end });
        }
        if let Some(mean) = self.mean_in(start, end, false) {
            return Ok(mean);
        }
        if self.epochs.is_empty() {
            return Ok(self.seed);
        }
        // nothing inside the range: use the price in effect when it began
        let before = self
            .epochs
            .iter()
            .rev()
            .find(|slot| slot.last_timestamp < start)
            .map(|slot| slot.last_price);
        match before {
            Some(price) => Ok(price),
            None => Ok(self.epochs.oldest().map(|slot| slot.average()).unwrap_or(self.seed)),
        }
    }
}

// 9.3: all feeds for all markets, plus who may write each index feed
#[derive(Debug, Clone)]
pub struct PriceObservationLedger {
    config: ObservationConfig,
    series: HashMap<(MarketId, Feed), PriceSeries>,
    adders: HashMap<MarketId, Address>,
}

impl PriceObservationLedger {
    pub fn new(config: ObservationConfig) -> Self {
        Self {
            config,
            series: HashMap::new(),
            adders: HashMap::new(),
        }
    }

    pub fn register_market(&mut self, market: MarketId, seed: Price, adder: Address) {
        self.series.insert((market, Feed::Index), PriceSeries::new(seed, &self.config));
        self.series.insert((market, Feed::Mark), PriceSeries::new(seed, &self.config));
        self.adders.insert(market, adder);
    }

    pub fn adder(&self, market: MarketId) -> Option<Address> {
        self.adders.get(&market).copied()
    }

    pub fn set_adder(&mut self, market: MarketId, adder: Address) -> Result<(), ObservationError> {
        let slot = self
            .adders
            .get_mut(&market)
            .ok_or(ObservationError::UnknownMarket(market))?;
        *slot = adder;
        Ok(())
    }

    pub fn series(&self, market: MarketId, feed: Feed) -> Result<&PriceSeries, ObservationError> {
        self.series
            .get(&(market, feed))
            .ok_or(ObservationError::UnknownMarket(market))
    }

    fn series_mut(&mut self, market: MarketId, feed: Feed) -> Result<&mut PriceSeries, ObservationError> {
        self.series
            .get_mut(&(market, feed))
            .ok_or(ObservationError::UnknownMarket(market))
    }

    /// Validates an index observation without storing it.
    pub fn check_observation(
        &self,
        caller: Address,
        market: MarketId,
        price: Decimal,
        timestamp: Timestamp,
    ) -> Result<Price, ObservationError> {
        let price = Price::new(price).ok_or(ObservationError::ZeroPrice)?;
        let adder = self.adder(market).ok_or(ObservationError::UnknownMarket(market))?;
        if adder != caller {
            return Err(ObservationError::Unauthorized { caller, market });
        }
        self.series(market, Feed::Index)?.check_order(timestamp)?;
        Ok(price)
    }

    /// External index observation. Only the market's adder may call this.
    pub fn add_observation(
        &mut self,
        caller: Address,
        market: MarketId,
        price: Decimal,
        timestamp: Timestamp,
    ) -> Result<(), ObservationError> {
        let price = self.check_observation(caller, market, price, timestamp)?;
        self.append(market, Feed::Index, PriceObservation { timestamp, price })
    }

    /// Unchecked append, the engine uses this for mark prices.
    pub fn append(&mut self, market: MarketId, feed: Feed, obs: PriceObservation) -> Result<(), ObservationError> {
        let series = self.series_mut(market, feed)?;
        if let Some(evicted) = series.push(obs)? {
            debug!(%market, ?feed, epoch_start = %evicted.epoch_start, "evicted oldest epoch slot");
        }
        trace!(%market, ?feed, price = %obs.price, ts = %obs.timestamp, "observation stored");
        Ok(())
    }

    pub fn sma_over(&self, market: MarketId, feed: Feed, now: Timestamp, window_ms: i64) -> Result<Price, ObservationError> {
        Ok(self.series(market, feed)?.sma_over(now, window_ms))
    }

    pub fn epoch_sma(
        &self,
        market: MarketId,
        feed: Feed,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Price, ObservationError> {
        self.series(market, feed)?.epoch_sma(start, end)
    }

    pub fn last_price(&self, market: MarketId, feed: Feed) -> Result<Price, ObservationError> {
        Ok(self.series(market, feed)?.last_price())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObservationError {
    #[error("Observation price must be positive")]
    ZeroPrice,

    #[error("{caller} may not add observations for market {market}")]
    Unauthorized { caller: Address, market: MarketId },

    #[error("Invalid range: end {end} must be after start {start}")]
    InvalidRange { start: Timestamp, end: Timestamp },

    #[error("Observation at {got} is older than latest {latest}")]
    OutOfOrder { latest: Timestamp, got: Timestamp },

    #[error("Observation at {got} is ahead of the clock {now}")]
    FromFuture { now: Timestamp, got: Timestamp },

    #[error("No observations registered for market {0}")]
    UnknownMarket(MarketId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn small_config() -> ObservationConfig {
        ObservationConfig {
            epoch_ms: 1_000,
            epoch_capacity: 3,
            sample_capacity: 4,
        }
    }

    fn obs(ms: i64, price: Decimal) -> PriceObservation {
        PriceObservation {
            timestamp: Timestamp::from_millis(ms),
            price: Price::new_unchecked(price),
        }
    }

    #[test]
    fn ring_buffer_wraps_and_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), None);
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.oldest(), Some(&2));
        assert_eq!(ring.latest(), Some(&4));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn empty_series_returns_seed() {
        let series = PriceSeries::new(Price::new_unchecked(dec!(100)), &small_config());
        assert_eq!(series.sma_over(Timestamp::from_millis(5_000), 1_000).value(), dec!(100));
        assert_eq!(
            series
                .epoch_sma(Timestamp::from_millis(0), Timestamp::from_millis(10))
                .unwrap()
                .value(),
            dec!(100)
        );
    }

    #[test]
    fn sma_averages_window() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        series.push(obs(100, dec!(10))).unwrap();
        series.push(obs(200, dec!(20))).unwrap();
        series.push(obs(300, dec!(30))).unwrap();

        assert_eq!(series.sma_over(Timestamp::from_millis(300), 150).value(), dec!(25));
        assert_eq!(series.sma_over(Timestamp::from_millis(300), 1_000).value(), dec!(20));
    }

    #[test]
    fn stale_window_uses_latest_price() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        series.push(obs(100, dec!(10))).unwrap();
        series.push(obs(200, dec!(12))).unwrap();
        assert_eq!(series.sma_over(Timestamp::from_millis(10_000), 50).value(), dec!(12));
    }

    #[test]
    fn epoch_sma_half_open() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        series.push(obs(100, dec!(10))).unwrap();
        series.push(obs(200, dec!(20))).unwrap();

        let mean = series
            .epoch_sma(Timestamp::from_millis(100), Timestamp::from_millis(200))
            .unwrap();
        assert_eq!(mean.value(), dec!(10));
    }

    #[test]
    fn epoch_sma_rejects_empty_range() {
        let series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        let t = Timestamp::from_millis(100);
        assert_eq!(
            series.epoch_sma(t, t),
            Err(ObservationError::InvalidRange { start: t, end: t })
        );
    }

    #[test]
    fn out_of_order_rejected() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        series.push(obs(200, dec!(10))).unwrap();
        assert!(matches!(
            series.push(obs(100, dec!(10))),
            Err(ObservationError::OutOfOrder { .. })
        ));
        // same timestamp is fine
        assert!(series.push(obs(200, dec!(11))).is_ok());
    }

    #[test]
    fn old_ranges_fall_back_to_epoch_aggregates() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        // two samples per epoch across three epochs overflows the 4 sample ring
        for (ms, p) in [(0, dec!(10)), (500, dec!(20)), (1_000, dec!(30)), (1_500, dec!(40)), (2_000, dec!(50)), (2_500, dec!(60))] {
            series.push(obs(ms, p)).unwrap();
        }
        // epoch [0, 1000) has been evicted from the raw ring, so the aggregate answers
        let mean = series
            .epoch_sma(Timestamp::from_millis(0), Timestamp::from_millis(1_000))
            .unwrap();
        assert_eq!(mean.value(), dec!(15));
    }

    #[test]
    fn overflowed_sample_ring_keeps_window_to_raw_samples() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        series.push(obs(0, dec!(1000))).unwrap();
        for ms in 10..16 {
            series.push(obs(ms, dec!(10))).unwrap();
        }
        // one epoch, ring holds 12..=15. the 1000 at 0 must not leak into [9, 15]
        assert_eq!(series.sma_over(Timestamp::from_millis(15), 6).value(), dec!(10));
        assert_eq!(
            series
                .epoch_sma(Timestamp::from_millis(9), Timestamp::from_millis(16))
                .unwrap()
                .value(),
            dec!(10)
        );

        // a range inside the evicted part only has the epoch remainder: 1000, 10, 10
        assert_eq!(
            series
                .epoch_sma(Timestamp::from_millis(0), Timestamp::from_millis(5))
                .unwrap()
                .value(),
            dec!(340)
        );
    }

    #[test]
    fn epoch_ring_eviction_degrades_to_oldest_aggregate() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        for (ms, p) in [(0, dec!(10)), (1_000, dec!(20)), (2_000, dec!(30)), (3_000, dec!(40)), (4_000, dec!(50))] {
            series.push(obs(ms, p)).unwrap();
        }
        assert_eq!(series.epochs().len(), 3);
        // [0, 500) predates everything retained
        let mean = series
            .epoch_sma(Timestamp::from_millis(0), Timestamp::from_millis(500))
            .unwrap();
        assert_eq!(mean.value(), dec!(30));
    }

    #[test]
    fn range_after_data_uses_latest_price() {
        let mut series = PriceSeries::new(Price::new_unchecked(dec!(1)), &small_config());
        series.push(obs(100, dec!(10))).unwrap();
        series.push(obs(150, dec!(14))).unwrap();
        let mean = series
            .epoch_sma(Timestamp::from_millis(5_000), Timestamp::from_millis(6_000))
            .unwrap();
        assert_eq!(mean.value(), dec!(14));
    }

    #[test]
    fn ledger_enforces_adder() {
        let market = MarketId(Address::from_low_u64(0xb1));
        let adder = Address::from_low_u64(0xa0);
        let mut ledger = PriceObservationLedger::new(small_config());
        ledger.register_market(market, Price::new_unchecked(dec!(1)), adder);

        let err = ledger
            .add_observation(Address::from_low_u64(1), market, dec!(2), Timestamp::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, ObservationError::Unauthorized { .. }));

        assert_eq!(
            ledger.add_observation(adder, market, Decimal::ZERO, Timestamp::from_millis(10)),
            Err(ObservationError::ZeroPrice)
        );

        ledger
            .add_observation(adder, market, dec!(2), Timestamp::from_millis(10))
            .unwrap();
        assert_eq!(ledger.last_price(market, Feed::Index).unwrap().value(), dec!(2));
        // mark feed untouched
        assert_eq!(ledger.last_price(market, Feed::Mark).unwrap().value(), dec!(1));
    }
}
