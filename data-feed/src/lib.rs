use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use ts_core::{Bar, TimeFrame, TimeSeries, Timestamp};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 3);
const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Symbol metadata exposed to scripts through `syminfo.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub ticker: String,
    pub description: String,
    pub currency: String,
    pub mintick: f64,
    pub timezone: String,
}

impl SymbolInfo {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            description: String::new(),
            currency: "USD".to_string(),
            mintick: 0.01,
            timezone: "UTC".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_mintick(mut self, mintick: f64) -> Self {
        self.mintick = mintick;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeFrame(TimeFrame),
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of historical and polled bars.
///
/// `get_market_data` returns bars in ascending open-time order. `limit`
/// keeps the most recent bars of the selected range; `start`/`end` bound
/// the open time inclusively. An empty result means no more history.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: Option<usize>,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Vec<Bar>, FeedError>;

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, FeedError>;
}

#[async_trait]
impl<P: DataProvider + ?Sized> DataProvider for std::sync::Arc<P> {
    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: Option<usize>,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Vec<Bar>, FeedError> {
        (**self)
            .get_market_data(symbol, timeframe, limit, start, end)
            .await
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, FeedError> {
        (**self).get_symbol_info(symbol).await
    }
}

fn check_range(start: Option<Timestamp>, end: Option<Timestamp>) -> Result<(), FeedError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(FeedError::InvalidRange { start, end }),
        _ => Ok(()),
    }
}

// ---------- in-memory provider -----------------------------------------------

#[derive(Default)]
struct MemorySymbol {
    info: Option<SymbolInfo>,
    bars: HashMap<TimeFrame, TimeSeries<Bar>>,
}

/// Provider over bars held in memory. Bars can be appended (or the trailing
/// bar replaced) while a run is polling, which is how live updates are fed
/// in tests and replays.
#[derive(Default)]
pub struct MemoryProvider {
    symbols: RwLock<HashMap<String, MemorySymbol>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with one symbol and its bars at `timeframe`.
    pub fn with_bars(symbol: &str, timeframe: TimeFrame, bars: Vec<Bar>) -> Self {
        let mut series = TimeSeries::new();
        for bar in bars {
            series.push_ordered(bar);
        }
        let mut entry = MemorySymbol {
            info: Some(SymbolInfo::new(symbol)),
            bars: HashMap::new(),
        };
        entry.bars.insert(timeframe, series);
        let mut symbols = HashMap::new();
        symbols.insert(symbol.to_string(), entry);
        Self {
            symbols: RwLock::new(symbols),
        }
    }

    pub async fn set_symbol_info(&self, info: SymbolInfo) {
        let ticker = info.ticker.clone();
        let mut symbols = self.symbols.write().await;
        symbols.entry(ticker).or_default().info = Some(info);
    }

    /// Append a newer bar, or replace the trailing bar when the open times
    /// match. Returns false for out-of-order bars.
    pub async fn push_bar(&self, symbol: &str, timeframe: TimeFrame, bar: Bar) -> bool {
        let mut symbols = self.symbols.write().await;
        let entry = symbols.entry(symbol.to_string()).or_default();
        if entry.info.is_none() {
            entry.info = Some(SymbolInfo::new(symbol));
        }
        let series = entry.bars.entry(timeframe).or_default();
        series.replace_last(bar) || series.push_ordered(bar)
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: Option<usize>,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Vec<Bar>, FeedError> {
        check_range(start, end)?;
        let symbols = self.symbols.read().await;
        let entry = symbols
            .get(symbol)
            .ok_or_else(|| FeedError::UnknownSymbol(symbol.to_string()))?;
        let series = entry
            .bars
            .get(&timeframe)
            .ok_or(FeedError::UnsupportedTimeFrame(timeframe))?;
        let selected = series.range(start, end);
        let skip = limit.map_or(0, |n| selected.len().saturating_sub(n));
        Ok(selected[skip..].to_vec())
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, FeedError> {
        self.symbols
            .read()
            .await
            .get(symbol)
            .and_then(|s| s.info.clone())
            .ok_or_else(|| FeedError::UnknownSymbol(symbol.to_string()))
    }
}

// ---------- caching provider -------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

struct CachedBars {
    stored_at: Instant,
    bars: Vec<Bar>,
}

struct CachedInfo {
    stored_at: Instant,
    info: SymbolInfo,
}

#[derive(Default)]
struct FeedCache {
    bars: HashMap<String, CachedBars>,
    order: VecDeque<String>,
    info: HashMap<String, CachedInfo>,
    /// Newest open time returned per `symbol:timeframe`.
    newest: HashMap<String, Timestamp>,
}

impl FeedCache {
    /// An open-ended request starting at or after the newest known bar
    /// reads the still-forming tail, which changes between polls.
    fn is_tail(&self, series: &str, start: Option<Timestamp>, end: Option<Timestamp>) -> bool {
        match (start, end, self.newest.get(series)) {
            (Some(start), None, Some(&newest)) => start >= newest,
            _ => false,
        }
    }

    fn note_newest(&mut self, series: &str, bars: &[Bar]) {
        if let Some(last) = bars.last() {
            let newest = self.newest.entry(series.to_string()).or_insert(last.open_time);
            *newest = (*newest).max(last.open_time);
        }
    }

    fn get_bars(&mut self, key: &str, ttl: Duration) -> Option<Vec<Bar>> {
        let now = Instant::now();
        if let Some(hit) = self.bars.get(key) {
            if now.duration_since(hit.stored_at) < ttl {
                return Some(hit.bars.clone());
            }
        }
        None
    }

    fn insert_bars(&mut self, key: String, bars: Vec<Bar>, capacity: usize) {
        if !self.bars.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.bars.insert(
            key,
            CachedBars {
                stored_at: Instant::now(),
                bars,
            },
        );
        while self.bars.len() > capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.bars.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn get_info(&mut self, symbol: &str, ttl: Duration) -> Option<SymbolInfo> {
        let now = Instant::now();
        self.info
            .get(symbol)
            .filter(|hit| now.duration_since(hit.stored_at) < ttl)
            .map(|hit| hit.info.clone())
    }

    fn insert_info(&mut self, symbol: String, info: SymbolInfo) {
        self.info.insert(
            symbol,
            CachedInfo {
                stored_at: Instant::now(),
                info,
            },
        );
    }
}

/// Wraps a provider with a bounded, time-expiring cache of responses. Safe
/// to share across runs behind an `Arc`.
pub struct CachedProvider<P> {
    inner: P,
    config: CacheConfig,
    cache: Mutex<FeedCache>,
}

impl<P: DataProvider> CachedProvider<P> {
    pub fn new(inner: P) -> Self {
        Self::with_config(inner, CacheConfig::default())
    }

    pub fn with_config(inner: P, config: CacheConfig) -> Self {
        Self {
            inner,
            config,
            cache: Mutex::new(FeedCache::default()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.bars.len()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.lock().await;
        *cache = FeedCache::default();
    }
}

#[async_trait]
impl<P: DataProvider> DataProvider for CachedProvider<P> {
    async fn get_market_data(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: Option<usize>,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Vec<Bar>, FeedError> {
        let series = format!("{symbol}:{timeframe}");
        let key = format!("bars:{series}:{limit:?}:{start:?}:{end:?}");
        let tail = {
            let mut cache = self.cache.lock().await;
            let tail = cache.is_tail(&series, start, end);
            if !tail {
                if let Some(hit) = cache.get_bars(&key, self.config.ttl) {
                    debug!(%key, bars = hit.len(), "feed cache hit");
                    return Ok(hit);
                }
            }
            tail
        };
        let bars = self
            .inner
            .get_market_data(symbol, timeframe, limit, start, end)
            .await?;
        let mut cache = self.cache.lock().await;
        cache.note_newest(&series, &bars);
        if tail {
            debug!(%key, bars = bars.len(), "feed tail fetched uncached");
        } else {
            cache.insert_bars(key, bars.clone(), self.config.capacity);
        }
        Ok(bars)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, FeedError> {
        if let Some(hit) = self.cache.lock().await.get_info(symbol, self.config.ttl) {
            debug!(symbol, "symbol info cache hit");
            return Ok(hit);
        }
        let info = self.inner.get_symbol_info(symbol).await?;
        self.cache
            .lock()
            .await
            .insert_info(symbol.to_string(), info.clone());
        Ok(info)
    }
}
