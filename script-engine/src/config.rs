//! Run configuration for [`ScriptRunner::run`](crate::runner::ScriptRunner::run).

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;
use ts_core::{TimeFrame, Timestamp, DAY_MS};

use crate::context::{ContextOptions, DEFAULT_MAX_LOOP_ITERATIONS};
use crate::value::Value;

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_TIMEFRAME: &str = "60";
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid timeframe `{0}`")]
    InvalidTimeFrame(String),
    #[error("invalid date `{0}`: expected YYYY-MM-DD or epoch milliseconds")]
    InvalidDate(String),
    #[error("{var} must be a number, got `{value}`")]
    InvalidNumber { var: &'static str, value: String },
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("static regex"))
}

/// Parse a date bound. A calendar date means the start of that UTC day, or
/// its last millisecond when `end_of_day` is set.
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<Timestamp, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidDate(raw.to_string());
    if let Some(caps) = date_re().captures(raw) {
        let part = |i: usize| caps[i].parse::<u32>().map_err(|_| invalid());
        let year = i32::try_from(part(1)?).map_err(|_| invalid())?;
        let date = NaiveDate::from_ymd_opt(year, part(2)?, part(3)?).ok_or_else(invalid)?;
        let start = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc().timestamp_millis();
        return Ok(if end_of_day { start + DAY_MS - 1 } else { start });
    }
    raw.parse::<Timestamp>().map_err(|_| invalid())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub enabled: bool,
    /// Bars requested per poll.
    pub page_size: usize,
    pub poll_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub symbol: String,
    pub timeframe: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
    /// Overrides keyed by input title.
    pub inputs: BTreeMap<String, Value>,
    pub live: LiveConfig,
    pub max_bars_back: Option<usize>,
    pub max_loop_iterations: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            timeframe: DEFAULT_TIMEFRAME.to_string(),
            start: None,
            end: None,
            limit: None,
            inputs: BTreeMap::new(),
            live: LiveConfig::default(),
            max_bars_back: None,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
        }
    }
}

impl RunConfig {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            ..Self::default()
        }
    }

    /// Read `PINE_SYMBOL`, `PINE_TIMEFRAME`, `PINE_LIMIT`, `PINE_LIVE` and
    /// `PINE_POLL_MS` over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(symbol) = get("PINE_SYMBOL") {
            config.symbol = symbol;
        }
        if let Some(timeframe) = get("PINE_TIMEFRAME") {
            if TimeFrame::parse(&timeframe).is_none() {
                return Err(ConfigError::InvalidTimeFrame(timeframe));
            }
            config.timeframe = timeframe;
        }
        if let Some(limit) = get("PINE_LIMIT") {
            config.limit = Some(number("PINE_LIMIT", &limit)?);
        }
        if let Some(live) = get("PINE_LIVE") {
            config.live.enabled = matches!(live.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(poll) = get("PINE_POLL_MS") {
            config.live.poll_interval = Duration::from_millis(number("PINE_POLL_MS", &poll)?);
        }
        Ok(config)
    }

    pub fn with_range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_input(mut self, title: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(title.into(), value.into());
        self
    }

    pub fn with_live(mut self, poll_interval: Duration) -> Self {
        self.live.enabled = true;
        self.live.poll_interval = poll_interval;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.live.page_size = page_size.max(1);
        self
    }

    pub fn with_max_bars_back(mut self, bars: usize) -> Self {
        self.max_bars_back = Some(bars);
        self
    }

    pub fn timeframe(&self) -> Result<TimeFrame, ConfigError> {
        TimeFrame::parse(&self.timeframe).ok_or_else(|| ConfigError::InvalidTimeFrame(self.timeframe.clone()))
    }

    pub fn start_ms(&self) -> Result<Option<Timestamp>, ConfigError> {
        self.start.as_deref().map(|s| parse_date_bound(s, false)).transpose()
    }

    pub fn end_ms(&self) -> Result<Option<Timestamp>, ConfigError> {
        self.end.as_deref().map(|s| parse_date_bound(s, true)).transpose()
    }

    pub fn context_options(&self) -> ContextOptions {
        let options = ContextOptions::default().with_max_loop_iterations(self.max_loop_iterations);
        match self.max_bars_back {
            Some(bars) => options.with_max_bars_back(bars),
            None => options,
        }
    }
}

fn number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn date_bounds() {
        assert_eq!(parse_date_bound("2024-01-02", false).unwrap(), 1_704_153_600_000);
        assert_eq!(parse_date_bound("2024-01-02", true).unwrap(), 1_704_239_999_999);
        assert_eq!(parse_date_bound("1700000000000", false).unwrap(), 1_700_000_000_000);
        assert!(matches!(parse_date_bound("2024-13-01", false), Err(ConfigError::InvalidDate(_))));
        assert!(matches!(parse_date_bound("yesterday", false), Err(ConfigError::InvalidDate(_))));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = RunConfig::from_lookup(lookup(&[
            ("PINE_SYMBOL", "ETHUSDT"),
            ("PINE_TIMEFRAME", "D"),
            ("PINE_LIMIT", "200"),
            ("PINE_LIVE", "true"),
            ("PINE_POLL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.symbol, "ETHUSDT");
        assert_eq!(config.timeframe().unwrap(), TimeFrame::Days(1));
        assert_eq!(config.limit, Some(200));
        assert!(config.live.enabled);
        assert_eq!(config.live.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn bad_environment_values_are_reported() {
        let err = RunConfig::from_lookup(lookup(&[("PINE_LIMIT", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: "PINE_LIMIT",
                value: "lots".to_string()
            }
        );
        let err = RunConfig::from_lookup(lookup(&[("PINE_TIMEFRAME", "7x")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidTimeFrame("7x".to_string()));
    }

    #[test]
    fn builders() {
        let config = RunConfig::new("AAPL", "15")
            .with_range("2024-01-01", "2024-01-31")
            .with_input("Length", 20.0)
            .with_max_bars_back(100);
        assert_eq!(config.start_ms().unwrap(), Some(1_704_067_200_000));
        assert_eq!(config.inputs["Length"], Value::Num(20.0));
        assert_eq!(config.context_options().max_bars_back, Some(100));
    }
}
