use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::average::{EmaState, WindowState};
use crate::cumulative::{CumState, VwapState};
use crate::oscillator::{CrossState, MacdState, RsiState};
use crate::range::{AtrState, TrState};
use crate::trend::SuperTrendState;
use crate::TaError;

/// Commit/tentative pair for one call site.
///
/// `committed` is valid as of the end of the last finalized bar and is the
/// only base any computation reads. `tentative` holds the in-progress bar's
/// result and is promoted once the bar index advances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord<S> {
    pub committed: S,
    pub tentative: S,
    last_bar: Option<usize>,
    /// Bar the record last ran on before `last_bar`.
    #[serde(default)]
    base_bar: Option<usize>,
}

impl<S: Clone> StateRecord<S> {
    pub fn new(initial: S) -> Self {
        Self {
            committed: initial.clone(),
            tentative: initial,
            last_bar: None,
            base_bar: None,
        }
    }

    /// Commit step: promote `tentative` when `bar` is past the last bar this
    /// record ran on, then hand back the committed half.
    pub fn begin(&mut self, bar: usize) -> &S {
        if let Some(last) = self.last_bar {
            if bar > last {
                self.committed = self.tentative.clone();
            }
        }
        if self.last_bar != Some(bar) {
            self.base_bar = self.last_bar;
        }
        self.last_bar = Some(self.last_bar.map_or(bar, |last| last.max(bar)));
        &self.committed
    }

    /// Run one invocation: commit if needed, compute from `committed`, stage
    /// the new tentative half and return the output.
    pub fn step<R>(&mut self, bar: usize, compute: impl FnOnce(&S) -> (S, R)) -> R {
        let (next, out) = compute(self.begin(bar));
        self.tentative = next;
        out
    }

    pub fn last_bar(&self) -> Option<usize> {
        self.last_bar
    }

    /// Undo every invocation made on `bar`, as if the record had not run
    /// on it. Returns false when the record never ran before `bar`.
    pub fn rollback(&mut self, bar: usize) -> bool {
        if self.last_bar == Some(bar) {
            self.tentative = self.committed.clone();
            self.last_bar = self.base_bar;
        }
        self.last_bar.is_some()
    }
}

/// Implemented by every per-family state struct so the registry can store
/// them in one typed map.
pub trait Family: Clone + Default {
    const NAME: &'static str;

    fn wrap(record: StateRecord<Self>) -> FamilyState;
    fn unwrap_mut(state: &mut FamilyState) -> Option<&mut StateRecord<Self>>;
}

macro_rules! families {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Serializable state of one call site, tagged by indicator family.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum FamilyState {
            $($variant(StateRecord<$ty>)),*
        }

        impl FamilyState {
            pub fn family(&self) -> &'static str {
                match self {
                    $(FamilyState::$variant(_) => stringify!($variant)),*
                }
            }

            pub fn last_bar(&self) -> Option<usize> {
                match self {
                    $(FamilyState::$variant(r) => r.last_bar()),*
                }
            }

            fn rollback(&mut self, bar: usize) -> bool {
                match self {
                    $(FamilyState::$variant(r) => r.rollback(bar)),*
                }
            }
        }

        $(
            impl Family for $ty {
                const NAME: &'static str = stringify!($variant);

                fn wrap(record: StateRecord<Self>) -> FamilyState {
                    FamilyState::$variant(record)
                }

                fn unwrap_mut(state: &mut FamilyState) -> Option<&mut StateRecord<Self>> {
                    match state {
                        FamilyState::$variant(record) => Some(record),
                        _ => None,
                    }
                }
            }
        )*
    };
}

families! {
    Ema(EmaState),
    Window(WindowState),
    Cum(CumState),
    Vwap(VwapState),
    Tr(TrState),
    Atr(AtrState),
    SuperTrend(SuperTrendState),
    Rsi(RsiState),
    Macd(MacdState),
    Cross(CrossState),
}

/// Call-site key → state record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRegistry {
    records: BTreeMap<String, FamilyState>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating on first use) the record for `key`.
    pub fn record<S: Family>(&mut self, key: &str) -> Result<&mut StateRecord<S>, TaError> {
        let entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| S::wrap(StateRecord::default()));
        let found = entry.family();
        S::unwrap_mut(entry).ok_or_else(|| TaError::StateMismatch {
            key: key.to_string(),
            expected: S::NAME,
            found,
        })
    }

    pub fn get(&self, key: &str) -> Option<&FamilyState> {
        self.records.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Discard what a previous pass over `bar` staged. Records first
    /// created on `bar` are dropped.
    pub fn rollback(&mut self, bar: usize) {
        self.records.retain(|_, record| record.rollback(bar));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter(u32);

    #[test]
    fn same_bar_reinvocation_leaves_committed_untouched() {
        let mut rec = StateRecord::new(Counter(0));
        let out = rec.step(0, |c| (Counter(c.0 + 1), c.0 + 1));
        assert_eq!(out, 1);
        let before = rec.committed.clone();
        let again = rec.step(0, |c| (Counter(c.0 + 1), c.0 + 1));
        assert_eq!(again, 1);
        assert_eq!(rec.committed, before);
        assert_eq!(rec.tentative, Counter(1));
    }

    #[test]
    fn advancing_bar_commits_last_tentative() {
        let mut rec = StateRecord::new(Counter(0));
        rec.step(0, |c| (Counter(c.0 + 5), ()));
        rec.step(0, |c| (Counter(c.0 + 7), ()));
        let tentative_at_end = rec.tentative.clone();
        let committed_seen = rec.step(1, |c| (c.clone(), c.clone()));
        assert_eq!(committed_seen, tentative_at_end);
        assert_eq!(rec.committed, Counter(7));
    }

    #[test]
    fn rollback_forgets_an_abandoned_pass() {
        let mut rec = StateRecord::new(Counter(0));
        rec.step(0, |c| (Counter(c.0 + 3), ()));
        rec.step(1, |c| (Counter(c.0 + 5), ()));
        // the re-evaluated pass over bar 1 never reaches this record
        assert!(rec.rollback(1));
        assert_eq!(rec.last_bar(), Some(0));
        let seen = rec.step(2, |c| (c.clone(), c.clone()));
        assert_eq!(seen, Counter(3));
    }

    #[test]
    fn registry_rollback_drops_records_born_on_the_bar() {
        let mut reg = StateRegistry::new();
        reg.record::<CumState>("ta.cum#0").unwrap().step(0, |_| (CumState::default(), ()));
        reg.record::<CumState>("ta.cum#1").unwrap().step(1, |_| (CumState::default(), ()));
        reg.rollback(1);
        assert_eq!(reg.keys().collect::<Vec<_>>(), vec!["ta.cum#0"]);
        reg.rollback(0);
        assert!(reg.is_empty());
    }

    #[test]
    fn registry_rejects_family_mismatch() {
        let mut reg = StateRegistry::new();
        reg.record::<EmaState>("ta.ema#0").unwrap();
        let err = reg.record::<WindowState>("ta.ema#0").unwrap_err();
        assert!(matches!(err, TaError::StateMismatch { found: "Ema", .. }));
        assert_eq!(reg.len(), 1);
    }
}
