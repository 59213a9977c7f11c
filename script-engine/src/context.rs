//! Execution context: everything one run of a lowered program owns.
//!
//! Slots (scope variables and captured parameters) share one lifecycle. The
//! first touch of a slot in an evaluation pass either commits the previous
//! bar's head into history (when the bar advanced, carrying the value over
//! any bars the slot was not touched on) or discards the tentative head
//! (when the same bar is evaluated again). Reads and writes only ever see
//! the head and the committed history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use data_feed::SymbolInfo;
use ta_engine::{Lookback, TaEngine};
use ts_core::{Bar, Series, Timestamp};

use crate::program::DataField;
use crate::value::Value;

pub use ta_engine::{precision, precision_with};

pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 10_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextOptions {
    /// History kept per slot; `None` keeps everything.
    pub max_bars_back: Option<usize>,
    pub max_loop_iterations: usize,
    pub max_call_depth: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_bars_back: None,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl ContextOptions {
    pub fn with_max_bars_back(mut self, bars: usize) -> Self {
        self.max_bars_back = Some(bars);
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

/// One persistent series cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    history: Series<Value>,
    head: Option<Value>,
    head_bar: Option<usize>,
    pass: u64,
}

impl Slot {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            history: capacity.map_or_else(Series::new, Series::bounded),
            head: None,
            head_bar: None,
            pass: 0,
        }
    }

    /// Apply the commit/discard step once per pass.
    fn touch(&mut self, bar: usize, pass: u64) {
        if self.pass == pass {
            return;
        }
        match self.head_bar {
            Some(last) if bar > last => {
                let committed = self
                    .head
                    .take()
                    .or_else(|| self.history.current().cloned())
                    .unwrap_or_default();
                let carried = (bar - last - 1).min(self.history.capacity().unwrap_or(usize::MAX));
                for _ in 0..carried {
                    self.history.push(committed.clone());
                }
                self.history.push(committed);
            }
            Some(_) => self.head = None,
            None => {}
        }
        self.head_bar = Some(bar);
        self.pass = pass;
    }

    /// Drop a head staged for `bar` by an earlier pass. Returns false when
    /// the slot was created on `bar` and holds nothing else.
    fn rollback(&mut self, bar: usize) -> bool {
        if self.head_bar != Some(bar) {
            return true;
        }
        self.head = None;
        !self.history.is_empty()
    }

    fn init(&mut self, value: Value) {
        self.head = Some(value);
    }

    /// Persistent initialisation: an existing carried value wins.
    fn init_var(&mut self, value: Value) {
        if self.head.is_none() {
            self.head = Some(self.history.current().cloned().unwrap_or(value));
        }
    }

    fn set(&mut self, value: Value) {
        self.head = Some(value);
    }

    /// Value `offset` bars back; offset 0 is this bar.
    pub fn get(&self, offset: usize) -> Option<&Value> {
        match offset {
            0 => self.head.as_ref().or_else(|| self.history.current()),
            n => self.history.get(n - 1),
        }
    }

    pub fn current(&self) -> Value {
        self.get(0).cloned().unwrap_or_default()
    }

    /// Readable values including the current bar.
    pub fn depth(&self) -> usize {
        let current = usize::from(self.head.is_some() || !self.history.is_empty());
        self.history.len() + current
    }

    /// Mutable current value, materialising a carried one first.
    pub fn current_mut(&mut self) -> &mut Value {
        if self.head.is_none() {
            self.head = Some(self.history.current().cloned().unwrap_or_default());
        }
        self.head.get_or_insert_with(Value::default)
    }
}

/// Keyed slot table used for both the scope store and captured parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotStore {
    slots: BTreeMap<String, Slot>,
    capacity: Option<usize>,
}

impl SlotStore {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            slots: BTreeMap::new(),
            capacity,
        }
    }

    /// Existing slot, touched for this pass.
    pub fn touch(&mut self, key: &str, bar: usize, pass: u64) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(key)?;
        slot.touch(bar, pass);
        Some(slot)
    }

    /// Slot for `key`, created on first use and touched for this pass.
    pub fn entry(&mut self, key: &str, bar: usize, pass: u64) -> &mut Slot {
        let capacity = self.capacity;
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(capacity));
        slot.touch(bar, pass);
        slot
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Undo what earlier passes over `bar` wrote.
    pub fn rollback(&mut self, bar: usize) {
        self.slots.retain(|_, slot| slot.rollback(bar));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}

/// Numeric view of a slot at a fixed extra offset.
pub struct SlotView<'a> {
    pub slot: Option<&'a Slot>,
    pub offset: usize,
}

impl Lookback for SlotView<'_> {
    fn at(&self, offset: usize) -> f64 {
        self.slot
            .and_then(|s| s.get(self.offset.saturating_add(offset)))
            .map_or(f64::NAN, Value::as_f64)
    }

    fn depth(&self) -> usize {
        self.slot.map_or(0, |s| s.depth().saturating_sub(self.offset))
    }
}

/// Numeric view of a bar field.
pub struct DataView<'a> {
    pub bars: &'a [Bar],
    pub index: usize,
    pub field: DataField,
    pub offset: usize,
}

impl Lookback for DataView<'_> {
    fn at(&self, offset: usize) -> f64 {
        let back = self.offset.saturating_add(offset);
        if back > self.index {
            return f64::NAN;
        }
        let index = self.index - back;
        self.bars.get(index).map_or(f64::NAN, |bar| field_value(bar, self.field, index))
    }

    fn depth(&self) -> usize {
        (self.index + 1).saturating_sub(self.offset)
    }
}

pub fn field_value(bar: &Bar, field: DataField, index: usize) -> f64 {
    match field {
        DataField::Open => bar.open,
        DataField::High => bar.high,
        DataField::Low => bar.low,
        DataField::Close => bar.close,
        DataField::Volume => bar.volume,
        DataField::Hl2 => bar.hl2(),
        DataField::Hlc3 => bar.hlc3(),
        DataField::Ohlc4 => bar.ohlc4(),
        DataField::Time => bar.open_time as f64,
        DataField::TimeClose => bar.close_time as f64,
        DataField::BarIndex => index as f64,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub index: usize,
    pub time: Timestamp,
    pub value: Value,
    pub options: BTreeMap<String, Value>,
}

/// `indicator(...)` / `study(...)` declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub short_title: Option<String>,
    pub overlay: bool,
}

pub(crate) struct CallSite<'a> {
    pub scopes: &'a SlotStore,
    pub params: &'a SlotStore,
    pub bar: Option<&'a Bar>,
    pub bars: &'a [Bar],
    pub index: usize,
    pub ta: &'a mut TaEngine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    options: ContextOptions,
    bars: Vec<Bar>,
    bar_index: usize,
    pass: u64,
    pub(crate) scopes: SlotStore,
    pub(crate) params: SlotStore,
    pub(crate) ta: TaEngine,
    pub(crate) plots: BTreeMap<String, Vec<PlotPoint>>,
    pub(crate) results: BTreeMap<String, Vec<Value>>,
    pub(crate) inputs: BTreeMap<String, Value>,
    pub(crate) symbol: Option<SymbolInfo>,
    pub(crate) metadata: Metadata,
    pub(crate) plot_counter: usize,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextOptions::default())
    }
}

impl Context {
    pub fn new(options: ContextOptions) -> Self {
        Self {
            scopes: SlotStore::new(options.max_bars_back),
            params: SlotStore::new(options.max_bars_back),
            options,
            bars: Vec::new(),
            bar_index: 0,
            pass: 0,
            ta: TaEngine::new(),
            plots: BTreeMap::new(),
            results: BTreeMap::new(),
            inputs: BTreeMap::new(),
            symbol: None,
            metadata: Metadata::default(),
            plot_counter: 0,
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn set_inputs(&mut self, inputs: BTreeMap<String, Value>) {
        self.inputs = inputs;
    }

    pub fn set_symbol_info(&mut self, info: SymbolInfo) {
        self.symbol = Some(info);
    }

    pub fn symbol_info(&self) -> Option<&SymbolInfo> {
        self.symbol.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Append a bar and make it current.
    pub fn push_bar(&mut self, bar: Bar) -> usize {
        self.bars.push(bar);
        self.bar_index = self.bars.len() - 1;
        self.bar_index
    }

    /// Replace the trailing (still open) bar.
    pub fn replace_last_bar(&mut self, bar: Bar) -> Option<usize> {
        let last = self.bars.last_mut()?;
        *last = bar;
        self.bar_index = self.bars.len() - 1;
        Some(self.bar_index)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bar(&self) -> Option<&Bar> {
        self.bars.get(self.bar_index)
    }

    pub fn bar_index(&self) -> usize {
        self.bar_index
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Start a new evaluation pass over the current bar. Anything an
    /// earlier pass over the same bar staged is rolled back first, so a
    /// re-tick sees the bar as if it were evaluated for the first time.
    pub fn begin_pass(&mut self) {
        self.pass += 1;
        self.plot_counter = 0;
        let bar = self.bar_index;
        self.scopes.rollback(bar);
        self.params.rollback(bar);
        self.ta.rollback(bar);
        self.plots.retain(|_, points| {
            if points.last().is_some_and(|p| p.index == bar) {
                points.pop();
            }
            !points.is_empty()
        });
        self.results.retain(|_, values| {
            values.truncate(bar);
            !values.is_empty()
        });
    }

    pub fn scopes(&self) -> &SlotStore {
        &self.scopes
    }

    pub fn ta(&self) -> &TaEngine {
        &self.ta
    }

    // ---------- slot primitives ---------------------------------------------

    pub fn init(&mut self, key: &str, value: Value) {
        let (bar, pass) = (self.bar_index, self.pass);
        self.scopes.entry(key, bar, pass).init(value);
    }

    pub fn init_var(&mut self, key: &str, value: Value) {
        let (bar, pass) = (self.bar_index, self.pass);
        self.scopes.entry(key, bar, pass).init_var(value);
    }

    pub fn set(&mut self, key: &str, value: Value) {
        let (bar, pass) = (self.bar_index, self.pass);
        self.scopes.entry(key, bar, pass).set(value);
    }

    /// Lookback into a slot; unknown slots and out-of-range offsets are `Na`.
    pub fn get(&mut self, key: &str, offset: usize) -> Value {
        let (bar, pass) = (self.bar_index, self.pass);
        self.scopes
            .touch(key, bar, pass)
            .and_then(|s| s.get(offset).cloned())
            .unwrap_or_default()
    }

    pub fn slot_mut(&mut self, key: &str) -> &mut Value {
        let (bar, pass) = (self.bar_index, self.pass);
        self.scopes.entry(key, bar, pass).current_mut()
    }

    pub fn data(&self, field: DataField, offset: usize) -> Value {
        let view = DataView {
            bars: &self.bars,
            index: self.bar_index,
            field,
            offset,
        };
        Value::num(view.at(0))
    }

    /// Capture an owned parameter value under `key`.
    pub fn param(&mut self, key: &str, value: Value) {
        let (bar, pass) = (self.bar_index, self.pass);
        self.params.entry(key, bar, pass).init(value);
    }

    /// History of a captured parameter; offset 0 is this bar.
    pub fn param_history(&self, key: &str, offset: usize) -> Value {
        self.params
            .get(key)
            .and_then(|s| s.get(offset).cloned())
            .unwrap_or_default()
    }

    /// Touch a slot before building a read-only view over it.
    pub(crate) fn prepare_slot(&mut self, key: &str) {
        let (bar, pass) = (self.bar_index, self.pass);
        self.scopes.touch(key, bar, pass);
    }

    /// Read-only stores next to the mutable indicator engine, for building
    /// argument views while a call runs.
    pub(crate) fn call_site(&mut self) -> CallSite<'_> {
        CallSite {
            scopes: &self.scopes,
            params: &self.params,
            bar: self.bars.get(self.bar_index),
            bars: &self.bars,
            index: self.bar_index,
            ta: &mut self.ta,
        }
    }

    // ---------- outputs -------------------------------------------------------

    pub(crate) fn next_plot_title(&mut self) -> String {
        self.plot_counter += 1;
        format!("plot{}", self.plot_counter)
    }

    /// Record a plot point; re-evaluating a bar replaces its point.
    pub fn record_plot(&mut self, title: &str, value: Value, options: BTreeMap<String, Value>) {
        let index = self.bar_index;
        let time = self.bar().map_or(0, |b| b.open_time);
        let points = self.plots.entry(title.to_string()).or_default();
        let point = PlotPoint {
            index,
            time,
            value,
            options,
        };
        match points.last_mut() {
            Some(last) if last.index == index => *last = point,
            _ => points.push(point),
        }
    }

    /// Record a per-bar result; the array stays aligned to bar indices.
    pub fn record_result(&mut self, name: &str, value: Value) {
        let index = self.bar_index;
        let values = self.results.entry(name.to_string()).or_default();
        if values.len() > index {
            values[index] = value;
        } else {
            values.resize(index, Value::Na);
            values.push(value);
        }
    }

    pub fn plots(&self) -> &BTreeMap<String, Vec<PlotPoint>> {
        &self.plots
    }

    /// Results padded with `Na` to the number of processed bars.
    pub fn results(&self) -> BTreeMap<String, Vec<Value>> {
        let len = self.bars.len();
        self.results
            .iter()
            .map(|(name, values)| {
                let mut values = values.clone();
                values.resize(len.max(values.len()), Value::Na);
                (name.clone(), values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64, t: i64) -> Bar {
        Bar {
            open_time: t,
            close_time: t + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn next(ctx: &mut Context, close: f64) {
        let t = ctx.bars().len() as i64 * 60_000;
        ctx.push_bar(bar(close, t));
        ctx.begin_pass();
    }

    #[test]
    fn series_lookback_reads_previous_bars() {
        let mut ctx = Context::default();
        for v in [10.0, 20.0, 30.0] {
            next(&mut ctx, v);
            ctx.init("glb0_x", Value::num(v));
        }
        assert_eq!(ctx.get("glb0_x", 0), Value::Num(30.0));
        assert_eq!(ctx.get("glb0_x", 1), Value::Num(20.0));
        assert_eq!(ctx.get("glb0_x", 2), Value::Num(10.0));
        assert_eq!(ctx.get("glb0_x", 3), Value::Na);
        assert_eq!(ctx.get("missing", 0), Value::Na);
    }

    #[test]
    fn var_init_keeps_carried_value_and_survives_retick() {
        let mut ctx = Context::default();
        next(&mut ctx, 1.0);
        ctx.init_var("glb0_n", Value::num(0.0));
        let n = ctx.get("glb0_n", 0).as_f64();
        ctx.set("glb0_n", Value::num(n + 1.0));

        // same bar again: the tentative increment is discarded
        ctx.begin_pass();
        ctx.init_var("glb0_n", Value::num(0.0));
        let n = ctx.get("glb0_n", 0).as_f64();
        ctx.set("glb0_n", Value::num(n + 1.0));
        assert_eq!(ctx.get("glb0_n", 0), Value::Num(1.0));

        next(&mut ctx, 2.0);
        ctx.init_var("glb0_n", Value::num(0.0));
        let n = ctx.get("glb0_n", 0).as_f64();
        ctx.set("glb0_n", Value::num(n + 1.0));
        assert_eq!(ctx.get("glb0_n", 0), Value::Num(2.0));
        assert_eq!(ctx.get("glb0_n", 1), Value::Num(1.0));
    }

    #[test]
    fn retick_forgets_writes_the_final_pass_skips() {
        let mut ctx = Context::default();
        next(&mut ctx, 1.0);
        ctx.init("if1_y", Value::num(5.0));
        next(&mut ctx, 2.0);
        ctx.set("if1_y", Value::num(9.0));
        ctx.init("if1_fresh", Value::num(1.0));
        ctx.record_plot("p", Value::num(9.0), BTreeMap::new());

        ctx.begin_pass();
        assert_eq!(ctx.get("if1_y", 0), Value::Num(5.0));
        assert!(ctx.scopes().get("if1_fresh").is_none());
        assert!(ctx.plots().get("p").is_none());

        next(&mut ctx, 3.0);
        assert_eq!(ctx.get("if1_y", 1), Value::Num(5.0));
    }

    #[test]
    fn untouched_bars_carry_the_last_value() {
        let mut ctx = Context::default();
        next(&mut ctx, 1.0);
        ctx.init("if1_y", Value::num(5.0));
        next(&mut ctx, 2.0);
        next(&mut ctx, 3.0);
        ctx.init("if1_y", Value::num(7.0));
        assert_eq!(ctx.get("if1_y", 0), Value::Num(7.0));
        assert_eq!(ctx.get("if1_y", 1), Value::Num(5.0));
        assert_eq!(ctx.get("if1_y", 2), Value::Num(5.0));
    }

    #[test]
    fn bounded_history_scrolls() {
        let mut ctx = Context::new(ContextOptions::default().with_max_bars_back(2));
        for v in [1.0, 2.0, 3.0, 4.0] {
            next(&mut ctx, v);
            ctx.init("glb0_x", Value::num(v));
        }
        assert_eq!(ctx.get("glb0_x", 2), Value::Num(2.0));
        assert_eq!(ctx.get("glb0_x", 3), Value::Na);
    }

    #[test]
    fn composite_values_are_copied() {
        let mut ctx = Context::default();
        next(&mut ctx, 1.0);
        ctx.init("glb0_a", Value::Array(vec![Value::num(1.0)]));
        next(&mut ctx, 2.0);
        ctx.init_var("glb0_a", Value::Array(vec![]));
        if let Value::Array(items) = ctx.slot_mut("glb0_a") {
            items.push(Value::num(2.0));
        }
        assert_eq!(ctx.get("glb0_a", 1), Value::Array(vec![Value::num(1.0)]));
        assert_eq!(
            ctx.get("glb0_a", 0),
            Value::Array(vec![Value::num(1.0), Value::num(2.0)])
        );
    }

    #[test]
    fn data_views_address_bars_by_offset() {
        let mut ctx = Context::default();
        for v in [10.0, 20.0, 30.0] {
            next(&mut ctx, v);
        }
        assert_eq!(ctx.data(DataField::Close, 0), Value::Num(30.0));
        assert_eq!(ctx.data(DataField::Close, 2), Value::Num(10.0));
        assert_eq!(ctx.data(DataField::Close, 3), Value::Na);
        assert_eq!(ctx.data(DataField::BarIndex, 1), Value::Num(1.0));
        let view = DataView {
            bars: ctx.bars(),
            index: 2,
            field: DataField::High,
            offset: 1,
        };
        assert_eq!(view.at(0), 21.0);
        assert_eq!(view.depth(), 2);
    }

    #[test]
    fn results_stay_aligned_and_retick_replaces() {
        let mut ctx = Context::default();
        next(&mut ctx, 1.0);
        next(&mut ctx, 2.0);
        ctx.record_result("x", Value::num(1.0));
        ctx.record_result("x", Value::num(2.0));
        ctx.record_plot("p", Value::num(1.0), BTreeMap::new());
        ctx.record_plot("p", Value::num(3.0), BTreeMap::new());
        next(&mut ctx, 3.0);
        let results = ctx.results();
        assert_eq!(results["x"], vec![Value::Na, Value::Num(2.0), Value::Na]);
        assert_eq!(ctx.plots()["p"].len(), 1);
        assert_eq!(ctx.plots()["p"][0].value, Value::Num(3.0));
    }

    #[test]
    fn context_round_trips_through_json() {
        let mut ctx = Context::default();
        next(&mut ctx, 1.0);
        ctx.init("glb0_x", Value::Na);
        let json = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_slot_for_test("glb0_x"), Some(Value::Na));
    }

    impl Context {
        fn get_slot_for_test(&self, key: &str) -> Option<Value> {
            self.scopes.get(key).map(Slot::current)
        }
    }
}
