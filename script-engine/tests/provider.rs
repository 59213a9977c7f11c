mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bar, bars, nums, plot};
use data_feed::{CachedProvider, MemoryProvider, SymbolInfo};
use script_engine::{RunConfig, ScriptRunner, Value};
use tokio_util::sync::CancellationToken;
use ts_core::TimeFrame;

#[tokio::test]
async fn independent_runs_share_a_cached_provider() {
    let memory = MemoryProvider::with_bars("T", TimeFrame::Minutes(1), bars(&[1.0, 2.0, 3.0, 4.0]));
    memory.set_symbol_info(SymbolInfo::new("T").with_mintick(0.25)).await;
    let provider = Arc::new(CachedProvider::new(memory));
    let config = RunConfig::new("T", "1");

    let mut fast = ScriptRunner::from_source("plot(ta.sma(close, 2))").unwrap();
    let mut tick = ScriptRunner::from_source("plot(syminfo.mintick)").unwrap();
    let (a, b) = tokio::join!(
        fast.run(&provider, &config, CancellationToken::new()),
        tick.run(&provider, &config, CancellationToken::new()),
    );
    assert_eq!(plot(&a.unwrap(), "plot1"), vec![Value::Na, Value::Num(1.5), Value::Num(2.5), Value::Num(3.5)]);
    assert_eq!(plot(&b.unwrap(), "plot1"), nums(&[0.25; 4]));
    assert_eq!(provider.cached_entries().await, 1);
}

#[tokio::test]
async fn date_bounds_select_the_replayed_range() {
    let provider = MemoryProvider::with_bars("T", TimeFrame::Minutes(1), bars(&[1.0, 2.0, 3.0, 4.0]));
    // Test bars start at 1_700_000_000_000 and are one minute apart.
    let config = RunConfig::new("T", "1").with_range("1700000060000", "1700000120000");
    let mut runner = ScriptRunner::from_source("plot(close)").unwrap();
    let output = runner.run(&provider, &config, CancellationToken::new()).await.unwrap();
    assert_eq!(plot(&output, "plot1"), nums(&[2.0, 3.0]));
}

#[tokio::test]
async fn live_polls_through_the_cache_see_reticks() {
    let memory = Arc::new(MemoryProvider::with_bars("T", TimeFrame::Minutes(1), bars(&[1.0, 2.0])));
    let provider = Arc::new(CachedProvider::new(memory.clone()));
    let cancel = CancellationToken::new();
    let feeder = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            memory.push_bar("T", TimeFrame::Minutes(1), bar(1, 2.5)).await;
            tokio::time::sleep(Duration::from_millis(40)).await;
            memory.push_bar("T", TimeFrame::Minutes(1), bar(2, 3.0)).await;
            tokio::time::sleep(Duration::from_millis(80)).await;
            cancel.cancel();
        })
    };
    let mut runner = ScriptRunner::from_source("plot(close)").unwrap();
    let config = RunConfig::new("T", "1").with_live(Duration::from_millis(10));
    let output = runner.run(&provider, &config, cancel).await.unwrap();
    feeder.await.unwrap();
    assert_eq!(plot(&output, "plot1"), nums(&[1.0, 2.5, 3.0]));
}
