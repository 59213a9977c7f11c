//! Bar iteration driver: historical replay followed by live polling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use data_feed::{DataProvider, SymbolInfo};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ts_core::{Bar, Timestamp};

use crate::config::RunConfig;
use crate::context::{Context, ContextOptions, PlotPoint};
use crate::error::{RuntimeError, SyntaxError};
use crate::interpreter::run_pass;
use crate::program::LoweredProgram;
use crate::transpiler::transpile;
use crate::value::Value;

/// What a live bar did to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveUpdate {
    /// Same open time as the trailing bar: it was re-evaluated.
    Retick,
    /// A newer bar was appended.
    Advanced,
    /// Older than the trailing bar.
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// One value per processed bar.
    pub results: BTreeMap<String, Vec<Value>>,
    pub plots: BTreeMap<String, Vec<PlotPoint>>,
}

/// Everything needed to resume a run without replaying history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerCheckpoint {
    pub context: Context,
    pub last_open_time: Option<Timestamp>,
}

pub struct ScriptRunner {
    program: LoweredProgram,
    ctx: Context,
    last_open_time: Option<Timestamp>,
}

impl ScriptRunner {
    pub fn new(program: LoweredProgram) -> Self {
        Self {
            program,
            ctx: Context::default(),
            last_open_time: None,
        }
    }

    pub fn from_source(source: &str) -> Result<Self, SyntaxError> {
        Ok(Self::new(transpile(source)?))
    }

    pub fn from_checkpoint(program: LoweredProgram, checkpoint: RunnerCheckpoint) -> Self {
        Self {
            program,
            ctx: checkpoint.context,
            last_open_time: checkpoint.last_open_time,
        }
    }

    /// Replace the context options. Only meaningful before the first bar.
    pub fn with_options(mut self, options: ContextOptions) -> Self {
        let inputs = std::mem::take(&mut self.ctx.inputs);
        let symbol = self.ctx.symbol.take();
        self.ctx = Context::new(options);
        self.ctx.inputs = inputs;
        self.ctx.symbol = symbol;
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.ctx.set_inputs(inputs);
        self
    }

    pub fn set_symbol_info(&mut self, info: SymbolInfo) {
        self.ctx.set_symbol_info(info);
    }

    pub fn program(&self) -> &LoweredProgram {
        &self.program
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn last_open_time(&self) -> Option<Timestamp> {
        self.last_open_time
    }

    /// Append `bar` as the next index and evaluate it.
    pub fn on_bar(&mut self, bar: Bar) -> Result<usize, RuntimeError> {
        let index = self.ctx.push_bar(bar);
        self.last_open_time = Some(bar.open_time);
        run_pass(&self.program, &mut self.ctx)?;
        Ok(index)
    }

    /// Feed historical bars in order. Bars at or before the last processed
    /// open time are skipped, so the full history can be passed again.
    /// Returns how many bars were evaluated.
    pub fn on_history(&mut self, bars: &[Bar]) -> Result<usize, RuntimeError> {
        let mut processed = 0;
        for bar in bars {
            if self.last_open_time.is_some_and(|t| bar.open_time <= t) {
                continue;
            }
            self.on_bar(*bar)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Apply a polled bar: re-tick the trailing bar or advance.
    pub fn on_live_bar(&mut self, bar: Bar) -> Result<LiveUpdate, RuntimeError> {
        match self.last_open_time {
            Some(t) if bar.open_time == t => {
                self.ctx.replace_last_bar(bar);
                run_pass(&self.program, &mut self.ctx)?;
                Ok(LiveUpdate::Retick)
            }
            Some(t) if bar.open_time < t => Ok(LiveUpdate::Ignored),
            _ => {
                self.on_bar(bar)?;
                Ok(LiveUpdate::Advanced)
            }
        }
    }

    pub fn output(&self) -> RunOutput {
        RunOutput {
            results: self.ctx.results(),
            plots: self.ctx.plots().clone(),
        }
    }

    pub fn checkpoint(&self) -> RunnerCheckpoint {
        RunnerCheckpoint {
            context: self.ctx.clone(),
            last_open_time: self.last_open_time,
        }
    }

    /// Fetch symbol info and history from `provider`, replay it, then poll
    /// for new bars until `cancel` fires when live mode is enabled.
    ///
    /// Bad configuration and provider failures before replay yield an empty
    /// output, not an error; evaluation errors are returned.
    pub async fn run<P>(&mut self, provider: &P, config: &RunConfig, cancel: CancellationToken) -> Result<RunOutput, RuntimeError>
    where
        P: DataProvider + ?Sized,
    {
        let bounds = config
            .timeframe()
            .and_then(|tf| Ok((tf, config.start_ms()?, config.end_ms()?)));
        let (timeframe, start, end) = match bounds {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!(error = %e, "invalid run configuration");
                return Ok(RunOutput::default());
            }
        };
        if self.ctx.bars().is_empty() {
            let inputs = std::mem::take(&mut self.ctx.inputs);
            self.ctx = Context::new(config.context_options());
            self.ctx.inputs = inputs;
        }
        self.ctx.inputs.extend(config.inputs.clone());

        let symbol = config.symbol.as_str();
        match provider.get_symbol_info(symbol).await {
            Ok(info) => self.ctx.set_symbol_info(info),
            Err(e) => {
                warn!(symbol, error = %e, "symbol info unavailable");
                return Ok(RunOutput::default());
            }
        }
        let history = match provider.get_market_data(symbol, timeframe, config.limit, start, end).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol, error = %e, "history unavailable");
                return Ok(RunOutput::default());
            }
        };
        let replayed = self.on_history(&history)?;
        info!(symbol, %timeframe, bars = replayed, "historical replay complete");

        if !config.live.enabled {
            return Ok(self.output());
        }

        let period = config.live.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let page = provider
                .get_market_data(symbol, timeframe, Some(config.live.page_size), self.last_open_time, None)
                .await;
            let bars = match page {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(symbol, error = %e, "live poll failed");
                    continue;
                }
            };
            for bar in bars {
                if self.on_live_bar(bar)? == LiveUpdate::Advanced {
                    debug!(symbol, open_time = bar.open_time, "live bar");
                }
            }
        }
        info!(symbol, bars = self.ctx.bars().len(), "live polling stopped");
        Ok(self.output())
    }
}
