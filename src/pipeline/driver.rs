//! The autotuning pipeline driver.
//!
//! The driver is the foreground consumer of a stage chain. It pulls elements
//! through its upstream stage while maintaining the timing signal the
//! optimizer depends on, and it owns the lifecycle of the two background
//! loops:
//!
//! - the **optimizer** runs a first pass as soon as it starts, then
//!   recomputes node tunables on an exponentially growing period (10 ms
//!   doubling up to 60 s),
//! - the **sampler** flushes and publishes node counters on a fixed 10 ms
//!   period.
//!
//! Both loops wait on one condition variable guarded by the driver's mutex,
//! which also protects the cancellation flag and the timing counters. The
//! upstream pull itself runs without the lock, so a slow stage never blocks
//! either loop.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::model::{AutotuneAlgorithm, Model, NodeId};
use crate::observability::{ResourceRegistry, metrics as obs};
use crate::stage::{Stage, StageContext, StateReader, StateWriter};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ============================================================================
// Configuration
// ============================================================================

/// Initial optimization period.
pub const INITIAL_OPTIMIZATION_PERIOD: Duration = Duration::from_millis(10);

/// Ceiling the optimization period doubles up to.
pub const OPTIMIZATION_PERIOD_CEILING: Duration = Duration::from_secs(60);

/// Fixed sampling period of the metrics loop.
pub const METRICS_SAMPLE_PERIOD: Duration = Duration::from_millis(10);

/// Share of available system RAM used when no RAM budget is configured.
const RAM_BUDGET_SHARE: f64 = 0.5;

/// Registry container and counter name bumped by the sampler on each visit.
const REGISTRY_CONTAINER: &str = "flowtune";
const SAMPLER_VISITS: &str = "sampler_visits";

/// Construction-time configuration for a [`ModelDriver`].
///
/// Budgets of 0 are resolved once at construction: the CPU budget becomes
/// the detected schedulable CPU count and the RAM budget becomes half of the
/// available system RAM. Negative budgets fail construction.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Which autotuning algorithm the optimizer runs.
    pub algorithm: AutotuneAlgorithm,
    /// CPU budget in core-equivalents; 0 = auto-detect.
    pub cpu_budget: i64,
    /// RAM budget in bytes; 0 = half of available system RAM.
    pub ram_budget: i64,
}

impl ModelConfig {
    /// Resolve effective budgets against the given detected resources.
    fn resolve_with(&self, detected_cpus: u64, available_ram: u64) -> Result<(u64, u64)> {
        if self.cpu_budget < 0 {
            return Err(Error::InvalidBudget {
                budget: "cpu",
                value: self.cpu_budget,
            });
        }
        if self.ram_budget < 0 {
            return Err(Error::InvalidBudget {
                budget: "ram",
                value: self.ram_budget,
            });
        }
        let cpu = if self.cpu_budget == 0 {
            detected_cpus
        } else {
            self.cpu_budget as u64
        };
        let ram = if self.ram_budget == 0 {
            (available_ram as f64 * RAM_BUDGET_SHARE) as u64
        } else {
            self.ram_budget as u64
        };
        Ok((cpu, ram))
    }

    /// Resolve effective budgets, auto-detecting system resources.
    fn resolve(&self) -> Result<(u64, u64)> {
        self.resolve_with(num_cpus::get() as u64, detect_available_ram())
    }
}

fn detect_available_ram() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.available_memory()
}

// ============================================================================
// Timing bookkeeping
// ============================================================================

/// Foreground timing counters maintained by the pull path.
///
/// `last_output_time_ns` is nanoseconds since the driver's epoch, with 0
/// meaning "no output recorded yet". Updates are monotone non-decreasing;
/// an out-of-order timestamp is a defect, asserted in debug builds.
#[derive(Debug, Default)]
struct TimingState {
    input_time_ns: u64,
    num_input_events: u64,
    last_output_time_ns: u64,
}

impl TimingState {
    /// Record an input arrival. The first input after construction measures
    /// against no prior output and contributes nothing.
    fn record_input(&mut self, now_ns: u64) {
        if self.last_output_time_ns != 0 {
            debug_assert!(
                self.last_output_time_ns <= now_ns,
                "input timestamp precedes last output"
            );
            self.input_time_ns += now_ns.saturating_sub(self.last_output_time_ns);
            self.num_input_events += 1;
        }
    }

    /// Record an output completion.
    fn record_output(&mut self, now_ns: u64) {
        debug_assert!(
            self.last_output_time_ns <= now_ns,
            "output timestamp regressed"
        );
        self.last_output_time_ns = now_ns;
    }

    /// Mean wait time per input event, zero with no recorded events.
    fn self_input_time(&self) -> Duration {
        if self.num_input_events == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.input_time_ns / self.num_input_events)
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the pull path and both background loops.
struct Shared {
    state: Mutex<SharedState>,
    cond: Condvar,
    epoch: Instant,
}

struct SharedState {
    cancelled: bool,
    timing: TimingState,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SharedState {
                cancelled: false,
                timing: TimingState::default(),
            }),
            cond: Condvar::new(),
            epoch: Instant::now(),
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// The optimization period after one completed pass: doubled, capped at the
/// ceiling, constant once the ceiling is reached.
fn next_optimization_period(period: Duration) -> Duration {
    if period >= OPTIMIZATION_PERIOD_CEILING {
        OPTIMIZATION_PERIOD_CEILING
    } else {
        (period * 2).min(OPTIMIZATION_PERIOD_CEILING)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Foreground driver that pulls elements through a stage chain while two
/// background threads autotune and sample the performance model.
///
/// # Example
///
/// ```rust,ignore
/// use flowtune::pipeline::{ModelConfig, ModelDriver};
/// use flowtune::stage::testing::RangeSource;
///
/// let source = Box::new(RangeSource::new(1000, 64));
/// let mut driver = ModelDriver::new("ingest", source, ModelConfig::default())?;
/// driver.initialize()?;
/// while let Some(batch) = driver.pull()? {
///     consume(batch);
/// }
/// ```
pub struct ModelDriver {
    name: String,
    input: Box<dyn Stage>,
    model: Arc<Model>,
    registry: Arc<ResourceRegistry>,
    shared: Arc<Shared>,
    algorithm: AutotuneAlgorithm,
    cpu_budget: u64,
    ram_budget: u64,
    node: Option<NodeId>,
    optimize_thread: Option<JoinHandle<()>>,
    metrics_thread: Option<JoinHandle<()>>,
}

impl ModelDriver {
    /// Create a driver for the given upstream stage.
    ///
    /// Budgets are resolved here, once; they never change afterwards.
    /// Fails with [`Error::InvalidBudget`] on negative budgets.
    pub fn new(
        name: impl Into<String>,
        input: Box<dyn Stage>,
        config: ModelConfig,
    ) -> Result<Self> {
        let (cpu_budget, ram_budget) = config.resolve()?;
        obs::init_metrics();
        Ok(Self {
            name: name.into(),
            input,
            model: Arc::new(Model::new()),
            registry: Arc::new(ResourceRegistry::new()),
            shared: Arc::new(Shared::new()),
            algorithm: config.algorithm,
            cpu_budget,
            ram_budget,
            node: None,
            optimize_thread: None,
            metrics_thread: None,
        })
    }

    /// Share an externally owned resource registry instead of a private one.
    pub fn with_registry(mut self, registry: Arc<ResourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Wire the driver and its upstream stages into the performance model.
    ///
    /// Must be called exactly once before any [`pull`](Self::pull).
    pub fn initialize(&mut self) -> Result<()> {
        let node = self.create_node();
        self.node = Some(node);
        let ctx = self.context(node);
        self.input.initialize(&ctx)
    }

    /// Pull the next batch of elements from upstream.
    ///
    /// Lazily starts both background loops on first use. The upstream pull
    /// runs without the driver lock and may block for unbounded external
    /// reasons; that is the expected blocking point, not an error. Elements,
    /// end-of-sequence, and errors pass through exactly as upstream reports
    /// them.
    ///
    /// # Panics
    ///
    /// Panics if called before [`initialize`](Self::initialize).
    pub fn pull(&mut self) -> Result<Option<Vec<Buffer>>> {
        let node = self.node.expect("initialize() must be called before pull()");
        let ctx = self.context(node);
        let shared = self.shared.clone();
        {
            let mut state = shared.state.lock().unwrap();
            self.ensure_background_started();
            let now = shared.now_ns();
            state.timing.record_input(now);
        }

        let result = self.input.pull(&ctx);

        let now = shared.now_ns();
        let mut state = shared.state.lock().unwrap();
        state.timing.record_output(now);
        if let Ok(Some(batch)) = &result {
            let bytes: u64 = batch.iter().map(|b| b.len() as u64).sum();
            self.model.record_bytes_consumed(node, bytes);
            self.model.record_bytes_produced(node, bytes);
            for _ in batch {
                self.model.record_element(node);
            }
        }
        result
    }

    /// Save checkpoint state: pure delegation, the driver persists nothing
    /// of its own (budgets and algorithm are construction parameters).
    pub fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        self.input.save(writer)
    }

    /// Restore checkpoint state: pure delegation to the upstream stage.
    pub fn restore(&mut self, reader: &dyn StateReader) -> Result<()> {
        self.input.restore(reader)
    }

    /// Human-readable configuration map for tracing/debugging tools.
    pub fn trace_metadata(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        map.insert("algorithm", self.algorithm.name().to_string());
        map.insert("cpu_budget", self.cpu_budget.to_string());
        map.insert("ram_budget", format!("{}B", self.ram_budget));
        map
    }

    /// Get the shared performance model.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Get the shared resource registry.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Factory hook for the driver's own node: a pass-through (ratio 1)
    /// root, the sink end of the performance tree.
    fn create_node(&self) -> NodeId {
        self.model.add_root(format!("{}::Model", self.name), 1.0)
    }

    fn context(&self, node: NodeId) -> StageContext {
        StageContext::with_model(
            self.name.clone(),
            self.model.clone(),
            node,
            self.registry.clone(),
        )
    }

    /// Start both background loops if they are not running yet.
    ///
    /// Called with the driver lock held; subsequent calls are no-ops, so a
    /// pipeline never runs more than one instance of either loop.
    fn ensure_background_started(&mut self) {
        if self.optimize_thread.is_none() {
            let shared = self.shared.clone();
            let model = self.model.clone();
            let pipeline = self.name.clone();
            let algorithm = self.algorithm;
            let (cpu_budget, ram_budget) = (self.cpu_budget, self.ram_budget);
            self.optimize_thread = Some(
                std::thread::Builder::new()
                    .name("flowtune-optimize".to_string())
                    .spawn(move || {
                        optimize_loop(shared, model, pipeline, algorithm, cpu_budget, ram_budget)
                    })
                    .expect("failed to spawn optimize thread"),
            );
        }
        if self.metrics_thread.is_none() {
            let shared = self.shared.clone();
            let model = self.model.clone();
            let registry = self.registry.clone();
            self.metrics_thread = Some(
                std::thread::Builder::new()
                    .name("flowtune-metrics".to_string())
                    .spawn(move || metrics_loop(shared, model, registry))
                    .expect("failed to spawn metrics thread"),
            );
        }
    }
}

impl Drop for ModelDriver {
    /// Signal both background loops to terminate and join them, so no loop
    /// ever observes a destroyed driver.
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.cancelled = true;
        }
        self.shared.cond.notify_all();
        if let Some(thread) = self.optimize_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.metrics_thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for ModelDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDriver")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("cpu_budget", &self.cpu_budget)
            .field("ram_budget", &self.ram_budget)
            .finish()
    }
}

// ============================================================================
// Background loops
// ============================================================================

/// Optimizer loop: timed wait, cancellation check, optimization pass, flush,
/// exponential backoff. The first pass is due immediately on thread start;
/// backoff begins after it.
fn optimize_loop(
    shared: Arc<Shared>,
    model: Arc<Model>,
    pipeline: String,
    algorithm: AutotuneAlgorithm,
    cpu_budget: u64,
    ram_budget: u64,
) {
    let mut period = INITIAL_OPTIMIZATION_PERIOD;
    let mut next_due_ms: u64 = 0;
    loop {
        let input_time;
        {
            let mut state = shared.state.lock().unwrap();
            let mut now_ms = shared.now_ms();
            while !state.cancelled && next_due_ms > now_ms {
                let wait_ms = next_due_ms - now_ms;
                trace!(wait_ms, "optimizer waiting");
                let (guard, _) = shared
                    .cond
                    .wait_timeout(state, Duration::from_millis(wait_ms))
                    .unwrap();
                state = guard;
                now_ms = shared.now_ms();
            }
            if state.cancelled {
                return;
            }
            input_time = state.timing.self_input_time();
        }

        let start = Instant::now();
        model.optimize(algorithm, cpu_budget, ram_budget, input_time);
        let elapsed = start.elapsed();
        debug!(
            pipeline = %pipeline,
            elapsed_us = elapsed.as_micros() as u64,
            period_ms = period.as_millis() as u64,
            "optimization pass complete"
        );
        obs::record_optimization(&pipeline, elapsed);
        model.flush_metrics();

        period = next_optimization_period(period);
        next_due_ms = shared.now_ms() + period.as_millis() as u64;
    }
}

/// Sampler loop: fixed-cadence flush and publication, no backoff. This is
/// the structural difference from the optimizer loop, so external observers
/// keep seeing near-real-time stage statistics while the optimizer backs
/// off.
fn metrics_loop(shared: Arc<Shared>, model: Arc<Model>, registry: Arc<ResourceRegistry>) {
    let period_ms = METRICS_SAMPLE_PERIOD.as_millis() as u64;
    let mut next_due_ms: u64 = 0;
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            let mut now_ms = shared.now_ms();
            while !state.cancelled && next_due_ms > now_ms {
                let wait_ms = next_due_ms - now_ms;
                trace!(wait_ms, "sampler waiting");
                let (guard, _) = shared
                    .cond
                    .wait_timeout(state, Duration::from_millis(wait_ms))
                    .unwrap();
                state = guard;
                now_ms = shared.now_ms();
            }
            if state.cancelled {
                return;
            }
        }

        next_due_ms = shared.now_ms() + period_ms;
        model.flush_metrics();
        let snapshot = model.collect_metrics();
        trace!(nodes = snapshot.len(), "metrics sample published");

        registry
            .lookup_or_create(REGISTRY_CONTAINER, SAMPLER_VISITS, 0)
            .fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing::{FailingSource, RangeSource};

    #[test]
    fn test_self_input_time_is_mean_of_gaps() {
        let mut timing = TimingState::default();

        // First input has no prior output: contributes nothing.
        timing.record_input(100);
        assert_eq!(timing.self_input_time(), Duration::ZERO);

        timing.record_output(200);
        timing.record_input(260); // gap 60
        timing.record_output(300);
        timing.record_input(340); // gap 40

        assert_eq!(timing.num_input_events, 2);
        assert_eq!(timing.self_input_time(), Duration::from_nanos(50));
    }

    #[test]
    fn test_self_input_time_zero_without_events() {
        let timing = TimingState::default();
        assert_eq!(timing.self_input_time(), Duration::ZERO);
    }

    #[test]
    fn test_output_timestamps_monotone() {
        let mut timing = TimingState::default();
        timing.record_output(10);
        timing.record_output(10);
        timing.record_output(25);
        assert_eq!(timing.last_output_time_ns, 25);
    }

    #[test]
    fn test_optimization_period_doubles_to_ceiling() {
        let mut period = INITIAL_OPTIMIZATION_PERIOD;
        let mut schedule = Vec::new();
        for _ in 0..20 {
            schedule.push(period);
            period = next_optimization_period(period);
        }

        // Strict doubling until the ceiling, then constant.
        for pair in schedule.windows(2) {
            if pair[0] < OPTIMIZATION_PERIOD_CEILING {
                assert_eq!(pair[1], (pair[0] * 2).min(OPTIMIZATION_PERIOD_CEILING));
            } else {
                assert_eq!(pair[1], OPTIMIZATION_PERIOD_CEILING);
            }
        }
        assert_eq!(period, OPTIMIZATION_PERIOD_CEILING);
    }

    #[test]
    fn test_budget_resolution_auto_detect() {
        let config = ModelConfig::default();
        let (cpu, ram) = config.resolve_with(8, 1_000_000).unwrap();
        assert_eq!(cpu, 8);
        assert_eq!(ram, 500_000);
    }

    #[test]
    fn test_budget_resolution_passthrough() {
        let config = ModelConfig {
            algorithm: AutotuneAlgorithm::HillClimb,
            cpu_budget: 4,
            ram_budget: 1_000_000,
        };
        let (cpu, ram) = config.resolve_with(64, 999).unwrap();
        assert_eq!(cpu, 4);
        assert_eq!(ram, 1_000_000);
    }

    #[test]
    fn test_negative_budgets_rejected() {
        let config = ModelConfig {
            cpu_budget: -1,
            ..Default::default()
        };
        assert!(matches!(
            config.resolve_with(1, 1),
            Err(Error::InvalidBudget { budget: "cpu", .. })
        ));

        let config = ModelConfig {
            ram_budget: -5,
            ..Default::default()
        };
        assert!(matches!(
            config.resolve_with(1, 1),
            Err(Error::InvalidBudget { budget: "ram", .. })
        ));
    }

    #[test]
    fn test_negative_budget_fails_construction() {
        let config = ModelConfig {
            ram_budget: -1,
            ..Default::default()
        };
        let result = ModelDriver::new("bad", Box::new(RangeSource::new(1, 1)), config);
        assert!(result.is_err());
    }

    #[test]
    fn test_lazy_start_is_idempotent() {
        let config = ModelConfig {
            cpu_budget: 2,
            ram_budget: 1_000_000,
            ..Default::default()
        };
        let mut driver =
            ModelDriver::new("lazy", Box::new(RangeSource::new(10, 8)), config).unwrap();
        driver.initialize().unwrap();

        driver.pull().unwrap();
        let optimize_id = driver.optimize_thread.as_ref().unwrap().thread().id();
        let metrics_id = driver.metrics_thread.as_ref().unwrap().thread().id();

        driver.pull().unwrap();
        assert_eq!(
            driver.optimize_thread.as_ref().unwrap().thread().id(),
            optimize_id
        );
        assert_eq!(
            driver.metrics_thread.as_ref().unwrap().thread().id(),
            metrics_id
        );
    }

    #[test]
    fn test_trace_metadata() {
        let config = ModelConfig {
            algorithm: AutotuneAlgorithm::GradientDescent,
            cpu_budget: 4,
            ram_budget: 1_000_000,
        };
        let driver = ModelDriver::new("meta", Box::new(RangeSource::new(1, 1)), config).unwrap();
        let meta = driver.trace_metadata();
        assert_eq!(meta["algorithm"], "gradient descent");
        assert_eq!(meta["cpu_budget"], "4");
        assert_eq!(meta["ram_budget"], "1000000B");
    }

    #[test]
    fn test_end_of_sequence_passes_through() {
        let config = ModelConfig {
            cpu_budget: 1,
            ram_budget: 1_000,
            ..Default::default()
        };
        let mut driver =
            ModelDriver::new("eos", Box::new(RangeSource::new(2, 4)), config).unwrap();
        driver.initialize().unwrap();

        assert!(driver.pull().unwrap().is_some());
        assert!(driver.pull().unwrap().is_some());
        assert!(driver.pull().unwrap().is_none());
    }

    #[test]
    fn test_upstream_error_forwarded_verbatim() {
        let config = ModelConfig {
            cpu_budget: 1,
            ram_budget: 1_000,
            ..Default::default()
        };
        let source = Box::new(FailingSource::new("backing store unreachable"));
        let mut driver = ModelDriver::new("err", source, config).unwrap();
        driver.initialize().unwrap();

        // The stage's error surfaces from pull() unwrapped and unretried.
        let err = driver.pull().unwrap_err();
        assert!(matches!(err, Error::Stage(msg) if msg == "backing store unreachable"));
    }

    #[test]
    fn test_drop_before_any_pull_is_clean() {
        let config = ModelConfig {
            cpu_budget: 1,
            ram_budget: 1_000,
            ..Default::default()
        };
        let driver = ModelDriver::new("idle", Box::new(RangeSource::new(1, 1)), config).unwrap();
        drop(driver); // no threads started, nothing to join
    }
}
