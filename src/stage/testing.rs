//! Instrumented stages for tests and examples.
//!
//! These behave like real operators as far as the performance model is
//! concerned: they register nodes, record counters around their pulls, and
//! checkpoint their cursor state. They carry no actual transformation logic.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::model::NodeId;
use crate::stage::{Stage, StageContext, StateReader, StateWriter};
use std::time::{Duration, Instant};

/// A source stage producing a bounded sequence of fixed-size elements.
pub struct RangeSource {
    count: u64,
    element_size: usize,
    next: u64,
    /// Artificial per-element computation time, for exercising the tuner.
    delay: Duration,
    node: Option<NodeId>,
}

impl RangeSource {
    /// Create a source producing `count` elements of `element_size` bytes.
    pub fn new(count: u64, element_size: usize) -> Self {
        Self {
            count,
            element_size,
            next: 0,
            delay: Duration::ZERO,
            node: None,
        }
    }

    /// Simulate per-element computation time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Stage for RangeSource {
    fn initialize(&mut self, ctx: &StageContext) -> Result<()> {
        let (node, _child) = ctx.register_node("RangeSource", 1.0);
        self.node = node;
        Ok(())
    }

    fn pull(&mut self, ctx: &StageContext) -> Result<Option<Vec<Buffer>>> {
        if self.next >= self.count {
            return Ok(None);
        }
        let start = Instant::now();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let buf = Buffer::new(vec![0u8; self.element_size], self.next);
        self.next += 1;

        if let (Some(node), Some(model)) = (self.node, ctx.model()) {
            model.record_element(node);
            model.record_bytes_produced(node, buf.len() as u64);
            model.add_computation_time(node, start.elapsed());
        }
        Ok(Some(vec![buf]))
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        writer.write_scalar("range_source.next", self.next)
    }

    fn restore(&mut self, reader: &dyn StateReader) -> Result<()> {
        self.next = reader
            .read_scalar("range_source.next")?
            .ok_or_else(|| Error::MissingStateKey("range_source.next".into()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "range-source"
    }
}

/// A source stage whose every pull fails with a fixed message.
pub struct FailingSource {
    message: String,
}

impl FailingSource {
    /// Create a source that fails with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Stage for FailingSource {
    fn initialize(&mut self, ctx: &StageContext) -> Result<()> {
        let _ = ctx.register_node("FailingSource", 1.0);
        Ok(())
    }

    fn pull(&mut self, _ctx: &StageContext) -> Result<Option<Vec<Buffer>>> {
        Err(Error::Stage(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing-source"
    }
}

/// A pass-through stage (ratio 1) wrapping an upstream stage.
pub struct PassThrough {
    inner: Box<dyn Stage>,
    label: String,
    node: Option<NodeId>,
    ctx: Option<StageContext>,
}

impl PassThrough {
    /// Wrap an upstream stage.
    pub fn new(label: impl Into<String>, inner: Box<dyn Stage>) -> Self {
        Self {
            inner,
            label: label.into(),
            node: None,
            ctx: None,
        }
    }
}

impl Stage for PassThrough {
    fn initialize(&mut self, ctx: &StageContext) -> Result<()> {
        let (node, child) = ctx.register_node(&self.label, 1.0);
        self.node = node;
        self.inner.initialize(&child)?;
        self.ctx = Some(child);
        Ok(())
    }

    fn pull(&mut self, ctx: &StageContext) -> Result<Option<Vec<Buffer>>> {
        let upstream_ctx = self.ctx.as_ref().unwrap_or(ctx).clone();
        let start = Instant::now();
        let batch = self.inner.pull(&upstream_ctx)?;

        if let (Some(node), Some(model)) = (self.node, ctx.model()) {
            if let Some(buffers) = &batch {
                let bytes: u64 = buffers.iter().map(|b| b.len() as u64).sum();
                model.record_bytes_consumed(node, bytes);
                model.record_bytes_produced(node, bytes);
                for _ in buffers {
                    model.record_element(node);
                }
                model.add_computation_time(node, start.elapsed());
            }
        }
        Ok(batch)
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        self.inner.save(writer)
    }

    fn restore(&mut self, reader: &dyn StateReader) -> Result<()> {
        self.inner.restore(reader)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
