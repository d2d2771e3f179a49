// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tick sources for the periodic loops.
//!
//! The health check loop and the resync loop never sleep directly; they wait on
//! a [`Ticker`]. Production code uses [`IntervalTicker`], tests drive the loops
//! one tick at a time through [`manual`] without any wall-clock delay.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Source of periodic ticks.
#[async_trait]
pub trait Ticker: Send {
    /// Wait until the next tick is due.
    async fn tick(&mut self);
}

/// Ticker backed by a tokio interval.
///
/// Missed ticks are delayed rather than bursted, so a slow cycle never causes
/// back-to-back cycles.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Tick immediately, then every `period`.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// First tick after one full `period`, then every `period`.
    #[must_use]
    pub fn delayed(period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticker that only fires when its [`TickHandle`] says so.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Sender side of a [`ManualTicker`].
#[derive(Clone)]
pub struct TickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl TickHandle {
    /// Queue one tick. Returns `false` once the ticker has been dropped.
    pub fn tick(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// Create a manually driven ticker.
#[must_use]
pub fn manual() -> (TickHandle, ManualTicker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TickHandle { tx }, ManualTicker { rx })
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            // Every handle is gone: no tick will ever come
            std::future::pending::<()>().await;
        }
    }
}
