//! The timestamp oracle.
//!
//! Allocates strictly monotonic, globally unique `(physical, logical)`
//! timestamps on behalf of the current leader. Allocation runs ahead of a
//! durable save point so the store is written once per save interval rather
//! than once per request; every durable write is conditioned on this member
//! still holding the leader key, atomically at the store.
//!
//! # Invariants
//!
//! - [INV-OR001] The published physical time is non-decreasing within a
//!   leader term.
//! - [INV-OR002] The saved point is non-decreasing across saves and across
//!   leader terms.
//! - [INV-OR003] The logical counter of a returned timestamp is always below
//!   `MAX_LOGICAL`.
//! - [INV-OR004] The published physical never reaches the saved point: a
//!   window is published only while `saved - physical > guard` holds, so
//!   every returned physical was strictly below the durable save point at
//!   the moment of return (crash safety).
//! - [INV-OR005] A durable write commits only if this member is still
//!   recorded as leader, checked atomically with the write.
//!
//! # Window lifecycle
//!
//! The window is created by [`TimestampOracle::sync`] on leader acquisition,
//! moved forward by [`TimestampOracle::advance`] and consumed by
//! [`TimestampOracle::allocate`] while leading, and zeroed by
//! [`TimestampOracle::reset`] on leader loss. A zero-physical window is the
//! unarmed sentinel.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};
use tso_core::clock::WallClock;
use tso_core::election::Leadership;
use tso_core::store::{KvStore, Precondition, PutOutcome, StoreError};
use tso_core::timestamp::{MAX_LOGICAL, Timestamp};

use crate::config::{OracleConfig, UPDATE_TIMESTAMP_GUARD};
use crate::metrics::{OracleMetrics, events};


/// Errors from oracle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OracleError {
    /// This process is not, or is no longer, the leader.
    #[error("not the current leader")]
    NotLeader,

    /// A durable store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// `allocate` was called with a zero count.
    #[error("timestamp count must be positive")]
    InvalidCount,

    /// The operator reset target is too close to the current window.
    #[error("reset target too close to the current window: gap {gap_ms} ms")]
    ResetTooSmall {
        /// Gap between the reset target and the current physical.
        gap_ms: i64,
    },

    /// The operator reset target is too far ahead of the current window.
    #[error("reset target too far ahead of the current window: gap {gap_ms} ms, ceiling {max_gap_ms} ms")]
    ResetTooLarge {
        /// Gap between the reset target and the current physical.
        gap_ms: i64,
        /// Configured ceiling.
        max_gap_ms: i64,
    },

    /// The operator reset lost the race against a concurrent window update.
    #[error("reset conflicted with a concurrent window update")]
    ResetConflict,

    /// The durable save point record has an unexpected shape.
    #[error("corrupt save point record: expected 8 bytes, got {len}")]
    CorruptSavePoint {
        /// Length of the record found in the store.
        len: usize,
    },

    /// The retry budget was exhausted without producing a timestamp.
    #[error("timestamp allocation unavailable after {retries} attempts")]
    Unavailable {
        /// Number of attempts made.
        retries: u32,
    },
}

/// Encodes a save point as the durable record: 8-byte big-endian
/// nanoseconds since the Unix epoch.
#[must_use]
#[allow(clippy::cast_sign_loss)] // save points are derived from non-negative clocks
pub fn encode_save_point(save_ms: i64) -> [u8; 8] {
    ((save_ms as u64) * 1_000_000).to_be_bytes()
}

/// Decodes a durable save point record into milliseconds.
///
/// The record carries nanosecond resolution; a non-integral millisecond is
/// rounded up so the recovered bound is never below what was persisted.
///
/// # Errors
///
/// Returns [`OracleError::CorruptSavePoint`] if the record is not exactly
/// 8 bytes.
#[allow(clippy::cast_possible_wrap)] // 2^64 ns / 10^6 fits in i64 milliseconds
pub fn decode_save_point(raw: &[u8]) -> Result<i64, OracleError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| OracleError::CorruptSavePoint { len: raw.len() })?;
    let ns = u64::from_be_bytes(bytes);
    Ok(ns.div_ceil(1_000_000) as i64)
}

/// The current allocation window: one physical millisecond plus its logical
/// counter.
///
/// Published by whole-object replacement; `logical` is the only field
/// mutated after publication, via atomic fetch-add. Racing adds on a retired
/// window are harmless: its returned values were already bounded by
/// `MAX_LOGICAL`, and any successor window carries a strictly greater
/// physical.
#[derive(Debug)]
struct TsoWindow {
    /// Physical milliseconds since the Unix epoch; zero means unarmed.
    physical: i64,
    /// Logical counter within `physical`.
    logical: AtomicI64,
}

impl TsoWindow {
    const fn unarmed() -> Self {
        Self {
            physical: 0,
            logical: AtomicI64::new(0),
        }
    }

    const fn armed(physical: i64) -> Self {
        Self {
            physical,
            logical: AtomicI64::new(0),
        }
    }

    const fn is_unarmed(&self) -> bool {
        self.physical == 0
    }
}

/// Leader-side timestamp allocator.
///
/// One oracle exists per server process, held by the enclosing service. It
/// is armed by [`sync`](Self::sync) when leadership is acquired and zeroed
/// by [`reset`](Self::reset) when it is lost; [`advance`](Self::advance)
/// runs on the background cadence in between.
pub struct TimestampOracle {
    config: OracleConfig,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn WallClock>,
    /// Current leadership handle; `None` outside a term.
    leadership: RwLock<Option<Arc<dyn Leadership>>>,
    /// Published allocation window.
    window: RwLock<Arc<TsoWindow>>,
    /// In-memory mirror of the durable save point, authoritative only after
    /// a successful save.
    last_saved_ms: AtomicI64,
    metrics: Option<OracleMetrics>,
}

impl std::fmt::Debug for TimestampOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampOracle")
            .field("config", &self.config)
            .field("last_saved_ms", &self.last_saved_ms)
            .finish_non_exhaustive()
    }
}

impl TimestampOracle {
    /// Creates an unarmed oracle.
    #[must_use]
    pub fn new(
        config: OracleConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn WallClock>,
        metrics: Option<OracleMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            leadership: RwLock::new(None),
            window: RwLock::new(Arc::new(TsoWindow::unarmed())),
            last_saved_ms: AtomicI64::new(0),
            metrics,
        }
    }

    /// Returns the oracle configuration.
    #[must_use]
    pub const fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Key of the durable save point record.
    #[must_use]
    pub fn timestamp_key(&self) -> String {
        format!("{}/timestamp", self.config.root_path)
    }

    /// Key under which the election collaborator records the leader.
    #[must_use]
    pub fn leader_key(&self) -> String {
        format!("{}/leader", self.config.root_path)
    }

    fn record_event(&self, event: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.event(event);
        }
    }

    fn set_physical_metric(&self, physical_ms: i64) {
        if let Some(metrics) = &self.metrics {
            metrics.set_physical_ms(physical_ms);
        }
    }

    fn leadership(&self) -> Option<Arc<dyn Leadership>> {
        self.leadership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_leadership(&self, leadership: Option<Arc<dyn Leadership>>) {
        *self
            .leadership
            .write()
            .unwrap_or_else(PoisonError::into_inner) = leadership;
    }

    fn leader_check(&self) -> bool {
        self.leadership().is_some_and(|l| l.check())
    }

    fn current(&self) -> Arc<TsoWindow> {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, window: Arc<TsoWindow>) {
        let physical = window.physical;
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = window;
        self.set_physical_metric(physical);
    }

    async fn read_save_point(&self) -> Result<i64, OracleError> {
        let key = self.timestamp_key();
        let data = tokio::time::timeout(self.config.store_deadline, self.store.read(&key))
            .await
            .map_err(|_| StoreError::Deadline(self.config.store_deadline))??;
        match data {
            None => Ok(0),
            Some(raw) => decode_save_point(&raw),
        }
    }

    /// Extends the durable save point to `save_ms`, conditioned on this
    /// member still holding the leader key.
    ///
    /// The in-memory mirror is updated only after the store commits; a
    /// failed predicate or a store error leaves it untouched.
    async fn save_window(&self, save_ms: i64) -> Result<(), OracleError> {
        let leadership = self.leadership().ok_or(OracleError::NotLeader)?;
        let key = self.timestamp_key();
        let precondition = Precondition::ValueEquals {
            key: self.leader_key(),
            expected: leadership.member().as_bytes().to_vec(),
        };

        let outcome = tokio::time::timeout(
            self.config.store_deadline,
            self.store
                .conditional_put(&key, encode_save_point(save_ms).to_vec(), precondition),
        )
        .await
        .map_err(|_| StoreError::Deadline(self.config.store_deadline))??;

        match outcome {
            PutOutcome::Committed => {
                self.last_saved_ms.store(save_ms, Ordering::SeqCst);
                Ok(())
            },
            PutOutcome::PredicateFailed => {
                warn!(save_ms, "save point write rejected, leadership lost");
                Err(OracleError::NotLeader)
            },
        }
    }

    /// Bootstraps the window for a newly acquired leadership term.
    ///
    /// Loads the durable save point, corrects for a regressed local clock
    /// (the new physical always clears the saved point by at least the
    /// guard), persists the next save-ahead window, and only then publishes.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::NotLeader`] if the leader-conditional save is
    /// rejected, or a store error. In both cases no window is published.
    pub async fn sync(&self, leadership: Arc<dyn Leadership>) -> Result<(), OracleError> {
        self.record_event(events::SYNC);
        self.set_leadership(Some(leadership));

        let last = self.read_save_point().await?;

        let mut next = self.clock.now_ms();
        if next - last < guard_ms() {
            // Clock regression relative to the saved point: allocation
            // resumes from the saved value instead.
            warn!(
                last,
                next, "system time may be incorrect, resuming from the saved point"
            );
            next = last + guard_ms();
        }

        let save = next + millis(&self.config.save_interval);
        if let Err(e) = self.save_window(save).await {
            self.record_event(events::ERR_SAVE_SYNC);
            return Err(e);
        }

        self.record_event(events::SYNC_OK);
        info!(last, next, save, "synchronized timestamp window");

        self.publish(Arc::new(TsoWindow::armed(next)));
        Ok(())
    }

    /// Periodic advance tick.
    ///
    /// Moves the physical time forward when the wall clock has caught up, or
    /// pre-emptively when the logical counter is more than half consumed,
    /// and extends the durable save point first whenever the move would
    /// otherwise close on it. Publishes only after a required save
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::NotLeader`] or a store error if the save
    /// fails; the previous window stays published (stale but safe).
    pub async fn advance(&self) -> Result<(), OracleError> {
        let prev = self.current();
        if prev.is_unarmed() {
            return Ok(());
        }

        self.record_event(events::SAVE);
        let now = self.clock.now_ms();
        let lag = now - prev.physical;

        if lag > 3 * millis(&self.config.update_step) {
            warn!(
                lag_ms = lag,
                prev_physical = prev.physical,
                now,
                "published physical lags the wall clock"
            );
            self.record_event(events::SLOW_SAVE);
        }
        if lag < 0 {
            warn!(lag_ms = lag, "system time runs behind the published physical");
            self.record_event(events::SYSTEM_TIME_SLOW);
        }

        let prev_logical = prev.logical.load(Ordering::SeqCst);
        let next = if lag > guard_ms() {
            now
        } else if prev_logical > MAX_LOGICAL / 2 {
            // Enough of the counter is gone that the next tick might not
            // arrive before exhaustion; roll the physical forward one step.
            warn!(prev_logical, "logical counter more than half consumed");
            prev.physical + 1
        } else {
            self.record_event(events::SKIP_SAVE);
            return Ok(());
        };

        // Publishing `next` is only safe while the save point clears it by
        // more than the guard.
        if self.last_saved_ms.load(Ordering::SeqCst) - next <= guard_ms() {
            let save = next + millis(&self.config.save_interval);
            if let Err(e) = self.save_window(save).await {
                self.record_event(events::ERR_SAVE_UPDATE);
                return Err(e);
            }
        }

        self.publish(Arc::new(TsoWindow::armed(next)));
        Ok(())
    }

    /// Zeroes the window and clears the leadership handle on leader loss.
    ///
    /// Subsequent allocations observe the unarmed sentinel and report
    /// [`OracleError::NotLeader`].
    pub fn reset(&self) {
        self.publish(Arc::new(TsoWindow::unarmed()));
        self.set_leadership(None);
        info!("timestamp window reset");
    }

    /// Operator-initiated forward jump to one millisecond past the packed
    /// timestamp `raw`.
    ///
    /// Accepted only while leading, and only if the jump is large enough to
    /// preserve strict forward progress yet below the configured ceiling.
    ///
    /// # Errors
    ///
    /// [`OracleError::ResetTooSmall`] / [`OracleError::ResetTooLarge`] if
    /// the jump falls outside the acceptance band,
    /// [`OracleError::ResetConflict`] if the window moved concurrently,
    /// [`OracleError::NotLeader`] or a store error if the save fails.
    pub async fn reset_user_timestamp(&self, raw: u64) -> Result<(), OracleError> {
        if !self.leader_check() {
            self.record_event(events::ERR_LEASE_RESET);
            return Err(OracleError::NotLeader);
        }

        let target = Timestamp::decompose(raw);
        let next = target.physical + 1;
        let prev = self.current();
        let gap = next - prev.physical;

        if gap <= 3 * guard_ms() {
            self.record_event(events::ERR_RESET_SMALL);
            return Err(OracleError::ResetTooSmall { gap_ms: gap });
        }
        let max_gap_ms = millis(&self.config.max_reset_gap);
        if gap >= max_gap_ms {
            self.record_event(events::ERR_RESET_LARGE);
            return Err(OracleError::ResetTooLarge {
                gap_ms: gap,
                max_gap_ms,
            });
        }

        let save = next + millis(&self.config.save_interval);
        if let Err(e) = self.save_window(save).await {
            self.record_event(events::ERR_SAVE_RESET);
            return Err(e);
        }

        // Compare-and-swap against the window observed above; a concurrent
        // advance or sync wins the race.
        {
            let mut slot = self.window.write().unwrap_or_else(PoisonError::into_inner);
            if !Arc::ptr_eq(&slot, &prev) {
                return Err(OracleError::ResetConflict);
            }
            *slot = Arc::new(TsoWindow::armed(next));
        }
        self.set_physical_metric(next);

        self.record_event(events::RESET_TSO_OK);
        info!(next, "applied operator timestamp reset");
        Ok(())
    }

    /// Allocates `count` contiguous timestamps and returns the highest.
    ///
    /// The caller derives the range as `logical - count + 1 ..= logical` at
    /// the returned physical. The hot path performs one window load and one
    /// fetch-add plus the leadership predicate; it never blocks on IO.
    ///
    /// # Errors
    ///
    /// [`OracleError::InvalidCount`] for a zero count,
    /// [`OracleError::NotLeader`] when unarmed without leadership or when
    /// leadership is lost mid-allocation, [`OracleError::Unavailable`] after
    /// the retry budget is exhausted.
    pub async fn allocate(&self, count: u32) -> Result<Timestamp, OracleError> {
        if count == 0 {
            return Err(OracleError::InvalidCount);
        }

        for attempt in 0..self.config.max_retry_count {
            let current = self.current();

            if current.is_unarmed() {
                if self.leader_check() {
                    // Leader, but sync has not published yet.
                    debug!(attempt, "window not armed yet, waiting for sync");
                    tokio::time::sleep(self.config.sync_wait).await;
                    continue;
                }
                return Err(OracleError::NotLeader);
            }

            let logical =
                current.logical.fetch_add(i64::from(count), Ordering::SeqCst) + i64::from(count);
            if logical >= MAX_LOGICAL {
                warn!(
                    logical,
                    attempt, "logical counter exhausted within the current millisecond"
                );
                self.record_event(events::LOGICAL_OVERFLOW);
                // Give the advance tick a chance to roll the physical.
                tokio::time::sleep(self.config.update_step).await;
                continue;
            }

            // The save could have been rejected mid-allocation elsewhere;
            // re-check before handing the timestamp out.
            if !self.leader_check() {
                return Err(OracleError::NotLeader);
            }

            return Ok(Timestamp::new(current.physical, logical));
        }

        Err(OracleError::Unavailable {
            retries: self.config.max_retry_count,
        })
    }
}

#[allow(clippy::cast_possible_truncation)] // config durations are far below i64::MAX ms
fn millis(duration: &std::time::Duration) -> i64 {
    duration.as_millis() as i64
}

fn guard_ms() -> i64 {
    millis(&UPDATE_TIMESTAMP_GUARD)
}
