//! Signal lifecycle: what happens to a signal after it is emitted
//!
//! PENDING -> TRIGGERED | MISSED | EXPIRED | CANCELLED | EXECUTED (market fill)
//! TRIGGERED -> EXECUTED | CANCELLED | EXPIRED
//!
//! EXECUTED, CANCELLED, EXPIRED and MISSED are terminal. Terminal signals move
//! to a bounded history used for statistics.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::TradingSignal;
use crate::error::LifecycleError;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Triggered,
    Executed,
    Cancelled,
    Expired,
    Missed,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Expired | Self::Missed)
    }

    /// Allowed transitions. Nothing ever returns to PENDING.
    pub fn can_transition(&self, to: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, to),
            (Pending, Triggered | Missed | Expired | Cancelled | Executed)
                | (Triggered, Executed | Cancelled | Expired)
        )
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Triggered => write!(f, "TRIGGERED"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Missed => write!(f, "MISSED"),
        }
    }
}

/// How the entry would be worked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Entry better than the current price: wait for price to come back
    Limit,
    /// Entry beyond the current price in the trade direction: wait for a push
    Stop,
}

impl OrderKind {
    pub fn infer(direction: Direction, entry: f64, price: f64) -> Self {
        if (entry - price) * direction.sign() > 0.0 {
            OrderKind::Stop
        } else {
            OrderKind::Limit
        }
    }

    /// Price has reached the entry from the expected side
    fn triggered(&self, direction: Direction, entry: f64, price: f64) -> bool {
        let beyond = (price - entry) * direction.sign();
        match self {
            OrderKind::Stop => beyond >= 0.0,
            OrderKind::Limit => beyond <= 0.0,
        }
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Limit => write!(f, "LIMIT"),
            OrderKind::Stop => write!(f, "STOP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidityMode {
    Aggressive,
    Normal,
    Patient,
    /// Resting limit order
    Limit,
}

/// Configuration for the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub aggressive_confidence: f64,
    pub aggressive_quality: f64,
    pub aggressive_minutes: i64,
    pub normal_confidence: f64,
    pub normal_minutes: i64,
    pub patient_minutes: i64,
    pub limit_minutes: i64,
    /// MISSED once price is this many ATRs further from entry than at creation
    pub missed_atr: f64,
    pub history_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            aggressive_confidence: 75.0,
            aggressive_quality: 75.0,
            aggressive_minutes: 15,
            normal_confidence: 60.0,
            normal_minutes: 30,
            patient_minutes: 60,
            limit_minutes: 240,
            missed_atr: 1.0,
            history_size: 100,
        }
    }
}

impl LifecycleConfig {
    pub fn validity(&self, kind: OrderKind, confidence: f64, quality: f64) -> (ValidityMode, Duration) {
        if kind == OrderKind::Limit {
            return (ValidityMode::Limit, Duration::minutes(self.limit_minutes));
        }
        if confidence >= self.aggressive_confidence && quality >= self.aggressive_quality {
            (ValidityMode::Aggressive, Duration::minutes(self.aggressive_minutes))
        } else if confidence >= self.normal_confidence {
            (ValidityMode::Normal, Duration::minutes(self.normal_minutes))
        } else {
            (ValidityMode::Patient, Duration::minutes(self.patient_minutes))
        }
    }
}

/// A signal under lifecycle management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedSignal {
    pub id: Uuid,
    pub signal: TradingSignal,
    pub status: SignalStatus,
    pub order_kind: OrderKind,
    pub validity: ValidityMode,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub price_at_creation: f64,
    /// |price - entry| at creation
    pub initial_distance: f64,
    /// Latest |price - entry|, in price and ATR units
    pub distance: f64,
    pub distance_atr: f64,
    pub remaining_seconds: i64,
    pub triggered_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ManagedSignal {
    fn new(signal: TradingSignal, price: f64, now: DateTime<Utc>, config: &LifecycleConfig) -> Self {
        let order_kind = OrderKind::infer(signal.direction, signal.entry, price);
        let (validity, window) = config.validity(order_kind, signal.confidence, signal.quality);
        let distance = (price - signal.entry).abs();
        let distance_atr = if signal.atr > 0.0 { distance / signal.atr } else { 0.0 };
        Self {
            id: Uuid::new_v4(),
            status: SignalStatus::Pending,
            order_kind,
            validity,
            created_at: now,
            expires_at: now + window,
            price_at_creation: price,
            initial_distance: distance,
            distance,
            distance_atr,
            remaining_seconds: window.num_seconds(),
            triggered_at: None,
            executed_at: None,
            execution_price: None,
            closed_at: None,
            signal,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// One status change produced by an update or an explicit call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: Uuid,
    pub from: SignalStatus,
    pub to: SignalStatus,
    pub at: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub active: usize,
    pub completed: usize,
    pub executed: usize,
    pub cancelled: usize,
    pub expired: usize,
    pub missed: usize,
    pub execution_rate: f64,
    pub expiry_rate: f64,
    pub miss_rate: f64,
    pub avg_confidence: f64,
    pub avg_quality: f64,
}

/// Owns the active signals of one instrument and the history of finished ones
#[derive(Debug, Clone)]
pub struct SignalLifecycleManager {
    config: LifecycleConfig,
    active: Vec<ManagedSignal>,
    history: VecDeque<ManagedSignal>,
}

impl SignalLifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            active: Vec::new(),
            history: VecDeque::new(),
        }
    }

    pub fn create(&mut self, signal: TradingSignal, price: f64, now: DateTime<Utc>) -> &ManagedSignal {
        let managed = ManagedSignal::new(signal, price, now, &self.config);
        tracing::info!(
            "Signal {} created: {} {} {:.5} ({:?}, expires {})",
            managed.id, managed.signal.direction, managed.order_kind, managed.signal.entry,
            managed.validity, managed.expires_at
        );
        self.active.push(managed);
        &self.active[self.active.len() - 1]
    }

    /// Recompute distances and remaining time, then apply expiry, trigger and
    /// missed rules. `atr` falls back to the signal's ATR when not positive.
    pub fn update(&mut self, price: f64, atr: f64, now: DateTime<Utc>) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for managed in &mut self.active {
            let signal = &managed.signal;
            let atr = if atr.is_finite() && atr > 0.0 { atr } else { signal.atr };
            managed.distance = (price - signal.entry).abs();
            managed.distance_atr = if atr > 0.0 { managed.distance / atr } else { 0.0 };
            managed.remaining_seconds = (managed.expires_at - now).num_seconds().max(0);

            let next = if now >= managed.expires_at {
                Some(SignalStatus::Expired)
            } else if managed.status == SignalStatus::Pending {
                if managed.order_kind.triggered(signal.direction, signal.entry, price) {
                    Some(SignalStatus::Triggered)
                } else if atr > 0.0 && managed.distance - managed.initial_distance >= self.config.missed_atr * atr {
                    Some(SignalStatus::Missed)
                } else {
                    None
                }
            } else {
                None
            };

            if let Some(to) = next {
                if let Some(change) = apply(managed, to, price, now) {
                    changes.push(change);
                }
            }
        }
        self.archive();
        changes
    }

    /// Record a fill. Allowed from PENDING (market fill) and TRIGGERED.
    pub fn mark_executed(&mut self, id: Uuid, price: f64, now: DateTime<Utc>) -> Result<StatusChange, LifecycleError> {
        let change = self.transition(id, SignalStatus::Executed, price, now)?;
        if let Some(m) = self.history.iter_mut().rev().find(|m| m.id == id) {
            m.executed_at = Some(now);
            m.execution_price = Some(price);
        }
        Ok(change)
    }

    pub fn cancel(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<StatusChange, LifecycleError> {
        let price = self.get(id).map(|m| m.signal.entry).unwrap_or(f64::NAN);
        self.transition(id, SignalStatus::Cancelled, price, now)
    }

    fn transition(
        &mut self,
        id: Uuid,
        to: SignalStatus,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, LifecycleError> {
        let Some(managed) = self.active.iter_mut().find(|m| m.id == id) else {
            return Err(match self.history.iter().find(|m| m.id == id) {
                Some(done) => LifecycleError::IllegalTransition {
                    id,
                    from: done.status.to_string(),
                    to: to.to_string(),
                },
                None => LifecycleError::UnknownSignal(id),
            });
        };
        let change = apply(managed, to, price, now).ok_or_else(|| LifecycleError::IllegalTransition {
            id,
            from: managed.status.to_string(),
            to: to.to_string(),
        })?;
        self.archive();
        Ok(change)
    }

    /// Move terminal signals into the bounded history
    fn archive(&mut self) {
        let (done, active): (Vec<_>, Vec<_>) = self.active.drain(..).partition(|m| m.status.is_terminal());
        self.active = active;
        for managed in done {
            if self.history.len() >= self.config.history_size.max(1) {
                self.history.pop_front();
            }
            self.history.push_back(managed);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&ManagedSignal> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|m| m.id == id)
    }

    pub fn active(&self) -> &[ManagedSignal] {
        &self.active
    }

    pub fn history(&self) -> impl Iterator<Item = &ManagedSignal> {
        self.history.iter()
    }

    pub fn stats(&self) -> LifecycleStats {
        let completed = self.history.len();
        let count = |status: SignalStatus| self.history.iter().filter(|m| m.status == status).count();
        let rate = |n: usize| if completed > 0 { n as f64 / completed as f64 * 100.0 } else { 0.0 };
        let average = |f: fn(&ManagedSignal) -> f64| {
            if completed > 0 {
                self.history.iter().map(f).sum::<f64>() / completed as f64
            } else {
                0.0
            }
        };
        let executed = count(SignalStatus::Executed);
        let expired = count(SignalStatus::Expired);
        let missed = count(SignalStatus::Missed);
        LifecycleStats {
            active: self.active.len(),
            completed,
            executed,
            cancelled: count(SignalStatus::Cancelled),
            expired,
            missed,
            execution_rate: rate(executed),
            expiry_rate: rate(expired),
            miss_rate: rate(missed),
            avg_confidence: average(|m| m.signal.confidence),
            avg_quality: average(|m| m.signal.quality),
        }
    }
}

impl Default for SignalLifecycleManager {
    fn default() -> Self {
        Self::new(LifecycleConfig::default())
    }
}

/// Apply a legal transition; `None` if `to` is not reachable from the current status
fn apply(managed: &mut ManagedSignal, to: SignalStatus, price: f64, now: DateTime<Utc>) -> Option<StatusChange> {
    let from = managed.status;
    if !from.can_transition(to) {
        return None;
    }
    managed.status = to;
    match to {
        SignalStatus::Triggered => managed.triggered_at = Some(now),
        s if s.is_terminal() => managed.closed_at = Some(now),
        _ => {}
    }
    tracing::info!(
        "Signal {} {} -> {} @ {:.5} ({} {})",
        managed.id, from, to, price, managed.signal.direction, managed.signal.symbol
    );
    Some(StatusChange { id: managed.id, from, to, at: now, price })
}
