// =============================================================================
// Order lifecycle manager — client-side order state machine
// =============================================================================
//
// One `ManagedOrder` per client id, strictly forward along
//
//   Idle → Submitted → Acked → (Partial* → Filled | Cancelled | Rejected)
//
// Any venue update that would move a state backward is a fatal invariant
// violation — it means the venue and our book disagree about reality, and
// trading on top of that is worse than stopping. Receiving the same update
// twice is a no-op. Terminal states emit a fill report when any quantity
// executed and free the client id.
//
// The venue behind the manager is a trait object: live adapter, mock, or the
// shadow executor. Only the implementation knows wire details.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::types::{OrderKind, Side};

// ---------------------------------------------------------------------------
// Order model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderState {
    Idle,
    Submitted,
    Acked,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    /// Rank along the permitted partial order. Partial repeats in place.
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Submitted => 1,
            Self::Acked => 2,
            Self::Partial => 3,
            Self::Filled | Self::Cancelled | Self::Rejected => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Whether `self → next` is a legal move.
    fn allows(self, next: Self) -> bool {
        if self == next {
            // Repeated Partial updates are legal; repeated terminal or
            // in-flight states are idempotent no-ops handled by the caller.
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Submitted => "SUBMITTED",
            Self::Acked => "ACKED",
            Self::Partial => "PARTIAL",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// Outbound order request handed to the venue.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub client_id: String,
    pub symbol: String,
    pub symbol_hash: u32,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub kind: OrderKind,
    pub is_maker: bool,
    /// Mid price when the order was submitted; baseline for slippage and
    /// spread-capture accounting.
    pub mid_at_submit: f64,
    pub quoted_spread_bps: f64,
    /// Causal parent (the decision event that produced this order).
    pub parent_event_id: u64,
}

/// Venue callback payload.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub client_id: String,
    pub state: OrderState,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagedOrder {
    pub client_id: String,
    pub symbol: String,
    pub symbol_hash: u32,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub kind: OrderKind,
    pub is_maker: bool,
    pub state: OrderState,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
    pub mid_at_submit: f64,
    pub quoted_spread_bps: f64,
    pub submit_ts_ns: u64,
    pub ack_ts_ns: u64,
    pub terminal_ts_ns: u64,
    #[serde(skip)]
    pub parent_event_id: u64,
}

/// Emitted when a terminal order executed any quantity. Carries everything
/// the slippage governor, spread-capture tracker, and position book need.
#[derive(Debug, Clone)]
pub struct FillReport {
    pub client_id: String,
    pub symbol: String,
    pub symbol_hash: u32,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub is_maker: bool,
    pub mid_at_submit: f64,
    pub quoted_spread_bps: f64,
    pub submit_ts_ns: u64,
    pub ts_ns: u64,
    pub parent_event_id: u64,
}

// ---------------------------------------------------------------------------
// Venue boundary
// ---------------------------------------------------------------------------

/// The capability boundary to the outside world. Implementations: the live
/// venue adapter, the in-process mock, the shadow executor.
pub trait Venue: Send + Sync {
    fn name(&self) -> &str;
    fn send_order(&self, req: &OrderRequest) -> EngineResult<()>;
    fn cancel_order(&self, client_id: &str) -> EngineResult<()>;
}

/// Mock venue: accepts everything, acks immediately via the update queue,
/// fills at the requested price. Used in tests and Live-mode dry runs.
#[derive(Default)]
pub struct MockVenue {
    pending: Mutex<Vec<OrderUpdate>>,
}

impl MockVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the synthesized venue updates.
    pub fn drain_updates(&self) -> Vec<OrderUpdate> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl Venue for MockVenue {
    fn name(&self) -> &str {
        "mock"
    }

    fn send_order(&self, req: &OrderRequest) -> EngineResult<()> {
        let mut pending = self.pending.lock();
        pending.push(OrderUpdate {
            client_id: req.client_id.clone(),
            state: OrderState::Acked,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            is_final: false,
        });
        pending.push(OrderUpdate {
            client_id: req.client_id.clone(),
            state: OrderState::Filled,
            filled_qty: req.qty,
            avg_fill_price: req.price,
            is_final: true,
        });
        Ok(())
    }

    fn cancel_order(&self, client_id: &str) -> EngineResult<()> {
        self.pending.lock().push(OrderUpdate {
            client_id: client_id.to_string(),
            state: OrderState::Cancelled,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            is_final: true,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct OrderManager {
    venue: std::sync::Arc<dyn Venue>,
    live: HashMap<String, ManagedOrder>,
    /// Ack timeout for Submitted orders, physics-dependent.
    ack_timeout_ns: u64,
}

impl OrderManager {
    pub fn new(venue: std::sync::Arc<dyn Venue>, ack_timeout_ns: u64) -> Self {
        Self {
            venue,
            live: HashMap::new(),
            ack_timeout_ns,
        }
    }

    pub fn set_ack_timeout_ns(&mut self, ack_timeout_ns: u64) {
        self.ack_timeout_ns = ack_timeout_ns;
    }

    /// Submit a new order: Idle → Submitted, then hand it to the venue.
    pub fn submit(&mut self, req: OrderRequest, now_ns: u64) -> EngineResult<()> {
        if self.live.contains_key(&req.client_id) {
            return Err(EngineError::Invariant(format!(
                "client id {} already live",
                req.client_id
            )));
        }

        let order = ManagedOrder {
            client_id: req.client_id.clone(),
            symbol: req.symbol.clone(),
            symbol_hash: req.symbol_hash,
            side: req.side,
            qty: req.qty,
            price: req.price,
            kind: req.kind,
            is_maker: req.is_maker,
            state: OrderState::Submitted,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            mid_at_submit: req.mid_at_submit,
            quoted_spread_bps: req.quoted_spread_bps,
            submit_ts_ns: now_ns,
            ack_ts_ns: 0,
            terminal_ts_ns: 0,
            parent_event_id: req.parent_event_id,
        };

        info!(
            client_id = %req.client_id,
            symbol = %req.symbol,
            side = %req.side,
            qty = req.qty,
            price = req.price,
            kind = %req.kind,
            "order submitted"
        );

        self.live.insert(req.client_id.clone(), order);
        self.venue.send_order(&req)
    }

    /// Apply a venue update. Duplicate deliveries are no-ops; regressions
    /// are fatal. Terminal updates with executed quantity yield a
    /// `FillReport`.
    pub fn on_venue_update(
        &mut self,
        update: &OrderUpdate,
        now_ns: u64,
    ) -> EngineResult<Option<FillReport>> {
        let Some(order) = self.live.get_mut(&update.client_id) else {
            // Late duplicate for an already-freed id: idempotent no-op.
            debug!(client_id = %update.client_id, "update for unknown order ignored");
            return Ok(None);
        };

        // Exact duplicate: no-op.
        if update.state == order.state
            && (update.filled_qty - order.filled_qty).abs() < f64::EPSILON
        {
            return Ok(None);
        }

        if !order.state.allows(update.state) {
            return Err(EngineError::Invariant(format!(
                "order {} state regression {} -> {}",
                order.client_id, order.state, update.state
            )));
        }

        // A shrinking filled quantity is also a regression.
        if update.filled_qty < order.filled_qty {
            return Err(EngineError::Invariant(format!(
                "order {} filled qty regression {} -> {}",
                order.client_id, order.filled_qty, update.filled_qty
            )));
        }

        order.state = update.state;
        order.filled_qty = update.filled_qty;
        if update.avg_fill_price > 0.0 {
            order.avg_fill_price = update.avg_fill_price;
        }
        if update.state == OrderState::Acked && order.ack_ts_ns == 0 {
            order.ack_ts_ns = now_ns;
        }

        if update.state.is_terminal() {
            order.terminal_ts_ns = now_ns;
            let report = (order.filled_qty > 0.0).then(|| FillReport {
                client_id: order.client_id.clone(),
                symbol: order.symbol.clone(),
                symbol_hash: order.symbol_hash,
                side: order.side,
                qty: order.filled_qty,
                price: order.avg_fill_price,
                is_maker: order.is_maker,
                mid_at_submit: order.mid_at_submit,
                quoted_spread_bps: order.quoted_spread_bps,
                submit_ts_ns: order.submit_ts_ns,
                ts_ns: now_ns,
                parent_event_id: order.parent_event_id,
            });

            info!(
                client_id = %update.client_id,
                state = %update.state,
                filled = order.filled_qty,
                "order terminal"
            );

            // Terminal states free the client id.
            self.live.remove(&update.client_id);
            return Ok(report);
        }

        Ok(None)
    }

    /// Cancel Submitted orders that missed their ack deadline. Returns the
    /// cancelled client ids.
    pub fn expire_stale(&mut self, now_ns: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .live
            .values()
            .filter(|o| {
                o.state == OrderState::Submitted
                    && now_ns.saturating_sub(o.submit_ts_ns) > self.ack_timeout_ns
            })
            .map(|o| o.client_id.clone())
            .collect();

        for client_id in &stale {
            warn!(client_id = %client_id, "ack timeout, cancelling");
            if let Err(e) = self.venue.cancel_order(client_id) {
                warn!(client_id = %client_id, error = %e, "cancel failed");
            }
        }
        stale
    }

    /// Cancel every non-terminal order.
    pub fn kill_all(&mut self) {
        warn!(count = self.live.len(), "kill-all: cancelling every live order");
        for client_id in self.live.keys() {
            if let Err(e) = self.venue.cancel_order(client_id) {
                warn!(client_id = %client_id, error = %e, "cancel failed");
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn get(&self, client_id: &str) -> Option<&ManagedOrder> {
        self.live.get(client_id)
    }

    pub fn live_orders(&self) -> Vec<ManagedOrder> {
        self.live.values().cloned().collect()
    }
}
