// =============================================================================
// Position & PnL book — weighted-average cost with strict flip semantics
// =============================================================================
//
// Per symbol: net quantity, average price, realised and unrealised PnL.
//
//   - A fill in the direction of the position (or onto a flat book) blends
//     the average price quantity-weighted.
//   - A fill against the position realises PnL on the closed portion at the
//     OLD average price; any remainder flips the side and resets the average
//     to the fill price.
//   - `avg_price` is undefined while flat and must not be read there.
//
// Writes come from exactly one thread per symbol; reads are cloned
// snapshots. A non-finite PnL is an invariant violation and is returned as a
// fatal error, never swallowed.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Position {
    pub net_qty: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub open_ts_ns: u64,
}

impl Position {
    fn flat() -> Self {
        Self {
            net_qty: 0.0,
            avg_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            open_ts_ns: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_qty == 0.0
    }
}

/// What one fill did to the book, for attribution and risk feedback.
#[derive(Debug, Clone, Copy)]
pub struct FillEffect {
    /// Quantity that closed against the prior position.
    pub closed_qty: f64,
    /// Realised PnL added by this fill.
    pub realized_delta: f64,
    /// The position changed sign.
    pub flipped: bool,
    /// The position is now flat.
    pub now_flat: bool,
}

#[derive(Default)]
pub struct PositionBook {
    positions: RwLock<HashMap<u32, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fill. `is_buy` is the fill direction, `qty > 0`.
    pub fn on_fill(
        &self,
        symbol_hash: u32,
        is_buy: bool,
        qty: f64,
        price: f64,
        ts_ns: u64,
    ) -> EngineResult<FillEffect> {
        if !(qty > 0.0) || !price.is_finite() || price <= 0.0 {
            return Err(EngineError::Invariant(format!(
                "bad fill: qty={qty} price={price}"
            )));
        }

        let mut positions = self.positions.write();
        let pos = positions.entry(symbol_hash).or_insert_with(Position::flat);

        let signed_qty = if is_buy { qty } else { -qty };
        let prior_net = pos.net_qty;

        let mut effect = FillEffect {
            closed_qty: 0.0,
            realized_delta: 0.0,
            flipped: false,
            now_flat: false,
        };

        let same_direction = prior_net == 0.0 || (prior_net > 0.0) == is_buy;

        if same_direction {
            let new_abs = prior_net.abs() + qty;
            pos.avg_price = (pos.avg_price * prior_net.abs() + price * qty) / new_abs;
            pos.net_qty = prior_net + signed_qty;
            if prior_net == 0.0 {
                pos.open_ts_ns = ts_ns;
            }
        } else {
            let closed = qty.min(prior_net.abs());
            let realized = closed * (price - pos.avg_price) * prior_net.signum();
            pos.realized_pnl += realized;
            pos.net_qty = prior_net + signed_qty;

            effect.closed_qty = closed;
            effect.realized_delta = realized;

            if pos.net_qty == 0.0 {
                // Flat: avg_price is undefined from here on. Zero it so any
                // accidental read is loud in test assertions.
                pos.avg_price = 0.0;
                pos.unrealized_pnl = 0.0;
                pos.open_ts_ns = 0;
                effect.now_flat = true;
            } else if pos.net_qty.signum() != prior_net.signum() {
                // Remainder flips the side: the new leg opened at the fill
                // price.
                pos.avg_price = price;
                pos.open_ts_ns = ts_ns;
                effect.flipped = true;
            }
        }

        if !pos.realized_pnl.is_finite() || !pos.avg_price.is_finite() {
            return Err(EngineError::Invariant(format!(
                "position book produced non-finite state for {symbol_hash:#010x}"
            )));
        }

        debug!(
            symbol_hash,
            net_qty = pos.net_qty,
            avg_price = pos.avg_price,
            realized = pos.realized_pnl,
            closed = effect.closed_qty,
            "fill applied"
        );

        Ok(effect)
    }

    /// Recompute unrealised PnL against a fresh mark.
    pub fn mark_to_market(&self, symbol_hash: u32, mark: f64) {
        let mut positions = self.positions.write();
        if let Some(pos) = positions.get_mut(&symbol_hash) {
            if pos.net_qty != 0.0 {
                pos.unrealized_pnl = (mark - pos.avg_price) * pos.net_qty;
            }
        }
    }

    pub fn get(&self, symbol_hash: u32) -> Option<Position> {
        self.positions.read().get(&symbol_hash).copied()
    }

    pub fn realized_pnl(&self, symbol_hash: u32) -> f64 {
        self.positions
            .read()
            .get(&symbol_hash)
            .map_or(0.0, |p| p.realized_pnl)
    }

    /// Sum of |net_qty| across all symbols.
    pub fn total_exposure(&self) -> f64 {
        self.positions
            .read()
            .values()
            .map(|p| p.net_qty.abs())
            .sum()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.read().values().map(|p| p.realized_pnl).sum()
    }

    pub fn snapshot(&self) -> HashMap<u32, Position> {
        self.positions.read().clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const H: u32 = 42;

    #[test]
    fn extend_blends_weighted_average() {
        let book = PositionBook::new();
        book.on_fill(H, true, 1.0, 100.0, 1).unwrap();
        book.on_fill(H, true, 1.0, 110.0, 2).unwrap();
        let p = book.get(H).unwrap();
        assert!((p.net_qty - 2.0).abs() < 1e-12);
        assert!((p.avg_price - 105.0).abs() < 1e-12);
        assert!(p.realized_pnl.abs() < 1e-12);
    }

    #[test]
    fn reduce_realises_at_old_average() {
        let book = PositionBook::new();
        book.on_fill(H, true, 2.0, 100.0, 1).unwrap();
        let effect = book.on_fill(H, false, 1.0, 106.0, 2).unwrap();
        assert!((effect.closed_qty - 1.0).abs() < 1e-12);
        assert!((effect.realized_delta - 6.0).abs() < 1e-12);

        let p = book.get(H).unwrap();
        assert!((p.net_qty - 1.0).abs() < 1e-12);
        assert!((p.avg_price - 100.0).abs() < 1e-12);
        assert!((p.realized_pnl - 6.0).abs() < 1e-12);
    }

    #[test]
    fn short_side_realisation_sign() {
        let book = PositionBook::new();
        book.on_fill(H, false, 2.0, 100.0, 1).unwrap();
        // Buy back half lower: a short profits.
        let effect = book.on_fill(H, true, 1.0, 95.0, 2).unwrap();
        assert!((effect.realized_delta - 5.0).abs() < 1e-12);

        // Buy back the rest higher: a loss.
        let effect = book.on_fill(H, true, 1.0, 103.0, 3).unwrap();
        assert!((effect.realized_delta + 3.0).abs() < 1e-12);
        assert!(effect.now_flat);
        assert!((book.realized_pnl(H) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn flip_resets_average_to_fill_price() {
        let book = PositionBook::new();
        book.on_fill(H, true, 1.0, 100.0, 1).unwrap();
        // Sell 3 at 104: closes 1 (+4 realised), flips short 2 at 104.
        let effect = book.on_fill(H, false, 3.0, 104.0, 2).unwrap();
        assert!(effect.flipped);
        assert!((effect.closed_qty - 1.0).abs() < 1e-12);
        assert!((effect.realized_delta - 4.0).abs() < 1e-12);

        let p = book.get(H).unwrap();
        assert!((p.net_qty + 2.0).abs() < 1e-12);
        assert!((p.avg_price - 104.0).abs() < 1e-12);
    }

    #[test]
    fn external_sum_matches_book_realised() {
        // Property: summing per-fill realised deltas externally equals the
        // book's realised PnL within 1e-9 relative.
        let book = PositionBook::new();
        let fills = [
            (true, 2.0, 100.0),
            (true, 1.0, 101.0),
            (false, 1.5, 102.5),
            (false, 2.5, 99.0),
            (true, 1.0, 98.0),
            (true, 2.0, 100.5),
            (false, 2.0, 101.0),
        ];
        let mut external = 0.0;
        for (i, (is_buy, qty, price)) in fills.iter().enumerate() {
            let effect = book
                .on_fill(H, *is_buy, *qty, *price, i as u64 + 1)
                .unwrap();
            external += effect.realized_delta;
        }
        let book_pnl = book.realized_pnl(H);
        let denom = book_pnl.abs().max(1.0);
        assert!((external - book_pnl).abs() / denom < 1e-9);
    }

    #[test]
    fn double_size_equals_two_fills() {
        let a = PositionBook::new();
        a.on_fill(H, true, 1.0, 100.0, 1).unwrap();
        a.on_fill(H, true, 1.0, 100.0, 2).unwrap();
        a.on_fill(H, false, 2.0, 105.0, 3).unwrap();

        let b = PositionBook::new();
        b.on_fill(H, true, 2.0, 100.0, 1).unwrap();
        b.on_fill(H, false, 2.0, 105.0, 2).unwrap();

        assert!((a.realized_pnl(H) - b.realized_pnl(H)).abs() < 1e-9);
    }

    #[test]
    fn mark_to_market_updates_unrealised_only() {
        let book = PositionBook::new();
        book.on_fill(H, true, 2.0, 100.0, 1).unwrap();
        book.mark_to_market(H, 103.0);
        let p = book.get(H).unwrap();
        assert!((p.unrealized_pnl - 6.0).abs() < 1e-12);
        assert!(p.realized_pnl.abs() < 1e-12);

        // Marks on a flat book do nothing.
        book.on_fill(H, false, 2.0, 103.0, 2).unwrap();
        book.mark_to_market(H, 200.0);
        assert!(book.get(H).unwrap().unrealized_pnl.abs() < 1e-12);
    }

    #[test]
    fn exposure_sums_absolute_quantities() {
        let book = PositionBook::new();
        book.on_fill(1, true, 2.0, 100.0, 1).unwrap();
        book.on_fill(2, false, 3.0, 50.0, 2).unwrap();
        assert!((book.total_exposure() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn bad_fill_is_invariant_violation() {
        let book = PositionBook::new();
        assert!(book.on_fill(H, true, 0.0, 100.0, 1).is_err());
        assert!(book.on_fill(H, true, 1.0, f64::NAN, 1).is_err());
        assert!(book.on_fill(H, true, 1.0, -5.0, 1).is_err());
    }
}
