// =============================================================================
// PnL attribution — regime x alpha x hour x symbol
// =============================================================================
//
// Blended PnL lies. Every closed trade is attributed exactly once against
// its (regime, alpha, UTC hour, symbol) key so that decaying combinations
// show up as themselves, not as noise in an aggregate. Profit factor and
// expectancy are always derived from the stored sums — they are never stored
// as independent fields that could drift apart.
//
// The CSV file is the export surface: one row appended per closed trade plus
// a periodic full rewrite of the aggregate table.
// =============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::risk::Regime;

// ---------------------------------------------------------------------------
// Key & stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AttributionKey {
    pub symbol: String,
    pub regime: String,
    pub alpha: String,
    pub utc_hour: u8,
}

impl AttributionKey {
    pub fn new(symbol: &str, regime: Regime, alpha: &str, utc_hour: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            regime: regime.to_string(),
            alpha: alpha.to_string(),
            utc_hour: utc_hour as u8,
        }
    }
}

/// One closed trade, raw truth.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub key: AttributionKey,
    pub gross_pnl: f64,
    pub fees: f64,
    pub slippage: f64,
    pub hold_sec: f64,
}

impl TradeRecord {
    pub fn net_pnl(&self) -> f64 {
        self.gross_pnl - self.fees - self.slippage
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyStats {
    pub trades: u32,
    pub wins: u32,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub fees: f64,
    pub slippage: f64,
    pub total_hold_sec: f64,
    pub total_win_pnl: f64,
    /// Absolute value of losing-trade PnL.
    pub total_loss_pnl: f64,
}

impl KeyStats {
    fn record(&mut self, trade: &TradeRecord) {
        let net = trade.net_pnl();
        self.trades += 1;
        self.gross_pnl += trade.gross_pnl;
        self.net_pnl += net;
        self.fees += trade.fees;
        self.slippage += trade.slippage;
        self.total_hold_sec += trade.hold_sec;

        if net > 0.0 {
            self.wins += 1;
            self.total_win_pnl += net;
        } else {
            self.total_loss_pnl += net.abs();
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades > 0 {
            self.wins as f64 / self.trades as f64
        } else {
            0.0
        }
    }

    pub fn avg_hold_sec(&self) -> f64 {
        if self.trades > 0 {
            self.total_hold_sec / self.trades as f64
        } else {
            0.0
        }
    }

    /// Gross wins over gross losses, capped when lossless.
    pub fn profit_factor(&self) -> f64 {
        if self.total_loss_pnl <= 0.0 {
            if self.total_win_pnl > 0.0 {
                999.0
            } else {
                0.0
            }
        } else {
            self.total_win_pnl / self.total_loss_pnl
        }
    }

    /// Expected net value per trade.
    pub fn expectancy(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        let wr = self.win_rate();
        let avg_win = if self.wins > 0 {
            self.total_win_pnl / self.wins as f64
        } else {
            0.0
        };
        let losses = self.trades - self.wins;
        let avg_loss = if losses > 0 {
            self.total_loss_pnl / losses as f64
        } else {
            0.0
        };
        wr * avg_win - (1.0 - wr) * avg_loss
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

const CSV_HEADER: &str =
    "SYMBOL,REGIME,ALPHA,HOUR,TRADES,WINS,WINRATE,GROSS_PNL,NET_PNL,FEES,SLIPPAGE,AVG_HOLD_SEC";

pub struct AttributionTracker {
    table: Mutex<BTreeMap<AttributionKey, KeyStats>>,
    csv_path: PathBuf,
}

impl AttributionTracker {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            table: Mutex::new(BTreeMap::new()),
            csv_path: csv_path.into(),
        }
    }

    /// Record a closed trade: update the aggregate and append its row.
    pub fn record_trade(&self, trade: &TradeRecord) {
        {
            let mut table = self.table.lock();
            table.entry(trade.key.clone()).or_default().record(trade);
        }
        if let Err(e) = self.append_row(trade) {
            warn!(error = %e, "attribution CSV append failed");
        }
    }

    fn append_row(&self, trade: &TradeRecord) -> std::io::Result<()> {
        let exists = self.csv_path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)?;
        if !exists {
            writeln!(file, "{CSV_HEADER}")?;
        }

        let stats = {
            let table = self.table.lock();
            table.get(&trade.key).cloned().unwrap_or_default()
        };
        writeln!(file, "{}", Self::format_row(&trade.key, &stats))
    }

    fn format_row(key: &AttributionKey, s: &KeyStats) -> String {
        format!(
            "{},{},{},{},{},{},{:.4},{:.2},{:.2},{:.2},{:.2},{:.1}",
            key.symbol,
            key.regime,
            key.alpha,
            key.utc_hour,
            s.trades,
            s.wins,
            s.win_rate(),
            s.gross_pnl,
            s.net_pnl,
            s.fees,
            s.slippage,
            s.avg_hold_sec()
        )
    }

    /// Periodic full rewrite: one row per key, current aggregates.
    pub fn rewrite_csv(&self) -> std::io::Result<()> {
        let table = self.table.lock();
        let tmp = self.csv_path.with_extension("csv.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            writeln!(file, "{CSV_HEADER}")?;
            for (key, stats) in table.iter() {
                writeln!(file, "{}", Self::format_row(key, stats))?;
            }
        }
        std::fs::rename(&tmp, &self.csv_path)
    }

    pub fn stats_for(&self, key: &AttributionKey) -> Option<KeyStats> {
        self.table.lock().get(key).cloned()
    }

    pub fn table_snapshot(&self) -> Vec<(AttributionKey, KeyStats)> {
        self.table
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
