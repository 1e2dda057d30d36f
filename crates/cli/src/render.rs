//! Console rendering of the price table

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use pricewatch_core::PriceTableEntry;
use pricewatch_feed::PriceTable;

const RULE: &str = "-----------------------------------------------------------------------------------------";

/// Format a snapshot as a fixed-width table.
pub fn format_table(entries: &[PriceTableEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "{:<20} {:<10} {:>18} {:>8}  {}",
        "SOURCE", "INSTRUMENT", "PRICE", "UPDATES", "LAST UPDATE"
    );
    let _ = writeln!(out, "{}", RULE);

    for entry in entries {
        let _ = writeln!(
            out,
            "{:<20} {:<10} {:>18} {:>8}  {}",
            entry.source,
            entry.instrument,
            entry.price.normalize().to_string(),
            entry.update_count,
            entry.last_update.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
        );
    }

    let _ = writeln!(out, "{}", RULE);
    out
}

/// Redraw the table whenever the update counter moves, at most once per
/// `min_interval`, until `shutdown` flips or the aggregator goes away.
pub async fn render_loop(
    table: Arc<RwLock<PriceTable>>,
    mut updates: watch::Receiver<u64>,
    min_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }

        let snapshot = table.read().snapshot();
        let frame = format_table(&snapshot);

        {
            let mut stdout = std::io::stdout().lock();
            // clear screen, cursor home
            let _ = write!(stdout, "\x1B[2J\x1B[1;1H{}", frame);
            let _ = stdout.flush();
        }

        debug!("Rendered {} prices", snapshot.len());
        tokio::time::sleep(min_interval).await;
    }
}
