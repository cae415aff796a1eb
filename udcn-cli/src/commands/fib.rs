//! `udcn fib show` — inspect the forwarding table.

use anyhow::Result;
use log::info;

/// Shows FIB entries.
///
/// There is no control RPC for listing the FIB (spec.md §6 names only
/// `ping`/`reg/self`/`newface`/`prefixreg`); adding over-the-wire read
/// access to the table is out of scope, so this prints guidance instead of
/// live data.
pub async fn show() -> Result<()> {
    info!("fib show requested");
    println!("FIB listing is not exposed over the control protocol in this build.");
    println!("Register entries with:");
    println!("  udcn prefixreg <prefix> <face> --flags <flags> --lifetime <seconds>");
    Ok(())
}
