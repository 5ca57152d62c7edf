//! Canonical symbol form
//!
//! Downstream peers name instruments the way their venue does ("BTC-PERP", "SOL/USD").
//! The relay keys every subscription and every tick by one canonical form: the bare
//! uppercase base asset ("BTC", "SOL").

/// Venue and quote suffixes stripped during normalization
pub const KNOWN_SUFFIXES: &[&str] = &[
    "-PERP", "_PERP", "/USDC", "-USDC", "/USDT", "-USDT", "/USD", "-USD",
];

/// Normalize a raw symbol to its canonical form.
///
/// Returns `None` when nothing is left after trimming and suffix removal.
pub fn normalize(raw: &str) -> Option<String> {
    let mut symbol = raw.trim().to_ascii_uppercase();

    // "BTC-PERP/USD" style names carry more than one suffix
    loop {
        let stripped = KNOWN_SUFFIXES
            .iter()
            .find_map(|suffix| symbol.strip_suffix(suffix).map(str::to_string));
        match stripped {
            Some(shorter) => symbol = shorter,
            None => break,
        }
    }

    let symbol = symbol.trim().to_string();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}
