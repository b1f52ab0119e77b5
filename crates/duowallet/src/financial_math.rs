//! Float helpers for USD valuation.
//!
//! All `cast_precision_loss` / `float_arithmetic` lint expects live here so that the refresher
//! and the CLI stay lint-clean.

#![expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::float_arithmetic,
    reason = "dedicated float-math module; casts and arithmetic are intentional"
)]

/// Convert a token amount in base units to a USD value.
///
/// `base`     – raw amount (wei, lamports).
/// `decimals` – number of decimal places the token uses.
/// `price`    – USD price per **one whole** token.
pub fn token_base_to_usd(base: u128, decimals: u8, price: f64) -> f64 {
    let divisor = 10_f64.powi(i32::from(decimals));
    (base as f64 / divisor) * price
}

/// `$1,234.56` style rendering. Non-finite and negative inputs render as `$0.00`.
pub fn format_usd(v: f64) -> String {
    if !v.is_finite() || v <= 0.0_f64 {
        return "$0.00".to_owned();
    }
    let cents = (v * 100.0_f64).round() as u128;
    let whole = (cents / 100).to_string();
    let frac = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("${grouped}.{frac:02}")
}
