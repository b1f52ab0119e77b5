use eyre::Context as _;

fn scale_for(decimals: u8) -> eyre::Result<u128> {
    10_u128
        .checked_pow(u32::from(decimals))
        .ok_or_else(|| eyre::eyre!("decimals too large"))
}

/// Parse a user-entered decimal amount ("1.5") into base units without floats.
pub fn parse_ui_amount(s: &str, decimals: u8) -> eyre::Result<u128> {
    let s = s.trim();
    if s.is_empty() || s == "." {
        eyre::bail!("empty amount");
    }
    if s.starts_with('-') {
        eyre::bail!("amount must be non-negative");
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        eyre::bail!("amount must be a decimal number: {s}");
    }
    if frac.len() > usize::from(decimals) {
        eyre::bail!("too many decimal places (max {decimals})");
    }

    let whole_v: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().context("parse whole part")?
    };
    let frac_v: u128 = if decimals == 0 {
        0
    } else {
        format!("{frac:0<width$}", width = usize::from(decimals))
            .parse()
            .context("parse fractional part")?
    };

    whole_v
        .checked_mul(scale_for(decimals)?)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))
}

/// Format a base-unit amount as a UI decimal string, trailing zeros trimmed.
///
/// - base=1500000000, decimals=9 => "1.5"
/// - base=1, decimals=9 => "0.000000001"
pub fn format_base_units(base: u128, decimals: u8) -> eyre::Result<String> {
    if decimals == 0 {
        return Ok(base.to_string());
    }
    let scale = scale_for(decimals)?;
    let whole = base / scale;
    let frac = base % scale;
    if frac == 0 {
        return Ok(whole.to_string());
    }
    let frac_s = format!("{frac:0width$}", width = usize::from(decimals));
    Ok(format!("{whole}.{}", frac_s.trim_end_matches('0')))
}

/// Parse a `0x`-prefixed hex quantity (JSON-RPC style).
pub fn parse_hex_quantity(s: &str) -> eyre::Result<u128> {
    let t = s.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .ok_or_else(|| eyre::eyre!("hex quantity must start with 0x: {t}"))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("parse hex quantity {t}"))
}
