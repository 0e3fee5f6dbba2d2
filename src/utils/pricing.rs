/// Multiplier applied to plan prices for countries not listed below.
pub const DEFAULT_MULTIPLIER: f64 = 1.0;

const COUNTRY_MULTIPLIERS: &[(&str, f64)] = &[
    ("CL", 0.6),
    ("MX", 0.5),
    ("CO", 0.5),
    ("AR", 0.4),
    ("PE", 0.5),
    ("BR", 0.5),
    ("US", 1.0),
];

pub fn price_multiplier(country_code: &str) -> f64 {
    let code = country_code.trim().to_ascii_uppercase();
    COUNTRY_MULTIPLIERS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, multiplier)| *multiplier)
        .unwrap_or(DEFAULT_MULTIPLIER)
}

/// Country-adjusted price, rounded to the nearest whole currency unit.
pub fn adjusted_price(base_price_usd: u32, country_code: &str) -> u32 {
    (f64::from(base_price_usd) * price_multiplier(country_code)).round() as u32
}

/// Whole currency units to the provider's minor units (cents).
pub fn to_minor_units(price: u32) -> i64 {
    i64::from(price) * 100
}
