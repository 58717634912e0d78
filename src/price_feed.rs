//! Currency Conversion
//!
//! Turns an off-chain fiat price into a native amount using a public spot-rate
//! API. Advisory only: nothing here touches a session or an escrow, and a failed
//! lookup never clears an earlier result.

use chrono::{DateTime, Utc};
use ethereum_types::U256;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{PriceFeedConfig, PriceFeedKind};
use crate::error::EscrowError;
use crate::units::{format_scaled, parse_scaled, NativeAmount, NATIVE_DECIMALS};

/// Fixed-point precision for rates and fiat amounts
pub const RATE_DECIMALS: u32 = 18;

/// Fiat price of one whole native unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRate {
    /// Currency code, uppercase
    pub fiat: String,
    /// Rate scaled by 10^RATE_DECIMALS
    pub scaled: U256,
}

impl SpotRate {
    /// Fiat value of `amount` at this rate, scaled by 10^RATE_DECIMALS.
    pub fn fiat_value(&self, amount: &NativeAmount) -> U256 {
        amount.subunits().saturating_mul(self.scaled) / U256::exp10(NATIVE_DECIMALS as usize)
    }
}

impl fmt::Display for SpotRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_scaled(self.scaled, RATE_DECIMALS), self.fiat)
    }
}

/// One successful fiat to native conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Fiat input, scaled by 10^RATE_DECIMALS
    pub fiat_scaled: U256,
    pub rate: SpotRate,
    /// Rounded to the converter's decimal places
    pub native: NativeAmount,
    pub converted_at: DateTime<Utc>,
}

// ============================================================================
// PRICE FEED CLIENT
// ============================================================================

#[derive(Debug, Deserialize)]
struct CoinbaseSpotResponse {
    data: CoinbaseSpotData,
}

#[derive(Debug, Deserialize)]
struct CoinbaseSpotData {
    amount: String,
}

/// HTTP client for a public spot-rate API
pub struct PriceFeedClient {
    client: Client,
    kind: PriceFeedKind,
    base_url: String,
}

impl PriceFeedClient {
    pub fn new(config: &PriceFeedConfig) -> Result<Self, EscrowError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .map_err(|e| EscrowError::RateUnavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            kind: config.kind,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches the current price of one native unit in `fiat`.
    ///
    /// # Returns
    ///
    /// * `Ok(SpotRate)` - Positive rate
    /// * `Err(EscrowError::RateUnavailable)` - Request failed, unexpected body, or non-positive rate
    pub async fn fetch_rate(&self, fiat: &str) -> Result<SpotRate, EscrowError> {
        let fiat = fiat.to_uppercase();
        let raw = match self.kind {
            PriceFeedKind::Coinbase => self.fetch_coinbase(&fiat).await?,
            PriceFeedKind::Coingecko => self.fetch_coingecko(&fiat).await?,
        };
        debug!("Price feed returned {} for ETH-{}", raw, fiat);

        let scaled = parse_rate(&raw)?;
        if scaled.is_zero() {
            return Err(EscrowError::RateUnavailable(format!("Non-positive rate '{}'", raw)));
        }
        Ok(SpotRate { fiat, scaled })
    }

    async fn fetch_coinbase(&self, fiat: &str) -> Result<String, EscrowError> {
        let url = format!("{}/v2/prices/ETH-{}/spot", self.base_url, fiat);
        let body: CoinbaseSpotResponse = self.get_json(&url).await?;
        Ok(body.data.amount)
    }

    async fn fetch_coingecko(&self, fiat: &str) -> Result<String, EscrowError> {
        let currency = fiat.to_lowercase();
        let url = format!(
            "{}/api/v3/simple/price?ids=ethereum&vs_currencies={}",
            self.base_url, currency
        );
        let body: serde_json::Value = self.get_json(&url).await?;
        match body.get("ethereum").and_then(|e| e.get(&currency)) {
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            _ => Err(EscrowError::RateUnavailable(format!(
                "Response has no ethereum.{} price",
                currency
            ))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, EscrowError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EscrowError::RateUnavailable(format!("Failed to reach price feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EscrowError::RateUnavailable(format!(
                "Price feed returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EscrowError::RateUnavailable(format!("Failed to parse price feed response: {}", e)))
    }
}

/// Largest exponent accepted in a feed rate like `1.2e-5`
const MAX_RATE_EXPONENT: i32 = 64;

/// Parses a feed rate, truncating digits beyond RATE_DECIMALS.
fn parse_rate(raw: &str) -> Result<U256, EscrowError> {
    let unparseable = || EscrowError::RateUnavailable(format!("Unparseable rate '{}'", raw));

    let plain = expand_exponent(raw.trim()).ok_or_else(unparseable)?;
    let truncated = match plain.split_once('.') {
        Some((int_part, frac_part)) if frac_part.len() > RATE_DECIMALS as usize => {
            let kept = frac_part.get(..RATE_DECIMALS as usize).ok_or_else(unparseable)?;
            format!("{}.{}", int_part, kept)
        }
        _ => plain,
    };
    parse_scaled(&truncated, RATE_DECIMALS).map_err(|_| unparseable())
}

/// Rewrites scientific notation (`1.5e-5`) as a plain decimal (`0.000015`).
///
/// Returns `None` for a malformed number. Strings without an exponent pass through.
fn expand_exponent(raw: &str) -> Option<String> {
    let Some((mantissa, exponent)) = raw.split_once(|c| c == 'e' || c == 'E') else {
        return Some(raw.to_string());
    };
    let exponent: i32 = exponent.parse().ok()?;
    if exponent.abs() > MAX_RATE_EXPONENT {
        return None;
    }

    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{}{}", int_part, frac_part);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let point = int_part.len() as i32 + exponent;
    let plain = if point <= 0 {
        format!("0.{}{}", "0".repeat(point.unsigned_abs() as usize), digits)
    } else if point as usize >= digits.len() {
        format!("{}{}", digits, "0".repeat(point as usize - digits.len()))
    } else {
        let (whole, frac) = digits.split_at(point as usize);
        format!("{}.{}", whole, frac)
    };
    Some(plain)
}

// ============================================================================
// CONVERTER
// ============================================================================

pub struct CurrencyConverter {
    feed: PriceFeedClient,
    fiat: String,
    decimals: u32,
    last: Mutex<Option<Conversion>>,
}

impl CurrencyConverter {
    pub fn new(config: &PriceFeedConfig) -> Result<Self, EscrowError> {
        Ok(Self {
            feed: PriceFeedClient::new(config)?,
            fiat: config.fiat.to_uppercase(),
            decimals: config.decimals.min(NATIVE_DECIMALS),
            last: Mutex::new(None),
        })
    }

    /// Converts a fiat amount into native units, rounded half-up to the configured
    /// decimal places.
    ///
    /// # Arguments
    ///
    /// * `fiat_amount` - Non-negative decimal string (e.g. "2500.50")
    ///
    /// # Returns
    ///
    /// * `Ok(Conversion)` - Converted amount; also remembered as the last conversion
    /// * `Err(EscrowError::InvalidAmount)` - Malformed input; the feed is not queried
    /// * `Err(EscrowError::RateUnavailable)` - Feed failed; the last conversion is kept
    pub async fn convert(&self, fiat_amount: &str) -> Result<Conversion, EscrowError> {
        let fiat_scaled = parse_scaled(fiat_amount, RATE_DECIMALS)?;

        let rate = match self.feed.fetch_rate(&self.fiat).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!("Conversion of {} {} failed: {}", fiat_amount, self.fiat, e);
                return Err(e);
            }
        };

        let native = native_for(fiat_scaled, &rate, self.decimals)?;
        let conversion = Conversion {
            fiat_scaled,
            rate,
            native,
            converted_at: Utc::now(),
        };
        info!(
            "{} {} = {} native at {}",
            format_scaled(fiat_scaled, RATE_DECIMALS),
            self.fiat,
            conversion.native,
            conversion.rate
        );

        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(conversion.clone());
        Ok(conversion)
    }

    /// Current rate without converting anything.
    pub async fn spot_rate(&self) -> Result<SpotRate, EscrowError> {
        self.feed.fetch_rate(&self.fiat).await
    }

    /// Most recent successful conversion, if any.
    pub fn last_conversion(&self) -> Option<Conversion> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

/// `fiat / rate`, rounded half-up to `decimals` places, as native subunits.
///
/// Both inputs share the RATE_DECIMALS scale, so it cancels out of the quotient.
fn native_for(fiat_scaled: U256, rate: &SpotRate, decimals: u32) -> Result<NativeAmount, EscrowError> {
    let overflow = || EscrowError::InvalidAmount("Fiat amount too large to convert".to_string());

    let numerator = fiat_scaled
        .checked_mul(U256::exp10(decimals as usize))
        .and_then(|n| n.checked_mul(U256::from(2u8)))
        .and_then(|n| n.checked_add(rate.scaled))
        .ok_or_else(overflow)?;
    let denominator = rate.scaled.checked_mul(U256::from(2u8)).ok_or_else(overflow)?;
    let units = numerator / denominator;

    let subunits = units
        .checked_mul(U256::exp10((NATIVE_DECIMALS - decimals) as usize))
        .ok_or_else(overflow)?;
    Ok(NativeAmount::from_subunits(subunits))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(raw: &str) -> SpotRate {
        SpotRate {
            fiat: "USD".to_string(),
            scaled: parse_rate(raw).unwrap(),
        }
    }

    #[test]
    fn test_divides_and_rounds_half_up() {
        let fiat = parse_scaled("1000", RATE_DECIMALS).unwrap();
        // 1000 / 3000 = 0.3333...
        assert_eq!(native_for(fiat, &rate("3000"), 6).unwrap().to_string(), "0.333333");
        // 2000 / 3000 = 0.6666...
        let fiat = parse_scaled("2000", RATE_DECIMALS).unwrap();
        assert_eq!(native_for(fiat, &rate("3000"), 6).unwrap().to_string(), "0.666667");
        // 1 / 8 = 0.125, exact half at 2 places rounds up
        let fiat = parse_scaled("1", RATE_DECIMALS).unwrap();
        assert_eq!(native_for(fiat, &rate("8"), 2).unwrap().to_string(), "0.13");
    }

    #[test]
    fn test_parse_rate_truncates_excess_precision() {
        assert_eq!(
            parse_rate("1.1234567890123456789999").unwrap(),
            parse_scaled("1.123456789012345678", RATE_DECIMALS).unwrap()
        );
        assert!(matches!(parse_rate("abc"), Err(EscrowError::RateUnavailable(_))));
        assert!(matches!(parse_rate("-5"), Err(EscrowError::RateUnavailable(_))));
        // Multi-byte character straddling the truncation point
        assert!(matches!(
            parse_rate("1.00000000000000000\u{e9}0"),
            Err(EscrowError::RateUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_rate_expands_exponents() {
        assert_eq!(parse_rate("1e-5").unwrap(), U256::exp10(13));
        assert_eq!(parse_rate("1.5E-5").unwrap(), U256::from(15u64) * U256::exp10(12));
        assert_eq!(parse_rate("2.5e3").unwrap(), U256::from(2500u64) * U256::exp10(18));
        assert_eq!(parse_rate("1.23e1").unwrap(), parse_scaled("12.3", RATE_DECIMALS).unwrap());
        assert!(matches!(parse_rate("1e999"), Err(EscrowError::RateUnavailable(_))));
        assert!(matches!(parse_rate("-1e-5"), Err(EscrowError::RateUnavailable(_))));
        assert!(matches!(parse_rate("e5"), Err(EscrowError::RateUnavailable(_))));
    }

    #[test]
    fn test_fiat_value_inverts_conversion() {
        let r = rate("3456.78");
        let fiat = parse_scaled("250000", RATE_DECIMALS).unwrap();
        let native = native_for(fiat, &r, 6).unwrap();
        let back = r.fiat_value(&native);
        // Half a unit in the 6th place, priced at the rate
        let tolerance = r.scaled / U256::from(2_000_000u64) + U256::one();
        let diff = if back > fiat { back - fiat } else { fiat - back };
        assert!(diff <= tolerance, "diff {} exceeds {}", diff, tolerance);
    }
}
