//! Engine configuration and start-up validation.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Instrument;

/// How a loss is sized while the ladder sits on the base rung, where
/// there is no previous rung to step back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseRungLoss {
    /// Loss magnitude mirrors the profit target: stake * (G - 1).
    MatchProfitTarget,
    /// Constant loss fraction of the stake. Also expresses the
    /// fixed-distance degenerate configuration of the engine.
    FixedFraction(Decimal),
}

/// Configuration error, fatal at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("initial balance must be positive, got {0}")]
    NonPositiveBalance(Decimal),

    #[error("growth factor must be greater than 1, got {0}")]
    GrowthFactorTooSmall(Decimal),

    #[error("base-rung loss fraction must be in (0, 1), got {0}")]
    BadBaseRungFraction(Decimal),

    #[error("instrument {field} must be positive, got {value}")]
    BadInstrument { field: &'static str, value: Decimal },
}

/// Engine configuration. Validated once at start-up; invalid values are
/// fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// First ladder rung
    pub initial_balance: Decimal,

    /// Geometric step applied on a win
    pub growth_factor: Decimal,

    /// Minimum wall time between a close and the next entry
    pub trade_delay: Duration,

    /// Pause trading after this many losses in a row
    pub max_consecutive_losses: u32,

    /// Monetary rounding, decimal places half-up
    pub rounding_dp: u32,

    /// Loss sizing policy on the base rung
    pub base_rung_loss: BaseRungLoss,

    /// How long an unacknowledged entry order may stay pending
    pub order_timeout: Duration,

    pub instrument: Instrument,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(100),
            growth_factor: dec!(1.30),
            trade_delay: Duration::from_secs(5),
            max_consecutive_losses: 10,
            rounding_dp: 2,
            base_rung_loss: BaseRungLoss::MatchProfitTarget,
            order_timeout: Duration::from_secs(10),
            instrument: Instrument::eurusd(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBalance(self.initial_balance));
        }
        if self.growth_factor <= Decimal::ONE {
            return Err(ConfigError::GrowthFactorTooSmall(self.growth_factor));
        }
        if let BaseRungLoss::FixedFraction(f) = self.base_rung_loss {
            if f <= Decimal::ZERO || f >= Decimal::ONE {
                return Err(ConfigError::BadBaseRungFraction(f));
            }
        }
        let inst = &self.instrument;
        for (field, value) in [
            ("pip_size", inst.pip_size),
            ("tick_size", inst.tick_size),
            ("contract_size", inst.contract_size),
            ("quantity_step", inst.quantity_step),
            ("min_quantity", inst.min_quantity),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::BadInstrument { field, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_growth_factor() {
        let config = EngineConfig {
            growth_factor: dec!(1.0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GrowthFactorTooSmall(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_balance() {
        let config = EngineConfig {
            initial_balance: dec!(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveBalance(_))
        ));
    }

    #[test]
    fn test_rejects_bad_base_rung_fraction() {
        let config = EngineConfig {
            base_rung_loss: BaseRungLoss::FixedFraction(dec!(1.5)),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadBaseRungFraction(_))
        ));
    }
}
