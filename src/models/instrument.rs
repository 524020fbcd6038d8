//! Instrument metadata consumed by the sizer and journal.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Static metadata for the traded instrument.
///
/// Prices are snapped to `tick_size`, quantities to `quantity_step`.
/// `contract_size` is the number of units per whole lot and is used only
/// for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Identifier string, e.g. "EUR/USD"
    pub id: String,

    /// Smallest conventional price unit (0.0001 for EUR/USD)
    pub pip_size: Decimal,

    /// Smallest tradeable price increment
    pub tick_size: Decimal,

    /// Units per whole lot
    pub contract_size: Decimal,

    /// Decimal places carried by prices
    pub price_precision: u32,

    /// Smallest quantity increment
    pub quantity_step: Decimal,

    /// Exchange minimum order quantity
    pub min_quantity: Decimal,
}

impl Instrument {
    /// EUR/USD with fractional-unit sizing, used by the demo and tests.
    pub fn eurusd() -> Self {
        Self {
            id: "EUR/USD".to_string(),
            pip_size: dec!(0.0001),
            tick_size: dec!(0.00001),
            contract_size: dec!(100000),
            price_precision: 5,
            quantity_step: dec!(0.01),
            min_quantity: dec!(0.01),
        }
    }

    /// Snap a price down to the nearest tick.
    pub fn snap_price_down(&self, price: Decimal) -> Decimal {
        (price / self.tick_size).floor() * self.tick_size
    }

    /// Snap a price up to the nearest tick.
    pub fn snap_price_up(&self, price: Decimal) -> Decimal {
        (price / self.tick_size).ceil() * self.tick_size
    }

    /// Snap a quantity down to the instrument's quantity step.
    pub fn snap_quantity_down(&self, quantity: Decimal) -> Decimal {
        (quantity / self.quantity_step).floor() * self.quantity_step
    }

    /// Express a unit quantity in whole lots, for logging.
    pub fn lots(&self, quantity: Decimal) -> Decimal {
        if self.contract_size.is_zero() {
            return Decimal::ZERO;
        }
        quantity / self.contract_size
    }
}
