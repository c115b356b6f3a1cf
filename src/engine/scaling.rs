use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::{CopierAccountConfig, ScalingType};

/// Reference account size for BALANCE_BASED scaling: a follower holding
/// exactly this balance copies the master 1:1.
pub const REFERENCE_BALANCE: Decimal = Decimal::from_parts(50_000, 0, 0, false, 0);

/// Scale a master quantity onto a follower. Fractions round down; the
/// result is clamped to `[0, max_contracts]` when a cap is set, so a cap
/// of zero disables the follower.
pub fn scaled_quantity(
    master_qty: i32,
    config: &CopierAccountConfig,
    follower_balance: Decimal,
) -> i32 {
    let raw = match config.scaling_type {
        ScalingType::Fixed => config.fixed_contracts.unwrap_or(master_qty),
        ScalingType::Percentage => match config.percentage_scale {
            Some(scale) => (Decimal::from(master_qty) * scale)
                .floor()
                .to_i32()
                .unwrap_or(0),
            None => master_qty,
        },
        ScalingType::BalanceBased => {
            if REFERENCE_BALANCE.is_zero() {
                0
            } else {
                (Decimal::from(master_qty) * follower_balance / REFERENCE_BALANCE)
                    .floor()
                    .to_i32()
                    .unwrap_or(0)
            }
        }
    };

    let mut quantity = raw.max(0);
    if let Some(max) = config.max_contracts {
        quantity = quantity.min(max.max(0));
    }
    quantity
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn config(scaling_type: ScalingType) -> CopierAccountConfig {
        CopierAccountConfig {
            id: Uuid::new_v4(),
            copier_id: Uuid::new_v4(),
            slave_account_id: Uuid::new_v4(),
            scaling_type,
            fixed_contracts: None,
            percentage_scale: None,
            max_contracts: None,
            daily_loss_limit: None,
            auto_disable: false,
            is_active: true,
            disabled_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fixed_uses_configured_contracts() {
        let mut cfg = config(ScalingType::Fixed);
        cfg.fixed_contracts = Some(2);
        assert_eq!(scaled_quantity(1, &cfg, Decimal::ZERO), 2);
    }

    #[test]
    fn test_fixed_falls_back_to_master_quantity() {
        let cfg = config(ScalingType::Fixed);
        assert_eq!(scaled_quantity(3, &cfg, Decimal::ZERO), 3);
    }

    #[test]
    fn test_percentage_rounds_down() {
        let mut cfg = config(ScalingType::Percentage);
        cfg.percentage_scale = Some(Decimal::new(5, 1)); // 0.5
        assert_eq!(scaled_quantity(3, &cfg, Decimal::ZERO), 1);
        assert_eq!(scaled_quantity(4, &cfg, Decimal::ZERO), 2);
    }

    #[test]
    fn test_percentage_zero_yields_zero() {
        let mut cfg = config(ScalingType::Percentage);
        cfg.percentage_scale = Some(Decimal::ZERO);
        assert_eq!(scaled_quantity(10, &cfg, Decimal::ZERO), 0);
    }

    #[test]
    fn test_balance_based() {
        let cfg = config(ScalingType::BalanceBased);
        // 4 × 25000 / 50000 = 2
        assert_eq!(scaled_quantity(4, &cfg, Decimal::from(25_000)), 2);
        // 1 × 25000 / 50000 = 0.5 → 0
        assert_eq!(scaled_quantity(1, &cfg, Decimal::from(25_000)), 0);
        // Balance above reference scales up: 2 × 100000 / 50000 = 4
        assert_eq!(scaled_quantity(2, &cfg, Decimal::from(100_000)), 4);
    }

    #[test]
    fn test_max_contracts_clamps() {
        let mut cfg = config(ScalingType::Fixed);
        cfg.fixed_contracts = Some(10);
        cfg.max_contracts = Some(3);
        assert_eq!(scaled_quantity(1, &cfg, Decimal::ZERO), 3);
    }

    #[test]
    fn test_max_contracts_zero_disables() {
        let mut cfg = config(ScalingType::Fixed);
        cfg.fixed_contracts = Some(5);
        cfg.max_contracts = Some(0);
        assert_eq!(scaled_quantity(1, &cfg, Decimal::ZERO), 0);
    }
}
