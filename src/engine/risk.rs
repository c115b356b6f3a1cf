use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::trade_repo;
use crate::models::CopierAccountConfig;

/// A follower-level risk rejection. Logged as `warn`, never surfaced to
/// the master path.
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("daily loss limit reached: realized {pnl} against limit {limit}")]
    DailyLossExceeded { pnl: Decimal, limit: Decimal },
}

/// True when today's realised loss has consumed the limit. The comparison
/// is inclusive: a loss exactly equal to the limit rejects.
pub fn daily_loss_exceeded(pnl: Decimal, limit: Decimal) -> bool {
    pnl <= -limit
}

/// Evaluate the pre-placement gate for one follower config. Only the
/// config-level daily loss is enforced here; the account-level bounds are
/// advisory inputs for extra `RiskRule` rows.
pub async fn evaluate(
    pool: &PgPool,
    config: &CopierAccountConfig,
) -> anyhow::Result<Result<(), RiskViolation>> {
    let Some(limit) = config.daily_loss_limit else {
        return Ok(Ok(()));
    };

    let pnl = trade_repo::daily_realized_pnl(pool, config.slave_account_id).await?;

    if daily_loss_exceeded(pnl, limit) {
        return Ok(Err(RiskViolation::DailyLossExceeded { pnl, limit }));
    }

    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_below_limit_passes() {
        assert!(!daily_loss_exceeded(Decimal::from(-499), Decimal::from(500)));
    }

    #[test]
    fn test_loss_at_limit_rejects() {
        assert!(daily_loss_exceeded(Decimal::from(-500), Decimal::from(500)));
    }

    #[test]
    fn test_loss_beyond_limit_rejects() {
        assert!(daily_loss_exceeded(Decimal::from(-750), Decimal::from(500)));
    }

    #[test]
    fn test_profit_passes() {
        assert!(!daily_loss_exceeded(Decimal::from(600), Decimal::from(500)));
    }
}
