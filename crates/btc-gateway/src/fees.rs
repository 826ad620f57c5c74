use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GatewayError;
use crate::gateway::NetworkGateway;

/// Confirmation targets, in blocks, behind each estimate tier.
pub const FASTEST_TARGET: u16 = 1;
pub const HALF_HOUR_TARGET: u16 = 3;
pub const HOUR_TARGET: u16 = 6;
pub const ECONOMY_TARGET: u16 = 144;

/// Fee rates in sat/vB, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fastest: u64,
    pub half_hour: u64,
    pub hour: u64,
    pub economy: u64,
    /// Set when the gateway could not be reached and these are defaults.
    pub is_fallback: bool,
}

impl FeeEstimates {
    pub const FALLBACK: FeeEstimates = FeeEstimates {
        fastest: 20,
        half_hour: 10,
        hour: 5,
        economy: 1,
        is_fallback: true,
    };

    /// Make the tiers non-increasing from fastest to economy.
    fn normalized(mut self) -> Self {
        self.economy = self.economy.max(1);
        self.hour = self.hour.max(self.economy);
        self.half_hour = self.half_hour.max(self.hour);
        self.fastest = self.fastest.max(self.half_hour);
        self
    }

    /// Tier for a confirmation target in blocks.
    pub fn for_target(&self, target_blocks: u16) -> u64 {
        match target_blocks {
            0..=FASTEST_TARGET => self.fastest,
            2..=HALF_HOUR_TARGET => self.half_hour,
            4..=HOUR_TARGET => self.hour,
            _ => self.economy,
        }
    }
}

async fn fetch(gateway: &dyn NetworkGateway) -> Result<FeeEstimates, GatewayError> {
    Ok(FeeEstimates {
        fastest: gateway.estimate_fee(FASTEST_TARGET).await?,
        half_hour: gateway.estimate_fee(HALF_HOUR_TARGET).await?,
        hour: gateway.estimate_fee(HOUR_TARGET).await?,
        economy: gateway.estimate_fee(ECONOMY_TARGET).await?,
        is_fallback: false,
    }
    .normalized())
}

/// Current estimates, or [`FeeEstimates::FALLBACK`] when the gateway fails.
///
/// Fee rates are the one read path allowed to degrade to defaults.
pub async fn get_fee_estimates(gateway: &dyn NetworkGateway) -> FeeEstimates {
    match fetch(gateway).await {
        Ok(estimates) => estimates,
        Err(e) => {
            warn!(error = %e, "fee estimates unavailable, using fallback rates");
            FeeEstimates::FALLBACK
        }
    }
}

/// Single rate for `target_blocks`, falling back like [`get_fee_estimates`].
pub async fn fee_rate_or_fallback(gateway: &dyn NetworkGateway, target_blocks: u16) -> u64 {
    match gateway.estimate_fee(target_blocks).await {
        Ok(rate) => rate.max(1),
        Err(e) => {
            warn!(error = %e, target_blocks, "fee rate unavailable, using fallback");
            FeeEstimates::FALLBACK.for_target(target_blocks)
        }
    }
}
