//! Platform commission on bookings.

use common::Money;
use serde::{Deserialize, Serialize};

use crate::{DomainError, PaymentMethod, Result, RevenueShare, SettlementChannel};

/// Share of each booking the platform keeps before paying the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPolicy {
    /// Commission in basis points (1000 = 10%).
    pub rate_bps: u32,
    /// Payment methods the commission is deducted for.
    pub deducted_for: Vec<PaymentMethod>,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self {
            rate_bps: 1_000,
            deducted_for: vec![PaymentMethod::Hybrid, PaymentMethod::Online],
        }
    }
}

impl CommissionPolicy {
    /// Builds a policy from a fractional rate such as `0.1`.
    pub fn from_rate(rate: f64) -> Result<Self> {
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(DomainError::InvalidValue {
                field: "commission rate",
                reason: format!("must be between 0 and 1, got {rate}"),
            });
        }
        Ok(Self {
            rate_bps: (rate * 10_000.0).round() as u32,
            ..Self::default()
        })
    }

    /// The operator's cut of `total` for a booking paid with `method`.
    pub fn operator_cut(&self, method: PaymentMethod, total: Money) -> Money {
        if self.deducted_for.contains(&method) {
            total - total.basis_points(self.rate_bps)
        } else {
            total
        }
    }

    /// The unsettled revenue share recorded when a booking is assigned.
    ///
    /// Online bookings are collected by the platform; every other method
    /// is paid to the operator by the customer.
    pub fn revenue_share(&self, method: PaymentMethod, total: Money) -> RevenueShare {
        RevenueShare::new(self.operator_cut(method, total), Self::channel_for(method))
    }

    /// Who collects the fare for `method`.
    pub fn channel_for(method: PaymentMethod) -> SettlementChannel {
        match method {
            PaymentMethod::Online => SettlementChannel::Platform,
            PaymentMethod::Cash | PaymentMethod::Hybrid => SettlementChannel::Customer,
        }
    }
}
