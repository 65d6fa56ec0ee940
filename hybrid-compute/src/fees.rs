//! Fee re-estimation for the original operation of a pair.

use alloy_primitives::{B256, U256};
use alloy_sol_types::SolError;
use hybrid_compute_types::{GasEstimate, Operation};
use serde::Serialize;
use tracing::debug;

use crate::{abi::interfaces::HybridComputeRequired, chain::SimulationOutcome, errors::ReestimationError};

/// Gas the injected operation consumes, charged to the original.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedCost {
    pub verification_gas: U256,
    pub call_gas: U256,
    pub pre_verification_gas: U256,
}

impl InjectedCost {
    /// Simulated gas of `injected` plus its own `preVerificationGas`.
    pub fn from_simulation(injected: &Operation, outcome: &SimulationOutcome) -> Self {
        Self {
            verification_gas: outcome.verification_gas,
            call_gas: outcome.call_gas,
            pre_verification_gas: injected.pre_verification_gas,
        }
    }

    pub fn total(&self) -> Result<U256, ReestimationError> {
        self.verification_gas
            .checked_add(self.call_gas)
            .and_then(|sum| sum.checked_add(self.pre_verification_gas))
            .ok_or(ReestimationError::Overflow)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeAdjustment {
    pub injected_cost: U256,
    pub surcharge: U256,
    pub estimate: GasEstimate,
}

#[derive(Clone, Copy, Debug)]
pub struct FeeAccountant {
    flat_fee_gas: U256,
}

impl FeeAccountant {
    pub fn new(flat_fee_gas: u64) -> Self {
        Self {
            flat_fee_gas: U256::from(flat_fee_gas),
        }
    }

    pub fn surcharge(&self) -> U256 {
        self.flat_fee_gas
    }

    /// New gas fields for `original`, given its re-simulation with the injected operation as prefix.
    ///
    /// `preVerificationGas` grows by exactly the injected cost plus the surcharge. The two limits
    /// never shrink below what the account originally asked for.
    pub fn adjust(
        &self,
        request_id: B256,
        original: &Operation,
        cost: &InjectedCost,
        resim: &SimulationOutcome,
    ) -> Result<FeeAdjustment, ReestimationError> {
        if let Some(reason) = &resim.validation_error {
            return Err(ReestimationError::SimulationFailed(reason.clone()));
        }
        if !resim.success {
            if resim.revert_data.starts_with(&HybridComputeRequired::SELECTOR) {
                return Err(ReestimationError::StillPending(request_id));
            }
            debug!(%request_id, "original reverts after population; execution failure is the account's");
        }

        let injected_cost = cost.total()?;
        let pre_verification_gas = original
            .pre_verification_gas
            .checked_add(injected_cost)
            .and_then(|v| v.checked_add(self.flat_fee_gas))
            .ok_or(ReestimationError::Overflow)?;

        Ok(FeeAdjustment {
            injected_cost,
            surcharge: self.flat_fee_gas,
            estimate: GasEstimate {
                pre_verification_gas,
                verification_gas_limit: original.verification_gas_limit.max(resim.verification_gas),
                call_gas_limit: original.call_gas_limit.max(resim.call_gas),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn original() -> Operation {
        Operation {
            sender: Address::repeat_byte(0xbb),
            pre_verification_gas: U256::from(48_000u64),
            verification_gas_limit: U256::from(100_000u64),
            call_gas_limit: U256::from(20_000u64),
            ..Default::default()
        }
    }

    fn cost() -> InjectedCost {
        InjectedCost {
            verification_gas: U256::from(70_000u64),
            call_gas: U256::from(55_000u64),
            pre_verification_gas: U256::from(60_000u64),
        }
    }

    fn resim() -> SimulationOutcome {
        SimulationOutcome {
            success: true,
            verification_gas: U256::from(90_000u64),
            call_gas: U256::from(64_000u64),
            ..Default::default()
        }
    }

    #[test]
    fn pvg_grows_by_exactly_cost_plus_surcharge() {
        let fees = FeeAccountant::new(25_000);
        let adj = fees.adjust(B256::ZERO, &original(), &cost(), &resim()).expect("adjust");

        assert_eq!(adj.injected_cost, U256::from(185_000u64));
        assert_eq!(adj.surcharge, U256::from(25_000u64));
        assert_eq!(
            adj.estimate.pre_verification_gas - original().pre_verification_gas,
            adj.injected_cost + adj.surcharge
        );
        assert_eq!(adj.estimate.verification_gas_limit, U256::from(100_000u64));
        assert_eq!(adj.estimate.call_gas_limit, U256::from(64_000u64));
    }

    #[test]
    fn same_inputs_same_estimate() {
        let fees = FeeAccountant::new(25_000);
        let a = fees.adjust(B256::ZERO, &original(), &cost(), &resim()).expect("a");
        let b = fees.adjust(B256::ZERO, &original(), &cost(), &resim()).expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn marker_after_population_is_still_pending() {
        let id = B256::repeat_byte(9);
        let pending = SimulationOutcome {
            success: false,
            revert_data: HybridComputeRequired {
                account: Address::repeat_byte(0xaa),
                requestId: id,
                callParams: Bytes::from(vec![1, 2, 3, 4]),
            }
            .abi_encode()
            .into(),
            ..Default::default()
        };
        assert_eq!(
            FeeAccountant::new(1).adjust(id, &original(), &cost(), &pending),
            Err(ReestimationError::StillPending(id))
        );
    }

    #[test]
    fn validation_failure_and_overflow_are_errors() {
        let fees = FeeAccountant::new(1);
        let failed = SimulationOutcome {
            validation_error: Some("AA23 reverted".into()),
            ..Default::default()
        };
        assert!(matches!(
            fees.adjust(B256::ZERO, &original(), &cost(), &failed),
            Err(ReestimationError::SimulationFailed(_))
        ));

        let mut huge = original();
        huge.pre_verification_gas = U256::MAX;
        assert_eq!(
            fees.adjust(B256::ZERO, &huge, &cost(), &resim()),
            Err(ReestimationError::Overflow)
        );
    }
}
