//! Balance and allowance preconditions, checked once on the distribution total.

use crate::chain::{confirm, ReceiptWaiter, TokenApprover, TokenReader};
use crate::error::{GuardError, Result};
use alloy::primitives::{Address, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceState {
    Unknown,
    CheckedSufficient,
    CheckedInsufficient,
    Resetting,
    Approving,
    Approved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceWrite {
    /// `approve(spender, 0)` ahead of a new approval, for tokens that reject
    /// nonzero-to-nonzero allowance changes.
    Reset,
    Approve(U256),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReport {
    pub balance: U256,
    pub initial_allowance: U256,
    pub final_allowance: U256,
    pub writes: Vec<AllowanceWrite>,
}

pub struct AllowanceGuard<'a, C: ?Sized> {
    chain: &'a C,
    owner: Address,
    spender: Address,
}

impl<'a, C> AllowanceGuard<'a, C>
where
    C: TokenReader + TokenApprover + ReceiptWaiter + ?Sized,
{
    pub fn new(chain: &'a C, owner: Address, spender: Address) -> Self {
        Self {
            chain,
            owner,
            spender,
        }
    }

    /// Fails unless the owner holds `required`, then brings the allowance up to
    /// `required` if it falls short. Each write is confirmed before the next.
    pub async fn ensure(&self, required: U256) -> Result<GuardReport> {
        let balance = self.chain.balance_of(self.owner).await?;
        if balance < required {
            return Err(GuardError::InsufficientBalance {
                required,
                available: balance,
            }
            .into());
        }

        let mut state = AllowanceState::Unknown;
        let mut allowance = U256::ZERO;
        let mut initial_allowance = U256::ZERO;
        let mut writes = Vec::new();
        loop {
            state = match state {
                AllowanceState::Unknown => {
                    allowance = self.chain.allowance(self.owner, self.spender).await?;
                    initial_allowance = allowance;
                    if allowance >= required {
                        AllowanceState::CheckedSufficient
                    } else {
                        AllowanceState::CheckedInsufficient
                    }
                }
                AllowanceState::CheckedSufficient => {
                    tracing::info!(
                        "[GUARD] allowance {allowance} already covers required {required}"
                    );
                    break;
                }
                AllowanceState::CheckedInsufficient if allowance.is_zero() => {
                    AllowanceState::Approving
                }
                AllowanceState::CheckedInsufficient => AllowanceState::Resetting,
                AllowanceState::Resetting => {
                    tracing::info!("[GUARD] resetting allowance {allowance} to 0");
                    let hash = self.chain.approve(self.spender, U256::ZERO).await?;
                    confirm(self.chain, hash).await?;
                    writes.push(AllowanceWrite::Reset);
                    AllowanceState::Approving
                }
                AllowanceState::Approving => {
                    tracing::info!("[GUARD] approving {required} for spender {:#x}", self.spender);
                    let hash = self.chain.approve(self.spender, required).await?;
                    confirm(self.chain, hash).await?;
                    writes.push(AllowanceWrite::Approve(required));
                    AllowanceState::Approved
                }
                AllowanceState::Approved => {
                    allowance = self.chain.allowance(self.owner, self.spender).await?;
                    if allowance < required {
                        return Err(GuardError::ApprovalFailed {
                            expected: required,
                            actual: allowance,
                        }
                        .into());
                    }
                    break;
                }
            };
        }

        Ok(GuardReport {
            balance,
            initial_allowance,
            final_allowance: allowance,
            writes,
        })
    }
}
