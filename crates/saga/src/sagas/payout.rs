//! Payout saga: pays an operator's share through the gateway and settles
//! the bookkeeping. Also the administrator's manual payout reversal.

use async_trait::async_trait;
use chrono::Utc;
use common::{EntityId, Money};
use domain::{
    BankDetails, CommissionPolicy, LedgerEntry, Operator, Order, RevenueShare, SettlementChannel,
};
use entity_store::EntityStore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::caller::Caller;
use crate::config::BalanceEffect;
use crate::coordinator::SagaCoordinator;
use crate::error::{Result, SagaError};
use crate::executor::SagaRun;
use crate::log::Compensation;
use crate::outcome::SagaOutcome;
use crate::services::gateway::{
    PayeeProfile, TransferReceipt, TransferRequest, destination_is_valid,
};
use crate::writer::{SagaWriter, UnitOfWork};

pub const PAYOUT: &str = "PAYOUT";
pub const PAYOUT_REVERSAL: &str = "PAYOUT_REVERSAL";

const DEFAULT_REVERSAL_REASON: &str = "Manual rollback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub ledger_entry_id: EntityId,
    pub order_id: EntityId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutReceipt {
    pub entry: LedgerEntry,
    pub order: Order,
    pub balance: Money,
    pub transfer: TransferReceipt,
}

/// Applies a payout to the wallet.
fn wallet_change(
    effect: BalanceEffect,
    amount: Money,
    operator: &mut Operator,
) -> domain::Result<()> {
    match effect {
        BalanceEffect::Debit => operator.account.debit(amount),
        BalanceEffect::Credit => {
            operator.account.credit(amount);
            Ok(())
        }
    }
}

/// Balance delta that undoes [`wallet_change`].
fn undo_delta(effect: BalanceEffect, amount: Money) -> Money {
    match effect {
        BalanceEffect::Debit => amount,
        BalanceEffect::Credit => -amount,
    }
}

struct StoreDestination {
    operator_id: EntityId,
    destination_id: String,
    keep: bool,
}

#[async_trait]
impl UnitOfWork for StoreDestination {
    type Output = ();

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<()> {
        writer
            .update(
                Compensation::RemoveDestination {
                    operator_id: self.operator_id,
                    destination_id: self.destination_id.clone(),
                    keep: self.keep,
                },
                self.operator_id,
                |operator: &mut Operator| {
                    operator.account.destination_id = Some(self.destination_id.clone());
                    Ok(())
                },
            )
            .await?;
        Ok(())
    }
}

struct Settle {
    entry_id: EntityId,
    order_id: EntityId,
    operator_id: EntityId,
    amount: Money,
    effect: BalanceEffect,
    transfer: TransferReceipt,
}

#[async_trait]
impl UnitOfWork for Settle {
    type Output = (LedgerEntry, Order, Money);

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Self::Output> {
        let now = Utc::now();

        let entry = writer
            .update(
                Compensation::RestoreLedgerEntry {
                    entry_id: self.entry_id,
                },
                self.entry_id,
                |entry: &mut LedgerEntry| {
                    entry.settle(self.transfer.transfer_id.clone(), &self.transfer.mode, now)
                },
            )
            .await?;

        let operator = writer
            .update(
                Compensation::AdjustWallet {
                    operator_id: self.operator_id,
                    delta: undo_delta(self.effect, self.amount),
                },
                self.operator_id,
                |operator: &mut Operator| wallet_change(self.effect, self.amount, operator),
            )
            .await?;

        let order = writer
            .update(
                Compensation::RestoreOrder {
                    order_id: self.order_id,
                },
                self.order_id,
                |order: &mut Order| {
                    order.mark_share_paid(SettlementChannel::Transfer(self.transfer.mode.clone()), now)
                },
            )
            .await?;

        Ok((entry, order, operator.account.balance))
    }
}

struct Reverse {
    entry_id: EntityId,
    reason: String,
    order_id: EntityId,
    operator_id: EntityId,
    amount: Money,
    effect: BalanceEffect,
}

#[async_trait]
impl UnitOfWork for Reverse {
    type Output = LedgerEntry;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<LedgerEntry> {
        let now = Utc::now();

        let entry = writer
            .update(
                Compensation::RestoreLedgerEntry {
                    entry_id: self.entry_id,
                },
                self.entry_id,
                |entry: &mut LedgerEntry| {
                    let description =
                        format!("Rolled back: {} - Reason: {}", entry.description, self.reason);
                    entry.reopen(description, now)
                },
            )
            .await?;

        // The reversal runs the payout's wallet change backwards.
        let reverse_effect = match self.effect {
            BalanceEffect::Debit => BalanceEffect::Credit,
            BalanceEffect::Credit => BalanceEffect::Debit,
        };
        writer
            .update(
                Compensation::AdjustWallet {
                    operator_id: self.operator_id,
                    delta: undo_delta(reverse_effect, self.amount),
                },
                self.operator_id,
                |operator: &mut Operator| wallet_change(reverse_effect, self.amount, operator),
            )
            .await?;

        writer
            .update(
                Compensation::RestoreOrder {
                    order_id: self.order_id,
                },
                self.order_id,
                |order: &mut Order| {
                    let channel = CommissionPolicy::channel_for(order.payment_method);
                    let share = order
                        .share
                        .as_ref()
                        .map(|share| RevenueShare::new(share.cut, channel));
                    order.reset_share(share);
                    Ok(())
                },
            )
            .await?;

        Ok(entry)
    }
}

impl<S: EntityStore> SagaCoordinator<S> {
    /// Pays out a pending ledger entry.
    ///
    /// The transfer cannot be undone: if bookkeeping fails afterwards, the
    /// bookkeeping is reverted and the failure reports that funds may have
    /// moved.
    #[tracing::instrument(skip(self, caller), fields(saga_type = PAYOUT))]
    pub async fn payout(&self, request: PayoutRequest, caller: &Caller) -> SagaOutcome<PayoutReceipt> {
        let mut run = self.executor.begin(PAYOUT);
        let result = self.run_payout(&mut run, request, caller).await;
        run.finish(result).await
    }

    async fn run_payout(
        &self,
        run: &mut SagaRun<'_, S>,
        request: PayoutRequest,
        caller: &Caller,
    ) -> Result<PayoutReceipt> {
        caller.require_admin()?;
        let policy = &self.config.payout;

        let amount = request.amount;
        if !amount.is_positive() {
            return Err(SagaError::Validation("payout amount must be positive".into()));
        }
        if amount > policy.max_amount {
            return Err(SagaError::Validation(format!(
                "payout amount {amount} exceeds the {} limit",
                policy.max_amount
            )));
        }

        let entry: LedgerEntry = self.read(request.ledger_entry_id).await?;
        if entry.order_id != request.order_id {
            return Err(SagaError::Validation(format!(
                "ledger entry {} does not belong to order {}",
                entry.id, request.order_id
            )));
        }
        if entry.amount != amount {
            return Err(SagaError::Validation(format!(
                "amount {amount} does not match ledger entry amount {}",
                entry.amount
            )));
        }
        if !entry.pending {
            return Err(SagaError::Conflict(format!(
                "ledger entry {} is not pending",
                entry.id
            )));
        }
        let order: Order = self.read(request.order_id).await?;
        if order.share_paid() {
            return Err(SagaError::Conflict(format!(
                "revenue share for order {} is already paid",
                order.id
            )));
        }
        let operator: Operator = self.read(entry.operator_id).await?;
        let bank = operator.payout_details().cloned().ok_or_else(|| {
            SagaError::Validation(format!("operator {} has incomplete bank details", operator.id))
        })?;
        // The wallet change must be possible before any money moves.
        wallet_change(policy.balance_effect, amount, &mut operator.clone())?;

        let destination_id = match operator.account.destination_id.clone() {
            Some(id) => id,
            None => self.register_destination(run, &operator, &bank).await?,
        };

        let transfer = self
            .gateway
            .transfer(&TransferRequest {
                destination_id,
                amount,
                mode: policy.transfer_mode.clone(),
                reference: entry.payout_reference(),
            })
            .await?;
        run.mark_funds_moved();
        run.record_external(Compensation::Irreversible {
            transfer_id: transfer.transfer_id.clone(),
            amount,
        });
        tracing::info!(
            transfer_id = %transfer.transfer_id,
            status = %transfer.status,
            %amount,
            "transfer_executed"
        );

        let (entry, order, balance) = run
            .apply(&Settle {
                entry_id: entry.id,
                order_id: order.id,
                operator_id: operator.id,
                amount,
                effect: policy.balance_effect,
                transfer: transfer.clone(),
            })
            .await?;

        self.notify(
            operator.id,
            "payout_sent",
            json!({ "order_id": order.id, "amount": amount, "transfer_id": transfer.transfer_id }),
        )
        .await;

        Ok(PayoutReceipt {
            entry,
            order,
            balance,
            transfer,
        })
    }

    /// Registers, validates and stores a payout destination.
    ///
    /// Nothing is stored unless the gateway reports the destination valid.
    async fn register_destination(
        &self,
        run: &mut SagaRun<'_, S>,
        operator: &Operator,
        bank: &BankDetails,
    ) -> Result<String> {
        let payee = PayeeProfile {
            reference_id: operator.id.to_string(),
            name: operator.name.clone(),
            email: operator.email.clone(),
            phone: operator.phone.clone(),
        };
        let payee_id = self.gateway.register_payee(&payee).await?;
        let destination_id = self.gateway.register_destination(&payee_id, bank).await?;
        let status = self.gateway.validate_destination(&destination_id).await?;

        if !destination_is_valid(&status) {
            tracing::warn!(
                operator_id = %operator.id,
                %destination_id,
                %status,
                "destination_rejected"
            );
            return Err(SagaError::Gateway(format!(
                "destination validation returned '{status}'"
            )));
        }

        run.apply(&StoreDestination {
            operator_id: operator.id,
            destination_id: destination_id.clone(),
            keep: self.config.payout.keep_validated_destination,
        })
        .await?;
        Ok(destination_id)
    }

    /// Reverts the bookkeeping of a completed payout. The transfer itself is
    /// left alone.
    #[tracing::instrument(skip(self, caller), fields(saga_type = PAYOUT_REVERSAL))]
    pub async fn reverse_payout(
        &self,
        ledger_entry_id: EntityId,
        reason: Option<&str>,
        caller: &Caller,
    ) -> SagaOutcome<LedgerEntry> {
        let mut run = self.executor.begin(PAYOUT_REVERSAL);
        let result = self
            .run_reversal(&mut run, ledger_entry_id, reason, caller)
            .await;
        run.finish(result).await
    }

    async fn run_reversal(
        &self,
        run: &mut SagaRun<'_, S>,
        ledger_entry_id: EntityId,
        reason: Option<&str>,
        caller: &Caller,
    ) -> Result<LedgerEntry> {
        caller.require_admin()?;
        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_REVERSAL_REASON);

        let entry: LedgerEntry = self.read(ledger_entry_id).await?;
        if entry.pending || entry.payout_id.is_none() {
            return Err(SagaError::Conflict(format!(
                "ledger entry {} has not been paid out",
                entry.id
            )));
        }
        let _: Order = self.read(entry.order_id).await?;

        tracing::warn!(
            entry_id = %entry.id,
            payout_id = entry.payout_id.as_deref().unwrap_or_default(),
            reason,
            "reversing payout bookkeeping; transfer stays in place"
        );
        run.apply(&Reverse {
            entry_id: entry.id,
            reason: reason.to_string(),
            order_id: entry.order_id,
            operator_id: entry.operator_id,
            amount: entry.amount,
            effect: self.config.payout.balance_effect,
        })
        .await
    }
}
