//! Driver verification: document submission and administrator approval.

use async_trait::async_trait;
use common::EntityId;
use domain::{BankDetails, Operator, VerificationDocument};
use entity_store::EntityStore;
use serde_json::json;

use crate::caller::Caller;
use crate::coordinator::SagaCoordinator;
use crate::error::{Result, SagaError};
use crate::executor::SagaRun;
use crate::log::Compensation;
use crate::outcome::SagaOutcome;
use crate::services::assets::{AssetRules, AssetUpload, upload_all};
use crate::writer::{SagaWriter, UnitOfWork};

pub const DRIVER_VERIFICATION: &str = "DRIVER_VERIFICATION";
pub const OPERATOR_APPROVAL: &str = "OPERATOR_APPROVAL";

/// One verification document, e.g. a licence scan.
#[derive(Debug, Clone)]
pub struct VerificationUpload {
    pub kind: String,
    pub file: AssetUpload,
}

#[derive(Debug, Clone)]
pub struct SubmitVerification {
    pub operator_id: EntityId,
    pub documents: Vec<VerificationUpload>,
    pub bank_details: BankDetails,
}

struct Submit {
    operator_id: EntityId,
    documents: Vec<VerificationDocument>,
    bank_details: BankDetails,
}

#[async_trait]
impl UnitOfWork for Submit {
    type Output = Operator;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Operator> {
        writer
            .update(
                Compensation::RestoreOperator {
                    operator_id: self.operator_id,
                },
                self.operator_id,
                |operator: &mut Operator| {
                    operator.submit_documents(self.documents.clone(), self.bank_details.clone())
                },
            )
            .await
    }
}

struct ToggleApproval {
    operator_id: EntityId,
}

#[async_trait]
impl UnitOfWork for ToggleApproval {
    type Output = Operator;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Operator> {
        writer
            .update(
                Compensation::RestoreOperator {
                    operator_id: self.operator_id,
                },
                self.operator_id,
                |operator: &mut Operator| operator.toggle_verified().map(|_| ()),
            )
            .await
    }
}

impl<S: EntityStore> SagaCoordinator<S> {
    /// Uploads verification documents and records them with the operator's
    /// bank details.
    #[tracing::instrument(
        skip(self, request, caller),
        fields(saga_type = DRIVER_VERIFICATION, operator_id = %request.operator_id)
    )]
    pub async fn submit_verification(
        &self,
        request: SubmitVerification,
        caller: &Caller,
    ) -> SagaOutcome<Operator> {
        let mut run = self.executor.begin(DRIVER_VERIFICATION);
        let result = self.run_verification(&mut run, request, caller).await;
        run.finish(result).await
    }

    async fn run_verification(
        &self,
        run: &mut SagaRun<'_, S>,
        request: SubmitVerification,
        caller: &Caller,
    ) -> Result<Operator> {
        caller.require_self_or_admin(request.operator_id)?;

        let operator: Operator = self.read(request.operator_id).await?;
        if request.documents.is_empty() {
            return Err(SagaError::Validation(
                "at least one verification document is required".into(),
            ));
        }
        request.bank_details.validate()?;
        let rules = AssetRules::documents();
        for document in &request.documents {
            rules.check(&document.file)?;
        }

        let files: Vec<AssetUpload> = request.documents.iter().map(|d| d.file.clone()).collect();
        let prefix = format!("verification/{}", operator.id);
        let keys = upload_all(self.assets.as_ref(), &prefix, &files).await?;
        run.record_external(Compensation::DeleteAssets { keys: keys.clone() });

        let documents = request
            .documents
            .into_iter()
            .zip(keys)
            .map(|(upload, asset_key)| VerificationDocument {
                kind: upload.kind,
                asset_key,
                content_type: upload.file.content_type,
            })
            .collect();

        let operator = run
            .apply(&Submit {
                operator_id: operator.id,
                documents,
                bank_details: request.bank_details,
            })
            .await?;

        self.notify(
            operator.id,
            "verification_submitted",
            json!({ "documents": operator.documents.len() }),
        )
        .await;
        Ok(operator)
    }

    /// Approves or revokes an operator.
    #[tracing::instrument(skip(self, caller), fields(saga_type = OPERATOR_APPROVAL))]
    pub async fn toggle_approval(
        &self,
        operator_id: EntityId,
        caller: &Caller,
    ) -> SagaOutcome<Operator> {
        let mut run = self.executor.begin(OPERATOR_APPROVAL);
        let result = self.run_approval(&mut run, operator_id, caller).await;
        run.finish(result).await
    }

    async fn run_approval(
        &self,
        run: &mut SagaRun<'_, S>,
        operator_id: EntityId,
        caller: &Caller,
    ) -> Result<Operator> {
        caller.require_admin()?;
        let _: Operator = self.read(operator_id).await?;

        let operator = run.apply(&ToggleApproval { operator_id }).await?;

        let template = if operator.verified {
            "verification_approved"
        } else {
            "verification_revoked"
        };
        self.notify(operator.id, template, json!({})).await;
        Ok(operator)
    }
}
