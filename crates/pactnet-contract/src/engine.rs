//! Contract engine: drives the proposal → quote → agreement chain with
//! cryptographic non-repudiation at every step.
//!
//! Each record is signed by its author; both parties verify all three
//! signatures in the chain before a transaction advances to `Agreed`.
//! Verification failure is fatal to the transaction and logged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use pactnet_core::constants::{AGREEMENT_DEADLINE_SECS, QUOTE_VALID_SECS};
use pactnet_core::contract::{
    Agreement, TaskProposal, TaskQuote, Transaction, TransactionState,
};
use pactnet_core::types::{Amount, EntityId, PublicKeyHex, TaskId};
use pactnet_core::PactError;
use pactnet_crypto::Keypair;
use pactnet_proto::{sign_record, verify_record};

/// Local view of all contract negotiations, keyed by proposal id.
pub struct ContractEngine {
    keypair: Arc<Keypair>,
    peer_keys: Mutex<HashMap<EntityId, PublicKeyHex>>,
    transactions: Mutex<HashMap<String, Transaction>>,
}

impl ContractEngine {
    pub fn new(keypair: Arc<Keypair>) -> Self {
        Self {
            keypair,
            peer_keys: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.keypair.entity_id
    }

    /// Register a counterparty's Ed25519 public key.
    pub async fn register_public_key(&self, entity: EntityId, key: PublicKeyHex) {
        self.peer_keys.lock().await.insert(entity, key);
    }

    async fn key_for(&self, entity: &EntityId) -> Result<PublicKeyHex, PactError> {
        self.peer_keys
            .lock()
            .await
            .get(entity)
            .cloned()
            .ok_or_else(|| PactError::UnknownSender(entity.to_string()))
    }

    // ── Phase 1: proposal ────────────────────────────────────────────────────

    /// Build and sign a proposal, recording the transaction as `Proposed`.
    pub async fn create_proposal(
        &self,
        task_type: &str,
        description: &str,
        requirements: serde_json::Map<String, serde_json::Value>,
        budget: Amount,
        now: DateTime<Utc>,
    ) -> Result<TaskProposal, PactError> {
        if budget == 0 {
            return Err(PactError::InvalidAmount);
        }
        let mut proposal = TaskProposal {
            proposal_id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            description: description.into(),
            requirements,
            budget,
            client_id: self.keypair.entity_id.clone(),
            timestamp: now.to_rfc3339(),
            signature: None,
        };
        proposal.signature = Some(sign_record(&self.keypair, &proposal)?);

        self.transactions.lock().await.insert(
            proposal.proposal_id.clone(),
            Transaction::new(proposal.clone(), now.timestamp()),
        );
        tracing::info!(proposal = %proposal.proposal_id, budget, "proposal created");
        Ok(proposal)
    }

    // ── Phase 2: quote ───────────────────────────────────────────────────────

    /// Answer a (verified) proposal with a signed quote. The estimate must
    /// not exceed the proposal budget.
    pub async fn create_quote(
        &self,
        proposal: &TaskProposal,
        estimated_amount: Amount,
        estimated_time_secs: u64,
        terms: serde_json::Map<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<TaskQuote, PactError> {
        self.verify_proposal(proposal).await?;
        if estimated_amount == 0 || estimated_amount > proposal.budget {
            return Err(PactError::InvalidAmount);
        }
        let mut quote = TaskQuote {
            quote_id: uuid::Uuid::new_v4().to_string(),
            proposal_id: proposal.proposal_id.clone(),
            estimated_amount,
            estimated_time_secs,
            valid_until: (now + Duration::seconds(QUOTE_VALID_SECS)).to_rfc3339(),
            terms,
            provider_id: self.keypair.entity_id.clone(),
            timestamp: now.to_rfc3339(),
            signature: None,
        };
        quote.signature = Some(sign_record(&self.keypair, &quote)?);

        // Track the flow when we have seen the proposal locally.
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .entry(proposal.proposal_id.clone())
            .or_insert_with(|| Transaction::new(proposal.clone(), now.timestamp()));
        tx.quote = Some(quote.clone());
        tx.transition(TransactionState::Quoted, now.timestamp())?;
        tracing::info!(quote = %quote.quote_id, proposal = %proposal.proposal_id, "quote created");
        Ok(quote)
    }

    // ── Phase 3: agreement ───────────────────────────────────────────────────

    /// Accept a quote before its validity lapses, producing the signed
    /// agreement that binds the chain.
    pub async fn create_agreement(
        &self,
        proposal: &TaskProposal,
        quote: &TaskQuote,
        now: DateTime<Utc>,
    ) -> Result<Agreement, PactError> {
        self.verify_quote(quote).await?;
        if quote.proposal_id != proposal.proposal_id {
            return Err(PactError::InvalidJson(format!(
                "quote {} does not answer proposal {}",
                quote.quote_id, proposal.proposal_id
            )));
        }
        if !quote.is_valid_at(now) {
            return Err(PactError::QuoteExpired(quote.quote_id.clone()));
        }

        let task_id = TaskId::new(uuid::Uuid::new_v4().to_string());
        let mut agreement = Agreement {
            agreement_id: uuid::Uuid::new_v4().to_string(),
            quote_id: quote.quote_id.clone(),
            task_id: task_id.clone(),
            confirmed_amount: quote.estimated_amount,
            escrow_address: format!("escrow-{}", &task_id.as_str()[..8.min(task_id.as_str().len())]),
            deadline: (now + Duration::seconds(AGREEMENT_DEADLINE_SECS)).to_rfc3339(),
            client_id: self.keypair.entity_id.clone(),
            provider_id: quote.provider_id.clone(),
            timestamp: now.to_rfc3339(),
            signature: None,
        };
        agreement.signature = Some(sign_record(&self.keypair, &agreement)?);

        let mut transactions = self.transactions.lock().await;
        if let Some(tx) = transactions.get_mut(&quote.proposal_id) {
            tx.agreement = Some(agreement.clone());
            tx.transition(TransactionState::Agreed, now.timestamp())?;
        }
        tracing::info!(agreement = %agreement.agreement_id, task = %task_id, "agreement created");
        Ok(agreement)
    }

    // ── Verification ─────────────────────────────────────────────────────────

    pub async fn verify_proposal(&self, proposal: &TaskProposal) -> Result<(), PactError> {
        let key = self.key_for(&proposal.client_id).await?;
        let signature = proposal
            .signature
            .as_deref()
            .ok_or(PactError::InvalidSignature)?;
        verify_record(proposal, signature, key.as_str()).map_err(|e| {
            tracing::warn!(proposal = %proposal.proposal_id, "proposal signature invalid");
            e
        })
    }

    pub async fn verify_quote(&self, quote: &TaskQuote) -> Result<(), PactError> {
        let key = self.key_for(&quote.provider_id).await?;
        let signature = quote
            .signature
            .as_deref()
            .ok_or(PactError::InvalidSignature)?;
        verify_record(quote, signature, key.as_str()).map_err(|e| {
            tracing::warn!(quote = %quote.quote_id, "quote signature invalid");
            e
        })
    }

    pub async fn verify_agreement(&self, agreement: &Agreement) -> Result<(), PactError> {
        let key = self.key_for(&agreement.client_id).await?;
        let signature = agreement
            .signature
            .as_deref()
            .ok_or(PactError::InvalidSignature)?;
        verify_record(agreement, signature, key.as_str()).map_err(|e| {
            tracing::warn!(agreement = %agreement.agreement_id, "agreement signature invalid");
            e
        })
    }

    /// Verify the whole chain: back-pointers line up and all three
    /// signatures check out under their authors' registered keys.
    pub async fn verify_chain(
        &self,
        proposal: &TaskProposal,
        quote: &TaskQuote,
        agreement: &Agreement,
    ) -> Result<(), PactError> {
        if quote.proposal_id != proposal.proposal_id {
            return Err(PactError::InvalidJson("quote/proposal id mismatch".into()));
        }
        if agreement.quote_id != quote.quote_id {
            return Err(PactError::InvalidJson("agreement/quote id mismatch".into()));
        }
        self.verify_proposal(proposal).await?;
        self.verify_quote(quote).await?;
        self.verify_agreement(agreement).await?;
        Ok(())
    }

    // ── Transaction state ────────────────────────────────────────────────────

    /// Record an inbound (already verified) quote against our proposal.
    pub async fn record_quote(&self, quote: &TaskQuote, now: DateTime<Utc>) -> Result<(), PactError> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .get_mut(&quote.proposal_id)
            .ok_or_else(|| PactError::Internal(format!("unknown proposal {}", quote.proposal_id)))?;
        tx.quote = Some(quote.clone());
        tx.transition(TransactionState::Quoted, now.timestamp())
    }

    /// Record an inbound (already verified) agreement against our quote.
    pub async fn record_agreement(
        &self,
        proposal_id: &str,
        agreement: &Agreement,
        now: DateTime<Utc>,
    ) -> Result<(), PactError> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .get_mut(proposal_id)
            .ok_or_else(|| PactError::Internal(format!("unknown proposal {proposal_id}")))?;
        tx.agreement = Some(agreement.clone());
        tx.transition(TransactionState::Agreed, now.timestamp())
    }

    /// Advance a transaction through the settlement pipeline.
    pub async fn advance(
        &self,
        proposal_id: &str,
        to: TransactionState,
        now: DateTime<Utc>,
    ) -> Result<(), PactError> {
        let mut transactions = self.transactions.lock().await;
        let tx = transactions
            .get_mut(proposal_id)
            .ok_or_else(|| PactError::Internal(format!("unknown proposal {proposal_id}")))?;
        tx.transition(to, now.timestamp())
    }

    pub async fn transaction(&self, proposal_id: &str) -> Option<Transaction> {
        self.transactions.lock().await.get(proposal_id).cloned()
    }

    pub async fn list_by_state(&self, state: Option<TransactionState>) -> Vec<Transaction> {
        self.transactions
            .lock()
            .await
            .values()
            .filter(|tx| state.map(|s| tx.state == s).unwrap_or(true))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engines() -> (ContractEngine, ContractEngine) {
        let client_kp = Arc::new(Keypair::generate("client".into()));
        let provider_kp = Arc::new(Keypair::generate("provider".into()));
        let client = ContractEngine::new(Arc::clone(&client_kp));
        let provider = ContractEngine::new(Arc::clone(&provider_kp));

        client
            .register_public_key("provider".into(), provider_kp.public_key_hex())
            .await;
        client
            .register_public_key("client".into(), client_kp.public_key_hex())
            .await;
        provider
            .register_public_key("client".into(), client_kp.public_key_hex())
            .await;
        provider
            .register_public_key("provider".into(), provider_kp.public_key_hex())
            .await;
        (client, provider)
    }

    #[tokio::test]
    async fn full_chain_negotiation_and_verification() {
        let (client, provider) = engines().await;
        let now = Utc::now();

        let proposal = client
            .create_proposal("code_review", "review module", Default::default(), 1_000, now)
            .await
            .unwrap();
        let quote = provider
            .create_quote(&proposal, 800, 3_600, Default::default(), now)
            .await
            .unwrap();
        let agreement = client.create_agreement(&proposal, &quote, now).await.unwrap();

        assert_eq!(quote.proposal_id, proposal.proposal_id);
        assert_eq!(agreement.quote_id, quote.quote_id);
        assert_eq!(agreement.confirmed_amount, 800);

        // Both sides can verify the complete chain.
        client.verify_chain(&proposal, &quote, &agreement).await.unwrap();
        provider.verify_chain(&proposal, &quote, &agreement).await.unwrap();

        let tx = client.transaction(&proposal.proposal_id).await.unwrap();
        assert_eq!(tx.state, TransactionState::Agreed);
    }

    #[tokio::test]
    async fn quote_over_budget_is_refused() {
        let (client, provider) = engines().await;
        let now = Utc::now();
        let proposal = client
            .create_proposal("testing", "run suite", Default::default(), 500, now)
            .await
            .unwrap();
        let err = provider
            .create_quote(&proposal, 600, 60, Default::default(), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn expired_quote_cannot_become_agreement() {
        let (client, provider) = engines().await;
        let now = Utc::now();
        let proposal = client
            .create_proposal("docs", "write docs", Default::default(), 500, now)
            .await
            .unwrap();
        let quote = provider
            .create_quote(&proposal, 400, 60, Default::default(), now)
            .await
            .unwrap();

        let late = now + Duration::seconds(QUOTE_VALID_SECS + 60);
        let err = client
            .create_agreement(&proposal, &quote, late)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "QUOTE_EXPIRED");
    }

    #[tokio::test]
    async fn tampered_proposal_fails_chain_verification() {
        let (client, provider) = engines().await;
        let now = Utc::now();
        let proposal = client
            .create_proposal("analysis", "analyze data", Default::default(), 1_000, now)
            .await
            .unwrap();
        let quote = provider
            .create_quote(&proposal, 900, 60, Default::default(), now)
            .await
            .unwrap();
        let agreement = client.create_agreement(&proposal, &quote, now).await.unwrap();

        let mut forged = proposal.clone();
        forged.budget = 10_000;
        let err = provider
            .verify_chain(&forged, &quote, &agreement)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn unknown_signer_is_reported() {
        let (client, _) = engines().await;
        let now = Utc::now();
        let stranger = Arc::new(Keypair::generate("stranger".into()));
        let stranger_engine = ContractEngine::new(stranger);
        let proposal = stranger_engine
            .create_proposal("misc", "mystery work", Default::default(), 100, now)
            .await
            .unwrap();
        let err = client.verify_proposal(&proposal).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_SENDER");
    }

    #[tokio::test]
    async fn settlement_pipeline_advances_in_order() {
        let (client, provider) = engines().await;
        let now = Utc::now();
        let proposal = client
            .create_proposal("job", "do the job", Default::default(), 1_000, now)
            .await
            .unwrap();
        let quote = provider
            .create_quote(&proposal, 800, 60, Default::default(), now)
            .await
            .unwrap();
        client.create_agreement(&proposal, &quote, now).await.unwrap();

        let id = proposal.proposal_id.as_str();
        client.advance(id, TransactionState::Locked, now).await.unwrap();
        client.advance(id, TransactionState::Executing, now).await.unwrap();
        client.advance(id, TransactionState::Completed, now).await.unwrap();
        client.advance(id, TransactionState::Released, now).await.unwrap();

        // Terminal: nothing further.
        let err = client
            .advance(id, TransactionState::Disputed, now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STATE_TRANSITION_INVALID");
    }
}
