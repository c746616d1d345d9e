//! End-to-end pipeline scenarios against the in-memory backend, using the
//! real paystack adapter and real HMAC-SHA512 signatures.

use hmac::{Hmac, Mac};
use payhook_dispatch::{DispatchPayload, EventHandler, HandlerRegistry, OutboxConfig};
use payhook_pipeline::{ProcessorConfig, WebhookProcessor};
use payhook_storage::{
    AuditAction, InMemoryStorage, NewTransaction, Storage, TransactionQuery,
};
use payhook_types::{
    Currency, Money, NormalizedEventType, ProcessingStatus, TransactionStatus, TriggerType,
    VerificationMethod,
};
use serde_json::json;
use sha2::Sha512;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SECRET: &str = "sk_test_AAA";

fn charge_success_body(reference: &str, amount: u64, charge_id: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": {
            "id": charge_id,
            "reference": reference,
            "amount": amount,
            "currency": "NGN",
            "channel": "card",
            "paid_at": "2024-06-01T12:00:00Z",
            "customer": { "email": "buyer@example.com" }
        }
    }))
    .unwrap()
}

fn signed_headers(body: &[u8], secret: &str) -> HashMap<String, String> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let mut headers = HashMap::new();
    headers.insert(
        "x-paystack-signature".to_string(),
        hex::encode(mac.finalize().into_bytes()),
    );
    headers
}

fn processor_config() -> ProcessorConfig {
    let mut config = ProcessorConfig::default();
    config
        .secrets
        .insert("paystack".to_string(), vec![SECRET.to_string()]);
    config
}

fn build_processor(
    storage: Arc<InMemoryStorage>,
    config: ProcessorConfig,
) -> WebhookProcessor {
    WebhookProcessor::builder()
        .storage(storage)
        .config(config)
        .build()
}

async fn seed_processing_transaction(storage: &InMemoryStorage) -> payhook_types::TransactionId {
    let tx = storage
        .create_transaction(NewTransaction {
            application_ref: "order_1".to_string(),
            provider: "paystack".to_string(),
            provider_ref: Some("ref_1".to_string()),
            status: TransactionStatus::Processing,
            money: Money::new(10000, Currency::new("NGN").unwrap()),
            verification_method: VerificationMethod::WebhookOnly,
            metadata: json!({}),
            provider_created_at: None,
        })
        .await
        .unwrap();
    tx.id
}

async fn status_change_audits(
    storage: &InMemoryStorage,
    tx_id: payhook_types::TransactionId,
) -> Vec<payhook_storage::AuditLogRecord> {
    storage
        .list_audit_logs(tx_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.action == AuditAction::StatusChanged)
        .collect()
}

// ---------------------------------------------------------------------------
// E1 - happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_applies_transition_with_audit() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx_id = seed_processing_transaction(&storage).await;
    let processor = build_processor(storage.clone(), processor_config());

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    assert_eq!(result.processing_status, ProcessingStatus::Processed);
    assert!(result.success);
    assert_eq!(result.transaction_id, Some(tx_id));

    let tx = storage
        .find_transaction(&TransactionQuery::ById(tx_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Successful);

    let transitions = status_change_audits(&storage, tx_id).await;
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].state_before, Some(TransactionStatus::Processing));
    assert_eq!(transitions[0].state_after, TransactionStatus::Successful);
    assert_eq!(transitions[0].trigger, TriggerType::Webhook);
    assert_eq!(transitions[0].webhook_log_id, result.webhook_log_id);

    // The claim record is linked to the transaction
    let log = storage
        .find_webhook_log(result.webhook_log_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.transaction_id, Some(tx_id));
    assert!(log.signature_valid);
    assert_eq!(log.processing_status, ProcessingStatus::Processed);
    assert!(log.processing_duration_ms.is_some());
}

// ---------------------------------------------------------------------------
// E2 - duplicate delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_delivery_gets_duplicate_fate() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx_id = seed_processing_transaction(&storage).await;
    let processor = build_processor(storage.clone(), processor_config());

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);

    let first = processor
        .process("paystack", body.clone(), headers.clone())
        .await
        .unwrap();
    assert_eq!(first.processing_status, ProcessingStatus::Processed);

    let second = processor
        .process("paystack", body, headers)
        .await
        .unwrap();
    assert_eq!(second.processing_status, ProcessingStatus::Duplicate);

    // Status unchanged, still exactly one transition audit
    let tx = storage
        .find_transaction(&TransactionQuery::ById(tx_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Successful);
    assert_eq!(status_change_audits(&storage, tx_id).await.len(), 1);

    // Both claims are recorded, the second with the DUPLICATE fate
    let logs = storage
        .find_webhook_logs("paystack", "charge.success:1001")
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].processing_status, ProcessingStatus::Duplicate);
}

// ---------------------------------------------------------------------------
// E3 - bad signature
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_signature_is_recorded_without_transition() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx_id = seed_processing_transaction(&storage).await;
    let processor = build_processor(storage.clone(), processor_config());

    let body = charge_success_body("ref_1", 10000, 1001);
    let mut headers = signed_headers(&body, SECRET);
    headers.insert(
        "x-paystack-signature".to_string(),
        "deadbeef".repeat(16),
    );

    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();
    assert_eq!(result.processing_status, ProcessingStatus::SignatureFailed);
    assert!(!result.success);

    let log = storage
        .find_webhook_log(result.webhook_log_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(!log.signature_valid);
    assert_eq!(log.processing_status, ProcessingStatus::SignatureFailed);
    assert_eq!(log.transaction_id, None);

    // No transition, no webhook-triggered audit rows at all
    let tx = storage
        .find_transaction(&TransactionQuery::ById(tx_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Processing);
    assert!(storage.list_audit_logs(tx_id).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// E4 - unmatched claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unmatched_reference_yields_unmatched_fate() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx_id = seed_processing_transaction(&storage).await;
    let processor = build_processor(storage.clone(), processor_config());

    let body = charge_success_body("ref_unknown", 10000, 2002);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    assert_eq!(result.processing_status, ProcessingStatus::Unmatched);
    assert_eq!(result.transaction_id, None);

    let log = storage
        .find_webhook_log(result.webhook_log_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.transaction_id, None);
    assert_eq!(log.processing_status, ProcessingStatus::Unmatched);

    // Auto-create is off: nothing new exists, nothing was audited
    assert!(storage.list_audit_logs(tx_id).await.unwrap().is_empty());
    assert!(storage
        .find_transaction(&TransactionQuery::ByProviderRef {
            provider: "paystack".to_string(),
            provider_ref: "ref_unknown".to_string(),
        })
        .await
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// E5 - illegal transition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_transaction_rejects_transition() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx = storage
        .create_transaction(NewTransaction {
            application_ref: "order_1".to_string(),
            provider: "paystack".to_string(),
            provider_ref: Some("ref_1".to_string()),
            status: TransactionStatus::Refunded,
            money: Money::new(10000, Currency::new("NGN").unwrap()),
            verification_method: VerificationMethod::WebhookOnly,
            metadata: json!({}),
            provider_created_at: None,
        })
        .await
        .unwrap();
    let processor = build_processor(storage.clone(), processor_config());

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    assert_eq!(result.processing_status, ProcessingStatus::TransitionRejected);

    let current = storage
        .find_transaction(&TransactionQuery::ById(tx.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status, TransactionStatus::Refunded);

    let audits = storage.list_audit_logs(tx.id).await.unwrap();
    let rejection = audits
        .iter()
        .find(|a| a.action == AuditAction::TransitionRejected)
        .expect("rejection audit row");
    assert_eq!(rejection.state_before, Some(TransactionStatus::Refunded));
    assert_eq!(rejection.state_after, TransactionStatus::Refunded);
    assert!(rejection.metadata["rejection_reason"]
        .as_str()
        .unwrap()
        .contains("terminal"));
}

// ---------------------------------------------------------------------------
// E6 - concurrent duplicates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_duplicates_apply_exactly_one_transition() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx_id = seed_processing_transaction(&storage).await;
    let processor = Arc::new(build_processor(storage.clone(), processor_config()));

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);

    let (a, b) = tokio::join!(
        processor.process("paystack", body.clone(), headers.clone()),
        processor.process("paystack", body.clone(), headers.clone()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let fates = [a.processing_status, b.processing_status];
    // Either the second claim was deduplicated or it lost the row-lock
    // race; both satisfy the one-transition guarantee
    assert!(
        fates.contains(&ProcessingStatus::Processed),
        "one claim must win: {fates:?}"
    );
    assert!(
        fates.contains(&ProcessingStatus::Duplicate)
            || fates.contains(&ProcessingStatus::TransitionRejected),
        "the other claim must be absorbed: {fates:?}"
    );

    let tx = storage
        .find_transaction(&TransactionQuery::ById(tx_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Successful);
    assert_eq!(
        status_change_audits(&storage, tx_id).await.len(),
        1,
        "exactly one persisted transition"
    );
}

// ---------------------------------------------------------------------------
// Outbox coupling (transition + outbox row in one commit)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn outbox_row_written_with_transition() {
    let storage = Arc::new(InMemoryStorage::new());
    seed_processing_transaction(&storage).await;

    let mut config = processor_config();
    config.outbox = OutboxConfig {
        enabled: true,
        ..OutboxConfig::default()
    };
    let processor = build_processor(storage.clone(), config);

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();
    assert_eq!(result.processing_status, ProcessingStatus::Processed);

    let events = storage.all_outbox_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "PAYMENT_SUCCESSFUL");
    assert_eq!(events[0].aggregate_type, "transaction");

    // No inline dispatch happened
    assert!(storage.all_dispatch_logs().await.is_empty());
}

#[tokio::test]
async fn rejected_transition_writes_no_outbox_row() {
    let storage = Arc::new(InMemoryStorage::new());
    storage
        .create_transaction(NewTransaction {
            application_ref: "order_1".to_string(),
            provider: "paystack".to_string(),
            provider_ref: Some("ref_1".to_string()),
            status: TransactionStatus::Refunded,
            money: Money::new(10000, Currency::new("NGN").unwrap()),
            verification_method: VerificationMethod::WebhookOnly,
            metadata: json!({}),
            provider_created_at: None,
        })
        .await
        .unwrap();

    let mut config = processor_config();
    config.outbox = OutboxConfig {
        enabled: true,
        ..OutboxConfig::default()
    };
    let processor = build_processor(storage.clone(), config);

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();
    assert_eq!(result.processing_status, ProcessingStatus::TransitionRejected);
    assert!(storage.all_outbox_events().await.is_empty());
}

// ---------------------------------------------------------------------------
// Inline dispatch
// ---------------------------------------------------------------------------

struct Recording {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl EventHandler for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(
        &self,
        _payload: &DispatchPayload,
    ) -> Result<(), payhook_dispatch::DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn inline_dispatch_invokes_handlers_and_logs() {
    let storage = Arc::new(InMemoryStorage::new());
    seed_processing_transaction(&storage).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let handlers = HandlerRegistry::new().on(
        NormalizedEventType::PaymentSuccessful,
        Arc::new(Recording {
            calls: calls.clone(),
        }),
    );
    let processor = WebhookProcessor::builder()
        .storage(storage.clone())
        .handlers(handlers)
        .config(processor_config())
        .build();

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    assert_eq!(result.processing_status, ProcessingStatus::Processed);
    assert!(result.metrics.flags.dispatched);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let logs = storage.all_dispatch_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].handler_name, "recording");
    assert!(!logs[0].is_replay);
}

#[tokio::test]
async fn duplicate_fate_suppresses_dispatch() {
    let storage = Arc::new(InMemoryStorage::new());
    seed_processing_transaction(&storage).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let handlers = HandlerRegistry::new().on(
        NormalizedEventType::PaymentSuccessful,
        Arc::new(Recording {
            calls: calls.clone(),
        }),
    );
    let processor = WebhookProcessor::builder()
        .storage(storage.clone())
        .handlers(handlers)
        .config(processor_config())
        .build();

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    processor
        .process("paystack", body.clone(), headers.clone())
        .await
        .unwrap();
    processor.process("paystack", body, headers).await.unwrap();

    // The duplicate never reached the handlers
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Auto-create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_create_builds_pending_then_transitions() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut config = processor_config();
    config.auto_create_transactions = true;
    let processor = build_processor(storage.clone(), config);

    // charge.success for a transaction nobody pre-created; auto-create
    // makes a PENDING row, but PENDING -> SUCCESSFUL is not a legal edge,
    // so the claim ends rejected while the transaction is preserved
    let body = charge_success_body("ref_new", 7000, 3003);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    let tx = storage
        .find_transaction(&TransactionQuery::ByProviderRef {
            provider: "paystack".to_string(),
            provider_ref: "ref_new".to_string(),
        })
        .await
        .unwrap()
        .expect("auto-created transaction");
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(result.processing_status, ProcessingStatus::TransitionRejected);

    let audits = storage.list_audit_logs(tx.id).await.unwrap();
    assert!(audits
        .iter()
        .any(|a| a.action == AuditAction::TransactionCreated));
}

// ---------------------------------------------------------------------------
// Parse failures and redaction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unparseable_body_gets_parse_error_with_record() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut config = processor_config();
    config.skip_signature_verification = true;
    let processor = build_processor(storage.clone(), config);

    let result = processor
        .process("paystack", b"not json at all".to_vec(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(result.processing_status, ProcessingStatus::ParseError);
    // Fate totality: even unparseable claims leave a record
    let log = storage
        .find_webhook_log(result.webhook_log_id.expect("claim recorded"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.processing_status, ProcessingStatus::ParseError);
}

#[tokio::test]
async fn unknown_event_gets_normalization_failed() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut config = processor_config();
    config.skip_signature_verification = true;
    let processor = build_processor(storage.clone(), config);

    let body = serde_json::to_vec(&json!({
        "event": "subscription.create",
        "data": { "id": 1, "reference": "r", "amount": 1, "currency": "NGN" }
    }))
    .unwrap();
    let result = processor
        .process("paystack", body, HashMap::new())
        .await
        .unwrap();
    assert_eq!(
        result.processing_status,
        ProcessingStatus::NormalizationFailed
    );
    assert!(result.webhook_log_id.is_some());
}

#[tokio::test]
async fn stored_payload_and_headers_are_redacted() {
    let storage = Arc::new(InMemoryStorage::new());
    seed_processing_transaction(&storage).await;
    let processor = build_processor(storage.clone(), processor_config());

    let body = serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": {
            "id": 1001,
            "reference": "ref_1",
            "amount": 10000,
            "currency": "NGN",
            "card_last4": "4242",
            "authorization": { "authorization_code": "AUTH_x" }
        }
    }))
    .unwrap();
    let mut headers = signed_headers(&body, SECRET);
    headers.insert("authorization".to_string(), "Bearer secret-token".to_string());

    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    let log = storage
        .find_webhook_log(result.webhook_log_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.raw_payload["data"]["card_last4"], "[REDACTED]");
    assert_eq!(log.raw_payload["data"]["authorization"], "[REDACTED]");
    assert_eq!(log.headers["authorization"], "[REDACTED]");
    // Non-sensitive fields survive
    assert_eq!(log.raw_payload["data"]["amount"], 10000);
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replay_redispatches_with_replay_flag() {
    let storage = Arc::new(InMemoryStorage::new());
    seed_processing_transaction(&storage).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let handlers = HandlerRegistry::new().on(
        NormalizedEventType::PaymentSuccessful,
        Arc::new(Recording {
            calls: calls.clone(),
        }),
    );
    let processor = WebhookProcessor::builder()
        .storage(storage.clone())
        .handlers(handlers)
        .config(processor_config())
        .build();

    let body = charge_success_body("ref_1", 10000, 1001);
    let headers = signed_headers(&body, SECRET);
    let result = processor
        .process("paystack", body, headers)
        .await
        .unwrap();

    let summary = processor
        .replay_dispatch(result.webhook_log_id.unwrap())
        .await
        .unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let logs = storage.all_dispatch_logs().await;
    assert_eq!(logs.len(), 2);
    assert!(logs[1].is_replay);
}

// ---------------------------------------------------------------------------
// Manual transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_transition_honors_and_overrides_table() {
    let storage = Arc::new(InMemoryStorage::new());
    let tx_id = seed_processing_transaction(&storage).await;
    let processor = build_processor(storage.clone(), processor_config());

    // Off-table edge without force: rejected
    let err = processor
        .apply_manual_transition(payhook_pipeline::ManualTransitionRequest {
            transaction_id: tx_id,
            target: TransactionStatus::Refunded,
            force: false,
            actor: "ops@merchant".to_string(),
            reason: Some("customer call".to_string()),
        })
        .await;
    assert!(err.is_err());

    // Same edge with force: applied and audited with the MANUAL trigger
    let updated = processor
        .apply_manual_transition(payhook_pipeline::ManualTransitionRequest {
            transaction_id: tx_id,
            target: TransactionStatus::Refunded,
            force: true,
            actor: "ops@merchant".to_string(),
            reason: Some("customer call".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(updated.status, TransactionStatus::Refunded);

    let audits = status_change_audits(&storage, tx_id).await;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].trigger, TriggerType::Manual);
    assert_eq!(audits[0].actor, "ops@merchant");
}
