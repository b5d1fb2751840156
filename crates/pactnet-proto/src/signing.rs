//! Envelope construction, signing and verification.
//!
//! The envelope signature is Ed25519 over SHA-256 of the canonical
//! concatenation defined by [`WireMessage::signing_input`]. Contract records
//! (proposal/quote/agreement) sign the canonical-JSON rendering of the record
//! with its `signature` field removed.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pactnet_core::constants::{NONCE_BYTES, PROTOCOL_VERSION, TIMESTAMP_TOLERANCE_SECS};
use pactnet_core::message::{is_supported_version, MessageBody, WireMessage};
use pactnet_core::types::{EntityId, Sequence, SessionId};
use pactnet_core::PactError;
use pactnet_crypto::{canonical_json, verify_digest_b64, Keypair};

/// Generate a fresh 16-byte hex nonce.
pub fn fresh_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

/// Build and sign a v1.1 envelope around `body`.
pub fn build_message(
    keypair: &Keypair,
    recipient: &EntityId,
    body: &MessageBody,
    session: Option<(SessionId, Sequence)>,
) -> WireMessage {
    let mut msg = WireMessage {
        version: PROTOCOL_VERSION.into(),
        msg_type: body.msg_type().into(),
        sender_id: keypair.entity_id.clone(),
        recipient_id: recipient.clone(),
        session_id: session.map(|(id, _)| id),
        sequence: session.map(|(_, seq)| seq),
        timestamp: Utc::now().to_rfc3339(),
        nonce: fresh_nonce(),
        payload: body.to_payload(),
        signature: None,
    };
    msg.signature = Some(keypair.sign_digest_b64(msg.signing_input().as_bytes()));
    msg
}

/// Re-sign an existing envelope with a fresh nonce and timestamp, keeping its
/// sequence number. Used when answering a NACK with a retransmission.
pub fn refresh_and_sign(keypair: &Keypair, msg: &mut WireMessage) {
    msg.timestamp = Utc::now().to_rfc3339();
    msg.nonce = fresh_nonce();
    msg.signature = Some(keypair.sign_digest_b64(msg.signing_input().as_bytes()));
}

/// Structural validation: version, recipient, timestamp window. Replay and
/// signature checks are separate stages (see the receive pipeline).
pub fn validate_envelope(
    msg: &WireMessage,
    local_id: &EntityId,
    now: DateTime<Utc>,
) -> Result<(), PactError> {
    if !is_supported_version(&msg.version) {
        return Err(PactError::InvalidVersion(msg.version.clone()));
    }
    if &msg.recipient_id != local_id {
        return Err(PactError::UnknownRecipient(msg.recipient_id.to_string()));
    }
    let ts = msg.timestamp_utc()?;
    let skew = (now - ts).num_seconds().abs();
    if skew > TIMESTAMP_TOLERANCE_SECS {
        return Err(PactError::ExpiredTimestamp { skew_secs: skew });
    }
    Ok(())
}

/// Verify the envelope signature against the sender's registered key.
pub fn verify_envelope(msg: &WireMessage, sender_public_key_hex: &str) -> Result<(), PactError> {
    let signature = msg
        .signature
        .as_deref()
        .ok_or(PactError::InvalidSignature)?;
    verify_digest_b64(
        sender_public_key_hex,
        msg.signing_input().as_bytes(),
        signature,
    )
}

// ── Contract record signing ──────────────────────────────────────────────────

/// Canonical signable bytes of a record: serialize, drop `signature`, render
/// with recursively sorted keys.
pub fn record_signing_input<T: Serialize>(record: &T) -> Result<String, PactError> {
    let mut value =
        serde_json::to_value(record).map_err(|e| PactError::Internal(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("signature");
    }
    Ok(canonical_json(&value))
}

/// Sign a contract record, returning the base64 signature to store in its
/// `signature` field.
pub fn sign_record<T: Serialize>(keypair: &Keypair, record: &T) -> Result<String, PactError> {
    let input = record_signing_input(record)?;
    Ok(keypair.sign_digest_b64(input.as_bytes()))
}

/// Verify a contract record's detached signature.
pub fn verify_record<T: Serialize>(
    record: &T,
    signature_b64: &str,
    signer_public_key_hex: &str,
) -> Result<(), PactError> {
    let input = record_signing_input(record)?;
    verify_digest_b64(signer_public_key_hex, input.as_bytes(), signature_b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_core::message::PingBody;

    fn keypair(id: &str) -> Keypair {
        Keypair::generate(id.into())
    }

    #[test]
    fn built_message_verifies() {
        let kp = keypair("alice");
        let msg = build_message(&kp, &"bob".into(), &MessageBody::Ping(PingBody::default()), None);
        verify_envelope(&msg, kp.public_key_hex().as_str()).unwrap();
        validate_envelope(&msg, &"bob".into(), Utc::now()).unwrap();
    }

    #[test]
    fn wrong_recipient_rejected() {
        let kp = keypair("alice");
        let msg = build_message(&kp, &"bob".into(), &MessageBody::Ping(PingBody::default()), None);
        let err = validate_envelope(&msg, &"carol".into(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_RECIPIENT");
    }

    #[test]
    fn stale_timestamp_rejected() {
        let kp = keypair("alice");
        let msg = build_message(&kp, &"bob".into(), &MessageBody::Ping(PingBody::default()), None);
        let future = Utc::now() + chrono::Duration::seconds(TIMESTAMP_TOLERANCE_SECS + 10);
        let err = validate_envelope(&msg, &"bob".into(), future).unwrap_err();
        assert_eq!(err.code(), "EXPIRED_TIMESTAMP");
    }

    #[test]
    fn bad_version_rejected() {
        let kp = keypair("alice");
        let mut msg =
            build_message(&kp, &"bob".into(), &MessageBody::Ping(PingBody::default()), None);
        msg.version = "0.9".into();
        let err = validate_envelope(&msg, &"bob".into(), Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_VERSION");
    }

    #[test]
    fn altered_payload_breaks_signature() {
        let kp = keypair("alice");
        let mut msg =
            build_message(&kp, &"bob".into(), &MessageBody::Ping(PingBody::default()), None);
        msg.payload.data.push('A');
        assert!(verify_envelope(&msg, kp.public_key_hex().as_str()).is_err());
    }

    #[test]
    fn refresh_keeps_sequence_but_changes_nonce() {
        let kp = keypair("alice");
        let session = (uuid::Uuid::new_v4(), 7);
        let mut msg = build_message(
            &kp,
            &"bob".into(),
            &MessageBody::Ping(PingBody::default()),
            Some(session),
        );
        let old_nonce = msg.nonce.clone();
        refresh_and_sign(&kp, &mut msg);
        assert_eq!(msg.sequence, Some(7));
        assert_ne!(msg.nonce, old_nonce);
        verify_envelope(&msg, kp.public_key_hex().as_str()).unwrap();
    }

    #[test]
    fn record_signature_round_trip() {
        let kp = keypair("client");
        let proposal = pactnet_core::TaskProposal {
            proposal_id: "p1".into(),
            task_type: "analysis".into(),
            description: "analyze logs".into(),
            requirements: Default::default(),
            budget: 1_000,
            client_id: kp.entity_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            signature: None,
        };
        let sig = sign_record(&kp, &proposal).unwrap();
        verify_record(&proposal, &sig, kp.public_key_hex().as_str()).unwrap();

        let mut altered = proposal.clone();
        altered.budget = 2_000;
        assert!(verify_record(&altered, &sig, kp.public_key_hex().as_str()).is_err());
    }
}
