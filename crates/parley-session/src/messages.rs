//! Message log with optimistic local echo and reconciliation.
//!
//! An outgoing message is appended locally right away under a
//! placeholder uuid; when the server echoes it back with its real uuid
//! and timestamp, the local entry is replaced in place so the log
//! never shows the message twice.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use parley_shared::constants::TEMP_MESSAGE_UUID;
use parley_shared::crypto::{self, SymmetricKey};
use parley_shared::protocol::{self, ChatMessageFrame};
use parley_shared::types::UserId;

use crate::error::SessionError;

/// One decrypted entry in the log, as shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub uuid: String,
    pub user_id: UserId,
    pub cipher: String,
    pub iv: String,
    pub sent_at: NaiveDateTime,
    pub text: String,
}

impl ChatMessage {
    fn is_pending(&self) -> bool {
        self.uuid == TEMP_MESSAGE_UUID
    }
}

/// Encrypt an outgoing message under the group key.
///
/// Returns the frame to send (uuid and timestamp left for the server
/// to assign) plus the optimistic local entry to append meanwhile.
pub fn encode_outgoing(
    key: Option<&SymmetricKey>,
    user_id: &UserId,
    text: &str,
) -> Result<(ChatMessageFrame, ChatMessage), SessionError> {
    let key = key.ok_or(SessionError::MissingGroupKey)?;

    let (ciphertext, nonce) = crypto::encrypt(key, text.as_bytes())?;
    let cipher = protocol::encode_b64(&ciphertext);
    let iv = protocol::encode_b64(&nonce);

    let frame = ChatMessageFrame {
        uuid: None,
        user_id: user_id.clone(),
        cipher: cipher.clone(),
        iv: iv.clone(),
        message_sent_at: None,
    };
    let local = ChatMessage {
        uuid: TEMP_MESSAGE_UUID.to_string(),
        user_id: user_id.clone(),
        cipher,
        iv,
        sent_at: protocol::now_seconds(),
        text: text.to_string(),
    };
    Ok((frame, local))
}

/// Decrypt an incoming message frame into a log entry.
///
/// Decryption failure is survivable by design: the entry is kept with
/// `placeholder` as its text so the stream stays complete.
pub fn decode_incoming(
    key: Option<&SymmetricKey>,
    frame: &ChatMessageFrame,
    placeholder: &str,
) -> ChatMessage {
    let text = try_decrypt(key, frame).unwrap_or_else(|err| {
        warn!(from = %frame.user_id, %err, "message failed to decrypt");
        placeholder.to_string()
    });

    ChatMessage {
        uuid: frame.uuid.clone().unwrap_or_else(|| TEMP_MESSAGE_UUID.to_string()),
        user_id: frame.user_id.clone(),
        cipher: frame.cipher.clone(),
        iv: frame.iv.clone(),
        sent_at: frame.message_sent_at.unwrap_or_else(protocol::now_seconds),
        text,
    }
}

fn try_decrypt(
    key: Option<&SymmetricKey>,
    frame: &ChatMessageFrame,
) -> Result<String, SessionError> {
    let key = key.ok_or(SessionError::MissingGroupKey)?;
    let ciphertext = protocol::decode_b64(&frame.cipher, "cipher")?;
    let nonce = protocol::decode_b64(&frame.iv, "iv")?;
    let plaintext = crypto::decrypt(key, &ciphertext, &nonce)?;
    String::from_utf8(plaintext)
        .map_err(|_| SessionError::Crypto(parley_shared::error::CryptoError::DecryptionFailed))
}

#[derive(Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an optimistic local entry.
    pub fn push_local(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    /// Fold a decoded incoming message into the log.
    ///
    /// If it is the server echo of one of our pending entries (same
    /// sender and same ciphertext), the oldest matching entry is
    /// replaced in place; otherwise it is appended.
    pub fn reconcile(&mut self, incoming: ChatMessage) {
        let pending = self.entries.iter_mut().find(|entry| {
            entry.is_pending()
                && entry.user_id == incoming.user_id
                && entry.cipher == incoming.cipher
        });

        match pending {
            Some(entry) => {
                debug!(uuid = %incoming.uuid, "confirmed pending message");
                *entry = incoming;
            }
            None => self.entries.push(incoming),
        }
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::crypto::generate_group_key;

    fn echo_of(frame: &ChatMessageFrame, uuid: &str) -> ChatMessageFrame {
        ChatMessageFrame {
            uuid: Some(uuid.to_string()),
            message_sent_at: Some(protocol::now_seconds()),
            ..frame.clone()
        }
    }

    #[test]
    fn test_encode_without_key_is_refused() {
        assert!(matches!(
            encode_outgoing(None, &UserId::from("me"), "hi"),
            Err(SessionError::MissingGroupKey)
        ));
    }

    #[test]
    fn test_outgoing_roundtrips_through_decode() {
        let key = generate_group_key();
        let (frame, local) = encode_outgoing(Some(&key), &UserId::from("me"), "hello there").unwrap();

        assert_eq!(frame.uuid, None);
        assert_eq!(frame.message_sent_at, None);
        assert_eq!(local.uuid, TEMP_MESSAGE_UUID);
        assert_eq!(local.text, "hello there");

        let decoded = decode_incoming(Some(&key), &echo_of(&frame, "srv-1"), "?");
        assert_eq!(decoded.text, "hello there");
        assert_eq!(decoded.uuid, "srv-1");
    }

    #[test]
    fn test_decode_failure_yields_placeholder() {
        let key = generate_group_key();
        let other_key = generate_group_key();
        let (frame, _) = encode_outgoing(Some(&key), &UserId::from("me"), "secret").unwrap();

        let wrong_key = decode_incoming(Some(&other_key), &echo_of(&frame, "x"), "unreadable");
        assert_eq!(wrong_key.text, "unreadable");

        let no_key = decode_incoming(None, &echo_of(&frame, "x"), "unreadable");
        assert_eq!(no_key.text, "unreadable");
        // ciphertext is preserved either way
        assert_eq!(no_key.cipher, frame.cipher);
    }

    #[test]
    fn test_reconcile_replaces_pending_in_place() {
        let key = generate_group_key();
        let me = UserId::from("me");
        let mut log = MessageLog::new();

        let (first_frame, first_local) = encode_outgoing(Some(&key), &me, "one").unwrap();
        let (_, second_local) = encode_outgoing(Some(&key), &me, "two").unwrap();
        log.push_local(first_local);
        log.push_local(second_local);

        log.reconcile(decode_incoming(Some(&key), &echo_of(&first_frame, "srv-1"), "?"));

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].uuid, "srv-1");
        assert_eq!(entries[0].text, "one");
        assert_eq!(entries[1].uuid, TEMP_MESSAGE_UUID);
    }

    #[test]
    fn test_reconcile_appends_foreign_messages() {
        let key = generate_group_key();
        let mut log = MessageLog::new();

        let (frame, local) = encode_outgoing(Some(&key), &UserId::from("me"), "mine").unwrap();
        log.push_local(local);

        let (peer_frame, _) = encode_outgoing(Some(&key), &UserId::from("alice"), "hers").unwrap();
        log.reconcile(decode_incoming(Some(&key), &echo_of(&peer_frame, "srv-9"), "?"));

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].user_id, UserId::from("alice"));

        // our own echo still reconciles after the interleaving
        log.reconcile(decode_incoming(Some(&key), &echo_of(&frame, "srv-10"), "?"));
        assert_eq!(log.snapshot().len(), 2);
    }

    #[test]
    fn test_identical_texts_confirm_oldest_first() {
        let key = generate_group_key();
        let me = UserId::from("me");
        let mut log = MessageLog::new();

        // Same text twice still produces distinct ciphertexts (fresh
        // nonce), so each echo matches exactly one pending entry.
        let (f1, l1) = encode_outgoing(Some(&key), &me, "again").unwrap();
        let (f2, l2) = encode_outgoing(Some(&key), &me, "again").unwrap();
        assert_ne!(f1.cipher, f2.cipher);
        log.push_local(l1);
        log.push_local(l2);

        log.reconcile(decode_incoming(Some(&key), &echo_of(&f2, "srv-2"), "?"));
        log.reconcile(decode_incoming(Some(&key), &echo_of(&f1, "srv-1"), "?"));

        let entries = log.snapshot();
        assert_eq!(entries[0].uuid, "srv-1");
        assert_eq!(entries[1].uuid, "srv-2");
    }
}
