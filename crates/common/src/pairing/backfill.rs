use uuid::Uuid;

use crate::directory::RecipientKeyRecord;
use crate::envelope::{EnvelopeError, EnvelopeStoreError};
use crate::identity::DeviceIdentity;

use super::service::PairingService;
use super::PairingError;

/// Why an envelope was left untouched by a backfill pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillSkip {
    NotFound,
    /// Authored by another user or device; their author must backfill it
    NotAuthored,
    AlreadyWrapped,
    /// The author's self-wrap is missing or does not open the envelope
    NoSelfWrap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub wrapped: Vec<Uuid>,
    pub skipped: Vec<(Uuid, BackfillSkip)>,
}

impl PairingService {
    /// Extend envelopes authored by `author` with a wrap for `new_recipient`
    ///
    /// Each content key is recovered through the author's self-wrap only and
    /// wrapped under a fresh ephemeral key. Ineligible envelopes are reported as
    /// skipped; store failures abort the pass.
    pub async fn backfill(
        &self,
        envelope_ids: &[Uuid],
        author_user_id: &str,
        author: &DeviceIdentity,
        new_recipient: &RecipientKeyRecord,
    ) -> Result<BackfillReport, PairingError> {
        let mut report = BackfillReport::default();
        for &id in envelope_ids {
            match self
                .backfill_one(id, author_user_id, author, new_recipient)
                .await?
            {
                None => report.wrapped.push(id),
                Some(skip) => {
                    tracing::debug!(envelope_id = %id, ?skip, "backfill skipped envelope");
                    report.skipped.push((id, skip));
                }
            }
        }
        tracing::info!(
            author_device_id = author.device_id(),
            recipient_device_id = %new_recipient.device_id,
            wrapped = report.wrapped.len(),
            skipped = report.skipped.len(),
            "backfill finished"
        );
        Ok(report)
    }

    /// [`PairingService::backfill`] over every envelope the store attributes to
    /// `author`
    pub async fn backfill_authored(
        &self,
        author_user_id: &str,
        author: &DeviceIdentity,
        new_recipient: &RecipientKeyRecord,
    ) -> Result<BackfillReport, PairingError> {
        let ids = self
            .envelopes
            .authored_by(author_user_id, author.device_id())
            .await?;
        self.backfill(&ids, author_user_id, author, new_recipient)
            .await
    }

    async fn backfill_one(
        &self,
        id: Uuid,
        author_user_id: &str,
        author: &DeviceIdentity,
        new_recipient: &RecipientKeyRecord,
    ) -> Result<Option<BackfillSkip>, PairingError> {
        let Some(envelope) = self.envelopes.get(id).await? else {
            return Ok(Some(BackfillSkip::NotFound));
        };
        if envelope.sender_user_id() != Some(author_user_id)
            || envelope.sender_device_id() != Some(author.device_id())
        {
            return Ok(Some(BackfillSkip::NotAuthored));
        }
        if envelope.has_wrap_for(&new_recipient.user_id, &new_recipient.device_id) {
            return Ok(Some(BackfillSkip::AlreadyWrapped));
        }

        let content_key = match self
            .engine
            .recover_self_key(&envelope, author_user_id, author)
        {
            Ok(key) => key,
            Err(EnvelopeError::NoSelfWrap(_)) => return Ok(Some(BackfillSkip::NoSelfWrap)),
            Err(e) => return Err(e.into()),
        };
        let entry = self.engine.wrap_for(&content_key, new_recipient)?;

        match self.envelopes.append_wrap(id, entry).await {
            Ok(()) => Ok(None),
            // a concurrent pass got there first
            Err(EnvelopeStoreError::Envelope(EnvelopeError::DuplicateRecipient { .. })) => {
                Ok(Some(BackfillSkip::AlreadyWrapped))
            }
            Err(EnvelopeStoreError::NotFound(_)) => Ok(Some(BackfillSkip::NotFound)),
            Err(e) => Err(e.into()),
        }
    }
}
