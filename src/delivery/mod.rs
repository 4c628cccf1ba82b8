//! Delivery of one document: resolve destination, validate, fetch, transmit, log.
//!
//! Steps run strictly in order and never go backwards. Only the fetch and
//! transmit steps are retried, each on its own. Every terminal failure maps
//! to one fixed notice; error details go to the operator log only.

pub mod validate;

use std::sync::Arc;

use teloxide::types::ChatId;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::mailer::Mailer;
use crate::platform::{FileFetcher, Notifier, Payload};
use crate::retry::{retry, RetryPolicy};
use crate::store::{DeliveryRecord, RecordStore};

pub const NOT_CONFIGURED_NOTICE: &str =
    "Please set your Kindle email address first using /set_kindle_email";
pub const UNSUPPORTED_TYPE_NOTICE: &str =
    "Unsupported file type. Try sending a PDF, EPUB, or MOBI file";
pub const SENDING_NOTICE: &str = "Sending book to Kindle...";
pub const FETCH_FAILED_NOTICE: &str = "Error downloading file, please try again later";
pub const TRANSMIT_FAILED_NOTICE: &str = "Error sending email, please try again later";
pub const STORE_FAILED_NOTICE: &str = "Something went wrong, please try again later";
pub const DELIVERED_NOTICE: &str = "Book sent to Kindle successfully";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no Kindle address configured")]
    NotConfigured,

    #[error("unsupported mime type: {0:?}")]
    UnsupportedType(Option<String>),

    #[error("declared size {size} exceeds limit {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("download failed: {0:#}")]
    FetchFailed(anyhow::Error),

    #[error("transmit failed: {0:#}")]
    TransmitFailed(anyhow::Error),

    #[error("record store failed: {0:#}")]
    Store(anyhow::Error),
}

impl DeliveryError {
    /// The fixed text shown to the user for this failure
    pub fn notice(&self) -> String {
        match self {
            DeliveryError::NotConfigured => NOT_CONFIGURED_NOTICE.to_string(),
            DeliveryError::UnsupportedType(_) => UNSUPPORTED_TYPE_NOTICE.to_string(),
            DeliveryError::TooLarge { max, .. } => format!(
                "File is too large. Maximum file size is {}",
                format_size(*max)
            ),
            DeliveryError::FetchFailed(_) => FETCH_FAILED_NOTICE.to_string(),
            DeliveryError::TransmitFailed(_) => TRANSMIT_FAILED_NOTICE.to_string(),
            DeliveryError::Store(_) => STORE_FAILED_NOTICE.to_string(),
        }
    }
}

/// Human-readable limit: whole MiB as "20MB", never rounded up to a larger unit.
fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= MIB {
        // one decimal, truncated so the shown limit is never above the real one
        let tenths = bytes / MIB * 10 + bytes % MIB * 10 / MIB;
        format!("{}.{}MB", tenths / 10, tenths % 10)
    } else if bytes >= KIB {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Result of a delivery that reached the user's Kindle.
#[derive(Debug)]
pub struct Delivered {
    /// `None` when the audit write failed; the delivery still counts.
    pub record: Option<DeliveryRecord>,
}

pub struct DeliveryPipeline {
    store: RecordStore,
    fetcher: Arc<dyn FileFetcher>,
    mailer: Arc<dyn Mailer>,
    notifier: Arc<dyn Notifier>,
    retry_policy: RetryPolicy,
    max_payload_size: u64,
}

impl DeliveryPipeline {
    pub fn new(
        config: &Config,
        store: RecordStore,
        fetcher: Arc<dyn FileFetcher>,
        mailer: Arc<dyn Mailer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            fetcher,
            mailer,
            notifier,
            retry_policy: config.retry.policy(),
            max_payload_size: config.delivery.max_payload_size,
        }
    }

    /// Run the pipeline for one document and notify the user of the outcome.
    pub async fn deliver(
        &self,
        chat_id: ChatId,
        user_id: i64,
        payload: &Payload,
    ) -> Result<Delivered, DeliveryError> {
        let result = self.run_steps(chat_id, user_id, payload).await;

        match &result {
            Ok(delivered) => {
                match &delivered.record {
                    Some(record) => info!(
                        record_id = record.id,
                        user_id = record.user_id,
                        file_name = %record.name,
                        size = record.size,
                        logged_at = %record.created_at,
                        "Book delivered"
                    ),
                    None => info!(
                        user_id,
                        file_name = %payload.file_name,
                        "Book delivered, not logged"
                    ),
                }
                self.notifier.notify(chat_id, DELIVERED_NOTICE).await;
            }
            Err(e) => {
                match e {
                    DeliveryError::FetchFailed(_)
                    | DeliveryError::TransmitFailed(_)
                    | DeliveryError::Store(_) => error!(
                        user_id,
                        chat_id = chat_id.0,
                        file_id = %payload.file_id,
                        "Delivery failed: {}",
                        e
                    ),
                    _ => info!(user_id, chat_id = chat_id.0, "Delivery rejected: {}", e),
                }
                self.notifier.notify(chat_id, &e.notice()).await;
            }
        }

        result
    }

    async fn run_steps(
        &self,
        chat_id: ChatId,
        user_id: i64,
        payload: &Payload,
    ) -> Result<Delivered, DeliveryError> {
        let destination = self
            .store
            .get_destination(user_id)
            .await
            .map_err(DeliveryError::Store)?
            .ok_or(DeliveryError::NotConfigured)?;

        validate::validate_payload(payload, self.max_payload_size)?;

        self.notifier.notify(chat_id, SENDING_NOTICE).await;

        let bytes = retry(&self.retry_policy, "fetch", || {
            self.fetcher.fetch(&payload.file_id, self.max_payload_size)
        })
        .await
        .map_err(DeliveryError::FetchFailed)?;

        retry(&self.retry_policy, "transmit", || {
            self.mailer
                .send_document(&destination, &payload.file_name, bytes.clone())
        })
        .await
        .map_err(DeliveryError::TransmitFailed)?;

        // The book is on its way; a failed audit write only concerns operators
        let record = match self
            .store
            .append_delivery_record(user_id, &payload.file_name, payload.declared_size)
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    user_id,
                    file_name = %payload.file_name,
                    "Failed to log delivered book: {:#}",
                    e
                );
                None
            }
        };

        Ok(Delivered { record })
    }
}
