//! The user service: account lifecycle plus credit synchronization.
//!
//! Owns the ledger, the publisher for `user-data`, and the coordinator that
//! reconciles `credit-data` into the ledger. Nothing here is global; the
//! service is the composition root and is passed around by reference.

use std::sync::Arc;

use serde::Deserialize;

use credit_sync_core::{now_millis, validate_email, CreditEvent, Email, EventId, UserAccount};
use credit_sync_store::{LedgerStore, StoreError};
use credit_sync_stream::{
    Broker, Coordinator, Publisher, Reconciler, StatsSnapshot, StreamError,
};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

/// What a login lookup returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserView {
    /// The account exists.
    Existing { account: UserAccount },
    /// First visit. `last_login` is the lookup time; nothing is persisted
    /// until [`UserService::save_user`].
    New { email: Email, last_login: i64 },
}

impl UserView {
    pub fn is_new(&self) -> bool {
        matches!(self, UserView::New { .. })
    }

    pub fn email(&self) -> &Email {
        match self {
            UserView::Existing { account } => &account.email,
            UserView::New { email, .. } => email,
        }
    }
}

/// Body of a user creation request.
///
/// Fields are optional so a missing one is reported as a bad request rather
/// than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SaveUserRequest {
    #[serde(rename = "newUser")]
    pub new_user: Option<bool>,
    pub email: Option<String>,
    #[serde(rename = "lastLoginTimestamp")]
    pub last_login: Option<i64>,
}

impl SaveUserRequest {
    pub fn new(email: impl Into<String>, last_login: i64) -> Self {
        Self {
            new_user: Some(true),
            email: Some(email.into()),
            last_login: Some(last_login),
        }
    }
}

/// Body of a last-login update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LastLoginRequest {
    pub email: Option<String>,
    #[serde(rename = "lastLoginTimestamp")]
    pub last_login: Option<i64>,
}

impl LastLoginRequest {
    pub fn new(email: impl Into<String>, last_login: i64) -> Self {
        Self {
            email: Some(email.into()),
            last_login: Some(last_login),
        }
    }
}

/// Result of creating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserResponse {
    pub account: UserAccount,
    /// Id of the announcement on `user-data`, if it was published.
    pub event_id: Option<EventId>,
    /// True when the account was created but the announcement could not be
    /// published. The creation itself stands.
    pub sync_pending: bool,
}

/// The user-management service.
pub struct UserService {
    ledger: Arc<dyn LedgerStore>,
    publisher: Publisher,
    coordinator: Coordinator,
    config: ServiceConfig,
}

impl UserService {
    /// Assemble a service from an open ledger and a broker.
    pub fn new(ledger: Arc<dyn LedgerStore>, broker: Arc<dyn Broker>, config: ServiceConfig) -> Self {
        Self {
            ledger,
            publisher: Publisher::new(Arc::clone(&broker)),
            coordinator: Coordinator::new(broker, config.subscriber.clone()),
            config,
        }
    }

    /// Open the ledger named by `config` and assemble a service.
    pub fn open(config: ServiceConfig, broker: Arc<dyn Broker>) -> Result<Self> {
        let ledger = config.open_ledger()?;
        Ok(Self::new(ledger, broker, config))
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a user by email.
    pub async fn user_data(&self, email: &str) -> Result<UserView> {
        if email.trim().is_empty() {
            return Err(ServiceError::BadRequest("Please provide email address".into()));
        }
        let email = validate_email(email)?;

        match self.ledger.find_by_email(&email).await? {
            Some(account) => Ok(UserView::Existing { account }),
            None => Ok(UserView::New {
                email,
                last_login: now_millis(),
            }),
        }
    }

    /// Create a user with zero credits and announce it on the user topic.
    ///
    /// The account is committed before publishing. A failed publish leaves
    /// the account in place and is reported through `sync_pending`.
    pub async fn save_user(&self, request: SaveUserRequest) -> Result<CreateUserResponse> {
        let (email, last_login) = match request {
            SaveUserRequest {
                new_user: Some(true),
                email: Some(email),
                last_login: Some(last_login),
            } if !email.trim().is_empty() && last_login != 0 => (email, last_login),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Fields newUser: Boolean, email: String, lastLoginTimestamp: timestamp are required"
                        .into(),
                ))
            }
        };
        let email = validate_email(&email)?;

        let account = UserAccount::new(email.clone(), last_login);
        self.ledger
            .create_account(&account)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => ServiceError::AlreadyExists(email.clone()),
                other => ServiceError::Store(other),
            })?;
        tracing::info!(%email, "user created");

        let event = CreditEvent::new(email.clone(), 0, now_millis());
        let (event_id, sync_pending) = match self
            .publisher
            .publish(&self.config.user_topic, &event)
            .await
        {
            Ok(receipt) => (Some(receipt.event_id), false),
            Err(e) => {
                tracing::warn!(
                    %email,
                    event_id = %event.event_id,
                    error = %e,
                    "user created but announcement not published"
                );
                (None, true)
            }
        };

        Ok(CreateUserResponse {
            account,
            event_id,
            sync_pending,
        })
    }

    /// Move a user's last login forward.
    ///
    /// Returns false if the timestamp is older than the stored one.
    pub async fn update_last_login(&self, request: LastLoginRequest) -> Result<bool> {
        let (email, last_login) = match request {
            LastLoginRequest {
                email: Some(email),
                last_login: Some(last_login),
            } if !email.trim().is_empty() && last_login != 0 => (email, last_login),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Fields email: String, lastLoginTimestamp: timestamp are required".into(),
                ))
            }
        };
        let email = validate_email(&email)?;

        match self.ledger.update_last_login(&email, last_login).await {
            Ok(moved) => Ok(moved),
            Err(StoreError::NotFound(_)) => Err(ServiceError::UserNotFound(email)),
            Err(e) => Err(e.into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Credit Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Start reconciling the credit topic into the ledger.
    pub async fn start_sync(&self) -> Result<()> {
        let reconciler = Reconciler::new(Arc::clone(&self.ledger))
            .with_retention(self.config.retention.clone());

        self.coordinator
            .start(
                &self.config.credit_topic,
                &self.config.group_id,
                Arc::new(reconciler),
            )
            .await?;
        Ok(())
    }

    /// Stop reconciling. An apply in progress finishes first.
    ///
    /// Calling this when sync was never started is not an error.
    pub async fn shutdown(&self) -> Result<()> {
        match self.coordinator.stop().await {
            Ok(()) | Err(StreamError::NotStarted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn is_syncing(&self) -> bool {
        self.coordinator.is_running().await
    }

    pub fn sync_stats(&self) -> StatsSnapshot {
        self.coordinator.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_sync_store::MemoryLedger;
    use credit_sync_stream::MemoryBroker;
    use credit_sync_core::decode_envelope;

    fn service(broker: &MemoryBroker) -> UserService {
        UserService::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(broker.clone()),
            ServiceConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_unknown_user_is_new() {
        let broker = MemoryBroker::new();
        let svc = service(&broker);

        let view = svc.user_data("New@X.com").await.unwrap();
        assert!(view.is_new());
        assert_eq!(view.email().as_str(), "new@x.com");
        assert!(svc.ledger().find_by_email(view.email()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_email_is_bad_request() {
        let svc = service(&MemoryBroker::new());
        assert!(matches!(svc.user_data("  ").await, Err(ServiceError::BadRequest(_))));
        assert!(matches!(
            svc.user_data("no-at-sign").await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_save_user_creates_and_announces() {
        let broker = MemoryBroker::new();
        let svc = service(&broker);

        let response = svc
            .save_user(SaveUserRequest::new("a@x.com", 1_000))
            .await
            .unwrap();
        assert!(!response.sync_pending);
        assert_eq!(response.account.credits, 0);

        let view = svc.user_data("a@x.com").await.unwrap();
        assert!(!view.is_new());

        let records = broker.records("user-data").await;
        assert_eq!(records.len(), 1);
        let envelope = decode_envelope(&records[0].value).unwrap();
        assert_eq!(envelope.payload.credits, 0);
        assert_eq!(envelope.payload.email.as_str(), "a@x.com");
        assert_eq!(Some(envelope.event_id), response.event_id);
    }

    #[tokio::test]
    async fn test_save_user_requires_fields() {
        let svc = service(&MemoryBroker::new());

        let missing = [
            SaveUserRequest::default(),
            SaveUserRequest {
                new_user: Some(false),
                ..SaveUserRequest::new("a@x.com", 1)
            },
            SaveUserRequest {
                last_login: None,
                ..SaveUserRequest::new("a@x.com", 1)
            },
            SaveUserRequest::new("", 1),
        ];
        for request in missing {
            assert!(matches!(
                svc.save_user(request).await,
                Err(ServiceError::BadRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_save_existing_user_fails() {
        let svc = service(&MemoryBroker::new());
        svc.save_user(SaveUserRequest::new("a@x.com", 1)).await.unwrap();

        let err = svc
            .save_user(SaveUserRequest::new("A@x.com", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_is_degraded_not_failed() {
        let broker = MemoryBroker::new();
        let svc = service(&broker);
        broker.set_available(false);

        let response = svc
            .save_user(SaveUserRequest::new("a@x.com", 1))
            .await
            .unwrap();
        assert!(response.sync_pending);
        assert_eq!(response.event_id, None);
        assert!(!svc.user_data("a@x.com").await.unwrap().is_new());
    }

    #[tokio::test]
    async fn test_update_last_login() {
        let svc = service(&MemoryBroker::new());
        svc.save_user(SaveUserRequest::new("a@x.com", 1_000)).await.unwrap();

        assert!(svc
            .update_last_login(LastLoginRequest::new("a@x.com", 2_000))
            .await
            .unwrap());
        assert!(!svc
            .update_last_login(LastLoginRequest::new("a@x.com", 1_500))
            .await
            .unwrap());

        let err = svc
            .update_last_login(LastLoginRequest::new("ghost@x.com", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound(_)));

        let err = svc
            .update_last_login(LastLoginRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn test_request_body_field_names() {
        let request: SaveUserRequest = serde_json::from_str(
            r#"{"newUser": true, "email": "a@x.com", "lastLoginTimestamp": 1700000000000}"#,
        )
        .unwrap();
        assert_eq!(request, SaveUserRequest::new("a@x.com", 1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_shutdown_without_start_is_ok() {
        let svc = service(&MemoryBroker::new());
        svc.shutdown().await.unwrap();

        svc.start_sync().await.unwrap();
        assert!(svc.is_syncing().await);
        assert!(matches!(
            svc.start_sync().await,
            Err(ServiceError::Stream(StreamError::AlreadyStarted))
        ));
        svc.shutdown().await.unwrap();
        assert!(!svc.is_syncing().await);
    }
}
