//! Lifecycle notifications.
//!
//! Engines call `before` ahead of a mutation (any listener may veto it by
//! returning an error) and `after` once the mutation is persisted.
//! Listeners run synchronously, in registration order.

use serde::Serialize;
use std::sync::Arc;

use super::ServiceError;
use crate::models::{CredentialType, SecurityLevel};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Login {
        user_id: String,
        credential_id: String,
        level: SecurityLevel,
    },
    Elevate {
        session_id: String,
        parent_id: String,
        credential_id: String,
        level: SecurityLevel,
    },
    Derive {
        session_id: String,
        parent_id: String,
        client_app_id: String,
        target_app_id: String,
        level: SecurityLevel,
    },
    Downgrade {
        session_id: String,
        from_token_id: String,
        level: SecurityLevel,
    },
    Terminate {
        session_id: String,
    },
    TokenSigned {
        token_id: String,
        audience: String,
    },
    TokenRefreshed {
        token_id: String,
    },
    ExchangeCodeRedeemed {
        token_id: String,
    },
    CredentialBound {
        user_id: String,
        credential_type: CredentialType,
        level: SecurityLevel,
    },
    CredentialUnbound {
        user_id: String,
        credential_id: String,
        deleted: bool,
    },
    CredentialConsumed {
        credential_id: String,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Login { .. } => "login",
            LifecycleEvent::Elevate { .. } => "elevate",
            LifecycleEvent::Derive { .. } => "derive",
            LifecycleEvent::Downgrade { .. } => "downgrade",
            LifecycleEvent::Terminate { .. } => "terminate",
            LifecycleEvent::TokenSigned { .. } => "token_signed",
            LifecycleEvent::TokenRefreshed { .. } => "token_refreshed",
            LifecycleEvent::ExchangeCodeRedeemed { .. } => "exchange_code_redeemed",
            LifecycleEvent::CredentialBound { .. } => "credential_bound",
            LifecycleEvent::CredentialUnbound { .. } => "credential_unbound",
            LifecycleEvent::CredentialConsumed { .. } => "credential_consumed",
        }
    }
}

pub trait LifecycleListener: Send + Sync {
    fn before(&self, _event: &LifecycleEvent) -> Result<(), ServiceError> {
        Ok(())
    }

    /// `subject` is the id of the session, token or credential the
    /// operation produced or changed.
    fn after(&self, _event: &LifecycleEvent, _subject: &str) {}
}

#[derive(Clone, Default)]
pub struct Listeners {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn before(&self, event: &LifecycleEvent) -> Result<(), ServiceError> {
        for listener in &self.listeners {
            listener.before(event)?;
        }
        Ok(())
    }

    pub fn after(&self, event: &LifecycleEvent, subject: &str) {
        for listener in &self.listeners {
            listener.after(event, subject);
        }
    }
}

/// Writes every completed event to the structured log.
pub struct TracingAuditListener;

impl LifecycleListener for TracingAuditListener {
    fn after(&self, event: &LifecycleEvent, subject: &str) {
        let details = serde_json::to_string(event).unwrap_or_default();
        tracing::info!(
            event = event.name(),
            subject = %subject,
            details = %details,
            "Lifecycle event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        veto: bool,
    }

    impl LifecycleListener for Recorder {
        fn before(&self, event: &LifecycleEvent) -> Result<(), ServiceError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("before:{}", event.name()));
            if self.veto {
                return Err(ServiceError::InvalidCredentials);
            }
            Ok(())
        }

        fn after(&self, event: &LifecycleEvent, subject: &str) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", event.name(), subject));
        }
    }

    fn terminate() -> LifecycleEvent {
        LifecycleEvent::Terminate {
            session_id: "s1".to_string(),
        }
    }

    #[test]
    fn test_listeners_run_in_order() {
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            veto: false,
        });
        let listeners = Listeners::new()
            .with(first.clone())
            .with(Arc::new(TracingAuditListener));

        listeners.before(&terminate()).unwrap();
        listeners.after(&terminate(), "s1");

        assert_eq!(
            *first.seen.lock().unwrap(),
            vec!["before:terminate", "after:terminate:s1"]
        );
    }

    #[test]
    fn test_veto_stops_the_chain() {
        let vetoing = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            veto: true,
        });
        let later = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            veto: false,
        });
        let listeners = Listeners::new().with(vetoing).with(later.clone());

        assert!(listeners.before(&terminate()).is_err());
        assert!(later.seen.lock().unwrap().is_empty());
    }
}
