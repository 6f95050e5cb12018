use std::sync::Arc;

use domain::Repositories;
use secrecy::SecretString;

use crate::trigger::TriggerService;

pub struct AppState<S> {
    pub triggers: Arc<TriggerService<S>>,
    pub repositories: Repositories,
    pub webhook_secret: Option<SecretString>,
}

// Derived Clone would require `S: Clone`.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            triggers: self.triggers.clone(),
            repositories: self.repositories.clone(),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}
