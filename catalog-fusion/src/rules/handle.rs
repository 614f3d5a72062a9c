//! Swappable rule set for long-running processes
//!
//! Evaluations take a snapshot (`Arc<RuleSet>`) and run against it to completion;
//! a reload installs a new RuleSet for subsequent snapshots only. A reload whose
//! text fails to compile leaves the current RuleSet in place.

use crate::error::CompileResult;
use crate::rules::compiler::{compile, RuleSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Shared handle to the active RuleSet
pub struct RuleSetHandle {
    current: RwLock<Arc<RuleSet>>,

    /// Fingerprint of each newly installed RuleSet
    reload_tx: broadcast::Sender<String>,
}

impl RuleSetHandle {
    pub fn new(rules: RuleSet) -> Self {
        let (reload_tx, _) = broadcast::channel(16);
        Self {
            current: RwLock::new(Arc::new(rules)),
            reload_tx,
        }
    }

    /// RuleSet to use for the next evaluation
    pub async fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&*self.current.read().await)
    }

    /// Compile `source` and install it
    ///
    /// Returns the new fingerprint. On a compile error the active RuleSet is unchanged.
    pub async fn reload(&self, source: &str) -> CompileResult<String> {
        let rules = match compile(source) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Rule reload rejected, keeping current rules: {}", e);
                return Err(e);
            }
        };

        let fingerprint = rules.fingerprint().to_string();
        let previous = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, Arc::new(rules))
        };

        info!(
            previous = %previous.fingerprint(),
            current = %fingerprint,
            "Rule set reloaded"
        );

        // No subscribers is fine
        let _ = self.reload_tx.send(fingerprint.clone());
        Ok(fingerprint)
    }

    /// Receive the fingerprint of every successful reload
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.reload_tx.subscribe()
    }
}
