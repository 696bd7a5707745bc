//! Opening the meta-step items that wrap a step.
//!
//! A step may be wrapped by a chain of meta-steps (innermost first). Each
//! distinct occurrence, keyed by [`MetaStepKey`], becomes exactly one STEP
//! item nested like the chain:
//!
//! ```text
//! Test
//! └── flow signIn            (started_at = 1)
//!     └── loginPage submit   (started_at = 5)
//!         ├── [STEP] - I fillField ...
//!         └── [STEP] - I click ...
//! ```
//!
//! Wrappers are opened lazily the first time a step needs them, outermost
//! first, and stay open until the test's steps are all reported.

use std::collections::HashMap;

use tracing::{debug, error};

use super::{LookupError, finish_item, start_item};
use crate::client::{ItemId, ReportClient};
use crate::model::{ItemType, MetaStep, MetaStepKey, Step};

/// A meta-step the registry has tried to open.
#[derive(Debug, Clone)]
struct OpenMetaStep {
    source: MetaStep,
    /// `None` when the backend refused to start the item.
    item: Option<ItemId>,
}

/// Open meta-step items for the test currently being reported.
#[derive(Debug, Default)]
pub struct MetaStepRegistry {
    open: HashMap<MetaStepKey, OpenMetaStep>,
    /// Keys in the order their items were requested.
    order: Vec<MetaStepKey>,
    started: usize,
    client_failures: usize,
}

impl MetaStepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no meta-step item is currently tracked.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Meta-step items started since the registry was created.
    pub fn started(&self) -> usize {
        self.started
    }

    /// Backend calls that failed since the registry was created.
    pub fn client_failures(&self) -> usize {
        self.client_failures
    }

    /// Makes sure every meta-step wrapping `step` has an open item.
    ///
    /// Returns the item of the innermost wrapper, or `None` when the step is
    /// not wrapped and belongs directly under `test_item`. Wrappers already in
    /// the registry are reused and never started twice.
    pub async fn ensure_open(
        &mut self,
        client: &dyn ReportClient,
        launch: &ItemId,
        step: &Step,
        test_item: &ItemId,
    ) -> Result<Option<ItemId>, LookupError> {
        let chain = step.meta_chain();
        if chain.is_empty() {
            return Ok(None);
        }

        let mut parent = test_item.clone();
        for meta in chain.into_iter().rev() {
            let key = meta.key();

            if let Some(open) = self.open.get(&key) {
                parent = open.item.clone().ok_or_else(|| LookupError::MissingItem {
                    what: format!("meta-step '{}'", meta),
                })?;
                continue;
            }

            let name = meta.to_string();
            match start_item(client, launch, &name, ItemType::Step, Some(&parent)).await {
                Ok(item) => {
                    debug!(
                        "{}: meta-step '{}' started under {}",
                        item, name, parent
                    );
                    self.started += 1;
                    self.insert(key, meta, Some(item.clone()));
                    parent = item;
                }
                Err(e) => {
                    error!("Failed to start meta-step '{}': {}", name, e);
                    self.client_failures += 1;
                    self.insert(key, meta, None);
                    return Err(LookupError::MissingItem {
                        what: format!("meta-step '{}'", name),
                    });
                }
            }
        }

        Ok(Some(parent))
    }

    /// Finishes every open meta-step item, innermost first, and forgets them.
    pub async fn close_all(&mut self, client: &dyn ReportClient) {
        for key in self.order.drain(..).rev() {
            let Some(open) = self.open.remove(&key) else {
                continue;
            };
            let Some(item) = open.item else {
                continue;
            };

            debug!("Finishing meta-step '{}'", open.source);
            if !finish_item(client, &item, open.source.report_status()).await {
                self.client_failures += 1;
            }
        }
        self.open.clear();
    }

    fn insert(&mut self, key: MetaStepKey, source: &MetaStep, item: Option<ItemId>) {
        self.order.push(key.clone());
        self.open.insert(
            key,
            OpenMetaStep {
                source: source.clone(),
                item,
            },
        );
    }
}
