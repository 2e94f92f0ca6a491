//! Registry of active per-user models.
//!
//! Readers clone an `Arc` to the current model and release the lock at once,
//! so a prediction keeps using the model it started with even if a retrain
//! swaps in a replacement meanwhile. Training runs are serialized per
//! (user, kind) through [`TrainingPermit`].

use crate::error::{PipelineError, PipelineResult};
use crate::models::TrainedModel;
use crate::types::model::ModelKey;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

fn lock_error<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::Internal(format!("Lock error: {}", e))
}

/// Thread-safe map from (user, kind) to the active model.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelKey, Arc<TrainedModel>>>,
    training: Arc<Mutex<HashSet<ModelKey>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active model for `key`, if any.
    pub fn get(&self, key: &ModelKey) -> PipelineResult<Option<Arc<TrainedModel>>> {
        let models = self.models.read().map_err(lock_error)?;
        Ok(models.get(key).cloned())
    }

    /// Active model for `key`, or [`PipelineError::UntrainedModel`].
    pub fn require(&self, key: &ModelKey) -> PipelineResult<Arc<TrainedModel>> {
        self.get(key)?
            .ok_or_else(|| PipelineError::untrained(&key.user_id, key.kind))
    }

    /// Install `model` as the active one for its key, returning the one it replaced.
    pub fn put(&self, model: TrainedModel) -> PipelineResult<Option<Arc<TrainedModel>>> {
        let key = model.key();
        let mut models = self.models.write().map_err(lock_error)?;
        let previous = models.insert(key.clone(), Arc::new(model));
        debug!(model = %key, replaced = previous.is_some(), "Model installed");
        Ok(previous)
    }

    /// Drop the active model for `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &ModelKey) -> PipelineResult<bool> {
        let mut models = self.models.write().map_err(lock_error)?;
        Ok(models.remove(key).is_some())
    }

    pub fn trained_at(&self, key: &ModelKey) -> PipelineResult<Option<DateTime<Utc>>> {
        Ok(self.get(key)?.map(|model| model.trained_at))
    }

    /// Number of active models.
    pub fn len(&self) -> PipelineResult<usize> {
        Ok(self.models.read().map_err(lock_error)?.len())
    }

    pub fn is_empty(&self) -> PipelineResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Claim the training slot for `key`.
    ///
    /// Fails with [`PipelineError::Conflict`] while another run holds it.
    /// The slot is released when the permit is dropped.
    pub fn begin_training(&self, key: &ModelKey) -> PipelineResult<TrainingPermit> {
        let mut training = self.training.lock().map_err(lock_error)?;
        if !training.insert(key.clone()) {
            return Err(PipelineError::Conflict {
                user_id: key.user_id.clone(),
                kind: key.kind,
            });
        }
        Ok(TrainingPermit {
            key: key.clone(),
            training: Arc::clone(&self.training),
        })
    }

    pub fn is_training(&self, key: &ModelKey) -> PipelineResult<bool> {
        Ok(self.training.lock().map_err(lock_error)?.contains(key))
    }
}

/// Exclusive right to train one (user, kind) pair.
#[derive(Debug)]
pub struct TrainingPermit {
    key: ModelKey,
    training: Arc<Mutex<HashSet<ModelKey>>>,
}

impl TrainingPermit {
    pub fn key(&self) -> &ModelKey {
        &self.key
    }
}

impl Drop for TrainingPermit {
    fn drop(&mut self) {
        if let Ok(mut training) = self.training.lock() {
            training.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategorizerConfig;
    use crate::models::{Estimator, NaiveBayesCategorizer};
    use crate::types::model::ModelKind;
    use std::thread;

    fn categorizer(user: &str, label: &str) -> TrainedModel {
        let config = CategorizerConfig {
            alpha: 0.1,
            bigrams: true,
        };
        let model = NaiveBayesCategorizer::train([("weekly shop", label)], &config).unwrap();
        TrainedModel::new(user, 1, Estimator::Categorizer(Box::new(model)))
    }

    fn predicted_label(model: &TrainedModel) -> String {
        model
            .as_categorizer()
            .unwrap()
            .predict("weekly shop")
            .category
    }

    #[test]
    fn test_put_replaces_and_returns_previous() {
        let registry = ModelRegistry::new();
        let key = ModelKey::new("alice", ModelKind::Categorizer);

        assert!(registry.get(&key).unwrap().is_none());
        assert!(registry.put(categorizer("alice", "Groceries")).unwrap().is_none());

        let held = registry.require(&key).unwrap();
        let previous = registry.put(categorizer("alice", "Food")).unwrap().unwrap();

        // A reader holding the old model keeps it
        assert_eq!(predicted_label(&held), "Groceries");
        assert!(Arc::ptr_eq(&held, &previous));
        assert_eq!(predicted_label(&registry.require(&key).unwrap()), "Food");
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_users_are_isolated() {
        let registry = ModelRegistry::new();
        registry.put(categorizer("alice", "Groceries")).unwrap();

        let bob = ModelKey::new("bob", ModelKind::Categorizer);
        assert!(matches!(
            registry.require(&bob),
            Err(PipelineError::UntrainedModel { .. })
        ));
        assert!(registry.trained_at(&bob).unwrap().is_none());
        assert!(registry
            .trained_at(&ModelKey::new("alice", ModelKind::Categorizer))
            .unwrap()
            .is_some());
        // Same user, different kind
        assert!(registry
            .get(&ModelKey::new("alice", ModelKind::Anomaly))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalidate() {
        let registry = ModelRegistry::new();
        let key = ModelKey::new("alice", ModelKind::Categorizer);
        registry.put(categorizer("alice", "Groceries")).unwrap();

        assert!(registry.invalidate(&key).unwrap());
        assert!(!registry.invalidate(&key).unwrap());
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_training_permit_is_exclusive() {
        let registry = ModelRegistry::new();
        let key = ModelKey::new("alice", ModelKind::Forecaster);

        let permit = registry.begin_training(&key).unwrap();
        assert!(registry.is_training(&key).unwrap());
        assert!(matches!(
            registry.begin_training(&key),
            Err(PipelineError::Conflict { .. })
        ));
        // Other keys are unaffected
        let other = registry
            .begin_training(&ModelKey::new("bob", ModelKind::Forecaster))
            .unwrap();

        drop(permit);
        assert!(!registry.is_training(&key).unwrap());
        assert!(registry.begin_training(&key).is_ok());
        drop(other);
    }

    #[test]
    fn test_concurrent_readers_during_swap() {
        let registry = Arc::new(ModelRegistry::new());
        registry.put(categorizer("alice", "Groceries")).unwrap();
        let key = ModelKey::new("alice", ModelKind::Categorizer);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let model = registry.require(&key).unwrap();
                        let label = predicted_label(&model);
                        assert!(label == "Groceries" || label == "Food");
                    }
                })
            })
            .collect();

        for i in 0..50 {
            let label = if i % 2 == 0 { "Food" } else { "Groceries" };
            registry.put(categorizer("alice", label)).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
