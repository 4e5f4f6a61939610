//! Model lifecycle: atomic publication of compiled models.
//!
//! The manager holds the single shared reference to the current model and
//! replaces it with an atomic pointer swap. Readers never block; an
//! evaluator holding a reference to a retired model finishes its in-flight
//! evaluation on that model and picks up the replacement on its next
//! acquisition. Publication establishes the happens-before edge between the
//! compiler's writes and evaluator reads; after that, readers need no
//! further synchronization.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use crate::model::EngineModel;

/// Holder and publisher of the current [`EngineModel`].
pub struct ModelManager {
    current: ArcSwap<EngineModel>,
    install_lock: Mutex<()>,
}

impl ModelManager {
    /// Create a manager publishing `initial`.
    pub fn new(initial: Arc<EngineModel>) -> Self {
        ModelManager {
            current: ArcSwap::from(initial),
            install_lock: Mutex::new(()),
        }
    }

    /// The currently-published model. Never blocks.
    pub fn get_model(&self) -> Arc<EngineModel> {
        self.current.load_full()
    }

    /// Atomically publish `model`, returning the prior one. Installation is
    /// serialized; the prior model stays valid for every holder that still
    /// references it.
    pub fn install(&self, model: Arc<EngineModel>) -> Arc<EngineModel> {
        let _guard = self.install_lock.lock();
        let version = model.version();
        let combinations = model.num_combinations();
        let prior = self.current.swap(model);
        info!(
            version,
            combinations,
            retired_version = prior.version(),
            "model installed"
        );
        prior
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("current", &self.get_model())
            .finish()
    }
}
