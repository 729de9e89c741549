//! Backend selection and fallback policy.
//!
//! The selector holds engines in priority order. For every level the pyramid
//! builder tries the available engines in that order and stops at the first
//! one that completes the level. An engine that fails to initialise is marked
//! unavailable for the remainder of the build and is skipped from then on.
//! Any other failure only affects the level it happened on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::ValueEnum;
use tracing::warn;

use super::{Downsampler, FastDownsampler, ReferenceDownsampler};

/// Which engines the builder is allowed to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EnginePreference {
    /// Attempt the fast engine, fall back to the reference engine automatically.
    #[default]
    Auto,
    /// Never attempt the fast engine.
    Reference,
}

struct Candidate {
    engine: Arc<dyn Downsampler>,
    unavailable: AtomicBool,
}

/// Prioritized engine list with a sticky unavailability flag per engine.
pub struct BackendSelector {
    candidates: Vec<Candidate>,
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.candidates.iter().map(|c| c.engine.name()).collect();
        f.debug_struct("BackendSelector")
            .field("engines", &names)
            .finish()
    }
}

impl BackendSelector {
    /// Build the standard engine list for a preference.
    pub fn new(preference: EnginePreference) -> Self {
        let engines: Vec<Arc<dyn Downsampler>> = match preference {
            EnginePreference::Auto => vec![
                Arc::new(FastDownsampler::new()),
                Arc::new(ReferenceDownsampler::new()),
            ],
            EnginePreference::Reference => vec![Arc::new(ReferenceDownsampler::new())],
        };
        Self::with_engines(engines)
    }

    /// Use a custom engine list, highest priority first.
    pub fn with_engines(engines: Vec<Arc<dyn Downsampler>>) -> Self {
        Self {
            candidates: engines
                .into_iter()
                .map(|engine| Candidate {
                    engine,
                    unavailable: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    /// Engines still worth attempting, in priority order.
    pub fn available(&self) -> Vec<Arc<dyn Downsampler>> {
        self.candidates
            .iter()
            .filter(|c| !c.unavailable.load(Ordering::Acquire))
            .map(|c| Arc::clone(&c.engine))
            .collect()
    }

    /// Skip the named engine for the rest of the build.
    pub fn mark_unavailable(&self, name: &str) {
        for candidate in self.candidates.iter().filter(|c| c.engine.name() == name) {
            if !candidate.unavailable.swap(true, Ordering::AcqRel) {
                warn!("Engine '{}' marked unavailable for this build", name);
            }
        }
    }

    pub fn is_unavailable(&self, name: &str) -> bool {
        self.candidates
            .iter()
            .any(|c| c.engine.name() == name && c.unavailable.load(Ordering::Acquire))
    }

    /// Names of all configured engines, in priority order.
    pub fn engine_names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|c| c.engine.name()).collect()
    }
}
