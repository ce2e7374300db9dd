//! Backend discovery and name resolution.
//!
//! A [`Registry`] runs its probe list once, on first use, and keeps the
//! descriptors of every backend that loaded. Backends that fail to load (or
//! whose probe panics) are skipped with a [`DiscoveryDiagnostic`] and a
//! `warn` log record. Names and aliases are matched case-insensitively.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};
use serde::Serialize;

use crate::backend::{BUILTIN_PROBES, BackendProbe, DaeIntegrator, IntegratorDescriptor};
use crate::error::{DaeError, Result};
use crate::options::Options;
use crate::residual::Residual;

static GLOBAL: Registry = Registry::new(&BUILTIN_PROBES);

/// Why a backend is missing from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryDiagnostic {
    pub backend: &'static str,
    pub reason: String,
}

struct Discovery {
    descriptors: Vec<IntegratorDescriptor>,
    /// Lowercase name or alias, index into `descriptors`
    names: Vec<(String, usize)>,
    diagnostics: Vec<DiscoveryDiagnostic>,
}

impl Discovery {
    fn lookup(&self, requested: &str) -> Option<&IntegratorDescriptor> {
        let requested = requested.to_lowercase();
        self.names
            .iter()
            .find(|(name, _)| *name == requested)
            .map(|&(_, index)| &self.descriptors[index])
    }
}

/// Lazily populated table of available backends.
pub struct Registry {
    probes: &'static [BackendProbe],
    discovery: OnceLock<Discovery>,
    passes: AtomicUsize,
}

impl Registry {
    /// A registry over `probes`, tried in order. Nothing runs until the first
    /// lookup.
    pub const fn new(probes: &'static [BackendProbe]) -> Self {
        Self {
            probes,
            discovery: OnceLock::new(),
            passes: AtomicUsize::new(0),
        }
    }

    /// The process-wide registry over the built-in backends.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Find a backend by name or alias, ignoring case.
    ///
    /// # Errors
    ///
    /// [`DaeError::NameNotFound`] when no loaded backend matches.
    pub fn resolve(&self, name: &str) -> Result<&IntegratorDescriptor> {
        self.discovery()
            .lookup(name)
            .ok_or_else(|| DaeError::NameNotFound(name.to_string()))
    }

    /// Resolve `name` and build an instance.
    pub fn create(
        &self,
        name: &str,
        residual: Residual,
        options: &Options,
    ) -> Result<Box<dyn DaeIntegrator>> {
        self.resolve(name)?.instantiate(residual, options)
    }

    /// Loaded backends in registration order.
    pub fn descriptors(&self) -> &[IntegratorDescriptor] {
        &self.discovery().descriptors
    }

    /// Backends that were skipped during discovery.
    pub fn diagnostics(&self) -> &[DiscoveryDiagnostic] {
        &self.discovery().diagnostics
    }

    /// How many times discovery has run (0 or 1).
    pub fn discovery_passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn is_discovered(&self) -> bool {
        self.discovery.get().is_some()
    }

    fn discovery(&self) -> &Discovery {
        self.discovery.get_or_init(|| self.discover())
    }

    fn discover(&self) -> Discovery {
        self.passes.fetch_add(1, Ordering::SeqCst);
        let mut found = Discovery {
            descriptors: Vec::with_capacity(self.probes.len()),
            names: Vec::new(),
            diagnostics: Vec::new(),
        };

        for probe in self.probes {
            let loaded = match panic::catch_unwind(AssertUnwindSafe(probe.load)) {
                Ok(Ok(descriptor)) => descriptor,
                Ok(Err(err)) => {
                    skip(&mut found, probe.name, err.0);
                    continue;
                }
                Err(payload) => {
                    skip(
                        &mut found,
                        probe.name,
                        format!("probe panicked: {}", panic_message(payload.as_ref())),
                    );
                    continue;
                }
            };

            let keys: Vec<String> = std::iter::once(loaded.name)
                .chain(loaded.alias)
                .map(str::to_lowercase)
                .collect();
            if let Some(existing) = keys.iter().find_map(|key| found.lookup(key)) {
                let reason = format!("name or alias collides with registered backend {:?}", existing.name);
                skip(&mut found, probe.name, reason);
                continue;
            }

            let index = found.descriptors.len();
            for key in keys {
                if !found.names.iter().any(|(name, _)| *name == key) {
                    found.names.push((key, index));
                }
            }
            info!("registered DAE backend {:?}", loaded.name);
            found.descriptors.push(loaded);
        }
        found
    }
}

fn skip(found: &mut Discovery, backend: &'static str, reason: String) {
    warn!("DAE backend {backend:?} is not available: {reason}");
    found.diagnostics.push(DiscoveryDiagnostic { backend, reason });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
