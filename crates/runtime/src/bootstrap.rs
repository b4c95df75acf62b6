//! Domain lifecycle orchestration.
//!
//! Modules are sorted stably by [`Phase`], then `init` runs for all of them in
//! order, then `start`. [`RunningApp::stop`] runs `stop` in reverse order and
//! releases the shared registries. Every call goes through a fail-soft runner:
//! an error or a panic is logged under the module's span and recorded, and the
//! next module runs anyway.

use futures::FutureExt;
use pipsync_core::logging::domain_span;
use pipsync_core::{AppStateWriters, Result};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

use crate::domain::{DomainContext, DomainModule, Phase};
use crate::domains;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Start,
    Stop,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Start => "start",
            Stage::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle call that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{module}.{stage}: {message}")]
pub struct LifecycleFailure {
    pub module: &'static str,
    pub phase: Phase,
    pub stage: Stage,
    pub message: String,
    /// Set for ordering bugs such as `start` before `init`, as opposed to
    /// failures caused by the environment.
    pub invariant_violation: bool,
    pub panicked: bool,
}

/// Run one lifecycle call, converting an error or a panic into a
/// [`LifecycleFailure`].
pub async fn run_fail_soft<T, F>(
    module: &'static str,
    phase: Phase,
    stage: Stage,
    call: F,
) -> std::result::Result<T, LifecycleFailure>
where
    F: Future<Output = Result<T>>,
{
    let span = domain_span(module, stage.as_str());
    let outcome = AssertUnwindSafe(call)
        .catch_unwind()
        .instrument(span.clone())
        .await;

    let _entered = span.enter();
    match outcome {
        Ok(Ok(value)) => {
            debug!("Lifecycle call completed");
            Ok(value)
        }
        Ok(Err(e)) => {
            let invariant_violation = e.is_invariant_violation();
            if invariant_violation {
                error!(error = %e, "Lifecycle invariant violated");
            } else {
                warn!(error = %e, "Lifecycle call failed");
            }
            Err(LifecycleFailure {
                module,
                phase,
                stage,
                message: e.to_string(),
                invariant_violation,
                panicked: false,
            })
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Lifecycle call panicked");
            Err(LifecycleFailure {
                module,
                phase,
                stage,
                message,
                invariant_violation: false,
                panicked: true,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Bootstrap {
    ctx: DomainContext,
    writers: AppStateWriters,
    modules: Vec<Box<dyn DomainModule>>,
}

impl Bootstrap {
    pub fn new(ctx: DomainContext, writers: AppStateWriters) -> Self {
        Self {
            ctx,
            writers,
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: Box<dyn DomainModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// The full production module set.
    pub fn with_default_modules(self) -> Self {
        domains::default_modules()
            .into_iter()
            .fold(self, |bootstrap, module| bootstrap.with_module(module))
    }

    pub fn context(&self) -> &DomainContext {
        &self.ctx
    }

    pub async fn run(self) -> RunningApp {
        let Bootstrap {
            ctx,
            mut writers,
            mut modules,
        } = self;

        if !ctx.config.enabled {
            info!("Runtime disabled by configuration, no modules composed");
            modules.clear();
        }

        // Stable: registration order is kept within a phase.
        modules.sort_by_key(|m| m.phase());
        let order: Vec<&str> = modules.iter().map(|m| m.name()).collect();
        info!(modules = ?order, "Starting runtime");

        let mut failures = Vec::new();
        let mut initialized = Vec::with_capacity(modules.len());
        for module in modules.iter_mut() {
            let (name, phase) = (module.name(), module.phase());
            match run_fail_soft(name, phase, Stage::Init, module.init(&ctx, &mut writers)).await {
                Ok(()) => initialized.push(true),
                Err(f) => {
                    failures.push(f);
                    initialized.push(false);
                }
            }
        }

        let unclaimed = writers.unclaimed();
        if !unclaimed.is_empty() {
            debug!(slices = ?unclaimed, "State slices without an owning module");
        }

        // Modules whose init failed are not started.
        for (module, ready) in modules.iter_mut().zip(initialized) {
            let (name, phase) = (module.name(), module.phase());
            if !ready {
                warn!(module = name, "Skipping start, init failed");
                continue;
            }
            if let Err(f) = run_fail_soft(name, phase, Stage::Start, module.start()).await {
                failures.push(f);
            }
        }

        info!(
            modules = modules.len(),
            failures = failures.len(),
            "Runtime started"
        );
        RunningApp {
            ctx,
            modules,
            failures,
        }
    }
}

pub struct RunningApp {
    ctx: DomainContext,
    modules: Vec<Box<dyn DomainModule>>,
    failures: Vec<LifecycleFailure>,
}

impl RunningApp {
    pub fn context(&self) -> &DomainContext {
        &self.ctx
    }

    /// Failures recorded during init and start.
    pub fn failures(&self) -> &[LifecycleFailure] {
        &self.failures
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Stop every module in reverse order and release shared resources.
    /// Returns the failures recorded while stopping.
    pub async fn stop(mut self) -> Vec<LifecycleFailure> {
        let mut failures = Vec::new();
        for module in self.modules.iter_mut().rev() {
            let (name, phase) = (module.name(), module.phase());
            if let Err(f) = run_fail_soft(name, phase, Stage::Stop, module.stop()).await {
                failures.push(f);
            }
        }

        self.ctx.observers.disconnect_all();
        self.ctx.events.clear();
        self.ctx.resolver.invalidate_all();
        self.ctx.http.clear();
        info!(failures = failures.len(), "Runtime stopped");
        failures
    }
}
