//! Start-up and shutdown.
//!
//! [`Bootstrap`] builds every service, registers it in a
//! [`ServiceRegistry`], loads the packages already present, starts the
//! auto features and hands back a [`ModmanRuntime`]. Components pull their
//! collaborators from the registry; nothing reaches for a global.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modman_kernel::config::{ConfigError, ConfigManager};
use modman_kernel::{
    DescriptorReader, MessageFormatter, ModuleDescriptor, ModuleLogger, ModuleManager,
    RegistryError, Scheduler, ServiceRegistry,
};
use modman_reload::{AutoFeatureManager, FileTracker, GentleUnloadRegistry, ModuleCoordinator};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::commands::OperatorConsole;
use crate::host::{
    EmbeddedHost, EntryResolver, HostBuilder, NativeEntries, PackageReader, TeardownFlavor,
};
use crate::logging::TracingLogger;
use crate::messages::{MessageCatalog, MessageError};
use crate::scheduler::TokioScheduler;

pub const PROVIDER_WARNING: &str = "Modules on a provider host keep extra caches; unloading them is best effort and some references may survive until restart.";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message catalog error: {0}")]
    Messages(#[from] MessageError),

    #[error("Service wiring error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configures and starts a [`ModmanRuntime`].
pub struct Bootstrap {
    data_folder: PathBuf,
    module_dir: PathBuf,
    resolver: Option<Arc<dyn EntryResolver>>,
    logger: Option<Arc<dyn ModuleLogger>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    handle: Option<Handle>,
    load_present: bool,
}

impl Bootstrap {
    /// `data_folder` holds `config.yml`, `messages.yml` and dumps;
    /// `module_dir` holds the packages.
    pub fn new(data_folder: impl Into<PathBuf>, module_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_folder: data_folder.into(),
            module_dir: module_dir.into(),
            resolver: None,
            logger: None,
            scheduler: None,
            handle: None,
            load_present: true,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn EntryResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn ModuleLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Use `scheduler` instead of starting a [`TokioScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Runtime the [`TokioScheduler`] spawns on. Defaults to the current one.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Skip loading the packages present at start-up.
    pub fn skip_initial_load(mut self) -> Self {
        self.load_present = false;
        self
    }

    pub fn start<F: TeardownFlavor>(self, flavor: F) -> Result<ModmanRuntime<F>, BootstrapError> {
        std::fs::create_dir_all(&self.data_folder)?;
        std::fs::create_dir_all(&self.module_dir)?;
        let registry = Arc::new(ServiceRegistry::new());

        let logger: Arc<dyn ModuleLogger> = self
            .logger
            .unwrap_or_else(|| Arc::new(TracingLogger::default()));
        registry.register::<dyn ModuleLogger>(logger.clone());

        let (scheduler, owned_scheduler) = match self.scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let tokio = Arc::new(match self.handle {
                    Some(handle) => TokioScheduler::new(handle)?,
                    None => TokioScheduler::current()?,
                });
                registry.register::<TokioScheduler>(tokio.clone());
                (tokio.clone() as Arc<dyn Scheduler>, Some(tokio))
            }
        };
        registry.register::<dyn Scheduler>(scheduler.clone());

        let config = Arc::new(ConfigManager::initialize(&self.data_folder)?);
        registry.register::<ConfigManager>(config.clone());

        let catalog = Arc::new(MessageCatalog::initialize(&self.data_folder)?);
        registry.register::<MessageCatalog>(catalog.clone());
        registry.register::<dyn MessageFormatter>(catalog.clone());

        let gentle = Arc::new(GentleUnloadRegistry::new());
        registry.register::<GentleUnloadRegistry>(gentle.clone());

        let provider_host = flavor.provider_storage();
        let host = Arc::new(
            HostBuilder::new(&self.module_dir)
                .resolver(
                    self.resolver
                        .unwrap_or_else(|| Arc::new(NativeEntries::new())),
                )
                .logger(logger.clone())
                .gentle(gentle)
                .build(flavor),
        );
        registry.register::<EmbeddedHost<F>>(host.clone());

        let reader: Arc<dyn DescriptorReader> = Arc::new(PackageReader);
        let tracker = Arc::new(FileTracker::new(&self.module_dir, reader, logger.clone()));
        registry.register::<FileTracker>(tracker.clone());

        let coordinator = Arc::new(ModuleCoordinator::<EmbeddedHost<F>>::from_registry(
            &registry,
        )?);
        registry.register::<ModuleCoordinator<EmbeddedHost<F>>>(coordinator.clone());
        registry.register::<dyn ModuleManager>(coordinator.clone());
        let manager: Arc<dyn ModuleManager> = coordinator;

        if self.load_present {
            load_present_packages(manager.as_ref(), catalog.as_ref(), logger.as_ref(), &self.module_dir);
        }
        let tracked = tracker.scan();
        debug!("Tracking {tracked} package(s)");

        let auto = Arc::new(AutoFeatureManager::from_registry(&registry)?);
        let jobs = auto.setup();
        registry.register::<AutoFeatureManager>(auto.clone());

        if provider_host && config.config().show_provider_warning {
            logger.warning(PROVIDER_WARNING);
        }

        let console = Arc::new(OperatorConsole::from_registry(
            &registry,
            &self.data_folder,
        )?);
        info!(
            "Modman started with {} module(s), {jobs} auto job(s)",
            manager.modules().len()
        );

        Ok(ModmanRuntime {
            registry,
            host,
            manager,
            auto,
            console,
            catalog,
            config,
            tracker,
            scheduler,
            owned_scheduler,
            logger,
            data_folder: self.data_folder,
        })
    }
}

/// Packages ordered so that each comes after the packages providing its
/// hard dependencies. Dependency cycles keep their directory order.
pub fn load_order(mut pending: Vec<(PathBuf, ModuleDescriptor)>) -> Vec<(PathBuf, ModuleDescriptor)> {
    let available: HashSet<String> = pending
        .iter()
        .map(|(_, d)| d.name.to_lowercase())
        .collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = |d: &ModuleDescriptor| {
            d.depend.iter().all(|dep| {
                let dep = dep.to_lowercase();
                placed.contains(&dep) || !available.contains(&dep)
            })
        };
        let Some(index) = pending.iter().position(|(_, d)| ready(d)) else {
            ordered.append(&mut pending);
            break;
        };
        let entry = pending.remove(index);
        placed.insert(entry.1.name.to_lowercase());
        ordered.push(entry);
    }
    ordered
}

fn load_present_packages(
    manager: &dyn ModuleManager,
    formatter: &dyn MessageFormatter,
    logger: &dyn ModuleLogger,
    module_dir: &Path,
) {
    let reader = PackageReader;
    let mut packages = Vec::new();
    for package in reader.package_files(module_dir) {
        match reader.read_descriptor(&package) {
            Ok(descriptor) => packages.push((package, descriptor)),
            Err(e) => logger.warning_with_cause(
                &format!("Skipping {}", package.display()),
                &e,
            ),
        }
    }
    for (_, descriptor) in load_order(packages) {
        if manager.is_ignored_name(&descriptor.name) {
            debug!("Not loading ignored module {}", descriptor.name);
            continue;
        }
        let result = manager.load(&descriptor.name);
        logger.info(&formatter.render(&result));
    }
}

/// A started module manager.
pub struct ModmanRuntime<F: TeardownFlavor> {
    registry: Arc<ServiceRegistry>,
    host: Arc<EmbeddedHost<F>>,
    manager: Arc<dyn ModuleManager>,
    auto: Arc<AutoFeatureManager>,
    console: Arc<OperatorConsole>,
    catalog: Arc<MessageCatalog>,
    config: Arc<ConfigManager>,
    tracker: Arc<FileTracker>,
    scheduler: Arc<dyn Scheduler>,
    owned_scheduler: Option<Arc<TokioScheduler>>,
    logger: Arc<dyn ModuleLogger>,
    data_folder: PathBuf,
}

impl<F: TeardownFlavor> ModmanRuntime<F> {
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<EmbeddedHost<F>> {
        &self.host
    }

    pub fn manager(&self) -> &Arc<dyn ModuleManager> {
        &self.manager
    }

    pub fn auto_features(&self) -> &Arc<AutoFeatureManager> {
        &self.auto
    }

    pub fn console(&self) -> &Arc<OperatorConsole> {
        &self.console
    }

    pub fn catalog(&self) -> &Arc<MessageCatalog> {
        &self.catalog
    }

    pub fn formatter(&self) -> Arc<dyn MessageFormatter> {
        self.catalog.clone()
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<FileTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn logger(&self) -> &Arc<dyn ModuleLogger> {
        &self.logger
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    /// Run `job` on the synchronous context and wait for it. Runs inline
    /// when the runtime was started with an external scheduler.
    pub fn run_on_sync<R: Send + 'static>(
        &self,
        job: impl FnOnce() -> R + Send + 'static,
    ) -> Option<R> {
        match &self.owned_scheduler {
            Some(scheduler) => scheduler.run_sync_and_wait(job),
            None => Some(job()),
        }
    }

    /// Cancel the auto features, stop the scheduler and drop every service.
    pub fn shutdown(&self) {
        self.auto.cancel_all();
        if let Some(scheduler) = &self.owned_scheduler {
            scheduler.shutdown();
        }
        self.registry.clear();
        info!("Modman stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(name: &str, depend: &[&str]) -> (PathBuf, ModuleDescriptor) {
        let mut descriptor = ModuleDescriptor::new(name, "1.0");
        descriptor.depend = depend.iter().map(|d| d.to_string()).collect();
        (PathBuf::from(format!("{name}.modpkg")), descriptor)
    }

    fn names(ordered: &[(PathBuf, ModuleDescriptor)]) -> Vec<&str> {
        ordered.iter().map(|(_, d)| d.name.as_str()).collect()
    }

    #[test]
    fn test_load_order_puts_dependencies_first() {
        let ordered = load_order(vec![
            package("Alpha", &["Core"]),
            package("Beta", &["Alpha"]),
            package("Core", &[]),
        ]);
        assert_eq!(names(&ordered), vec!["Core", "Alpha", "Beta"]);
    }

    #[test]
    fn test_load_order_ignores_missing_dependencies_and_cycles() {
        let ordered = load_order(vec![
            package("Alpha", &["Nowhere"]),
            package("Ping", &["Pong"]),
            package("Pong", &["Ping"]),
        ]);
        assert_eq!(names(&ordered), vec!["Alpha", "Ping", "Pong"]);
    }
}
