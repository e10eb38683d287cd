//! Auto-load, auto-unload and auto-reload.
//!
//! Each enabled feature is a repeating job on the worker pool. Jobs diff the
//! package directory against the [`FileTracker`] and hop to the synchronous
//! context before calling into the manager.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use modman_kernel::config::{AutoFeatureConfig, ConfigManager};
use modman_kernel::{
    MessageFormatter, ModuleLogger, ModuleManager, OpResult, RegistryError, Scheduler,
    ServiceRegistry, TaskHandle,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::tracker::FileTracker;

pub const AUTO_FEATURE_WARNING: &str =
    "!!! The auto (re/un)load feature can break modules, use with caution !!!";
pub const AUTO_FEATURE_HINT: &str = "If anything breaks, a restart will probably fix it!";

/// Logs rendered results; cloned into sync jobs.
#[derive(Clone)]
struct Reporter {
    formatter: Arc<dyn MessageFormatter>,
    logger: Arc<dyn ModuleLogger>,
}

impl Reporter {
    fn report(&self, result: &OpResult) {
        self.logger.info(&self.formatter.render(result));
    }
}

pub struct AutoFeatureManager {
    manager: Arc<dyn ModuleManager>,
    tracker: Arc<FileTracker>,
    scheduler: Arc<dyn Scheduler>,
    config: Arc<ConfigManager>,
    reporter: Reporter,
    warned: AtomicBool,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl AutoFeatureManager {
    pub fn new(
        manager: Arc<dyn ModuleManager>,
        tracker: Arc<FileTracker>,
        scheduler: Arc<dyn Scheduler>,
        config: Arc<ConfigManager>,
        formatter: Arc<dyn MessageFormatter>,
        logger: Arc<dyn ModuleLogger>,
    ) -> Self {
        Self {
            manager,
            tracker,
            scheduler,
            config,
            reporter: Reporter { formatter, logger },
            warned: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_registry(registry: &ServiceRegistry) -> Result<Self, RegistryError> {
        Ok(Self::new(
            registry.get::<dyn ModuleManager>()?,
            registry.get::<FileTracker>()?,
            registry.get::<dyn Scheduler>()?,
            registry.get::<ConfigManager>()?,
            registry.get::<dyn MessageFormatter>()?,
            registry.get::<dyn ModuleLogger>()?,
        ))
    }

    /// Schedule every enabled feature. Returns how many jobs were started.
    pub fn setup(self: &Arc<Self>) -> usize {
        let config = self.config.config();
        let features: [(&str, &AutoFeatureConfig, fn(&Self)); 3] = [
            ("Auto-load", &config.auto_load, Self::auto_load_tick),
            ("Auto-unload", &config.auto_unload, Self::auto_unload_tick),
            ("Auto-reload", &config.auto_reload, Self::auto_reload_tick),
        ];

        let mut started = 0;
        for (label, settings, tick) in features {
            if !settings.enabled {
                continue;
            }
            self.warn_once();
            let period = Duration::from_secs(settings.check_every_seconds.max(1));
            let weak: Weak<Self> = Arc::downgrade(self);
            let handle = self.scheduler.run_async_repeating(
                Arc::new(move || {
                    if let Some(this) = weak.upgrade() {
                        tick(&this);
                    }
                }),
                period,
                period,
            );
            self.tasks.lock().push(handle);
            info!("{label} checks every {}s", period.as_secs());
            started += 1;
        }
        started
    }

    /// Stop every scheduled job.
    pub fn cancel_all(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.cancel();
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.tasks.lock().len()
    }

    fn warn_once(&self) {
        if self.warned.swap(true, Ordering::SeqCst) {
            return;
        }
        let logger = &self.reporter.logger;
        logger.warning(AUTO_FEATURE_WARNING);
        logger.warning(AUTO_FEATURE_HINT);
    }

    /// Load packages that are not tracked yet, then track them.
    pub fn auto_load_tick(&self) {
        if !self.tracker.package_dir().is_dir() {
            return;
        }
        for package in self.tracker.package_files() {
            if self.tracker.is_path_tracked(&package) {
                continue;
            }
            let Some(name) = package.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            debug!("Auto-load found {}", package.display());
            let manager = self.manager.clone();
            let reporter = self.reporter.clone();
            self.scheduler.run_sync(Box::new(move || {
                reporter.report(&manager.load(&name));
            }));
            self.tracker.track(&package);
        }
    }

    /// Unload modules whose tracked package disappeared.
    ///
    /// The file is untracked before the unload runs, so each removal yields
    /// at most one attempt whatever its outcome.
    pub fn auto_unload_tick(&self) {
        // A missing directory would make every tracked file look deleted.
        if !self.tracker.package_dir().is_dir() {
            return;
        }
        let dir = self.tracker.package_dir().to_path_buf();
        for file_name in self.tracker.tracked_file_names() {
            if dir.join(&file_name).exists() {
                continue;
            }
            let module = self
                .tracker
                .owner_of(&file_name)
                .and_then(|owner| self.manager.module_by_name(&owner));
            self.tracker.untrack(&file_name);

            let Some(module) = module else {
                debug!("Untracked {file_name}, no loaded owner");
                continue;
            };
            if self.manager.is_ignored(module.as_ref()) {
                debug!("Untracked {file_name}, owner {} is ignored", module.name());
                continue;
            }

            let manager = self.manager.clone();
            let reporter = self.reporter.clone();
            self.scheduler.run_sync(Box::new(move || {
                reporter.report(&manager.unload(module.as_ref()));
            }));
        }
    }

    /// Reload modules whose tracked package changed on disk.
    ///
    /// The stored hash is updated before the reload is scheduled so a slow
    /// or failing reload is not picked up again on the next tick.
    pub fn auto_reload_tick(&self) {
        if !self.tracker.package_dir().is_dir() {
            return;
        }
        for package in self.tracker.package_files() {
            if !self.tracker.is_path_tracked(&package) || !self.tracker.has_changed(&package) {
                continue;
            }
            let Some(file_name) = file_name_of(&package) else {
                continue;
            };
            let Some(owner) = self.tracker.owner_of(&file_name) else {
                self.tracker.untrack(&file_name);
                continue;
            };
            let Some(module) = self.manager.module_by_name(&owner) else {
                self.tracker.untrack(&file_name);
                continue;
            };
            if self.manager.is_ignored(module.as_ref()) {
                continue;
            }

            self.tracker.update_file_hash(&package);
            let manager = self.manager.clone();
            let reporter = self.reporter.clone();
            self.scheduler.run_sync(Box::new(move || {
                let unloaded = manager.unload(module.as_ref());
                if unloaded.is_failure() {
                    reporter.report(&unloaded);
                    return;
                }
                drop(module);
                reporter.report(&manager.load(&owner));
            }));
        }
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
