//! End-to-end tests: a bootstrapped runtime driven through its manager,
//! its auto features and its operator console.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use modman_kernel::{LogLevel, ModuleManager, keys};
use modman_runtime::bootstrap::{Bootstrap, ModmanRuntime, PROVIDER_WARNING};
use modman_runtime::commands::VERSIONS_FILE;
use modman_runtime::host::{ClassicFlavor, ProviderFlavor, StaticEntries, TeardownFlavor};
use modman_runtime::testing::{
    EntryJournal, ManualScheduler, PackageBuilder, RecordingLogger, RecordingSender, ScriptedEntry,
};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

struct Harness<F: TeardownFlavor> {
    data: TempDir,
    modules: TempDir,
    runtime: ModmanRuntime<F>,
    scheduler: Arc<ManualScheduler>,
    logger: Arc<RecordingLogger>,
    journal: EntryJournal,
}

impl<F: TeardownFlavor> Harness<F> {
    fn manager(&self) -> &Arc<dyn ModuleManager> {
        self.runtime.manager()
    }

    fn console(&self, line: &str) -> RecordingSender {
        let sender = RecordingSender::console(self.runtime.formatter());
        self.runtime.console().execute(&sender, line);
        sender
    }

    fn info_lines(&self, needle: &str) -> usize {
        self.logger
            .lines()
            .iter()
            .filter(|(level, line)| *level == LogLevel::Info && line.contains(needle))
            .count()
    }
}

/// Alpha registers `alpha-cmd` and vetoes unloads while `allow_unload` is
/// false. Beta and Gamma each register one command.
fn entries(journal: &EntryJournal, allow_unload: &Arc<AtomicBool>) -> StaticEntries {
    StaticEntries::new()
        .with(
            "Alpha",
            ScriptedEntry::new(journal)
                .command("alpha-cmd")
                .listener("join")
                .gentle(allow_unload.clone())
                .factory(),
        )
        .with(
            "Beta",
            ScriptedEntry::new(journal).command("beta-cmd").factory(),
        )
        .with(
            "Gamma",
            ScriptedEntry::new(journal).command("gamma-cmd").factory(),
        )
}

fn start_with<F: TeardownFlavor>(
    flavor: F,
    config: Option<&str>,
    allow_unload: &Arc<AtomicBool>,
) -> Harness<F> {
    let data = TempDir::new().unwrap();
    let modules = TempDir::new().unwrap();
    if let Some(config) = config {
        fs::write(data.path().join("config.yml"), config).unwrap();
    }
    PackageBuilder::new("Beta", "1.0")
        .author("bob")
        .depend("Alpha")
        .write_to(modules.path())
        .unwrap();
    PackageBuilder::new("Alpha", "1.0")
        .author("ann")
        .description("The first module")
        .write_to(modules.path())
        .unwrap();

    let journal = EntryJournal::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let logger = Arc::new(RecordingLogger::new());
    let runtime = Bootstrap::new(data.path(), modules.path())
        .resolver(Arc::new(entries(&journal, allow_unload)))
        .logger(logger.clone())
        .scheduler(scheduler.clone())
        .start(flavor)
        .expect("runtime should start");

    Harness {
        data,
        modules,
        runtime,
        scheduler,
        logger,
        journal,
    }
}

fn start(config: Option<&str>) -> Harness<ClassicFlavor> {
    start_with(ClassicFlavor, config, &Arc::new(AtomicBool::new(true)))
}

fn auto_config(feature: &str) -> String {
    format!("version: 3\n{feature}:\n  enabled: true\n  check-every-seconds: 1\n")
}

// ============================================================================
// Start-up
// ============================================================================

#[test]
fn test_startup_loads_packages_in_dependency_order() {
    let h = start(None);

    assert_eq!(h.manager().module_names(false), vec!["Alpha", "Beta"]);
    assert!(h.manager().modules().iter().all(|m| m.is_enabled()));
    assert_eq!(
        h.journal.events(),
        vec!["load Alpha", "enable Alpha", "load Beta", "enable Beta"]
    );
    assert_eq!(h.runtime.tracker().len(), 2);
    assert_eq!(
        h.runtime.tracker().owner_of("Alpha.modpkg").as_deref(),
        Some("Alpha")
    );
    assert!(h.data.path().join("config.yml").exists());
    assert!(h.data.path().join("messages.yml").exists());
    assert!(h.scheduler.periods().is_empty());
}

#[test]
fn test_unloading_one_module_keeps_the_other_working() {
    let h = start(None);
    let host = h.runtime.host();

    let alpha = h.manager().module_by_name("alpha").unwrap();
    assert_eq!(h.manager().unload(alpha.as_ref()).message_key(), keys::UNLOAD_UNLOADED);

    assert!(host.dispatch("alpha-cmd").is_err());
    assert_eq!(host.dispatch("beta-cmd x").unwrap(), "Beta:beta-cmd x");
    assert_eq!(h.manager().find_by_command("alpha-cmd"), Vec::<String>::new());
    assert_eq!(h.manager().find_by_command("beta-cmd"), vec!["Beta"]);
    assert_eq!(host.listener_count(), 0);
}

#[test]
fn test_provider_host_warns_and_cleans_up() {
    let h = start_with(ProviderFlavor, None, &Arc::new(AtomicBool::new(true)));
    assert!(h.logger.contains(LogLevel::Warning, PROVIDER_WARNING));

    let alpha = h.manager().module_by_name("Alpha").unwrap();
    let handle = alpha.handle();
    assert!(h.manager().unload(alpha.as_ref()).is_success());
    let providers = h.runtime.host().providers().unwrap();
    assert!(!providers.has_provider(handle));
    assert_eq!(providers.providers().len(), 1);
}

#[test]
fn test_provider_warning_can_be_turned_off() {
    let h = start_with(
        ProviderFlavor,
        Some("version: 3\nshow-provider-warning: false\n"),
        &Arc::new(AtomicBool::new(true)),
    );
    assert!(!h.logger.contains(LogLevel::Warning, PROVIDER_WARNING));
}

#[test]
fn test_ignored_modules_are_not_loaded_at_startup() {
    let h = start(Some("version: 3\nignored-modules: [beta]\n"));
    assert_eq!(h.manager().module_names(false), vec!["Alpha"]);
}

// ============================================================================
// Gentle unload
// ============================================================================

#[test]
fn test_gentle_veto_blocks_unload_and_reload() {
    let allow = Arc::new(AtomicBool::new(false));
    let h = start_with(ClassicFlavor, None, &allow);

    let sender = h.console("unload Alpha");
    assert_eq!(sender.keys(), vec![keys::UNLOAD_GENTLE_FAILED]);
    assert_eq!(sender.lines(), vec!["[Modman] Alpha refused to be unloaded."]);

    let sender = h.console("reload Alpha");
    assert_eq!(sender.keys(), vec![keys::UNLOAD_GENTLE_FAILED]);
    assert_eq!(h.journal.count("enable Alpha"), 1);
    assert_eq!(h.runtime.host().dispatch("alpha-cmd").unwrap(), "Alpha:alpha-cmd ");

    allow.store(true, Ordering::SeqCst);
    let sender = h.console("reload Alpha");
    assert_eq!(sender.keys(), vec![keys::RELOAD_RELOADED]);
    assert_eq!(h.journal.count("enable Alpha"), 2);
}

// ============================================================================
// Auto features
// ============================================================================

#[test]
fn test_auto_load_picks_up_new_packages() {
    let h = start(Some(&auto_config("auto-load")));
    assert_eq!(h.scheduler.periods().len(), 1);
    assert!(h.logger.count(LogLevel::Warning) >= 2);

    PackageBuilder::new("Gamma", "1.0")
        .write_to(h.modules.path())
        .unwrap();
    assert_eq!(h.scheduler.tick(), 1);

    let gamma = h.manager().module_by_name("Gamma").unwrap();
    assert!(gamma.is_enabled());
    assert!(h.runtime.tracker().is_tracked("Gamma.modpkg"));
    assert_eq!(h.info_lines("Gamma has been loaded and enabled."), 1);

    h.scheduler.tick();
    assert_eq!(h.journal.count("load Gamma"), 1);
}

#[test]
fn test_auto_reload_follows_hash_changes() {
    let h = start(Some(&auto_config("auto-reload")));

    h.scheduler.tick();
    assert_eq!(h.journal.count("enable Alpha"), 1);

    PackageBuilder::new("Alpha", "2.0")
        .author("ann")
        .write_to(h.modules.path())
        .unwrap();
    h.scheduler.tick();
    assert_eq!(h.manager().module_version("Alpha").as_deref(), Some("2.0"));
    assert_eq!(h.journal.count("enable Alpha"), 2);
    assert_eq!(h.info_lines("Alpha has been reloaded."), 0);
    // One line from start-up, one from the reload.
    assert_eq!(h.info_lines("Alpha has been loaded and enabled."), 2);

    h.scheduler.tick();
    assert_eq!(h.journal.count("enable Alpha"), 2);
}

#[test]
fn test_auto_reload_skips_hash_change_once_when_vetoed() {
    let allow = Arc::new(AtomicBool::new(false));
    let h = start_with(ClassicFlavor, Some(&auto_config("auto-reload")), &allow);

    PackageBuilder::new("Alpha", "2.0")
        .write_to(h.modules.path())
        .unwrap();
    h.scheduler.tick();
    h.scheduler.tick();
    assert_eq!(h.info_lines("Alpha refused to be unloaded."), 1);
    assert_eq!(h.manager().module_version("Alpha").as_deref(), Some("1.0"));
}

#[test]
fn test_auto_unload_makes_a_single_attempt() {
    let allow = Arc::new(AtomicBool::new(false));
    let h = start_with(ClassicFlavor, Some(&auto_config("auto-unload")), &allow);

    fs::remove_file(h.modules.path().join("Alpha.modpkg")).unwrap();
    h.scheduler.tick();
    h.scheduler.tick();

    assert_eq!(h.info_lines("Alpha refused to be unloaded."), 1);
    assert!(!h.runtime.tracker().is_tracked("Alpha.modpkg"));
    assert!(h.manager().module_by_name("Alpha").is_some());
}

#[test]
fn test_auto_unload_removes_modules_whose_package_vanished() {
    let h = start(Some(&auto_config("auto-unload")));

    fs::remove_file(h.modules.path().join("Beta.modpkg")).unwrap();
    h.scheduler.tick();

    assert!(h.manager().module_by_name("Beta").is_none());
    assert!(h.runtime.host().dispatch("beta-cmd").is_err());
    assert_eq!(h.info_lines("Beta has been unloaded."), 1);
}

#[test]
fn test_shutdown_cancels_auto_features() {
    let h = start(Some(&auto_config("auto-load")));
    assert_eq!(h.runtime.auto_features().active_jobs(), 1);

    h.runtime.shutdown();
    assert_eq!(h.runtime.auto_features().active_jobs(), 0);
    assert!(h.scheduler.periods().is_empty());
    assert!(h.runtime.registry().is_empty());
}

// ============================================================================
// Operator console
// ============================================================================

#[test]
fn test_console_list_and_info() {
    let h = start(None);

    let sender = h.console("list -v");
    assert_eq!(
        sender.lines(),
        vec!["[Modman] Modules (2): Alpha v1.0, Beta v1.0"]
    );

    let sender = h.console("info beta");
    assert_eq!(
        sender.lines(),
        vec![
            "[Modman] Module information: Beta",
            "- Version: 1.0",
            "- Authors: bob",
            "- Status: Enabled",
            "- Depends: Alpha",
        ]
    );
}

#[test]
fn test_console_usage_and_lookup() {
    let h = start(None);

    let sender = h.console("usage Alpha");
    assert_eq!(sender.args_of(keys::USAGE_USAGE), Some(vec!["Alpha".to_string(), "alpha-cmd".to_string()]));

    let sender = h.console("lookup beta-cmd");
    assert_eq!(
        sender.lines(),
        vec!["[Modman] Command beta-cmd is registered by: Beta"]
    );

    let sender = h.console("lookup nothing");
    assert_eq!(sender.keys(), vec![keys::LOOKUP_NOT_FOUND]);
}

#[test]
fn test_console_enable_disable_restart() {
    let h = start(None);

    assert_eq!(h.console("disable Beta").keys(), vec![keys::DISABLE_DISABLED]);
    assert_eq!(
        h.console("disable Beta").keys(),
        vec![keys::DISABLE_ALREADY_DISABLED]
    );
    assert_eq!(h.console("enable Beta").keys(), vec![keys::ENABLE_ENABLED]);
    assert_eq!(h.console("restart Beta").keys(), vec![keys::RESTART_RESTARTED]);
    assert_eq!(h.journal.count("enable Beta"), 3);

    assert_eq!(h.console("disable all").keys(), vec![keys::DISABLE_ALL]);
    assert!(h.manager().modules().iter().all(|m| !m.is_enabled()));
    assert_eq!(h.console("enable *").keys(), vec![keys::ENABLE_ALL]);
}

#[test]
fn test_console_load_and_unload() {
    let h = start(None);

    assert_eq!(h.console("load Gamma").keys(), vec![keys::LOAD_CANNOT_FIND]);
    PackageBuilder::new("Gamma", "1.0")
        .write_to(h.modules.path())
        .unwrap();
    assert_eq!(h.console("load Gamma").keys(), vec![keys::LOAD_LOADED]);
    assert_eq!(h.console("load gamma").keys(), vec![keys::LOAD_ALREADY_LOADED]);
    assert_eq!(h.console("unload Gamma").keys(), vec![keys::UNLOAD_UNLOADED]);
    assert_eq!(h.console("unload Gamma").keys()[0], keys::ERROR_INVALID_MODULE);
    assert_eq!(h.console("load Modman").keys(), vec![keys::ERROR_IGNORED]);
}

#[test]
fn test_console_reports_missing_arguments_with_usage() {
    let h = start(None);

    let sender = h.console("enable");
    assert_eq!(
        sender.keys(),
        vec![
            keys::ERROR_SPECIFY_MODULE,
            keys::ERROR_USAGE_COMMAND,
            keys::ERROR_USAGE_DESCRIPTION,
            keys::ERROR_USAGE_USAGE,
        ]
    );
    assert_eq!(sender.lines()[3], "Usage: enable <module|all>");

    let sender = h.console("frobnicate");
    assert_eq!(
        sender.lines(),
        vec!["[Modman] Unknown command frobnicate, try help."]
    );
}

#[test]
fn test_console_checks_permissions() {
    let h = start(None);
    let sender = RecordingSender::with_permissions(
        h.runtime.formatter(),
        &["modman.reload", "modman.help"],
    );

    assert!(h.runtime.console().execute(&sender, "unload Alpha"));
    assert_eq!(sender.keys(), vec![keys::ERROR_NO_PERMISSION]);
    sender.clear();

    h.runtime.console().execute(&sender, "reload all");
    assert_eq!(sender.keys(), vec![keys::ERROR_NO_PERMISSION]);
    sender.clear();

    h.runtime.console().execute(&sender, "help");
    assert_eq!(sender.keys().len(), 3);
}

#[test]
fn test_console_dump_writes_versions() {
    let h = start(None);
    h.console("disable Beta");

    let sender = h.console("dump");
    assert_eq!(sender.keys(), vec![keys::DUMP_DUMPED]);
    let dump = fs::read_to_string(h.data.path().join(VERSIONS_FILE)).unwrap();
    assert_eq!(dump, "Alpha v1.0 - Enabled\nBeta v1.0 - Disabled\n");
}

#[test]
fn test_custom_messages_are_used() {
    let data = TempDir::new().unwrap();
    fs::write(
        data.path().join("messages.yml"),
        "prefix: \"> \"\nlist:\n  list: \"{0} loaded\"\n",
    )
    .unwrap();
    let modules = TempDir::new().unwrap();
    let runtime = Bootstrap::new(data.path(), modules.path())
        .resolver(Arc::new(StaticEntries::new()))
        .logger(Arc::new(RecordingLogger::new()))
        .scheduler(Arc::new(ManualScheduler::new()))
        .start(ClassicFlavor)
        .unwrap();

    let sender = RecordingSender::console(runtime.formatter());
    runtime.console().execute(&sender, "list");
    runtime.console().execute(&sender, "info x");
    assert_eq!(sender.lines()[0], "> 0 loaded");
    assert_eq!(sender.lines()[1], "> No module goes by that name.");
    assert!(runtime.catalog().contains("unload.gentle-failed"));
}

// ============================================================================
// Tokio scheduler
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_runtime_runs_commands_on_the_sync_context() {
    let data = TempDir::new().unwrap();
    let modules = TempDir::new().unwrap();
    PackageBuilder::new("Alpha", "1.0")
        .write_to(modules.path())
        .unwrap();
    let journal = EntryJournal::new();
    let runtime = Arc::new(
        Bootstrap::new(data.path(), modules.path())
            .resolver(Arc::new(entries(&journal, &Arc::new(AtomicBool::new(true)))))
            .logger(Arc::new(RecordingLogger::new()))
            .skip_initial_load()
            .start(ClassicFlavor)
            .unwrap(),
    );

    let rt = runtime.clone();
    let loaded = tokio::task::spawn_blocking(move || {
        let manager = rt.manager().clone();
        let scheduler = rt.scheduler().clone();
        rt.run_on_sync(move || {
            let result = manager.load("Alpha");
            (result.is_success(), scheduler.is_sync_context())
        })
    })
    .await
    .unwrap();
    assert_eq!(loaded, Some((true, true)));
    assert!(!runtime.scheduler().is_sync_context());

    let rt = runtime.clone();
    tokio::task::spawn_blocking(move || rt.shutdown())
        .await
        .unwrap();
}
