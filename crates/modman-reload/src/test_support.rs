//! In-memory doubles for the reload engine's unit tests.

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use modman_kernel::{
    CommandOwner, CommandTable, ContextClosed, DescriptorError, DescriptorReader, HostError,
    HostPlatform, HostResult, IntoHostReport, Job, ListenerTable, LoadContextId, LogLevel, Module,
    ModuleCommand, ModuleDescriptor, ModuleHandle, ModuleList, ModuleLogger, NameLookup,
    RepeatingJob, Scheduler, TaskHandle, UnloadSnapshot,
};
use parking_lot::Mutex;

use crate::command_table::CommandTableBridge;

// ============================================================================
// Logger
// ============================================================================

#[derive(Default)]
pub struct RecordingLogger {
    pub lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(_, line)| line.contains(needle))
            .count()
    }
}

impl ModuleLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, cause: Option<&(dyn Error + 'static)>) {
        let line = match cause {
            Some(cause) => format!("{message}: {cause}"),
            None => message.to_string(),
        };
        self.lines.lock().push((level, line));
    }
}

// ============================================================================
// Packages: plain YAML files with the package extension
// ============================================================================

pub struct YamlPackages;

impl YamlPackages {
    pub const BROKEN: &'static str = "BROKEN-ARCHIVE";
}

impl DescriptorReader for YamlPackages {
    fn package_extension(&self) -> &str {
        "modpkg"
    }

    fn read_descriptor(&self, package: &Path) -> Result<ModuleDescriptor, DescriptorError> {
        let content = std::fs::read_to_string(package)?;
        if content.starts_with(Self::BROKEN) {
            return Err(DescriptorError::Archive("invalid archive header".to_string()));
        }
        ModuleDescriptor::from_yaml(&content)
    }
}

// ============================================================================
// Module and command views
// ============================================================================

pub struct FakeModule {
    pub name: String,
    pub version: String,
    pub handle: ModuleHandle,
    pub context: Option<LoadContextId>,
    pub file: PathBuf,
    pub enabled: AtomicBool,
}

impl FakeModule {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            handle: ModuleHandle::new(id),
            context: Some(LoadContextId::new(id)),
            file: PathBuf::from(format!("{}.modpkg", name.to_lowercase())),
            enabled: AtomicBool::new(false),
        }
    }
}

impl Module for FakeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn authors(&self) -> &[String] {
        &[]
    }

    fn depend(&self) -> &[String] {
        &[]
    }

    fn soft_depend(&self) -> &[String] {
        &[]
    }

    fn file(&self) -> &Path {
        &self.file
    }

    fn handle(&self) -> ModuleHandle {
        self.handle
    }

    fn load_context(&self) -> Option<LoadContextId> {
        self.context
    }
}

pub struct FakeCommand {
    pub name: String,
    pub owner: CommandOwner,
    pub context: Option<LoadContextId>,
    pub closed: AtomicBool,
}

impl FakeCommand {
    pub fn direct(name: &str, owner: ModuleHandle, context: Option<LoadContextId>) -> Self {
        Self {
            name: name.to_string(),
            owner: CommandOwner::Direct(owner),
            context,
            closed: AtomicBool::new(false),
        }
    }

    pub fn unattributed(name: &str, context: Option<LoadContextId>) -> Self {
        Self {
            name: name.to_string(),
            owner: CommandOwner::Unattributed,
            context,
            closed: AtomicBool::new(false),
        }
    }

    pub fn broken(name: &str, owner: CommandOwner) -> Self {
        Self {
            name: name.to_string(),
            owner,
            context: Some(LoadContextId::new(0)),
            closed: AtomicBool::new(true),
        }
    }
}

impl ModuleCommand for FakeCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> CommandOwner {
        self.owner
    }

    fn defining_context(&self) -> Result<Option<LoadContextId>, ContextClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContextClosed(self.context.unwrap_or(LoadContextId::new(0))));
        }
        Ok(self.context)
    }
}

// ============================================================================
// Host
// ============================================================================

#[derive(Default)]
pub struct FakeModules(pub Mutex<Vec<Arc<FakeModule>>>);

impl ModuleList for FakeModules {
    fn retain_names(&self, keep: &mut dyn FnMut(&str) -> bool) -> usize {
        let mut modules = self.0.lock();
        let before = modules.len();
        modules.retain(|m| keep(&m.name));
        before - modules.len()
    }
}

#[derive(Default)]
pub struct FakeLookup(pub Mutex<HashMap<String, Arc<FakeModule>>>);

impl NameLookup for FakeLookup {
    fn remove_key(&self, key: &str) -> bool {
        self.0.lock().remove(key).is_some()
    }
}

#[derive(Default)]
pub struct FakeListeners(pub Mutex<Vec<(String, ModuleHandle)>>);

impl ListenerTable for FakeListeners {
    fn retain_owners(&self, keep: &mut dyn FnMut(ModuleHandle) -> bool) -> usize {
        let mut listeners = self.0.lock();
        let before = listeners.len();
        listeners.retain(|(_, owner)| keep(*owner));
        before - listeners.len()
    }
}

pub type FakeCommands = CommandTableBridge<HashMap<String, Arc<FakeCommand>>>;

/// Host double. Each module registers `<name>-cmd` and a `join` listener on
/// enable.
pub struct FakeHost {
    pub dir: PathBuf,
    pub reader: YamlPackages,
    next_id: AtomicU64,
    pub modules: FakeModules,
    pub lookup: FakeLookup,
    pub listeners: FakeListeners,
    pub commands: FakeCommands,
    pub calls: Mutex<Vec<String>>,
    pub drifted: AtomicBool,
    pub panic_on_enable: AtomicBool,
    pub fail_close: AtomicBool,
}

impl FakeHost {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            reader: YamlPackages,
            next_id: AtomicU64::new(1),
            modules: FakeModules::default(),
            lookup: FakeLookup::default(),
            listeners: FakeListeners::default(),
            commands: CommandTableBridge::wrap("known-commands", HashMap::new(), |c: &Arc<FakeCommand>| {
                c.clone() as Arc<dyn ModuleCommand>
            }),
            calls: Mutex::new(Vec::new()),
            drifted: AtomicBool::new(false),
            panic_on_enable: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn find(&self, handle: ModuleHandle) -> Option<Arc<FakeModule>> {
        self.modules
            .0
            .lock()
            .iter()
            .find(|m| m.handle == handle)
            .cloned()
    }
}

pub struct FakeSnapshot<'a> {
    host: &'a FakeHost,
}

impl UnloadSnapshot for FakeSnapshot<'_> {
    fn listeners(&self) -> Option<&dyn ListenerTable> {
        Some(&self.host.listeners)
    }

    fn command_tables(&self) -> Vec<&dyn CommandTable> {
        vec![&self.host.commands]
    }

    fn module_lists(&self) -> Vec<&dyn ModuleList> {
        vec![&self.host.modules]
    }

    fn lookup_maps(&self) -> Vec<&dyn NameLookup> {
        vec![&self.host.lookup]
    }
}

impl HostPlatform for FakeHost {
    type Snapshot<'a> = FakeSnapshot<'a>;

    fn name(&self) -> &str {
        "fake"
    }

    fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules
            .0
            .lock()
            .iter()
            .map(|m| m.clone() as Arc<dyn Module>)
            .collect()
    }

    fn descriptor_reader(&self) -> &dyn DescriptorReader {
        &self.reader
    }

    fn package_dir(&self) -> &Path {
        &self.dir
    }

    fn enable_module(&self, module: &dyn Module) -> HostResult<()> {
        self.record(format!("enable {}", module.name()));
        if self.panic_on_enable.load(Ordering::SeqCst) {
            panic!("enable exploded");
        }
        let module = self
            .find(module.handle())
            .ok_or_else(|| HostError::ModuleNotFound(module.name().to_string()))
            .into_report()?;
        module.enabled.store(true, Ordering::SeqCst);
        let label = format!("{}-cmd", module.name.to_lowercase());
        let command = Arc::new(FakeCommand::direct(&label, module.handle, module.context));
        self.commands.put(
            format!("{}:{label}", module.name.to_lowercase()),
            command.clone(),
        );
        self.commands.put_if_absent(label, command);
        self.listeners
            .0
            .lock()
            .push(("join".to_string(), module.handle));
        Ok(())
    }

    fn disable_module(&self, module: &dyn Module) -> HostResult<()> {
        self.record(format!("disable {}", module.name()));
        if !module.is_enabled() {
            return Err(HostError::NotEnabled(module.name().to_string())).into_report();
        }
        if let Some(module) = self.find(module.handle()) {
            module.enabled.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn instantiate(&self, package: &Path) -> HostResult<Arc<dyn Module>> {
        let descriptor = self
            .reader
            .read_descriptor(package)
            .map_err(|e| HostError::InvalidDescriptor(e.to_string()))
            .into_report()?;
        self.record(format!("instantiate {}", descriptor.name));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut module = FakeModule::new(id, &descriptor.name);
        module.version = descriptor.version.clone();
        module.file = package.to_path_buf();
        let module = Arc::new(module);
        self.modules.0.lock().push(module.clone());
        self.lookup
            .0
            .lock()
            .insert(descriptor.name.to_lowercase().replace(' ', "_"), module.clone());
        Ok(module)
    }

    fn command_entries(&self) -> Vec<(String, Arc<dyn ModuleCommand>)> {
        self.commands.entries()
    }

    fn sync_commands(&self) {
        self.record("sync".to_string());
    }

    fn gather_snapshot<'a>(&'a self, module: &dyn Module) -> HostResult<FakeSnapshot<'a>> {
        self.record(format!("snapshot {}", module.name()));
        if self.drifted.load(Ordering::SeqCst) {
            return Err(HostError::StructureUnavailable("listener table".to_string()))
                .into_report();
        }
        Ok(FakeSnapshot { host: self })
    }

    fn close_context(&self, module: &dyn Module) -> HostResult<()> {
        self.record(format!("close {}", module.name()));
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(HostError::ContextClose("library still in use".to_string()))
                .into_report();
        }
        for (_, command) in self.commands.with_native(|native| {
            native
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>()
        }) {
            if command.context == module.load_context() {
                command.closed.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Scheduler: runs everything inline, repeating jobs are ticked by hand
// ============================================================================

#[derive(Default)]
pub struct InlineScheduler {
    pub repeating: Mutex<Vec<(RepeatingJob, Duration)>>,
}

impl Scheduler for InlineScheduler {
    fn run_async(&self, job: Job) {
        job();
    }

    fn run_sync(&self, job: Job) {
        job();
    }

    fn run_sync_repeating(&self, job: RepeatingJob, _delay: Duration, period: Duration) -> TaskHandle {
        self.repeating.lock().push((job, period));
        TaskHandle::detached()
    }

    fn run_async_repeating(
        &self,
        job: RepeatingJob,
        _delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        self.repeating.lock().push((job, period));
        TaskHandle::detached()
    }
}

// ============================================================================
// Formatter: renders `key [arg, arg]`
// ============================================================================

pub struct KeyFormatter;

impl modman_kernel::MessageFormatter for KeyFormatter {
    fn format(&self, key: &str, args: &[String]) -> String {
        self.format_plain(key, args)
    }

    fn format_plain(&self, key: &str, args: &[String]) -> String {
        if args.is_empty() {
            key.to_string()
        } else {
            format!("{key} [{}]", args.join(", "))
        }
    }
}
