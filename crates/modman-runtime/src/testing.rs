//! Test helpers: package fixtures, a manual scheduler, recording sinks and
//! a scriptable module entry.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use modman_kernel::{
    Job, LogLevel, MessageFormatter, ModuleDescriptor, ModuleLogger, RepeatingJob, Scheduler,
    TaskHandle,
};
use parking_lot::Mutex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::commands::CommandSender;
use crate::host::{DESCRIPTOR_ENTRY, ModuleContext, ModuleEntry, ModuleError, PACKAGE_EXTENSION};

/// Writes `.modpkg` archives.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    descriptor: ModuleDescriptor,
    file_name: Option<String>,
    files: Vec<(String, Vec<u8>)>,
    with_descriptor: bool,
}

impl PackageBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(name, version),
            file_name: None,
            files: Vec::new(),
            with_descriptor: true,
        }
    }

    pub fn author(mut self, author: &str) -> Self {
        self.descriptor.author = Some(author.to_string());
        self
    }

    pub fn depend(mut self, dependency: &str) -> Self {
        self.descriptor.depend.push(dependency.to_string());
        self
    }

    pub fn soft_depend(mut self, dependency: &str) -> Self {
        self.descriptor.soft_depend.push(dependency.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.descriptor.description = Some(description.to_string());
        self
    }

    pub fn main(mut self, main: &str) -> Self {
        self.descriptor.main = Some(main.to_string());
        self
    }

    pub fn library(mut self, entry: &str) -> Self {
        self.descriptor.library = Some(entry.to_string());
        self
    }

    /// Extra archive entry.
    pub fn file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.push((name.to_string(), content.to_vec()));
        self
    }

    /// Leave `module.yml` out.
    pub fn without_descriptor(mut self) -> Self {
        self.with_descriptor = false;
        self
    }

    /// File stem to write under. Defaults to the module name.
    pub fn file_stem(mut self, stem: &str) -> Self {
        self.file_name = Some(stem.to_string());
        self
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        let stem = self
            .file_name
            .clone()
            .unwrap_or_else(|| self.descriptor.name.clone());
        dir.join(format!("{stem}.{PACKAGE_EXTENSION}"))
    }

    /// Write the archive into `dir`, replacing any existing file.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = self.path_in(dir);
        let mut zip = ZipWriter::new(File::create(&path)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        if self.with_descriptor {
            let yaml = self
                .descriptor
                .to_yaml()
                .map_err(io::Error::other)?;
            zip.start_file(DESCRIPTOR_ENTRY, options)
                .map_err(io::Error::other)?;
            zip.write_all(yaml.as_bytes())?;
        }
        for (name, content) in &self.files {
            zip.start_file(name.as_str(), options)
                .map_err(io::Error::other)?;
            zip.write_all(content)?;
        }
        zip.finish().map_err(io::Error::other)?;
        Ok(path)
    }
}

/// Scheduler that runs one-shot jobs inline and records repeating jobs so
/// tests can tick them by hand.
#[derive(Default)]
pub struct ManualScheduler {
    repeating: Mutex<Vec<(RepeatingJob, Duration, TaskHandle)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Periods of the live repeating jobs.
    pub fn periods(&self) -> Vec<Duration> {
        self.repeating
            .lock()
            .iter()
            .filter(|(_, _, handle)| !handle.is_cancelled())
            .map(|(_, period, _)| *period)
            .collect()
    }

    /// Run every live repeating job once. Returns how many ran.
    pub fn tick(&self) -> usize {
        let jobs: Vec<RepeatingJob> = self
            .repeating
            .lock()
            .iter()
            .filter(|(_, _, handle)| !handle.is_cancelled())
            .map(|(job, _, _)| job.clone())
            .collect();
        for job in &jobs {
            job();
        }
        jobs.len()
    }

    fn record(&self, job: RepeatingJob, period: Duration) -> TaskHandle {
        let handle = TaskHandle::new(|| {});
        self.repeating.lock().push((job, period, handle.clone()));
        handle
    }
}

impl Scheduler for ManualScheduler {
    fn run_async(&self, job: Job) {
        job();
    }

    fn run_sync(&self, job: Job) {
        job();
    }

    fn run_sync_repeating(
        &self,
        job: RepeatingJob,
        _delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        self.record(job, period)
    }

    fn run_async_repeating(
        &self,
        job: RepeatingJob,
        _delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        self.record(job, period)
    }

    fn is_sync_context(&self) -> bool {
        true
    }
}

/// Logger that keeps every line.
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }
}

impl ModuleLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        let line = match cause {
            Some(cause) => format!("{message}: {cause}"),
            None => message.to_string(),
        };
        self.lines.lock().push((level, line));
    }
}

/// Sender that records message keys and rendered lines.
pub struct RecordingSender {
    formatter: Arc<dyn MessageFormatter>,
    permissions: Option<Vec<String>>,
    messages: Mutex<Vec<(String, Vec<String>, String)>>,
}

impl RecordingSender {
    /// A console: every permission.
    pub fn console(formatter: Arc<dyn MessageFormatter>) -> Self {
        Self {
            formatter,
            permissions: None,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// A non-console sender holding only `permissions`.
    pub fn with_permissions(formatter: Arc<dyn MessageFormatter>, permissions: &[&str]) -> Self {
        Self {
            formatter,
            permissions: Some(permissions.iter().map(|p| p.to_string()).collect()),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(k, _, _)| k.clone()).collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(_, _, l)| l.clone()).collect()
    }

    /// Arguments of the last message sent under `key`.
    pub fn args_of(&self, key: &str) -> Option<Vec<String>> {
        self.messages
            .lock()
            .iter()
            .rev()
            .find(|(k, _, _)| k == key)
            .map(|(_, args, _)| args.clone())
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl CommandSender for RecordingSender {
    fn send_message(&self, prefixed: bool, key: &str, args: &[String]) {
        let line = if prefixed {
            self.formatter.format(key, args)
        } else {
            self.formatter.format_plain(key, args)
        };
        self.messages
            .lock()
            .push((key.to_string(), args.to_vec(), line));
    }

    fn has_permission(&self, permission: &str) -> bool {
        match &self.permissions {
            Some(granted) => granted.iter().any(|p| p == permission),
            None => true,
        }
    }

    fn is_console(&self) -> bool {
        self.permissions.is_none()
    }
}

/// Lifecycle calls seen by [`ScriptedEntry`] instances, shared across
/// reloads.
#[derive(Default, Clone)]
pub struct EntryJournal {
    events: Arc<Mutex<Vec<String>>>,
}

impl EntryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

/// A module entry driven by data: registers the listed commands and
/// listeners on enable and journals every callback.
#[derive(Clone, Default)]
pub struct ScriptedEntry {
    commands: Vec<String>,
    unattributed: Vec<String>,
    dispatcher: Vec<String>,
    listeners: Vec<String>,
    allow_unload: Option<Arc<AtomicBool>>,
    fail_enable: bool,
    panic_disable: bool,
    journal: EntryJournal,
}

impl ScriptedEntry {
    pub fn new(journal: &EntryJournal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    pub fn command(mut self, label: &str) -> Self {
        self.commands.push(label.to_string());
        self
    }

    pub fn unattributed_command(mut self, label: &str) -> Self {
        self.unattributed.push(label.to_string());
        self
    }

    pub fn dispatcher_command(mut self, label: &str) -> Self {
        self.dispatcher.push(label.to_string());
        self
    }

    pub fn listener(mut self, event: &str) -> Self {
        self.listeners.push(event.to_string());
        self
    }

    /// Register for gentle unload; unloads are allowed while `allow` is
    /// true.
    pub fn gentle(mut self, allow: Arc<AtomicBool>) -> Self {
        self.allow_unload = Some(allow);
        self
    }

    pub fn failing_enable(mut self) -> Self {
        self.fail_enable = true;
        self
    }

    /// Panic inside `on_disable`, after journalling the call.
    pub fn panicking_disable(mut self) -> Self {
        self.panic_disable = true;
        self
    }

    /// Factory for [`StaticEntries`](crate::host::StaticEntries).
    pub fn factory(self) -> impl Fn(&ModuleDescriptor) -> Box<dyn ModuleEntry> + Send + Sync + 'static {
        move |_: &ModuleDescriptor| -> Box<dyn ModuleEntry> { Box::new(self.clone()) }
    }
}

impl ModuleEntry for ScriptedEntry {
    fn on_load(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.journal.push(format!("load {}", ctx.module_name()));
        Ok(())
    }

    fn on_enable(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let name = ctx.module_name().to_string();
        self.journal.push(format!("enable {name}"));
        if self.fail_enable {
            return Err(format!("{name} refuses to start").into());
        }
        for label in &self.commands {
            let reply = format!("{name}:{label}");
            ctx.register_command(label, move |inv| Ok(format!("{reply} {}", inv.args.join(" "))));
        }
        for label in &self.unattributed {
            let reply = format!("{name}:{label}");
            ctx.register_unattributed_command(label, move |_| Ok(reply.clone()));
        }
        for label in &self.dispatcher {
            let reply = format!("{name}:{label}");
            ctx.register_dispatcher_command(label, move |_| Ok(reply.clone()))?;
        }
        for event in &self.listeners {
            let journal = self.journal.clone();
            let who = name.clone();
            ctx.register_listener(event, 0, move |e| {
                journal.push(format!("{who} saw {} {}", e.name, e.payload));
            })?;
        }
        if let Some(allow) = &self.allow_unload {
            let allow = allow.clone();
            ctx.request_gentle_unload(move || allow.load(Ordering::SeqCst));
        }
        Ok(())
    }

    fn on_disable(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.journal.push(format!("disable {}", ctx.module_name()));
        if self.panic_disable {
            panic!("{} blew up while stopping", ctx.module_name());
        }
        Ok(())
    }
}
