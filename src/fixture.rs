//! Lifecycle controller for a hadoop-unit standalone server.
//!
//! [`HadoopFixture`] owns the launcher child process for the duration of a
//! test run. It patches the installation's property files, spawns
//! `hadoop-unit-standalone console` with its output captured in a boot log,
//! polls until every enabled service is ready, and on stop runs the
//! launcher's `stop` verb, signals the child and escalates to `SIGKILL` when
//! the stop timeout expires.
use std::{
    env, fs,
    io::{self, ErrorKind},
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use strum_macros::{AsRefStr, Display};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::{
    config::{FixtureConfig, ServiceName},
    constants::{CONSOLE_VERB, LAUNCHER_NAME, POLL_INTERVAL, STOP_VERB},
    error::FixtureError,
    locate::find_launcher,
    logs::BootLog,
    probe::{ReadinessProber, ServiceReadiness, find_port},
    properties::{self, Properties},
};

/// Lifecycle states of a fixture.
///
/// `Stopped` is reached from `Stopping` or directly from `Starting` when the
/// launch or boot fails. Calling `start()` again from `Stopped` begins a fresh
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FixtureState {
    New,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// How the most recent shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The server exited and removed its PID marker on its own.
    Graceful {
        /// Time from the stop request until the server was confirmed down.
        waited: Duration,
        /// Exit status of the console process, if it could be collected.
        status: Option<ExitStatus>,
    },
    /// The stop timeout expired and the processes were killed.
    ForceKilled {
        /// Time waited before killing.
        waited: Duration,
    },
}

/// A spawned launcher process: the console or the stop helper.
#[derive(Debug)]
struct ManagedProcess {
    child: Child,
    launched_at: Instant,
    /// PID of the process that spawned the child. A forked copy of the
    /// fixture sees a different `std::process::id()` and must not signal it.
    owner_pid: u32,
    /// Process group led by the child, recorded at spawn. It stays valid
    /// after the leader is reaped for as long as any member is alive.
    process_group: Option<Pid>,
}

impl ManagedProcess {
    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    fn owned_by_current_process(&self) -> bool {
        self.owner_pid == std::process::id()
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Delivers `signal` to the process group (when the child leads one) or
    /// to the child itself. A process that is already gone is not an error.
    fn signal(&self, signal: Signal, name: &str) {
        let pid = self.pid();

        if let Some(pgid) = self.process_group {
            match signal::killpg(pgid, signal) {
                Ok(()) => {
                    debug!("Sent {signal} to process group {pgid} of {name}");
                    return;
                }
                Err(Errno::ESRCH) => {
                    debug!("Process group {pgid} of {name} missing; falling back to direct signal");
                }
                Err(Errno::EPERM) => {
                    warn!(
                        "Insufficient permissions to signal process group {pgid} for {name}. Falling back to direct signal"
                    );
                }
                Err(err) => {
                    warn!("Failed to signal process group {pgid} of {name}: {err}");
                }
            }
        }

        match signal::kill(pid, signal) {
            Ok(()) => debug!("Sent {signal} to {name} (PID {pid})"),
            Err(Errno::ESRCH) => debug!("{name} exited before {signal} could be delivered"),
            Err(err) => warn!("Failed to signal {name} (PID {pid}): {err}"),
        }
    }

    /// Sends `SIGKILL` to the whole process group and the child, then reaps
    /// the child. Group members are killed even when the leader has already
    /// exited and been reaped.
    fn force_kill(&mut self, label: &str) {
        let pid = self.pid();

        if let Some(pgid) = self.process_group {
            match signal::killpg(pgid, Signal::SIGKILL) {
                Ok(()) => debug!("Killed process group {pgid} of '{label}'"),
                Err(Errno::ESRCH) => debug!("Process group {pgid} of '{label}' already gone"),
                Err(err) => warn!("Failed to kill process group {pgid} of '{label}': {err}"),
            }
        }

        if let Err(err) = self.child.kill() {
            debug!("Kill of '{label}' (PID {pid}) reported: {err}");
        }

        match self.child.wait() {
            Ok(status) => debug!("'{label}' (PID {pid}) reaped with {status}"),
            Err(err) => warn!("Failed to reap '{label}' (PID {pid}): {err}"),
        }
    }
}

/// Test fixture that runs a hadoop-unit standalone server.
///
/// Prefer [`HadoopFixture::scoped`], which always stops the server when the
/// closure returns. Dropping a fixture that still tracks a process stops it
/// as a last resort and only logs failures.
#[derive(Debug)]
pub struct HadoopFixture {
    config: FixtureConfig,
    services: Vec<ServiceName>,
    base_dir: PathBuf,
    /// Private working directory, removed when the fixture is dropped.
    scratch: Option<TempDir>,
    launcher: Option<PathBuf>,
    bootlog: BootLog,
    prober: ReadinessProber,
    default_properties: Properties,
    service_properties: Properties,
    process: Option<ManagedProcess>,
    state: FixtureState,
    last_shutdown: Option<ShutdownOutcome>,
}

impl HadoopFixture {
    /// Validates `config`, prepares the working directory and resolves the
    /// launcher. Nothing is spawned until [`start`](Self::start).
    ///
    /// A launcher that cannot be found is not an error here; `start()` fails
    /// with [`FixtureError::Launch`] instead.
    pub fn new(config: FixtureConfig) -> Result<Self, FixtureError> {
        let services = config.enabled_services()?;
        let markers = config.service_log_markers()?;

        let (base_dir, scratch) = match &config.base_dir {
            Some(dir) => {
                let dir = if dir.is_absolute() {
                    dir.clone()
                } else {
                    env::current_dir()?.join(dir)
                };
                fs::create_dir_all(&dir)?;
                (dir, None)
            }
            None => {
                let scratch = tempfile::Builder::new()
                    .prefix(&format!("{}-", config.name))
                    .tempdir()?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let launcher = find_launcher(&config.hadoop_unit_path);
        if launcher.is_none() {
            warn!(
                "'{LAUNCHER_NAME}' not found on PATH or under {}",
                config.hadoop_unit_path.display()
            );
        }

        let bootlog = BootLog::new(&base_dir, &config.name);
        let prober = ReadinessProber::new(
            &services,
            &markers,
            config.require_health_probe,
            Some(bootlog.clone()),
        )?;

        debug!("Prepared fixture {config} in {}", base_dir.display());

        Ok(Self {
            config,
            services,
            base_dir,
            scratch,
            launcher,
            bootlog,
            prober,
            default_properties: Properties::new(),
            service_properties: Properties::new(),
            process: None,
            state: FixtureState::New,
            last_shutdown: None,
        })
    }

    /// Builds a fixture and starts it.
    pub fn launch(config: FixtureConfig) -> Result<Self, FixtureError> {
        let mut fixture = Self::new(config)?;
        fixture.start()?;
        Ok(fixture)
    }

    /// Launches a fixture, hands it to `body` and stops it afterwards, whether
    /// or not `body` succeeded.
    ///
    /// An error from `body` takes precedence over an error from stopping; the
    /// latter is logged in that case.
    pub fn scoped<T, E, F>(config: FixtureConfig, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut HadoopFixture) -> Result<T, E>,
        E: From<FixtureError>,
    {
        let mut fixture = Self::launch(config)?;
        let outcome = body(&mut fixture);
        let stopped = fixture.stop(None);

        match (outcome, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(stop_err)) => Err(stop_err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(stop_err)) => {
                error!(
                    "Failed to stop {} after an error in the scoped block: {stop_err}",
                    fixture.config.name
                );
                Err(err)
            }
        }
    }

    /// Starts the server and blocks until every enabled service is ready.
    ///
    /// Does nothing if a process is already tracked. A PID marker left by an
    /// earlier run aborts the start before anything is spawned. When the boot
    /// wait fails the half-started server is stopped before the error is
    /// returned.
    pub fn start(&mut self) -> Result<(), FixtureError> {
        if self.process.is_some() {
            debug!("{} already started", self.config.name);
            return Ok(());
        }

        self.state = FixtureState::Starting;
        self.last_shutdown = None;

        if let Err(err) = self.prestart() {
            self.state = FixtureState::Stopped;
            return Err(err);
        }

        match self.spawn_server() {
            Ok(process) => self.process = Some(process),
            Err(err) => {
                self.state = FixtureState::Stopped;
                return Err(err);
            }
        }

        if let Err(err) = self.wait_booting() {
            if let Err(stop_err) = self.stop(None) {
                warn!(
                    "Failed to stop {} after a failed start: {stop_err}",
                    self.config.name
                );
            }
            return Err(err);
        }

        self.state = FixtureState::Running;
        Ok(())
    }

    /// Stops the server, then runs [`cleanup`](Self::cleanup) even if stopping
    /// failed.
    ///
    /// `signal` overrides the configured terminate signal.
    pub fn stop(&mut self, signal: Option<Signal>) -> Result<(), FixtureError> {
        let result = self.terminate(signal);
        self.cleanup();
        result
    }

    /// Shuts the server down.
    ///
    /// Runs the launcher's `stop` verb and signals the console process, then
    /// waits until the process has exited and the PID marker is gone. When the
    /// stop timeout expires both processes are killed and
    /// [`FixtureError::ShutdownTimeout`] is returned. The process handle is
    /// released on every path.
    ///
    /// No-op when nothing is tracked, or when called from a process other than
    /// the one that spawned the server.
    pub fn terminate(&mut self, signal: Option<Signal>) -> Result<(), FixtureError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        if !process.owned_by_current_process() {
            debug!(
                "Not stopping {}: PID {} belongs to process {}",
                self.config.name,
                process.child.id(),
                process.owner_pid
            );
            self.process = Some(process);
            return Ok(());
        }

        self.state = FixtureState::Stopping;
        let signal = signal.unwrap_or(self.config.terminate_signal.signal());
        let stop_timeout = self.config.stop_timeout;
        let started = Instant::now();
        let deadline = started + stop_timeout;

        info!(
            "Stopping {} (PID {}) with {signal}",
            self.config.name,
            process.child.id()
        );

        let mut helper = self.spawn_stop_helper();
        process.signal(signal, &self.config.name);

        if let Some(helper) = helper.as_mut() {
            match wait_with_timeout(
                &mut helper.child,
                deadline.saturating_duration_since(Instant::now()),
            ) {
                Ok(Some(status)) => debug!("'{STOP_VERB}' helper exited with {status}"),
                Ok(None) => warn!("'{STOP_VERB}' helper still running after {stop_timeout:?}"),
                Err(err) => warn!("Failed while waiting for '{STOP_VERB}' helper: {err}"),
            }
        }

        loop {
            if let Some(status) = self.confirm_down(&mut process) {
                let waited = started.elapsed();
                info!("{} stopped after {waited:?}", self.config.name);
                if let Some(helper) = helper.as_mut()
                    && helper.is_running()
                {
                    helper.force_kill(STOP_VERB);
                }
                self.last_shutdown = Some(ShutdownOutcome::Graceful { waited, status });
                return Ok(());
            }

            if Instant::now() >= deadline {
                break;
            }

            thread::sleep(POLL_INTERVAL);
        }

        let waited = started.elapsed();
        warn!(
            "{} did not shut down within {stop_timeout:?}; sending SIGKILL",
            self.config.name
        );
        process.force_kill(CONSOLE_VERB);
        if let Some(helper) = helper.as_mut() {
            helper.force_kill(STOP_VERB);
        }
        self.last_shutdown = Some(ShutdownOutcome::ForceKilled { waited });

        Err(FixtureError::ShutdownTimeout {
            name: self.config.name.clone(),
            waited,
            bootlog: self.bootlog.read_for_diagnostics(),
        })
    }

    /// Finalises the state machine after a stop attempt.
    pub fn cleanup(&mut self) {
        if self.process.is_none() && self.state != FixtureState::New {
            self.state = FixtureState::Stopped;
        }
    }

    /// `true` while a process is tracked and has not exited.
    pub fn is_alive(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(ManagedProcess::is_running)
    }

    /// `true` when the server is alive and every enabled service is both
    /// listening and healthy.
    pub fn is_ready(&mut self) -> bool {
        self.is_alive() && self.prober.is_ready(&self.default_properties)
    }

    /// Per-service readiness breakdown.
    pub fn readiness_report(&self) -> Vec<ServiceReadiness> {
        self.prober.report(&self.default_properties)
    }

    /// Returns the whole boot log.
    pub fn read_bootlog(&self) -> Result<String, FixtureError> {
        self.bootlog.read()
    }

    /// Command line used for `verb`, or `None` when no launcher was found.
    pub fn server_commandline(&self, verb: &str) -> Option<Vec<String>> {
        self.launcher.as_ref().map(|launcher| {
            vec![launcher.to_string_lossy().into_owned(), verb.to_string()]
        })
    }

    /// Port configured for `service` in the default properties.
    pub fn port_of(&self, service: ServiceName) -> Option<u16> {
        find_port(service, &self.default_properties)
    }

    /// Looks up a setting that has no named field in [`FixtureConfig`].
    pub fn setting(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.config.setting(key)
    }

    /// Merged `hadoop-unit-default.properties` from the last start.
    pub fn default_properties(&self) -> &Properties {
        &self.default_properties
    }

    /// Merged `hadoop.properties` from the last start.
    pub fn service_properties(&self) -> &Properties {
        &self.service_properties
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    pub fn services(&self) -> &[ServiceName] {
        &self.services
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn last_shutdown(&self) -> Option<ShutdownOutcome> {
        self.last_shutdown
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `true` when the working directory is a private scratch directory.
    pub fn uses_scratch_dir(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn bootlog_path(&self) -> &Path {
        self.bootlog.path()
    }

    pub fn launcher(&self) -> Option<&Path> {
        self.launcher.as_deref()
    }

    /// PID of the console process.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|process| process.child.id())
    }

    /// Time since the console process was spawned.
    pub fn uptime(&self) -> Option<Duration> {
        self.process
            .as_ref()
            .map(|process| process.launched_at.elapsed())
    }

    /// Refuses to start over a live PID marker, then applies the property
    /// overlays.
    fn prestart(&mut self) -> Result<(), FixtureError> {
        let pid_file = self.config.pid_marker_path();
        if pid_file.exists() {
            error!(
                "PID marker {} exists; another hadoop-unit may still be running",
                pid_file.display()
            );
            return Err(FixtureError::StaleRun { pid_file });
        }

        self.default_properties = properties::modify(
            &self.config.default_properties_path(),
            &self.config.default_properties,
        )?;
        self.service_properties = properties::modify(
            &self.config.services_properties_path(),
            self.config.services_overlay(&self.services),
        )?;

        Ok(())
    }

    fn server_command(&self, launcher: &Path, verb: &str) -> Command {
        let mut cmd = Command::new(launcher);
        cmd.arg(verb)
            .current_dir(&self.config.hadoop_unit_path)
            .stdin(Stdio::null());
        self.configure_process(&mut cmd);
        cmd
    }

    /// Places children in their own process group and, on Linux, asks the
    /// kernel to terminate them if this process dies.
    fn configure_process(&self, cmd: &mut Command) {
        let own_group = self.config.own_process_group;
        let kill_on_parent_exit = self.config.kill_on_parent_exit;

        unsafe {
            cmd.pre_exec(move || {
                if own_group && libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                {
                    if kill_on_parent_exit
                        && libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM, 0, 0, 0) < 0
                    {
                        return Err(io::Error::last_os_error());
                    }
                }
                #[cfg(not(target_os = "linux"))]
                let _ = kill_on_parent_exit;

                Ok(())
            });
        }
    }

    fn spawn_server(&self) -> Result<ManagedProcess, FixtureError> {
        let launcher = self.launcher.as_deref().ok_or_else(|| FixtureError::Launch {
            name: self.config.name.clone(),
            source: io::Error::new(
                ErrorKind::NotFound,
                format!(
                    "'{LAUNCHER_NAME}' not found on PATH or under {}",
                    self.config.hadoop_unit_path.display()
                ),
            ),
        })?;

        // The log handles live in `cmd` and are closed when it goes out of scope.
        let (stdout, stderr) = self.bootlog.open_for_run()?;
        let mut cmd = self.server_command(launcher, CONSOLE_VERB);
        cmd.stdout(stdout).stderr(stderr);

        debug!("Executing command: {cmd:?}");

        match cmd.spawn() {
            Ok(child) => {
                info!(
                    "Launched {} with PID {} (log: {})",
                    self.config.name,
                    child.id(),
                    self.bootlog.path().display()
                );
                Ok(self.track(child))
            }
            Err(source) => {
                error!("Failed to launch {}: {source}", self.config.name);
                Err(FixtureError::Launch {
                    name: self.config.name.clone(),
                    source,
                })
            }
        }
    }

    /// Polls until every enabled service is ready, the child exits, or the
    /// boot timeout expires.
    fn wait_booting(&mut self) -> Result<(), FixtureError> {
        let boot_timeout = self.config.boot_timeout;
        let started = Instant::now();

        loop {
            if let Some(status) = self.poll_exit() {
                error!("{} exited during boot with {status}", self.config.name);
                return Err(FixtureError::EarlyExit {
                    name: self.config.name.clone(),
                    status,
                    bootlog: self.bootlog.read_for_diagnostics(),
                });
            }

            if self.prober.is_ready(&self.default_properties) {
                info!(
                    "{} started after {:?}",
                    self.config.name,
                    started.elapsed()
                );
                return Ok(());
            }

            let waited = started.elapsed();
            if waited > boot_timeout {
                error!(
                    "{} not ready after {boot_timeout:?}",
                    self.config.name
                );
                return Err(FixtureError::BootTimeout {
                    name: self.config.name.clone(),
                    waited,
                    bootlog: self.bootlog.read_for_diagnostics(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        let process = self.process.as_mut()?;
        match process.child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                warn!("Failed to poll {}: {err}", self.config.name);
                None
            }
        }
    }

    /// Returns the exit status once the console process is gone and the PID
    /// marker has been removed.
    fn confirm_down(&self, process: &mut ManagedProcess) -> Option<Option<ExitStatus>> {
        let status = match process.child.try_wait() {
            Ok(Some(status)) => Some(status),
            Ok(None) => return None,
            Err(err) => {
                debug!("Unable to collect exit status of {}: {err}", self.config.name);
                None
            }
        };

        if self.config.pid_marker_path().exists() {
            return None;
        }

        Some(status)
    }

    fn track(&self, child: Child) -> ManagedProcess {
        let process_group = self
            .config
            .own_process_group
            .then(|| Pid::from_raw(child.id() as i32));

        ManagedProcess {
            child,
            launched_at: Instant::now(),
            owner_pid: std::process::id(),
            process_group,
        }
    }

    fn spawn_stop_helper(&self) -> Option<ManagedProcess> {
        let launcher = self.launcher.as_deref()?;
        let mut cmd = self.server_command(launcher, STOP_VERB);

        match self.bootlog.open_for_append() {
            Ok((stdout, stderr)) => {
                cmd.stdout(stdout).stderr(stderr);
            }
            Err(err) => {
                warn!("Boot log unavailable for '{STOP_VERB}' helper: {err}");
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        match cmd.spawn() {
            Ok(child) => {
                debug!("Started '{STOP_VERB}' helper with PID {}", child.id());
                Some(self.track(child))
            }
            Err(err) => {
                warn!(
                    "Failed to run '{STOP_VERB}' for {}: {err}",
                    self.config.name
                );
                None
            }
        }
    }
}

impl Drop for HadoopFixture {
    fn drop(&mut self) {
        if self.process.is_none() {
            return;
        }

        if let Err(err) = self.stop(None) {
            error!(
                "Failed to shutdown {} automatically. Any server processes and files might \
                 have been leaked; remove them and call stop() explicitly: {err}",
                self.config.name
            );
        }
    }
}

/// Wait for a child process with a timeout, returning `Ok(None)` on timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}
