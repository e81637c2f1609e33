//! Process lifecycle hooks used on the crash path.

use std::sync::Mutex;

use tracing::{debug, warn};

/// Exit code of a process terminated after a crash report.
pub const CRASH_EXIT_CODE: i32 = 10;

type ShutdownHook = Box<dyn Fn() + Send + Sync>;

/// What the executor may do to the running process.
///
/// The host implements the UI parts (closing screens); the default
/// [`StdProcess`] covers plain processes.
pub trait ProcessControl: Send + Sync {
    /// Close the screen that was in front when `crashed_thread` failed, so
    /// the platform does not relaunch it in a broken state.
    fn finish_last_activity(&self, _crashed_thread: Option<&str>) {}

    /// Close every remaining screen.
    fn finish_activities(&self) {}

    /// Stop background services owned by this process.
    fn stop_services(&self) {}

    /// Killing a process with a debugger attached kills the debugger too.
    fn is_debugger_attached(&self) -> bool;

    /// Terminate the process. Real implementations do not return.
    fn terminate(&self, code: i32);
}

/// [`ProcessControl`] for ordinary processes.
///
/// Shutdown hooks registered with [`StdProcess::on_shutdown`] run from
/// `stop_services`.
#[derive(Default)]
pub struct StdProcess {
    hooks: Mutex<Vec<ShutdownHook>>,
}

impl StdProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook that stops one background service.
    pub fn on_shutdown(&self, hook: impl Fn() + Send + Sync + 'static) {
        match self.hooks.lock() {
            Ok(mut hooks) => hooks.push(Box::new(hook)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(hook)),
        }
    }
}

impl ProcessControl for StdProcess {
    fn stop_services(&self) {
        let hooks = match self.hooks.lock() {
            Ok(hooks) => hooks,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(count = hooks.len(), "Stopping services");
        for hook in hooks.iter() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)).is_err() {
                warn!("Shutdown hook panicked");
            }
        }
    }

    fn is_debugger_attached(&self) -> bool {
        tracer_pid().is_some_and(|pid| pid != 0)
    }

    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// `TracerPid` from `/proc/self/status`; `None` where procfs is missing.
fn tracer_pid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_tracer_pid(&status)
}

fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}
