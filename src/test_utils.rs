use std::{
    env,
    ffi::OsString,
    path::Path,
    sync::{Mutex, MutexGuard, OnceLock},
};

/// Serialises tests that read or modify `PATH` and other variables consulted
/// by the launcher lookup and config loading.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Prepends a directory to `PATH` while held, restoring the previous value on
/// drop.
pub struct SearchPathGuard {
    previous: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl SearchPathGuard {
    pub fn prepend(dir: &Path) -> Self {
        let lock = env_lock();
        let previous = env::var_os("PATH");

        let mut dirs = vec![dir.to_path_buf()];
        if let Some(existing) = &previous {
            dirs.extend(env::split_paths(existing));
        }
        if let Ok(joined) = env::join_paths(dirs) {
            unsafe {
                env::set_var("PATH", joined);
            }
        }

        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for SearchPathGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => unsafe {
                env::set_var("PATH", value);
            },
            None => unsafe {
                env::remove_var("PATH");
            },
        }
    }
}
