mod exec;

use std::io::Write;

use exec::ExecHook;
use pinhole_core::session::{MappingHandler, MappingInfo};

/// Publishes mapping changes to the surrounding system: one
/// machine-readable line on stdout, plus an optional user command.
pub(crate) struct Hooks {
    exec: Option<ExecHook>,
}

impl Hooks {
    pub fn new(exec: Option<String>) -> Self {
        Self {
            exec: exec.map(ExecHook::new),
        }
    }
}

impl MappingHandler for Hooks {
    fn on_change(&mut self, info: MappingInfo) {
        if writeln!(
            std::io::stdout(),
            "{} {} {} {}",
            info.public_addr.ip(),
            info.public_addr.port(),
            info.local_addr.ip(),
            info.local_addr.port(),
        )
        .is_err()
        {
            // downstream pipe is gone, nothing left to publish to
            std::process::exit(0);
        }
        if let Some(exec) = &mut self.exec {
            exec.on_change(info);
        }
    }
}
