use std::process::{Child, Command, Stdio};

use pinhole_core::session::{MappingHandler, MappingInfo};

pub(super) struct ExecHook {
    cmd: String,
    children: Vec<Child>,
}

impl ExecHook {
    pub(super) fn new(cmd: String) -> Self {
        Self {
            cmd,
            children: Vec::with_capacity(4),
        }
    }

    fn reap(&mut self) {
        self.children
            .retain_mut(|c| c.try_wait().ok().flatten().is_none());
    }
}

impl MappingHandler for ExecHook {
    fn on_change(&mut self, info: MappingInfo) {
        self.reap();
        match Command::new("sh")
            .arg("-c")
            .arg(&self.cmd)
            .env("PINHOLE_PUB_ADDR", info.public_addr.ip().to_string())
            .env("PINHOLE_PUB_PORT", info.public_addr.port().to_string())
            .env("PINHOLE_LOCAL_ADDR", info.local_addr.ip().to_string())
            .env("PINHOLE_LOCAL_PORT", info.local_addr.port().to_string())
            .env("PINHOLE_FORWARDED", if info.forwarded { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
        {
            Ok(child) => self.children.push(child),
            Err(e) => tracing::warn!(error = %e, "exec hook failed"),
        }
    }
}
