#![allow(dead_code)]

use std::thread;

use xiaozhi::sim::{AudioControl, Call, Journal, ProtocolControl, SimRig};
use xiaozhi::AppHandle;

/// A rig whose application runs its main event loop on a background thread.
pub struct Running {
    pub handle: AppHandle,
    pub journal: Journal,
    pub audio: AudioControl,
    pub protocol: ProtocolControl,
}

impl Running {
    /// Blocks until every task queued so far has run.
    pub fn flush(&self) {
        self.handle.call(|_| ()).expect("dispatcher gone");
    }

    pub fn count(&self, call: &Call) -> usize {
        self.journal.filtered(|c| c == call).len()
    }
}

pub fn spawn(rig: SimRig) -> Running {
    let SimRig {
        mut app,
        journal,
        audio,
        protocol,
        ..
    } = rig;
    let handle = app.handle();
    thread::Builder::new()
        .name("main_event_loop".into())
        .spawn(move || app.run())
        .expect("spawn dispatcher");

    Running {
        handle,
        journal,
        audio,
        protocol,
    }
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
