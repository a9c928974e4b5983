//! Process-wide singleton state: the door table and id generator.
//!
//! Exactly one of each exists per process, lazily constructed on first use.
//! The fork coordinator (`fork.rs`) reaches into this same singleton to
//! quiesce and restart the accept loops around a `fork()`.

use crate::id::IdGenerator;
use crate::table::DoorTable;
use std::sync::OnceLock;

pub struct Runtime {
    pub table: DoorTable,
    pub ids: IdGenerator,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

pub fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        crate::fork::install_hooks_once();
        Runtime {
            table: DoorTable::new(),
            ids: IdGenerator::new(),
        }
    })
}

/// Like [`runtime`], but never triggers initialization. Used by the fork
/// hooks, which must do nothing (not even lazily construct the singleton)
/// when no door has ever been created in this process.
pub fn get() -> Option<&'static Runtime> {
    RUNTIME.get()
}
