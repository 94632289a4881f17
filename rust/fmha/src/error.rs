use lanetile::block::Hazard;

/// Errors reported by the device-operation layer.
///
/// Shape and type mismatches are compile errors and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum FmhaError {
    #[error("argument not supported: {0}")]
    UnsupportedArgument(String),
    #[error(
        "no LDS buffer sequence over {slots} slots for k0_loops={k0_loops}, k1_loops={k1_loops}"
    )]
    NoLdsSequence {
        slots: usize,
        k0_loops: usize,
        k1_loops: usize,
    },
    #[error("{count} shared memory hazard(s), first: {first}")]
    SyncHazard { count: usize, first: Hazard },
}

pub type Result<T, E = FmhaError> = std::result::Result<T, E>;
