//! Engine error type.
//!
//! The fatal variants are invariant violations: they mean the tick
//! bookkeeping or container discipline is broken, and they carry enough
//! context (person, tick, conflux, stats) to locate the corruption.
//! Admission denials are *not* errors — they are routine back-pressure and
//! never surface here.

use meso_core::{ConfluxId, LinkId, PersonId, StatsId, Tick};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "person {person} moved between two virtual queues in tick {tick} \
         (stats {from} -> {to} on conflux {conflux})"
    )]
    VqToVqTraversal {
        person: PersonId,
        tick: Tick,
        conflux: ConfluxId,
        from: StatsId,
        to: StatsId,
    },

    #[error("person {person} not present for removal in stats {stats} of conflux {conflux}")]
    RemoveMissingPerson {
        person: PersonId,
        conflux: ConfluxId,
        stats: StatsId,
    },

    #[error("last-updated frame of conflux {conflux} is ahead of tick {tick}")]
    FrameBookkeeping { conflux: ConfluxId, tick: Tick },

    #[error("link {link} has no virtual queue on conflux {conflux}")]
    UnknownVqLink { link: LinkId, conflux: ConfluxId },

    #[error("stats {stats} is not owned by conflux {conflux}")]
    NotOwned { stats: StatsId, conflux: ConfluxId },

    #[error("requested stats {stats} is outside the network")]
    UnknownStats { stats: StatsId },

    #[error("stats {stats} names conflux {conflux} which does not exist (network graph inconsistency)")]
    MissingDownstreamConflux { stats: StatsId, conflux: ConfluxId },

    #[error("person {person} has no role at initialisation")]
    NoRole { person: PersonId },

    #[error("person {person} requested a crossing at {tick} while on no stats")]
    AdmissionWithoutStats { person: PersonId, tick: Tick },

    #[error("on-road person {person} has no starting stats")]
    NoStartingStats { person: PersonId },

    #[error("person {person} cannot start the day as a bus passenger")]
    StartsAsPassenger { person: PersonId },

    #[error("person {person} expected in the {list} list of conflux {conflux}")]
    NotInList {
        person: PersonId,
        list: &'static str,
        conflux: ConfluxId,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
