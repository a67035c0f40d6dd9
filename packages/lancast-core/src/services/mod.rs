//! Application services composed from the protocol components.

mod cast_service;

pub use cast_service::{CastOutcome, CastRequest, CastService, CastSnapshot, ProxySnapshot};
