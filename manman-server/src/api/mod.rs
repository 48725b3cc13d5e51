//! gRPC service implementations.

mod convert;
mod manman;
mod status;
mod workshop;

pub use status::to_status;

use crate::state::AppState;

/// `ManManApi` implementation.
#[derive(Clone)]
pub struct ApiService {
    pub state: AppState,
}

impl ApiService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// `WorkshopService` implementation.
#[derive(Clone)]
pub struct WorkshopApi {
    pub state: AppState,
}

impl WorkshopApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}
