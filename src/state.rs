/*
 * Responsibility
 * - Process-wide shared context built once at startup
 * - Clone is cheap (everything inside is Arc)
 */
use std::sync::Arc;

use crate::facade::CentralAuthenticationService;
use crate::registry::TicketRegistry;

#[derive(Clone)]
pub struct AppState {
    pub cas: CentralAuthenticationService,
    pub registry: Arc<dyn TicketRegistry>,
}

impl AppState {
    pub fn new(cas: CentralAuthenticationService) -> Self {
        let registry = cas.registry().clone();
        Self { cas, registry }
    }
}
