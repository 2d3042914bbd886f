use std::sync::Arc;
use crate::{
    config::Settings,
    gateway::VirtualGateway,
    service::ServiceContext,
};

#[derive(Clone)]
pub struct AppState {
    pub service_context: Arc<ServiceContext>,
    /// Set when the in-process gateway is active, so its pay/decline pages can be served.
    pub virtual_gateway: Option<Arc<VirtualGateway>>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        service_context: Arc<ServiceContext>,
        virtual_gateway: Option<Arc<VirtualGateway>>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            service_context,
            virtual_gateway,
            settings,
        }
    }
}
