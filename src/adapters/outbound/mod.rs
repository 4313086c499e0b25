mod dashmap_endpoint_registry;
mod reqwest_transport;

pub use dashmap_endpoint_registry::DashMapEndpointRegistry;
pub use reqwest_transport::ReqwestTransport;
