mod endpoint_repository;
mod transport;

pub use endpoint_repository::EndpointRepository;
pub use transport::{OutboundRequest, Transport, TransportResponse};
