mod load_balancer;

pub use load_balancer::{LoadBalancer, LATENCY_CEILING_MS, NO_HEALTHY_ENDPOINT_PENALTY};
