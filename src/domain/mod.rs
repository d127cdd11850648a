// Domain layer: core models and ports. Adapters implement the ports; core only talks to the traits.

pub mod model;
pub mod ports;
