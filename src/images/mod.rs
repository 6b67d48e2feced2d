pub mod normalize;
pub mod services;
