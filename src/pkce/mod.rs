pub mod generator;
pub mod model;
pub mod service;

pub use generator::OpaqueGenerator;
pub use model::PkceChallenge;
pub use service::PkceChallengeService;
