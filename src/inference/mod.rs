pub mod ai_flow;
pub mod client;
pub mod fallback;
pub mod flags;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod test_server;

pub use ai_flow::AiFlowClient;
pub use client::HttpInferenceClient;
pub use fallback::FallbackClassifier;
pub use flags::{FeatureFlag, HttpFeatureFlag, StaticFlag};
pub use service::InferenceService;
pub use types::{BinVerdict, BurstDescriptor, Classification, ServiceHealth, VoteSummary};
