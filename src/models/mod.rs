//! 模型目录与加载

pub mod loader;
pub mod registry;

pub use loader::{AdapterFactory, LoadReport, LoadedModel, ModelLoader, ProviderFactory};
pub use registry::{ModelConfig, ModelDescriptor, ModelRegistry};
