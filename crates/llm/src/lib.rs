use std::future::Future;
use std::pin::Pin;

pub mod generator;
pub mod rig_adapter;
pub mod scripted;

pub use generator::{
    CancelToken, GenerateRequest, GeneratorError, GeneratorResult, Language, ResponseGenerator,
};
pub use rig_adapter::{DEFAULT_OPENAI_MODEL, GeneratorConfig, RigGeneratorAdapter};
pub use scripted::ScriptedGenerator;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
