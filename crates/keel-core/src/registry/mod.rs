//! Extension registry and the contract extensions implement.

mod context;
mod extension;
mod extension_registry;
mod topology;

pub use context::{ExtensionContext, KernelHandle};
pub use extension::{Extension, ExtensionFactory};
pub use extension_registry::{ExtensionInfo, ExtensionRegistry};
