//! Plugin system for Sprocket
//!
//! This crate fetches plugin sources from version control, builds them into
//! loadable libraries, loads them into the running process and binds the
//! backend each plugin exports into statically typed host destinations.

pub mod binding;
pub mod error;
pub mod key;
pub mod loader;
pub mod plugin;
pub mod pool;
mod process;
pub mod registry;
pub mod toolchain;
pub mod types;
pub mod vcs;

// Re-export main types
pub use binding::{bind, Backend, BackendBuilder, Destination, BACKEND_ABI_VERSION};
pub use error::{AggregateError, PluginError, PluginResult, ToolError, ToolResult};
pub use loader::{DylibLoader, Module, ModuleLoader, StaticExports, StaticModuleLoader};
pub use plugin::{Collaborators, Plugin};
pub use pool::BuildPool;
pub use registry::Registry;
pub use toolchain::{CargoToolchain, TestOutcome, Toolchain};
pub use types::{PluginDescriptor, PluginInfo, PluginState, RepositoryRef, SourceKind};
pub use vcs::{GitCli, VersionControl};

/// Export a plugin's backend
///
/// Generates the `sprocket_backend` factory and the `sprocket_backend_abi`
/// tag the host resolves when binding. Plugins must be built with the same
/// compiler and `sprocket-plugin` version as the host.
///
/// # Example
/// ```rust,ignore
/// use sprocket_plugin::{export_backend, Backend};
///
/// pub struct Widget;
///
/// export_backend!(Backend::builder(Widget)
///     .provides(|w| Box::new(w) as Box<dyn Greeter>)
///     .build());
/// ```
#[macro_export]
macro_rules! export_backend {
    ($backend:expr) => {
        #[no_mangle]
        pub fn sprocket_backend() -> $crate::Backend {
            $backend
        }

        #[no_mangle]
        pub extern "C" fn sprocket_backend_abi() -> u32 {
            $crate::BACKEND_ABI_VERSION
        }
    };
}
