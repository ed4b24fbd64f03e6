//! Capability binding
//!
//! A plugin exposes one backend value through the `sprocket_backend` symbol.
//! The host asks for it with a statically typed destination; [`bind`] moves the
//! value in when the types agree exactly, or when the plugin declared a view
//! of its value as the destination type (usually a boxed trait object).
//!
//! ```rust,ignore
//! // plugin crate
//! pub struct Widget;
//! impl Greeter for Widget { /* ... */ }
//!
//! sprocket_plugin::export_backend!(
//!     Backend::builder(Widget).provides(|w| Box::new(w) as Box<dyn Greeter>).build()
//! );
//!
//! // host
//! let mut greeter: Box<dyn Greeter> = Box::new(NoopGreeter);
//! registry.backend("widget", &mut greeter).await?;
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{PluginError, PluginResult};
use crate::loader::Module;

/// Version of the backend calling convention. Bumped whenever [`Backend`] or
/// the exported symbol signatures change.
pub const BACKEND_ABI_VERSION: u32 = 1;

/// Symbol of the backend factory
pub const BACKEND_SYMBOL: &str = "sprocket_backend";

/// Symbol of the ABI tag
pub const BACKEND_ABI_SYMBOL: &str = "sprocket_backend_abi";

/// Signature of the exported backend factory
pub type BackendFactory = fn() -> Backend;

/// Signature of the exported ABI tag
pub type AbiVersionFn = extern "C" fn() -> u32;

type Adapter = Box<dyn Fn(Box<dyn Any + Send>) -> Result<Box<dyn Any>, Box<dyn Any + Send>> + Send + Sync>;

struct CapabilityView {
    target: TypeId,
    target_name: &'static str,
    adapt: Adapter,
}

/// The value a plugin exports, with the views it can be bound through
pub struct Backend {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
    views: Vec<CapabilityView>,
}

impl Backend {
    /// A backend bindable only to its exact type
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self::builder(value).build()
    }

    pub fn builder<T: Any + Send>(value: T) -> BackendBuilder<T> {
        BackendBuilder {
            value,
            views: Vec::new(),
        }
    }

    /// Concrete type name of the exported value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type names of the declared views
    pub fn provides(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.views.iter().map(|view| view.target_name)
    }

    /// Convert into `T`, directly or through a view. Gives the backend back
    /// when neither applies.
    fn into_target<T: Any>(self) -> Result<T, Self> {
        let Backend {
            value,
            type_name,
            mut views,
        } = self;

        if (*value).type_id() == TypeId::of::<T>() {
            return match value.downcast::<T>() {
                Ok(exact) => Ok(*exact),
                Err(value) => Err(Backend {
                    value,
                    type_name,
                    views,
                }),
            };
        }

        let Some(position) = views.iter().position(|view| view.target == TypeId::of::<T>()) else {
            return Err(Backend {
                value,
                type_name,
                views,
            });
        };

        let view = views.remove(position);
        match (view.adapt)(value) {
            Ok(adapted) => match adapted.downcast::<T>() {
                Ok(target) => Ok(*target),
                // The adapter was registered for T, so this cannot happen
                Err(_) => Err(Backend {
                    value: Box::new(()),
                    type_name,
                    views,
                }),
            },
            Err(value) => Err(Backend {
                value,
                type_name,
                views,
            }),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("type_name", &self.type_name)
            .field("provides", &self.provides().collect::<Vec<_>>())
            .finish()
    }
}

/// Declares the views a backend can be bound through
pub struct BackendBuilder<T> {
    value: T,
    views: Vec<CapabilityView>,
}

impl<T: Any + Send> BackendBuilder<T> {
    /// Allow binding to `U`, produced from the value by `view`.
    ///
    /// `view` is typically an unsizing cast such as
    /// `|v| Box::new(v) as Box<dyn Trait>`, which the compiler only accepts
    /// when the value implements the trait.
    pub fn provides<U, F>(mut self, view: F) -> Self
    where
        U: Any,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let adapt: Adapter = Box::new(move |value: Box<dyn Any + Send>| {
            value
                .downcast::<T>()
                .map(|value| Box::new(view(*value)) as Box<dyn Any>)
        });

        self.views.push(CapabilityView {
            target: TypeId::of::<U>(),
            target_name: type_name::<U>(),
            adapt,
        });
        self
    }

    pub fn build(self) -> Backend {
        Backend {
            value: Box::new(self.value),
            type_name: type_name::<T>(),
            views: self.views,
        }
    }
}

/// Somewhere a bound backend can be stored
pub trait Destination {
    type Target: Any;

    /// Whether [`Destination::set`] can currently succeed
    fn is_settable(&self) -> bool;

    /// Store the value, handing it back if the destination refused it
    fn set(self, value: Self::Target) -> Result<(), Self::Target>;
}

impl<T: Any> Destination for &mut T {
    type Target = T;

    fn is_settable(&self) -> bool {
        true
    }

    fn set(self, value: T) -> Result<(), T> {
        *self = value;
        Ok(())
    }
}

impl<T: Any> Destination for &OnceLock<T> {
    type Target = T;

    fn is_settable(&self) -> bool {
        self.get().is_none()
    }

    fn set(self, value: T) -> Result<(), T> {
        OnceLock::set(self, value)
    }
}

/// Bind the backend `module` exports into `destination`.
///
/// Checks run in order: exported symbols, factory invocation, destination
/// settable, then exact type or declared view. On any failure the destination
/// is left untouched.
pub fn bind<D: Destination>(module: &dyn Module, alias: &str, destination: D) -> PluginResult<()> {
    let factory = module
        .backend_factory()
        .ok_or_else(|| PluginError::SymbolNotFound {
            alias: alias.to_string(),
            symbol: BACKEND_SYMBOL,
        })?;

    match module.abi_version() {
        Some(BACKEND_ABI_VERSION) => {}
        Some(found) => {
            return Err(PluginError::SignatureMismatch {
                alias: alias.to_string(),
                reason: format!(
                    "backend ABI version {} (host expects {})",
                    found, BACKEND_ABI_VERSION
                ),
            })
        }
        None => {
            return Err(PluginError::SignatureMismatch {
                alias: alias.to_string(),
                reason: format!("missing {} symbol", BACKEND_ABI_SYMBOL),
            })
        }
    }

    let backend = factory();

    if !destination.is_settable() {
        return Err(PluginError::NotAddressable {
            alias: alias.to_string(),
        });
    }

    let found = backend.type_name();
    let value = backend
        .into_target::<D::Target>()
        .map_err(|_| PluginError::TypeMismatch {
            alias: alias.to_string(),
            expected: type_name::<D::Target>(),
            found,
        })?;

    destination.set(value).map_err(|_| PluginError::NotAddressable {
        alias: alias.to_string(),
    })?;

    tracing::debug!(
        target: "plugin_registry",
        alias = alias,
        backend = found,
        destination = type_name::<D::Target>(),
        "Bound plugin backend"
    );
    Ok(())
}
