//! [`ObjectRegistry`] – class name → physical properties.
//!
//! The detection pass validates every detected object's class here before
//! tracking it.  Unknown classes may be registered on demand; when that fails
//! the object is skipped for the pass.
//!
//! [`PropertyDatabase`] is the configuration-backed implementation: a table
//! loaded from `[object_property.<class>]` entries plus a default property
//! template for classes registered at runtime.
//!
//! # Example
//!
//! ```
//! use sceneparse_runtime::registry::{ObjectRegistry, PropertyDatabase, resolve_class};
//! use sceneparse_types::PhysicalProperties;
//!
//! let mut db = PropertyDatabase::new(PhysicalProperties::default());
//! db.insert("cup", PhysicalProperties::new(0.2, 0.6, 0.01));
//!
//! assert!(db.exists("cup"));
//! assert!(!db.exists("plate"));
//!
//! // "plate" is registered on the fly with the default template.
//! let props = resolve_class(&mut db, "plate").unwrap();
//! assert_eq!(props, PhysicalProperties::default());
//! assert!(db.exists("plate"));
//! ```

use std::collections::BTreeMap;

use sceneparse_types::{PhysicalProperties, SceneError};
use tracing::info;

/// Capability interface over an object property database.
pub trait ObjectRegistry: Send {
    /// `true` when `class` is known.
    fn exists(&self, class: &str) -> bool;

    /// Register a previously unseen `class` and return its properties.
    ///
    /// # Errors
    ///
    /// [`SceneError::RegistrationRejected`] when the class cannot be added.
    fn register(&mut self, class: &str) -> Result<PhysicalProperties, SceneError>;

    /// Properties of a known class.
    fn properties_of(&self, class: &str) -> Option<PhysicalProperties>;
}

/// Look `class` up, registering it when absent.
///
/// # Errors
///
/// Propagates the registry's rejection, or
/// [`SceneError::UnknownObjectClass`] if a registry reports a class as
/// existing but has no properties for it.
pub fn resolve_class(
    registry: &mut dyn ObjectRegistry,
    class: &str,
) -> Result<PhysicalProperties, SceneError> {
    if registry.exists(class) {
        registry
            .properties_of(class)
            .ok_or_else(|| SceneError::UnknownObjectClass(class.to_string()))
    } else {
        registry.register(class)
    }
}

/// Table-backed [`ObjectRegistry`].
#[derive(Debug, Clone)]
pub struct PropertyDatabase {
    entries: BTreeMap<String, PhysicalProperties>,
    default_properties: PhysicalProperties,
    register_unknown: bool,
}

impl PropertyDatabase {
    /// Empty database that registers unknown classes with `default_properties`.
    pub fn new(default_properties: PhysicalProperties) -> Self {
        Self {
            entries: BTreeMap::new(),
            default_properties,
            register_unknown: true,
        }
    }

    /// Build from a `(class, properties)` table.
    pub fn from_table<I, S>(default_properties: PhysicalProperties, table: I) -> Self
    where
        I: IntoIterator<Item = (S, PhysicalProperties)>,
        S: Into<String>,
    {
        let mut db = Self::new(default_properties);
        for (class, props) in table {
            db.insert(class, props);
        }
        db
    }

    /// Enable or disable on-demand registration of unknown classes.
    pub fn with_registration(mut self, register_unknown: bool) -> Self {
        self.register_unknown = register_unknown;
        self
    }

    /// Add or replace a class entry.
    pub fn insert(&mut self, class: impl Into<String>, properties: PhysicalProperties) {
        self.entries.insert(class.into(), properties);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known class names in sorted order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl ObjectRegistry for PropertyDatabase {
    fn exists(&self, class: &str) -> bool {
        self.entries.contains_key(class)
    }

    fn register(&mut self, class: &str) -> Result<PhysicalProperties, SceneError> {
        if class.trim().is_empty() {
            return Err(SceneError::RegistrationRejected {
                class: class.to_string(),
                reason: "empty class name".to_string(),
            });
        }
        if !self.register_unknown {
            return Err(SceneError::RegistrationRejected {
                class: class.to_string(),
                reason: "registration of unknown classes is disabled".to_string(),
            });
        }
        let props = *self
            .entries
            .entry(class.to_string())
            .or_insert(self.default_properties);
        info!(class, mass = props.mass, "registered new object class");
        Ok(props)
    }

    fn properties_of(&self, class: &str) -> Option<PhysicalProperties> {
        self.entries.get(class).copied()
    }
}
