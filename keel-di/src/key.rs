//! Service keys.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies a registered service.
///
/// Keys are built from a type, sized or not, so trait objects work as keys:
///
/// ```rust
/// use keel_di::ServiceKey;
///
/// trait Clock: Send + Sync {}
///
/// let key = ServiceKey::of::<dyn Clock>();
/// assert!(key.name().contains("Clock"));
/// ```
#[derive(Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    /// Key for the type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Full type name, used in diagnostics and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }

    /// Underlying type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self.name)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Strip the module path from a type name.
///
/// Generic arguments are left untouched: `alloc::sync::Arc<my_app::Clock>`
/// becomes `Arc<my_app::Clock>`.
pub fn short_type_name(name: &'static str) -> &'static str {
    // Only the outermost path is trimmed for generic names.
    let head = match name.find('<') {
        Some(idx) => &name[..idx],
        None => name,
    };
    match head.rfind("::") {
        Some(idx) => &name[idx + 2..],
        None => name,
    }
}
