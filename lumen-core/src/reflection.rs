//! Handles to externally-defined callables.
//!
//! A handle carries only the identity of the callable: who owns it, its
//! name, and its raw signature string. The full descriptor (parameter and
//! return types) is expensive to obtain, so it is computed through a
//! pluggable backend on first use and cached on the handle for the rest of
//! its lifetime. Handles without a backend still work as call targets; only
//! descriptor queries fail.

use std::{fmt, sync::Arc};

use lumen_error::error::ReflectionError;
use lumen_types::Ident;
use once_cell::sync::OnceCell;

/// Produces full descriptors for callables on demand.
pub trait ReflectionBackend: Send + Sync {
    fn describe(
        &self,
        owner: &Ident,
        name: &Ident,
        signature: &str,
    ) -> Result<Descriptor, ReflectionError>;
}

/// The reflected shape of a callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub parameters: Vec<String>,
    pub return_type: String,
}

struct HandleInner {
    owner: Ident,
    name: Ident,
    signature: String,
    backend: Option<Arc<dyn ReflectionBackend>>,
    descriptor: OnceCell<Descriptor>,
}

/// A cheaply cloneable reference to an external callable. Equality is by
/// identity (owner, name, signature); the cached descriptor and the backend
/// do not participate.
#[derive(Clone)]
pub struct CallableHandle {
    inner: Arc<HandleInner>,
}

impl CallableHandle {
    pub fn new(owner: Ident, name: Ident, signature: impl Into<String>) -> CallableHandle {
        CallableHandle {
            inner: Arc::new(HandleInner {
                owner,
                name,
                signature: signature.into(),
                backend: None,
                descriptor: OnceCell::new(),
            }),
        }
    }

    pub fn with_backend(
        owner: Ident,
        name: Ident,
        signature: impl Into<String>,
        backend: Arc<dyn ReflectionBackend>,
    ) -> CallableHandle {
        CallableHandle {
            inner: Arc::new(HandleInner {
                owner,
                name,
                signature: signature.into(),
                backend: Some(backend),
                descriptor: OnceCell::new(),
            }),
        }
    }

    pub fn owner(&self) -> &Ident {
        &self.inner.owner
    }

    pub fn name(&self) -> &Ident {
        &self.inner.name
    }

    pub fn signature(&self) -> &str {
        &self.inner.signature
    }

    /// The cached descriptor, computing it through the backend on first use.
    /// A successful computation is cached for the handle's lifetime; a
    /// failed one is not, so a later query may retry the backend.
    fn reflected(&self) -> Result<&Descriptor, ReflectionError> {
        self.inner.descriptor.get_or_try_init(|| {
            let backend =
                self.inner
                    .backend
                    .as_deref()
                    .ok_or_else(|| ReflectionError::BackendUnavailable {
                        owner: self.inner.owner.clone(),
                        name: self.inner.name.clone(),
                    })?;
            backend.describe(&self.inner.owner, &self.inner.name, &self.inner.signature)
        })
    }

    pub fn parameters(&self) -> Result<&[String], ReflectionError> {
        Ok(&self.reflected()?.parameters)
    }

    pub fn return_type(&self) -> Result<&str, ReflectionError> {
        Ok(&self.reflected()?.return_type)
    }
}

impl PartialEq for CallableHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.owner == other.inner.owner
            && self.inner.name == other.inner.name
            && self.inner.signature == other.inner.signature
    }
}

impl Eq for CallableHandle {}

impl fmt::Debug for CallableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableHandle")
            .field("owner", &self.inner.owner)
            .field("name", &self.inner.name)
            .field("signature", &self.inner.signature)
            .finish()
    }
}

impl fmt::Display for CallableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.inner.owner, self.inner.name)
    }
}
