//! Registry of live instances that must be torn down together.
//!
//! A [`ResourceManager`] owns a strong reference to every instance it
//! created through [`ResourceManager::bind`]. Shutting the manager down
//! shuts every registered instance down exactly once; an instance that
//! shuts itself down first calls [`ResourceManager::detach`] so the
//! manager releases it.

use std::sync::Arc;

use parking_lot::Mutex;

/// Something that can be torn down by its owning [`ResourceManager`].
pub trait Resource: Send + Sync {
    /// Tear the instance down. Must be idempotent.
    fn shutdown(&self);
}

/// Tracks bound instances and gates creation against shutdown.
#[derive(Default)]
pub struct ResourceManager {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    is_shutting_down: bool,
    resources: Vec<Arc<dyn Resource>>,
}

impl ResourceManager {
    /// Create an empty manager.
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Construct an instance with `create` and register it.
    ///
    /// Returns `None` without invoking `create` once shutdown has begun, or
    /// if `create` itself fails. An instance whose creation raced with
    /// shutdown is shut down before `None` is returned.
    pub fn bind<T, F>(&self, create: F) -> Option<Arc<T>>
    where
        T: Resource + 'static,
        F: FnOnce() -> Option<Arc<T>>,
    {
        if self.inner.lock().is_shutting_down {
            return None;
        }

        // create runs unlocked: it may call back into this manager
        let item = create()?;

        let mut inner = self.inner.lock();
        if inner.is_shutting_down {
            drop(inner);
            item.shutdown();
            return None;
        }

        inner.resources.push(item.clone());
        Some(item)
    }

    /// Release a registered instance without shutting it down.
    ///
    /// Returns false if the instance was not registered.
    pub fn detach(&self, resource: &dyn Resource) -> bool {
        let target = resource as *const dyn Resource as *const u8;
        let mut inner = self.inner.lock();
        let before = inner.resources.len();
        inner
            .resources
            .retain(|r| Arc::as_ptr(r) as *const u8 != target);
        inner.resources.len() != before
    }

    /// Shut down every registered instance and refuse further binds.
    pub fn shutdown(&self) {
        let resources = {
            let mut inner = self.inner.lock();
            inner.is_shutting_down = true;
            std::mem::take(&mut inner.resources)
        };

        for resource in resources {
            resource.shutdown();
        }
    }

    /// Check if shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().is_shutting_down
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.inner.lock().resources.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResourceManager")
            .field("is_shutting_down", &inner.is_shutting_down)
            .field("resources", &inner.resources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    #[derive(Default)]
    struct Counted {
        shutdowns: AtomicUsize,
    }

    impl Resource for Counted {
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    // Detaches itself from its manager on shutdown, the way channels do.
    struct SelfDetaching {
        manager: Weak<ResourceManager>,
        shutdowns: AtomicUsize,
    }

    impl Resource for SelfDetaching {
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if let Some(manager) = self.manager.upgrade() {
                manager.detach(self);
            }
        }
    }

    #[test]
    fn test_bind_registers_instance() {
        let manager = ResourceManager::create();
        let item = manager.bind(|| Some(Arc::new(Counted::default())));
        assert!(item.is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_bind_failed_factory_registers_nothing() {
        let manager = ResourceManager::create();
        let item = manager.bind::<Counted, _>(|| None);
        assert!(item.is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_bind_after_shutdown_never_creates() {
        let manager = ResourceManager::create();
        manager.shutdown();
        assert!(manager.is_shutting_down());

        let mut invoked = false;
        let item = manager.bind(|| {
            invoked = true;
            Some(Arc::new(Counted::default()))
        });
        assert!(item.is_none());
        assert!(!invoked);
    }

    #[test]
    fn test_shutdown_tears_down_each_instance_once() {
        let manager = ResourceManager::create();
        let items: Vec<_> = (0..3)
            .map(|_| manager.bind(|| Some(Arc::new(Counted::default()))).unwrap())
            .collect();

        manager.shutdown();
        manager.shutdown();

        for item in &items {
            assert_eq!(item.shutdowns.load(Ordering::SeqCst), 1);
        }
        assert!(manager.is_empty());
    }

    #[test]
    fn test_detach_releases_without_shutdown() {
        let manager = ResourceManager::create();
        let a = manager.bind(|| Some(Arc::new(Counted::default()))).unwrap();
        let b = manager.bind(|| Some(Arc::new(Counted::default()))).unwrap();

        assert!(manager.detach(a.as_ref()));
        assert!(!manager.detach(a.as_ref()));
        assert_eq!(manager.len(), 1);

        manager.shutdown();
        assert_eq!(a.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(b.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_detaching_instance_during_shutdown() {
        let manager = ResourceManager::create();
        let weak = Arc::downgrade(&manager);
        let item = manager
            .bind(|| {
                Some(Arc::new(SelfDetaching {
                    manager: weak.clone(),
                    shutdowns: AtomicUsize::new(0),
                }))
            })
            .unwrap();

        manager.shutdown();
        assert_eq!(item.shutdowns.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }
}
