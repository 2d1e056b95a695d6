use std::any::{type_name, Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use retinue_core::ComponentIndex;
use tracing::warn;

/// Marker trait for types that can be stored as components.
pub trait Component: Any {}

/// Blanket implementation: any `'static` type is a valid component.
impl<T: Any> Component for T {}

/// Shared handle to one component instance.
///
/// Clones refer to the same instance; equality is identity, never value.
#[derive(Clone)]
pub struct ComponentRef {
    cell: Rc<RefCell<dyn Any>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ComponentRef {
    pub fn new<T: Component>(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Whether the instance is a `T`.
    pub fn is<T: Component>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Concrete type name of the instance
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the value as a `T`. `None` if it is another type.
    ///
    /// # Panics
    /// If the instance is currently mutably borrowed.
    pub fn borrow<T: Component>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.cell.borrow(), |value| value.downcast_ref::<T>()).ok()
    }

    /// Mutably borrow the value as a `T`. `None` if it is another type.
    ///
    /// # Panics
    /// If the instance is currently borrowed.
    pub fn borrow_mut<T: Component>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.cell.borrow_mut(), |value| value.downcast_mut::<T>()).ok()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ComponentRef {}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentRef({})", self.type_name)
    }
}

/// Per-index stacks of recycled component instances.
///
/// Removed and replaced components are pushed here by their entity; typed
/// creation pops from here before constructing anything new.
pub struct ComponentPools {
    stacks: Box<[RefCell<Vec<ComponentRef>>]>,
}

impl ComponentPools {
    pub fn new(total_components: usize) -> Self {
        Self {
            stacks: (0..total_components).map(|_| RefCell::new(Vec::new())).collect(),
        }
    }

    /// Number of per-index stacks
    pub fn total_components(&self) -> usize {
        self.stacks.len()
    }

    /// Return an instance to the stack for `index`. Out-of-range indices drop it.
    pub fn push(&self, index: ComponentIndex, component: ComponentRef) {
        if let Some(stack) = self.stacks.get(index) {
            stack.borrow_mut().push(component);
        }
    }

    pub fn pop(&self, index: ComponentIndex) -> Option<ComponentRef> {
        self.stacks.get(index)?.borrow_mut().pop()
    }

    /// Pop a pooled `T` for `index` reset to its default value, or construct
    /// one if the stack is empty.
    pub fn acquire<T: Component + Default>(&self, index: ComponentIndex) -> ComponentRef {
        while let Some(component) = self.pop(index) {
            let reset = match component.borrow_mut::<T>() {
                Some(mut value) => {
                    *value = T::default();
                    true
                }
                None => false,
            };
            if reset {
                return component;
            }
            warn!(
                "Discarding pooled {} at index {} while acquiring {}",
                component.type_name(),
                index,
                type_name::<T>()
            );
        }
        ComponentRef::new(T::default())
    }

    /// Number of pooled instances at `index`
    pub fn len(&self, index: ComponentIndex) -> usize {
        self.stacks.get(index).map_or(0, |stack| stack.borrow().len())
    }

    pub fn is_empty(&self, index: ComponentIndex) -> bool {
        self.len(index) == 0
    }

    /// Drop every pooled instance at `index`.
    pub fn clear(&self, index: ComponentIndex) {
        if let Some(stack) = self.stacks.get(index) {
            stack.borrow_mut().clear();
        }
    }

    pub fn clear_all(&self) {
        for stack in self.stacks.iter() {
            stack.borrow_mut().clear();
        }
    }
}

impl fmt::Debug for ComponentPools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: Vec<usize> = self.stacks.iter().map(|s| s.borrow().len()).collect();
        f.debug_struct("ComponentPools").field("sizes", &sizes).finish()
    }
}
