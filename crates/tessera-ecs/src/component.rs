//! Component type registration and lifecycle hooks.
//!
//! Every id that carries data has a [`TypeInfo`]: its layout plus a table of
//! lifecycle hooks resolved once at registration. Storage never inspects the
//! Rust type of a value; it only calls the hooks.

use std::{alloc::Layout, any::TypeId, cmp::Ordering, fmt, ptr};

use bitflags::bitflags;
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use crate::{
    error::{EcsError, EcsResult, HookKind},
    id::{Entity, Id, IdFlags},
};

/// Marker trait for types that can be used as components.
///
/// Components are moved bitwise between tables, so they must not hold
/// pointers into themselves.
pub trait Component: Send + Sync + 'static {}

// Blanket implementation for all suitable types
impl<T: Send + Sync + 'static> Component for T {}

/// Construct or destruct `count` consecutive values at `ptr`.
pub type XtorFn = unsafe fn(ptr: *mut u8, count: usize, info: &TypeInfo);
/// Copy `count` values from `src` to `dst`.
pub type CopyFn = unsafe fn(dst: *mut u8, src: *const u8, count: usize, info: &TypeInfo);
/// Move `count` values from `src` to `dst`, leaving `src` uninitialized.
pub type MoveFn = unsafe fn(dst: *mut u8, src: *mut u8, count: usize, info: &TypeInfo);
/// Three-way comparison of two values.
pub type CompareFn = unsafe fn(a: *const u8, b: *const u8, info: &TypeInfo) -> Ordering;
/// Equality of two values.
pub type EqualsFn = unsafe fn(a: *const u8, b: *const u8, info: &TypeInfo) -> bool;

/// Lifecycle hooks for a component type, set through the builder methods.
///
/// Missing hooks are resolved at registration: plain-old-data registered
/// through [`ComponentDesc::new`] falls back to zero-fill and bitwise copy,
/// while Rust types and types with a destructor get the hook flagged as
/// illegal so operations needing it fail up front.
#[derive(Clone, Copy, Default)]
pub struct TypeHooks {
    ctor: Option<XtorFn>,
    dtor: Option<XtorFn>,
    /// Copy-assign into initialized memory.
    copy: Option<CopyFn>,
    /// Move-assign into initialized memory.
    move_assign: Option<MoveFn>,
    /// Copy-construct into uninitialized memory.
    copy_ctor: Option<CopyFn>,
    /// Move-construct into uninitialized memory.
    move_ctor: Option<MoveFn>,
    cmp: Option<CompareFn>,
    equals: Option<EqualsFn>,
    /// Set by [`TypeHooks::of`]: values are Rust objects and must never be
    /// zero-filled or duplicated bitwise.
    typed: bool,
}

impl TypeHooks {
    /// Hooks for a Rust type: a destructor when `T` needs one, bitwise moves.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            dtor: if std::mem::needs_drop::<T>() {
                Some(drop_hook::<T>)
            } else {
                None
            },
            typed: true,
            ..Self::default()
        }
    }

    /// Enable default construction through [`Default`].
    #[must_use]
    pub fn with_default<T: Default + Component>(mut self) -> Self {
        self.ctor = Some(default_hook::<T>);
        self
    }

    /// Enable copies through [`Clone`].
    #[must_use]
    pub fn with_clone<T: Clone + Component>(mut self) -> Self {
        self.copy = Some(clone_from_hook::<T>);
        self.copy_ctor = Some(clone_hook::<T>);
        self
    }

    /// Enable equality through [`PartialEq`].
    #[must_use]
    pub fn with_eq<T: PartialEq + Component>(mut self) -> Self {
        self.equals = Some(eq_hook::<T>);
        self
    }

    /// Enable ordering through [`PartialOrd`]. Incomparable values order as
    /// equal.
    #[must_use]
    pub fn with_cmp<T: PartialOrd + Component>(mut self) -> Self {
        self.cmp = Some(cmp_hook::<T>);
        self
    }

    #[must_use]
    pub fn ctor(mut self, hook: XtorFn) -> Self {
        self.ctor = Some(hook);
        self
    }

    #[must_use]
    pub fn dtor(mut self, hook: XtorFn) -> Self {
        self.dtor = Some(hook);
        self
    }

    #[must_use]
    pub fn copy(mut self, hook: CopyFn) -> Self {
        self.copy = Some(hook);
        self
    }

    #[must_use]
    pub fn copy_ctor(mut self, hook: CopyFn) -> Self {
        self.copy_ctor = Some(hook);
        self
    }

    #[must_use]
    pub fn move_assign(mut self, hook: MoveFn) -> Self {
        self.move_assign = Some(hook);
        self
    }

    #[must_use]
    pub fn move_ctor(mut self, hook: MoveFn) -> Self {
        self.move_ctor = Some(hook);
        self
    }

    #[must_use]
    pub fn cmp(mut self, hook: CompareFn) -> Self {
        self.cmp = Some(hook);
        self
    }

    #[must_use]
    pub fn equals(mut self, hook: EqualsFn) -> Self {
        self.equals = Some(hook);
        self
    }

    /// Keep hooks already present, fill the rest from `other`.
    fn merge(mut self, other: Self) -> Self {
        self.ctor = self.ctor.or(other.ctor);
        self.dtor = self.dtor.or(other.dtor);
        self.copy = self.copy.or(other.copy);
        self.move_assign = self.move_assign.or(other.move_assign);
        self.copy_ctor = self.copy_ctor.or(other.copy_ctor);
        self.move_ctor = self.move_ctor.or(other.move_ctor);
        self.cmp = self.cmp.or(other.cmp);
        self.equals = self.equals.or(other.equals);
        self.typed |= other.typed;
        self
    }

    /// Fill legal defaults and compute which hooks are unavailable.
    fn resolve(mut self, size: usize) -> (Self, TypeFlags) {
        let mut flags = TypeFlags::empty();
        if size == 0 {
            return (Self::default(), TypeFlags::TAG);
        }
        let pod = !self.typed && self.dtor.is_none();
        if self.dtor.is_some() {
            flags |= TypeFlags::HAS_DTOR;
        }

        if self.ctor.is_none() {
            if pod {
                self.ctor = Some(zero_hook);
            } else {
                flags |= TypeFlags::ILLEGAL_CTOR;
            }
        }
        if self.copy_ctor.is_none() && self.copy.is_none() {
            if pod {
                self.copy = Some(memcpy_hook);
                self.copy_ctor = Some(memcpy_hook);
            } else {
                flags |= TypeFlags::ILLEGAL_COPY | TypeFlags::ILLEGAL_COPY_CTOR;
            }
        } else if self.copy_ctor.is_none() && flags.contains(TypeFlags::ILLEGAL_CTOR) {
            // copy-construct falls back to ctor + copy-assign
            flags |= TypeFlags::ILLEGAL_COPY_CTOR;
        }
        if self.cmp.is_none() {
            flags |= TypeFlags::ILLEGAL_CMP;
        }
        if self.equals.is_none() && self.cmp.is_none() {
            flags |= TypeFlags::ILLEGAL_EQUALS;
        }
        (self, flags)
    }
}

impl fmt::Debug for TypeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHooks")
            .field("ctor", &self.ctor.is_some())
            .field("dtor", &self.dtor.is_some())
            .field("copy", &self.copy.is_some())
            .field("copy_ctor", &self.copy_ctor.is_some())
            .field("move_ctor", &self.move_ctor.is_some())
            .field("cmp", &self.cmp.is_some())
            .field("equals", &self.equals.is_some())
            .finish()
    }
}

unsafe fn zero_hook(ptr: *mut u8, count: usize, info: &TypeInfo) {
    unsafe { ptr::write_bytes(ptr, 0, count * info.size()) };
}

unsafe fn memcpy_hook(dst: *mut u8, src: *const u8, count: usize, info: &TypeInfo) {
    unsafe { ptr::copy_nonoverlapping(src, dst, count * info.size()) };
}

unsafe fn default_hook<T: Default>(ptr: *mut u8, count: usize, _: &TypeInfo) {
    let ptr = ptr.cast::<T>();
    for i in 0..count {
        unsafe { ptr.add(i).write(T::default()) };
    }
}

unsafe fn drop_hook<T>(ptr: *mut u8, count: usize, _: &TypeInfo) {
    unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.cast::<T>(), count)) };
}

unsafe fn clone_hook<T: Clone>(dst: *mut u8, src: *const u8, count: usize, _: &TypeInfo) {
    let (dst, src) = (dst.cast::<T>(), src.cast::<T>());
    for i in 0..count {
        unsafe { dst.add(i).write((*src.add(i)).clone()) };
    }
}

unsafe fn clone_from_hook<T: Clone>(dst: *mut u8, src: *const u8, count: usize, _: &TypeInfo) {
    let (dst, src) = (dst.cast::<T>(), src.cast::<T>());
    for i in 0..count {
        unsafe { (*dst.add(i)).clone_from(&*src.add(i)) };
    }
}

unsafe fn eq_hook<T: PartialEq>(a: *const u8, b: *const u8, _: &TypeInfo) -> bool {
    unsafe { *a.cast::<T>() == *b.cast::<T>() }
}

unsafe fn cmp_hook<T: PartialOrd>(a: *const u8, b: *const u8, _: &TypeInfo) -> Ordering {
    unsafe {
        (*a.cast::<T>())
            .partial_cmp(&*b.cast::<T>())
            .unwrap_or(Ordering::Equal)
    }
}

bitflags! {
    /// Capabilities of a registered type, computed from its hooks.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TypeFlags: u32 {
        /// Zero-sized: present in table types but without a column.
        const TAG = 1 << 0;
        const HAS_DTOR = 1 << 1;
        const ILLEGAL_CTOR = 1 << 2;
        const ILLEGAL_COPY = 1 << 3;
        const ILLEGAL_COPY_CTOR = 1 << 4;
        const ILLEGAL_CMP = 1 << 5;
        const ILLEGAL_EQUALS = 1 << 6;
    }
}

/// Describes a component for registration.
#[derive(Clone, Copy, Debug)]
pub struct ComponentDesc {
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    pub hooks: TypeHooks,
}

impl ComponentDesc {
    /// An untyped component of raw bytes.
    #[must_use]
    pub fn new(name: &'static str, size: usize, align: usize) -> Self {
        Self {
            name,
            size,
            align,
            hooks: TypeHooks::default(),
        }
    }

    /// A zero-sized tag.
    #[must_use]
    pub fn tag(name: &'static str) -> Self {
        Self::new(name, 0, 1)
    }

    /// The layout and drop hook of a Rust type.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            hooks: TypeHooks::of::<T>(),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: TypeHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Runtime information about a component type.
#[derive(Clone)]
pub struct TypeInfo {
    /// Id this type was registered for.
    id: Id,
    /// Type name for debugging.
    name: &'static str,
    layout: Layout,
    hooks: TypeHooks,
    flags: TypeFlags,
    /// Rust type, for typed access checks.
    type_id: Option<TypeId>,
}

impl TypeInfo {
    fn new(id: Id, desc: ComponentDesc, type_id: Option<TypeId>) -> EcsResult<Self> {
        let layout = Layout::from_size_align(desc.size, desc.align.max(1)).map_err(|_| {
            EcsError::InvalidComponent {
                id,
                reason: "alignment must be a power of two",
            }
        })?;
        if desc.size % layout.align() != 0 {
            return Err(EcsError::InvalidComponent {
                id,
                reason: "size must be a multiple of alignment",
            });
        }
        let (hooks, flags) = desc.hooks.resolve(desc.size);
        Ok(Self {
            id,
            name: desc.name,
            layout,
            hooks,
            flags,
            type_id,
        })
    }

    /// Type info for a Rust type, outside of any registry.
    #[must_use]
    pub fn of<T: Component>(id: Id) -> Self {
        let (hooks, flags) = TypeHooks::of::<T>().resolve(std::mem::size_of::<T>());
        Self {
            id,
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            hooks,
            flags,
            type_id: Some(TypeId::of::<T>()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    #[must_use]
    pub const fn flags(&self) -> TypeFlags {
        self.flags
    }

    #[must_use]
    pub const fn hooks(&self) -> &TypeHooks {
        &self.hooks
    }

    #[must_use]
    pub const fn is_tag(&self) -> bool {
        self.flags.contains(TypeFlags::TAG)
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }

    #[must_use]
    pub const fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Fail with [`EcsError::MissingHook`] if `hook` is unavailable.
    pub fn require(&self, hook: HookKind) -> EcsResult<()> {
        let illegal = match hook {
            HookKind::Construct => TypeFlags::ILLEGAL_CTOR,
            HookKind::Copy => TypeFlags::ILLEGAL_COPY,
            HookKind::CopyConstruct => TypeFlags::ILLEGAL_COPY_CTOR,
            HookKind::Compare => TypeFlags::ILLEGAL_CMP,
            HookKind::Equals => TypeFlags::ILLEGAL_EQUALS,
            HookKind::Destruct | HookKind::Move | HookKind::MoveConstruct => TypeFlags::empty(),
        };
        if self.flags.intersects(illegal) {
            Err(EcsError::MissingHook { id: self.id, hook })
        } else {
            Ok(())
        }
    }

    /// Default-construct `count` values.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `count` values of this type.
    ///
    /// # Panics
    ///
    /// Panics if the type has no constructor; check with [`TypeInfo::require`].
    pub unsafe fn construct(&self, ptr: *mut u8, count: usize) {
        let Some(ctor) = self.hooks.ctor else {
            panic!("{} has no ctor hook", self.name);
        };
        unsafe { ctor(ptr, count, self) };
    }

    /// Destroy `count` values.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `count` initialized values. They must not be used
    /// afterwards.
    pub unsafe fn destruct(&self, ptr: *mut u8, count: usize) {
        if let Some(dtor) = self.hooks.dtor {
            unsafe { dtor(ptr, count, self) };
        }
    }

    /// Copy-construct `count` values into uninitialized memory.
    ///
    /// # Safety
    ///
    /// `src` must hold `count` initialized values, `dst` must be valid for
    /// writes and not overlap `src`.
    ///
    /// # Panics
    ///
    /// Panics if the type cannot be copied; check with [`TypeInfo::require`].
    pub unsafe fn copy_construct(&self, dst: *mut u8, src: *const u8, count: usize) {
        if let Some(copy_ctor) = self.hooks.copy_ctor {
            unsafe { copy_ctor(dst, src, count, self) };
        } else if let (Some(ctor), Some(copy)) = (self.hooks.ctor, self.hooks.copy) {
            unsafe {
                ctor(dst, count, self);
                copy(dst, src, count, self);
            }
        } else {
            panic!("{} has no copy_ctor hook", self.name);
        }
    }

    /// Copy-assign `count` values over initialized memory.
    ///
    /// # Safety
    ///
    /// Both ranges must hold `count` initialized values and not overlap.
    ///
    /// # Panics
    ///
    /// Panics if the type cannot be copied; check with [`TypeInfo::require`].
    pub unsafe fn copy_assign(&self, dst: *mut u8, src: *const u8, count: usize) {
        if let Some(copy) = self.hooks.copy {
            unsafe { copy(dst, src, count, self) };
        } else if let Some(copy_ctor) = self.hooks.copy_ctor {
            unsafe {
                self.destruct(dst, count);
                copy_ctor(dst, src, count, self);
            }
        } else {
            panic!("{} has no copy hook", self.name);
        }
    }

    /// Move-construct `count` values, leaving `src` uninitialized.
    ///
    /// # Safety
    ///
    /// `src` must hold `count` initialized values, `dst` must be valid for
    /// writes and not overlap `src`.
    pub unsafe fn move_construct(&self, dst: *mut u8, src: *mut u8, count: usize) {
        if let Some(move_ctor) = self.hooks.move_ctor {
            unsafe { move_ctor(dst, src, count, self) };
        } else {
            unsafe { ptr::copy_nonoverlapping(src, dst, count * self.size()) };
        }
    }

    /// Move-assign `count` values over initialized memory, leaving `src`
    /// uninitialized.
    ///
    /// # Safety
    ///
    /// Both ranges must hold `count` initialized values and not overlap.
    pub unsafe fn move_assign(&self, dst: *mut u8, src: *mut u8, count: usize) {
        if let Some(move_assign) = self.hooks.move_assign {
            unsafe { move_assign(dst, src, count, self) };
        } else {
            unsafe {
                self.destruct(dst, count);
                self.move_construct(dst, src, count);
            }
        }
    }

    /// Compare two values.
    ///
    /// # Safety
    ///
    /// Both pointers must point to initialized values of this type.
    ///
    /// # Panics
    ///
    /// Panics if the type has no compare hook.
    pub unsafe fn compare(&self, a: *const u8, b: *const u8) -> Ordering {
        let Some(cmp) = self.hooks.cmp else {
            panic!("{} has no cmp hook", self.name);
        };
        unsafe { cmp(a, b, self) }
    }

    /// Test two values for equality, through `equals` or `cmp`.
    ///
    /// # Safety
    ///
    /// Both pointers must point to initialized values of this type.
    ///
    /// # Panics
    ///
    /// Panics if the type has neither an equals nor a compare hook.
    pub unsafe fn equals(&self, a: *const u8, b: *const u8) -> bool {
        if let Some(equals) = self.hooks.equals {
            unsafe { equals(a, b, self) }
        } else if let Some(cmp) = self.hooks.cmp {
            unsafe { cmp(a, b, self) == Ordering::Equal }
        } else {
            panic!("{} has no equals hook", self.name);
        }
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Registry for component types.
///
/// Maps ids to their [`TypeInfo`] and Rust types to the entity that
/// represents them.
#[derive(Default)]
pub struct TypeRegistry {
    infos: HashMap<Id, TypeInfo, FxBuildHasher>,
    by_type: HashMap<TypeId, Entity, FxBuildHasher>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register type info for `id`.
    ///
    /// Registering the same layout again is a no-op that merges any hooks the
    /// first registration lacked. A different layout is rejected.
    pub fn register(&mut self, id: Id, desc: ComponentDesc) -> EcsResult<&TypeInfo> {
        self.register_inner(id, desc, None)
    }

    /// Register a Rust type for `entity`.
    pub fn register_typed<T: Component>(
        &mut self,
        entity: Entity,
        hooks: TypeHooks,
    ) -> EcsResult<&TypeInfo> {
        let desc = ComponentDesc::of::<T>().with_hooks(TypeHooks::of::<T>().merge(hooks));
        self.by_type.insert(TypeId::of::<T>(), entity);
        self.register_inner(entity.id(), desc, Some(TypeId::of::<T>()))
    }

    /// Register `entity` with the layout and hooks of an existing info, such
    /// as one carried by a deferred value.
    pub(crate) fn register_info(&mut self, entity: Entity, info: &TypeInfo) -> EcsResult<&TypeInfo> {
        let desc = ComponentDesc {
            name: info.name,
            size: info.size(),
            align: info.align(),
            hooks: info.hooks,
        };
        if let Some(type_id) = info.type_id {
            self.by_type.insert(type_id, entity);
        }
        self.register_inner(entity.id(), desc, info.type_id)
    }

    fn register_inner(
        &mut self,
        id: Id,
        desc: ComponentDesc,
        type_id: Option<TypeId>,
    ) -> EcsResult<&TypeInfo> {
        let id = id.strip_generation();
        if id.is_wildcard() || id.flags().intersects(IdFlags::TOGGLE | IdFlags::AUTO_OVERRIDE) {
            return Err(EcsError::InvalidComponent {
                id,
                reason: "only plain ids and pairs can carry a type",
            });
        }

        if let Some(existing) = self.infos.get(&id) {
            if existing.size() != desc.size || existing.align() != desc.align.max(1) {
                return Err(EcsError::InvalidComponent {
                    id,
                    reason: "already registered with a different layout",
                });
            }
            if existing.type_id.is_some() && type_id.is_some() && existing.type_id != type_id {
                return Err(EcsError::InvalidComponent {
                    id,
                    reason: "already registered for a different type",
                });
            }
            let merged = desc.hooks.merge(existing.hooks);
            let mut info = TypeInfo::new(id, ComponentDesc { hooks: merged, ..desc }, type_id)?;
            info.type_id = info.type_id.or(existing.type_id);
            info.name = existing.name;
            self.infos.insert(id, info);
        } else {
            let info = TypeInfo::new(id, desc, type_id)?;
            debug!(?id, name = info.name, size = info.size(), "registered component");
            self.infos.insert(id, info);
        }
        Ok(&self.infos[&id])
    }

    /// Remove the registration of `id`, if any.
    pub fn unregister(&mut self, id: Id) -> Option<TypeInfo> {
        let info = self.infos.remove(&id.strip_generation())?;
        if let Some(type_id) = info.type_id {
            self.by_type.remove(&type_id);
        }
        Some(info)
    }

    /// Type info registered directly for `id`.
    #[must_use]
    pub fn get(&self, id: Id) -> Option<&TypeInfo> {
        self.infos.get(&id.strip_generation())
    }

    /// Type info of the data stored for `id` in a table, or `None` if the id
    /// is stored without a column.
    ///
    /// A pair takes the type of its relationship if that carries data,
    /// otherwise the type of its target.
    #[must_use]
    pub fn for_id(&self, id: Id) -> Option<&TypeInfo> {
        if id.flags().intersects(IdFlags::TOGGLE | IdFlags::AUTO_OVERRIDE) {
            return None;
        }
        let data = |id: Id| self.get(id).filter(|info| !info.is_tag());
        if id.is_pair() {
            data(id)
                .or_else(|| data(id.first().id()))
                .or_else(|| data(id.second().id()))
        } else {
            data(id)
        }
    }

    /// Entity registered for a Rust type.
    #[must_use]
    pub fn entity_of<T: 'static>(&self) -> Option<Entity> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Entity registered for a Rust type, by its `TypeId`.
    #[must_use]
    pub fn entity_of_type_id(&self, type_id: TypeId) -> Option<Entity> {
        self.by_type.get(&type_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.infos.values()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("count", &self.len())
            .finish()
    }
}
