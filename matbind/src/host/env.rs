//! Host environment: object heap, class dispatch, module cache, async work
//!
//! Native state lives in host objects created by [`Env::wrap`]. When the
//! host drops its last reference ([`Env::unreference`]) the object becomes
//! garbage; [`Env::collect`] then runs the object's finalizer against the
//! native state and only afterwards frees the slot. A finalizer runs at most
//! once per object: it is taken out of the object before it is called.

use std::any::{Any, TypeId};

use hashbrown::HashMap;
use thiserror::Error;

use super::exception::Exception;
use super::value::Value;
use crate::worker::{TaskId, WorkOutput, WorkerPool};

/// Generation-checked reference to a host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

/// Handle to a class defined in an [`Env`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(usize);

pub type ConstructorFn = fn(&mut Env, ClassId, &[Value]) -> Result<ObjectRef, Exception>;
pub type MethodFn = fn(&mut Env, ObjectRef, &[Value]) -> Result<Value, Exception>;
pub type GetterFn = fn(&Env, ObjectRef) -> Result<Value, Exception>;
/// Called with the native state of an unreachable object, before it is freed
pub type Finalizer = fn(&mut (dyn Any + Send));
/// Runs on the host thread once a worker job's output arrives
pub type CompleteFn = Box<dyn FnOnce(&mut Env, WorkOutput) -> Result<Value, Exception>>;

/// A constructor together with its prototype surface
#[derive(Clone)]
pub struct ClassDef {
    pub name: String,
    pub constructor: ConstructorFn,
    pub methods: Vec<(&'static str, MethodFn)>,
    pub getters: Vec<(&'static str, GetterFn)>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, constructor: ConstructorFn) -> Self {
        Self {
            name: name.into(),
            constructor,
            methods: Vec::new(),
            getters: Vec::new(),
        }
    }

    pub fn method(mut self, name: &'static str, func: MethodFn) -> Self {
        self.methods.push((name, func));
        self
    }

    pub fn getter(mut self, name: &'static str, func: GetterFn) -> Self {
        self.getters.push((name, func));
        self
    }

    /// First member name declared twice across methods and getters
    pub fn duplicate_member(&self) -> Option<&'static str> {
        let mut seen = hashbrown::HashSet::new();
        self.methods
            .iter()
            .map(|(name, _)| *name)
            .chain(self.getters.iter().map(|(name, _)| *name))
            .find(|name| !seen.insert(*name))
    }
}

impl std::fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("methods", &self.methods.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("getters", &self.getters.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

/// Entry in a module namespace
#[derive(Debug, Clone, PartialEq)]
pub enum Export {
    Class(ClassId),
    Value(Value),
}

/// A module namespace object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exports {
    entries: HashMap<String, Export>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Insert an entry, returning any entry it replaced
    pub fn insert(&mut self, name: impl Into<String>, export: Export) -> Option<Export> {
        self.entries.insert(name.into(), export)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rejections from the host API itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("class `{0}` is already defined in this environment")]
    DuplicateClass(String),
    #[error("class `{class}` declares `{member}` more than once")]
    DuplicateMember { class: String, member: &'static str },
}

/// Result of a finished worker job, delivered on the host thread
#[derive(Debug)]
pub struct Completion {
    pub task: TaskId,
    pub result: Result<Value, Exception>,
}

struct HostObject {
    class: ClassId,
    native: Box<dyn Any + Send>,
    finalizer: Option<Finalizer>,
    reachable: bool,
}

struct Slot {
    generation: u32,
    object: Option<HostObject>,
}

/// A single host execution context
pub struct Env {
    classes: Vec<ClassDef>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    modules: HashMap<String, Exports>,
    instance_data: HashMap<TypeId, Box<dyn Any + Send>>,
    workers: WorkerPool,
    pending: HashMap<TaskId, CompleteFn>,
    ready: Vec<Completion>,
    finalized: usize,
}

impl Env {
    pub fn new() -> Self {
        Self::with_worker_threads(0)
    }

    /// Environment whose worker pool uses `threads` threads (0: rayon default)
    pub fn with_worker_threads(threads: usize) -> Self {
        Self {
            classes: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            modules: HashMap::new(),
            instance_data: HashMap::new(),
            workers: WorkerPool::new(threads),
            pending: HashMap::new(),
            ready: Vec::new(),
            finalized: 0,
        }
    }

    /// Load a native module, running `init` only on the first load
    ///
    /// Later loads of the same name return the cached namespace. A failed
    /// init leaves nothing cached, so the module stays unloaded.
    pub fn load_module<E, F>(&mut self, name: &str, init: F) -> Result<Exports, E>
    where
        F: FnOnce(&mut Env, Exports) -> Result<Exports, E>,
    {
        if let Some(exports) = self.modules.get(name) {
            return Ok(exports.clone());
        }
        let exports = init(self, Exports::new())?;
        self.modules.insert(name.to_string(), exports.clone());
        Ok(exports)
    }

    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Register a class; fails without side effects on a rejected definition
    pub fn define_class(&mut self, def: ClassDef) -> Result<ClassId, HostError> {
        if self.classes.iter().any(|class| class.name == def.name) {
            return Err(HostError::DuplicateClass(def.name));
        }
        if let Some(member) = def.duplicate_member() {
            return Err(HostError::DuplicateMember {
                class: def.name,
                member,
            });
        }
        self.classes.push(def);
        Ok(ClassId(self.classes.len() - 1))
    }

    pub fn class_name(&self, class: ClassId) -> &str {
        &self.classes[class.0].name
    }

    /// Per-environment native state, one value per type
    pub fn set_instance_data<T: Any + Send>(&mut self, data: T) {
        self.instance_data.insert(TypeId::of::<T>(), Box::new(data));
    }

    pub fn instance_data<T: Any + Send>(&self) -> Option<&T> {
        self.instance_data
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T>())
    }

    /// Create a host object of `class` owning `native`
    pub fn wrap<T: Any + Send>(
        &mut self,
        class: ClassId,
        native: T,
        finalizer: Option<Finalizer>,
    ) -> ObjectRef {
        let object = HostObject {
            class,
            native: Box::new(native),
            finalizer,
            reachable: true,
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                ObjectRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                });
                ObjectRef {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn object(&self, obj: ObjectRef) -> Result<&HostObject, Exception> {
        self.slots
            .get(obj.index as usize)
            .filter(|slot| slot.generation == obj.generation)
            .and_then(|slot| slot.object.as_ref())
            .ok_or_else(collected)
    }

    fn object_mut(&mut self, obj: ObjectRef) -> Result<&mut HostObject, Exception> {
        self.slots
            .get_mut(obj.index as usize)
            .filter(|slot| slot.generation == obj.generation)
            .and_then(|slot| slot.object.as_mut())
            .ok_or_else(collected)
    }

    pub fn is_alive(&self, obj: ObjectRef) -> bool {
        self.object(obj).is_ok()
    }

    pub fn class_of(&self, obj: ObjectRef) -> Result<ClassId, Exception> {
        Ok(self.object(obj)?.class)
    }

    /// Borrow the native state of `obj`
    pub fn unwrap<T: Any>(&self, obj: ObjectRef) -> Result<&T, Exception> {
        self.object(obj)?
            .native
            .downcast_ref::<T>()
            .ok_or_else(wrong_type)
    }

    pub fn unwrap_mut<T: Any>(&mut self, obj: ObjectRef) -> Result<&mut T, Exception> {
        self.object_mut(obj)?
            .native
            .downcast_mut::<T>()
            .ok_or_else(wrong_type)
    }

    /// The host dropped its last reference to `obj`
    pub fn unreference(&mut self, obj: ObjectRef) {
        if let Ok(object) = self.object_mut(obj) {
            object.reachable = false;
        }
    }

    /// Finalize and free every unreachable object; returns how many
    pub fn collect(&mut self) -> usize {
        let mut collected = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let unreachable = slot.object.as_ref().is_some_and(|object| !object.reachable);
            if !unreachable {
                continue;
            }
            if let Some(mut object) = slot.object.take() {
                // native cleanup first, generic deallocation second
                if let Some(finalize) = object.finalizer.take() {
                    finalize(&mut *object.native);
                    self.finalized += 1;
                }
                drop(object);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                collected += 1;
            }
        }
        if collected > 0 {
            tracing::debug!(collected, "collected host objects");
        }
        collected
    }

    /// Finalizers run so far
    pub fn finalized_count(&self) -> usize {
        self.finalized
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|slot| slot.object.is_some()).count()
    }

    /// `new <name>(...args)` against a module namespace
    pub fn construct(
        &mut self,
        exports: &Exports,
        name: &str,
        args: &[Value],
    ) -> Result<ObjectRef, Exception> {
        let class = match exports.get(name) {
            Some(Export::Class(class)) => *class,
            _ => {
                return Err(Exception::type_error(
                    "ERR_NOT_A_CONSTRUCTOR",
                    format!("{name} is not a constructor"),
                ))
            }
        };
        let constructor = self.classes[class.0].constructor;
        constructor(self, class, args)
    }

    /// `obj.<name>(...args)`
    pub fn call_method(
        &mut self,
        obj: ObjectRef,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Exception> {
        let class = self.class_of(obj)?;
        let method = self.classes[class.0]
            .methods
            .iter()
            .find(|(method, _)| *method == name)
            .map(|(_, func)| *func)
            .ok_or_else(|| {
                Exception::type_error(
                    "ERR_NOT_A_FUNCTION",
                    format!("{}.{name} is not a function", self.classes[class.0].name),
                )
            })?;
        method(self, obj, args)
    }

    /// `obj.<name>`; unknown properties read as `undefined`
    pub fn get_property(&self, obj: ObjectRef, name: &str) -> Result<Value, Exception> {
        let class = self.class_of(obj)?;
        match self.classes[class.0]
            .getters
            .iter()
            .find(|(getter, _)| *getter == name)
        {
            Some((_, getter)) => getter(self, obj),
            None => Ok(Value::Undefined),
        }
    }

    /// Run `execute` on a worker, then `complete` on the host thread
    pub fn queue_async_work<F>(&mut self, execute: F, complete: CompleteFn) -> Result<TaskId, Exception>
    where
        F: FnOnce() -> WorkOutput + Send + 'static,
    {
        let task = self
            .workers
            .submit(execute)
            .map_err(|err| Exception::error("ERR_WORKER_POOL", err.to_string()))?;
        self.pending.insert(task, complete);
        Ok(task)
    }

    /// Completions available now, without blocking
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        let mut done = std::mem::take(&mut self.ready);
        for finished in self.workers.try_finished() {
            if let Some(completion) = self.complete(finished.task, finished.output) {
                done.push(completion);
            }
        }
        done
    }

    /// Block until `task` completes and return its result
    pub fn await_task(&mut self, task: TaskId) -> Result<Value, Exception> {
        if let Some(pos) = self.ready.iter().position(|c| c.task == task) {
            return self.ready.remove(pos).result;
        }
        if !self.pending.contains_key(&task) {
            return Err(Exception::error(
                "ERR_UNKNOWN_TASK",
                format!("task {task} is not pending"),
            ));
        }
        while let Some(finished) = self.workers.wait_finished() {
            if let Some(completion) = self.complete(finished.task, finished.output) {
                if completion.task == task {
                    return completion.result;
                }
                self.ready.push(completion);
            }
        }
        Err(Exception::error("ERR_WORKER_POOL", "worker channel closed"))
    }

    fn complete(&mut self, task: TaskId, output: Result<WorkOutput, String>) -> Option<Completion> {
        let complete = self.pending.remove(&task)?;
        let result = match output {
            Ok(output) => complete(self, output),
            Err(message) => Err(Exception::error("ERR_WORKER_PANIC", message)),
        };
        Some(Completion { task, result })
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Env {
    /// Environment teardown finalizes everything still alive
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(object) = slot.object.as_mut() {
                object.reachable = false;
            }
        }
        self.collect();
    }
}

fn collected() -> Exception {
    Exception::error("ERR_INVALID_OBJECT", "object has been collected")
}

fn wrong_type() -> Exception {
    Exception::type_error("ERR_INVALID_THIS", "object does not wrap the expected native type")
}
