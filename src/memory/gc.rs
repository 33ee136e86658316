use colored::*;

use super::object::{
    BoundMethod, Class, Closure, Function, Instance, LoxStr, NativeFn, Object, Upvalue,
};
use super::ptr::Gc;
use super::table::Table;
use super::trace::Traced;
use crate::compiler::compiler::FunctionState;
use crate::debug::{LOG_GC, STRESS_GC};
use crate::vm::{value::Value, CallFrame};

const DEFAULT_NEXT_GC: usize = 1024 * 1024;
const HEAP_GROW_FACTOR: usize = 2;

/// Mark and sweep garbage collector.
///
/// Uses a tri-color abstraction. Objects start out as white, everything in the
/// stack, globals etc are then marked as gray. Then all the objects reachable
/// by those are found, the already processed objects become black. Afterwards
/// it proceeds with sweeping all objects still left as white.
///
/// The GC owns the arrays and tables that double as the root set, so the
/// compiler and VM both run against a `&mut GC`. Any allocation may pause the
/// mutator for a full collection, which is why in-progress objects must sit
/// on the value stack before the next allocation happens.
pub struct GC {
    /// All values on the stack, used by the VM.
    pub stack: Vec<Value>,

    /// All global values, used by the VM. Keys are interned names.
    pub globals: Table,

    /// CallFrames used by the VM.
    pub call_frames: Vec<CallFrame>,

    /// Functions currently being compiled.
    pub functions: Vec<FunctionState>,

    /// Open upvalues used by the VM, sorted by ascending stack slot.
    pub open_upvalues: Vec<Gc<Object>>,

    /// The interned name of the initializer method, looked up on every class
    /// call. Set once by the VM.
    pub init_string: Option<Gc<Object>>,

    /// All objects tracked by the GC.
    objects: Vec<Box<Traced<Object>>>,

    /// The intern set: every live string, keyed by content. Entries hold no
    /// value and do not keep their key alive on their own.
    strings: Table,

    /// The list of all objects that have recently been reached, either by
    /// marking roots, or by tracing their references. The items in this list
    /// are then blackened and removed on each collection cycle.
    gray_list: Vec<Gc<Object>>,

    /// The total amount of bytes allocated so far.
    bytes_allocated: usize,

    /// When `bytes_allocated` reaches this amount the GC starts collecting.
    next_gc: usize,
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}

impl GC {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            globals: Table::new(),
            call_frames: Vec::new(),
            functions: Vec::new(),
            open_upvalues: Vec::new(),
            init_string: None,
            objects: Vec::new(),
            strings: Table::new(),
            gray_list: Vec::new(),
            bytes_allocated: 0,
            next_gc: DEFAULT_NEXT_GC,
        }
    }

    /// Interns `chars`: returns the existing string when one with the same
    /// bytes is already on the heap, otherwise allocates and registers it.
    pub fn intern(&mut self, chars: String) -> Gc<Object> {
        let hash = LoxStr::hash_bytes(chars.as_bytes());
        if let Some(existing) = self.strings.find_key(&chars, hash) {
            return existing;
        }

        let string = self.track(Object::String(LoxStr { chars, hash }));
        self.strings.set(string, Value::Nil);
        string
    }

    /// Adds a function to the garbage collector.
    pub fn track_function(&mut self, function: Function) -> Gc<Object> {
        self.track(Object::Function(function))
    }

    /// Adds a native function to the garbage collector.
    pub fn track_native(&mut self, native_fn: NativeFn) -> Gc<Object> {
        self.track(Object::Native(native_fn))
    }

    /// Adds a closure to the garbage collector.
    pub fn track_closure(&mut self, closure: Closure) -> Gc<Object> {
        self.track(Object::Closure(closure))
    }

    /// Adds an upvalue to the garbage collector.
    pub fn track_upvalue(&mut self, upvalue: Upvalue) -> Gc<Object> {
        self.track(Object::Upvalue(upvalue))
    }

    /// Adds a class to the garbage collector.
    pub fn track_class(&mut self, class: Class) -> Gc<Object> {
        self.track(Object::Class(class))
    }

    /// Adds a class instance to the garbage collector.
    pub fn track_instance(&mut self, instance: Instance) -> Gc<Object> {
        self.track(Object::Instance(instance))
    }

    /// Adds a bound method to the garbage collector.
    pub fn track_bound_method(&mut self, bound: BoundMethod) -> Gc<Object> {
        self.track(Object::BoundMethod(bound))
    }

    /// Takes ownership of `object`. A collection may run here, before the
    /// object enters the heap, so a not-yet-reachable object can never be
    /// swept by the pass its own allocation triggered.
    fn track(&mut self, object: Object) -> Gc<Object> {
        if STRESS_GC {
            self.collect();
        }
        self.bytes_allocated += object.size();
        if self.bytes_allocated > self.next_gc {
            self.collect();
        }

        self.objects.push(Box::new(Traced::new(object)));
        let object = self.objects.last_mut().unwrap();
        Gc::new(object)
    }

    fn on_sweep(&mut self, deallocated: usize) {
        self.bytes_allocated -= deallocated;
    }

    /// Traces through all objects tracked by the garbage collector and
    /// determines which ones can be reached. The objects that cannot be
    /// reached are freed from memory.
    pub fn collect(&mut self) {
        let before = self.bytes_allocated;
        if LOG_GC {
            println!("{}", "[GC]\t\tBEGIN".cyan());
        }

        self.mark_roots();
        self.trace_references();

        // The intern set holds its keys weakly: entries for strings nothing
        // else reached are dropped before the sweep frees those strings.
        self.strings.remove_unmarked();

        self.sweep();

        // Adjust when the GC should run next.
        self.next_gc = std::cmp::max(DEFAULT_NEXT_GC, self.bytes_allocated * HEAP_GROW_FACTOR);

        if LOG_GC {
            println!(
                "{}\t\tCollected {} bytes (from {} to {}) next at {}",
                "[GC]".cyan(),
                before - self.bytes_allocated,
                before,
                self.bytes_allocated,
                self.next_gc
            );
            println!("{}", "[GC]\t\tEND".cyan());
        }
    }

    fn mark_roots(&mut self) {
        // Helper to grab the object inside if it exists.
        let filter_objects = |v: &Value| match v {
            Value::Object(obj) => Some(*obj),
            _ => None,
        };

        // Mark stack.
        let stack_objects: Vec<Gc<Object>> =
            self.stack.iter().filter_map(filter_objects).collect();
        self.mark_objects(stack_objects.into_iter());

        // Mark globals, both the interned name keys and the values.
        let mut global_objects = Vec::new();
        for (key, value) in self.globals.iter() {
            global_objects.push(key);
            if let Some(obj) = filter_objects(value) {
                global_objects.push(obj);
            }
        }
        self.mark_objects(global_objects.into_iter());

        // Mark compiler roots. Functions being compiled are not tracked by
        // the heap yet, so their names and constants are marked directly.
        let mut compiler_objects = Vec::new();
        for state in self.functions.iter() {
            if let Some(name) = state.function.name {
                compiler_objects.push(name);
            }
            for constant in state.function.chunk.constants.iter() {
                if let Some(obj) = filter_objects(constant) {
                    compiler_objects.push(obj);
                }
            }
        }
        self.mark_objects(compiler_objects.into_iter());

        // Mark closures in the call frames.
        let closure_objects: Vec<_> = self.call_frames.iter().map(|cf| cf.closure).collect();
        self.mark_objects(closure_objects.into_iter());

        // Mark open upvalues.
        let open_upvalues = self.open_upvalues.clone();
        self.mark_objects(open_upvalues.into_iter());

        if let Some(init_string) = self.init_string {
            self.mark_object(init_string);
        }
    }

    /// Traces all references that the objects in the gray list has. Goes
    /// through every gray object and marks them as black, while marking the
    /// objects they can reach.
    fn trace_references(&mut self) {
        while let Some(value) = self.gray_list.pop() {
            self.blacken(value);
        }
    }

    /// Marks values as reachable if is an object, otherwise it does nothing.
    pub(super) fn mark_value(&mut self, value: Value) {
        match value {
            Value::Object(object) => {
                self.mark_object(object);
            }
            // Only objects are managed by the GC.
            _ => {}
        }
    }

    /// Marks objects as reachable, and adds them once to the gray list for
    /// further processing.
    pub(super) fn mark_object(&mut self, object: Gc<Object>) {
        // Using the tri-color abstraction with white, gray and black nodes.
        // If the node is set to gray, we have that as marked being true. If
        // this gets called again the node is black so we should not add it
        // to the gray list.
        if !object.marked() {
            if LOG_GC {
                println!("{}\t\tMarking: {}", "[GC]".cyan(), object.as_ref());
            }
            object.set_mark(true);
            self.gray_list.push(object);
        }
    }

    /// Marks multiple objects as reachable.
    fn mark_objects(&mut self, objects_it: impl Iterator<Item = Gc<Object>>) {
        objects_it.for_each(|o| self.mark_object(o));
    }

    /// Finishes the processing of a gray object, will mark other objects
    /// that are reachable by the object.
    fn blacken(&mut self, object: Gc<Object>) {
        if LOG_GC {
            println!("{}\t\tBlacken: {}", "[GC]".cyan(), object.as_ref());
        }
        match object.as_ref() {
            Object::String(_) => {}
            Object::Native(native) => {
                self.mark_object(native.name);
            }
            Object::Function(function) => {
                // For a referenced function we want to first mark the function
                // name, and then everything in the constant list that's used
                // by the code.
                if let Some(name) = function.name {
                    self.mark_object(name);
                }
                for constant in function.chunk.constants.iter() {
                    self.mark_value(*constant);
                }
            }
            Object::Closure(closure) => {
                self.mark_object(closure.function);
                let upvalues = closure.upvalues.clone();
                self.mark_objects(upvalues.into_iter());
            }
            Object::Upvalue(upvalue) => {
                match upvalue {
                    Upvalue::Closed(closed) => self.mark_value(*closed),
                    // An open upvalue's value lives on the stack, which is a
                    // root of its own.
                    Upvalue::Open(_) => {}
                }
            }
            Object::Class(class) => {
                self.mark_object(class.name);
                class.methods.mark(self);
            }
            Object::Instance(instance) => {
                self.mark_object(instance.class);
                instance.fields.mark(self);
            }
            Object::BoundMethod(bound) => {
                self.mark_value(bound.receiver);
                self.mark_object(bound.method);
            }
        }
    }

    /// Sweeps all objects left as white, as they cannot be reached any more.
    fn sweep(&mut self) {
        let mut i = 0;
        while i < self.objects.len() {
            if !self.objects[i].marked() {
                if LOG_GC {
                    println!(
                        "{}\t\t[Sweep] {}",
                        "[GC]".cyan(),
                        self.objects[i].data
                    );
                }
                let removed = self.objects.swap_remove(i);
                self.on_sweep(removed.data.size());
                // Don't increment i as we swap the last element to this location.
            } else {
                self.objects[i].set_mark(false);
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut gc = GC::new();
        let a = gc.intern("hello".to_owned());
        let b = gc.intern("hello".to_owned());
        let c = gc.intern("world".to_owned());
        assert!(Gc::ptr_eq(&a, &b));
        assert!(!Gc::ptr_eq(&a, &c));
    }

    #[test]
    fn collect_frees_unreachable_strings() {
        let mut gc = GC::new();
        gc.intern("short lived".to_owned());
        assert_eq!(gc.objects.len(), 1);

        gc.collect();
        assert_eq!(gc.objects.len(), 0);
        assert_eq!(gc.bytes_allocated, 0);

        // The intern entry went with it: re-interning allocates anew.
        gc.intern("short lived".to_owned());
        assert_eq!(gc.objects.len(), 1);
    }

    #[test]
    fn collect_keeps_stack_roots() {
        let mut gc = GC::new();
        let kept = gc.intern("kept".to_owned());
        gc.intern("dropped".to_owned());
        gc.stack.push(kept.into());

        gc.collect();
        assert_eq!(gc.objects.len(), 1);

        // Marks are clear again after the pass.
        assert!(!kept.marked());

        // Interning still finds the surviving string.
        let again = gc.intern("kept".to_owned());
        assert!(Gc::ptr_eq(&kept, &again));
    }

    #[test]
    fn collect_twice_is_a_noop() {
        let mut gc = GC::new();
        let s = gc.intern("stable".to_owned());
        gc.stack.push(s.into());

        gc.collect();
        let bytes = gc.bytes_allocated;
        let objects = gc.objects.len();

        gc.collect();
        assert_eq!(gc.bytes_allocated, bytes);
        assert_eq!(gc.objects.len(), objects);
    }

    #[test]
    fn globals_keep_values_alive() {
        let mut gc = GC::new();
        let name = gc.intern("f".to_owned());
        let function = gc.track_function(Function::blank());
        gc.globals.set(name, function.into());

        gc.collect();
        assert_eq!(gc.objects.len(), 2);
    }

    #[test]
    fn closed_upvalue_keeps_its_value() {
        let mut gc = GC::new();
        let payload = gc.intern("captured".to_owned());
        let upvalue = gc.track_upvalue(Upvalue::Closed(payload.into()));
        gc.stack.push(upvalue.into());

        gc.collect();
        assert_eq!(gc.objects.len(), 2);
    }
}
