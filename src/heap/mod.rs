//! The garbage-collected heap.
//!
//! Objects live in a slot arena and are referred to by `Handle`, a plain
//! index. Collection is mark-and-sweep: the VM marks its roots, the heap
//! traces the object graph through a gray worklist, and sweep returns
//! every unmarked slot to the free list. Marking is a per-slot generation
//! counter rather than a bit, so nothing needs clearing between cycles.
//!
//! The heap itself never decides to collect. It only tracks allocated
//! bytes and answers `should_collect`; the VM calls the mark/trace/sweep
//! phases from points where all live values are reachable from its roots.

pub mod object;
pub mod table;
pub mod value;

use object::{LaxStr, Obj};
use table::{hash_str, Table};
use value::{format_number, Value};

/// Collect for the first time once this many bytes are live.
const FIRST_GC: usize = 1024 * 1024;

/// After a collection the next threshold is live bytes times this.
const GC_HEAP_GROW_FACTOR: usize = 2;

/// An index into the heap's slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(u32);

impl Handle {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Slot {
    obj: Option<Obj>,
    /// Generation this slot was last marked in.
    mark: u32,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Intern set: every live string object, keyed by itself.
    strings: Table,
    /// Current mark generation. Bumped at the start of each collection.
    cycle: u32,
    gray: Vec<Handle>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            cycle: 0,
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC,
        }
    }

    /// Move an object into the heap and hand back its handle.
    ///
    /// Allocation never collects on its own; callers that can trigger a
    /// collection do so before allocating, while their roots are intact.
    pub fn alloc(&mut self, obj: Obj) -> Handle {
        self.bytes_allocated += obj.heap_size();
        let slot = Slot {
            obj: Some(obj),
            mark: self.cycle,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = slot;
                Handle(index)
            }
            None => {
                self.slots.push(slot);
                Handle((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Intern a string: return the existing handle if an equal string is
    /// already on the heap, else allocate one.
    pub fn intern(&mut self, text: &str) -> Handle {
        let hash = hash_str(text);
        let slots = &self.slots;
        if let Some(existing) = self
            .strings
            .find_key(hash, |handle| str_of(slots, handle).text == text)
        {
            return existing;
        }
        self.intern_new(text.to_owned(), hash)
    }

    /// Interning variant that takes ownership, for strings the caller
    /// already built (concatenation).
    pub fn intern_owned(&mut self, text: String) -> Handle {
        let hash = hash_str(&text);
        let slots = &self.slots;
        if let Some(existing) = self
            .strings
            .find_key(hash, |handle| str_of(slots, handle).text == text)
        {
            return existing;
        }
        self.intern_new(text, hash)
    }

    fn intern_new(&mut self, text: String, hash: u32) -> Handle {
        let handle = self.alloc(Obj::Str(LaxStr { text, hash }));
        self.strings.set(handle, hash, Value::Nil);
        handle
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    // Typed accessors. Handing one a handle of the wrong kind is a VM
    // bug, so they panic rather than return an error.

    pub fn get(&self, handle: Handle) -> &Obj {
        match &self.slots[handle.index()].obj {
            Some(obj) => obj,
            None => panic!("use of freed heap slot {}", handle.0),
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut Obj {
        match &mut self.slots[handle.index()].obj {
            Some(obj) => obj,
            None => panic!("use of freed heap slot {}", handle.0),
        }
    }

    pub fn str_text(&self, handle: Handle) -> &str {
        match self.get(handle) {
            Obj::Str(s) => &s.text,
            obj => panic!("expected string, found {}", obj.type_name()),
        }
    }

    pub fn str_hash(&self, handle: Handle) -> u32 {
        match self.get(handle) {
            Obj::Str(s) => s.hash,
            obj => panic!("expected string, found {}", obj.type_name()),
        }
    }

    pub fn function(&self, handle: Handle) -> &object::Function {
        match self.get(handle) {
            Obj::Function(f) => f,
            obj => panic!("expected function, found {}", obj.type_name()),
        }
    }

    pub fn closure(&self, handle: Handle) -> &object::Closure {
        match self.get(handle) {
            Obj::Closure(c) => c,
            obj => panic!("expected closure, found {}", obj.type_name()),
        }
    }

    pub fn upvalue(&self, handle: Handle) -> &object::Upvalue {
        match self.get(handle) {
            Obj::Upvalue(u) => u,
            obj => panic!("expected upvalue, found {}", obj.type_name()),
        }
    }

    pub fn upvalue_mut(&mut self, handle: Handle) -> &mut object::Upvalue {
        match self.get_mut(handle) {
            Obj::Upvalue(u) => u,
            obj => panic!("expected upvalue, found {}", obj.type_name()),
        }
    }

    pub fn class(&self, handle: Handle) -> &object::Class {
        match self.get(handle) {
            Obj::Class(c) => c,
            obj => panic!("expected class, found {}", obj.type_name()),
        }
    }

    pub fn class_mut(&mut self, handle: Handle) -> &mut object::Class {
        match self.get_mut(handle) {
            Obj::Class(c) => c,
            obj => panic!("expected class, found {}", obj.type_name()),
        }
    }

    pub fn instance(&self, handle: Handle) -> &object::Instance {
        match self.get(handle) {
            Obj::Instance(i) => i,
            obj => panic!("expected instance, found {}", obj.type_name()),
        }
    }

    pub fn instance_mut(&mut self, handle: Handle) -> &mut object::Instance {
        match self.get_mut(handle) {
            Obj::Instance(i) => i,
            obj => panic!("expected instance, found {}", obj.type_name()),
        }
    }

    pub fn bound_method(&self, handle: Handle) -> &object::BoundMethod {
        match self.get(handle) {
            Obj::BoundMethod(b) => b,
            obj => panic!("expected bound method, found {}", obj.type_name()),
        }
    }

    /// The runtime type name of a value, for error messages.
    pub fn type_name_of(&self, value: Value) -> &'static str {
        match value {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Obj(handle) => self.get(handle).type_name(),
        }
    }

    /// Render a value the way `print` does.
    pub fn display_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(handle) => match self.get(handle) {
                Obj::Str(s) => s.text.clone(),
                Obj::Function(f) => self.display_function(f),
                Obj::Closure(c) => self.display_function(self.function(c.function)),
                Obj::Upvalue(_) => "upvalue".to_owned(),
                Obj::Class(c) => self.str_text(c.name).to_owned(),
                Obj::Instance(i) => {
                    format!("{} instance", self.str_text(self.class(i.class).name))
                }
                Obj::BoundMethod(b) => {
                    self.display_function(self.function(self.closure(b.method).function))
                }
                Obj::Native(_) => "<native fn>".to_owned(),
            },
        }
    }

    fn display_function(&self, function: &object::Function) -> String {
        match function.name {
            Some(name) => format!("<fn {}>", self.str_text(name)),
            None => "<script>".to_owned(),
        }
    }

    // Collection phases, driven by the VM.

    /// Start a mark cycle. Everything is unmarked until `mark_value` /
    /// `mark_object` says otherwise.
    pub fn begin_mark(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
        self.gray.clear();
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    pub fn mark_object(&mut self, handle: Handle) {
        let slot = &mut self.slots[handle.index()];
        if slot.obj.is_some() && slot.mark != self.cycle {
            slot.mark = self.cycle;
            self.gray.push(handle);
        }
    }

    /// Drain the gray worklist, marking every object reachable from what
    /// has been marked so far.
    pub fn trace_references(&mut self) {
        while let Some(handle) = self.gray.pop() {
            self.blacken(handle);
        }
    }

    fn blacken(&mut self, handle: Handle) {
        // Children are gathered before marking so the slot borrow ends
        // first.
        let mut children: Vec<Value> = Vec::new();
        match self.get(handle) {
            Obj::Str(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    children.push(Value::Obj(name));
                }
                children.extend(f.chunk.constants.iter().copied());
            }
            Obj::Closure(c) => {
                children.push(Value::Obj(c.function));
                children.extend(c.upvalues.iter().map(|&u| Value::Obj(u)));
            }
            Obj::Upvalue(u) => {
                if let object::Upvalue::Closed(value) = u {
                    children.push(*value);
                }
            }
            Obj::Class(c) => {
                children.push(Value::Obj(c.name));
                for (key, value) in c.methods.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            Obj::Instance(i) => {
                children.push(Value::Obj(i.class));
                for (key, value) in i.fields.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            Obj::BoundMethod(b) => {
                children.push(b.receiver);
                children.push(Value::Obj(b.method));
            }
        }
        for child in children {
            self.mark_value(child);
        }
    }

    /// Free every unmarked object and reset the collection threshold.
    pub fn sweep(&mut self) {
        let before = self.bytes_allocated;

        // The intern set holds strings weakly: entries for strings about
        // to die must go first, or the table would dangle.
        let cycle = self.cycle;
        let slots = &self.slots;
        self.strings
            .retain_keys(|handle| slots[handle.index()].mark == cycle);

        // Live objects are re-measured rather than subtracting the dead
        // ones' sizes: instance and class tables grow after allocation,
        // so the size recorded at alloc time goes stale.
        let mut live_bytes = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.mark == self.cycle {
                if let Some(obj) = &slot.obj {
                    live_bytes += obj.heap_size();
                }
            } else if slot.obj.take().is_some() {
                self.free.push(index as u32);
            }
        }
        self.bytes_allocated = live_bytes;

        self.next_gc = (self.bytes_allocated * GC_HEAP_GROW_FACTOR).max(FIRST_GC);
        log::debug!(
            "gc: {} -> {} bytes, next at {}",
            before,
            self.bytes_allocated,
            self.next_gc
        );
    }
}

fn str_of<'a>(slots: &'a [Slot], handle: Handle) -> &'a LaxStr {
    match &slots[handle.index()].obj {
        Some(Obj::Str(s)) => s,
        _ => panic!("intern set key is not a live string"),
    }
}

#[cfg(test)]
mod tests {
    use super::object::Function;
    use super::*;

    #[test]
    fn test_interning_reuses_handles() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.str_text(a), "hello");
    }

    #[test]
    fn test_intern_owned_matches_intern() {
        let mut heap = Heap::new();
        let a = heap.intern("abcd");
        let b = heap.intern_owned("ab".to_owned() + "cd");
        assert_eq!(a, b);
    }

    #[test]
    fn test_allocation_is_accounted() {
        let mut heap = Heap::new();
        assert_eq!(heap.bytes_allocated(), 0);
        heap.intern("some text");
        assert!(heap.bytes_allocated() > 0);
    }

    #[test]
    fn test_sweep_frees_unmarked_objects() {
        let mut heap = Heap::new();
        let live = heap.intern("live");
        let _dead = heap.intern("dead");
        let before = heap.bytes_allocated();

        heap.begin_mark();
        heap.mark_object(live);
        heap.trace_references();
        heap.sweep();

        assert!(heap.bytes_allocated() < before);
        assert_eq!(heap.str_text(live), "live");
    }

    #[test]
    fn test_swept_string_leaves_intern_set() {
        let mut heap = Heap::new();
        let first = heap.intern("transient");

        heap.begin_mark();
        heap.trace_references();
        heap.sweep();

        // The slot was freed, so re-interning mints a fresh object in the
        // recycled slot rather than resurrecting the old entry.
        let second = heap.intern("transient");
        assert_eq!(heap.str_text(second), "transient");
        assert_eq!(first.index(), second.index());
    }

    #[test]
    fn test_sweep_accounts_for_tables_grown_after_allocation() {
        use super::object::{Class, Instance};

        let mut heap = Heap::new();
        let name = heap.intern("C");
        let class = heap.alloc(Obj::Class(Class {
            name,
            methods: Table::new(),
        }));
        let instance = heap.alloc(Obj::Instance(Instance {
            class,
            fields: Table::new(),
        }));
        // The field table grows well past the size recorded at alloc
        // time.
        for i in 0..8 {
            let key = heap.intern(&format!("field{}", i));
            let hash = heap.str_hash(key);
            heap.instance_mut(instance)
                .fields
                .set(key, hash, Value::Number(i as f64));
        }

        // Everything dies; the byte count must land at zero rather than
        // underflow.
        heap.begin_mark();
        heap.trace_references();
        heap.sweep();
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn test_marking_traces_through_functions() {
        let mut heap = Heap::new();
        let name = heap.intern("f");
        let text = heap.intern("constant");
        let mut function = Function::new(Some(name));
        function.chunk.constants.push(Value::Obj(text));
        let func = heap.alloc(Obj::Function(function));

        heap.begin_mark();
        heap.mark_object(func);
        heap.trace_references();
        heap.sweep();

        assert_eq!(heap.str_text(name), "f");
        assert_eq!(heap.str_text(text), "constant");
    }

    #[test]
    fn test_display_values() {
        let mut heap = Heap::new();
        let s = heap.intern("hi");
        assert_eq!(heap.display_value(Value::Nil), "nil");
        assert_eq!(heap.display_value(Value::Bool(true)), "true");
        assert_eq!(heap.display_value(Value::Number(3.0)), "3");
        assert_eq!(heap.display_value(Value::Obj(s)), "hi");

        let name = heap.intern("f");
        let func = heap.alloc(Obj::Function(Function::new(Some(name))));
        assert_eq!(heap.display_value(Value::Obj(func)), "<fn f>");
        let script = heap.alloc(Obj::Function(Function::new(None)));
        assert_eq!(heap.display_value(Value::Obj(script)), "<script>");
    }
}
