//! Interpreter throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use laxlang::Vm;

const FIB: &str = "\
fun fib(n) {
    if (n < 2) return n;
    return fib(n - 1) + fib(n - 2);
}
var result = fib(18);
";

const STRINGS: &str = "\
var s = \"\";
for (var i = 0; i < 200; i = i + 1) {
    s = s + \"ab\";
}
";

const METHODS: &str = "\
class Counter {
    init() { self.n = 0; }
    inc() { self.n = self.n + 1; }
}
var c = Counter();
for (var i = 0; i < 500; i = i + 1) {
    c.inc();
}
";

fn bench_interpret(c: &mut Criterion) {
    c.bench_function("fib_18", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(FIB)).unwrap();
        })
    });

    c.bench_function("string_concat", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(STRINGS)).unwrap();
        })
    });

    c.bench_function("method_calls", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(METHODS)).unwrap();
        })
    });
}

criterion_group!(benches, bench_interpret);
criterion_main!(benches);
