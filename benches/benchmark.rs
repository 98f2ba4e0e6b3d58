use criterion::{Criterion, criterion_group, criterion_main};
use dlinject::{ElfImage, ProcessMaps, SymbolResolver};
use libloading::os::unix::Library;
use std::hint::black_box;

fn own_libc() -> Option<String> {
    let maps = ProcessMaps::read(std::process::id() as i32).ok()?;
    maps.find_module("libc").map(|module| module.path)
}

fn lookup_benchmark(c: &mut Criterion) {
    let Some(path) = own_libc() else {
        eprintln!("no libc mapped, skipping lookup benchmark");
        return;
    };
    let image = ElfImage::open(&path).unwrap();
    c.bench_function("dlinject:lookup", |b| {
        b.iter(|| image.lookup(black_box("getpid")).unwrap())
    });
    c.bench_function("dlinject:lookup_linear", |b| {
        b.iter(|| image.lookup_linear(black_box("getpid")).unwrap())
    });
    let lib = Library::this();
    c.bench_function("libloading:get", |b| {
        b.iter(|| unsafe { lib.get::<unsafe extern "C" fn() -> i32>(black_box(b"getpid")).unwrap() })
    });
}

fn resolve_benchmark(c: &mut Criterion) {
    let pid = std::process::id() as i32;
    c.bench_function("dlinject:resolve_cold", |b| {
        b.iter(|| {
            let mut resolver = SymbolResolver::new(pid).unwrap();
            resolver.resolve_in("libc", black_box("dlopen")).unwrap()
        })
    });
    let mut resolver = SymbolResolver::new(pid).unwrap();
    c.bench_function("dlinject:resolve_cached", |b| {
        b.iter(|| resolver.resolve_in("libc", black_box("dlopen")).unwrap())
    });
}

criterion_group!(benches, lookup_benchmark, resolve_benchmark);
criterion_main!(benches);
