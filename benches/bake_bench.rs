use criterion::{black_box, criterion_group, criterion_main, Criterion};
use baked::codec::{self, Dict, Value};
use baked::fragments::{self, FragmentTable};
use baked::BakedWriter;
use std::io::Cursor;

fn sample_table(count: usize, size: usize) -> FragmentTable {
    let mut table = FragmentTable::new();
    for i in 0..count {
        table.push(format!("pkg.module_{i}"), vec![b'x'; size]);
    }
    table
}

fn bench_codec(c: &mut Criterion) {
    let mut metadata = Dict::new();
    for i in 0..64 {
        metadata.insert(format!("key_{i}"), Value::List(vec![Value::Int(i), Value::Float(0.25), "text".into()]));
    }
    let value = Value::Dict(metadata);
    let encoded = codec::encode(&value).unwrap();

    c.bench_function("encode_dict_64", |b| b.iter(|| codec::encode(black_box(&value))));
    c.bench_function("decode_dict_64", |b| b.iter(|| codec::decode(black_box(&encoded))));
}

fn bench_fragment_table(c: &mut Criterion) {
    let table = sample_table(1000, 1024);
    let mut buf = Vec::new();
    table.write(&mut buf).unwrap();

    c.bench_function("write_table_1000x1k", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(buf.len());
            table.write(&mut out).unwrap();
            out
        })
    });

    c.bench_function("read_index_1000", |b| {
        b.iter(|| fragments::read_index(&mut Cursor::new(black_box(&buf))).unwrap())
    });

    c.bench_function("hash_from_1000x1k", |b| {
        b.iter(|| fragments::hash_from(&mut Cursor::new(black_box(&buf))).unwrap())
    });
}

fn bench_build(c: &mut Criterion) {
    let mut writer = BakedWriter::new();
    for i in 0..200 {
        writer.include(format!("pkg.module_{i}"), vec![b'y'; 4096]);
    }
    writer.set_hash_content(true);

    c.bench_function("build_200x4k_hashed", |b| b.iter(|| writer.build().unwrap()));
}

criterion_group!(benches, bench_codec, bench_fragment_table, bench_build);
criterion_main!(benches);
