// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the host reference kernels.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tensor_core::{gather_strided, matmul, mul, DType, Layout, Shape, Tensor, TensorDesc};

fn ramp(shape: Shape) -> Tensor {
    let values: Vec<f32> = (0..shape.num_elements()).map(|i| (i % 17) as f32 * 0.25).collect();
    Tensor::from_f32(shape, &values).unwrap()
}

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_matmul");
    for &size in &[16usize, 64, 128] {
        let a = ramp(Shape::matrix(size, size));
        let b = ramp(Shape::matrix(size, size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| matmul(black_box(&a), black_box(&b), false, false).unwrap())
        });
    }
    group.finish();
}

fn bench_k1_outer_product(c: &mut Criterion) {
    let a = ramp(Shape::matrix(256, 1));
    let b = ramp(Shape::matrix(1, 256));
    c.bench_function("k1_matmul_256", |bench| {
        bench.iter(|| matmul(black_box(&a), black_box(&b), false, false).unwrap())
    });
    c.bench_function("k1_mul_256", |bench| {
        bench.iter(|| mul(black_box(&a), black_box(&b)).unwrap())
    });
}

fn bench_gather_transposed(c: &mut Criterion) {
    let storage = ramp(Shape::vector(128 * 128));
    let desc = TensorDesc::contiguous(Shape::matrix(128, 128), DType::F32, Layout::RowMajor).swap_last_two();
    c.bench_function("gather_transposed_128", |bench| {
        bench.iter(|| gather_strided(black_box(&storage), black_box(&desc)).unwrap())
    });
}

criterion_group!(benches, bench_matmul, bench_k1_outer_product, bench_gather_transposed);
criterion_main!(benches);
