use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stackgrad::{
    nn::{Loss, MeanSquaredError, Sgd},
    ops::{Activation, Add, Linear, Scale},
    Operator, Optimizer, Tensor,
};

/// Forward then backward through an unrolled recurrent cell
fn bench_recurrent_unroll(c: &mut Criterion) {
    let mut group = c.benchmark_group("recurrent_unroll");
    let width = 256;

    for steps in [4usize, 16, 64] {
        group.throughput(Throughput::Elements((steps * width) as u64));
        group.bench_with_input(BenchmarkId::new("scale_add_tanh", steps), &steps, |b, &steps| {
            let mut cell = Scale::scale([width], None).unwrap();
            let mut add = Add::add();
            let mut act = Activation::tanh();
            let weight = cell.transform().weight().clone();
            let inputs: Vec<Tensor> = (0..steps).map(|_| Tensor::full([width], 1, 0.1)).collect();
            let target = Tensor::ones([width], 1);

            b.iter(|| {
                let mut h = Tensor::zeros([width], 1);
                let mut replay = Vec::with_capacity(steps);
                for x in &inputs {
                    let s = cell.forward(&h).unwrap();
                    let z = add.forward(&s, x).unwrap();
                    h = act.forward(&z).unwrap();
                    replay.push((s, z, h.clone()));
                }
                black_box(MeanSquaredError.evaluate(&[h], &[target.clone()]).unwrap());
                for (s, z, out) in replay.iter().rev() {
                    act.backward(out).unwrap();
                    add.backward(z).unwrap();
                    cell.backward(s).unwrap();
                }
                weight.zero_grad();
            });
        });
    }

    group.finish();
}

/// One full training step of a dense layer, including the optimizer round
fn bench_dense_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_step");

    for batch in [1usize, 32, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("linear_mse_sgd", batch), &batch, |b, &batch| {
            let mut layer = Linear::dense(64, 16).unwrap();
            let mut optimizer = Optimizer::new();
            optimizer
                .register_all(layer.parameters(), || Box::new(Sgd::new(1e-3)))
                .unwrap();
            let x = Tensor::full([64], batch, 0.5);
            let target = Tensor::zeros([16], batch);

            b.iter(|| {
                let y = layer.forward(&x).unwrap();
                black_box(MeanSquaredError.evaluate(&[y.clone()], &[target.clone()]).unwrap());
                layer.backward(&y).unwrap();
                black_box(optimizer.update().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_recurrent_unroll, bench_dense_step);
criterion_main!(benches);
