//! Planner and mask rendering benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fluoromask::processing::{plan_transforms, PlanOptions, ScalingPolicy};
use fluoromask::{FrameGeometry, MaskShape, Profile, Sar};

fn kalare() -> Profile {
    Profile::named("Kalare")
        .with_sar(Sar::new(8, 9).unwrap())
        .with_circ(396.0, 92.0, 1140.0)
        .with_shape(MaskShape::rect(0.0, 0.0, 400.0, 60.0).filled_inside())
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let frame = FrameGeometry::new(1920, 1080).with_sar(Sar::new(8, 9).unwrap());
    let profile = kalare();

    for policy in [ScalingPolicy::None, ScalingPolicy::Upscale, ScalingPolicy::Downscale] {
        let opts = PlanOptions::default().with_square_pixel(policy);
        group.bench_with_input(BenchmarkId::from_parameter(policy), &opts, |b, opts| {
            b.iter(|| plan_transforms(black_box(&frame), black_box(&profile), opts));
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_mask");
    group.sample_size(20);

    let frames = [
        ("480p", FrameGeometry::new(720, 480)),
        ("1080p", FrameGeometry::new(1920, 1080).with_sar(Sar::new(8, 9).unwrap())),
    ];
    let profile = kalare();

    for (name, frame) in frames {
        let plan = plan_transforms(&frame, &profile, &PlanOptions::default().with_crop(false)).unwrap();
        let mask = plan.mask.unwrap();
        group.throughput(Throughput::Elements(mask.width as u64 * mask.height as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &mask, |b, mask| {
            b.iter(|| mask.render());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan, bench_render);
criterion_main!(benches);
