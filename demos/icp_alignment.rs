use cloudreg_core::PointCloud;
use cloudreg_registration::{apply_transform, icp_point_to_point, AlignParams, RigidTransform};

fn main() {
    // A wavy sheet, displaced by a small rigid motion.
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut z = Vec::new();
    for i in 0..30 {
        for j in 0..30 {
            let px = i as f32 * 0.05 - 0.75;
            let py = j as f32 * 0.05 - 0.75;
            x.push(px);
            y.push(py);
            z.push(0.2 * (3.0 * px).sin() * (2.0 * py).cos());
        }
    }
    let source = PointCloud::from_xyz(x, y, z);

    let angle = 8f32.to_radians();
    let (s, c) = angle.sin_cos();
    let truth = RigidTransform {
        rotation: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
        translation: [0.05, -0.03, 0.02],
    };
    let target = apply_transform(&source, &truth);

    let params = AlignParams {
        max_iterations: 50,
        transformation_epsilon: 1e-10,
        ..AlignParams::default()
    };
    let result = icp_point_to_point(&source, &target, &params);

    println!("converged:  {}", result.converged);
    println!("iterations: {}", result.iterations);
    println!("fitness:    {:.3e}", result.fitness);
    println!("transform:\n{}", result.transform.to_matrix4());
    println!(
        "rotation error:    {:.4} deg",
        result.transform.rotation_angle_to(&truth).to_degrees()
    );
    println!(
        "translation error: {:.6}",
        result.transform.translation_distance(&truth)
    );
}
