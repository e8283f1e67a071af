use cloudreg_core::PointCloud;
use cloudreg_features::compute_ppf;
use cloudreg_normals::{estimate_normals, Neighborhood};
use cloudreg_registration::{
    apply_transform, ppf_register, PpfHashMapSearch, PpfRegistrationParams, RigidTransform,
};

fn main() {
    // An oriented surface patch as the scene.
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut z = Vec::new();
    for i in 0..12 {
        for j in 0..12 {
            let px = i as f32 * 0.1 - 0.55;
            let py = j as f32 * 0.1 - 0.55;
            x.push(px);
            y.push(py);
            z.push(0.25 * (2.5 * px + 0.3).sin() * (1.7 * py).cos());
        }
    }
    let scene = PointCloud::from_xyz(x, y, z);
    let normals = estimate_normals(&scene, Neighborhood::Knn(8));
    let scene = scene.with_normals(normals);

    // The model is the scene carried away by a rigid motion.
    let angle = 30f32.to_radians();
    let (s, c) = angle.sin_cos();
    let away = RigidTransform {
        rotation: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
        translation: [10.0, 0.0, 0.0],
    };
    let model = apply_transform(&scene, &away);

    // Train the hash table on the model pair features.
    let features = compute_ppf(&model, model.normals.as_ref().unwrap());
    let mut search = PpfHashMapSearch::new(12f32.to_radians(), 0.05);
    search.train(&features);

    let params = PpfRegistrationParams {
        scene_reference_sampling_rate: 4,
        position_clustering_threshold: 0.15,
        rotation_clustering_threshold: 5f32.to_radians(),
    };
    let result = ppf_register(&model, &scene, &search, &params).expect("clouds carry normals");

    let expected = away.inverse();
    println!("converged: {}", result.converged);
    println!("fitness:   {:.3e}", result.fitness);
    println!("pose:\n{}", result.transform.to_matrix4());
    println!(
        "rotation error:    {:.4} deg",
        result.transform.rotation_angle_to(&expected).to_degrees()
    );
    println!(
        "translation error: {:.6}",
        result.transform.translation_distance(&expected)
    );
}
