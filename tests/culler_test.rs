mod common;

use common::{culler_settings, front_camera, away_camera, PASS_TIMEOUT, TARGET_SIZE};
use cullstream::assets::{Geometry, SubMesh};
use cullstream::rendering::culling::{
    decode_colors, ColorAllocator, ColorKey, CullableObject, CullerRenderer, MaterialInfo,
    MaterialSlots, SoftwareTarget,
};
use glam::{Mat4, Vec3, Vec4};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn renderer() -> CullerRenderer<&'static str> {
    CullerRenderer::new(
        culler_settings(),
        Box::new(SoftwareTarget::new(TARGET_SIZE, TARGET_SIZE)),
    )
    .unwrap()
}

fn cube(materials: MaterialSlots, at: Vec3) -> CullableObject {
    CullableObject::mesh(
        Arc::new(Geometry::unit_box()),
        materials,
        Mat4::from_translation(at),
    )
}

fn opaque_cube(at: Vec3) -> CullableObject {
    cube(MaterialSlots::Single(MaterialInfo::OPAQUE), at)
}

#[tokio::test]
async fn test_allocated_colors_are_distinct_and_increasing() {
    let mut colors = ColorAllocator::new();
    let allocated: Vec<ColorKey> = (0..70_000).map(|_| colors.next()).collect();

    assert_eq!(allocated[0], ColorKey::from_rgb(0, 0, 1));
    assert_eq!(allocated[255], ColorKey::from_rgb(0, 1, 0));
    assert!(allocated.windows(2).all(|w| w[0].value() < w[1].value()));
    assert!(allocated.iter().all(|c| !c.is_background()));

    let unique: HashSet<ColorKey> = allocated.iter().copied().collect();
    assert_eq!(unique.len(), allocated.len());
}

#[tokio::test]
async fn test_transparent_object_is_never_tracked() {
    let mut culler = renderer();
    let glass = cube(MaterialSlots::Single(MaterialInfo::transparent(0.4)), Vec3::ZERO);

    assert!(!culler.add("glass", &glass));
    assert!(!culler.contains(&"glass"));
    assert!(culler.scene().is_empty());

    // Flagged transparent but fully opaque still occludes
    let solid = cube(MaterialSlots::Single(MaterialInfo::transparent(1.0)), Vec3::ZERO);
    assert!(culler.add("solid", &solid));
}

#[tokio::test]
async fn test_multi_material_uses_placeholder_for_transparent_slots() {
    let mut culler = renderer();
    let geometry = Geometry::unit_box().with_groups(vec![
        SubMesh { start: 0, count: 18, material_index: 0 },
        SubMesh { start: 18, count: 18, material_index: 1 },
    ]);
    let window = CullableObject::mesh(
        Arc::new(geometry),
        MaterialSlots::Multi(vec![MaterialInfo::OPAQUE, MaterialInfo::transparent(0.2)]),
        Mat4::IDENTITY,
    );

    assert!(culler.add("window", &window));
    let color = culler.color_of(&"window").unwrap();
    let proxy = culler.scene().get(color).unwrap();

    assert_eq!(proxy.slots.len(), 2);
    assert!(!Arc::ptr_eq(&proxy.slots[0], culler.placeholder()));
    assert_eq!(proxy.slots[0].color, Some(color));
    assert!(Arc::ptr_eq(&proxy.slots[1], culler.placeholder()));
    assert_eq!(proxy.drawn_ranges(), vec![0..18]);

    let all_glass = CullableObject::mesh(
        Arc::new(Geometry::unit_box()),
        MaterialSlots::Multi(vec![MaterialInfo::transparent(0.2), MaterialInfo::transparent(0.9)]),
        Mat4::IDENTITY,
    );
    assert!(!culler.add("all glass", &all_glass));
}

#[tokio::test]
async fn test_decoding_finds_every_color_once() {
    let colors = [
        ColorKey::from_rgb(0, 0, 1),
        ColorKey::from_rgb(0, 2, 0),
        ColorKey::from_rgb(3, 0, 7),
    ];
    let mut data = Vec::new();
    for (i, color) in colors.iter().enumerate() {
        let [r, g, b] = color.rgb();
        for _ in 0..(i + 1) * 50 {
            data.extend_from_slice(&[r, g, b, 255]);
            data.extend_from_slice(&[0, 0, 0, 255]);
        }
    }

    let sequential = decode_colors(&data, usize::MAX);
    assert_eq!(sequential, colors.iter().copied().collect::<HashSet<_>>());
    assert!(!sequential.contains(&ColorKey::BACKGROUND));

    let parallel = decode_colors(&data, 0);
    assert_eq!(parallel, sequential);
    assert_eq!(decode_colors(&data, usize::MAX), sequential);
}

#[tokio::test]
async fn test_visibility_round_trip() {
    let mut culler = renderer();
    let updates = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&updates);
    culler
        .on_view_updated
        .add(move |update| recorded.lock().unwrap().push(update.pass));

    assert!(culler.add("front", &opaque_cube(Vec3::ZERO)));
    assert!(culler.add("behind", &opaque_cube(Vec3::new(0.0, 0.0, 50.0))));

    assert!(culler.update_visibility(&front_camera(), true).unwrap());
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert_eq!(update.seen, HashSet::from(["front"]));
    assert!(update.unseen.is_empty());
    assert_eq!(update.visible, HashSet::from(["front"]));

    // Nothing changed, nothing reported
    culler.update_visibility(&front_camera(), true).unwrap();
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert!(update.is_unchanged());
    assert_eq!(update.visible, HashSet::from(["front"]));

    culler.update_visibility(&away_camera(), true).unwrap();
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert_eq!(update.seen, HashSet::from(["behind"]));
    assert_eq!(update.unseen, HashSet::from(["front"]));

    assert_eq!(*updates.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_occluded_object_is_not_visible() {
    let mut culler = renderer();
    let mut wall = opaque_cube(Vec3::new(0.0, 0.0, 2.0));
    wall.transform *= Mat4::from_scale(Vec3::new(20.0, 20.0, 1.0));
    culler.add("wall", &wall);
    culler.add("hidden", &opaque_cube(Vec3::new(0.0, 0.0, -5.0)));

    culler.update_visibility(&front_camera(), true).unwrap();
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert_eq!(update.visible, HashSet::from(["wall"]));
}

#[tokio::test]
async fn test_clipped_object_is_not_visible() {
    // Keeps z <= -1, the cube at the origin is cut away
    let plane = Vec4::new(0.0, 0.0, -1.0, -1.0);
    let mut settings = culler_settings();
    settings.clipping_planes = vec![plane.to_array()];
    let mut culler: CullerRenderer<&str> = CullerRenderer::new(
        settings,
        Box::new(SoftwareTarget::new(TARGET_SIZE, TARGET_SIZE)),
    )
    .unwrap();
    assert_eq!(culler.clipping_planes(), &[plane]);

    culler.add("front", &opaque_cube(Vec3::ZERO));
    culler.add("deep", &opaque_cube(Vec3::new(0.0, 0.0, -5.0)));

    culler.update_visibility(&front_camera(), true).unwrap();
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert_eq!(update.visible, HashSet::from(["deep"]));

    culler.set_clipping_planes(Vec::new());
    assert!(culler.needs_update);
    assert!(culler.update_visibility(&front_camera(), false).unwrap());
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert_eq!(update.visible, HashSet::from(["front"]));
    assert_eq!(update.unseen, HashSet::from(["deep"]));
}

#[tokio::test]
async fn test_removed_object_is_not_reported_unseen() {
    let mut culler = renderer();
    culler.add("front", &opaque_cube(Vec3::ZERO));
    culler.update_visibility(&front_camera(), true).unwrap();
    culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();

    assert!(culler.remove(&"front"));
    assert!(!culler.remove(&"front"));
    assert_eq!(culler.material_count(), 0);

    culler.update_visibility(&front_camera(), true).unwrap();
    let update = culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert!(update.unseen.is_empty());
    assert!(update.visible.is_empty());
}

#[tokio::test]
async fn test_requests_during_a_pass_are_coalesced() {
    let mut culler = renderer();
    culler.add("front", &opaque_cube(Vec3::ZERO));

    assert!(culler.update_visibility(&front_camera(), true).unwrap());
    assert!(culler.is_busy());
    assert!(!culler.update_visibility(&front_camera(), true).unwrap());
    assert!(!culler.update_visibility(&front_camera(), true).unwrap());
    assert!(culler.needs_update);
    assert_eq!(culler.pass_count(), 1);

    culler.finish_pass(PASS_TIMEOUT).unwrap().unwrap();
    assert!(culler.update_visibility(&front_camera(), false).unwrap());
    assert_eq!(culler.pass_count(), 2);
}

#[tokio::test]
async fn test_dispose_twice() {
    let mut culler = renderer();
    let disposed = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&disposed);
    culler.on_disposed.add(move |_| *counter.lock().unwrap() += 1);
    culler.add("front", &opaque_cube(Vec3::ZERO));

    culler.dispose();
    culler.dispose();

    assert_eq!(*disposed.lock().unwrap(), 1);
    assert!(culler.is_disposed());
    assert!(culler.is_empty());
    assert!(culler.scene().is_empty());
    assert!(!culler.add("late", &opaque_cube(Vec3::ZERO)));
    assert!(!culler.update_visibility(&front_camera(), true).unwrap());
}
